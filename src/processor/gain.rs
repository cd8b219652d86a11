//! Continuous processor: a gain stage with exponentially smoothed level changes.

use four_cc::FourCC;

use crate::{
    device::{DeviceState, Processor, RenderContext},
    error::Error,
    utils::{
        buffer::{scale_buffer, WorkBufferId, WorkBuffers},
        db_to_linear,
    },
};

// -------------------------------------------------------------------------------------------------

/// Gain processor configuration. The gain parameter can be changed at render time via
/// [`DeviceState::set_parameter`] with the [`GainProc::GAIN`] id; changes ramp exponentially
/// to avoid clicks.
pub struct GainProc {
    gain_db: f32,
}

impl GainProc {
    /// Parameter id of the gain level, taking a value in dB.
    pub const GAIN: FourCC = FourCC(*b"gain");

    const MIN_DB: f32 = -60.0;
    const MAX_DB: f32 = 12.0;

    pub fn new(gain_db: f32) -> Self {
        Self {
            gain_db: gain_db.clamp(Self::MIN_DB, Self::MAX_DB),
        }
    }
}

impl Processor for GainProc {
    fn name(&self) -> &'static str {
        "gain"
    }

    fn audio_in_count(&self) -> usize {
        1
    }

    fn create_state(
        &self,
        sample_rate: u32,
        _max_block_frames: usize,
        _channel_count: usize,
    ) -> Option<Box<dyn DeviceState>> {
        let gain = db_to_linear(self.gain_db);
        Some(Box::new(GainState {
            initial: gain,
            current: gain,
            target: gain,
            // scale the fixed inertia to the actual rate so ramp times stay constant
            inertia: 0.02 * 44100.0 / sample_rate as f32,
        }))
    }
}

// -------------------------------------------------------------------------------------------------

struct GainState {
    initial: f32,
    current: f32,
    target: f32,
    inertia: f32,
}

impl GainState {
    const RAMP_EPSILON: f32 = 1e-5;

    fn need_ramp(&self) -> bool {
        (self.target - self.current).abs() > Self::RAMP_EPSILON
    }
}

impl DeviceState for GainState {
    fn reset(&mut self) {
        self.current = self.initial;
        self.target = self.initial;
    }

    fn render(
        &mut self,
        buffers: &mut WorkBuffers,
        inputs: &[WorkBufferId],
        outputs: &[WorkBufferId],
        frames: usize,
        ctx: &RenderContext,
    ) {
        let samples = frames * ctx.channel_count;
        let (input, output) = buffers.in_out(inputs[0], outputs[0], samples);
        output.copy_from_slice(input);

        if self.need_ramp() {
            for frame in output.chunks_exact_mut(ctx.channel_count) {
                self.current += (self.target - self.current) * self.inertia;
                for sample in frame.iter_mut() {
                    *sample *= self.current;
                }
            }
            if !self.need_ramp() {
                self.current = self.target;
            }
        } else if self.target != 1.0 {
            scale_buffer(output, self.target);
        }
    }

    fn set_parameter(&mut self, id: FourCC, value: f32) -> Result<(), Error> {
        if id == GainProc::GAIN {
            if !value.is_finite() {
                return Err(Error::ParameterError(format!(
                    "invalid gain value: {value}"
                )));
            }
            self.target = db_to_linear(value.clamp(GainProc::MIN_DB, GainProc::MAX_DB));
            Ok(())
        } else {
            Err(Error::ParameterError(format!(
                "Unknown parameter: '{id}' for processor 'gain'"
            )))
        }
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const FRAMES: usize = 32;
    const CHANNELS: usize = 2;

    fn render(state: &mut Box<dyn DeviceState>, buffers: &mut WorkBuffers) -> Vec<f32> {
        let samples = FRAMES * CHANNELS;
        buffers.slice_mut(WorkBufferId(0), samples).fill(0.5);
        state.render(
            buffers,
            &[WorkBufferId(0)],
            &[WorkBufferId(1)],
            FRAMES,
            &RenderContext::default(),
        );
        buffers.slice(WorkBufferId(1), samples).to_vec()
    }

    #[test]
    fn applies_unity_gain_untouched() {
        let proc = GainProc::new(0.0);
        let mut state = proc.create_state(44100, FRAMES, CHANNELS).unwrap();
        let mut buffers = WorkBuffers::new(2, FRAMES, CHANNELS).unwrap();
        let output = render(&mut state, &mut buffers);
        assert!(output.iter().all(|sample| (*sample - 0.5).abs() < 1e-6));
    }

    #[test]
    fn parameter_change_ramps_towards_target() {
        let proc = GainProc::new(0.0);
        let mut state = proc.create_state(44100, FRAMES, CHANNELS).unwrap();
        let mut buffers = WorkBuffers::new(2, FRAMES, CHANNELS).unwrap();

        state.set_parameter(GainProc::GAIN, -60.0).unwrap();
        let output = render(&mut state, &mut buffers);
        // ramping down: first frame close to unity, later frames quieter
        assert!(output[0] < 0.5 && output[0] > 0.4);
        assert!(output[output.len() - 1] < output[0]);

        // after enough blocks the target is reached
        let mut last = output;
        for _ in 0..200 {
            last = render(&mut state, &mut buffers);
        }
        assert!(last.iter().all(|sample| *sample < 0.001));
    }

    #[test]
    fn rejects_unknown_parameters() {
        let proc = GainProc::new(0.0);
        let mut state = proc.create_state(44100, FRAMES, CHANNELS).unwrap();
        assert!(state.set_parameter(FourCC(*b"nope"), 1.0).is_err());
        assert!(state.set_parameter(GainProc::GAIN, f32::NAN).is_err());
    }
}
