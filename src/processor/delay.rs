//! Continuous processor: a feedback delay whose line memory lives in the device state.

use std::time::Duration;

use four_cc::FourCC;

use crate::{
    device::{DeviceState, Processor, RenderContext},
    error::Error,
    utils::buffer::{WorkBufferId, WorkBuffers},
};

// -------------------------------------------------------------------------------------------------

/// Delay processor configuration. The delay time is fixed at construction so the line buffer
/// can be allocated up front; feedback is adjustable at render time via
/// [`DelayProc::FEEDBACK`].
pub struct DelayProc {
    delay_time: Duration,
    feedback: f32,
}

impl DelayProc {
    /// Parameter id of the feedback amount, taking a value in range \[0, 0.98\].
    pub const FEEDBACK: FourCC = FourCC(*b"fdbk");

    const MAX_FEEDBACK: f32 = 0.98;

    pub fn new(delay_time: Duration, feedback: f32) -> Self {
        Self {
            delay_time,
            feedback: feedback.clamp(0.0, Self::MAX_FEEDBACK),
        }
    }
}

impl Processor for DelayProc {
    fn name(&self) -> &'static str {
        "delay"
    }

    fn audio_in_count(&self) -> usize {
        1
    }

    fn create_state(
        &self,
        sample_rate: u32,
        _max_block_frames: usize,
        channel_count: usize,
    ) -> Option<Box<dyn DeviceState>> {
        let delay_frames =
            ((self.delay_time.as_secs_f64() * sample_rate as f64) as usize).max(1);
        Some(Box::new(DelayState {
            line: vec![0.0; delay_frames * channel_count],
            pos: 0,
            feedback: self.feedback,
        }))
    }
}

// -------------------------------------------------------------------------------------------------

struct DelayState {
    line: Vec<f32>,
    pos: usize,
    feedback: f32,
}

impl DeviceState for DelayState {
    fn reset(&mut self) {
        self.line.fill(0.0);
        self.pos = 0;
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
        for (sample_in, sample_out) in input.iter().zip(output.iter_mut()) {
            let delayed = self.line[self.pos];
            *sample_out = *sample_in + delayed;
            self.line[self.pos] = *sample_in + delayed * self.feedback;
            self.pos += 1;
            if self.pos == self.line.len() {
                self.pos = 0;
            }
        }
    }

    fn set_parameter(&mut self, id: FourCC, value: f32) -> Result<(), Error> {
        if id == DelayProc::FEEDBACK {
            if !value.is_finite() {
                return Err(Error::ParameterError(format!(
                    "invalid feedback value: {value}"
                )));
            }
            self.feedback = value.clamp(0.0, DelayProc::MAX_FEEDBACK);
            Ok(())
        } else {
            Err(Error::ParameterError(format!(
                "Unknown parameter: '{id}' for processor 'delay'"
            )))
        }
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const FRAMES: usize = 16;
    const CHANNELS: usize = 2;

    #[test]
    fn history_persists_across_blocks() {
        // 8 frame delay at a 1 kHz test rate
        let proc = DelayProc::new(Duration::from_millis(8), 0.0);
        let mut state = proc.create_state(1000, FRAMES, CHANNELS).unwrap();
        let mut buffers = WorkBuffers::new(2, FRAMES, CHANNELS).unwrap();
        let ctx = RenderContext {
            sample_rate: 1000,
            ..RenderContext::default()
        };
        let samples = FRAMES * CHANNELS;

        // block 0: an impulse in frame 0
        buffers.clear(WorkBufferId(0), samples);
        buffers.slice_mut(WorkBufferId(0), samples)[0] = 1.0;
        state.render(
            &mut buffers,
            &[WorkBufferId(0)],
            &[WorkBufferId(1)],
            FRAMES,
            &ctx,
        );
        let output = buffers.slice(WorkBufferId(1), samples);
        assert_eq!(output[0], 1.0);
        // the echo lands 8 frames later, within the same block
        assert_eq!(output[8 * CHANNELS], 1.0);

        // block 1: silence in, no residue without feedback
        buffers.clear(WorkBufferId(0), samples);
        state.render(
            &mut buffers,
            &[WorkBufferId(0)],
            &[WorkBufferId(1)],
            FRAMES,
            &ctx,
        );
        assert!(buffers.slice(WorkBufferId(1), samples).iter().all(|s| *s == 0.0));
    }

    #[test]
    fn feedback_repeats_the_echo() {
        let proc = DelayProc::new(Duration::from_millis(4), 0.5);
        let mut state = proc.create_state(1000, FRAMES, CHANNELS).unwrap();
        let mut buffers = WorkBuffers::new(2, FRAMES, CHANNELS).unwrap();
        let ctx = RenderContext {
            sample_rate: 1000,
            ..RenderContext::default()
        };
        let samples = FRAMES * CHANNELS;

        buffers.clear(WorkBufferId(0), samples);
        buffers.slice_mut(WorkBufferId(0), samples)[0] = 1.0;
        state.render(
            &mut buffers,
            &[WorkBufferId(0)],
            &[WorkBufferId(1)],
            FRAMES,
            &ctx,
        );
        let output = buffers.slice(WorkBufferId(1), samples);
        assert_eq!(output[0], 1.0);
        assert_eq!(output[4 * CHANNELS], 1.0);
        assert_eq!(output[8 * CHANNELS], 0.5);
        assert_eq!(output[12 * CHANNELS], 0.25);
    }

    #[test]
    fn reset_clears_the_line() {
        let proc = DelayProc::new(Duration::from_millis(4), 0.5);
        let mut state = proc.create_state(1000, FRAMES, CHANNELS).unwrap();
        let mut buffers = WorkBuffers::new(2, FRAMES, CHANNELS).unwrap();
        let ctx = RenderContext {
            sample_rate: 1000,
            ..RenderContext::default()
        };
        let samples = FRAMES * CHANNELS;

        buffers.slice_mut(WorkBufferId(0), samples).fill(1.0);
        state.render(
            &mut buffers,
            &[WorkBufferId(0)],
            &[WorkBufferId(1)],
            FRAMES,
            &ctx,
        );
        state.reset();

        buffers.clear(WorkBufferId(0), samples);
        state.render(
            &mut buffers,
            &[WorkBufferId(0)],
            &[WorkBufferId(1)],
            FRAMES,
            &ctx,
        );
        assert!(buffers.slice(WorkBufferId(1), samples).iter().all(|s| *s == 0.0));
    }
}
