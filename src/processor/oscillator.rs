//! Voice processor: a simple non bandlimited oscillator with an ADSR envelope and an
//! optional per voice lowpass filter.

use crate::{
    device::{
        Processor, RenderContext, VoiceControlBuffers, VoiceProcState, VoiceStartContext,
    },
    utils::{
        buffer::{WorkBufferId, WorkBuffers},
        envelope::{AdsrEnvelope, AdsrParameters, AdsrStage},
        filter::StateVariableLowpass,
    },
};

// -------------------------------------------------------------------------------------------------

/// Waveform shapes of the oscillator processor.
#[derive(
    Debug, Default, Copy, Clone, PartialEq, strum::Display, strum::EnumString, strum::VariantNames,
)]
pub enum Waveform {
    #[default]
    Sine,
    Triangle,
    Sawtooth,
    Square,
}

impl Waveform {
    /// Sample the waveform at the given phase in range \[0, 1).
    #[inline]
    fn sample(&self, phase: f64) -> f32 {
        let value = match self {
            Waveform::Sine => (phase * std::f64::consts::TAU).sin(),
            Waveform::Triangle => {
                if phase < 0.5 {
                    4.0 * phase - 1.0
                } else {
                    -4.0 * phase + 3.0
                }
            }
            Waveform::Sawtooth => 2.0 * phase - 1.0,
            Waveform::Square => {
                if phase < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
        };
        value as f32
    }
}

// -------------------------------------------------------------------------------------------------

/// Oscillator processor configuration: waveform, envelope shape and filter switch.
pub struct OscillatorProc {
    waveform: Waveform,
    envelope: AdsrParameters,
    filter_enabled: bool,
}

impl OscillatorProc {
    pub fn new(waveform: Waveform) -> Self {
        Self {
            waveform,
            envelope: AdsrParameters::default(),
            filter_enabled: true,
        }
    }

    /// Replace the default envelope shape.
    pub fn with_envelope(mut self, envelope: AdsrParameters) -> Self {
        self.envelope = envelope;
        self
    }

    /// Enable or disable the per voice lowpass filter.
    pub fn with_filter(mut self, enabled: bool) -> Self {
        self.filter_enabled = enabled;
        self
    }
}

impl Processor for OscillatorProc {
    fn name(&self) -> &'static str {
        "oscillator"
    }

    fn is_voice_processor(&self) -> bool {
        true
    }

    fn create_voice_state(&self, sample_rate: u32) -> Option<Box<dyn VoiceProcState>> {
        let mut envelope = self.envelope.clone();
        envelope.set_sample_rate(sample_rate);
        Some(Box::new(OscillatorVoice {
            waveform: self.waveform,
            parameters: envelope,
            filter_enabled: self.filter_enabled,
            phase: 0.0,
            envelope: AdsrEnvelope::new(),
            filter: StateVariableLowpass::new(),
            started: false,
        }))
    }
}

// -------------------------------------------------------------------------------------------------

struct OscillatorVoice {
    waveform: Waveform,
    parameters: AdsrParameters,
    filter_enabled: bool,
    phase: f64,
    envelope: AdsrEnvelope,
    filter: StateVariableLowpass,
    started: bool,
}

impl VoiceProcState for OscillatorVoice {
    fn note_on(&mut self, _start: &VoiceStartContext) {
        self.phase = 0.0;
        self.filter.reset();
        self.envelope.note_on(&self.parameters);
        self.started = true;
    }

    fn note_off(&mut self) {
        self.envelope.note_off(&self.parameters);
    }

    fn is_active(&self) -> bool {
        self.started && self.envelope.stage() != AdsrStage::Idle
    }

    fn reset(&mut self) {
        self.envelope.reset();
        self.filter.reset();
        self.phase = 0.0;
    }

    fn render(
        &mut self,
        buffers: &mut WorkBuffers,
        _inputs: &[WorkBufferId],
        outputs: &[WorkBufferId],
        controls: &VoiceControlBuffers,
        frames: usize,
        ctx: &RenderContext,
    ) -> usize {
        let channel_count = ctx.channel_count;
        let sample_rate = ctx.sample_rate;
        let (output, pitch, force, cutoff) = buffers.voice_io(
            outputs[0],
            controls.pitch,
            controls.force,
            controls.cutoff,
            frames * channel_count,
            frames,
        );

        for frame in 0..frames {
            let gain = self.envelope.run(&self.parameters);
            let mut sample = self.waveform.sample(self.phase) * gain * force[frame];
            if self.filter_enabled {
                sample = self.filter.tick(sample, cutoff[frame], sample_rate);
            }
            for channel in 0..channel_count {
                output[frame * channel_count + channel] = sample;
            }

            self.phase += pitch[frame] as f64 / sample_rate as f64;
            while self.phase >= 1.0 {
                self.phase -= 1.0;
            }

            if self.envelope.stage() == AdsrStage::Idle {
                return frame + 1;
            }
        }
        frames
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const FRAMES: usize = 64;
    const CHANNELS: usize = 2;

    fn render_setup() -> (WorkBuffers, VoiceControlBuffers, RenderContext) {
        let mut buffers = WorkBuffers::new(4, FRAMES, CHANNELS).unwrap();
        let controls = VoiceControlBuffers {
            pitch: WorkBufferId(1),
            force: WorkBufferId(2),
            cutoff: WorkBufferId(3),
        };
        buffers.slice_mut(controls.pitch, FRAMES).fill(440.0);
        buffers.slice_mut(controls.force, FRAMES).fill(1.0);
        buffers.slice_mut(controls.cutoff, FRAMES).fill(20000.0);
        (buffers, controls, RenderContext::default())
    }

    fn start_context() -> VoiceStartContext {
        VoiceStartContext {
            pitch_cents: 6900.0,
            force_db: 0.0,
            seed: 1,
        }
    }

    #[test]
    fn renders_audible_output_while_held() {
        let proc = OscillatorProc::new(Waveform::Sine).with_filter(false);
        let mut voice = proc.create_voice_state(44100).unwrap();
        assert!(!voice.is_active());

        voice.note_on(&start_context());
        assert!(voice.is_active());

        let (mut buffers, controls, ctx) = render_setup();
        let rendered = voice.render(
            &mut buffers,
            &[],
            &[WorkBufferId(0)],
            &controls,
            FRAMES,
            &ctx,
        );
        assert_eq!(rendered, FRAMES);
        assert!(voice.is_active());
        let output = buffers.slice(WorkBufferId(0), FRAMES * CHANNELS);
        assert!(output.iter().any(|sample| sample.abs() > 0.01));
    }

    #[test]
    fn short_return_when_release_completes() {
        let envelope = AdsrParameters::new(
            Duration::ZERO,
            Duration::ZERO,
            1.0,
            // ~10 frames of release at 44.1 kHz
            Duration::from_micros(227),
            44100,
        )
        .unwrap();
        let proc = OscillatorProc::new(Waveform::Sine)
            .with_filter(false)
            .with_envelope(envelope);
        let mut voice = proc.create_voice_state(44100).unwrap();
        voice.note_on(&start_context());
        voice.note_off();

        let (mut buffers, controls, ctx) = render_setup();
        let rendered = voice.render(
            &mut buffers,
            &[],
            &[WorkBufferId(0)],
            &controls,
            FRAMES,
            &ctx,
        );
        assert!(rendered < FRAMES, "rendered {rendered} frames");
        assert!(!voice.is_active());
    }

    #[test]
    fn waveform_shapes() {
        assert_eq!(Waveform::Square.sample(0.25), 1.0);
        assert_eq!(Waveform::Square.sample(0.75), -1.0);
        assert!((Waveform::Sawtooth.sample(0.5)).abs() < 1e-6);
        assert!((Waveform::Triangle.sample(0.5) - 1.0).abs() < 1e-6);
        assert!((Waveform::Sine.sample(0.0)).abs() < 1e-6);
    }
}
