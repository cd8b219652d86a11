//! Voice processor: seeded white noise with an ADSR envelope.

use rand::{rngs::SmallRng, Rng, SeedableRng};

use crate::{
    device::{
        Processor, RenderContext, VoiceControlBuffers, VoiceProcState, VoiceStartContext,
    },
    utils::{
        buffer::{WorkBufferId, WorkBuffers},
        envelope::{AdsrEnvelope, AdsrParameters, AdsrStage},
    },
};

// -------------------------------------------------------------------------------------------------

/// Noise processor configuration.
///
/// Each voice reseeds its generator from the triggering channel's deterministic random
/// stream, so renders are reproducible sample for sample.
pub struct NoiseProc {
    envelope: AdsrParameters,
}

impl NoiseProc {
    pub fn new() -> Self {
        Self {
            envelope: AdsrParameters::default(),
        }
    }

    /// Replace the default envelope shape.
    pub fn with_envelope(mut self, envelope: AdsrParameters) -> Self {
        self.envelope = envelope;
        self
    }
}

impl Default for NoiseProc {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor for NoiseProc {
    fn name(&self) -> &'static str {
        "noise"
    }

    fn is_voice_processor(&self) -> bool {
        true
    }

    fn create_voice_state(&self, sample_rate: u32) -> Option<Box<dyn VoiceProcState>> {
        let mut envelope = self.envelope.clone();
        envelope.set_sample_rate(sample_rate);
        Some(Box::new(NoiseVoice {
            parameters: envelope,
            rng: SmallRng::seed_from_u64(0),
            envelope: AdsrEnvelope::new(),
            started: false,
        }))
    }
}

// -------------------------------------------------------------------------------------------------

struct NoiseVoice {
    parameters: AdsrParameters,
    rng: SmallRng,
    envelope: AdsrEnvelope,
    started: bool,
}

impl VoiceProcState for NoiseVoice {
    fn note_on(&mut self, start: &VoiceStartContext) {
        self.rng = SmallRng::seed_from_u64(start.seed);
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
        let (output, _pitch, force, _cutoff) = buffers.voice_io(
            outputs[0],
            controls.pitch,
            controls.force,
            controls.cutoff,
            frames * channel_count,
            frames,
        );

        for frame in 0..frames {
            let gain = self.envelope.run(&self.parameters) * force[frame];
            for channel in 0..channel_count {
                let sample = self.rng.random::<f32>() * 2.0 - 1.0;
                output[frame * channel_count + channel] = sample * gain;
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

    const FRAMES: usize = 64;
    const CHANNELS: usize = 2;

    fn render_voice(seed: u64) -> Vec<f32> {
        let proc = NoiseProc::new();
        let mut voice = proc.create_voice_state(44100).unwrap();
        voice.note_on(&VoiceStartContext {
            pitch_cents: 6900.0,
            force_db: 0.0,
            seed,
        });

        let mut buffers = WorkBuffers::new(4, FRAMES, CHANNELS).unwrap();
        let controls = VoiceControlBuffers {
            pitch: WorkBufferId(1),
            force: WorkBufferId(2),
            cutoff: WorkBufferId(3),
        };
        buffers.slice_mut(controls.force, FRAMES).fill(1.0);
        let ctx = RenderContext::default();
        let rendered = voice.render(
            &mut buffers,
            &[],
            &[WorkBufferId(0)],
            &controls,
            FRAMES,
            &ctx,
        );
        assert_eq!(rendered, FRAMES);
        buffers.slice(WorkBufferId(0), FRAMES * CHANNELS).to_vec()
    }

    #[test]
    fn same_seed_renders_identically() {
        assert_eq!(render_voice(42), render_voice(42));
    }

    #[test]
    fn different_seeds_render_differently() {
        assert_ne!(render_voice(1), render_voice(2));
    }
}
