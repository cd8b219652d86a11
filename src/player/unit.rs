//! Per audio unit rendering: runs the unit's voice signal plan for every active voice group
//! and accumulates the unit's output for the mixed plan.

use crate::{
    device::{
        graph::Connections, plan::SignalPlan, AudioUnit, DeviceId, RenderContext,
        VoiceControlBuffers, MASTER_DEVICE_ID,
    },
    error::Error,
    limits::VOICES_MAX,
    utils::{
        buffer::{add_buffers, WorkBufferId, WorkBuffers},
        panning_factors,
    },
    voice::{pool::VoicePool, Voice},
};

// -------------------------------------------------------------------------------------------------

/// Owns everything one audio unit needs to render a block: its voice signal plan, a private
/// work buffer pool partitioned at plan build time, and the output accumulation buffer the
/// mixed plan consumes.
///
/// Exactly one thread processes a given unit per block, so no per device locking is needed;
/// cross-thread visibility is established by the render barriers.
pub(crate) struct UnitRenderer {
    unit_device: DeviceId,
    plan: SignalPlan,
    buffers: WorkBuffers,
    controls: VoiceControlBuffers,
    panning: WorkBufferId,
    output: Vec<f32>,
    /// Voice data taken from the pool for the current block, sorted by (group, processor).
    voices: Vec<Box<Voice>>,
    /// Processor device id -> index into the current group slice. Rebuilt per group.
    voice_of_device: Vec<Option<usize>>,
    /// Processor device id -> whether the device is part of the voice plan.
    planned: Vec<bool>,
}

impl UnitRenderer {
    /// Build the renderer for one audio unit: validates the unit's connection graph and
    /// derives its voice signal plan. All structural errors of the unit surface here,
    /// before any audio renders.
    pub fn new(
        unit_device: DeviceId,
        unit: &AudioUnit,
        block_frames: usize,
        channel_count: usize,
    ) -> Result<Self, Error> {
        for (_, device) in unit.processors().iter() {
            if let Some(processor) = device.processor() {
                if !processor.is_voice_processor() {
                    return Err(Error::ParameterError(format!(
                        "audio unit '{}' contains continuous processor '{}'",
                        unit.name(),
                        processor.name()
                    )));
                }
            }
        }

        let connections =
            Connections::build(unit.connections(), unit.processors(), MASTER_DEVICE_ID)?;
        let plan = SignalPlan::build(&connections, unit.processors())?;

        // plan buffers, then pitch/force/cutoff/panning control scratch
        let buffer_count = plan.buffer_count() + 4;
        let buffers = WorkBuffers::new(buffer_count, block_frames, channel_count)?;
        let controls = VoiceControlBuffers {
            pitch: WorkBufferId(plan.buffer_count()),
            force: WorkBufferId(plan.buffer_count() + 1),
            cutoff: WorkBufferId(plan.buffer_count() + 2),
        };
        let panning = WorkBufferId(plan.buffer_count() + 3);

        let mut output = Vec::new();
        output.try_reserve_exact(block_frames * channel_count)?;
        output.resize(block_frames * channel_count, 0.0);

        let mut voices = Vec::new();
        voices.try_reserve_exact(VOICES_MAX)?;

        let planned = (0..unit.processors().len())
            .map(|device| plan.contains_device(device))
            .collect();

        Ok(Self {
            unit_device,
            plan,
            buffers,
            controls,
            panning,
            output,
            voices,
            voice_of_device: vec![None; unit.processors().len()],
            planned,
        })
    }

    /// The unit's global device id.
    pub fn unit_device(&self) -> DeviceId {
        self.unit_device
    }

    /// The accumulated unit output of the last processed chunk.
    pub fn output(&self) -> &[f32] {
        &self.output
    }

    /// Load balancing weight: the number of voices rendered this block.
    pub fn weight(&self) -> usize {
        self.voices.len().max(1)
    }

    /// Move this unit's voices out of the pool for the render phase.
    pub fn take_voices(&mut self, pool: &mut VoicePool) {
        debug_assert!(self.voices.is_empty(), "voices from last block not returned");
        pool.take_for_unit(self.unit_device, &mut self.voices);
    }

    /// Return the voices to their pool slots after the render phase completed. Finished
    /// voices are reclaimed by the pool in the next event processing phase.
    pub fn return_voices(&mut self, pool: &mut VoicePool) {
        pool.finish_render(&mut self.voices);
    }

    /// Render all of this unit's voice groups for one chunk and accumulate their output.
    /// Returns whether the unit produced audible output.
    pub fn process(
        &mut self,
        frames: usize,
        ctx: &RenderContext,
        channel_muted: &[bool],
    ) -> bool {
        let channel_count = ctx.channel_count;
        let samples = frames * channel_count;
        self.output[..samples].fill(0.0);

        if self.voices.is_empty() {
            return false;
        }
        let Some(master_input) = self.plan.master_input() else {
            // nothing is wired to the unit output: cut the voices so their slots don't
            // stay occupied forever
            for voice in &mut self.voices {
                voice.proc_state.reset();
            }
            return false;
        };

        let mut audible = false;
        let mut group_start = 0;
        while group_start < self.voices.len() {
            let group = self.voices[group_start].group;
            let mut group_end = group_start + 1;
            while group_end < self.voices.len() && self.voices[group_end].group == group {
                group_end += 1;
            }

            let voices = &mut self.voices[group_start..group_end];
            let mix = !channel_muted
                .get(voices[0].channel)
                .copied()
                .unwrap_or(false);

            // voices bound to processors outside the plan would never advance; cut them
            for voice in voices.iter_mut() {
                if !self.planned[voice.proc_device] {
                    voice.proc_state.reset();
                }
            }

            if voices.iter().any(|voice| voice.proc_state.is_active()) {
                // render the carried controller trajectories; every voice advances its own
                // copy, and as the copies receive identical events they stay in lockstep
                for voice in voices.iter_mut() {
                    voice
                        .controls
                        .pitch
                        .render(self.buffers.slice_mut(self.controls.pitch, frames));
                    voice
                        .controls
                        .force
                        .render(self.buffers.slice_mut(self.controls.force, frames));
                    voice
                        .controls
                        .filter
                        .render(self.buffers.slice_mut(self.controls.cutoff, frames));
                    voice
                        .controls
                        .panning
                        .render(self.buffers.slice_mut(self.panning, frames));
                }

                self.voice_of_device.fill(None);
                for (index, voice) in voices.iter().enumerate() {
                    self.voice_of_device[voice.proc_device] = Some(index);
                }

                let rendered = self.plan.process_voice_group(
                    voices,
                    &self.voice_of_device,
                    &mut self.buffers,
                    &self.controls,
                    frames,
                    ctx,
                );

                if rendered > 0 && mix {
                    // spatialize and accumulate the group's master signal
                    let master = self.buffers.slice(master_input, rendered * channel_count);
                    let panning = self.buffers.slice(self.panning, rendered);
                    let output = &mut self.output[..rendered * channel_count];
                    if channel_count >= 2 {
                        for (frame, position) in panning.iter().enumerate() {
                            let (left, right) = panning_factors(*position);
                            output[frame * channel_count] +=
                                master[frame * channel_count] * left;
                            output[frame * channel_count + 1] +=
                                master[frame * channel_count + 1] * right;
                        }
                    } else {
                        add_buffers(output, master);
                    }
                    audible = true;
                }
            }

            group_start = group_end;
        }
        audible
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        composition::ChannelDefaults,
        event::TriggerEvent,
        limits::EVENT_QUEUE_SIZE,
        processor::{OscillatorProc, Waveform},
        voice::group::VoiceGroupReservations,
        Channel, Composition,
    };

    const FRAMES: usize = 64;

    fn unit_with_note(panning: f64) -> (UnitRenderer, VoicePool) {
        let mut composition = Composition::new();
        let mut unit = AudioUnit::new("test");
        let proc = unit
            .add_processor(Box::new(
                OscillatorProc::new(Waveform::Square).with_filter(false),
            ))
            .unwrap();
        unit.connect((proc, 0), (MASTER_DEVICE_ID, 0));
        let unit_device = composition.add_instrument(unit).unwrap();

        let defaults = ChannelDefaults {
            instrument: Some(unit_device),
            panning,
            ..ChannelDefaults::default()
        };
        let mut channel = Channel::new(0, &defaults, 0, 44100, 120.0);
        let mut pool = VoicePool::new(8).unwrap();
        let reservations = VoiceGroupReservations::new(EVENT_QUEUE_SIZE);
        channel.process_event(
            &TriggerEvent::NoteOn { pitch: 6900.0 },
            composition.devices(),
            &mut pool,
            &reservations,
        );

        let unit = composition
            .devices()
            .get(unit_device)
            .unwrap()
            .audio_unit()
            .unwrap();
        let renderer = UnitRenderer::new(unit_device, unit, FRAMES, 2).unwrap();
        (renderer, pool)
    }

    #[test]
    fn renders_active_voices_into_output() {
        let (mut renderer, mut pool) = unit_with_note(0.0);

        renderer.take_voices(&mut pool);
        let audible = renderer.process(FRAMES, &RenderContext::default(), &[false; 4]);
        renderer.return_voices(&mut pool);

        assert!(audible);
        assert!(renderer.output()[..FRAMES * 2]
            .iter()
            .any(|sample| sample.abs() > 0.01));
        // voices went back to their slots
        assert_eq!(pool.active_count(), 1);
    }

    #[test]
    fn muted_channels_render_but_do_not_mix() {
        let (mut renderer, mut pool) = unit_with_note(0.0);

        renderer.take_voices(&mut pool);
        let audible = renderer.process(FRAMES, &RenderContext::default(), &[true; 4]);
        renderer.return_voices(&mut pool);

        assert!(!audible);
        assert!(renderer.output()[..FRAMES * 2]
            .iter()
            .all(|sample| *sample == 0.0));
    }

    #[test]
    fn hard_panning_silences_the_other_side() {
        let (mut renderer, mut pool) = unit_with_note(-1.0);

        renderer.take_voices(&mut pool);
        renderer.process(FRAMES, &RenderContext::default(), &[false; 4]);
        renderer.return_voices(&mut pool);

        let output = &renderer.output()[..FRAMES * 2];
        let left_energy: f32 = output.iter().step_by(2).map(|s| s.abs()).sum();
        let right_energy: f32 = output.iter().skip(1).step_by(2).map(|s| s.abs()).sum();
        assert!(left_energy > 0.1);
        assert!(right_energy < 1e-3);
    }

    #[test]
    fn voices_of_unwired_processors_are_cut() {
        // the processor is never connected to the unit output, so its voices can't sound;
        // they must be cut instead of occupying pool slots forever
        let mut composition = Composition::new();
        let mut unit = AudioUnit::new("unwired");
        unit.add_processor(Box::new(OscillatorProc::new(Waveform::Sine)))
            .unwrap();
        let unit_device = composition.add_instrument(unit).unwrap();

        let defaults = ChannelDefaults {
            instrument: Some(unit_device),
            ..ChannelDefaults::default()
        };
        let mut channel = Channel::new(0, &defaults, 0, 44100, 120.0);
        let mut pool = VoicePool::new(4).unwrap();
        let reservations = VoiceGroupReservations::new(EVENT_QUEUE_SIZE);
        channel.process_event(
            &TriggerEvent::NoteOn { pitch: 6900.0 },
            composition.devices(),
            &mut pool,
            &reservations,
        );
        assert_eq!(pool.active_count(), 1);

        let unit = composition
            .devices()
            .get(unit_device)
            .unwrap()
            .audio_unit()
            .unwrap();
        let mut renderer = UnitRenderer::new(unit_device, unit, FRAMES, 2).unwrap();
        renderer.take_voices(&mut pool);
        assert!(!renderer.process(FRAMES, &RenderContext::default(), &[false; 4]));
        renderer.return_voices(&mut pool);

        pool.collect_finished();
        assert_eq!(pool.active_count(), 0);
    }

    #[test]
    fn empty_unit_is_inaudible() {
        let mut composition = Composition::new();
        let unit_device = composition.add_instrument(AudioUnit::new("empty")).unwrap();
        let unit = composition
            .devices()
            .get(unit_device)
            .unwrap()
            .audio_unit()
            .unwrap();
        let mut renderer = UnitRenderer::new(unit_device, unit, FRAMES, 2).unwrap();
        assert!(!renderer.process(FRAMES, &RenderContext::default(), &[false; 4]));
    }
}
