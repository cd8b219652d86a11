//! Per track runtime state: instrument selection, carried controllers and the foreground
//! voice group.

use rand::{rngs::SmallRng, Rng, SeedableRng};

use crate::{
    composition::ChannelDefaults,
    control::Controls,
    device::{DeviceId, DeviceTable, VoiceStartContext},
    event::TriggerEvent,
    voice::{
        group::{GroupReservation, VoiceGroupReservations},
        pool::VoicePool,
        GroupId, Voice, VoicePriority,
    },
};

// -------------------------------------------------------------------------------------------------

/// One playback channel.
///
/// The channel issues voice reservations for its notes and forwards controller events both to
/// its own persistent [`Controls`] (so a subsequent note inherits the carried state, the
/// "legato carries vibrato" expectation) and to every active foreground voice's own copy.
pub struct Channel {
    index: usize,
    sample_rate: u32,
    defaults: ChannelDefaults,
    seed: u64,
    instrument: Option<DeviceId>,
    foreground: Option<GroupId>,
    muted: bool,
    controls: Controls,
    rng: SmallRng,
    // event phase scratch, preallocated so note handling never allocates lists
    proc_scratch: Vec<DeviceId>,
    slot_scratch: Vec<usize>,
}

impl Channel {
    pub(crate) fn new(
        index: usize,
        defaults: &ChannelDefaults,
        seed: u64,
        sample_rate: u32,
        tempo: f64,
    ) -> Self {
        Self {
            index,
            sample_rate,
            defaults: *defaults,
            seed,
            instrument: defaults.instrument,
            foreground: None,
            muted: false,
            controls: Controls::new(
                crate::utils::A4_PITCH_CENTS,
                defaults.force,
                defaults.panning,
                defaults.cutoff,
                sample_rate,
                tempo,
            ),
            rng: SmallRng::seed_from_u64(seed ^ index as u64),
            proc_scratch: Vec::new(),
            slot_scratch: Vec::new(),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// The channel's current foreground voice group, if any.
    pub fn foreground(&self) -> Option<GroupId> {
        self.foreground
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn controls(&self) -> &Controls {
        &self.controls
    }

    /// Restore the channel for an independent playback start.
    pub(crate) fn reset(&mut self, tempo: f64) {
        self.instrument = self.defaults.instrument;
        self.foreground = None;
        self.muted = false;
        self.controls = Controls::new(
            crate::utils::A4_PITCH_CENTS,
            self.defaults.force,
            self.defaults.panning,
            self.defaults.cutoff,
            self.sample_rate,
            tempo,
        );
        self.rng = SmallRng::seed_from_u64(self.seed ^ self.index as u64);
    }

    pub(crate) fn set_tempo(&mut self, tempo: f64) {
        self.controls.set_tempo(tempo);
    }

    /// Apply one trigger event. Invalid events were already filtered out; global events
    /// (tempo, pattern jumps) are handled by the player before reaching the channel.
    pub(crate) fn process_event(
        &mut self,
        event: &TriggerEvent,
        devices: &DeviceTable,
        pool: &mut VoicePool,
        reservations: &VoiceGroupReservations,
    ) {
        match event {
            TriggerEvent::NoteOn { pitch } => {
                self.note_on(*pitch, devices, pool, reservations);
            }
            TriggerEvent::NoteOff => self.note_off(pool),
            TriggerEvent::SetInstrument { unit } => {
                let is_instrument = devices
                    .get(*unit)
                    .is_some_and(|device| device.audio_unit().is_some());
                if is_instrument {
                    self.instrument = Some(*unit);
                } else {
                    log::warn!(
                        "channel {}: device {unit} is not an instrument, ignoring",
                        self.index
                    );
                }
            }
            TriggerEvent::Mute { muted } => self.muted = *muted,
            _ => {
                // continuous controller: update the channel template and all foreground
                // voice copies; the copies never alias, so each applies independently
                Self::apply_controller(event, &mut self.controls);
                if let Some(group) = self.foreground {
                    pool.for_group_mut(group, |voice| {
                        Self::apply_controller(event, &mut voice.controls);
                    });
                }
            }
        }
    }

    /// Spawn a voice group for a note. Returns false when the note was dropped, which is
    /// a silent admission control outcome, not an error.
    fn note_on(
        &mut self,
        pitch: f64,
        devices: &DeviceTable,
        pool: &mut VoicePool,
        reservations: &VoiceGroupReservations,
    ) -> bool {
        let Some(unit_device) = self.instrument else {
            return false;
        };
        let Some(unit) = devices
            .get(unit_device)
            .filter(|device| device.is_existent())
            .and_then(|device| device.audio_unit())
        else {
            return false;
        };

        // resolve the unit's existent voice processors
        self.proc_scratch.clear();
        for (proc_device, device) in unit.processors().iter() {
            let is_voice_proc = device.is_existent()
                && device
                    .processor()
                    .is_some_and(|processor| processor.is_voice_processor());
            if is_voice_proc {
                self.proc_scratch.push(proc_device);
            }
        }
        if self.proc_scratch.is_empty() {
            return false;
        }

        if !pool.reserve(self.proc_scratch.len(), &mut self.slot_scratch) {
            log::debug!(
                "channel {}: voice pool exhausted, dropping note",
                self.index
            );
            return false;
        }

        // the new note carries the channel's controller state; only the pitch restarts
        self.controls.pitch.slider.set_value(pitch);

        let group = pool.next_group_id();
        let trigger_order = pool.next_trigger_order();
        for (position, proc_device) in self.proc_scratch.iter().enumerate() {
            let slot = self.slot_scratch[position];
            let processor = unit
                .processors()
                .get(*proc_device)
                .and_then(|device| device.processor())
                .expect("voice processors were just resolved");
            let mut proc_state = processor
                .create_voice_state(self.sample_rate)
                .expect("voice processors create voice states");
            proc_state.note_on(&VoiceStartContext {
                pitch_cents: pitch,
                force_db: self.controls.force.slider.value(),
                seed: self.rng.random::<u64>(),
            });
            pool.bind(
                slot,
                Box::new(Voice {
                    slot,
                    group,
                    channel: self.index,
                    unit_device,
                    proc_device: *proc_device,
                    priority: VoicePriority::New,
                    trigger_order,
                    controls: self.controls.clone(),
                    proc_state,
                }),
            );
        }

        // the previous foreground group keeps decaying in the background, unreachable by
        // further per note events from this channel
        if let Some(previous) = self.foreground.replace(group) {
            pool.demote_group(previous);
        }

        if reservations
            .push(GroupReservation {
                channel: self.index,
                group,
                voice_count: self.proc_scratch.len(),
            })
            .is_err()
        {
            log::warn!(
                "channel {}: reservation ring full, promoting group directly",
                self.index
            );
            pool.promote_group(group);
        }
        true
    }

    /// Forward a release transition to every foreground voice. Deallocation stays the voice
    /// pool's job once each voice's own envelope completes.
    fn note_off(&mut self, pool: &mut VoicePool) {
        if let Some(group) = self.foreground {
            pool.for_group_mut(group, |voice| {
                voice.proc_state.note_off();
                // released voices become stealable
                voice.priority = VoicePriority::Background;
            });
        }
    }

    fn apply_controller(event: &TriggerEvent, controls: &mut Controls) {
        match event {
            TriggerEvent::SetForce { force } => controls.force.slider.set_value(*force),
            TriggerEvent::SlideForce { force } => controls.force.slider.start(*force),
            TriggerEvent::SlideForceLength { length } => {
                controls.force.slider.set_length(*length)
            }
            TriggerEvent::SetPitch { pitch } => controls.pitch.slider.set_value(*pitch),
            TriggerEvent::SlidePitch { pitch } => controls.pitch.slider.start(*pitch),
            TriggerEvent::SlidePitchLength { length } => {
                controls.pitch.slider.set_length(*length)
            }
            TriggerEvent::VibratoSpeed { speed } => controls.pitch.vibrato.set_speed(*speed),
            TriggerEvent::VibratoDepth { depth } => controls.pitch.vibrato.set_depth(*depth),
            TriggerEvent::TremoloSpeed { speed } => controls.force.tremolo.set_speed(*speed),
            TriggerEvent::TremoloDepth { depth } => controls.force.tremolo.set_depth(*depth),
            TriggerEvent::SetPanning { panning } => {
                controls.panning.slider.set_value(*panning)
            }
            TriggerEvent::SlidePanning { panning } => controls.panning.slider.start(*panning),
            TriggerEvent::SlidePanningLength { length } => {
                controls.panning.slider.set_length(*length)
            }
            TriggerEvent::SetCutoff { cutoff } => controls.filter.slider.set_value(*cutoff),
            TriggerEvent::SlideCutoff { cutoff } => controls.filter.slider.start(*cutoff),
            TriggerEvent::SlideCutoffLength { length } => {
                controls.filter.slider.set_length(*length)
            }
            TriggerEvent::AutowahSpeed { speed } => controls.filter.autowah.set_speed(*speed),
            TriggerEvent::AutowahDepth { depth } => controls.filter.autowah.set_depth(*depth),
            _ => {}
        }
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        composition::Composition,
        device::AudioUnit,
        limits::EVENT_QUEUE_SIZE,
        processor::{OscillatorProc, Waveform},
    };

    fn test_setup(voice_procs: usize) -> (Composition, DeviceId) {
        let mut composition = Composition::new();
        let mut unit = AudioUnit::new("test");
        for _ in 0..voice_procs {
            unit.add_processor(Box::new(OscillatorProc::new(Waveform::Sine)))
                .unwrap();
        }
        let unit_device = composition.add_instrument(unit).unwrap();
        (composition, unit_device)
    }

    fn test_channel(unit_device: DeviceId) -> Channel {
        let defaults = ChannelDefaults {
            instrument: Some(unit_device),
            ..ChannelDefaults::default()
        };
        Channel::new(0, &defaults, 0, 44100, 120.0)
    }

    #[test]
    fn note_on_reserves_one_voice_per_processor() {
        let (composition, unit_device) = test_setup(3);
        let mut channel = test_channel(unit_device);
        let mut pool = VoicePool::new(8).unwrap();
        let reservations = VoiceGroupReservations::new(EVENT_QUEUE_SIZE);

        channel.process_event(
            &TriggerEvent::NoteOn { pitch: 6900.0 },
            composition.devices(),
            &mut pool,
            &reservations,
        );
        assert_eq!(pool.active_count(), 3);
        assert_eq!(reservations.len(), 1);
        let group = channel.foreground().unwrap();
        assert_eq!(pool.group_voices(group).count(), 3);
    }

    #[test]
    fn new_note_demotes_previous_group() {
        let (composition, unit_device) = test_setup(1);
        let mut channel = test_channel(unit_device);
        let mut pool = VoicePool::new(8).unwrap();
        let reservations = VoiceGroupReservations::new(EVENT_QUEUE_SIZE);

        channel.process_event(
            &TriggerEvent::NoteOn { pitch: 6900.0 },
            composition.devices(),
            &mut pool,
            &reservations,
        );
        let first = channel.foreground().unwrap();

        channel.process_event(
            &TriggerEvent::NoteOn { pitch: 7200.0 },
            composition.devices(),
            &mut pool,
            &reservations,
        );
        let second = channel.foreground().unwrap();
        assert_ne!(first, second);

        // the old group still sounds, but in the background
        let mut old_priorities = Vec::new();
        pool.for_group_mut(first, |voice| old_priorities.push(voice.priority()));
        assert_eq!(old_priorities, vec![VoicePriority::Background]);
    }

    #[test]
    fn exhausted_pool_drops_note_silently() {
        let (composition, unit_device) = test_setup(2);
        let mut channel = test_channel(unit_device);
        let mut pool = VoicePool::new(2).unwrap();
        let reservations = VoiceGroupReservations::new(EVENT_QUEUE_SIZE);

        channel.process_event(
            &TriggerEvent::NoteOn { pitch: 6900.0 },
            composition.devices(),
            &mut pool,
            &reservations,
        );
        let first = channel.foreground().unwrap();

        // all slots taken by the (unreleased) first note: the second note is dropped and the
        // first keeps sounding with its foreground handle intact
        channel.process_event(
            &TriggerEvent::NoteOn { pitch: 7200.0 },
            composition.devices(),
            &mut pool,
            &reservations,
        );
        assert_eq!(channel.foreground(), Some(first));
        assert_eq!(pool.group_voices(first).count(), 2);
        assert_eq!(reservations.len(), 1);
    }

    #[test]
    fn controllers_reach_channel_and_foreground_voices() {
        let (composition, unit_device) = test_setup(1);
        let mut channel = test_channel(unit_device);
        let mut pool = VoicePool::new(4).unwrap();
        let reservations = VoiceGroupReservations::new(EVENT_QUEUE_SIZE);

        channel.process_event(
            &TriggerEvent::NoteOn { pitch: 6900.0 },
            composition.devices(),
            &mut pool,
            &reservations,
        );
        channel.process_event(
            &TriggerEvent::VibratoDepth { depth: 50.0 },
            composition.devices(),
            &mut pool,
            &reservations,
        );

        assert_eq!(channel.controls().pitch.vibrato.depth(), 50.0);
        let group = channel.foreground().unwrap();
        let mut voice_depths = Vec::new();
        pool.for_group_mut(group, |voice| {
            voice_depths.push(voice.controls.pitch.vibrato.depth())
        });
        assert_eq!(voice_depths, vec![50.0]);

        // a subsequent note inherits the carried vibrato
        channel.process_event(
            &TriggerEvent::NoteOn { pitch: 7200.0 },
            composition.devices(),
            &mut pool,
            &reservations,
        );
        let group = channel.foreground().unwrap();
        let mut carried = Vec::new();
        pool.for_group_mut(group, |voice| {
            carried.push(voice.controls.pitch.vibrato.depth())
        });
        assert_eq!(carried, vec![50.0]);
    }

    #[test]
    fn note_off_releases_without_deallocating() {
        let (composition, unit_device) = test_setup(1);
        let mut channel = test_channel(unit_device);
        let mut pool = VoicePool::new(4).unwrap();
        let reservations = VoiceGroupReservations::new(EVENT_QUEUE_SIZE);

        channel.process_event(
            &TriggerEvent::NoteOn { pitch: 6900.0 },
            composition.devices(),
            &mut pool,
            &reservations,
        );
        channel.process_event(
            &TriggerEvent::NoteOff,
            composition.devices(),
            &mut pool,
            &reservations,
        );
        // the voice is still allocated (decaying under its release envelope)
        let group = channel.foreground().unwrap();
        assert_eq!(pool.group_voices(group).count(), 1);
    }
}
