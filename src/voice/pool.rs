//! The bounded voice pool: the sole authority on voice lifetime.

use crate::{
    error::Error,
    limits::VOICES_MAX,
    voice::{group::VoiceGroup, GroupId, Voice, VoiceId, VoicePriority},
};

// -------------------------------------------------------------------------------------------------

struct Slot {
    generation: u64,
    voice: Option<Box<Voice>>,
    /// Voice data is currently moved out to a unit renderer for the render phase.
    in_flight: bool,
}

impl Slot {
    fn is_free(&self) -> bool {
        self.voice.is_none() && !self.in_flight
    }
}

// -------------------------------------------------------------------------------------------------

/// A fixed capacity array of voice slots shared by all channels.
///
/// Allocation strategy: free slots first in ascending index order, then reclamation of
/// background (released) voices ordered by trigger recency with ties broken by lowest slot
/// index. A reservation that can not be satisfied in full fails without touching any sounding
/// voice: dropped new notes are more tolerable than glitching current ones, so exhaustion is
/// silent backpressure, never an error.
pub struct VoicePool {
    slots: Vec<Slot>,
    trigger_counter: u64,
    group_counter: u64,
    steal_scratch: Vec<(u64, usize)>,
}

impl VoicePool {
    /// Create a pool with the given slot capacity, bounded by
    /// [`VOICES_MAX`](crate::limits::VOICES_MAX).
    pub fn new(capacity: usize) -> Result<Self, Error> {
        if capacity == 0 || capacity > VOICES_MAX {
            return Err(Error::LimitExceeded(format!(
                "voice pool capacity {capacity} is out of range (1..={VOICES_MAX})"
            )));
        }
        let mut slots = Vec::new();
        slots.try_reserve_exact(capacity)?;
        for _ in 0..capacity {
            slots.push(Slot {
                generation: 0,
                voice: None,
                in_flight: false,
            });
        }
        let mut steal_scratch = Vec::new();
        steal_scratch.try_reserve_exact(capacity)?;
        Ok(Self {
            slots,
            trigger_counter: 0,
            group_counter: 0,
            steal_scratch,
        })
    }

    /// Number of slots in the pool.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of currently occupied slots.
    pub fn active_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| !slot.is_free())
            .count()
    }

    /// Hand out the next voice group id.
    pub(crate) fn next_group_id(&mut self) -> GroupId {
        self.group_counter += 1;
        self.group_counter
    }

    /// Hand out the next trigger order stamp, the reclamation tie break.
    pub(crate) fn next_trigger_order(&mut self) -> u64 {
        self.trigger_counter += 1;
        self.trigger_counter
    }

    /// Try to reserve `count` slots for a new note, writing the chosen slot indices into
    /// `indices`. Free slots are taken first; when those run out, background voices are
    /// reclaimed, least recently triggered first, ties broken by lowest slot index. Returns
    /// `false` (and reclaims nothing) when the full count can not be satisfied.
    pub(crate) fn reserve(&mut self, count: usize, indices: &mut Vec<usize>) -> bool {
        indices.clear();
        if count == 0 || count > self.slots.len() {
            return false;
        }

        for (index, slot) in self.slots.iter().enumerate() {
            if slot.is_free() {
                indices.push(index);
                if indices.len() == count {
                    return true;
                }
            }
        }

        // not enough free slots: collect reclaimable background voices
        self.steal_scratch.clear();
        for (index, slot) in self.slots.iter().enumerate() {
            if let Some(voice) = &slot.voice {
                if voice.priority == VoicePriority::Background {
                    self.steal_scratch.push((voice.trigger_order, index));
                }
            }
        }
        if indices.len() + self.steal_scratch.len() < count {
            // exhausted: drop the note, leave sounding voices untouched
            indices.clear();
            return false;
        }
        self.steal_scratch.sort_unstable();
        let needed = count - indices.len();
        for steal_pos in 0..needed {
            let (_, index) = self.steal_scratch[steal_pos];
            self.release_index(index);
            indices.push(index);
        }
        true
    }

    /// Bind voice data to a previously reserved slot and return its generational id.
    pub(crate) fn bind(&mut self, index: usize, voice: Box<Voice>) -> VoiceId {
        let slot = &mut self.slots[index];
        debug_assert!(slot.is_free(), "binding into an occupied slot");
        debug_assert_eq!(voice.slot, index, "voice slot index mismatch");
        slot.voice = Some(voice);
        VoiceId {
            index,
            generation: slot.generation,
        }
    }

    /// Whether the given id still addresses the voice it was handed out for.
    pub fn is_alive(&self, id: VoiceId) -> bool {
        self.slots
            .get(id.index)
            .is_some_and(|slot| slot.generation == id.generation && !slot.is_free())
    }

    /// Release a slot by id. Stale ids are ignored.
    pub fn release(&mut self, id: VoiceId) {
        if self.is_alive(id) {
            self.release_index(id.index);
        }
    }

    fn release_index(&mut self, index: usize) {
        let slot = &mut self.slots[index];
        debug_assert!(!slot.in_flight, "released a slot mid render");
        slot.voice = None;
        // invalidate all outstanding ids for this slot
        slot.generation += 1;
    }

    /// Release every voice whose processor state finished. Runs in the event processing
    /// phase only; the render phase never reclaims slots.
    pub(crate) fn collect_finished(&mut self) {
        for index in 0..self.slots.len() {
            let finished = self.slots[index]
                .voice
                .as_ref()
                .is_some_and(|voice| !voice.proc_state.is_active());
            if finished {
                self.release_index(index);
            }
        }
    }

    /// Release every slot for an independent playback start. All outstanding ids become
    /// stale. Must not be called while voices are in flight.
    pub(crate) fn reset(&mut self) {
        for index in 0..self.slots.len() {
            if self.slots[index].voice.is_some() {
                self.release_index(index);
            }
        }
    }

    /// Apply a closure to every live voice.
    pub(crate) fn for_all_voices_mut(&mut self, mut apply: impl FnMut(&mut Voice)) {
        for slot in &mut self.slots {
            if let Some(voice) = &mut slot.voice {
                apply(voice);
            }
        }
    }

    /// Apply a closure to every voice of the given group.
    pub(crate) fn for_group_mut(&mut self, group: GroupId, mut apply: impl FnMut(&mut Voice)) {
        for slot in &mut self.slots {
            if let Some(voice) = &mut slot.voice {
                if voice.group == group {
                    apply(voice);
                }
            }
        }
    }

    /// Demote a replaced foreground group: its voices keep decaying in the background and
    /// become reachable for reclamation.
    pub(crate) fn demote_group(&mut self, group: GroupId) {
        self.for_group_mut(group, |voice| {
            voice.priority = VoicePriority::Background;
        });
    }

    /// Promote freshly reserved voices to regular foreground priority. Called when their
    /// reservation is consumed at the start of the render phase.
    pub(crate) fn promote_group(&mut self, group: GroupId) {
        self.for_group_mut(group, |voice| {
            if voice.priority == VoicePriority::New {
                voice.priority = VoicePriority::Foreground;
            }
        });
    }

    /// A transient view over the given group's live voices.
    pub fn group(&self, group: GroupId) -> VoiceGroup {
        VoiceGroup::new(group, self.group_voices(group).collect())
    }

    /// Ids of all live voices in the given group, in slot order.
    pub fn group_voices(&self, group: GroupId) -> impl Iterator<Item = VoiceId> + '_ {
        self.slots.iter().enumerate().filter_map(move |(index, slot)| {
            slot.voice
                .as_ref()
                .filter(|voice| voice.group == group)
                .map(|_| VoiceId {
                    index,
                    generation: slot.generation,
                })
        })
    }

    /// Move all voices belonging to the given audio unit out of the pool for the render
    /// phase, in trigger order. The slots stay marked until [`Self::finish_render`] puts the
    /// voices back.
    pub(crate) fn take_for_unit(&mut self, unit_device: usize, voices: &mut Vec<Box<Voice>>) {
        for slot in &mut self.slots {
            let matches = slot
                .voice
                .as_ref()
                .is_some_and(|voice| voice.unit_device == unit_device);
            if matches {
                slot.in_flight = true;
                voices.push(slot.voice.take().expect("slot was just checked"));
            }
        }
        voices.sort_unstable_by_key(|voice| (voice.group, voice.proc_device));
    }

    /// Return voice data taken by [`Self::take_for_unit`] to its slots after the render
    /// phase completed.
    pub(crate) fn finish_render(&mut self, voices: &mut Vec<Box<Voice>>) {
        for voice in voices.drain(..) {
            let slot = &mut self.slots[voice.slot];
            debug_assert!(slot.in_flight, "returned voice to a slot not in flight");
            slot.in_flight = false;
            slot.voice = Some(voice);
        }
    }
}

// -------------------------------------------------------------------------------------------------
