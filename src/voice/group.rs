//! Voice groups and the reservation handoff between event processing and rendering.

use std::sync::Arc;

use crossbeam_queue::ArrayQueue;

use crate::{
    error::Error,
    voice::{GroupId, VoiceId},
};

// -------------------------------------------------------------------------------------------------

/// A transient, non owning view over the voices spawned together by one note on event,
/// one per existent voice processor of the target instrument.
///
/// The pool reclaims slots individually, never as a group; the group only keeps the
/// note level bookkeeping (which voices belong together) consistent.
#[derive(Debug, Clone)]
pub struct VoiceGroup {
    id: GroupId,
    voices: Vec<VoiceId>,
}

impl VoiceGroup {
    pub(crate) fn new(id: GroupId, voices: Vec<VoiceId>) -> Self {
        Self { id, voices }
    }

    pub fn id(&self) -> GroupId {
        self.id
    }

    /// Number of voices reserved for this group.
    pub fn size(&self) -> usize {
        self.voices.len()
    }

    pub fn voices(&self) -> &[VoiceId] {
        &self.voices
    }
}

// -------------------------------------------------------------------------------------------------

/// One reservation record handed from a channel's event processing to the render phase.
#[derive(Debug, Clone, Copy)]
pub(crate) struct GroupReservation {
    pub channel: usize,
    pub group: GroupId,
    pub voice_count: usize,
}

// -------------------------------------------------------------------------------------------------

/// Bounded single producer/single consumer handoff of voice group reservations.
///
/// Channels push reservations while events are processed; the render dispatcher drains them
/// before any voice renders. Correctness relies on the strict phase ordering within a block:
/// the event phase completes before the render phase starts, so no ordering subtleties beyond
/// the queue's own guarantees are needed.
pub(crate) struct VoiceGroupReservations {
    queue: Arc<ArrayQueue<GroupReservation>>,
}

impl VoiceGroupReservations {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: Arc::new(ArrayQueue::new(capacity)),
        }
    }

    /// Enqueue a reservation. Fails when the ring is full, which drops the note; the caller
    /// logs and continues, it never blocks.
    pub fn push(&self, reservation: GroupReservation) -> Result<(), Error> {
        self.queue
            .push(reservation)
            .map_err(|_| Error::SendError("voice group reservation ring is full".to_string()))
    }

    /// Take the oldest pending reservation.
    pub fn pop(&self) -> Option<GroupReservation> {
        self.queue.pop()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

// -------------------------------------------------------------------------------------------------
