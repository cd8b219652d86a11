//! Trigger events and the static event introspection table.
//!
//! Every musical trigger the engine understands is described by one row in [`EVENT_TABLE`]:
//! its public name, the type of its single argument and a validator. The table is plain data;
//! [`event_names`] and [`event_arg_type`] stay in lockstep with it by construction, and
//! [`TriggerEvent::name`] maps every runtime event onto its table row.

use crate::{composition::Timestamp, device::DeviceId};

// -------------------------------------------------------------------------------------------------

/// Argument type of a trigger event, as reported by the event introspection API.
#[derive(
    Debug, Default, Copy, Clone, PartialEq, Eq, strum::Display, strum::EnumString, strum::VariantNames,
)]
#[strum(serialize_all = "lowercase")]
pub enum EventArgType {
    #[default]
    None,
    Bool,
    Int,
    Float,
    Timestamp,
    Str,
    Pattern,
}

// -------------------------------------------------------------------------------------------------

/// A musical trigger event addressed to one channel.
///
/// Pitches and cutoffs are absolute cents (A4 = 6900), forces are dB, panning is in
/// range \[-1, 1\]. All payloads are plain values so events can travel through bounded
/// queues without allocating.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TriggerEvent {
    NoteOn { pitch: f64 },
    NoteOff,
    SetForce { force: f64 },
    SlideForce { force: f64 },
    SlideForceLength { length: Timestamp },
    SetPitch { pitch: f64 },
    SlidePitch { pitch: f64 },
    SlidePitchLength { length: Timestamp },
    VibratoSpeed { speed: f64 },
    VibratoDepth { depth: f64 },
    TremoloSpeed { speed: f64 },
    TremoloDepth { depth: f64 },
    SetPanning { panning: f64 },
    SlidePanning { panning: f64 },
    SlidePanningLength { length: Timestamp },
    SetCutoff { cutoff: f64 },
    SlideCutoff { cutoff: f64 },
    SlideCutoffLength { length: Timestamp },
    AutowahSpeed { speed: f64 },
    AutowahDepth { depth: f64 },
    SetInstrument { unit: DeviceId },
    SetTempo { tempo: f64 },
    PlayPattern { pattern: usize },
    Mute { muted: bool },
}

impl TriggerEvent {
    /// The event's public name, matching its row in [`EVENT_TABLE`].
    pub fn name(&self) -> &'static str {
        match self {
            Self::NoteOn { .. } => "note_on",
            Self::NoteOff => "note_off",
            Self::SetForce { .. } => "set_force",
            Self::SlideForce { .. } => "slide_force",
            Self::SlideForceLength { .. } => "slide_force_length",
            Self::SetPitch { .. } => "set_pitch",
            Self::SlidePitch { .. } => "slide_pitch",
            Self::SlidePitchLength { .. } => "slide_pitch_length",
            Self::VibratoSpeed { .. } => "vibrato_speed",
            Self::VibratoDepth { .. } => "vibrato_depth",
            Self::TremoloSpeed { .. } => "tremolo_speed",
            Self::TremoloDepth { .. } => "tremolo_depth",
            Self::SetPanning { .. } => "set_panning",
            Self::SlidePanning { .. } => "slide_panning",
            Self::SlidePanningLength { .. } => "slide_panning_length",
            Self::SetCutoff { .. } => "set_cutoff",
            Self::SlideCutoff { .. } => "slide_cutoff",
            Self::SlideCutoffLength { .. } => "slide_cutoff_length",
            Self::AutowahSpeed { .. } => "autowah_speed",
            Self::AutowahDepth { .. } => "autowah_depth",
            Self::SetInstrument { .. } => "set_instrument",
            Self::SetTempo { .. } => "set_tempo",
            Self::PlayPattern { .. } => "play_pattern",
            Self::Mute { .. } => "mute",
        }
    }

    /// Validate the event's argument against its table row. Invalid events are dropped by
    /// the player's event processing phase.
    pub fn is_valid(&self) -> bool {
        match EVENT_TABLE
            .iter()
            .find(|spec| spec.name == self.name())
        {
            Some(spec) => (spec.validate)(self),
            None => false,
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// One row of the event introspection table.
pub struct EventSpec {
    pub name: &'static str,
    pub arg_type: EventArgType,
    validate: fn(&TriggerEvent) -> bool,
}

fn valid_pitch(cents: f64) -> bool {
    cents.is_finite() && (0.0..=15000.0).contains(&cents)
}

fn valid_force(db: f64) -> bool {
    db.is_finite() && db <= 18.0
}

fn valid_speed(hz: f64) -> bool {
    hz.is_finite() && (0.0..=100.0).contains(&hz)
}

/// The complete event table. The names, argument types and validators must be kept in
/// lockstep with [`TriggerEvent`]; the `event_table_lockstep` test enforces this.
pub const EVENT_TABLE: &[EventSpec] = &[
    EventSpec {
        name: "note_on",
        arg_type: EventArgType::Float,
        validate: |event| matches!(event, TriggerEvent::NoteOn { pitch } if valid_pitch(*pitch)),
    },
    EventSpec {
        name: "note_off",
        arg_type: EventArgType::None,
        validate: |event| matches!(event, TriggerEvent::NoteOff),
    },
    EventSpec {
        name: "set_force",
        arg_type: EventArgType::Float,
        validate: |event| matches!(event, TriggerEvent::SetForce { force } if valid_force(*force)),
    },
    EventSpec {
        name: "slide_force",
        arg_type: EventArgType::Float,
        validate: |event| {
            matches!(event, TriggerEvent::SlideForce { force } if valid_force(*force))
        },
    },
    EventSpec {
        name: "slide_force_length",
        arg_type: EventArgType::Timestamp,
        validate: |event| {
            matches!(event, TriggerEvent::SlideForceLength { length } if !length.is_negative())
        },
    },
    EventSpec {
        name: "set_pitch",
        arg_type: EventArgType::Float,
        validate: |event| matches!(event, TriggerEvent::SetPitch { pitch } if valid_pitch(*pitch)),
    },
    EventSpec {
        name: "slide_pitch",
        arg_type: EventArgType::Float,
        validate: |event| {
            matches!(event, TriggerEvent::SlidePitch { pitch } if valid_pitch(*pitch))
        },
    },
    EventSpec {
        name: "slide_pitch_length",
        arg_type: EventArgType::Timestamp,
        validate: |event| {
            matches!(event, TriggerEvent::SlidePitchLength { length } if !length.is_negative())
        },
    },
    EventSpec {
        name: "vibrato_speed",
        arg_type: EventArgType::Float,
        validate: |event| {
            matches!(event, TriggerEvent::VibratoSpeed { speed } if valid_speed(*speed))
        },
    },
    EventSpec {
        name: "vibrato_depth",
        arg_type: EventArgType::Float,
        validate: |event| {
            matches!(event, TriggerEvent::VibratoDepth { depth }
                if depth.is_finite() && (0.0..=2400.0).contains(depth))
        },
    },
    EventSpec {
        name: "tremolo_speed",
        arg_type: EventArgType::Float,
        validate: |event| {
            matches!(event, TriggerEvent::TremoloSpeed { speed } if valid_speed(*speed))
        },
    },
    EventSpec {
        name: "tremolo_depth",
        arg_type: EventArgType::Float,
        validate: |event| {
            matches!(event, TriggerEvent::TremoloDepth { depth }
                if depth.is_finite() && (0.0..=60.0).contains(depth))
        },
    },
    EventSpec {
        name: "set_panning",
        arg_type: EventArgType::Float,
        validate: |event| {
            matches!(event, TriggerEvent::SetPanning { panning }
                if (-1.0..=1.0).contains(panning))
        },
    },
    EventSpec {
        name: "slide_panning",
        arg_type: EventArgType::Float,
        validate: |event| {
            matches!(event, TriggerEvent::SlidePanning { panning }
                if (-1.0..=1.0).contains(panning))
        },
    },
    EventSpec {
        name: "slide_panning_length",
        arg_type: EventArgType::Timestamp,
        validate: |event| {
            matches!(event, TriggerEvent::SlidePanningLength { length } if !length.is_negative())
        },
    },
    EventSpec {
        name: "set_cutoff",
        arg_type: EventArgType::Float,
        validate: |event| {
            matches!(event, TriggerEvent::SetCutoff { cutoff } if valid_pitch(*cutoff))
        },
    },
    EventSpec {
        name: "slide_cutoff",
        arg_type: EventArgType::Float,
        validate: |event| {
            matches!(event, TriggerEvent::SlideCutoff { cutoff } if valid_pitch(*cutoff))
        },
    },
    EventSpec {
        name: "slide_cutoff_length",
        arg_type: EventArgType::Timestamp,
        validate: |event| {
            matches!(event, TriggerEvent::SlideCutoffLength { length } if !length.is_negative())
        },
    },
    EventSpec {
        name: "autowah_speed",
        arg_type: EventArgType::Float,
        validate: |event| {
            matches!(event, TriggerEvent::AutowahSpeed { speed } if valid_speed(*speed))
        },
    },
    EventSpec {
        name: "autowah_depth",
        arg_type: EventArgType::Float,
        validate: |event| {
            matches!(event, TriggerEvent::AutowahDepth { depth }
                if depth.is_finite() && (0.0..=4800.0).contains(depth))
        },
    },
    EventSpec {
        name: "set_instrument",
        arg_type: EventArgType::Int,
        validate: |event| matches!(event, TriggerEvent::SetInstrument { .. }),
    },
    EventSpec {
        name: "set_tempo",
        arg_type: EventArgType::Float,
        validate: |event| {
            matches!(event, TriggerEvent::SetTempo { tempo }
                if tempo.is_finite() && (1.0..=999.0).contains(tempo))
        },
    },
    EventSpec {
        name: "play_pattern",
        arg_type: EventArgType::Pattern,
        validate: |event| matches!(event, TriggerEvent::PlayPattern { .. }),
    },
    EventSpec {
        name: "mute",
        arg_type: EventArgType::Bool,
        validate: |event| matches!(event, TriggerEvent::Mute { .. }),
    },
];

// -------------------------------------------------------------------------------------------------

/// Names of all trigger events, in table order.
pub fn event_names() -> impl Iterator<Item = &'static str> {
    EVENT_TABLE.iter().map(|spec| spec.name)
}

/// Argument type of the named event, or `None` for unknown names.
pub fn event_arg_type(name: &str) -> Option<EventArgType> {
    EVENT_TABLE
        .iter()
        .find(|spec| spec.name == name)
        .map(|spec| spec.arg_type)
}

/// Human readable argument type name of the named event.
///
/// The note on event's argument is typed as a plain float internally, but is reported as
/// "pitch" here so embedder UIs can offer note input for it.
pub fn event_arg_type_name(name: &str) -> Option<&'static str> {
    if name == "note_on" {
        return Some("pitch");
    }
    event_arg_type(name).map(|arg_type| match arg_type {
        EventArgType::None => "none",
        EventArgType::Bool => "bool",
        EventArgType::Int => "int",
        EventArgType::Float => "float",
        EventArgType::Timestamp => "timestamp",
        EventArgType::Str => "string",
        EventArgType::Pattern => "pattern",
    })
}

// -------------------------------------------------------------------------------------------------
