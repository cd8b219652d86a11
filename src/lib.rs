#![doc = include_str!("../README.md")]
#![cfg_attr(all(doc, docsrs), feature(doc_auto_cfg))]

// private mods (will be partly re-exported)
mod channel;
mod composition;
mod control;
mod device;
mod error;
mod event;
#[cfg(any(feature = "wav-output", doc))]
mod output;
mod player;
mod processor;
mod voice;

// public, flat re-exports
pub use error::Error;

pub use channel::Channel;

pub use composition::{
    ChannelDefaults, Composition, Pattern, Timestamp, TriggerRow, TICKS_PER_BEAT,
};

pub use control::{
    Controls, FilterControl, ForceControl, Lfo, PanningControl, PitchControl, Slider,
};

pub use device::{
    graph::{Connection, ConnectionError, Connections},
    plan::SignalPlan,
    AudioUnit, Device, DeviceId, DeviceKind, DeviceState, DeviceTable, Processor, RenderContext,
    VoiceControlBuffers, VoiceProcState, VoiceStartContext, MASTER_DEVICE_ID,
};

pub use event::{
    event_arg_type, event_arg_type_name, event_names, EventArgType, EventSpec, TriggerEvent,
    EVENT_TABLE,
};

#[cfg(any(feature = "wav-output", doc))]
pub use output::render_to_wav;

pub use player::{EventSender, Player, PlayerOptions};

pub use voice::{group::VoiceGroup, pool::VoicePool, GroupId, Voice, VoiceId, VoicePriority};

// public mods
pub mod limits;
pub mod utils;

pub mod processors {
    //! Set of built in processor implementations.

    pub use super::processor::{
        delay::DelayProc,
        gain::GainProc,
        noise::NoiseProc,
        oscillator::{OscillatorProc, Waveform},
    };
}
