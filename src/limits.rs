//! Compile time bounds of all fixed size engine resources.
//!
//! Every bounded structure in the engine enforces these limits at allocation time and never
//! grows them silently. Embedders can query the limits at runtime via [`limit_names`] and
//! [`limit`] without linking against the constants directly.

// -------------------------------------------------------------------------------------------------

/// Maximum number of simultaneously reserved voices in a [`VoicePool`](crate::VoicePool).
pub const VOICES_MAX: usize = 1024;

/// Maximum number of playback channels (composition tracks) per player.
pub const CHANNELS_MAX: usize = 64;

/// Maximum number of audio units (instruments and global effect units) in a composition.
pub const AUDIO_UNITS_MAX: usize = 256;

/// Maximum number of processors within a single audio unit.
pub const PROCESSORS_MAX: usize = 256;

/// Maximum number of receive or send ports on a single device.
pub const DEVICE_PORTS_MAX: usize = 8;

/// Maximum number of sample frames rendered in one block.
pub const BLOCK_FRAMES_MAX: usize = 8192;

/// Capacity of the live event queue and of the voice group reservation ring.
pub const EVENT_QUEUE_SIZE: usize = 4096;

// -------------------------------------------------------------------------------------------------

const LIMITS: &[(&str, usize)] = &[
    ("voices_max", VOICES_MAX),
    ("channels_max", CHANNELS_MAX),
    ("audio_units_max", AUDIO_UNITS_MAX),
    ("processors_max", PROCESSORS_MAX),
    ("device_ports_max", DEVICE_PORTS_MAX),
    ("block_frames_max", BLOCK_FRAMES_MAX),
    ("event_queue_size", EVENT_QUEUE_SIZE),
];

/// Names of all queryable resource limits.
pub fn limit_names() -> impl Iterator<Item = &'static str> {
    LIMITS.iter().map(|(name, _)| *name)
}

/// Look up a resource limit by name. Returns `None` for unknown names.
pub fn limit(name: &str) -> Option<usize> {
    LIMITS
        .iter()
        .find(|(limit_name, _)| *limit_name == name)
        .map(|(_, value)| *value)
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_lookup() {
        assert_eq!(limit("voices_max"), Some(VOICES_MAX));
        assert_eq!(limit("channels_max"), Some(CHANNELS_MAX));
        assert_eq!(limit("no_such_limit"), None);
        assert_eq!(limit_names().count(), LIMITS.len());
        for name in limit_names() {
            assert!(limit(name).is_some());
        }
    }
}
