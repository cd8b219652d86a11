//! The pre validated composition model consumed by the player.
//!
//! Embedders build this model from whatever storage format they use; by the time it reaches
//! the engine every id, port index and argument has been validated, so the core never parses
//! or re-validates serialized data.

use crate::{
    device::{graph::Connection, AudioUnit, Device, DeviceId, DeviceKind, DeviceTable, Processor},
    error::Error,
    event::TriggerEvent,
    limits::{AUDIO_UNITS_MAX, CHANNELS_MAX},
};

// -------------------------------------------------------------------------------------------------

/// Number of timestamp ticks per beat.
pub const TICKS_PER_BEAT: i64 = 960;

/// A musical point in time, counted in beats and ticks.
///
/// Timestamps are exact integers so cursor arithmetic stays deterministic; they convert to
/// sample frames only at the final tempo dependent step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Timestamp {
    beats: i64,
    ticks: i64,
}

impl Timestamp {
    pub const ZERO: Self = Self { beats: 0, ticks: 0 };

    /// Create a normalized timestamp: ticks are wrapped into `0..TICKS_PER_BEAT`.
    pub fn new(beats: i64, ticks: i64) -> Self {
        Self {
            beats: beats + ticks.div_euclid(TICKS_PER_BEAT),
            ticks: ticks.rem_euclid(TICKS_PER_BEAT),
        }
    }

    pub fn from_beats(beats: i64) -> Self {
        Self { beats, ticks: 0 }
    }

    pub fn beats(&self) -> i64 {
        self.beats
    }

    pub fn ticks(&self) -> i64 {
        self.ticks
    }

    pub fn is_zero(&self) -> bool {
        self.beats == 0 && self.ticks == 0
    }

    pub fn is_negative(&self) -> bool {
        self.beats < 0
    }

    pub fn as_beats_f64(&self) -> f64 {
        self.beats as f64 + self.ticks as f64 / TICKS_PER_BEAT as f64
    }

    /// Convert this musical duration into sample frames at the given tempo.
    pub fn to_frames(&self, tempo: f64, sample_rate: u32) -> f64 {
        debug_assert!(tempo > 0.0, "tempo must be positive");
        self.as_beats_f64() * 60.0 / tempo * sample_rate as f64
    }
}

impl std::ops::Add for Timestamp {
    type Output = Self;
    fn add(self, other: Self) -> Self {
        Self::new(self.beats + other.beats, self.ticks + other.ticks)
    }
}

impl std::ops::Sub for Timestamp {
    type Output = Self;
    fn sub(self, other: Self) -> Self {
        Self::new(self.beats - other.beats, self.ticks - other.ticks)
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.beats, self.ticks)
    }
}

// -------------------------------------------------------------------------------------------------

/// One trigger event placed on a pattern row.
#[derive(Debug, Clone, Copy)]
pub struct TriggerRow {
    pub time: Timestamp,
    pub channel: usize,
    pub event: TriggerEvent,
}

// -------------------------------------------------------------------------------------------------

/// A pattern: a fixed length stretch of trigger rows, sorted by time.
#[derive(Debug, Clone, Default)]
pub struct Pattern {
    length: Timestamp,
    rows: Vec<TriggerRow>,
}

impl Pattern {
    pub fn new(length: Timestamp) -> Self {
        Self {
            length,
            rows: Vec::new(),
        }
    }

    pub fn length(&self) -> Timestamp {
        self.length
    }

    /// Add a trigger row, keeping rows sorted ascending by time. Rows sharing a time keep
    /// their insertion order, which is also their firing order.
    pub fn add_row(
        &mut self,
        time: Timestamp,
        channel: usize,
        event: TriggerEvent,
    ) -> Result<(), Error> {
        if channel >= CHANNELS_MAX {
            return Err(Error::LimitExceeded(format!(
                "channel {channel} is out of range (max {CHANNELS_MAX})"
            )));
        }
        if !event.is_valid() {
            return Err(Error::ParameterError(format!(
                "invalid argument for event '{}'",
                event.name()
            )));
        }
        let insert_pos = self.rows.partition_point(|row| row.time <= time);
        self.rows.insert(
            insert_pos,
            TriggerRow {
                time,
                channel,
                event,
            },
        );
        Ok(())
    }

    pub fn rows(&self) -> &[TriggerRow] {
        &self.rows
    }
}

// -------------------------------------------------------------------------------------------------

/// Initial controller values every channel starts from.
#[derive(Debug, Clone, Copy)]
pub struct ChannelDefaults {
    /// Initially selected instrument device, if any.
    pub instrument: Option<DeviceId>,
    /// Initial force in dB.
    pub force: f64,
    /// Initial panning position in range \[-1, 1\].
    pub panning: f64,
    /// Initial filter cutoff in cents.
    pub cutoff: f64,
}

impl Default for ChannelDefaults {
    fn default() -> Self {
        Self {
            instrument: None,
            force: 0.0,
            panning: 0.0,
            // fully open by default (~20 kHz)
            cutoff: 13500.0,
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// A complete composition: the global device graph, patterns and playback order.
pub struct Composition {
    initial_tempo: f64,
    seed: u64,
    devices: DeviceTable,
    connections: Vec<Connection>,
    patterns: Vec<Pattern>,
    order: Vec<usize>,
    channel_defaults: ChannelDefaults,
}

impl Default for Composition {
    fn default() -> Self {
        Self::new()
    }
}

impl Composition {
    /// Create an empty composition with the global master bus at device id 0.
    pub fn new() -> Self {
        Self {
            initial_tempo: 120.0,
            seed: 0,
            devices: DeviceTable::new(AUDIO_UNITS_MAX),
            connections: Vec::new(),
            patterns: Vec::new(),
            order: Vec::new(),
            channel_defaults: ChannelDefaults::default(),
        }
    }

    pub fn initial_tempo(&self) -> f64 {
        self.initial_tempo
    }

    pub fn set_initial_tempo(&mut self, tempo: f64) -> Result<(), Error> {
        if !tempo.is_finite() || tempo <= 0.0 {
            return Err(Error::ParameterError(format!("invalid tempo: {tempo}")));
        }
        self.initial_tempo = tempo;
        Ok(())
    }

    /// Seed of the per channel random generators, so playback is reproducible.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn set_seed(&mut self, seed: u64) {
        self.seed = seed;
    }

    /// Add an instrument and return its global device id.
    pub fn add_instrument(&mut self, unit: AudioUnit) -> Result<DeviceId, Error> {
        self.devices.add(Device::new(DeviceKind::AudioUnit(unit)))
    }

    /// Add a global (continuous) effect processor and return its device id.
    pub fn add_effect(&mut self, processor: Box<dyn Processor>) -> Result<DeviceId, Error> {
        if processor.is_voice_processor() {
            return Err(Error::ParameterError(format!(
                "voice processor '{}' can not be used as a global effect",
                processor.name()
            )));
        }
        self.devices.add(Device::new(DeviceKind::Processor(processor)))
    }

    /// Connect a device send port to a device receive port in the global graph.
    /// Validation happens when the player builds its connection set.
    pub fn connect(&mut self, from: (DeviceId, usize), to: (DeviceId, usize)) {
        self.connections.push(Connection { from, to });
    }

    pub fn devices(&self) -> &DeviceTable {
        &self.devices
    }

    pub fn devices_mut(&mut self) -> &mut DeviceTable {
        &mut self.devices
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    /// Add a pattern and return its index.
    pub fn add_pattern(&mut self, pattern: Pattern) -> usize {
        self.patterns.push(pattern);
        self.patterns.len() - 1
    }

    pub fn patterns(&self) -> &[Pattern] {
        &self.patterns
    }

    /// Set the playback order as a list of pattern indices.
    pub fn set_order(&mut self, order: Vec<usize>) -> Result<(), Error> {
        if let Some(missing) = order.iter().find(|index| **index >= self.patterns.len()) {
            return Err(Error::ParameterError(format!(
                "order references unknown pattern {missing}"
            )));
        }
        self.order = order;
        Ok(())
    }

    pub fn order(&self) -> &[usize] {
        &self.order
    }

    pub fn channel_defaults(&self) -> &ChannelDefaults {
        &self.channel_defaults
    }

    pub fn set_channel_defaults(&mut self, defaults: ChannelDefaults) {
        self.channel_defaults = defaults;
    }

    /// Total musical duration of the ordered patterns. An empty order has zero duration.
    pub fn duration(&self) -> Timestamp {
        self.order
            .iter()
            .map(|index| self.patterns[*index].length())
            .fold(Timestamp::ZERO, |total, length| total + length)
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_normalization() {
        let ts = Timestamp::new(1, TICKS_PER_BEAT + 10);
        assert_eq!(ts.beats(), 2);
        assert_eq!(ts.ticks(), 10);

        let ts = Timestamp::new(1, -10);
        assert_eq!(ts.beats(), 0);
        assert_eq!(ts.ticks(), TICKS_PER_BEAT - 10);

        assert!(Timestamp::ZERO.is_zero());
        assert!((Timestamp::from_beats(0) - Timestamp::from_beats(1)).is_negative());
    }

    #[test]
    fn timestamp_ordering_and_arithmetic() {
        let half = Timestamp::new(0, TICKS_PER_BEAT / 2);
        let one = Timestamp::from_beats(1);
        assert!(half < one);
        assert_eq!(half + half, one);
        assert_eq!(one - half, half);
        assert_eq!(half.as_beats_f64(), 0.5);
    }

    #[test]
    fn timestamp_to_frames() {
        // one beat at 120 bpm and 48 kHz is half a second = 24000 frames
        let frames = Timestamp::from_beats(1).to_frames(120.0, 48000);
        assert!((frames - 24000.0).abs() < 1e-9);
    }

    #[test]
    fn pattern_rows_stay_sorted() {
        let mut pattern = Pattern::new(Timestamp::from_beats(4));
        pattern
            .add_row(Timestamp::from_beats(2), 0, TriggerEvent::NoteOff)
            .unwrap();
        pattern
            .add_row(
                Timestamp::ZERO,
                0,
                TriggerEvent::NoteOn { pitch: 6900.0 },
            )
            .unwrap();
        pattern
            .add_row(Timestamp::from_beats(1), 1, TriggerEvent::NoteOff)
            .unwrap();
        let times: Vec<i64> = pattern.rows().iter().map(|row| row.time.beats()).collect();
        assert_eq!(times, vec![0, 1, 2]);
    }

    #[test]
    fn pattern_rejects_invalid_rows() {
        let mut pattern = Pattern::new(Timestamp::from_beats(4));
        assert!(pattern
            .add_row(
                Timestamp::ZERO,
                CHANNELS_MAX,
                TriggerEvent::NoteOff
            )
            .is_err());
        assert!(pattern
            .add_row(
                Timestamp::ZERO,
                0,
                TriggerEvent::NoteOn { pitch: f64::NAN }
            )
            .is_err());
    }

    #[test]
    fn empty_composition_has_zero_duration() {
        let composition = Composition::new();
        assert!(composition.duration().is_zero());
    }

    #[test]
    fn order_validation() {
        let mut composition = Composition::new();
        let pattern = composition.add_pattern(Pattern::new(Timestamp::from_beats(4)));
        assert!(composition.set_order(vec![pattern, pattern]).is_ok());
        assert_eq!(
            composition.duration(),
            Timestamp::from_beats(8)
        );
        assert!(composition.set_order(vec![7]).is_err());
    }
}
