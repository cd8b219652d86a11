//! The uniform device abstraction: processors, instruments and the master bus all share one
//! node contract with typed ports, an existence flag and a per player mutable render state.

use four_cc::FourCC;

use crate::{
    error::Error,
    limits::{DEVICE_PORTS_MAX, PROCESSORS_MAX},
    utils::buffer::{WorkBufferId, WorkBuffers},
};

// -------------------------------------------------------------------------------------------------

pub mod graph;
pub mod plan;

// -------------------------------------------------------------------------------------------------

/// Stable identity of a device within its owning [`DeviceTable`].
pub type DeviceId = usize;

/// Device id of the distinguished master node in every device table: the global output in the
/// global table, the unit output within an audio unit.
pub const MASTER_DEVICE_ID: DeviceId = 0;

// -------------------------------------------------------------------------------------------------

/// Playback time and signal properties passed into every render call.
#[derive(Debug, Clone, Copy)]
pub struct RenderContext {
    pub sample_rate: u32,
    pub channel_count: usize,
    pub tempo: f64,
    /// Absolute playback position of the first rendered frame.
    pub pos_frames: u64,
}

impl Default for RenderContext {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            channel_count: 2,
            tempo: 120.0,
            pos_frames: 0,
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Per note startup values for a voice processor state, copied from the triggering channel.
#[derive(Debug, Clone, Copy)]
pub struct VoiceStartContext {
    /// Note pitch in cents (A4 = 6900).
    pub pitch_cents: f64,
    /// Note force in dB (0 dB = full level).
    pub force_db: f64,
    /// Deterministic per voice random seed, derived from the channel's generator.
    pub seed: u64,
}

/// Work buffer ids of the per frame control trajectories rendered for the active voice.
#[derive(Debug, Clone, Copy)]
pub struct VoiceControlBuffers {
    /// Per frame pitch in Hz.
    pub pitch: WorkBufferId,
    /// Per frame force as linear gain.
    pub force: WorkBufferId,
    /// Per frame filter cutoff in Hz.
    pub cutoff: WorkBufferId,
}

// -------------------------------------------------------------------------------------------------

/// Immutable configuration side of a processor device.
///
/// A processor either renders continuous signals (effects, mix stages) through a
/// [`DeviceState`], or renders per note signals through [`VoiceProcState`] instances, one per
/// sounding voice. The signal plan executors only ever call the matching side.
pub trait Processor: Send + Sync + 'static {
    /// A unique, static name for the processor type, used in diagnostics.
    fn name(&self) -> &'static str;

    /// Number of audio receive ports.
    fn audio_in_count(&self) -> usize {
        0
    }

    /// Number of audio send ports.
    fn audio_out_count(&self) -> usize {
        1
    }

    /// Whether this processor renders per note signals and thus participates in voice
    /// signal plans instead of the mixed signal plan.
    fn is_voice_processor(&self) -> bool {
        false
    }

    /// Create the per player mutable render state for a continuous processor.
    ///
    /// Returns `None` for voice processors. Called once at player construction time, on a
    /// non real-time thread, so allocating delay lines or similar here is fine.
    fn create_state(
        &self,
        _sample_rate: u32,
        _max_block_frames: usize,
        _channel_count: usize,
    ) -> Option<Box<dyn DeviceState>> {
        None
    }

    /// Create a fresh per voice render state. Returns `None` for continuous processors.
    ///
    /// Called from the player's event processing phase whenever a note reserves a voice for
    /// this processor.
    fn create_voice_state(&self, _sample_rate: u32) -> Option<Box<dyn VoiceProcState>> {
        None
    }
}

// -------------------------------------------------------------------------------------------------

/// Mutable render state of a continuous processor, one per device per player.
///
/// All history that must survive block boundaries (delay lines, filter memory) lives here,
/// never in work buffers. `render` runs on a real-time thread and must not block or allocate.
pub trait DeviceState: Send {
    /// Reset all history for an independent playback start.
    fn reset(&mut self);

    /// Render one block chunk. Inputs hold the summed signals of all incoming connections,
    /// one buffer per receive port; outputs must be completely written.
    fn render(
        &mut self,
        buffers: &mut WorkBuffers,
        inputs: &[WorkBufferId],
        outputs: &[WorkBufferId],
        frames: usize,
        ctx: &RenderContext,
    );

    /// Apply a parameter update in the real-time thread.
    fn set_parameter(&mut self, id: FourCC, _value: f32) -> Result<(), Error> {
        Err(Error::ParameterError(format!("Unknown parameter: '{id}'")))
    }
}

// -------------------------------------------------------------------------------------------------

/// Mutable render state of one voice: the per note instance of a voice processor.
pub trait VoiceProcState: Send {
    /// Start the note. Called once, before the first render.
    fn note_on(&mut self, start: &VoiceStartContext);

    /// Transition the note into its release stage. The voice keeps rendering until its own
    /// termination condition deactivates it.
    fn note_off(&mut self);

    /// Whether this voice still produces signal. Inactive voices are skipped and their pool
    /// slots are reclaimed in the next event processing phase.
    fn is_active(&self) -> bool;

    /// Immediately deactivate the voice, e.g. when its output turned non finite or when the
    /// note is cut. Unlike [`Self::note_off`] there is no release stage.
    fn reset(&mut self);

    /// Render one block chunk and return the number of frames actually rendered, which may be
    /// less than `frames` when the voice reached its termination condition mid block.
    fn render(
        &mut self,
        buffers: &mut WorkBuffers,
        inputs: &[WorkBufferId],
        outputs: &[WorkBufferId],
        controls: &VoiceControlBuffers,
        frames: usize,
        ctx: &RenderContext,
    ) -> usize;
}

// -------------------------------------------------------------------------------------------------

/// The kind specific configuration of a device table entry.
pub enum DeviceKind {
    /// The distinguished output sink of a device table (global output or unit output).
    Master,
    /// An instrument: a sub table of voice processors with its own connection graph.
    AudioUnit(AudioUnit),
    /// A continuous or voice processor.
    Processor(Box<dyn Processor>),
}

/// A node in a device table: stable id (the table index), existence flag and kind specific
/// configuration. Non existent devices keep their id reserved but are skipped by signal plans.
pub struct Device {
    existent: bool,
    kind: DeviceKind,
}

impl Device {
    pub fn new(kind: DeviceKind) -> Self {
        Self {
            existent: true,
            kind,
        }
    }

    /// Whether the device takes part in rendering.
    pub fn is_existent(&self) -> bool {
        self.existent
    }

    pub fn kind(&self) -> &DeviceKind {
        &self.kind
    }

    pub fn kind_mut(&mut self) -> &mut DeviceKind {
        &mut self.kind
    }

    /// Number of audio receive ports of this device.
    pub fn audio_in_count(&self) -> usize {
        match &self.kind {
            DeviceKind::Master => 1,
            DeviceKind::AudioUnit(_) => 0,
            DeviceKind::Processor(processor) => processor.audio_in_count(),
        }
    }

    /// Number of audio send ports of this device.
    pub fn audio_out_count(&self) -> usize {
        match &self.kind {
            DeviceKind::Master => 0,
            DeviceKind::AudioUnit(_) => 1,
            DeviceKind::Processor(processor) => processor.audio_out_count(),
        }
    }

    /// Access the processor configuration, if this device is a processor.
    pub fn processor(&self) -> Option<&dyn Processor> {
        match &self.kind {
            DeviceKind::Processor(processor) => Some(processor.as_ref()),
            _ => None,
        }
    }

    /// Access the audio unit configuration, if this device is an audio unit.
    pub fn audio_unit(&self) -> Option<&AudioUnit> {
        match &self.kind {
            DeviceKind::AudioUnit(unit) => Some(unit),
            _ => None,
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// A bounded, index stable table of devices.
///
/// Devices are owned by their table; graph nodes and plans refer to them by id only. Removing
/// a device is a soft delete via [`DeviceTable::set_existent`], which keeps the id reserved.
pub struct DeviceTable {
    devices: Vec<Device>,
    capacity: usize,
}

impl DeviceTable {
    /// Create a table with the given capacity bound and a master device at id 0.
    pub fn new(capacity: usize) -> Self {
        let mut devices = Vec::with_capacity(capacity.min(PROCESSORS_MAX));
        devices.push(Device::new(DeviceKind::Master));
        Self { devices, capacity }
    }

    /// Add a device and return its id. Fails when the capacity bound is reached.
    pub fn add(&mut self, device: Device) -> Result<DeviceId, Error> {
        if self.devices.len() >= self.capacity {
            return Err(Error::LimitExceeded(format!(
                "device table is limited to {} devices",
                self.capacity
            )));
        }
        debug_assert!(
            device.audio_in_count() <= DEVICE_PORTS_MAX
                && device.audio_out_count() <= DEVICE_PORTS_MAX,
            "device declares more than DEVICE_PORTS_MAX ports"
        );
        self.devices.push(device);
        Ok(self.devices.len() - 1)
    }

    /// Number of device slots, including non existent ones.
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Access a device slot. Returns non existent devices too; callers that only want
    /// rendering devices should check [`Device::is_existent`].
    pub fn get(&self, id: DeviceId) -> Option<&Device> {
        self.devices.get(id)
    }

    pub fn get_mut(&mut self, id: DeviceId) -> Option<&mut Device> {
        self.devices.get_mut(id)
    }

    /// Soft delete or restore a device. The id stays reserved either way.
    pub fn set_existent(&mut self, id: DeviceId, existent: bool) -> Result<(), Error> {
        let device = self.devices.get_mut(id).ok_or(Error::DeviceNotFound(id))?;
        device.existent = existent;
        Ok(())
    }

    /// Iterate over all (id, device) pairs, including non existent devices.
    pub fn iter(&self) -> impl Iterator<Item = (DeviceId, &Device)> {
        self.devices.iter().enumerate()
    }
}

// -------------------------------------------------------------------------------------------------

/// An instrument: a bounded table of voice processors with its own connection graph, exposed
/// to the global graph as a single device with one send port.
pub struct AudioUnit {
    name: String,
    processors: DeviceTable,
    connections: Vec<graph::Connection>,
}

impl AudioUnit {
    /// Create an empty audio unit. The unit's output node is available at
    /// [`MASTER_DEVICE_ID`] in its processor table.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            processors: DeviceTable::new(PROCESSORS_MAX),
            connections: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add a processor to this unit and return its device id.
    pub fn add_processor(&mut self, processor: Box<dyn Processor>) -> Result<DeviceId, Error> {
        self.processors
            .add(Device::new(DeviceKind::Processor(processor)))
    }

    /// Connect a processor send port to another device's receive port within this unit.
    /// Validation happens when the unit's signal plan is built.
    pub fn connect(&mut self, from: (DeviceId, usize), to: (DeviceId, usize)) {
        self.connections.push(graph::Connection { from, to });
    }

    pub fn processors(&self) -> &DeviceTable {
        &self.processors
    }

    pub fn processors_mut(&mut self) -> &mut DeviceTable {
        &mut self.processors
    }

    pub fn connections(&self) -> &[graph::Connection] {
        &self.connections
    }

    /// Number of existent voice processors, which is the voice count a note on this unit
    /// reserves from the pool.
    pub fn voice_processor_count(&self) -> usize {
        self.processors
            .iter()
            .filter(|(_, device)| {
                device.is_existent()
                    && device
                        .processor()
                        .is_some_and(|processor| processor.is_voice_processor())
            })
            .count()
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    struct NullProc;

    impl Processor for NullProc {
        fn name(&self) -> &'static str {
            "null"
        }
        fn is_voice_processor(&self) -> bool {
            true
        }
    }

    #[test]
    fn table_has_master_at_zero() {
        let table = DeviceTable::new(8);
        let master = table.get(MASTER_DEVICE_ID).unwrap();
        assert!(matches!(master.kind(), DeviceKind::Master));
        assert_eq!(master.audio_in_count(), 1);
        assert_eq!(master.audio_out_count(), 0);
    }

    #[test]
    fn table_capacity_is_enforced() {
        let mut table = DeviceTable::new(2);
        assert!(table
            .add(Device::new(DeviceKind::Processor(Box::new(NullProc))))
            .is_ok());
        assert!(matches!(
            table.add(Device::new(DeviceKind::Processor(Box::new(NullProc)))),
            Err(Error::LimitExceeded(_))
        ));
    }

    #[test]
    fn soft_delete_keeps_id_reserved() {
        let mut table = DeviceTable::new(8);
        let id = table
            .add(Device::new(DeviceKind::Processor(Box::new(NullProc))))
            .unwrap();
        table.set_existent(id, false).unwrap();
        assert!(table.get(id).is_some());
        assert!(!table.get(id).unwrap().is_existent());
        // adding another device does not reuse the id
        let next = table
            .add(Device::new(DeviceKind::Processor(Box::new(NullProc))))
            .unwrap();
        assert_ne!(id, next);
        assert!(table.set_existent(99, false).is_err());
    }

    #[test]
    fn voice_processor_count_skips_non_existent() {
        let mut unit = AudioUnit::new("test");
        let a = unit.add_processor(Box::new(NullProc)).unwrap();
        let _b = unit.add_processor(Box::new(NullProc)).unwrap();
        assert_eq!(unit.voice_processor_count(), 2);
        unit.processors_mut().set_existent(a, false).unwrap();
        assert_eq!(unit.voice_processor_count(), 1);
    }
}
