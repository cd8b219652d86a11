//! The player drives playback: it advances the composition cursor, fires due trigger events
//! into channels, renders all voice signal plans and the mixed signal plan, and copies the
//! master bus into the caller's output buffer.
//!
//! Within a block, event processing and rendering are strictly ordered phases: all note and
//! controller events are fully applied before any voice renders, and voice slots are only
//! reclaimed in the next block's event phase. The pull based [`Player::render`] call never
//! blocks on anything but its own worker threads.

use std::sync::Arc;

use crossbeam_queue::ArrayQueue;
use four_cc::FourCC;

use crate::{
    channel::Channel,
    composition::{Composition, Timestamp},
    device::{
        graph::{ConnectionError, Connections},
        plan::SignalPlan,
        DeviceId, DeviceKind, DeviceState, RenderContext, MASTER_DEVICE_ID,
    },
    error::Error,
    event::TriggerEvent,
    limits::{BLOCK_FRAMES_MAX, CHANNELS_MAX, EVENT_QUEUE_SIZE},
    utils::buffer::{clear_buffer, WorkBuffers},
    voice::{group::VoiceGroupReservations, pool::VoicePool},
};

// -------------------------------------------------------------------------------------------------

mod thread_pool;
mod unit;

use thread_pool::{assert_no_alloc, RenderThreadPool, UnitProcessingResult};
use unit::UnitRenderer;

// -------------------------------------------------------------------------------------------------

/// Construction options for a [`Player`].
#[derive(Debug, Clone, Copy)]
pub struct PlayerOptions {
    /// Output sample rate in Hz.
    pub sample_rate: u32,
    /// Output channel count. Usually 2; panning beyond stereo is not spatialized.
    pub channel_count: usize,
    /// Maximum frames rendered per block, bounded by
    /// [`BLOCK_FRAMES_MAX`](crate::limits::BLOCK_FRAMES_MAX).
    pub block_frames: usize,
    /// Voice pool capacity, bounded by [`VOICES_MAX`](crate::limits::VOICES_MAX).
    pub voices: usize,
    /// Render worker thread count. 0 picks the machine's logical CPU count; values below 2
    /// render single threaded.
    pub thread_count: usize,
}

impl Default for PlayerOptions {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            channel_count: 2,
            block_frames: 1024,
            voices: 256,
            thread_count: 0,
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Cloneable handle for submitting live trigger events to a running player from other
/// threads. Events are validated on submission and applied in the player's next event
/// processing phase.
#[derive(Clone)]
pub struct EventSender {
    queue: Arc<ArrayQueue<(usize, TriggerEvent)>>,
}

impl EventSender {
    /// Submit one event for the given channel. Never blocks; a full queue rejects the event.
    pub fn send(&self, channel: usize, event: TriggerEvent) -> Result<(), Error> {
        if channel >= CHANNELS_MAX {
            return Err(Error::ParameterError(format!(
                "channel {channel} is out of range"
            )));
        }
        if !event.is_valid() {
            return Err(Error::ParameterError(format!(
                "invalid argument for event '{}'",
                event.name()
            )));
        }
        self.queue
            .push((channel, event))
            .map_err(|_| Error::SendError("live event queue is full".to_string()))
    }
}

// -------------------------------------------------------------------------------------------------

/// A stretch of frames up to the next trigger boundary.
#[derive(Debug, Clone, Copy)]
struct Segment {
    /// Musical position reached when the segment is fully consumed.
    target: Timestamp,
    frames_left: usize,
}

/// Playback position within the composition's pattern order.
#[derive(Debug, Clone, Copy, Default)]
struct PlaybackCursor {
    order_pos: usize,
    /// Currently playing pattern. `None` when the next pattern must be resolved.
    pattern: Option<usize>,
    /// Whether the current pattern was entered through a jump instead of the order.
    jumped: bool,
    row_index: usize,
    pos: Timestamp,
    /// Sub frame remainder carried between segments so boundaries never drift.
    carry: f64,
    segment: Option<Segment>,
    finished: bool,
    jump: Option<usize>,
}

// -------------------------------------------------------------------------------------------------

/// Renders a [`Composition`] into PCM audio blocks.
pub struct Player {
    composition: Composition,
    sample_rate: u32,
    channel_count: usize,
    block_frames: usize,
    tempo: f64,
    pos_frames: u64,
    connections: Connections,
    mixed_plan: SignalPlan,
    mixed_buffers: WorkBuffers,
    states: Vec<Option<Box<dyn DeviceState>>>,
    units: Vec<UnitRenderer>,
    unit_index: Vec<Option<usize>>,
    pool: VoicePool,
    channels: Vec<Channel>,
    channel_muted: [bool; CHANNELS_MAX],
    reservations: VoiceGroupReservations,
    live_events: Arc<ArrayQueue<(usize, TriggerEvent)>>,
    cursor: PlaybackCursor,
    thread_pool: Option<RenderThreadPool>,
    results: Vec<UnitProcessingResult>,
    last_block_audible: bool,
}

impl Player {
    /// Build a player for the given composition.
    ///
    /// All structural errors — invalid connections, cyclic graphs, limit violations — and
    /// all host machine errors — out of memory, failed thread spawns — surface here, before
    /// any audio renders. A successfully constructed player will not fail at render time.
    pub fn new(composition: Composition, options: PlayerOptions) -> Result<Self, Error> {
        if options.sample_rate == 0 {
            return Err(Error::ParameterError("sample rate must not be 0".to_string()));
        }
        if options.channel_count == 0 || options.channel_count > 8 {
            return Err(Error::ParameterError(format!(
                "unsupported channel count: {}",
                options.channel_count
            )));
        }
        if options.block_frames == 0 || options.block_frames > BLOCK_FRAMES_MAX {
            return Err(Error::LimitExceeded(format!(
                "block size {} is out of range (1..={BLOCK_FRAMES_MAX})",
                options.block_frames
            )));
        }

        // validate the global graph and derive the mixed signal plan
        let connections = Connections::build(
            composition.connections(),
            composition.devices(),
            MASTER_DEVICE_ID,
        )?;
        let mixed_plan = SignalPlan::build(&connections, composition.devices())?;
        let mixed_buffers = WorkBuffers::new(
            mixed_plan.buffer_count(),
            options.block_frames,
            options.channel_count,
        )?;

        // one device state per continuous processor, one renderer per audio unit
        let mut states = Vec::with_capacity(composition.devices().len());
        let mut units = Vec::new();
        let mut unit_index = vec![None; composition.devices().len()];
        for (device_id, device) in composition.devices().iter() {
            let state = match device.kind() {
                DeviceKind::Processor(processor) => Some(
                    processor
                        .create_state(
                            options.sample_rate,
                            options.block_frames,
                            options.channel_count,
                        )
                        .ok_or_else(|| {
                            Error::ParameterError(format!(
                                "processor '{}' provides no render state",
                                processor.name()
                            ))
                        })?,
                ),
                DeviceKind::AudioUnit(unit) => {
                    unit_index[device_id] = Some(units.len());
                    units.push(UnitRenderer::new(
                        device_id,
                        unit,
                        options.block_frames,
                        options.channel_count,
                    )?);
                    None
                }
                DeviceKind::Master => None,
            };
            states.push(state);
        }

        let pool = VoicePool::new(options.voices)?;
        let tempo = composition.initial_tempo();
        let channels = (0..CHANNELS_MAX)
            .map(|index| {
                Channel::new(
                    index,
                    composition.channel_defaults(),
                    composition.seed(),
                    options.sample_rate,
                    tempo,
                )
            })
            .collect();

        let thread_count = if options.thread_count == 0 {
            num_cpus::get()
        } else {
            options.thread_count
        };
        let thread_pool = if thread_count >= 2 && units.len() >= 2 {
            Some(RenderThreadPool::new(
                thread_count,
                options.sample_rate,
                options.block_frames,
            )?)
        } else {
            None
        };

        let results = Vec::with_capacity(units.len().max(1));

        Ok(Self {
            composition,
            sample_rate: options.sample_rate,
            channel_count: options.channel_count,
            block_frames: options.block_frames,
            tempo,
            pos_frames: 0,
            connections,
            mixed_plan,
            mixed_buffers,
            states,
            units,
            unit_index,
            pool,
            channels,
            channel_muted: [false; CHANNELS_MAX],
            reservations: VoiceGroupReservations::new(EVENT_QUEUE_SIZE),
            live_events: Arc::new(ArrayQueue::new(EVENT_QUEUE_SIZE)),
            cursor: PlaybackCursor::default(),
            thread_pool,
            results,
            last_block_audible: false,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    pub fn block_frames(&self) -> usize {
        self.block_frames
    }

    /// Current tempo in beats per minute.
    pub fn tempo(&self) -> f64 {
        self.tempo
    }

    /// Absolute playback position in frames.
    pub fn position_frames(&self) -> u64 {
        self.pos_frames
    }

    /// Whether the composition ended and all voices finished decaying.
    pub fn is_finished(&self) -> bool {
        self.cursor.finished && self.pool.active_count() == 0
    }

    /// Whether any audio unit contributed audible output in the last rendered block.
    /// Drivers can use this to pause delivery during long stretches of silence.
    pub fn produced_audible_output(&self) -> bool {
        self.last_block_audible
    }

    /// Musical duration of the composition in frames, assuming the initial tempo
    /// throughout. An empty composition has duration 0.
    pub fn duration_frames(&self) -> u64 {
        self.composition
            .duration()
            .to_frames(self.composition.initial_tempo(), self.sample_rate) as u64
    }

    /// Handle for submitting live events from other threads.
    pub fn event_sender(&self) -> EventSender {
        EventSender {
            queue: Arc::clone(&self.live_events),
        }
    }

    /// The player's voice pool, for capacity introspection.
    pub fn voice_pool(&self) -> &VoicePool {
        &self.pool
    }

    /// One playback channel, for state introspection.
    pub fn channel(&self, index: usize) -> Option<&Channel> {
        self.channels.get(index)
    }

    /// Re-validate the global connection graph after a device edit, reporting every
    /// dangling edge instead of stopping at the first.
    pub fn check_connections(&self) -> Result<(), Vec<ConnectionError>> {
        self.connections.check(self.composition.devices())
    }

    /// Update a parameter of a global effect processor in the render state.
    pub fn set_processor_parameter(
        &mut self,
        device: DeviceId,
        parameter: FourCC,
        value: f32,
    ) -> Result<(), Error> {
        match self.states.get_mut(device) {
            Some(Some(state)) => state.set_parameter(parameter, value),
            _ => Err(Error::DeviceNotFound(device)),
        }
    }

    /// Rewind for an independent playback start: cursor, channels, device states and the
    /// voice pool are restored to their initial state.
    pub fn reset(&mut self) {
        while self.live_events.pop().is_some() {}
        while self.reservations.pop().is_some() {}
        self.pool.reset();
        self.tempo = self.composition.initial_tempo();
        for channel in &mut self.channels {
            channel.reset(self.tempo);
        }
        for state in self.states.iter_mut().flatten() {
            state.reset();
        }
        self.cursor = PlaybackCursor::default();
        self.pos_frames = 0;
    }

    /// Render interleaved audio into `output` and return the number of frames written.
    ///
    /// The call splits its work at trigger boundaries and the configured block size; per
    /// chunk, the event processing phase completes strictly before the render phase starts.
    /// Once the composition ended and all voices decayed, the output is zeroed and 0 is
    /// returned.
    pub fn render(&mut self, output: &mut [f32]) -> usize {
        let total_frames = output.len() / self.channel_count;
        clear_buffer(output);

        let mut written = 0;
        while written < total_frames {
            // ---- event processing phase ----
            self.pool.collect_finished();
            self.drain_live_events();
            let max_frames = (total_frames - written).min(self.block_frames);
            let chunk = self.prepare_chunk(max_frames);
            if self.cursor.finished && self.pool.active_count() == 0 {
                break;
            }

            // ---- render phase ----
            let chunk_output = &mut output
                [written * self.channel_count..(written + chunk) * self.channel_count];
            self.render_chunk(chunk, chunk_output);

            self.consume_chunk(chunk);
            self.pos_frames += chunk as u64;
            written += chunk;
        }
        written
    }

    /// Advance the cursor up to the next unfired trigger, firing everything due at the
    /// current position, and return the chunk length in frames (at most `max_frames`).
    fn prepare_chunk(&mut self, max_frames: usize) -> usize {
        loop {
            // a pending jump cuts the current segment and revives a finished cursor
            if let Some(jump) = self.cursor.jump.take() {
                self.cursor.pattern = Some(jump);
                self.cursor.jumped = true;
                self.cursor.row_index = 0;
                self.cursor.pos = Timestamp::ZERO;
                self.cursor.segment = None;
                self.cursor.finished = false;
            }
            if let Some(segment) = &self.cursor.segment {
                return segment.frames_left.min(max_frames);
            }
            if self.cursor.finished {
                // free-run so active voices keep decaying past the composition's end
                return max_frames;
            }

            let Some(pattern_index) = self
                .cursor
                .pattern
                .or_else(|| self.composition.order().get(self.cursor.order_pos).copied())
            else {
                self.cursor.finished = true;
                continue;
            };
            self.cursor.pattern = Some(pattern_index);

            // fire all rows due at the current position, in row order
            loop {
                let row = {
                    let pattern = &self.composition.patterns()[pattern_index];
                    match pattern.rows().get(self.cursor.row_index) {
                        Some(row) if row.time <= self.cursor.pos => Some(*row),
                        _ => None,
                    }
                };
                match row {
                    Some(row) => {
                        self.cursor.row_index += 1;
                        self.dispatch_event(row.channel, &row.event);
                    }
                    None => break,
                }
            }
            if self.cursor.jump.is_some() {
                continue;
            }

            let pattern_length = self.composition.patterns()[pattern_index].length();
            if self.cursor.pos >= pattern_length {
                if self.cursor.jumped {
                    self.cursor.jumped = false;
                } else {
                    self.cursor.order_pos += 1;
                }
                self.cursor.pattern = None;
                self.cursor.row_index = 0;
                self.cursor.pos = Timestamp::ZERO;
                continue;
            }

            // frames until the next trigger or the pattern end, with sub frame carry
            let next = {
                let pattern = &self.composition.patterns()[pattern_index];
                pattern
                    .rows()
                    .get(self.cursor.row_index)
                    .map(|row| row.time.min(pattern_length))
                    .unwrap_or(pattern_length)
            };
            let exact = (next - self.cursor.pos).to_frames(self.tempo, self.sample_rate)
                + self.cursor.carry;
            let whole = exact.floor();
            if whole < 1.0 {
                self.cursor.carry = exact;
                self.cursor.pos = next;
                continue;
            }
            self.cursor.carry = exact - whole;
            self.cursor.segment = Some(Segment {
                target: next,
                frames_left: whole as usize,
            });
        }
    }

    fn consume_chunk(&mut self, frames: usize) {
        if let Some(segment) = &mut self.cursor.segment {
            segment.frames_left -= frames.min(segment.frames_left);
            if segment.frames_left == 0 {
                self.cursor.pos = segment.target;
                self.cursor.segment = None;
            }
        }
    }

    fn drain_live_events(&mut self) {
        while let Some((channel, event)) = self.live_events.pop() {
            self.dispatch_event(channel, &event);
        }
    }

    fn dispatch_event(&mut self, channel: usize, event: &TriggerEvent) {
        match event {
            TriggerEvent::SetTempo { tempo } => self.apply_tempo(*tempo),
            TriggerEvent::PlayPattern { pattern } => {
                if *pattern < self.composition.patterns().len() {
                    self.cursor.jump = Some(*pattern);
                } else {
                    log::warn!("ignoring jump to unknown pattern {pattern}");
                }
            }
            _ => {
                let devices = self.composition.devices();
                self.channels[channel].process_event(
                    event,
                    devices,
                    &mut self.pool,
                    &self.reservations,
                );
            }
        }
    }

    fn apply_tempo(&mut self, tempo: f64) {
        self.tempo = tempo;
        for channel in &mut self.channels {
            channel.set_tempo(tempo);
        }
        self.pool
            .for_all_voices_mut(|voice| voice.controls.set_tempo(tempo));
    }

    fn render_chunk(&mut self, frames: usize, output: &mut [f32]) {
        // consume this phase's reservations: the handoff point between event processing
        // and rendering
        while let Some(reservation) = self.reservations.pop() {
            self.pool.promote_group(reservation.group);
        }
        for (index, channel) in self.channels.iter().enumerate() {
            self.channel_muted[index] = channel.is_muted();
        }

        let ctx = RenderContext {
            sample_rate: self.sample_rate,
            channel_count: self.channel_count,
            tempo: self.tempo,
            pos_frames: self.pos_frames,
        };

        // voice rendering phase: each unit is processed by exactly one thread
        for unit in &mut self.units {
            unit.take_voices(&mut self.pool);
        }
        let concurrent = self
            .thread_pool
            .as_ref()
            .is_some_and(|pool| pool.should_use_concurrent_processing(self.units.len()));
        if concurrent {
            let thread_pool = self.thread_pool.as_mut().expect("checked above");
            thread_pool.process(
                &mut self.units,
                frames,
                &ctx,
                &self.channel_muted,
                &mut self.results,
            );
        } else {
            let units = &mut self.units;
            let results = &mut self.results;
            let channel_muted = &self.channel_muted;
            results.clear();
            assert_no_alloc(|| {
                for unit in units.iter_mut() {
                    let is_audible = unit.process(frames, &ctx, channel_muted);
                    results.push(UnitProcessingResult {
                        unit_device: unit.unit_device(),
                        is_audible,
                    });
                }
            });
        }
        for unit in &mut self.units {
            unit.return_voices(&mut self.pool);
        }
        self.last_block_audible = self.results.iter().any(|result| result.is_audible);

        // mixed rendering phase on the calling thread
        let units = &self.units;
        let unit_index = &self.unit_index;
        let mixed_plan = &self.mixed_plan;
        let mixed_buffers = &mut self.mixed_buffers;
        let states = &mut self.states;
        assert_no_alloc(|| {
            mixed_plan.process_mixed(
                mixed_buffers,
                states,
                |device| {
                    unit_index
                        .get(device)
                        .copied()
                        .flatten()
                        .map(|index| units[index].output())
                },
                frames,
                &ctx,
            );
        });

        // copy the master bus into the output; it stays silent when nothing is connected
        if let Some(master) = self.mixed_plan.master_input() {
            output.copy_from_slice(
                self.mixed_buffers
                    .slice(master, frames * self.channel_count),
            );
        }
    }
}

// -------------------------------------------------------------------------------------------------
