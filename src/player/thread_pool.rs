use std::{
    any::Any,
    ptr::NonNull,
    sync::{Arc, Mutex, MutexGuard},
    thread,
};

use crossbeam_channel::{Receiver, Sender};

use crate::{
    device::{DeviceId, RenderContext},
    error::Error,
    limits::CHANNELS_MAX,
    player::unit::UnitRenderer,
};

// -------------------------------------------------------------------------------------------------

/// A bin for collecting audio units assigned to a worker during bin-packing.
#[derive(Debug, Clone)]
struct WorkerTaskBin {
    pub total_weight: usize,
    pub unit_indices: Vec<usize>,
}

impl WorkerTaskBin {
    fn new(capacity_hint: usize) -> Self {
        Self {
            total_weight: 0,
            unit_indices: Vec::with_capacity(capacity_hint),
        }
    }

    fn clear(&mut self) {
        self.total_weight = 0;
        self.unit_indices.clear();
    }
}

// -------------------------------------------------------------------------------------------------

/// Weight and unit index for a single audio unit within a worker task batch.
#[derive(Debug, Copy, Clone)]
struct WorkerTaskUnitWeight {
    index: usize,
    weight: usize,
}

// -------------------------------------------------------------------------------------------------

/// Creates weighted batches of audio unit tasks for parallel processing in the thread pool,
/// using pre-allocated scratch buffers.
#[derive(Debug, Clone)]
struct WorkerTaskBatcher {
    /// Unit index and weight for bin sorting
    units: Vec<WorkerTaskUnitWeight>,
    /// One bin per worker thread
    bins: Vec<WorkerTaskBin>,
}

impl WorkerTaskBatcher {
    pub fn new(thread_count: usize, max_expected_units: usize) -> Self {
        // Each bin should hold roughly max_units/thread_count, plus headroom for imbalance
        let bin_capacity = (max_expected_units / thread_count).max(1) + 8;

        Self {
            units: Vec::with_capacity(max_expected_units),
            bins: (0..thread_count)
                .map(|_| WorkerTaskBin::new(bin_capacity))
                .collect(),
        }
    }

    #[inline(always)]
    pub fn bins(&self) -> &Vec<WorkerTaskBin> {
        &self.bins
    }

    pub fn clear(&mut self) {
        self.units.clear();
        for bin in &mut self.bins {
            bin.clear();
        }
    }

    /// Create weighted batches of audio units for parallel processing.
    ///
    /// This implements a greedy bin-packing algorithm that distributes units across workers
    /// to balance total processing weight per worker. Units with more active voices are
    /// assigned first to minimize load imbalance. Which thread renders which unit never
    /// changes the logical result, only the wall clock cost.
    pub fn update(&mut self, units: &[UnitRenderer]) {
        self.clear();

        if units.is_empty() {
            return;
        }

        // Calculate weight for each unit and store in the pre-allocated buffer
        self.units
            .extend(units.iter().enumerate().map(|(index, unit)| {
                WorkerTaskUnitWeight {
                    index,
                    weight: unit.weight(),
                }
            }));

        // Sort by weight descending (largest first for better packing)
        self.units.sort_by(|a, b| b.weight.cmp(&a.weight));

        // Greedy assignment: assign each unit to the worker with the lowest current weight
        for unit_weight in &self.units {
            let min_bin = self
                .bins
                .iter_mut()
                .min_by_key(|bin| bin.total_weight)
                .expect("thread pool has at least one bin");

            min_bin.total_weight += unit_weight.weight;
            min_bin.unit_indices.push(unit_weight.index);
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Command sent from the render thread to worker threads.
#[derive(Debug, Copy, Clone)]
enum WorkerCommand {
    Process,
    Shutdown,
}

/// Completion message sent from a worker thread back to the render thread.
type WorkerCompletion = Result<(), Box<dyn Any + Send + 'static>>;

// -------------------------------------------------------------------------------------------------

/// A batch processing task, containing unit renderer pointers and metadata for processing
/// audio units in a thread pool's worker thread.
#[derive(Debug)]
struct WorkerProcessingTask {
    units: Vec<NonNull<UnitRenderer>>,
    frames: usize,
    ctx: RenderContext,
    channel_muted: [bool; CHANNELS_MAX],
}

impl WorkerProcessingTask {
    fn new(capacity_hint: usize) -> Self {
        Self {
            units: Vec::with_capacity(capacity_hint),
            frames: 0,
            ctx: RenderContext::default(),
            channel_muted: [false; CHANNELS_MAX],
        }
    }
}

// SAFETY: WorkerProcessingTask contains NonNull pointers but we control their lifetimes.
// The render thread creates these pointers from &mut references and waits for all workers
// to complete before accessing the referenced data again.
unsafe impl Send for WorkerProcessingTask {}

// -------------------------------------------------------------------------------------------------

/// Per-worker state that only the owning worker and the render thread access.
/// No lock contention between workers since each worker has its own instance.
#[derive(Debug)]
struct WorkerState {
    /// Current work package
    task: Mutex<WorkerProcessingTask>,
    /// Results from the last processed task
    results: Mutex<Vec<UnitProcessingResult>>,
    /// Channel to send commands to this worker
    work_sender: Sender<WorkerCommand>,
    /// Channel to receive completion from this worker
    completion_receiver: Receiver<WorkerCompletion>,
}

impl WorkerState {
    fn new(capacity_hint: usize) -> (Self, Receiver<WorkerCommand>, Sender<WorkerCompletion>) {
        let (work_sender, work_receiver) = crossbeam_channel::bounded(0);
        let (completion_sender, completion_receiver) = crossbeam_channel::bounded(0);

        let state = Self {
            task: Mutex::new(WorkerProcessingTask::new(capacity_hint)),
            results: Mutex::new(Vec::with_capacity(capacity_hint)),
            work_sender,
            completion_receiver,
        };

        (state, work_receiver, completion_sender)
    }

    /// Get the worker thread's current work package.
    #[inline(always)]
    fn task(&self) -> MutexGuard<'_, WorkerProcessingTask> {
        self.task.lock().unwrap()
    }

    /// Set batch and parameters for the worker.
    fn set_task<I>(
        &self,
        units: I,
        frames: usize,
        ctx: &RenderContext,
        channel_muted: &[bool; CHANNELS_MAX],
    ) where
        I: IntoIterator<Item = NonNull<UnitRenderer>>,
    {
        let mut task = self.task.lock().unwrap();
        task.units.clear();
        task.units.extend(units);
        task.frames = frames;
        task.ctx = *ctx;
        task.channel_muted = *channel_muted;

        let mut results = self.results.lock().unwrap();
        results.clear();
    }

    /// Render thread takes results from this worker.
    fn take_results(&self, results: &mut Vec<UnitProcessingResult>) {
        results.append(&mut *self.results.lock().unwrap())
    }

    /// Worker thread swaps its local results buffer with the stored one.
    fn swap_results(&self, worker_results: &mut Vec<UnitProcessingResult>) {
        let mut stored_results = self.results.lock().unwrap();
        std::mem::swap(&mut *stored_results, worker_results);
    }
}

// -------------------------------------------------------------------------------------------------

/// Result from processing one audio unit.
#[derive(Debug, Copy, Clone)]
pub(crate) struct UnitProcessingResult {
    /// The global device id of the processed unit.
    #[allow(dead_code)]
    pub unit_device: DeviceId,
    /// Whether the unit produced audible output.
    pub is_audible: bool,
}

// -------------------------------------------------------------------------------------------------

/// A real-time safe thread pool for parallel audio unit rendering.
///
/// Workers are pre-spawned at construction time and promoted to real-time priority. Each
/// block they are woken through a zero capacity channel rendezvous, render their disjoint
/// unit subset to completion and signal back — the two barriers per block that establish
/// cross-thread visibility without per-access synchronization.
pub(crate) struct RenderThreadPool {
    /// Per-worker state (no contention between workers, includes channels)
    worker_states: Vec<Arc<WorkerState>>,
    /// Worker thread handles
    worker_threads: Vec<thread::JoinHandle<()>>,
    /// Pre-allocated scratch buffers for batching (reused each block)
    task_batcher: WorkerTaskBatcher,
}

impl RenderThreadPool {
    /// Maximum number of audio units we pre-allocate scratch space for.
    pub const MAX_UNITS_HINT: usize = 64;

    /// Create a new thread pool with the given worker count.
    ///
    /// Spawns the workers immediately and attempts to promote them to real-time priority.
    /// A failed thread spawn is fatal to player construction and reported as a
    /// [`Error::ThreadError`], distinct from composition errors.
    pub fn new(thread_count: usize, sample_rate: u32, block_frames: usize) -> Result<Self, Error> {
        let worker_capacity = (Self::MAX_UNITS_HINT / thread_count).max(1) + 16;

        let mut worker_states = Vec::with_capacity(thread_count);
        let mut worker_threads = Vec::with_capacity(thread_count);

        for worker_id in 0..thread_count {
            let (state, work_receiver, completion_sender) = WorkerState::new(worker_capacity);
            let worker_state = Arc::new(state);
            worker_states.push(Arc::clone(&worker_state));

            let results_capacity = worker_capacity;
            let thread = thread::Builder::new()
                .name(format!("sonant-render-worker-{}", worker_id))
                .spawn(move || {
                    let error_sender = completion_sender.clone();
                    if let Err(payload) = std::panic::catch_unwind(move || {
                        Self::run_worker_thread(
                            sample_rate,
                            block_frames,
                            worker_id,
                            worker_state,
                            work_receiver,
                            completion_sender,
                            results_capacity,
                        )
                    }) {
                        log::error!(
                            "Ouch. Render worker thread #{worker_id} panicked: {}",
                            panic_message::panic_message(&payload)
                        );
                        error_sender
                            .send(Err(payload))
                            .expect("Failed to send completion error to render thread")
                    }
                })
                .map_err(|err| Error::ThreadError(err.to_string()))?;
            worker_threads.push(thread);
        }

        let task_batcher = WorkerTaskBatcher::new(thread_count, Self::MAX_UNITS_HINT);

        Ok(Self {
            worker_states,
            worker_threads,
            task_batcher,
        })
    }

    /// Check if the thread pool should be used for the given number of audio units.
    pub fn should_use_concurrent_processing(&self, unit_count: usize) -> bool {
        self.worker_threads.len() >= 2 && unit_count >= 2
    }

    /// Render all audio units in parallel across the worker threads.
    ///
    /// This is a synchronous blocking call: it distributes weighted unit batches to the
    /// workers, wakes them, waits for every completion and collects the results. When the
    /// call returns, all unit outputs are fully written and safely visible to the render
    /// thread.
    ///
    /// # Safety contract
    /// The units slice must remain valid and unmodified for the duration of this call; each
    /// unit is referenced by exactly one worker.
    pub fn process(
        &mut self,
        units: &mut [UnitRenderer],
        frames: usize,
        ctx: &RenderContext,
        channel_muted: &[bool; CHANNELS_MAX],
        results: &mut Vec<UnitProcessingResult>,
    ) {
        debug_assert!(self.should_use_concurrent_processing(units.len()));

        // Divide units into weighted task batches across all workers
        self.task_batcher.update(units);

        results.clear();

        // Assign work from the batcher and wake all workers which have tasks
        for (worker_id, worker_state) in self.worker_states.iter().enumerate() {
            if let Some(bin) = self.task_batcher.bins().get(worker_id) {
                if !bin.unit_indices.is_empty() {
                    let unit_ptrs = bin
                        .unit_indices
                        .iter()
                        .map(|&index| NonNull::from(&mut units[index]));
                    worker_state.set_task(unit_ptrs, frames, ctx, channel_muted);
                    worker_state
                        .work_sender
                        .send(WorkerCommand::Process)
                        .expect("Failed to send process command to render worker thread");
                }
            }
        }

        // Wait for completions from workers with tasks and collect results
        for (worker_id, worker_state) in self.worker_states.iter().enumerate() {
            if let Some(bin) = self.task_batcher.bins().get(worker_id) {
                if !bin.unit_indices.is_empty() {
                    // NB: Crossbeam allocs thread local variables here once, which is fine.
                    let result = permit_alloc(|| {
                        worker_state
                            .completion_receiver
                            .recv()
                            .expect("Failed to receive message from render worker thread")
                    });
                    if let Err(payload) = result {
                        // Forward errors from the worker thread to the render thread
                        panic!(
                            "Render worker thread #{worker_id} processing failed: {}",
                            panic_message::panic_message(&payload)
                        );
                    } else {
                        worker_state.take_results(results);
                    }
                }
            }
        }
    }

    fn run_worker_thread(
        sample_rate: u32,
        block_frames: usize,
        worker_id: usize,
        worker_state: Arc<WorkerState>,
        work_receiver: Receiver<WorkerCommand>,
        completion_sender: Sender<WorkerCompletion>,
        results_capacity: usize,
    ) {
        // Attempt to promote this thread to real-time priority
        if let Err(err) = audio_thread_priority::promote_current_thread_to_real_time(
            block_frames as u32,
            sample_rate,
        ) {
            log::warn!(
                "Failed to promote render worker {} to real-time priority: {}",
                worker_id,
                err
            );
        }

        // Pre-allocate a results buffer for this worker thread (reused each block)
        let mut worker_results = Vec::with_capacity(results_capacity);

        // Worker loop: wait for a processing signal or shutdown
        loop {
            match work_receiver.recv() {
                Ok(WorkerCommand::Process) => {
                    worker_results.clear();

                    assert_no_alloc(|| {
                        // Get work from our own worker state (no contention with others)
                        let task = worker_state.task();

                        for unit_ptr in &task.units {
                            // SAFETY: unit_ptr is valid for the duration of processing. The
                            // render thread waits for all workers before touching the units
                            // again, and no two workers share a unit.
                            let unit = unsafe { &mut *unit_ptr.as_ptr() };
                            let is_audible =
                                unit.process(task.frames, &task.ctx, &task.channel_muted);
                            worker_results.push(UnitProcessingResult {
                                unit_device: unit.unit_device(),
                                is_audible,
                            });
                        }
                    });

                    // Move results from the worker into the shared state
                    worker_state.swap_results(&mut worker_results);

                    // Signal completion
                    // NB: Crossbeam allocs thread local variables here once, which is fine.
                    if completion_sender.send(WorkerCompletion::Ok(())).is_err() {
                        log::warn!(
                            "Render worker thread #{worker_id} unexpectedly got disconnected from the render thread."
                        );
                        break;
                    }
                }
                Ok(WorkerCommand::Shutdown) => {
                    log::info!("Render worker thread #{worker_id} is shutting down...");
                    break;
                }
                Err(_) => {
                    log::warn!(
                        "Render worker thread #{worker_id} unexpectedly got disconnected from the render thread."
                    );
                    break;
                }
            }
        }
    }
}

impl Drop for RenderThreadPool {
    fn drop(&mut self) {
        // Signal shutdown to each worker
        for worker_state in &self.worker_states {
            let _ = worker_state.work_sender.send(WorkerCommand::Shutdown);
        }

        // Wait for all workers to finish; tear down happens at a block boundary only, as
        // workers run each block to completion before waiting for the next command
        while let Some(worker) = self.worker_threads.pop() {
            if let Err(payload) = worker.join() {
                log::error!(
                    "Render worker thread panicked: {}",
                    panic_message::panic_message(&payload)
                );
            }
        }
    }
}

// -------------------------------------------------------------------------------------------------

pub(crate) fn assert_no_alloc<T, F: FnOnce() -> T>(func: F) -> T {
    #[cfg(feature = "assert-allocs")]
    return assert_no_alloc::assert_no_alloc::<T, F>(func);

    #[cfg(not(feature = "assert-allocs"))]
    return func();
}

#[inline]
pub(crate) fn permit_alloc<T, F: FnOnce() -> T>(func: F) -> T {
    #[cfg(feature = "assert-allocs")]
    return assert_no_alloc::permit_alloc::<T, F>(func);

    #[cfg(not(feature = "assert-allocs"))]
    return func();
}
