//! Signal plans: the precomputed topological execution order derived from a connection set.
//!
//! A plan is built once per graph and replayed every block with no further graph walking.
//! Work buffer indices for every device port are assigned here at build time, so the render
//! phase never decides buffer ownership.

use crate::{
    device::{
        graph::Connections, DeviceId, DeviceKind, DeviceState, DeviceTable, RenderContext,
        VoiceControlBuffers,
    },
    error::Error,
    utils::buffer::{buffer_is_finite, WorkBufferId, WorkBuffers},
    voice::Voice,
};

// -------------------------------------------------------------------------------------------------

/// How a plan task is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PlanTaskKind {
    /// The sink of the graph; its summed input is the plan's result.
    Master,
    /// An audio unit contributing its accumulated voice output to the global graph.
    AudioUnit,
    /// A continuous processor rendered through its device state.
    MixedProcessor,
    /// A voice processor rendered through per note voice states.
    VoiceProcessor,
}

/// One executable step of a signal plan: a device plus the work buffers of its ports and the
/// resolved incoming connections.
pub(crate) struct PlanTask {
    pub device: DeviceId,
    pub kind: PlanTaskKind,
    /// One mix buffer per receive port, summed from all incoming edges before rendering.
    pub inputs: Vec<WorkBufferId>,
    /// One buffer per send port, completely written by the device's render call.
    pub outputs: Vec<WorkBufferId>,
    /// Resolved incoming edges as (source send buffer, target receive port index).
    pub sources: Vec<(WorkBufferId, usize)>,
}

// -------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VisitState {
    Unvisited,
    Visiting,
    Done,
}

// -------------------------------------------------------------------------------------------------

/// A topologically ordered execution list over a device graph.
///
/// Only devices reachable from the master node are part of the plan; non existent devices are
/// skipped as zero contributors, which also silences everything routed through them. Receive
/// ports accumulate by summation, so multiple edges into one port mix rather than overwrite.
pub struct SignalPlan {
    tasks: Vec<PlanTask>,
    master_input: Option<WorkBufferId>,
    buffer_count: usize,
}

impl SignalPlan {
    /// Derive the execution order from a connection set.
    ///
    /// Fails with [`Error::CyclicGraph`] when the graph contains a cycle; this is the place
    /// where cycles surface, deterministically and before any audio renders.
    pub fn build(connections: &Connections, table: &DeviceTable) -> Result<Self, Error> {
        let master = connections.master();
        let master_device = table.get(master).ok_or(Error::DeviceNotFound(master))?;

        let mut states = vec![VisitState::Unvisited; table.len()];
        let mut tasks = Vec::new();
        let mut task_of: Vec<Option<usize>> = vec![None; table.len()];
        let mut next_buffer = 0;

        if master_device.is_existent() {
            visit(
                master,
                connections,
                table,
                &mut states,
                &mut tasks,
                &mut task_of,
                &mut next_buffer,
            )?;
        }

        let master_input = task_of[master]
            .and_then(|task| tasks[task].inputs.first().copied());

        Ok(Self {
            tasks,
            master_input,
            buffer_count: next_buffer,
        })
    }

    /// Number of work buffers the plan's tasks reference. The owning renderer allocates its
    /// work buffer pool to at least this size.
    pub fn buffer_count(&self) -> usize {
        self.buffer_count
    }

    /// The master node's mix buffer, holding the final plan result after execution.
    /// `None` when nothing is connected to the master.
    pub fn master_input(&self) -> Option<WorkBufferId> {
        self.master_input
    }

    /// Number of executable tasks in the plan.
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Whether the given device is part of the execution order, i.e. existent and reachable
    /// from the master node.
    pub fn contains_device(&self, device: DeviceId) -> bool {
        self.tasks.iter().any(|task| task.device == device)
    }

    /// Execute the plan over the always-on global graph.
    ///
    /// `states` is indexed by device id; `unit_output` resolves an audio unit device to its
    /// accumulated voice rendering output for this block chunk.
    pub(crate) fn process_mixed<'a>(
        &self,
        buffers: &mut WorkBuffers,
        states: &mut [Option<Box<dyn DeviceState>>],
        unit_output: impl Fn(DeviceId) -> Option<&'a [f32]>,
        frames: usize,
        ctx: &RenderContext,
    ) {
        let samples = frames * ctx.channel_count;
        for task in &self.tasks {
            self.sum_task_inputs(task, buffers, samples);
            match task.kind {
                PlanTaskKind::Master => {
                    // the summed input of the master is the final mix
                }
                PlanTaskKind::AudioUnit => {
                    let output = buffers.slice_mut(task.outputs[0], samples);
                    match unit_output(task.device) {
                        Some(unit) => output.copy_from_slice(&unit[..samples]),
                        None => output.fill(0.0),
                    }
                }
                PlanTaskKind::MixedProcessor => match states[task.device].as_mut() {
                    Some(state) => {
                        state.render(buffers, &task.inputs, &task.outputs, frames, ctx);
                    }
                    None => {
                        for output in &task.outputs {
                            buffers.clear(*output, samples);
                        }
                    }
                },
                PlanTaskKind::VoiceProcessor => {
                    debug_assert!(false, "voice processors don't take part in mixed plans");
                }
            }
        }
    }

    /// Execute the plan for one voice group.
    ///
    /// `voice_of_device` maps a device id to the group's voice bound to that processor.
    /// Returns the number of frames rendered before every voice reached its termination
    /// condition; a short return means the note ended early and the caller must not assume
    /// buffer validity beyond it. Voices producing non finite output deactivate themselves
    /// and contribute silence instead of propagating NaNs downstream.
    pub(crate) fn process_voice_group(
        &self,
        group: &mut [Box<Voice>],
        voice_of_device: &[Option<usize>],
        buffers: &mut WorkBuffers,
        controls: &VoiceControlBuffers,
        frames: usize,
        ctx: &RenderContext,
    ) -> usize {
        let samples = frames * ctx.channel_count;
        let mut rendered_frames = 0;
        for task in &self.tasks {
            self.sum_task_inputs(task, buffers, samples);
            match task.kind {
                PlanTaskKind::Master => {
                    // the summed input of the unit output is the group's result
                }
                PlanTaskKind::VoiceProcessor => {
                    let voice = voice_of_device
                        .get(task.device)
                        .copied()
                        .flatten()
                        .map(|index| &mut group[index]);
                    let rendered = match voice {
                        Some(voice) if voice.proc_state.is_active() => {
                            let rendered = voice.proc_state.render(
                                buffers,
                                &task.inputs,
                                &task.outputs,
                                controls,
                                frames,
                                ctx,
                            );
                            // a voice emitting non finite values is treated as naturally ended
                            let finite = task.outputs.iter().all(|output| {
                                buffer_is_finite(
                                    buffers.slice(*output, rendered * ctx.channel_count),
                                )
                            });
                            if finite {
                                rendered
                            } else {
                                voice.proc_state.reset();
                                0
                            }
                        }
                        _ => 0,
                    };
                    // zero everything past the rendered range so downstream sums stay valid
                    for output in &task.outputs {
                        let output = buffers.slice_mut(*output, samples);
                        output[rendered * ctx.channel_count..].fill(0.0);
                    }
                    rendered_frames = rendered_frames.max(rendered);
                }
                PlanTaskKind::AudioUnit | PlanTaskKind::MixedProcessor => {
                    debug_assert!(
                        false,
                        "only voice processors take part in voice signal plans"
                    );
                }
            }
        }
        rendered_frames
    }

    fn sum_task_inputs(&self, task: &PlanTask, buffers: &mut WorkBuffers, samples: usize) {
        for input in &task.inputs {
            buffers.clear(*input, samples);
        }
        for (source, port) in &task.sources {
            buffers.sum_into(task.inputs[*port], *source, samples);
        }
    }
}

// -------------------------------------------------------------------------------------------------

#[allow(clippy::too_many_arguments)]
fn visit(
    device: DeviceId,
    connections: &Connections,
    table: &DeviceTable,
    states: &mut [VisitState],
    tasks: &mut Vec<PlanTask>,
    task_of: &mut [Option<usize>],
    next_buffer: &mut usize,
) -> Result<(), Error> {
    match states[device] {
        VisitState::Done => return Ok(()),
        VisitState::Visiting => return Err(Error::CyclicGraph(device)),
        VisitState::Unvisited => {}
    }
    states[device] = VisitState::Visiting;

    let entry = table.get(device).ok_or(Error::DeviceNotFound(device))?;

    // render all existent source devices before this one
    for edge in connections.incoming(device) {
        let source = edge.from.0;
        let source_device = table.get(source).ok_or(Error::DeviceNotFound(source))?;
        if source_device.is_existent() {
            visit(
                source,
                connections,
                table,
                states,
                tasks,
                task_of,
                next_buffer,
            )?;
        }
    }

    let mut allocate = |count: usize| -> Vec<WorkBufferId> {
        (0..count)
            .map(|_| {
                let id = WorkBufferId(*next_buffer);
                *next_buffer += 1;
                id
            })
            .collect()
    };
    let inputs = allocate(entry.audio_in_count());
    let outputs = allocate(entry.audio_out_count());

    // resolve incoming edges to source buffers; edges from skipped devices contribute nothing
    let sources = connections
        .incoming(device)
        .filter_map(|edge| {
            let (source, source_port) = edge.from;
            task_of[source].map(|task| (tasks[task].outputs[source_port], edge.to.1))
        })
        .collect();

    let kind = match entry.kind() {
        DeviceKind::Master => PlanTaskKind::Master,
        DeviceKind::AudioUnit(_) => PlanTaskKind::AudioUnit,
        DeviceKind::Processor(processor) => {
            if processor.is_voice_processor() {
                PlanTaskKind::VoiceProcessor
            } else {
                PlanTaskKind::MixedProcessor
            }
        }
    };

    tasks.push(PlanTask {
        device,
        kind,
        inputs,
        outputs,
        sources,
    });
    task_of[device] = Some(tasks.len() - 1);
    states[device] = VisitState::Done;
    Ok(())
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{
        graph::Connection, Device, DeviceKind, Processor, MASTER_DEVICE_ID,
    };

    /// A continuous processor which writes a constant value to all outputs.
    struct ConstProc {
        value: f32,
    }

    struct ConstProcState {
        value: f32,
    }

    impl Processor for ConstProc {
        fn name(&self) -> &'static str {
            "const"
        }
        fn create_state(
            &self,
            _sample_rate: u32,
            _max_block_frames: usize,
            _channel_count: usize,
        ) -> Option<Box<dyn DeviceState>> {
            Some(Box::new(ConstProcState { value: self.value }))
        }
    }

    impl DeviceState for ConstProcState {
        fn reset(&mut self) {}
        fn render(
            &mut self,
            buffers: &mut WorkBuffers,
            _inputs: &[WorkBufferId],
            outputs: &[WorkBufferId],
            frames: usize,
            ctx: &RenderContext,
        ) {
            for output in outputs {
                buffers
                    .slice_mut(*output, frames * ctx.channel_count)
                    .fill(self.value);
            }
        }
    }

    /// A continuous processor which passes its summed input through unchanged.
    struct ThroughProc;

    struct ThroughProcState;

    impl Processor for ThroughProc {
        fn name(&self) -> &'static str {
            "through"
        }
        fn audio_in_count(&self) -> usize {
            1
        }
        fn create_state(
            &self,
            _sample_rate: u32,
            _max_block_frames: usize,
            _channel_count: usize,
        ) -> Option<Box<dyn DeviceState>> {
            Some(Box::new(ThroughProcState))
        }
    }

    impl DeviceState for ThroughProcState {
        fn reset(&mut self) {}
        fn render(
            &mut self,
            buffers: &mut WorkBuffers,
            inputs: &[WorkBufferId],
            outputs: &[WorkBufferId],
            frames: usize,
            ctx: &RenderContext,
        ) {
            let samples = frames * ctx.channel_count;
            let (input, output) = buffers.in_out(inputs[0], outputs[0], samples);
            output.copy_from_slice(input);
        }
    }

    fn build_states(table: &DeviceTable) -> Vec<Option<Box<dyn DeviceState>>> {
        table
            .iter()
            .map(|(_, device)| {
                device
                    .processor()
                    .and_then(|processor| processor.create_state(44100, 64, 2))
            })
            .collect()
    }

    fn run_mixed(plan: &SignalPlan, table: &DeviceTable, frames: usize) -> Vec<f32> {
        let mut buffers = WorkBuffers::new(plan.buffer_count(), frames, 2).unwrap();
        let mut states = build_states(table);
        let ctx = RenderContext::default();
        plan.process_mixed(&mut buffers, &mut states, |_| None, frames, &ctx);
        let master = plan.master_input().expect("master should be connected");
        buffers.slice(master, frames * 2).to_vec()
    }

    #[test]
    fn summation_is_order_independent() {
        let mut table = DeviceTable::new(8);
        let a = table
            .add(Device::new(DeviceKind::Processor(Box::new(ConstProc {
                value: 0.25,
            }))))
            .unwrap();
        let b = table
            .add(Device::new(DeviceKind::Processor(Box::new(ConstProc {
                value: 0.5,
            }))))
            .unwrap();

        let edges_ab = [
            Connection {
                from: (a, 0),
                to: (MASTER_DEVICE_ID, 0),
            },
            Connection {
                from: (b, 0),
                to: (MASTER_DEVICE_ID, 0),
            },
        ];
        let edges_ba = [edges_ab[1], edges_ab[0]];

        for edges in [&edges_ab, &edges_ba] {
            let connections = Connections::build(edges, &table, MASTER_DEVICE_ID).unwrap();
            let plan = SignalPlan::build(&connections, &table).unwrap();
            let mix = run_mixed(&plan, &table, 16);
            assert!(mix.iter().all(|sample| (*sample - 0.75).abs() < 1e-6));
        }
    }

    #[test]
    fn cycle_is_rejected_at_build() {
        let mut table = DeviceTable::new(8);
        let a = table
            .add(Device::new(DeviceKind::Processor(Box::new(ThroughProc))))
            .unwrap();
        let b = table
            .add(Device::new(DeviceKind::Processor(Box::new(ThroughProc))))
            .unwrap();
        let edges = [
            Connection {
                from: (a, 0),
                to: (b, 0),
            },
            Connection {
                from: (b, 0),
                to: (a, 0),
            },
            Connection {
                from: (b, 0),
                to: (MASTER_DEVICE_ID, 0),
            },
        ];
        let connections = Connections::build(&edges, &table, MASTER_DEVICE_ID).unwrap();
        assert!(matches!(
            SignalPlan::build(&connections, &table),
            Err(Error::CyclicGraph(_))
        ));
    }

    #[test]
    fn non_existent_devices_are_skipped() {
        let mut table = DeviceTable::new(8);
        let a = table
            .add(Device::new(DeviceKind::Processor(Box::new(ConstProc {
                value: 0.25,
            }))))
            .unwrap();
        let through = table
            .add(Device::new(DeviceKind::Processor(Box::new(ThroughProc))))
            .unwrap();
        let edges = [
            Connection {
                from: (a, 0),
                to: (through, 0),
            },
            Connection {
                from: (through, 0),
                to: (MASTER_DEVICE_ID, 0),
            },
        ];

        let connections = Connections::build(&edges, &table, MASTER_DEVICE_ID).unwrap();
        let plan = SignalPlan::build(&connections, &table).unwrap();
        assert_eq!(plan.task_count(), 3);
        let mix = run_mixed(&plan, &table, 8);
        assert!(mix.iter().all(|sample| (*sample - 0.25).abs() < 1e-6));

        // soft delete the source: everything routed through it falls silent
        table.set_existent(a, false).unwrap();
        let plan = SignalPlan::build(&connections, &table).unwrap();
        assert_eq!(plan.task_count(), 2);
        let mix = run_mixed(&plan, &table, 8);
        assert!(mix.iter().all(|sample| *sample == 0.0));
    }

    #[test]
    fn unreachable_devices_are_not_planned() {
        let mut table = DeviceTable::new(8);
        let a = table
            .add(Device::new(DeviceKind::Processor(Box::new(ConstProc {
                value: 1.0,
            }))))
            .unwrap();
        let _unconnected = table
            .add(Device::new(DeviceKind::Processor(Box::new(ConstProc {
                value: 1.0,
            }))))
            .unwrap();
        let edges = [Connection {
            from: (a, 0),
            to: (MASTER_DEVICE_ID, 0),
        }];
        let connections = Connections::build(&edges, &table, MASTER_DEVICE_ID).unwrap();
        let plan = SignalPlan::build(&connections, &table).unwrap();
        // master + the one connected device
        assert_eq!(plan.task_count(), 2);
    }

    #[test]
    fn diamond_graph_renders_each_device_once() {
        // a feeds both b and c, which both feed the master: a must render once, and the
        // master receives its signal twice
        let mut table = DeviceTable::new(8);
        let a = table
            .add(Device::new(DeviceKind::Processor(Box::new(ConstProc {
                value: 0.25,
            }))))
            .unwrap();
        let b = table
            .add(Device::new(DeviceKind::Processor(Box::new(ThroughProc))))
            .unwrap();
        let c = table
            .add(Device::new(DeviceKind::Processor(Box::new(ThroughProc))))
            .unwrap();
        let edges = [
            Connection {
                from: (a, 0),
                to: (b, 0),
            },
            Connection {
                from: (a, 0),
                to: (c, 0),
            },
            Connection {
                from: (b, 0),
                to: (MASTER_DEVICE_ID, 0),
            },
            Connection {
                from: (c, 0),
                to: (MASTER_DEVICE_ID, 0),
            },
        ];
        let connections = Connections::build(&edges, &table, MASTER_DEVICE_ID).unwrap();
        let plan = SignalPlan::build(&connections, &table).unwrap();
        assert_eq!(plan.task_count(), 4);
        let mix = run_mixed(&plan, &table, 8);
        assert!(mix.iter().all(|sample| (*sample - 0.5).abs() < 1e-6));
    }
}
