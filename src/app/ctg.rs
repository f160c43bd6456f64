//! Communication-task-graph application
//!
//! Tasks are mapped onto nodes; directed edges carry a bit volume from a
//! sender task to a receiver task. A node may not inject for an iteration
//! before its inbound barrier is complete (it has received every bit the
//! graph promises it), and iteration `i` is never released before
//! `i * period`. The modelled execution time of the node's tasks delays only
//! the very first injection.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::NocConfig;
use crate::engine::Core;
use crate::error::{NocError, NocResult};
use crate::packet::{Flit, PacketUid, RoutingHeader};
use crate::sim::{Action, EventId, Time};
use crate::topology::{NodeId, Topology};

/// A task mapped onto this node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskData {
    /// Task identifier within the graph
    pub id: String,
    /// Modelled execution time, in picoseconds
    pub exec_time_ps: u64,
}

/// A data-dependency edge of the task graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependentTaskData {
    /// Task producing the data
    pub sender_task: String,
    /// Node the sender task is mapped onto
    pub sender_node: u32,
    /// Bits carried by the edge per iteration
    pub bits: u64,
    /// Task consuming the data
    pub receiving_task: String,
    /// Node the receiving task is mapped onto
    pub receiving_node: u32,
}

/// Configuration of a task-graph traffic source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CtgConfig {
    /// Tasks mapped onto this node
    pub tasks: Vec<TaskData>,
    /// Inbound edges (this node receives)
    pub task_senders: Vec<DependentTaskData>,
    /// Outbound edges (this node sends), in injection order
    pub task_destinations: Vec<DependentTaskData>,
    /// Iteration period of the graph, in picoseconds
    pub period_ps: u64,
    /// How many times the graph is iterated
    pub iterations: u64,
    /// Maximum flits per packet, tail included
    pub number_of_flits: u16,
    /// Stop after this many injected flits per iteration (0 = unlimited)
    pub max_flits: u64,
    /// Stop after this many injected payload bytes per iteration (0 = unlimited)
    pub max_bytes: u64,
    /// Clock ticks during which no statistics are collected
    pub warmup_cycles: u64,
}

impl Default for CtgConfig {
    fn default() -> Self {
        Self {
            tasks: Vec::new(),
            task_senders: Vec::new(),
            task_destinations: Vec::new(),
            period_ps: 0,
            iterations: 1,
            number_of_flits: 3,
            max_flits: 0,
            max_bytes: 0,
            warmup_cycles: 0,
        }
    }
}

impl CtgConfig {
    /// Check the configuration against the node and topology it is being
    /// installed on
    pub fn validate(&self, _node: NodeId, net: &Topology, _cfg: &NocConfig) -> NocResult<()> {
        if self.iterations == 0 {
            return Err(NocError::ConfigInvalid(
                "the task graph must be iterated at least once".into(),
            ));
        }
        if self.number_of_flits < 2 || self.number_of_flits > 256 {
            return Err(NocError::ConfigInvalid(format!(
                "a packet needs between 2 and 256 flits, got {}",
                self.number_of_flits
            )));
        }
        for edge in &self.task_destinations {
            if edge.receiving_node >= net.node_count() {
                return Err(NocError::ConfigInvalid(format!(
                    "edge {} -> {} targets node {} outside the topology",
                    edge.sender_task, edge.receiving_task, edge.receiving_node
                )));
            }
            if !self.tasks.iter().any(|t| t.id == edge.sender_task) {
                warn!(
                    sender = %edge.sender_task, receiver = %edge.receiving_task,
                    "outbound edge names a sender task that is not mapped here"
                );
            }
        }
        Ok(())
    }

    fn contains_task(&self, id: &str) -> bool {
        self.tasks.iter().any(|t| t.id == id)
    }
}

/// Per-iteration injection bookkeeping
#[derive(Debug, Default, Clone)]
struct IterationState {
    received_bits: u64,
    current_flit_index: u16,
    current_uid: Option<PacketUid>,
    destination_index: usize,
    task_bytes: u64,
    total_flits: u64,
    total_bytes: u64,
    start_event: Option<EventId>,
    send_event: Option<EventId>,
}

/// Task-graph driven traffic source with receive-before-send barriers
#[derive(Debug)]
pub struct CtgApplication {
    node: NodeId,
    config: CtgConfig,
    running: bool,
    injection_started: bool,
    /// Oldest iteration whose inbound barrier is still open; arrivals are
    /// credited here, and barriers complete strictly in order
    first_running_iteration: u64,
    total_exec_time_ps: u64,
    total_data_bits: u64,
    iterations: Vec<IterationState>,
}

impl CtgApplication {
    pub(crate) fn new(node: NodeId, config: CtgConfig) -> Self {
        let total_exec_time_ps = config.tasks.iter().map(|t| t.exec_time_ps).sum();
        // only edges whose receiving task is mapped here count towards the
        // inbound barrier
        let total_data_bits = config
            .task_senders
            .iter()
            .filter(|edge| {
                let known = config.contains_task(&edge.receiving_task);
                if !known {
                    warn!(
                        sender = %edge.sender_task, receiver = %edge.receiving_task,
                        "inbound edge names a receiving task that is not mapped here"
                    );
                }
                known
            })
            .map(|edge| edge.bits)
            .sum();
        Self {
            node,
            config,
            running: false,
            injection_started: false,
            first_running_iteration: 0,
            total_exec_time_ps,
            total_data_bits,
            iterations: Vec::new(),
        }
    }

    pub(crate) fn start(&mut self, core: &mut Core) -> NocResult<()> {
        self.running = true;
        self.iterations = vec![IterationState::default(); self.config.iterations as usize];
        info!(
            node = %self.node,
            iterations = self.config.iterations,
            period = self.config.period_ps,
            expected_bits = self.total_data_bits,
            "task graph application started"
        );
        if self.total_data_bits == 0 {
            // no inbound dependencies: every iteration is released by its
            // period alone
            for iteration in 0..self.config.iterations {
                self.schedule_iteration_start(iteration, core);
            }
        }
        Ok(())
    }

    pub(crate) fn stop(&mut self, core: &mut Core) {
        self.running = false;
        for state in &mut self.iterations {
            if let Some(id) = state.start_event.take() {
                core.scheduler.cancel(id);
            }
            if let Some(id) = state.send_event.take() {
                core.scheduler.cancel(id);
            }
        }
    }

    /// Barrier accounting on every delivered flit
    pub(crate) fn on_flit_delivered(&mut self, flit: &Flit, core: &mut Core) -> NocResult<()> {
        if core.past_warmup(self.config.warmup_cycles) {
            core.stats.record_received(self.node);
        }
        if self.total_data_bits == 0 {
            return Ok(());
        }
        if self.first_running_iteration >= self.config.iterations {
            return Err(NocError::DependencyViolation(format!(
                "node {} received data after its final iteration's barrier completed",
                self.node
            )));
        }
        let index = self.first_running_iteration as usize;
        let state = &mut self.iterations[index];
        state.received_bits += u64::from(flit.payload_bytes) * 8;
        debug!(
            node = %self.node,
            iteration = self.first_running_iteration,
            received = state.received_bits,
            expected = self.total_data_bits,
            "barrier progress"
        );
        if state.received_bits >= self.total_data_bits {
            // flit quantisation may overshoot the declared volume
            state.received_bits = self.total_data_bits;
            let iteration = self.first_running_iteration;
            self.first_running_iteration += 1;
            info!(node = %self.node, iteration, "barrier complete");
            self.schedule_iteration_start(iteration, core);
        }
        Ok(())
    }

    /// Release an iteration: not before the clock edge after the (first-time)
    /// execution delay, and never before `iteration * period`
    fn schedule_iteration_start(&mut self, iteration: u64, core: &mut Core) {
        if self.config.task_destinations.is_empty() {
            debug!(node = %self.node, "no outbound edges; nothing to inject");
            return;
        }
        let clock = core.config.global_clock;
        let exec_delay = if self.injection_started {
            0
        } else {
            self.total_exec_time_ps
        };
        self.injection_started = true;
        let earliest = core.now().after(exec_delay).next_tick(clock);
        let release = Time(iteration * self.config.period_ps).align_up(clock);
        let at = earliest.max(release);
        let id = core.scheduler.schedule_at(
            at,
            Action::SendFlit {
                node: self.node,
                iteration,
            },
        );
        self.iterations[iteration as usize].start_event = Some(id);
    }

    pub(crate) fn on_send(&mut self, iteration: u64, core: &mut Core) -> NocResult<()> {
        if !self.running || iteration >= self.config.iterations {
            return Ok(());
        }
        let index = iteration as usize;
        self.iterations[index].start_event = None;
        self.iterations[index].send_event = None;

        let destination_index = self.iterations[index].destination_index;
        if destination_index >= self.config.task_destinations.len() {
            return Ok(());
        }
        if self.limits_reached(index) {
            debug!(node = %self.node, iteration, "iteration exhausted its budget");
            self.stop(core);
            return Ok(());
        }

        let edge = self.config.task_destinations[destination_index].clone();
        let destination = NodeId(edge.receiving_node);
        if destination == self.node {
            // a self-edge costs no network traffic
            self.iterations[index].destination_index += 1;
            if self.iterations[index].destination_index < self.config.task_destinations.len() {
                let now = core.now();
                self.schedule_send(iteration, core, now);
            }
            return Ok(());
        }

        let flit_bytes = u64::from(core.config.flit_size_bytes());
        let header_bytes = u64::from(RoutingHeader::SIZE_BYTES);
        let edge_bytes = edge.bits.div_ceil(8);
        // flits needed for the edge, accounting for the smaller head payload
        let mut upper = edge_bytes.div_ceil(flit_bytes).max(1);
        if (upper - 1) * flit_bytes + (flit_bytes - header_bytes) < edge_bytes {
            upper += 1;
        }
        let packet_len = u64::from(self.config.number_of_flits).min(upper).max(2) as u16;

        if self.iterations[index].current_flit_index == 0 {
            self.send_head(iteration, core, &edge, destination, packet_len)?;
        } else {
            self.send_body(iteration, core, &edge, packet_len)?;
        }
        Ok(())
    }

    fn send_head(
        &mut self,
        iteration: u64,
        core: &mut Core,
        edge: &DependentTaskData,
        destination: NodeId,
        packet_len: u16,
    ) -> NocResult<()> {
        let (dx, dy) = core.net.relative_offsets(self.node, destination);
        let (sx, sy) = core.net.coords(self.node);
        let header = RoutingHeader::new(sx, sy, dx, dy, (packet_len - 1) as u8)?;
        let payload = core.config.flit_size_bytes() - RoutingHeader::SIZE_BYTES;
        let uid = core.uids.allocate();
        let flit = Flit::head(uid, header, payload);

        match core.inject(self.node, flit) {
            Err(NocError::QueueFull(_)) => {
                let at = core.now().next_tick(core.config.global_clock);
                self.schedule_send(iteration, core, at);
                Ok(())
            }
            Err(other) => Err(other),
            Ok(()) => {
                if core.past_warmup(self.config.warmup_cycles) {
                    core.stats.record_injected(self.node, true);
                }
                let index = iteration as usize;
                let state = &mut self.iterations[index];
                state.current_uid = Some(uid);
                state.current_flit_index = 1;
                state.total_flits += 1;
                state.total_bytes += u64::from(payload);
                state.task_bytes += u64::from(payload);
                self.after_emission(iteration, core, edge);
                Ok(())
            }
        }
    }

    fn send_body(
        &mut self,
        iteration: u64,
        core: &mut Core,
        edge: &DependentTaskData,
        packet_len: u16,
    ) -> NocResult<()> {
        let index = iteration as usize;
        let Some(uid) = self.iterations[index].current_uid else {
            self.iterations[index].current_flit_index = 0;
            return Ok(());
        };
        let flit_bytes = u64::from(core.config.flit_size_bytes());
        let state = &self.iterations[index];
        // the last packet towards a destination may run short
        let is_tail = state.current_flit_index + 1 == packet_len
            || (state.task_bytes + flit_bytes) * 8 >= edge.bits;
        let payload = core.config.flit_size_bytes();
        let flit = if is_tail {
            Flit::tail(uid, payload)
        } else {
            Flit::data(uid, payload)
        };

        match core.inject(self.node, flit) {
            Err(NocError::QueueFull(_)) => {
                let at = core.now().next_tick(core.config.global_clock);
                self.schedule_send(iteration, core, at);
                Ok(())
            }
            Err(other) => Err(other),
            Ok(()) => {
                if core.past_warmup(self.config.warmup_cycles) {
                    core.stats.record_injected(self.node, false);
                }
                let state = &mut self.iterations[index];
                state.current_flit_index += 1;
                if state.current_flit_index == packet_len {
                    state.current_flit_index = 0;
                }
                state.total_flits += 1;
                state.total_bytes += u64::from(payload);
                state.task_bytes += u64::from(payload);
                self.after_emission(iteration, core, edge);
                Ok(())
            }
        }
    }

    /// Advance the destination cursor when the edge's volume is covered and
    /// keep the injection train running
    fn after_emission(&mut self, iteration: u64, core: &mut Core, edge: &DependentTaskData) {
        let index = iteration as usize;
        let state = &mut self.iterations[index];
        if state.task_bytes * 8 >= edge.bits {
            state.current_flit_index = 0;
            state.current_uid = None;
            state.task_bytes = 0;
            state.destination_index += 1;
        }
        if self.iterations[index].destination_index < self.config.task_destinations.len() {
            let at = core.now().next_tick(core.config.global_clock);
            self.schedule_send(iteration, core, at);
        }
    }

    fn limits_reached(&self, index: usize) -> bool {
        let state = &self.iterations[index];
        (self.config.max_flits > 0 && state.total_flits >= self.config.max_flits)
            || (self.config.max_bytes > 0 && state.total_bytes >= self.config.max_bytes)
    }

    fn schedule_send(&mut self, iteration: u64, core: &mut Core, at: Time) {
        let id = core.scheduler.schedule_at(
            at,
            Action::SendFlit {
                node: self.node,
                iteration,
            },
        );
        self.iterations[iteration as usize].send_event = Some(id);
    }
}
