//! Simulation engine
//!
//! [`Simulator`] owns the scheduler, the topology arena, the installed
//! applications and the trace registry, and drives the event dispatch loop.
//! Forwarding follows the switching discipline of each router: flits are
//! taken from input queues, routed on their head, and either put on a
//! channel, buffered, or handed up to the local application. Backpressure
//! (`ChannelBusy`, `QueueFull`) is absorbed by retrying on the next clock
//! edge; it never escapes the run loop.

use std::io::Write;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info, warn};

use crate::app::{Application, CtgConfig, SyncConfig};
use crate::config::NocConfig;
use crate::error::{NocError, NocResult};
use crate::packet::{Flit, FlitType, PacketUid, PacketUidAllocator, RoutingHeader};
use crate::routing::{request_route, RouteReply};
use crate::sim::{Action, Scheduler, Time};
use crate::stats::NetworkStats;
use crate::switching::{PortState, RouteTarget, Switching};
use crate::topology::{DeviceId, NodeId, Topology};
use crate::trace::{AsciiTraceWriter, TraceFilter, TraceOp, TraceRecord, TraceRegistry, TraceSink};

/// Split-borrow view of the simulator used by the forwarding path and the
/// applications; everything except the application slots themselves.
pub(crate) struct Core<'a> {
    pub config: &'a NocConfig,
    pub scheduler: &'a mut Scheduler,
    pub net: &'a mut Topology,
    pub trace: &'a mut TraceRegistry,
    pub stats: &'a mut NetworkStats,
    pub rng: &'a mut StdRng,
    pub uids: &'a mut PacketUidAllocator,
}

impl Core<'_> {
    pub(crate) fn now(&self) -> Time {
        self.scheduler.now()
    }

    /// Whether the warmup window of `warmup_cycles` clock ticks has passed
    pub(crate) fn past_warmup(&self, warmup_cycles: u64) -> bool {
        self.now().ps() >= warmup_cycles * self.config.global_clock
    }

    /// Inject a flit at its source node. Injected flits bypass the link
    /// input buffers: they leave through the router's injection port
    /// straight onto the chosen output. Transient congestion surfaces as
    /// `QueueFull` and the application retries next tick.
    pub(crate) fn inject(&mut self, node: NodeId, flit: Flit) -> NocResult<()> {
        let device = self.net.injection_device(node, &flit)?;
        if flit.is_head() {
            self.inject_head(node, device, flit)
        } else {
            self.inject_body(node, device, flit)
        }
    }

    fn inject_head(&mut self, node: NodeId, device: DeviceId, mut flit: Flit) -> NocResult<()> {
        if !self.net.node(node).router.injection_port.is_idle() {
            // the previous local packet has not released the port yet
            return Err(NocError::QueueFull(device.0));
        }
        let destination = match flit.header.as_ref() {
            Some(header) => self.header_destination(node, header),
            None => node,
        };
        let mut reply_slot: Option<RouteReply> = None;
        request_route(self.net, device, destination, &mut flit, |reply| {
            reply_slot = Some(reply)
        });
        let target = reply_slot.filter(|r| r.found).and_then(|r| r.target);
        let Some(target) = target else {
            warn!(node = %node, uid = %flit.uid, "no route at injection; dropping flit");
            self.drop_flit(device, flit);
            return Ok(());
        };
        let uid = flit.uid;
        let data_flits = flit.header.as_ref().map_or(0, |h| h.data_flit_count);

        match target {
            RouteTarget::Local => {
                // applications filter self-traffic, but stay graceful
                self.trace_event(TraceOp::Enqueue, device, &flit);
                let delay = self.config.hop_time(true);
                self.scheduler
                    .schedule(delay, Action::EjectFlit { device, flit });
                let port = &mut self.net.node_mut(node).router.injection_port;
                port.reserve(RouteTarget::Local, uid);
                port.record_forward(FlitType::Head, data_flits);
                Ok(())
            }
            RouteTarget::Device(out) => {
                self.transmit_injected(node, device, out, flit)?;
                let port = &mut self.net.node_mut(node).router.injection_port;
                port.reserve(RouteTarget::Device(out), uid);
                port.record_forward(FlitType::Head, data_flits);
                Ok(())
            }
        }
    }

    fn inject_body(&mut self, node: NodeId, device: DeviceId, flit: Flit) -> NocResult<()> {
        let Some((target, uid)) = self.net.node(node).router.injection_port.target() else {
            warn!(node = %node, uid = %flit.uid, "body flit injected without a head; dropping");
            self.drop_flit(device, flit);
            return Ok(());
        };
        if uid != flit.uid {
            warn!(node = %node, uid = %flit.uid, "body flit does not match the injected head; dropping");
            self.drop_flit(device, flit);
            return Ok(());
        }
        let kind = flit.kind;
        match target {
            RouteTarget::Local => {
                self.trace_event(TraceOp::Enqueue, device, &flit);
                if flit.is_tail() {
                    self.trace_event(TraceOp::PacketInjected, device, &flit);
                }
                let delay = self.config.hop_time(false);
                self.scheduler
                    .schedule(delay, Action::EjectFlit { device, flit });
                self.net
                    .node_mut(node)
                    .router
                    .injection_port
                    .record_forward(kind, 0);
                Ok(())
            }
            RouteTarget::Device(out) => {
                self.transmit_injected(node, device, out, flit)?;
                self.net
                    .node_mut(node)
                    .router
                    .injection_port
                    .record_forward(kind, 0);
                Ok(())
            }
        }
    }

    /// Put an injected flit on the wire through `out`, or fail with
    /// `QueueFull` for the application to retry next tick.
    fn transmit_injected(
        &mut self,
        node: NodeId,
        device: DeviceId,
        out: DeviceId,
        flit: Flit,
    ) -> NocResult<()> {
        if !self.output_claimable(out, flit.uid) {
            return Err(NocError::QueueFull(device.0));
        }
        let Some(channel_id) = self.net.device(out).channel else {
            return Err(NocError::QueueFull(device.0));
        };
        let Some(peer) = self.net.channel(channel_id).peer_of(out) else {
            return Err(NocError::ConfigInvalid(format!(
                "channel {channel_id} is not sealed"
            )));
        };
        if !self.net.device(peer).in_queue.has_room() {
            return Err(NocError::QueueFull(device.0));
        }
        let now = self.now();
        let slot = self.net.channel(channel_id).slot_of(out).unwrap_or(0);
        let speedup = if flit.is_head() {
            1
        } else {
            self.config.data_packet_speedup
        };
        let duration = self
            .net
            .channel(channel_id)
            .transfer_time_ps(flit.size_bits(), speedup);
        let arrival = match self
            .net
            .channel_mut(channel_id)
            .try_transmit(slot, now, duration)
        {
            Err(NocError::ChannelBusy(_)) => return Err(NocError::QueueFull(device.0)),
            Err(other) => return Err(other),
            Ok(arrival) => arrival,
        };
        self.net.device_mut(peer).in_queue.reserve_slot();
        self.claim_output(out, &flit);
        self.trace_event(TraceOp::Enqueue, device, &flit);
        self.trace_event(TraceOp::Dequeue, device, &flit);
        self.trace_event(TraceOp::Transmit, out, &flit);
        if flit.is_tail() {
            // the whole packet has now left the source application
            self.trace_event(TraceOp::PacketInjected, device, &flit);
        }
        self.scheduler
            .schedule_at(arrival, Action::DeliverFlit { to: peer, flit });
        self.net.node_mut(node).router.register_flit();
        Ok(())
    }

    /// Whether `out` is free for `uid`'s stream (unreserved or already held
    /// by the same packet)
    fn output_claimable(&self, out: DeviceId, uid: PacketUid) -> bool {
        self.net
            .device(out)
            .out_reserved
            .map_or(true, |holder| holder == uid)
    }

    /// Track the output reservation across a forwarded flit: heads take the
    /// output, tails hand it back
    fn claim_output(&mut self, out: DeviceId, flit: &Flit) {
        let dev = self.net.device_mut(out);
        if flit.is_tail() {
            dev.out_reserved = None;
        } else {
            dev.out_reserved = Some(flit.uid);
        }
    }

    /// Emit a trace record for `op` at `device`
    pub(crate) fn trace_event(&mut self, op: TraceOp, device: DeviceId, flit: &Flit) {
        if self.trace.is_empty() {
            return;
        }
        let dev = self.net.device(device);
        let record = TraceRecord {
            op,
            time: self.scheduler.now(),
            node: dev.node,
            device,
            if_index: dev.if_index,
            flit: flit.clone(),
        };
        self.trace.emit(&record);
    }

    /// A channel delivery landed at `to`
    pub(crate) fn on_deliver(&mut self, to: DeviceId, flit: Flit) -> NocResult<()> {
        self.trace_event(TraceOp::Enqueue, to, &flit);
        self.net.device_mut(to).in_queue.push_reserved(flit);
        self.process_port(to)
    }

    /// Work the input port of `device` until it can make no more progress
    pub(crate) fn process_port(&mut self, device: DeviceId) -> NocResult<()> {
        loop {
            let Some(front) = self.net.device(device).in_queue.front() else {
                return Ok(());
            };
            let front_kind = front.kind;
            let front_uid = front.uid;
            let state = self.net.device(device).port;

            match state {
                PortState::Idle => {
                    if front_kind != FlitType::Head {
                        // a body flit with no reservation has lost its head
                        let Some(flit) = self.net.device_mut(device).in_queue.pop() else {
                            return Ok(());
                        };
                        warn!(uid = %flit.uid, %device, "body flit without reservation dropped");
                        self.drop_flit(device, flit);
                        continue;
                    }
                    // routing moves the port to Reserved, Buffering or (on a
                    // routing failure) consumes the flit; the next loop turn
                    // acts on the new state
                    self.route_head(device)?;
                    continue;
                }
                PortState::Reserved { head, .. }
                | PortState::Forwarding { head, .. }
                | PortState::Draining { head, .. } => {
                    if front_uid != head {
                        // next packet waits for the current one to release
                        return Ok(());
                    }
                    if !self.try_forward_front(device)? {
                        return Ok(());
                    }
                }
                PortState::Buffering { .. } => {
                    if !self.net.device(device).in_queue.holds_tail() {
                        return Ok(());
                    }
                    self.net.device_mut(device).port.drain();
                    if !self.try_forward_front(device)? {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Route the head flit at the front of `device`, leaving the port
    /// Reserved or Buffering; a routing failure consumes the flit.
    fn route_head(&mut self, device: DeviceId) -> NocResult<()> {
        let node = self.net.device(device).node;
        let switching = self.net.node(node).router.switching;
        let Some(mut flit) = self.net.device_mut(device).in_queue.pop() else {
            return Ok(());
        };
        let destination = match flit.header.as_ref() {
            Some(header) => self.header_destination(node, header),
            None => node,
        };

        let mut reply_slot: Option<RouteReply> = None;
        request_route(self.net, device, destination, &mut flit, |reply| {
            reply_slot = Some(reply)
        });
        let target = reply_slot.filter(|r| r.found).and_then(|r| r.target);

        let Some(target) = target else {
            warn!(node = %node, uid = %flit.uid, "no route; dropping flit");
            self.drop_flit(device, flit);
            return Ok(());
        };

        let uid = flit.uid;
        self.net.device_mut(device).in_queue.push_front(flit);

        match target {
            RouteTarget::Local => {
                self.net.device_mut(device).port.reserve(RouteTarget::Local, uid);
            }
            RouteTarget::Device(out) => {
                let output_free = self.output_free(out);
                if switching.buffers_whole_packet(output_free) {
                    self.net.device_mut(device).port.buffer(RouteTarget::Device(out), uid);
                    if self.net.device(device).in_queue.holds_tail() {
                        self.net.device_mut(device).port.drain();
                    }
                } else {
                    self.net
                        .device_mut(device)
                        .port
                        .reserve(RouteTarget::Device(out), uid);
                }
            }
        }
        Ok(())
    }

    /// Whether a head could leave through `out` right now: channel idle and
    /// a free slot on the far side
    fn output_free(&self, out: DeviceId) -> bool {
        let Some(channel_id) = self.net.device(out).channel else {
            return false;
        };
        let channel = self.net.channel(channel_id);
        let Some(slot) = channel.slot_of(out) else {
            return false;
        };
        let Some(peer) = channel.peer_of(out) else {
            return false;
        };
        self.net.device(out).out_reserved.is_none()
            && channel.is_idle(slot, self.now())
            && self.net.device(peer).in_queue.has_room()
    }

    /// Try to move the front flit of `device` along the port's target.
    /// Returns false when the flit has to wait (a retry is scheduled).
    fn try_forward_front(&mut self, device: DeviceId) -> NocResult<bool> {
        let now = self.now();
        let Some((target, _)) = self.net.device(device).port.target() else {
            return Ok(false);
        };
        let Some(front) = self.net.device(device).in_queue.front() else {
            return Ok(false);
        };
        let kind = front.kind;
        let front_uid = front.uid;
        let is_head = front.is_head();
        let data_flits = front.header.as_ref().map_or(0, |h| h.data_flit_count);
        let size_bits = front.size_bits();
        let node = self.net.device(device).node;

        match target {
            RouteTarget::Local => {
                let Some(flit) = self.net.device_mut(device).in_queue.pop() else {
                    return Ok(false);
                };
                self.trace_event(TraceOp::Dequeue, device, &flit);
                let delay = self.config.hop_time(is_head);
                self.scheduler
                    .schedule(delay, Action::EjectFlit { device, flit });
                self.net.device_mut(device).port.record_forward(kind, data_flits);
                Ok(true)
            }
            RouteTarget::Device(out) => {
                let Some(channel_id) = self.net.device(out).channel else {
                    let Some(flit) = self.net.device_mut(device).in_queue.pop() else {
                        return Ok(false);
                    };
                    warn!(%out, "output device has no channel; dropping flit");
                    self.net.device_mut(device).port.record_forward(kind, data_flits);
                    self.drop_flit(device, flit);
                    return Ok(true);
                };
                let Some(peer) = self.net.channel(channel_id).peer_of(out) else {
                    return Err(NocError::ConfigInvalid(format!(
                        "channel {channel_id} is not sealed"
                    )));
                };
                // another stream holds the output, or the far buffer is full
                if !self.output_claimable(out, front_uid) {
                    self.schedule_retry(device);
                    return Ok(false);
                }
                if !self.net.device(peer).in_queue.has_room() {
                    self.schedule_retry(device);
                    return Ok(false);
                }
                let slot = self.net.channel(channel_id).slot_of(out).unwrap_or(0);
                let speedup = if is_head {
                    1
                } else {
                    self.config.data_packet_speedup
                };
                let duration = self
                    .net
                    .channel(channel_id)
                    .transfer_time_ps(size_bits, speedup);
                match self
                    .net
                    .channel_mut(channel_id)
                    .try_transmit(slot, now, duration)
                {
                    Err(NocError::ChannelBusy(_)) => {
                        self.schedule_retry(device);
                        Ok(false)
                    }
                    Err(other) => Err(other),
                    Ok(arrival) => {
                        let Some(flit) = self.net.device_mut(device).in_queue.pop() else {
                            return Ok(false);
                        };
                        self.net.device_mut(peer).in_queue.reserve_slot();
                        self.claim_output(out, &flit);
                        self.trace_event(TraceOp::Dequeue, device, &flit);
                        self.trace_event(TraceOp::Transmit, out, &flit);
                        debug!(
                            from = %device, via = %out, %arrival, uid = %flit.uid,
                            "flit on the wire"
                        );
                        self.scheduler
                            .schedule_at(arrival, Action::DeliverFlit { to: peer, flit });
                        self.net.device_mut(device).port.record_forward(kind, data_flits);
                        self.net.node_mut(node).router.register_flit();
                        Ok(true)
                    }
                }
            }
        }
    }

    fn schedule_retry(&mut self, device: DeviceId) {
        let at = self.now().next_tick(self.config.global_clock);
        self.scheduler
            .schedule_at(at, Action::RetryForward { device });
    }

    fn drop_flit(&mut self, device: DeviceId, flit: Flit) {
        self.trace_event(TraceOp::Drop, device, &flit);
        self.stats.record_dropped();
    }

    /// The destination tile a header's remaining offsets point at
    fn header_destination(&self, node: NodeId, header: &RoutingHeader) -> NodeId {
        let (x, y) = self.net.coords(node);
        let h = self.net.h_size() as i32;
        let v = self.net.v_size() as i32;
        let dx = i32::from(header.x_magnitude()) * if header.x_is_west() { -1 } else { 1 };
        let dy = i32::from(header.y_magnitude()) * if header.y_is_north() { -1 } else { 1 };
        let dest_x = (i32::from(x) + dx).rem_euclid(h);
        let dest_y = (i32::from(y) + dy).rem_euclid(v);
        self.net.node_at(dest_x as u8, dest_y as u8)
    }
}

/// The simulator: scheduler, topology, applications and traces
pub struct Simulator {
    config: NocConfig,
    scheduler: Scheduler,
    net: Topology,
    apps: Vec<Option<Application>>,
    trace: TraceRegistry,
    stats: NetworkStats,
    rng: StdRng,
    uids: PacketUidAllocator,
}

impl Simulator {
    /// Build a simulator over an installed topology
    pub fn new(config: NocConfig, net: Topology) -> NocResult<Self> {
        config.validate()?;
        let mut scheduler = Scheduler::new();
        let has_load = net
            .node_ids()
            .any(|id| net.node(id).router.load.is_some());
        if has_load {
            scheduler.schedule(config.global_clock, Action::PublishLoads);
        }
        let stats = NetworkStats::new(net.node_count());
        let apps = (0..net.node_count()).map(|_| None).collect();
        let rng = StdRng::seed_from_u64(config.seed);
        Ok(Self {
            config,
            scheduler,
            net,
            apps,
            trace: TraceRegistry::new(),
            stats,
            rng,
            uids: PacketUidAllocator::default(),
        })
    }

    /// Current simulated time
    pub fn now(&self) -> Time {
        self.scheduler.now()
    }

    /// The configuration bundle
    pub fn config(&self) -> &NocConfig {
        &self.config
    }

    /// The installed topology
    pub fn topology(&self) -> &Topology {
        &self.net
    }

    /// Mutable access to the topology (load seeding, test setup)
    pub fn topology_mut(&mut self) -> &mut Topology {
        &mut self.net
    }

    /// Accumulated run statistics
    pub fn stats(&self) -> &NetworkStats {
        &self.stats
    }

    /// Flits currently buffered in input queues or in flight on channels
    pub fn in_flight_flits(&self) -> u64 {
        let queued: u64 = self
            .net
            .device_ids()
            .map(|id| self.net.device(id).in_queue.len() as u64)
            .sum();
        let in_air = self
            .scheduler
            .pending_actions()
            .filter(|action| {
                matches!(
                    action,
                    Action::DeliverFlit { .. } | Action::EjectFlit { .. }
                )
            })
            .count() as u64;
        queued + in_air
    }

    /// Install the stochastic injection application on `node` and schedule
    /// its start
    pub fn install_sync_app(&mut self, node: NodeId, config: SyncConfig) -> NocResult<()> {
        self.check_node(node)?;
        config.validate(node, &self.net, &self.config)?;
        self.check_buffer_depth(config.number_of_flits)?;
        self.apps[node.0 as usize] = Some(Application::sync(node, config));
        self.scheduler.schedule(0, Action::StartApp { node });
        Ok(())
    }

    /// Install the task-graph application on `node` and schedule its start
    pub fn install_ctg_app(&mut self, node: NodeId, config: CtgConfig) -> NocResult<()> {
        self.check_node(node)?;
        config.validate(node, &self.net, &self.config)?;
        self.check_buffer_depth(config.number_of_flits)?;
        self.apps[node.0 as usize] = Some(Application::ctg(node, config));
        self.scheduler.schedule(0, Action::StartApp { node });
        Ok(())
    }

    /// Stop the application on `node`, cancelling its pending events
    pub fn stop_app(&mut self, node: NodeId) -> NocResult<()> {
        self.check_node(node)?;
        if let Some(mut app) = self.apps[node.0 as usize].take() {
            let mut core = self.core();
            app.stop(&mut core);
            self.apps[node.0 as usize] = Some(app);
        }
        Ok(())
    }

    /// Subscribe a trace sink
    pub fn subscribe_trace(&mut self, filter: TraceFilter, sink: Box<dyn TraceSink>) {
        self.trace.subscribe(filter, sink);
    }

    /// Write the classic ASCII trace of every event to `stream`
    pub fn enable_ascii_trace<W: Write + 'static>(&mut self, stream: W) {
        self.trace
            .subscribe(TraceFilter::all(), Box::new(AsciiTraceWriter::new(stream)));
    }

    /// Run until the event queue drains
    pub fn run(&mut self) -> NocResult<()> {
        while let Some(event) = self.scheduler.pop() {
            self.dispatch(event.action)?;
        }
        info!(
            injected = self.stats.injected_flits,
            received = self.stats.received_flits,
            dropped = self.stats.dropped_flits,
            now = %self.now(),
            "run complete"
        );
        Ok(())
    }

    /// Run until the event queue drains or simulated time would pass `stop`
    pub fn run_until(&mut self, stop: Time) -> NocResult<()> {
        while let Some(at) = self.scheduler.peek_time() {
            if at > stop {
                break;
            }
            let Some(event) = self.scheduler.pop() else {
                break;
            };
            self.dispatch(event.action)?;
        }
        Ok(())
    }

    fn dispatch(&mut self, action: Action) -> NocResult<()> {
        match action {
            Action::StartApp { node } => self.with_app(node, |app, core| app.start(core)),
            Action::StopApp { node } => self.with_app(node, |app, core| {
                app.stop(core);
                Ok(())
            }),
            Action::SendFlit { node, iteration } => {
                self.with_app(node, |app, core| app.on_send(iteration, core))
            }
            Action::DeliverFlit { to, flit } => {
                let mut core = self.core();
                core.on_deliver(to, flit)
            }
            Action::EjectFlit { device, flit } => {
                let node = self.net.device(device).node;
                {
                    let mut core = self.core();
                    core.trace_event(TraceOp::Receive, device, &flit);
                }
                if self.apps[node.0 as usize].is_some() {
                    self.with_app(node, |app, core| app.on_flit_delivered(&flit, core))
                } else {
                    self.stats.record_received(node);
                    Ok(())
                }
            }
            Action::RetryForward { device } => {
                let mut core = self.core();
                core.process_port(device)
            }
            Action::PublishLoads => {
                self.net.publish_loads();
                if self.scheduler.pending() > 0 {
                    self.scheduler
                        .schedule(self.config.global_clock, Action::PublishLoads);
                }
                Ok(())
            }
        }
    }

    fn with_app<F>(&mut self, node: NodeId, f: F) -> NocResult<()>
    where
        F: FnOnce(&mut Application, &mut Core) -> NocResult<()>,
    {
        let Some(mut app) = self.apps[node.0 as usize].take() else {
            return Ok(());
        };
        let result = {
            let mut core = self.core();
            f(&mut app, &mut core)
        };
        self.apps[node.0 as usize] = Some(app);
        result
    }

    fn core(&mut self) -> Core<'_> {
        Core {
            config: &self.config,
            scheduler: &mut self.scheduler,
            net: &mut self.net,
            trace: &mut self.trace,
            stats: &mut self.stats,
            rng: &mut self.rng,
            uids: &mut self.uids,
        }
    }

    fn check_node(&self, node: NodeId) -> NocResult<()> {
        if node.0 >= self.net.node_count() {
            return Err(NocError::ConfigInvalid(format!(
                "node {node} does not exist in a {}-node topology",
                self.net.node_count()
            )));
        }
        Ok(())
    }

    /// SAF and VCT must be able to hold a whole packet in an input buffer
    fn check_buffer_depth(&self, number_of_flits: u16) -> NocResult<()> {
        let needs_packet_buffer = self
            .net
            .node_ids()
            .any(|id| self.net.node(id).router.switching != Switching::Wormhole);
        if !needs_packet_buffer {
            return Ok(());
        }
        let depth = self
            .net
            .device_ids()
            .next()
            .map(|id| self.net.device(id).in_queue.capacity())
            .unwrap_or(0);
        if depth < usize::from(number_of_flits) {
            return Err(NocError::ConfigInvalid(format!(
                "store-and-forward buffering needs input queues of at least {number_of_flits} flits, got {depth}"
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for Simulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulator")
            .field("now", &self.now())
            .field("pending_events", &self.scheduler.pending())
            .finish()
    }
}
