//! Trace hooks
//!
//! Traces are observer lists: sinks subscribe at setup time with a filter on
//! (node, device, event kind) and receive every matching record. String
//! paths only exist in the ASCII writer, which renders the classic
//! `<op> <time> /NodeList/<id>/DeviceList/<idx>/<EventName> <summary>`
//! line format.

use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

use crate::packet::Flit;
use crate::sim::Time;
use crate::topology::{DeviceId, NodeId};

/// Trace event kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceOp {
    /// A flit was transmitted onto a channel (`t`)
    Transmit,
    /// A flit reached its destination and was handed up (`r`)
    Receive,
    /// A flit entered an input queue (`+`)
    Enqueue,
    /// A flit left an input queue (`-`)
    Dequeue,
    /// A flit was dropped (`d`)
    Drop,
    /// The last flit of a packet left its source application (`p`);
    /// the packet-level companion of the per-flit events
    PacketInjected,
}

impl TraceOp {
    /// One-character prefix of the ASCII line
    pub fn symbol(self) -> char {
        match self {
            TraceOp::Transmit => 't',
            TraceOp::Receive => 'r',
            TraceOp::Enqueue => '+',
            TraceOp::Dequeue => '-',
            TraceOp::Drop => 'd',
            TraceOp::PacketInjected => 'p',
        }
    }

    /// Event name used as the last path component
    pub fn event_name(self) -> &'static str {
        match self {
            TraceOp::Transmit => "Send",
            TraceOp::Receive => "Receive",
            TraceOp::Enqueue => "Enqueue",
            TraceOp::Dequeue => "Dequeue",
            TraceOp::Drop => "Drop",
            TraceOp::PacketInjected => "PacketInjected",
        }
    }
}

/// One traced event
#[derive(Debug, Clone)]
pub struct TraceRecord {
    /// What happened
    pub op: TraceOp,
    /// When it happened
    pub time: Time,
    /// Node the device belongs to
    pub node: NodeId,
    /// Device the event occurred at
    pub device: DeviceId,
    /// Device position within the node's device list
    pub if_index: u32,
    /// The flit involved
    pub flit: Flit,
}

impl TraceRecord {
    /// Topological locator of the event source
    pub fn path(&self) -> String {
        format!(
            "/NodeList/{}/DeviceList/{}/{}",
            self.node,
            self.if_index,
            self.op.event_name()
        )
    }
}

/// A consumer of trace records
pub trait TraceSink {
    /// Called for every record matching the sink's filter
    fn on_event(&mut self, record: &TraceRecord);
}

/// Subscription key of a sink
#[derive(Debug, Clone, Copy, Default)]
pub struct TraceFilter {
    /// Restrict to one node
    pub node: Option<NodeId>,
    /// Restrict to one device
    pub device: Option<DeviceId>,
    /// Restrict to one event kind
    pub op: Option<TraceOp>,
}

impl TraceFilter {
    /// Match every record
    pub fn all() -> Self {
        Self::default()
    }

    /// Match one event kind on any device
    pub fn for_op(op: TraceOp) -> Self {
        Self {
            op: Some(op),
            ..Self::default()
        }
    }

    /// Match everything happening on one node
    pub fn for_node(node: NodeId) -> Self {
        Self {
            node: Some(node),
            ..Self::default()
        }
    }

    fn matches(&self, record: &TraceRecord) -> bool {
        self.node.map_or(true, |n| n == record.node)
            && self.device.map_or(true, |d| d == record.device)
            && self.op.map_or(true, |o| o == record.op)
    }
}

/// Observer list over all trace events
#[derive(Default)]
pub struct TraceRegistry {
    sinks: Vec<(TraceFilter, Box<dyn TraceSink>)>,
}

impl TraceRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a sink for records matching `filter`
    pub fn subscribe(&mut self, filter: TraceFilter, sink: Box<dyn TraceSink>) {
        self.sinks.push((filter, sink));
    }

    /// Fan a record out to every matching sink
    pub fn emit(&mut self, record: &TraceRecord) {
        for (filter, sink) in &mut self.sinks {
            if filter.matches(record) {
                sink.on_event(record);
            }
        }
    }

    /// Whether any sink is registered
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl std::fmt::Debug for TraceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceRegistry")
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

/// Renders records as ASCII trace lines
pub struct AsciiTraceWriter<W: Write> {
    stream: W,
}

impl<W: Write> AsciiTraceWriter<W> {
    /// Wrap an output stream
    pub fn new(stream: W) -> Self {
        Self { stream }
    }
}

impl<W: Write> TraceSink for AsciiTraceWriter<W> {
    fn on_event(&mut self, record: &TraceRecord) {
        let tail = if record.flit.is_tail() { "(tail flit)" } else { "" };
        // a broken trace stream must not take the simulation down
        let _ = writeln!(
            self.stream,
            "{} {} {} {}{}",
            record.op.symbol(),
            record.time.ps(),
            record.path(),
            record.flit,
            tail
        );
    }
}

/// Collects matching records into a shared buffer; the test suite's sink
#[derive(Default)]
pub struct CollectorSink {
    records: Rc<RefCell<Vec<TraceRecord>>>,
}

impl CollectorSink {
    /// New collector with an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared handle onto the collected records
    pub fn handle(&self) -> Rc<RefCell<Vec<TraceRecord>>> {
        Rc::clone(&self.records)
    }
}

impl TraceSink for CollectorSink {
    fn on_event(&mut self, record: &TraceRecord) {
        self.records.borrow_mut().push(record.clone());
    }
}
