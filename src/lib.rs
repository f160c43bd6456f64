//! Cycle-accurate discrete-event simulator for synchronous Networks-on-Chip
//!
//! This crate models flit-level traffic on tile-based topologies under a
//! shared global clock:
//! - 2-D mesh, 2-D torus and Irvine split-router meshes
//! - XY, Static-Load-Balanced and Self-Organising routing
//! - wormhole, store-and-forward and virtual cut-through switching
//! - stochastic and communication-task-graph traffic generators
//! - observer-based tracing with the classic ASCII trace line format
//!
//! A fixed RNG seed makes a run fully deterministic.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod app;
pub mod channel;
pub mod config;
pub mod device;
pub mod engine;
pub mod error;
pub mod packet;
pub mod router;
pub mod routing;
pub mod sim;
pub mod stats;
pub mod switching;
pub mod topology;
pub mod trace;

pub use app::{CtgConfig, DependentTaskData, SyncConfig, TaskData, TrafficPattern};
pub use config::NocConfig;
pub use device::Direction;
pub use engine::Simulator;
pub use error::{NocError, NocResult};
pub use packet::{Flit, FlitType, PacketUid, RoutingHeader};
pub use router::{LoadKind, RouterKind};
pub use routing::RoutingProtocol;
pub use sim::Time;
pub use stats::NetworkStats;
pub use switching::Switching;
pub use topology::{ChannelId, DeviceId, NocTopologyBuilder, NodeId, Topology, TopologyShape};
pub use trace::{AsciiTraceWriter, CollectorSink, TraceFilter, TraceOp, TraceRecord, TraceSink};
