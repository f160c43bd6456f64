//! Error types for the NoC simulator

use thiserror::Error;

/// Result type for simulator operations
pub type NocResult<T> = Result<T, NocError>;

/// Error kinds the simulator core distinguishes
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NocError {
    /// Invalid configuration (bad sizes, zero clock, queue depth < 1, ...)
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// The routing protocol produced no legal output direction
    #[error("no route for packet {uid} at node {node}")]
    NoRoute {
        /// Node at which routing failed
        node: u32,
        /// UID of the packet being routed
        uid: u64,
    },

    /// A flit was offered to a channel with a transmission still in flight.
    /// Transient: the switching protocol retries on the next clock tick.
    #[error("channel {0} is busy")]
    ChannelBusy(u32),

    /// A flit was offered to a full input queue.
    /// Transient: induces upstream backpressure, never a drop.
    #[error("input queue of device {0} is full")]
    QueueFull(u32),

    /// Terminal for the flit; recorded via the drop trace
    #[error("packet {0} dropped")]
    PacketDrop(u64),

    /// A CTG barrier received more data than the task graph declares
    #[error("dependency violation: {0}")]
    DependencyViolation(String),
}

impl NocError {
    /// Transient errors are handled internally by rescheduling; everything
    /// else aborts the simulation or drops the flit.
    pub fn is_transient(&self) -> bool {
        matches!(self, NocError::ChannelBusy(_) | NocError::QueueFull(_))
    }
}
