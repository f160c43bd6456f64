//! Net devices: per-port endpoints owned by a node
//!
//! Every link endpoint of a router is a net device with a MAC-like address,
//! a routing-direction tag assigned once at topology install, and a bounded
//! input queue. A full queue stalls the upstream sender; it never drops.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::error::{NocError, NocResult};
use crate::packet::{Flit, PacketUid};
use crate::switching::PortState;
use crate::topology::{ChannelId, DeviceId, NodeId};

/// Routing direction tag of a net device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Not yet assigned
    None,
    /// Towards decreasing y
    North,
    /// Towards increasing x
    East,
    /// Towards increasing y
    South,
    /// Towards decreasing x
    West,
    /// Delivery to the local tile
    Local,
}

impl Direction {
    /// The four cardinal directions in SLB tie-break priority order
    pub const CARDINAL: [Direction; 4] = [
        Direction::East,
        Direction::West,
        Direction::South,
        Direction::North,
    ];

    /// The direction a flit travels when it arrives through a device tagged
    /// with `self` on the far side
    pub fn opposite(self) -> Direction {
        match self {
            Direction::North => Direction::South,
            Direction::South => Direction::North,
            Direction::East => Direction::West,
            Direction::West => Direction::East,
            other => other,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Direction::None => "none",
            Direction::North => "north",
            Direction::East => "east",
            Direction::South => "south",
            Direction::West => "west",
            Direction::Local => "local",
        };
        write!(f, "{name}")
    }
}

/// Bounded FIFO of flits attached to an input port.
///
/// Senders claim a slot when they put a flit on the wire and fill it when
/// the flit lands, so a slot can never be promised twice.
#[derive(Debug)]
pub struct InputQueue {
    items: VecDeque<Flit>,
    reserved: usize,
    capacity: usize,
}

impl InputQueue {
    /// Create a queue of the given depth; a depth of zero is a
    /// configuration error.
    pub fn new(capacity: usize) -> NocResult<Self> {
        if capacity == 0 {
            return Err(NocError::ConfigInvalid(
                "the input queue depth must be at least 1".into(),
            ));
        }
        Ok(Self {
            items: VecDeque::with_capacity(capacity),
            reserved: 0,
            capacity,
        })
    }

    /// Configured depth
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of queued flits
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the queue holds no flit
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Whether a slot is available, counting outstanding reservations
    pub fn has_room(&self) -> bool {
        self.items.len() + self.reserved < self.capacity
    }

    /// Append a flit, or fail with `QueueFull` for the caller to retry
    pub fn push(&mut self, flit: Flit, device: DeviceId) -> NocResult<()> {
        if !self.has_room() {
            return Err(NocError::QueueFull(device.0));
        }
        self.items.push_back(flit);
        Ok(())
    }

    /// Claim a slot for a flit that is now in flight towards this queue
    pub fn reserve_slot(&mut self) {
        debug_assert!(self.has_room(), "slot reserved on a full queue");
        self.reserved += 1;
    }

    /// Fill a previously reserved slot
    pub fn push_reserved(&mut self, flit: Flit) {
        debug_assert!(self.reserved > 0, "no outstanding reservation");
        self.reserved = self.reserved.saturating_sub(1);
        self.items.push_back(flit);
    }

    /// Put a flit back at the head of the queue (route resolution peeks by
    /// taking the flit out and restoring it)
    pub fn push_front(&mut self, flit: Flit) {
        self.items.push_front(flit);
    }

    /// The flit at the head of the queue
    pub fn front(&self) -> Option<&Flit> {
        self.items.front()
    }

    /// Remove and return the flit at the head of the queue
    pub fn pop(&mut self) -> Option<Flit> {
        self.items.pop_front()
    }

    /// Whether the tail flit of the packet `front()` belongs to is queued
    pub fn holds_tail(&self) -> bool {
        self.items.iter().any(Flit::is_tail)
    }
}

/// A per-port endpoint owned by a node
#[derive(Debug)]
pub struct NetDevice {
    /// Device identifier within the topology arena
    pub id: DeviceId,
    /// Owning node
    pub node: NodeId,
    /// Position within the owning node's device list (trace paths)
    pub if_index: u32,
    /// MAC-like address, unique across the topology
    pub address: u32,
    /// Routing direction, set once at install
    pub direction: Direction,
    /// Attached channel, if any
    pub channel: Option<ChannelId>,
    /// Bounded input buffering
    pub in_queue: InputQueue,
    /// Switching state of this input port
    pub port: PortState,
    /// Packet currently holding this device as its output; wormhole streams
    /// from different input ports must not interleave on one channel
    pub out_reserved: Option<PacketUid>,
}

impl NetDevice {
    /// Create a detached device with the given queue depth
    pub fn new(
        id: DeviceId,
        node: NodeId,
        if_index: u32,
        address: u32,
        direction: Direction,
        queue_depth: usize,
    ) -> NocResult<Self> {
        Ok(Self {
            id,
            node,
            if_index,
            address,
            direction,
            channel: None,
            in_queue: InputQueue::new(queue_depth)?,
            port: PortState::Idle,
            out_reserved: None,
        })
    }
}
