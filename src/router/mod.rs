//! Per-node routers
//!
//! A router owns the node's net devices, the routing and switching protocol
//! instances, and optionally a load component. Device lookup that needs the
//! whole graph (peers, directions) lives on [`crate::topology::Topology`];
//! the router keeps the per-node state: bank membership and load figures.

pub mod irvine;
pub mod load;

use serde::{Deserialize, Serialize};

use crate::device::Direction;
use crate::error::{NocError, NocResult};
use crate::routing::RoutingProtocol;
use crate::switching::{PortState, Switching};
use crate::topology::{DeviceId, NodeId};

pub use irvine::{Bank, IrvineBanks};
pub use load::{blend_direction_load, LoadComponent, LoadKind};

/// The supported router organisations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouterKind {
    /// One router with a device per direction
    FourWay,
    /// Irvine split router with left/right sub-routers
    Irvine,
}

/// Per-node switching and routing state
#[derive(Debug)]
pub struct Router {
    /// Owning node
    pub node: NodeId,
    /// Router organisation
    pub kind: RouterKind,
    /// Routing protocol instance
    pub routing: RoutingProtocol,
    /// Switching discipline
    pub switching: Switching,
    /// All owned devices in install order
    pub devices: Vec<DeviceId>,
    /// Split-router banks; populated for `RouterKind::Irvine`
    pub banks: IrvineBanks,
    /// Optional congestion reporting
    pub load: Option<LoadComponent>,
    /// Switching state of the local injection port. Locally injected flits
    /// bypass the link input buffers so that an in-transit stream can never
    /// wedge the node's own traffic.
    pub injection_port: PortState,
    /// Latest load figures pushed by neighbours, per cardinal direction
    neighbour_loads: [Option<u32>; 4],
}

fn cardinal_index(direction: Direction) -> Option<usize> {
    match direction {
        Direction::North => Some(0),
        Direction::East => Some(1),
        Direction::South => Some(2),
        Direction::West => Some(3),
        _ => None,
    }
}

impl Router {
    /// Create a router without devices
    pub fn new(
        node: NodeId,
        kind: RouterKind,
        routing: RoutingProtocol,
        switching: Switching,
        load: Option<LoadComponent>,
    ) -> Self {
        Self {
            node,
            kind,
            routing,
            switching,
            devices: Vec::new(),
            banks: IrvineBanks::default(),
            load,
            injection_port: PortState::Idle,
            neighbour_loads: [None; 4],
        }
    }

    /// Associate a device with this router, returning its index in the
    /// router's device list. For the split router the device is also
    /// partitioned into its bank.
    pub fn add_device(&mut self, device: DeviceId, direction: Direction) -> NocResult<u32> {
        if self.devices.contains(&device) {
            return Err(NocError::ConfigInvalid(format!(
                "device {device} added to router of node {} twice",
                self.node
            )));
        }
        if self.kind == RouterKind::Irvine {
            self.banks.add_device(device, direction)?;
        }
        let index = self.devices.len() as u32;
        self.devices.push(device);
        Ok(index)
    }

    /// Account an injected or forwarded flit in the load window
    pub fn register_flit(&mut self) {
        if let Some(load) = &mut self.load {
            load.register_flit();
        }
    }

    /// The router's own normalised load; 0 without a load component
    pub fn local_load(&self) -> u32 {
        self.load.as_ref().map_or(0, LoadComponent::local_load)
    }

    /// Store a load figure pushed by the neighbour in `direction`
    pub fn set_neighbour_load(&mut self, direction: Direction, value: u32) {
        if let Some(idx) = cardinal_index(direction) {
            self.neighbour_loads[idx] = Some(value);
        }
    }

    /// The last load pushed by the neighbour in `direction`; missing
    /// readings (and routers without a load component) read as 0.
    pub fn neighbour_load(&self, direction: Direction) -> u32 {
        if self.load.is_none() {
            return 0;
        }
        cardinal_index(direction)
            .and_then(|idx| self.neighbour_loads[idx])
            .unwrap_or(0)
    }
}
