//! Topology arena and install plumbing
//!
//! The router graph is cyclic (router ↔ device ↔ channel ↔ device ↔ router),
//! so nodes, devices and channels live in flat arenas with stable indices
//! and reference each other by id. Neighbour lookup is O(1) and there are no
//! ownership cycles to break.

pub mod irvine_mesh2d;
pub mod mesh2d;
pub mod torus2d;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::channel::Channel;
use crate::config::NocConfig;
use crate::device::{Direction, NetDevice};
use crate::error::{NocError, NocResult};
use crate::packet::{Flit, DISTANCE_MASK};
use crate::router::{Bank, LoadComponent, Router, RouterKind};
use crate::routing::RoutingProtocol;
use crate::switching::Switching;

/// Index of a node in the topology arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u32);

/// Index of a net device in the topology arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub u32);

/// Index of a channel in the topology arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(pub u32);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A processing tile with its router and device list
#[derive(Debug)]
pub struct Node {
    /// Dense node id, also the arena index
    pub id: NodeId,
    /// The node's router
    pub router: Router,
    /// Owned devices in install order
    pub devices: Vec<DeviceId>,
}

/// Supported tile arrangements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TopologyShape {
    /// Plain 2-D mesh
    Mesh2D {
        /// Nodes per row
        h_size: u32,
    },
    /// 2-D mesh with wrap-around row and column channels
    Torus2D {
        /// Nodes per row
        h_size: u32,
    },
    /// 2-D mesh with duplicated vertical links feeding split routers
    IrvineMesh2D {
        /// Nodes per row
        h_size: u32,
    },
}

impl TopologyShape {
    /// Nodes per row
    pub fn h_size(&self) -> u32 {
        match *self {
            TopologyShape::Mesh2D { h_size }
            | TopologyShape::Torus2D { h_size }
            | TopologyShape::IrvineMesh2D { h_size } => h_size,
        }
    }

    /// The router organisation this shape is built for
    pub fn router_kind(&self) -> RouterKind {
        match self {
            TopologyShape::IrvineMesh2D { .. } => RouterKind::Irvine,
            _ => RouterKind::FourWay,
        }
    }
}

/// The installed router graph
#[derive(Debug)]
pub struct Topology {
    shape: TopologyShape,
    h_size: u32,
    v_size: u32,
    nodes: Vec<Node>,
    devices: Vec<NetDevice>,
    channels: Vec<Channel>,
}

impl Topology {
    fn empty(shape: TopologyShape, h_size: u32, v_size: u32) -> Self {
        Self {
            shape,
            h_size,
            v_size,
            nodes: Vec::new(),
            devices: Vec::new(),
            channels: Vec::new(),
        }
    }

    /// The installed shape
    pub fn shape(&self) -> TopologyShape {
        self.shape
    }

    /// Number of nodes
    pub fn node_count(&self) -> u32 {
        self.nodes.len() as u32
    }

    /// Nodes per row
    pub fn h_size(&self) -> u32 {
        self.h_size
    }

    /// Nodes per column
    pub fn v_size(&self) -> u32 {
        self.v_size
    }

    /// Borrow a node
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0 as usize]
    }

    /// Mutably borrow a node
    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0 as usize]
    }

    /// Borrow a device
    pub fn device(&self, id: DeviceId) -> &NetDevice {
        &self.devices[id.0 as usize]
    }

    /// Mutably borrow a device
    pub fn device_mut(&mut self, id: DeviceId) -> &mut NetDevice {
        &mut self.devices[id.0 as usize]
    }

    /// Borrow a channel
    pub fn channel(&self, id: ChannelId) -> &Channel {
        &self.channels[id.0 as usize]
    }

    /// Mutably borrow a channel
    pub fn channel_mut(&mut self, id: ChannelId) -> &mut Channel {
        &mut self.channels[id.0 as usize]
    }

    /// All device ids, in install order
    pub fn device_ids(&self) -> impl Iterator<Item = DeviceId> + '_ {
        (0..self.devices.len() as u32).map(DeviceId)
    }

    /// All node ids
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.nodes.len() as u32).map(NodeId)
    }

    /// Grid coordinates of a node
    pub fn coords(&self, node: NodeId) -> (u8, u8) {
        ((node.0 % self.h_size) as u8, (node.0 / self.h_size) as u8)
    }

    /// The node at the given grid coordinates
    pub fn node_at(&self, x: u8, y: u8) -> NodeId {
        NodeId(u32::from(y) * self.h_size + u32::from(x))
    }

    /// Signed offsets from `src` to `dest` (positive = East / South). On a
    /// torus the shorter way around each ring wins.
    pub fn relative_offsets(&self, src: NodeId, dest: NodeId) -> (i32, i32) {
        let (sx, sy) = self.coords(src);
        let (dx, dy) = self.coords(dest);
        let mut x = i32::from(dx) - i32::from(sx);
        let mut y = i32::from(dy) - i32::from(sy);
        if matches!(self.shape, TopologyShape::Torus2D { .. }) {
            let h = self.h_size as i32;
            let v = self.v_size as i32;
            if x > h / 2 {
                x -= h;
            } else if x < -(h / 2) {
                x += h;
            }
            if y > v / 2 {
                y -= v;
            } else if y < -(v / 2) {
                y += v;
            }
        }
        (x, y)
    }

    /// The device on the far side of `device`'s channel
    pub fn peer_of(&self, device: DeviceId) -> Option<DeviceId> {
        let channel = self.device(device).channel?;
        self.channel(channel).peer_of(device)
    }

    /// The device a packet from `node` is injected through. The split router
    /// picks the left sub-router for westbound destinations.
    pub fn injection_device(&self, node: NodeId, flit: &Flit) -> NocResult<DeviceId> {
        let router = &self.node(node).router;
        match router.kind {
            RouterKind::FourWay => router.devices.first().copied().ok_or_else(|| {
                NocError::ConfigInvalid(format!("node {node} has no devices to inject through"))
            }),
            RouterKind::Irvine => {
                let header = flit.header.as_ref().ok_or_else(|| {
                    NocError::ConfigInvalid("only head flits can be injected".into())
                })?;
                router.banks.injection_device(header.x_is_west())
            }
        }
    }

    /// The output device for forwarding from `sender` in `direction`.
    /// On a split router the sender's own bank is searched first.
    pub fn output_device(
        &self,
        node: NodeId,
        sender: DeviceId,
        direction: Direction,
    ) -> Option<DeviceId> {
        let router = &self.node(node).router;
        match router.kind {
            RouterKind::FourWay => self.first_with_direction(&router.devices, direction),
            RouterKind::Irvine => {
                let bank = router.banks.input_bank_of(sender).unwrap_or(Bank::Right);
                self.first_with_direction(router.banks.outputs(bank), direction)
                    .or_else(|| {
                        self.first_with_direction(router.banks.outputs(bank.opposite()), direction)
                    })
            }
        }
    }

    /// The input device matching `direction`, searched like
    /// [`Self::output_device`] but over the input banks.
    pub fn input_device(
        &self,
        node: NodeId,
        sender: DeviceId,
        direction: Direction,
    ) -> Option<DeviceId> {
        let router = &self.node(node).router;
        match router.kind {
            RouterKind::FourWay => self.first_with_direction(&router.devices, direction),
            RouterKind::Irvine => {
                let bank = router.banks.input_bank_of(sender).unwrap_or(Bank::Right);
                self.first_with_direction(router.banks.inputs(bank), direction)
                    .or_else(|| {
                        self.first_with_direction(router.banks.inputs(bank.opposite()), direction)
                    })
            }
        }
    }

    fn first_with_direction(&self, devices: &[DeviceId], direction: Direction) -> Option<DeviceId> {
        devices
            .iter()
            .copied()
            .find(|&id| self.device(id).direction == direction)
    }

    /// Look a device up by its MAC-like address
    pub fn find_device_by_address(&self, address: u32) -> Option<DeviceId> {
        self.devices
            .iter()
            .find(|dev| dev.address == address)
            .map(|dev| dev.id)
    }

    /// The neighbour's current local load in `direction`, read directly
    /// (SO-style). 0 when there is no neighbour or no load component.
    pub fn live_neighbour_load(&self, node: NodeId, direction: Direction) -> u32 {
        let Some(device) = self.first_with_direction(&self.node(node).router.devices, direction)
        else {
            return 0;
        };
        let Some(peer) = self.peer_of(device) else {
            return 0;
        };
        self.node(self.device(peer).node).router.local_load()
    }

    /// Push every router's local load to its neighbours and close the
    /// publication windows (SLB once-per-tick publication).
    pub fn publish_loads(&mut self) {
        let loads: Vec<u32> = self.nodes.iter().map(|n| n.router.local_load()).collect();
        let updates: Vec<(NodeId, Direction, u32)> = self
            .devices
            .iter()
            .filter_map(|dev| {
                let channel = dev.channel?;
                let peer = self.channel(channel).peer_of(dev.id)?;
                let peer_dev = self.device(peer);
                Some((
                    peer_dev.node,
                    peer_dev.direction,
                    loads[dev.node.0 as usize],
                ))
            })
            .collect();
        for (node, direction, load) in updates {
            self.node_mut(node).router.set_neighbour_load(direction, load);
        }
        for node in &mut self.nodes {
            if let Some(load) = &mut node.router.load {
                load.reset_window();
            }
        }
    }

    // -- install-time construction helpers ----------------------------------

    pub(crate) fn add_node(&mut self, router: Router) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node {
            id,
            router,
            devices: Vec::new(),
        });
        id
    }

    pub(crate) fn add_channel(&mut self, data_rate_bps: u64, delay_ps: u64) -> ChannelId {
        let id = ChannelId(self.channels.len() as u32);
        self.channels.push(Channel::new(id, data_rate_bps, delay_ps));
        id
    }

    pub(crate) fn add_device(
        &mut self,
        node: NodeId,
        direction: Direction,
        channel: Option<ChannelId>,
        queue_depth: usize,
    ) -> NocResult<DeviceId> {
        let id = DeviceId(self.devices.len() as u32);
        let address = id.0;
        let if_index = self.node(node).devices.len() as u32;
        let mut device = NetDevice::new(id, node, if_index, address, direction, queue_depth)?;
        if let Some(channel) = channel {
            self.channel_mut(channel).attach(id)?;
            device.channel = Some(channel);
        }
        self.devices.push(device);
        self.node_mut(node).devices.push(id);
        self.node_mut(node).router.add_device(id, direction)?;
        Ok(id)
    }
}

/// Parameters shared by the shape installers
#[derive(Debug, Clone, Copy)]
pub(crate) struct InstallParams {
    pub h: u32,
    pub v: u32,
    pub queue_depth: usize,
    pub data_rate_bps: u64,
    pub delay_ps: u64,
}

/// Configures and installs a topology
#[derive(Debug, Clone)]
pub struct NocTopologyBuilder {
    shape: TopologyShape,
    node_count: u32,
    routing: RoutingProtocol,
    switching: Switching,
    in_queue_depth: usize,
    channel_delay_ps: u64,
}

impl NocTopologyBuilder {
    /// Start configuring a topology of `node_count` nodes
    pub fn new(shape: TopologyShape, node_count: u32) -> Self {
        Self {
            shape,
            node_count,
            routing: RoutingProtocol::default(),
            switching: Switching::Wormhole,
            in_queue_depth: 1,
            channel_delay_ps: 0,
        }
    }

    /// Choose the routing protocol (default XY)
    pub fn routing(mut self, routing: RoutingProtocol) -> Self {
        self.routing = routing;
        self
    }

    /// Choose the switching discipline (default wormhole)
    pub fn switching(mut self, switching: Switching) -> Self {
        self.switching = switching;
        self
    }

    /// Input queue depth per device (default 1)
    pub fn in_queue_depth(mut self, depth: usize) -> Self {
        self.in_queue_depth = depth;
        self
    }

    /// Channel propagation delay in picoseconds (default 0)
    pub fn channel_delay(mut self, delay_ps: u64) -> Self {
        self.channel_delay_ps = delay_ps;
        self
    }

    /// Instantiate nodes, channels and devices for the chosen shape
    pub fn install(&self, cfg: &NocConfig) -> NocResult<Topology> {
        cfg.validate()?;
        let h = self.shape.h_size();
        if h == 0 {
            return Err(NocError::ConfigInvalid(
                "the horizontal size must be at least 1".into(),
            ));
        }
        if self.node_count == 0 || self.node_count % h != 0 {
            return Err(NocError::ConfigInvalid(format!(
                "the node count {} must be a positive multiple of the horizontal size {h}",
                self.node_count
            )));
        }
        let v = self.node_count / h;
        let max_span = u32::from(DISTANCE_MASK) + 1;
        if h > max_span || v > max_span {
            return Err(NocError::ConfigInvalid(format!(
                "a {h}x{v} grid exceeds the {max_span}-tile span of the header distance fields"
            )));
        }
        if self.in_queue_depth == 0 {
            return Err(NocError::ConfigInvalid(
                "the input queue depth must be at least 1".into(),
            ));
        }

        let mut topo = Topology::empty(self.shape, h, v);
        let kind = self.shape.router_kind();
        for _ in 0..self.node_count {
            let load = self
                .routing
                .load_kind()
                .map(|k| LoadComponent::new(k, cfg.slb_data_flit_speedup, cfg.slb_message_length));
            let node = NodeId(topo.nodes.len() as u32);
            topo.add_node(Router::new(node, kind, self.routing, self.switching, load));
        }

        let params = InstallParams {
            h,
            v,
            queue_depth: self.in_queue_depth,
            data_rate_bps: cfg.channel_data_rate(),
            delay_ps: self.channel_delay_ps,
        };
        match self.shape {
            TopologyShape::Mesh2D { .. } => mesh2d::install(&mut topo, &params)?,
            TopologyShape::Torus2D { .. } => torus2d::install(&mut topo, &params)?,
            TopologyShape::IrvineMesh2D { .. } => irvine_mesh2d::install(&mut topo, &params)?,
        }

        info!(
            nodes = topo.node_count(),
            devices = topo.devices.len(),
            channels = topo.channels.len(),
            shape = ?self.shape,
            "topology installed"
        );
        Ok(topo)
    }
}
