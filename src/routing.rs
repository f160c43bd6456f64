//! Routing protocols
//!
//! A routing protocol is a pure function from a head flit's header and local
//! router state to an output direction. All route lookups go through
//! [`request_route`], which invokes its reply callback exactly once; the
//! reply is synchronous here, but the callback contract leaves room for
//! asynchronous resolution.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::device::Direction;
use crate::packet::Flit;
use crate::router::{blend_direction_load, LoadKind};
use crate::switching::RouteTarget;
use crate::topology::{DeviceId, NodeId, Topology};

/// The supported routing protocol variants
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum RoutingProtocol {
    /// Deterministic dimension-order routing, deadlock-free on a mesh
    Xy {
        /// Resolve the horizontal leg first (YX order when false)
        route_x_first: bool,
    },
    /// Static-Load-Balanced adaptive routing
    Slb {
        /// Below this load on every permissible direction the protocol
        /// behaves like XY
        load_threshold: u32,
    },
    /// Self-Organising adaptive routing
    So,
}

impl Default for RoutingProtocol {
    fn default() -> Self {
        RoutingProtocol::Xy { route_x_first: true }
    }
}

impl RoutingProtocol {
    /// The load model a protocol expects on its routers, if any
    pub fn load_kind(&self) -> Option<LoadKind> {
        match self {
            RoutingProtocol::Xy { .. } => None,
            RoutingProtocol::Slb { .. } => Some(LoadKind::Slb),
            RoutingProtocol::So => Some(LoadKind::So),
        }
    }
}

/// Outcome of a route request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteReply {
    /// Whether a legal output was found
    pub found: bool,
    /// The device the request entered through
    pub src_device: DeviceId,
    /// Chosen output, when found
    pub target: Option<RouteTarget>,
}

/// Resolve the output for the head flit sitting at `src_device`. The header
/// distances are decremented for the hop the chosen direction consumes, and
/// `reply` is invoked exactly once.
pub fn request_route<F: FnOnce(RouteReply)>(
    net: &mut Topology,
    src_device: DeviceId,
    destination: NodeId,
    flit: &mut Flit,
    reply: F,
) {
    let node = net.device(src_device).node;
    let protocol = net.node(node).router.routing;

    let not_found = RouteReply {
        found: false,
        src_device,
        target: None,
    };

    let Some(header) = flit.header.as_mut() else {
        reply(not_found);
        return;
    };

    if header.is_local() {
        reply(RouteReply {
            found: true,
            src_device,
            target: Some(RouteTarget::Local),
        });
        return;
    }

    let x_dir = (header.x_magnitude() > 0).then(|| {
        if header.x_is_west() {
            Direction::West
        } else {
            Direction::East
        }
    });
    let y_dir = (header.y_magnitude() > 0).then(|| {
        if header.y_is_north() {
            Direction::North
        } else {
            Direction::South
        }
    });

    let chosen = match protocol {
        RoutingProtocol::Xy { route_x_first } => {
            if route_x_first {
                x_dir.or(y_dir)
            } else {
                y_dir.or(x_dir)
            }
        }
        RoutingProtocol::Slb { load_threshold } => adaptive_choice(
            net,
            node,
            src_device,
            x_dir,
            y_dir,
            load_threshold,
            LoadKind::Slb,
        ),
        RoutingProtocol::So => {
            adaptive_choice(net, node, src_device, x_dir, y_dir, 0, LoadKind::So)
        }
    };

    let Some(direction) = chosen else {
        reply(not_found);
        return;
    };
    let Some(out_device) = net.output_device(node, src_device, direction) else {
        debug!(node = %node, %direction, "no output device for routed direction");
        reply(not_found);
        return;
    };

    match direction {
        Direction::East | Direction::West => header.decrement_x(),
        Direction::North | Direction::South => header.decrement_y(),
        _ => {}
    }
    debug!(
        node = %node, %direction, dest = %destination, uid = %flit.uid,
        "route resolved"
    );
    reply(RouteReply {
        found: true,
        src_device,
        target: Some(RouteTarget::Device(out_device)),
    });
}

/// Load-aware direction choice shared by SLB and SO. With a single
/// permissible direction there is nothing to weigh; with two, the direction
/// with the lower blended load wins, ties broken by the static priority
/// E > W > S > N. When every candidate sits below `threshold` the choice
/// degrades to dimension order.
fn adaptive_choice(
    net: &Topology,
    node: NodeId,
    src_device: DeviceId,
    x_dir: Option<Direction>,
    y_dir: Option<Direction>,
    threshold: u32,
    kind: LoadKind,
) -> Option<Direction> {
    let candidates: Vec<Direction> = [x_dir, y_dir].into_iter().flatten().collect();
    match candidates.len() {
        0 => None,
        1 => Some(candidates[0]),
        _ => {
            let loads: Vec<(Direction, u32)> = candidates
                .iter()
                .map(|&dir| (dir, direction_load(net, node, src_device, dir, kind)))
                .collect();
            if threshold > 0 && loads.iter().all(|&(_, load)| load < threshold) {
                return x_dir.or(y_dir);
            }
            let min = loads.iter().map(|&(_, load)| load).min().unwrap_or(0);
            Direction::CARDINAL
                .iter()
                .copied()
                .find(|dir| loads.iter().any(|&(d, load)| d == *dir && load == min))
        }
    }
}

/// Blended load seen when leaving `node` in `direction`: the router's own
/// load combined with the mean neighbour load of the three other cardinal
/// directions. SLB reads the figures its neighbours pushed last tick; SO
/// queries the neighbours directly.
pub fn direction_load(
    net: &Topology,
    node: NodeId,
    _src_device: DeviceId,
    direction: Direction,
    kind: LoadKind,
) -> u32 {
    let router = &net.node(node).router;
    let local = router.local_load();
    let neighbours: Vec<u32> = Direction::CARDINAL
        .iter()
        .filter(|&&d| d != direction)
        .map(|&d| match kind {
            LoadKind::Slb => router.neighbour_load(d),
            LoadKind::So => net.live_neighbour_load(node, d),
        })
        .collect();
    blend_direction_load(local, &neighbours)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NocConfig;
    use crate::packet::{PacketUid, RoutingHeader};
    use crate::switching::Switching;
    use crate::topology::{NocTopologyBuilder, TopologyShape};

    fn mesh(routing: RoutingProtocol) -> Topology {
        NocTopologyBuilder::new(TopologyShape::Mesh2D { h_size: 4 }, 16)
            .routing(routing)
            .switching(Switching::Wormhole)
            .install(&NocConfig::default())
            .expect("4x4 mesh installs")
    }

    fn head(net: &Topology, src: u32, dest: u32) -> Flit {
        let (dx, dy) = net.relative_offsets(NodeId(src), NodeId(dest));
        let (sx, sy) = net.coords(NodeId(src));
        let header = RoutingHeader::new(sx, sy, dx, dy, 4).expect("offsets fit");
        Flit::head(PacketUid(1), header, 1)
    }

    fn route(net: &mut Topology, src_device: DeviceId, dest: u32, flit: &mut Flit) -> RouteReply {
        let mut out = None;
        request_route(net, src_device, NodeId(dest), flit, |reply| out = Some(reply));
        out.expect("reply fires exactly once")
    }

    #[test]
    fn test_xy_routes_x_before_y() {
        let mut net = mesh(RoutingProtocol::default());
        // node 5 -> node 7: two hops east
        let mut flit = head(&net, 5, 7);
        let src = net.injection_device(NodeId(5), &flit).expect("injectable");

        let reply = route(&mut net, src, 7, &mut flit);
        assert!(reply.found);
        let Some(RouteTarget::Device(out)) = reply.target else {
            panic!("expected a device target");
        };
        assert_eq!(net.device(out).direction, Direction::East);
        // the consumed hop is gone from the header
        assert_eq!(flit.header.expect("head keeps header").x_magnitude(), 1);
    }

    #[test]
    fn test_xy_turns_to_y_when_x_is_done() {
        let mut net = mesh(RoutingProtocol::default());
        // node 2 -> node 10 is a pure south route
        let mut flit = head(&net, 2, 10);
        let src = net.injection_device(NodeId(2), &flit).expect("injectable");

        let reply = route(&mut net, src, 10, &mut flit);
        let Some(RouteTarget::Device(out)) = reply.target else {
            panic!("expected a device target");
        };
        assert_eq!(net.device(out).direction, Direction::South);
    }

    #[test]
    fn test_local_destination_replies_local() {
        let mut net = mesh(RoutingProtocol::default());
        let (sx, sy) = net.coords(NodeId(5));
        let header = RoutingHeader::new(sx, sy, 0, 0, 2).expect("zero offsets");
        let mut flit = Flit::head(PacketUid(2), header, 1);
        let src = net.node(NodeId(5)).devices[0];

        let reply = route(&mut net, src, 5, &mut flit);
        assert_eq!(reply.target, Some(RouteTarget::Local));
    }

    #[test]
    fn test_yx_order_when_route_x_first_is_off() {
        let mut net = mesh(RoutingProtocol::Xy { route_x_first: false });
        // node 0 -> node 5 has one hop on each axis; YX goes south first
        let mut flit = head(&net, 0, 5);
        let src = net.injection_device(NodeId(0), &flit).expect("injectable");

        let reply = route(&mut net, src, 5, &mut flit);
        let Some(RouteTarget::Device(out)) = reply.target else {
            panic!("expected a device target");
        };
        assert_eq!(net.device(out).direction, Direction::South);
    }

    #[test]
    fn test_slb_picks_the_direction_with_the_lower_blended_load() {
        let mut net = mesh(RoutingProtocol::Slb { load_threshold: 0 });
        // node 0 -> node 5: east and south are both permissible
        let mut flit = head(&net, 0, 5);
        let src = net.injection_device(NodeId(0), &flit).expect("injectable");

        // the blend for a candidate direction averages the three OTHER
        // neighbourhoods, so a loaded southern neighbour weighs on the
        // eastern candidate only
        net.node_mut(NodeId(0))
            .router
            .set_neighbour_load(Direction::South, 90);

        let reply = route(&mut net, src, 5, &mut flit);
        let Some(RouteTarget::Device(out)) = reply.target else {
            panic!("expected a device target");
        };
        assert_eq!(net.device(out).direction, Direction::South);
    }

    #[test]
    fn test_slb_ties_break_east_first() {
        let mut net = mesh(RoutingProtocol::Slb { load_threshold: 0 });
        let mut flit = head(&net, 0, 5);
        let src = net.injection_device(NodeId(0), &flit).expect("injectable");

        // all loads equal: the static priority E > W > S > N decides
        let reply = route(&mut net, src, 5, &mut flit);
        let Some(RouteTarget::Device(out)) = reply.target else {
            panic!("expected a device target");
        };
        assert_eq!(net.device(out).direction, Direction::East);
    }
}
