//! Routing laws checked over generated source/destination pairs

use proptest::prelude::*;

use nocsim::routing::request_route;
use nocsim::switching::RouteTarget;
use nocsim::{
    Flit, NocConfig, NocTopologyBuilder, NodeId, PacketUid, RoutingHeader, TopologyShape,
};

/// Walk a head flit across the mesh with XY routing, returning the hop count
/// and checking the header monotonicity law at every step.
fn walk(source: u32, destination: u32) -> u32 {
    let mut net = NocTopologyBuilder::new(TopologyShape::Mesh2D { h_size: 8 }, 64)
        .install(&NocConfig::default())
        .expect("8x8 mesh installs");

    let (dx, dy) = net.relative_offsets(NodeId(source), NodeId(destination));
    let (sx, sy) = net.coords(NodeId(source));
    let header = RoutingHeader::new(sx, sy, dx, dy, 1).expect("offsets fit an 8x8 grid");
    let mut flit = Flit::head(PacketUid(1), header, 1);

    let mut device = net
        .injection_device(NodeId(source), &flit)
        .expect("source can inject");
    let mut hops = 0;
    loop {
        let before = flit.header.expect("head keeps its header").distance_sum();
        let mut routed = None;
        request_route(&mut net, device, NodeId(destination), &mut flit, |reply| {
            routed = Some(reply)
        });
        let reply = routed.expect("the reply fires exactly once");
        assert!(reply.found, "XY must always find a route on a mesh");

        match reply.target.expect("found replies carry a target") {
            RouteTarget::Local => {
                assert_eq!(before, 0, "local delivery with hops remaining");
                let node = net.device(device).node;
                assert_eq!(node, NodeId(destination));
                return hops;
            }
            RouteTarget::Device(out) => {
                let after = flit.header.expect("head keeps its header").distance_sum();
                assert_eq!(after + 1, before, "each hop consumes exactly one unit");
                device = net.peer_of(out).expect("outputs are wired");
                hops += 1;
            }
        }
    }
}

fn manhattan(source: u32, destination: u32) -> u32 {
    let (sx, sy) = (source % 8, source / 8);
    let (dx, dy) = (destination % 8, destination / 8);
    sx.abs_diff(dx) + sy.abs_diff(dy)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn xy_covers_exactly_the_manhattan_distance(source in 0u32..64, destination in 0u32..64) {
        prop_assume!(source != destination);
        prop_assert_eq!(walk(source, destination), manhattan(source, destination));
    }
}

#[test]
fn test_zero_distance_is_delivered_locally() {
    assert_eq!(walk(27, 27), 0);
}
