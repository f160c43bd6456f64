//! SLB and SO adaptive routing end to end

use nocsim::{
    Direction, NocConfig, NocTopologyBuilder, NodeId, RoutingProtocol, Simulator, SyncConfig,
    Time, TopologyShape, TrafficPattern,
};

fn simulator(routing: RoutingProtocol) -> Simulator {
    let config = NocConfig {
        seed: 3,
        ..NocConfig::default()
    };
    let topology = NocTopologyBuilder::new(TopologyShape::Mesh2D { h_size: 4 }, 16)
        .routing(routing)
        .install(&config)
        .expect("4x4 mesh installs");
    Simulator::new(config, topology).expect("simulator builds")
}

fn install_flows(sim: &mut Simulator, flows: &[(u32, u32)]) {
    for &(source, destination) in flows {
        sim.install_sync_app(
            NodeId(source),
            SyncConfig {
                injection_probability: 1.0,
                traffic_pattern: TrafficPattern::DestinationSpecified,
                destination: Some(NodeId(destination)),
                number_of_flits: 5,
                max_flits: 10,
                ..SyncConfig::default()
            },
        )
        .expect("source installs");
    }
}

#[test]
fn test_slb_under_threshold_delivers_cross_traffic() {
    // Arrange: with every load under the threshold SLB degrades to
    // dimension order, so even crossing diagonal flows stay deadlock-free
    let mut sim = simulator(RoutingProtocol::Slb { load_threshold: 30 });
    install_flows(&mut sim, &[(0, 15), (15, 0), (3, 12), (12, 3)]);

    // Act
    sim.run_until(Time(1_000_000)).expect("run completes");

    // Assert: adaptivity must not cost a single flit
    let stats = sim.stats();
    assert_eq!(stats.injected_flits, 40);
    assert_eq!(stats.received_flits, 40);
    assert_eq!(stats.dropped_flits, 0);
    assert_eq!(sim.in_flight_flits(), 0);
}

#[test]
fn test_so_delivers_southbound_families() {
    // Arrange: every flow only ever moves east, west or south, so no wait
    // cycle can close even when load readings bend individual choices
    let mut sim = simulator(RoutingProtocol::So);
    install_flows(&mut sim, &[(0, 15), (3, 12), (1, 13)]);

    // Act
    sim.run_until(Time(1_000_000)).expect("run completes");

    // Assert
    let stats = sim.stats();
    assert_eq!(stats.injected_flits, 30);
    assert_eq!(stats.received_flits, 30);
    assert_eq!(stats.dropped_flits, 0);
    assert_eq!(sim.in_flight_flits(), 0);
}

#[test]
fn test_slb_load_publication_settles_after_drain() {
    // Arrange: a single saturating flow between neighbours
    let mut sim = simulator(RoutingProtocol::Slb { load_threshold: 0 });
    install_flows(&mut sim, &[(5, 6)]);

    // Act
    sim.run_until(Time(1_000_000)).expect("run completes");

    // Assert: deliveries happened and the final publication round, taken
    // after the last flit left node 5, reads idle again
    assert_eq!(sim.stats().received_flits, 10);
    assert_eq!(sim.stats().dropped_flits, 0);
    let west_view = sim
        .topology()
        .node(NodeId(6))
        .router
        .neighbour_load(Direction::West);
    assert_eq!(west_view, 0);
}
