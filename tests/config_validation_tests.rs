//! Configuration rejection paths

use nocsim::{
    NocConfig, NocError, NocTopologyBuilder, NodeId, RoutingProtocol, Simulator, SyncConfig,
    TopologyShape, TrafficPattern,
};
use test_case::test_case;

fn mesh(config: &NocConfig) -> Result<nocsim::Topology, NocError> {
    NocTopologyBuilder::new(TopologyShape::Mesh2D { h_size: 4 }, 16).install(config)
}

#[test]
fn test_zero_queue_depth_is_rejected() {
    let result = NocTopologyBuilder::new(TopologyShape::Mesh2D { h_size: 4 }, 16)
        .in_queue_depth(0)
        .install(&NocConfig::default());
    assert!(matches!(result, Err(NocError::ConfigInvalid(_))));
}

#[test]
fn test_zero_global_clock_is_rejected() {
    let config = NocConfig {
        global_clock: 0,
        ..NocConfig::default()
    };
    assert!(matches!(mesh(&config), Err(NocError::ConfigInvalid(_))));
}

#[test_case(0; "zero speedup")]
fn test_bad_speedup_is_rejected(speedup: u32) {
    let config = NocConfig {
        data_packet_speedup: speedup,
        ..NocConfig::default()
    };
    assert!(matches!(config.validate(), Err(NocError::ConfigInvalid(_))));
}

#[test]
fn test_flit_size_must_cover_the_header() {
    let config = NocConfig {
        flit_size: 24, // equal to the 3-byte header leaves no payload
        ..NocConfig::default()
    };
    assert!(matches!(config.validate(), Err(NocError::ConfigInvalid(_))));
}

#[test]
fn test_node_count_must_be_a_row_multiple() {
    let result =
        NocTopologyBuilder::new(TopologyShape::Mesh2D { h_size: 4 }, 14).install(&NocConfig::default());
    assert!(matches!(result, Err(NocError::ConfigInvalid(_))));
}

#[test_case(1.5)]
#[test_case(-0.1)]
fn test_injection_probability_bounds(probability: f64) {
    let topology = mesh(&NocConfig::default()).expect("mesh installs");
    let mut sim = Simulator::new(NocConfig::default(), topology).expect("simulator builds");
    let result = sim.install_sync_app(
        NodeId(0),
        SyncConfig {
            injection_probability: probability,
            ..SyncConfig::default()
        },
    );
    assert!(matches!(result, Err(NocError::ConfigInvalid(_))));
}

#[test]
fn test_fixed_destination_must_differ_from_source() {
    let topology = mesh(&NocConfig::default()).expect("mesh installs");
    let mut sim = Simulator::new(NocConfig::default(), topology).expect("simulator builds");
    let result = sim.install_sync_app(
        NodeId(3),
        SyncConfig {
            traffic_pattern: TrafficPattern::DestinationSpecified,
            destination: Some(NodeId(3)),
            ..SyncConfig::default()
        },
    );
    assert!(matches!(result, Err(NocError::ConfigInvalid(_))));
}

#[test]
fn test_bit_patterns_need_power_of_two_grids() {
    let config = NocConfig::default();
    let topology = NocTopologyBuilder::new(TopologyShape::Mesh2D { h_size: 6 }, 12)
        .install(&config)
        .expect("6x2 mesh installs");
    let mut sim = Simulator::new(config, topology).expect("simulator builds");
    let result = sim.install_sync_app(
        NodeId(0),
        SyncConfig {
            traffic_pattern: TrafficPattern::BitComplement,
            ..SyncConfig::default()
        },
    );
    assert!(matches!(result, Err(NocError::ConfigInvalid(_))));
}

#[test]
fn test_adaptive_routing_installs_load_components() {
    let config = NocConfig::default();
    let topology = NocTopologyBuilder::new(TopologyShape::Mesh2D { h_size: 4 }, 16)
        .routing(RoutingProtocol::Slb { load_threshold: 30 })
        .install(&config)
        .expect("mesh installs");
    assert!(topology
        .node_ids()
        .all(|id| topology.node(id).router.load.is_some()));
}

#[test]
fn test_xy_routing_needs_no_load_component() {
    let topology = mesh(&NocConfig::default()).expect("mesh installs");
    assert!(topology
        .node_ids()
        .all(|id| topology.node(id).router.load.is_none()));
    // without a component every neighbour reading is zero
    assert_eq!(
        topology.live_neighbour_load(NodeId(5), nocsim::Direction::East),
        0
    );
}
