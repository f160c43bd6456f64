//! Communication-task-graph application: barriers, periods, violations

use nocsim::{
    CollectorSink, CtgConfig, DependentTaskData, NocConfig, NocError, NocTopologyBuilder, NodeId,
    Simulator, TaskData, Time, TopologyShape, TraceFilter, TraceOp, TraceRecord,
};

const PERIOD: u64 = 10_000;
const EXEC0: u64 = 2_000;
const EXEC1: u64 = 3_000;

fn task(id: &str, exec_time_ps: u64) -> TaskData {
    TaskData {
        id: id.into(),
        exec_time_ps,
    }
}

fn edge(sender: (&str, u32), receiver: (&str, u32), bits: u64) -> DependentTaskData {
    DependentTaskData {
        sender_task: sender.0.into(),
        sender_node: sender.1,
        bits,
        receiving_task: receiver.0.into(),
        receiving_node: receiver.1,
    }
}

/// The three-task pipeline 0 -> 1 -> 2 -> 0 over 256-bit edges
fn pipeline_simulator(iterations: u64) -> (Simulator, std::rc::Rc<std::cell::RefCell<Vec<TraceRecord>>>) {
    let config = NocConfig::default();
    let topology = NocTopologyBuilder::new(TopologyShape::Mesh2D { h_size: 4 }, 16)
        .install(&config)
        .expect("4x4 mesh installs");
    let mut sim = Simulator::new(config, topology).expect("simulator builds");

    let collector = CollectorSink::new();
    let records = collector.handle();
    sim.subscribe_trace(TraceFilter::all(), Box::new(collector));

    let base = CtgConfig {
        period_ps: PERIOD,
        iterations,
        number_of_flits: 9,
        ..CtgConfig::default()
    };
    sim.install_ctg_app(
        NodeId(0),
        CtgConfig {
            tasks: vec![task("t0", EXEC0)],
            task_destinations: vec![edge(("t0", 0), ("t1", 1), 256)],
            ..base.clone()
        },
    )
    .expect("node 0 installs");
    sim.install_ctg_app(
        NodeId(1),
        CtgConfig {
            tasks: vec![task("t1", EXEC1)],
            task_senders: vec![edge(("t0", 0), ("t1", 1), 256)],
            task_destinations: vec![edge(("t1", 1), ("t2", 2), 256)],
            ..base.clone()
        },
    )
    .expect("node 1 installs");
    sim.install_ctg_app(
        NodeId(2),
        CtgConfig {
            tasks: vec![task("t2", 0)],
            task_senders: vec![edge(("t1", 1), ("t2", 2), 256)],
            task_destinations: vec![edge(("t2", 2), ("t0", 0), 256)],
            ..base
        },
    )
    .expect("node 2 installs");
    (sim, records)
}

/// Head flits a node put into the network (source coordinates match)
fn emissions(records: &[TraceRecord], node: NodeId, h_size: u8) -> Vec<Time> {
    records
        .iter()
        .filter(|r| r.op == TraceOp::Enqueue && r.node == node && r.flit.is_head())
        .filter(|r| {
            r.flit.header.as_ref().map_or(false, |h| {
                (h.source_x, h.source_y) == (node.0 as u8 % h_size, node.0 as u8 / h_size)
            })
        })
        .map(|r| r.time)
        .collect()
}

#[test]
fn test_dependency_chain_delays_downstream_emission() {
    // Arrange + Act
    let (mut sim, records) = pipeline_simulator(1);
    sim.run().expect("run completes");
    let records = records.borrow();

    // Assert: node 2 cannot speak before both upstream execution times and
    // two network traversals have passed
    let node2 = emissions(&records, NodeId(2), 4);
    assert!(!node2.is_empty(), "node 2 should emit after its barrier");
    assert!(
        node2[0] >= Time(EXEC0 + EXEC1 + 2 * 1_000),
        "node 2 spoke at {} before the chain could have completed",
        node2[0]
    );

    // the barrier releases only after the last inbound flit of node 1's
    // 256-bit transmission has landed
    let last_barrier_flit = records
        .iter()
        .filter(|r| r.op == TraceOp::Receive && r.node == NodeId(2))
        .map(|r| r.time)
        .take(9)
        .max()
        .expect("node 2 received its inbound data");
    assert!(
        node2[0] > last_barrier_flit,
        "emission at {} overtook the barrier completing at {last_barrier_flit}",
        node2[0]
    );
}

#[test]
fn test_iterations_respect_the_period() {
    // Arrange + Act
    let (mut sim, records) = pipeline_simulator(3);
    sim.run().expect("run completes");
    let records = records.borrow();

    // Assert: node 0 has no inbound edges, so its iterations are released by
    // the period alone; one 256-bit edge is one 9-flit packet per iteration
    let node0 = emissions(&records, NodeId(0), 4);
    assert_eq!(node0.len(), 3, "one packet per iteration");
    for (iteration, time) in node0.iter().enumerate() {
        assert!(
            time.ps() >= iteration as u64 * PERIOD,
            "iteration {iteration} started at {time}, before its period slot"
        );
    }
    // the first iteration also waits out the modelled execution time
    assert!(node0[0] >= Time(EXEC0));
}

#[test]
fn test_barrier_overrun_is_a_dependency_violation() {
    // Arrange: node 5 expects 128 bits once, node 4 sends it 256
    let config = NocConfig::default();
    let topology = NocTopologyBuilder::new(TopologyShape::Mesh2D { h_size: 4 }, 16)
        .install(&config)
        .expect("4x4 mesh installs");
    let mut sim = Simulator::new(config, topology).expect("simulator builds");
    sim.install_ctg_app(
        NodeId(4),
        CtgConfig {
            tasks: vec![task("a", 0)],
            task_destinations: vec![edge(("a", 4), ("b", 5), 256)],
            number_of_flits: 9,
            iterations: 1,
            ..CtgConfig::default()
        },
    )
    .expect("sender installs");
    sim.install_ctg_app(
        NodeId(5),
        CtgConfig {
            tasks: vec![task("b", 0)],
            task_senders: vec![edge(("a", 4), ("b", 5), 128)],
            task_destinations: vec![edge(("b", 5), ("a", 4), 128)],
            number_of_flits: 9,
            iterations: 1,
            ..CtgConfig::default()
        },
    )
    .expect("receiver installs");

    // Act + Assert: the surplus data aborts the run
    let result = sim.run();
    assert!(matches!(result, Err(NocError::DependencyViolation(_))));
}

#[test]
fn test_sink_node_tracks_barriers_without_emitting() {
    // Arrange: node 1 only receives
    let config = NocConfig::default();
    let topology = NocTopologyBuilder::new(TopologyShape::Mesh2D { h_size: 4 }, 16)
        .install(&config)
        .expect("4x4 mesh installs");
    let mut sim = Simulator::new(config, topology).expect("simulator builds");
    sim.install_ctg_app(
        NodeId(0),
        CtgConfig {
            tasks: vec![task("a", 0)],
            task_destinations: vec![edge(("a", 0), ("b", 1), 256)],
            number_of_flits: 9,
            ..CtgConfig::default()
        },
    )
    .expect("sender installs");
    sim.install_ctg_app(
        NodeId(1),
        CtgConfig {
            tasks: vec![task("b", 0)],
            task_senders: vec![edge(("a", 0), ("b", 1), 256)],
            ..CtgConfig::default()
        },
    )
    .expect("sink installs");

    // Act
    sim.run().expect("run completes");

    // Assert: the data arrived, the sink stayed silent
    assert_eq!(sim.stats().node(NodeId(1)).received_flits, 9);
    assert_eq!(sim.stats().node(NodeId(1)).injected_flits, 0);
    assert_eq!(sim.stats().dropped_flits, 0);
}
