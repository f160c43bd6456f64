//! NoC simulator command-line driver
//!
//! With no workload flags this reproduces the classic four-flow scenario on
//! a 4x4 mesh (2 -> 10, 10 -> 2, 5 -> 7, 7 -> 5, five flits each). A traffic
//! pattern installs a stochastic source on every node instead, and a CTG
//! file drives the task-graph application.

use std::fs::File;
use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Parser;
use serde::Deserialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use nocsim::{
    CtgConfig, NocConfig, NocTopologyBuilder, NodeId, RoutingProtocol, Simulator, SyncConfig,
    Switching, Time, TopologyShape, TrafficPattern,
};

#[derive(Debug, Parser)]
#[command(name = "noc-sim", version, about = "Cycle-accurate NoC simulator")]
struct Args {
    /// Packet injection probability per idle tick
    #[arg(long, default_value_t = 1.0)]
    injection_probability: f64,

    /// Speedup of data flits relative to head flits
    #[arg(long, default_value_t = 1)]
    data_packet_speedup: u32,

    /// Nodes per row
    #[arg(long, default_value_t = 4)]
    h_size: u32,

    /// Total node count (multiple of the horizontal size)
    #[arg(long, default_value_t = 16)]
    nodes: u32,

    /// Flit size in bits
    #[arg(long, default_value_t = 32)]
    flit_size: u32,

    /// Clock period in picoseconds
    #[arg(long, default_value_t = 1_000)]
    global_clock: u64,

    /// Flits per packet
    #[arg(long, default_value_t = 5)]
    packet_length: u16,

    /// RNG seed (fixed seed = deterministic run)
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Topology: mesh, torus or irvine
    #[arg(long, default_value = "mesh")]
    topology: String,

    /// Routing: xy, yx, slb or so
    #[arg(long, default_value = "xy")]
    routing: String,

    /// Switching: wormhole, saf or vct
    #[arg(long, default_value = "wormhole")]
    switching: String,

    /// Input queue depth per device
    #[arg(long, default_value_t = 1)]
    in_queue_depth: usize,

    /// SLB load threshold below which routing degrades to XY
    #[arg(long, default_value_t = 30)]
    load_threshold: u32,

    /// Run for this many clock ticks instead of draining the event queue
    #[arg(long)]
    ticks: Option<u64>,

    /// Install a stochastic source with this pattern on every node
    /// (uniform-random, bit-matrix-transpose, bit-complement, bit-reverse)
    #[arg(long)]
    traffic: Option<TrafficPattern>,

    /// JSON file with per-node task-graph applications
    #[arg(long)]
    ctg: Option<PathBuf>,

    /// Write the ASCII event trace to this file
    #[arg(long)]
    trace_file: Option<PathBuf>,
}

/// One entry of the CTG workload file
#[derive(Debug, Deserialize)]
struct CtgAppSpec {
    node: u32,
    #[serde(flatten)]
    config: CtgConfig,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config = NocConfig {
        flit_size: args.flit_size,
        global_clock: args.global_clock,
        data_packet_speedup: args.data_packet_speedup,
        seed: args.seed,
        ..NocConfig::default()
    };
    config.validate().context("configuration rejected")?;

    let shape = match args.topology.as_str() {
        "mesh" => TopologyShape::Mesh2D { h_size: args.h_size },
        "torus" => TopologyShape::Torus2D { h_size: args.h_size },
        "irvine" => TopologyShape::IrvineMesh2D { h_size: args.h_size },
        other => bail!("unknown topology '{other}'"),
    };
    let routing = match args.routing.as_str() {
        "xy" => RoutingProtocol::Xy { route_x_first: true },
        "yx" => RoutingProtocol::Xy { route_x_first: false },
        "slb" => RoutingProtocol::Slb {
            load_threshold: args.load_threshold,
        },
        "so" => RoutingProtocol::So,
        other => bail!("unknown routing protocol '{other}'"),
    };
    let switching = match args.switching.as_str() {
        "wormhole" => Switching::Wormhole,
        "saf" => Switching::Saf,
        "vct" => Switching::Vct,
        other => bail!("unknown switching protocol '{other}'"),
    };

    let topology = NocTopologyBuilder::new(shape, args.nodes)
        .routing(routing)
        .switching(switching)
        .in_queue_depth(args.in_queue_depth)
        .install(&config)
        .context("topology install failed")?;

    let mut sim = Simulator::new(config, topology).context("simulator setup failed")?;

    if let Some(path) = &args.trace_file {
        let stream = File::create(path)
            .with_context(|| format!("cannot create trace file {}", path.display()))?;
        sim.enable_ascii_trace(stream);
    }

    if let Some(path) = &args.ctg {
        let file = File::open(path)
            .with_context(|| format!("cannot open CTG workload {}", path.display()))?;
        let specs: Vec<CtgAppSpec> =
            serde_json::from_reader(file).context("malformed CTG workload file")?;
        for spec in specs {
            sim.install_ctg_app(NodeId(spec.node), spec.config)
                .with_context(|| format!("CTG application on node {} rejected", spec.node))?;
        }
    } else if let Some(pattern) = args.traffic {
        for node in 0..args.nodes {
            let app = SyncConfig {
                injection_probability: args.injection_probability,
                traffic_pattern: pattern,
                number_of_flits: args.packet_length,
                ..SyncConfig::default()
            };
            sim.install_sync_app(NodeId(node), app)
                .with_context(|| format!("traffic source on node {node} rejected"))?;
        }
    } else {
        // the four-flow demo workload
        for (source, destination) in [(2, 10), (10, 2), (5, 7), (7, 5)] {
            let app = SyncConfig {
                injection_probability: args.injection_probability,
                traffic_pattern: TrafficPattern::DestinationSpecified,
                destination: Some(NodeId(destination)),
                number_of_flits: args.packet_length,
                max_flits: u64::from(args.packet_length),
                ..SyncConfig::default()
            };
            sim.install_sync_app(NodeId(source), app)
                .with_context(|| format!("traffic source on node {source} rejected"))?;
        }
    }

    match args.ticks {
        Some(ticks) => sim.run_until(Time(ticks * args.global_clock))?,
        None => sim.run()?,
    }

    info!(in_flight = sim.in_flight_flits(), "simulation finished");
    println!("{}", serde_json::to_string_pretty(sim.stats())?);
    Ok(())
}
