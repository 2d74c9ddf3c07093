/// Simulation driver: wires a fixed set of in-process nodes into a
/// [`SimCluster`], runs a simple synthetic workload through it, and prints
/// the resulting availability/inconsistency/staleness report as JSON.
use clap::Parser;
use ringvault::prelude::*;
use ringvault::workload::{measure, Operation, SimCluster};
use ringvault::{HashRingOracle, PreferenceOracle};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "ringvault-sim", about = "Run a synthetic workload against an in-process ringvault cluster")]
struct Args {
    /// Number of nodes in the simulated cluster.
    #[arg(long, default_value_t = 5)]
    nodes: usize,

    /// Replication factor.
    #[arg(long, default_value_t = 3)]
    n: usize,

    /// Read quorum.
    #[arg(long, default_value_t = 2)]
    r: usize,

    /// Write quorum.
    #[arg(long, default_value_t = 2)]
    w: usize,

    /// Number of put/get pairs to run through the cluster.
    #[arg(long, default_value_t = 50)]
    ops: usize,
}

fn main() {
    ringvault::init_logging();
    let args = Args::parse();

    let ids: Vec<NodeId> = (0..args.nodes)
        .map(|i| NodeId::from(format!("node-{i}")))
        .collect();
    let ring: Arc<dyn PreferenceOracle + Send + Sync> = Arc::new(HashRingOracle::new(&ids));

    let nodes: Vec<Node> = ids
        .iter()
        .map(|id| {
            Node::new(
                id.clone(),
                BTreeMap::new(),
                ids.clone(),
                args.n,
                args.r,
                args.w,
                ring.clone(),
                NodeConfig::default(),
            )
        })
        .collect();

    let mut cluster = SimCluster::new(nodes);
    let entry = ids[0].clone();

    let mut ops = Vec::with_capacity(args.ops * 2);
    for i in 0..args.ops {
        let key = format!("key-{}", i % (args.ops / 5).max(1)).into_bytes();
        ops.push(Operation::Put {
            key: key.clone(),
            value: format!("value-{i}").into_bytes(),
        });
        ops.push(Operation::Get { key });
    }

    let report = measure(&mut cluster, &entry, &ops);
    println!(
        "{}",
        serde_json::to_string_pretty(&report).expect("report serializes")
    );
}
