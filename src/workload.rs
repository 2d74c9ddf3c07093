/// In-process simulated cluster and the `measure(params)` harness entry
/// point (C7).
///
/// `SimCluster` drives a fixed set of [`Node`]s over a single-threaded,
/// deterministic event queue ordered by scheduled fire time — sends carry a
/// fixed simulated network delay, timers fire after the duration the node
/// itself requested. This is the one concrete transport the core needs to
/// be exercised by tests and the simulation binary; `Node` itself never
/// touches it directly.
use crate::context::Context;
use crate::message::{Message, Nonce};
use crate::quorum::NonceGenerator;
use crate::node::{Effect, Node};
use crate::clock::Ordering as ClockOrdering;
use crate::NodeId;
use serde::Serialize;
use std::collections::{BTreeMap, BinaryHeap};
use std::time::Duration;

/// A single client-issued operation against the cluster.
#[derive(Debug, Clone)]
pub enum Operation {
    Get { key: Vec<u8> },
    Put { key: Vec<u8>, value: Vec<u8> },
}

/// Aggregate measurements across a workload run — the `{availability,
/// inconsistency, stale_reads}` triple named by `measure(params)`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Report {
    /// Fraction of operations that received a successful client response.
    pub availability: f64,
    /// Count of get responses that returned more than one sibling — an
    /// unreconciled concurrent write observed by the client.
    pub inconsistency: u64,
    /// Count of get responses whose version was causally behind the most
    /// recent write this harness itself issued for that key.
    pub stale_reads: u64,
}

const NETWORK_DELAY: Duration = Duration::from_millis(10);

struct ScheduledEvent {
    fire_at: Duration,
    seq: u64,
    to: NodeId,
    from: NodeId,
    msg: Message,
}

impl PartialEq for ScheduledEvent {
    fn eq(&self, other: &Self) -> bool {
        self.fire_at == other.fire_at && self.seq == other.seq
    }
}
impl Eq for ScheduledEvent {}

impl PartialOrd for ScheduledEvent {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledEvent {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // BinaryHeap is a max-heap; invert so the earliest fire time sorts first.
        other
            .fire_at
            .cmp(&self.fire_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// A fixed set of nodes driven by a deterministic in-process event queue.
pub struct SimCluster {
    nodes: BTreeMap<NodeId, Node>,
    queue: BinaryHeap<ScheduledEvent>,
    now: Duration,
    seq: u64,
    client_id: NodeId,
    nonce_gen: NonceGenerator,
}

impl SimCluster {
    pub fn new(nodes: Vec<Node>) -> Self {
        let client_id = NodeId::from("workload-client");
        let mut cluster = Self {
            nodes: BTreeMap::new(),
            queue: BinaryHeap::new(),
            now: Duration::ZERO,
            seq: 0,
            nonce_gen: NonceGenerator::new(&client_id),
            client_id,
        };
        let startups: Vec<(NodeId, Vec<Effect>)> = nodes
            .iter()
            .map(|n| (n.id.clone(), n.startup_effects()))
            .collect();
        for node in nodes {
            cluster.nodes.insert(node.id.clone(), node);
        }
        for (id, effects) in startups {
            for effect in effects {
                cluster.apply_effect(id.clone(), effect);
            }
        }
        cluster
    }

    fn schedule(&mut self, from: NodeId, to: NodeId, msg: Message, delay: Duration) {
        self.seq += 1;
        self.queue.push(ScheduledEvent {
            fire_at: self.now + delay,
            seq: self.seq,
            to,
            from,
            msg,
        });
    }

    fn apply_effect(&mut self, from: NodeId, effect: Effect) {
        match effect {
            Effect::Send { to, msg } => self.schedule(from, to, msg, NETWORK_DELAY),
            Effect::SetTimer { after, msg } => self.schedule(from.clone(), from, msg, after),
            Effect::Fatal(reason) => {
                tracing::error!(%from, %reason, "node reported a fatal condition");
            }
        }
    }

    /// Issue one client request at `entry` and wait for the matching
    /// response. A request that never reaches quorum still resolves: the
    /// coordinator's own `client_timeout` fires a `success=false` response
    /// carrying the same nonce, so this always terminates without needing a
    /// queue-drain bound.
    pub fn call(&mut self, entry: &NodeId, op: Operation) -> Option<Message> {
        let nonce = self.nonce_gen.next();
        self.run_operation(entry, nonce, &op)
    }

    /// Issue one client request at `entry` and run the event queue until the
    /// matching response reaches the workload client, or the queue drains
    /// with no such response (treated as unavailable).
    fn run_operation(&mut self, entry: &NodeId, nonce: Nonce, op: &Operation) -> Option<Message> {
        let request = match op {
            Operation::Get { key } => Message::ClientGetRequest {
                nonce,
                key: key.clone(),
            },
            Operation::Put { key, value } => Message::ClientPutRequest {
                nonce,
                key: key.clone(),
                value: value.clone(),
                context: Context::empty(),
            },
        };
        self.schedule(
            self.client_id.clone(),
            entry.clone(),
            request,
            NETWORK_DELAY,
        );

        while let Some(event) = self.queue.pop() {
            self.now = event.fire_at;
            let ScheduledEvent { to, from, msg, .. } = event;

            if to == self.client_id {
                let is_match = matches!(&msg, Message::ClientGetResponse { nonce: n, .. } if *n == nonce)
                    || matches!(&msg, Message::ClientPutResponse { nonce: n, .. } if *n == nonce);
                if is_match {
                    return Some(msg);
                }
                continue;
            }

            let Some(node) = self.nodes.get_mut(&to) else {
                continue;
            };
            let effects = node.handle(from, msg);
            for effect in effects {
                self.apply_effect(to.clone(), effect);
            }
        }
        None
    }

    /// A snapshot of a node's store, for assertions in tests.
    pub fn store_of(&self, id: &NodeId) -> Option<BTreeMap<Vec<u8>, (Vec<Vec<u8>>, Context)>> {
        self.nodes.get(id).map(|n| n.store_snapshot())
    }

    /// Whether `observer` currently believes `peer` is alive, for assertions
    /// in tests (e.g. scenario 6's "a.alive_nodes[gc] == false").
    pub fn believes_alive(&self, observer: &NodeId, peer: &NodeId) -> Option<bool> {
        self.nodes.get(observer).map(|n| n.is_alive(peer))
    }

    /// Deliver a message directly to a node, bypassing the simulated
    /// network delay — used by tests to inject `Crash`/`Recover` and similar
    /// control messages at a precise point in the timeline. Any effects the
    /// handler returns are scheduled normally.
    pub fn inject(&mut self, to: &NodeId, from: NodeId, msg: Message) -> Vec<Effect> {
        let effects = match self.nodes.get_mut(to) {
            Some(node) => node.handle(from, msg),
            None => return Vec::new(),
        };
        for effect in effects.clone() {
            self.apply_effect(to.clone(), effect);
        }
        effects
    }

    /// Convenience over [`Self::inject`] for the two simulated-failure
    /// control messages.
    pub fn crash(&mut self, id: &NodeId) {
        self.inject(id, id.clone(), Message::Crash);
    }

    pub fn recover(&mut self, id: &NodeId) {
        self.inject(id, id.clone(), Message::Recover);
    }

    /// Run the event queue forward by `window` of simulated time, delivering
    /// every event scheduled to fire at or before `now + window`.
    ///
    /// This is bounded by construction rather than by queue exhaustion:
    /// periodic timers (`HealthCheckTimeout`, `MerkleSyncTimeout`) re-arm
    /// themselves forever on every live node, so draining the queue to
    /// empty would never terminate. Used between scenario steps to let
    /// retries, hinted handoff, and anti-entropy settle before the next
    /// assertion or injection.
    pub fn advance_by(&mut self, window: Duration) {
        let deadline = self.now + window;
        while let Some(event) = self.queue.peek() {
            if event.fire_at > deadline {
                break;
            }
            let event = self.queue.pop().expect("peeked Some above");
            self.now = event.fire_at;
            let ScheduledEvent { to, from, msg, .. } = event;
            if to == self.client_id {
                continue;
            }
            let Some(node) = self.nodes.get_mut(&to) else {
                continue;
            };
            let effects = node.handle(from, msg);
            for effect in effects {
                self.apply_effect(to.clone(), effect);
            }
        }
        self.now = deadline;
    }
}

/// Run `ops` against `cluster`, entering the cluster at `entry` for every
/// operation, and report the observed availability/inconsistency/staleness.
pub fn measure(cluster: &mut SimCluster, entry: &NodeId, ops: &[Operation]) -> Report {
    let mut succeeded = 0u64;
    let mut inconsistency = 0u64;
    let mut stale_reads = 0u64;
    let mut last_context: BTreeMap<Vec<u8>, Context> = BTreeMap::new();

    for op in ops {
        let response = cluster.call(entry, op.clone());

        match (op, response) {
            (
                Operation::Get { key },
                Some(Message::ClientGetResponse {
                    success,
                    values,
                    context,
                    ..
                }),
            ) => {
                if success {
                    succeeded += 1;
                    if values.as_ref().is_some_and(|v| v.len() > 1) {
                        inconsistency += 1;
                    }
                    if let (Some(ctx), Some(prior)) = (&context, last_context.get(key)) {
                        if matches!(ctx.compare(prior), ClockOrdering::Before) {
                            stale_reads += 1;
                        }
                    }
                }
            }
            (
                Operation::Put { key, .. },
                Some(Message::ClientPutResponse {
                    success, context, ..
                }),
            ) => {
                if success {
                    succeeded += 1;
                    if let Some(ctx) = context {
                        last_context.insert(key.clone(), ctx);
                    }
                }
            }
            _ => {}
        }
    }

    Report {
        availability: if ops.is_empty() {
            1.0
        } else {
            succeeded as f64 / ops.len() as f64
        },
        inconsistency,
        stale_reads,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeConfig;
    use crate::ring::{HashRingOracle, PreferenceOracle};
    use std::sync::Arc;

    fn single_node_cluster() -> (SimCluster, NodeId) {
        let id = NodeId::from("a");
        let ids = vec![id.clone()];
        let ring: Arc<dyn PreferenceOracle + Send + Sync> = Arc::new(HashRingOracle::new(&ids));
        let node = Node::new(
            id.clone(),
            BTreeMap::new(),
            ids,
            1,
            1,
            1,
            ring,
            NodeConfig::default(),
        );
        (SimCluster::new(vec![node]), id)
    }

    #[test]
    fn put_then_get_round_trips_through_the_sim_cluster() {
        let (mut cluster, entry) = single_node_cluster();
        let ops = vec![
            Operation::Put {
                key: b"k".to_vec(),
                value: b"v1".to_vec(),
            },
            Operation::Get { key: b"k".to_vec() },
        ];
        let report = measure(&mut cluster, &entry, &ops);
        assert_eq!(report.availability, 1.0);
        assert_eq!(report.inconsistency, 0);
    }

    #[test]
    fn empty_workload_reports_full_availability() {
        let (mut cluster, entry) = single_node_cluster();
        let report = measure(&mut cluster, &entry, &[]);
        assert_eq!(report.availability, 1.0);
    }

    #[test]
    fn advance_by_terminates_despite_perpetual_periodic_timers() {
        // Regression: HealthCheckTimeout/MerkleSyncTimeout re-arm themselves
        // forever, so draining the queue to empty must never be the
        // termination condition here.
        let (mut cluster, _entry) = single_node_cluster();
        cluster.advance_by(Duration::from_secs(10));
    }

    #[test]
    fn crash_then_recover_clears_and_restores_liveness() {
        let (mut cluster, entry) = single_node_cluster();
        cluster.call(
            &entry,
            Operation::Put {
                key: b"k".to_vec(),
                value: b"v".to_vec(),
            },
        );
        cluster.crash(&entry);
        assert!(cluster.store_of(&entry).unwrap().is_empty());
        cluster.recover(&entry);
        let report = measure(
            &mut cluster,
            &entry,
            &[Operation::Get { key: b"k".to_vec() }],
        );
        // Crash destroyed the only replica; the recovered node has nothing.
        assert_eq!(report.availability, 1.0);
    }
}
