/// Per-nonce pending state for in-flight gets and puts, plus nonce minting.
///
/// Five dictionaries as named in the design: two quorum trackers, one
/// redirect tracker, one in-flight handoff tracker, and (implicitly) the
/// per-peer `coordinator_request_timeout` timers the node arms directly
/// through [`crate::node::Effect::SetTimer`] rather than a sixth map.
use crate::context::Context;
use crate::message::{Message, Nonce, RequestKind, ValueSet};
use crate::NodeId;
use std::collections::{BTreeMap, BTreeSet};

/// Mints nonces that cannot collide within a node's lifetime: a per-node
/// monotonic counter in the low 32 bits, a hash of the node id in the high
/// 32 bits. This replaces the source's 1-in-10^9 RNG, which the design
/// notes flag as a redesign target — collisions become structurally
/// impossible instead of merely rare, while `Node` still treats an
/// encountered duplicate nonce as the fatal invariant violation §7
/// requires (reachable only via a malformed peer).
#[derive(Debug, Clone)]
pub struct NonceGenerator {
    high_bits: u64,
    counter: u32,
}

impl NonceGenerator {
    pub fn new(id: &NodeId) -> Self {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};
        let mut hasher = DefaultHasher::new();
        id.hash(&mut hasher);
        Self {
            high_bits: (hasher.finish() & 0xFFFF_FFFF) << 32,
            counter: 0,
        }
    }

    pub fn next(&mut self) -> Nonce {
        self.counter = self.counter.wrapping_add(1);
        self.high_bits | (self.counter as u64)
    }
}

/// Pending state for a coordinator-initiated quorum get.
#[derive(Debug, Clone)]
pub struct GetEntry {
    pub client: NodeId,
    pub key: Vec<u8>,
    pub responses: BTreeMap<NodeId, (ValueSet, Context)>,
    pub requested: BTreeSet<NodeId>,
}

/// Pending state for a coordinator-initiated quorum put.
#[derive(Debug, Clone)]
pub struct PutEntry {
    pub client: NodeId,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub context: Context,
    pub responses: BTreeSet<NodeId>,
    /// Peer -> hint forwarded with its request, if any.
    pub requested: BTreeMap<NodeId, Option<NodeId>>,
    pub last_requested_index: usize,
}

/// A client request parked at a non-coordinator node awaiting a redirect
/// acknowledgement.
#[derive(Debug, Clone)]
pub struct RedirectEntry {
    pub client: NodeId,
    pub request: Message,
    pub kind: RequestKind,
}

/// The five nonce-keyed dictionaries driving request routing.
#[derive(Debug, Clone, Default)]
pub struct QuorumTracker {
    pub gets_queue: BTreeMap<Nonce, GetEntry>,
    pub puts_queue: BTreeMap<Nonce, PutEntry>,
    pub redirect_queue: BTreeMap<Nonce, RedirectEntry>,
    /// target node -> nonce -> in-flight hinted entries.
    pub handoffs_queue: BTreeMap<NodeId, BTreeMap<Nonce, BTreeMap<Vec<u8>, Context>>>,
}

impl QuorumTracker {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nonce_generator_never_repeats_within_a_node() {
        let mut gen = NonceGenerator::new(&NodeId::from("a"));
        let mut seen = BTreeSet::new();
        for _ in 0..10_000 {
            assert!(seen.insert(gen.next()));
        }
    }

    #[test]
    fn nonce_generators_for_different_nodes_occupy_different_ranges() {
        let mut a = NonceGenerator::new(&NodeId::from("a"));
        let mut b = NonceGenerator::new(&NodeId::from("b"));
        let na = a.next();
        let nb = b.next();
        // Overwhelmingly likely given the hashed high bits; guards against
        // a regression that forgets to mix in the node id at all.
        assert_ne!(na >> 32, 0);
        assert_ne!(nb >> 32, 0);
    }
}
