/// Preference-list computation over an opaque consistent-hash ring.
///
/// The ring itself is treated as an external collaborator: the node core
/// only ever calls `pref(key, k)` to get the top-`k` node ids for a key in
/// ring order. `HashRingOracle` is one concrete, swappable implementation;
/// nothing else in this crate depends on its internals.
use crate::NodeId;
use std::collections::BTreeMap;

/// Returns the top-`k` node ids for `key`, in ring order.
pub trait PreferenceOracle {
    fn pref(&self, key: &[u8], k: usize) -> Vec<NodeId>;
}

/// A consistent-hash ring with virtual nodes, using a stable 64-bit hash.
///
/// This is a reference implementation, not a claim about any particular
/// production ring algorithm — placement is treated as opaque and
/// swappable; any stable ordering over node ids satisfies the contract the
/// core depends on.
#[derive(Debug, Clone)]
pub struct HashRingOracle {
    /// Ring position -> owning node, sorted by position.
    ring: BTreeMap<u64, NodeId>,
}

const VIRTUAL_NODES_PER_ID: u32 = 32;

impl HashRingOracle {
    pub fn new(node_ids: &[NodeId]) -> Self {
        let mut ring = BTreeMap::new();
        for id in node_ids {
            for v in 0..VIRTUAL_NODES_PER_ID {
                let pos = hash_u64(&vnode_key(id, v));
                ring.insert(pos, id.clone());
            }
        }
        Self { ring }
    }
}

fn vnode_key(id: &NodeId, v: u32) -> Vec<u8> {
    let mut buf = id.as_str().as_bytes().to_vec();
    buf.extend_from_slice(&v.to_le_bytes());
    buf
}

fn hash_u64(bytes: &[u8]) -> u64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    let mut hasher = DefaultHasher::new();
    bytes.hash(&mut hasher);
    hasher.finish()
}

impl PreferenceOracle for HashRingOracle {
    fn pref(&self, key: &[u8], k: usize) -> Vec<NodeId> {
        if self.ring.is_empty() || k == 0 {
            return Vec::new();
        }
        let start = hash_u64(key);
        let mut result = Vec::with_capacity(k);
        for (_, id) in self.ring.range(start..).chain(self.ring.range(..start)) {
            if !result.contains(id) {
                result.push(id.clone());
            }
            if result.len() == k {
                break;
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(names: &[&str]) -> Vec<NodeId> {
        names.iter().map(|n| NodeId::from(*n)).collect()
    }

    #[test]
    fn pref_returns_k_distinct_nodes() {
        let ring = HashRingOracle::new(&ids(&["a", "b", "c", "d"]));
        let list = ring.pref(b"foo", 3);
        assert_eq!(list.len(), 3);
        let mut sorted = list.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), 3);
    }

    #[test]
    fn pref_is_deterministic_for_same_key() {
        let ring = HashRingOracle::new(&ids(&["a", "b", "c"]));
        assert_eq!(ring.pref(b"foo", 2), ring.pref(b"foo", 2));
    }

    #[test]
    fn pref_caps_at_cluster_size() {
        let ring = HashRingOracle::new(&ids(&["a", "b"]));
        assert_eq!(ring.pref(b"foo", 5).len(), 2);
    }
}
