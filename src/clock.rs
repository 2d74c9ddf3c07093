/// Vector clocks for causal ordering between replicas.
///
/// A vector clock tracks one monotonic counter per writer. Components are
/// compared pointwise; a missing component is treated as zero. Unlike a
/// typical vector-clock implementation, two clocks with identical (or both
/// empty) contents compare as [`Ordering::Concurrent`], never `Equal` — see
/// the note on [`VectorClock::compare`].
use crate::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The result of comparing two vector clocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ordering {
    /// `self` happened strictly before `other`.
    Before,
    /// `self` happened strictly after `other`.
    After,
    /// Neither dominates the other — including the case where both clocks
    /// are identical. A coordinator relies on this to treat two
    /// independently-seeded writes as siblings unless one explicitly
    /// descends from the other.
    Concurrent,
}

/// Per-writer counter map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorClock {
    counters: BTreeMap<NodeId, u64>,
}

impl VectorClock {
    /// An empty clock — every component implicitly zero.
    pub fn new() -> Self {
        Self {
            counters: BTreeMap::new(),
        }
    }

    /// The counter for `id`, or zero if absent.
    pub fn get(&self, id: &NodeId) -> u64 {
        self.counters.get(id).copied().unwrap_or(0)
    }

    /// Increment `id`'s own component by one. A node must only ever tick
    /// its own id; the type does not enforce this, the caller does.
    pub fn tick(&mut self, id: &NodeId) {
        *self.counters.entry(id.clone()).or_insert(0) += 1;
    }

    /// Pointwise maximum of two clocks. Commutative, associative, and
    /// idempotent (`combine(a, a) == a`).
    pub fn combine(&self, other: &VectorClock) -> VectorClock {
        let mut result = self.clone();
        for (id, count) in &other.counters {
            let entry = result.counters.entry(id.clone()).or_insert(0);
            *entry = (*entry).max(*count);
        }
        result
    }

    /// Partial-order comparison over the union of known writers.
    ///
    /// Two clocks that are byte-for-byte identical — including two empty
    /// clocks — compare `Concurrent`, not `Before`/`After`/`Equal`. This
    /// keeps replayed or independently-seeded writes from being silently
    /// ordered against each other; see spec design notes for the rationale.
    pub fn compare(&self, other: &VectorClock) -> Ordering {
        let mut self_ahead = false;
        let mut other_ahead = false;

        let mut ids: Vec<&NodeId> = self.counters.keys().chain(other.counters.keys()).collect();
        ids.sort();
        ids.dedup();

        for id in ids {
            let a = self.get(id);
            let b = other.get(id);
            match a.cmp(&b) {
                std::cmp::Ordering::Less => other_ahead = true,
                std::cmp::Ordering::Greater => self_ahead = true,
                std::cmp::Ordering::Equal => {}
            }
        }

        match (self_ahead, other_ahead) {
            (true, false) => Ordering::After,
            (false, true) => Ordering::Before,
            _ => Ordering::Concurrent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(s: &str) -> NodeId {
        NodeId::from(s)
    }

    #[test]
    fn tick_increments_only_named_component() {
        let mut vc = VectorClock::new();
        vc.tick(&node("a"));
        vc.tick(&node("a"));
        vc.tick(&node("b"));
        assert_eq!(vc.get(&node("a")), 2);
        assert_eq!(vc.get(&node("b")), 1);
        assert_eq!(vc.get(&node("c")), 0);
    }

    #[test]
    fn combine_is_commutative_associative_idempotent() {
        let mut a = VectorClock::new();
        a.tick(&node("a"));
        let mut b = VectorClock::new();
        b.tick(&node("b"));
        b.tick(&node("b"));

        assert_eq!(a.combine(&b), b.combine(&a));
        assert_eq!(a.combine(&a), a);

        let mut c = VectorClock::new();
        c.tick(&node("c"));
        assert_eq!(a.combine(&b).combine(&c), a.combine(&b.combine(&c)));
    }

    #[test]
    fn two_empty_clocks_are_concurrent() {
        let a = VectorClock::new();
        let b = VectorClock::new();
        assert_eq!(a.compare(&b), Ordering::Concurrent);
    }

    #[test]
    fn identical_nonempty_clocks_are_concurrent() {
        let mut a = VectorClock::new();
        a.tick(&node("a"));
        let b = a.clone();
        assert_eq!(a.compare(&b), Ordering::Concurrent);
    }

    #[test]
    fn strict_descendant_compares_after() {
        let mut a = VectorClock::new();
        a.tick(&node("a"));
        let mut b = a.clone();
        b.tick(&node("a"));
        assert_eq!(b.compare(&a), Ordering::After);
        assert_eq!(a.compare(&b), Ordering::Before);
    }

    #[test]
    fn disjoint_components_are_concurrent() {
        let mut a = VectorClock::new();
        a.tick(&node("a"));
        let mut b = VectorClock::new();
        b.tick(&node("b"));
        assert_eq!(a.compare(&b), Ordering::Concurrent);
        assert_eq!(b.compare(&a), Ordering::Concurrent);
    }

    #[test]
    fn compare_mirrors_between_operands() {
        let mut a = VectorClock::new();
        a.tick(&node("a"));
        let mut b = a.clone();
        b.tick(&node("b"));

        let forward = a.compare(&b);
        let backward = b.compare(&a);
        match (forward, backward) {
            (Ordering::Before, Ordering::After) => {}
            (Ordering::After, Ordering::Before) => {}
            (Ordering::Concurrent, Ordering::Concurrent) => {}
            other => panic!("compare not mirror-paired: {:?}", other),
        }
    }
}
