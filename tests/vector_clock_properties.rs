//! Property-based verification of the vector clock and Merkle tree
//! invariants named in spec §8: `combine` forms a commutative, associative,
//! idempotent join; `tick` only ever advances the ticking node's own
//! component; `compare` is mirror-paired between operands; Merkle
//! `compare_tree` round-trips to `Same` for any tree compared with itself.

use proptest::prelude::*;
use ringvault::{ClockOrdering, MerkleTree, NodeId, VectorClock};

fn arbitrary_node_id() -> impl Strategy<Value = NodeId> {
    prop::sample::select(vec!["a", "b", "c", "d", "e"]).prop_map(NodeId::from)
}

fn arbitrary_clock() -> impl Strategy<Value = VectorClock> {
    prop::collection::vec(arbitrary_node_id(), 0..20).prop_map(|ticks| {
        let mut vc = VectorClock::new();
        for id in ticks {
            vc.tick(&id);
        }
        vc
    })
}

proptest! {
    #[test]
    fn combine_is_commutative(a in arbitrary_clock(), b in arbitrary_clock()) {
        prop_assert_eq!(a.combine(&b), b.combine(&a));
    }

    #[test]
    fn combine_is_associative(a in arbitrary_clock(), b in arbitrary_clock(), c in arbitrary_clock()) {
        prop_assert_eq!(a.combine(&b).combine(&c), a.combine(&b.combine(&c)));
    }

    #[test]
    fn combine_is_idempotent(a in arbitrary_clock()) {
        prop_assert_eq!(a.combine(&a), a);
    }

    #[test]
    fn tick_advances_only_the_named_component(
        a in arbitrary_clock(),
        id in arbitrary_node_id(),
        others in prop::collection::vec(arbitrary_node_id(), 0..5),
    ) {
        let mut ticked = a.clone();
        ticked.tick(&id);
        prop_assert_eq!(ticked.get(&id), a.get(&id) + 1);
        for other in others {
            if other != id {
                prop_assert_eq!(ticked.get(&other), a.get(&other));
            }
        }
    }

    #[test]
    fn compare_is_mirror_paired(a in arbitrary_clock(), b in arbitrary_clock()) {
        let forward = a.compare(&b);
        let backward = b.compare(&a);
        let mirrored = matches!(
            (forward, backward),
            (ClockOrdering::Before, ClockOrdering::After)
                | (ClockOrdering::After, ClockOrdering::Before)
                | (ClockOrdering::Concurrent, ClockOrdering::Concurrent)
        );
        prop_assert!(mirrored);
    }

    #[test]
    fn merkle_tree_compares_same_to_itself(
        leaves in prop::collection::vec(prop::collection::vec(any::<u8>(), 1..16), 0..30),
    ) {
        let mut tree = MerkleTree::new();
        for leaf in &leaves {
            tree.insert(leaf);
        }
        prop_assert_eq!(tree.leaf_count(), leaves.len() as u64);
        prop_assert_eq!(tree.compare_tree(&tree.clone()), ringvault::Divergence::Same);
    }
}
