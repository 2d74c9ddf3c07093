/// Append-only Merkle tree over locally inserted leaf digests.
///
/// Unlike a balanced tree built once from a static, sorted set, this tree
/// grows one leaf at a time and never pads to a power of two: a lone left
/// child at any level simply promotes its own hash upward unchanged. Only
/// the rightmost spine of the tree changes on each insert, so `insert` is
/// `O(log n)` rather than a full rebuild.
///
/// The combining hash is injectable (`Digest`); the default is MD5, since
/// anti-entropy test fixtures hash leaves with MD5 before inserting them.
use crate::error::{RingError, RingResult};
use md5::{Digest as _, Md5};

/// A byte-string-to-byte-string hash used to combine two child digests.
pub type Digest = fn(&[u8]) -> Vec<u8>;

fn md5_digest(bytes: &[u8]) -> Vec<u8> {
    Md5::digest(bytes).to_vec()
}

/// The default combining digest (MD5), exposed so callers building leaves
/// outside the tree (e.g. anti-entropy canonicalization in `node.rs`) hash
/// consistently with the tree's own internal combination.
pub fn default_digest(bytes: &[u8]) -> Vec<u8> {
    md5_digest(bytes)
}

fn combine(digest: Digest, left: &[u8], right: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(left.len() + right.len());
    buf.extend_from_slice(left);
    buf.extend_from_slice(right);
    digest(&buf)
}

/// Result of comparing a receiver's tree against a sender's tree.
///
/// Despite the "sender"/"receiver" naming (the sender pushed a tree summary;
/// the receiver is running the comparison), data flows from receiver to
/// sender here, not the other way around: `From(k)` means the receiver has
/// something at or after leaf `k` worth sending back to the sender, not
/// something it should ask the sender for. A receiver with strictly less
/// data than the sender has nothing to contribute and returns `DoNothing` —
/// convergence in that direction happens when the lagging side later
/// initiates its own sync round as sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Divergence {
    /// The two trees contain the same leaves in the same order.
    Same,
    /// The receiver has nothing worth sending back to the sender.
    DoNothing,
    /// The receiver should send everything from this leaf index onward back
    /// to the sender.
    From(u64),
}

/// An append-only Merkle tree.
#[derive(Debug, Clone)]
pub struct MerkleTree {
    /// `matrix[0]` is leaf digests in insertion order; `matrix[L+1][c]` is
    /// `H(matrix[L][2c] ++ matrix[L][2c+1])`, or `matrix[L][2c]` unchanged
    /// when no right sibling exists yet.
    matrix: Vec<Vec<Vec<u8>>>,
    leaf_count: u64,
    root_level: usize,
    digest: Digest,
}

impl Default for MerkleTree {
    fn default() -> Self {
        Self::new()
    }
}

impl MerkleTree {
    /// An empty tree using the default (MD5) combining digest.
    pub fn new() -> Self {
        Self::with_digest(md5_digest)
    }

    /// An empty tree using a caller-supplied combining digest.
    pub fn with_digest(digest: Digest) -> Self {
        Self {
            matrix: Vec::new(),
            leaf_count: 0,
            root_level: 0,
            digest,
        }
    }

    pub fn leaf_count(&self) -> u64 {
        self.leaf_count
    }

    pub fn root_level(&self) -> usize {
        self.root_level
    }

    pub fn is_empty(&self) -> bool {
        self.leaf_count == 0
    }

    /// Append a leaf digest. The caller is responsible for hashing the
    /// underlying payload beforehand — what's appended here becomes the
    /// level-0 entry directly, not a re-hash of it.
    pub fn insert(&mut self, leaf_digest: &[u8]) {
        if self.matrix.is_empty() {
            self.matrix.push(Vec::new());
        }
        self.matrix[0].push(leaf_digest.to_vec());
        self.leaf_count += 1;

        let mut level = 0;
        loop {
            let cur_len = self.matrix[level].len();
            if cur_len == 1 {
                self.root_level = level;
                break;
            }
            let next_len = cur_len.div_ceil(2);
            if self.matrix.len() == level + 1 {
                self.matrix.push(Vec::new());
            }
            let c = next_len - 1;
            let left = self.matrix[level][2 * c].clone();
            let hash = match self.matrix[level].get(2 * c + 1) {
                Some(right) => combine(self.digest, &left, right),
                None => left,
            };
            if self.matrix[level + 1].len() == c {
                self.matrix[level + 1].push(hash);
            } else {
                self.matrix[level + 1][c] = hash;
            }
            level += 1;
        }
    }

    /// Boundary entry point for anti-entropy payloads that arrive as loosely
    /// typed JSON: accepts only a JSON string, treating anything else as a
    /// fatal boundary violation rather than a retryable failure.
    pub fn insert_json(&mut self, value: &serde_json::Value) -> RingResult<()> {
        match value.as_str() {
            Some(s) => {
                self.insert(s.as_bytes());
                Ok(())
            }
            None => Err(RingError::BadInput(format!(
                "merkle insert requires a byte string, got {value}"
            ))),
        }
    }

    /// Snapshot the full digest matrix, for shipping a tree summary to a
    /// peer during anti-entropy (see `Message::MerkleSummary`).
    pub fn matrix_snapshot(&self) -> Vec<Vec<Vec<u8>>> {
        self.matrix.clone()
    }

    /// Reconstruct a tree shell from a peer's snapshot, for running
    /// `compare_tree` locally against it. The digest function is never
    /// invoked on a reconstructed tree (it cannot grow further), so the
    /// default is used as a placeholder.
    pub fn from_snapshot(matrix: Vec<Vec<Vec<u8>>>, leaf_count: u64, root_level: usize) -> Self {
        Self {
            matrix,
            leaf_count,
            root_level,
            digest: md5_digest,
        }
    }

    /// The root digest, or `None` (the `NoRoot` sentinel) when empty.
    pub fn root_hash(&self) -> Option<Vec<u8>> {
        if self.leaf_count == 0 {
            None
        } else {
            Some(self.matrix[self.root_level][0].clone())
        }
    }

    /// Compare `self` (the receiver) against `sender`'s tree, returning the
    /// instruction for which leaves the receiver should pull.
    pub fn compare_tree(&self, sender: &MerkleTree) -> Divergence {
        let receiver = self;
        match (sender.leaf_count, receiver.leaf_count) {
            (0, 0) => Divergence::Same,
            (0, _) => Divergence::From(0),
            (_, 0) => Divergence::DoNothing,
            _ if sender.root_level > receiver.root_level => Divergence::DoNothing,
            _ if receiver.root_level > sender.root_level => Divergence::From(0),
            _ => {
                let root_level = receiver.root_level;
                if sender.matrix[root_level][0] == receiver.matrix[root_level][0] {
                    return Divergence::Same;
                }

                let mut divergence_leaf: u64 = 0;
                for level in (0..root_level).rev() {
                    let s_level = &sender.matrix[level];
                    let r_level = &receiver.matrix[level];
                    let common = s_level.len().min(r_level.len());
                    let mismatch_col = (0..common)
                        .find(|&c| s_level[c] != r_level[c])
                        .unwrap_or(common);
                    let candidate = (mismatch_col as u64) << level;
                    divergence_leaf = divergence_leaf.max(candidate);
                }

                let idx = divergence_leaf as usize;
                let l0_matches = sender
                    .matrix
                    .first()
                    .zip(receiver.matrix.first())
                    .is_some_and(|(s0, r0)| {
                        idx < s0.len() && idx < r0.len() && s0[idx] == r0[idx]
                    });
                if l0_matches {
                    divergence_leaf += 1;
                }
                Divergence::From(divergence_leaf)
            }
        }
    }
}
