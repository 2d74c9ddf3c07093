/// Context: a vector clock paired with an optional hinted-handoff target.
use crate::clock::{Ordering, VectorClock};
use crate::NodeId;
use serde::{Deserialize, Serialize};

/// Versioning metadata carried alongside every stored value.
///
/// `hint` names the node a write was originally intended for, when that
/// node was dead at write time (see hinted handoff, C6 §4.7). It is `None`
/// for values written directly to their natural owner.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Context {
    pub version: VectorClock,
    pub hint: Option<NodeId>,
}

impl Context {
    pub fn new(version: VectorClock, hint: Option<NodeId>) -> Self {
        Self { version, hint }
    }

    /// A fresh context with no causal history and no hint.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Same partial order as the wrapped vector clock.
    pub fn compare(&self, other: &Context) -> Ordering {
        self.version.compare(&other.version)
    }

    /// Combine two contexts. If one strictly precedes the other, the later
    /// one wins outright (its hint included). If concurrent, the clocks
    /// combine and the left operand's hint wins when present, else the
    /// right's.
    pub fn combine(&self, other: &Context) -> Context {
        match self.compare(other) {
            Ordering::Before => other.clone(),
            Ordering::After => self.clone(),
            Ordering::Concurrent => Context {
                version: self.version.combine(&other.version),
                hint: self.hint.clone().or_else(|| other.hint.clone()),
            },
        }
    }

    /// Return a copy of this context with the hint cleared — used when a
    /// participant answers the node that is itself the intended coordinator
    /// for a key (the hint only matters for handoff, not for the asker).
    pub fn without_hint(&self) -> Context {
        Context {
            version: self.version.clone(),
            hint: None,
        }
    }
}
