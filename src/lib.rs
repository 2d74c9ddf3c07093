//! # ringvault
//!
//! An eventually-consistent, replicated key-value store: quorum reads and
//! writes over a consistent-hash ring, vector-clock versioning with sibling
//! reconciliation on read, hinted handoff for transient failures, and
//! Merkle-tree anti-entropy for long-lived divergence.
//!
//! The core is transport-agnostic: [`Node`] is a synchronous state machine
//! (`handle(from, message) -> Vec<Effect>`) that never performs I/O itself.
//! [`workload`] and `src/bin/ringvault-sim.rs` drive it over an in-process
//! simulated network for testing and measurement.

mod clock;
mod config;
mod context;
mod error;
mod identity;
mod merkle;
mod message;
mod node;
mod quorum;
mod ring;
pub mod workload;

pub use clock::{Ordering as ClockOrdering, VectorClock};
pub use config::NodeConfig;
pub use context::Context;
pub use error::{RingError, RingResult};
pub use identity::NodeId;
pub use merkle::{Divergence, MerkleTree};
pub use message::{Message, Nonce, RequestKind, ValueSet};
pub use node::{Effect, Node};
pub use quorum::{GetEntry, NonceGenerator, PutEntry, QuorumTracker, RedirectEntry};
pub use ring::{HashRingOracle, PreferenceOracle};

/// Prelude module for convenient imports.
///
/// ```ignore
/// use ringvault::prelude::*;
/// ```
pub mod prelude {
    pub use crate::clock::{Ordering as ClockOrdering, VectorClock};
    pub use crate::config::NodeConfig;
    pub use crate::context::Context;
    pub use crate::error::{RingError, RingResult};
    pub use crate::identity::NodeId;
    pub use crate::message::{Message, Nonce, RequestKind, ValueSet};
    pub use crate::node::{Effect, Node};
    pub use crate::ring::{HashRingOracle, PreferenceOracle};
}

// ============================================================================
// Logging and Observability
// ============================================================================

/// Initialize the logging system.
///
/// This should be called once at application startup. It configures the
/// tracing subscriber with an environment filter.
///
/// The log level can be controlled via the `RINGVAULT_LOG` environment
/// variable:
/// - `RINGVAULT_LOG=error` - Only errors
/// - `RINGVAULT_LOG=warn` - Errors and warnings
/// - `RINGVAULT_LOG=info` - General information (default)
/// - `RINGVAULT_LOG=debug` - Debug information
/// - `RINGVAULT_LOG=trace` - Verbose tracing
pub fn init_logging() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::EnvFilter;

    let filter =
        EnvFilter::try_from_env("RINGVAULT_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

/// Initialize logging with a specific level, bypassing the environment.
pub fn init_logging_with_level(level: &str) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::new(level);

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}
