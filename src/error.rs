/// Error types for ringvault node operations.
///
/// All fallible operations return `Result<T, RingError>`. The taxonomy
/// mirrors the two treatments a node gives failures: retryable conditions
/// never reach this type (they are handled internally by the tracker), while
/// everything here is either a client-visible failure or a fatal
/// programmer-error condition that must stop the node.
use thiserror::Error;

/// The error type for ringvault operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RingError {
    /// No member of the preference list for this key could be reached.
    #[error("no live coordinator for key")]
    NoLiveCoordinator,

    /// The client timeout fired before quorum was reached.
    #[error("client request timed out")]
    ClientTimeout,

    /// Input failed a boundary check (e.g. a non-byte-string Merkle insert).
    #[error("bad input: {0}")]
    BadInput(String),

    /// A message arrived that the node's dispatcher does not recognise, or
    /// whose nonce/kind pairing is impossible. Fatal: the node must stop.
    #[error("unhandled message: {0}")]
    UnhandledMessage(String),

    /// Any other invariant violation (e.g. a duplicate nonce).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type alias for ringvault operations.
pub type RingResult<T> = Result<T, RingError>;
