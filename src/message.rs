/// Wire and timer message types exchanged between nodes.
///
/// Every inbound item (message or fired timer) carries enough information
/// for the dispatcher to match it exhaustively — see [`crate::node::Node::handle`].
use crate::context::Context;
use crate::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-request correlator. Generated by [`crate::quorum::NonceGenerator`]
/// rather than the source's 1-in-10^9 RNG, making collisions structurally
/// impossible instead of merely unlikely (see design notes).
pub type Nonce = u64;

/// Which of the two client request kinds a tracker entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestKind {
    Get,
    Put,
}

/// A value bundled with its versioning context, as carried over the wire.
pub type ValueSet = Vec<Vec<u8>>;

/// All messages a node's dispatcher can receive, client-facing and
/// node-to-node alike. Timers are modeled the same way (tagged self-sends)
/// so they flow through the same `match`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    // -- client <-> node --
    ClientGetRequest {
        nonce: Nonce,
        key: Vec<u8>,
    },
    ClientGetResponse {
        nonce: Nonce,
        success: bool,
        values: Option<ValueSet>,
        context: Option<Context>,
    },
    ClientPutRequest {
        nonce: Nonce,
        key: Vec<u8>,
        value: Vec<u8>,
        context: Context,
    },
    ClientPutResponse {
        nonce: Nonce,
        success: bool,
        value: Option<Vec<u8>>,
        context: Option<Context>,
    },

    // -- node <-> node --
    CoordinatorGetRequest {
        nonce: Nonce,
        key: Vec<u8>,
    },
    CoordinatorGetResponse {
        nonce: Nonce,
        values: ValueSet,
        context: Context,
    },
    CoordinatorPutRequest {
        nonce: Nonce,
        key: Vec<u8>,
        value: Vec<u8>,
        context: Context,
    },
    CoordinatorPutResponse {
        nonce: Nonce,
    },
    RedirectedClientRequest {
        client: NodeId,
        request: Box<Message>,
    },
    RedirectAcknowledgement {
        nonce: Nonce,
    },
    HandoffRequest {
        nonce: Nonce,
        data: BTreeMap<Vec<u8>, (ValueSet, Context)>,
    },
    HandoffResponse {
        nonce: Nonce,
    },
    AliveCheckRequest,
    AliveCheckResponse,
    Crash,
    Recover,
    GetStateRequest {
        nonce: Nonce,
    },
    GetStateResponse {
        nonce: Nonce,
        state: String,
    },

    // -- timers (self-sent, tagged) --
    ClientTimeout {
        kind: RequestKind,
        nonce: Nonce,
    },
    CoordinatorRequestTimeout {
        kind: RequestKind,
        nonce: Nonce,
        peer: NodeId,
    },
    RedirectTimeout {
        nonce: Nonce,
        failed_coord: NodeId,
    },
    HandoffTimeout {
        nonce: Nonce,
        peer: NodeId,
    },
    HealthCheckTimeout,
    MerkleSyncTimeout,

    // -- anti-entropy exchange (resolves the on-wire framing left open by
    //    `compare_tree`'s divergence protocol; see design notes) --
    /// A node periodically pushes a snapshot of its Merkle tree to a peer
    /// (the sync initiator, in `compare_tree`'s "sender" role) to find out
    /// whether the peer is holding anything the initiator lacks.
    MerkleSummary {
        nonce: Nonce,
        leaf_count: u64,
        root_level: usize,
        matrix: Vec<Vec<Vec<u8>>>,
    },
    /// The peer compared trees and had nothing to contribute back (`Same`
    /// or `DoNothing`).
    MerkleSummaryAck {
        nonce: Nonce,
    },
    /// The peer's `compare_tree` found it holds entries from `from_leaf`
    /// onward (canonical sorted-key order) that the summary's sender does
    /// not; those entries are pushed back directly, unsolicited.
    MerkleCatchUp {
        nonce: Nonce,
        entries: BTreeMap<Vec<u8>, (ValueSet, Context)>,
    },
}
