/// The per-node coordinator/participant state machine.
///
/// A `Node` is a single-threaded cooperative actor: [`Node::handle`] is a
/// pure function from `(state, inbound message)` to `(state', effects)`.
/// Nothing inside it blocks or touches another node's state; the caller
/// (an in-process simulation, or eventually a real transport) is
/// responsible for executing the returned [`Effect`]s — delivering sends
/// and scheduling timers, which themselves arrive back as messages.
use crate::clock::Ordering as ClockOrdering;
use crate::config::NodeConfig;
use crate::context::Context;
use crate::error::RingError;
use crate::merkle::{self, Divergence, MerkleTree};
use crate::message::{Message, Nonce, RequestKind, ValueSet};
use crate::quorum::{GetEntry, NonceGenerator, PutEntry, QuorumTracker, RedirectEntry};
use crate::ring::PreferenceOracle;
use crate::NodeId;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

/// Everything a handler can ask the embedding transport to do. `Node` never
/// performs I/O itself.
#[derive(Debug, Clone)]
pub enum Effect {
    Send { to: NodeId, msg: Message },
    SetTimer { after: Duration, msg: Message },
    /// An invariant violation the node cannot recover from; the embedding
    /// transport must treat this as a crash-worthy condition.
    Fatal(RingError),
}

type StoredValue = (ValueSet, Context);

/// Per-node, single-owner replica state.
pub struct Node {
    pub id: NodeId,
    n: usize,
    r: usize,
    w: usize,
    store: BTreeMap<Vec<u8>, StoredValue>,
    alive: BTreeMap<NodeId, bool>,
    all_node_ids: Vec<NodeId>,
    ring: Arc<dyn PreferenceOracle + Send + Sync>,
    tracker: QuorumTracker,
    nonce_gen: NonceGenerator,
    config: NodeConfig,
    crashed: bool,
    /// Rotates the anti-entropy partner through every alive peer in turn,
    /// rather than always picking the same one. A fixed partner (e.g.
    /// "lowest alive id") can never reach a peer that never sorts first;
    /// round-robin guarantees every alive peer is contacted at least once
    /// every `alive.len()` sync rounds.
    sync_round: u64,
}

fn sort_unique(mut values: ValueSet) -> ValueSet {
    values.sort();
    values.dedup();
    values
}

fn merge_values(a: StoredValue, b: StoredValue) -> StoredValue {
    match a.1.compare(&b.1) {
        ClockOrdering::Before => b,
        ClockOrdering::After => a,
        ClockOrdering::Concurrent => {
            let mut values = a.0;
            values.extend(b.0);
            (sort_unique(values), a.1.combine(&b.1))
        }
    }
}

fn merge_all(responses: &BTreeMap<NodeId, StoredValue>) -> StoredValue {
    responses
        .values()
        .cloned()
        .reduce(merge_values)
        .unwrap_or_else(|| (Vec::new(), Context::empty()))
}

fn request_key(request: &Message) -> Vec<u8> {
    match request {
        Message::ClientGetRequest { key, .. } => key.clone(),
        Message::ClientPutRequest { key, .. } => key.clone(),
        _ => Vec::new(),
    }
}

fn fail_client(kind: RequestKind, nonce: Nonce, client: NodeId) -> Effect {
    let msg = match kind {
        RequestKind::Get => Message::ClientGetResponse {
            nonce,
            success: false,
            values: None,
            context: None,
        },
        RequestKind::Put => Message::ClientPutResponse {
            nonce,
            success: false,
            value: None,
            context: None,
        },
    };
    Effect::Send { to: client, msg }
}

#[derive(Serialize)]
struct StoreEntrySnapshot {
    key: Vec<u8>,
    values: ValueSet,
    context: Context,
}

impl Node {
    /// `initial_data` is filtered to keys this node owns (`id` appears in
    /// its preference list); everything else is discarded, matching the
    /// seeding rule in §6.
    pub fn new(
        id: NodeId,
        initial_data: BTreeMap<Vec<u8>, Vec<u8>>,
        all_node_ids: Vec<NodeId>,
        n: usize,
        r: usize,
        w: usize,
        ring: Arc<dyn PreferenceOracle + Send + Sync>,
        config: NodeConfig,
    ) -> Self {
        let alive = all_node_ids
            .iter()
            .filter(|peer| **peer != id)
            .map(|peer| (peer.clone(), true))
            .collect();

        let mut store = BTreeMap::new();
        for (key, value) in initial_data {
            if ring.pref(&key, n).contains(&id) {
                store.insert(key, (vec![value], Context::empty()));
            }
        }

        let nonce_gen = NonceGenerator::new(&id);
        Self {
            id,
            n,
            r,
            w,
            store,
            alive,
            all_node_ids,
            ring,
            tracker: QuorumTracker::new(),
            nonce_gen,
            config,
            crashed: false,
            sync_round: 0,
        }
    }

    /// Effects to arm the node's periodic timers; call once after `new`.
    pub fn startup_effects(&self) -> Vec<Effect> {
        vec![
            Effect::SetTimer {
                after: self.config.health_check_interval,
                msg: Message::HealthCheckTimeout,
            },
            Effect::SetTimer {
                after: self.config.merkle_sync_interval,
                msg: Message::MerkleSyncTimeout,
            },
        ]
    }

    pub fn is_alive(&self, peer: &NodeId) -> bool {
        *peer == self.id || self.alive.get(peer).copied().unwrap_or(false)
    }

    pub fn is_crashed(&self) -> bool {
        self.crashed
    }

    /// A snapshot of the current store, for tests and `GetStateResponse`.
    pub fn store_snapshot(&self) -> BTreeMap<Vec<u8>, StoredValue> {
        self.store.clone()
    }

    // -- preference / liveness (C4) --

    fn preference(&self, key: &[u8]) -> Vec<NodeId> {
        self.ring.pref(key, self.n)
    }

    fn is_coordinator(&self, key: &[u8]) -> bool {
        self.preference(key).contains(&self.id)
    }

    fn first_alive_coordinator(&self, key: &[u8]) -> Option<NodeId> {
        self.preference(key)
            .into_iter()
            .find(|id| self.is_alive(id))
    }

    fn full_candidates(&self, key: &[u8]) -> Vec<NodeId> {
        let total = self.alive.len() + 1;
        self.ring.pref(key, total)
    }

    fn alive_preference(&self, key: &[u8]) -> Vec<NodeId> {
        let mut result = Vec::new();
        for id in self.full_candidates(key) {
            if self.is_alive(&id) {
                result.push(id);
            }
            if result.len() == self.n {
                break;
            }
        }
        result
    }

    /// Pairs each node in the alive preference list with `Some(dead_owner)`
    /// when it stands in for a dead natural owner, `None` otherwise. The
    /// substitution order is the order both sequences are walked in.
    fn alive_preference_with_hints(&self, key: &[u8]) -> Vec<(NodeId, Option<NodeId>)> {
        let natural = self.preference(key);
        let natural_set: BTreeSet<&NodeId> = natural.iter().collect();
        let mut dead_naturals = natural.iter().filter(|id| !self.is_alive(id)).cloned();

        self.alive_preference(key)
            .into_iter()
            .map(|node| {
                if natural_set.contains(&node) {
                    (node, None)
                } else {
                    (node, dead_naturals.next())
                }
            })
            .collect()
    }

    fn mark_alive(&mut self, node: &NodeId) -> Vec<Effect> {
        if *node == self.id {
            return Vec::new();
        }
        let was_dead = self.alive.get(node).copied() == Some(false);
        self.alive.insert(node.clone(), true);
        if was_dead {
            self.build_handoff_effects(node)
        } else {
            Vec::new()
        }
    }

    fn mark_dead(&mut self, node: &NodeId) {
        if *node != self.id {
            self.alive.insert(node.clone(), false);
        }
    }

    // -- storage (shared by coordinator and participant paths) --

    fn local_read(&self, key: &[u8]) -> StoredValue {
        self.store
            .get(key)
            .cloned()
            .unwrap_or_else(|| (Vec::new(), Context::empty()))
    }

    fn local_put(&mut self, key: &[u8], values: ValueSet, ctx: Context) {
        match self.store.remove(key) {
            None => {
                self.store.insert(key.to_vec(), (sort_unique(values), ctx));
            }
            Some(existing) => {
                let merged = merge_values(existing, (sort_unique(values), ctx));
                self.store.insert(key.to_vec(), merged);
            }
        }
    }

    // -- hinted handoff (C6 §4.7) --

    fn build_handoff_effects(&mut self, node: &NodeId) -> Vec<Effect> {
        let in_flight_for_node = self
            .tracker
            .handoffs_queue
            .get(node)
            .cloned()
            .unwrap_or_default();

        let mut data = BTreeMap::new();
        for (key, (values, ctx)) in self.store.iter() {
            if ctx.hint.as_ref() != Some(node) {
                continue;
            }
            let already_in_flight = in_flight_for_node.values().any(|keys| {
                keys.get(key)
                    .map(|sent_ctx| !matches!(ctx.compare(sent_ctx), ClockOrdering::After))
                    .unwrap_or(false)
            });
            if !already_in_flight {
                data.insert(key.clone(), (values.clone(), ctx.without_hint()));
            }
        }

        if data.is_empty() {
            return Vec::new();
        }

        let nonce = self.nonce_gen.next();
        let in_flight: BTreeMap<Vec<u8>, Context> = self
            .store
            .iter()
            .filter(|(k, _)| data.contains_key(*k))
            .map(|(k, (_, ctx))| (k.clone(), ctx.clone()))
            .collect();
        self.tracker
            .handoffs_queue
            .entry(node.clone())
            .or_default()
            .insert(nonce, in_flight);

        vec![
            Effect::Send {
                to: node.clone(),
                msg: Message::HandoffRequest { nonce, data },
            },
            Effect::SetTimer {
                after: self.config.request_timeout,
                msg: Message::HandoffTimeout {
                    nonce,
                    peer: node.clone(),
                },
            },
        ]
    }

    // -- anti-entropy (C3 driving C6) --

    fn leaf_digest(key: &[u8], values: &ValueSet, ctx: &Context) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(key);
        buf.extend_from_slice(&bincode::serialize(&ctx.version).unwrap_or_default());
        for v in values {
            buf.extend_from_slice(v);
        }
        merkle::default_digest(&buf)
    }

    /// An ephemeral snapshot Merkle tree built from the current store in
    /// canonical (sorted-key) leaf order — not incrementally maintained.
    fn build_merkle(&self) -> MerkleTree {
        let mut tree = MerkleTree::new();
        for (key, (values, ctx)) in &self.store {
            tree.insert(&Self::leaf_digest(key, values, ctx));
        }
        tree
    }

    // -- the dispatcher --

    /// Handle one inbound message (or fired timer) from `from`, returning
    /// the effects the transport must carry out.
    pub fn handle(&mut self, from: NodeId, msg: Message) -> Vec<Effect> {
        if self.crashed {
            return match msg {
                Message::Recover => self.recover(),
                _ => Vec::new(),
            };
        }

        match msg {
            Message::Crash => self.crash(),
            Message::Recover => Vec::new(), // already running; no-op

            Message::ClientGetRequest { nonce, key } => {
                self.on_client_request(from, nonce, RequestKind::Get, key, None, None)
            }
            Message::ClientPutRequest {
                nonce,
                key,
                value,
                context,
            } => self.on_client_request(
                from,
                nonce,
                RequestKind::Put,
                key,
                Some(value),
                Some(context),
            ),

            Message::RedirectedClientRequest { client, request } => {
                self.on_redirected_client_request(from, client, *request)
            }
            Message::RedirectAcknowledgement { nonce } => {
                self.tracker.redirect_queue.remove(&nonce);
                Vec::new()
            }
            Message::RedirectTimeout { nonce, failed_coord } => {
                self.on_redirect_timeout(nonce, failed_coord)
            }

            Message::CoordinatorGetRequest { nonce, key } => {
                let mut effects = self.mark_alive(&from);
                let (values, ctx) = self.local_read(&key);
                effects.push(Effect::Send {
                    to: from,
                    msg: Message::CoordinatorGetResponse {
                        nonce,
                        values,
                        context: ctx.without_hint(),
                    },
                });
                effects
            }
            Message::CoordinatorPutRequest {
                nonce,
                key,
                value,
                context,
            } => {
                let mut effects = self.mark_alive(&from);
                let hint = context.hint.clone();
                self.local_put(&key, vec![value], context);
                effects.push(Effect::Send {
                    to: from,
                    msg: Message::CoordinatorPutResponse { nonce },
                });
                if let Some(h) = hint {
                    if self.is_alive(&h) {
                        effects.extend(self.build_handoff_effects(&h));
                    }
                }
                effects
            }
            Message::CoordinatorGetResponse {
                nonce,
                values,
                context,
            } => self.on_coordinator_get_response(from, nonce, values, context),
            Message::CoordinatorPutResponse { nonce } => {
                self.on_coordinator_put_response(from, nonce)
            }
            Message::CoordinatorRequestTimeout { kind, nonce, peer } => match kind {
                RequestKind::Get => self.on_get_request_timeout(nonce, peer),
                RequestKind::Put => self.on_put_request_timeout(nonce, peer),
            },

            Message::HandoffRequest { nonce, data } => {
                let mut effects = self.mark_alive(&from);
                for (key, (values, ctx)) in data {
                    self.local_put(&key, values, ctx);
                }
                effects.push(Effect::Send {
                    to: from,
                    msg: Message::HandoffResponse { nonce },
                });
                effects
            }
            Message::HandoffResponse { nonce } => self.on_handoff_response(from, nonce),
            Message::HandoffTimeout { nonce, peer } => {
                if let Some(by_nonce) = self.tracker.handoffs_queue.get_mut(&peer) {
                    by_nonce.remove(&nonce);
                }
                self.mark_dead(&peer);
                Vec::new()
            }

            Message::AliveCheckRequest => {
                let mut effects = self.mark_alive(&from);
                effects.push(Effect::Send {
                    to: from,
                    msg: Message::AliveCheckResponse,
                });
                effects
            }
            Message::AliveCheckResponse => self.mark_alive(&from),

            Message::ClientTimeout { kind, nonce } => self.on_client_timeout(kind, nonce),
            Message::HealthCheckTimeout => self.on_health_check_timeout(),
            Message::MerkleSyncTimeout => self.on_merkle_sync_timeout(),

            Message::MerkleSummary {
                nonce,
                leaf_count,
                root_level,
                matrix,
            } => self.on_merkle_summary(from, nonce, leaf_count, root_level, matrix),
            Message::MerkleSummaryAck { .. } => Vec::new(),
            Message::MerkleCatchUp { entries, .. } => {
                let mut effects = self.mark_alive(&from);
                for (key, (values, ctx)) in entries {
                    self.local_put(&key, values, ctx);
                }
                effects
            }

            Message::GetStateRequest { nonce } => {
                let snapshot: Vec<StoreEntrySnapshot> = self
                    .store
                    .iter()
                    .map(|(key, (values, context))| StoreEntrySnapshot {
                        key: key.clone(),
                        values: values.clone(),
                        context: context.clone(),
                    })
                    .collect();
                let state = serde_json::to_string(&snapshot).unwrap_or_default();
                vec![Effect::Send {
                    to: from,
                    msg: Message::GetStateResponse { nonce, state },
                }]
            }
            Message::GetStateResponse { .. } => Vec::new(),
        }
    }

    fn crash(&mut self) -> Vec<Effect> {
        self.store.clear();
        self.alive.clear();
        self.tracker = QuorumTracker::new();
        self.crashed = true;
        Vec::new()
    }

    fn recover(&mut self) -> Vec<Effect> {
        self.crashed = false;
        self.store.clear();
        self.tracker = QuorumTracker::new();
        self.alive = self
            .all_node_ids
            .iter()
            .filter(|peer| **peer != self.id)
            .map(|peer| (peer.clone(), true))
            .collect();
        self.startup_effects()
    }

    #[allow(clippy::too_many_arguments)]
    fn on_client_request(
        &mut self,
        from: NodeId,
        nonce: Nonce,
        kind: RequestKind,
        key: Vec<u8>,
        value: Option<Vec<u8>>,
        context: Option<Context>,
    ) -> Vec<Effect> {
        let mut effects = vec![Effect::SetTimer {
            after: self.config.client_timeout,
            msg: Message::ClientTimeout { kind, nonce },
        }];

        if self.is_coordinator(&key) {
            effects.extend(match kind {
                RequestKind::Get => self.coordinator_get(from, nonce, key),
                RequestKind::Put => self.coordinator_put(
                    from,
                    nonce,
                    key,
                    value.expect("put carries a value"),
                    context.expect("put carries a context"),
                ),
            });
            return effects;
        }

        match self.first_alive_coordinator(&key) {
            Some(c) => {
                let original = match kind {
                    RequestKind::Get => Message::ClientGetRequest {
                        nonce,
                        key: key.clone(),
                    },
                    RequestKind::Put => Message::ClientPutRequest {
                        nonce,
                        key: key.clone(),
                        value: value.expect("put carries a value"),
                        context: context.expect("put carries a context"),
                    },
                };
                self.tracker.redirect_queue.insert(
                    nonce,
                    RedirectEntry {
                        client: from.clone(),
                        request: original.clone(),
                        kind,
                    },
                );
                effects.push(Effect::Send {
                    to: c.clone(),
                    msg: Message::RedirectedClientRequest {
                        client: from,
                        request: Box::new(original),
                    },
                });
                effects.push(Effect::SetTimer {
                    after: self.config.redirect_timeout,
                    msg: Message::RedirectTimeout {
                        nonce,
                        failed_coord: c,
                    },
                });
            }
            None => {
                let err = RingError::NoLiveCoordinator;
                tracing::warn!(%nonce, %err, "no live coordinator for key, failing client");
                effects.push(fail_client(kind, nonce, from));
            }
        }
        effects
    }

    fn on_redirected_client_request(
        &mut self,
        from: NodeId,
        client: NodeId,
        request: Message,
    ) -> Vec<Effect> {
        let mut effects = self.mark_alive(&from);
        match request {
            Message::ClientGetRequest { nonce, key } => {
                effects.push(Effect::Send {
                    to: from,
                    msg: Message::RedirectAcknowledgement { nonce },
                });
                effects.push(Effect::SetTimer {
                    after: self.config.client_timeout,
                    msg: Message::ClientTimeout {
                        kind: RequestKind::Get,
                        nonce,
                    },
                });
                effects.extend(self.coordinator_get(client, nonce, key));
            }
            Message::ClientPutRequest {
                nonce,
                key,
                value,
                context,
            } => {
                effects.push(Effect::Send {
                    to: from,
                    msg: Message::RedirectAcknowledgement { nonce },
                });
                effects.push(Effect::SetTimer {
                    after: self.config.client_timeout,
                    msg: Message::ClientTimeout {
                        kind: RequestKind::Put,
                        nonce,
                    },
                });
                effects.extend(self.coordinator_put(client, nonce, key, value, context));
            }
            _ => {
                return vec![Effect::Fatal(RingError::UnhandledMessage(
                    "RedirectedClientRequest carried a non-client-request message".into(),
                ))]
            }
        }
        effects
    }

    fn on_redirect_timeout(&mut self, nonce: Nonce, failed_coord: NodeId) -> Vec<Effect> {
        let Some(entry) = self.tracker.redirect_queue.get(&nonce).cloned() else {
            return Vec::new();
        };
        self.mark_dead(&failed_coord);
        let key = request_key(&entry.request);
        match self.first_alive_coordinator(&key) {
            Some(c) => vec![
                Effect::Send {
                    to: c.clone(),
                    msg: Message::RedirectedClientRequest {
                        client: entry.client,
                        request: Box::new(entry.request),
                    },
                },
                Effect::SetTimer {
                    after: self.config.redirect_timeout,
                    msg: Message::RedirectTimeout {
                        nonce,
                        failed_coord: c,
                    },
                },
            ],
            None => {
                self.tracker.redirect_queue.remove(&nonce);
                let err = RingError::NoLiveCoordinator;
                tracing::warn!(%nonce, %err, "no live coordinator left to retry redirect against");
                vec![fail_client(entry.kind, nonce, entry.client)]
            }
        }
    }

    fn coordinator_get(&mut self, client: NodeId, nonce: Nonce, key: Vec<u8>) -> Vec<Effect> {
        if self.tracker.gets_queue.contains_key(&nonce) {
            return vec![Effect::Fatal(RingError::Internal(format!(
                "nonce {nonce} reused while a get is still pending"
            )))];
        }

        let peers = self.alive_preference(&key);
        let mut entry = GetEntry {
            client: client.clone(),
            key: key.clone(),
            responses: BTreeMap::new(),
            requested: BTreeSet::new(),
        };
        let mut effects = Vec::new();

        for peer in &peers {
            entry.requested.insert(peer.clone());
            if *peer == self.id {
                let local = self.local_read(&key);
                entry.responses.insert(self.id.clone(), local);
            } else {
                effects.push(Effect::Send {
                    to: peer.clone(),
                    msg: Message::CoordinatorGetRequest {
                        nonce,
                        key: key.clone(),
                    },
                });
                effects.push(Effect::SetTimer {
                    after: self.config.request_timeout,
                    msg: Message::CoordinatorRequestTimeout {
                        kind: RequestKind::Get,
                        nonce,
                        peer: peer.clone(),
                    },
                });
            }
        }

        if entry.responses.len() >= self.r {
            let (values, ctx) = merge_all(&entry.responses);
            effects.push(Effect::Send {
                to: client,
                msg: Message::ClientGetResponse {
                    nonce,
                    success: true,
                    values: Some(values),
                    context: Some(ctx),
                },
            });
        } else {
            self.tracker.gets_queue.insert(nonce, entry);
        }
        effects
    }

    fn coordinator_put(
        &mut self,
        client: NodeId,
        nonce: Nonce,
        key: Vec<u8>,
        value: Vec<u8>,
        mut context: Context,
    ) -> Vec<Effect> {
        if self.tracker.puts_queue.contains_key(&nonce) {
            return vec![Effect::Fatal(RingError::Internal(format!(
                "nonce {nonce} reused while a put is still pending"
            )))];
        }

        context.version.tick(&self.id);
        self.local_put(&key, vec![value.clone()], context.clone());

        let targets = self.alive_preference_with_hints(&key);
        let mut entry = PutEntry {
            client: client.clone(),
            key: key.clone(),
            value: value.clone(),
            context: context.clone(),
            responses: BTreeSet::new(),
            requested: BTreeMap::new(),
            last_requested_index: 0,
        };
        let mut effects = Vec::new();

        for (idx, (peer, hint)) in targets.iter().enumerate() {
            if *peer == self.id {
                continue;
            }
            let mut peer_ctx = context.clone();
            peer_ctx.hint = hint.clone();
            entry.requested.insert(peer.clone(), hint.clone());
            entry.last_requested_index = entry.last_requested_index.max(idx);
            effects.push(Effect::Send {
                to: peer.clone(),
                msg: Message::CoordinatorPutRequest {
                    nonce,
                    key: key.clone(),
                    value: value.clone(),
                    context: peer_ctx,
                },
            });
            effects.push(Effect::SetTimer {
                after: self.config.request_timeout,
                msg: Message::CoordinatorRequestTimeout {
                    kind: RequestKind::Put,
                    nonce,
                    peer: peer.clone(),
                },
            });
        }

        if self.w <= 1 {
            effects.push(Effect::Send {
                to: client,
                msg: Message::ClientPutResponse {
                    nonce,
                    success: true,
                    value: Some(value),
                    context: Some(context),
                },
            });
        } else {
            self.tracker.puts_queue.insert(nonce, entry);
        }
        effects
    }

    fn on_coordinator_get_response(
        &mut self,
        from: NodeId,
        nonce: Nonce,
        values: ValueSet,
        context: Context,
    ) -> Vec<Effect> {
        let mut effects = self.mark_alive(&from);
        let mut resolved = None;
        if let Some(entry) = self.tracker.gets_queue.get_mut(&nonce) {
            entry.responses.insert(from, (values, context));
            if entry.responses.len() >= self.r {
                resolved = Some(entry.clone());
            }
        }
        if let Some(entry) = resolved {
            self.tracker.gets_queue.remove(&nonce);
            let (values, ctx) = merge_all(&entry.responses);
            effects.push(Effect::Send {
                to: entry.client,
                msg: Message::ClientGetResponse {
                    nonce,
                    success: true,
                    values: Some(values),
                    context: Some(ctx),
                },
            });
        }
        effects
    }

    fn on_coordinator_put_response(&mut self, from: NodeId, nonce: Nonce) -> Vec<Effect> {
        let mut effects = self.mark_alive(&from);
        let mut resolved = None;
        if let Some(entry) = self.tracker.puts_queue.get_mut(&nonce) {
            entry.responses.insert(from);
            if entry.responses.len() >= self.w.saturating_sub(1) {
                resolved = Some(entry.clone());
            }
        }
        if let Some(entry) = resolved {
            self.tracker.puts_queue.remove(&nonce);
            effects.push(Effect::Send {
                to: entry.client,
                msg: Message::ClientPutResponse {
                    nonce,
                    success: true,
                    value: Some(entry.value),
                    context: Some(entry.context),
                },
            });
        }
        effects
    }

    fn on_get_request_timeout(&mut self, nonce: Nonce, peer: NodeId) -> Vec<Effect> {
        let Some(entry) = self.tracker.gets_queue.get(&nonce).cloned() else {
            return Vec::new();
        };
        if entry.responses.contains_key(&peer) {
            return Vec::new();
        }
        self.mark_dead(&peer);
        let candidates = self.full_candidates(&entry.key);
        let Some(next) = candidates
            .into_iter()
            .find(|c| self.is_alive(c) && !entry.requested.contains(c))
        else {
            return Vec::new();
        };

        if let Some(e) = self.tracker.gets_queue.get_mut(&nonce) {
            e.requested.insert(next.clone());
        }
        vec![
            Effect::Send {
                to: next.clone(),
                msg: Message::CoordinatorGetRequest {
                    nonce,
                    key: entry.key,
                },
            },
            Effect::SetTimer {
                after: self.config.request_timeout,
                msg: Message::CoordinatorRequestTimeout {
                    kind: RequestKind::Get,
                    nonce,
                    peer: next,
                },
            },
        ]
    }

    fn on_put_request_timeout(&mut self, nonce: Nonce, peer: NodeId) -> Vec<Effect> {
        let Some(entry) = self.tracker.puts_queue.get(&nonce).cloned() else {
            return Vec::new();
        };
        if entry.responses.contains(&peer) {
            return Vec::new();
        }
        self.mark_dead(&peer);
        let candidates = self.full_candidates(&entry.key);
        let already: BTreeSet<&NodeId> = entry.requested.keys().collect();
        let Some((idx, next)) = candidates
            .iter()
            .enumerate()
            .find(|(_, c)| self.is_alive(c) && !already.contains(c))
        else {
            return Vec::new();
        };
        let next = next.clone();

        let old_hint = entry.requested.get(&peer).cloned().flatten();
        let new_hint = old_hint.or_else(|| Some(peer));
        let mut ctx = entry.context.clone();
        ctx.hint = new_hint.clone();

        if let Some(e) = self.tracker.puts_queue.get_mut(&nonce) {
            e.requested.insert(next.clone(), new_hint);
            e.last_requested_index = e.last_requested_index.max(idx);
        }

        vec![
            Effect::Send {
                to: next.clone(),
                msg: Message::CoordinatorPutRequest {
                    nonce,
                    key: entry.key,
                    value: entry.value,
                    context: ctx,
                },
            },
            Effect::SetTimer {
                after: self.config.request_timeout,
                msg: Message::CoordinatorRequestTimeout {
                    kind: RequestKind::Put,
                    nonce,
                    peer: next,
                },
            },
        ]
    }

    fn on_handoff_response(&mut self, from: NodeId, nonce: Nonce) -> Vec<Effect> {
        let effects = self.mark_alive(&from);
        let Some(by_nonce) = self.tracker.handoffs_queue.get_mut(&from) else {
            return effects;
        };
        let Some(sent) = by_nonce.remove(&nonce) else {
            return effects;
        };
        for (key, sent_ctx) in sent {
            if let Some((_, ctx)) = self.store.get_mut(&key) {
                if ctx.hint.as_ref() == Some(&from)
                    && !matches!(ctx.compare(&sent_ctx), ClockOrdering::After)
                {
                    ctx.hint = None;
                }
            }
        }
        effects
    }

    fn on_client_timeout(&mut self, kind: RequestKind, nonce: Nonce) -> Vec<Effect> {
        let client = self
            .tracker
            .redirect_queue
            .remove(&nonce)
            .map(|e| e.client)
            .or_else(|| self.tracker.gets_queue.remove(&nonce).map(|e| e.client))
            .or_else(|| self.tracker.puts_queue.remove(&nonce).map(|e| e.client));
        match client {
            Some(c) => {
                let err = RingError::ClientTimeout;
                tracing::warn!(%nonce, %err, "client deadline fired before quorum was reached");
                vec![fail_client(kind, nonce, c)]
            }
            None => Vec::new(),
        }
    }

    fn on_health_check_timeout(&mut self) -> Vec<Effect> {
        let mut effects: Vec<Effect> = self
            .alive
            .iter()
            .filter(|(_, alive)| !**alive)
            .map(|(peer, _)| Effect::Send {
                to: peer.clone(),
                msg: Message::AliveCheckRequest,
            })
            .collect();
        effects.push(Effect::SetTimer {
            after: self.config.health_check_interval,
            msg: Message::HealthCheckTimeout,
        });
        effects
    }

    fn on_merkle_sync_timeout(&mut self) -> Vec<Effect> {
        let mut effects = vec![Effect::SetTimer {
            after: self.config.merkle_sync_interval,
            msg: Message::MerkleSyncTimeout,
        }];

        let alive_peers: Vec<NodeId> = self
            .alive
            .iter()
            .filter(|(_, alive)| **alive)
            .map(|(id, _)| id.clone())
            .collect();
        if let Some(partner) = alive_peers
            .get(self.sync_round as usize % alive_peers.len().max(1))
            .cloned()
        {
            self.sync_round = self.sync_round.wrapping_add(1);
            let tree = self.build_merkle();
            let nonce = self.nonce_gen.next();
            effects.push(Effect::Send {
                to: partner,
                msg: Message::MerkleSummary {
                    nonce,
                    leaf_count: tree.leaf_count(),
                    root_level: tree.root_level(),
                    matrix: tree.matrix_snapshot(),
                },
            });
        }
        effects
    }

    /// A peer pushed us its Merkle summary to find out whether we're
    /// holding anything it lacks. `compare_tree` tells us, evaluated with
    /// ourselves as receiver and the pusher as sender, what (if anything) we
    /// should send back — see [`Divergence`].
    fn on_merkle_summary(
        &mut self,
        from: NodeId,
        nonce: Nonce,
        leaf_count: u64,
        root_level: usize,
        matrix: Vec<Vec<Vec<u8>>>,
    ) -> Vec<Effect> {
        let mut effects = self.mark_alive(&from);
        let sender_tree = MerkleTree::from_snapshot(matrix, leaf_count, root_level);
        let own_tree = self.build_merkle();
        match own_tree.compare_tree(&sender_tree) {
            Divergence::Same | Divergence::DoNothing => {
                effects.push(Effect::Send {
                    to: from,
                    msg: Message::MerkleSummaryAck { nonce },
                });
            }
            Divergence::From(from_leaf) => {
                let entries: BTreeMap<Vec<u8>, StoredValue> = self
                    .store
                    .iter()
                    .skip(from_leaf as usize)
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                effects.push(Effect::Send {
                    to: from,
                    msg: Message::MerkleCatchUp { nonce, entries },
                });
            }
        }
        effects
    }
}
