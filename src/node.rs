use crate::types::{ApplyOutcome, Delta, PeerId, PeerView, ValueEntry};
use crate::wire;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::mem;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, trace};

/// Failure modes of [`ClusterState::get`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum GetError {
    /// No updates from that origin peer have been observed yet.
    #[error("node not found")]
    NodeNotFound,
    /// The origin is known but has never written that key.
    #[error("key not found")]
    KeyNotFound,
}

/// Point-in-time snapshot of a member's state (for debugging/monitoring).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterStatus {
    pub id: PeerId,
    pub pending_deltas: usize,
    pub peers: Vec<PeerStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerStatus {
    pub id: PeerId,
    pub keys: usize,
    pub clock: u64,
    pub missed: usize,
}

enum WatchPattern {
    Exact(String),
    Prefix(String),
}

struct Watcher {
    origin: PeerId,
    pattern: WatchPattern,
    sender: watch::Sender<()>,
}

/// Replicated state of one cluster member - all of it behind a single
/// RwLock, per the wrapping [`Node`].
///
/// Holds the merged view of every origin's namespace, plus the queue of
/// deltas waiting for the transport's next pull. The merge algorithm
/// lives here; the transport boundary lives in [`crate::gossip`].
pub struct ClusterState {
    pub id: PeerId,
    nodes: HashMap<PeerId, PeerView>,
    pending: Vec<Delta>,
    watchers: Vec<Watcher>,
}

impl ClusterState {
    fn new(id: PeerId) -> Self {
        Self {
            id,
            nodes: HashMap::new(),
            pending: Vec::new(),
            watchers: Vec::new(),
        }
    }

    /// Author a value into our own namespace.
    ///
    /// Advances our clock, stores the entry, and queues an update delta
    /// with a full hop budget for the next broadcast.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let id = self.id;
        let view = self.nodes.entry(id).or_default();
        let entry = ValueEntry::new(view.clock + 1, value.into());
        view.clock = entry.counter;
        view.set.insert(key.clone(), entry.clone());
        self.pending.push(Delta::update(id, key.clone(), entry));
        self.notify_watchers(id, &key);
    }

    /// Read the latest known value `origin` wrote under `key`.
    pub fn get(&self, origin: PeerId, key: &str) -> Result<String, GetError> {
        let view = self.nodes.get(&origin).ok_or(GetError::NodeNotFound)?;
        let entry = view.get(key).ok_or(GetError::KeyNotFound)?;
        Ok(entry.value.clone())
    }

    /// Drain the pending queue and serialize it for transmission.
    ///
    /// An empty queue still yields a payload (the empty batch); this
    /// never fails.
    pub fn encode(&mut self) -> Vec<u8> {
        let drained = mem::take(&mut self.pending);
        debug!(count = drained.len(), "encoding pending deltas");
        wire::encode(drained)
    }

    /// Integrate a batch of inbound deltas, in arrival order.
    ///
    /// Each update delta is classified against the origin's view (fresh,
    /// skipped-clock, gap repair, stale); skipped clocks queue repair
    /// requests, and every surviving delta is re-queued for flooding with
    /// its hop budget decremented. Repair requests are answered from
    /// local state when possible and forwarded otherwise.
    ///
    /// Returns a snapshot of the pending queue as it stands afterwards -
    /// newly generated and forwarded deltas alike. The queue is not
    /// drained; that is [`Self::encode`]'s job.
    pub fn merge(&mut self, deltas: Vec<Delta>) -> Vec<Delta> {
        if !deltas.is_empty() {
            debug!(count = deltas.len(), "merging inbound deltas");
        }
        for d in deltas {
            if d.fix {
                self.merge_repair_request(d);
            } else {
                self.merge_update(d);
            }
        }
        self.check_invariants();
        self.pending.clone()
    }

    fn merge_update(&mut self, d: Delta) {
        let outcome = match self.nodes.entry(d.origin) {
            Entry::Vacant(slot) => {
                // First contact with this origin: take the update as-is
                // and adopt its counter, without back-filling gaps.
                slot.insert(PeerView::new()).adopt(&d.key, d.entry.clone());
                debug!(
                    origin = d.origin,
                    key = %d.key,
                    counter = d.entry.counter,
                    "first update from origin"
                );
                ApplyOutcome::Fresh
            }
            Entry::Occupied(mut view) => view.get_mut().apply_update(&d.key, d.entry.clone()),
        };

        match outcome {
            ApplyOutcome::Fresh => {
                debug!(
                    origin = d.origin,
                    key = %d.key,
                    counter = d.entry.counter,
                    "update applied"
                );
                self.notify_watchers(d.origin, &d.key);
                self.requeue(d);
            }
            ApplyOutcome::Skipped { from, to } => {
                for counter in from..=to {
                    debug!(origin = d.origin, counter, "missed update, requesting repair");
                    self.pending.push(Delta::repair_request(d.origin, counter));
                }
                self.notify_watchers(d.origin, &d.key);
                self.requeue(d);
            }
            ApplyOutcome::Repaired => {
                debug!(
                    origin = d.origin,
                    key = %d.key,
                    counter = d.entry.counter,
                    "gap repaired"
                );
                self.notify_watchers(d.origin, &d.key);
                self.requeue(d);
            }
            ApplyOutcome::StaleRepair => {
                trace!(origin = d.origin, counter = d.entry.counter, "stale repair");
                self.requeue(d);
            }
            ApplyOutcome::Stale => {
                // Already consistent. Still forwarded: peers further out
                // may not have seen it yet.
                trace!(origin = d.origin, counter = d.entry.counter, "already consistent");
                self.requeue(d);
            }
        }
    }

    fn merge_repair_request(&mut self, d: Delta) {
        let counter = d.entry.counter;
        let Some(view) = self.nodes.get(&d.origin) else {
            debug!(origin = d.origin, counter, "repair request for unknown origin");
            self.requeue(d);
            return;
        };

        let found = view
            .lookup_by_counter(counter)
            .map(|(key, entry)| (key.to_string(), entry.clone()));
        match found {
            Some((key, entry)) => {
                debug!(origin = d.origin, key = %key, counter, "repair request fulfilled");
                // The answer is a brand-new update re-entering the flood;
                // the request itself is consumed.
                self.pending.push(Delta::update(d.origin, key, entry));
            }
            None => {
                debug!(origin = d.origin, counter, "repair request for unknown counter");
                self.requeue(d);
            }
        }
    }

    /// Spend one hop of the delta's budget; keep it for the next
    /// broadcast only if budget remains.
    fn requeue(&mut self, mut d: Delta) {
        d.ttl -= 1;
        if d.ttl > 0 {
            self.pending.push(d);
        } else {
            trace!(
                origin = d.origin,
                counter = d.entry.counter,
                "ttl exhausted, dropping delta"
            );
        }
    }

    /// Deltas waiting for the transport's next pull.
    pub fn pending(&self) -> &[Delta] {
        &self.pending
    }

    /// Our view of one origin's namespace, if any updates from it have
    /// been observed.
    pub fn view(&self, origin: PeerId) -> Option<&PeerView> {
        self.nodes.get(&origin)
    }

    /// All origins we hold a view for, in ascending order.
    pub fn peers(&self) -> Vec<PeerId> {
        let mut ids: Vec<PeerId> = self.nodes.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Keys and values under `prefix` in one origin's namespace.
    pub fn scan_prefix(&self, origin: PeerId, prefix: &str) -> BTreeMap<String, String> {
        let mut result = BTreeMap::new();
        let Some(view) = self.nodes.get(&origin) else {
            return result;
        };

        // BTreeMap range gets us to the first candidate without a full scan
        for (key, entry) in view.set.range(prefix.to_string()..) {
            if !key.starts_with(prefix) {
                break;
            }
            result.insert(key.clone(), entry.value.clone());
        }
        result
    }

    pub fn status(&self) -> ClusterStatus {
        let mut peers: Vec<PeerStatus> = self
            .nodes
            .iter()
            .map(|(id, view)| PeerStatus {
                id: *id,
                keys: view.len(),
                clock: view.clock,
                missed: view.missed.len(),
            })
            .collect();
        peers.sort_by_key(|status| status.id);

        ClusterStatus {
            id: self.id,
            pending_deltas: self.pending.len(),
            peers,
        }
    }

    pub fn watch_key(&mut self, origin: PeerId, key: &str) -> watch::Receiver<()> {
        let (sender, receiver) = watch::channel(());
        self.watchers.push(Watcher {
            origin,
            pattern: WatchPattern::Exact(key.to_string()),
            sender,
        });
        receiver
    }

    pub fn watch_prefix(&mut self, origin: PeerId, prefix: &str) -> watch::Receiver<()> {
        let (sender, receiver) = watch::channel(());
        self.watchers.push(Watcher {
            origin,
            pattern: WatchPattern::Prefix(prefix.to_string()),
            sender,
        });
        receiver
    }

    fn notify_watchers(&mut self, origin: PeerId, key: &str) {
        self.watchers.retain(|watcher| {
            if watcher.origin != origin {
                return true;
            }
            let matches = match &watcher.pattern {
                WatchPattern::Exact(watch_key) => watch_key == key,
                WatchPattern::Prefix(prefix) => key.starts_with(prefix.as_str()),
            };

            if matches {
                watcher.sender.send(()).is_ok()
            } else {
                true
            }
        });
    }

    /// Fail fast in debug builds if the state drifted from its
    /// invariants; release builds carry on.
    fn check_invariants(&self) {
        if !cfg!(debug_assertions) {
            return;
        }
        for (id, view) in &self.nodes {
            for counter in &view.missed {
                debug_assert!(
                    *counter < view.clock,
                    "origin {id}: missed counter {counter} not below clock {}",
                    view.clock
                );
            }
            for (key, entry) in &view.set {
                debug_assert!(
                    entry.counter <= view.clock,
                    "origin {id}: entry {key:?} counter {} above clock {}",
                    entry.counter,
                    view.clock
                );
            }
        }
        for d in &self.pending {
            debug_assert!(d.ttl >= 1, "pending delta with exhausted ttl: {d:?}");
        }
    }
}

/// One cluster member's replicated state, behind a single RwLock.
///
/// Reads take the read lock; `set`, `encode`, and `merge` take the write
/// lock. The transport may drive `merge`/`encode` concurrently with local
/// `set`/`get` calls; lock hold time is proportional to the delta batch,
/// which stays small. Nothing suspends or performs I/O under the lock.
pub struct Node {
    state: Arc<RwLock<ClusterState>>,
}

impl Node {
    /// Construct an empty member. No views exist yet, not even our own;
    /// other peers populate us with data.
    pub fn new(id: PeerId) -> Self {
        Self {
            state: Arc::new(RwLock::new(ClusterState::new(id))),
        }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, ClusterState> {
        self.state.read().expect("Failed to lock cluster state")
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, ClusterState> {
        self.state.write().expect("Failed to lock cluster state")
    }

    /// Watch one key in an origin's namespace. The receiver notifies on
    /// any applied change, local or merged.
    pub fn watch(&self, origin: PeerId, key: &str) -> watch::Receiver<()> {
        self.write().watch_key(origin, key)
    }

    /// Watch all keys sharing a prefix in an origin's namespace.
    pub fn watch_prefix(&self, origin: PeerId, prefix: &str) -> watch::Receiver<()> {
        self.write().watch_prefix(origin, prefix)
    }

    pub fn status(&self) -> ClusterStatus {
        self.read().status()
    }
}
