use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

/// Identity of a cluster member. Assigned by the transport layer; this
/// crate never parses one off the wire beyond deserializing the field.
pub type PeerId = u64;

/// Hop budget given to every delta entering the flood, whether it is a
/// fresh update, a repair request, or a repair response.
pub const INITIAL_TTL: i32 = 3;

/// One versioned value authored by a single peer.
///
/// Immutable once constructed; a newer write replaces the whole entry.
/// The serialized field names (`C`, `V`) are part of the wire contract.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueEntry {
    /// Position of this write in the origin peer's counter sequence.
    #[serde(rename = "C")]
    pub counter: u64,

    /// The value itself.
    #[serde(rename = "V")]
    pub value: String,
}

impl ValueEntry {
    pub fn new(counter: u64, value: impl Into<String>) -> Self {
        Self {
            counter,
            value: value.into(),
        }
    }

    /// Counter-only entry carried inside a repair request. The value is
    /// empty and must not be interpreted.
    pub fn placeholder(counter: u64) -> Self {
        Self {
            counter,
            value: String::new(),
        }
    }
}

impl std::fmt::Debug for ValueEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{:?}", self.counter, self.value)
    }
}

/// One unit of anti-entropy traffic.
///
/// With `fix == false` this carries an update: `origin` authored
/// (`key`, `entry`). With `fix == true` it is a repair request asking the
/// cluster for whatever `origin` authored at `entry.counter`; the key and
/// value are empty.
///
/// `origin` is always the authoring peer, never the forwarder. The
/// serialized field names and their order (`Fix`, `P`, `Ttl`, `K`, `Vi`)
/// are part of the wire contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delta {
    #[serde(rename = "Fix")]
    pub fix: bool,

    #[serde(rename = "P")]
    pub origin: PeerId,

    #[serde(rename = "Ttl")]
    pub ttl: i32,

    #[serde(rename = "K")]
    pub key: String,

    #[serde(rename = "Vi")]
    pub entry: ValueEntry,
}

impl Delta {
    /// A freshly authored (or re-synthesized) update, entering the flood
    /// with a full hop budget.
    pub fn update(origin: PeerId, key: impl Into<String>, entry: ValueEntry) -> Self {
        Self {
            fix: false,
            origin,
            ttl: INITIAL_TTL,
            key: key.into(),
            entry,
        }
    }

    /// A request for the update `origin` authored at `counter`.
    pub fn repair_request(origin: PeerId, counter: u64) -> Self {
        Self {
            fix: true,
            origin,
            ttl: INITIAL_TTL,
            key: String::new(),
            entry: ValueEntry::placeholder(counter),
        }
    }
}

/// How an inbound update landed in a [`PeerView`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The next counter in sequence; applied.
    Fresh,
    /// Applied, but the counters `from..=to` were jumped over and are now
    /// outstanding.
    Skipped { from: u64, to: u64 },
    /// Filled a known gap with a newer entry for its key.
    Repaired,
    /// Filled a known gap, but the key already holds a newer entry; only
    /// the gap bookkeeping changed.
    StaleRepair,
    /// Already known; nothing changed.
    Stale,
}

/// What this member knows about one origin peer's namespace: the latest
/// entry per key, the highest counter observed from that origin, and the
/// set of counters known to be authored but not yet received.
///
/// Pure data structure. Operations are only ever invoked with the
/// enclosing cluster lock held.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PeerView {
    pub(crate) set: BTreeMap<String, ValueEntry>,
    pub(crate) clock: u64,
    pub(crate) missed: HashSet<u64>,
}

impl PeerView {
    pub fn new() -> Self {
        Self::default()
    }

    /// First-contact apply: adopt the entry and its counter as-is. Used
    /// only when this origin has never been seen before; lower counters
    /// are not back-filled into `missed`.
    pub(crate) fn adopt(&mut self, key: &str, entry: ValueEntry) {
        self.clock = entry.counter;
        self.set.insert(key.to_string(), entry);
    }

    /// Integrate one inbound update and report how it landed.
    ///
    /// Gap bookkeeping is split with the caller: a `Skipped` result means
    /// the counters in the returned range were recorded as missed here,
    /// and the caller is expected to emit repair requests for them.
    pub(crate) fn apply_update(&mut self, key: &str, entry: ValueEntry) -> ApplyOutcome {
        let counter = entry.counter;
        if counter > self.clock {
            let outcome = if counter == self.clock + 1 {
                ApplyOutcome::Fresh
            } else {
                for j in self.clock + 1..counter {
                    self.missed.insert(j);
                }
                ApplyOutcome::Skipped {
                    from: self.clock + 1,
                    to: counter - 1,
                }
            };
            self.clock = counter;
            self.set.insert(key.to_string(), entry);
            return outcome;
        }

        if self.missed.remove(&counter) {
            // A gap is being filled. Only take the entry if the key does
            // not already hold something newer.
            match self.set.get(key) {
                Some(existing) if existing.counter >= counter => ApplyOutcome::StaleRepair,
                _ => {
                    self.set.insert(key.to_string(), entry);
                    ApplyOutcome::Repaired
                }
            }
        } else {
            ApplyOutcome::Stale
        }
    }

    /// Find the entry this origin authored at `counter`, if we hold it.
    /// Counters are unique per origin, so at most one key can match.
    pub fn lookup_by_counter(&self, counter: u64) -> Option<(&str, &ValueEntry)> {
        self.set
            .iter()
            .find(|(_, entry)| entry.counter == counter)
            .map(|(key, entry)| (key.as_str(), entry))
    }

    /// Latest known entry for `key`.
    pub fn get(&self, key: &str) -> Option<&ValueEntry> {
        self.set.get(key)
    }

    /// Highest counter observed from this origin.
    pub fn clock(&self) -> u64 {
        self.clock
    }

    /// Counters still outstanding for this origin.
    pub fn missed(&self) -> &HashSet<u64> {
        &self.missed
    }

    /// Number of keys held for this origin.
    pub fn len(&self) -> usize {
        self.set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }
}
