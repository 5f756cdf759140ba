//! RumorKV - an embeddable, eventually consistent, gossip-replicated key-value core
//!
//! RumorKV is a Rust library that provides the replicated state and
//! anti-entropy engine of a peer-to-peer key-value store. Each member
//! authors into its own namespace; every member converges on a merged
//! view of all namespaces. It focuses on the reconciliation core and
//! leaves the network to you.
//!
//! # Key Features
//!
//! - **Peer-to-peer**: all members have equal roles, no leader or coordinator
//! - **Delta dissemination**: updates flood as TTL-bounded deltas, never
//!   full-state snapshots
//! - **Self-repairing**: gaps in a peer's monotonic counter sequence are
//!   detected locally and repaired by request/response deltas on the same
//!   gossip channel
//! - **Per-origin namespaces**: the only conflict rule needed is
//!   monotonic counter comparison per origin
//! - **Transport-agnostic**: core only - you provide the gossip overlay
//! - **In-memory**: no persistence, state lives for the process lifetime
//!
//! # Quick Start
//!
//! ```rust
//! use rumorkv::Node;
//!
//! // Member with transport-assigned identity 1
//! let node = Node::new(1);
//!
//! // Author into our namespace and read it back
//! node.write().set("key", "value");
//! assert_eq!(node.read().get(1, "key").unwrap(), "value");
//! ```
//!
//! # Architecture
//!
//! Local writes and inbound gossip funnel into a single per-member
//! [`node::ClusterState`] guarded by one RwLock. Writes queue update
//! deltas; [`node::ClusterState::merge`] integrates inbound deltas and
//! queues repair requests, repair responses, and re-broadcasts; the
//! transport drains the queue through [`node::ClusterState::encode`] or
//! observes it through the [`gossip::Gossiper`] contract. Every delta
//! carries a hop budget, so flooding terminates.
//!
//! The core types you'll work with:
//! - [`Node`] - thread-safe wrapper around one member's state
//! - [`types::Delta`] - one unit of anti-entropy traffic
//! - [`types::PeerView`] - what we know about one origin's namespace
//! - [`GossipAdapter`] - glue between a [`Node`] and the transport
//!
//! # Non-goals
//!
//! RumorKV intentionally does NOT provide:
//! - Strong consistency, linearizability, or cross-peer ordering
//! - Deletes/tombstones (model deletion as a sentinel value)
//! - Authentication, encryption, or quorum reads/writes
//! - Durable storage
//! - A network transport layer

pub mod gossip;
pub mod node;
pub mod types;
pub mod wire;

pub use gossip::{GossipAdapter, Gossiper};
pub use node::Node;
