use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use cplane_types::ClusterState;

/// One pending entry in the leader's FIFO work queue.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct QueueEntry {
    /// Sequential, store-assigned name (`qn-0000000042`).
    pub id: String,
    pub payload: Vec<u8>,
}

pub fn queue_entry_id(seq: u64) -> String {
    format!("qn-{seq:010}")
}

/// Kind of watch notification that woke a waiter without a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    /// The response node went away before a result was written.
    NodeDeleted,
}

impl std::fmt::Display for WatchEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WatchEventKind::NodeDeleted => f.write_str("NodeDeleted"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedEvent {
    pub path: String,
    pub kind: WatchEventKind,
}

/// Outcome of `offer_and_wait`.
///
/// * `bytes` set: the leader answered.
/// * `watched` set: a watcher fired without a result.
/// * neither: the wait ran out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEvent {
    pub entry_id: String,
    pub bytes: Option<Vec<u8>>,
    pub watched: Option<WatchedEvent>,
}

/// The three result maps of the async task lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskMap {
    Completed,
    Failed,
    Running,
}

/// Term table for one shard. `version` is bumped by the store on every
/// successful compare-and-set.
#[derive(Debug, Clone, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct ShardTerms {
    pub version: u64,
    pub terms: BTreeMap<String, u64>,
}

impl ShardTerms {
    pub fn registered(&self, replica: &str) -> bool {
        self.terms.contains_key(replica)
    }

    pub fn term(&self, replica: &str) -> Option<u64> {
        self.terms.get(replica).copied()
    }

    pub fn max_term(&self) -> u64 {
        self.terms.values().copied().max().unwrap_or(0)
    }

    /// A replica may lead only when no registered replica is ahead of it.
    pub fn can_become_leader(&self, replica: &str) -> bool {
        self.term(replica).map(|t| t >= self.max_term()).unwrap_or(false)
    }

    pub fn register(&mut self, replica: impl Into<String>) {
        self.terms.entry(replica.into()).or_insert(0);
    }

    /// Returns `false` when the replica is unregistered or already at max.
    pub fn set_term_equals_to_leader(&mut self, replica: &str) -> bool {
        let max = self.max_term();
        match self.terms.get_mut(replica) {
            Some(t) if *t < max => {
                *t = max;
                true
            }
            _ => false,
        }
    }
}

/// Exclusive, shard-scoped guard over a term table. Other shards are
/// unaffected.
pub struct TermLease {
    pub collection: String,
    pub shard: String,
    _guard: tokio::sync::OwnedMutexGuard<()>,
}

/// In-process lease registry shared by the store backings.
#[derive(Default)]
pub struct LeaseTable {
    locks: Mutex<HashMap<(String, String), Arc<tokio::sync::Mutex<()>>>>,
}

impl LeaseTable {
    pub async fn acquire(&self, collection: &str, shard: &str) -> TermLease {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
            locks
                .entry((collection.to_string(), shard.to_string()))
                .or_default()
                .clone()
        };
        TermLease {
            collection: collection.to_string(),
            shard: shard.to_string(),
            _guard: lock.lock_owned().await,
        }
    }
}

pub type WatcherId = u64;

/// Returned by a state watcher after each evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchDecision {
    Keep,
    Remove,
}

/// Callback run on the store's delivery path. Must be short and must not
/// block or call back into the store.
pub type StateWatcher = Box<dyn FnMut(&ClusterState) -> WatchDecision + Send>;
