use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, RwLock};

use cplane_types::{ClusterState, CplaneError};

use crate::traits::{AsyncTaskStore, ClusterStateStore, CommandQueue, TermStore};
use crate::types::{
    queue_entry_id, LeaseTable, QueueEntry, QueueEvent, ShardTerms, StateWatcher, TaskMap,
    TermLease, WatchEventKind, WatchedEvent, WatcherId,
};
use crate::watch::ClusterStateCache;

pub(crate) fn response_path(entry_id: &str) -> String {
    format!("/overseer/collection-queue-work/{entry_id}")
}

struct MemInner {
    queue: VecDeque<QueueEntry>,
    next_seq: u64,
    /// entry id → waiter of a synchronous offer
    responders: HashMap<String, oneshot::Sender<Vec<u8>>>,
    async_ids: HashSet<String>,
    maps: HashMap<TaskMap, BTreeMap<String, Vec<u8>>>,
    terms: HashMap<(String, String), ShardTerms>,
}

impl MemInner {
    fn map(&self, map: TaskMap) -> Option<&BTreeMap<String, Vec<u8>>> {
        self.maps.get(&map)
    }
}

/// In-memory coordination store.
///
/// Intended for unit tests and single-process embedding; not persisted
/// across restarts.
pub struct MemCoordinationStore {
    inner: Arc<RwLock<MemInner>>,
    leases: LeaseTable,
    state: ClusterStateCache,
}

impl MemCoordinationStore {
    pub fn new() -> Self {
        Self::with_state(ClusterState::default())
    }

    pub fn with_state(state: ClusterState) -> Self {
        MemCoordinationStore {
            inner: Arc::new(RwLock::new(MemInner {
                queue: VecDeque::new(),
                next_seq: 0,
                responders: HashMap::new(),
                async_ids: HashSet::new(),
                maps: HashMap::new(),
                terms: HashMap::new(),
            })),
            leases: LeaseTable::default(),
            state: ClusterStateCache::new(state),
        }
    }

    /// Watch-delivery side of the adapter.
    pub fn cluster_state(&self) -> &ClusterStateCache {
        &self.state
    }

    /// Drop the waiter of a synchronous offer without answering, the way a
    /// deleted response node fires the waiter's watch.
    pub async fn abandon(&self, entry_id: &str) {
        self.inner.write().await.responders.remove(entry_id);
    }

    pub async fn is_claimed(&self, id: &str) -> bool {
        self.inner.read().await.async_ids.contains(id)
    }
}

impl Default for MemCoordinationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandQueue for MemCoordinationStore {
    async fn offer(&self, payload: Vec<u8>) -> Result<String, CplaneError> {
        let mut g = self.inner.write().await;
        g.next_seq += 1;
        let id = queue_entry_id(g.next_seq);
        g.queue.push_back(QueueEntry { id: id.clone(), payload });
        Ok(id)
    }

    async fn offer_and_wait(
        &self,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<QueueEvent, CplaneError> {
        let (tx, rx) = oneshot::channel();
        let entry_id = {
            let mut g = self.inner.write().await;
            g.next_seq += 1;
            let id = queue_entry_id(g.next_seq);
            g.queue.push_back(QueueEntry { id: id.clone(), payload });
            g.responders.insert(id.clone(), tx);
            id
        };

        let event = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(bytes)) => QueueEvent { entry_id, bytes: Some(bytes), watched: None },
            Ok(Err(_)) => QueueEvent {
                watched: Some(WatchedEvent {
                    path: response_path(&entry_id),
                    kind: WatchEventKind::NodeDeleted,
                }),
                entry_id,
                bytes: None,
            },
            Err(_) => {
                // The entry stays queued; only the waiter goes away.
                self.inner.write().await.responders.remove(&entry_id);
                QueueEvent { entry_id, bytes: None, watched: None }
            }
        };
        Ok(event)
    }

    async fn pending(&self) -> Result<Vec<QueueEntry>, CplaneError> {
        Ok(self.inner.read().await.queue.iter().cloned().collect())
    }

    async fn take(&self) -> Result<Option<QueueEntry>, CplaneError> {
        Ok(self.inner.write().await.queue.pop_front())
    }

    async fn respond(&self, entry_id: &str, response: Vec<u8>) -> Result<(), CplaneError> {
        if let Some(tx) = self.inner.write().await.responders.remove(entry_id) {
            if tx.send(response).is_err() {
                tracing::debug!(entry_id, "response arrived after the waiter gave up");
            }
        }
        Ok(())
    }
}

impl AsyncTaskStore for MemCoordinationStore {
    async fn claim_async_id(&self, id: &str) -> Result<bool, CplaneError> {
        Ok(self.inner.write().await.async_ids.insert(id.to_string()))
    }

    async fn release_async_id(&self, id: &str) -> Result<(), CplaneError> {
        self.inner.write().await.async_ids.remove(id);
        Ok(())
    }

    async fn put_task(&self, map: TaskMap, id: &str, value: Vec<u8>) -> Result<(), CplaneError> {
        self.inner.write().await.maps.entry(map).or_default().insert(id.to_string(), value);
        Ok(())
    }

    async fn get_task(&self, map: TaskMap, id: &str) -> Result<Option<Vec<u8>>, CplaneError> {
        Ok(self.inner.read().await.map(map).and_then(|m| m.get(id).cloned()))
    }

    async fn contains_task(&self, map: TaskMap, id: &str) -> Result<bool, CplaneError> {
        Ok(self.inner.read().await.map(map).map(|m| m.contains_key(id)).unwrap_or(false))
    }

    async fn remove_task(&self, map: TaskMap, id: &str) -> Result<bool, CplaneError> {
        let mut g = self.inner.write().await;
        Ok(g.maps.get_mut(&map).map(|m| m.remove(id).is_some()).unwrap_or(false))
    }

    async fn delete_terminal(&self, id: &str) -> Result<bool, CplaneError> {
        let mut g = self.inner.write().await;
        let mut removed = false;
        for map in [TaskMap::Completed, TaskMap::Failed] {
            if let Some(m) = g.maps.get_mut(&map) {
                removed |= m.remove(id).is_some();
            }
        }
        if removed {
            g.async_ids.remove(id);
        }
        Ok(removed)
    }

    async fn flush_terminal(&self) -> Result<usize, CplaneError> {
        let mut g = self.inner.write().await;
        let mut ids = BTreeSet::new();
        for map in [TaskMap::Completed, TaskMap::Failed] {
            if let Some(m) = g.maps.get_mut(&map) {
                ids.extend(std::mem::take(m).into_keys());
            }
        }
        for id in &ids {
            g.async_ids.remove(id);
        }
        Ok(ids.len())
    }
}

impl ClusterStateStore for MemCoordinationStore {
    fn snapshot(&self) -> Arc<ClusterState> {
        self.state.snapshot()
    }

    fn subscribe(&self, collection: &str, watcher: StateWatcher) -> WatcherId {
        self.state.subscribe(collection, watcher)
    }

    fn unsubscribe(&self, id: WatcherId) {
        self.state.unsubscribe(id)
    }
}

impl TermStore for MemCoordinationStore {
    async fn shard_terms(&self, collection: &str, shard: &str) -> Result<ShardTerms, CplaneError> {
        let key = (collection.to_string(), shard.to_string());
        Ok(self.inner.read().await.terms.get(&key).cloned().unwrap_or_default())
    }

    async fn compare_and_set_terms(
        &self,
        collection: &str,
        shard: &str,
        terms: &ShardTerms,
    ) -> Result<bool, CplaneError> {
        let mut g = self.inner.write().await;
        let slot = g.terms.entry((collection.to_string(), shard.to_string())).or_default();
        if slot.version != terms.version {
            return Ok(false);
        }
        *slot = ShardTerms { version: terms.version + 1, terms: terms.terms.clone() };
        Ok(true)
    }

    async fn lease_shard_terms(&self, collection: &str, shard: &str) -> Result<TermLease, CplaneError> {
        Ok(self.leases.acquire(collection, shard).await)
    }
}
