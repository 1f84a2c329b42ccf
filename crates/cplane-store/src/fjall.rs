use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::oneshot;

use cplane_types::codec::{decode, encode};
use cplane_types::{ClusterState, CplaneError};

use crate::keys::{queue_key, term_key, META_QUEUE_SEQ};
use crate::mem::response_path;
use crate::traits::{AsyncTaskStore, ClusterStateStore, CommandQueue, TermStore};
use crate::types::{
    queue_entry_id, LeaseTable, QueueEntry, QueueEvent, ShardTerms, StateWatcher, TaskMap,
    TermLease, WatchEventKind, WatchedEvent, WatcherId,
};
use crate::watch::ClusterStateCache;

fn fjall_err(e: fjall::Error) -> CplaneError {
    CplaneError::Store(e.to_string())
}

fn join_err(e: tokio::task::JoinError) -> CplaneError {
    CplaneError::Store(e.to_string())
}

// ---------------------------------------------------------------------------
// FjallStore: shared handle wrapping all keyspaces
// ---------------------------------------------------------------------------

/// All keyspaces live in a single fjall `Database` so that cross-keyspace
/// write batches are atomic.
pub struct FjallStore {
    pub db: fjall::Database,
    /// Pending commands: `seq(8)` → bincode(QueueEntry)
    pub queue: fjall::Keyspace,
    /// Claimed async ids: `id_utf8` → b""
    pub async_ids: fjall::Keyspace,
    /// `id_utf8` → bincode(CommandResponse)
    pub completed: fjall::Keyspace,
    /// `id_utf8` → bincode(CommandResponse)
    pub failed: fjall::Keyspace,
    /// `id_utf8` → b""
    pub running: fjall::Keyspace,
    /// `collection ++ \x00 ++ shard` → bincode(ShardTerms)
    pub terms: fjall::Keyspace,
    pub meta: fjall::Keyspace,
}

impl FjallStore {
    /// Open (or create) a `FjallStore` at `path`.
    pub fn open(path: &Path) -> Result<Arc<Self>, CplaneError> {
        let db = fjall::Database::builder(path).open().map_err(fjall_err)?;
        let ks = |name: &str| db.keyspace(name, fjall::KeyspaceCreateOptions::default);
        let queue = ks("queue").map_err(fjall_err)?;
        let async_ids = ks("async_ids").map_err(fjall_err)?;
        let completed = ks("completed").map_err(fjall_err)?;
        let failed = ks("failed").map_err(fjall_err)?;
        let running = ks("running").map_err(fjall_err)?;
        let terms = ks("terms").map_err(fjall_err)?;
        let meta = ks("meta").map_err(fjall_err)?;
        Ok(Arc::new(FjallStore { db, queue, async_ids, completed, failed, running, terms, meta }))
    }

    fn task_keyspace(&self, map: TaskMap) -> &fjall::Keyspace {
        match map {
            TaskMap::Completed => &self.completed,
            TaskMap::Failed => &self.failed,
            TaskMap::Running => &self.running,
        }
    }

    fn append(&self, payload: Vec<u8>) -> Result<String, CplaneError> {
        let seq = match self.meta.get(META_QUEUE_SEQ).map_err(fjall_err)? {
            Some(b) => decode::<u64>(&b)? + 1,
            None => 1,
        };
        let entry = QueueEntry { id: queue_entry_id(seq), payload };
        let mut batch = self.db.batch();
        batch.insert(&self.queue, queue_key(seq).to_vec(), encode(&entry)?);
        batch.insert(&self.meta, META_QUEUE_SEQ.to_vec(), encode(&seq)?);
        batch.commit().map_err(fjall_err)?;
        Ok(entry.id)
    }

    fn queued(&self) -> Result<Vec<(Vec<u8>, QueueEntry)>, CplaneError> {
        let start = queue_key(0).to_vec();
        let end = queue_key(u64::MAX).to_vec();
        self.queue
            .range(start..=end)
            .map(|g| {
                g.into_inner()
                    .map_err(fjall_err)
                    .and_then(|(k, v)| Ok((k.to_vec(), decode::<QueueEntry>(&v)?)))
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// FjallCoordinationStore
// ---------------------------------------------------------------------------

/// Coordination store whose queue, claims, result maps and term tables are
/// durable in fjall. Waiters of synchronous offers, term leases and the
/// cluster-state cache are process-local.
///
/// All blocking I/O is wrapped in `tokio::task::spawn_blocking`.
pub struct FjallCoordinationStore {
    store: Arc<FjallStore>,
    /// Serializes read-modify-write sequences (claims, CAS, queue append).
    write_lock: Arc<Mutex<()>>,
    responders: Arc<Responders>,
    leases: LeaseTable,
    state: ClusterStateCache,
}

impl FjallCoordinationStore {
    pub fn open(path: &Path) -> Result<Self, CplaneError> {
        Ok(Self::new(FjallStore::open(path)?))
    }

    pub fn new(store: Arc<FjallStore>) -> Self {
        FjallCoordinationStore {
            store,
            write_lock: Arc::new(Mutex::new(())),
            responders: Arc::new(Mutex::new(HashMap::new())),
            leases: LeaseTable::default(),
            state: ClusterStateCache::new(ClusterState::default()),
        }
    }

    pub fn cluster_state(&self) -> &ClusterStateCache {
        &self.state
    }

    fn responders(&self) -> MutexGuard<'_, HashMap<String, oneshot::Sender<Vec<u8>>>> {
        lock_responders(&self.responders)
    }
}

type Responders = Mutex<HashMap<String, oneshot::Sender<Vec<u8>>>>;

fn lock_responders(r: &Responders) -> MutexGuard<'_, HashMap<String, oneshot::Sender<Vec<u8>>>> {
    r.lock().unwrap_or_else(|p| p.into_inner())
}

fn with_lock<T>(lock: &Mutex<()>, f: impl FnOnce() -> Result<T, CplaneError>) -> Result<T, CplaneError> {
    let _g = lock.lock().unwrap_or_else(|p| p.into_inner());
    f()
}

impl CommandQueue for FjallCoordinationStore {
    async fn offer(&self, payload: Vec<u8>) -> Result<String, CplaneError> {
        let store = self.store.clone();
        let lock = self.write_lock.clone();
        tokio::task::spawn_blocking(move || with_lock(&lock, || store.append(payload)))
            .await
            .map_err(join_err)?
    }

    async fn offer_and_wait(
        &self,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<QueueEvent, CplaneError> {
        let (tx, rx) = oneshot::channel();
        let store = self.store.clone();
        let lock = self.write_lock.clone();
        let responders = self.responders.clone();
        // The waiter is registered under the write lock, before `take` can
        // hand the entry to the leader.
        let entry_id = tokio::task::spawn_blocking(move || {
            with_lock(&lock, || {
                let id = store.append(payload)?;
                lock_responders(&responders).insert(id.clone(), tx);
                Ok(id)
            })
        })
        .await
        .map_err(join_err)??;

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
                self.responders().remove(&entry_id);
                QueueEvent { entry_id, bytes: None, watched: None }
            }
        };
        Ok(event)
    }

    async fn pending(&self) -> Result<Vec<QueueEntry>, CplaneError> {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<QueueEntry>, CplaneError> {
            Ok(store.queued()?.into_iter().map(|(_, e)| e).collect())
        })
        .await
        .map_err(join_err)?
    }

    async fn take(&self) -> Result<Option<QueueEntry>, CplaneError> {
        let store = self.store.clone();
        let lock = self.write_lock.clone();
        tokio::task::spawn_blocking(move || {
            with_lock(&lock, || {
                let Some((key, entry)) = store.queued()?.into_iter().next() else {
                    return Ok(None);
                };
                store.queue.remove(key).map_err(fjall_err)?;
                Ok(Some(entry))
            })
        })
        .await
        .map_err(join_err)?
    }

    async fn respond(&self, entry_id: &str, response: Vec<u8>) -> Result<(), CplaneError> {
        let tx = self.responders().remove(entry_id);
        if let Some(tx) = tx {
            if tx.send(response).is_err() {
                tracing::debug!(entry_id, "response arrived after the waiter gave up");
            }
        }
        Ok(())
    }
}

impl AsyncTaskStore for FjallCoordinationStore {
    async fn claim_async_id(&self, id: &str) -> Result<bool, CplaneError> {
        let store = self.store.clone();
        let lock = self.write_lock.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || {
            with_lock(&lock, || {
                if store.async_ids.get(id.as_bytes()).map_err(fjall_err)?.is_some() {
                    return Ok(false);
                }
                store.async_ids.insert(id.as_bytes().to_vec(), Vec::new()).map_err(fjall_err)?;
                Ok(true)
            })
        })
        .await
        .map_err(join_err)?
    }

    async fn release_async_id(&self, id: &str) -> Result<(), CplaneError> {
        let store = self.store.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || store.async_ids.remove(id.into_bytes()).map_err(fjall_err))
            .await
            .map_err(join_err)?
    }

    async fn put_task(&self, map: TaskMap, id: &str, value: Vec<u8>) -> Result<(), CplaneError> {
        let store = self.store.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || {
            store.task_keyspace(map).insert(id.into_bytes(), value).map_err(fjall_err)
        })
        .await
        .map_err(join_err)?
    }

    async fn get_task(&self, map: TaskMap, id: &str) -> Result<Option<Vec<u8>>, CplaneError> {
        let store = self.store.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || -> Result<Option<Vec<u8>>, CplaneError> {
            Ok(store.task_keyspace(map).get(id.as_bytes()).map_err(fjall_err)?.map(|b| b.to_vec()))
        })
        .await
        .map_err(join_err)?
    }

    async fn contains_task(&self, map: TaskMap, id: &str) -> Result<bool, CplaneError> {
        Ok(self.get_task(map, id).await?.is_some())
    }

    async fn remove_task(&self, map: TaskMap, id: &str) -> Result<bool, CplaneError> {
        let store = self.store.clone();
        let lock = self.write_lock.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || {
            with_lock(&lock, || {
                let ks = store.task_keyspace(map);
                if ks.get(id.as_bytes()).map_err(fjall_err)?.is_none() {
                    return Ok(false);
                }
                ks.remove(id.into_bytes()).map_err(fjall_err)?;
                Ok(true)
            })
        })
        .await
        .map_err(join_err)?
    }

    async fn delete_terminal(&self, id: &str) -> Result<bool, CplaneError> {
        let store = self.store.clone();
        let lock = self.write_lock.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || {
            with_lock(&lock, || {
                let mut batch = store.db.batch();
                let mut removed = false;
                for ks in [&store.completed, &store.failed] {
                    if ks.get(id.as_bytes()).map_err(fjall_err)?.is_some() {
                        batch.remove(ks, id.as_bytes().to_vec());
                        removed = true;
                    }
                }
                if !removed {
                    return Ok(false);
                }
                batch.remove(&store.async_ids, id.into_bytes());
                batch.commit().map_err(fjall_err)?;
                Ok(true)
            })
        })
        .await
        .map_err(join_err)?
    }

    async fn flush_terminal(&self) -> Result<usize, CplaneError> {
        let store = self.store.clone();
        let lock = self.write_lock.clone();
        tokio::task::spawn_blocking(move || {
            with_lock(&lock, || {
                let mut batch = store.db.batch();
                let mut ids = BTreeSet::new();
                for ks in [&store.completed, &store.failed] {
                    for g in ks.prefix(Vec::<u8>::new()) {
                        let (k, _) = g.into_inner().map_err(fjall_err)?;
                        batch.remove(ks, k.to_vec());
                        ids.insert(k.to_vec());
                    }
                }
                for id in &ids {
                    batch.remove(&store.async_ids, id.clone());
                }
                batch.commit().map_err(fjall_err)?;
                Ok(ids.len())
            })
        })
        .await
        .map_err(join_err)?
    }
}

impl ClusterStateStore for FjallCoordinationStore {
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

impl TermStore for FjallCoordinationStore {
    async fn shard_terms(&self, collection: &str, shard: &str) -> Result<ShardTerms, CplaneError> {
        let store = self.store.clone();
        let key = term_key(collection, shard);
        tokio::task::spawn_blocking(move || -> Result<ShardTerms, CplaneError> {
            match store.terms.get(key).map_err(fjall_err)? {
                Some(b) => decode::<ShardTerms>(&b),
                None => Ok(ShardTerms::default()),
            }
        })
        .await
        .map_err(join_err)?
    }

    async fn compare_and_set_terms(
        &self,
        collection: &str,
        shard: &str,
        terms: &ShardTerms,
    ) -> Result<bool, CplaneError> {
        let store = self.store.clone();
        let lock = self.write_lock.clone();
        let key = term_key(collection, shard);
        let next = ShardTerms { version: terms.version + 1, terms: terms.terms.clone() };
        let expected = terms.version;
        tokio::task::spawn_blocking(move || {
            with_lock(&lock, || {
                let current = match store.terms.get(key.as_slice()).map_err(fjall_err)? {
                    Some(b) => decode::<ShardTerms>(&b)?.version,
                    None => 0,
                };
                if current != expected {
                    return Ok(false);
                }
                store.terms.insert(key, encode(&next)?).map_err(fjall_err)?;
                Ok(true)
            })
        })
        .await
        .map_err(join_err)?
    }

    async fn lease_shard_terms(&self, collection: &str, shard: &str) -> Result<TermLease, CplaneError> {
        Ok(self.leases.acquire(collection, shard).await)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn open_store(dir: &Path) -> FjallCoordinationStore {
        FjallCoordinationStore::open(dir).expect("open store")
    }

    #[tokio::test]
    async fn queue_fifo_and_take() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());

        let a = store.offer(b"a".to_vec()).await.unwrap();
        let b = store.offer(b"b".to_vec()).await.unwrap();
        assert_eq!(a, "qn-0000000001");
        assert_eq!(b, "qn-0000000002");

        let pending = store.pending().await.unwrap();
        assert_eq!(pending.iter().map(|e| e.id.as_str()).collect::<Vec<_>>(), vec![a.as_str(), b.as_str()]);

        assert_eq!(store.take().await.unwrap().unwrap().payload, b"a");
        assert_eq!(store.pending().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn claims_and_maps() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());

        assert!(store.claim_async_id("job-1").await.unwrap());
        assert!(!store.claim_async_id("job-1").await.unwrap());

        store.put_task(TaskMap::Failed, "job-1", b"boom".to_vec()).await.unwrap();
        store.put_task(TaskMap::Failed, "job-2", b"bang".to_vec()).await.unwrap();
        assert!(store.contains_task(TaskMap::Failed, "job-1").await.unwrap());
        assert!(!store.contains_task(TaskMap::Completed, "job-1").await.unwrap());

        assert!(store.remove_task(TaskMap::Failed, "job-1").await.unwrap());
        assert!(!store.remove_task(TaskMap::Failed, "job-1").await.unwrap());
        store.release_async_id("job-1").await.unwrap();
        assert!(store.claim_async_id("job-1").await.unwrap());
    }

    #[tokio::test]
    async fn terminal_delete_and_flush_release_claims() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        for id in ["a", "b", "c", "d"] {
            assert!(store.claim_async_id(id).await.unwrap());
        }
        store.put_task(TaskMap::Completed, "a", b"ok".to_vec()).await.unwrap();
        store.put_task(TaskMap::Failed, "b", b"boom".to_vec()).await.unwrap();
        store.put_task(TaskMap::Failed, "c", b"bang".to_vec()).await.unwrap();
        store.put_task(TaskMap::Running, "d", Vec::new()).await.unwrap();

        assert!(store.delete_terminal("a").await.unwrap());
        assert!(!store.delete_terminal("a").await.unwrap());
        assert!(!store.delete_terminal("d").await.unwrap());

        assert_eq!(store.flush_terminal().await.unwrap(), 2);
        assert!(!store.contains_task(TaskMap::Failed, "b").await.unwrap());
        assert!(store.contains_task(TaskMap::Running, "d").await.unwrap());
        // Released claims can be taken again; the running one cannot.
        for id in ["a", "b", "c"] {
            assert!(store.claim_async_id(id).await.unwrap());
        }
        assert!(!store.claim_async_id("d").await.unwrap());
    }

    #[tokio::test]
    async fn terms_cas_rejects_stale_version() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());

        let mut t = store.shard_terms("orders", "shard1").await.unwrap();
        t.register("r1");
        t.register("r2");
        assert!(store.compare_and_set_terms("orders", "shard1", &t).await.unwrap());
        assert!(!store.compare_and_set_terms("orders", "shard1", &t).await.unwrap());

        let stored = store.shard_terms("orders", "shard1").await.unwrap();
        assert_eq!(stored.version, 1);
        assert_eq!(stored.terms.len(), 2);
    }

    #[tokio::test]
    async fn durable_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = open_store(dir.path());
            store.offer(b"queued".to_vec()).await.unwrap();
            assert!(store.claim_async_id("job-9").await.unwrap());
            store.put_task(TaskMap::Completed, "job-9", b"ok".to_vec()).await.unwrap();
        }

        let store = open_store(dir.path());
        assert_eq!(store.pending().await.unwrap().len(), 1);
        assert!(!store.claim_async_id("job-9").await.unwrap());
        assert_eq!(store.get_task(TaskMap::Completed, "job-9").await.unwrap().unwrap(), b"ok");
        // Sequence numbers continue after reopen.
        assert_eq!(store.offer(b"next".to_vec()).await.unwrap(), "qn-0000000002");
    }
}
