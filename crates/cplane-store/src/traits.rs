use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use cplane_types::{ClusterState, CplaneError};

use crate::types::{QueueEntry, QueueEvent, ShardTerms, StateWatcher, TaskMap, TermLease, WatcherId};

/// Durable FIFO queue consumed by the single control-plane leader.
///
/// Methods use RPITIT (`-> impl Future + Send`) so that generic callers can
/// `.await` across thread boundaries without an `async-trait` dependency.
pub trait CommandQueue: Send + Sync + 'static {
    /// Append a payload. Returns the store-assigned entry id.
    fn offer(&self, payload: Vec<u8>) -> impl Future<Output = Result<String, CplaneError>> + Send;

    /// Append a payload and wait up to `timeout` for the leader's response.
    ///
    /// A timeout is not an error: it comes back as a `QueueEvent` with neither
    /// `bytes` nor `watched` set, and the entry stays queued.
    fn offer_and_wait(
        &self,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> impl Future<Output = Result<QueueEvent, CplaneError>> + Send;

    /// Snapshot of entries not yet taken by the leader, oldest first.
    fn pending(&self) -> impl Future<Output = Result<Vec<QueueEntry>, CplaneError>> + Send;

    /// Leader side: remove and return the oldest entry.
    fn take(&self) -> impl Future<Output = Result<Option<QueueEntry>, CplaneError>> + Send;

    /// Leader side: deliver the serialized response for `entry_id`. A response
    /// whose waiter already gave up is dropped silently.
    fn respond(
        &self,
        entry_id: &str,
        response: Vec<u8>,
    ) -> impl Future<Output = Result<(), CplaneError>> + Send;
}

/// Async-ID claims and the completed / failed / running result maps.
pub trait AsyncTaskStore: Send + Sync + 'static {
    /// Exclusive, first-writer-wins claim. `false` when already claimed.
    fn claim_async_id(&self, id: &str) -> impl Future<Output = Result<bool, CplaneError>> + Send;

    fn release_async_id(&self, id: &str) -> impl Future<Output = Result<(), CplaneError>> + Send;

    fn put_task(
        &self,
        map: TaskMap,
        id: &str,
        value: Vec<u8>,
    ) -> impl Future<Output = Result<(), CplaneError>> + Send;

    fn get_task(
        &self,
        map: TaskMap,
        id: &str,
    ) -> impl Future<Output = Result<Option<Vec<u8>>, CplaneError>> + Send;

    fn contains_task(
        &self,
        map: TaskMap,
        id: &str,
    ) -> impl Future<Output = Result<bool, CplaneError>> + Send;

    /// Returns whether an entry was removed.
    fn remove_task(
        &self,
        map: TaskMap,
        id: &str,
    ) -> impl Future<Output = Result<bool, CplaneError>> + Send;

    /// Drop `id` from the completed and failed maps and release its claim in
    /// one step. Returns `false`, releasing nothing, when neither map held it.
    fn delete_terminal(&self, id: &str) -> impl Future<Output = Result<bool, CplaneError>> + Send;

    /// Drop every completed and failed record and release their claims in
    /// one step. Running tasks and pending claims stay. Returns the number of
    /// IDs removed.
    fn flush_terminal(&self) -> impl Future<Output = Result<usize, CplaneError>> + Send;
}

/// Watch-driven view of the cluster state.
pub trait ClusterStateStore: Send + Sync + 'static {
    fn snapshot(&self) -> Arc<ClusterState>;

    /// Register `watcher` for changes to `collection`. The watcher is run once
    /// immediately against the current snapshot; if it returns
    /// `WatchDecision::Remove` it is never registered.
    fn subscribe(&self, collection: &str, watcher: StateWatcher) -> WatcherId;

    fn unsubscribe(&self, id: WatcherId);
}

/// Per-shard replica terms.
pub trait TermStore: Send + Sync + 'static {
    /// Current table; empty (version 0) for an unknown shard.
    fn shard_terms(
        &self,
        collection: &str,
        shard: &str,
    ) -> impl Future<Output = Result<ShardTerms, CplaneError>> + Send;

    /// Replace the whole table iff the stored version still equals
    /// `terms.version`. All replicas change together or none do.
    fn compare_and_set_terms(
        &self,
        collection: &str,
        shard: &str,
        terms: &ShardTerms,
    ) -> impl Future<Output = Result<bool, CplaneError>> + Send;

    fn lease_shard_terms(
        &self,
        collection: &str,
        shard: &str,
    ) -> impl Future<Output = Result<TermLease, CplaneError>> + Send;
}

/// Everything the orchestration layer needs from the coordination store.
pub trait CoordinationStore: CommandQueue + AsyncTaskStore + ClusterStateStore + TermStore {}

impl<T> CoordinationStore for T where T: CommandQueue + AsyncTaskStore + ClusterStateStore + TermStore {}
