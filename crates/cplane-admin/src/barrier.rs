use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;

use cplane_store::{ClusterStateStore, StateWatcher, WatchDecision, WatcherId};
use cplane_types::{ClusterState, CplaneError, Replica, ReplicaState};

/// Number of replicas in `collection` that are not both on a live node and
/// ACTIVE. With `check_leader_only`, only shard leaders count and a shard
/// without a leader counts as one. `None` when the collection is absent.
pub fn non_compliant_replicas(
    state: &ClusterState,
    collection: &str,
    check_leader_only: bool,
) -> Option<usize> {
    let coll = state.collection(collection)?;
    let healthy = |r: &Replica| state.is_live(&r.node_name) && r.state == ReplicaState::Active;
    let count = coll
        .slices
        .values()
        .map(|slice| {
            if check_leader_only {
                match slice.leader() {
                    Some(leader) if healthy(leader) => 0,
                    _ => 1,
                }
            } else {
                slice.replicas.iter().filter(|r| !healthy(r)).count()
            }
        })
        .sum();
    Some(count)
}

/// An absent collection is treated as converged: the command did not create
/// it, so there is nothing to wait for.
pub fn is_converged(
    state: &ClusterState,
    collection: &str,
    check_leader_only: bool,
    allowed_failures: usize,
) -> bool {
    match non_compliant_replicas(state, collection, check_leader_only) {
        None => true,
        Some(n) => n <= allowed_failures,
    }
}

struct Subscription<'a, S: ClusterStateStore> {
    store: &'a S,
    id: WatcherId,
}

impl<S: ClusterStateStore> Drop for Subscription<'_, S> {
    fn drop(&mut self) {
        self.store.unsubscribe(self.id);
    }
}

/// Waits for cluster-state notifications to show a collection as active.
pub struct ConvergenceBarrier<S> {
    store: Arc<S>,
}

impl<S: ClusterStateStore> ConvergenceBarrier<S> {
    pub fn new(store: Arc<S>) -> Self {
        ConvergenceBarrier { store }
    }

    /// The predicate runs once at subscription and then inside the store's
    /// delivery callback; the callback only signals this task. The
    /// subscription is removed on every exit path, including cancellation.
    pub async fn await_active(
        &self,
        collection: &str,
        max_wait: Duration,
        check_leader_only: bool,
        allowed_failures: usize,
    ) -> Result<(), CplaneError> {
        let check = if check_leader_only { "leaders" } else { "replicas" };
        tracing::info!(
            collection,
            max_wait_secs = max_wait.as_secs(),
            check,
            "waiting for collection to become active"
        );

        let (tx, rx) = oneshot::channel::<()>();
        let mut tx = Some(tx);
        let name = collection.to_string();
        let watcher: StateWatcher = Box::new(move |state| {
            if !is_converged(state, &name, check_leader_only, allowed_failures) {
                return WatchDecision::Keep;
            }
            if let Some(tx) = tx.take() {
                let _ = tx.send(());
            }
            WatchDecision::Remove
        });

        let _sub = Subscription { store: &*self.store, id: self.store.subscribe(collection, watcher) };

        match tokio::time::timeout(max_wait, rx).await {
            Ok(Ok(())) => {
                tracing::debug!(collection, "collection active");
                Ok(())
            }
            Ok(Err(_)) => Err(CplaneError::Store(format!(
                "cluster state subscription for {collection} dropped"
            ))),
            Err(_) => {
                tracing::warn!(collection, max_wait_secs = max_wait.as_secs(), "collection did not become active");
                Err(CplaneError::ClusterStateTimeout {
                    collection: collection.to_string(),
                    waited_secs: max_wait.as_secs(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use cplane_store::MemCoordinationStore;
    use cplane_types::{Collection, Slice};

    use super::*;

    fn replica(name: &str, node: &str, state: ReplicaState) -> Replica {
        Replica::new(name, node, state)
    }

    fn orders(states: &[ReplicaState], leader: Option<&str>) -> Collection {
        let replicas = states
            .iter()
            .enumerate()
            .map(|(i, s)| replica(&format!("r{}", i + 1), &format!("n{}", i + 1), *s))
            .collect();
        let mut coll = Collection::default();
        coll.slices.insert("shard1".into(), Slice { replicas, leader: leader.map(str::to_string) });
        coll
    }

    fn live(state: ClusterState) -> ClusterState {
        state.with_live_node("n1").with_live_node("n2").with_live_node("n3")
    }

    #[test]
    fn predicate_counts_dead_nodes_and_states() {
        use ReplicaState::*;
        let state = live(ClusterState::default())
            .with_collection("orders", orders(&[Active, Down, Active], Some("r1")));
        assert_eq!(non_compliant_replicas(&state, "orders", false), Some(1));
        assert_eq!(non_compliant_replicas(&state, "orders", true), Some(0));
        assert_eq!(non_compliant_replicas(&state, "missing", false), None);

        // r1 is ACTIVE but its node is gone.
        let mut state = state;
        state.live_nodes.remove("n1");
        assert_eq!(non_compliant_replicas(&state, "orders", false), Some(2));
        assert_eq!(non_compliant_replicas(&state, "orders", true), Some(1));
    }

    #[test]
    fn missing_leader_counts_once() {
        let state = live(ClusterState::default())
            .with_collection("orders", orders(&[ReplicaState::Active], None));
        assert_eq!(non_compliant_replicas(&state, "orders", true), Some(1));
        assert!(!is_converged(&state, "orders", true, 0));
        assert!(is_converged(&state, "orders", true, 1));
    }

    #[tokio::test]
    async fn absent_collection_is_immediately_converged() {
        let store = Arc::new(MemCoordinationStore::new());
        let barrier = ConvergenceBarrier::new(store.clone());
        barrier.await_active("ghost", Duration::from_millis(1), false, 0).await.unwrap();
        assert_eq!(store.cluster_state().watcher_count(), 0);
    }

    #[tokio::test]
    async fn partial_failure_within_allowance() {
        use ReplicaState::*;
        let state = live(ClusterState::default())
            .with_collection("orders", orders(&[Active, RecoveryFailed, Active], Some("r1")));
        let store = Arc::new(MemCoordinationStore::with_state(state));
        let barrier = ConvergenceBarrier::new(store);
        barrier.await_active("orders", Duration::from_secs(1), false, 1).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn converges_on_notification() {
        use ReplicaState::*;
        let state = live(ClusterState::default())
            .with_collection("orders", orders(&[Recovering, Recovering], None));
        let store = Arc::new(MemCoordinationStore::with_state(state));
        let barrier = ConvergenceBarrier::new(store.clone());

        let publisher = store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            publisher.cluster_state().update(|s| {
                s.collections.insert("orders".into(), orders(&[Active, Active], Some("r1")));
            });
        });

        barrier.await_active("orders", Duration::from_secs(30), false, 0).await.unwrap();
        assert_eq!(store.cluster_state().watcher_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_and_unsubscribes() {
        let state = live(ClusterState::default())
            .with_collection("orders", orders(&[ReplicaState::Down], Some("r1")));
        let store = Arc::new(MemCoordinationStore::with_state(state));
        let barrier = ConvergenceBarrier::new(store.clone());

        let err = barrier.await_active("orders", Duration::from_secs(30), false, 0).await.unwrap_err();
        match err {
            CplaneError::ClusterStateTimeout { collection, waited_secs } => {
                assert_eq!(collection, "orders");
                assert_eq!(waited_secs, 30);
            }
            other => panic!("expected ClusterStateTimeout, got {other:?}"),
        }
        assert_eq!(store.cluster_state().watcher_count(), 0);
    }
}
