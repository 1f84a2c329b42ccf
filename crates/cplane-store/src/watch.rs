use std::sync::{Arc, Mutex, MutexGuard};

use cplane_types::ClusterState;

use crate::types::{StateWatcher, WatchDecision, WatcherId};

struct Registered {
    id: WatcherId,
    collection: String,
    watcher: StateWatcher,
}

struct CacheInner {
    current: Arc<ClusterState>,
    watchers: Vec<Registered>,
    next_id: WatcherId,
}

/// Locally observed cluster state plus the collection-scoped watchers fed by
/// it. The store adapter calls [`ClusterStateCache::publish`] from its watch
/// delivery path; watchers run inline, under the cache lock, on that thread.
pub struct ClusterStateCache {
    inner: Mutex<CacheInner>,
}

impl ClusterStateCache {
    pub fn new(initial: ClusterState) -> Self {
        ClusterStateCache {
            inner: Mutex::new(CacheInner {
                current: Arc::new(initial),
                watchers: Vec::new(),
                next_id: 1,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn snapshot(&self) -> Arc<ClusterState> {
        self.lock().current.clone()
    }

    pub fn subscribe(&self, collection: &str, mut watcher: StateWatcher) -> WatcherId {
        let mut g = self.lock();
        let id = g.next_id;
        g.next_id += 1;
        // Eager first evaluation: the change may have landed before we got here.
        let current = g.current.clone();
        if watcher(&current) == WatchDecision::Keep {
            g.watchers.push(Registered { id, collection: collection.to_string(), watcher });
        }
        id
    }

    pub fn unsubscribe(&self, id: WatcherId) {
        self.lock().watchers.retain(|w| w.id != id);
    }

    pub fn watcher_count(&self) -> usize {
        self.lock().watchers.len()
    }

    /// Install `state` as the next snapshot and notify watchers whose
    /// collection (or the live-node set) changed.
    pub fn publish(&self, state: ClusterState) {
        let mut g = self.lock();
        Self::publish_locked(&mut g, state);
    }

    /// Copy-on-write helper: clone the current snapshot, edit, publish. The
    /// lock is held throughout so concurrent edits are never lost.
    pub fn update(&self, edit: impl FnOnce(&mut ClusterState)) {
        let mut g = self.lock();
        let mut state = (*g.current).clone();
        edit(&mut state);
        Self::publish_locked(&mut g, state);
    }

    fn publish_locked(g: &mut CacheInner, mut state: ClusterState) {
        state.version = g.current.version + 1;
        let next = Arc::new(state);
        let prev = std::mem::replace(&mut g.current, next.clone());
        let live_changed = prev.live_nodes != next.live_nodes;

        tracing::debug!(version = next.version, watchers = g.watchers.len(), "cluster state published");

        g.watchers.retain_mut(|w| {
            if !live_changed && prev.collection(&w.collection) == next.collection(&w.collection) {
                return true;
            }
            (w.watcher)(&next) == WatchDecision::Keep
        });
    }
}

impl Default for ClusterStateCache {
    fn default() -> Self {
        Self::new(ClusterState::default())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use cplane_types::Collection;

    use super::*;

    fn counting_watcher(hits: Arc<AtomicUsize>, stop_after: usize) -> StateWatcher {
        Box::new(move |_state| {
            let n = hits.fetch_add(1, Ordering::SeqCst) + 1;
            if n >= stop_after { WatchDecision::Remove } else { WatchDecision::Keep }
        })
    }

    #[test]
    fn subscribe_evaluates_eagerly() {
        let cache = ClusterStateCache::default();
        let hits = Arc::new(AtomicUsize::new(0));
        cache.subscribe("orders", counting_watcher(hits.clone(), 1));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        // Satisfied on first look, so never registered.
        assert_eq!(cache.watcher_count(), 0);
    }

    #[test]
    fn publish_only_wakes_watchers_of_changed_collections() {
        let cache = ClusterStateCache::default();
        let orders = Arc::new(AtomicUsize::new(0));
        let users = Arc::new(AtomicUsize::new(0));
        cache.subscribe("orders", counting_watcher(orders.clone(), 100));
        cache.subscribe("users", counting_watcher(users.clone(), 100));

        cache.update(|s| {
            s.collections.insert("orders".into(), Collection::default());
        });
        assert_eq!(orders.load(Ordering::SeqCst), 2);
        assert_eq!(users.load(Ordering::SeqCst), 1);

        // Live-node changes reach everyone.
        cache.update(|s| {
            s.live_nodes.insert("n1".into());
        });
        assert_eq!(orders.load(Ordering::SeqCst), 3);
        assert_eq!(users.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn publish_bumps_version_and_unsubscribe_stops_delivery() {
        let cache = ClusterStateCache::default();
        let hits = Arc::new(AtomicUsize::new(0));
        let id = cache.subscribe("orders", counting_watcher(hits.clone(), 100));
        cache.unsubscribe(id);
        cache.update(|s| {
            s.collections.insert("orders".into(), Collection::default());
        });
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(cache.snapshot().version, 1);
    }

    #[test]
    fn concurrent_updates_are_not_lost() {
        let cache = Arc::new(ClusterStateCache::default());
        let threads: Vec<_> = (0..4)
            .map(|t| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    for i in 0..500 {
                        cache.update(|s| {
                            s.live_nodes.insert(format!("n{t}-{i}"));
                        });
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        let state = cache.snapshot();
        assert_eq!(state.live_nodes.len(), 2000);
        assert_eq!(state.version, 2000);
    }
}
