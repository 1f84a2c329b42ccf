use std::sync::Arc;

use cplane_consensus::CommandRunner;
use cplane_store::{AsyncTaskStore, CommandQueue, TaskMap};
use cplane_types::codec::decode;
use cplane_types::{AsyncState, CommandEnvelope, CommandResponse, CplaneError, TaskStatus};

/// Async task lifecycle backed by the coordination store's result maps and
/// the pending queue (queue mode).
pub struct QueueTaskRegistry<S> {
    store: Arc<S>,
}

impl<S: CommandQueue + AsyncTaskStore> QueueTaskRegistry<S> {
    pub fn new(store: Arc<S>) -> Self {
        QueueTaskRegistry { store }
    }

    /// Completed, failed, running, then pending: first match wins.
    pub async fn query_status(&self, async_id: &str) -> Result<TaskStatus, CplaneError> {
        for (map, state) in [(TaskMap::Completed, AsyncState::Completed), (TaskMap::Failed, AsyncState::Failed)] {
            if let Some(bytes) = self.store.get_task(map, async_id).await? {
                let resp: CommandResponse = decode(&bytes)?;
                return Ok(TaskStatus::new(async_id, state, Some(resp)));
            }
        }
        if self.store.contains_task(TaskMap::Running, async_id).await? {
            return Ok(TaskStatus::new(async_id, AsyncState::Running, None));
        }
        if self.is_pending(async_id).await? {
            return Ok(TaskStatus::new(async_id, AsyncState::Submitted, None));
        }
        Ok(TaskStatus::new(async_id, AsyncState::NotFound, None))
    }

    async fn is_pending(&self, async_id: &str) -> Result<bool, CplaneError> {
        for entry in self.store.pending().await? {
            match CommandEnvelope::from_bytes(&entry.payload) {
                Ok(env) if env.async_id.as_deref() == Some(async_id) => return Ok(true),
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(entry_id = %entry.id, error = %e, "skipping undecodable queue entry");
                }
            }
        }
        Ok(false)
    }

    /// Remove a terminal record and release its claim. Returns `false`, and
    /// releases nothing, when neither terminal map holds the ID.
    pub async fn delete(&self, async_id: &str) -> Result<bool, CplaneError> {
        let removed = self.store.delete_terminal(async_id).await?;
        if removed {
            tracing::debug!(async_id, "deleted async task record");
        }
        Ok(removed)
    }

    /// Remove and release every completed and failed record. Running and
    /// pending tasks are untouched.
    pub async fn flush(&self) -> Result<usize, CplaneError> {
        let removed = self.store.flush_terminal().await?;
        tracing::info!(removed, "flushed async task records");
        Ok(removed)
    }
}

/// One status contract over either backing.
pub enum AsyncTaskRegistry<S, R> {
    Queue(QueueTaskRegistry<S>),
    Direct(Arc<R>),
}

impl<S, R> AsyncTaskRegistry<S, R>
where
    S: CommandQueue + AsyncTaskStore,
    R: CommandRunner,
{
    pub async fn query_status(&self, async_id: &str) -> Result<TaskStatus, CplaneError> {
        match self {
            AsyncTaskRegistry::Queue(q) => q.query_status(async_id).await,
            AsyncTaskRegistry::Direct(runner) => {
                let (state, resp) = runner.async_status(async_id).await?;
                Ok(TaskStatus::new(async_id, state, resp))
            }
        }
    }

    pub async fn delete(&self, async_id: &str) -> Result<bool, CplaneError> {
        match self {
            AsyncTaskRegistry::Queue(q) => q.delete(async_id).await,
            AsyncTaskRegistry::Direct(runner) => runner.delete_async_id(async_id).await,
        }
    }

    pub async fn flush(&self) -> Result<usize, CplaneError> {
        match self {
            AsyncTaskRegistry::Queue(q) => q.flush().await,
            AsyncTaskRegistry::Direct(runner) => runner.delete_all_async_ids().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use cplane_store::MemCoordinationStore;
    use cplane_types::codec::encode;
    use cplane_types::CollectionCommand;

    use super::*;

    fn setup() -> (Arc<MemCoordinationStore>, QueueTaskRegistry<MemCoordinationStore>) {
        let store = Arc::new(MemCoordinationStore::new());
        (store.clone(), QueueTaskRegistry::new(store))
    }

    async fn finish(store: &MemCoordinationStore, map: TaskMap, id: &str) {
        assert!(store.claim_async_id(id).await.unwrap());
        let resp = CommandResponse::accepted(id).with_success("n1", "done");
        store.put_task(map, id, encode(&resp).unwrap()).await.unwrap();
    }

    #[tokio::test]
    async fn lookup_order() {
        let (store, registry) = setup();

        let env = CommandEnvelope::new(
            &CollectionCommand::Reload { name: "orders".into() },
            Some("queued".into()),
            Duration::from_secs(1),
        )
        .unwrap();
        store.offer(env.to_bytes().unwrap()).await.unwrap();
        // Foreign bytes in the queue do not break the scan.
        store.offer(b"garbage".to_vec()).await.unwrap();
        assert_eq!(registry.query_status("queued").await.unwrap().state, AsyncState::Submitted);

        store.put_task(TaskMap::Running, "queued", Vec::new()).await.unwrap();
        assert_eq!(registry.query_status("queued").await.unwrap().state, AsyncState::Running);

        finish(&store, TaskMap::Failed, "queued").await;
        let status = registry.query_status("queued").await.unwrap();
        assert_eq!(status.state, AsyncState::Failed);
        assert!(status.response.is_some());

        let missing = registry.query_status("nope").await.unwrap();
        assert_eq!(missing.state, AsyncState::NotFound);
        assert_eq!(missing.message, "Did not find [nope] in any tasks queue");
    }

    #[tokio::test]
    async fn delete_releases_only_terminal_ids() {
        let (store, registry) = setup();
        finish(&store, TaskMap::Completed, "done").await;
        assert!(store.claim_async_id("busy").await.unwrap());
        store.put_task(TaskMap::Running, "busy", Vec::new()).await.unwrap();

        assert!(registry.delete("done").await.unwrap());
        assert!(!store.is_claimed("done").await);

        assert!(!registry.delete("busy").await.unwrap());
        assert!(store.is_claimed("busy").await);
        assert!(!registry.delete("never").await.unwrap());
    }

    #[tokio::test]
    async fn flush_clears_terminal_records_only() {
        let (store, registry) = setup();
        finish(&store, TaskMap::Completed, "a").await;
        finish(&store, TaskMap::Failed, "b").await;
        assert!(store.claim_async_id("c").await.unwrap());
        store.put_task(TaskMap::Running, "c", Vec::new()).await.unwrap();
        assert!(store.claim_async_id("d").await.unwrap());
        let queued = CommandEnvelope::new(
            &CollectionCommand::Reload { name: "orders".into() },
            Some("d".into()),
            Duration::from_secs(1),
        )
        .unwrap();
        store.offer(queued.to_bytes().unwrap()).await.unwrap();

        assert_eq!(registry.flush().await.unwrap(), 2);
        assert_eq!(registry.query_status("a").await.unwrap().state, AsyncState::NotFound);
        assert_eq!(registry.query_status("b").await.unwrap().state, AsyncState::NotFound);
        assert_eq!(registry.query_status("c").await.unwrap().state, AsyncState::Running);
        assert_eq!(registry.query_status("d").await.unwrap().state, AsyncState::Submitted);
        assert!(store.is_claimed("c").await);
        assert!(store.is_claimed("d").await);
        assert!(!store.is_claimed("a").await);
        assert!(!store.is_claimed("b").await);
    }
}
