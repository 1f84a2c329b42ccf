use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use tokio::sync::RwLock;

use cplane_types::{AsyncState, CommandEnvelope, CommandResponse, CplaneError};

// ---------------------------------------------------------------------------
// CommandExecutor trait
// Uses RPITIT (Return Position Impl Trait In Trait, stable since Rust 1.75).
// The explicit `+ Send` bound on each future ensures generic callers can
// `.await` across thread boundaries.
// ---------------------------------------------------------------------------

/// Applies a collection command to the cluster. Lives outside this crate; the
/// runner only orders calls and tracks their outcome.
pub trait CommandExecutor: Send + Sync + 'static {
    fn execute(
        &self,
        envelope: CommandEnvelope,
    ) -> impl std::future::Future<Output = Result<CommandResponse, CplaneError>> + Send;
}

// ---------------------------------------------------------------------------
// CommandRunner trait
// ---------------------------------------------------------------------------

/// Direct-mode execution path. Ordering and durability come from the
/// consensus protocol, so there is no queue and no external claim: the runner
/// tracks async IDs itself.
pub trait CommandRunner: Send + Sync + 'static {
    /// Synchronous when `envelope.async_id` is `None`, bounded by the
    /// envelope timeout. With an async ID, returns as soon as the ID is
    /// claimed (or found to be a duplicate).
    fn run_command(
        &self,
        envelope: CommandEnvelope,
    ) -> impl std::future::Future<Output = Result<CommandResponse, CplaneError>> + Send;

    fn async_status(
        &self,
        async_id: &str,
    ) -> impl std::future::Future<Output = Result<(AsyncState, Option<CommandResponse>), CplaneError>>
           + Send;

    /// Remove a terminal record and release its ID. `false` if no terminal
    /// record exists.
    fn delete_async_id(
        &self,
        async_id: &str,
    ) -> impl std::future::Future<Output = Result<bool, CplaneError>> + Send;

    /// Remove every terminal record. Returns how many were removed.
    fn delete_all_async_ids(
        &self,
    ) -> impl std::future::Future<Output = Result<usize, CplaneError>> + Send;
}

// ---------------------------------------------------------------------------
// LocalCommandRunner: in-process runner over a CommandExecutor
// ---------------------------------------------------------------------------

#[derive(Default)]
struct RunnerInner {
    claimed: HashSet<String>,
    running: HashSet<String>,
    completed: BTreeMap<String, CommandResponse>,
    failed: BTreeMap<String, CommandResponse>,
}

pub struct LocalCommandRunner<E> {
    executor: Arc<E>,
    inner: Arc<RwLock<RunnerInner>>,
}

impl<E: CommandExecutor> LocalCommandRunner<E> {
    pub fn new(executor: E) -> Self {
        LocalCommandRunner {
            executor: Arc::new(executor),
            inner: Arc::new(RwLock::new(RunnerInner::default())),
        }
    }

    async fn start_async(
        &self,
        async_id: String,
        envelope: CommandEnvelope,
    ) -> Result<CommandResponse, CplaneError> {
        {
            let mut g = self.inner.write().await;
            if !g.claimed.insert(async_id.clone()) {
                tracing::info!(async_id = %async_id, "async id already claimed");
                return Ok(CommandResponse::duplicate(async_id));
            }
            g.running.insert(async_id.clone());
        }

        let executor = self.executor.clone();
        let inner = self.inner.clone();
        let id = async_id.clone();
        tokio::spawn(async move {
            let operation = envelope.operation.clone();
            let result = executor.execute(envelope).await;
            let mut g = inner.write().await;
            g.running.remove(&id);
            match result {
                Ok(resp) if resp.exception.is_none() => {
                    tracing::debug!(async_id = %id, operation = %operation, "async command completed");
                    g.completed.insert(id, resp);
                }
                Ok(resp) => {
                    tracing::warn!(async_id = %id, operation = %operation, "async command failed");
                    g.failed.insert(id, resp);
                }
                Err(e) => {
                    tracing::warn!(async_id = %id, operation = %operation, error = %e, "async command errored");
                    let resp = CommandResponse::accepted(id.clone()).with_exception(e.to_string());
                    g.failed.insert(id, resp);
                }
            }
        });

        Ok(CommandResponse::accepted(async_id))
    }
}

impl<E: CommandExecutor> CommandRunner for LocalCommandRunner<E> {
    async fn run_command(&self, envelope: CommandEnvelope) -> Result<CommandResponse, CplaneError> {
        if envelope.operation.is_empty() {
            return Err(CplaneError::Malformed("missing operation".into()));
        }
        if let Some(async_id) = envelope.async_id.clone() {
            return self.start_async(async_id, envelope).await;
        }

        let timeout = envelope.timeout();
        let operation = envelope.operation.clone();
        match tokio::time::timeout(timeout, self.executor.execute(envelope)).await {
            Ok(result) => result,
            Err(_) => Err(CplaneError::SubmissionTimeout { operation, timeout }),
        }
    }

    async fn async_status(
        &self,
        async_id: &str,
    ) -> Result<(AsyncState, Option<CommandResponse>), CplaneError> {
        let g = self.inner.read().await;
        if let Some(resp) = g.completed.get(async_id) {
            return Ok((AsyncState::Completed, Some(resp.clone())));
        }
        if let Some(resp) = g.failed.get(async_id) {
            return Ok((AsyncState::Failed, Some(resp.clone())));
        }
        if g.running.contains(async_id) {
            return Ok((AsyncState::Running, None));
        }
        Ok((AsyncState::NotFound, None))
    }

    async fn delete_async_id(&self, async_id: &str) -> Result<bool, CplaneError> {
        let mut g = self.inner.write().await;
        let removed = g.completed.remove(async_id).is_some() | g.failed.remove(async_id).is_some();
        if removed {
            g.claimed.remove(async_id);
        }
        Ok(removed)
    }

    async fn delete_all_async_ids(&self) -> Result<usize, CplaneError> {
        let mut g = self.inner.write().await;
        let ids: Vec<String> = g.completed.keys().chain(g.failed.keys()).cloned().collect();
        g.completed.clear();
        g.failed.clear();
        for id in &ids {
            g.claimed.remove(id);
        }
        Ok(ids.len())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
