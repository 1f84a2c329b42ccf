use std::sync::Arc;
use std::time::Duration;

use cplane_consensus::CommandRunner;
use cplane_store::{AsyncTaskStore, CommandQueue, QueueEvent};
use cplane_types::codec::decode;
use cplane_types::{CommandEnvelope, CommandResponse, CplaneError};

/// Execution path chosen once at startup. Never mixed at runtime.
pub enum ExecutionMode<R> {
    /// Durable FIFO consumed by the single control-plane leader.
    Queue,
    /// Peer-consensus runner; it orders, executes and tracks async IDs itself.
    Direct(Arc<R>),
}

impl<R> ExecutionMode<R> {
    pub fn name(&self) -> &'static str {
        match self {
            ExecutionMode::Queue => "queue",
            ExecutionMode::Direct(_) => "direct",
        }
    }
}

impl<R> Clone for ExecutionMode<R> {
    fn clone(&self) -> Self {
        match self {
            ExecutionMode::Queue => ExecutionMode::Queue,
            ExecutionMode::Direct(r) => ExecutionMode::Direct(r.clone()),
        }
    }
}

/// Routes command envelopes to the leader queue or the consensus runner.
pub struct CommandChannel<S, R> {
    store: Arc<S>,
    mode: ExecutionMode<R>,
}

impl<S, R> CommandChannel<S, R>
where
    S: CommandQueue + AsyncTaskStore,
    R: CommandRunner,
{
    pub fn new(store: Arc<S>, mode: ExecutionMode<R>) -> Self {
        CommandChannel { store, mode }
    }

    pub fn mode(&self) -> &ExecutionMode<R> {
        &self.mode
    }

    /// Synchronous when `envelope.async_id` is `None`: waits up to the
    /// envelope timeout for the result. With an async ID, returns as soon as
    /// the command is accepted; a duplicate ID is reported in the response.
    pub async fn submit(&self, envelope: CommandEnvelope) -> Result<CommandResponse, CplaneError> {
        if envelope.operation.is_empty() {
            return Err(CplaneError::Malformed("missing key operation".into()));
        }
        match &self.mode {
            ExecutionMode::Direct(runner) => runner.run_command(envelope).await,
            ExecutionMode::Queue => match envelope.async_id.clone() {
                Some(async_id) => self.submit_async(async_id, envelope).await,
                None => self.submit_sync(envelope).await,
            },
        }
    }

    async fn submit_async(
        &self,
        async_id: String,
        envelope: CommandEnvelope,
    ) -> Result<CommandResponse, CplaneError> {
        if !self.store.claim_async_id(&async_id).await? {
            tracing::info!(async_id = %async_id, operation = %envelope.operation, "async id already claimed");
            return Ok(CommandResponse::duplicate(async_id));
        }

        let offered = match envelope.to_bytes() {
            Ok(payload) => self.store.offer(payload).await,
            Err(e) => Err(e),
        };
        match offered {
            Ok(entry_id) => {
                tracing::debug!(async_id = %async_id, entry_id = %entry_id, operation = %envelope.operation, "queued async command");
                Ok(CommandResponse::accepted(async_id))
            }
            Err(e) => {
                // Give the ID back so the caller can retry with it.
                if let Err(release) = self.store.release_async_id(&async_id).await {
                    tracing::warn!(async_id = %async_id, error = %release, "failed to release async id");
                }
                Err(e)
            }
        }
    }

    async fn submit_sync(&self, envelope: CommandEnvelope) -> Result<CommandResponse, CplaneError> {
        let timeout = envelope.timeout();
        let payload = envelope.to_bytes()?;
        let start = tokio::time::Instant::now();
        let event = self.store.offer_and_wait(payload, timeout).await?;
        classify_queue_event(&envelope.operation, timeout, start.elapsed(), event)
    }
}

/// Turn the outcome of a synchronous queue wait into a response or error.
///
/// A wake-up without a payload at or past the deadline is a timeout, even if
/// a watcher event came with it.
pub fn classify_queue_event(
    operation: &str,
    timeout: Duration,
    elapsed: Duration,
    event: QueueEvent,
) -> Result<CommandResponse, CplaneError> {
    if let Some(bytes) = event.bytes {
        return decode(&bytes);
    }
    if elapsed >= timeout {
        let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        tracing::warn!(operation, entry_id = %event.entry_id, timeout_ms, "command timed out");
        return Err(CplaneError::SubmissionTimeout { operation: operation.to_string(), timeout });
    }
    if let Some(watched) = event.watched {
        return Err(CplaneError::WatcherFired {
            operation: operation.to_string(),
            path: watched.path,
            event: watched.kind.to_string(),
        });
    }
    Err(CplaneError::NoResult { operation: operation.to_string() })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
