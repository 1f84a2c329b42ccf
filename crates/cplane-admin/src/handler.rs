use std::sync::Arc;

use cplane_consensus::CommandRunner;
use cplane_store::CoordinationStore;
use cplane_types::{
    CollectionAction, CollectionCommand, CommandEnvelope, CommandResponse, CplaneError, TaskStatus,
};

use crate::barrier::ConvergenceBarrier;
use crate::config::{ForceLeaderConfig, OrchestratorConfig};
use crate::convert::{self, Params, ASYNC};
use crate::force_leader::{ForceLeaderOutcome, LeaderForcer};
use crate::registry::{AsyncTaskRegistry, QueueTaskRegistry};
use crate::submission::{CommandChannel, ExecutionMode};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteStatus {
    Single(String),
    Flush,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteStatusOutcome {
    pub removed: usize,
    pub message: String,
}

/// Administrative entry points for collection commands.
pub struct CollectionsHandler<S, R> {
    channel: CommandChannel<S, R>,
    registry: AsyncTaskRegistry<S, R>,
    barrier: ConvergenceBarrier<S>,
    forcer: LeaderForcer<S>,
    config: OrchestratorConfig,
}

impl<S, R> CollectionsHandler<S, R>
where
    S: CoordinationStore,
    R: CommandRunner,
{
    pub fn new(
        store: Arc<S>,
        mode: ExecutionMode<R>,
        config: OrchestratorConfig,
        force_leader: ForceLeaderConfig,
    ) -> Self {
        let registry = match &mode {
            ExecutionMode::Queue => AsyncTaskRegistry::Queue(QueueTaskRegistry::new(store.clone())),
            ExecutionMode::Direct(runner) => AsyncTaskRegistry::Direct(runner.clone()),
        };
        tracing::info!(mode = mode.name(), "collections handler ready");
        CollectionsHandler {
            channel: CommandChannel::new(store.clone(), mode),
            registry,
            barrier: ConvergenceBarrier::new(store.clone()),
            forcer: LeaderForcer::new(store, force_leader),
            config,
        }
    }

    /// Run `command` and wait for its result. A CREATE additionally waits for
    /// the new collection to become active.
    pub async fn execute(&self, command: CollectionCommand) -> Result<CommandResponse, CplaneError> {
        let envelope = CommandEnvelope::new(&command, None, self.config.timeout_for(command.action()))?;
        let resp = self.channel.submit(envelope).await?;
        if let CollectionCommand::Create(create) = &command {
            self.wait_for_active(&create.name, &resp).await?;
        }
        Ok(resp)
    }

    /// Submit `command` under `async_id` and return at once. Progress is
    /// reported by [`CollectionsHandler::request_status`].
    pub async fn execute_async(
        &self,
        command: CollectionCommand,
        async_id: impl Into<String>,
    ) -> Result<CommandResponse, CplaneError> {
        let async_id = async_id.into();
        if async_id.is_empty() {
            return Err(CplaneError::Malformed("async id must not be empty".into()));
        }
        let envelope =
            CommandEnvelope::new(&command, Some(async_id), self.config.timeout_for(command.action()))?;
        self.channel.submit(envelope).await
    }

    async fn wait_for_active(&self, collection: &str, resp: &CommandResponse) -> Result<(), CplaneError> {
        if let Some(exception) = &resp.exception {
            tracing::info!(collection, exception = %exception, "not waiting for active collection due to exception");
            return Ok(());
        }
        self.barrier
            .await_active(
                collection,
                self.config.create_wait(),
                self.config.check_leader_only,
                resp.failure_count(),
            )
            .await
    }

    /// Parameter-level entry point: `action` is the wire name
    /// (case-insensitive); an `async` parameter makes the call asynchronous.
    pub async fn handle(&self, action: &str, params: &Params) -> Result<CommandResponse, CplaneError> {
        let parsed = CollectionAction::parse(action)
            .ok_or_else(|| CplaneError::Malformed(format!("unknown action: {action}")))?;
        let command = convert::parse_command(parsed, params)?;
        tracing::debug!(action = %parsed, collection = command.collection().unwrap_or(""), "handling request");
        match params.get(ASYNC) {
            Some(async_id) => self.execute_async(command, async_id).await,
            None => self.execute(command).await,
        }
    }

    pub async fn request_status(&self, async_id: &str) -> Result<TaskStatus, CplaneError> {
        if async_id.is_empty() {
            return Err(CplaneError::Malformed("missing required parameter: requestid".into()));
        }
        self.registry.query_status(async_id).await
    }

    pub async fn delete_status(&self, request: DeleteStatus) -> Result<DeleteStatusOutcome, CplaneError> {
        match request {
            DeleteStatus::Flush => {
                let removed = self.registry.flush().await?;
                Ok(DeleteStatusOutcome {
                    removed,
                    message: "successfully cleared stored collection api responses".into(),
                })
            }
            DeleteStatus::Single(id) => {
                // Not found leaves the claim alone: the task may be running or pending.
                if self.registry.delete(&id).await? {
                    Ok(DeleteStatusOutcome {
                        removed: 1,
                        message: format!("successfully removed stored response for [{id}]"),
                    })
                } else {
                    Ok(DeleteStatusOutcome {
                        removed: 0,
                        message: format!("[{id}] not found in stored responses"),
                    })
                }
            }
        }
    }

    pub async fn force_leader(
        &self,
        collection: &str,
        shard: &str,
    ) -> Result<ForceLeaderOutcome, CplaneError> {
        self.forcer.force_leader(collection, shard).await
    }
}
