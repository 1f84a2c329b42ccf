#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use cplane_consensus::{CommandExecutor, LocalCommandRunner};
use cplane_store::{CoordinationStore, MemCoordinationStore, TaskMap};
use cplane_types::codec::encode;
use cplane_types::{
    ClusterState, Collection, CollectionCommand, CommandEnvelope, CommandResponse, CplaneError,
    Replica, ReplicaState, Slice,
};

use cplane_admin::{CollectionsHandler, ExecutionMode, ForceLeaderConfig, OrchestratorConfig};

pub type Behaviour = Arc<dyn Fn(&CollectionCommand) -> CommandResponse + Send + Sync>;

/// Stand-in for the control-plane leader: takes queue entries in order,
/// answers synchronous ones through `respond` and records async ones in the
/// running / completed / failed maps.
pub fn spawn_leader<S: CoordinationStore>(store: Arc<S>, behaviour: Behaviour) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let Some(entry) = store.take().await.unwrap() else {
                tokio::time::sleep(Duration::from_millis(10)).await;
                continue;
            };
            let envelope = CommandEnvelope::from_bytes(&entry.payload).unwrap();
            let command = envelope.command().unwrap();
            match envelope.async_id {
                Some(id) => {
                    store.put_task(TaskMap::Running, &id, Vec::new()).await.unwrap();
                    let mut resp = behaviour(&command);
                    resp.request_id = Some(id.clone());
                    store.remove_task(TaskMap::Running, &id).await.unwrap();
                    let map = if resp.exception.is_some() { TaskMap::Failed } else { TaskMap::Completed };
                    store.put_task(map, &id, encode(&resp).unwrap()).await.unwrap();
                }
                None => {
                    let resp = behaviour(&command);
                    store.respond(&entry.id, encode(&resp).unwrap()).await.unwrap();
                }
            }
        }
    })
}

pub fn ok_behaviour() -> Behaviour {
    Arc::new(|cmd| CommandResponse::default().with_success("n1", format!("{} done", cmd.action())))
}

pub fn one_shard(replicas: &[(&str, &str, ReplicaState)], leader: Option<&str>) -> Collection {
    let mut coll = Collection::default();
    coll.slices.insert(
        "shard1".into(),
        Slice {
            replicas: replicas.iter().map(|(n, node, s)| Replica::new(*n, *node, *s)).collect(),
            leader: leader.map(str::to_string),
        },
    );
    coll
}

pub fn live_nodes(nodes: &[&str]) -> ClusterState {
    nodes.iter().fold(ClusterState::default(), |s, n| s.with_live_node(*n))
}

pub fn test_config() -> OrchestratorConfig {
    OrchestratorConfig::default()
}

pub struct NoopExecutor;

impl CommandExecutor for NoopExecutor {
    async fn execute(&self, _envelope: CommandEnvelope) -> Result<CommandResponse, CplaneError> {
        Ok(CommandResponse::default())
    }
}

pub type QueueHandler = CollectionsHandler<MemCoordinationStore, LocalCommandRunner<NoopExecutor>>;

pub fn queue_handler(store: Arc<MemCoordinationStore>) -> QueueHandler {
    CollectionsHandler::new(store, ExecutionMode::Queue, test_config(), ForceLeaderConfig::default())
}
