use std::time::Duration;

use crate::codec::{decode, encode};
use crate::CplaneError;

/// Default deadline for a queued collection command.
pub const DEFAULT_COLLECTION_OP_TIMEOUT: Duration = Duration::from_secs(180);

/// Operations that travel through the submission channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum CollectionAction {
    Create,
    Delete,
    Reload,
    SplitShard,
    CreateShard,
    DeleteShard,
    AddReplica,
    DeleteReplica,
    MockTask,
}

impl CollectionAction {
    pub const ALL: [CollectionAction; 9] = [
        CollectionAction::Create,
        CollectionAction::Delete,
        CollectionAction::Reload,
        CollectionAction::SplitShard,
        CollectionAction::CreateShard,
        CollectionAction::DeleteShard,
        CollectionAction::AddReplica,
        CollectionAction::DeleteReplica,
        CollectionAction::MockTask,
    ];

    /// Wire name, also used as the queue operation key.
    pub fn as_str(self) -> &'static str {
        match self {
            CollectionAction::Create => "create",
            CollectionAction::Delete => "delete",
            CollectionAction::Reload => "reload",
            CollectionAction::SplitShard => "splitshard",
            CollectionAction::CreateShard => "createshard",
            CollectionAction::DeleteShard => "deleteshard",
            CollectionAction::AddReplica => "addreplica",
            CollectionAction::DeleteReplica => "deletereplica",
            CollectionAction::MockTask => "mock_coll_task",
        }
    }

    /// Case-insensitive lookup of a wire name.
    pub fn parse(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        Self::ALL.into_iter().find(|a| a.as_str() == lower)
    }

    pub fn default_timeout(self) -> Duration {
        self.timeout_from(DEFAULT_COLLECTION_OP_TIMEOUT)
    }

    /// Deadline derived from a configured base. Shard splits get five times
    /// the base.
    pub fn timeout_from(self, base: Duration) -> Duration {
        match self {
            CollectionAction::SplitShard => base * 5,
            _ => base,
        }
    }
}

impl std::fmt::Display for CollectionAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CreateCollection {
    pub name: String,
    pub num_shards: u32,
    pub replication_factor: u32,
    pub config_name: Option<String>,
    /// Explicit shard names; empty means `num_shards` generated names.
    pub shards: Vec<String>,
    /// Candidate nodes; empty means any live node.
    pub node_set: Vec<String>,
}

/// Typed form of every queued command. Converted from wire parameters at the
/// admin boundary; the orchestration core only ever sees the encoded bytes.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum CollectionCommand {
    Create(CreateCollection),
    Delete { name: String },
    Reload { name: String },
    SplitShard { collection: String, shard: String, split_key: Option<String> },
    CreateShard { collection: String, shard: String },
    DeleteShard { collection: String, shard: String },
    AddReplica { collection: String, shard: String, node: Option<String> },
    DeleteReplica { collection: String, shard: String, replica: String },
    MockTask { sleep_ms: u64 },
}

impl CollectionCommand {
    pub fn action(&self) -> CollectionAction {
        match self {
            CollectionCommand::Create(_) => CollectionAction::Create,
            CollectionCommand::Delete { .. } => CollectionAction::Delete,
            CollectionCommand::Reload { .. } => CollectionAction::Reload,
            CollectionCommand::SplitShard { .. } => CollectionAction::SplitShard,
            CollectionCommand::CreateShard { .. } => CollectionAction::CreateShard,
            CollectionCommand::DeleteShard { .. } => CollectionAction::DeleteShard,
            CollectionCommand::AddReplica { .. } => CollectionAction::AddReplica,
            CollectionCommand::DeleteReplica { .. } => CollectionAction::DeleteReplica,
            CollectionCommand::MockTask { .. } => CollectionAction::MockTask,
        }
    }

    /// Collection the command targets, if any.
    pub fn collection(&self) -> Option<&str> {
        match self {
            CollectionCommand::Create(c) => Some(&c.name),
            CollectionCommand::Delete { name } | CollectionCommand::Reload { name } => Some(name),
            CollectionCommand::SplitShard { collection, .. }
            | CollectionCommand::CreateShard { collection, .. }
            | CollectionCommand::DeleteShard { collection, .. }
            | CollectionCommand::AddReplica { collection, .. }
            | CollectionCommand::DeleteReplica { collection, .. } => Some(collection),
            CollectionCommand::MockTask { .. } => None,
        }
    }
}

/// What actually travels through the queue or to the consensus runner.
/// Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CommandEnvelope {
    pub operation: String,
    pub properties: Vec<u8>,
    pub async_id: Option<String>,
    pub timeout_ms: u64,
}

impl CommandEnvelope {
    pub fn new(
        command: &CollectionCommand,
        async_id: Option<String>,
        timeout: Duration,
    ) -> Result<Self, CplaneError> {
        Ok(CommandEnvelope {
            operation: command.action().as_str().to_string(),
            properties: encode(command)?,
            async_id,
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn command(&self) -> Result<CollectionCommand, CplaneError> {
        decode(&self.properties)
            .map_err(|e| CplaneError::Malformed(format!("undecodable properties: {e}")))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, CplaneError> {
        encode(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CplaneError> {
        decode(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_names_parse_back() {
        for action in CollectionAction::ALL {
            assert_eq!(CollectionAction::parse(action.as_str()), Some(action));
        }
        assert_eq!(CollectionAction::parse("CREATE"), Some(CollectionAction::Create));
        assert_eq!(CollectionAction::parse("backup"), None);
    }

    #[test]
    fn split_shard_gets_longer_deadline() {
        assert_eq!(CollectionAction::SplitShard.default_timeout(), Duration::from_secs(900));
        assert_eq!(CollectionAction::Delete.default_timeout(), DEFAULT_COLLECTION_OP_TIMEOUT);
    }

    #[test]
    fn oversized_timeout_saturates() {
        let env = CommandEnvelope::new(&CollectionCommand::Reload { name: "orders".into() }, None, Duration::MAX)
            .unwrap();
        assert_eq!(env.timeout_ms, u64::MAX);
    }

    #[test]
    fn envelope_carries_typed_command() {
        let cmd = CollectionCommand::DeleteShard { collection: "orders".into(), shard: "s1".into() };
        let env = CommandEnvelope::new(&cmd, Some("job-1".into()), Duration::from_secs(5)).unwrap();
        assert_eq!(env.operation, "deleteshard");
        assert_eq!(env.timeout_ms, 5000);

        let back = CommandEnvelope::from_bytes(&env.to_bytes().unwrap()).unwrap();
        assert_eq!(back.async_id.as_deref(), Some("job-1"));
        assert_eq!(back.command().unwrap(), cmd);
    }

    #[test]
    fn empty_properties_are_malformed() {
        let env = CommandEnvelope {
            operation: "create".into(),
            properties: Vec::new(),
            async_id: None,
            timeout_ms: 1,
        };
        assert!(matches!(env.command(), Err(CplaneError::Malformed(_))));
    }
}
