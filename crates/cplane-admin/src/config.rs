use std::time::Duration;

use serde::Deserialize;

use cplane_types::{CollectionAction, DEFAULT_COLLECTION_OP_TIMEOUT};

/// Which execution path commands take. Fixed for the life of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModeKind {
    #[default]
    Queue,
    Direct,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub mode: ModeKind,
    pub default_timeout_ms: u64,
    /// How long a synchronous CREATE waits for the new collection to go active.
    pub create_wait_secs: u64,
    /// Only require shard leaders (not every replica) to be active.
    pub check_leader_only: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        OrchestratorConfig {
            mode: ModeKind::Queue,
            default_timeout_ms: u64::try_from(DEFAULT_COLLECTION_OP_TIMEOUT.as_millis()).unwrap_or(u64::MAX),
            create_wait_secs: 30,
            check_leader_only: false,
        }
    }
}

impl OrchestratorConfig {
    pub fn timeout_for(&self, action: CollectionAction) -> Duration {
        action.timeout_from(Duration::from_millis(self.default_timeout_ms))
    }

    pub fn create_wait(&self) -> Duration {
        Duration::from_secs(self.create_wait_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ForceLeaderConfig {
    pub poll_interval_ms: u64,
    pub max_attempts: u32,
}

impl Default for ForceLeaderConfig {
    fn default() -> Self {
        ForceLeaderConfig { poll_interval_ms: 5_000, max_attempts: 9 }
    }
}

impl ForceLeaderConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
