pub mod barrier;
pub mod config;
pub mod convert;
pub mod force_leader;
pub mod handler;
pub mod registry;
pub mod submission;

pub use barrier::ConvergenceBarrier;
pub use config::{ForceLeaderConfig, ModeKind, OrchestratorConfig};
pub use convert::{http_status, Params};
pub use force_leader::{ForceLeaderOutcome, LeaderForcer};
pub use handler::{CollectionsHandler, DeleteStatus, DeleteStatusOutcome};
pub use registry::{AsyncTaskRegistry, QueueTaskRegistry};
pub use submission::{CommandChannel, ExecutionMode};
