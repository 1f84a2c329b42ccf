pub mod fjall;
pub mod keys;
pub mod mem;
pub mod traits;
pub mod types;
pub mod watch;

pub use fjall::{FjallCoordinationStore, FjallStore};
pub use mem::MemCoordinationStore;
pub use traits::{AsyncTaskStore, ClusterStateStore, CommandQueue, CoordinationStore, TermStore};
pub use types::{
    QueueEntry, QueueEvent, ShardTerms, StateWatcher, TaskMap, TermLease, WatchDecision,
    WatchEventKind, WatchedEvent, WatcherId,
};
pub use watch::ClusterStateCache;
