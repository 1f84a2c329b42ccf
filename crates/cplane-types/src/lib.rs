pub mod cluster;
pub mod codec;
pub mod command;
pub mod error;
pub mod response;

pub use cluster::{ClusterState, Collection, Replica, ReplicaState, Slice};
pub use command::{
    CollectionAction, CollectionCommand, CommandEnvelope, CreateCollection,
    DEFAULT_COLLECTION_OP_TIMEOUT,
};
pub use error::CplaneError;
pub use response::{AsyncState, CommandResponse, TaskStatus};
