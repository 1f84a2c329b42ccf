use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum CplaneError {
    #[error("malformed command: {0}")]
    Malformed(String),
    #[error("{operation} the collection time out: {}s", timeout.as_secs())]
    SubmissionTimeout { operation: String, timeout: Duration },
    #[error("{operation} the collection error [watcher fired on path: {path} type: {event}]")]
    WatcherFired {
        operation: String,
        path: String,
        event: String,
    },
    #[error("{operation} the collection unknown case")]
    NoResult { operation: String },
    #[error("timeout waiting for active collection {collection} with timeout={waited_secs}")]
    ClusterStateTimeout { collection: String, waited_secs: u64 },
    #[error("no action needed: {0}")]
    NoActionNeeded(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("coordination store error: {0}")]
    Store(String),
    #[error("consensus error: {0}")]
    Consensus(String),
}

impl CplaneError {
    /// Client errors are never retried and carry no system fault.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            CplaneError::Malformed(_) | CplaneError::NoActionNeeded(_) | CplaneError::NotFound(_)
        )
    }
}
