use std::collections::BTreeMap;

/// Result payload of a collection command, as produced by the control-plane
/// leader (or the consensus runner) and stored for async tasks.
#[derive(Debug, Clone, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct CommandResponse {
    pub request_id: Option<String>,
    /// Per-node success messages.
    pub success: BTreeMap<String, String>,
    /// Per-replica failures the command itself gave up on.
    pub failure: BTreeMap<String, String>,
    /// Set when the command as a whole failed upstream.
    pub exception: Option<String>,
    pub error: Option<String>,
    pub duplicate_task: bool,
}

impl CommandResponse {
    /// Response for an async submission that was accepted.
    pub fn accepted(async_id: impl Into<String>) -> Self {
        CommandResponse { request_id: Some(async_id.into()), ..Default::default() }
    }

    /// Response for an async submission whose ID is already claimed.
    pub fn duplicate(async_id: impl Into<String>) -> Self {
        let async_id = async_id.into();
        CommandResponse {
            error: Some(format!("Task with the same requestid already exists. ({async_id})")),
            request_id: Some(async_id),
            duplicate_task: true,
            ..Default::default()
        }
    }

    pub fn with_success(mut self, node: impl Into<String>, msg: impl Into<String>) -> Self {
        self.success.insert(node.into(), msg.into());
        self
    }

    pub fn with_failure(mut self, replica: impl Into<String>, msg: impl Into<String>) -> Self {
        self.failure.insert(replica.into(), msg.into());
        self
    }

    pub fn with_exception(mut self, msg: impl Into<String>) -> Self {
        self.exception = Some(msg.into());
        self
    }

    pub fn failure_count(&self) -> usize {
        self.failure.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum AsyncState {
    Submitted,
    Running,
    Completed,
    Failed,
    NotFound,
}

impl AsyncState {
    pub fn as_str(self) -> &'static str {
        match self {
            AsyncState::Submitted => "submitted",
            AsyncState::Running => "running",
            AsyncState::Completed => "completed",
            AsyncState::Failed => "failed",
            AsyncState::NotFound => "notfound",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, AsyncState::Completed | AsyncState::Failed)
    }
}

impl std::fmt::Display for AsyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Answer to "what happened to request X".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskStatus {
    pub request_id: String,
    pub state: AsyncState,
    pub message: String,
    /// Stored result, present for completed and failed tasks.
    pub response: Option<CommandResponse>,
}

impl TaskStatus {
    pub fn new(request_id: &str, state: AsyncState, response: Option<CommandResponse>) -> Self {
        let message = match state {
            AsyncState::NotFound => format!("Did not find [{request_id}] in any tasks queue"),
            AsyncState::Submitted => format!("found [{request_id}] in submitted tasks"),
            other => format!("found [{request_id}] in {other} tasks"),
        };
        TaskStatus { request_id: request_id.to_string(), state, message, response }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_response_names_the_id() {
        let r = CommandResponse::duplicate("job-1");
        assert!(r.duplicate_task);
        assert_eq!(r.request_id.as_deref(), Some("job-1"));
        assert!(r.error.unwrap().contains("(job-1)"));
    }

    #[test]
    fn status_messages() {
        assert_eq!(
            TaskStatus::new("a", AsyncState::Completed, None).message,
            "found [a] in completed tasks"
        );
        assert_eq!(
            TaskStatus::new("a", AsyncState::NotFound, None).message,
            "Did not find [a] in any tasks queue"
        );
    }
}
