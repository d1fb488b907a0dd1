/// Failure reported by a human input service implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    #[error("human input service unavailable: {message}")]
    Unavailable { message: String },
    #[error("human input service rejected request: {message}")]
    Rejected { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StatusError {
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout {
        operation: &'static str,
        timeout_ms: u64,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PollError {
    #[error("poll work for {key} failed: {message}")]
    Work { key: String, message: String },
}
