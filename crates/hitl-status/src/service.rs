use async_trait::async_trait;
use hitl_core::types::{PendingHumanInput, SubmitRequest};

use crate::error::ServiceError;

/// Remote source of truth for executions awaiting human input.
///
/// Implementations are expected to fail fast; retries and backoff are not
/// applied on top of them.
#[async_trait]
pub trait HumanInputService: Send + Sync {
    /// The complete pending set, not a delta.
    async fn fetch_pending_inputs(&self) -> Result<Vec<PendingHumanInput>, ServiceError>;

    async fn submit_input(&self, request: SubmitRequest)
        -> Result<serde_json::Value, ServiceError>;
}
