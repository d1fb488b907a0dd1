//! Core types for human-in-the-loop workflow executions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Opaque, stable identifier of a workflow execution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionId(pub String);

impl ExecutionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ExecutionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ExecutionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// One outstanding request for human input on a paused execution.
///
/// Any field beyond `execution_id` and `requested_at` is carried in `context`
/// and passed through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingHumanInput {
    pub execution_id: ExecutionId,
    pub requested_at: DateTime<Utc>,
    #[serde(flatten)]
    pub context: Map<String, Value>,
}

impl PendingHumanInput {
    pub fn new(execution_id: impl Into<ExecutionId>, requested_at: DateTime<Utc>) -> Self {
        Self {
            execution_id: execution_id.into(),
            requested_at,
            context: Map::new(),
        }
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn context_value(&self, key: &str) -> Option<&Value> {
        self.context.get(key)
    }
}

/// What a human response does to the execution it answers.
///
/// Only `Iterate` keeps the execution waiting; every other action,
/// including unrecognised ones, ends the wait.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SubmitAction {
    #[default]
    Submit,
    Iterate,
    Other(String),
}

impl SubmitAction {
    pub fn as_str(&self) -> &str {
        match self {
            SubmitAction::Submit => "submit",
            SubmitAction::Iterate => "iterate",
            SubmitAction::Other(action) => action,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, SubmitAction::Iterate)
    }
}

impl From<String> for SubmitAction {
    fn from(value: String) -> Self {
        match value.as_str() {
            "submit" => SubmitAction::Submit,
            "iterate" => SubmitAction::Iterate,
            _ => SubmitAction::Other(value),
        }
    }
}

impl From<&str> for SubmitAction {
    fn from(value: &str) -> Self {
        SubmitAction::from(value.to_string())
    }
}

impl From<SubmitAction> for String {
    fn from(value: SubmitAction) -> Self {
        match value {
            SubmitAction::Other(action) => action,
            known => known.as_str().to_string(),
        }
    }
}

impl std::fmt::Display for SubmitAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SubmitOptions {
    pub action: SubmitAction,
}

impl SubmitOptions {
    pub fn iterate() -> Self {
        Self {
            action: SubmitAction::Iterate,
        }
    }
}

/// Payload handed to the human input service on submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub execution_id: ExecutionId,
    pub human_input: Value,
    #[serde(default)]
    pub action: SubmitAction,
}

impl SubmitRequest {
    pub fn new(
        execution_id: impl Into<ExecutionId>,
        human_input: impl Into<Value>,
        options: SubmitOptions,
    ) -> Self {
        Self {
            execution_id: execution_id.into(),
            human_input: human_input.into(),
            action: options.action,
        }
    }
}
