use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::ExecutionId;

/// Why a poll loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Caller asked to stop.
    Manual,
    /// Consecutive empty polls reached the idle threshold.
    Idle,
    /// The loop used up its iteration budget.
    Exhausted,
    /// A tick failed; the registration was dropped.
    Failed,
    /// Stopped as the first half of a restart.
    Restart,
    Reset,
}

impl StopReason {
    pub fn as_str(self) -> &'static str {
        match self {
            StopReason::Manual => "manual",
            StopReason::Idle => "idle",
            StopReason::Exhausted => "exhausted",
            StopReason::Failed => "failed",
            StopReason::Restart => "restart",
            StopReason::Reset => "reset",
        }
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusEventKind {
    PollingStarted {
        handle: u64,
        interval_ms: u64,
    },
    PollingStopped {
        reason: StopReason,
    },
    InputsReplaced {
        count: usize,
    },
    InputArrived {
        execution_id: ExecutionId,
    },
    InputCleared {
        execution_id: ExecutionId,
    },
    InputRetired {
        execution_id: ExecutionId,
    },
    InputIterated {
        execution_id: ExecutionId,
    },
    ErrorRecorded {
        message: String,
    },
    ErrorCleared,
    Reset,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub at: DateTime<Utc>,
    pub kind: StatusEventKind,
}

impl StatusEvent {
    pub fn now(kind: StatusEventKind) -> Self {
        Self {
            at: Utc::now(),
            kind,
        }
    }
}

pub fn status_event_name(kind: &StatusEventKind) -> &'static str {
    match kind {
        StatusEventKind::PollingStarted { .. } => "polling_started",
        StatusEventKind::PollingStopped { .. } => "polling_stopped",
        StatusEventKind::InputsReplaced { .. } => "inputs_replaced",
        StatusEventKind::InputArrived { .. } => "input_arrived",
        StatusEventKind::InputCleared { .. } => "input_cleared",
        StatusEventKind::InputRetired { .. } => "input_retired",
        StatusEventKind::InputIterated { .. } => "input_iterated",
        StatusEventKind::ErrorRecorded { .. } => "error_recorded",
        StatusEventKind::ErrorCleared => "error_cleared",
        StatusEventKind::Reset => "reset",
    }
}
