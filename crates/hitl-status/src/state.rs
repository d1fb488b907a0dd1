use chrono::{DateTime, Utc};
use hitl_core::types::PendingHumanInput;
use hitl_core::urgency::has_urgent_inputs_at;
use serde::{Deserialize, Serialize};

use crate::polling::PollHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollPhase {
    Idle,
    Polling,
    /// Between the stop and start halves of a restart.
    Stopping,
}

/// Session-scoped status record owned by the coordinator.
///
/// Observers receive it through a watch channel; only the coordinator
/// writes it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WorkflowStatusState {
    /// Latest applied snapshot, in the order the service returned it.
    pub pending_inputs: Vec<PendingHumanInput>,
    pub is_polling: bool,
    pub poll_handle: Option<PollHandle>,
    pub last_update: Option<DateTime<Utc>>,
    pub is_loading: bool,
    pub error: Option<String>,
    /// Consecutive empty poll results in the current poll lifetime.
    pub empty_poll_streak: u32,
    pub is_restarting: bool,
    #[serde(skip)]
    pub(crate) in_flight: u32,
    #[serde(skip)]
    pub(crate) awaiting_first_poll: bool,
}

impl WorkflowStatusState {
    pub fn pending_count(&self) -> usize {
        self.pending_inputs.len()
    }

    pub fn has_urgent_inputs_at(&self, now: DateTime<Utc>) -> bool {
        has_urgent_inputs_at(&self.pending_inputs, now)
    }

    pub fn has_urgent_inputs(&self) -> bool {
        self.has_urgent_inputs_at(Utc::now())
    }

    pub fn is_healthy(&self) -> bool {
        self.is_polling && self.error.is_none()
    }

    pub fn is_pending(&self, execution_id: &str) -> bool {
        self.pending_input(execution_id).is_some()
    }

    pub fn pending_input(&self, execution_id: &str) -> Option<&PendingHumanInput> {
        self.pending_inputs
            .iter()
            .find(|input| input.execution_id.as_str() == execution_id)
    }

    pub fn phase(&self) -> PollPhase {
        if self.is_polling {
            PollPhase::Polling
        } else if self.is_restarting {
            PollPhase::Stopping
        } else {
            PollPhase::Idle
        }
    }

    pub(crate) fn sync_loading(&mut self) {
        self.is_loading = self.in_flight > 0 || self.awaiting_first_poll;
    }

    pub(crate) fn clear_poll(&mut self) {
        self.is_polling = false;
        self.poll_handle = None;
        self.awaiting_first_poll = false;
        self.empty_poll_streak = 0;
        self.sync_loading();
    }
}
