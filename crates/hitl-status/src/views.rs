//! Stream adapters over the coordinator's state and event channels.

use hitl_core::events::StatusEvent;
use tokio::sync::{broadcast, watch};
use tokio_stream::wrappers::{BroadcastStream, WatchStream};
use tokio_stream::{Stream, StreamExt};

use crate::coordinator::WorkflowStatusCoordinator;
use crate::state::WorkflowStatusState;

/// Yields the current state, then every subsequent change.
pub fn state_stream(
    rx: watch::Receiver<WorkflowStatusState>,
) -> impl Stream<Item = WorkflowStatusState> + Send + Unpin + 'static {
    WatchStream::new(rx)
}

pub fn pending_count_stream(
    rx: watch::Receiver<WorkflowStatusState>,
) -> impl Stream<Item = usize> + Send + Unpin + 'static {
    WatchStream::new(rx).map(|state| state.pending_count())
}

/// Urgency is evaluated when a state change is observed, not continuously.
pub fn urgency_stream(
    rx: watch::Receiver<WorkflowStatusState>,
) -> impl Stream<Item = bool> + Send + Unpin + 'static {
    WatchStream::new(rx).map(|state| state.has_urgent_inputs())
}

pub fn health_stream(
    rx: watch::Receiver<WorkflowStatusState>,
) -> impl Stream<Item = bool> + Send + Unpin + 'static {
    WatchStream::new(rx).map(|state| state.is_healthy())
}

/// Events emitted after subscription. Events dropped because the receiver
/// lagged are skipped.
pub fn event_stream(
    rx: broadcast::Receiver<StatusEvent>,
) -> impl Stream<Item = StatusEvent> + Send + Unpin + 'static {
    BroadcastStream::new(rx).filter_map(|event| event.ok())
}

impl WorkflowStatusCoordinator {
    pub fn state_stream(&self) -> impl Stream<Item = WorkflowStatusState> + Send + Unpin + 'static {
        state_stream(self.subscribe())
    }

    pub fn pending_count_stream(&self) -> impl Stream<Item = usize> + Send + Unpin + 'static {
        pending_count_stream(self.subscribe())
    }

    pub fn urgency_stream(&self) -> impl Stream<Item = bool> + Send + Unpin + 'static {
        urgency_stream(self.subscribe())
    }

    pub fn health_stream(&self) -> impl Stream<Item = bool> + Send + Unpin + 'static {
        health_stream(self.subscribe())
    }

    pub fn event_stream(&self) -> impl Stream<Item = StatusEvent> + Send + Unpin + 'static {
        event_stream(self.events())
    }
}
