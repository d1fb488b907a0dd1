//! Workflow status coordinator: the single owner of [`WorkflowStatusState`].
//!
//! Drives one poll loop through the [`PollingManager`], applies fetched
//! snapshots, stops itself after a run of empty polls, and exposes
//! refresh/submit commands plus read-only views over the state.
//!
//! Every state mutation happens inside one `send_if_modified` closure on the
//! watch channel. Poll ticks re-check the poll handle under that lock before
//! applying anything, so once `stop_polling` or `reset` returns, a tick from
//! the stopped loop can no longer change state.
//!
//! A terminal submit racing a poll tick that still reports the same
//! execution may briefly re-add it; the next poll converges on the remote
//! view.

use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use hitl_core::config::StatusConfig;
use hitl_core::events::{StatusEvent, StatusEventKind, StopReason};
use hitl_core::types::{ExecutionId, PendingHumanInput, SubmitOptions, SubmitRequest};
use serde_json::Value;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::error::{PollError, ServiceError, StatusError};
use crate::polling::{PollExit, PollHandle, PollStatus, PollWork, PollingManager, Tick, TickOutcome};
use crate::service::HumanInputService;
use crate::state::WorkflowStatusState;

pub const STATUS_POLL_KEY: &str = "workflow-status";

const EVENT_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct WorkflowStatusCoordinator {
    inner: Arc<CoordinatorInner>,
}

struct CoordinatorInner {
    service: Arc<dyn HumanInputService>,
    config: StatusConfig,
    polling: PollingManager,
    state_tx: watch::Sender<WorkflowStatusState>,
    events_tx: broadcast::Sender<StatusEvent>,
    // Bumped by `reset`; read and written only inside state closures.
    epoch: AtomicU64,
}

impl std::fmt::Debug for WorkflowStatusCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowStatusCoordinator")
            .field("config", &self.inner.config)
            .field("state", &*self.inner.state_tx.borrow())
            .finish_non_exhaustive()
    }
}

impl WorkflowStatusCoordinator {
    pub fn new(service: Arc<dyn HumanInputService>, config: StatusConfig) -> Self {
        let (state_tx, _) = watch::channel(WorkflowStatusState::default());
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(CoordinatorInner {
                service,
                config,
                polling: PollingManager::new(),
                state_tx,
                events_tx,
                epoch: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &StatusConfig {
        &self.inner.config
    }

    pub fn state(&self) -> WorkflowStatusState {
        self.inner.state_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<WorkflowStatusState> {
        self.inner.state_tx.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<StatusEvent> {
        self.inner.events_tx.subscribe()
    }

    pub fn polling_status(&self) -> Vec<PollStatus> {
        self.inner.polling.status()
    }

    /// Starts the poll loop at `interval`. Returns false if already polling.
    pub fn start_polling(&self, interval: Duration) -> bool {
        let inner = &self.inner;
        let max_iterations = inner.config.polling.max_iterations;
        let mut started = None;

        inner.state_tx.send_if_modified(|state| {
            if state.is_polling {
                return false;
            }
            let work = StatusPoll {
                inner: Arc::downgrade(inner),
            };
            let handle = inner
                .polling
                .start(STATUS_POLL_KEY, interval, max_iterations, work);
            state.is_polling = true;
            state.poll_handle = Some(handle);
            state.is_restarting = false;
            state.empty_poll_streak = 0;
            state.awaiting_first_poll = true;
            state.sync_loading();
            started = Some(handle);
            true
        });

        let Some(handle) = started else {
            debug!("start_polling ignored; already polling");
            return false;
        };
        let interval_ms = interval.as_millis() as u64;
        info!(handle = %handle, interval_ms, max_iterations, "workflow status polling started");
        inner.emit(StatusEventKind::PollingStarted {
            handle: handle.0,
            interval_ms,
        });
        true
    }

    /// Starts polling at the configured interval.
    pub fn start_default_polling(&self) -> bool {
        self.start_polling(self.inner.config.polling.interval())
    }

    /// Returns true if a poll loop was running.
    pub fn stop_polling(&self) -> bool {
        self.inner.stop_polling(StopReason::Manual)
    }

    /// Stops, waits for the configured settle delay, then starts again.
    ///
    /// Returns true if polling is active afterwards, including when another
    /// `start_polling` call won the settle window. Returns false if a `reset`
    /// landed during the settle delay, in which case polling stays stopped.
    pub async fn restart_polling(&self, interval: Duration) -> bool {
        let inner = &self.inner;
        inner.stop_polling(StopReason::Restart);

        let mut epoch = 0;
        inner.state_tx.send_if_modified(|state| {
            epoch = inner.epoch.load(Ordering::Relaxed);
            let changed = !state.is_restarting;
            state.is_restarting = true;
            changed
        });

        tokio::time::sleep(inner.config.polling.restart_settle()).await;

        let mut cancelled = false;
        inner.state_tx.send_if_modified(|state| {
            cancelled = inner.epoch.load(Ordering::Relaxed) != epoch;
            let changed = state.is_restarting;
            state.is_restarting = false;
            changed
        });
        if cancelled {
            debug!("restart_polling abandoned after reset");
            return false;
        }
        self.start_polling(interval) || inner.state_tx.borrow().is_polling
    }

    /// One-shot fetch outside the poll loop.
    pub async fn refresh_inputs(&self) -> Result<Vec<PendingHumanInput>, StatusError> {
        let inner = &self.inner;
        let guard = inner.begin_request();
        let result = inner
            .call_service("fetch pending inputs", inner.service.fetch_pending_inputs())
            .await;

        match &result {
            Ok(inputs) => {
                let events = guard
                    .complete(|state| apply_snapshot(state, inputs.clone()))
                    .unwrap_or_default();
                debug!(count = inputs.len(), "pending inputs refreshed");
                inner.emit_all(events);
            }
            Err(error) => {
                let message = error.to_string();
                guard.complete(|state| state.error = Some(message.clone()));
                warn!(error = %error, "refreshing pending inputs failed");
                inner.emit(StatusEventKind::ErrorRecorded { message });
            }
        }
        result
    }

    /// Sends a human response for `execution_id`.
    ///
    /// A terminal action removes the execution from the pending set; `iterate`
    /// keeps it. Failures are returned and also recorded in state.
    pub async fn submit_input(
        &self,
        execution_id: impl Into<ExecutionId>,
        human_input: impl Into<Value>,
        options: SubmitOptions,
    ) -> Result<Value, StatusError> {
        let inner = &self.inner;
        let request = SubmitRequest::new(execution_id, human_input, options);
        let execution_id = request.execution_id.clone();
        let terminal = request.action.is_terminal();
        let action = request.action.clone();

        let guard = inner.begin_request();
        let result = inner
            .call_service("submit input", inner.service.submit_input(request))
            .await;

        match &result {
            Ok(_) => {
                guard.complete(|state| {
                    if terminal {
                        state
                            .pending_inputs
                            .retain(|input| input.execution_id != execution_id);
                    }
                    state.last_update = Some(Utc::now());
                    state.error = None;
                });
                debug!(execution_id = %execution_id, action = %action, "human input submitted");
                let kind = if terminal {
                    StatusEventKind::InputRetired { execution_id }
                } else {
                    StatusEventKind::InputIterated { execution_id }
                };
                inner.emit(kind);
            }
            Err(error) => {
                let message = error.to_string();
                guard.complete(|state| state.error = Some(message.clone()));
                warn!(execution_id = %execution_id, action = %action, error = %error, "submitting human input failed");
                inner.emit(StatusEventKind::ErrorRecorded { message });
            }
        }
        result
    }

    /// Reflects the last applied snapshot only; no network access.
    pub fn is_execution_pending(&self, execution_id: &str) -> bool {
        self.inner.state_tx.borrow().is_pending(execution_id)
    }

    pub fn execution_context(&self, execution_id: &str) -> Option<PendingHumanInput> {
        self.inner
            .state_tx
            .borrow()
            .pending_input(execution_id)
            .cloned()
    }

    pub fn pending_count(&self) -> usize {
        self.inner.state_tx.borrow().pending_count()
    }

    pub fn has_urgent_inputs(&self) -> bool {
        self.inner.state_tx.borrow().has_urgent_inputs()
    }

    pub fn is_healthy(&self) -> bool {
        self.inner.state_tx.borrow().is_healthy()
    }

    /// Stops polling and returns state to its initial shape. Commands still
    /// in flight finish without touching the new state.
    pub fn reset(&self) {
        let inner = &self.inner;
        let mut was_polling = false;
        inner.state_tx.send_modify(|state| {
            was_polling = inner.polling.stop(STATUS_POLL_KEY) || state.is_polling;
            inner.epoch.fetch_add(1, Ordering::Relaxed);
            *state = WorkflowStatusState::default();
        });

        info!(was_polling, "workflow status reset");
        if was_polling {
            inner.emit(StatusEventKind::PollingStopped {
                reason: StopReason::Reset,
            });
        }
        inner.emit(StatusEventKind::Reset);
    }

    pub fn clear_error(&self) {
        let cleared = self
            .inner
            .state_tx
            .send_if_modified(|state| state.error.take().is_some());
        if cleared {
            self.inner.emit(StatusEventKind::ErrorCleared);
        }
    }
}

impl CoordinatorInner {
    fn emit(&self, kind: StatusEventKind) {
        let _ = self.events_tx.send(StatusEvent::now(kind));
    }

    fn emit_all(&self, kinds: Vec<StatusEventKind>) {
        for kind in kinds {
            self.emit(kind);
        }
    }

    async fn call_service<T, F>(&self, operation: &'static str, call: F) -> Result<T, StatusError>
    where
        F: Future<Output = Result<T, ServiceError>>,
    {
        match self.config.service.request_timeout() {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| StatusError::Timeout {
                    operation,
                    timeout_ms: self.config.service.request_timeout_ms,
                })?
                .map_err(StatusError::from),
            None => call.await.map_err(StatusError::from),
        }
    }

    fn begin_request(&self) -> RequestGuard<'_> {
        let mut epoch = 0;
        self.state_tx.send_if_modified(|state| {
            epoch = self.epoch.load(Ordering::Relaxed);
            let was_loading = state.is_loading;
            state.in_flight = state.in_flight.saturating_add(1);
            state.sync_loading();
            !was_loading
        });
        RequestGuard {
            inner: self,
            epoch,
            done: false,
        }
    }

    fn stop_polling(&self, reason: StopReason) -> bool {
        let mut was_polling = false;
        self.state_tx.send_if_modified(|state| {
            let removed = self.polling.stop(STATUS_POLL_KEY);
            was_polling = removed || state.is_polling;
            let changed =
                state.is_polling || state.poll_handle.is_some() || state.awaiting_first_poll;
            state.clear_poll();
            changed
        });

        if was_polling {
            info!(reason = %reason, "workflow status polling stopped");
            self.emit(StatusEventKind::PollingStopped { reason });
        }
        was_polling
    }

    fn apply_poll_result(&self, handle: PollHandle, inputs: Vec<PendingHumanInput>) -> TickOutcome {
        let threshold = self.config.polling.idle_stop_threshold;
        let mut outcome = TickOutcome::Continue;
        let mut idle = false;
        let mut events = Vec::new();

        self.state_tx.send_if_modified(|state| {
            if state.poll_handle != Some(handle) {
                outcome = TickOutcome::Finish;
                return false;
            }
            events = apply_snapshot(state, inputs);
            state.awaiting_first_poll = false;
            if state.pending_inputs.is_empty() {
                state.empty_poll_streak = state.empty_poll_streak.saturating_add(1);
            } else {
                state.empty_poll_streak = 0;
            }
            if threshold > 0 && state.empty_poll_streak >= threshold {
                state.clear_poll();
                outcome = TickOutcome::Finish;
                idle = true;
                events.push(StatusEventKind::PollingStopped {
                    reason: StopReason::Idle,
                });
            }
            state.sync_loading();
            true
        });

        if idle {
            info!(handle = %handle, threshold, "no pending inputs for a while; polling stopped");
        }
        self.emit_all(events);
        outcome
    }

    fn reconcile_exit(&self, handle: PollHandle, exit: &PollExit) {
        let (reason, message) = match exit {
            PollExit::Stopped | PollExit::Finished { .. } => return,
            PollExit::Exhausted { .. } => (StopReason::Exhausted, None),
            PollExit::Failed { error, .. } => (StopReason::Failed, Some(poll_failure_message(error))),
        };

        let reconciled = self.state_tx.send_if_modified(|state| {
            if state.poll_handle != Some(handle) {
                return false;
            }
            state.clear_poll();
            if let Some(message) = &message {
                state.error = Some(message.clone());
            }
            true
        });
        if !reconciled {
            return;
        }

        match &message {
            Some(message) => warn!(handle = %handle, error = %message, "workflow status polling failed"),
            None => info!(handle = %handle, "workflow status polling reached its iteration limit"),
        }
        self.emit(StatusEventKind::PollingStopped { reason });
        if let Some(message) = message {
            self.emit(StatusEventKind::ErrorRecorded { message });
        }
    }
}

fn poll_failure_message(error: &PollError) -> String {
    match error {
        PollError::Work { message, .. } => message.clone(),
    }
}

/// Replaces the pending set, keeping the first entry per execution id, and
/// returns arrival/departure events relative to the previous set.
fn apply_snapshot(
    state: &mut WorkflowStatusState,
    inputs: Vec<PendingHumanInput>,
) -> Vec<StatusEventKind> {
    let mut seen = HashSet::new();
    let mut next = Vec::with_capacity(inputs.len());
    for input in inputs {
        if seen.insert(input.execution_id.clone()) {
            next.push(input);
        } else {
            debug!(execution_id = %input.execution_id, "dropping duplicate pending input");
        }
    }

    let previous = state
        .pending_inputs
        .iter()
        .map(|input| input.execution_id.clone())
        .collect::<HashSet<_>>();

    let mut events = next
        .iter()
        .filter(|input| !previous.contains(&input.execution_id))
        .map(|input| StatusEventKind::InputArrived {
            execution_id: input.execution_id.clone(),
        })
        .collect::<Vec<_>>();
    events.extend(
        state
            .pending_inputs
            .iter()
            .filter(|input| !seen.contains(&input.execution_id))
            .map(|input| StatusEventKind::InputCleared {
                execution_id: input.execution_id.clone(),
            }),
    );
    events.push(StatusEventKind::InputsReplaced { count: next.len() });

    state.pending_inputs = next;
    state.last_update = Some(Utc::now());
    state.error = None;
    events
}

/// Holds one in-flight count for a command. Completing applies the result
/// and releases the count in the same state update; dropping without
/// completing (e.g. on cancellation) just releases it.
struct RequestGuard<'a> {
    inner: &'a CoordinatorInner,
    epoch: u64,
    done: bool,
}

impl RequestGuard<'_> {
    fn complete<R>(mut self, apply: impl FnOnce(&mut WorkflowStatusState) -> R) -> Option<R> {
        self.done = true;
        let inner = self.inner;
        let epoch = self.epoch;
        let mut output = None;
        inner.state_tx.send_if_modified(|state| {
            if inner.epoch.load(Ordering::Relaxed) != epoch {
                return false;
            }
            state.in_flight = state.in_flight.saturating_sub(1);
            output = Some(apply(state));
            state.sync_loading();
            true
        });
        output
    }
}

impl Drop for RequestGuard<'_> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        let inner = self.inner;
        let epoch = self.epoch;
        inner.state_tx.send_if_modified(|state| {
            if inner.epoch.load(Ordering::Relaxed) != epoch {
                return false;
            }
            state.in_flight = state.in_flight.saturating_sub(1);
            state.sync_loading();
            true
        });
    }
}

struct StatusPoll {
    inner: Weak<CoordinatorInner>,
}

#[async_trait]
impl PollWork for StatusPoll {
    async fn tick(&mut self, tick: Tick) -> Result<TickOutcome, PollError> {
        let Some(inner) = self.inner.upgrade() else {
            return Ok(TickOutcome::Finish);
        };
        debug!(handle = %tick.handle, iteration = tick.iteration, "polling pending inputs");

        match inner
            .call_service("fetch pending inputs", inner.service.fetch_pending_inputs())
            .await
        {
            Ok(inputs) => Ok(inner.apply_poll_result(tick.handle, inputs)),
            Err(error) => Err(PollError::Work {
                key: STATUS_POLL_KEY.to_string(),
                message: error.to_string(),
            }),
        }
    }

    fn finished(&mut self, handle: PollHandle, exit: &PollExit) {
        if let Some(inner) = self.inner.upgrade() {
            inner.reconcile_exit(handle, exit);
        }
    }
}
