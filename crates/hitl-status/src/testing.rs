use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use hitl_core::config::StatusConfig;
use hitl_core::types::{PendingHumanInput, SubmitRequest};
use serde_json::{json, Value};

use crate::coordinator::WorkflowStatusCoordinator;
use crate::error::ServiceError;
use crate::service::HumanInputService;

/// Scripted service. Queued results are consumed in order; once a queue is
/// empty the fallback is returned.
#[derive(Default)]
pub(crate) struct StubService {
    fetches: Mutex<VecDeque<Result<Vec<PendingHumanInput>, ServiceError>>>,
    fetch_fallback: Mutex<Option<Result<Vec<PendingHumanInput>, ServiceError>>>,
    submits: Mutex<VecDeque<Result<Value, ServiceError>>>,
    submitted: Mutex<Vec<SubmitRequest>>,
    fetch_count: AtomicUsize,
    fetch_delay: Mutex<Option<Duration>>,
    submit_delay: Mutex<Option<Duration>>,
}

impl StubService {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn push_fetch(&self, result: Result<Vec<PendingHumanInput>, ServiceError>) {
        self.fetches.lock().expect("fetches lock").push_back(result);
    }

    pub(crate) fn set_fetch_fallback(&self, result: Result<Vec<PendingHumanInput>, ServiceError>) {
        *self.fetch_fallback.lock().expect("fallback lock") = Some(result);
    }

    pub(crate) fn push_submit(&self, result: Result<Value, ServiceError>) {
        self.submits.lock().expect("submits lock").push_back(result);
    }

    pub(crate) fn set_fetch_delay(&self, delay: Duration) {
        *self.fetch_delay.lock().expect("delay lock") = Some(delay);
    }

    pub(crate) fn set_submit_delay(&self, delay: Duration) {
        *self.submit_delay.lock().expect("delay lock") = Some(delay);
    }

    pub(crate) fn fetch_count(&self) -> usize {
        self.fetch_count.load(Ordering::SeqCst)
    }

    pub(crate) fn submitted(&self) -> Vec<SubmitRequest> {
        self.submitted.lock().expect("submitted lock").clone()
    }
}

#[async_trait]
impl HumanInputService for StubService {
    async fn fetch_pending_inputs(&self) -> Result<Vec<PendingHumanInput>, ServiceError> {
        self.fetch_count.fetch_add(1, Ordering::SeqCst);
        let delay = *self.fetch_delay.lock().expect("delay lock");
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let queued = self.fetches.lock().expect("fetches lock").pop_front();
        match queued {
            Some(result) => result,
            None => self
                .fetch_fallback
                .lock()
                .expect("fallback lock")
                .clone()
                .unwrap_or_else(|| Ok(Vec::new())),
        }
    }

    async fn submit_input(&self, request: SubmitRequest) -> Result<Value, ServiceError> {
        self.submitted
            .lock()
            .expect("submitted lock")
            .push(request);
        let delay = *self.submit_delay.lock().expect("delay lock");
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let queued = self.submits.lock().expect("submits lock").pop_front();
        queued.unwrap_or_else(|| Ok(json!({ "status": "accepted" })))
    }
}

/// Pending input requested `minutes_ago` minutes before now.
pub(crate) fn input(id: &str, minutes_ago: i64) -> PendingHumanInput {
    PendingHumanInput::new(id, Utc::now() - chrono::Duration::minutes(minutes_ago))
}

pub(crate) fn coordinator(service: &Arc<StubService>, config: StatusConfig) -> WorkflowStatusCoordinator {
    WorkflowStatusCoordinator::new(Arc::clone(service) as Arc<dyn HumanInputService>, config)
}

/// Idle stop disabled, no request deadline, short restart settle.
pub(crate) fn quiet_config() -> StatusConfig {
    let mut config = StatusConfig::default();
    config.polling.idle_stop_threshold = 0;
    config.polling.restart_settle_ms = 100;
    config.service.request_timeout_ms = 0;
    config
}
