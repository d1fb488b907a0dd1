//! Keyed, bounded-iteration poll loops.
//!
//! Each key owns at most one loop. A loop runs its work immediately, then on
//! every interval tick, awaiting each tick to completion before the next one
//! is considered. It ends when stopped, when the work asks to finish, when
//! the iteration budget is spent, or on the first failed tick.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::error::PollError;

const MIN_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PollHandle(pub u64);

impl std::fmt::Display for PollHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "poll-{}", self.0)
    }
}

/// Passed to the work on every invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    pub handle: PollHandle,
    /// Successful invocations so far in this registration.
    pub iteration: u32,
    pub max_iterations: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Continue,
    /// End the loop after this tick.
    Finish,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollExit {
    Stopped,
    Finished { iterations: u32 },
    Exhausted { iterations: u32 },
    Failed { iterations: u32, error: PollError },
}

#[async_trait]
pub trait PollWork: Send + 'static {
    async fn tick(&mut self, tick: Tick) -> Result<TickOutcome, PollError>;

    /// Called once when the loop ends, after the key has been deregistered.
    fn finished(&mut self, _handle: PollHandle, _exit: &PollExit) {}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollStatus {
    pub key: String,
    pub handle: PollHandle,
    pub iterations: u32,
    pub max_iterations: u32,
    pub interval_ms: u64,
}

#[derive(Debug)]
struct Registration {
    handle: PollHandle,
    interval: Duration,
    max_iterations: u32,
    iterations: u32,
    stop_tx: Option<oneshot::Sender<()>>,
    // Detached on drop; the loop observes `stop_tx` instead.
    _task: JoinHandle<()>,
}

impl Registration {
    fn cancel(mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
    }
}

type Registry = Arc<Mutex<HashMap<String, Registration>>>;

fn lock(registry: &Mutex<HashMap<String, Registration>>) -> MutexGuard<'_, HashMap<String, Registration>> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
pub struct PollingManager {
    registry: Registry,
    next_handle: AtomicU64,
}

impl PollingManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `work` under `key`, replacing any loop already running there.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start<W>(
        &self,
        key: impl Into<String>,
        interval: Duration,
        max_iterations: u32,
        work: W,
    ) -> PollHandle
    where
        W: PollWork,
    {
        let key = key.into();
        let handle = PollHandle(self.next_handle.fetch_add(1, Ordering::Relaxed) + 1);
        let interval = interval.max(MIN_INTERVAL);
        let (stop_tx, stop_rx) = oneshot::channel();

        // The loop reads its registration before the first tick, so insert
        // while still holding the lock it will wait on.
        let mut registry = lock(&self.registry);
        if let Some(previous) = registry.remove(&key) {
            debug!(key = %key, previous = %previous.handle, "replacing poll registration");
            previous.cancel();
        }
        let task = tokio::spawn(run_poll_loop(
            Arc::clone(&self.registry),
            key.clone(),
            handle,
            interval,
            stop_rx,
            work,
        ));
        registry.insert(
            key.clone(),
            Registration {
                handle,
                interval,
                max_iterations,
                iterations: 0,
                stop_tx: Some(stop_tx),
                _task: task,
            },
        );
        debug!(key = %key, handle = %handle, interval_ms = interval.as_millis() as u64, max_iterations, "poll registered");
        handle
    }

    /// Returns false if nothing was registered under `key`.
    pub fn stop(&self, key: &str) -> bool {
        let removed = lock(&self.registry).remove(key);
        match removed {
            Some(registration) => {
                debug!(key = %key, handle = %registration.handle, "poll stopped");
                registration.cancel();
                true
            }
            None => false,
        }
    }

    pub fn stop_all(&self) {
        let drained = lock(&self.registry).drain().collect::<Vec<_>>();
        for (key, registration) in drained {
            debug!(key = %key, handle = %registration.handle, "poll stopped");
            registration.cancel();
        }
    }

    pub fn is_active(&self, key: &str) -> bool {
        lock(&self.registry).contains_key(key)
    }

    pub fn handle(&self, key: &str) -> Option<PollHandle> {
        lock(&self.registry).get(key).map(|registration| registration.handle)
    }

    /// Snapshot of every active registration, ordered by key.
    pub fn status(&self) -> Vec<PollStatus> {
        let registry = lock(&self.registry);
        let mut statuses = registry
            .iter()
            .map(|(key, registration)| PollStatus {
                key: key.clone(),
                handle: registration.handle,
                iterations: registration.iterations,
                max_iterations: registration.max_iterations,
                interval_ms: registration.interval.as_millis() as u64,
            })
            .collect::<Vec<_>>();
        statuses.sort_by(|a, b| a.key.cmp(&b.key));
        statuses
    }
}

impl Drop for PollingManager {
    fn drop(&mut self) {
        self.stop_all();
    }
}

fn current_tick(registry: &Registry, key: &str, handle: PollHandle) -> Option<Tick> {
    lock(registry)
        .get(key)
        .filter(|registration| registration.handle == handle)
        .map(|registration| Tick {
            handle,
            iteration: registration.iterations,
            max_iterations: registration.max_iterations,
        })
}

fn record_iteration(registry: &Registry, key: &str, handle: PollHandle) {
    if let Some(registration) = lock(registry)
        .get_mut(key)
        .filter(|registration| registration.handle == handle)
    {
        registration.iterations = registration.iterations.saturating_add(1);
    }
}

fn deregister(registry: &Registry, key: &str, handle: PollHandle) {
    let mut registry = lock(registry);
    if registry
        .get(key)
        .is_some_and(|registration| registration.handle == handle)
    {
        registry.remove(key);
    }
}

async fn run_poll_loop<W: PollWork>(
    registry: Registry,
    key: String,
    handle: PollHandle,
    period: Duration,
    mut stop_rx: oneshot::Receiver<()>,
    mut work: W,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let exit = loop {
        tokio::select! {
            biased;
            _ = &mut stop_rx => break PollExit::Stopped,
            _ = interval.tick() => {}
        }

        let Some(tick) = current_tick(&registry, &key, handle) else {
            break PollExit::Stopped;
        };
        if tick.iteration >= tick.max_iterations {
            deregister(&registry, &key, handle);
            debug!(key = %key, handle = %handle, iterations = tick.iteration, "poll exhausted");
            break PollExit::Exhausted {
                iterations: tick.iteration,
            };
        }

        let outcome = tokio::select! {
            biased;
            _ = &mut stop_rx => break PollExit::Stopped,
            outcome = work.tick(tick) => outcome,
        };

        match outcome {
            Ok(TickOutcome::Continue) => record_iteration(&registry, &key, handle),
            Ok(TickOutcome::Finish) => {
                deregister(&registry, &key, handle);
                break PollExit::Finished {
                    iterations: tick.iteration.saturating_add(1),
                };
            }
            Err(error) => {
                deregister(&registry, &key, handle);
                warn!(key = %key, handle = %handle, error = %error, "poll tick failed; stopping");
                break PollExit::Failed {
                    iterations: tick.iteration,
                    error,
                };
            }
        }
    };

    work.finished(handle, &exit);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[derive(Clone, Default)]
    struct Probe {
        calls: Arc<AtomicU32>,
        active: Arc<AtomicU32>,
        max_active: Arc<AtomicU32>,
        exits: Arc<Mutex<Vec<PollExit>>>,
    }

    impl Probe {
        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }

        fn exits(&self) -> Vec<PollExit> {
            self.exits.lock().expect("exits lock").clone()
        }
    }

    struct ProbeWork {
        probe: Probe,
        fail_on_call: Option<u32>,
        finish_on_call: Option<u32>,
        tick_duration: Duration,
    }

    impl ProbeWork {
        fn new(probe: &Probe) -> Self {
            Self {
                probe: probe.clone(),
                fail_on_call: None,
                finish_on_call: None,
                tick_duration: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl PollWork for ProbeWork {
        async fn tick(&mut self, _tick: Tick) -> Result<TickOutcome, PollError> {
            let call = self.probe.calls.fetch_add(1, Ordering::SeqCst) + 1;
            let active = self.probe.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.probe.max_active.fetch_max(active, Ordering::SeqCst);
            if !self.tick_duration.is_zero() {
                tokio::time::sleep(self.tick_duration).await;
            }
            self.probe.active.fetch_sub(1, Ordering::SeqCst);

            if self.fail_on_call == Some(call) {
                return Err(PollError::Work {
                    key: "probe".to_string(),
                    message: format!("call {call} failed"),
                });
            }
            if self.finish_on_call == Some(call) {
                return Ok(TickOutcome::Finish);
            }
            Ok(TickOutcome::Continue)
        }

        fn finished(&mut self, _handle: PollHandle, exit: &PollExit) {
            self.probe.exits.lock().expect("exits lock").push(exit.clone());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn runs_immediately_then_every_interval() {
        let manager = PollingManager::new();
        let probe = Probe::default();
        manager.start("inputs", Duration::from_millis(100), 10, ProbeWork::new(&probe));

        tokio::time::sleep(Duration::from_millis(250)).await;

        assert_eq!(probe.calls(), 3);
        let status = manager.status();
        assert_eq!(status.len(), 1);
        assert_eq!(status[0].key, "inputs");
        assert_eq!(status[0].iterations, 3);
        assert_eq!(status[0].max_iterations, 10);
        assert_eq!(status[0].interval_ms, 100);
    }

    #[tokio::test(start_paused = true)]
    async fn deregisters_after_max_iterations() {
        let manager = PollingManager::new();
        let probe = Probe::default();
        manager.start("inputs", Duration::from_millis(10), 3, ProbeWork::new(&probe));

        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(probe.calls(), 3);
        assert!(!manager.is_active("inputs"));
        assert_eq!(probe.exits(), vec![PollExit::Exhausted { iterations: 3 }]);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_budget_never_invokes_work() {
        let manager = PollingManager::new();
        let probe = Probe::default();
        manager.start("inputs", Duration::from_millis(10), 0, ProbeWork::new(&probe));

        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(probe.calls(), 0);
        assert_eq!(probe.exits(), vec![PollExit::Exhausted { iterations: 0 }]);
    }

    #[tokio::test(start_paused = true)]
    async fn restarting_a_key_replaces_the_previous_loop() {
        let manager = PollingManager::new();
        let first = Probe::default();
        let second = Probe::default();

        let first_handle =
            manager.start("inputs", Duration::from_millis(100), 10, ProbeWork::new(&first));
        let second_handle =
            manager.start("inputs", Duration::from_millis(100), 10, ProbeWork::new(&second));
        assert_ne!(first_handle, second_handle);

        tokio::time::sleep(Duration::from_millis(250)).await;

        assert_eq!(first.calls(), 0);
        assert_eq!(first.exits(), vec![PollExit::Stopped]);
        assert_eq!(second.calls(), 3);
        assert_eq!(manager.status().len(), 1);
        assert_eq!(manager.handle("inputs"), Some(second_handle));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_tick_ends_the_registration() {
        let manager = PollingManager::new();
        let probe = Probe::default();
        let mut work = ProbeWork::new(&probe);
        work.fail_on_call = Some(2);
        manager.start("inputs", Duration::from_millis(100), 10, work);

        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(probe.calls(), 2);
        assert!(manager.status().is_empty());
        let exits = probe.exits();
        assert_eq!(exits.len(), 1);
        assert!(matches!(
            &exits[0],
            PollExit::Failed { iterations: 1, error: PollError::Work { message, .. } }
                if message == "call 2 failed"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn finish_outcome_ends_the_loop_cleanly() {
        let manager = PollingManager::new();
        let probe = Probe::default();
        let mut work = ProbeWork::new(&probe);
        work.finish_on_call = Some(1);
        manager.start("inputs", Duration::from_millis(100), 10, work);

        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(probe.calls(), 1);
        assert!(!manager.is_active("inputs"));
        assert_eq!(probe.exits(), vec![PollExit::Finished { iterations: 1 }]);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_prevents_further_ticks() {
        let manager = PollingManager::new();
        let probe = Probe::default();
        manager.start("inputs", Duration::from_millis(100), 100, ProbeWork::new(&probe));

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(probe.calls(), 2);

        assert!(manager.stop("inputs"));
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(probe.calls(), 2);
        assert_eq!(probe.exits(), vec![PollExit::Stopped]);
        assert!(!manager.stop("inputs"));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_an_in_flight_tick() {
        let manager = PollingManager::new();
        let probe = Probe::default();
        let mut work = ProbeWork::new(&probe);
        work.tick_duration = Duration::from_millis(500);
        manager.start("inputs", Duration::from_millis(100), 100, work);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(probe.active.load(Ordering::SeqCst), 1);

        manager.stop("inputs");
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(probe.calls(), 1);
        assert_eq!(probe.exits(), vec![PollExit::Stopped]);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_ticks_never_overlap() {
        let manager = PollingManager::new();
        let probe = Probe::default();
        let mut work = ProbeWork::new(&probe);
        work.tick_duration = Duration::from_millis(250);
        manager.start("inputs", Duration::from_millis(100), 100, work);

        tokio::time::sleep(Duration::from_secs(1)).await;

        assert!(probe.calls() >= 2);
        assert!(probe.calls() < 10);
        assert_eq!(probe.max_active.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_all_clears_every_key() {
        let manager = PollingManager::new();
        let a = Probe::default();
        let b = Probe::default();
        manager.start("a", Duration::from_millis(100), 10, ProbeWork::new(&a));
        manager.start("b", Duration::from_millis(100), 10, ProbeWork::new(&b));
        assert_eq!(manager.status().len(), 2);

        manager.stop_all();
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert!(manager.status().is_empty());
        assert_eq!(a.exits(), vec![PollExit::Stopped]);
        assert_eq!(b.exits(), vec![PollExit::Stopped]);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_manager_stops_its_loops() {
        let probe = Probe::default();
        {
            let manager = PollingManager::new();
            manager.start("inputs", Duration::from_millis(100), 100, ProbeWork::new(&probe));
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(probe.calls(), 1);
        assert_eq!(probe.exits(), vec![PollExit::Stopped]);
    }

    #[test]
    fn stop_on_unknown_key_is_a_no_op() {
        let manager = PollingManager::new();
        assert!(!manager.stop("missing"));
        assert!(manager.status().is_empty());
    }

    #[test]
    fn poll_handle_display_is_prefixed() {
        assert_eq!(PollHandle(7).to_string(), "poll-7");
    }
}
