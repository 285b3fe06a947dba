//! Background loops driving the [`Monitor`].
//!
//! Each loop runs its cycles strictly one after another on its own task and
//! sleeps for its cadence between them. A cycle is spawned as a separate task
//! and awaited, so an error or a panic inside it ends that cycle only.
//! Cancellation is observed before a cycle starts and while waiting; a cycle
//! already running is always allowed to finish.

use std::{fmt, future::Future, sync::Arc, time::Duration};

use chrono::Utc;
use tokio::{sync::watch, task::JoinHandle, time};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::Monitor;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoopKind {
    ConditionCheck,
    ExpiryCheck,
}

impl fmt::Display for LoopKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LoopKind::ConditionCheck => "condition-check",
            LoopKind::ExpiryCheck => "expiry-check",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Running,
    Waiting,
    Cancelled,
}

/// Wait between the end of one cycle and the start of the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cadence {
    pub condition_check: Duration,
    pub expiry_check: Duration,
}

impl Default for Cadence {
    fn default() -> Self {
        Self {
            condition_check: Duration::from_secs(10),
            expiry_check: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl Cadence {
    fn of(&self, kind: LoopKind) -> Duration {
        match kind {
            LoopKind::ConditionCheck => self.condition_check,
            LoopKind::ExpiryCheck => self.expiry_check,
        }
    }
}

struct LoopSlot {
    state: watch::Receiver<LoopState>,
    /// Taken by `start`, or by a stop that comes before it.
    sender: Option<watch::Sender<LoopState>>,
    /// Child of the scheduler-wide token, so it can be cancelled alone.
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl LoopSlot {
    fn new(shutdown: &CancellationToken) -> Self {
        let (tx, rx) = watch::channel(LoopState::Idle);
        Self {
            state: rx,
            sender: Some(tx),
            token: shutdown.child_token(),
            task: None,
        }
    }

    /// Cancel the loop and wait for it to exit. A slot that never started
    /// goes straight to `Cancelled`.
    async fn stop(&mut self, kind: LoopKind) {
        self.token.cancel();
        if let Some(tx) = self.sender.take() {
            tx.send_replace(LoopState::Cancelled);
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!(task = %kind, error = %e, "Monitoring loop task ended abnormally");
            }
        }
    }
}

pub struct Scheduler {
    monitor: Arc<Monitor>,
    cadence: Cadence,
    shutdown: CancellationToken,
    condition: LoopSlot,
    expiry: LoopSlot,
}

impl Scheduler {
    /// `shutdown` is the process-wide signal; cancelling it stops both loops
    /// just like [`stop`](Self::stop) does.
    pub fn new(monitor: Arc<Monitor>, cadence: Cadence, shutdown: CancellationToken) -> Self {
        Self {
            monitor,
            cadence,
            condition: LoopSlot::new(&shutdown),
            expiry: LoopSlot::new(&shutdown),
            shutdown,
        }
    }

    pub fn state(&self, kind: LoopKind) -> LoopState {
        *self.slot(kind).state.borrow()
    }

    fn slot(&self, kind: LoopKind) -> &LoopSlot {
        match kind {
            LoopKind::ConditionCheck => &self.condition,
            LoopKind::ExpiryCheck => &self.expiry,
        }
    }

    fn slot_mut(&mut self, kind: LoopKind) -> &mut LoopSlot {
        match kind {
            LoopKind::ConditionCheck => &mut self.condition,
            LoopKind::ExpiryCheck => &mut self.expiry,
        }
    }

    /// Spawn both loops. Loops already started or stopped are left alone.
    pub fn start(&mut self) {
        let launched = [LoopKind::ConditionCheck, LoopKind::ExpiryCheck]
            .into_iter()
            .filter(|&kind| self.launch(kind))
            .count();
        if launched == 0 {
            warn!("Scheduler already started");
        }
    }

    fn launch(&mut self, kind: LoopKind) -> bool {
        let monitor = Arc::clone(&self.monitor);
        let cadence = self.cadence.of(kind);
        let slot = self.slot_mut(kind);
        let Some(state) = slot.sender.take() else {
            return false;
        };
        let token = slot.token.clone();

        let task = match kind {
            LoopKind::ConditionCheck => tokio::spawn(run_loop(kind, cadence, token, state, move || {
                let monitor = Arc::clone(&monitor);
                async move { monitor.condition_cycle().await }
            })),
            LoopKind::ExpiryCheck => tokio::spawn(run_loop(kind, cadence, token, state, move || {
                let monitor = Arc::clone(&monitor);
                async move { monitor.expiry_cycle(Utc::now()).await }
            })),
        };
        slot.task = Some(task);
        true
    }

    /// Stop one loop and wait for it to exit; the other keeps its cadence.
    pub async fn stop_loop(&mut self, kind: LoopKind) {
        self.slot_mut(kind).stop(kind).await;
    }

    /// Signal cancellation and wait for both loops to wind down. A cycle in
    /// flight finishes before its loop exits.
    pub async fn stop(&mut self) {
        self.shutdown.cancel();
        self.condition.stop(LoopKind::ConditionCheck).await;
        self.expiry.stop(LoopKind::ExpiryCheck).await;
    }
}

async fn run_loop<F, Fut>(
    kind: LoopKind,
    cadence: Duration,
    shutdown: CancellationToken,
    state: watch::Sender<LoopState>,
    cycle: F,
) where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = Result<usize>> + Send + 'static,
{
    info!(task = %kind, cadence_secs = cadence.as_secs(), "Monitoring loop started");

    while !shutdown.is_cancelled() {
        state.send_replace(LoopState::Running);

        match tokio::spawn(cycle()).await {
            Ok(Ok(alerts)) => debug!(task = %kind, alerts, "Cycle complete"),
            Ok(Err(e)) => report(Error::cycle_failed(kind, e)),
            Err(e) if e.is_panic() => report(Error::cycle_failed(kind, "cycle panicked")),
            Err(e) => report(Error::cycle_failed(kind, e)),
        }

        state.send_replace(LoopState::Waiting);

        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = time::sleep(cadence) => {}
        }
    }

    state.send_replace(LoopState::Cancelled);
    info!(task = %kind, "Monitoring loop stopped");
}

fn report(err: Error) {
    error!(event = "EvaluationCycleFailed", error = %err, "Monitoring cycle failed");
}
