//! Periodic storage-condition and expiry monitoring.

pub mod condition;
pub mod expiry;
pub mod scheduler;
pub mod stock;

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::info;

use crate::{
    error::Result,
    notify::{self, NotificationSink},
    store::Store,
};

use self::condition::Violation;

pub use scheduler::{Cadence, LoopKind, LoopState, Scheduler};

/// Runs single monitoring cycles. [`Scheduler`] drives it periodically; the
/// API calls [`Monitor::run_condition_check_once`] on demand.
pub struct Monitor {
    store: Arc<dyn Store>,
    sink: Arc<dyn NotificationSink>,
    expiry_window: Duration,
}

impl Monitor {
    pub fn new(store: Arc<dyn Store>, sink: Arc<dyn NotificationSink>, expiry_window: Duration) -> Self {
        Self {
            store,
            sink,
            expiry_window,
        }
    }

    /// Evaluate every active device once and return the violation messages
    /// without notifying anyone.
    pub async fn run_condition_check_once(&self) -> Result<Vec<String>> {
        let violations = self.check_conditions().await?;
        Ok(violations.iter().map(ToString::to_string).collect())
    }

    /// One condition-check cycle: evaluate, then notify each violation.
    /// Returns the number of alerts emitted.
    pub async fn condition_cycle(&self) -> Result<usize> {
        let violations = self.check_conditions().await?;
        for violation in &violations {
            notify::deliver(self.sink.as_ref(), &violation.to_string()).await;
        }
        if !violations.is_empty() {
            info!(count = violations.len(), "Storage condition violations reported");
        }
        Ok(violations.len())
    }

    /// One expiry-check cycle with cutoff `now + expiry_window`.
    pub async fn expiry_cycle(&self, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = now + self.expiry_window;
        let expiring = {
            let mut session = self.store.session().await?;
            expiry::find_expiring(&mut *session, cutoff).await?
        };
        for medicine in &expiring {
            notify::deliver(self.sink.as_ref(), &expiry::expiry_message(medicine)).await;
        }
        if !expiring.is_empty() {
            info!(count = expiring.len(), cutoff = %cutoff, "Expiring medicines reported");
        }
        Ok(expiring.len())
    }

    /// The session is dropped before any notification goes out, so a slow
    /// sink never holds a store connection.
    async fn check_conditions(&self) -> Result<Vec<Violation>> {
        let mut session = self.store.session().await?;
        condition::check_all(&mut *session).await
    }
}
