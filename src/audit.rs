use std::sync::Arc;

use tracing::{debug, warn};

use crate::{
    db::models::{AuditEntry, NewAuditEntry},
    error::Result,
    store::{Session, Store},
};

/// Appends audit entries for state-changing actions.
#[derive(Clone)]
pub struct AuditRecorder {
    store: Arc<dyn Store>,
}

impl AuditRecorder {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Append one entry. The entry is durable once this returns `Ok`.
    pub async fn record(
        &self,
        action: &str,
        actor: &str,
        details: &str,
        is_automated: bool,
    ) -> Result<AuditEntry> {
        let mut session = self.store.session().await?;
        let entry = session
            .append_audit(NewAuditEntry {
                action: action.to_owned(),
                actor: actor_label(actor, is_automated),
                details: details.to_owned(),
            })
            .await?;
        debug!(action = %entry.action, actor = %entry.actor, "Audit entry recorded");
        Ok(entry)
    }

    /// Like [`record`](Self::record), but failures are logged and dropped.
    /// The action that triggered the entry is never rolled back.
    pub async fn record_or_log(&self, action: &str, actor: &str, details: &str, is_automated: bool) {
        if let Err(e) = self.record(action, actor, details, is_automated).await {
            warn!(action = %action, actor = %actor, error = %e, "Failed to record audit entry");
        }
    }
}

/// Automated actors are rendered as `"Sensor {actor}"`.
pub fn actor_label(actor: &str, is_automated: bool) -> String {
    if is_automated {
        format!("Sensor {actor}")
    } else {
        actor.to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::Error, store::MemoryStore};

    #[test]
    fn automated_actor_is_prefixed() {
        assert_eq!(actor_label("12", true), "Sensor 12");
        assert_eq!(actor_label("admin@example.com", false), "admin@example.com");
    }

    #[tokio::test]
    async fn record_appends_in_order() {
        let store = MemoryStore::new();
        let audit = AuditRecorder::new(Arc::new(store.clone()));

        audit.record("Create Sensor", "admin", "Created sensor: 1.", false).await.unwrap();
        audit.record("Create Condition", "1", "Created Condition: 2.", true).await.unwrap();

        let mut session = store.session().await.unwrap();
        let entries = session.list_audit().await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].action, "Create Sensor");
        assert_eq!(entries[0].actor, "admin");
        assert_eq!(entries[1].actor, "Sensor 1");
        assert!(entries[0].recorded_at <= entries[1].recorded_at);
    }

    #[tokio::test]
    async fn record_surfaces_persistence_errors() {
        let store = MemoryStore::new();
        store.set_available(false);
        let audit = AuditRecorder::new(Arc::new(store));

        let err = audit.record("Create Sensor", "admin", "", false).await.unwrap_err();
        assert!(matches!(err, Error::Persistence(_)));
    }

    #[tokio::test]
    async fn record_or_log_does_not_panic_on_failure() {
        let store = MemoryStore::new();
        store.set_available(false);
        let audit = AuditRecorder::new(Arc::new(store));
        audit.record_or_log("Delete Medicine", "admin", "Deleted Medicine: 3.", false).await;
    }
}
