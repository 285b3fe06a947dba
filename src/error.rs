use std::fmt;

/// Errors surfaced by the store, the audit recorder and the monitoring loops.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{entity} with id {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    /// Store unreachable or a read/write failed.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Input rejected at the store-write boundary.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A monitoring cycle faulted. Logged at the cycle boundary, never
    /// propagated out of the loop.
    #[error("{task} cycle failed: {reason}")]
    EvaluationCycleFailed { task: String, reason: String },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn not_found(entity: &'static str, id: i64) -> Self {
        Self::NotFound { entity, id }
    }

    pub fn cycle_failed(task: impl fmt::Display, reason: impl fmt::Display) -> Self {
        Self::EvaluationCycleFailed {
            task: task.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl From<sqlx::Error> for Error {
    /// Data exceptions (SQLSTATE class 22) and integrity violations (class
    /// 23) are caused by the input, not by the database being unavailable.
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &e {
            if db.code().is_some_and(|code| rejects_input(&code)) {
                return Self::Validation(db.message().to_owned());
            }
        }
        Self::Persistence(e.to_string())
    }
}

fn rejects_input(sqlstate: &str) -> bool {
    sqlstate.starts_with("22") || sqlstate.starts_with("23")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_names_entity_and_id() {
        let err = Error::not_found("device", 42);
        assert_eq!(err.to_string(), "device with id 42 not found");
    }

    #[test]
    fn sqlx_errors_become_persistence_errors() {
        let err: Error = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(err, Error::Persistence(_)));
    }

    #[test]
    fn input_sqlstates_are_recognised() {
        assert!(rejects_input("22001")); // string_data_right_truncation
        assert!(rejects_input("23514")); // check_violation
        assert!(!rejects_input("08006")); // connection_failure
        assert!(!rejects_input("57P01")); // admin_shutdown
    }

    #[test]
    fn cycle_failure_mentions_task() {
        let err = Error::cycle_failed("condition-check", "store unavailable");
        assert_eq!(err.to_string(), "condition-check cycle failed: store unavailable");
    }
}
