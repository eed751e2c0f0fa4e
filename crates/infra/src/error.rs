//! Infrastructure error model for the ledger.
//!
//! ## Error Mapping
//!
//! SQLx errors are mapped to `LedgerError` as follows:
//!
//! | SQLx Error | PostgreSQL Error Code | LedgerError | Scenario |
//! |------------|----------------------|-------------|----------|
//! | Database (serialization failure) | `40001` | `Concurrency` | Conflicting concurrent transaction; retry is safe |
//! | Database (deadlock detected) | `40P01` | `Concurrency` | Lock cycle between two postings; retry is safe |
//! | Database (raise exception) | `P0001` | `Domain(ImmutabilityViolation)` | Append-only trigger fired on UPDATE/DELETE |
//! | Database (numeric value out of range) | `22003` | `Domain(Validation)` | Amount exceeds the `NUMERIC(18,2)` column; retrying can't help |
//! | Database (check constraint violation) | `23514` | `Store` | Non-positive amount or unknown kind reached the table |
//! | Database (other) | Any other | `Store` | Other database errors |
//! | PoolClosed / RowNotFound / Other | N/A | `Store` | Connection failures, network errors, etc. |

use thiserror::Error;

use adledger_core::{ChannelId, DomainError};

#[derive(Debug, Error)]
pub enum LedgerError {
    /// Deterministic domain failure (validation, precondition, invariant).
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Concurrent transactions collided; nothing was committed.
    #[error("concurrent modification: {0}")]
    Concurrency(String),

    /// The channel is unknown to the channel directory.
    #[error("channel not found: {0}")]
    ChannelNotFound(ChannelId),

    /// Persistence failure; the whole transaction group was rolled back.
    #[error("store error: {0}")]
    Store(String),
}

impl LedgerError {
    /// Rejected before anything was written; safe to surface to a user.
    pub fn is_validation(&self) -> bool {
        matches!(self, LedgerError::Domain(e) if e.is_validation())
    }

    /// Nothing was committed and the whole operation may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Concurrency(_) | LedgerError::Store(_))
    }

    pub(crate) fn poisoned() -> Self {
        LedgerError::Store("lock poisoned".to_string())
    }
}

/// Map SQLx errors to LedgerError.
pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> LedgerError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            map_sqlstate(db_err.code().as_deref(), msg)
        }
        sqlx::Error::PoolClosed => {
            LedgerError::Store(format!("connection pool closed in {}", operation))
        }
        sqlx::Error::RowNotFound => {
            LedgerError::Store(format!("unexpected row not found in {}", operation))
        }
        _ => LedgerError::Store(format!("sqlx error in {}: {}", operation, err)),
    }
}

fn map_sqlstate(code: Option<&str>, msg: String) -> LedgerError {
    match code {
        Some("40001") | Some("40P01") => LedgerError::Concurrency(msg),
        Some("P0001") => LedgerError::Domain(DomainError::immutable(msg)),
        Some("22003") => LedgerError::Domain(DomainError::validation(msg)),
        _ => LedgerError::Store(msg),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn precondition_failures_are_validation() {
        let err: LedgerError = DomainError::InsufficientFrozen {
            requested: dec!(5),
            frozen: dec!(1),
        }
        .into();
        assert!(err.is_validation());
        assert!(!err.is_retryable());
    }

    #[test]
    fn immutability_is_not_validation() {
        let err: LedgerError = DomainError::immutable("update").into();
        assert!(!err.is_validation());
    }

    #[test]
    fn store_failures_are_retryable() {
        assert!(LedgerError::Store("boom".into()).is_retryable());
        assert!(LedgerError::Concurrency("40001".into()).is_retryable());
    }

    #[test]
    fn non_database_sqlx_errors_map_to_store() {
        let err = map_sqlx_error("post", sqlx::Error::PoolClosed);
        assert!(matches!(err, LedgerError::Store(msg) if msg.contains("post")));
    }

    #[test]
    fn sqlstates_map_to_their_error_class() {
        assert!(map_sqlstate(Some("40P01"), "deadlock".into()).is_retryable());
        assert!(matches!(
            map_sqlstate(Some("P0001"), "trigger".into()),
            LedgerError::Domain(DomainError::ImmutabilityViolation(_))
        ));
        assert!(matches!(map_sqlstate(Some("23514"), "check".into()), LedgerError::Store(_)));
        assert!(matches!(map_sqlstate(None, "other".into()), LedgerError::Store(_)));
    }

    #[test]
    fn numeric_overflow_is_validation_not_retryable() {
        let err = map_sqlstate(Some("22003"), "numeric field overflow".into());
        assert!(err.is_validation());
        assert!(!err.is_retryable());
    }
}
