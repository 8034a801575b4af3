//! Error taxonomy for ledger and settlement operations.
//!
//! Every core operation returns `Result<T, BookError>`. Validation failures
//! are raised before any row is touched; failures inside a transaction roll
//! the whole transaction back.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::types::EventStatus;

/// Domain errors surfaced to the request layer.
#[derive(Debug, Error)]
pub enum BookError {
    #[error("invalid amount: {0} (must be positive after quantization)")]
    InvalidAmount(Decimal),

    #[error("invalid stake: {0} (must be positive after quantization)")]
    InvalidStake(Decimal),

    #[error("invalid odds: {0} (must be greater than zero)")]
    InvalidOdds(Decimal),

    #[error("insufficient balance: need {needed}, have {available}")]
    InsufficientBalance { needed: Decimal, available: Decimal },

    #[error("duplicate ledger reference: {0}")]
    DuplicateReference(String),

    #[error("{entity} name already taken: {name}")]
    DuplicateName { entity: &'static str, name: String },

    #[error("account not found: {0}")]
    AccountNotFound(i64),

    #[error("event not found: {0}")]
    EventNotFound(i64),

    #[error("market not found: {0}")]
    MarketNotFound(i64),

    #[error("outcome not found: {0}")]
    OutcomeNotFound(i64),

    #[error("wager not found: {0}")]
    WagerNotFound(i64),

    #[error("no winning outcome specified for market {market_id}")]
    NoOutcomeSpecified { market_id: i64 },

    #[error("{entity} {id} is already settled")]
    AlreadySettled { entity: &'static str, id: i64 },

    #[error("event {id} is not open for wagering ({status})")]
    EventClosed { id: i64, status: EventStatus },

    #[error("invalid event transition: {from} -> {to}")]
    InvalidTransition { from: EventStatus, to: EventStatus },

    #[error("database busy: operation timed out waiting for a lock")]
    Busy,

    #[error("storage error: {0}")]
    Storage(String),

    #[error("database error: {0}")]
    Database(sqlx::Error),
}

pub type Result<T> = std::result::Result<T, BookError>;

impl From<sqlx::Error> for BookError {
    fn from(err: sqlx::Error) -> Self {
        if is_busy(&err) {
            BookError::Busy
        } else {
            BookError::Database(err)
        }
    }
}

/// Whether a sqlx error is a UNIQUE constraint violation. Callers map this
/// to the context-appropriate variant (`DuplicateReference`, `DuplicateName`).
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

/// SQLITE_BUSY: a bounded lock wait expired.
fn is_busy(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("5"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_insufficient_balance_display() {
        let e = BookError::InsufficientBalance {
            needed: dec!(10.00),
            available: dec!(5.00),
        };
        let msg = format!("{e}");
        assert!(msg.contains("10.00"));
        assert!(msg.contains("5.00"));
    }

    #[test]
    fn test_invalid_transition_display() {
        let e = BookError::InvalidTransition {
            from: EventStatus::Cancelled,
            to: EventStatus::Settled,
        };
        assert_eq!(format!("{e}"), "invalid event transition: cancelled -> settled");
    }

    #[test]
    fn test_duplicate_reference_display() {
        let e = BookError::DuplicateReference("DEP-123".to_string());
        assert!(format!("{e}").contains("DEP-123"));
    }
}
