use bigdecimal::BigDecimal;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum BookingError {
    /// Bad input shape or range, rejected before any store mutation.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("reservation {0} not found")]
    ReservationNotFound(Uuid),

    #[error("payment {0} not found")]
    PaymentNotFound(Uuid),

    #[error("payment intent {0} not found")]
    IntentNotFound(String),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("intent amount {reported} does not match reservation total {expected}")]
    AmountMismatch {
        expected: BigDecimal,
        reported: BigDecimal,
    },

    /// Transient; the reservation is left untouched and the call is safe to retry.
    #[error("payment gateway unavailable: {0}")]
    GatewayUnavailable(String),

    #[error("conflicting state: {0}")]
    ConflictingState(String),

    #[error("reservation {reservation_id} has {approved} approved against a total of {total}")]
    LedgerInconsistent {
        reservation_id: Uuid,
        approved: BigDecimal,
        total: BigDecimal,
    },

    #[error("storage error: {0}")]
    Storage(String),
}

impl BookingError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, BookingError::GatewayUnavailable(_))
    }
}

impl From<diesel::result::Error> for BookingError {
    fn from(err: diesel::result::Error) -> Self {
        BookingError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for BookingError {
    fn from(err: serde_json::Error) -> Self {
        BookingError::Storage(format!("serialization: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_gateway_failures_are_retryable() {
        assert!(BookingError::GatewayUnavailable("timeout".into()).is_retryable());
        assert!(!BookingError::IntentNotFound("pi_1".into()).is_retryable());
        assert!(!BookingError::AmountMismatch {
            expected: BigDecimal::from(800),
            reported: BigDecimal::from(10),
        }
        .is_retryable());
    }

    #[test]
    fn amount_mismatch_message_names_both_amounts() {
        let err = BookingError::AmountMismatch {
            expected: BigDecimal::from(800),
            reported: BigDecimal::from(10),
        };
        assert_eq!(
            err.to_string(),
            "intent amount 10 does not match reservation total 800"
        );
    }
}
