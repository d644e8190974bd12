//! Error taxonomy for the REST gateway and the ledger.
//!
//! Transport faults are retried inside the gateway up to a caller-visible
//! budget and only then surfaced as `MaxRetry`. Business rejections
//! (margin, not-found) are never retried automatically. Ledger invariant
//! violations are not errors at all: they panic, because continuing on a
//! corrupted book is worse than stopping.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExchangeError {
    /// Credentials rejected. Fatal; aborts the run.
    #[error("authentication rejected: {0}")]
    Auth(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Request budget exceeded upstream. Carries seconds until the limit
    /// resets; the gateway never sleeps on this, the caller decides.
    #[error("rate limited, resets in {reset_after_secs}s")]
    RateLimited { reset_after_secs: u64 },

    /// Transient-fault retry budget exhausted.
    #[error("retry budget exhausted after {attempts} attempts: {last}")]
    MaxRetry { attempts: u32, last: String },

    /// Exchange rejected the request for insufficient balance/margin.
    #[error("insufficient margin: {0}")]
    MarginNotEnough(String),

    /// `already_gone` is set for DELETE targets that no longer exist
    /// (order already canceled or filled), which callers may treat as
    /// success.
    #[error("not found: {message}")]
    NotFound { message: String, already_gone: bool },

    #[error("bad request: {0}")]
    BadRequest(String),

    /// Unexpected HTTP status outside the classified set.
    #[error("http {status}: {body}")]
    Http { status: u16, body: String },

    /// 503 or a network/timeout fault; eligible for bounded retry.
    #[error("transient fault: {0}")]
    Transient(String),
}

impl ExchangeError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ExchangeError::Transient(_))
    }

    /// Errors the caller can recover from without operator intervention.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ExchangeError::RateLimited { .. }
                | ExchangeError::MarginNotEnough(_)
                | ExchangeError::NotFound {
                    already_gone: true,
                    ..
                }
        )
    }

    pub fn reason_label(&self) -> &'static str {
        match self {
            ExchangeError::Auth(_) => "auth",
            ExchangeError::Forbidden(_) => "forbidden",
            ExchangeError::RateLimited { .. } => "rate_limited",
            ExchangeError::MaxRetry { .. } => "max_retry",
            ExchangeError::MarginNotEnough(_) => "margin_not_enough",
            ExchangeError::NotFound { .. } => "not_found",
            ExchangeError::BadRequest(_) => "bad_request",
            ExchangeError::Http { .. } => "http",
            ExchangeError::Transient(_) => "transient",
        }
    }
}

/// Business rejections raised by the ledger and scheduler.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LedgerError {
    #[error("margin not enough: required {required:.2}, available {available:.2}")]
    MarginNotEnough { required: f64, available: f64 },

    #[error("unknown order {0}")]
    UnknownOrder(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_helpers() {
        assert!(ExchangeError::Transient("503".into()).is_transient());
        assert!(!ExchangeError::Auth("bad key".into()).is_transient());
        assert!(ExchangeError::RateLimited {
            reset_after_secs: 10
        }
        .is_recoverable());
        assert!(ExchangeError::NotFound {
            message: "order".into(),
            already_gone: true
        }
        .is_recoverable());
        assert!(!ExchangeError::NotFound {
            message: "order".into(),
            already_gone: false
        }
        .is_recoverable());
    }
}
