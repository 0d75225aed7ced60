//! Error kinds per spec §7. Fatal kinds are handled by
//! [`crate::lifecycle::LifecycleCoordinator`]'s shutdown path; slot-local
//! and intent-local kinds stay inside [`crate::order_manager::OrderManager`]
//! / [`crate::strategy::StrategyLoop`].

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("config invalid: {0}")]
    ConfigInvalid(String),

    #[error("exchange authentication failed: {0}")]
    ExchangeAuth(String),

    #[error("exchange transient error: {0}")]
    ExchangeTransient(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("amend rejected for order {order_id}: {reason}")]
    AmendRejected { order_id: String, reason: String },

    #[error("order rejected (cl_ord_id={cl_ord_id}): {reason}")]
    OrderRejected { cl_ord_id: String, reason: String },

    #[error("L2 book checksum mismatch: {0}")]
    BookChecksumMismatch(String),

    #[error("ledger corruption: {0}")]
    LedgerCorruption(String),

    #[error("insufficient open lots to cover sell of {requested} BTC (have {available} BTC)")]
    InsufficientLots { requested: String, available: String },

    #[error("tax veto: {0}")]
    TaxVeto(String),

    #[error("circuit breaker frozen until {0}")]
    CircuitBreakerFrozen(String),

    #[error("deadline exceeded: {0}")]
    DeadlineExceeded(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl EngineError {
    /// Per §7: `TaxVeto` and `CircuitBreakerFrozen` are expected outcomes,
    /// not errors — they should not be logged at error level or trip
    /// alerting.
    pub fn is_expected_outcome(&self) -> bool {
        matches!(self, EngineError::TaxVeto(_) | EngineError::CircuitBreakerFrozen(_))
    }

    /// Process-fatal kinds that must drain the engine via
    /// `LifecycleCoordinator`'s graceful-shutdown path.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EngineError::ConfigInvalid(_)
                | EngineError::ExchangeAuth(_)
                | EngineError::LedgerCorruption(_)
        )
    }

    /// CLI exit code per spec §6.
    pub fn exit_code(&self) -> i32 {
        match self {
            EngineError::ConfigInvalid(_) => 2,
            EngineError::LedgerCorruption(_) => 3,
            EngineError::ExchangeAuth(_) => 4,
            _ => 1,
        }
    }
}
