use thiserror::Error;

use crate::models::Ticket;

#[derive(Error, Debug)]
pub enum TradeError {
    /// Missing quote, candles or balance; the symbol is skipped this cycle
    #[error("{what} unavailable for {symbol}")]
    DataUnavailable { symbol: String, what: &'static str },

    #[error("Computation degraded: {0}")]
    ComputationDegraded(String),

    /// A safety gate rejected the trade. Not a fault.
    #[error("Trade blocked: {reason}")]
    FilterBlocked { reason: String },

    /// Broker rejected or errored the order; retried next cycle
    #[error("Order placement failed for {symbol}: {reason}")]
    PlacementFailed { symbol: String, reason: String },

    #[error("Ledger inconsistency: {0}")]
    LedgerInconsistency(String),

    #[error("Ledger lock poisoned")]
    LedgerUnavailable,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to load configuration")]
    Config(#[from] config::ConfigError),
}

impl TradeError {
    pub fn duplicate_ticket(ticket: Ticket) -> Self {
        TradeError::LedgerInconsistency(format!("ticket {} is already tracked", ticket))
    }

    pub fn unknown_ticket(ticket: Ticket) -> Self {
        TradeError::LedgerInconsistency(format!("ticket {} is not open", ticket))
    }

    /// Placement failures are the only errors worth retrying next cycle
    pub fn is_retryable(&self) -> bool {
        matches!(self, TradeError::PlacementFailed { .. })
    }
}

pub type Result<T> = std::result::Result<T, TradeError>;
