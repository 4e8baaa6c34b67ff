// Core modules
pub mod analysis;
pub mod config;
pub mod engine;
pub mod error;
pub mod execution;
pub mod indicators;
pub mod models;
pub mod risk;
pub mod strategy;

// Re-export commonly used types
pub use analysis::{VolatilityAnalyzer, VolatilityLevel, VolatilityMetrics};
pub use crate::config::{Settings, TradingMode};
pub use engine::{CycleReport, TradingSystem};
pub use execution::{Broker, PaperBroker, PositionManager, SessionStatistics, TradeExecutor};
pub use models::*;
pub use risk::{ProfitabilityFilter, RiskSizer};
pub use strategy::{AlternatingPicker, DirectionPicker};

// Error handling
pub use error::{Result, TradeError};
