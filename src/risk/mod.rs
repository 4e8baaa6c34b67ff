// Risk management module
pub mod profitability;
pub mod sizing;

pub use profitability::{FilterVerdict, ProfitabilityFilter, ProfitabilityRule};
pub use sizing::{pip_value, reward_risk_ratio, RiskSizer};
