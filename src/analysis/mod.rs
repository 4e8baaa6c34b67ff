// Market analysis module
pub mod volatility;

pub use volatility::{EntryVerdict, VolatilityAnalyzer, VolatilityLevel, VolatilityMetrics};
