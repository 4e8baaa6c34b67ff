use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::{Result, TradeError};

const DEFAULT_CONFIG_PATH: &str = "config/scalpbot";
const ENV_PREFIX: &str = "SCALPBOT";

/// Operating mode. `Relaxed` bypasses the profitability, volatility and
/// reward:risk gates; the position limit and sizing still apply.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TradingMode {
    #[default]
    Production,
    Relaxed,
}

impl TradingMode {
    pub fn is_relaxed(self) -> bool {
        self == TradingMode::Relaxed
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub mode: TradingMode,
    #[serde(default)]
    pub trading: TradingSettings,
    #[serde(default)]
    pub risk: RiskSettings,
    #[serde(default)]
    pub profitability: ProfitabilitySettings,
    #[serde(default)]
    pub volatility: VolatilitySettings,
    #[serde(default)]
    pub schedule: ScheduleSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TradingSettings {
    /// Symbols grouped by asset class
    pub symbols: BTreeMap<String, Vec<String>>,
    pub timeframe: String,
    pub candle_count: usize,
    pub max_open_positions: usize,
    /// Starting balance for the paper broker
    pub initial_balance: f64,
}

impl Default for TradingSettings {
    fn default() -> Self {
        let mut symbols = BTreeMap::new();
        symbols.insert(
            "forex".to_string(),
            vec!["EURUSD".to_string(), "GBPUSD".to_string(), "USDJPY".to_string()],
        );
        symbols.insert("metals".to_string(), vec!["XAUUSD".to_string()]);

        Self {
            symbols,
            timeframe: "5m".to_string(),
            candle_count: 100,
            max_open_positions: 5,
            initial_balance: 10_000.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskSettings {
    pub risk_percent_per_trade: f64,
    pub stop_loss_atr_multiplier: f64,
    pub take_profit_target_percent: f64,
    pub min_reward_risk_ratio: f64,
    pub min_lots: f64,
    pub max_lots: f64,
    /// Scalar applied to price delta x volume when realizing profit
    pub profit_multiplier: f64,
}

impl Default for RiskSettings {
    fn default() -> Self {
        Self {
            risk_percent_per_trade: 2.0,
            stop_loss_atr_multiplier: 1.5,
            take_profit_target_percent: 1.0,
            min_reward_risk_ratio: 1.0,
            min_lots: 0.01,
            max_lots: 10.0,
            profit_multiplier: 100.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfitabilitySettings {
    pub enabled: bool,
    pub min_win_rate: f64,
    pub max_consecutive_losses: u32,
    pub min_24h_profit_percent: f64,
    pub stats_window_hours: i64,
}

impl Default for ProfitabilitySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            min_win_rate: 50.0,
            max_consecutive_losses: 3,
            min_24h_profit_percent: 0.0,
            stats_window_hours: 24,
        }
    }
}

impl ProfitabilitySettings {
    pub fn stats_window(&self) -> chrono::Duration {
        chrono::Duration::hours(self.stats_window_hours)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VolatilitySettings {
    /// ATR% below which LOW volatility is rejected
    pub entry_threshold: f64,
}

impl Default for VolatilitySettings {
    fn default() -> Self {
        Self {
            entry_threshold: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleSettings {
    pub scan_interval_secs: u64,
    pub stats_interval_secs: u64,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            scan_interval_secs: 5,
            stats_interval_secs: 300,
        }
    }
}

impl ScheduleSettings {
    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs)
    }
}

impl Settings {
    /// Load settings once at startup.
    ///
    /// Layers, later wins:
    /// 1. Built-in defaults
    /// 2. Optional config file (`config/scalpbot.{toml,yaml,json}` unless `path` is given)
    /// 3. Environment variables, e.g. `SCALPBOT_RISK__RISK_PERCENT_PER_TRADE=1.5`
    pub fn load(path: Option<&str>) -> Result<Self> {
        let file = match path {
            Some(p) => File::with_name(p).required(true),
            None => File::with_name(DEFAULT_CONFIG_PATH).required(false),
        };

        let settings: Settings = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    /// All configured symbols, asset classes flattened in key order
    pub fn all_symbols(&self) -> Vec<String> {
        self.trading.symbols.values().flatten().cloned().collect()
    }

    pub fn validate(&self) -> Result<()> {
        let risk = &self.risk;

        if !(risk.risk_percent_per_trade > 0.0 && risk.risk_percent_per_trade <= 100.0) {
            return Err(invalid(format!(
                "risk.risk_percent_per_trade must be in (0, 100], got {}",
                risk.risk_percent_per_trade
            )));
        }
        if !(risk.stop_loss_atr_multiplier > 0.0) || !risk.stop_loss_atr_multiplier.is_finite() {
            return Err(invalid("risk.stop_loss_atr_multiplier must be positive"));
        }
        if !(risk.take_profit_target_percent > 0.0) || !risk.take_profit_target_percent.is_finite() {
            return Err(invalid("risk.take_profit_target_percent must be positive"));
        }
        if !(risk.min_reward_risk_ratio >= 0.0) || !risk.min_reward_risk_ratio.is_finite() {
            return Err(invalid("risk.min_reward_risk_ratio must not be negative"));
        }
        if !(risk.min_lots > 0.0) || !risk.max_lots.is_finite() || risk.min_lots > risk.max_lots {
            return Err(invalid(format!(
                "risk lot bounds invalid: min {} max {}",
                risk.min_lots, risk.max_lots
            )));
        }
        if !(risk.profit_multiplier > 0.0) || !risk.profit_multiplier.is_finite() {
            return Err(invalid("risk.profit_multiplier must be positive"));
        }

        if self.trading.max_open_positions == 0 {
            return Err(invalid("trading.max_open_positions must be at least 1"));
        }
        if self.trading.candle_count == 0 {
            return Err(invalid("trading.candle_count must be at least 1"));
        }
        if self.all_symbols().is_empty() {
            return Err(invalid("trading.symbols is empty"));
        }

        let profitability = &self.profitability;
        if !(0.0..=100.0).contains(&profitability.min_win_rate) {
            return Err(invalid("profitability.min_win_rate must be in [0, 100]"));
        }
        if !(profitability.min_24h_profit_percent >= 0.0) || !profitability.min_24h_profit_percent.is_finite() {
            return Err(invalid("profitability.min_24h_profit_percent must not be negative"));
        }
        if profitability.stats_window_hours <= 0 {
            return Err(invalid("profitability.stats_window_hours must be positive"));
        }

        let threshold = self.volatility.entry_threshold;
        if !(threshold >= 0.0) || !threshold.is_finite() {
            return Err(invalid(format!(
                "volatility.entry_threshold must be finite and not negative, got {}",
                threshold
            )));
        }

        if self.schedule.scan_interval_secs == 0 || self.schedule.stats_interval_secs == 0 {
            return Err(invalid("schedule intervals must be non-zero"));
        }

        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> TradeError {
    TradeError::InvalidConfig(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();

        assert!(settings.validate().is_ok());
        assert_eq!(settings.mode, TradingMode::Production);
        assert_eq!(settings.risk.risk_percent_per_trade, 2.0);
        assert_eq!(settings.trading.max_open_positions, 5);
        assert_eq!(settings.profitability.max_consecutive_losses, 3);
    }

    #[test]
    fn test_all_symbols_flattens_classes() {
        let settings = Settings::default();
        let symbols = settings.all_symbols();

        assert_eq!(symbols.len(), 4);
        assert!(symbols.contains(&"XAUUSD".to_string()));
        assert!(symbols.contains(&"EURUSD".to_string()));
    }

    #[test]
    fn test_rejects_bad_risk_percent() {
        let mut settings = Settings::default();
        settings.risk.risk_percent_per_trade = 0.0;

        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("risk_percent_per_trade"));
    }

    #[test]
    fn test_rejects_inverted_lot_bounds() {
        let mut settings = Settings::default();
        settings.risk.min_lots = 20.0;

        assert!(matches!(
            settings.validate(),
            Err(TradeError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_rejects_non_finite_floats() {
        let mut settings = Settings::default();
        settings.risk.max_lots = f64::NAN;
        assert!(settings.validate().unwrap_err().to_string().contains("lot bounds"));

        let mut settings = Settings::default();
        settings.risk.max_lots = f64::INFINITY;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.volatility.entry_threshold = f64::NAN;
        assert!(settings.validate().unwrap_err().to_string().contains("entry_threshold"));

        let mut settings = Settings::default();
        settings.risk.min_reward_risk_ratio = f64::NAN;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_position_limit() {
        let mut settings = Settings::default();
        settings.trading.max_open_positions = 0;

        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_rejects_empty_symbols() {
        let mut settings = Settings::default();
        settings.trading.symbols.clear();

        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_relaxed_mode_switch() {
        assert!(TradingMode::Relaxed.is_relaxed());
        assert!(!TradingMode::Production.is_relaxed());
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let settings = Settings::load(None).unwrap();
        assert_eq!(settings.trading.timeframe, "5m");
    }
}
