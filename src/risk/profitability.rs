use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

use crate::config::{ProfitabilitySettings, TradingMode};
use crate::execution::position_manager::{PositionManager, SessionStatistics};

/// Which rule produced a blocking verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProfitabilityRule {
    WinRate,
    ConsecutiveLosses,
    NegativeProfit,
    /// Statistics could not be read or were not finite
    InternalFault,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilterVerdict {
    pub allow: bool,
    pub reason: String,
    pub rule: Option<ProfitabilityRule>,
}

impl FilterVerdict {
    fn allow(reason: impl Into<String>) -> Self {
        Self {
            allow: true,
            reason: reason.into(),
            rule: None,
        }
    }

    fn block(rule: ProfitabilityRule, reason: impl Into<String>) -> Self {
        Self {
            allow: false,
            reason: reason.into(),
            rule: Some(rule),
        }
    }
}

/// Global trade/no-trade gate over rolling session statistics.
///
/// Fails closed: a poisoned ledger or a non-finite statistic blocks trading.
pub struct ProfitabilityFilter {
    settings: ProfitabilitySettings,
    mode: TradingMode,
    ledger: Arc<Mutex<PositionManager>>,
}

impl ProfitabilityFilter {
    pub fn new(
        settings: ProfitabilitySettings,
        mode: TradingMode,
        ledger: Arc<Mutex<PositionManager>>,
    ) -> Self {
        Self {
            settings,
            mode,
            ledger,
        }
    }

    pub fn allow_trading(&self, balance: f64) -> FilterVerdict {
        if self.mode.is_relaxed() {
            return FilterVerdict::allow("Relaxed mode - trading enabled");
        }
        if !self.settings.enabled {
            return FilterVerdict::allow("Profitability checks disabled");
        }

        let (stats, consecutive) = match self.ledger.lock() {
            Ok(ledger) => (
                ledger.rolling_stats_at(chrono::Utc::now(), self.settings.stats_window()),
                ledger.consecutive_losses(),
            ),
            Err(_) => {
                tracing::error!("Profitability check could not read the ledger");
                return FilterVerdict::block(
                    ProfitabilityRule::InternalFault,
                    "Profitability check error: ledger unavailable",
                );
            }
        };

        let verdict = self.evaluate(&stats, consecutive, balance);
        if !verdict.allow {
            tracing::warn!(rule = ?verdict.rule, "Trading blocked: {}", verdict.reason);
        }
        verdict
    }

    /// Apply the rules in order; the first failing rule wins
    pub fn evaluate(&self, stats: &SessionStatistics, consecutive_losses: u32, balance: f64) -> FilterVerdict {
        if stats.trade_count == 0 {
            return FilterVerdict::allow("No trades in window - trading enabled");
        }

        if !stats.win_rate_percent.is_finite() || !stats.total_profit.is_finite() {
            return FilterVerdict::block(
                ProfitabilityRule::InternalFault,
                format!(
                    "Profitability check error: non-finite statistics (win rate {}, profit {})",
                    stats.win_rate_percent, stats.total_profit
                ),
            );
        }

        if stats.win_rate_percent < self.settings.min_win_rate {
            return FilterVerdict::block(
                ProfitabilityRule::WinRate,
                format!(
                    "Win rate {:.1}% below minimum {}%",
                    stats.win_rate_percent, self.settings.min_win_rate
                ),
            );
        }

        if consecutive_losses >= self.settings.max_consecutive_losses {
            return FilterVerdict::block(
                ProfitabilityRule::ConsecutiveLosses,
                format!("Max consecutive losses ({}) reached", consecutive_losses),
            );
        }

        if stats.total_profit < 0.0 && self.settings.min_24h_profit_percent > 0.0 {
            return FilterVerdict::block(
                ProfitabilityRule::NegativeProfit,
                format!(
                    "24h profit ${:.2} is negative (requires {}% of balance, ${:.2})",
                    stats.total_profit,
                    self.settings.min_24h_profit_percent,
                    balance * self.settings.min_24h_profit_percent / 100.0
                ),
            );
        }

        FilterVerdict::allow(format!(
            "Profitability OK (win rate {:.1}%, profit ${:.2})",
            stats.win_rate_percent, stats.total_profit
        ))
    }
}
