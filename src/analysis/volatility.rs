use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::TradingMode;
use crate::indicators::{atr_percent, bollinger_width, calculate_atr};
use crate::models::Candle;

/// Minimum window length for a meaningful analysis
pub const MIN_CANDLES: usize = 20;
pub const ATR_PERIOD: usize = 14;
pub const BOLLINGER_PERIOD: usize = 20;
pub const BOLLINGER_K: f64 = 2.0;

/// Each trend sub-window spans this many candles; the trend needs two of them
const TREND_WINDOW: usize = 20;
const TREND_ATR_PERIOD: usize = 10;
/// |trend| above this percentage marks volatility as trending
const TRENDING_THRESHOLD: f64 = 10.0;

/// Volatility bucket derived from ATR%
///
/// Fixed half-open intervals, lower bound inclusive:
/// `[0, 0.2)` VeryLow, `[0.2, 0.5)` Low, `[0.5, 1.5)` Normal, `[1.5, 3.0)` High, `>= 3.0` Extreme.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VolatilityLevel {
    VeryLow,
    Low,
    Normal,
    High,
    Extreme,
    Unknown,
}

impl VolatilityLevel {
    pub fn classify(atr_percent: f64) -> Self {
        if atr_percent.is_nan() {
            VolatilityLevel::Unknown
        } else if atr_percent < 0.2 {
            VolatilityLevel::VeryLow
        } else if atr_percent < 0.5 {
            VolatilityLevel::Low
        } else if atr_percent < 1.5 {
            VolatilityLevel::Normal
        } else if atr_percent < 3.0 {
            VolatilityLevel::High
        } else {
            VolatilityLevel::Extreme
        }
    }
}

impl fmt::Display for VolatilityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VolatilityLevel::VeryLow => "VERY_LOW",
            VolatilityLevel::Low => "LOW",
            VolatilityLevel::Normal => "NORMAL",
            VolatilityLevel::High => "HIGH",
            VolatilityLevel::Extreme => "EXTREME",
            VolatilityLevel::Unknown => "UNKNOWN",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VolatilityMetrics {
    pub symbol: String,
    pub atr: f64,
    pub atr_percent: f64,
    pub bollinger_width: f64,
    pub volatility_level: VolatilityLevel,
    /// Percent change of ATR% between the two most recent 20-candle windows
    pub volatility_trend: f64,
    pub is_trending: bool,
}

impl VolatilityMetrics {
    /// Sentinel returned for windows too short to analyze
    pub fn unknown(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            atr: 0.0,
            atr_percent: 0.0,
            bollinger_width: 0.0,
            volatility_level: VolatilityLevel::Unknown,
            volatility_trend: 0.0,
            is_trending: false,
        }
    }
}

/// Outcome of the entry-suitability check
#[derive(Debug, Clone, PartialEq)]
pub struct EntryVerdict {
    pub enter: bool,
    pub reason: String,
}

impl EntryVerdict {
    fn enter(reason: impl Into<String>) -> Self {
        Self {
            enter: true,
            reason: reason.into(),
        }
    }

    fn reject(reason: impl Into<String>) -> Self {
        Self {
            enter: false,
            reason: reason.into(),
        }
    }
}

/// Turns a candle window into volatility metrics and an entry verdict
#[derive(Debug, Clone)]
pub struct VolatilityAnalyzer {
    mode: TradingMode,
    entry_threshold: f64,
}

impl VolatilityAnalyzer {
    pub fn new(mode: TradingMode, entry_threshold: f64) -> Self {
        Self {
            mode,
            entry_threshold,
        }
    }

    /// Pure function of the window. Windows shorter than [`MIN_CANDLES`] yield
    /// [`VolatilityMetrics::unknown`].
    pub fn analyze(&self, symbol: &str, candles: &[Candle]) -> VolatilityMetrics {
        if candles.len() < MIN_CANDLES {
            tracing::debug!(
                symbol = %symbol,
                candles = candles.len(),
                "Insufficient data for volatility analysis"
            );
            return VolatilityMetrics::unknown(symbol);
        }

        // Fewer than ATR_PERIOD true ranges degrades ATR to 0.0
        let atr = calculate_atr(candles, ATR_PERIOD).unwrap_or(0.0);
        let atr_pct = atr_percent(candles, atr);
        let width = bollinger_width(candles, BOLLINGER_PERIOD, BOLLINGER_K).unwrap_or(0.0);
        let trend = volatility_trend(candles);

        let metrics = VolatilityMetrics {
            symbol: symbol.to_string(),
            atr,
            atr_percent: atr_pct,
            bollinger_width: width,
            volatility_level: VolatilityLevel::classify(atr_pct),
            volatility_trend: trend,
            is_trending: trend.abs() > TRENDING_THRESHOLD,
        };

        tracing::debug!(
            symbol = %symbol,
            atr = metrics.atr,
            atr_percent = metrics.atr_percent,
            level = %metrics.volatility_level,
            trend = metrics.volatility_trend,
            "Volatility analyzed"
        );

        metrics
    }

    pub fn should_enter(&self, metrics: &VolatilityMetrics) -> EntryVerdict {
        if self.mode.is_relaxed() {
            return EntryVerdict::enter("Relaxed mode - entry allowed");
        }

        let level = metrics.volatility_level;
        let atr_pct = metrics.atr_percent;

        match level {
            VolatilityLevel::Extreme => {
                return EntryVerdict::reject(
                    "Volatility too high (extreme) - risk of excessive slippage",
                )
            }
            VolatilityLevel::VeryLow => {
                return EntryVerdict::reject(
                    "Volatility too low - insufficient movement for scalping",
                )
            }
            _ => {}
        }

        if matches!(level, VolatilityLevel::Low | VolatilityLevel::VeryLow)
            && atr_pct < self.entry_threshold
        {
            return EntryVerdict::reject(format!(
                "ATR% ({:.2}%) below threshold ({}%)",
                atr_pct, self.entry_threshold
            ));
        }

        EntryVerdict::enter(format!(
            "Volatility suitable (Level: {}, ATR%: {:.2}%)",
            level, atr_pct
        ))
    }
}

/// Percent change of ATR% between the most recent 20 candles and the 20 before
///
/// 0.0 with fewer than 40 candles or a flat older window.
fn volatility_trend(candles: &[Candle]) -> f64 {
    if candles.len() < 2 * TREND_WINDOW {
        return 0.0;
    }

    let len = candles.len();
    let recent = &candles[len - TREND_WINDOW..];
    let older = &candles[len - 2 * TREND_WINDOW..len - TREND_WINDOW];

    let window_atr_percent = |window: &[Candle]| {
        let atr = calculate_atr(window, TREND_ATR_PERIOD).unwrap_or(0.0);
        atr_percent(window, atr)
    };

    let recent_vol = window_atr_percent(recent);
    let older_vol = window_atr_percent(older);

    if older_vol == 0.0 {
        return 0.0;
    }

    (recent_vol - older_vol) / older_vol * 100.0
}
