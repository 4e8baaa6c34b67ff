use crate::config::RiskSettings;
use crate::error::{Result, TradeError};
use crate::indicators::calculate_atr;
use crate::models::{Candle, Direction};

pub const STOP_LOSS_ATR_PERIOD: usize = 14;

const GOLD_SYMBOLS: &[&str] = &["GOLD", "XAUUSD"];
const GOLD_PIP_VALUE: f64 = 0.01;
const FOREX_PIP_VALUE: f64 = 0.0001;

/// Pip value by symbol name.
///
/// Substring heuristic: gold-class symbols use 0.01, everything else 0.0001.
/// Real contract sizes and pip definitions per instrument are not modelled.
pub fn pip_value(symbol: &str) -> f64 {
    let upper = symbol.to_uppercase();
    if GOLD_SYMBOLS.iter().any(|g| upper.contains(g)) {
        GOLD_PIP_VALUE
    } else {
        FOREX_PIP_VALUE
    }
}

/// Reward divided by risk, both oriented by direction
///
/// 0.0 when the stop distance is zero or the reward is not positive.
pub fn reward_risk_ratio(entry: f64, stop_loss: f64, take_profit: f64, direction: Direction) -> f64 {
    let risk = (entry - stop_loss) * direction.sign();
    let reward = (take_profit - entry) * direction.sign();

    if risk == 0.0 || reward <= 0.0 {
        return 0.0;
    }

    reward / risk
}

/// Computes position size, stop-loss and take-profit from balance and volatility
#[derive(Debug, Clone)]
pub struct RiskSizer {
    settings: RiskSettings,
}

impl RiskSizer {
    pub fn new(settings: RiskSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &RiskSettings {
        &self.settings
    }

    /// Lots to trade so that hitting the stop loses `risk_percent_per_trade` of `balance`
    ///
    /// Returns 0.0 when no valid stop distance or no positive risk budget exists;
    /// callers must treat that as "cannot size". Otherwise clamped to
    /// `[min_lots, max_lots]` and rounded to the 0.01 lot step.
    pub fn size_position(&self, symbol: &str, balance: f64, entry_price: f64, stop_loss: f64) -> f64 {
        let risk_amount = balance * self.settings.risk_percent_per_trade / 100.0;
        let distance = (entry_price - stop_loss).abs();

        if distance == 0.0 || !distance.is_finite() {
            return 0.0;
        }
        if !(risk_amount > 0.0) || !risk_amount.is_finite() {
            return 0.0;
        }

        let raw = risk_amount / (distance * pip_value(symbol));
        let lots = raw.clamp(self.settings.min_lots, self.settings.max_lots);
        let lots = (lots * 100.0).round() / 100.0;

        tracing::debug!(
            symbol = %symbol,
            lots,
            raw_lots = raw,
            risk_amount,
            distance,
            "Position sized"
        );

        lots
    }

    /// Stop-loss at ATR x multiplier away from entry (below for buys, above for sells)
    ///
    /// Falls back to `entry_price` itself when the stop cannot be computed. That
    /// zero-distance stop means "cannot trade" and must never be sized against.
    pub fn compute_stop_loss(
        &self,
        symbol: &str,
        entry_price: f64,
        candles: &[Candle],
        direction: Direction,
    ) -> f64 {
        match self.stop_loss_price(entry_price, candles, direction) {
            Ok(stop) => {
                tracing::debug!(symbol = %symbol, stop_loss = stop, "Stop loss computed");
                stop
            }
            Err(e) => {
                tracing::warn!(symbol = %symbol, "Stop loss falls back to entry price: {}", e);
                entry_price
            }
        }
    }

    fn stop_loss_price(&self, entry_price: f64, candles: &[Candle], direction: Direction) -> Result<f64> {
        let atr = calculate_atr(candles, STOP_LOSS_ATR_PERIOD).ok_or_else(|| {
            TradeError::ComputationDegraded(format!(
                "ATR({}) needs {} candles, got {}",
                STOP_LOSS_ATR_PERIOD,
                STOP_LOSS_ATR_PERIOD + 1,
                candles.len()
            ))
        })?;

        let stop = entry_price - direction.sign() * atr * self.settings.stop_loss_atr_multiplier;

        if !stop.is_finite() || stop <= 0.0 {
            return Err(TradeError::ComputationDegraded(format!(
                "nonsensical stop {} for entry {}",
                stop, entry_price
            )));
        }

        Ok(stop)
    }

    /// Take-profit at `take_profit_target_percent` of entry (above for buys, below for sells)
    pub fn compute_take_profit(&self, symbol: &str, entry_price: f64, direction: Direction) -> f64 {
        let target = entry_price * self.settings.take_profit_target_percent / 100.0;
        let take_profit = entry_price + direction.sign() * target;

        tracing::debug!(symbol = %symbol, take_profit, "Take profit computed");
        take_profit
    }

    /// Realized profit: direction-correct price delta x volume x profit multiplier
    pub fn realized_profit(&self, direction: Direction, entry_price: f64, exit_price: f64, volume: f64) -> f64 {
        (exit_price - entry_price) * direction.sign() * volume * self.settings.profit_multiplier
    }
}
