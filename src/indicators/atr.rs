/// Average True Range (ATR) indicator
///
/// Measures market volatility by averaging true ranges over a period.
/// True Range is the greatest of:
/// - Current High - Current Low
/// - Abs(Current High - Previous Close)
/// - Abs(Current Low - Previous Close)
///
/// The average is a plain mean of the last `period` true ranges (no Wilder smoothing).

use crate::models::Candle;

/// True range for every candle after the first
pub fn true_ranges(candles: &[Candle]) -> Vec<f64> {
    candles
        .windows(2)
        .map(|pair| {
            let high = pair[1].high;
            let low = pair[1].low;
            let prev_close = pair[0].close;

            (high - low)
                .max((high - prev_close).abs())
                .max((low - prev_close).abs())
        })
        .collect()
}

/// Calculate ATR for the given candles
///
/// Returns None when fewer than `period` true ranges exist. Callers that need a
/// number treat that as 0.0.
pub fn calculate_atr(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 {
        return None;
    }

    let true_ranges = true_ranges(candles);
    if true_ranges.len() < period {
        return None;
    }

    let sum: f64 = true_ranges.iter().rev().take(period).sum();
    Some(sum / period as f64)
}

/// ATR as a percentage of the last close
///
/// 0.0 when the ATR is zero or the window is empty.
pub fn atr_percent(candles: &[Candle], atr: f64) -> f64 {
    match candles.last() {
        Some(last) if atr != 0.0 && last.close != 0.0 => atr / last.close * 100.0,
        _ => 0.0,
    }
}
