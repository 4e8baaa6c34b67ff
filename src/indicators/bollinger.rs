use crate::indicators::moving_average::{calculate_sma, population_std_dev};
use crate::models::Candle;

/// Distance between the upper and lower Bollinger bands over the last `period` closes
///
/// Equals `2 * k * stddev` with a population standard deviation. Returns None when
/// the window is shorter than `period`.
pub fn bollinger_width(candles: &[Candle], period: usize, k: f64) -> Option<f64> {
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();

    let mean = calculate_sma(&closes, period)?;
    let std_dev = population_std_dev(&closes, period)?;

    let upper = mean + k * std_dev;
    let lower = mean - k * std_dev;
    Some(upper - lower)
}
