// Technical indicators module
// ATR and Bollinger width feed the volatility analysis

pub mod atr;
pub mod bollinger;
pub mod moving_average;

pub use atr::{atr_percent, calculate_atr, true_ranges};
pub use bollinger::bollinger_width;
pub use moving_average::{calculate_sma, population_std_dev};
