// Direction selection module
use crate::models::Direction;

/// Chooses the direction of the next open attempt for a symbol
///
/// Entry gating (volatility, profitability, reward:risk) happens downstream;
/// a picker only answers "which side, if any".
pub trait DirectionPicker: Send + Sync {
    /// `None` skips the symbol this cycle
    fn pick(&self, symbol: &str, cycle: u64) -> Option<Direction>;

    fn name(&self) -> &str;
}

/// BUY on even cycles, SELL on odd cycles
#[derive(Debug, Clone, Copy, Default)]
pub struct AlternatingPicker;

impl DirectionPicker for AlternatingPicker {
    fn pick(&self, _symbol: &str, cycle: u64) -> Option<Direction> {
        if cycle % 2 == 0 {
            Some(Direction::Buy)
        } else {
            Some(Direction::Sell)
        }
    }

    fn name(&self) -> &str {
        "alternating"
    }
}

/// Always the same side
#[derive(Debug, Clone, Copy)]
pub struct FixedPicker(pub Direction);

impl DirectionPicker for FixedPicker {
    fn pick(&self, _symbol: &str, _cycle: u64) -> Option<Direction> {
        Some(self.0)
    }

    fn name(&self) -> &str {
        "fixed"
    }
}
