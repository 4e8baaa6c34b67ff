use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::{Result, TradeError};
use crate::models::{Direction, Ticket};

/// Trailing trades scanned when counting consecutive losses
pub const CONSECUTIVE_LOSS_SCAN: usize = 10;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ExitReason {
    TakeProfit,
    StopLoss,
    /// Closed outside the TP/SL monitor (shutdown, manual)
    External,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::TakeProfit => write!(f, "TAKE_PROFIT"),
            ExitReason::StopLoss => write!(f, "STOP_LOSS"),
            ExitReason::External => write!(f, "EXTERNAL"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub ticket: Ticket,
    pub symbol: String,
    pub direction: Direction,
    pub volume: f64,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub open_time: DateTime<Utc>,
}

impl Position {
    /// TP/SL hit at `price`, checked with direction-correct comparisons
    pub fn exit_signal(&self, price: f64) -> Option<ExitReason> {
        let (tp_hit, sl_hit) = match self.direction {
            Direction::Buy => (price >= self.take_profit, price <= self.stop_loss),
            Direction::Sell => (price <= self.take_profit, price >= self.stop_loss),
        };

        if tp_hit {
            Some(ExitReason::TakeProfit)
        } else if sl_hit {
            Some(ExitReason::StopLoss)
        } else {
            None
        }
    }
}

/// A position moved out of the open ledger, with its close metadata
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClosedPosition {
    pub position: Position,
    pub close_price: f64,
    pub realized_profit: f64,
    pub close_time: DateTime<Utc>,
    pub exit_reason: ExitReason,
}

impl ClosedPosition {
    /// Zero profit counts as a loss
    pub fn is_win(&self) -> bool {
        self.realized_profit > 0.0
    }
}

/// Statistics over closed trades in a trailing window. Derived, never stored.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SessionStatistics {
    pub trade_count: usize,
    pub win_count: usize,
    pub loss_count: usize,
    pub win_rate_percent: f64,
    pub total_profit: f64,
    pub average_profit_per_trade: f64,
}

impl SessionStatistics {
    pub fn from_trades<'a>(trades: impl IntoIterator<Item = &'a ClosedPosition>) -> Self {
        let mut stats = SessionStatistics::default();

        for trade in trades {
            stats.trade_count += 1;
            stats.total_profit += trade.realized_profit;
            if trade.is_win() {
                stats.win_count += 1;
            } else {
                stats.loss_count += 1;
            }
        }

        if stats.trade_count > 0 {
            let count = stats.trade_count as f64;
            stats.win_rate_percent = stats.win_count as f64 / count * 100.0;
            stats.average_profit_per_trade = stats.total_profit / count;
        }

        stats
    }
}

impl fmt::Display for SessionStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "24h Stats - Trades: {}, Wins: {}, Losses: {}, Win Rate: {:.1}%, \
             Total Profit: ${:.2}, Avg Profit per Trade: ${:.2}",
            self.trade_count,
            self.win_count,
            self.loss_count,
            self.win_rate_percent,
            self.total_profit,
            self.average_profit_per_trade
        )
    }
}

/// An open-position slot claimed while the ledger was locked.
///
/// The slot is held until the guard is dropped or handed to
/// [`PositionManager::track_reserved`], so a cancelled open attempt
/// returns its slot.
#[must_use = "a reservation holds a position slot until tracked or dropped"]
#[derive(Debug)]
pub struct SlotReservation {
    pending: Arc<AtomicUsize>,
}

impl SlotReservation {
    /// Give the slot back
    pub fn release(self) {}
}

impl Drop for SlotReservation {
    fn drop(&mut self) {
        self.pending.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Sole owner of open positions and closed history
///
/// A ticket lives in exactly one of the open ledger or the closed history.
pub struct PositionManager {
    open: BTreeMap<Ticket, Position>,
    closed: Vec<ClosedPosition>,
    max_open_positions: usize,
    pending: Arc<AtomicUsize>,
    stats_window: Duration,
}

impl PositionManager {
    pub fn new(max_open_positions: usize, stats_window: Duration) -> Self {
        Self {
            open: BTreeMap::new(),
            closed: Vec::new(),
            max_open_positions,
            pending: Arc::new(AtomicUsize::new(0)),
            stats_window,
        }
    }

    /// Insert an open position. Duplicate tickets are rejected.
    pub fn track(&mut self, position: Position) -> Result<()> {
        let ticket = position.ticket;
        if self.contains(ticket) {
            tracing::warn!(ticket = %ticket, "Refusing to track duplicate ticket");
            return Err(TradeError::duplicate_ticket(ticket));
        }

        tracing::info!(
            ticket = %ticket,
            symbol = %position.symbol,
            direction = %position.direction,
            volume = position.volume,
            "Position tracked"
        );
        self.open.insert(ticket, position);
        Ok(())
    }

    /// Track a position against a slot claimed by [`reserve_slot`](Self::reserve_slot).
    /// The slot is returned whether or not tracking succeeds.
    pub fn track_reserved(&mut self, reservation: SlotReservation, position: Position) -> Result<()> {
        let tracked = self.track(position);
        drop(reservation);
        tracked
    }

    /// Claim a slot if open + pending positions are below the maximum
    pub fn reserve_slot(&mut self) -> Option<SlotReservation> {
        if !self.can_open_another() {
            return None;
        }
        self.pending.fetch_add(1, Ordering::SeqCst);
        Some(SlotReservation {
            pending: Arc::clone(&self.pending),
        })
    }

    /// Slots claimed but not yet tracked or dropped
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Move an open position into the closed history
    pub fn untrack(
        &mut self,
        ticket: Ticket,
        close_price: f64,
        realized_profit: f64,
        exit_reason: ExitReason,
    ) -> Result<&ClosedPosition> {
        self.untrack_at(ticket, close_price, realized_profit, exit_reason, None)
    }

    /// Move an open position into the closed history with explicit close time.
    /// Unknown tickets leave the ledger untouched.
    pub fn untrack_at(
        &mut self,
        ticket: Ticket,
        close_price: f64,
        realized_profit: f64,
        exit_reason: ExitReason,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<&ClosedPosition> {
        let Some(position) = self.open.remove(&ticket) else {
            tracing::warn!(ticket = %ticket, "Untrack requested for unknown ticket");
            return Err(TradeError::unknown_ticket(ticket));
        };

        let pips = (close_price - position.entry_price).abs();
        tracing::info!(
            ticket = %ticket,
            symbol = %position.symbol,
            reason = %exit_reason,
            "Position closed: profit ${:.2} ({:.5} price units)",
            realized_profit,
            pips
        );

        self.closed.push(ClosedPosition {
            position,
            close_price,
            realized_profit,
            close_time: timestamp.unwrap_or_else(Utc::now),
            exit_reason,
        });

        // Just pushed
        Ok(&self.closed[self.closed.len() - 1])
    }

    pub fn contains(&self, ticket: Ticket) -> bool {
        self.open.contains_key(&ticket) || self.closed.iter().any(|c| c.position.ticket == ticket)
    }

    pub fn is_open(&self, ticket: Ticket) -> bool {
        self.open.contains_key(&ticket)
    }

    pub fn get_open(&self, ticket: Ticket) -> Option<&Position> {
        self.open.get(&ticket)
    }

    /// Open positions ordered by ticket
    pub fn open_positions(&self) -> Vec<&Position> {
        self.open.values().collect()
    }

    /// Closed trades, oldest close first
    pub fn closed_history(&self) -> &[ClosedPosition] {
        &self.closed
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    /// Sum of open volumes
    pub fn total_exposure(&self) -> f64 {
        self.open.values().map(|p| p.volume).sum()
    }

    pub fn max_open_positions(&self) -> usize {
        self.max_open_positions
    }

    pub fn can_open_another(&self) -> bool {
        self.open.len() + self.pending_count() < self.max_open_positions
    }

    /// Statistics over trades closed within the configured window
    pub fn rolling_stats(&self) -> SessionStatistics {
        self.rolling_stats_at(Utc::now(), self.stats_window)
    }

    /// Statistics over trades with `close_time >= now - window`
    pub fn rolling_stats_at(&self, now: DateTime<Utc>, window: Duration) -> SessionStatistics {
        let cutoff = now - window;
        SessionStatistics::from_trades(self.closed.iter().filter(|c| c.close_time >= cutoff))
    }

    /// Trailing losses in reverse chronological order, stopping at the first win
    /// or after [`CONSECUTIVE_LOSS_SCAN`] trades
    pub fn consecutive_losses(&self) -> u32 {
        let mut count = 0;
        for trade in self.closed.iter().rev().take(CONSECUTIVE_LOSS_SCAN) {
            if trade.is_win() {
                break;
            }
            count += 1;
        }
        count
    }

    /// Drop closed trades older than the statistics window. Returns how many were removed.
    pub fn prune_history(&mut self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.stats_window;
        let before = self.closed.len();
        self.closed.retain(|c| c.close_time >= cutoff);
        before - self.closed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pm() -> PositionManager {
        PositionManager::new(3, Duration::hours(24))
    }

    fn position(ticket: u64, symbol: &str, volume: f64) -> Position {
        Position {
            ticket: Ticket(ticket),
            symbol: symbol.to_string(),
            direction: Direction::Buy,
            volume,
            entry_price: 1.0850,
            stop_loss: 1.0800,
            take_profit: 1.0950,
            open_time: Utc::now(),
        }
    }

    fn close_with_profit(pm: &mut PositionManager, ticket: u64, profit: f64, at: DateTime<Utc>) {
        pm.track(position(ticket, "EURUSD", 0.1)).unwrap();
        pm.untrack_at(Ticket(ticket), 1.0860, profit, ExitReason::External, Some(at))
            .unwrap();
    }

    #[test]
    fn test_track_position() {
        let mut pm = pm();
        pm.track(position(1, "EURUSD", 0.5)).unwrap();

        assert!(pm.is_open(Ticket(1)));
        assert_eq!(pm.open_count(), 1);
        assert_eq!(pm.get_open(Ticket(1)).unwrap().symbol, "EURUSD");
    }

    #[test]
    fn test_duplicate_ticket_rejected() {
        let mut pm = pm();
        pm.track(position(1, "EURUSD", 0.5)).unwrap();

        let result = pm.track(position(1, "GBPUSD", 2.0));
        assert!(matches!(result, Err(TradeError::LedgerInconsistency(_))));

        // First entry untouched
        assert_eq!(pm.get_open(Ticket(1)).unwrap().symbol, "EURUSD");
        assert_eq!(pm.open_count(), 1);
    }

    #[test]
    fn test_closed_ticket_cannot_be_reused() {
        let mut pm = pm();
        close_with_profit(&mut pm, 1, 5.0, Utc::now());

        assert!(pm.track(position(1, "EURUSD", 0.5)).is_err());
    }

    #[test]
    fn test_untrack_moves_to_history() {
        let mut pm = pm();
        pm.track(position(7, "EURUSD", 0.5)).unwrap();

        let closed = pm
            .untrack(Ticket(7), 1.0950, 50.0, ExitReason::TakeProfit)
            .unwrap();
        assert_eq!(closed.close_price, 1.0950);
        assert_eq!(closed.exit_reason, ExitReason::TakeProfit);

        assert!(!pm.is_open(Ticket(7)));
        let in_history = pm
            .closed_history()
            .iter()
            .filter(|c| c.position.ticket == Ticket(7))
            .count();
        assert_eq!(in_history, 1);
    }

    #[test]
    fn test_untrack_unknown_ticket_is_noop() {
        let mut pm = pm();
        pm.track(position(1, "EURUSD", 0.5)).unwrap();

        let result = pm.untrack(Ticket(99), 1.0, 0.0, ExitReason::External);
        assert!(matches!(result, Err(TradeError::LedgerInconsistency(_))));

        assert_eq!(pm.open_count(), 1);
        assert!(pm.closed_history().is_empty());
    }

    #[test]
    fn test_double_untrack_counts_once() {
        let mut pm = pm();
        pm.track(position(1, "EURUSD", 0.5)).unwrap();

        pm.untrack(Ticket(1), 1.09, 10.0, ExitReason::TakeProfit).unwrap();
        assert!(pm.untrack(Ticket(1), 1.09, 10.0, ExitReason::TakeProfit).is_err());

        assert_eq!(pm.closed_history().len(), 1);
    }

    #[test]
    fn test_exposure_and_limits() {
        let mut pm = pm();
        pm.track(position(1, "EURUSD", 0.5)).unwrap();
        pm.track(position(2, "GBPUSD", 1.25)).unwrap();

        assert_eq!(pm.total_exposure(), 1.75);
        assert!(pm.can_open_another());

        pm.track(position(3, "XAUUSD", 0.1)).unwrap();
        assert!(!pm.can_open_another());
    }

    #[test]
    fn test_reservations_count_against_limit() {
        let mut pm = pm();
        pm.track(position(1, "EURUSD", 0.5)).unwrap();

        let a = pm.reserve_slot().unwrap();
        let b = pm.reserve_slot().unwrap();
        assert!(pm.reserve_slot().is_none());
        assert!(!pm.can_open_another());

        a.release();
        assert!(pm.can_open_another());

        pm.track_reserved(b, position(2, "GBPUSD", 0.5)).unwrap();
        assert_eq!(pm.open_count(), 2);
        assert_eq!(pm.pending_count(), 0);
        assert!(pm.can_open_another());
    }

    #[test]
    fn test_dropped_reservation_frees_slot() {
        let mut pm = PositionManager::new(1, Duration::hours(24));

        {
            let _held = pm.reserve_slot().unwrap();
            assert!(!pm.can_open_another());
        }

        assert_eq!(pm.pending_count(), 0);
        assert!(pm.can_open_another());
    }

    #[test]
    fn test_failed_reserved_track_frees_slot() {
        let mut pm = pm();
        pm.track(position(1, "EURUSD", 0.5)).unwrap();

        let slot = pm.reserve_slot().unwrap();
        assert!(pm.track_reserved(slot, position(1, "EURUSD", 0.5)).is_err());
        assert_eq!(pm.pending_count(), 0);
        assert_eq!(pm.open_count(), 1);
    }

    #[test]
    fn test_rolling_stats_empty() {
        let stats = pm().rolling_stats();

        assert_eq!(stats.trade_count, 0);
        assert_eq!(stats.win_rate_percent, 0.0);
        assert_eq!(stats.average_profit_per_trade, 0.0);
        assert_eq!(stats.total_profit, 0.0);
    }

    #[test]
    fn test_rolling_stats_window() {
        let mut pm = pm();
        let now = Utc::now();

        close_with_profit(&mut pm, 1, 30.0, now - Duration::hours(1));
        close_with_profit(&mut pm, 2, -10.0, now - Duration::hours(2));
        // Zero profit is a loss
        close_with_profit(&mut pm, 3, 0.0, now - Duration::hours(3));
        // Outside the window
        close_with_profit(&mut pm, 4, 500.0, now - Duration::hours(25));

        let stats = pm.rolling_stats_at(now, Duration::hours(24));
        assert_eq!(stats.trade_count, 3);
        assert_eq!(stats.win_count, 1);
        assert_eq!(stats.loss_count, 2);
        assert_eq!(stats.total_profit, 20.0);
        assert!((stats.win_rate_percent - 100.0 / 3.0).abs() < 1e-9);
        assert!((stats.average_profit_per_trade - 20.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_rolling_stats_idempotent() {
        let mut pm = pm();
        let now = Utc::now();
        close_with_profit(&mut pm, 1, 30.0, now);
        close_with_profit(&mut pm, 2, -10.0, now);

        let first = pm.rolling_stats_at(now, Duration::hours(24));
        let second = pm.rolling_stats_at(now, Duration::hours(24));
        assert_eq!(first, second);
    }

    #[test]
    fn test_consecutive_losses_reset_on_win() {
        let mut pm = pm();
        let now = Utc::now();

        close_with_profit(&mut pm, 1, -5.0, now);
        close_with_profit(&mut pm, 2, -5.0, now);
        assert_eq!(pm.consecutive_losses(), 2);

        close_with_profit(&mut pm, 3, 1.0, now);
        assert_eq!(pm.consecutive_losses(), 0);

        close_with_profit(&mut pm, 4, 0.0, now);
        assert_eq!(pm.consecutive_losses(), 1);
    }

    #[test]
    fn test_consecutive_losses_scan_is_bounded() {
        let mut pm = pm();
        let now = Utc::now();
        for ticket in 0..15 {
            close_with_profit(&mut pm, ticket, -1.0, now);
        }

        assert_eq!(pm.consecutive_losses(), CONSECUTIVE_LOSS_SCAN as u32);
    }

    #[test]
    fn test_prune_history() {
        let mut pm = pm();
        let now = Utc::now();
        close_with_profit(&mut pm, 1, 1.0, now - Duration::hours(30));
        close_with_profit(&mut pm, 2, 1.0, now - Duration::hours(1));

        assert_eq!(pm.prune_history(now), 1);
        assert_eq!(pm.closed_history().len(), 1);
        assert_eq!(pm.closed_history()[0].position.ticket, Ticket(2));
    }

    #[test]
    fn test_exit_signal_buy() {
        let pos = position(1, "EURUSD", 1.0);

        assert_eq!(pos.exit_signal(1.0950), Some(ExitReason::TakeProfit));
        assert_eq!(pos.exit_signal(1.0800), Some(ExitReason::StopLoss));
        assert_eq!(pos.exit_signal(1.0870), None);
    }

    #[test]
    fn test_exit_signal_sell() {
        let pos = Position {
            direction: Direction::Sell,
            stop_loss: 1.0900,
            take_profit: 1.0750,
            ..position(1, "EURUSD", 1.0)
        };

        assert_eq!(pos.exit_signal(1.0740), Some(ExitReason::TakeProfit));
        assert_eq!(pos.exit_signal(1.0901), Some(ExitReason::StopLoss));
        assert_eq!(pos.exit_signal(1.0850), None);
    }

    #[test]
    fn test_statistics_display() {
        let stats = SessionStatistics {
            trade_count: 10,
            win_count: 4,
            loss_count: 6,
            win_rate_percent: 40.0,
            total_profit: -12.5,
            average_profit_per_trade: -1.25,
        };

        assert_eq!(
            stats.to_string(),
            "24h Stats - Trades: 10, Wins: 4, Losses: 6, Win Rate: 40.0%, \
             Total Profit: $-12.50, Avg Profit per Trade: $-1.25"
        );
    }
}
