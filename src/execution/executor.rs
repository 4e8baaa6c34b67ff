use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::broker::{Broker, OrderRequest};
use super::position_manager::{ClosedPosition, ExitReason, Position, PositionManager, SlotReservation};
use crate::analysis::VolatilityAnalyzer;
use crate::config::{Settings, TradingMode};
use crate::error::TradeError;
use crate::models::{Candle, Direction, Quote, Ticket};
use crate::risk::{reward_risk_ratio, ProfitabilityFilter, RiskSizer};
use crate::Result;

const ORDER_COMMENT: &str = "scalpbot";

fn blocked(reason: impl Into<String>) -> TradeError {
    TradeError::FilterBlocked {
        reason: reason.into(),
    }
}

/// Outcome of a shutdown sweep
#[derive(Debug, Default)]
pub struct CloseAllReport {
    pub closed: Vec<ClosedPosition>,
    pub failed: Vec<Ticket>,
}

/// Gated open attempts and TP/SL monitoring over the shared ledger.
///
/// The ledger lock is never held across a broker call. Opens claim a slot
/// before any await so concurrent attempts cannot exceed the position limit.
pub struct TradeExecutor {
    broker: Arc<dyn Broker>,
    ledger: Arc<Mutex<PositionManager>>,
    analyzer: VolatilityAnalyzer,
    filter: ProfitabilityFilter,
    sizer: RiskSizer,
    mode: TradingMode,
}

impl TradeExecutor {
    pub fn new(settings: &Settings, broker: Arc<dyn Broker>, ledger: Arc<Mutex<PositionManager>>) -> Self {
        Self {
            analyzer: VolatilityAnalyzer::new(settings.mode, settings.volatility.entry_threshold),
            filter: ProfitabilityFilter::new(
                settings.profitability.clone(),
                settings.mode,
                Arc::clone(&ledger),
            ),
            sizer: RiskSizer::new(settings.risk.clone()),
            mode: settings.mode,
            broker,
            ledger,
        }
    }

    pub fn ledger(&self) -> &Arc<Mutex<PositionManager>> {
        &self.ledger
    }

    pub fn sizer(&self) -> &RiskSizer {
        &self.sizer
    }

    fn lock_ledger(&self) -> Result<MutexGuard<'_, PositionManager>> {
        self.ledger.lock().map_err(|_| TradeError::LedgerUnavailable)
    }

    /// Run one open attempt for `symbol`.
    ///
    /// Gates short-circuit in order: profitability, position limit, volatility,
    /// stop validity, reward:risk, sizing. A gate rejection is
    /// `Err(FilterBlocked)`; a broker rejection is `Err(PlacementFailed)`.
    pub async fn try_open(
        &self,
        symbol: &str,
        direction: Direction,
        quote: &Quote,
        candles: &[Candle],
        balance: f64,
    ) -> Result<Position> {
        let verdict = self.filter.allow_trading(balance);
        if !verdict.allow {
            return Err(blocked(verdict.reason));
        }

        let reservation = {
            let mut ledger = self.lock_ledger()?;
            match ledger.reserve_slot() {
                Some(reservation) => reservation,
                None => {
                    let max = ledger.max_open_positions();
                    tracing::warn!(symbol = %symbol, max, "Position limit reached");
                    return Err(blocked(format!("Max open positions ({}) reached", max)));
                }
            }
        };

        // Dropping the reservation, including on cancellation, frees the slot
        let position = self.prepare_and_submit(symbol, direction, quote, candles, balance).await?;
        self.record_open(reservation, position).await
    }

    async fn prepare_and_submit(
        &self,
        symbol: &str,
        direction: Direction,
        quote: &Quote,
        candles: &[Candle],
        balance: f64,
    ) -> Result<Position> {
        let metrics = self.analyzer.analyze(symbol, candles);
        let entry_verdict = self.analyzer.should_enter(&metrics);
        if !entry_verdict.enter {
            tracing::debug!(symbol = %symbol, "Volatility gate: {}", entry_verdict.reason);
            return Err(blocked(entry_verdict.reason));
        }

        let entry_price = quote.entry_price(direction);
        let stop_loss = self.sizer.compute_stop_loss(symbol, entry_price, candles, direction);
        let take_profit = self.sizer.compute_take_profit(symbol, entry_price, direction);

        if stop_loss == entry_price {
            tracing::debug!(symbol = %symbol, "No valid stop-loss, skipping");
            return Err(blocked("No valid stop-loss (zero stop distance)"));
        }

        let min_ratio = self.sizer.settings().min_reward_risk_ratio;
        let ratio = reward_risk_ratio(entry_price, stop_loss, take_profit, direction);
        if ratio < min_ratio {
            if self.mode.is_relaxed() {
                tracing::info!(
                    symbol = %symbol,
                    "Reward:risk {:.2} below minimum {} (relaxed mode, proceeding)",
                    ratio,
                    min_ratio
                );
            } else {
                tracing::debug!(symbol = %symbol, ratio, min_ratio, "Reward:risk gate");
                return Err(blocked(format!(
                    "Reward:risk {:.2} below minimum {}",
                    ratio, min_ratio
                )));
            }
        }

        let volume = self.sizer.size_position(symbol, balance, entry_price, stop_loss);
        if !(volume > 0.0) {
            return Err(blocked("Position size could not be computed"));
        }

        let order = OrderRequest {
            symbol: symbol.to_string(),
            direction,
            volume,
            stop_loss,
            take_profit,
            comment: ORDER_COMMENT.to_string(),
        };

        let ticket = self.broker.open_order(&order).await.map_err(|e| {
            tracing::error!(symbol = %symbol, "Order placement failed: {}", e);
            match e {
                TradeError::PlacementFailed { .. } => e,
                other => TradeError::PlacementFailed {
                    symbol: symbol.to_string(),
                    reason: format!("placement failed: {}", other),
                },
            }
        })?;

        tracing::info!(
            ticket = %ticket,
            symbol = %symbol,
            direction = %direction,
            volume,
            entry_price,
            stop_loss,
            take_profit,
            reward_risk = ratio,
            "Trade opened"
        );

        Ok(Position {
            ticket,
            symbol: symbol.to_string(),
            direction,
            volume,
            entry_price,
            stop_loss,
            take_profit,
            open_time: Utc::now(),
        })
    }

    /// Track a filled order. An order the ledger refuses is closed at the
    /// broker so it is not left live and unmonitored.
    async fn record_open(&self, reservation: SlotReservation, position: Position) -> Result<Position> {
        let tracked = match self.lock_ledger() {
            Ok(mut ledger) => ledger.track_reserved(reservation, position.clone()),
            Err(e) => {
                drop(reservation);
                Err(e)
            }
        };
        let Err(e) = tracked else {
            return Ok(position);
        };

        tracing::error!(ticket = %position.ticket, "Opened order could not be tracked: {}", e);
        match self.broker.close_order(position.ticket, None).await {
            Ok(()) => tracing::warn!(ticket = %position.ticket, "Untracked order closed at broker"),
            Err(close_err) => tracing::error!(
                ticket = %position.ticket,
                symbol = %position.symbol,
                "Untracked order left open at broker: {}",
                close_err
            ),
        }
        Err(e)
    }

    /// Close every open position whose TP or SL is hit at the given quotes.
    ///
    /// Positions without a quote are skipped. A failed close leaves the
    /// position open for the next cycle.
    pub async fn check_and_close(&self, quotes: &HashMap<String, Quote>) -> Vec<ClosedPosition> {
        let mut closed = Vec::new();

        for position in self.open_snapshot() {
            let Some(quote) = quotes.get(&position.symbol) else {
                tracing::trace!(ticket = %position.ticket, symbol = %position.symbol, "No quote, skipping close check");
                continue;
            };

            let price = quote.exit_price(position.direction);
            let Some(reason) = position.exit_signal(price) else {
                continue;
            };

            match self.close_position(&position, price, reason).await {
                Ok(record) => closed.push(record),
                Err(e) => {
                    tracing::error!(ticket = %position.ticket, "Close failed, retrying next cycle: {}", e)
                }
            }
        }

        closed
    }

    /// Request closure of every open position at the latest quote, or at
    /// entry price when no quote is available
    pub async fn close_all(&self, quotes: &HashMap<String, Quote>) -> CloseAllReport {
        let mut report = CloseAllReport::default();

        for position in self.open_snapshot() {
            let price = quotes
                .get(&position.symbol)
                .map(|q| q.exit_price(position.direction))
                .unwrap_or(position.entry_price);

            match self.close_position(&position, price, ExitReason::External).await {
                Ok(record) => report.closed.push(record),
                Err(e) => {
                    tracing::error!(ticket = %position.ticket, "Shutdown close failed: {}", e);
                    report.failed.push(position.ticket);
                }
            }
        }

        report
    }

    fn open_snapshot(&self) -> Vec<Position> {
        match self.ledger.lock() {
            Ok(ledger) => ledger.open_positions().into_iter().cloned().collect(),
            Err(_) => {
                tracing::error!("Ledger poisoned; skipping close checks");
                Vec::new()
            }
        }
    }

    async fn close_position(
        &self,
        position: &Position,
        price: f64,
        reason: ExitReason,
    ) -> Result<ClosedPosition> {
        let profit = self
            .sizer
            .realized_profit(position.direction, position.entry_price, price, position.volume);

        self.broker.close_order(position.ticket, None).await?;

        let mut ledger = self.lock_ledger().map_err(|e| {
            tracing::error!(
                ticket = %position.ticket,
                symbol = %position.symbol,
                "Closed at broker but ledger unavailable; position still recorded open"
            );
            e
        })?;
        ledger.untrack(position.ticket, price, profit, reason).cloned()
    }
}
