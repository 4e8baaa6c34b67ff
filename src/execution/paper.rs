use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use super::broker::{Broker, OrderRequest};
use crate::error::TradeError;
use crate::models::{Candle, Direction, Quote, Ticket};
use crate::Result;

const HISTORY_CANDLES: usize = 200;
const MAX_HISTORY: usize = 1_000;
const CANDLE_MINUTES: i64 = 5;
/// Per-candle close-to-close noise
const STEP_NOISE: f64 = 0.004;
/// Intrabar high/low excursion
const INTRABAR_NOISE: f64 = 0.003;
/// Spread in points (10^-digits)
const SPREAD_POINTS: f64 = 10.0;

fn base_price(symbol: &str) -> f64 {
    match symbol.to_uppercase().as_str() {
        "EURUSD" => 1.0850,
        "GBPUSD" => 1.2650,
        "USDJPY" => 149.50,
        "XAUUSD" | "GOLD" => 2350.0,
        _ => 100.0,
    }
}

fn digits(symbol: &str) -> u32 {
    let upper = symbol.to_uppercase();
    if upper.contains("JPY") {
        3
    } else if upper.contains("XAU") || upper.contains("GOLD") {
        2
    } else {
        5
    }
}

fn round_to(price: f64, digits: u32) -> f64 {
    let scale = 10f64.powi(digits as i32);
    (price * scale).round() / scale
}

struct PaperMarket {
    candles: VecDeque<Candle>,
    digits: u32,
}

impl PaperMarket {
    fn last_close(&self) -> f64 {
        self.candles.back().map(|c| c.close).unwrap_or(0.0)
    }

    fn quote(&self, symbol: &str) -> Quote {
        let point = 10f64.powi(-(self.digits as i32));
        let bid = round_to(self.last_close(), self.digits);
        Quote {
            symbol: symbol.to_string(),
            bid,
            ask: round_to(bid + SPREAD_POINTS * point, self.digits),
            timestamp: self.candles.back().map(|c| c.timestamp).unwrap_or_else(Utc::now),
            digits: self.digits,
        }
    }
}

struct PaperOrder {
    symbol: String,
    direction: Direction,
    volume: f64,
    entry_price: f64,
}

struct PaperState {
    rng: StdRng,
    markets: HashMap<String, PaperMarket>,
    orders: HashMap<Ticket, PaperOrder>,
    next_ticket: u64,
    balance: f64,
}

fn next_candle(rng: &mut StdRng, prev_close: f64, timestamp: DateTime<Utc>) -> Candle {
    let close = prev_close * (1.0 + rng.gen_range(-STEP_NOISE..STEP_NOISE));
    let open = prev_close;
    let high = open.max(close) * (1.0 + rng.gen_range(0.0..INTRABAR_NOISE));
    let low = open.min(close) * (1.0 - rng.gen_range(0.0..INTRABAR_NOISE));

    Candle {
        timestamp,
        open,
        high,
        low,
        close,
        volume: rng.gen_range(700..1300),
    }
}

fn seed_market(rng: &mut StdRng, symbol: &str) -> PaperMarket {
    let start = Utc::now() - Duration::minutes(HISTORY_CANDLES as i64 * CANDLE_MINUTES);
    let mut candles = VecDeque::with_capacity(HISTORY_CANDLES);
    let mut price = base_price(symbol);
    for i in 0..HISTORY_CANDLES {
        let candle = next_candle(rng, price, start + Duration::minutes(i as i64 * CANDLE_MINUTES));
        price = candle.close;
        candles.push_back(candle);
    }

    tracing::debug!(symbol = %symbol, last_close = price, "Paper market seeded");
    PaperMarket {
        candles,
        digits: digits(symbol),
    }
}

impl PaperState {
    fn market(&mut self, symbol: &str) -> &mut PaperMarket {
        let PaperState { rng, markets, .. } = self;
        markets
            .entry(symbol.to_string())
            .or_insert_with(|| seed_market(rng, symbol))
    }

    /// Append one candle to the symbol's history
    fn advance(&mut self, symbol: &str) {
        self.market(symbol);
        let PaperState { rng, markets, .. } = self;
        let Some(market) = markets.get_mut(symbol) else {
            return;
        };

        let prev_time = market.candles.back().map(|c| c.timestamp).unwrap_or_else(Utc::now);
        let candle = next_candle(rng, market.last_close(), prev_time + Duration::minutes(CANDLE_MINUTES));
        market.candles.push_back(candle);
        while market.candles.len() > MAX_HISTORY {
            market.candles.pop_front();
        }
    }
}

/// In-memory simulated terminal.
///
/// Each quote request advances the symbol's seeded random walk by one candle.
/// Orders fill at the current ask/bid; closing credits the balance with the
/// realized profit.
pub struct PaperBroker {
    state: Mutex<PaperState>,
    profit_multiplier: f64,
}

impl PaperBroker {
    pub fn new(seed: u64, initial_balance: f64, profit_multiplier: f64) -> Self {
        Self {
            state: Mutex::new(PaperState {
                rng: StdRng::seed_from_u64(seed),
                markets: HashMap::new(),
                orders: HashMap::new(),
                next_ticket: 1,
                balance: initial_balance,
            }),
            profit_multiplier,
        }
    }

    pub fn open_order_count(&self) -> usize {
        self.state().map(|s| s.orders.len()).unwrap_or(0)
    }

    fn state(&self) -> Option<MutexGuard<'_, PaperState>> {
        match self.state.lock() {
            Ok(guard) => Some(guard),
            Err(_) => {
                tracing::error!("Paper broker state poisoned");
                None
            }
        }
    }
}

#[async_trait]
impl Broker for PaperBroker {
    async fn get_quote(&self, symbol: &str) -> Option<Quote> {
        let mut state = self.state()?;
        state.advance(symbol);
        Some(state.market(symbol).quote(symbol))
    }

    async fn get_candles(&self, symbol: &str, timeframe: &str, count: usize) -> Vec<Candle> {
        let Some(mut state) = self.state() else {
            return Vec::new();
        };
        tracing::trace!(symbol = %symbol, timeframe = %timeframe, count, "Paper candles requested");

        let candles = &state.market(symbol).candles;
        let skip = candles.len().saturating_sub(count);
        candles.iter().skip(skip).cloned().collect()
    }

    async fn open_order(&self, order: &OrderRequest) -> Result<Ticket> {
        let rejected = |reason: &str| TradeError::PlacementFailed {
            symbol: order.symbol.clone(),
            reason: reason.to_string(),
        };

        if !(order.volume > 0.0) || !order.volume.is_finite() {
            return Err(rejected("invalid volume"));
        }
        let mut state = self.state().ok_or_else(|| rejected("terminal unavailable"))?;

        let entry_price = state.market(&order.symbol).quote(&order.symbol).entry_price(order.direction);
        let ticket = Ticket(state.next_ticket);
        state.next_ticket += 1;
        state.orders.insert(
            ticket,
            PaperOrder {
                symbol: order.symbol.clone(),
                direction: order.direction,
                volume: order.volume,
                entry_price,
            },
        );

        tracing::debug!(
            ticket = %ticket,
            symbol = %order.symbol,
            direction = %order.direction,
            entry_price,
            comment = %order.comment,
            "Paper order filled"
        );
        Ok(ticket)
    }

    async fn close_order(&self, ticket: Ticket, volume: Option<f64>) -> Result<()> {
        let mut state = self.state().ok_or(TradeError::LedgerUnavailable)?;
        let Some(order) = state.orders.remove(&ticket) else {
            return Err(TradeError::unknown_ticket(ticket));
        };

        let closed_volume = volume.unwrap_or(order.volume).min(order.volume);
        let exit_price = state.market(&order.symbol).quote(&order.symbol).exit_price(order.direction);
        let profit = (exit_price - order.entry_price)
            * order.direction.sign()
            * closed_volume
            * self.profit_multiplier;
        state.balance += profit;

        if closed_volume < order.volume {
            state.orders.insert(
                ticket,
                PaperOrder {
                    volume: order.volume - closed_volume,
                    ..order
                },
            );
        }

        tracing::debug!(ticket = %ticket, exit_price, profit, "Paper order closed");
        Ok(())
    }

    async fn account_balance(&self) -> Option<f64> {
        self.state().map(|s| s.balance)
    }
}
