use async_trait::async_trait;

use crate::models::{Candle, Direction, Quote, Ticket};
use crate::Result;

/// Order submitted to the broker
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub symbol: String,
    pub direction: Direction,
    pub volume: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub comment: String,
}

/// Connection to a trading terminal.
///
/// Retrieval misses are `None`/empty rather than errors; the caller skips the
/// symbol for the cycle. Order operations return `Err` on rejection.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn get_quote(&self, symbol: &str) -> Option<Quote>;

    /// Candles oldest first, empty when unavailable
    async fn get_candles(&self, symbol: &str, timeframe: &str, count: usize) -> Vec<Candle>;

    async fn open_order(&self, order: &OrderRequest) -> Result<Ticket>;

    /// Close `volume` lots of a position, or all of it when `None`
    async fn close_order(&self, ticket: Ticket, volume: Option<f64>) -> Result<()>;

    async fn account_balance(&self) -> Option<f64>;

    async fn disconnect(&self) {}
}
