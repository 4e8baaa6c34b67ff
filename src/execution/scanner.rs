use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use super::broker::Broker;
use crate::error::TradeError;
use crate::models::{Candle, Quote};
use crate::Result;

/// Latest quote and candle window for one symbol
#[derive(Debug, Clone, PartialEq)]
pub struct MarketSnapshot {
    pub quote: Quote,
    pub candles: Vec<Candle>,
}

/// Fans quote + candle retrieval out across symbols and keeps the last
/// good snapshot per symbol for readers between scans.
#[derive(Clone)]
pub struct MarketScanner {
    broker: Arc<dyn Broker>,
    timeframe: String,
    candle_count: usize,
    cache: Arc<RwLock<HashMap<String, MarketSnapshot>>>,
}

impl MarketScanner {
    pub fn new(broker: Arc<dyn Broker>, timeframe: impl Into<String>, candle_count: usize) -> Self {
        Self {
            broker,
            timeframe: timeframe.into(),
            candle_count,
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Fetch every symbol concurrently. Symbols whose quote or candles are
    /// unavailable are left out of the result.
    pub async fn scan(&self, symbols: &[String]) -> BTreeMap<String, MarketSnapshot> {
        let mut handles = Vec::with_capacity(symbols.len());

        for symbol in symbols {
            let broker = Arc::clone(&self.broker);
            let symbol = symbol.clone();
            let timeframe = self.timeframe.clone();
            let count = self.candle_count;

            handles.push(tokio::spawn(async move {
                let result = fetch(broker.as_ref(), &symbol, &timeframe, count).await;
                (symbol, result)
            }));
        }

        let mut snapshots = BTreeMap::new();
        for handle in handles {
            match handle.await {
                Ok((symbol, Ok(snapshot))) => {
                    snapshots.insert(symbol, snapshot);
                }
                Ok((symbol, Err(e))) => {
                    tracing::debug!(symbol = %symbol, "Skipping symbol this cycle: {}", e);
                }
                Err(e) => {
                    tracing::error!("Scan task failed: {}", e);
                }
            }
        }

        match self.cache.write() {
            Ok(mut cache) => {
                for (symbol, snapshot) in &snapshots {
                    cache.insert(symbol.clone(), snapshot.clone());
                }
            }
            Err(_) => tracing::error!("Market cache poisoned; keeping scan result only"),
        }

        tracing::debug!(requested = symbols.len(), scanned = snapshots.len(), "Scan complete");
        snapshots
    }

    /// Last good snapshot for a symbol
    pub fn snapshot(&self, symbol: &str) -> Option<MarketSnapshot> {
        self.cache.read().ok()?.get(symbol).cloned()
    }

    pub fn candles(&self, symbol: &str) -> Vec<Candle> {
        self.snapshot(symbol).map(|s| s.candles).unwrap_or_default()
    }

    /// Cached quotes for every symbol seen so far
    pub fn latest_quotes(&self) -> HashMap<String, Quote> {
        match self.cache.read() {
            Ok(cache) => cache
                .iter()
                .map(|(symbol, snapshot)| (symbol.clone(), snapshot.quote.clone()))
                .collect(),
            Err(_) => HashMap::new(),
        }
    }

    pub fn cached_symbols(&self) -> Vec<String> {
        match self.cache.read() {
            Ok(cache) => cache.keys().cloned().collect(),
            Err(_) => Vec::new(),
        }
    }
}

async fn fetch(broker: &dyn Broker, symbol: &str, timeframe: &str, count: usize) -> Result<MarketSnapshot> {
    let quote = broker
        .get_quote(symbol)
        .await
        .ok_or_else(|| TradeError::DataUnavailable {
            symbol: symbol.to_string(),
            what: "quote",
        })?;

    let candles = broker.get_candles(symbol, timeframe, count).await;
    if candles.is_empty() {
        return Err(TradeError::DataUnavailable {
            symbol: symbol.to_string(),
            what: "candles",
        });
    }

    tracing::trace!(
        symbol = %symbol,
        bid = quote.bid,
        spread = quote.spread(),
        candles = candles.len(),
        "Fetched market data"
    );

    Ok(MarketSnapshot { quote, candles })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::broker::OrderRequest;
    use crate::models::Ticket;
    use async_trait::async_trait;
    use chrono::Utc;

    /// Serves flat data except for the listed symbols
    struct StubBroker {
        no_quote: Vec<&'static str>,
        no_candles: Vec<&'static str>,
    }

    #[async_trait]
    impl Broker for StubBroker {
        async fn get_quote(&self, symbol: &str) -> Option<Quote> {
            if self.no_quote.iter().any(|s| *s == symbol) {
                return None;
            }
            Some(Quote {
                symbol: symbol.to_string(),
                bid: 1.0,
                ask: 1.1,
                timestamp: Utc::now(),
                digits: 5,
            })
        }

        async fn get_candles(&self, symbol: &str, _timeframe: &str, count: usize) -> Vec<Candle> {
            if self.no_candles.iter().any(|s| *s == symbol) {
                return Vec::new();
            }
            (0..count)
                .map(|_| Candle {
                    timestamp: Utc::now(),
                    open: 1.0,
                    high: 1.0,
                    low: 1.0,
                    close: 1.0,
                    volume: 1,
                })
                .collect()
        }

        async fn open_order(&self, _order: &OrderRequest) -> Result<Ticket> {
            Ok(Ticket(1))
        }

        async fn close_order(&self, _ticket: Ticket, _volume: Option<f64>) -> Result<()> {
            Ok(())
        }

        async fn account_balance(&self) -> Option<f64> {
            Some(10_000.0)
        }
    }

    fn symbols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_scan_omits_failed_symbols() {
        let broker = Arc::new(StubBroker {
            no_quote: vec!["GBPUSD"],
            no_candles: vec!["USDJPY"],
        });
        let scanner = MarketScanner::new(broker, "5m", 30);

        let result = scanner.scan(&symbols(&["EURUSD", "GBPUSD", "USDJPY"])).await;

        assert_eq!(result.len(), 1);
        assert_eq!(result["EURUSD"].candles.len(), 30);
    }

    #[tokio::test]
    async fn test_scan_populates_cache() {
        let broker = Arc::new(StubBroker {
            no_quote: vec![],
            no_candles: vec![],
        });
        let scanner = MarketScanner::new(broker, "5m", 10);

        assert!(scanner.snapshot("EURUSD").is_none());
        scanner.scan(&symbols(&["EURUSD", "XAUUSD"])).await;

        assert_eq!(scanner.candles("EURUSD").len(), 10);
        assert_eq!(scanner.latest_quotes().len(), 2);
        assert_eq!(scanner.cached_symbols().len(), 2);
    }

    #[tokio::test]
    async fn test_cache_keeps_last_good_snapshot() {
        let good = MarketScanner::new(
            Arc::new(StubBroker {
                no_quote: vec![],
                no_candles: vec![],
            }),
            "5m",
            10,
        );
        good.scan(&symbols(&["EURUSD"])).await;

        // Same cache, failing broker
        let failing = MarketScanner {
            broker: Arc::new(StubBroker {
                no_quote: vec!["EURUSD"],
                no_candles: vec![],
            }),
            ..good.clone()
        };
        let result = failing.scan(&symbols(&["EURUSD"])).await;

        assert!(result.is_empty());
        assert!(good.snapshot("EURUSD").is_some());
    }

    #[tokio::test]
    async fn test_scan_empty_symbol_list() {
        let scanner = MarketScanner::new(
            Arc::new(StubBroker {
                no_quote: vec![],
                no_candles: vec![],
            }),
            "5m",
            10,
        );

        assert!(scanner.scan(&[]).await.is_empty());
    }
}
