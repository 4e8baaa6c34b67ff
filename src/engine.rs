use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

use crate::config::Settings;
use crate::error::TradeError;
use crate::execution::{Broker, MarketScanner, PositionManager, SessionStatistics, TradeExecutor};
use crate::models::Quote;
use crate::strategy::{AlternatingPicker, DirectionPicker};

/// What one scan cycle did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub cycle: u64,
    pub scanned: usize,
    pub closed: usize,
    pub opened: usize,
    /// Attempts stopped by a gate
    pub rejected: usize,
    /// Attempts that reached the broker and failed, or faulted
    pub failed: usize,
}

/// Scheduling loop tying scanner, executor and ledger together
pub struct TradingSystem {
    settings: Settings,
    broker: Arc<dyn Broker>,
    scanner: MarketScanner,
    executor: TradeExecutor,
    ledger: Arc<Mutex<PositionManager>>,
    picker: Box<dyn DirectionPicker>,
    symbols: Vec<String>,
    cycle: u64,
}

impl TradingSystem {
    pub fn new(settings: Settings, broker: Arc<dyn Broker>) -> Self {
        let ledger = Arc::new(Mutex::new(PositionManager::new(
            settings.trading.max_open_positions,
            settings.profitability.stats_window(),
        )));
        let scanner = MarketScanner::new(
            Arc::clone(&broker),
            settings.trading.timeframe.clone(),
            settings.trading.candle_count,
        );
        let executor = TradeExecutor::new(&settings, Arc::clone(&broker), Arc::clone(&ledger));

        Self {
            symbols: settings.all_symbols(),
            settings,
            broker,
            scanner,
            executor,
            ledger,
            picker: Box::new(AlternatingPicker),
            cycle: 0,
        }
    }

    pub fn with_picker(mut self, picker: impl DirectionPicker + 'static) -> Self {
        self.picker = Box::new(picker);
        self
    }

    pub fn ledger(&self) -> &Arc<Mutex<PositionManager>> {
        &self.ledger
    }

    pub fn scanner(&self) -> &MarketScanner {
        &self.scanner
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    /// Scan, close what hit TP/SL, then attempt opens on the scanned symbols
    pub async fn run_cycle(&mut self) -> CycleReport {
        let cycle = self.cycle;
        self.cycle += 1;
        let mut report = CycleReport {
            cycle,
            ..CycleReport::default()
        };

        let balance = self.broker.account_balance().await;
        let snapshots = self.scanner.scan(&self.symbols).await;
        report.scanned = snapshots.len();

        let quotes: HashMap<String, Quote> = snapshots
            .iter()
            .map(|(symbol, snapshot)| (symbol.clone(), snapshot.quote.clone()))
            .collect();
        report.closed = self.executor.check_and_close(&quotes).await.len();

        let Some(balance) = balance else {
            let e = TradeError::DataUnavailable {
                symbol: "account".to_string(),
                what: "balance",
            };
            tracing::warn!(cycle, "Skipping opens: {}", e);
            return report;
        };

        for (symbol, snapshot) in &snapshots {
            if !self.has_free_slot() {
                tracing::debug!(cycle, "No free position slots, stopping opens");
                break;
            }
            let Some(direction) = self.picker.pick(symbol, cycle) else {
                continue;
            };

            match self
                .executor
                .try_open(symbol, direction, &snapshot.quote, &snapshot.candles, balance)
                .await
            {
                Ok(_) => report.opened += 1,
                Err(TradeError::FilterBlocked { reason }) => {
                    tracing::debug!(symbol = %symbol, "Rejected: {}", reason);
                    report.rejected += 1;
                }
                Err(e) if e.is_retryable() => {
                    tracing::warn!(symbol = %symbol, "{} (will retry next cycle)", e);
                    report.failed += 1;
                }
                Err(e) => {
                    tracing::error!(symbol = %symbol, "Open attempt faulted: {}", e);
                    report.failed += 1;
                }
            }
        }

        tracing::info!(
            cycle,
            scanned = report.scanned,
            closed = report.closed,
            opened = report.opened,
            rejected = report.rejected,
            failed = report.failed,
            picker = self.picker.name(),
            "💹 Cycle complete"
        );
        report
    }

    fn has_free_slot(&self) -> bool {
        self.ledger
            .lock()
            .map(|ledger| ledger.can_open_another())
            .unwrap_or(false)
    }

    /// Prune history outside the window and log rolling statistics
    pub fn log_session_stats(&self) -> SessionStatistics {
        let Ok(mut ledger) = self.ledger.lock() else {
            tracing::error!("Ledger poisoned; statistics unavailable");
            return SessionStatistics::default();
        };

        let pruned = ledger.prune_history(Utc::now());
        if pruned > 0 {
            tracing::debug!(pruned, "Closed trades aged out of the statistics window");
        }

        let stats = ledger.rolling_stats();
        tracing::info!(
            open_positions = ledger.open_count(),
            exposure = ledger.total_exposure(),
            "📊 {}",
            stats
        );
        stats
    }

    /// Run cycles until `shutdown` flips to true (or its sender is dropped),
    /// then close everything and report final statistics
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> SessionStatistics {
        let mut scan_tick = interval(self.settings.schedule.scan_interval());
        scan_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut stats_tick = interval(self.settings.schedule.stats_interval());
        stats_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // First stats tick fires immediately; nothing to report yet
        stats_tick.tick().await;

        tracing::info!(
            symbols = self.symbols.len(),
            mode = ?self.settings.mode,
            scan_secs = self.settings.schedule.scan_interval_secs,
            "🚀 Trading loop started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        tracing::warn!("Shutdown channel closed");
                        break;
                    }
                }
                _ = scan_tick.tick() => {
                    self.run_cycle().await;
                }
                _ = stats_tick.tick() => {
                    self.log_session_stats();
                }
            }
        }

        self.shutdown().await
    }

    /// Stop opening, request closure of every open position, release the
    /// broker, then report statistics whatever the closes returned
    pub async fn shutdown(&self) -> SessionStatistics {
        tracing::info!("⚠️  Shutting down, closing open positions");

        let quotes = self.scanner.latest_quotes();
        let report = self.executor.close_all(&quotes).await;
        if !report.failed.is_empty() {
            tracing::error!(
                failed = report.failed.len(),
                "Some positions could not be closed: {:?}",
                report.failed
            );
        }
        tracing::info!(closed = report.closed.len(), "Shutdown closes complete");

        self.broker.disconnect().await;

        let stats = self.log_session_stats();
        tracing::info!("👋 Trading loop stopped");
        stats
    }
}
