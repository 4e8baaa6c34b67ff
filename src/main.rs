use anyhow::{Context, Result};
use clap::Parser;
use scalpbot::{PaperBroker, Settings, TradingMode, TradingSystem};
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "scalpbot=info";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = "Volatility-gated scalping engine running against a paper terminal.")]
struct Cli {
    /// Config file path (without extension is fine); defaults to config/scalpbot
    #[arg(short, long)]
    config: Option<String>,

    /// Bypass the profitability, volatility and reward:risk gates
    #[arg(long)]
    relaxed: bool,

    /// Seed for the paper terminal's price walk
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Stop after this many scan cycles instead of waiting for Ctrl+C
    #[arg(long)]
    cycles: Option<u64>,

    /// Log filter directive, e.g. "scalpbot=debug"; RUST_LOG wins when set
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    setup_logging(cli.log_level.as_deref());

    let mut settings = Settings::load(cli.config.as_deref()).context("Failed to load settings")?;
    if cli.relaxed {
        settings.mode = TradingMode::Relaxed;
    }

    tracing::info!("🚀 scalpbot starting");
    tracing::info!("  Mode: {:?}", settings.mode);
    tracing::info!("  Symbols: {}", settings.all_symbols().join(", "));
    tracing::info!("  Risk per trade: {}%", settings.risk.risk_percent_per_trade);
    tracing::info!("  Max open positions: {}", settings.trading.max_open_positions);

    let broker = Arc::new(PaperBroker::new(
        cli.seed,
        settings.trading.initial_balance,
        settings.risk.profit_multiplier,
    ));
    let mut system = TradingSystem::new(settings, broker);

    let stats = match cli.cycles {
        Some(cycles) => {
            for _ in 0..cycles {
                system.run_cycle().await;
            }
            system.shutdown().await
        }
        None => {
            let (tx, rx) = watch::channel(false);
            tokio::spawn(async move {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => tracing::info!("Received Ctrl+C"),
                    Err(e) => tracing::error!("Failed to listen for Ctrl+C: {}", e),
                }
                let _ = tx.send(true);
            });
            system.run(rx).await
        }
    };

    println!("{}", stats);
    Ok(())
}

fn setup_logging(directive: Option<&str>) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(directive.unwrap_or(DEFAULT_LOG_FILTER)));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}
