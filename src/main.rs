//! Tick-driven trading bot scaffold.
//!
//! One strategy/agent pair runs unchanged against three execution modes:
//! historical replay over the local candle store, paper trading against the
//! built-in simulator on live data, and live orders through Alpaca.

mod agent;
mod broker;
mod config;
mod data;
mod engine;
mod models;
mod report;
mod strategy;

use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::agent::SignalAgent;
use crate::broker::{AlpacaBroker, SimBroker};
use crate::config::AppConfig;
use crate::data::{AlpacaBarPoller, BarRepository, Timeframe};
use crate::engine::{run_matrix, BacktestEngine, LiveEngine};
use crate::models::AssetClass;
use crate::report::PerformanceSummary;
use crate::strategy::ConsecutiveChangeStrategy;

/// Trading bot CLI.
#[derive(Parser)]
#[command(name = "tickbot")]
#[command(about = "Backtest and trade tick-driven strategies", long_about = None)]
struct Cli {
    /// Database file path
    #[arg(short, long, default_value = "sqlite:./tickbot.db?mode=rwc")]
    database: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the backtest matrix over all active symbols
    Backtest {
        /// Asset class to evaluate (crypto or stock)
        #[arg(short, long, default_value = "crypto")]
        asset: AssetClass,

        /// Timeframes to evaluate, comma separated (1D, 1H, 5M, 1M)
        #[arg(short, long, default_value = "1D", value_delimiter = ',')]
        timeframes: Vec<Timeframe>,

        /// Initial cash per matrix cell
        #[arg(short, long, default_value = "10000")]
        cash: f64,

        /// Bars of history the agent sees per tick
        #[arg(short, long, default_value = "10")]
        window: usize,

        /// Also print a detailed performance report for one symbol
        #[arg(short, long)]
        symbol: Option<String>,
    },

    /// Trade live bars, against the simulator or the Alpaca account
    Live {
        /// Symbols to trade, comma separated
        #[arg(short, long, value_delimiter = ',')]
        symbols: Vec<String>,

        /// Asset class used to pick default symbols
        #[arg(short, long, default_value = "crypto")]
        asset: AssetClass,

        /// Bars of history the agent sees per tick
        #[arg(short, long, default_value = "3")]
        window: usize,

        /// Bar poll interval in seconds
        #[arg(short, long, default_value = "60")]
        interval: u64,

        /// Paper-trade against the built-in simulator instead of Alpaca
        #[arg(long)]
        sim: bool,

        /// Initial cash for the simulator (with --sim)
        #[arg(short, long, default_value = "10000")]
        cash: f64,
    },

    /// Mark a symbol active for evaluation
    Track { symbol: String },

    /// Mark a symbol inactive
    Untrack { symbol: String },

    /// List active symbols
    List,

    /// Show effective configuration
    Config,
}

fn default_symbols(asset: AssetClass) -> Vec<String> {
    let symbols: &[&str] = match asset {
        AssetClass::Crypto => &["BTC/USD", "ETH/USD", "SOL/USD"],
        AssetClass::UsEquity => &["AAPL", "MSFT", "GOOGL"],
    };
    symbols.iter().map(|s| s.to_string()).collect()
}

fn new_agent() -> SignalAgent<ConsecutiveChangeStrategy> {
    SignalAgent::new(ConsecutiveChangeStrategy)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = AppConfig::from_env();

    match cli.command {
        Commands::Backtest {
            asset,
            timeframes,
            cash,
            window,
            symbol,
        } => {
            let repo = BarRepository::new(&cli.database).await?;

            let report = run_matrix(&repo, asset, &timeframes, cash, window, new_agent).await?;
            println!("\n{report}");

            if let Some(symbol) = symbol {
                let timeframe = timeframes.first().copied().unwrap_or(Timeframe::Day1);
                let bars = repo.fetch_history(&symbol, timeframe, None, None).await?;

                let mut engine =
                    BacktestEngine::with_window(SimBroker::new(cash), new_agent(), window);
                engine.run_backtest(&symbol, &bars).await?;

                let trades = engine.broker().trade_history().len();
                match engine
                    .results(&symbol)
                    .and_then(|h| PerformanceSummary::from_history(h, trades))
                {
                    Some(summary) => println!("{summary}"),
                    None => println!("No evaluated ticks for {symbol} on {timeframe}"),
                }
            }
        }

        Commands::Live {
            symbols,
            asset,
            window,
            interval,
            sim,
            cash,
        } => {
            let symbols = if symbols.is_empty() {
                default_symbols(asset)
            } else {
                symbols
            };

            let (api_key, api_secret) = config.credentials()?;
            let stream = AlpacaBarPoller::new(
                &config.data_url,
                api_key,
                api_secret,
                symbols.clone(),
                Duration::from_secs(interval),
            )?;

            if sim {
                info!(cash, "Paper trading against the simulator");
                let broker = SimBroker::new(cash);
                let mut engine = LiveEngine::new(broker, new_agent(), stream, symbols, window);
                engine.run().await?;
            } else {
                info!(url = %config.trading_url, "Trading through Alpaca");
                let broker = AlpacaBroker::new(&config.trading_url, api_key, api_secret)?;
                let mut engine = LiveEngine::new(broker, new_agent(), stream, symbols, window);
                engine.run().await?;
            }
        }

        Commands::Track { symbol } => {
            let repo = BarRepository::new(&cli.database).await?;
            repo.upsert_asset(&symbol, true).await?;
            println!(
                "Now tracking: {} ({})",
                symbol,
                AssetClass::from_symbol(&symbol).key()
            );
        }

        Commands::Untrack { symbol } => {
            let repo = BarRepository::new(&cli.database).await?;
            repo.upsert_asset(&symbol, false).await?;
            println!("Stopped tracking: {symbol}");
        }

        Commands::List => {
            let repo = BarRepository::new(&cli.database).await?;
            let symbols = repo.get_active_symbols(None).await?;

            if symbols.is_empty() {
                println!("No active symbols. Add one with: tickbot track <SYMBOL>");
            } else {
                println!("{:<15} {:<8}", "SYMBOL", "CLASS");
                println!("{}", "-".repeat(24));
                for symbol in symbols {
                    println!(
                        "{:<15} {:<8}",
                        symbol,
                        AssetClass::from_symbol(&symbol).key()
                    );
                }
            }
        }

        Commands::Config => {
            println!("Database:     {}", cli.database);
            println!("Trading URL:  {}", config.trading_url);
            println!("Data URL:     {}", config.data_url);
            println!(
                "Credentials:  {}",
                if config.api_key.is_some() && config.api_secret.is_some() {
                    "set"
                } else {
                    "not set"
                }
            );
        }
    }

    Ok(())
}
