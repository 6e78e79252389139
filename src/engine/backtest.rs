//! Historical replay engine and the symbol-by-timeframe backtest matrix.

use std::collections::HashMap;
use std::fmt;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{error, info};

use crate::agent::Agent;
use crate::broker::{Broker, BrokerError, SimBroker};
use crate::data::{BarRepository, Timeframe};
use crate::models::{AssetClass, Bar};

/// Account state captured after each simulated tick.
#[derive(Debug, Clone)]
pub struct TickRecord {
    pub timestamp: DateTime<Utc>,
    pub cash: f64,
    pub equity: f64,
    pub price: f64,
}

/// Replays history bar by bar: at each tick the agent sees exactly the
/// window it would have seen live, never anything later.
pub struct BacktestEngine<B: Broker, A: Agent> {
    broker: B,
    agent: A,
    window_size: usize,
    results: HashMap<String, Vec<TickRecord>>,
}

impl<B: Broker, A: Agent> BacktestEngine<B, A> {
    pub fn new(broker: B, agent: A) -> Self {
        Self::with_window(broker, agent, 10)
    }

    pub fn with_window(broker: B, agent: A, window_size: usize) -> Self {
        Self {
            broker,
            agent,
            window_size,
            results: HashMap::new(),
        }
    }

    pub fn broker(&self) -> &B {
        &self.broker
    }

    pub fn results(&self, symbol: &str) -> Option<&[TickRecord]> {
        self.results.get(symbol).map(Vec::as_slice)
    }

    /// Run one symbol's history through the agent. The first evaluated tick
    /// is bar `window_size`, so shorter histories produce an empty run.
    pub async fn run_backtest(
        &mut self,
        symbol: &str,
        bars: &[Bar],
    ) -> Result<&[TickRecord], BrokerError> {
        let mut history = Vec::new();

        for i in self.window_size..bars.len() {
            let window = &bars[i - self.window_size..=i];
            let current_price = window[window.len() - 1].close;
            let timestamp = bars[i].ts;

            // Tape first, so fills and equity both see this tick's price.
            self.broker.update_price(symbol, current_price);

            self.agent
                .handle_tick(symbol, window, &mut self.broker)
                .await?;

            let account = self.broker.get_account().await?;
            history.push(TickRecord {
                timestamp,
                cash: account.cash,
                equity: account.equity,
                price: current_price,
            });
        }

        self.results.insert(symbol.to_string(), history);
        Ok(&self.results[symbol])
    }

    pub fn final_equity(&self, symbol: &str) -> Option<f64> {
        self.results.get(symbol)?.last().map(|r| r.equity)
    }
}

/// Outcome of one matrix cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CellOutcome {
    /// Final account equity, rounded to cents.
    Equity(f64),
    /// Not enough history stored to evaluate even one tick.
    NoData,
    /// The run failed; details were logged, the rest of the matrix went on.
    Error,
}

fn comma_separated(value: f64) -> String {
    let formatted = format!("{value:.2}");
    let (int_part, frac_part) = match formatted.split_once('.') {
        Some((i, f)) => (i, f),
        None => (formatted.as_str(), "00"),
    };

    let (sign, digits) = match int_part.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", int_part),
    };

    let mut grouped = String::new();
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }

    format!("{sign}{grouped}.{frac_part}")
}

impl fmt::Display for CellOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellOutcome::Equity(equity) => write!(f, "{}", comma_separated(*equity)),
            CellOutcome::NoData => write!(f, "NO_DATA"),
            CellOutcome::Error => write!(f, "ERROR"),
        }
    }
}

/// Final-equity grid for every active symbol on every requested timeframe.
pub struct MatrixReport {
    pub asset_class: AssetClass,
    pub timeframes: Vec<Timeframe>,
    pub rows: Vec<(String, Vec<CellOutcome>)>,
}

impl fmt::Display for MatrixReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = "=".repeat(65);
        writeln!(f, "{rule}")?;
        writeln!(
            f,
            "BACKTEST MATRIX: {}",
            self.asset_class.key().to_uppercase()
        )?;
        writeln!(f, "{rule}")?;

        let mut header = format!("{:<15}", "Symbol");
        for timeframe in &self.timeframes {
            header.push_str(&format!("{:>12}", timeframe.key()));
        }
        writeln!(f, "{header}")?;
        writeln!(f, "{}", "-".repeat(header.len()))?;

        for (symbol, cells) in &self.rows {
            write!(f, "{symbol:<15}")?;
            for cell in cells {
                write!(f, "{:>12}", cell.to_string())?;
            }
            writeln!(f)?;
        }

        write!(f, "{rule}")
    }
}

/// Run the full backtest matrix over every active symbol of one asset
/// class. Each cell starts from a fresh simulated broker and a fresh agent,
/// so no state leaks between cells; one failing cell never sinks the rest.
pub async fn run_matrix<A, F>(
    repo: &BarRepository,
    asset_class: AssetClass,
    timeframes: &[Timeframe],
    initial_cash: f64,
    window_size: usize,
    make_agent: F,
) -> Result<MatrixReport>
where
    A: Agent,
    F: Fn() -> A,
{
    let symbols = repo.get_active_symbols(Some(asset_class)).await?;
    let mut rows = Vec::with_capacity(symbols.len());

    for symbol in symbols {
        let mut cells = Vec::with_capacity(timeframes.len());

        for &timeframe in timeframes {
            let bars = match repo.fetch_history(&symbol, timeframe, None, None).await {
                Ok(bars) => bars,
                Err(e) => {
                    error!(symbol = %symbol, timeframe = %timeframe, error = %e, "History fetch failed");
                    cells.push(CellOutcome::Error);
                    continue;
                }
            };

            if bars.len() <= window_size {
                cells.push(CellOutcome::NoData);
                continue;
            }

            let broker = SimBroker::new(initial_cash);
            let mut engine = BacktestEngine::with_window(broker, make_agent(), window_size);

            info!(symbol = %symbol, timeframe = %timeframe, bars = bars.len(), "Simulating");
            match engine.run_backtest(&symbol, &bars).await {
                Ok(_) => {
                    let equity = engine.final_equity(&symbol).unwrap_or(initial_cash);
                    cells.push(CellOutcome::Equity((equity * 100.0).round() / 100.0));
                }
                Err(e) => {
                    error!(symbol = %symbol, timeframe = %timeframe, error = %e, "Backtest failed");
                    cells.push(CellOutcome::Error);
                }
            }
        }

        rows.push((symbol, cells));
    }

    Ok(MatrixReport {
        asset_class,
        timeframes: timeframes.to_vec(),
        rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::SignalAgent;
    use crate::strategy::ConsecutiveChangeStrategy;
    use chrono::TimeZone;

    fn bars(symbol: &str, closes: &[f64]) -> Vec<Bar> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| {
                Bar::new(
                    symbol,
                    Utc.with_ymd_and_hms(2024, 1, 1 + i as u32, 0, 0, 0).unwrap(),
                    close,
                )
            })
            .collect()
    }

    fn engine(initial_cash: f64) -> BacktestEngine<SimBroker, SignalAgent<ConsecutiveChangeStrategy>> {
        BacktestEngine::with_window(
            SimBroker::new(initial_cash),
            SignalAgent::new(ConsecutiveChangeStrategy),
            2,
        )
    }

    #[tokio::test]
    async fn test_replay_trades_and_records_every_tick() {
        let mut engine = engine(10_000.0);
        let history = engine
            .run_backtest("AAPL", &bars("AAPL", &[100.0, 101.0, 102.0, 103.0, 90.0, 80.0]))
            .await
            .unwrap();

        // One record per evaluated bar, none for the warmup window.
        assert_eq!(history.len(), 4);

        // Tick 1 buys all-in with the 0.1% reserve, leaving $10 cash.
        assert!((history[0].cash - 10.0).abs() < 1e-9);
        assert_eq!(history[0].price, 102.0);

        // Still long through the rally, equity tracks the price.
        assert!(history[1].equity > history[0].equity);

        // Final tick liquidated on two consecutive falls.
        assert!((history[3].cash - history[3].equity).abs() < 1e-9);
        assert!(engine.broker().trade_history().len() == 2);
    }

    #[tokio::test]
    async fn test_replay_is_deterministic() {
        let data = bars("AAPL", &[100.0, 103.0, 99.0, 104.0, 108.0, 101.0, 95.0, 97.0]);

        let mut first = engine(10_000.0);
        let mut second = engine(10_000.0);
        first.run_backtest("AAPL", &data).await.unwrap();
        second.run_backtest("AAPL", &data).await.unwrap();

        let a: Vec<f64> = first.results("AAPL").unwrap().iter().map(|r| r.equity).collect();
        let b: Vec<f64> = second.results("AAPL").unwrap().iter().map(|r| r.equity).collect();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_short_history_produces_no_ticks() {
        let mut engine = engine(10_000.0);
        let history = engine
            .run_backtest("AAPL", &bars("AAPL", &[100.0, 101.0]))
            .await
            .unwrap();
        assert!(history.is_empty());
        assert_eq!(engine.final_equity("AAPL"), None);
    }

    #[tokio::test]
    async fn test_matrix_marks_missing_data() {
        let repo = BarRepository::new("sqlite::memory:").await.unwrap();
        repo.upsert_asset("BTC/USD", true).await.unwrap();
        repo.upsert_asset("ETH/USD", true).await.unwrap();
        repo.upsert_bars(
            Timeframe::Day1,
            &bars("BTC/USD", &[100.0, 101.0, 102.0, 103.0, 102.0, 101.0, 100.0]),
        )
        .await
        .unwrap();

        let report = run_matrix(
            &repo,
            AssetClass::Crypto,
            &[Timeframe::Day1],
            10_000.0,
            2,
            || SignalAgent::new(ConsecutiveChangeStrategy),
        )
        .await
        .unwrap();

        assert_eq!(report.rows.len(), 2);
        let cells: HashMap<_, _> = report
            .rows
            .iter()
            .map(|(s, c)| (s.as_str(), c[0]))
            .collect();
        assert!(matches!(cells["BTC/USD"], CellOutcome::Equity(_)));
        assert_eq!(cells["ETH/USD"], CellOutcome::NoData);

        let rendered = report.to_string();
        assert!(rendered.contains("BACKTEST MATRIX: CRYPTO"));
        assert!(rendered.contains("NO_DATA"));
    }

    #[test]
    fn test_cell_formatting() {
        assert_eq!(CellOutcome::Equity(1_234_567.891).to_string(), "1,234,567.89");
        assert_eq!(CellOutcome::Equity(999.9).to_string(), "999.90");
        assert_eq!(CellOutcome::NoData.to_string(), "NO_DATA");
    }
}
