//! Performance summary over a backtest's equity history.

use statrs::statistics::Statistics;

use crate::engine::TickRecord;

/// Periods per year used to annualize tick-over-tick ratios. Daily bars
/// assumed; finer timeframes overstate the ratios but stay comparable
/// across cells.
const ANNUALIZATION_PERIODS: f64 = 252.0;

/// Risk and return metrics derived from one symbol's equity history.
#[derive(Debug, Clone)]
pub struct PerformanceSummary {
    pub initial_equity: f64,
    pub final_equity: f64,
    pub total_return_pct: f64,
    pub max_drawdown_pct: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub ticks: usize,
    pub trades: usize,
}

impl PerformanceSummary {
    pub fn from_history(history: &[TickRecord], trades: usize) -> Option<Self> {
        let first = history.first()?;
        let last = history.last()?;

        let returns: Vec<f64> = history
            .windows(2)
            .filter_map(|w| {
                if w[0].equity > 0.0 {
                    Some((w[1].equity - w[0].equity) / w[0].equity)
                } else {
                    None
                }
            })
            .collect();

        let (sharpe, sortino) = risk_ratios(&returns);

        let mut peak = f64::MIN;
        let mut max_drawdown = 0.0_f64;
        for record in history {
            peak = peak.max(record.equity);
            if peak > 0.0 {
                max_drawdown = max_drawdown.max((peak - record.equity) / peak);
            }
        }

        let total_return_pct = if first.equity > 0.0 {
            (last.equity - first.equity) / first.equity
        } else {
            0.0
        };

        Some(Self {
            initial_equity: first.equity,
            final_equity: last.equity,
            total_return_pct,
            max_drawdown_pct: max_drawdown,
            sharpe_ratio: sharpe,
            sortino_ratio: sortino,
            ticks: history.len(),
            trades,
        })
    }
}

fn risk_ratios(returns: &[f64]) -> (f64, f64) {
    if returns.is_empty() {
        return (0.0, 0.0);
    }

    let mean = returns.mean();
    let std_dev = returns.std_dev();

    let sharpe = if std_dev > 0.0 {
        (mean / std_dev) * ANNUALIZATION_PERIODS.sqrt()
    } else {
        0.0
    };

    let downside: Vec<f64> = returns.iter().filter(|&&r| r < 0.0).copied().collect();
    let sortino = if !downside.is_empty() {
        let downside_dev =
            (downside.iter().map(|r| r.powi(2)).sum::<f64>() / downside.len() as f64).sqrt();
        if downside_dev > 0.0 {
            (mean / downside_dev) * ANNUALIZATION_PERIODS.sqrt()
        } else {
            0.0
        }
    } else {
        0.0
    };

    (sharpe, sortino)
}

impl std::fmt::Display for PerformanceSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n{:=^60}", " PERFORMANCE ")?;
        writeln!(f)?;
        writeln!(f, "--- Capital ---")?;
        writeln!(f, "Initial:      ${:.2}", self.initial_equity)?;
        writeln!(f, "Final:        ${:.2}", self.final_equity)?;
        writeln!(f, "Return:       {:.2}%", self.total_return_pct * 100.0)?;
        writeln!(f)?;
        writeln!(f, "--- Activity ---")?;
        writeln!(f, "Ticks:        {}", self.ticks)?;
        writeln!(f, "Trades:       {}", self.trades)?;
        writeln!(f)?;
        writeln!(f, "--- Risk ---")?;
        writeln!(f, "Max Drawdown: {:.2}%", self.max_drawdown_pct * 100.0)?;
        writeln!(f, "Sharpe Ratio: {:.2}", self.sharpe_ratio)?;
        writeln!(f, "Sortino Ratio: {:.2}", self.sortino_ratio)?;
        writeln!(f, "{:=^60}", "")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn history(equities: &[f64]) -> Vec<TickRecord> {
        equities
            .iter()
            .enumerate()
            .map(|(i, &equity)| TickRecord {
                timestamp: Utc.with_ymd_and_hms(2024, 1, 1 + i as u32, 0, 0, 0).unwrap(),
                cash: equity,
                equity,
                price: 100.0,
            })
            .collect()
    }

    #[test]
    fn test_empty_history() {
        assert!(PerformanceSummary::from_history(&[], 0).is_none());
    }

    #[test]
    fn test_monotonic_rise() {
        let summary =
            PerformanceSummary::from_history(&history(&[100.0, 110.0, 121.0]), 2).unwrap();

        assert!((summary.total_return_pct - 0.21).abs() < 1e-12);
        assert_eq!(summary.max_drawdown_pct, 0.0);
        assert!(summary.sharpe_ratio > 0.0);
        // No losing ticks, so there is no downside deviation to divide by.
        assert_eq!(summary.sortino_ratio, 0.0);
    }

    #[test]
    fn test_drawdown_from_peak() {
        let summary =
            PerformanceSummary::from_history(&history(&[100.0, 200.0, 100.0, 150.0]), 4).unwrap();

        assert!((summary.max_drawdown_pct - 0.5).abs() < 1e-12);
        assert!(summary.sortino_ratio != 0.0);
    }

    #[test]
    fn test_flat_equity_has_zero_ratios() {
        let summary =
            PerformanceSummary::from_history(&history(&[100.0, 100.0, 100.0]), 0).unwrap();
        assert_eq!(summary.sharpe_ratio, 0.0);
        assert_eq!(summary.total_return_pct, 0.0);
    }
}
