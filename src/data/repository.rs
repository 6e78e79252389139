//! Candle persistence.
//!
//! One table per asset class and timeframe (`stock_candles_1d`,
//! `crypto_candles_1h`, ...) keyed by `(symbol, ts)`, plus an `assets`
//! table naming the symbols worth evaluating.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

use crate::models::{AssetClass, Bar};

use super::Timeframe;

const TIMEFRAMES: [Timeframe; 4] = [
    Timeframe::Day1,
    Timeframe::Hour1,
    Timeframe::Min5,
    Timeframe::Min1,
];

fn table_name(asset_class: AssetClass, timeframe: Timeframe) -> String {
    format!(
        "{}_candles_{}",
        asset_class.key(),
        timeframe.key().to_lowercase()
    )
}

#[derive(Debug, sqlx::FromRow)]
struct BarRow {
    symbol: String,
    ts: DateTime<Utc>,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

impl From<BarRow> for Bar {
    fn from(row: BarRow) -> Self {
        Bar {
            symbol: row.symbol,
            ts: row.ts,
            open: row.open,
            high: row.high,
            low: row.low,
            close: row.close,
            volume: row.volume,
        }
    }
}

/// Candle store over SQLite.
pub struct BarRepository {
    pool: SqlitePool,
}

impl BarRepository {
    /// Open the store and run migrations.
    pub async fn new(database_url: &str) -> Result<Self> {
        // One connection: SQLite serializes writers anyway, and it keeps
        // in-memory databases coherent across queries.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(database_url)
            .await
            .context("Failed to connect to database")?;

        let repo = Self { pool };
        repo.run_migrations().await?;

        Ok(repo)
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS assets (
                symbol TEXT PRIMARY KEY,
                asset_class TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 1,
                added_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        for asset_class in [AssetClass::UsEquity, AssetClass::Crypto] {
            for timeframe in TIMEFRAMES {
                let sql = format!(
                    r#"
                    CREATE TABLE IF NOT EXISTS {} (
                        symbol TEXT NOT NULL,
                        ts TEXT NOT NULL,
                        open REAL NOT NULL,
                        high REAL NOT NULL,
                        low REAL NOT NULL,
                        close REAL NOT NULL,
                        volume REAL NOT NULL DEFAULT 0,
                        PRIMARY KEY (symbol, ts)
                    )
                    "#,
                    table_name(asset_class, timeframe)
                );
                sqlx::query(&sql).execute(&self.pool).await?;
            }
        }

        Ok(())
    }

    /// Register a symbol for evaluation.
    pub async fn upsert_asset(&self, symbol: &str, active: bool) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO assets (symbol, asset_class, active)
            VALUES (?, ?, ?)
            ON CONFLICT (symbol) DO UPDATE SET active = excluded.active
            "#,
        )
        .bind(symbol)
        .bind(AssetClass::from_symbol(symbol).key())
        .bind(active)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Symbols flagged active, optionally narrowed to one asset class.
    pub async fn get_active_symbols(
        &self,
        asset_class: Option<AssetClass>,
    ) -> Result<Vec<String>> {
        let symbols = match asset_class {
            Some(class) => {
                sqlx::query_scalar(
                    "SELECT symbol FROM assets WHERE active = 1 AND asset_class = ? ORDER BY symbol",
                )
                .bind(class.key())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_scalar("SELECT symbol FROM assets WHERE active = 1 ORDER BY symbol")
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        Ok(symbols)
    }

    /// Insert or refresh a batch of candles for one symbol/timeframe.
    pub async fn upsert_bars(&self, timeframe: Timeframe, bars: &[Bar]) -> Result<()> {
        for bar in bars {
            let table = table_name(AssetClass::from_symbol(&bar.symbol), timeframe);
            let sql = format!(
                r#"
                INSERT INTO {table} (symbol, ts, open, high, low, close, volume)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT (symbol, ts) DO UPDATE SET
                    open = excluded.open, high = excluded.high, low = excluded.low,
                    close = excluded.close, volume = excluded.volume
                "#
            );
            sqlx::query(&sql)
                .bind(&bar.symbol)
                .bind(bar.ts)
                .bind(bar.open)
                .bind(bar.high)
                .bind(bar.low)
                .bind(bar.close)
                .bind(bar.volume)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    /// Candle history for a symbol in ascending timestamp order, clipped
    /// to `[start, end]` when bounds are given.
    pub async fn fetch_history(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<Bar>> {
        let table = table_name(AssetClass::from_symbol(symbol), timeframe);
        let mut sql = format!("SELECT * FROM {table} WHERE symbol = ?");
        if start.is_some() {
            sql.push_str(" AND ts >= ?");
        }
        if end.is_some() {
            sql.push_str(" AND ts <= ?");
        }
        sql.push_str(" ORDER BY ts ASC");

        let mut query = sqlx::query_as::<_, BarRow>(&sql).bind(symbol);
        if let Some(start) = start {
            query = query.bind(start);
        }
        if let Some(end) = end {
            query = query.bind(end);
        }

        let rows = query
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("Failed to fetch {timeframe} history for {symbol}"))?;

        Ok(rows.into_iter().map(Bar::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    async fn repo() -> BarRepository {
        BarRepository::new("sqlite::memory:").await.unwrap()
    }

    fn bar(symbol: &str, day: u32, close: f64) -> Bar {
        Bar::new(
            symbol,
            Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap(),
            close,
        )
    }

    #[tokio::test]
    async fn test_upsert_and_fetch_ordered() {
        let repo = repo().await;

        // Inserted out of order, read back ascending.
        repo.upsert_bars(
            Timeframe::Day1,
            &[bar("AAPL", 3, 153.0), bar("AAPL", 1, 151.0), bar("AAPL", 2, 152.0)],
        )
        .await
        .unwrap();

        let bars = repo
            .fetch_history("AAPL", Timeframe::Day1, None, None)
            .await
            .unwrap();
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        assert_eq!(closes, vec![151.0, 152.0, 153.0]);
    }

    #[tokio::test]
    async fn test_fetch_window_and_table_split() {
        let repo = repo().await;
        repo.upsert_bars(
            Timeframe::Day1,
            &[
                bar("AAPL", 1, 151.0),
                bar("AAPL", 2, 152.0),
                bar("AAPL", 3, 153.0),
                bar("BTC/USD", 2, 50_000.0),
            ],
        )
        .await
        .unwrap();

        let start = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let bars = repo
            .fetch_history("AAPL", Timeframe::Day1, Some(start), None)
            .await
            .unwrap();
        assert_eq!(bars.len(), 2);

        // Crypto rows live in their own table and never bleed into equities.
        let btc = repo
            .fetch_history("BTC/USD", Timeframe::Day1, None, None)
            .await
            .unwrap();
        assert_eq!(btc.len(), 1);
        assert_eq!(btc[0].close, 50_000.0);
    }

    #[tokio::test]
    async fn test_upsert_overwrites_same_timestamp() {
        let repo = repo().await;
        repo.upsert_bars(Timeframe::Hour1, &[bar("AAPL", 1, 151.0)])
            .await
            .unwrap();
        repo.upsert_bars(Timeframe::Hour1, &[bar("AAPL", 1, 155.0)])
            .await
            .unwrap();

        let bars = repo
            .fetch_history("AAPL", Timeframe::Hour1, None, None)
            .await
            .unwrap();
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].close, 155.0);
    }

    #[tokio::test]
    async fn test_active_symbols() {
        let repo = repo().await;
        repo.upsert_asset("AAPL", true).await.unwrap();
        repo.upsert_asset("BTC/USD", true).await.unwrap();
        repo.upsert_asset("MSFT", false).await.unwrap();

        let all = repo.get_active_symbols(None).await.unwrap();
        assert_eq!(all, vec!["AAPL".to_string(), "BTC/USD".to_string()]);

        let crypto = repo
            .get_active_symbols(Some(AssetClass::Crypto))
            .await
            .unwrap();
        assert_eq!(crypto, vec!["BTC/USD".to_string()]);
    }
}
