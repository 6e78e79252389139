//! Live bar feeds for the streaming evaluation loop.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reqwest::{header, Client};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::models::{AssetClass, Bar};

/// Source of live bars. Implementations push completed bars into the
/// returned channel until stopped or dropped; closing the channel ends the
/// consuming loop.
#[allow(async_fn_in_trait)]
pub trait BarStream {
    async fn start(&mut self) -> Result<mpsc::Receiver<Bar>>;

    async fn stop(&mut self);
}

/// A feed backed by a plain channel. The caller keeps the sender and
/// injects bars directly; dropping the sender ends the stream.
pub struct ChannelFeed {
    rx: Option<mpsc::Receiver<Bar>>,
}

impl ChannelFeed {
    pub fn new(buffer: usize) -> (Self, mpsc::Sender<Bar>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self { rx: Some(rx) }, tx)
    }
}

impl BarStream for ChannelFeed {
    async fn start(&mut self) -> Result<mpsc::Receiver<Bar>> {
        self.rx.take().context("Feed already started")
    }

    async fn stop(&mut self) {}
}

#[derive(Debug, Deserialize)]
struct ApiBar {
    t: DateTime<Utc>,
    o: f64,
    h: f64,
    l: f64,
    c: f64,
    v: f64,
}

#[derive(Debug, Deserialize)]
struct LatestBars {
    bars: HashMap<String, ApiBar>,
}

/// Only forward a bar when its timestamp advances past the last one seen
/// for that symbol. Latest-bar polling re-serves the same bar until the
/// next interval closes.
fn is_new_bar(last_seen: &mut HashMap<String, DateTime<Utc>>, bar: &Bar) -> bool {
    match last_seen.get(&bar.symbol) {
        Some(prev) if *prev >= bar.ts => false,
        _ => {
            last_seen.insert(bar.symbol.clone(), bar.ts);
            true
        }
    }
}

/// Polls Alpaca's latest-bar endpoints on a fixed interval and forwards
/// each newly completed bar exactly once.
pub struct AlpacaBarPoller {
    client: Client,
    data_url: String,
    symbols: Vec<String>,
    poll_interval: Duration,
    running: Arc<AtomicBool>,
}

impl AlpacaBarPoller {
    pub fn new(
        data_url: &str,
        api_key: &str,
        api_secret: &str,
        symbols: Vec<String>,
        poll_interval: Duration,
    ) -> Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            "APCA-API-KEY-ID",
            header::HeaderValue::from_str(api_key).context("Invalid api key")?,
        );
        headers.insert(
            "APCA-API-SECRET-KEY",
            header::HeaderValue::from_str(api_secret).context("Invalid api secret")?,
        );

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .default_headers(headers)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            data_url: data_url.trim_end_matches('/').to_string(),
            symbols,
            poll_interval,
            running: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Latest-bar URL for one asset class bucket; crypto and stocks live
    /// on different endpoint families.
    fn latest_bars_url(&self, asset_class: AssetClass, symbols: &[String]) -> String {
        let joined = symbols.join(",");
        match asset_class {
            AssetClass::Crypto => format!(
                "{}/v1beta3/crypto/us/latest/bars?symbols={joined}",
                self.data_url
            ),
            AssetClass::UsEquity => format!(
                "{}/v2/stocks/bars/latest?symbols={joined}",
                self.data_url
            ),
        }
    }

    async fn fetch_latest(client: &Client, url: &str) -> Result<Vec<Bar>> {
        let response = client.get(url).send().await?.error_for_status()?;
        let latest: LatestBars = response.json().await?;

        Ok(latest
            .bars
            .into_iter()
            .map(|(symbol, b)| Bar {
                symbol,
                ts: b.t,
                open: b.o,
                high: b.h,
                low: b.l,
                close: b.c,
                volume: b.v,
            })
            .collect())
    }
}

impl BarStream for AlpacaBarPoller {
    async fn start(&mut self) -> Result<mpsc::Receiver<Bar>> {
        let (tx, rx) = mpsc::channel(256);

        let (crypto, stocks): (Vec<String>, Vec<String>) = self
            .symbols
            .iter()
            .cloned()
            .partition(|s| AssetClass::from_symbol(s).is_crypto());

        let mut urls = Vec::new();
        if !crypto.is_empty() {
            urls.push(self.latest_bars_url(AssetClass::Crypto, &crypto));
        }
        if !stocks.is_empty() {
            urls.push(self.latest_bars_url(AssetClass::UsEquity, &stocks));
        }

        self.running.store(true, Ordering::SeqCst);
        let running = self.running.clone();
        let client = self.client.clone();
        let poll_interval = self.poll_interval;

        tokio::spawn(async move {
            let mut last_seen: HashMap<String, DateTime<Utc>> = HashMap::new();

            while running.load(Ordering::SeqCst) {
                for url in &urls {
                    match Self::fetch_latest(&client, url).await {
                        Ok(bars) => {
                            for bar in bars {
                                if is_new_bar(&mut last_seen, &bar) {
                                    debug!(symbol = %bar.symbol, close = bar.close, "New bar");
                                    if tx.send(bar).await.is_err() {
                                        // Consumer hung up.
                                        return;
                                    }
                                }
                            }
                        }
                        Err(e) => warn!(error = %e, "Bar poll failed"),
                    }
                }

                tokio::time::sleep(poll_interval).await;
            }
        });

        Ok(rx)
    }

    async fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}
