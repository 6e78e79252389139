//! Live broker backend: a thin proxy over the Alpaca trading REST API.
//!
//! No accounting happens here. Requests are forwarded, responses are decoded
//! from Alpaca's string-encoded numerics into the local models, and a missing
//! position (HTTP 404) becomes the same canonical flat record the simulator
//! returns.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{header, Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::models::{
    Account, AssetClass, Clock, Order, OrderRequest, OrderStatus, OrderType, PositionView,
    StatusFilter, TimeInForce,
};

use super::{Broker, BrokerError};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// REST client for an Alpaca trading account (paper or live, depending on
/// the base URL).
pub struct AlpacaBroker {
    client: Client,
    base_url: String,
}

fn parse_num(field: &str, value: &str) -> Result<f64, BrokerError> {
    value
        .parse::<f64>()
        .map_err(|_| BrokerError::Parse(format!("non-numeric {field}: {value:?}")))
}

fn parse_opt_num(field: &str, value: &Option<String>) -> Result<Option<f64>, BrokerError> {
    value.as_deref().map(|v| parse_num(field, v)).transpose()
}

fn parse_status(status: &str) -> Result<OrderStatus, BrokerError> {
    // Alpaca has a wider status vocabulary than the scaffold tracks; fold
    // the working states into `accepted` and the dead ones into `expired`.
    match status {
        "new" => Ok(OrderStatus::New),
        "accepted" | "partially_filled" => Ok(OrderStatus::Accepted),
        "pending_new" | "pending_cancel" | "pending_replace" => Ok(OrderStatus::PendingNew),
        "filled" => Ok(OrderStatus::Filled),
        "canceled" | "replaced" => Ok(OrderStatus::Canceled),
        "expired" | "rejected" | "done_for_day" | "stopped" | "suspended" => {
            Ok(OrderStatus::Expired)
        }
        other => Err(BrokerError::Parse(format!("unknown order status: {other:?}"))),
    }
}

#[derive(Debug, Deserialize)]
struct ApiAccount {
    cash: String,
    equity: String,
    buying_power: String,
    long_market_value: String,
    currency: String,
}

#[derive(Debug, Deserialize)]
struct ApiClock {
    is_open: bool,
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct ApiPosition {
    symbol: String,
    asset_class: AssetClass,
    qty: String,
    avg_entry_price: String,
    current_price: Option<String>,
    market_value: Option<String>,
    cost_basis: String,
    unrealized_pl: Option<String>,
    unrealized_plpc: Option<String>,
}

impl ApiPosition {
    fn into_view(self) -> Result<PositionView, BrokerError> {
        Ok(PositionView {
            symbol: self.symbol,
            asset_class: self.asset_class,
            qty: parse_num("qty", &self.qty)?,
            avg_entry_price: parse_num("avg_entry_price", &self.avg_entry_price)?,
            current_price: parse_opt_num("current_price", &self.current_price)?.unwrap_or(0.0),
            market_value: parse_opt_num("market_value", &self.market_value)?.unwrap_or(0.0),
            cost_basis: parse_num("cost_basis", &self.cost_basis)?,
            unrealized_pl: parse_opt_num("unrealized_pl", &self.unrealized_pl)?.unwrap_or(0.0),
            unrealized_plpc: parse_opt_num("unrealized_plpc", &self.unrealized_plpc)?
                .unwrap_or(0.0),
        })
    }
}

#[derive(Debug, Deserialize)]
struct ApiOrder {
    id: String,
    client_order_id: String,
    symbol: String,
    side: String,
    #[serde(rename = "type")]
    order_type: String,
    time_in_force: String,
    qty: String,
    filled_qty: String,
    limit_price: Option<String>,
    filled_avg_price: Option<String>,
    status: String,
    created_at: DateTime<Utc>,
    filled_at: Option<DateTime<Utc>>,
}

impl ApiOrder {
    fn into_order(self) -> Result<Order, BrokerError> {
        let side = match self.side.as_str() {
            "buy" => crate::models::OrderSide::Buy,
            "sell" => crate::models::OrderSide::Sell,
            other => return Err(BrokerError::Parse(format!("unknown order side: {other:?}"))),
        };
        let order_type = match self.order_type.as_str() {
            "market" => OrderType::Market,
            "limit" => OrderType::Limit,
            other => return Err(BrokerError::Parse(format!("unknown order type: {other:?}"))),
        };
        let time_in_force = match self.time_in_force.as_str() {
            "day" => TimeInForce::Day,
            "gtc" => TimeInForce::Gtc,
            "ioc" => TimeInForce::Ioc,
            other => {
                return Err(BrokerError::Parse(format!(
                    "unknown time in force: {other:?}"
                )))
            }
        };

        Ok(Order {
            asset_class: AssetClass::from_symbol(&self.symbol),
            side,
            order_type,
            time_in_force,
            qty: parse_num("qty", &self.qty)?,
            filled_qty: parse_num("filled_qty", &self.filled_qty)?,
            limit_price: parse_opt_num("limit_price", &self.limit_price)?,
            filled_avg_price: parse_opt_num("filled_avg_price", &self.filled_avg_price)?,
            status: parse_status(&self.status)?,
            // Venue fees are not reported on the order object.
            fee_cash: 0.0,
            id: self.id,
            client_order_id: self.client_order_id,
            symbol: self.symbol,
            created_at: self.created_at,
            filled_at: self.filled_at,
        })
    }
}

/// Per-symbol result row returned by the bulk liquidation endpoint.
#[derive(Debug, Deserialize)]
struct ApiCloseResult {
    body: Option<ApiOrder>,
}

impl AlpacaBroker {
    pub fn new(base_url: &str, api_key: &str, api_secret: &str) -> Result<Self, BrokerError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            "APCA-API-KEY-ID",
            header::HeaderValue::from_str(api_key)
                .map_err(|_| BrokerError::Parse("invalid api key".to_string()))?,
        );
        headers.insert(
            "APCA-API-SECRET-KEY",
            header::HeaderValue::from_str(api_secret)
                .map_err(|_| BrokerError::Parse("invalid api secret".to_string()))?,
        );

        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Crypto pair symbols drop the slash in URL path segments.
    fn path_symbol(symbol: &str) -> String {
        symbol.replace('/', "")
    }

    async fn check(response: Response) -> Result<Response, BrokerError> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(BrokerError::Api {
                status: status.as_u16(),
                body,
            })
        }
    }
}

impl Broker for AlpacaBroker {
    async fn get_account(&self) -> Result<Account, BrokerError> {
        let response = self.client.get(self.url("/v2/account")).send().await?;
        let api: ApiAccount = Self::check(response).await?.json().await?;

        let cash = parse_num("cash", &api.cash)?;
        Ok(Account {
            cash,
            equity: parse_num("equity", &api.equity)?,
            buying_power: parse_num("buying_power", &api.buying_power)?,
            long_market_value: parse_num("long_market_value", &api.long_market_value)?,
            // The venue does not echo the opening balance back.
            initial_cash: cash,
            currency: api.currency,
        })
    }

    async fn get_clock(&self) -> Result<Clock, BrokerError> {
        let response = self.client.get(self.url("/v2/clock")).send().await?;
        let api: ApiClock = Self::check(response).await?.json().await?;
        Ok(Clock {
            is_open: api.is_open,
            timestamp: api.timestamp,
        })
    }

    async fn get_all_positions(&self) -> Result<Vec<PositionView>, BrokerError> {
        let response = self.client.get(self.url("/v2/positions")).send().await?;
        let api: Vec<ApiPosition> = Self::check(response).await?.json().await?;
        api.into_iter().map(ApiPosition::into_view).collect()
    }

    async fn get_open_position(&self, symbol: &str) -> Result<PositionView, BrokerError> {
        let url = self.url(&format!("/v2/positions/{}", Self::path_symbol(symbol)));
        let response = self.client.get(url).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(PositionView::flat(symbol));
        }

        let api: ApiPosition = Self::check(response).await?.json().await?;
        api.into_view()
    }

    async fn close_all_positions(
        &mut self,
        cancel_orders: bool,
    ) -> Result<Vec<Order>, BrokerError> {
        let url = self.url(&format!(
            "/v2/positions?cancel_orders={}",
            if cancel_orders { "true" } else { "false" }
        ));
        let response = self.client.delete(url).send().await?;

        // 207 Multi-Status is the normal bulk response.
        let status = response.status();
        if !status.is_success() && status != StatusCode::MULTI_STATUS {
            let body = response.text().await.unwrap_or_default();
            return Err(BrokerError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let results: Vec<ApiCloseResult> = response.json().await?;
        results
            .into_iter()
            .filter_map(|r| r.body)
            .map(ApiOrder::into_order)
            .collect()
    }

    async fn close_position(&mut self, symbol: &str) -> Result<Option<Order>, BrokerError> {
        let url = self.url(&format!("/v2/positions/{}", Self::path_symbol(symbol)));
        let response = self.client.delete(url).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let api: ApiOrder = Self::check(response).await?.json().await?;
        Ok(Some(api.into_order()?))
    }

    async fn submit_order(&mut self, request: OrderRequest) -> Result<Order, BrokerError> {
        let mut body = json!({
            "symbol": request.symbol,
            "qty": request.qty.to_string(),
            "side": request.side.as_str(),
            "type": request.order_type.as_str(),
            "time_in_force": request.time_in_force.as_str(),
        });
        if let Some(limit_price) = request.limit_price {
            body["limit_price"] = json!(limit_price.to_string());
        }

        debug!(symbol = %request.symbol, side = request.side.as_str(), "Submitting order");

        let response = self
            .client
            .post(self.url("/v2/orders"))
            .json(&body)
            .send()
            .await?;
        let api: ApiOrder = Self::check(response).await?.json().await?;
        api.into_order()
    }

    async fn get_orders(
        &self,
        status: StatusFilter,
        limit: usize,
    ) -> Result<Vec<Order>, BrokerError> {
        let url = self.url(&format!(
            "/v2/orders?status={}&limit={}&direction=desc",
            status.as_str(),
            limit
        ));
        let response = self.client.get(url).send().await?;
        let api: Vec<ApiOrder> = Self::check(response).await?.json().await?;
        api.into_iter().map(ApiOrder::into_order).collect()
    }

    async fn get_order_by_id(&self, order_id: &str) -> Result<Order, BrokerError> {
        let url = self.url(&format!("/v2/orders/{order_id}"));
        let response = self.client.get(url).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(BrokerError::OrderNotFound(order_id.to_string()));
        }

        let api: ApiOrder = Self::check(response).await?.json().await?;
        api.into_order()
    }

    async fn cancel_orders(&mut self) -> Result<usize, BrokerError> {
        #[derive(Debug, Deserialize)]
        struct CancelResult {
            #[allow(dead_code)]
            id: String,
        }

        let response = self.client.delete(self.url("/v2/orders")).send().await?;
        let status = response.status();
        if !status.is_success() && status != StatusCode::MULTI_STATUS {
            let body = response.text().await.unwrap_or_default();
            return Err(BrokerError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let results: Vec<CancelResult> = response.json().await?;
        Ok(results.len())
    }

    async fn cancel_order_by_id(&mut self, order_id: &str) -> Result<(), BrokerError> {
        let url = self.url(&format!("/v2/orders/{order_id}"));
        let response = self.client.delete(url).send().await?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(BrokerError::OrderNotFound(order_id.to_string())),
            StatusCode::UNPROCESSABLE_ENTITY => Err(BrokerError::InvalidCancelState {
                id: order_id.to_string(),
                status: "not cancelable".to_string(),
            }),
            _ => {
                Self::check(response).await?;
                Ok(())
            }
        }
    }
}
