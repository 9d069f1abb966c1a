//! Concrete Bybit V5 REST implementation of [`ExchangeAdapter`] (spec §6.2).
//!
//! Every private request is signed the way Bybit's V5 API requires: a
//! HMAC-SHA256 over `timestamp + api_key + recv_window + payload`, hex
//! encoded and sent as the `X-BAPI-SIGN` header. `payload` is the raw query
//! string for GET and the raw JSON body for POST.

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::Sha256;
use tracing::{debug, warn};

use super::adapter::{ExchangeAdapter, InstrumentInfoResponse, NewOrderRequest, NewOrderResponse, OpenOrderInfo};
use super::events::TickerPayload;
use crate::core::error::CoreError;
use crate::core::pnl::RawRiskTier;
use crate::core::types::{Direction, Side};

type HmacSha256 = Hmac<Sha256>;

const RECV_WINDOW_MS: &str = "5000";

/// Live Bybit USDT-linear perpetuals REST client.
pub struct BybitAdapter {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    api_secret: String,
}

impl BybitAdapter {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self { http: reqwest::Client::new(), base_url: base_url.into(), api_key: api_key.into(), api_secret: api_secret.into() }
    }

    /// `mainnet` uses Bybit's production endpoint; everything else is
    /// expected to be the testnet host, chosen by the caller's config.
    pub fn from_env() -> Result<Self, CoreError> {
        let base_url = std::env::var("BYBIT_BASE_URL").unwrap_or_else(|_| "https://api.bybit.com".to_string());
        let api_key = std::env::var("BYBIT_API_KEY").map_err(|_| CoreError::ExchangeError("BYBIT_API_KEY not set".into()))?;
        let api_secret = std::env::var("BYBIT_API_SECRET").map_err(|_| CoreError::ExchangeError("BYBIT_API_SECRET not set".into()))?;
        Ok(Self::new(base_url, api_key, api_secret))
    }

    fn sign(&self, timestamp: i64, payload: &str) -> Result<String, CoreError> {
        let message = format!("{timestamp}{}{RECV_WINDOW_MS}{payload}", self.api_key);
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes()).map_err(|e| CoreError::ExchangeError(format!("HMAC key error: {e}")))?;
        mac.update(message.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn auth_headers(&self, payload: &str) -> Result<Vec<(&'static str, String)>, CoreError> {
        let timestamp = Utc::now().timestamp_millis();
        let signature = self.sign(timestamp, payload)?;
        Ok(vec![
            ("X-BAPI-API-KEY", self.api_key.clone()),
            ("X-BAPI-SIGN", signature),
            ("X-BAPI-TIMESTAMP", timestamp.to_string()),
            ("X-BAPI-RECV-WINDOW", RECV_WINDOW_MS.to_string()),
        ])
    }

    async fn get(&self, path: &str, query: &str) -> Result<Value, CoreError> {
        let headers = self.auth_headers(query)?;
        let url = if query.is_empty() { format!("{}{path}", self.base_url) } else { format!("{}{path}?{query}", self.base_url) };
        let mut req = self.http.get(&url);
        for (name, value) in headers {
            req = req.header(name, value);
        }
        let resp = req.send().await.map_err(|e| CoreError::ExchangeError(format!("GET {path} failed: {e}")))?;
        parse_bybit_response(resp).await
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value, CoreError> {
        let body_str = body.to_string();
        let headers = self.auth_headers(&body_str)?;
        let url = format!("{}{path}", self.base_url);
        let mut req = self.http.post(&url).body(body_str).header("Content-Type", "application/json");
        for (name, value) in headers {
            req = req.header(name, value);
        }
        let resp = req.send().await.map_err(|e| CoreError::ExchangeError(format!("POST {path} failed: {e}")))?;
        parse_bybit_response(resp).await
    }

    /// Poll Bybit's public ticker snapshot for one symbol. Unsigned (public
    /// market data), used by the live runner's poll-based feed in place of
    /// a websocket ingestion client.
    pub async fn fetch_ticker(&self, symbol: &str) -> Result<TickerPayload, CoreError> {
        let url = format!("{}/v5/market/tickers?category=linear&symbol={symbol}", self.base_url);
        let resp = self.http.get(&url).send().await.map_err(|e| CoreError::ExchangeError(format!("GET ticker failed: {e}")))?;
        let result = parse_bybit_response(resp).await?;
        let entry = result
            .get("list")
            .and_then(Value::as_array)
            .and_then(|list| list.first())
            .ok_or_else(|| CoreError::ExchangeError(format!("tickers response missing entry for {symbol}")))?;

        let parse = |field: &str| -> Result<Decimal, CoreError> {
            entry
                .get(field)
                .and_then(Value::as_str)
                .ok_or_else(|| CoreError::ExchangeError(format!("ticker missing {field}")))?
                .parse()
                .map_err(|e| CoreError::ExchangeError(format!("parsing ticker field {field}: {e}")))
        };

        let now = Utc::now();
        Ok(TickerPayload {
            symbol: symbol.to_string(),
            exchange_ts: now,
            local_ts: now,
            last_price: parse("lastPrice")?,
            mark_price: parse("markPrice")?,
            bid1_price: parse("bid1Price")?,
            ask1_price: parse("ask1Price")?,
            funding_rate: parse("fundingRate")?,
        })
    }
}

#[derive(Debug, Deserialize)]
struct BybitEnvelope {
    #[serde(rename = "retCode")]
    ret_code: i64,
    #[serde(rename = "retMsg")]
    ret_msg: String,
    result: Value,
}

async fn parse_bybit_response(resp: reqwest::Response) -> Result<Value, CoreError> {
    let status = resp.status();
    let envelope: BybitEnvelope = resp.json().await.map_err(|e| CoreError::ExchangeError(format!("decoding response failed (http {status}): {e}")))?;
    if envelope.ret_code != 0 {
        return Err(CoreError::ExchangeError(format!("bybit error {}: {}", envelope.ret_code, envelope.ret_msg)));
    }
    Ok(envelope.result)
}

fn side_str(side: Side) -> &'static str {
    match side {
        Side::Buy => "Buy",
        Side::Sell => "Sell",
    }
}

#[async_trait]
impl ExchangeAdapter for BybitAdapter {
    async fn place_order(&self, req: NewOrderRequest) -> Result<NewOrderResponse, CoreError> {
        let body = json!({
            "category": "linear",
            "symbol": req.symbol,
            "side": side_str(req.side),
            "orderType": "Limit",
            "qty": req.qty.to_string(),
            "price": req.price.to_string(),
            "orderLinkId": req.client_order_id,
            "reduceOnly": req.reduce_only,
            "timeInForce": "GTC",
        });
        debug!(symbol = %req.symbol, price = %req.price, qty = %req.qty, "placing order");
        let result = self.post("/v5/order/create", &body).await?;
        let order_id = result.get("orderId").and_then(Value::as_str).ok_or_else(|| CoreError::ExchangeError("place_order response missing orderId".into()))?.to_string();
        Ok(NewOrderResponse { order_id, client_order_id: req.client_order_id })
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<(), CoreError> {
        let body = json!({ "category": "linear", "symbol": symbol, "orderId": order_id });
        self.post("/v5/order/cancel", &body).await.map(|_| ())
    }

    async fn get_wallet_balance(&self) -> Result<Decimal, CoreError> {
        let result = self.get("/v5/account/wallet-balance", "accountType=UNIFIED").await?;
        let balance_str = result
            .get("list")
            .and_then(Value::as_array)
            .and_then(|list| list.first())
            .and_then(|acct| acct.get("totalWalletBalance"))
            .and_then(Value::as_str)
            .ok_or_else(|| CoreError::ExchangeError("wallet-balance response missing totalWalletBalance".into()))?;
        balance_str.parse().map_err(|e| CoreError::ExchangeError(format!("parsing wallet balance {balance_str:?}: {e}")))
    }

    async fn get_risk_limit_tiers(&self, symbol: &str) -> Result<Vec<RawRiskTier>, CoreError> {
        let query = format!("category=linear&symbol={symbol}");
        let result = self.get("/v5/market/risk-limit", &query).await?;
        let list = result.get("list").and_then(Value::as_array).ok_or_else(|| CoreError::ExchangeError("risk-limit response missing list".into()))?;

        let mut tiers = Vec::with_capacity(list.len());
        for entry in list {
            let parse_field = |field: &str| -> Result<Decimal, CoreError> {
                entry
                    .get(field)
                    .and_then(Value::as_str)
                    .ok_or_else(|| CoreError::ExchangeError(format!("risk-limit tier missing {field}")))?
                    .parse()
                    .map_err(|e| CoreError::ExchangeError(format!("parsing risk-limit field {field}: {e}")))
            };
            tiers.push(RawRiskTier { max_position_value: parse_field("riskLimitValue")?, mmr_rate: parse_field("maintainMargin")?, deduction: parse_field("mmDeduction")?, imr_rate: parse_field("initialMargin")? });
        }
        Ok(tiers)
    }

    async fn get_instrument_info(&self, symbol: &str) -> Result<InstrumentInfoResponse, CoreError> {
        let query = format!("category=linear&symbol={symbol}");
        let result = self.get("/v5/market/instruments-info", &query).await?;
        let entry = result
            .get("list")
            .and_then(Value::as_array)
            .and_then(|list| list.first())
            .ok_or_else(|| CoreError::ExchangeError(format!("instruments-info response missing entry for {symbol}")))?;

        let lot_size = entry.get("lotSizeFilter").ok_or_else(|| CoreError::ExchangeError("instrument missing lotSizeFilter".into()))?;
        let price_filter = entry.get("priceFilter").ok_or_else(|| CoreError::ExchangeError("instrument missing priceFilter".into()))?;

        let parse_from = |obj: &Value, field: &str| -> Result<Decimal, CoreError> {
            obj.get(field)
                .and_then(Value::as_str)
                .ok_or_else(|| CoreError::ExchangeError(format!("instrument missing {field}")))?
                .parse()
                .map_err(|e| CoreError::ExchangeError(format!("parsing instrument field {field}: {e}")))
        };

        Ok(InstrumentInfoResponse {
            symbol: symbol.to_string(),
            qty_step: parse_from(lot_size, "qtyStep")?,
            tick_size: parse_from(price_filter, "tickSize")?,
            min_qty: parse_from(lot_size, "minOrderQty")?,
            max_qty: parse_from(lot_size, "maxOrderQty")?,
        })
    }

    /// Bybit's hedge-mode `positionIdx`: `1` is the long side, `2` is the
    /// short side, `0` is one-way mode (treated as long, since this crate
    /// always trades hedge mode per §1's grid engine design).
    async fn get_open_orders(&self, symbol: &str) -> Result<Vec<OpenOrderInfo>, CoreError> {
        let query = format!("category=linear&symbol={symbol}&openOnly=0&limit=50");
        let result = self.get("/v5/order/realtime", &query).await?;
        let list = result.get("list").and_then(Value::as_array).ok_or_else(|| CoreError::ExchangeError("open-orders response missing list".into()))?;

        let mut orders = Vec::with_capacity(list.len());
        for entry in list {
            let get_str = |field: &str| -> Result<&str, CoreError> {
                entry.get(field).and_then(Value::as_str).ok_or_else(|| CoreError::ExchangeError(format!("open order missing {field}")))
            };
            let parse_dec = |field: &str| -> Result<Decimal, CoreError> { get_str(field)?.parse().map_err(|e| CoreError::ExchangeError(format!("parsing open order field {field}: {e}"))) };
            let side = match get_str("side")? {
                "Buy" => Side::Buy,
                "Sell" => Side::Sell,
                other => return Err(CoreError::ExchangeError(format!("unrecognized order side {other}"))),
            };
            let position_idx = entry.get("positionIdx").and_then(Value::as_i64).unwrap_or(0);
            let direction = if position_idx == 2 { Direction::Short } else { Direction::Long };
            orders.push(OpenOrderInfo {
                order_id: get_str("orderId")?.to_string(),
                client_order_id: get_str("orderLinkId")?.to_string(),
                symbol: symbol.to_string(),
                side,
                price: parse_dec("price")?,
                qty: parse_dec("qty")?,
                direction,
            });
        }
        Ok(orders)
    }
}

/// Logs a warning rather than failing the run when the wallet-balance poll
/// fails transiently; callers decide whether to retry or fall back to the
/// last known balance.
pub async fn poll_wallet_balance_or_warn(adapter: &dyn ExchangeAdapter, fallback: Decimal) -> Decimal {
    match adapter.get_wallet_balance().await {
        Ok(balance) => balance,
        Err(e) => {
            warn!(error = %e, "wallet balance poll failed, using last known balance");
            fallback
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_deterministic_for_fixed_timestamp() {
        let adapter = BybitAdapter::new("https://api-testnet.bybit.com", "key123", "secret456");
        let sig_a = adapter.sign(1_700_000_000_000, "category=linear&symbol=BTCUSDT").unwrap();
        let sig_b = adapter.sign(1_700_000_000_000, "category=linear&symbol=BTCUSDT").unwrap();
        assert_eq!(sig_a, sig_b);
        assert_eq!(sig_a.len(), 64);
    }

    #[test]
    fn signature_changes_with_payload() {
        let adapter = BybitAdapter::new("https://api-testnet.bybit.com", "key123", "secret456");
        let sig_a = adapter.sign(1_700_000_000_000, "symbol=BTCUSDT").unwrap();
        let sig_b = adapter.sign(1_700_000_000_000, "symbol=ETHUSDT").unwrap();
        assert_ne!(sig_a, sig_b);
    }
}
