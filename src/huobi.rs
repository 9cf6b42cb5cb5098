//! Huobi Korea: the USDT/KRW conversion rate stream plus the signed REST
//! client used for the relay legs (KRW -> USDT -> EOS -> global venue).

use std::io::Read;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use flate2::read::GzDecoder;
use futures_util::{SinkExt, StreamExt};
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;
use tracing::{debug, info, warn};

use crate::strategy::price_table::PriceTable;
use crate::strategy::types::{DepositAddress, Venue};
use crate::strategy::venues::RelayVenue;
use crate::DynError;

type HmacSha256 = Hmac<Sha256>;

const HOST: &str = "krapi-aws.huobi.pro";
const WS_URL: &str = "wss://krapi-aws.huobi.pro/ws";

pub struct HuobiRateConnector;

impl HuobiRateConnector {
    /// Stream USDT/KRW trades into the price table under the `usdt` key.
    /// Frames arrive gzip-compressed; pings must be echoed or the venue
    /// drops the connection. Returns when the connection closes.
    pub async fn run(table: Arc<PriceTable>) -> Result<(), DynError> {
        let (ws, _) = tokio_tungstenite::connect_async(WS_URL).await?;
        info!("huobi rate stream connected");
        let (mut write, mut read) = ws.split();

        let subscribe = json!({ "sub": "market.usdtkrw.trade.detail", "id": "usdtkrw" });
        write
            .send(tokio_tungstenite::tungstenite::Message::Text(
                subscribe.to_string(),
            ))
            .await?;

        while let Some(msg) = read.next().await {
            let msg = msg?;
            let bytes = match msg {
                tokio_tungstenite::tungstenite::Message::Binary(bytes) => bytes,
                tokio_tungstenite::tungstenite::Message::Close(frame) => {
                    warn!(?frame, "huobi rate stream closed");
                    break;
                }
                _ => continue,
            };

            let mut text = String::new();
            GzDecoder::new(&bytes[..]).read_to_string(&mut text)?;
            let frame: Value = match serde_json::from_str(&text) {
                Ok(frame) => frame,
                Err(_) => continue,
            };

            if let Some(nonce) = frame.get("ping").and_then(Value::as_i64) {
                let pong = json!({ "pong": nonce });
                write
                    .send(tokio_tungstenite::tungstenite::Message::Text(
                        pong.to_string(),
                    ))
                    .await?;
                continue;
            }

            let price = frame
                .get("tick")
                .and_then(|t| t.get("data"))
                .and_then(Value::as_array)
                .and_then(|trades| trades.first())
                .and_then(|t| t.get("price"))
                .and_then(Value::as_f64);
            if let Some(price) = price {
                table.set(Venue::Huobi, "usdt", price);
            }
        }
        Ok(())
    }
}

/// One-shot REST read of the latest USDT/KRW trade, used to seed the price
/// table before the websocket warms up.
pub async fn latest_trade_price(client: &reqwest::Client, symbol: &str) -> Result<f64, DynError> {
    let url = format!("https://{}/market/trade?symbol={}", HOST, symbol);
    let response: Value = client.get(url).send().await?.json().await?;
    if response.get("status").and_then(Value::as_str) != Some("ok") {
        return Err(format!("huobi market trade for {} failed: {}", symbol, response).into());
    }
    response
        .get("tick")
        .and_then(|t| t.get("data"))
        .and_then(Value::as_array)
        .and_then(|trades| trades.first())
        .and_then(|t| t.get("price"))
        .and_then(Value::as_f64)
        .ok_or_else(|| format!("huobi market trade for {} unreadable", symbol).into())
}

pub struct HuobiClient {
    client: reqwest::Client,
    access_key: String,
    secret_key: String,
    account_id: u64,
}

impl HuobiClient {
    pub fn new(
        client: reqwest::Client,
        access_key: String,
        secret_key: String,
        account_id: u64,
    ) -> Self {
        Self {
            client,
            access_key,
            secret_key,
            account_id,
        }
    }

    /// SignatureVersion 2: HMAC-SHA256 over "METHOD\nhost\npath\nquery" with
    /// the query parameters sorted by key, base64 encoded.
    fn signed_url(&self, method: &str, path: &str, extra: &[(&str, String)]) -> String {
        let timestamp = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S").to_string();
        let mut params: Vec<(String, String)> = vec![
            ("AccessKeyId".to_string(), self.access_key.clone()),
            ("SignatureMethod".to_string(), "HmacSHA256".to_string()),
            ("SignatureVersion".to_string(), "2".to_string()),
            ("Timestamp".to_string(), timestamp),
        ];
        for (k, v) in extra {
            params.push((k.to_string(), v.clone()));
        }
        params.sort_by(|a, b| a.0.cmp(&b.0));

        let query = params
            .iter()
            .map(|(k, v)| format!("{}={}", percent_encode(k), percent_encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        let payload = format!("{}\n{}\n{}\n{}", method, HOST, path, query);
        let mut mac = HmacSha256::new_from_slice(self.secret_key.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(payload.as_bytes());
        let signature = STANDARD.encode(mac.finalize().into_bytes());

        format!(
            "https://{}{}?{}&Signature={}",
            HOST,
            path,
            query,
            percent_encode(&signature)
        )
    }

    async fn signed_get(&self, path: &str, extra: &[(&str, String)]) -> Result<Value, DynError> {
        let url = self.signed_url("GET", path, extra);
        let response = self.client.get(url).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(format!("huobi GET {} failed ({}): {}", path, status, body).into());
        }
        let value: Value = serde_json::from_str(&body)?;
        check_api_status(path, &value)?;
        Ok(value)
    }

    async fn signed_post(&self, path: &str, body: &Value) -> Result<Value, DynError> {
        let url = self.signed_url("POST", path, &[]);
        let response = self.client.post(url).json(body).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(format!("huobi POST {} failed ({}): {}", path, status, body).into());
        }
        let value: Value = serde_json::from_str(&body)?;
        check_api_status(path, &value)?;
        Ok(value)
    }

    async fn public_get(&self, path: &str, query: &str) -> Result<Value, DynError> {
        let url = format!("https://{}{}?{}", HOST, path, query);
        let value: Value = self.client.get(url).send().await?.json().await?;
        check_api_status(path, &value)?;
        Ok(value)
    }
}

/// v1 endpoints report `status`, v2 endpoints report a numeric `code`.
fn check_api_status(path: &str, value: &Value) -> Result<(), DynError> {
    if let Some(status) = value.get("status").and_then(Value::as_str) {
        if status != "ok" {
            return Err(format!("huobi {} returned error: {}", path, value).into());
        }
    } else if let Some(code) = value.get("code").and_then(Value::as_i64) {
        if code != 200 {
            return Err(format!("huobi {} returned code {}: {}", path, code, value).into());
        }
    }
    Ok(())
}

fn percent_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::String(s) => s.parse().ok(),
        other => other.as_f64(),
    }
}

#[async_trait::async_trait]
impl RelayVenue for HuobiClient {
    async fn balance(&self, currency: &str) -> Result<f64, DynError> {
        let path = format!("/v1/account/accounts/{}/balance", self.account_id);
        let response = self.signed_get(&path, &[]).await?;
        let list = response
            .get("data")
            .and_then(|d| d.get("list"))
            .and_then(Value::as_array)
            .ok_or("huobi balance response unreadable")?;
        let wanted = currency.to_lowercase();
        for entry in list {
            if entry.get("currency").and_then(Value::as_str) == Some(wanted.as_str())
                && entry.get("type").and_then(Value::as_str) == Some("trade")
            {
                return entry
                    .get("balance")
                    .and_then(as_f64)
                    .ok_or_else(|| format!("huobi balance for {} unreadable", currency).into());
            }
        }
        Ok(0.0)
    }

    async fn best_ask(&self, symbol: &str) -> Result<f64, DynError> {
        let depth = self
            .public_get("/market/depth", &format!("symbol={}&type=step0", symbol))
            .await?;
        depth
            .get("tick")
            .and_then(|t| t.get("asks"))
            .and_then(Value::as_array)
            .and_then(|asks| asks.first())
            .and_then(Value::as_array)
            .and_then(|level| level.first())
            .and_then(Value::as_f64)
            .ok_or_else(|| format!("huobi depth for {} unreadable", symbol).into())
    }

    async fn limit_buy(&self, symbol: &str, amount: f64, price: f64) -> Result<String, DynError> {
        let body = json!({
            "account-id": self.account_id.to_string(),
            "symbol": symbol,
            "type": "buy-limit",
            "amount": amount.to_string(),
            "price": price.to_string(),
            "source": "api",
        });
        let response = self.signed_post("/v1/order/orders/place", &body).await?;
        let order_id = response
            .get("data")
            .and_then(Value::as_str)
            .ok_or("huobi order response missing id")?;
        debug!(symbol, amount, price, order_id, "huobi limit buy");
        Ok(order_id.to_string())
    }

    async fn market_sell(&self, symbol: &str, amount: f64) -> Result<String, DynError> {
        let body = json!({
            "account-id": self.account_id.to_string(),
            "symbol": symbol,
            "type": "sell-market",
            "amount": amount.to_string(),
            "source": "api",
        });
        let response = self.signed_post("/v1/order/orders/place", &body).await?;
        let order_id = response
            .get("data")
            .and_then(Value::as_str)
            .ok_or("huobi order response missing id")?;
        debug!(symbol, amount, order_id, "huobi market sell");
        Ok(order_id.to_string())
    }

    async fn filled_amount(&self, order_id: &str) -> Result<f64, DynError> {
        let path = format!("/v1/order/orders/{}", order_id);
        let response = self.signed_get(&path, &[]).await?;
        response
            .get("data")
            .and_then(|d| d.get("field-amount"))
            .and_then(as_f64)
            .ok_or_else(|| format!("huobi order {} fill unreadable", order_id).into())
    }

    async fn deposit_address(&self, currency: &str, chain: &str) -> Result<String, DynError> {
        let response = self
            .signed_get(
                "/v2/account/deposit/address",
                &[("currency", currency.to_lowercase())],
            )
            .await?;
        let entries = response
            .get("data")
            .and_then(Value::as_array)
            .ok_or("huobi deposit address response unreadable")?;
        for entry in entries {
            if entry.get("chain").and_then(Value::as_str) == Some(chain) {
                if let Some(address) = entry.get("address").and_then(Value::as_str) {
                    return Ok(address.to_string());
                }
            }
        }
        Err(format!("huobi deposit address for {} on {} missing", currency, chain).into())
    }

    async fn withdraw(
        &self,
        currency: &str,
        destination: &DepositAddress,
        amount: f64,
        fee: f64,
    ) -> Result<String, DynError> {
        let mut body = json!({
            "address": destination.address,
            "currency": currency.to_lowercase(),
            "amount": amount.to_string(),
            "fee": fee.to_string(),
        });
        if let Some(tag) = &destination.tag {
            body["addr-tag"] = json!(tag);
        }
        let response = self.signed_post("/v1/dw/withdraw/api/create", &body).await?;
        let id = response
            .get("data")
            .and_then(Value::as_i64)
            .ok_or("huobi withdrawal response missing id")?;
        debug!(currency, amount, withdraw_id = id, "huobi withdrawal submitted");
        Ok(id.to_string())
    }

    async fn latest_withdraw_confirmed(&self, currency: &str) -> Result<bool, DynError> {
        let response = self
            .signed_get(
                "/v1/query/deposit-withdraw",
                &[
                    ("currency", currency.to_lowercase()),
                    ("type", "withdraw".to_string()),
                    ("size", "1".to_string()),
                    ("direct", "next".to_string()),
                ],
            )
            .await?;
        let state = response
            .get("data")
            .and_then(Value::as_array)
            .and_then(|entries| entries.first())
            .and_then(|e| e.get("state"))
            .and_then(Value::as_str);
        Ok(state == Some("confirmed"))
    }
}
