//! Upbit: domestic KRW ticker stream plus the JWT-authenticated REST client
//! used for spot orders, deposits and withdrawals.

use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256, Sha512};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::strategy::price_table::PriceTable;
use crate::strategy::types::{domestic_market, AddressState, DepositAddress, DepositState, OrderFill, Venue};
use crate::strategy::venues::DomesticVenue;
use crate::DynError;

type HmacSha256 = Hmac<Sha256>;

const BASE_URL: &str = "https://api.upbit.com";
const WS_URL: &str = "wss://api.upbit.com/websocket/v1";

pub struct UpbitTickerConnector;

impl UpbitTickerConnector {
    /// Stream ticker prices for every tracked KRW market into the price
    /// table. Returns when the connection closes.
    pub async fn run(table: Arc<PriceTable>, markets: &[String]) -> Result<(), DynError> {
        let codes: Vec<String> = markets.iter().map(|m| domestic_market(m)).collect();
        let subscribe = json!([
            { "ticket": Uuid::new_v4().to_string() },
            { "type": "ticker", "codes": codes },
        ]);

        let (ws, _) = tokio_tungstenite::connect_async(WS_URL).await?;
        info!(markets = codes.len(), "upbit ticker stream connected");
        let (mut write, mut read) = ws.split();
        write
            .send(tokio_tungstenite::tungstenite::Message::Text(
                subscribe.to_string(),
            ))
            .await?;

        while let Some(msg) = read.next().await {
            let msg = msg?;
            // Upbit delivers ticker frames as binary JSON.
            let bytes = match msg {
                tokio_tungstenite::tungstenite::Message::Binary(bytes) => bytes,
                tokio_tungstenite::tungstenite::Message::Text(text) => text.into_bytes(),
                tokio_tungstenite::tungstenite::Message::Close(frame) => {
                    warn!(?frame, "upbit ticker stream closed");
                    break;
                }
                _ => continue,
            };

            let frame: TickerFrame = match serde_json::from_slice(&bytes) {
                Ok(frame) => frame,
                Err(_) => continue,
            };
            table.set(Venue::Upbit, &frame.code, frame.trade_price);
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct TickerFrame {
    code: String,
    trade_price: f64,
}

pub struct UpbitClient {
    client: reqwest::Client,
    access_key: String,
    secret_key: String,
}

impl UpbitClient {
    pub fn new(client: reqwest::Client, access_key: String, secret_key: String) -> Self {
        Self {
            client,
            access_key,
            secret_key,
        }
    }

    /// HS256 JWT per the venue's auth scheme. Query parameters, when present,
    /// are bound into the token as a SHA512 hash of the query string.
    fn bearer_token(&self, query: Option<&str>) -> Result<String, DynError> {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);

        let mut payload = json!({
            "access_key": self.access_key,
            "nonce": Uuid::new_v4().to_string(),
        });
        if let Some(query) = query {
            let mut hasher = Sha512::new();
            hasher.update(query.as_bytes());
            payload["query_hash"] = json!(hex::encode(hasher.finalize()));
            payload["query_hash_alg"] = json!("SHA512");
        }
        let payload = URL_SAFE_NO_PAD.encode(payload.to_string().as_bytes());

        let signing_input = format!("{}.{}", header, payload);
        let mut mac = HmacSha256::new_from_slice(self.secret_key.as_bytes())
            .map_err(|e| format!("upbit secret key rejected: {}", e))?;
        mac.update(signing_input.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        Ok(format!("Bearer {}.{}", signing_input, signature))
    }

    async fn get(&self, path: &str, params: &[(&str, String)]) -> Result<Value, DynError> {
        let query = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");
        let token = if query.is_empty() {
            self.bearer_token(None)?
        } else {
            self.bearer_token(Some(&query))?
        };
        let url = if query.is_empty() {
            format!("{}{}", BASE_URL, path)
        } else {
            format!("{}{}?{}", BASE_URL, path, query)
        };
        let response = self
            .client
            .get(url)
            .header("Authorization", token)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(format!("upbit GET {} failed ({}): {}", path, status, body).into());
        }
        Ok(serde_json::from_str(&body)?)
    }

    async fn post(&self, path: &str, params: &[(&str, String)]) -> Result<Value, DynError> {
        let query = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");
        let token = self.bearer_token(Some(&query))?;
        let body: Value = params
            .iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.clone())))
            .collect::<serde_json::Map<_, _>>()
            .into();
        let response = self
            .client
            .post(format!("{}{}", BASE_URL, path))
            .header("Authorization", token)
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(format!("upbit POST {} failed ({}): {}", path, status, body).into());
        }
        Ok(serde_json::from_str(&body)?)
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::String(s) => s.parse().ok(),
        other => other.as_f64(),
    }
}

#[async_trait::async_trait]
impl DomesticVenue for UpbitClient {
    async fn balance(&self, currency: &str) -> Result<f64, DynError> {
        let accounts = self.get("/v1/accounts", &[]).await?;
        let accounts = accounts.as_array().ok_or("upbit accounts response unreadable")?;
        for account in accounts {
            if account.get("currency").and_then(Value::as_str) == Some(currency) {
                return account
                    .get("balance")
                    .and_then(as_f64)
                    .ok_or_else(|| format!("upbit balance for {} unreadable", currency).into());
            }
        }
        Ok(0.0)
    }

    async fn request_deposit_address(&self, currency: &str) -> Result<AddressState, DynError> {
        let response = self
            .post(
                "/v1/deposits/generate_coin_address",
                &[("currency", currency.to_string())],
            )
            .await?;

        // A bare success flag means wallet generation was kicked off (or is
        // still running); the address arrives on a later call.
        match response.get("success").and_then(Value::as_bool) {
            Some(true) => return Ok(AddressState::Generating),
            Some(false) => {
                let message = response
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("address generation refused");
                return Ok(AddressState::Failed(message.to_string()));
            }
            None => {}
        }

        let address = response
            .get("deposit_address")
            .and_then(Value::as_str)
            .ok_or_else(|| format!("upbit deposit address for {} unreadable", currency))?;
        // BCH addresses come back with a URI scheme prefix the counterparty
        // venues reject.
        let address = address.trim_start_matches("bitcoincash:").to_string();
        let tag = response
            .get("secondary_address")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .map(str::to_string);
        Ok(AddressState::Ready(DepositAddress { address, tag }))
    }

    async fn find_deposit(&self, currency: &str, txid: &str) -> Result<DepositState, DynError> {
        let deposits = self
            .get(
                "/v1/deposits",
                &[
                    ("currency", currency.to_string()),
                    ("txid", txid.to_string()),
                ],
            )
            .await?;
        let deposits = deposits.as_array().ok_or("upbit deposits response unreadable")?;
        let deposit = match deposits.first() {
            Some(deposit) => deposit,
            None => return Ok(DepositState::NotSeen),
        };
        Ok(match deposit.get("state").and_then(Value::as_str) {
            Some("ACCEPTED") => DepositState::Accepted,
            Some("REJECTED") => DepositState::Rejected,
            _ => DepositState::Pending,
        })
    }

    async fn market_sell(&self, market: &str, volume: &str) -> Result<String, DynError> {
        let params = [
            ("market", market.to_string()),
            ("side", "ask".to_string()),
            ("volume", volume.to_string()),
            ("ord_type", "market".to_string()),
        ];
        let order = self.post("/v1/orders", &params).await?;
        let uuid = order
            .get("uuid")
            .and_then(Value::as_str)
            .ok_or("upbit order response missing uuid")?;
        debug!(market, volume, uuid, "upbit market sell");
        Ok(uuid.to_string())
    }

    async fn buy_by_quote(&self, market: &str, quote_amount: f64) -> Result<String, DynError> {
        let params = [
            ("market", market.to_string()),
            ("side", "bid".to_string()),
            ("price", quote_amount.to_string()),
            ("ord_type", "price".to_string()),
        ];
        let order = self.post("/v1/orders", &params).await?;
        let uuid = order
            .get("uuid")
            .and_then(Value::as_str)
            .ok_or("upbit order response missing uuid")?;
        debug!(market, quote_amount, uuid, "upbit quote buy");
        Ok(uuid.to_string())
    }

    async fn order_fill(&self, uuid: &str) -> Result<OrderFill, DynError> {
        let order = self
            .get("/v1/order", &[("uuid", uuid.to_string())])
            .await?;
        let trade_count = order
            .get("trades_count")
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32;
        let avg_price = order
            .get("trades")
            .and_then(Value::as_array)
            .and_then(|trades| trades.first())
            .and_then(|t| t.get("price"))
            .and_then(as_f64)
            .unwrap_or(0.0);
        Ok(OrderFill {
            trade_count,
            avg_price,
        })
    }

    async fn withdraw(&self, currency: &str, amount: &str, address: &str) -> Result<String, DynError> {
        let params = [
            ("currency", currency.to_string()),
            ("amount", amount.to_string()),
            ("address", address.to_string()),
            ("transaction_type", "default".to_string()),
        ];
        let withdrawal = self.post("/v1/withdraws/coin", &params).await?;
        let uuid = withdrawal
            .get("uuid")
            .and_then(Value::as_str)
            .ok_or("upbit withdrawal response missing uuid")?;
        debug!(currency, amount, uuid, "upbit withdrawal submitted");
        Ok(uuid.to_string())
    }

    async fn withdrawal_done(&self, uuid: &str) -> Result<bool, DynError> {
        let withdrawal = self
            .get("/v1/withdraw", &[("uuid", uuid.to_string())])
            .await?;
        Ok(withdrawal
            .get("done_at")
            .map(|v| !v.is_null())
            .unwrap_or(false))
    }
}
