//! Binance: global USDT spot prices over websocket, plus the signed REST
//! client used for spot trading, futures hedging and on-chain transfers.

use std::sync::Arc;

use futures_util::StreamExt;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;
use tracing::{debug, info, warn};

use crate::strategy::price_table::PriceTable;
use crate::strategy::types::{
    global_pair, AccountPermissions, DepositAddress, FuturesBalance, OrderSide, TransferDirection,
    Venue, WithdrawStatus,
};
use crate::strategy::venues::GlobalVenue;
use crate::DynError;

type HmacSha256 = Hmac<Sha256>;

const SPOT_BASE_URL: &str = "https://api.binance.com";
const FUTURES_BASE_URL: &str = "https://fapi.binance.com";
const WS_BASE_URL: &str = "wss://stream.binance.com:9443/stream";

pub struct BinanceTradeConnector;

impl BinanceTradeConnector {
    /// Stream aggregated trades for every tracked market into the price
    /// table. Returns when the connection closes.
    pub async fn run(table: Arc<PriceTable>, markets: &[String]) -> Result<(), DynError> {
        let streams: Vec<String> = markets
            .iter()
            .map(|m| format!("{}@aggTrade", global_pair(m).to_lowercase()))
            .collect();
        let url = format!("{}?streams={}", WS_BASE_URL, streams.join("/"));

        let (ws, _) = tokio_tungstenite::connect_async(url).await?;
        info!(streams = streams.len(), "binance trade stream connected");
        let (_, mut read) = ws.split();

        while let Some(msg) = read.next().await {
            let msg = msg?;
            let text = match msg {
                tokio_tungstenite::tungstenite::Message::Text(text) => text,
                tokio_tungstenite::tungstenite::Message::Close(frame) => {
                    warn!(?frame, "binance trade stream closed");
                    break;
                }
                _ => continue,
            };

            let frame: StreamFrame = match serde_json::from_str(&text) {
                Ok(frame) => frame,
                Err(_) => continue,
            };
            let price: f64 = match frame.data.price.parse() {
                Ok(price) => price,
                Err(_) => continue,
            };
            table.set(Venue::Binance, &frame.data.symbol, price);
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct StreamFrame {
    data: AggTrade,
}

#[derive(Debug, Deserialize)]
struct AggTrade {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "p")]
    price: String,
}

pub struct BinanceClient {
    client: reqwest::Client,
    api_key: String,
    api_secret: String,
}

impl BinanceClient {
    pub fn new(client: reqwest::Client, api_key: String, api_secret: String) -> Self {
        Self {
            client,
            api_key,
            api_secret,
        }
    }

    /// HMAC-SHA256 of the query string, hex encoded.
    fn sign(&self, query: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn signed_query(&self, params: &[(&str, String)]) -> String {
        let mut query = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");
        let timestamp = chrono::Utc::now().timestamp_millis();
        if query.is_empty() {
            query = format!("timestamp={}", timestamp);
        } else {
            query = format!("{}&timestamp={}", query, timestamp);
        }
        let signature = self.sign(&query);
        format!("{}&signature={}", query, signature)
    }

    async fn signed_get(
        &self,
        base: &str,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<Value, DynError> {
        let url = format!("{}{}?{}", base, path, self.signed_query(params));
        let response = self
            .client
            .get(url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(format!("binance GET {} failed ({}): {}", path, status, body).into());
        }
        Ok(serde_json::from_str(&body)?)
    }

    async fn signed_post(
        &self,
        base: &str,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<Value, DynError> {
        let url = format!("{}{}?{}", base, path, self.signed_query(params));
        let response = self
            .client
            .post(url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(format!("binance POST {} failed ({}): {}", path, status, body).into());
        }
        Ok(serde_json::from_str(&body)?)
    }

    async fn public_get(&self, base: &str, path: &str, query: &str) -> Result<Value, DynError> {
        let url = if query.is_empty() {
            format!("{}{}", base, path)
        } else {
            format!("{}{}?{}", base, path, query)
        };
        let response = self.client.get(url).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(format!("binance GET {} failed ({}): {}", path, status, body).into());
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
impl GlobalVenue for BinanceClient {
    async fn account_permissions(&self) -> Result<AccountPermissions, DynError> {
        let account = self.signed_get(SPOT_BASE_URL, "/api/v3/account", &[]).await?;
        Ok(AccountPermissions {
            can_trade: account.get("canTrade").and_then(Value::as_bool).unwrap_or(false),
            can_withdraw: account.get("canWithdraw").and_then(Value::as_bool).unwrap_or(false),
            can_deposit: account.get("canDeposit").and_then(Value::as_bool).unwrap_or(false),
        })
    }

    async fn spot_balance(&self, asset: &str) -> Result<f64, DynError> {
        let account = self.signed_get(SPOT_BASE_URL, "/api/v3/account", &[]).await?;
        let balances = account
            .get("balances")
            .and_then(Value::as_array)
            .ok_or("binance account response missing balances")?;
        for entry in balances {
            if entry.get("asset").and_then(Value::as_str) == Some(asset) {
                return entry
                    .get("free")
                    .and_then(as_f64)
                    .ok_or_else(|| format!("binance balance for {} unreadable", asset).into());
            }
        }
        Ok(0.0)
    }

    async fn lot_step(&self, symbol: &str) -> Result<f64, DynError> {
        let info = self
            .public_get(
                SPOT_BASE_URL,
                "/api/v3/exchangeInfo",
                &format!("symbol={}", symbol),
            )
            .await?;
        let filters = info
            .get("symbols")
            .and_then(Value::as_array)
            .and_then(|symbols| symbols.first())
            .and_then(|s| s.get("filters"))
            .and_then(Value::as_array)
            .ok_or_else(|| format!("binance exchange info for {} unreadable", symbol))?;
        for filter in filters {
            if filter.get("filterType").and_then(Value::as_str) == Some("LOT_SIZE") {
                return filter
                    .get("stepSize")
                    .and_then(as_f64)
                    .ok_or_else(|| format!("binance LOT_SIZE step for {} unreadable", symbol).into());
            }
        }
        Err(format!("binance LOT_SIZE filter missing for {}", symbol).into())
    }

    async fn market_buy(&self, symbol: &str, quantity: &str) -> Result<(), DynError> {
        let params = [
            ("symbol", symbol.to_string()),
            ("side", "BUY".to_string()),
            ("type", "MARKET".to_string()),
            ("quantity", quantity.to_string()),
        ];
        let order = self.signed_post(SPOT_BASE_URL, "/api/v3/order", &params).await?;
        let order_id = order.get("orderId").and_then(Value::as_u64);
        debug!(symbol, quantity, order_id, "binance spot buy");
        Ok(())
    }

    async fn market_sell(&self, symbol: &str, quantity: &str) -> Result<(), DynError> {
        let params = [
            ("symbol", symbol.to_string()),
            ("side", "SELL".to_string()),
            ("type", "MARKET".to_string()),
            ("quantity", quantity.to_string()),
        ];
        let order = self.signed_post(SPOT_BASE_URL, "/api/v3/order", &params).await?;
        let order_id = order.get("orderId").and_then(Value::as_u64);
        debug!(symbol, quantity, order_id, "binance spot sell");
        Ok(())
    }

    async fn futures_balance(&self) -> Result<FuturesBalance, DynError> {
        let balances = self.signed_get(FUTURES_BASE_URL, "/fapi/v2/balance", &[]).await?;
        let balances = balances
            .as_array()
            .ok_or("binance futures balance response unreadable")?;
        for entry in balances {
            if entry.get("asset").and_then(Value::as_str) == Some("USDT") {
                let balance = entry
                    .get("balance")
                    .and_then(as_f64)
                    .ok_or("binance futures balance unreadable")?;
                let withdraw_available = entry
                    .get("withdrawAvailable")
                    .and_then(as_f64)
                    .ok_or("binance futures withdrawAvailable unreadable")?;
                return Ok(FuturesBalance {
                    balance,
                    withdraw_available,
                });
            }
        }
        Err("binance futures USDT balance missing".into())
    }

    async fn futures_set_leverage(&self, symbol: &str, leverage: u8) -> Result<(), DynError> {
        let params = [
            ("symbol", symbol.to_string()),
            ("leverage", leverage.to_string()),
        ];
        self.signed_post(FUTURES_BASE_URL, "/fapi/v1/leverage", &params).await?;
        Ok(())
    }

    async fn futures_qty_precision(&self, symbol: &str) -> Result<u32, DynError> {
        let trades = self
            .public_get(
                FUTURES_BASE_URL,
                "/fapi/v1/trades",
                &format!("symbol={}&limit=1", symbol),
            )
            .await?;
        let qty = trades
            .as_array()
            .and_then(|trades| trades.first())
            .and_then(|t| t.get("qty"))
            .and_then(Value::as_str)
            .ok_or_else(|| format!("binance futures trades for {} unreadable", symbol))?;
        let decimals = match qty.split_once('.') {
            Some((_, frac)) => frac.len() as u32,
            None => 0,
        };
        Ok(decimals)
    }

    async fn futures_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: f64,
    ) -> Result<(), DynError> {
        let params = [
            ("symbol", symbol.to_string()),
            ("side", side.as_str().to_string()),
            ("type", "MARKET".to_string()),
            ("quantity", quantity.to_string()),
        ];
        let order = self.signed_post(FUTURES_BASE_URL, "/fapi/v1/order", &params).await?;
        let order_id = order.get("orderId").and_then(Value::as_u64);
        debug!(symbol, ?side, quantity, order_id, "binance futures order");
        Ok(())
    }

    async fn futures_transfer(
        &self,
        asset: &str,
        amount: f64,
        direction: TransferDirection,
    ) -> Result<(), DynError> {
        let transfer_type = match direction {
            TransferDirection::SpotToFutures => 1,
            TransferDirection::FuturesToSpot => 2,
        };
        let params = [
            ("asset", asset.to_string()),
            ("amount", amount.to_string()),
            ("type", transfer_type.to_string()),
        ];
        self.signed_post(SPOT_BASE_URL, "/sapi/v1/futures/transfer", &params).await?;
        Ok(())
    }

    async fn withdraw(
        &self,
        asset: &str,
        destination: &DepositAddress,
        amount: &str,
    ) -> Result<String, DynError> {
        let mut params = vec![
            ("coin", asset.to_string()),
            ("address", destination.address.clone()),
            ("amount", amount.to_string()),
        ];
        if let Some(tag) = &destination.tag {
            params.push(("addressTag", tag.clone()));
        }
        let response = self
            .signed_post(SPOT_BASE_URL, "/sapi/v1/capital/withdraw/apply", &params)
            .await?;
        response
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| format!("binance withdraw response missing id: {}", response).into())
    }

    async fn withdraw_status(&self, asset: &str, id: &str) -> Result<WithdrawStatus, DynError> {
        let history = self
            .signed_get(
                SPOT_BASE_URL,
                "/sapi/v1/capital/withdraw/history",
                &[("coin", asset.to_string())],
            )
            .await?;
        let entries = history
            .as_array()
            .ok_or("binance withdraw history response unreadable")?;
        for entry in entries {
            if entry.get("id").and_then(Value::as_str) != Some(id) {
                continue;
            }
            let status = entry
                .get("status")
                .and_then(Value::as_i64)
                .ok_or("binance withdraw status unreadable")?;
            return Ok(match status {
                6 => {
                    let txid = entry
                        .get("txId")
                        .and_then(Value::as_str)
                        .ok_or("binance completed withdrawal missing txId")?;
                    WithdrawStatus::Completed {
                        txid: txid.to_string(),
                    }
                }
                0 | 2 | 4 => WithdrawStatus::Pending,
                _ => WithdrawStatus::Failed,
            });
        }
        // History can lag right after submission.
        Ok(WithdrawStatus::Pending)
    }

    async fn deposit_address(&self, asset: &str) -> Result<DepositAddress, DynError> {
        let response = self
            .signed_get(
                SPOT_BASE_URL,
                "/sapi/v1/capital/deposit/address",
                &[("coin", asset.to_string())],
            )
            .await?;
        let address = response
            .get("address")
            .and_then(Value::as_str)
            .ok_or_else(|| format!("binance deposit address for {} unreadable", asset))?;
        let tag = response
            .get("tag")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .map(str::to_string);
        Ok(DepositAddress {
            address: address.to_string(),
            tag,
        })
    }
}
