use serde::Deserialize;

use crate::DynError;

pub const SETTINGS_PATH_ENV: &str = "KIMP_SETTINGS";
pub const DEFAULT_SETTINGS_PATH: &str = "settings.json";

fn default_premium_ratio() -> f64 {
    1.5
}

fn default_min_quote_balance() -> f64 {
    400.0
}

fn default_order_poll_secs() -> u64 {
    5
}

fn default_transfer_poll_secs() -> u64 {
    3
}

/// Immutable process configuration, loaded once at startup from
/// `settings.json` (path overridable via `KIMP_SETTINGS`).
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Tracked base assets, e.g. ["ADA", "ATOM", "BAT"]. Order matters: the
    /// detector breaks premium ties by first occurrence.
    pub market_list: Vec<String>,

    pub upbit_access_key: String,
    pub upbit_secret_key: String,
    pub binance_access_key: String,
    pub binance_secret_key: String,
    pub huobi_korea_access_key: String,
    pub huobi_korea_secret_key: String,
    pub huobi_account_id: u64,

    /// Premium threshold in percent. A cycle starts only when the maximum
    /// premium is strictly greater than this.
    #[serde(default = "default_premium_ratio")]
    pub premium_ratio: f64,

    /// Minimum USDT spot balance on the global venue before a cycle may start.
    #[serde(default = "default_min_quote_balance")]
    pub min_quote_balance: f64,

    /// Delay between polls while waiting for order fills, in seconds.
    #[serde(default = "default_order_poll_secs")]
    pub order_poll_secs: u64,

    /// Delay between polls while waiting on withdrawals and deposits, in seconds.
    #[serde(default = "default_transfer_poll_secs")]
    pub transfer_poll_secs: u64,

    /// Optional cap on poll attempts. Absent means retry until a terminal
    /// state is observed; exhausting a cap is a fatal abort.
    #[serde(default)]
    pub max_poll_attempts: Option<u32>,
}

pub fn load() -> Result<Settings, DynError> {
    let path = std::env::var(SETTINGS_PATH_ENV).unwrap_or_else(|_| DEFAULT_SETTINGS_PATH.to_string());
    let raw = std::fs::read_to_string(&path).map_err(|e| format!("failed to read {}: {}", path, e))?;
    let settings: Settings = serde_json::from_str(&raw)?;
    if settings.market_list.is_empty() {
        return Err("market_list must not be empty".into());
    }
    Ok(settings)
}
