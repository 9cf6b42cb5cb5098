use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use kimp_arb::error::CycleError;
use kimp_arb::settings;
use kimp_arb::strategy::price_table::PriceTable;
use kimp_arb::strategy::trader::Trader;
use kimp_arb::strategy::types::{domestic_market, global_pair, Venue};
use kimp_arb::strategy::venues::{DomesticVenue, GlobalVenue, RelayVenue};
use kimp_arb::{binance, huobi, upbit, DynError};

const DETECTOR_TICK_SECS: u64 = 1;
const HTTP_TIMEOUT_SECS: u64 = 10;
const USDT_KRW_SYMBOL: &str = "usdtkrw";

#[tokio::main]
async fn main() -> Result<(), DynError> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = settings::load()?;
    info!(markets = ?settings.market_list, "settings loaded");

    let table = Arc::new(PriceTable::new());
    for market in &settings.market_list {
        table.track(Venue::Upbit, &domestic_market(market));
        table.track(Venue::Binance, &global_pair(market));
    }
    table.track(Venue::Huobi, "usdt");

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
        .build()?;

    // Seed the conversion rate over REST so the detector does not wait on the
    // first websocket trade, which can be minutes apart on the KRW book.
    let rate = huobi::latest_trade_price(&client, USDT_KRW_SYMBOL).await?;
    table.set(Venue::Huobi, "usdt", rate);
    info!(rate, "usdt/krw rate seeded");

    let global: Arc<dyn GlobalVenue> = Arc::new(binance::BinanceClient::new(
        client.clone(),
        settings.binance_access_key.clone(),
        settings.binance_secret_key.clone(),
    ));
    let domestic: Arc<dyn DomesticVenue> = Arc::new(upbit::UpbitClient::new(
        client.clone(),
        settings.upbit_access_key.clone(),
        settings.upbit_secret_key.clone(),
    ));
    let relay: Arc<dyn RelayVenue> = Arc::new(huobi::HuobiClient::new(
        client.clone(),
        settings.huobi_korea_access_key.clone(),
        settings.huobi_korea_secret_key.clone(),
        settings.huobi_account_id,
    ));

    {
        let table = Arc::clone(&table);
        let markets = settings.market_list.clone();
        tokio::spawn(async move {
            match binance::BinanceTradeConnector::run(table, &markets).await {
                Ok(()) => error!("binance trade stream terminated"),
                Err(e) => error!(error = %e, "binance trade stream failed"),
            }
        });
    }
    {
        let table = Arc::clone(&table);
        let markets = settings.market_list.clone();
        tokio::spawn(async move {
            match upbit::UpbitTickerConnector::run(table, &markets).await {
                Ok(()) => error!("upbit ticker stream terminated"),
                Err(e) => error!(error = %e, "upbit ticker stream failed"),
            }
        });
    }
    {
        let table = Arc::clone(&table);
        tokio::spawn(async move {
            match huobi::HuobiRateConnector::run(table).await {
                Ok(()) => error!("huobi rate stream terminated"),
                Err(e) => error!(error = %e, "huobi rate stream failed"),
            }
        });
    }

    let mut trader = Trader::new(
        Arc::clone(&table),
        global,
        domestic,
        relay,
        &settings,
    );

    let mut tick = tokio::time::interval(Duration::from_secs(DETECTOR_TICK_SECS));
    loop {
        tokio::select! {
            _ = tick.tick() => {
                match trader.monitor().await {
                    Ok(()) => {}
                    Err(CycleError::Fatal(reason)) => {
                        error!(reason = %reason, "fatal abort, manual reconciliation required");
                        break;
                    }
                    Err(CycleError::Venue(e)) => {
                        error!(error = %e, "venue call failed mid-cycle, manual reconciliation required");
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                break;
            }
        }
    }
    Ok(())
}
