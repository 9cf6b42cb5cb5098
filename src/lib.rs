use std::error::Error;

pub type DynError = Box<dyn Error + Send + Sync>;

pub mod error;
pub mod settings;
pub mod strategy;

// Venue connectors: one websocket price feed and one REST client per venue.
pub mod binance;
pub mod huobi;
pub mod upbit;
