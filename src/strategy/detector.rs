//! Premium detection.
//!
//! Once per tick the detector reads the domestic price, the global price and
//! the USDT/KRW conversion rate for every tracked market and computes the
//! percentage divergence. A tick with any unknown price is skipped whole:
//! acting on a partially warmed-up table would compare stale data.

use std::sync::Arc;

use tracing::debug;

use crate::error::CycleError;

use super::price_table::PriceTable;
use super::types::{domestic_market, global_pair, Venue};

/// What the detector asks the orchestrator to do after one tick.
#[derive(Debug, Clone, PartialEq)]
pub enum TickDecision {
    /// No premium beyond the threshold, or the table is not warm yet.
    Hold,
    /// Domestic trades rich: run the forward relocation cycle for `symbol`.
    Forward { symbol: String, premium: f64 },
    /// Domestic trades cheap: reverse cycle (unsupported).
    Reverse { symbol: String, premium: f64 },
}

pub struct PremiumDetector {
    table: Arc<PriceTable>,
    markets: Vec<String>,
    premium_ratio: f64,
}

impl PremiumDetector {
    pub fn new(table: Arc<PriceTable>, markets: Vec<String>, premium_ratio: f64) -> Self {
        Self {
            table,
            markets,
            premium_ratio,
        }
    }

    /// Raw premium per market, in percent. `None` when any tracked price or
    /// the conversion rate is still unknown.
    fn raw_premiums(&self) -> Result<Option<Vec<(String, f64)>>, CycleError> {
        let upbit_len = self.table.venue_len(Venue::Upbit);
        let binance_len = self.table.venue_len(Venue::Binance);
        if upbit_len != binance_len {
            return Err(CycleError::fatal(format!(
                "tracked market count mismatch: domestic={} global={}",
                upbit_len, binance_len
            )));
        }

        let usdt_krw = self.table.get(Venue::Huobi, "usdt");
        if usdt_krw == 0.0 {
            return Ok(None);
        }

        let mut premiums = Vec::with_capacity(self.markets.len());
        for market in &self.markets {
            let domestic = self.table.get(Venue::Upbit, &domestic_market(market));
            let global = self.table.get(Venue::Binance, &global_pair(market));
            if domestic == 0.0 || global == 0.0 {
                return Ok(None);
            }

            let converted = global * usdt_krw;
            let premium = if domestic >= converted {
                domestic / converted * 100.0 - 100.0
            } else {
                converted / domestic * 100.0 - 100.0
            };
            premiums.push((market.clone(), premium));
        }
        Ok(Some(premiums))
    }

    /// Premium per market rounded to 3 decimals, for logging and inspection.
    pub(crate) fn premiums(&self) -> Result<Option<Vec<(String, f64)>>, CycleError> {
        Ok(self.raw_premiums()?.map(|premiums| {
            premiums
                .into_iter()
                .map(|(market, p)| (market, round3(p)))
                .collect()
        }))
    }

    /// Evaluate one tick. The decision compares unrounded premiums strictly
    /// against the threshold; ties break by first occurrence in the tracked
    /// market list.
    pub fn evaluate(&self) -> Result<TickDecision, CycleError> {
        let premiums = match self.raw_premiums()? {
            Some(premiums) => premiums,
            None => return Ok(TickDecision::Hold),
        };

        debug!(premiums = ?premiums.iter().map(|(m, p)| (m.as_str(), round3(*p))).collect::<Vec<_>>(), "premium tick");

        let mut best = 0usize;
        let mut worst = 0usize;
        for (i, (_, premium)) in premiums.iter().enumerate() {
            if *premium > premiums[best].1 {
                best = i;
            }
            if *premium < premiums[worst].1 {
                worst = i;
            }
        }

        if premiums[best].1 > self.premium_ratio {
            let (symbol, premium) = &premiums[best];
            Ok(TickDecision::Forward {
                symbol: symbol.clone(),
                premium: round3(*premium),
            })
        } else if premiums[worst].1 < -self.premium_ratio {
            let (symbol, premium) = &premiums[worst];
            Ok(TickDecision::Reverse {
                symbol: symbol.clone(),
                premium: round3(*premium),
            })
        } else {
            Ok(TickDecision::Hold)
        }
    }
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}
