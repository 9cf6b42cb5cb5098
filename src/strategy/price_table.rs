use dashmap::DashMap;

use super::types::Venue;

/// Last trade prices keyed by (venue, venue-native code). 0.0 marks a tracked
/// code whose feed has not delivered a tick yet.
///
/// Written concurrently by the feed connectors and read by the detector.
/// Writes are per-cell and last-write-wins with no cross-symbol ordering; the
/// detector tolerates that by re-reading the table fresh each tick.
pub struct PriceTable {
    prices: DashMap<(Venue, String), f64>,
}

impl PriceTable {
    pub fn new() -> Self {
        Self { prices: DashMap::new() }
    }

    /// Seed a cell with the unknown marker so a tracked code can be told apart
    /// from an untracked one.
    pub fn track(&self, venue: Venue, code: &str) {
        self.prices.entry((venue, code.to_string())).or_insert(0.0);
    }

    pub fn set(&self, venue: Venue, code: &str, price: f64) {
        self.prices.insert((venue, code.to_string()), price);
    }

    /// Last known price, 0.0 when unknown or untracked.
    pub fn get(&self, venue: Venue, code: &str) -> f64 {
        self.prices
            .get(&(venue, code.to_string()))
            .map(|p| *p)
            .unwrap_or(0.0)
    }

    /// Number of tracked codes for one venue.
    pub fn venue_len(&self, venue: Venue) -> usize {
        self.prices.iter().filter(|entry| entry.key().0 == venue).count()
    }
}

impl Default for PriceTable {
    fn default() -> Self {
        Self::new()
    }
}
