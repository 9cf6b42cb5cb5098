use std::sync::Arc;

use proptest::prelude::*;

use crate::strategy::detector::{PremiumDetector, TickDecision};
use crate::strategy::precision::{floor_to_step, quantize};
use crate::strategy::price_table::PriceTable;
use crate::strategy::types::Venue;

fn table_for(markets: &[(&str, f64, f64)], rate: f64) -> Arc<PriceTable> {
    let table = Arc::new(PriceTable::new());
    for (market, domestic, global) in markets {
        table.set(Venue::Upbit, &format!("KRW-{}", market), *domestic);
        table.set(Venue::Binance, &format!("{}USDT", market), *global);
    }
    table.set(Venue::Huobi, "usdt", rate);
    table
}

fn detector_for(markets: &[(&str, f64, f64)], rate: f64) -> PremiumDetector {
    let names: Vec<String> = markets.iter().map(|(m, _, _)| m.to_string()).collect();
    PremiumDetector::new(table_for(markets, rate), names, 1.5)
}

#[test]
fn premium_matches_hand_computed_example() {
    // 6000 / (4.0 * 1450) = 1.03448..., a 3.448% premium.
    let detector = detector_for(&[("ADA", 6000.0, 4.0)], 1450.0);
    let premiums = detector.premiums().unwrap().unwrap();
    assert_eq!(premiums, vec![("ADA".to_string(), 3.448)]);
}

#[test]
fn premium_magnitude_is_symmetric_under_source_swap() {
    // 6000 vs 5800 converted, then 5800 vs 6000 converted: same magnitude.
    let rich_domestic = detector_for(&[("ADA", 6000.0, 4.0)], 1450.0);
    let rich_global = detector_for(&[("ADA", 5800.0, 6000.0 / 1450.0)], 1450.0);
    let a = rich_domestic.premiums().unwrap().unwrap()[0].1;
    let b = rich_global.premiums().unwrap().unwrap()[0].1;
    assert!(a > 0.0 && b > 0.0);
    assert_eq!(a, b);
}

#[test]
fn unknown_price_skips_the_whole_tick() {
    // Second market has no global price yet: no partial result is produced.
    let detector = detector_for(&[("ADA", 6000.0, 4.0), ("ATOM", 15000.0, 0.0)], 1450.0);
    assert_eq!(detector.premiums().unwrap(), None);
    assert_eq!(detector.evaluate().unwrap(), TickDecision::Hold);
}

#[test]
fn unknown_conversion_rate_skips_the_whole_tick() {
    let detector = detector_for(&[("ADA", 6000.0, 4.0)], 0.0);
    assert_eq!(detector.evaluate().unwrap(), TickDecision::Hold);
}

#[test]
fn threshold_is_strictly_greater_than() {
    // 203 / (1.0 * 200) is exactly the 1.5% boundary: must not trigger.
    let detector = detector_for(&[("ADA", 203.0, 1.0)], 200.0);
    assert_eq!(detector.evaluate().unwrap(), TickDecision::Hold);

    // A hair above must.
    let detector = detector_for(&[("ADA", 203.1, 1.0)], 200.0);
    match detector.evaluate().unwrap() {
        TickDecision::Forward { symbol, .. } => assert_eq!(symbol, "ADA"),
        other => panic!("expected forward trigger, got {:?}", other),
    }
}

#[test]
fn ties_break_by_tracked_list_order() {
    // 206/200 and 412/400 carry the same 3% premium; the first listed wins.
    let detector = detector_for(&[("ADA", 206.0, 1.0), ("ATOM", 412.0, 2.0)], 200.0);
    match detector.evaluate().unwrap() {
        TickDecision::Forward { symbol, .. } => assert_eq!(symbol, "ADA"),
        other => panic!("expected forward trigger, got {:?}", other),
    }
}

#[test]
fn highest_premium_market_is_selected() {
    // ADA sits at 2%, ATOM at 4%.
    let detector = detector_for(&[("ADA", 204.0, 1.0), ("ATOM", 416.0, 2.0)], 200.0);
    match detector.evaluate().unwrap() {
        TickDecision::Forward { symbol, premium } => {
            assert_eq!(symbol, "ATOM");
            assert_eq!(premium, 4.0);
        }
        other => panic!("expected forward trigger, got {:?}", other),
    }
}

#[test]
fn market_count_mismatch_is_fatal() {
    let table = table_for(&[("ADA", 6000.0, 4.0)], 1450.0);
    // An extra global-only entry breaks the cardinality invariant.
    table.set(Venue::Binance, "EOSUSDT", 1.0);
    let detector = PremiumDetector::new(table, vec!["ADA".to_string()], 1.5);
    assert!(detector.evaluate().is_err());
}

proptest! {
    // Quantization never rounds up and never moves by a full step.
    #[test]
    fn prop_quantize_floors_within_one_step(
        qty in 0.0f64..1_000_000.0,
        exp in 0u32..5,
    ) {
        let step = 10f64.powi(-(exp as i32));
        let floored = floor_to_step(qty, step);
        prop_assert!(floored <= qty + 1e-9);
        prop_assert!(qty - floored < step + 1e-9);
    }

    // The rendered string parses back to the floored value.
    #[test]
    fn prop_quantize_renders_its_own_value(
        qty in 0.0f64..1_000_000.0,
        exp in 0u32..5,
    ) {
        let step = 10f64.powi(-(exp as i32));
        let rendered = quantize(qty, step);
        let parsed: f64 = rendered.parse().unwrap();
        prop_assert!((parsed - floor_to_step(qty, step)).abs() < 1e-9);
    }

    // Premium magnitude does not depend on which side is rich.
    #[test]
    fn prop_premium_symmetric(
        domestic in 100.0f64..10_000_000.0,
        global in 0.01f64..100_000.0,
        rate in 900.0f64..2_000.0,
    ) {
        let forward = detector_for(&[("X", domestic, global)], rate);
        let swapped = detector_for(&[("X", global * rate, domestic / rate)], rate);
        let a = forward.premiums().unwrap().unwrap()[0].1;
        let b = swapped.premiums().unwrap().unwrap()[0].1;
        prop_assert!((a - b).abs() <= 0.002);
    }
}
