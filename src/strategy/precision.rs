//! Venue quantity quantization.
//!
//! Spot lot sizes and on-chain withdrawal limits are expressed as a step size
//! (0.01, 0.0001, 1). Quantities must be floored to the step and rendered with
//! exactly the implied number of decimals; a whole-unit step renders as a
//! plain integer.

/// Decimal places implied by a step size. Steps are powers of ten.
fn step_decimals(step: f64) -> u32 {
    (1.0 / step).log10().round().max(0.0) as u32
}

/// Floor `qty` down to a venue step size.
pub fn floor_to_step(qty: f64, step: f64) -> f64 {
    let scale = 10f64.powi(step_decimals(step) as i32);
    (qty * scale).floor() / scale
}

/// Floor `qty` to the step and render it in the venue's expected decimal form.
pub fn quantize(qty: f64, step: f64) -> String {
    let decimals = step_decimals(step);
    let floored = floor_to_step(qty, step);
    if decimals == 0 {
        format!("{}", floored as i64)
    } else {
        format!("{:.*}", decimals as usize, floored)
    }
}
