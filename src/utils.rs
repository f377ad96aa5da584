//! Miscellaneous helper utilities.

use bigdecimal::BigDecimal;
use std::str::FromStr;
use tracing_subscriber::{EnvFilter, fmt};

/// Initialize `tracing` subscriber with env-based filter.
///
/// If `RUST_LOG` is not set, defaults to `info` level.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Snap `value` down to the nearest multiple of `step`.
///
/// The division runs in decimal arithmetic so that a value which already sits on
/// the grid maps to itself (`0.3` with step `0.1` stays `0.3`, where naive `f64`
/// division would yield `2.999…` steps). Non-positive values snap to zero; an
/// unusable step leaves the value untouched.
pub fn round_down_to_step(value: f64, step: f64) -> f64 {
    if !value.is_finite() || !step.is_finite() || step <= 0.0 {
        return value;
    }
    if value <= 0.0 {
        return 0.0;
    }
    let (Ok(v), Ok(s)) = (
        BigDecimal::from_str(&value.to_string()),
        BigDecimal::from_str(&step.to_string()),
    ) else {
        return value;
    };
    let steps = (&v / &s).with_scale(0);
    (steps * s).to_string().parse().unwrap_or(value)
}

/// `part / whole × 100`, or zero for an empty whole.
pub fn percentage(part: f64, whole: f64) -> f64 {
    if whole == 0.0 {
        return 0.0;
    }
    part / whole * 100.0
}
