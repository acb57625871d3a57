pub mod bars;
pub mod quotes;

pub use bars::{BarTickCallback, DataPulseProvider};
pub use quotes::{QuoteTickCallback, QuotesPulseProvider};

/// Seconds covered by `required_periods` candles at the given resolution.
/// Sizes the trailing re-fetch window for bar updates.
pub fn period_length_seconds(resolution: &str, required_periods: u64) -> u64 {
    let days = if let Some(prefix) = resolution.strip_suffix('D') {
        parse_multiplier(prefix)
    } else if let Some(prefix) = resolution.strip_suffix('W') {
        7 * parse_multiplier(prefix)
    } else if let Some(prefix) = resolution.strip_suffix('M') {
        31 * parse_multiplier(prefix)
    } else {
        let minutes = resolution.parse::<u64>().unwrap_or(1);
        return minutes * 60 * required_periods;
    };
    days * required_periods * 24 * 60 * 60
}

fn parse_multiplier(prefix: &str) -> u64 {
    if prefix.is_empty() {
        1
    } else {
        prefix.parse().unwrap_or(1)
    }
}
