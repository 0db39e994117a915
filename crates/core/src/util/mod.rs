pub mod retry;

pub use retry::{is_http_retryable, retry_with_backoff, RetryConfig};

/// Rounds to `places` decimal places; exact ties go to the even neighbour.
pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    let scaled = value * factor;
    let rounded = if (scaled - scaled.trunc()).abs() == 0.5 {
        2.0 * (scaled / 2.0).round()
    } else {
        scaled.round()
    };
    rounded / factor
}
