//! Retry backoff for webhook redelivery.

use chrono::{DateTime, Duration, Utc};

/// Exponent cap: 2^12 s would already exceed the one-hour ceiling.
const MAX_EXPONENT: u32 = 12;

/// Hard ceiling on the spacing between attempts.
const MAX_BACKOFF_SECS: u64 = 3600;

/// Minimum spacing, in seconds, before retrying a webhook that has already
/// been attempted `attempts` times: 1 s, 2 s, 4 s, … 2048 s, then one hour.
pub fn dispatch_backoff_secs(attempts: u32) -> u64 {
    let exponent = attempts.min(MAX_EXPONENT);
    (1u64 << exponent).min(MAX_BACKOFF_SECS)
}

/// Earliest instant a webhook last attempted at `last_attempt_at` with
/// `attempts` prior attempts becomes eligible again.
pub fn backoff_deadline(last_attempt_at: DateTime<Utc>, attempts: u32) -> DateTime<Utc> {
    last_attempt_at + Duration::seconds(dispatch_backoff_secs(attempts) as i64)
}
