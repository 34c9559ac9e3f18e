//! Shared timestamp, token and duration helpers.

use std::time::Duration;
use ulid::Ulid;

/// Returns unix-epoch milliseconds.
pub fn now_epoch_millis() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Fresh random token identifying one lock holder instance.
pub fn new_lock_token() -> String {
    Ulid::new().to_string()
}

/// Formats a duration for humans, e.g. `2d 4h 15min 15s 312ms`.
///
/// Zero-valued units are omitted; a zero duration renders as `0ms`.
pub fn pretty_duration(duration: Duration) -> String {
    const UNITS: &[(u128, &str)] = &[
        (86_400_000_000_000, "d"),
        (3_600_000_000_000, "h"),
        (60_000_000_000, "min"),
        (1_000_000_000, "s"),
        (1_000_000, "ms"),
        (1_000, "μs"),
        (1, "ns"),
    ];

    let mut remaining = duration.as_nanos();
    if remaining == 0 {
        return "0ms".to_string();
    }
    let mut parts = Vec::new();
    for (size, unit) in UNITS {
        let value = remaining / size;
        if value != 0 {
            parts.push(format!("{}{}", value, unit));
            remaining -= value * size;
        }
    }
    parts.join(" ")
}
