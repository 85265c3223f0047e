//! Timestamp helpers.

use chrono::Utc;

/// Returns the current Unix time in milliseconds.
///
/// Used for `created_at`, `computed_at` and undo entry timestamps.
#[must_use]
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
