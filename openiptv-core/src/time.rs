//! Time unit helpers.
//!
//! Every PTS, offset and seek target inside the workspace is a signed
//! microsecond count. Host positions are milliseconds and DVR entry bounds are
//! seconds; conversions happen only through these helpers.

/// Host-facing position reported when no subscription is available yet
pub const INVALID_POSITION_MS: i64 = -1;

#[must_use]
pub const fn ms_to_us(ms: i64) -> i64 {
    ms.saturating_mul(1_000)
}

#[must_use]
pub const fn us_to_ms(us: i64) -> i64 {
    us / 1_000
}

#[must_use]
pub const fn ms_to_secs(ms: i64) -> i64 {
    ms / 1_000
}

/// Current wall-clock time in milliseconds since the Unix epoch
#[must_use]
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
