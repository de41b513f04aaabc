//! Translation between host trick-play multipliers and protocol speed codes.
//!
//! The protocol speaks in percent-like codes with a small fixed vocabulary.
//! Negative codes other than [`EMULATED_REWIND_SPEED`] are never sent: rewind
//! is emulated locally by the [`Rewinder`](crate::rewinder::Rewinder).

/// Normal forward playback
pub const NORMAL_SPEED: i32 = 100;

/// Server-side pause
pub const PAUSED_SPEED: i32 = 0;

/// Baseline sent while the rewinder drives the position
pub const EMULATED_REWIND_SPEED: i32 = -100;

/// Host multiplier → protocol code, in ascending multiplier order
const SPEED_TABLE: [(f32, i32); 10] = [
    (-128.0, -500),
    (-32.0, -400),
    (-8.0, -300),
    (-2.0, -200),
    (0.0, EMULATED_REWIND_SPEED),
    (1.0, NORMAL_SPEED),
    (2.0, 200),
    (8.0, 300),
    (32.0, 400),
    (128.0, 500),
];

/// Map a host multiplier onto the protocol vocabulary.
///
/// Multipliers outside the table fall back to [`NORMAL_SPEED`].
#[must_use]
#[allow(clippy::float_cmp)]
pub fn host_to_protocol(multiplier: f32) -> i32 {
    SPEED_TABLE
        .iter()
        .find(|(host, _)| *host == multiplier)
        .map_or(NORMAL_SPEED, |(_, code)| *code)
}

#[must_use]
pub fn protocol_to_host(code: i32) -> Option<f32> {
    SPEED_TABLE
        .iter()
        .find(|(_, protocol)| *protocol == code)
        .map(|(host, _)| *host)
}

/// Whether the multiplier has to be realized by rewind emulation
#[must_use]
pub fn is_rewind(multiplier: f32) -> bool {
    multiplier < 1.0 && !is_paused(multiplier)
}

#[must_use]
#[allow(clippy::float_cmp)]
pub fn is_paused(multiplier: f32) -> bool {
    multiplier == 0.0
}
