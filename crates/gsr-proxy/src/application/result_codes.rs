//! Translation between [`ResultCode`] and the game's integer result codes.
//!
//! The game only knows the integers `0..=5`.  Anything it does not know is
//! reported as `-1`, and any integer it hands us that we do not know becomes
//! [`ResultCode::Unknown`].  The round trip is therefore lossless for
//! `0..=5` and deliberately lossy for everything else.

use gsr_core::ResultCode;

/// Legacy value for codes outside the table.
pub const LEGACY_UNKNOWN: i32 = -1;

/// The explicit mapping, in legacy order.
pub const LEGACY_TABLE: [(i32, ResultCode); 6] = [
    (0, ResultCode::Success),
    (1, ResultCode::Network),
    (2, ResultCode::AuthFailed),
    (3, ResultCode::ServerUnavailable),
    (4, ResultCode::Timeout),
    (5, ResultCode::NatFailure),
];

/// Maps a legacy integer to a [`ResultCode`].
pub fn map_from_legacy(code: i32) -> ResultCode {
    LEGACY_TABLE
        .iter()
        .find(|(legacy, _)| *legacy == code)
        .map(|(_, result)| *result)
        .unwrap_or(ResultCode::Unknown)
}

/// Maps a [`ResultCode`] to the integer the game expects.
pub fn map_to_legacy(code: ResultCode) -> i32 {
    LEGACY_TABLE
        .iter()
        .find(|(_, result)| *result == code)
        .map(|(legacy, _)| *legacy)
        .unwrap_or(LEGACY_UNKNOWN)
}
