//! Result codes delivered to completion callbacks.
//!
//! Every asynchronous operation ends with exactly one callback carrying one
//! of these codes.  The translation to the legacy integer space the game
//! expects lives in `gsr-proxy`, next to the exported functions that need it.

use std::fmt;

/// Outcome of one backend operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultCode {
    Success,
    Network,
    AuthFailed,
    ServerUnavailable,
    Timeout,
    NatFailure,
    Unknown,
}

impl ResultCode {
    /// Every code, success first.
    pub const ALL: [ResultCode; 7] = [
        ResultCode::Success,
        ResultCode::Network,
        ResultCode::AuthFailed,
        ResultCode::ServerUnavailable,
        ResultCode::Timeout,
        ResultCode::NatFailure,
        ResultCode::Unknown,
    ];

    pub const fn is_success(self) -> bool {
        matches!(self, ResultCode::Success)
    }

    /// Upper-case name as it appears in logs.
    pub const fn as_str(self) -> &'static str {
        match self {
            ResultCode::Success => "SUCCESS",
            ResultCode::Network => "ERROR_NETWORK",
            ResultCode::AuthFailed => "ERROR_AUTH_FAILED",
            ResultCode::ServerUnavailable => "ERROR_SERVER_UNAVAILABLE",
            ResultCode::Timeout => "ERROR_TIMEOUT",
            ResultCode::NatFailure => "ERROR_NAT_FAILURE",
            ResultCode::Unknown => "ERROR_UNKNOWN",
        }
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
