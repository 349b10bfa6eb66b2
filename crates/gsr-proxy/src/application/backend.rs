//! The backend capability trait and its callback contract.
//!
//! A backend turns SDK-level operations (log in, list games, host, join)
//! into traffic against one family of replacement servers.  Every operation
//! that needs a server round trip returns immediately and reports its outcome
//! through a callback, exactly once, usually from the backend's background
//! network thread.
//!
//! # Callback rules
//!
//! - A callback may run on the caller's thread (when the operation fails
//!   before anything is sent, for example a refused connection) or on the
//!   background thread (everything else).  It never runs while the backend
//!   holds one of its internal locks, so calling back into the backend from a
//!   callback is allowed.
//! - There is no ordering guarantee between callbacks of different
//!   operations.
//! - A panic inside a callback is caught and logged; it never takes the
//!   network thread down.

use std::sync::Arc;

use gsr_core::{BackendConfig, GameSessionInfo, PlayerInfo, ResultCode};
use thiserror::Error;

/// Why a backend operation failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    /// The connection carrying the request was lost, or the backend is not
    /// running.
    #[error("network unreachable")]
    NetworkUnreachable,

    /// The server for the required role could not be reached or refused the
    /// request.
    #[error("server unavailable")]
    ServerUnavailable,

    /// The login server rejected the credentials.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// No reply arrived within the request timeout.
    #[error("request timed out")]
    Timeout,

    /// NAT negotiation could not be started or was rejected.
    #[error("NAT negotiation failed: {0}")]
    NatFailure(String),

    /// The reply could not be understood.
    #[error("protocol error: {0}")]
    ProtocolError(String),

    #[error("{0}")]
    Unknown(String),
}

impl BackendError {
    /// Result code delivered to the game for this error.
    pub fn code(&self) -> ResultCode {
        match self {
            BackendError::NetworkUnreachable => ResultCode::Network,
            BackendError::ServerUnavailable => ResultCode::ServerUnavailable,
            BackendError::AuthFailed(_) => ResultCode::AuthFailed,
            BackendError::Timeout => ResultCode::Timeout,
            BackendError::NatFailure(_) => ResultCode::NatFailure,
            BackendError::ProtocolError(_) | BackendError::Unknown(_) => ResultCode::Unknown,
        }
    }
}

impl From<&BackendError> for ResultCode {
    fn from(err: &BackendError) -> Self {
        err.code()
    }
}

/// An invitation from another player to join their session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invite {
    pub result: ResultCode,
    pub from: String,
    pub session_id: u32,
}

/// Completion of [`GameBackend::login`].
pub type LoginCallback = Box<dyn FnOnce(Result<PlayerInfo, BackendError>) + Send>;

/// Completion of [`GameBackend::fetch_game_list`].
pub type GameListCallback = Box<dyn FnOnce(Result<Vec<GameSessionInfo>, BackendError>) + Send>;

/// Completion of [`GameBackend::host_game`]; carries the session as
/// registered, including a generated session id.
pub type HostCallback = Box<dyn FnOnce(Result<GameSessionInfo, BackendError>) + Send>;

/// Completion of [`GameBackend::join_game`]; carries the session with the
/// negotiated host address.
pub type JoinCallback = Box<dyn FnOnce(Result<GameSessionInfo, BackendError>) + Send>;

/// Long-lived handler for unsolicited invitations.
pub type InviteCallback = Arc<dyn Fn(&Invite) + Send + Sync>;

/// Capability set every backend variant provides.
///
/// All methods take `&self`: a backend is shared between the game's threads
/// and its own network thread, so implementations use interior mutability.
#[cfg_attr(test, mockall::automock)]
pub trait GameBackend: Send + Sync {
    /// Starts the background machinery.  No connections are opened yet.
    ///
    /// # Errors
    ///
    /// Fails only when the network thread cannot be started.
    fn initialize(&self, config: BackendConfig) -> Result<(), BackendError>;

    /// Stops the background thread and closes every connection.  Requests
    /// still outstanding complete with [`BackendError::NetworkUnreachable`].
    /// Calling it twice is harmless.
    fn shutdown(&self);

    /// Replaces any existing login connection and authenticates.
    fn login(&self, username: &str, password: &str, callback: LoginCallback);

    /// Requests the list of open games from the master server.
    fn fetch_game_list(&self, callback: GameListCallback);

    /// Registers `session` with the master server.  A session id of `0` is
    /// replaced by a generated one.
    fn host_game(&self, session: GameSessionInfo, callback: HostCallback);

    /// Forgets the locally hosted session so heartbeats stop.
    fn cancel_host(&self);

    /// Negotiates a route to the host of `session`.
    fn join_game(&self, session: GameSessionInfo, callback: JoinCallback);

    /// Fire-and-forget invitation.
    fn send_invite(&self, username: &str, session_id: u32);

    /// Installs (or with `None`, clears) the invitation handler.
    fn register_invite_callback(&self, callback: Option<InviteCallback>);

    /// Gives the backend a chance to run work on the caller's thread.
    fn pump_events(&self);
}
