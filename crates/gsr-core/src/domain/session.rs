//! Player, game session and NAT negotiation values.

/// Smallest session id the backend will generate for a new hosted game.
pub const SESSION_ID_MIN: u32 = 1000;

/// Largest session id the backend will generate for a new hosted game.
pub const SESSION_ID_MAX: u32 = 9_999_999;

/// The locally logged-in player.
///
/// Reset to the default (empty, offline) value when a login starts and
/// populated when the login server accepts the credentials.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlayerInfo {
    pub username: String,
    pub profile_id: u32,
    pub online: bool,
}

/// A multiplayer game as listed by the master server or hosted locally.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GameSessionInfo {
    /// `0` means "not assigned yet"; hosting assigns a random id.
    pub session_id: u32,
    pub host_name: String,
    pub host_ip: String,
    pub host_port: u16,
    pub session_name: String,
    pub current_players: u32,
    pub max_players: u32,
    pub password_required: bool,
}

impl GameSessionInfo {
    /// Returns `true` once a session id has been assigned.
    pub fn has_session_id(&self) -> bool {
        self.session_id != 0
    }

    /// Returns `true` if `id` lies in the range used for generated ids.
    pub fn is_generated_id(id: u32) -> bool {
        (SESSION_ID_MIN..=SESSION_ID_MAX).contains(&id)
    }
}

/// One in-flight NAT negotiation, alive from `JoinGame` until the
/// negotiation server answers (or the attempt fails).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NatNegotiationState {
    /// Random alphanumeric token pairing both peers at the rendezvous server.
    pub cookie: String,
    pub target_ip: String,
    pub target_port: u16,
    pub local_port: u16,
}
