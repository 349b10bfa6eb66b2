//! Decoded messages and builders for every request the backend sends.
//!
//! A [`Message`] is nothing more than an ordered list of key/value string
//! pairs.  The legacy protocol has no message-type header: the first key
//! usually names the command (`login`, `list`, `heartbeat`, `natneg`) and
//! responses are recognised by which connection they arrive on and which keys
//! they carry (`error`, `profileid`, `ip`, ...).

use std::str::FromStr;

use thiserror::Error;

use crate::domain::session::{GameSessionInfo, NatNegotiationState};
use crate::protocol::codec;

// ── Protocol constants ────────────────────────────────────────────────────────

/// Game identifier sent with every request.
pub const GAME_NAME: &str = "ccgenzh";

/// Game version advertised when registering a hosted session.
pub const GAME_VERSION: &str = "1.04";

/// Map advertised when registering a hosted session.
pub const DEFAULT_MAP: &str = "Alpine Assault";

/// Game mode advertised when registering a hosted session.
pub const GAME_MODE: &str = "openplaying";

/// Port the game listens on when hosting, unless told otherwise.
pub const DEFAULT_HOST_PORT: u16 = 16000;

/// Local port offered to the NAT negotiation server.
pub const NAT_LOCAL_PORT: u16 = 16500;

/// Fixed request id carried by the login request.
pub const LOGIN_REQUEST_ID: &str = "1";

/// Key carrying a server-side error description.
pub const ERROR_KEY: &str = "error";

// ── Field errors ──────────────────────────────────────────────────────────────

/// A value was present but could not be parsed into the requested type.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FieldError {
    #[error("field `{key}` has malformed value {value:?}")]
    Malformed { key: String, value: String },
}

// ── Message ───────────────────────────────────────────────────────────────────

/// An ordered list of key/value pairs.
///
/// Duplicate keys are kept; lookups return the first occurrence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    pairs: Vec<(String, String)>,
}

impl Message {
    /// Creates an empty message.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a message whose first pair is `name` with an empty value, the
    /// way every request opens.
    pub fn command(name: &str) -> Self {
        let mut msg = Self::new();
        msg.push(name, "");
        msg
    }

    /// Appends a pair and returns `self` for chaining.
    pub fn with(mut self, key: &str, value: impl ToString) -> Self {
        self.pairs.push((key.to_string(), value.to_string()));
        self
    }

    /// Appends a pair.
    pub fn push(&mut self, key: &str, value: &str) {
        self.pairs.push((key.to_string(), value.to_string()));
    }

    /// Returns the first value stored under `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Returns `true` if `key` appears at least once.
    pub fn contains(&self, key: &str) -> bool {
        self.pairs.iter().any(|(k, _)| k == key)
    }

    /// Returns the first key, which names the command for requests.
    pub fn command_name(&self) -> Option<&str> {
        self.pairs.first().map(|(k, _)| k.as_str())
    }

    /// Returns the server's error text if the message carries an `error` key.
    ///
    /// The text may be empty; callers decide what to substitute.
    pub fn error(&self) -> Option<&str> {
        self.get(ERROR_KEY)
    }

    /// Parses the value under `key`.
    ///
    /// Returns `Ok(None)` when the key is absent and `Err` when it is present
    /// but does not parse.
    pub fn parse<T: FromStr>(&self, key: &str) -> Result<Option<T>, FieldError> {
        match self.get(key) {
            None => Ok(None),
            Some(raw) => raw
                .trim()
                .parse::<T>()
                .map(Some)
                .map_err(|_| FieldError::Malformed {
                    key: key.to_string(),
                    value: raw.to_string(),
                }),
        }
    }

    /// Iterates over the pairs in wire order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Consumes the message and returns its pairs.
    pub fn into_pairs(self) -> Vec<(String, String)> {
        self.pairs
    }

    /// Encodes the message into wire text, `\final\` included.
    pub fn encode(&self) -> String {
        codec::encode(&self.pairs)
    }
}

impl From<Vec<(String, String)>> for Message {
    fn from(pairs: Vec<(String, String)>) -> Self {
        Self { pairs }
    }
}

// ── Request builders ──────────────────────────────────────────────────────────

/// `\login\\user\..\password\..\gamename\ccgenzh\id\1\final\`
///
/// The password travels in clear text; the legacy challenge/response hashing
/// was never implemented by the replacement servers.
pub fn login_request(username: &str, password: &str) -> Message {
    Message::command("login")
        .with("user", username)
        .with("password", password)
        .with("gamename", GAME_NAME)
        .with("id", LOGIN_REQUEST_ID)
}

/// `\list\\gamename\ccgenzh\final\`
pub fn list_request() -> Message {
    Message::command("list").with("gamename", GAME_NAME)
}

/// Full registration of a hosted session with the master server.
///
/// `hostname` is the name shown in other players' lobbies, which the legacy
/// client takes from the logged-in username.
pub fn registration(session: &GameSessionInfo, hostname: &str) -> Message {
    Message::command("heartbeat")
        .with("gamename", GAME_NAME)
        .with("gamever", GAME_VERSION)
        .with("hostname", hostname)
        .with("hostport", session.host_port)
        .with("mapname", DEFAULT_MAP)
        .with("numplayers", session.current_players)
        .with("maxplayers", session.max_players)
        .with("gamemode", GAME_MODE)
        .with("password", if session.password_required { "1" } else { "0" })
        .with("sesskey", session.session_id)
}

/// Short keep-alive that keeps a registered session listed.
pub fn keep_alive(session_id: u32) -> Message {
    Message::command("heartbeat")
        .with("gamename", GAME_NAME)
        .with("sesskey", session_id)
}

/// NAT negotiation request keyed by the state's cookie.
pub fn nat_negotiation(state: &NatNegotiationState) -> Message {
    Message::command("natneg")
        .with("cookie", &state.cookie)
        .with("ip", &state.target_ip)
        .with("port", state.target_port)
        .with("localport", state.local_port)
}
