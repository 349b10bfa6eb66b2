//! Interpretation of decoded server replies.
//!
//! Each function looks at exactly one message and decides what it means for
//! the request it answers.  They hold no state, which keeps the error
//! extraction rules in one place and easy to test.

use gsr_core::protocol::messages::DEFAULT_HOST_PORT;
use gsr_core::{GameSessionInfo, Message, NatNegotiationState, ResultCode};
use tracing::{debug, warn};

use crate::application::backend::{BackendError, Invite};

/// Substituted when a server sends an `error` key with an empty value.
const UNKNOWN_ERROR_TEXT: &str = "Unknown error";

fn error_text(raw: &str) -> String {
    if raw.trim().is_empty() {
        UNKNOWN_ERROR_TEXT.to_string()
    } else {
        raw.to_string()
    }
}

/// Reads the profile id out of a login reply.
///
/// A reply without `error` is a successful login.  A missing or unreadable
/// `profileid` does not fail the login; the player simply gets profile `0`.
///
/// # Errors
///
/// [`BackendError::AuthFailed`] carrying the server's text when the reply
/// has an `error` key.
pub fn interpret_login(message: &Message) -> Result<u32, BackendError> {
    if let Some(raw) = message.error() {
        return Err(BackendError::AuthFailed(error_text(raw)));
    }

    match message.parse::<u32>("profileid") {
        Ok(Some(profile_id)) => Ok(profile_id),
        Ok(None) => {
            debug!("login reply carries no profileid");
            Ok(0)
        }
        Err(e) => {
            warn!("ignoring login reply field: {e}");
            Ok(0)
        }
    }
}

/// Turns a list reply into sessions.
///
/// Entries start at each `sesskey` key.  Replies without any `sesskey` get
/// the fixed placeholder list the replacement servers have always been
/// answered with.
///
/// # Errors
///
/// [`BackendError::ServerUnavailable`] when the reply has an `error` key.
pub fn interpret_game_list(message: &Message) -> Result<Vec<GameSessionInfo>, BackendError> {
    if let Some(raw) = message.error() {
        warn!("game list rejected: {}", error_text(raw));
        return Err(BackendError::ServerUnavailable);
    }

    if !message.contains("sesskey") {
        return Ok(placeholder_game_list());
    }

    let mut sessions = Vec::new();
    let mut current: Option<GameSessionInfo> = None;
    for (key, value) in message.iter() {
        if key == "sesskey" {
            sessions.extend(current.take());
            match value.trim().parse::<u32>() {
                Ok(session_id) => {
                    current = Some(GameSessionInfo {
                        session_id,
                        host_port: DEFAULT_HOST_PORT,
                        ..Default::default()
                    })
                }
                Err(_) => warn!("skipping game list entry with sesskey {value:?}"),
            }
            continue;
        }

        let Some(entry) = current.as_mut() else {
            continue;
        };
        apply_list_field(entry, key, value);
    }
    sessions.extend(current);

    Ok(sessions)
}

fn apply_list_field(entry: &mut GameSessionInfo, key: &str, value: &str) {
    fn number<T: std::str::FromStr + Default>(key: &str, value: &str) -> T {
        value.trim().parse().unwrap_or_else(|_| {
            warn!("game list field {key} has malformed value {value:?}");
            T::default()
        })
    }

    match key {
        "hostname" => entry.host_name = value.to_string(),
        "ip" => entry.host_ip = value.to_string(),
        "hostport" => entry.host_port = number(key, value),
        "sessionname" => entry.session_name = value.to_string(),
        "numplayers" => entry.current_players = number(key, value),
        "maxplayers" => entry.max_players = number(key, value),
        "password" => entry.password_required = value.trim() == "1",
        _ => {}
    }
}

/// The three sessions reported when the server sends no parseable list.
pub fn placeholder_game_list() -> Vec<GameSessionInfo> {
    (0..3u32)
        .map(|i| GameSessionInfo {
            session_id: 1000 + i,
            host_name: format!("Host{i}"),
            host_ip: format!("192.168.1.{}", 10 + i),
            host_port: DEFAULT_HOST_PORT,
            session_name: format!("Test Game {i}"),
            current_players: 1,
            max_players: 8,
            password_required: i % 2 == 0,
        })
        .collect()
}

/// Checks a registration reply.
///
/// # Errors
///
/// [`BackendError::Unknown`] carrying the server's text when the reply has
/// an `error` key.
pub fn interpret_host(message: &Message) -> Result<(), BackendError> {
    match message.error() {
        Some(raw) => Err(BackendError::Unknown(error_text(raw))),
        None => Ok(()),
    }
}

/// Reads the negotiated address out of a NAT negotiation reply.
///
/// Missing (or unreadable) `ip` and `port` fall back to the address the
/// negotiation was started for.
///
/// # Errors
///
/// [`BackendError::NatFailure`] carrying the server's text when the reply
/// has an `error` key.
pub fn interpret_nat(
    message: &Message,
    state: &NatNegotiationState,
) -> Result<(String, u16), BackendError> {
    if let Some(raw) = message.error() {
        return Err(BackendError::NatFailure(error_text(raw)));
    }

    let ip = match message.get("ip").map(str::trim) {
        Some(ip) if !ip.is_empty() => ip.to_string(),
        _ => state.target_ip.clone(),
    };
    let port = match message.parse::<u16>("port") {
        Ok(Some(port)) if port != 0 => port,
        Ok(_) => state.target_port,
        Err(e) => {
            warn!("ignoring NAT reply field: {e}");
            state.target_port
        }
    };

    Ok((ip, port))
}

/// Recognises an invitation pushed on the chat connection.
pub fn interpret_invite(message: &Message) -> Option<Invite> {
    if !message.contains("invite") {
        return None;
    }

    let from = message
        .get("from")
        .or_else(|| message.get("invite"))
        .unwrap_or_default()
        .to_string();
    let session_id = message.parse::<u32>("sesskey").ok().flatten().unwrap_or(0);

    Some(Invite {
        result: ResultCode::Success,
        from,
        session_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use gsr_core::decode;

    fn nat_state() -> NatNegotiationState {
        NatNegotiationState {
            cookie: "c".repeat(10),
            target_ip: "192.168.1.10".to_string(),
            target_port: 16000,
            local_port: 16500,
        }
    }

    // ── Login ─────────────────────────────────────────────────────────────────

    #[test]
    fn test_login_error_yields_auth_failed_with_server_text() {
        // Arrange
        let msg = decode(b"\\error\\Bad Password\\");

        // Act
        let result = interpret_login(&msg);

        // Assert
        assert_eq!(result, Err(BackendError::AuthFailed("Bad Password".to_string())));
        assert_eq!(result.unwrap_err().code(), ResultCode::AuthFailed);
    }

    #[test]
    fn test_login_empty_error_uses_unknown_error_text() {
        let msg = decode(b"\\error\\\\final\\");
        assert_eq!(
            interpret_login(&msg),
            Err(BackendError::AuthFailed("Unknown error".to_string()))
        );
    }

    #[test]
    fn test_login_success_reads_profile_id() {
        let msg = decode(b"\\lc\\2\\profileid\\77\\final\\");
        assert_eq!(interpret_login(&msg), Ok(77));
    }

    #[test]
    fn test_login_malformed_profile_id_still_succeeds() {
        let msg = decode(b"\\profileid\\abc\\final\\");
        assert_eq!(interpret_login(&msg), Ok(0));
    }

    // ── Game list ─────────────────────────────────────────────────────────────

    #[test]
    fn test_game_list_without_entries_yields_placeholders() {
        // Arrange
        let msg = decode(b"\\final\\");

        // Act
        let list = interpret_game_list(&msg).expect("list");

        // Assert
        assert_eq!(list.len(), 3);
        assert_eq!(list[0].session_id, 1000);
        assert_eq!(list[0].host_name, "Host0");
        assert_eq!(list[0].host_ip, "192.168.1.10");
        assert_eq!(list[2].host_ip, "192.168.1.12");
        assert_eq!(list[1].session_name, "Test Game 1");
        assert!(list[0].password_required);
        assert!(!list[1].password_required);
        assert!(list.iter().all(|g| g.host_port == 16000 && g.max_players == 8));
    }

    #[test]
    fn test_game_list_parses_sesskey_groups() {
        // Arrange
        let msg = decode(
            b"\\sesskey\\5001\\hostname\\alice\\ip\\10.0.0.2\\hostport\\16001\\numplayers\\2\\maxplayers\\4\\password\\1\
              \\sesskey\\5002\\hostname\\bob\\ip\\10.0.0.3\\sessionname\\Late game\\final\\",
        );

        // Act
        let list = interpret_game_list(&msg).expect("list");

        // Assert
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].session_id, 5001);
        assert_eq!(list[0].host_port, 16001);
        assert_eq!(list[0].current_players, 2);
        assert!(list[0].password_required);
        assert_eq!(list[1].host_name, "bob");
        assert_eq!(list[1].host_port, 16000, "hostport defaults to the game port");
        assert_eq!(list[1].session_name, "Late game");
    }

    #[test]
    fn test_game_list_skips_entry_with_bad_sesskey() {
        let msg = decode(b"\\sesskey\\x\\hostname\\ghost\\sesskey\\7\\hostname\\real\\final\\");
        let list = interpret_game_list(&msg).expect("list");
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].host_name, "real");
    }

    #[test]
    fn test_game_list_error_is_server_unavailable() {
        let msg = decode(b"\\error\\busy\\final\\");
        assert_eq!(interpret_game_list(&msg), Err(BackendError::ServerUnavailable));
    }

    // ── Host ──────────────────────────────────────────────────────────────────

    #[test]
    fn test_host_error_is_unknown_with_text() {
        let msg = decode(b"\\error\\Duplicate session\\final\\");
        let err = interpret_host(&msg).unwrap_err();
        assert_eq!(err, BackendError::Unknown("Duplicate session".to_string()));
        assert_eq!(err.code(), ResultCode::Unknown);
    }

    #[test]
    fn test_host_without_error_succeeds() {
        assert_eq!(interpret_host(&decode(b"\\final\\")), Ok(()));
    }

    // ── NAT ───────────────────────────────────────────────────────────────────

    #[test]
    fn test_nat_reply_without_address_keeps_target() {
        // Arrange
        let msg = decode(b"\\natneg\\\\cookie\\cccccccccc\\final\\");

        // Act
        let result = interpret_nat(&msg, &nat_state());

        // Assert
        assert_eq!(result, Ok(("192.168.1.10".to_string(), 16000)));
    }

    #[test]
    fn test_nat_reply_with_address_overrides_target() {
        let msg = decode(b"\\ip\\203.0.113.5\\port\\27015\\final\\");
        assert_eq!(
            interpret_nat(&msg, &nat_state()),
            Ok(("203.0.113.5".to_string(), 27015))
        );
    }

    #[test]
    fn test_nat_reply_with_garbage_port_keeps_target_port() {
        let msg = decode(b"\\ip\\203.0.113.5\\port\\99999\\final\\");
        assert_eq!(
            interpret_nat(&msg, &nat_state()),
            Ok(("203.0.113.5".to_string(), 16000))
        );
    }

    #[test]
    fn test_nat_error_is_nat_failure() {
        let msg = decode(b"\\error\\peer vanished\\final\\");
        assert_eq!(
            interpret_nat(&msg, &nat_state()),
            Err(BackendError::NatFailure("peer vanished".to_string()))
        );
    }

    // ── Invite ────────────────────────────────────────────────────────────────

    #[test]
    fn test_invite_reads_sender_and_session() {
        let msg = decode(b"\\invite\\\\from\\carol\\sesskey\\4242\\final\\");
        let invite = interpret_invite(&msg).expect("invite");
        assert_eq!(invite.from, "carol");
        assert_eq!(invite.session_id, 4242);
        assert_eq!(invite.result, ResultCode::Success);
    }

    #[test]
    fn test_non_invite_chat_message_is_ignored() {
        assert!(interpret_invite(&decode(b"\\msg\\hi\\final\\")).is_none());
    }
}
