//! Integration tests for the gsr-core wire codec.
//!
//! These exercise the public API the way the backend uses it: build a
//! request, put it on the wire, and read back what a server would see; then
//! feed server-shaped responses through the decoder.

use gsr_core::protocol::messages::{self, Message};
use gsr_core::{decode, encode, split_messages, GameSessionInfo, NatNegotiationState};

fn roundtrip(msg: &Message) -> Message {
    decode(msg.encode().as_bytes())
}

#[test]
fn test_roundtrip_every_request_builder() {
    // Arrange
    let session = GameSessionInfo {
        session_id: 1234,
        host_port: 16000,
        current_players: 1,
        max_players: 8,
        ..Default::default()
    };
    let nat = NatNegotiationState {
        cookie: "AbCdEf0123".to_string(),
        target_ip: "10.1.2.3".to_string(),
        target_port: 16001,
        local_port: messages::NAT_LOCAL_PORT,
    };
    let requests = [
        messages::login_request("bob", "pw"),
        messages::list_request(),
        messages::registration(&session, "bob"),
        messages::keep_alive(1234),
        messages::nat_negotiation(&nat),
    ];

    // Act / Assert
    for request in &requests {
        assert_eq!(&roundtrip(request), request);
    }
}

#[test]
fn test_roundtrip_plain_pairs_without_backslashes() {
    // Arrange
    let pairs: Vec<(String, String)> = (0..20)
        .map(|i| (format!("key{i}"), format!("value with spaces {i}")))
        .collect();

    // Act
    let decoded = decode(encode(&pairs).as_bytes());

    // Assert
    assert_eq!(decoded.into_pairs(), pairs);
}

#[test]
fn test_login_error_response_extracts_message() {
    // Arrange
    let raw = b"\\error\\Bad Password\\";

    // Act
    let msg = decode(raw);

    // Assert
    assert_eq!(msg.error(), Some("Bad Password"));
}

#[test]
fn test_login_success_response_exposes_profile_id() {
    let msg = decode(b"\\lc\\2\\sesskey\\1\\userid\\7\\profileid\\1001\\final\\");
    assert_eq!(msg.parse::<u32>("profileid"), Ok(Some(1001)));
    assert!(msg.error().is_none());
}

#[test]
fn test_split_messages_handles_two_responses_in_one_read() {
    // Arrange
    let mut chunk = messages::keep_alive(1).encode();
    chunk.push_str("\\error\\nope\\final\\");

    // Act
    let msgs = split_messages(chunk.as_bytes());

    // Assert
    assert_eq!(msgs.len(), 2);
    assert_eq!(msgs[0].get("sesskey"), Some("1"));
    assert_eq!(msgs[1].error(), Some("nope"));
}
