//! Text codec for the legacy key/value wire format.
//!
//! Wire format:
//! ```text
//! \key1\value1\key2\value2\...\final\
//! ```
//! Every message is a flat, ordered sequence of backslash-delimited tokens
//! terminated by the sentinel key `final` with an empty value.  There is no
//! length prefix, no checksum and no escaping: a value that contains a
//! backslash corrupts the framing of everything after it.
//!
//! # Decoding never fails
//!
//! The servers on the other end are third-party reimplementations of a
//! protocol nobody documented, so the decoder is deliberately forgiving.
//! Tokens that cannot form a key/value pair (a dangling key at the end of the
//! input, an empty key) are dropped and decoding carries on with whatever is
//! left.  Callers look values up by key and treat absence as "not sent".
//!
//! # Framing
//!
//! TCP is a byte stream, so one `read()` may return a partial message or
//! several messages back to back.  [`split_messages`] cuts a received chunk at
//! every `final` sentinel; trailing tokens without a sentinel are returned as
//! one more message, which matches the legacy servers that answer with a
//! single unterminated chunk.  A message split across two reads is still
//! decoded as two fragments.

use tracing::trace;

use crate::protocol::messages::Message;

/// Sentinel key that terminates every message.
pub const FINAL_KEY: &str = "final";

/// Token separator.
pub const SEPARATOR: char = '\\';

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes an ordered list of key/value pairs, appending the `\final\`
/// terminator.
///
/// Values are written verbatim.
///
/// # Examples
///
/// ```rust
/// use gsr_core::protocol::codec::encode;
///
/// let wire = encode(&[("list", ""), ("gamename", "ccgenzh")]);
/// assert_eq!(wire, "\\list\\\\gamename\\ccgenzh\\final\\");
/// ```
pub fn encode<K, V>(pairs: &[(K, V)]) -> String
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    let capacity = pairs
        .iter()
        .map(|(k, v)| k.as_ref().len() + v.as_ref().len() + 2)
        .sum::<usize>()
        + FINAL_KEY.len()
        + 2;

    let mut out = String::with_capacity(capacity);
    for (key, value) in pairs {
        out.push(SEPARATOR);
        out.push_str(key.as_ref());
        out.push(SEPARATOR);
        out.push_str(value.as_ref());
    }
    out.push(SEPARATOR);
    out.push_str(FINAL_KEY);
    out.push(SEPARATOR);
    out
}

/// Decodes the first message in `raw`.
///
/// Decoding stops at the first `final` sentinel.  Malformed tokens are simply
/// absent from the result; an input with no usable pairs yields an empty
/// [`Message`].
///
/// # Examples
///
/// ```rust
/// use gsr_core::protocol::codec::decode;
///
/// let msg = decode(b"\\error\\Bad Password\\");
/// assert_eq!(msg.get("error"), Some("Bad Password"));
/// ```
pub fn decode(raw: &[u8]) -> Message {
    split_messages(raw).into_iter().next().unwrap_or_default()
}

/// Splits a received chunk into every message it contains.
///
/// Returns an empty vector when the chunk holds no usable pairs.
pub fn split_messages(chunk: &[u8]) -> Vec<Message> {
    let text = String::from_utf8_lossy(chunk);
    let body = text.strip_prefix(SEPARATOR).unwrap_or(&text);

    let mut messages = Vec::new();
    let mut current = Message::new();
    let mut tokens = body.split(SEPARATOR);

    while let Some(key) = tokens.next() {
        if key == FINAL_KEY {
            // Skip the sentinel's empty value.
            tokens.next();
            messages.push(std::mem::take(&mut current));
            continue;
        }

        let Some(value) = tokens.next() else {
            if !key.is_empty() {
                trace!("dropping dangling key {key:?}");
            }
            break;
        };

        if key.is_empty() {
            trace!("dropping value {value:?} with empty key");
            continue;
        }

        current.push(key, value);
    }

    if !current.is_empty() {
        messages.push(current);
    }

    messages
}

// ── Tests ─────────────────────────────────────────────────────────────────────
