//! # gsr-core
//!
//! Shared library for the GameSpy replacement layer containing the legacy
//! key/value wire codec and the session domain model.
//!
//! This crate has zero dependencies on OS APIs, sockets, or process memory.
//! Everything that touches the outside world lives in `gsr-proxy`.
//!
//! # Architecture overview (for beginners)
//!
//! The game was written against an online-services SDK whose servers no
//! longer exist.  The replacement layer intercepts the SDK's exported entry
//! points and speaks the SDK's text protocol to a replacement server instead.
//!
//! This crate (`gsr-core`) is the shared foundation.  It defines:
//!
//! - **`protocol`** – How bytes travel over the network.  Messages are flat,
//!   backslash-delimited key/value lists terminated by `\final\`.  The codec
//!   turns an ordered list of pairs into that text and back, and the message
//!   builders produce every request the backend sends.
//!
//! - **`domain`** – Plain data with no OS dependencies: the backend
//!   configuration, the local player, hosted and listed sessions, NAT
//!   negotiation state, and the result codes delivered to callbacks.

pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `gsr_core::Message` instead of `gsr_core::protocol::messages::Message`.
pub use domain::config::{BackendConfig, Endpoint, Role};
pub use domain::result::ResultCode;
pub use domain::session::{GameSessionInfo, NatNegotiationState, PlayerInfo};
pub use protocol::codec::{decode, encode, split_messages};
pub use protocol::messages::{FieldError, Message};
pub use protocol::sequence::{RequestId, SequenceCounter};
