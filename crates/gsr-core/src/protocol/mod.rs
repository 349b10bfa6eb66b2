//! Protocol module containing the key/value codec, message builders and the
//! request sequence counter.

pub mod codec;
pub mod messages;
pub mod sequence;

pub use codec::{decode, encode, split_messages};
pub use messages::{FieldError, Message};
pub use sequence::{RequestId, SequenceCounter};
