//! Request identifiers for correlating responses with outstanding requests.
//!
//! # Why an identifier when the wire has none? (for beginners)
//!
//! The legacy protocol never echoes anything back that ties a response to
//! the request that caused it.  The backend therefore tags every request it
//! issues with a locally generated [`RequestId`] and keeps the tagged requests
//! in a per-connection queue.  When bytes arrive on a connection, the oldest
//! tagged request on that connection is the one being answered.  The id never
//! leaves the process; it exists so log lines and timeouts can name exactly
//! which request they are talking about.
//!
//! # Thread safety
//!
//! [`SequenceCounter`] is an `AtomicU64`.  Game threads issue requests while
//! the background network thread issues none, but nothing stops two game
//! threads from logging in and fetching the game list at the same time, and
//! `fetch_add` hands each of them a distinct value without a lock.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Locally generated identifier for one outstanding request.
///
/// Ids start at 1 so that a zeroed value is never mistaken for a real request
/// in log output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl RequestId {
    /// Wraps a raw value.  Intended for tests and log parsing.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw value.
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A thread-safe, monotonically increasing source of [`RequestId`]s.
///
/// # Examples
///
/// ```rust
/// use gsr_core::protocol::SequenceCounter;
///
/// let counter = SequenceCounter::new();
/// assert_eq!(counter.next().get(), 1);
/// assert_eq!(counter.next().get(), 2);
/// ```
#[derive(Debug)]
pub struct SequenceCounter {
    inner: AtomicU64,
}

impl SequenceCounter {
    /// Creates a counter whose first id is 1.
    pub fn new() -> Self {
        Self {
            inner: AtomicU64::new(1),
        }
    }

    /// Returns the next id.
    ///
    /// `Relaxed` ordering: ids only need to be distinct, they do not publish
    /// any other memory.  Wraps to 0 after `u64::MAX`, which no session will
    /// ever reach.
    pub fn next(&self) -> RequestId {
        RequestId(self.inner.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the value the next call to [`next`](Self::next) would hand out.
    pub fn peek(&self) -> u64 {
        self.inner.load(Ordering::Relaxed)
    }
}

impl Default for SequenceCounter {
    fn default() -> Self {
        Self::new()
    }
}
