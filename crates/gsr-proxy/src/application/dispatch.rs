//! The seam between protocol state and the network poller.
//!
//! The poller in `infrastructure::network` owns the sockets and the
//! background thread; it knows nothing about logins or game lists.  Whenever
//! something happens on a connection it calls into a [`ProtocolHandler`],
//! which updates protocol state and answers with a list of [`Delivery`]
//! closures.  The poller runs those closures *after* releasing the handler's
//! lock, so a completion callback may call straight back into the backend.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};

use gsr_core::{Message, Role};
use tracing::error;

/// A completion ready to run outside every backend lock.
pub type Delivery = Box<dyn FnOnce() + Send>;

/// Why a connection slot was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The server closed the connection (zero-byte read).
    PeerClosed,
    /// Reading from the socket failed.
    ReadFailed,
    /// Writing to the socket failed.
    WriteFailed,
    /// A newer connection for the same role took over the slot.
    Replaced,
    /// An outstanding request on the connection timed out.
    TimedOut,
    /// Closed on request, for example by logout.
    Requested,
    /// The request was addressed to a role with no open connection.
    NotConnected,
    /// The poller is stopping.
    Shutdown,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            CloseReason::PeerClosed => "closed by server",
            CloseReason::ReadFailed => "read failed",
            CloseReason::WriteFailed => "write failed",
            CloseReason::Replaced => "replaced by a new connection",
            CloseReason::TimedOut => "request timed out",
            CloseReason::Requested => "closed locally",
            CloseReason::NotConnected => "not connected",
            CloseReason::Shutdown => "backend shutting down",
        };
        f.write_str(text)
    }
}

/// Protocol state driven by the network poller.
///
/// All methods run on the poller thread with the handler locked.  They must
/// not block and must not invoke user callbacks directly; anything that
/// would call out goes into the returned deliveries.
pub trait ProtocolHandler: Send + 'static {
    /// Per-request bookkeeping travelling with a payload to the poller.
    type Request: Send + 'static;

    /// The payload for `request` has been written to `role`'s connection.
    fn on_request_sent(&mut self, role: Role, request: Self::Request, now: Instant);

    /// The payload for `request` never reached the server.
    fn on_request_failed(
        &mut self,
        role: Role,
        request: Self::Request,
        reason: CloseReason,
    ) -> Vec<Delivery>;

    /// One decoded message arrived on `role`'s connection.
    fn on_message(&mut self, role: Role, message: Message) -> Vec<Delivery>;

    /// `role`'s connection is gone; nothing outstanding on it will be
    /// answered.
    fn on_closed(&mut self, role: Role, reason: CloseReason) -> Vec<Delivery>;

    /// The keep-alive to send now, if any.
    fn heartbeat(&self) -> Option<(Role, Message)>;

    /// Completes requests outstanding for longer than `timeout`.
    ///
    /// Returns the roles whose connections must be closed because their
    /// replies can no longer be correlated, plus the deliveries to run.
    fn expire(&mut self, now: Instant, timeout: Duration) -> (Vec<Role>, Vec<Delivery>);
}

/// Runs each delivery, containing panics so one faulty callback cannot stop
/// the others or the calling thread.
pub fn run_deliveries(deliveries: Vec<Delivery>) {
    for delivery in deliveries {
        if panic::catch_unwind(AssertUnwindSafe(delivery)).is_err() {
            error!("completion callback panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_run_deliveries_continues_after_panic() {
        // Arrange
        let ran = Arc::new(AtomicUsize::new(0));
        let before = Arc::clone(&ran);
        let after = Arc::clone(&ran);
        let deliveries: Vec<Delivery> = vec![
            Box::new(move || {
                before.fetch_add(1, Ordering::SeqCst);
            }),
            Box::new(|| panic!("callback bug")),
            Box::new(move || {
                after.fetch_add(1, Ordering::SeqCst);
            }),
        ];

        // Act
        run_deliveries(deliveries);

        // Assert
        assert_eq!(ran.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_close_reason_display_is_human_readable() {
        assert_eq!(CloseReason::PeerClosed.to_string(), "closed by server");
        assert_eq!(CloseReason::TimedOut.to_string(), "request timed out");
    }
}
