//! Application layer of the replacement SDK.
//!
//! # What lives here? (for beginners)
//!
//! The application layer decides *what* the backend does with a login
//! request or a server reply; the infrastructure layer decides *how* bytes
//! reach a socket.  Nothing in this module opens a socket, touches process
//! memory or reads a file, which is why the whole protocol state machine can
//! be unit tested by feeding it decoded messages directly.
//!
//! # Sub-modules
//!
//! - **`backend`**      – The `GameBackend` capability trait every backend
//!   variant implements, its callback types and `BackendError`.
//! - **`dispatch`**     – The `ProtocolHandler` seam the network poller
//!   drives: requests sent, messages received, connections closed.
//! - **`session`**      – `RevoraSession`, the per-backend protocol state:
//!   local player, hosted session, cached game list and the per-role queues
//!   of outstanding requests.
//! - **`responses`**    – Pure functions turning one decoded server reply
//!   into a typed outcome.
//! - **`result_codes`** – Translation between `ResultCode` and the small
//!   integers the game understands.

pub mod backend;
pub mod dispatch;
pub mod responses;
pub mod result_codes;
pub mod session;
