//! Domain entities for the GameSpy replacement layer.
//!
//! Everything here is plain data: no sockets, no files, no process memory.
//!
//! # What is "domain" here? (for beginners)
//!
//! The domain layer holds the values the rest of the system passes around:
//! which server answers which role, who the local player is, what a listed
//! or hosted game looks like, and how an operation ended.  Outer layers (the
//! network poller, the hook manager, the exported native functions) depend on
//! these types, but these types never depend on them, so they can be unit
//! tested on any platform.

/// Backend selection and per-role server endpoints.
pub mod config;

/// Result codes delivered to completion callbacks.
pub mod result;

/// Player, game session and NAT negotiation values.
pub mod session;
