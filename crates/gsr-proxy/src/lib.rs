//! gsr-proxy library entry point.
//!
//! This crate is built twice from the same module tree: as a `cdylib` (the
//! DLL the game loads in place of the original SDK) and as an `rlib` that the
//! `gsr-standalone` binary and the integration tests in `tests/` link
//! against.
//!
//! # Layers
//!
//! - **`application`** – protocol state and policy with no OS calls: the
//!   [`GameBackend`](application::backend::GameBackend) capability trait, the
//!   Revora session state machine, response interpretation and result-code
//!   translation.
//! - **`infrastructure`** – everything that touches the process or the
//!   network: code patching, sockets and the poll thread, the configuration
//!   file, logging, and the exported native functions.

pub mod application;
pub mod infrastructure;
