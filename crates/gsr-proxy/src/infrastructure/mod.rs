//! Infrastructure layer of the replacement SDK.
//!
//! Contains OS-facing adapters: code patching, sockets and the poll thread,
//! the concrete backend, the configuration file, logging, and the exported
//! native functions.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `gsr_core`, but MUST NOT be imported by the `application` layer.

pub mod backend;
pub mod hooking;
pub mod logging;
pub mod network;
pub mod proxy;
pub mod storage;
