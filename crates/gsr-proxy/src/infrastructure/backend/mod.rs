//! Concrete backends and the factory that picks one by name.

use std::sync::Arc;

use tracing::{info, warn};

use crate::application::backend::GameBackend;

pub mod revora;

pub use revora::{RevoraBackend, RevoraTuning};

/// Builds the backend named by the configuration's `backend` key.
///
/// Names match case-insensitively.  `"Revora"` is the only implementation;
/// `"OpenSpy"` and anything unrecognised fall back to it with a warning.
pub fn create_backend(name: &str) -> Arc<dyn GameBackend> {
    match name.trim().to_ascii_lowercase().as_str() {
        "revora" => info!("using Revora backend"),
        "openspy" => warn!("OpenSpy backend is not available; using Revora"),
        other => warn!("unknown backend {other:?}; using Revora"),
    }
    Arc::new(RevoraBackend::new())
}
