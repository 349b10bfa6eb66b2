//! Network infrastructure for the replacement backend.
//!
//! # Sub-modules
//!
//! - **`poller`** – Owns the four per-role TCP connections and the background
//!   thread that reads them, writes queued requests, sends keep-alives and
//!   expires stale requests.  Protocol meaning is delegated to a
//!   [`ProtocolHandler`](crate::application::dispatch::ProtocolHandler).
//!
//! This module itself holds the blocking connect helper used by the backend
//! before a stream is handed to the poller, and the per-slot connection
//! state.

use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use gsr_core::{Endpoint, Role};
use thiserror::Error;
use tracing::debug;

pub mod poller;

pub use poller::{ConnectGate, Poller, PollerSettings, Rejected};

/// State of one role's connection slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Error type for network operations.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("cannot resolve {endpoint}: {source}")]
    Resolve {
        endpoint: Endpoint,
        #[source]
        source: io::Error,
    },
    #[error("{0} resolved to no addresses")]
    NoAddress(Endpoint),
    #[error("connect to {endpoint} failed: {source}")]
    Connect {
        endpoint: Endpoint,
        #[source]
        source: io::Error,
    },
    #[error("cannot configure socket for {endpoint}: {source}")]
    Configure {
        endpoint: Endpoint,
        #[source]
        source: io::Error,
    },
    #[error("no open {0} connection")]
    NotConnected(Role),
    #[error("network poller is not running")]
    PollerStopped,
    #[error("failed to build network runtime: {0}")]
    Runtime(#[source] io::Error),
    #[error("failed to spawn network thread: {0}")]
    Spawn(#[source] io::Error),
}

/// Opens a TCP connection to `endpoint`, trying each resolved address in
/// turn, and leaves it non-blocking with Nagle disabled.
///
/// # Errors
///
/// [`NetworkError::Resolve`] / [`NetworkError::NoAddress`] when the host
/// cannot be resolved, [`NetworkError::Connect`] when every address refuses
/// or times out.
pub fn connect(endpoint: &Endpoint, timeout: Duration) -> Result<TcpStream, NetworkError> {
    let addrs: Vec<_> = (endpoint.host.as_str(), endpoint.port)
        .to_socket_addrs()
        .map_err(|source| NetworkError::Resolve {
            endpoint: endpoint.clone(),
            source,
        })?
        .collect();

    let mut last_error = None;
    for addr in &addrs {
        match TcpStream::connect_timeout(addr, timeout) {
            Ok(stream) => {
                let configure = |source| NetworkError::Configure {
                    endpoint: endpoint.clone(),
                    source,
                };
                stream.set_nonblocking(true).map_err(configure)?;
                stream.set_nodelay(true).map_err(configure)?;
                debug!("connected to {endpoint} via {addr}");
                return Ok(stream);
            }
            Err(e) => {
                debug!("connect to {addr} failed: {e}");
                last_error = Some(e);
            }
        }
    }

    match last_error {
        Some(source) => Err(NetworkError::Connect {
            endpoint: endpoint.clone(),
            source,
        }),
        None => Err(NetworkError::NoAddress(endpoint.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn test_connect_to_listening_port_succeeds() {
        // Arrange
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().unwrap().port();

        // Act
        let stream = connect(&Endpoint::new("127.0.0.1", port), Duration::from_secs(2));

        // Assert
        assert!(stream.is_ok());
    }

    #[test]
    fn test_connect_to_closed_port_is_connect_error() {
        // Arrange – bind then drop to get a port nobody listens on
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
            listener.local_addr().unwrap().port()
        };

        // Act
        let result = connect(&Endpoint::new("127.0.0.1", port), Duration::from_secs(2));

        // Assert
        assert!(matches!(result, Err(NetworkError::Connect { .. })));
    }

    #[test]
    fn test_default_connection_state_is_disconnected() {
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
    }
}
