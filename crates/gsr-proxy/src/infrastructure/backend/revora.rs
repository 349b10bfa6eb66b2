//! The Revora backend: the legacy protocol over plain TCP.
//!
//! `RevoraBackend` glues three pieces together:
//!
//! - [`RevoraSession`] holds the protocol state and turns replies into
//!   completions,
//! - [`Poller`] owns the sockets and the background thread,
//! - [`network::connect`] opens connections on the calling thread.
//!
//! Each operation builds its request and its [`PendingRequest`] under the
//! session lock, releases it, makes sure the role has a connection, and hands
//! both to the poller.  Failures detected before anything is sent (not
//! initialized, connect refused) complete the callback right away on the
//! calling thread.
//!
//! Connection setup for a role is serialised through the poller's connect
//! gate: two callers racing on a disconnected role end up sharing the one
//! connection the first of them opens.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use gsr_core::protocol::messages::{self, NAT_LOCAL_PORT};
use gsr_core::{BackendConfig, GameSessionInfo, Message, NatNegotiationState, PlayerInfo, Role};
use tracing::{debug, info, warn};

use crate::application::backend::{
    BackendError, GameBackend, GameListCallback, HostCallback, InviteCallback, JoinCallback,
    LoginCallback,
};
use crate::application::dispatch::run_deliveries;
use crate::application::session::{
    assign_session_id, generate_cookie, PendingKind, PendingRequest, RevoraSession,
};
use crate::infrastructure::network::{
    self, ConnectGate, ConnectionState, NetworkError, Poller, PollerSettings,
};

/// Timing knobs for a [`RevoraBackend`].
#[derive(Debug, Clone)]
pub struct RevoraTuning {
    pub poller: PollerSettings,
    /// Upper bound on one blocking connect attempt.
    pub connect_timeout: Duration,
}

impl Default for RevoraTuning {
    fn default() -> Self {
        Self {
            poller: PollerSettings::default(),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// How an operation gets its connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dial {
    /// Use the open connection, connecting only when there is none.
    Reuse,
    /// Replace any open connection with a new one.
    Fresh,
}

/// Why a request never reached the poller.
enum NotSent {
    Connect(NetworkError),
    Refused,
}

/// Reference [`GameBackend`] implementation.
pub struct RevoraBackend {
    tuning: RevoraTuning,
    config: Mutex<Option<BackendConfig>>,
    session: Arc<Mutex<RevoraSession>>,
    poller: Mutex<Option<Arc<Poller<RevoraSession>>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl RevoraBackend {
    pub fn new() -> Self {
        Self::with_tuning(RevoraTuning::default())
    }

    pub fn with_tuning(tuning: RevoraTuning) -> Self {
        Self {
            tuning,
            config: Mutex::new(None),
            session: Arc::new(Mutex::new(RevoraSession::new())),
            poller: Mutex::new(None),
        }
    }

    fn session(&self) -> MutexGuard<'_, RevoraSession> {
        lock(&self.session)
    }

    /// The poller and configuration, if initialized.
    fn running(&self) -> Option<(Arc<Poller<RevoraSession>>, BackendConfig)> {
        let poller = lock(&self.poller).clone()?;
        let config = lock(&self.config).clone()?;
        Some((poller, config))
    }

    /// Completes `request` immediately with `error`.
    fn fail_now(request: PendingRequest, error: BackendError) {
        debug!("request {} failed before sending: {error}", request.id);
        run_deliveries(vec![request.fail(error)]);
    }

    /// Makes sure `role` has a connection and queues `message` on it.
    ///
    /// Connection setup runs under the role's connect gate, so concurrent
    /// callers share one connection.  The request comes back if it never
    /// reached the poller; the gate is released by then.
    fn deliver(
        &self,
        poller: &Poller<RevoraSession>,
        config: &BackendConfig,
        role: Role,
        dial: Dial,
        message: &Message,
        request: PendingRequest,
    ) -> Result<(), (PendingRequest, NotSent)> {
        let gate = poller.connect_gate(role);
        let stream = match dial {
            Dial::Reuse if !poller.reserve(&gate) => {
                debug!("reusing {role} connection");
                None
            }
            Dial::Reuse => Some(self.connect_reserved(poller, &gate, config)),
            Dial::Fresh => {
                poller.close(role);
                poller.reserve(&gate);
                Some(self.connect_reserved(poller, &gate, config))
            }
        };
        let stream = match stream.transpose() {
            Ok(stream) => stream,
            Err(e) => return Err((request, NotSent::Connect(e))),
        };

        let id = request.id;
        match poller.send(role, stream, message.encode(), Some(request)) {
            Ok(()) => {
                debug!("request {id} queued on {role}");
                Ok(())
            }
            Err(rejected) => {
                warn!("request {id} not sent on {role}: {}", rejected.error);
                match rejected.request {
                    Some(request) => Err((request, NotSent::Refused)),
                    None => Ok(()),
                }
            }
        }
    }

    fn connect_reserved(
        &self,
        poller: &Poller<RevoraSession>,
        gate: &ConnectGate<'_>,
        config: &BackendConfig,
    ) -> Result<std::net::TcpStream, NetworkError> {
        let role = gate.role();
        let endpoint = config.endpoint(role);
        debug!("connecting to {role} server {endpoint}");
        network::connect(endpoint, self.tuning.connect_timeout).map_err(|e| {
            warn!("{role} server unreachable: {e}");
            poller.release(gate);
            e
        })
    }

    /// Completes a request that never reached the poller.  `on_connect`
    /// picks the error for a failed connect.
    fn not_sent(
        request: PendingRequest,
        reason: NotSent,
        on_connect: impl FnOnce(NetworkError) -> BackendError,
    ) {
        let error = match reason {
            NotSent::Connect(e) => on_connect(e),
            NotSent::Refused => BackendError::NetworkUnreachable,
        };
        Self::fail_now(request, error);
    }

    /// Closes the login connection and forgets the local player.
    pub fn logout(&self) {
        if let Some(poller) = lock(&self.poller).clone() {
            poller.close(Role::Login);
        }
        self.session().logout();
        info!("logged out");
    }

    /// A copy of the local player.
    pub fn local_player(&self) -> PlayerInfo {
        self.session().local_player().clone()
    }

    /// A copy of the currently hosted session.
    pub fn hosted_session(&self) -> Option<GameSessionInfo> {
        self.session().hosted_session().cloned()
    }

    /// State of `role`'s connection slot.
    pub fn connection_state(&self, role: Role) -> ConnectionState {
        lock(&self.poller)
            .as_ref()
            .map_or(ConnectionState::Disconnected, |p| p.state(role))
    }

    /// Requests waiting for a reply on `role`.
    pub fn outstanding(&self, role: Role) -> usize {
        self.session().outstanding(role)
    }
}

impl Default for RevoraBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl GameBackend for RevoraBackend {
    fn initialize(&self, config: BackendConfig) -> Result<(), BackendError> {
        let mut poller = lock(&self.poller);
        if poller.is_some() {
            warn!("backend already initialized; keeping the running instance");
            return Ok(());
        }

        let started = Poller::start(Arc::clone(&self.session), self.tuning.poller.clone())
            .map_err(|e| BackendError::Unknown(e.to_string()))?;
        info!(
            "Revora backend initialized (login {}, master {}, nat {})",
            config.login, config.master, config.nat
        );
        *lock(&self.config) = Some(config);
        *poller = Some(Arc::new(started));
        Ok(())
    }

    fn shutdown(&self) {
        let Some(poller) = lock(&self.poller).take() else {
            return;
        };
        poller.stop();
        lock(&self.config).take();
        if let Some(session) = self.session().cancel_host() {
            info!("stopped hosting session {} on shutdown", session.session_id);
        }
        info!("Revora backend shut down");
    }

    fn login(&self, username: &str, password: &str, callback: LoginCallback) {
        let request = {
            let mut session = self.session();
            session.begin_login(username);
            session.new_request(PendingKind::Login(callback))
        };
        let Some((poller, config)) = self.running() else {
            return Self::fail_now(request, BackendError::NetworkUnreachable);
        };

        info!("logging in as {username}");
        let message = messages::login_request(username, password);
        if let Err((request, reason)) =
            self.deliver(&poller, &config, Role::Login, Dial::Fresh, &message, request)
        {
            Self::not_sent(request, reason, |_| BackendError::ServerUnavailable);
        }
    }

    fn fetch_game_list(&self, callback: GameListCallback) {
        let request = self.session().new_request(PendingKind::GameList(callback));
        let Some((poller, config)) = self.running() else {
            return Self::fail_now(request, BackendError::NetworkUnreachable);
        };

        let message = messages::list_request();
        if let Err((request, reason)) =
            self.deliver(&poller, &config, Role::Master, Dial::Reuse, &message, request)
        {
            Self::not_sent(request, reason, |_| BackendError::ServerUnavailable);
        }
    }

    fn host_game(&self, session: GameSessionInfo, callback: HostCallback) {
        let session = assign_session_id(session);
        let (message, request) = {
            let state = self.session();
            let player = state.local_player();
            let hostname = if player.username.is_empty() {
                session.host_name.as_str()
            } else {
                player.username.as_str()
            };
            let message = messages::registration(&session, hostname);
            let kind = PendingKind::Host {
                epoch: state.host_epoch(),
                session,
                callback,
            };
            (message, state.new_request(kind))
        };
        let Some((poller, config)) = self.running() else {
            return Self::fail_now(request, BackendError::NetworkUnreachable);
        };

        if let Err((request, reason)) =
            self.deliver(&poller, &config, Role::Master, Dial::Reuse, &message, request)
        {
            Self::not_sent(request, reason, |_| BackendError::ServerUnavailable);
        }
    }

    fn cancel_host(&self) {
        match self.session().cancel_host() {
            Some(session) => info!("stopped hosting session {}", session.session_id),
            None => debug!("cancel_host with no hosted session"),
        }
    }

    fn join_game(&self, mut session: GameSessionInfo, callback: JoinCallback) {
        let (message, request) = {
            let state = self.session();
            if session.host_ip.is_empty() || session.host_port == 0 {
                if let Some(cached) = state.cached_session(session.session_id) {
                    if session.host_ip.is_empty() {
                        session.host_ip = cached.host_ip.clone();
                    }
                    if session.host_port == 0 {
                        session.host_port = cached.host_port;
                    }
                }
            }
            let nat = NatNegotiationState {
                cookie: generate_cookie(),
                target_ip: session.host_ip.clone(),
                target_port: session.host_port,
                local_port: NAT_LOCAL_PORT,
            };
            let message = messages::nat_negotiation(&nat);
            (message, state.new_request(PendingKind::Join { nat, session, callback }))
        };
        let Some((poller, config)) = self.running() else {
            return Self::fail_now(request, BackendError::NetworkUnreachable);
        };

        if let Err((request, reason)) =
            self.deliver(&poller, &config, Role::Nat, Dial::Fresh, &message, request)
        {
            Self::not_sent(request, reason, |e| BackendError::NatFailure(e.to_string()));
        }
    }

    fn send_invite(&self, username: &str, session_id: u32) {
        // Invitations travel over chat, which this backend does not speak.
        info!("invite for {username} to session {session_id} not delivered: chat unsupported");
    }

    fn register_invite_callback(&self, callback: Option<InviteCallback>) {
        self.session().set_invite_handler(callback);
    }

    fn pump_events(&self) {}
}

impl Drop for RevoraBackend {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gsr_core::ResultCode;
    use std::net::TcpListener;
    use std::sync::mpsc;

    fn capture<T: Send + 'static>() -> (Box<dyn FnOnce(T) + Send>, mpsc::Receiver<T>) {
        let (tx, rx) = mpsc::channel();
        (
            Box::new(move |value| {
                let _ = tx.send(value);
            }),
            rx,
        )
    }

    /// A port with nothing listening on it.
    fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        listener.local_addr().unwrap().port()
    }

    fn local_config(port: u16) -> BackendConfig {
        let mut config = BackendConfig::default();
        for role in Role::ALL {
            *config.endpoint_mut(role) = gsr_core::Endpoint::new("127.0.0.1", port);
        }
        config
    }

    #[test]
    fn test_operations_before_initialize_fail_with_network_error() {
        // Arrange
        let backend = RevoraBackend::new();
        let (login_cb, login_rx) = capture();
        let (list_cb, list_rx) = capture();

        // Act
        backend.login("alice", "pw", login_cb);
        backend.fetch_game_list(list_cb);

        // Assert
        let login = login_rx.try_recv().expect("login completed synchronously");
        let list = list_rx.try_recv().expect("list completed synchronously");
        assert_eq!(login.unwrap_err().code(), ResultCode::Network);
        assert_eq!(list.unwrap_err().code(), ResultCode::Network);
    }

    #[test]
    fn test_login_connect_failure_is_server_unavailable() {
        // Arrange
        let backend = RevoraBackend::new();
        backend.initialize(local_config(closed_port())).expect("init");
        let (callback, rx) = capture();

        // Act
        backend.login("alice", "pw", callback);

        // Assert
        assert_eq!(rx.try_recv().expect("delivered"), Err(BackendError::ServerUnavailable));
        assert_eq!(backend.connection_state(Role::Login), ConnectionState::Disconnected);
        assert_eq!(backend.local_player().username, "alice");
        assert!(!backend.local_player().online);
    }

    #[test]
    fn test_join_connect_failure_is_nat_failure() {
        let backend = RevoraBackend::new();
        backend.initialize(local_config(closed_port())).expect("init");
        let (callback, rx) = capture();

        backend.join_game(GameSessionInfo::default(), callback);

        let err = rx.try_recv().expect("delivered").unwrap_err();
        assert_eq!(err.code(), ResultCode::NatFailure);
    }

    #[test]
    fn test_shutdown_is_idempotent_and_stops_operations() {
        // Arrange
        let backend = RevoraBackend::new();
        backend.initialize(BackendConfig::default()).expect("init");
        let (callback, rx) = capture();

        // Act
        backend.shutdown();
        backend.shutdown();
        backend.fetch_game_list(callback);

        // Assert
        assert_eq!(rx.try_recv().expect("delivered"), Err(BackendError::NetworkUnreachable));
    }

    #[test]
    fn test_cancel_host_without_session_is_harmless() {
        let backend = RevoraBackend::new();
        backend.cancel_host();
        assert!(backend.hosted_session().is_none());
    }
}
