//! Protocol state of the Revora backend.
//!
//! `RevoraSession` is everything the backend remembers between network
//! events: who is logged in, which session is being hosted, the last game
//! list, and for each server role the queue of requests still waiting for a
//! reply.
//!
//! # Correlating replies (for beginners)
//!
//! Replies in the legacy protocol carry no request identifier.  The only
//! thing that ties a reply to a request is the connection it arrives on.  So
//! every request is tagged with a local [`RequestId`] and appended to its
//! role's queue once its bytes are on the wire; the next reply on that
//! connection completes the request at the front of the queue.  Heartbeats
//! are never queued, and a reply with an empty queue is logged and dropped.
//!
//! A request that waits longer than the request timeout is completed with
//! [`BackendError::Timeout`] and its connection is closed: a reply that turns
//! up late would otherwise be taken for the answer to the next request.

use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

use gsr_core::domain::session::{SESSION_ID_MAX, SESSION_ID_MIN};
use gsr_core::protocol::messages;
use gsr_core::{
    GameSessionInfo, Message, NatNegotiationState, PlayerInfo, RequestId, Role, SequenceCounter,
};
use rand::distr::Alphanumeric;
use rand::Rng;
use tracing::{debug, info, warn};

use crate::application::backend::{
    BackendError, GameListCallback, HostCallback, InviteCallback, JoinCallback, LoginCallback,
};
use crate::application::dispatch::{CloseReason, Delivery, ProtocolHandler};
use crate::application::responses;

/// Length of a NAT negotiation cookie.
pub const NAT_COOKIE_LEN: usize = 10;

// ── Random identifiers ────────────────────────────────────────────────────────

/// Draws a session id uniformly from the generated-id range.
pub fn generate_session_id() -> u32 {
    rand::rng().random_range(SESSION_ID_MIN..=SESSION_ID_MAX)
}

/// Draws a fresh alphanumeric NAT negotiation cookie.
pub fn generate_cookie() -> String {
    rand::rng()
        .sample_iter(Alphanumeric)
        .take(NAT_COOKIE_LEN)
        .map(char::from)
        .collect()
}

/// Gives `session` a generated id unless it already has one.
pub fn assign_session_id(mut session: GameSessionInfo) -> GameSessionInfo {
    if !session.has_session_id() {
        session.session_id = generate_session_id();
    }
    session
}

// ── Outstanding requests ──────────────────────────────────────────────────────

/// What an outstanding request was for, and who to tell when it completes.
pub enum PendingKind {
    Login(LoginCallback),
    GameList(GameListCallback),
    Host {
        session: GameSessionInfo,
        /// Host epoch at issue time; a cancel in between bumps the epoch.
        epoch: u64,
        callback: HostCallback,
    },
    Join {
        nat: NatNegotiationState,
        session: GameSessionInfo,
        callback: JoinCallback,
    },
}

impl PendingKind {
    fn label(&self) -> &'static str {
        match self {
            PendingKind::Login(_) => "login",
            PendingKind::GameList(_) => "game list",
            PendingKind::Host { .. } => "host",
            PendingKind::Join { .. } => "join",
        }
    }
}

/// A request whose reply has not arrived yet.
pub struct PendingRequest {
    pub id: RequestId,
    pub kind: PendingKind,
    issued_at: Option<Instant>,
}

impl PendingRequest {
    pub fn new(id: RequestId, kind: PendingKind) -> Self {
        Self {
            id,
            kind,
            issued_at: None,
        }
    }

    /// When the request's bytes were written, once they have been.
    pub fn issued_at(&self) -> Option<Instant> {
        self.issued_at
    }

    /// Consumes the request into a delivery reporting `error`.
    pub fn fail(self, error: BackendError) -> Delivery {
        match self.kind {
            PendingKind::Login(callback) => Box::new(move || callback(Err(error))),
            PendingKind::GameList(callback) => Box::new(move || callback(Err(error))),
            PendingKind::Host { callback, .. } => Box::new(move || callback(Err(error))),
            PendingKind::Join { callback, .. } => Box::new(move || callback(Err(error))),
        }
    }
}

impl fmt::Debug for PendingRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingRequest")
            .field("id", &self.id)
            .field("kind", &self.kind.label())
            .field("issued_at", &self.issued_at)
            .finish()
    }
}

// ── Session state ─────────────────────────────────────────────────────────────

/// Protocol state shared between the backend's callers and its poll thread.
pub struct RevoraSession {
    player: PlayerInfo,
    hosted: Option<GameSessionInfo>,
    host_epoch: u64,
    game_list: Vec<GameSessionInfo>,
    pending: [VecDeque<PendingRequest>; Role::COUNT],
    invite_handler: Option<InviteCallback>,
    ids: SequenceCounter,
}

impl RevoraSession {
    pub fn new() -> Self {
        Self {
            player: PlayerInfo::default(),
            hosted: None,
            host_epoch: 0,
            game_list: Vec::new(),
            pending: Default::default(),
            invite_handler: None,
            ids: SequenceCounter::new(),
        }
    }

    /// Tags a new request.
    pub fn new_request(&self, kind: PendingKind) -> PendingRequest {
        PendingRequest::new(self.ids.next(), kind)
    }

    /// Resets the local player for a login attempt by `username`.
    pub fn begin_login(&mut self, username: &str) {
        self.player = PlayerInfo {
            username: username.to_string(),
            ..PlayerInfo::default()
        };
    }

    /// Clears the local player.
    pub fn logout(&mut self) {
        self.player = PlayerInfo::default();
    }

    pub fn local_player(&self) -> &PlayerInfo {
        &self.player
    }

    pub fn hosted_session(&self) -> Option<&GameSessionInfo> {
        self.hosted.as_ref()
    }

    /// Current host epoch, recorded with every host request.
    pub fn host_epoch(&self) -> u64 {
        self.host_epoch
    }

    /// Stops hosting.  A registration confirmed after this call no longer
    /// makes its session the hosted one.
    pub fn cancel_host(&mut self) -> Option<GameSessionInfo> {
        self.host_epoch = self.host_epoch.wrapping_add(1);
        self.hosted.take()
    }

    /// The most recently fetched game list.
    pub fn game_list(&self) -> &[GameSessionInfo] {
        &self.game_list
    }

    /// Finds `session_id` in the most recently fetched game list.
    pub fn cached_session(&self, session_id: u32) -> Option<&GameSessionInfo> {
        self.game_list.iter().find(|s| s.session_id == session_id)
    }

    pub fn set_invite_handler(&mut self, handler: Option<InviteCallback>) {
        self.invite_handler = handler;
    }

    /// Number of requests waiting for a reply on `role`.
    pub fn outstanding(&self, role: Role) -> usize {
        self.pending[role.index()].len()
    }

    fn complete(&mut self, request: PendingRequest, message: &Message) -> Delivery {
        let id = request.id;
        match request.kind {
            PendingKind::Login(callback) => match responses::interpret_login(message) {
                Ok(profile_id) => {
                    self.player.profile_id = profile_id;
                    self.player.online = true;
                    info!(
                        "login {id} succeeded: {} (profile {profile_id})",
                        self.player.username
                    );
                    let player = self.player.clone();
                    Box::new(move || callback(Ok(player)))
                }
                Err(e) => {
                    warn!("login {id} failed: {e}");
                    Box::new(move || callback(Err(e)))
                }
            },
            PendingKind::GameList(callback) => match responses::interpret_game_list(message) {
                Ok(list) => {
                    info!("game list {id} received with {} games", list.len());
                    self.game_list = list.clone();
                    Box::new(move || callback(Ok(list)))
                }
                Err(e) => {
                    warn!("game list {id} failed: {e}");
                    Box::new(move || callback(Err(e)))
                }
            },
            PendingKind::Host {
                session,
                epoch,
                callback,
            } => match responses::interpret_host(message) {
                Ok(()) => {
                    if epoch == self.host_epoch {
                        info!("hosting session {} ({id})", session.session_id);
                        self.hosted = Some(session.clone());
                    } else {
                        info!(
                            "session {} registered after cancel; not sending heartbeats",
                            session.session_id
                        );
                    }
                    Box::new(move || callback(Ok(session)))
                }
                Err(e) => {
                    warn!("host {id} for session {} failed: {e}", session.session_id);
                    Box::new(move || callback(Err(e)))
                }
            },
            PendingKind::Join {
                nat,
                mut session,
                callback,
            } => match responses::interpret_nat(message, &nat) {
                Ok((ip, port)) => {
                    info!(
                        "NAT negotiation {id} for session {} resolved to {ip}:{port}",
                        session.session_id
                    );
                    session.host_ip = ip;
                    session.host_port = port;
                    Box::new(move || callback(Ok(session)))
                }
                Err(e) => {
                    warn!("NAT negotiation {id} (cookie {}) failed: {e}", nat.cookie);
                    Box::new(move || callback(Err(e)))
                }
            },
        }
    }
}

impl Default for RevoraSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolHandler for RevoraSession {
    type Request = PendingRequest;

    fn on_request_sent(&mut self, role: Role, mut request: PendingRequest, now: Instant) {
        debug!("{} request {} sent on {role}", request.kind.label(), request.id);
        request.issued_at = Some(now);
        self.pending[role.index()].push_back(request);
    }

    fn on_request_failed(
        &mut self,
        role: Role,
        request: PendingRequest,
        reason: CloseReason,
    ) -> Vec<Delivery> {
        warn!(
            "{} request {} could not be sent on {role}: {reason}",
            request.kind.label(),
            request.id
        );
        vec![request.fail(BackendError::NetworkUnreachable)]
    }

    fn on_message(&mut self, role: Role, message: Message) -> Vec<Delivery> {
        if let Some(invite) = responses::interpret_invite(&message) {
            if role != Role::Chat {
                debug!("invite arrived on {role} connection");
            }
            info!("invite from {} to session {}", invite.from, invite.session_id);
            return match self.invite_handler.clone() {
                Some(handler) => vec![Box::new(move || handler(&invite)) as Delivery],
                None => {
                    debug!("no invite handler registered; dropping invite");
                    Vec::new()
                }
            };
        }

        let Some(request) = self.pending[role.index()].pop_front() else {
            debug!(
                "dropping unsolicited {role} message ({} pairs, first key {:?})",
                message.len(),
                message.command_name()
            );
            return Vec::new();
        };

        vec![self.complete(request, &message)]
    }

    fn on_closed(&mut self, role: Role, reason: CloseReason) -> Vec<Delivery> {
        let queue = std::mem::take(&mut self.pending[role.index()]);
        if !queue.is_empty() {
            warn!(
                "{role} connection {reason}; failing {} outstanding request(s)",
                queue.len()
            );
        }
        queue
            .into_iter()
            .map(|request| request.fail(BackendError::NetworkUnreachable))
            .collect()
    }

    fn heartbeat(&self) -> Option<(Role, Message)> {
        self.hosted
            .as_ref()
            .map(|session| (Role::Master, messages::keep_alive(session.session_id)))
    }

    fn expire(&mut self, now: Instant, timeout: Duration) -> (Vec<Role>, Vec<Delivery>) {
        let mut roles = Vec::new();
        let mut deliveries = Vec::new();

        for role in Role::ALL {
            let queue = &mut self.pending[role.index()];
            let expired = queue
                .front()
                .and_then(PendingRequest::issued_at)
                .is_some_and(|issued| now.saturating_duration_since(issued) >= timeout);
            if !expired {
                continue;
            }
            if let Some(request) = queue.pop_front() {
                warn!(
                    "{} request {} on {role} timed out after {timeout:?}",
                    request.kind.label(),
                    request.id
                );
                deliveries.push(request.fail(BackendError::Timeout));
                roles.push(role);
            }
        }

        (roles, deliveries)
    }
}
