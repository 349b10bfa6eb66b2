//! The proxy facade: composition root of the replacement DLL.
//!
//! [`ProxyFacade`] owns one backend, one hook manager and the loaded
//! configuration.  It exposes the game-facing operations with the game's
//! conventions: every call returns `0` once the operation is dispatched, and
//! completions arrive later through a callback carrying a legacy integer
//! result code.
//!
//! # Lifecycle
//!
//! ```text
//! attach()
//!  ├─ logging::init_file()          -- GSReplacement.log
//!  ├─ ConfigFile::load_or_create()  -- GSReplacement.ini
//!  ├─ create_backend(name)
//!  └─ start()
//!       ├─ backend.initialize()
//!       ├─ backend.register_invite_callback(bridge)
//!       └─ hook every legacy export (failures skipped)
//! detach()
//!  ├─ hooks.shutdown_all()
//!  └─ backend.shutdown()
//! ```
//!
//! `detach` is idempotent and a no-op on a facade that never started.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use gsr_core::protocol::messages::DEFAULT_HOST_PORT;
use gsr_core::{BackendConfig, GameSessionInfo};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::application::backend::{BackendError, GameBackend, Invite, InviteCallback};
use crate::application::result_codes::map_to_legacy;
use crate::infrastructure::backend::create_backend;
use crate::infrastructure::hooking::{HookError, HookManager};
use crate::infrastructure::logging::{self, DEFAULT_FILE_FILTER, DEFAULT_LOG_FILE};
use crate::infrastructure::storage::{ConfigError, ConfigFile, DEFAULT_CONFIG_FILE};

pub mod ffi;

/// Legacy result for a successfully dispatched call.
pub const DISPATCHED: i32 = 0;

/// Module whose exports are redirected by default.
pub const DEFAULT_LEGACY_MODULE: &str = "gamespy.dll";

/// Game-facing invite handler: `(result, from_player, session_id)`.
pub type InviteSink = Arc<dyn Fn(i32, &str, u32) + Send + Sync>;

/// Error type for attaching the proxy.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("backend failed to start: {0}")]
    Backend(#[from] BackendError),
}

/// One legacy export and the function that replaces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportHook {
    pub name: &'static str,
    pub replacement: usize,
}

/// Where the proxy finds its files and what it hooks.
#[derive(Debug, Clone)]
pub struct ProxyOptions {
    pub config_path: PathBuf,
    /// `None` leaves logging to whoever already installed a subscriber.
    pub log_path: Option<PathBuf>,
    pub legacy_module: String,
    pub exports: Vec<ExportHook>,
}

impl Default for ProxyOptions {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from(DEFAULT_CONFIG_FILE),
            log_path: Some(PathBuf::from(DEFAULT_LOG_FILE)),
            legacy_module: DEFAULT_LEGACY_MODULE.to_string(),
            exports: Vec::new(),
        }
    }
}

/// Bridges the game's entry points to a [`GameBackend`].
pub struct ProxyFacade {
    backend: Arc<dyn GameBackend>,
    hooks: HookManager,
    config: BackendConfig,
    invite_sink: Arc<Mutex<Option<InviteSink>>>,
    started: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ProxyFacade {
    /// Sets up logging, loads the configuration, builds the configured
    /// backend with the native hook manager, and starts it.
    ///
    /// # Errors
    ///
    /// [`ProxyError::Config`] when the configuration cannot be read or
    /// created, [`ProxyError::Backend`] when the backend fails to start.
    pub fn attach(options: &ProxyOptions) -> Result<Self, ProxyError> {
        if let Some(log_path) = &options.log_path {
            // Nothing to report a logging failure to; carry on without one.
            let _ = logging::init_file(log_path, DEFAULT_FILE_FILTER);
        }
        info!("GameSpy replacement attaching");

        let config = ConfigFile::load_or_create(&options.config_path)?.backend_config();
        let backend = create_backend(&config.backend);
        let facade = Self::with_parts(backend, HookManager::native(), config);
        facade.start(&options.legacy_module, &options.exports)?;
        Ok(facade)
    }

    /// Assembles a facade from explicit parts without starting it.
    pub fn with_parts(backend: Arc<dyn GameBackend>, hooks: HookManager, config: BackendConfig) -> Self {
        Self {
            backend,
            hooks,
            config,
            invite_sink: Arc::new(Mutex::new(None)),
            started: AtomicBool::new(false),
        }
    }

    /// Initializes the backend, wires the invite bridge and hooks `exports`
    /// in `module`.
    ///
    /// # Errors
    ///
    /// [`ProxyError::Backend`] when the backend fails to initialize.  Hook
    /// failures are logged and skipped.
    pub fn start(&self, module: &str, exports: &[ExportHook]) -> Result<(), ProxyError> {
        self.backend.initialize(self.config.clone())?;

        let sink = Arc::clone(&self.invite_sink);
        let bridge: InviteCallback = Arc::new(move |invite: &Invite| {
            let handler = lock(&sink).clone();
            match handler {
                Some(handler) => handler(map_to_legacy(invite.result), &invite.from, invite.session_id),
                None => debug!("invite from {} dropped: no handler", invite.from),
            }
        });
        self.backend.register_invite_callback(Some(bridge));

        let hooked = self.install_exports(module, exports);
        self.started.store(true, Ordering::Release);
        info!(
            "GameSpy replacement ready ({} backend, {hooked}/{} exports hooked)",
            self.config.backend,
            exports.len()
        );
        Ok(())
    }

    fn install_exports(&self, module: &str, exports: &[ExportHook]) -> usize {
        let mut hooked = 0;
        for export in exports {
            // SAFETY: each replacement is one of our exported functions with
            // the same signature and calling convention as the export it
            // replaces, and both stay loaded while the hook is installed.
            let result = unsafe {
                self.hooks
                    .install_by_export_name(module, export.name, export.replacement)
            };
            match result {
                Ok(_) => hooked += 1,
                Err(e @ HookError::ModuleLoadFailed { .. }) => {
                    warn!("not hooking legacy exports: {e}");
                    break;
                }
                Err(e) => warn!("not hooking {module}!{}: {e}", export.name),
            }
        }
        hooked
    }

    /// Undoes [`start`](Self::start).  Safe to call more than once.
    pub fn detach(&self) {
        if !self.started.swap(false, Ordering::AcqRel) {
            return;
        }
        let restored = self.hooks.shutdown_all();
        self.backend.register_invite_callback(None);
        self.backend.shutdown();
        info!("GameSpy replacement detached ({restored} hooks restored)");
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    pub fn hooks(&self) -> &HookManager {
        &self.hooks
    }

    // ── Game-facing operations ────────────────────────────────────────────────

    pub fn init(&self) -> i32 {
        info!("Init called");
        DISPATCHED
    }

    /// Logs in; `callback(result, username, profile_id)`.
    pub fn login<F>(&self, username: &str, password: &str, callback: F) -> i32
    where
        F: FnOnce(i32, &str, u32) + Send + 'static,
    {
        info!("Login called for {username}");
        let attempted = username.to_string();
        self.backend.login(
            username,
            password,
            Box::new(move |result| match result {
                Ok(player) => callback(DISPATCHED, &player.username, player.profile_id),
                Err(e) => {
                    warn!("login for {attempted} failed: {e}");
                    callback(map_to_legacy(e.code()), &attempted, 0);
                }
            }),
        );
        DISPATCHED
    }

    /// Fetches the game list; `callback(result, games)`.
    pub fn get_game_list<F>(&self, callback: F) -> i32
    where
        F: FnOnce(i32, &[GameSessionInfo]) + Send + 'static,
    {
        info!("GetGameList called");
        self.backend.fetch_game_list(Box::new(move |result| match result {
            Ok(games) => callback(DISPATCHED, &games),
            Err(e) => {
                warn!("game list failed: {e}");
                callback(map_to_legacy(e.code()), &[]);
            }
        }));
        DISPATCHED
    }

    /// Hosts a game named `name`; `callback(result, session_id)`.
    pub fn host_game<F>(&self, name: &str, max_players: u32, callback: F) -> i32
    where
        F: FnOnce(i32, u32) + Send + 'static,
    {
        info!("HostGame called for {name:?}");
        let session = GameSessionInfo {
            session_name: name.to_string(),
            max_players,
            current_players: 1,
            host_port: DEFAULT_HOST_PORT,
            ..GameSessionInfo::default()
        };
        self.backend.host_game(
            session,
            Box::new(move |result| match result {
                Ok(session) => callback(DISPATCHED, session.session_id),
                Err(e) => {
                    warn!("hosting failed: {e}");
                    callback(map_to_legacy(e.code()), 0);
                }
            }),
        );
        DISPATCHED
    }

    /// Joins `session_id`; `callback(result, session_id, host_ip, host_port)`.
    pub fn join_game<F>(&self, session_id: u32, callback: F) -> i32
    where
        F: FnOnce(i32, u32, &str, u16) + Send + 'static,
    {
        info!("JoinGame called for session {session_id}");
        let session = GameSessionInfo {
            session_id,
            ..GameSessionInfo::default()
        };
        self.backend.join_game(
            session,
            Box::new(move |result| match result {
                Ok(session) => callback(
                    DISPATCHED,
                    session.session_id,
                    &session.host_ip,
                    session.host_port,
                ),
                Err(e) => {
                    warn!("joining session {session_id} failed: {e}");
                    callback(map_to_legacy(e.code()), session_id, "", 0);
                }
            }),
        );
        DISPATCHED
    }

    pub fn send_invite(&self, username: &str, session_id: u32) -> i32 {
        info!("SendInvite called for {username} to session {session_id}");
        self.backend.send_invite(username, session_id);
        DISPATCHED
    }

    pub fn think(&self) -> i32 {
        self.backend.pump_events();
        DISPATCHED
    }

    /// Sets (or clears) the game's invite handler.
    pub fn set_invite_callback(&self, sink: Option<InviteSink>) {
        *lock(&self.invite_sink) = sink;
    }
}

impl Drop for ProxyFacade {
    fn drop(&mut self) {
        self.detach();
    }
}
