//! The native call surface the game links against.
//!
//! Every export mirrors one function of the legacy SDK: same name, same
//! `__stdcall` convention, same arguments.  Each one forwards to the single
//! process-wide [`ProxyFacade`] and returns `0` once the call is dispatched.
//! A call that cannot be dispatched (null argument, proxy not attached)
//! returns `-1` and never invokes its callback.
//!
//! Callbacks are plain C function pointers using the default C convention.
//! Strings handed to them are only valid for the duration of the call.
//!
//! On Windows, `DllMain` attaches the proxy when the DLL is loaded and
//! detaches it on `FreeLibrary`.  Elsewhere (the standalone host, tests) the
//! first `GameSpy_Init` attaches it.

use std::ffi::{c_char, c_int, c_void, CStr, CString};
use std::sync::{Arc, Mutex, PoisonError};

use gsr_core::GameSessionInfo;
use tracing::{error, warn};

use super::{ExportHook, ProxyError, ProxyFacade, ProxyOptions};
use crate::application::result_codes::LEGACY_UNKNOWN;

/// The attached proxy, if any.
static PROXY: Mutex<Option<Arc<ProxyFacade>>> = Mutex::new(None);

/// Capacity of each string field in [`NativeGameEntry`], NUL included.
pub const NATIVE_STRING_LEN: usize = 64;

pub type LoginCallbackFn = extern "C" fn(result: c_int, username: *const c_char, profile_id: c_int);
pub type GameListCallbackFn = extern "C" fn(result: c_int, game_count: c_int, games: *const c_void);
pub type HostCallbackFn = extern "C" fn(result: c_int, game_id: c_int);
pub type JoinCallbackFn =
    extern "C" fn(result: c_int, game_id: c_int, host_ip: *const c_char, host_port: c_int);
pub type InviteCallbackFn = extern "C" fn(result: c_int, from_player: *const c_char, game_id: c_int);

/// One game as handed to the game-list callback.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeGameEntry {
    pub session_id: c_int,
    pub host_name: [c_char; NATIVE_STRING_LEN],
    pub host_ip: [c_char; NATIVE_STRING_LEN],
    pub host_port: c_int,
    pub session_name: [c_char; NATIVE_STRING_LEN],
    pub current_players: c_int,
    pub max_players: c_int,
    pub password_required: c_int,
}

/// Copies `text` into a fixed NUL-terminated buffer, truncating if needed.
fn fixed_string(text: &str) -> [c_char; NATIVE_STRING_LEN] {
    let mut out = [0 as c_char; NATIVE_STRING_LEN];
    for (dst, src) in out
        .iter_mut()
        .zip(text.bytes().take(NATIVE_STRING_LEN - 1))
    {
        *dst = src as c_char;
    }
    out
}

fn to_c_int(value: u32) -> c_int {
    c_int::try_from(value).unwrap_or(c_int::MAX)
}

impl From<&GameSessionInfo> for NativeGameEntry {
    fn from(game: &GameSessionInfo) -> Self {
        Self {
            session_id: to_c_int(game.session_id),
            host_name: fixed_string(&game.host_name),
            host_ip: fixed_string(&game.host_ip),
            host_port: c_int::from(game.host_port),
            session_name: fixed_string(&game.session_name),
            current_players: to_c_int(game.current_players),
            max_players: to_c_int(game.max_players),
            password_required: c_int::from(game.password_required),
        }
    }
}

/// A C string for a callback; interior NULs cut the text short.
fn c_string(text: &str) -> CString {
    let end = text.find('\0').unwrap_or(text.len());
    CString::new(&text[..end]).unwrap_or_default()
}

/// Reads a borrowed C string argument.
///
/// # Safety
///
/// `ptr` must be null or point to a NUL-terminated string.
unsafe fn read_arg(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    // SAFETY: non-null and NUL-terminated per the caller's contract.
    Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
}

// ── Global lifecycle ──────────────────────────────────────────────────────────

fn proxy() -> Option<Arc<ProxyFacade>> {
    PROXY.lock().unwrap_or_else(PoisonError::into_inner).clone()
}

/// Attaches the process-wide proxy unless one is already attached.
///
/// # Errors
///
/// Whatever [`ProxyFacade::attach`] reports.
pub fn attach_global(options: &ProxyOptions) -> Result<(), ProxyError> {
    let mut slot = PROXY.lock().unwrap_or_else(PoisonError::into_inner);
    if slot.is_none() {
        *slot = Some(Arc::new(ProxyFacade::attach(options)?));
    }
    Ok(())
}

/// Detaches the process-wide proxy.  No-op when nothing is attached.
pub fn detach_global() {
    let facade = PROXY.lock().unwrap_or_else(PoisonError::into_inner).take();
    if let Some(facade) = facade {
        facade.detach();
    }
}

/// The legacy exports and the functions in this module replacing them.
pub fn export_hooks() -> Vec<ExportHook> {
    vec![
        ExportHook { name: "GameSpy_Init", replacement: GameSpy_Init as usize },
        ExportHook { name: "GameSpy_Login", replacement: GameSpy_Login as usize },
        ExportHook { name: "GameSpy_GetGameList", replacement: GameSpy_GetGameList as usize },
        ExportHook { name: "GameSpy_HostGame", replacement: GameSpy_HostGame as usize },
        ExportHook { name: "GameSpy_JoinGame", replacement: GameSpy_JoinGame as usize },
        ExportHook { name: "GameSpy_SendInvite", replacement: GameSpy_SendInvite as usize },
        ExportHook { name: "GameSpy_Think", replacement: GameSpy_Think as usize },
    ]
}

/// Default options for the in-game proxy, hooking every legacy export.
pub fn default_options() -> ProxyOptions {
    ProxyOptions {
        exports: export_hooks(),
        ..ProxyOptions::default()
    }
}

/// Installs the game's invite handler.
pub fn set_invite_callback(callback: Option<InviteCallbackFn>) -> bool {
    let Some(facade) = proxy() else {
        return false;
    };
    facade.set_invite_callback(callback.map(|callback| {
        Arc::new(move |result: i32, from: &str, session_id: u32| {
            let from = c_string(from);
            callback(result, from.as_ptr(), to_c_int(session_id));
        }) as super::InviteSink
    }));
    true
}

// ── Exports ───────────────────────────────────────────────────────────────────

#[no_mangle]
pub extern "system" fn GameSpy_Init(_params: *mut c_void) -> c_int {
    if proxy().is_none() {
        if let Err(e) = attach_global(&default_options()) {
            error!("GameSpy replacement failed to attach: {e}");
            return LEGACY_UNKNOWN;
        }
    }
    proxy().map_or(LEGACY_UNKNOWN, |facade| facade.init())
}

/// # Safety
///
/// `username` and `password` must be null or NUL-terminated strings.
#[no_mangle]
pub unsafe extern "system" fn GameSpy_Login(
    username: *const c_char,
    password: *const c_char,
    callback: Option<LoginCallbackFn>,
) -> c_int {
    // SAFETY: forwarded from the caller.
    let (Some(username), Some(password)) = (unsafe { read_arg(username) }, unsafe { read_arg(password) })
    else {
        warn!("GameSpy_Login called with a null string");
        return LEGACY_UNKNOWN;
    };
    let (Some(facade), Some(callback)) = (proxy(), callback) else {
        warn!("GameSpy_Login not dispatched");
        return LEGACY_UNKNOWN;
    };

    facade.login(&username, &password, move |result, name, profile_id| {
        let name = c_string(name);
        callback(result, name.as_ptr(), to_c_int(profile_id));
    })
}

#[no_mangle]
pub extern "system" fn GameSpy_GetGameList(callback: Option<GameListCallbackFn>) -> c_int {
    let (Some(facade), Some(callback)) = (proxy(), callback) else {
        warn!("GameSpy_GetGameList not dispatched");
        return LEGACY_UNKNOWN;
    };

    facade.get_game_list(move |result, games| {
        let entries: Vec<NativeGameEntry> = games.iter().map(NativeGameEntry::from).collect();
        let count = c_int::try_from(entries.len()).unwrap_or(c_int::MAX);
        callback(result, count, entries.as_ptr().cast());
    })
}

/// # Safety
///
/// `game_name` must be null or a NUL-terminated string.
#[no_mangle]
pub unsafe extern "system" fn GameSpy_HostGame(
    game_name: *const c_char,
    max_players: c_int,
    callback: Option<HostCallbackFn>,
) -> c_int {
    // SAFETY: forwarded from the caller.
    let Some(name) = (unsafe { read_arg(game_name) }) else {
        warn!("GameSpy_HostGame called with a null name");
        return LEGACY_UNKNOWN;
    };
    let (Some(facade), Some(callback)) = (proxy(), callback) else {
        warn!("GameSpy_HostGame not dispatched");
        return LEGACY_UNKNOWN;
    };

    let max_players = u32::try_from(max_players).unwrap_or(0);
    facade.host_game(&name, max_players, move |result, session_id| {
        callback(result, to_c_int(session_id));
    })
}

#[no_mangle]
pub extern "system" fn GameSpy_JoinGame(game_id: c_int, callback: Option<JoinCallbackFn>) -> c_int {
    let (Some(facade), Some(callback)) = (proxy(), callback) else {
        warn!("GameSpy_JoinGame not dispatched");
        return LEGACY_UNKNOWN;
    };
    let Ok(session_id) = u32::try_from(game_id) else {
        warn!("GameSpy_JoinGame called with negative id {game_id}");
        return LEGACY_UNKNOWN;
    };

    facade.join_game(session_id, move |result, session_id, host_ip, host_port| {
        let host_ip = c_string(host_ip);
        callback(result, to_c_int(session_id), host_ip.as_ptr(), c_int::from(host_port));
    })
}

/// # Safety
///
/// `username` must be null or a NUL-terminated string.
#[no_mangle]
pub unsafe extern "system" fn GameSpy_SendInvite(username: *const c_char, game_id: c_int) -> c_int {
    // SAFETY: forwarded from the caller.
    let Some(username) = (unsafe { read_arg(username) }) else {
        warn!("GameSpy_SendInvite called with a null name");
        return LEGACY_UNKNOWN;
    };
    let Some(facade) = proxy() else {
        return LEGACY_UNKNOWN;
    };
    facade.send_invite(&username, u32::try_from(game_id).unwrap_or(0))
}

#[no_mangle]
pub extern "system" fn GameSpy_Think() -> c_int {
    proxy().map_or(LEGACY_UNKNOWN, |facade| facade.think())
}

// ── DLL entry point ───────────────────────────────────────────────────────────

#[cfg(target_os = "windows")]
mod dll {
    use std::ffi::c_void;

    use tracing::error;
    use windows::Win32::Foundation::{BOOL, FALSE, HINSTANCE, HMODULE, TRUE};
    use windows::Win32::System::LibraryLoader::DisableThreadLibraryCalls;
    use windows::Win32::System::SystemServices::{DLL_PROCESS_ATTACH, DLL_PROCESS_DETACH};

    use super::{attach_global, default_options, detach_global};

    #[no_mangle]
    pub extern "system" fn DllMain(module: HINSTANCE, reason: u32, reserved: *mut c_void) -> BOOL {
        match reason {
            DLL_PROCESS_ATTACH => {
                // SAFETY: `module` is the handle the loader passed us.
                let _ = unsafe { DisableThreadLibraryCalls(HMODULE(module.0)) };
                match attach_global(&default_options()) {
                    Ok(()) => TRUE,
                    Err(e) => {
                        error!("GameSpy replacement failed to attach: {e}");
                        FALSE
                    }
                }
            }
            // A non-null `reserved` means the process is exiting; other
            // threads are already gone and must not be waited for.
            DLL_PROCESS_DETACH if reserved.is_null() => {
                detach_global();
                TRUE
            }
            _ => TRUE,
        }
    }
}
