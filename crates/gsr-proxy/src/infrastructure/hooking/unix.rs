//! [`ProcessMemory`] for the current process on Unix-like systems.
//!
//! Used by the standalone host and integration tests; the game itself only
//! runs on Windows.

use std::ffi::{c_void, CStr, CString};

use tracing::debug;

use super::{HookError, ProcessMemory, Protection};

/// Assumed previous protection where the mapping table is unavailable.
const CODE_PROTECTION: i32 = libc::PROT_READ | libc::PROT_EXEC;

const MAPS_PATH: &str = "/proc/self/maps";

#[derive(Debug, Default)]
pub struct UnixProcessMemory;

impl UnixProcessMemory {
    pub fn new() -> Self {
        Self
    }
}

fn page_span(address: usize, len: usize) -> (usize, usize) {
    // SAFETY: sysconf has no memory effects.
    let page = match unsafe { libc::sysconf(libc::_SC_PAGESIZE) } {
        n if n > 0 => n as usize,
        _ => 4096,
    };
    let start = address & !(page - 1);
    let end = (address + len + page - 1) & !(page - 1);
    (start, end - start)
}

fn protect(address: usize, len: usize, flags: i32) -> Result<(), HookError> {
    let (start, span) = page_span(address, len);
    // SAFETY: mprotect rejects ranges that are not mapped.
    let rc = unsafe { libc::mprotect(start as *mut c_void, span, flags) };
    if rc == 0 {
        Ok(())
    } else {
        Err(HookError::ProtectionChangeFailed {
            address,
            reason: std::io::Error::last_os_error().to_string(),
        })
    }
}

/// Protection of the mapping containing `address`, from a
/// `/proc/<pid>/maps` listing (`start-end perms offset dev inode path`).
fn protection_in_maps(maps: &str, address: usize) -> Option<i32> {
    maps.lines().find_map(|line| {
        let mut fields = line.split_whitespace();
        let (start, end) = fields.next()?.split_once('-')?;
        let perms = fields.next()?;
        let start = usize::from_str_radix(start, 16).ok()?;
        let end = usize::from_str_radix(end, 16).ok()?;
        if !(start..end).contains(&address) {
            return None;
        }

        let bits = [libc::PROT_READ, libc::PROT_WRITE, libc::PROT_EXEC];
        Some(
            perms
                .chars()
                .zip(bits)
                .filter(|(flag, _)| *flag != '-')
                .fold(libc::PROT_NONE, |acc, (_, bit)| acc | bit),
        )
    })
}

fn current_protection(address: usize) -> i32 {
    let found = std::fs::read_to_string(MAPS_PATH)
        .ok()
        .and_then(|maps| protection_in_maps(&maps, address));
    found.unwrap_or_else(|| {
        debug!("no mapping entry for {address:#x}; assuming read + execute");
        CODE_PROTECTION
    })
}

fn dl_error() -> String {
    // SAFETY: dlerror returns null or a thread-local NUL-terminated string.
    let err = unsafe { libc::dlerror() };
    if err.is_null() {
        "unknown dynamic loader error".to_string()
    } else {
        // SAFETY: checked non-null above.
        unsafe { CStr::from_ptr(err) }.to_string_lossy().into_owned()
    }
}

impl ProcessMemory for UnixProcessMemory {
    fn make_writable(&self, address: usize, len: usize) -> Result<Protection, HookError> {
        let previous = current_protection(address);
        protect(
            address,
            len,
            libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC,
        )?;
        Ok(Protection(previous as u32))
    }

    fn restore_protection(
        &self,
        address: usize,
        len: usize,
        previous: Protection,
    ) -> Result<(), HookError> {
        protect(address, len, previous.0 as i32)
    }

    unsafe fn read(&self, address: usize, buf: &mut [u8]) {
        // SAFETY: the caller guarantees the range is mapped and readable.
        unsafe { std::ptr::copy_nonoverlapping(address as *const u8, buf.as_mut_ptr(), buf.len()) }
    }

    unsafe fn write(&self, address: usize, bytes: &[u8]) {
        // SAFETY: the caller guarantees the range is mapped and writable.
        unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), address as *mut u8, bytes.len()) }
    }

    fn resolve_export(&self, module: &str, export: &str) -> Result<usize, HookError> {
        let module_name = CString::new(module).map_err(|_| HookError::ModuleLoadFailed {
            module: module.to_string(),
            reason: "name contains a NUL byte".to_string(),
        })?;
        let export_name = CString::new(export).map_err(|_| HookError::ExportNotFound {
            module: module.to_string(),
            export: export.to_string(),
        })?;

        // SAFETY: names are NUL-terminated; the handle is intentionally never
        // closed so resolved addresses stay valid.
        unsafe {
            let mut handle = libc::dlopen(module_name.as_ptr(), libc::RTLD_NOLOAD | libc::RTLD_NOW);
            if handle.is_null() {
                handle = libc::dlopen(module_name.as_ptr(), libc::RTLD_NOW);
            }
            if handle.is_null() {
                return Err(HookError::ModuleLoadFailed {
                    module: module.to_string(),
                    reason: dl_error(),
                });
            }

            let symbol = libc::dlsym(handle, export_name.as_ptr());
            if symbol.is_null() {
                return Err(HookError::ExportNotFound {
                    module: module.to_string(),
                    export: export.to_string(),
                });
            }
            Ok(symbol as usize)
        }
    }
}
