//! [`ProcessMemory`] for the current Windows process.

use std::ffi::{c_void, CString};

use windows::core::PCSTR;
use windows::Win32::System::Diagnostics::Debug::FlushInstructionCache;
use windows::Win32::System::LibraryLoader::{GetModuleHandleA, GetProcAddress, LoadLibraryA};
use windows::Win32::System::Memory::{
    VirtualProtect, PAGE_EXECUTE_READWRITE, PAGE_PROTECTION_FLAGS,
};
use windows::Win32::System::Threading::GetCurrentProcess;

use super::{HookError, ProcessMemory, Protection};

#[derive(Debug, Default)]
pub struct WindowsProcessMemory;

impl WindowsProcessMemory {
    pub fn new() -> Self {
        Self
    }
}

fn module_name(module: &str) -> Result<CString, HookError> {
    CString::new(module).map_err(|_| HookError::ModuleLoadFailed {
        module: module.to_string(),
        reason: "name contains a NUL byte".to_string(),
    })
}

/// No export can have a NUL byte in its name.
fn export_name(module: &str, export: &str) -> Result<CString, HookError> {
    CString::new(export).map_err(|_| HookError::ExportNotFound {
        module: module.to_string(),
        export: export.to_string(),
    })
}

impl ProcessMemory for WindowsProcessMemory {
    fn make_writable(&self, address: usize, len: usize) -> Result<Protection, HookError> {
        let mut old = PAGE_PROTECTION_FLAGS(0);
        // SAFETY: VirtualProtect validates the range itself and reports
        // unmapped pages as an error.
        unsafe { VirtualProtect(address as *const c_void, len, PAGE_EXECUTE_READWRITE, &mut old) }
            .map_err(|e| HookError::ProtectionChangeFailed {
                address,
                reason: e.to_string(),
            })?;
        Ok(Protection(old.0))
    }

    fn restore_protection(
        &self,
        address: usize,
        len: usize,
        previous: Protection,
    ) -> Result<(), HookError> {
        let mut ignored = PAGE_PROTECTION_FLAGS(0);
        // SAFETY: as in make_writable.
        unsafe {
            VirtualProtect(
                address as *const c_void,
                len,
                PAGE_PROTECTION_FLAGS(previous.0),
                &mut ignored,
            )
        }
        .map_err(|e| HookError::ProtectionChangeFailed {
            address,
            reason: e.to_string(),
        })
    }

    unsafe fn read(&self, address: usize, buf: &mut [u8]) {
        // SAFETY: the caller guarantees the range is mapped and readable.
        unsafe { std::ptr::copy_nonoverlapping(address as *const u8, buf.as_mut_ptr(), buf.len()) }
    }

    unsafe fn write(&self, address: usize, bytes: &[u8]) {
        // SAFETY: the caller guarantees the range is mapped and writable.
        unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), address as *mut u8, bytes.len()) }
    }

    fn flush_instruction_cache(&self, address: usize, len: usize) {
        // SAFETY: flushing a range of our own process has no memory effects.
        let flushed = unsafe {
            FlushInstructionCache(GetCurrentProcess(), Some(address as *const c_void), len)
        };
        if let Err(e) = flushed {
            tracing::debug!("FlushInstructionCache({address:#x}) failed: {e}");
        }
    }

    fn resolve_export(&self, module: &str, export: &str) -> Result<usize, HookError> {
        let module_name = module_name(module)?;
        let export_name = export_name(module, export)?;

        // SAFETY: both names are NUL-terminated and outlive the calls.
        unsafe {
            let handle = GetModuleHandleA(PCSTR(module_name.as_ptr().cast()))
                .or_else(|_| LoadLibraryA(PCSTR(module_name.as_ptr().cast())))
                .map_err(|e| HookError::ModuleLoadFailed {
                    module: module.to_string(),
                    reason: e.to_string(),
                })?;

            GetProcAddress(handle, PCSTR(export_name.as_ptr().cast()))
                .map(|f| f as usize)
                .ok_or_else(|| HookError::ExportNotFound {
                    module: module.to_string(),
                    export: export.to_string(),
                })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_name_with_nul_is_export_not_found() {
        // Arrange – kernel32 is mapped into every process
        let memory = WindowsProcessMemory::new();

        // Act
        let err = memory
            .resolve_export("kernel32.dll", "GetProc\0Address")
            .unwrap_err();

        // Assert
        assert_eq!(
            err,
            HookError::ExportNotFound {
                module: "kernel32.dll".to_string(),
                export: "GetProc\0Address".to_string(),
            }
        );
    }

    #[test]
    fn test_module_name_with_nul_is_module_load_failed() {
        let err = WindowsProcessMemory::new()
            .resolve_export("kernel\032.dll", "GetProcAddress")
            .unwrap_err();
        assert!(matches!(err, HookError::ModuleLoadFailed { .. }));
    }

    #[test]
    fn test_known_export_resolves() {
        let address = WindowsProcessMemory::new()
            .resolve_export("kernel32.dll", "GetProcAddress")
            .expect("resolve");
        assert_ne!(address, 0);
    }
}
