//! In-memory [`ProcessMemory`] for tests.
//!
//! Addresses are offsets into a byte buffer starting at a chosen base, so
//! hooks can be installed and removed without touching real code pages.  The
//! mock also tracks which window is currently "writable" and counts writes
//! made outside it, which catches patches that skip the protection change.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{HookError, ProcessMemory, Protection};

/// Protection value handed out by the mock; matches `PAGE_EXECUTE_READ`.
const READ_EXECUTE: u32 = 0x20;

#[derive(Debug, Default)]
struct Region {
    base: usize,
    bytes: Vec<u8>,
    writable: Option<(usize, usize)>,
    protected_writes: usize,
    fail_protection: bool,
    exports: HashMap<String, HashMap<String, usize>>,
}

impl Region {
    fn offset(&self, address: usize, len: usize) -> Option<usize> {
        let offset = address.checked_sub(self.base)?;
        (offset + len <= self.bytes.len()).then_some(offset)
    }
}

/// A fake address space.  Clones share the same bytes.
#[derive(Debug, Clone, Default)]
pub struct MockProcessMemory {
    inner: Arc<Mutex<Region>>,
}

impl MockProcessMemory {
    /// `len` zeroed bytes mapped at `base`.
    pub fn new(base: usize, len: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Region {
                base,
                bytes: vec![0; len],
                ..Default::default()
            })),
        }
    }

    fn region(&self) -> MutexGuard<'_, Region> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Writes `bytes` at `address` regardless of protection.
    ///
    /// # Panics
    ///
    /// If the range is outside the mapped region.
    pub fn fill(&self, address: usize, bytes: &[u8]) {
        let mut region = self.region();
        let offset = region.offset(address, bytes.len()).expect("fill outside mock region");
        region.bytes[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    /// Copies `len` bytes at `address`.
    ///
    /// # Panics
    ///
    /// If the range is outside the mapped region.
    pub fn snapshot(&self, address: usize, len: usize) -> Vec<u8> {
        let region = self.region();
        let offset = region.offset(address, len).expect("snapshot outside mock region");
        region.bytes[offset..offset + len].to_vec()
    }

    /// Makes every subsequent protection change fail.
    pub fn fail_protection(&self, fail: bool) {
        self.region().fail_protection = fail;
    }

    /// Writes that landed outside the current writable window.
    pub fn writes_while_protected(&self) -> usize {
        self.region().protected_writes
    }

    pub fn add_export(&self, module: &str, export: &str, address: usize) {
        self.region()
            .exports
            .entry(module.to_ascii_lowercase())
            .or_default()
            .insert(export.to_string(), address);
    }
}

impl ProcessMemory for MockProcessMemory {
    fn make_writable(&self, address: usize, len: usize) -> Result<Protection, HookError> {
        let mut region = self.region();
        if region.fail_protection {
            return Err(HookError::ProtectionChangeFailed {
                address,
                reason: "protection change refused".to_string(),
            });
        }
        if region.offset(address, len).is_none() {
            return Err(HookError::ProtectionChangeFailed {
                address,
                reason: "address not mapped".to_string(),
            });
        }
        region.writable = Some((address, len));
        Ok(Protection(READ_EXECUTE))
    }

    fn restore_protection(
        &self,
        address: usize,
        _len: usize,
        _previous: Protection,
    ) -> Result<(), HookError> {
        let mut region = self.region();
        if region.fail_protection {
            return Err(HookError::ProtectionChangeFailed {
                address,
                reason: "protection change refused".to_string(),
            });
        }
        region.writable = None;
        Ok(())
    }

    unsafe fn read(&self, address: usize, buf: &mut [u8]) {
        let region = self.region();
        if let Some(offset) = region.offset(address, buf.len()) {
            buf.copy_from_slice(&region.bytes[offset..offset + buf.len()]);
        }
    }

    unsafe fn write(&self, address: usize, bytes: &[u8]) {
        let mut region = self.region();
        let inside = matches!(
            region.writable,
            Some((start, len)) if address >= start && address + bytes.len() <= start + len
        );
        if !inside {
            region.protected_writes += 1;
        }
        if let Some(offset) = region.offset(address, bytes.len()) {
            region.bytes[offset..offset + bytes.len()].copy_from_slice(bytes);
        }
    }

    fn resolve_export(&self, module: &str, export: &str) -> Result<usize, HookError> {
        let region = self.region();
        let exports = region
            .exports
            .get(&module.to_ascii_lowercase())
            .ok_or_else(|| HookError::ModuleLoadFailed {
                module: module.to_string(),
                reason: "module not found".to_string(),
            })?;
        exports.get(export).copied().ok_or_else(|| HookError::ExportNotFound {
            module: module.to_string(),
            export: export.to_string(),
        })
    }
}
