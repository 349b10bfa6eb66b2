//! In-process function interception by code patching.
//!
//! A hook overwrites the first five bytes of a target function with a
//! relative jump to a replacement function.  Every call that lands on the
//! target then continues in the replacement instead.  Uninstalling writes the
//! saved bytes back.
//!
//! # The patch (for beginners)
//!
//! On x86 and x86-64 the instruction `E9 xx xx xx xx` means "jump to the
//! address `xx xx xx xx` bytes past the end of this instruction".  The
//! displacement is a signed 32-bit little-endian integer computed as:
//!
//! ```text
//! displacement = replacement - target - 5
//! ```
//!
//! On 32-bit processes every address is reachable.  On 64-bit processes the
//! replacement must lie within ±2 GiB of the target; [`encode_jump`] refuses
//! anything further with [`HookError::DisplacementOutOfRange`] rather than
//! writing a jump to the wrong place.
//!
//! # Layering
//!
//! [`HookManager`] never dereferences a raw address itself.  Every
//! protection change, byte copy and symbol lookup goes through the
//! [`ProcessMemory`] trait, which has a real implementation per OS and an
//! in-memory [`mock::MockProcessMemory`] for tests.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tracing::{debug, info, warn};

pub mod mock;

#[cfg(target_os = "windows")]
pub mod windows;

#[cfg(unix)]
pub mod unix;

/// The process-memory backend for the platform being built.
#[cfg(target_os = "windows")]
pub type NativeProcessMemory = windows::WindowsProcessMemory;

/// The process-memory backend for the platform being built.
#[cfg(unix)]
pub type NativeProcessMemory = unix::UnixProcessMemory;

/// Bytes overwritten by the relative jump.
pub const JUMP_LEN: usize = 5;

/// Bytes captured from the target before patching.
pub const SNAPSHOT_LEN: usize = 10;

/// `JMP rel32` opcode.
const JMP_REL32: u8 = 0xE9;

// ── Errors ────────────────────────────────────────────────────────────────────

/// Error type for hook operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HookError {
    #[error("no hook is installed at {0:#x}")]
    NotHooked(usize),

    #[error("a hook is already installed at {0:#x}")]
    AlreadyHooked(usize),

    #[error("cannot hook {target:#x} to {replacement:#x}: invalid address")]
    InvalidAddress { target: usize, replacement: usize },

    #[error("replacement {replacement:#x} is out of jump range from {target:#x}")]
    DisplacementOutOfRange { target: usize, replacement: usize },

    #[error("failed to load module {module}: {reason}")]
    ModuleLoadFailed { module: String, reason: String },

    #[error("export {export} not found in {module}")]
    ExportNotFound { module: String, export: String },

    #[error("failed to change memory protection at {address:#x}: {reason}")]
    ProtectionChangeFailed { address: usize, reason: String },
}

// ── Process memory boundary ───────────────────────────────────────────────────

/// Page protection flags saved by [`ProcessMemory::make_writable`] and handed
/// back to [`ProcessMemory::restore_protection`].  The value is
/// platform-specific and opaque to the hook manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Protection(pub u32);

/// The minimal OS surface the hook manager needs.
pub trait ProcessMemory: Send + Sync {
    /// Makes `len` bytes at `address` readable, writable and executable,
    /// returning the protection to restore afterwards.
    fn make_writable(&self, address: usize, len: usize) -> Result<Protection, HookError>;

    /// Restores protection saved by [`make_writable`](Self::make_writable).
    fn restore_protection(
        &self,
        address: usize,
        len: usize,
        previous: Protection,
    ) -> Result<(), HookError>;

    /// Copies `buf.len()` bytes from `address`.
    ///
    /// # Safety
    ///
    /// `address..address + buf.len()` must be mapped and readable.
    unsafe fn read(&self, address: usize, buf: &mut [u8]);

    /// Copies `bytes` to `address`.
    ///
    /// # Safety
    ///
    /// The range must be mapped and currently writable, and no thread may be
    /// executing inside it.
    unsafe fn write(&self, address: usize, bytes: &[u8]);

    /// Discards stale instructions after a patch.
    fn flush_instruction_cache(&self, _address: usize, _len: usize) {}

    /// Finds `export` in `module`, loading the module if necessary.
    fn resolve_export(&self, module: &str, export: &str) -> Result<usize, HookError>;
}

// ── Records ───────────────────────────────────────────────────────────────────

/// Install state of one target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookState {
    Unhooked,
    Hooked,
}

/// Everything needed to undo one patch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookRecord {
    pub target: usize,
    pub replacement: usize,
    pub bytes_overwritten: usize,
    pub original: [u8; SNAPSHOT_LEN],
    pub state: HookState,
}

/// Returned by a successful install; identifies the hooked target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookHandle {
    target: usize,
}

impl HookHandle {
    pub fn target(&self) -> usize {
        self.target
    }
}

/// Builds the `JMP rel32` from `target` to `replacement`.
///
/// # Errors
///
/// [`HookError::DisplacementOutOfRange`] if the distance does not fit a
/// signed 32-bit displacement.
pub fn encode_jump(target: usize, replacement: usize) -> Result<[u8; JUMP_LEN], HookError> {
    let displacement = replacement as i128 - target as i128 - JUMP_LEN as i128;
    let rel = i32::try_from(displacement)
        .map_err(|_| HookError::DisplacementOutOfRange { target, replacement })?;

    let mut patch = [0u8; JUMP_LEN];
    patch[0] = JMP_REL32;
    patch[1..].copy_from_slice(&rel.to_le_bytes());
    Ok(patch)
}

// ── Manager ───────────────────────────────────────────────────────────────────

/// Owns every installed hook.
///
/// Install and uninstall are serialized by one table-wide lock held for the
/// whole patch, so another thread never observes a half-written jump through
/// this manager.
pub struct HookManager {
    memory: Box<dyn ProcessMemory>,
    hooks: Mutex<HashMap<usize, HookRecord>>,
}

impl HookManager {
    pub fn new(memory: Box<dyn ProcessMemory>) -> Self {
        Self {
            memory,
            hooks: Mutex::new(HashMap::new()),
        }
    }

    /// A manager patching the current process.
    pub fn native() -> Self {
        Self::new(Box::new(NativeProcessMemory::new()))
    }

    fn table(&self) -> MutexGuard<'_, HashMap<usize, HookRecord>> {
        self.hooks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Redirects calls to `target` to `replacement`.
    ///
    /// # Safety
    ///
    /// `target` must be the entry point of a function in mapped code with at
    /// least [`SNAPSHOT_LEN`] readable bytes, no thread may be executing its
    /// first [`JUMP_LEN`] bytes while they are rewritten, and `replacement`
    /// must be a function with the same signature and calling convention.
    /// The same holds until the hook is uninstalled.
    pub unsafe fn install(&self, target: usize, replacement: usize) -> Result<HookHandle, HookError> {
        let mut hooks = self.table();

        if hooks.contains_key(&target) {
            return Err(HookError::AlreadyHooked(target));
        }
        if target == 0 || replacement == 0 || target == replacement {
            return Err(HookError::InvalidAddress { target, replacement });
        }
        let patch = encode_jump(target, replacement)?;

        let previous = self.memory.make_writable(target, SNAPSHOT_LEN)?;

        let mut original = [0u8; SNAPSHOT_LEN];
        // SAFETY: the caller guarantees SNAPSHOT_LEN mapped bytes at target,
        // and make_writable succeeded on that range.
        unsafe {
            self.memory.read(target, &mut original);
            self.memory.write(target, &patch);
        }
        self.memory.flush_instruction_cache(target, JUMP_LEN);

        if let Err(e) = self.memory.restore_protection(target, SNAPSHOT_LEN, previous) {
            // The jump is in place and works; the page just stays writable.
            warn!("hook at {target:#x} installed but protection not restored: {e}");
        }

        hooks.insert(
            target,
            HookRecord {
                target,
                replacement,
                bytes_overwritten: JUMP_LEN,
                original,
                state: HookState::Hooked,
            },
        );
        info!("hooked {target:#x} -> {replacement:#x}");
        Ok(HookHandle { target })
    }

    /// Resolves `export` in `module` and hooks it.
    ///
    /// # Safety
    ///
    /// Same contract as [`install`](Self::install) for the resolved address.
    pub unsafe fn install_by_export_name(
        &self,
        module: &str,
        export: &str,
        replacement: usize,
    ) -> Result<HookHandle, HookError> {
        let target = self.memory.resolve_export(module, export)?;
        debug!("{module}!{export} resolved to {target:#x}");
        // SAFETY: forwarded from the caller.
        unsafe { self.install(target, replacement) }
    }

    /// Resolves `export` in `module` without hooking it.
    pub fn resolve_export(&self, module: &str, export: &str) -> Result<usize, HookError> {
        self.memory.resolve_export(module, export)
    }

    /// Writes the saved bytes back to `target` and forgets the hook.
    ///
    /// When the protection change fails the hook stays installed and
    /// recorded.
    pub fn uninstall(&self, target: usize) -> Result<(), HookError> {
        let mut hooks = self.table();
        let record = hooks.get(&target).ok_or(HookError::NotHooked(target))?;
        self.restore(record)?;
        hooks.remove(&target);
        info!("unhooked {target:#x}");
        Ok(())
    }

    /// Uninstalls every hook.  A hook that cannot be restored is logged and
    /// dropped from the table; it is not retried.  Returns how many hooks
    /// were restored.
    pub fn shutdown_all(&self) -> usize {
        let mut hooks = self.table();
        let mut restored = 0;
        for (target, record) in hooks.drain() {
            match self.restore(&record) {
                Ok(()) => restored += 1,
                Err(e) => warn!("leaving hook at {target:#x} in place: {e}"),
            }
        }
        if restored > 0 {
            info!("restored {restored} hooked function(s)");
        }
        restored
    }

    fn restore(&self, record: &HookRecord) -> Result<(), HookError> {
        let len = record.bytes_overwritten;
        let previous = self.memory.make_writable(record.target, len)?;
        // SAFETY: the range was readable and patchable at install time and the
        // install contract keeps it mapped until uninstall.
        unsafe {
            self.memory.write(record.target, &record.original[..len]);
        }
        self.memory.flush_instruction_cache(record.target, len);
        if let Err(e) = self.memory.restore_protection(record.target, len, previous) {
            warn!("unhooked {:#x} but protection not restored: {e}", record.target);
        }
        Ok(())
    }

    pub fn is_hooked(&self, target: usize) -> bool {
        self.table().contains_key(&target)
    }

    /// A copy of the record for `target`, if hooked.
    pub fn record(&self, target: usize) -> Option<HookRecord> {
        self.table().get(&target).cloned()
    }

    pub fn active_count(&self) -> usize {
        self.table().len()
    }
}

impl Drop for HookManager {
    fn drop(&mut self) {
        self.shutdown_all();
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockProcessMemory;
    use super::*;

    const BASE: usize = 0x4000_0000;
    const TARGET: usize = BASE + 0x100;
    const REPLACEMENT: usize = BASE + 0x800;

    /// A recognisable function prologue for the snapshot.
    const PROLOGUE: [u8; SNAPSHOT_LEN] = [0x55, 0x8B, 0xEC, 0x83, 0xEC, 0x10, 0x53, 0x56, 0x57, 0x90];

    fn manager() -> (HookManager, MockProcessMemory) {
        let memory = MockProcessMemory::new(BASE, 0x1000);
        memory.fill(TARGET, &PROLOGUE);
        (HookManager::new(Box::new(memory.clone())), memory)
    }

    #[test]
    fn test_encode_jump_computes_rel32_from_end_of_instruction() {
        // Arrange / Act
        let patch = encode_jump(0x1000, 0x2000).expect("in range");

        // Assert – 0x2000 - 0x1000 - 5 = 0xFFB
        assert_eq!(patch, [0xE9, 0xFB, 0x0F, 0x00, 0x00]);
    }

    #[test]
    fn test_encode_jump_backwards_is_negative() {
        let patch = encode_jump(0x2000, 0x1000).expect("in range");
        let rel = i32::from_le_bytes([patch[1], patch[2], patch[3], patch[4]]);
        assert_eq!(rel, -0x1005);
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn test_encode_jump_rejects_out_of_range_displacement() {
        let err = encode_jump(0x1000, 0x1_0000_1000).unwrap_err();
        assert!(matches!(err, HookError::DisplacementOutOfRange { .. }));
    }

    #[test]
    fn test_install_writes_jump_and_records_snapshot() {
        // Arrange
        let (hooks, memory) = manager();

        // Act
        let handle = unsafe { hooks.install(TARGET, REPLACEMENT) }.expect("install");

        // Assert
        assert_eq!(handle.target(), TARGET);
        let patched = memory.snapshot(TARGET, SNAPSHOT_LEN);
        assert_eq!(&patched[..JUMP_LEN], &encode_jump(TARGET, REPLACEMENT).unwrap());
        assert_eq!(&patched[JUMP_LEN..], &PROLOGUE[JUMP_LEN..], "bytes past the jump untouched");
        let record = hooks.record(TARGET).expect("record");
        assert_eq!(record.original, PROLOGUE);
        assert_eq!(record.bytes_overwritten, JUMP_LEN);
        assert_eq!(record.state, HookState::Hooked);
        assert_eq!(memory.writes_while_protected(), 0);
    }

    #[test]
    fn test_install_then_uninstall_restores_bytes_exactly() {
        // Arrange
        let (hooks, memory) = manager();
        let before = memory.snapshot(BASE, 0x1000);

        // Act
        unsafe { hooks.install(TARGET, REPLACEMENT) }.expect("install");
        hooks.uninstall(TARGET).expect("uninstall");

        // Assert
        assert_eq!(memory.snapshot(BASE, 0x1000), before);
        assert!(!hooks.is_hooked(TARGET));
    }

    #[test]
    fn test_second_install_is_already_hooked_and_leaves_memory() {
        // Arrange
        let (hooks, memory) = manager();
        unsafe { hooks.install(TARGET, REPLACEMENT) }.expect("install");
        let after_first = memory.snapshot(TARGET, SNAPSHOT_LEN);

        // Act
        let err = unsafe { hooks.install(TARGET, REPLACEMENT + 0x10) }.unwrap_err();

        // Assert
        assert_eq!(err, HookError::AlreadyHooked(TARGET));
        assert_eq!(memory.snapshot(TARGET, SNAPSHOT_LEN), after_first);
        assert_eq!(hooks.record(TARGET).unwrap().replacement, REPLACEMENT);
    }

    #[test]
    fn test_install_rejects_null_and_self_jump() {
        let (hooks, _memory) = manager();
        assert!(matches!(
            unsafe { hooks.install(0, REPLACEMENT) },
            Err(HookError::InvalidAddress { .. })
        ));
        assert!(matches!(
            unsafe { hooks.install(TARGET, TARGET) },
            Err(HookError::InvalidAddress { .. })
        ));
        assert_eq!(hooks.active_count(), 0);
    }

    #[test]
    fn test_install_protection_failure_leaves_memory_untouched() {
        // Arrange
        let (hooks, memory) = manager();
        memory.fail_protection(true);

        // Act
        let err = unsafe { hooks.install(TARGET, REPLACEMENT) }.unwrap_err();

        // Assert
        assert!(matches!(err, HookError::ProtectionChangeFailed { .. }));
        assert_eq!(memory.snapshot(TARGET, SNAPSHOT_LEN), PROLOGUE);
        assert!(!hooks.is_hooked(TARGET));
    }

    #[test]
    fn test_uninstall_unknown_target_is_not_hooked() {
        let (hooks, _memory) = manager();
        assert_eq!(hooks.uninstall(TARGET), Err(HookError::NotHooked(TARGET)));
    }

    #[test]
    fn test_uninstall_protection_failure_keeps_record() {
        // Arrange
        let (hooks, memory) = manager();
        unsafe { hooks.install(TARGET, REPLACEMENT) }.expect("install");
        memory.fail_protection(true);

        // Act
        let result = hooks.uninstall(TARGET);

        // Assert
        assert!(matches!(result, Err(HookError::ProtectionChangeFailed { .. })));
        assert!(hooks.is_hooked(TARGET));
    }

    #[test]
    fn test_shutdown_all_restores_everything_and_is_idempotent() {
        // Arrange
        let (hooks, memory) = manager();
        let second = BASE + 0x200;
        memory.fill(second, &[0xCC; SNAPSHOT_LEN]);
        let before = memory.snapshot(BASE, 0x1000);
        unsafe {
            hooks.install(TARGET, REPLACEMENT).expect("first");
            hooks.install(second, REPLACEMENT + 0x40).expect("second");
        }

        // Act
        let restored = hooks.shutdown_all();
        let again = hooks.shutdown_all();

        // Assert
        assert_eq!(restored, 2);
        assert_eq!(again, 0);
        assert_eq!(memory.snapshot(BASE, 0x1000), before);
        assert_eq!(hooks.active_count(), 0);
    }

    #[test]
    fn test_shutdown_all_skips_failures_without_retrying() {
        // Arrange
        let (hooks, memory) = manager();
        unsafe { hooks.install(TARGET, REPLACEMENT) }.expect("install");
        memory.fail_protection(true);

        // Act
        let restored = hooks.shutdown_all();

        // Assert – dropped from the table, bytes still patched
        assert_eq!(restored, 0);
        assert_eq!(hooks.active_count(), 0);
        assert_eq!(memory.snapshot(TARGET, 1), vec![0xE9]);
    }

    #[test]
    fn test_install_by_export_name_resolves_then_hooks() {
        // Arrange
        let (hooks, memory) = manager();
        memory.add_export("gamespy.dll", "GameSpy_Login", TARGET);

        // Act
        let handle = unsafe { hooks.install_by_export_name("gamespy.dll", "GameSpy_Login", REPLACEMENT) }
            .expect("install");

        // Assert
        assert_eq!(handle.target(), TARGET);
        assert!(hooks.is_hooked(TARGET));
    }

    #[test]
    fn test_install_by_export_name_reports_missing_module_and_export() {
        let (hooks, memory) = manager();
        memory.add_export("gamespy.dll", "GameSpy_Login", TARGET);

        let missing_module =
            unsafe { hooks.install_by_export_name("nope.dll", "GameSpy_Login", REPLACEMENT) };
        let missing_export =
            unsafe { hooks.install_by_export_name("gamespy.dll", "GameSpy_Nope", REPLACEMENT) };

        assert!(matches!(missing_module, Err(HookError::ModuleLoadFailed { .. })));
        assert!(matches!(missing_export, Err(HookError::ExportNotFound { .. })));
        assert_eq!(hooks.active_count(), 0);
    }
}
