//! Native memory operations
//!
//! [`NativeMemory`] is the only surface the optimizer sees. [`SystemMemory`]
//! implements it with real Win32/NT calls; tests substitute fakes.

use tracing::{debug, info, warn};

use super::process::{self, ProcessEntry};
use crate::core::error::{NativeCallError, NativeOperation, PrivilegeError, ProcessError};
use crate::security::privileges::{self, Privilege, PrivilegeLevel};

/// OS capabilities needed by an optimization pass.
///
/// Every operation is idempotent and fails independently of the others.
pub trait NativeMemory: Send + Sync {
    /// Processes visible to the caller
    fn list_processes(&self) -> Vec<ProcessEntry>;

    /// Enable a privilege on the current process token
    fn enable_privilege(&self, privilege: Privilege) -> Result<bool, PrivilegeError>;

    /// Evict as many resident pages of one process as possible
    fn trim_working_set(&self, pid: u32) -> Result<(), ProcessError>;

    /// Drop the system file cache working set
    fn purge_file_cache(&self) -> Result<(), NativeCallError>;

    /// Discard the standby page list
    fn purge_standby_list(&self) -> Result<(), NativeCallError>;

    /// Empty the global clipboard
    fn clear_clipboard(&self) -> Result<(), NativeCallError>;

    /// Trim the working set of the current process
    fn trim_own_working_set(&self) -> Result<(), NativeCallError>;
}

/// Real OS implementation
pub struct SystemMemory {
    level: PrivilegeLevel,
}

impl SystemMemory {
    pub fn new() -> Self {
        let level = PrivilegeLevel::detect();
        if !level.can_purge_caches() {
            warn!("Running without admin - cache purging will be skipped");
        } else {
            info!("Running with admin privileges - full optimization available");
        }
        Self { level }
    }

    pub fn has_admin_privileges(&self) -> bool {
        self.level.can_purge_caches()
    }
}

impl Default for SystemMemory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(windows)]
#[link(name = "ntdll")]
extern "system" {
    fn NtSetSystemInformation(
        system_information_class: i32,
        system_information: *mut std::ffi::c_void,
        system_information_length: u32,
    ) -> i32;

    fn RtlNtStatusToDosError(status: i32) -> u32;
}

/// Map an NTSTATUS onto the Win32 error code carried by [`NativeCallError`].
/// NT calls do not reliably set the thread's last error.
#[cfg(windows)]
fn check_status(operation: NativeOperation, status: i32) -> Result<(), NativeCallError> {
    if status >= 0 {
        return Ok(());
    }
    let code = unsafe { RtlNtStatusToDosError(status) };
    Err(NativeCallError::new(operation, code))
}

#[cfg(windows)]
impl NativeMemory for SystemMemory {
    fn list_processes(&self) -> Vec<ProcessEntry> {
        process::list_processes()
    }

    fn enable_privilege(&self, privilege: Privilege) -> Result<bool, PrivilegeError> {
        privileges::enable_privilege(privilege.name())
    }

    fn trim_working_set(&self, pid: u32) -> Result<(), ProcessError> {
        use windows::Win32::System::ProcessStatus::EmptyWorkingSet;
        use windows::Win32::System::Threading::{
            OpenProcess, PROCESS_QUERY_LIMITED_INFORMATION, PROCESS_SET_QUOTA,
        };

        use super::{win32_code, OwnedHandle};

        unsafe {
            let handle = OpenProcess(PROCESS_SET_QUOTA | PROCESS_QUERY_LIMITED_INFORMATION, false, pid)
                .map_err(|e| ProcessError::from_code(win32_code(&e)))?;
            let handle = OwnedHandle(handle);
            EmptyWorkingSet(handle.0).map_err(|e| ProcessError::from_code(win32_code(&e)))
        }
    }

    fn purge_file_cache(&self) -> Result<(), NativeCallError> {
        use super::cache::{FileCacheRequest, SYSTEM_FILE_CACHE_INFORMATION};

        let mut request = FileCacheRequest::for_current_process();
        let (info, length) = request.as_raw();
        let status = unsafe { NtSetSystemInformation(SYSTEM_FILE_CACHE_INFORMATION, info, length) };
        check_status(NativeOperation::PurgeFileSystemCache, status)?;
        debug!("File system cache flushed ({} byte request)", length);
        Ok(())
    }

    fn purge_standby_list(&self) -> Result<(), NativeCallError> {
        use super::cache::{MEMORY_PURGE_STANDBY_LIST, SYSTEM_MEMORY_LIST_INFORMATION};
        use std::mem::size_of;

        let mut command = MEMORY_PURGE_STANDBY_LIST;
        let status = unsafe {
            NtSetSystemInformation(
                SYSTEM_MEMORY_LIST_INFORMATION,
                &mut command as *mut i32 as *mut std::ffi::c_void,
                size_of::<i32>() as u32,
            )
        };
        check_status(NativeOperation::PurgeStandbyList, status)?;
        debug!("Standby list purged");
        Ok(())
    }

    fn clear_clipboard(&self) -> Result<(), NativeCallError> {
        use windows::Win32::Foundation::HWND;
        use windows::Win32::System::DataExchange::{CloseClipboard, EmptyClipboard, OpenClipboard};

        use super::win32_code;

        unsafe {
            OpenClipboard(HWND::default())
                .map_err(|e| NativeCallError::new(NativeOperation::ClearClipboard, win32_code(&e)))?;
            let emptied = EmptyClipboard();
            let _ = CloseClipboard();
            emptied.map_err(|e| NativeCallError::new(NativeOperation::ClearClipboard, win32_code(&e)))
        }
    }

    fn trim_own_working_set(&self) -> Result<(), NativeCallError> {
        use windows::Win32::System::ProcessStatus::EmptyWorkingSet;
        use windows::Win32::System::Threading::GetCurrentProcess;

        use super::win32_code;

        unsafe {
            EmptyWorkingSet(GetCurrentProcess())
                .map_err(|e| NativeCallError::new(NativeOperation::TrimOwnWorkingSet, win32_code(&e)))
        }
    }
}

#[cfg(not(windows))]
impl NativeMemory for SystemMemory {
    fn list_processes(&self) -> Vec<ProcessEntry> {
        process::list_processes()
    }

    fn enable_privilege(&self, privilege: Privilege) -> Result<bool, PrivilegeError> {
        privileges::enable_privilege(privilege.name())
    }

    fn trim_working_set(&self, _pid: u32) -> Result<(), ProcessError> {
        Err(ProcessError::Os(crate::core::error::UNSUPPORTED_CODE))
    }

    fn purge_file_cache(&self) -> Result<(), NativeCallError> {
        Err(NativeCallError::unsupported(NativeOperation::PurgeFileSystemCache))
    }

    fn purge_standby_list(&self) -> Result<(), NativeCallError> {
        Err(NativeCallError::unsupported(NativeOperation::PurgeStandbyList))
    }

    fn clear_clipboard(&self) -> Result<(), NativeCallError> {
        Err(NativeCallError::unsupported(NativeOperation::ClearClipboard))
    }

    fn trim_own_working_set(&self) -> Result<(), NativeCallError> {
        debug!("Own working set trim not available on this platform");
        Err(NativeCallError::unsupported(NativeOperation::TrimOwnWorkingSet))
    }
}
