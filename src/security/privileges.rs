//! Privilege management
//!
//! Cache purging is refused by the kernel unless the calling token has the
//! matching privilege enabled. Enabling is permanent for the lifetime of the
//! process; nothing here reverts it.

use std::fmt;
use tracing::info;

use crate::core::error::{PrivilegeError, PrivilegeStage};

/// Privileges the optimizer needs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Privilege {
    /// Required to resize the system file cache
    IncreaseQuota,
    /// Required to purge the standby list
    ProfileSingleProcess,
}

impl Privilege {
    /// Name understood by LookupPrivilegeValue
    pub fn name(&self) -> &'static str {
        match self {
            Privilege::IncreaseQuota => "SeIncreaseQuotaPrivilege",
            Privilege::ProfileSingleProcess => "SeProfileSingleProcessPrivilege",
        }
    }
}

impl fmt::Display for Privilege {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Token elevation of the current process
#[derive(Debug, Clone, PartialEq)]
pub enum PrivilegeLevel {
    /// Standard user - caches cannot be purged
    Standard,
    /// Elevated admin - full optimization
    Admin,
}

impl PrivilegeLevel {
    pub fn detect() -> Self {
        let level = if is_elevated() { PrivilegeLevel::Admin } else { PrivilegeLevel::Standard };
        info!("Running with privilege level: {:?}", level);
        level
    }

    pub fn can_purge_caches(&self) -> bool {
        matches!(self, PrivilegeLevel::Admin)
    }
}

/// Enable a named privilege on the current process token.
///
/// `Ok(false)` means the token does not hold the privilege; callers treat it
/// exactly like an error and skip the dependent call.
#[cfg(windows)]
pub fn enable_privilege(name: &str) -> Result<bool, PrivilegeError> {
    use windows::core::{HSTRING, PCWSTR};
    use windows::Win32::Foundation::{GetLastError, ERROR_NOT_ALL_ASSIGNED, HANDLE, LUID};
    use windows::Win32::Security::{
        AdjustTokenPrivileges, LookupPrivilegeValueW, LUID_AND_ATTRIBUTES, SE_PRIVILEGE_ENABLED,
        TOKEN_ADJUST_PRIVILEGES, TOKEN_PRIVILEGES, TOKEN_QUERY,
    };
    use windows::Win32::System::Threading::{GetCurrentProcess, OpenProcessToken};

    use crate::windows::{win32_code, OwnedHandle};

    unsafe {
        let mut raw = HANDLE::default();
        OpenProcessToken(GetCurrentProcess(), TOKEN_QUERY | TOKEN_ADJUST_PRIVILEGES, &mut raw)
            .map_err(|e| PrivilegeError::new(name, PrivilegeStage::OpenToken, win32_code(&e)))?;
        let token = OwnedHandle(raw);

        let mut luid = LUID::default();
        LookupPrivilegeValueW(PCWSTR::null(), &HSTRING::from(name), &mut luid)
            .map_err(|e| PrivilegeError::new(name, PrivilegeStage::Lookup, win32_code(&e)))?;

        let request = TOKEN_PRIVILEGES {
            PrivilegeCount: 1,
            Privileges: [LUID_AND_ATTRIBUTES { Luid: luid, Attributes: SE_PRIVILEGE_ENABLED }],
        };
        AdjustTokenPrivileges(token.0, false, Some(&request as *const _), 0, None, None)
            .map_err(|e| PrivilegeError::new(name, PrivilegeStage::Adjust, win32_code(&e)))?;

        // AdjustTokenPrivileges succeeds even when the token lacks the privilege
        let enabled = GetLastError() != ERROR_NOT_ALL_ASSIGNED;
        tracing::debug!("{} enabled: {}", name, enabled);
        Ok(enabled)
    }
}

#[cfg(not(windows))]
pub fn enable_privilege(name: &str) -> Result<bool, PrivilegeError> {
    Err(PrivilegeError::new(
        name,
        PrivilegeStage::Unsupported,
        crate::core::error::UNSUPPORTED_CODE,
    ))
}

#[cfg(windows)]
fn is_elevated() -> bool {
    use std::mem::size_of;
    use windows::Win32::Foundation::HANDLE;
    use windows::Win32::Security::{GetTokenInformation, TokenElevation, TOKEN_ELEVATION, TOKEN_QUERY};
    use windows::Win32::System::Threading::{GetCurrentProcess, OpenProcessToken};

    use crate::windows::OwnedHandle;

    unsafe {
        let mut raw = HANDLE::default();
        if OpenProcessToken(GetCurrentProcess(), TOKEN_QUERY, &mut raw).is_err() {
            return false;
        }
        let token = OwnedHandle(raw);

        let mut elevation = TOKEN_ELEVATION::default();
        let mut size = 0u32;
        let result = GetTokenInformation(
            token.0,
            TokenElevation,
            Some(&mut elevation as *mut _ as *mut _),
            size_of::<TOKEN_ELEVATION>() as u32,
            &mut size,
        );
        result.is_ok() && elevation.TokenIsElevated != 0
    }
}

#[cfg(not(windows))]
fn is_elevated() -> bool {
    false
}
