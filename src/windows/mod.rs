//! Windows memory management APIs
//!
//! Everything that talks to the OS lives here, behind the [`NativeMemory`]
//! trait. Non-Windows builds get an implementation that reports every
//! native call as unsupported so the rest of the crate stays portable.

pub mod cache;
pub mod memory;
pub mod process;

pub use memory::*;
pub use process::*;

/// Closes a kernel handle when dropped.
#[cfg(windows)]
pub(crate) struct OwnedHandle(pub windows::Win32::Foundation::HANDLE);

#[cfg(windows)]
impl Drop for OwnedHandle {
    fn drop(&mut self) {
        unsafe {
            let _ = windows::Win32::Foundation::CloseHandle(self.0);
        }
    }
}

/// Win32 error code carried by a `windows` error (low word of the HRESULT)
#[cfg(windows)]
pub(crate) fn win32_code(err: &windows::core::Error) -> u32 {
    (err.code().0 as u32) & 0xFFFF
}
