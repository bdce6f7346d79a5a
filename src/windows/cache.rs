//! Fixed-layout records passed to NtSetSystemInformation
//!
//! The kernel reads SYSTEM_CACHE_INFORMATION with field widths that follow
//! the caller's pointer size, so the record is built per call from
//! `size_of::<usize>()`.

use std::ffi::c_void;
use std::mem::size_of;

/// SystemFileCacheInformation
pub const SYSTEM_FILE_CACHE_INFORMATION: i32 = 0x15;

/// SystemMemoryListInformation
pub const SYSTEM_MEMORY_LIST_INFORMATION: i32 = 0x50;

/// MemoryPurgeStandbyList command of SYSTEM_MEMORY_LIST_COMMAND
pub const MEMORY_PURGE_STANDBY_LIST: i32 = 4;

/// SYSTEM_CACHE_INFORMATION for 32-bit callers
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SystemCacheInformation32 {
    pub current_size: u32,
    pub peak_size: u32,
    pub page_fault_count: u32,
    pub minimum_working_set: u32,
    pub maximum_working_set: u32,
    pub unused: [u32; 4],
}

/// SYSTEM_CACHE_INFORMATION for 64-bit callers
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SystemCacheInformation64 {
    pub current_size: i64,
    pub peak_size: i64,
    pub page_fault_count: i64,
    pub minimum_working_set: i64,
    pub maximum_working_set: i64,
    pub unused: [i64; 4],
}

/// File cache request in the layout matching the caller's pointer width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileCacheRequest {
    Bits32(SystemCacheInformation32),
    Bits64(SystemCacheInformation64),
}

impl FileCacheRequest {
    /// Request with no minimum or maximum bound, which makes the kernel
    /// trim the cache working set.
    pub fn unbounded(pointer_bytes: usize) -> Self {
        if pointer_bytes == 4 {
            FileCacheRequest::Bits32(SystemCacheInformation32 {
                minimum_working_set: u32::MAX,
                maximum_working_set: u32::MAX,
                ..Default::default()
            })
        } else {
            FileCacheRequest::Bits64(SystemCacheInformation64 {
                minimum_working_set: -1,
                maximum_working_set: -1,
                ..Default::default()
            })
        }
    }

    /// Request for the current process
    pub fn for_current_process() -> Self {
        Self::unbounded(size_of::<usize>())
    }

    /// Pointer and byte length to hand to the kernel. The pointer is only
    /// valid while `self` is borrowed.
    pub fn as_raw(&mut self) -> (*mut c_void, u32) {
        match self {
            FileCacheRequest::Bits32(info) => (
                info as *mut SystemCacheInformation32 as *mut c_void,
                size_of::<SystemCacheInformation32>() as u32,
            ),
            FileCacheRequest::Bits64(info) => (
                info as *mut SystemCacheInformation64 as *mut c_void,
                size_of::<SystemCacheInformation64>() as u32,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_sizes() {
        assert_eq!(size_of::<SystemCacheInformation32>(), 36);
        assert_eq!(size_of::<SystemCacheInformation64>(), 72);
    }

    #[test]
    fn test_32bit_sentinels() {
        let mut request = FileCacheRequest::unbounded(4);
        match request {
            FileCacheRequest::Bits32(info) => {
                assert_eq!(info.minimum_working_set, u32::MAX);
                assert_eq!(info.maximum_working_set, u32::MAX);
                assert_eq!(info.current_size, 0);
            }
            FileCacheRequest::Bits64(_) => panic!("expected 32-bit layout"),
        }
        assert_eq!(request.as_raw().1, 36);
    }

    #[test]
    fn test_64bit_sentinels() {
        let mut request = FileCacheRequest::unbounded(8);
        match request {
            FileCacheRequest::Bits64(info) => {
                assert_eq!(info.minimum_working_set, -1);
                assert_eq!(info.maximum_working_set, -1);
                assert_eq!(info.peak_size, 0);
            }
            FileCacheRequest::Bits32(_) => panic!("expected 64-bit layout"),
        }
        assert_eq!(request.as_raw().1, 72);
    }

    #[test]
    fn test_layout_follows_pointer_width() {
        let request = FileCacheRequest::for_current_process();
        if cfg!(target_pointer_width = "64") {
            assert!(matches!(request, FileCacheRequest::Bits64(_)));
        } else {
            assert!(matches!(request, FileCacheRequest::Bits32(_)));
        }
    }
}
