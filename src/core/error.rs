//! Error types for privilege, native and configuration failures

use serde::Serialize;
use std::fmt;

/// Stage of a privilege adjustment that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrivilegeStage {
    /// Opening the current process token
    OpenToken,
    /// Resolving the privilege name to a LUID
    Lookup,
    /// AdjustTokenPrivileges reported failure
    Adjust,
    /// Privileges do not exist on this platform
    Unsupported,
}

/// A named privilege could not be resolved or enabled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivilegeError {
    pub privilege: String,
    pub stage: PrivilegeStage,
    /// Last OS error code
    pub code: u32,
}

impl PrivilegeError {
    pub fn new(privilege: impl Into<String>, stage: PrivilegeStage, code: u32) -> Self {
        Self { privilege: privilege.into(), stage, code }
    }
}

impl fmt::Display for PrivilegeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let what = match self.stage {
            PrivilegeStage::OpenToken => "could not open process token for",
            PrivilegeStage::Lookup => "could not resolve",
            PrivilegeStage::Adjust => "could not enable",
            PrivilegeStage::Unsupported => "unsupported privilege",
        };
        write!(f, "{} {} (os error {})", what, self.privilege, self.code)
    }
}

impl std::error::Error for PrivilegeError {}

/// Native operations the optimizer can invoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeOperation {
    TrimWorkingSet,
    PurgeFileSystemCache,
    PurgeStandbyList,
    ClearClipboard,
    TrimOwnWorkingSet,
}

impl fmt::Display for NativeOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NativeOperation::TrimWorkingSet => "trim working set",
            NativeOperation::PurgeFileSystemCache => "purge file system cache",
            NativeOperation::PurgeStandbyList => "purge standby list",
            NativeOperation::ClearClipboard => "clear clipboard",
            NativeOperation::TrimOwnWorkingSet => "trim own working set",
        };
        f.write_str(name)
    }
}

/// An OS memory call returned a failure code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeCallError {
    pub operation: NativeOperation,
    /// Last OS error code
    pub code: u32,
}

impl NativeCallError {
    pub fn new(operation: NativeOperation, code: u32) -> Self {
        Self { operation, code }
    }

    /// Returned on platforms without the native memory APIs.
    pub fn unsupported(operation: NativeOperation) -> Self {
        Self { operation, code: UNSUPPORTED_CODE }
    }
}

/// ERROR_NOT_SUPPORTED
pub const UNSUPPORTED_CODE: u32 = 50;

impl fmt::Display for NativeCallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed (os error {})", self.operation, self.code)
    }
}

impl std::error::Error for NativeCallError {}

/// Trimming a single process failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessError {
    /// Process is protected or owned by another user
    AccessDenied,
    /// Process exited between enumeration and trimming
    Exited,
    /// Any other OS failure
    Os(u32),
}

impl ProcessError {
    /// Classify a Win32 error code.
    pub fn from_code(code: u32) -> Self {
        match code {
            // ERROR_ACCESS_DENIED
            5 => ProcessError::AccessDenied,
            // ERROR_INVALID_PARAMETER: pid no longer exists
            87 => ProcessError::Exited,
            other => ProcessError::Os(other),
        }
    }
}

impl fmt::Display for ProcessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessError::AccessDenied => write!(f, "access denied"),
            ProcessError::Exited => write!(f, "process exited"),
            ProcessError::Os(code) => write!(f, "os error {}", code),
        }
    }
}

impl std::error::Error for ProcessError {}

/// Invalid constructor or setter arguments.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Timer interval must be strictly positive (milliseconds)
    InvalidInterval(i64),
    /// Auto-optimize threshold outside [25, 100]
    ThresholdOutOfRange(f64),
    /// History must keep at least one sample
    InvalidHistoryLimit(usize),
    /// Config file could not be read or written
    Io(String),
    /// Config file could not be parsed or rendered
    Parse(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidInterval(ms) => {
                write!(f, "Invalid interval: {} ms (must be > 0)", ms)
            }
            ConfigError::ThresholdOutOfRange(pct) => {
                write!(f, "Invalid threshold: {}% (must be between 25 and 100)", pct)
            }
            ConfigError::InvalidHistoryLimit(n) => {
                write!(f, "Invalid history limit: {} (must be > 0)", n)
            }
            ConfigError::Io(msg) => write!(f, "Config I/O error: {}", msg),
            ConfigError::Parse(msg) => write!(f, "Config parse error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err.to_string())
    }
}
