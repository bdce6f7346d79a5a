//! RAM Reclaim
//!
//! Reports physical memory usage on Windows and reclaims RAM on demand or
//! automatically.
//!
//! ## Features
//!
//! - **Working-set trimming**: every visible process, minus an exclusion list
//! - **Cache purging**: system file cache and standby page list
//! - **Monitoring**: periodic usage sampling with a bounded history
//! - **Auto-optimize**: threshold-triggered (with cooldown) and interval-triggered
//! - **Single-flight**: at most one optimization pass runs at a time
//!
//! ## Safety
//!
//! - Privileges are enabled explicitly before any cache purge; a missing
//!   privilege skips the step instead of failing the pass
//! - One process failing to trim never stops the rest
//! - Auto-optimize thresholds below 25% are rejected

pub mod core;
pub mod monitor;
pub mod security;
pub mod windows;

// Re-exports
pub use crate::core::config::{ControllerConfig, FeatureToggles};
pub use crate::core::controller::{ControllerEvent, OptimizationOutcome, RamController, Trigger};
pub use crate::core::error::{ConfigError, NativeCallError, PrivilegeError, ProcessError};
pub use crate::core::exclusions::ProcessExceptionList;
pub use crate::core::log::{LogKind, LogSink, TracingLogSink};
pub use crate::core::optimizer::{PassKind, RamOptimizer, StepStatus, TrimReport, TrimStatus};
pub use crate::monitor::realtime::{SystemUsageSource, UsageSample, UsageSource};
pub use crate::security::privileges::{enable_privilege, Privilege};
pub use crate::windows::memory::{NativeMemory, SystemMemory};
