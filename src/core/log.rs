//! Category-tagged log sink
//!
//! The controller and optimizer report what they did through a [`LogSink`].
//! Entries are notifications only: a sink has no return value and cannot
//! influence the pass that produced them.

use std::fmt;
use tracing::{error, info};

/// Category of a log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogKind {
    Application,
    Ram,
    Process,
    Error,
}

impl fmt::Display for LogKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogKind::Application => "application",
            LogKind::Ram => "ram",
            LogKind::Process => "process",
            LogKind::Error => "error",
        };
        f.write_str(name)
    }
}

/// Write-only notification channel
pub trait LogSink: Send + Sync {
    fn add(&self, kind: LogKind, message: &str);
}

/// Forwards entries to `tracing`, one target per category.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn add(&self, kind: LogKind, message: &str) {
        match kind {
            LogKind::Application => info!(target: "ramreclaim::application", "{}", message),
            LogKind::Ram => info!(target: "ramreclaim::ram", "{}", message),
            LogKind::Process => info!(target: "ramreclaim::process", "{}", message),
            LogKind::Error => error!(target: "ramreclaim::error", "{}", message),
        }
    }
}
