//! Windows process enumeration

use serde::Serialize;
use std::path::PathBuf;
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind};

/// A running process as seen by the trim pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessEntry {
    pub pid: u32,
    pub name: String,
    /// Executable path; `None` when the process cannot be queried
    pub path: Option<PathBuf>,
}

/// List all processes visible to the caller, sorted by PID
pub fn list_processes() -> Vec<ProcessEntry> {
    let mut sys = System::new();
    sys.refresh_processes_specifics(
        ProcessesToUpdate::All,
        true,
        ProcessRefreshKind::new().with_exe(UpdateKind::OnlyIfNotSet),
    );

    let mut entries: Vec<ProcessEntry> = sys
        .processes()
        .iter()
        .map(|(pid, process)| ProcessEntry {
            pid: pid.as_u32(),
            name: process.name().to_string_lossy().to_string(),
            path: process.exe().map(|p| p.to_path_buf()),
        })
        .collect();
    entries.sort_by_key(|e| e.pid);
    entries
}
