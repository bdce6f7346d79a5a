//! RAM optimizer
//!
//! Sequences the native operations of one optimization pass. Nothing in
//! here returns an error: every failure is logged and folded into the
//! returned ledger so the caller always gets a complete picture.

use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

use super::config::FeatureToggles;
use super::error::ProcessError;
use super::exclusions::ProcessExceptionList;
use super::log::{LogKind, LogSink};
use crate::security::privileges::Privilege;
use crate::windows::memory::NativeMemory;

/// What happened to one process during working-set trimming
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrimStatus {
    Trimmed,
    Excluded,
    Failed(ProcessError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessOutcome {
    pub pid: u32,
    pub name: String,
    pub path: Option<PathBuf>,
    pub status: TrimStatus,
}

/// Per-process ledger of a trim pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TrimReport {
    pub processes: Vec<ProcessOutcome>,
}

impl TrimReport {
    pub fn trimmed(&self) -> usize {
        self.count(|s| matches!(s, TrimStatus::Trimmed))
    }

    pub fn excluded(&self) -> usize {
        self.count(|s| matches!(s, TrimStatus::Excluded))
    }

    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, TrimStatus::Failed(_)))
    }

    fn count(&self, pred: impl Fn(&TrimStatus) -> bool) -> usize {
        self.processes.iter().filter(|p| pred(&p.status)).count()
    }
}

/// Result of a single non-process step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    NotRequested,
    Done,
    /// Required privilege could not be enabled; the call was not made
    PrivilegeUnavailable,
    /// Not attempted because an earlier step failed
    Aborted,
    /// The OS call failed with this error code
    Failed(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CacheOutcome {
    pub file_cache: StepStatus,
    pub standby_list: StepStatus,
}

/// Which pass the caller asked for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PassKind {
    /// Everything enabled in the feature toggles
    Full,
    /// Working-set trimming only
    WorkingSets,
    /// File cache and, if toggled, standby list
    FileSystemCaches,
}

/// Steps one pass will run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PassPlan {
    pub empty_working_sets: bool,
    pub clear_caches: bool,
    pub purge_standby: bool,
    pub clear_clipboard: bool,
    pub trim_self: bool,
}

impl PassPlan {
    pub fn new(kind: PassKind, features: &FeatureToggles) -> Self {
        match kind {
            PassKind::Full => Self {
                empty_working_sets: features.empty_working_sets,
                clear_caches: features.clear_file_system_cache,
                purge_standby: features.clear_standby_cache,
                clear_clipboard: features.clear_clipboard,
                trim_self: features.invoke_gc,
            },
            PassKind::WorkingSets => Self { empty_working_sets: true, ..Default::default() },
            PassKind::FileSystemCaches => Self {
                clear_caches: true,
                purge_standby: features.clear_standby_cache,
                ..Default::default()
            },
        }
    }
}

/// Results of every step of one pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PassSteps {
    pub working_sets: Option<TrimReport>,
    pub caches: Option<CacheOutcome>,
    pub clipboard: StepStatus,
    pub gc: StepStatus,
}

pub struct RamOptimizer {
    native: Arc<dyn NativeMemory>,
    log: Arc<dyn LogSink>,
}

impl RamOptimizer {
    pub fn new(native: Arc<dyn NativeMemory>, log: Arc<dyn LogSink>) -> Self {
        Self { native, log }
    }

    /// Run the blocking part of a pass in order: trim, caches, clipboard,
    /// own working set.
    pub fn run(&self, plan: &PassPlan, exceptions: &ProcessExceptionList) -> PassSteps {
        let mut steps = PassSteps::default();

        if plan.empty_working_sets {
            steps.working_sets = Some(self.empty_working_sets(exceptions));
        }
        if plan.clear_caches {
            steps.caches = Some(self.clear_caches(plan.purge_standby));
        }
        if plan.clear_clipboard {
            steps.clipboard = self.clear_clipboard();
        }
        if plan.trim_self {
            steps.gc = self.trim_own_working_set();
        }

        steps
    }

    /// Trim every visible process not in `exceptions`.
    ///
    /// Always returns one entry per enumerated process.
    pub fn empty_working_sets(&self, exceptions: &ProcessExceptionList) -> TrimReport {
        self.log.add(LogKind::Process, "Emptying working sets");

        let processes = self.native.list_processes();
        let mut report = TrimReport { processes: Vec::with_capacity(processes.len()) };

        for process in processes {
            let excluded = process.path.as_deref().map_or(false, |p| exceptions.contains(p));

            let status = if excluded {
                self.log.add(
                    LogKind::Process,
                    &format!("Excluded process: {} ({})", process.name, process.pid),
                );
                TrimStatus::Excluded
            } else {
                match self.native.trim_working_set(process.pid) {
                    Ok(()) => {
                        debug!("Trimmed {} ({})", process.name, process.pid);
                        TrimStatus::Trimmed
                    }
                    Err(e) => {
                        self.log.add(
                            LogKind::Process,
                            &format!("Could not trim {} ({}): {}", process.name, process.pid, e),
                        );
                        TrimStatus::Failed(e)
                    }
                }
            };

            report.processes.push(ProcessOutcome {
                pid: process.pid,
                name: process.name,
                path: process.path,
                status,
            });
        }

        self.log.add(
            LogKind::Process,
            &format!(
                "Working sets emptied: {} trimmed, {} excluded, {} failed",
                report.trimmed(),
                report.excluded(),
                report.failed()
            ),
        );
        report
    }

    /// Flush the file cache, then purge the standby list when asked.
    ///
    /// A privilege that cannot be enabled skips its step. A failed file cache
    /// call aborts the standby purge.
    pub fn clear_caches(&self, purge_standby: bool) -> CacheOutcome {
        let mut outcome = CacheOutcome::default();

        outcome.file_cache = if self.acquire(Privilege::IncreaseQuota) {
            match self.native.purge_file_cache() {
                Ok(()) => {
                    self.log.add(LogKind::Ram, "File system cache cleared");
                    StepStatus::Done
                }
                Err(e) => {
                    self.log.add(LogKind::Error, &e.to_string());
                    StepStatus::Failed(e.code)
                }
            }
        } else {
            StepStatus::PrivilegeUnavailable
        };

        if !purge_standby {
            return outcome;
        }

        outcome.standby_list = if matches!(outcome.file_cache, StepStatus::Failed(_)) {
            StepStatus::Aborted
        } else if self.acquire(Privilege::ProfileSingleProcess) {
            match self.native.purge_standby_list() {
                Ok(()) => {
                    self.log.add(LogKind::Ram, "Standby cache cleared");
                    StepStatus::Done
                }
                Err(e) => {
                    self.log.add(LogKind::Error, &e.to_string());
                    StepStatus::Failed(e.code)
                }
            }
        } else {
            StepStatus::PrivilegeUnavailable
        };

        outcome
    }

    pub fn clear_clipboard(&self) -> StepStatus {
        match self.native.clear_clipboard() {
            Ok(()) => {
                self.log.add(LogKind::Application, "Clipboard cleared");
                StepStatus::Done
            }
            Err(e) => {
                self.log.add(LogKind::Error, &e.to_string());
                StepStatus::Failed(e.code)
            }
        }
    }

    pub fn trim_own_working_set(&self) -> StepStatus {
        match self.native.trim_own_working_set() {
            Ok(()) => StepStatus::Done,
            Err(e) => {
                self.log.add(LogKind::Error, &e.to_string());
                StepStatus::Failed(e.code)
            }
        }
    }

    /// `false` and `Err` both mean the dependent call must not be made
    fn acquire(&self, privilege: Privilege) -> bool {
        match self.native.enable_privilege(privilege) {
            Ok(true) => true,
            Ok(false) => {
                self.log.add(LogKind::Ram, &format!("{} is not held; step skipped", privilege));
                false
            }
            Err(e) => {
                self.log.add(LogKind::Error, &e.to_string());
                false
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::error::{NativeCallError, NativeOperation, PrivilegeError, PrivilegeStage};
    use crate::core::log::tests::MemorySink;
    use crate::windows::process::ProcessEntry;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Scriptable NativeMemory
    #[derive(Default)]
    pub struct FakeNative {
        pub processes: Vec<ProcessEntry>,
        pub failing_pids: HashSet<u32>,
        pub denied_privileges: HashSet<&'static str>,
        pub broken_privileges: HashSet<&'static str>,
        pub fail_file_cache: bool,
        pub fail_everything: bool,
        pub trimmed: Mutex<Vec<u32>>,
        pub file_cache_calls: AtomicUsize,
        pub standby_calls: AtomicUsize,
        pub clipboard_calls: AtomicUsize,
        pub self_trim_calls: AtomicUsize,
    }

    impl FakeNative {
        pub fn with_processes(count: u32) -> Self {
            Self {
                processes: (1..=count)
                    .map(|pid| ProcessEntry {
                        pid,
                        name: format!("proc{}.exe", pid),
                        path: Some(PathBuf::from(format!(r"C:\Apps\proc{}.exe", pid))),
                    })
                    .collect(),
                ..Default::default()
            }
        }

        pub fn trimmed(&self) -> Vec<u32> {
            self.trimmed.lock().unwrap().clone()
        }

        fn fail(&self, op: NativeOperation) -> Result<(), NativeCallError> {
            if self.fail_everything {
                Err(NativeCallError::new(op, 31))
            } else {
                Ok(())
            }
        }
    }

    impl NativeMemory for FakeNative {
        fn list_processes(&self) -> Vec<ProcessEntry> {
            self.processes.clone()
        }

        fn enable_privilege(&self, privilege: Privilege) -> Result<bool, PrivilegeError> {
            if self.fail_everything || self.broken_privileges.contains(privilege.name()) {
                return Err(PrivilegeError::new(privilege.name(), PrivilegeStage::Lookup, 1313));
            }
            Ok(!self.denied_privileges.contains(privilege.name()))
        }

        fn trim_working_set(&self, pid: u32) -> Result<(), ProcessError> {
            if self.fail_everything || self.failing_pids.contains(&pid) {
                return Err(ProcessError::AccessDenied);
            }
            self.trimmed.lock().unwrap().push(pid);
            Ok(())
        }

        fn purge_file_cache(&self) -> Result<(), NativeCallError> {
            self.file_cache_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_file_cache {
                return Err(NativeCallError::new(NativeOperation::PurgeFileSystemCache, 1450));
            }
            self.fail(NativeOperation::PurgeFileSystemCache)
        }

        fn purge_standby_list(&self) -> Result<(), NativeCallError> {
            self.standby_calls.fetch_add(1, Ordering::SeqCst);
            self.fail(NativeOperation::PurgeStandbyList)
        }

        fn clear_clipboard(&self) -> Result<(), NativeCallError> {
            self.clipboard_calls.fetch_add(1, Ordering::SeqCst);
            self.fail(NativeOperation::ClearClipboard)
        }

        fn trim_own_working_set(&self) -> Result<(), NativeCallError> {
            self.self_trim_calls.fetch_add(1, Ordering::SeqCst);
            self.fail(NativeOperation::TrimOwnWorkingSet)
        }
    }

    fn optimizer(native: FakeNative) -> (RamOptimizer, Arc<FakeNative>, Arc<MemorySink>) {
        let native = Arc::new(native);
        let sink = Arc::new(MemorySink::default());
        (RamOptimizer::new(native.clone(), sink.clone()), native, sink)
    }

    #[test]
    fn test_excluded_process_is_not_trimmed() {
        let (opt, native, _) = optimizer(FakeNative::with_processes(3));
        let exceptions: ProcessExceptionList = [r"c:\APPS\PROC2.EXE"].into_iter().collect();

        let report = opt.empty_working_sets(&exceptions);

        assert_eq!(report.processes.len(), 3);
        assert_eq!(report.processes[1].status, TrimStatus::Excluded);
        assert_eq!(report.excluded(), 1);
        assert_eq!(report.trimmed(), 2);
        assert_eq!(native.trimmed(), vec![1, 3]);
    }

    #[test]
    fn test_one_failure_does_not_stop_the_batch() {
        let n = 6;
        for k in 1..=n {
            let mut fake = FakeNative::with_processes(n);
            fake.failing_pids.insert(k);
            let (opt, native, _) = optimizer(fake);

            let report = opt.empty_working_sets(&ProcessExceptionList::new());

            assert_eq!(report.processes.len(), n as usize);
            assert_eq!(report.failed(), 1);
            assert_eq!(report.trimmed(), n as usize - 1);
            assert_eq!(
                report.processes[(k - 1) as usize].status,
                TrimStatus::Failed(ProcessError::AccessDenied)
            );
            assert!(!native.trimmed().contains(&k));
        }
    }

    #[test]
    fn test_process_without_path_is_still_trimmed() {
        let mut fake = FakeNative::with_processes(1);
        fake.processes[0].path = None;
        let (opt, native, _) = optimizer(fake);
        let exceptions: ProcessExceptionList = [r"C:\Apps\proc1.exe"].into_iter().collect();

        let report = opt.empty_working_sets(&exceptions);

        assert_eq!(report.trimmed(), 1);
        assert_eq!(native.trimmed(), vec![1]);
    }

    #[test]
    fn test_clear_caches_runs_both_steps() {
        let (opt, native, sink) = optimizer(FakeNative::default());

        let outcome = opt.clear_caches(true);

        assert_eq!(outcome.file_cache, StepStatus::Done);
        assert_eq!(outcome.standby_list, StepStatus::Done);
        assert_eq!(native.file_cache_calls.load(Ordering::SeqCst), 1);
        assert_eq!(native.standby_calls.load(Ordering::SeqCst), 1);
        assert_eq!(sink.count(LogKind::Error), 0);
    }

    #[test]
    fn test_clear_caches_is_repeatable() {
        let (opt, _, sink) = optimizer(FakeNative::default());
        assert_eq!(opt.clear_caches(false).file_cache, StepStatus::Done);
        assert_eq!(opt.clear_caches(false).file_cache, StepStatus::Done);
        assert_eq!(sink.count(LogKind::Error), 0);
    }

    #[test]
    fn test_missing_quota_privilege_skips_file_cache_only() {
        let mut fake = FakeNative::default();
        fake.denied_privileges.insert("SeIncreaseQuotaPrivilege");
        let (opt, native, _) = optimizer(fake);

        let outcome = opt.clear_caches(true);

        assert_eq!(outcome.file_cache, StepStatus::PrivilegeUnavailable);
        assert_eq!(outcome.standby_list, StepStatus::Done);
        assert_eq!(native.file_cache_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_privilege_error_treated_like_denial() {
        let mut fake = FakeNative::default();
        fake.broken_privileges.insert("SeProfileSingleProcessPrivilege");
        let (opt, native, sink) = optimizer(fake);

        let outcome = opt.clear_caches(true);

        assert_eq!(outcome.file_cache, StepStatus::Done);
        assert_eq!(outcome.standby_list, StepStatus::PrivilegeUnavailable);
        assert_eq!(native.standby_calls.load(Ordering::SeqCst), 0);
        assert_eq!(sink.count(LogKind::Error), 1);
    }

    #[test]
    fn test_file_cache_failure_aborts_standby() {
        let fake = FakeNative { fail_file_cache: true, ..Default::default() };
        let (opt, native, sink) = optimizer(fake);

        let outcome = opt.clear_caches(true);

        assert_eq!(outcome.file_cache, StepStatus::Failed(1450));
        assert_eq!(outcome.standby_list, StepStatus::Aborted);
        assert_eq!(native.standby_calls.load(Ordering::SeqCst), 0);
        assert_eq!(sink.count(LogKind::Error), 1);
    }

    #[test]
    fn test_standby_not_requested() {
        let (opt, native, _) = optimizer(FakeNative::default());
        let outcome = opt.clear_caches(false);
        assert_eq!(outcome.standby_list, StepStatus::NotRequested);
        assert_eq!(native.standby_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_plan_follows_pass_kind() {
        let features = FeatureToggles {
            empty_working_sets: false,
            clear_file_system_cache: true,
            clear_standby_cache: false,
            clear_clipboard: true,
            invoke_gc: true,
        };

        let full = PassPlan::new(PassKind::Full, &features);
        assert!(!full.empty_working_sets);
        assert!(full.clear_caches && full.clear_clipboard && full.trim_self);
        assert!(!full.purge_standby);

        let ws = PassPlan::new(PassKind::WorkingSets, &features);
        assert!(ws.empty_working_sets && !ws.clear_caches && !ws.clear_clipboard);

        let caches = PassPlan::new(PassKind::FileSystemCaches, &features);
        assert!(caches.clear_caches && !caches.purge_standby && !caches.trim_self);
    }

    #[test]
    fn test_run_survives_total_failure() {
        let fake = FakeNative { fail_everything: true, ..FakeNative::with_processes(4) };
        let (opt, native, _) = optimizer(fake);
        let plan = PassPlan::new(
            PassKind::Full,
            &FeatureToggles { clear_clipboard: true, invoke_gc: true, ..Default::default() },
        );

        let steps = opt.run(&plan, &ProcessExceptionList::new());

        assert_eq!(steps.working_sets.as_ref().unwrap().failed(), 4);
        let caches = steps.caches.unwrap();
        assert_eq!(caches.file_cache, StepStatus::PrivilegeUnavailable);
        assert_eq!(caches.standby_list, StepStatus::PrivilegeUnavailable);
        assert_eq!(steps.clipboard, StepStatus::Failed(31));
        assert_eq!(steps.gc, StepStatus::Failed(31));
        assert_eq!(native.self_trim_calls.load(Ordering::SeqCst), 1);
    }
}
