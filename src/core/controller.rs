//! RAM controller
//!
//! Owns usage sampling, the two auto-optimize policies and the single-flight
//! guard around optimization passes.
//!
//! Timer ticks run on Tokio tasks and may overlap with calls to the public
//! methods. State sits behind atomics or short-lived locks; no lock is held
//! across an `.await` or while event handlers run. Methods that start a
//! timer must be called from within a Tokio runtime.

use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use super::config::{validate_interval, validate_threshold, ControllerConfig, FeatureToggles};
use super::error::ConfigError;
use super::exclusions::ProcessExceptionList;
use super::log::{LogKind, LogSink, TracingLogSink};
use super::optimizer::{PassKind, PassPlan, PassSteps, RamOptimizer};
use crate::monitor::realtime::{
    MonitorStats, SystemUsageSource, UsageHistory, UsageSample, UsageSource,
};
use crate::windows::memory::{NativeMemory, SystemMemory};

/// What started an optimization pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Manual,
    Threshold,
    Interval,
}

/// Result of one completed pass
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptimizationOutcome {
    /// Used bytes sampled before the pass
    pub before_usage: f64,
    /// Used bytes sampled after the settle time
    pub after_usage: f64,
    /// `before_usage - after_usage`; negative when usage grew
    pub savings: f64,
    pub kind: PassKind,
    pub trigger: Trigger,
    pub steps: PassSteps,
    pub duration_ms: u64,
}

impl OptimizationOutcome {
    pub fn new(before_usage: f64, after_usage: f64, kind: PassKind, trigger: Trigger) -> Self {
        Self {
            before_usage,
            after_usage,
            savings: before_usage - after_usage,
            kind,
            trigger,
            steps: PassSteps::default(),
            duration_ms: 0,
        }
    }

    pub fn savings_mb(&self) -> f64 {
        self.savings / 1024.0 / 1024.0
    }
}

/// Notifications delivered to subscribers
#[derive(Debug, Clone)]
pub enum ControllerEvent {
    UsageUpdated(UsageSample),
    OptimizationCompleted(OptimizationOutcome),
    SampleAdded(UsageSample),
    SampleRemoved(UsageSample),
    HistoryCleared,
}

type Handler = Box<dyn Fn(&ControllerEvent) + Send + Sync>;

#[derive(Debug, Clone)]
struct Settings {
    monitor_interval: Duration,
    auto_by_percentage: bool,
    threshold: f64,
    auto_by_interval: bool,
    auto_interval: Duration,
    cooldown: Duration,
    settle_time: Duration,
    features: FeatureToggles,
    exceptions: Arc<ProcessExceptionList>,
}

#[derive(Debug, Default)]
struct UsageState {
    current: Option<UsageSample>,
    last_savings: f64,
}

struct Shared {
    optimizer: Arc<RamOptimizer>,
    usage: Arc<dyn UsageSource>,
    log: Arc<dyn LogSink>,
    settings: RwLock<Settings>,
    state: Mutex<UsageState>,
    history: Mutex<UsageHistory>,
    /// Held from sampling until the sample's events are delivered
    sampling: Mutex<()>,
    handlers: RwLock<Vec<Handler>>,
    monitoring: AtomicBool,
    clearing: AtomicBool,
    last_auto_optimize: Mutex<Option<Instant>>,
    monitor_task: Mutex<Option<JoinHandle<()>>>,
    interval_task: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Shared {
    fn drop(&mut self) {
        for slot in [&self.monitor_task, &self.interval_task] {
            if let Some(task) = lock(slot).take() {
                task.abort();
            }
        }
    }
}

/// Claims the clearing flag; releases it when dropped, whatever the exit path.
struct ClearingGuard<'a>(&'a AtomicBool);

impl<'a> ClearingGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for ClearingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct RamController {
    shared: Arc<Shared>,
}

impl RamController {
    pub fn new(
        config: ControllerConfig,
        native: Arc<dyn NativeMemory>,
        usage: Arc<dyn UsageSource>,
        log: Arc<dyn LogSink>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let settings = Settings {
            monitor_interval: config.monitor_interval(),
            auto_by_percentage: config.auto_optimize_by_percentage,
            threshold: config.auto_optimize_threshold,
            auto_by_interval: config.auto_optimize_by_interval,
            auto_interval: config.auto_optimize_interval(),
            cooldown: config.auto_optimize_cooldown(),
            settle_time: config.settle_time(),
            features: config.features,
            exceptions: Arc::new(config.process_exceptions.iter().collect()),
        };

        let shared = Shared {
            optimizer: Arc::new(RamOptimizer::new(native, log.clone())),
            usage,
            log,
            settings: RwLock::new(settings),
            state: Mutex::new(UsageState::default()),
            history: Mutex::new(UsageHistory::new(config.max_history)),
            sampling: Mutex::new(()),
            handlers: RwLock::new(Vec::new()),
            monitoring: AtomicBool::new(false),
            clearing: AtomicBool::new(false),
            last_auto_optimize: Mutex::new(None),
            monitor_task: Mutex::new(None),
            interval_task: Mutex::new(None),
        };
        shared.log.add(LogKind::Application, "RAM controller initialized");

        Ok(Self { shared: Arc::new(shared) })
    }

    /// Controller backed by the real OS
    pub fn with_system(config: ControllerConfig) -> Result<Self, ConfigError> {
        Self::new(
            config,
            Arc::new(SystemMemory::new()),
            Arc::new(SystemUsageSource::new()),
            Arc::new(TracingLogSink),
        )
    }

    /// Enable monitoring, plus the interval policy if the config asked for it.
    pub fn start(&self) {
        {
            let mut slot = lock(&self.shared.interval_task);
            let (by_interval, interval) = {
                let s = read(&self.shared.settings);
                (s.auto_by_interval, s.auto_interval)
            };
            if by_interval {
                self.replace_interval_timer(&mut slot, interval);
            }
        }
        self.enable_monitor();
    }

    /// Stop every timer. A pass already running finishes normally.
    pub fn shutdown(&self) {
        self.disable_monitor();
        if let Some(task) = lock(&self.shared.interval_task).take() {
            task.abort();
        }
    }

    // ------------------------------------------------------------------
    // Monitoring
    // ------------------------------------------------------------------

    // The monitoring flag only changes while `monitor_task` is locked, so a
    // timer exists exactly when monitoring is on.

    /// Start periodic sampling and take one sample right away.
    pub fn enable_monitor(&self) {
        {
            let mut slot = lock(&self.shared.monitor_task);
            if self.shared.monitoring.swap(true, Ordering::SeqCst) {
                return;
            }
            self.replace_monitor_timer(&mut slot);
        }
        self.shared.log.add(LogKind::Ram, "RAM monitoring enabled");
        self.tick();
    }

    /// Stop periodic sampling. Does not affect a pass already running.
    pub fn disable_monitor(&self) {
        let task = {
            let mut slot = lock(&self.shared.monitor_task);
            if !self.shared.monitoring.swap(false, Ordering::SeqCst) {
                return;
            }
            slot.take()
        };
        if let Some(task) = task {
            task.abort();
        }
        self.shared.log.add(LogKind::Ram, "RAM monitoring disabled");
    }

    pub fn is_monitoring(&self) -> bool {
        self.shared.monitoring.load(Ordering::SeqCst)
    }

    pub fn set_monitor_interval(&self, interval_ms: i64) -> Result<(), ConfigError> {
        let interval = validate_interval(interval_ms)?;
        write(&self.shared.settings).monitor_interval = interval;

        let mut slot = lock(&self.shared.monitor_task);
        if self.is_monitoring() {
            self.replace_monitor_timer(&mut slot);
        }
        Ok(())
    }

    pub fn monitor_interval(&self) -> Duration {
        read(&self.shared.settings).monitor_interval
    }

    /// Caller holds the `monitor_task` lock.
    fn replace_monitor_timer(&self, slot: &mut Option<JoinHandle<()>>) {
        let period = self.monitor_interval();
        let task = spawn_timer(period, Arc::downgrade(&self.shared), |controller| async move {
            if controller.is_monitoring() {
                controller.tick();
            }
        });
        if let Some(old) = slot.replace(task) {
            old.abort();
        }
    }

    /// One monitor tick: sample, then start a threshold pass if the policy
    /// says so. Skipped while a pass runs so its baseline stays clean.
    pub(crate) fn tick(&self) {
        if self.is_clearing() {
            debug!("Monitor tick skipped: optimization in progress");
            return;
        }
        let sample = self.update_usage();
        if self.should_auto_optimize(&sample) {
            self.spawn_pass(Trigger::Threshold);
        }
    }

    fn should_auto_optimize(&self, sample: &UsageSample) -> bool {
        let (enabled, threshold, cooldown) = {
            let s = read(&self.shared.settings);
            (s.auto_by_percentage, s.threshold, s.cooldown)
        };
        if !enabled || sample.used_percentage < threshold || self.is_clearing() {
            return false;
        }

        let now = Instant::now();
        let mut last = lock(&self.shared.last_auto_optimize);
        if let Some(previous) = *last {
            if now.duration_since(previous) < cooldown {
                debug!("Auto-optimize suppressed: cooldown active");
                return false;
            }
        }
        *last = Some(now);
        true
    }

    /// Sample usage, append it to the history and notify subscribers.
    ///
    /// Concurrent callers are serialized so the history, the current sample
    /// and the delivered events all follow sampling order.
    pub fn update_usage(&self) -> UsageSample {
        let _publishing = lock(&self.shared.sampling);
        let (sample, evicted) = {
            let mut history = lock(&self.shared.history);
            let sample = self.shared.usage.sample();
            let evicted = history.push(sample.clone());
            lock(&self.shared.state).current = Some(sample.clone());
            (sample, evicted)
        };

        if let Some(old) = evicted {
            self.emit(ControllerEvent::SampleRemoved(old));
        }
        self.emit(ControllerEvent::SampleAdded(sample.clone()));
        self.emit(ControllerEvent::UsageUpdated(sample.clone()));
        sample
    }

    // ------------------------------------------------------------------
    // Auto-optimize policies
    // ------------------------------------------------------------------

    /// Threshold must lie in [25, 100]
    pub fn set_auto_optimize_threshold(&self, percentage: f64) -> Result<(), ConfigError> {
        write(&self.shared.settings).threshold = validate_threshold(percentage)?;
        Ok(())
    }

    pub fn auto_optimize_threshold(&self) -> f64 {
        read(&self.shared.settings).threshold
    }

    pub fn set_auto_optimize_by_percentage(&self, enabled: bool) {
        write(&self.shared.settings).auto_by_percentage = enabled;
    }

    pub fn auto_optimize_by_percentage(&self) -> bool {
        read(&self.shared.settings).auto_by_percentage
    }

    /// Enable, reschedule or tear down the interval-triggered policy.
    pub fn set_auto_optimize_by_interval(
        &self,
        enabled: bool,
        interval_ms: i64,
    ) -> Result<(), ConfigError> {
        let mut slot = lock(&self.shared.interval_task);
        if !enabled {
            write(&self.shared.settings).auto_by_interval = false;
            if let Some(task) = slot.take() {
                task.abort();
            }
            return Ok(());
        }

        let interval = validate_interval(interval_ms)?;
        {
            let mut s = write(&self.shared.settings);
            s.auto_by_interval = true;
            s.auto_interval = interval;
        }
        self.replace_interval_timer(&mut slot, interval);
        Ok(())
    }

    pub fn auto_optimize_by_interval(&self) -> bool {
        read(&self.shared.settings).auto_by_interval
    }

    /// Caller holds the `interval_task` lock.
    fn replace_interval_timer(&self, slot: &mut Option<JoinHandle<()>>, period: Duration) {
        let task = spawn_timer(period, Arc::downgrade(&self.shared), |controller| async move {
            if controller.auto_optimize_by_interval() {
                controller.spawn_pass(Trigger::Interval);
            }
        });
        if let Some(old) = slot.replace(task) {
            old.abort();
        }
    }

    /// Passes run on their own task so stopping a timer never cancels one.
    fn spawn_pass(&self, trigger: Trigger) {
        let controller = self.clone();
        tokio::spawn(async move {
            controller.run_pass(PassKind::Full, trigger).await;
        });
    }

    // ------------------------------------------------------------------
    // Pass configuration
    // ------------------------------------------------------------------

    pub fn set_process_exception_list<I, S>(&self, paths: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let list: ProcessExceptionList = paths.into_iter().collect();
        write(&self.shared.settings).exceptions = Arc::new(list);
    }

    pub fn process_exception_list(&self) -> Arc<ProcessExceptionList> {
        read(&self.shared.settings).exceptions.clone()
    }

    pub fn set_features(&self, features: FeatureToggles) {
        write(&self.shared.settings).features = features;
    }

    pub fn features(&self) -> FeatureToggles {
        read(&self.shared.settings).features
    }

    pub fn set_settle_time(&self, settle_time: Duration) {
        write(&self.shared.settings).settle_time = settle_time;
    }

    // ------------------------------------------------------------------
    // Optimization
    // ------------------------------------------------------------------

    /// Run every step enabled in the feature toggles.
    ///
    /// Returns `None` without doing anything if a pass is already running.
    pub async fn clear_memory(&self) -> Option<OptimizationOutcome> {
        self.run_pass(PassKind::Full, Trigger::Manual).await
    }

    /// Trim working sets only.
    pub async fn clear_working_sets(&self) -> Option<OptimizationOutcome> {
        self.run_pass(PassKind::WorkingSets, Trigger::Manual).await
    }

    /// Flush the file cache, and the standby list if toggled on.
    pub async fn clear_file_system_caches(&self) -> Option<OptimizationOutcome> {
        self.run_pass(PassKind::FileSystemCaches, Trigger::Manual).await
    }

    pub fn is_clearing(&self) -> bool {
        self.shared.clearing.load(Ordering::Acquire)
    }

    async fn run_pass(&self, kind: PassKind, trigger: Trigger) -> Option<OptimizationOutcome> {
        let Some(guard) = ClearingGuard::acquire(&self.shared.clearing) else {
            debug!("{:?} pass ignored: optimization already in progress", kind);
            return None;
        };
        let started = Instant::now();

        let (plan, exceptions, settle_time) = {
            let s = read(&self.shared.settings);
            (PassPlan::new(kind, &s.features), s.exceptions.clone(), s.settle_time)
        };
        self.shared
            .log
            .add(LogKind::Ram, &format!("Optimization started ({:?}, {:?})", kind, trigger));

        let before = self.update_usage();

        let optimizer = self.shared.optimizer.clone();
        let steps = match tokio::task::spawn_blocking(move || optimizer.run(&plan, &exceptions)).await {
            Ok(steps) => steps,
            Err(e) => {
                self.shared
                    .log
                    .add(LogKind::Error, &format!("Optimization pass aborted: {}", e));
                PassSteps::default()
            }
        };

        // Give the OS time to release the trimmed pages before measuring
        if !settle_time.is_zero() {
            tokio::time::sleep(settle_time).await;
        }

        let after = self.update_usage();
        let mut outcome =
            OptimizationOutcome::new(before.total_used_bytes, after.total_used_bytes, kind, trigger);
        outcome.steps = steps;
        outcome.duration_ms = started.elapsed().as_millis() as u64;

        lock(&self.shared.state).last_savings = outcome.savings;
        drop(guard);

        info!(
            "Optimization complete: saved {:.1} MB in {}ms",
            outcome.savings_mb(),
            outcome.duration_ms
        );
        self.shared.log.add(
            LogKind::Ram,
            &format!("RAM optimized: {:.1} MB saved", outcome.savings_mb()),
        );
        self.emit(ControllerEvent::OptimizationCompleted(outcome.clone()));
        Some(outcome)
    }

    // ------------------------------------------------------------------
    // Read-only state
    // ------------------------------------------------------------------

    pub fn latest_sample(&self) -> Option<UsageSample> {
        lock(&self.shared.state).current.clone()
    }

    /// Used bytes at the last sample
    pub fn current_usage(&self) -> f64 {
        self.latest_sample().map_or(0.0, |s| s.total_used_bytes)
    }

    pub fn usage_percentage(&self) -> f64 {
        self.latest_sample().map_or(0.0, |s| s.used_percentage)
    }

    /// Total physical bytes at the last sample
    pub fn total_memory(&self) -> f64 {
        self.latest_sample().map_or(0.0, |s| s.total_bytes)
    }

    /// Savings of the last completed pass; negative if usage grew
    pub fn last_savings(&self) -> f64 {
        lock(&self.shared.state).last_savings
    }

    // ------------------------------------------------------------------
    // History
    // ------------------------------------------------------------------

    /// Oldest first
    pub fn history(&self) -> Vec<UsageSample> {
        lock(&self.shared.history).snapshot()
    }

    pub fn history_stats(&self) -> MonitorStats {
        lock(&self.shared.history).stats()
    }

    pub fn remove_sample(&self, index: usize) -> Option<UsageSample> {
        let removed = lock(&self.shared.history).remove(index)?;
        self.emit(ControllerEvent::SampleRemoved(removed.clone()));
        Some(removed)
    }

    pub fn clear_history(&self) {
        lock(&self.shared.history).clear();
        self.emit(ControllerEvent::HistoryCleared);
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    /// Register a handler. Handlers run on whichever task produced the event
    /// and must not call `subscribe`, `update_usage` or `enable_monitor`
    /// themselves.
    pub fn subscribe<F>(&self, handler: F)
    where
        F: Fn(&ControllerEvent) + Send + Sync + 'static,
    {
        write(&self.shared.handlers).push(Box::new(handler));
    }

    fn emit(&self, event: ControllerEvent) {
        for handler in read(&self.shared.handlers).iter() {
            handler(&event);
        }
    }
}

/// Repeating task calling `on_tick` every `period`, first call one period
/// from now. Exits once the controller is gone.
fn spawn_timer<F, Fut>(period: Duration, shared: Weak<Shared>, on_tick: F) -> JoinHandle<()>
where
    F: Fn(RamController) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let Some(shared) = shared.upgrade() else {
                break;
            };
            on_tick(RamController { shared }).await;
        }
    })
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}
