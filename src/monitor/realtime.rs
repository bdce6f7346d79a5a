//! Usage samples and history

use chrono::{DateTime, Local};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Mutex;
use sysinfo::System;

/// Physical memory usage at one point in time. Never mutated once taken.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageSample {
    pub total_used_bytes: f64,
    pub total_bytes: f64,
    pub used_percentage: f64,
    pub recorded_at: DateTime<Local>,
}

impl UsageSample {
    pub fn new(total_used_bytes: f64, total_bytes: f64) -> Self {
        Self::at(total_used_bytes, total_bytes, Local::now())
    }

    pub fn at(total_used_bytes: f64, total_bytes: f64, recorded_at: DateTime<Local>) -> Self {
        let used_percentage = if total_bytes > 0.0 {
            total_used_bytes / total_bytes * 100.0
        } else {
            0.0
        };
        Self { total_used_bytes, total_bytes, used_percentage, recorded_at }
    }

    pub fn used_mb(&self) -> f64 {
        self.total_used_bytes / 1024.0 / 1024.0
    }

    pub fn total_mb(&self) -> f64 {
        self.total_bytes / 1024.0 / 1024.0
    }
}

/// Source of usage samples
pub trait UsageSource: Send + Sync {
    fn sample(&self) -> UsageSample;
}

/// Reads physical memory figures through sysinfo
pub struct SystemUsageSource {
    system: Mutex<System>,
}

impl SystemUsageSource {
    pub fn new() -> Self {
        Self { system: Mutex::new(System::new()) }
    }
}

impl Default for SystemUsageSource {
    fn default() -> Self {
        Self::new()
    }
}

impl UsageSource for SystemUsageSource {
    fn sample(&self) -> UsageSample {
        let mut sys = self.system.lock().unwrap_or_else(|e| e.into_inner());
        sys.refresh_memory();
        let total = sys.total_memory() as f64;
        let available = sys.available_memory() as f64;
        UsageSample::new((total - available).max(0.0), total)
    }
}

/// Bounded, time-ordered sample history.
#[derive(Debug, Clone)]
pub struct UsageHistory {
    samples: VecDeque<UsageSample>,
    max_history: usize,
}

impl UsageHistory {
    pub fn new(max_history: usize) -> Self {
        Self { samples: VecDeque::new(), max_history: max_history.max(1) }
    }

    /// Append a sample, returning the one evicted to stay within bounds
    pub fn push(&mut self, sample: UsageSample) -> Option<UsageSample> {
        let evicted = if self.samples.len() >= self.max_history {
            self.samples.pop_front()
        } else {
            None
        };
        self.samples.push_back(sample);
        evicted
    }

    pub fn remove(&mut self, index: usize) -> Option<UsageSample> {
        self.samples.remove(index)
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn latest(&self) -> Option<&UsageSample> {
        self.samples.back()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Oldest first
    pub fn snapshot(&self) -> Vec<UsageSample> {
        self.samples.iter().cloned().collect()
    }

    pub fn stats(&self) -> MonitorStats {
        if self.samples.is_empty() {
            return MonitorStats::default();
        }

        let loads: Vec<f64> = self.samples.iter().map(|s| s.used_percentage).collect();
        let avg_load = loads.iter().sum::<f64>() / loads.len() as f64;
        let max_load = loads.iter().cloned().fold(f64::MIN, f64::max);
        let min_load = loads.iter().cloned().fold(f64::MAX, f64::min);

        MonitorStats {
            sample_count: loads.len(),
            avg_memory_load: avg_load,
            max_memory_load: max_load,
            min_memory_load: min_load,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MonitorStats {
    pub sample_count: usize,
    pub avg_memory_load: f64,
    pub max_memory_load: f64,
    pub min_memory_load: f64,
}
