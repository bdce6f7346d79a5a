//! Configuration for the RAM controller

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::error::ConfigError;

/// Lowest auto-optimize threshold accepted. Anything lower keeps the
/// optimizer firing on a normally loaded machine.
pub const MIN_AUTO_OPTIMIZE_THRESHOLD: f64 = 25.0;

/// Highest auto-optimize threshold accepted.
pub const MAX_AUTO_OPTIMIZE_THRESHOLD: f64 = 100.0;

/// Which steps an optimization pass performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureToggles {
    /// Trim working sets of running processes
    pub empty_working_sets: bool,

    /// Flush the system file cache (SeIncreaseQuotaPrivilege)
    pub clear_file_system_cache: bool,

    /// Purge the standby page list (SeProfileSingleProcessPrivilege)
    pub clear_standby_cache: bool,

    /// Empty the system clipboard
    pub clear_clipboard: bool,

    /// Trim our own working set after the cache purge
    pub invoke_gc: bool,
}

impl Default for FeatureToggles {
    fn default() -> Self {
        Self {
            empty_working_sets: true,
            clear_file_system_cache: true,
            clear_standby_cache: true,
            clear_clipboard: false,
            invoke_gc: false,
        }
    }
}

/// Main controller configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Usage sampling period (milliseconds)
    pub monitor_interval_ms: i64,

    /// Optimize automatically when usage crosses the threshold
    pub auto_optimize_by_percentage: bool,

    /// Usage percentage that triggers auto-optimize (25-100)
    pub auto_optimize_threshold: f64,

    /// Optimize on a fixed schedule
    pub auto_optimize_by_interval: bool,

    /// Schedule for interval-triggered optimization (milliseconds)
    pub auto_optimize_interval_ms: i64,

    /// Minimum time between two threshold-triggered passes
    pub auto_optimize_cooldown_secs: u64,

    /// Pause between the native calls and the post-pass sample
    pub settle_time_ms: u64,

    /// Samples kept in the usage history
    pub max_history: usize,

    /// Executables never trimmed (full paths, case-insensitive)
    pub process_exceptions: Vec<String>,

    /// Steps performed by ClearMemory
    pub features: FeatureToggles,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            monitor_interval_ms: 5_000,
            auto_optimize_by_percentage: false,
            auto_optimize_threshold: 80.0,
            auto_optimize_by_interval: false,
            auto_optimize_interval_ms: 3_600_000,
            auto_optimize_cooldown_secs: 10,
            settle_time_ms: 5_000,
            max_history: 3600,
            process_exceptions: Vec::new(),
            features: FeatureToggles::default(),
        }
    }
}

impl ControllerConfig {
    /// Load config from TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load config from TOML file, falling back to defaults when it does not exist
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save config to TOML file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Default config location (`<config dir>/ramreclaim/config.toml`)
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ramreclaim")
            .join("config.toml")
    }

    /// Check every invariant the controller relies on
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_interval(self.monitor_interval_ms)?;
        validate_interval(self.auto_optimize_interval_ms)?;
        validate_threshold(self.auto_optimize_threshold)?;
        if self.max_history == 0 {
            return Err(ConfigError::InvalidHistoryLimit(self.max_history));
        }
        Ok(())
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms.max(0) as u64)
    }

    pub fn auto_optimize_interval(&self) -> Duration {
        Duration::from_millis(self.auto_optimize_interval_ms.max(0) as u64)
    }

    pub fn settle_time(&self) -> Duration {
        Duration::from_millis(self.settle_time_ms)
    }

    pub fn auto_optimize_cooldown(&self) -> Duration {
        Duration::from_secs(self.auto_optimize_cooldown_secs)
    }
}

/// Timer intervals must be strictly positive
pub fn validate_interval(ms: i64) -> Result<Duration, ConfigError> {
    if ms <= 0 {
        return Err(ConfigError::InvalidInterval(ms));
    }
    Ok(Duration::from_millis(ms as u64))
}

pub fn validate_threshold(pct: f64) -> Result<f64, ConfigError> {
    if !(MIN_AUTO_OPTIMIZE_THRESHOLD..=MAX_AUTO_OPTIMIZE_THRESHOLD).contains(&pct) {
        return Err(ConfigError::ThresholdOutOfRange(pct));
    }
    Ok(pct)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ControllerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.monitor_interval(), Duration::from_secs(5));
        assert_eq!(config.auto_optimize_cooldown(), Duration::from_secs(10));
    }

    #[test]
    fn test_threshold_bounds() {
        for pct in [0.0, 10.0, 24.0, 24.99, -5.0] {
            assert!(matches!(
                validate_threshold(pct),
                Err(ConfigError::ThresholdOutOfRange(_))
            ));
        }
        for pct in [25.0, 50.0, 99.5, 100.0] {
            assert_eq!(validate_threshold(pct).unwrap(), pct);
        }
        assert!(validate_threshold(100.5).is_err());
        assert!(validate_threshold(f64::NAN).is_err());
    }

    #[test]
    fn test_interval_must_be_positive() {
        for ms in [0, -1, -1000] {
            assert_eq!(validate_interval(ms), Err(ConfigError::InvalidInterval(ms)));
        }
        assert_eq!(validate_interval(1).unwrap(), Duration::from_millis(1));
    }

    #[test]
    fn test_validate_rejects_bad_fields() {
        let config = ControllerConfig { monitor_interval_ms: 0, ..Default::default() };
        assert!(config.validate().is_err());

        let config = ControllerConfig { auto_optimize_threshold: 20.0, ..Default::default() };
        assert!(config.validate().is_err());

        let config = ControllerConfig { max_history: 0, ..Default::default() };
        assert_eq!(config.validate(), Err(ConfigError::InvalidHistoryLimit(0)));
    }

    #[test]
    fn test_save_and_load() {
        let dir = std::env::temp_dir().join(format!("ramreclaim-config-{}", std::process::id()));
        let path = dir.join("config.toml");

        let config = ControllerConfig {
            auto_optimize_by_percentage: true,
            auto_optimize_threshold: 42.0,
            process_exceptions: vec![r"C:\Tools\Keep.exe".into()],
            features: FeatureToggles { clear_clipboard: true, ..Default::default() },
            ..Default::default()
        };
        config.save(&path).unwrap();

        let loaded = ControllerConfig::load(&path).unwrap();
        assert!(loaded.auto_optimize_by_percentage);
        assert_eq!(loaded.auto_optimize_threshold, 42.0);
        assert_eq!(loaded.process_exceptions, vec![r"C:\Tools\Keep.exe".to_string()]);
        assert!(loaded.features.clear_clipboard);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: ControllerConfig = toml::from_str("auto_optimize_threshold = 60.0").unwrap();
        assert_eq!(config.auto_optimize_threshold, 60.0);
        assert_eq!(config.monitor_interval_ms, 5_000);
        assert!(config.features.empty_working_sets);
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let dir = std::env::temp_dir().join(format!("ramreclaim-bad-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "auto_optimize_threshold = 5.0").unwrap();

        assert!(matches!(
            ControllerConfig::load(&path),
            Err(ConfigError::ThresholdOutOfRange(_))
        ));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
