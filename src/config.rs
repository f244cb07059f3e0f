use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use tracing::warn;

#[derive(Debug, Clone, Deserialize)]
pub struct WatchdogConfig {
    #[serde(default = "WatchdogConfig::default_timeout_secs")]
    pub timeout_secs: f64,
    #[serde(default = "WatchdogConfig::default_poll_secs")]
    pub poll_secs: f64,
}

impl WatchdogConfig {
    const fn default_timeout_secs() -> f64 {
        10.0
    }

    const fn default_poll_secs() -> f64 {
        1.0
    }
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self { timeout_secs: Self::default_timeout_secs(), poll_secs: Self::default_poll_secs() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StopConfig {
    #[serde(default = "StopConfig::default_grace_window_ms")]
    pub grace_window_ms: u64,
    #[serde(default = "StopConfig::default_poll_step_ms")]
    pub poll_step_ms: u64,
    #[serde(default = "StopConfig::default_detach_join_ms")]
    pub detach_join_ms: u64,
}

impl StopConfig {
    const fn default_grace_window_ms() -> u64 {
        250
    }

    const fn default_poll_step_ms() -> u64 {
        10
    }

    const fn default_detach_join_ms() -> u64 {
        500
    }
}

impl Default for StopConfig {
    fn default() -> Self {
        Self {
            grace_window_ms: Self::default_grace_window_ms(),
            poll_step_ms: Self::default_poll_step_ms(),
            detach_join_ms: Self::default_detach_join_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OwnerLoopConfig {
    #[serde(default = "OwnerLoopConfig::default_frame_sleep_ms")]
    pub frame_sleep_ms: u64,
    /// Commands executed per frame; 0 drains the whole queue each frame.
    #[serde(default)]
    pub drain_budget: usize,
}

impl OwnerLoopConfig {
    const fn default_frame_sleep_ms() -> u64 {
        16
    }
}

impl Default for OwnerLoopConfig {
    fn default() -> Self {
        Self { frame_sleep_ms: Self::default_frame_sleep_ms(), drain_budget: 0 }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub watchdog: WatchdogConfig,
    #[serde(default)]
    pub stop: StopConfig,
    #[serde(default)]
    pub owner_loop: OwnerLoopConfig,
}

impl RuntimeConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes =
            fs::read(path).with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(err) => {
                warn!("config load error: {err:?}; falling back to defaults");
                Self::default()
            }
        }
    }

    pub fn apply_overrides(&mut self, overrides: &RuntimeConfigOverrides) {
        if let Some(timeout_secs) = overrides.timeout_secs {
            self.watchdog.timeout_secs = timeout_secs;
        }
        if let Some(grace_window_ms) = overrides.grace_window_ms {
            self.stop.grace_window_ms = grace_window_ms;
        }
    }

    pub fn watchdog_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.watchdog.timeout_secs.max(0.0))
    }

    pub fn watchdog_poll(&self) -> Duration {
        Duration::from_secs_f64(self.watchdog.poll_secs.max(0.001))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuntimeConfigOverrides {
    pub timeout_secs: Option<f64>,
    pub grace_window_ms: Option<u64>,
}

impl RuntimeConfigOverrides {
    pub fn is_empty(&self) -> bool {
        self.timeout_secs.is_none() && self.grace_window_ms.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn defaults_are_sane() {
        let config = RuntimeConfig::default();
        assert_eq!(config.watchdog.timeout_secs, 10.0);
        assert_eq!(config.stop.grace_window_ms, 250);
        assert_eq!(config.stop.detach_join_ms, 500);
        assert_eq!(config.owner_loop.frame_sleep_ms, 16);
        assert_eq!(config.owner_loop.drain_budget, 0);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let mut file = NamedTempFile::new().expect("temp config");
        write!(file, r#"{{ "watchdog": {{ "timeout_secs": 2.5 }} }}"#).expect("write config");
        let config = RuntimeConfig::load(file.path()).expect("config should parse");
        assert_eq!(config.watchdog.timeout_secs, 2.5);
        assert_eq!(config.watchdog.poll_secs, 1.0, "unset fields keep defaults");
        assert_eq!(config.stop.grace_window_ms, 250);
    }

    #[test]
    fn overrides_take_precedence() {
        let mut config = RuntimeConfig::default();
        let overrides = RuntimeConfigOverrides { timeout_secs: Some(1.5), grace_window_ms: Some(40) };
        config.apply_overrides(&overrides);
        assert_eq!(config.watchdog.timeout_secs, 1.5);
        assert_eq!(config.stop.grace_window_ms, 40);
    }

    #[test]
    fn malformed_file_errors() {
        let mut file = NamedTempFile::new().expect("temp config");
        write!(file, "not json").expect("write config");
        assert!(RuntimeConfig::load(file.path()).is_err());
    }
}
