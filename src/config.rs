//! Pipeline configuration.
//!
//! Every field has a default, so a partial (or missing) `framepipe.json`
//! yields a usable configuration. Values are fixed for a pipeline instance
//! once started; FPS, loop and algorithm can still change at runtime through
//! commands.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::core::ring_buffer::{DEFAULT_CAPACITY, MAX_CAPACITY};
use crate::entities::effects::ProcessingConfig;
use crate::error::PipelineError;
use crate::paths::{PathConfig, config_file};

pub const CONFIG_FILE_NAME: &str = "framepipe.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Ring buffer capacity in frames
    pub capacity: usize,
    /// Default playback rate
    pub fps: f32,
    pub loop_enabled: bool,
    /// Default algorithm and mask
    pub processing: ProcessingConfig,
    /// Processed frames waiting for the consumer before the oldest is dropped
    pub delivery_capacity: usize,
    /// Consecutive camera timeouts before a stall notice
    pub stall_notice_after: u32,
    /// Upper bound on one camera read
    pub camera_timeout_ms: u64,
    /// Also queue events for `poll_events()`
    pub deferred_events: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            fps: 30.0,
            loop_enabled: false,
            processing: ProcessingConfig::identity(),
            delivery_capacity: 4,
            stall_notice_after: 3,
            camera_timeout_ms: 500,
            deferred_events: false,
        }
    }
}

impl PipelineConfig {
    pub fn camera_timeout(&self) -> Duration {
        Duration::from_millis(self.camera_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.capacity == 0 {
            return Err(PipelineError::InvalidArgument("capacity must be at least 1".into()));
        }
        if self.capacity > MAX_CAPACITY {
            return Err(PipelineError::InvalidArgument(format!(
                "capacity must be at most {}, got {}",
                MAX_CAPACITY, self.capacity
            )));
        }
        if self.delivery_capacity == 0 {
            return Err(PipelineError::InvalidArgument("delivery_capacity must be at least 1".into()));
        }
        if !(self.fps.is_finite() && self.fps > 0.0) {
            return Err(PipelineError::InvalidArgument(format!("FPS must be positive, got {}", self.fps)));
        }
        if self.camera_timeout_ms == 0 {
            return Err(PipelineError::InvalidArgument("camera_timeout_ms must be at least 1".into()));
        }
        self.processing.validate()
    }

    /// Load from a JSON file. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        let config: Self = serde_json::from_str(&json)
            .with_context(|| format!("Malformed config: {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid config: {}", path.display()))?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Load `framepipe.json` from the resolved config directory.
    pub fn load_default(paths: &PathConfig) -> Result<Self> {
        Self::load(&config_file(CONFIG_FILE_NAME, paths))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).with_context(|| format!("Failed to write config: {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::effects::AlgorithmId;

    #[test]
    fn test_defaults() {
        let c = PipelineConfig::default();
        assert_eq!(c.capacity, 100);
        assert_eq!(c.fps, 30.0);
        assert!(!c.loop_enabled);
        assert_eq!(c.processing.algorithm, AlgorithmId::Identity);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let c: PipelineConfig = serde_json::from_str(r#"{"capacity": 8, "loop_enabled": true}"#).unwrap();
        assert_eq!(c.capacity, 8);
        assert!(c.loop_enabled);
        assert_eq!(c.fps, 30.0);
        assert_eq!(c.delivery_capacity, 4);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut c = PipelineConfig { capacity: 0, ..Default::default() };
        assert!(c.validate().is_err());
        c.capacity = MAX_CAPACITY + 1;
        assert!(c.validate().is_err());
        c.capacity = 10;
        c.fps = 0.0;
        assert!(c.validate().is_err());
        c.fps = f32::INFINITY;
        assert!(c.validate().is_err());
        c.fps = 30.0;
        c.delivery_capacity = 0;
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_load_missing_and_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        assert_eq!(PipelineConfig::load(&path).unwrap(), PipelineConfig::default());

        std::fs::write(&path, "{ not json").unwrap();
        assert!(PipelineConfig::load(&path).is_err());

        std::fs::write(&path, r#"{"capacity": 0}"#).unwrap();
        assert!(PipelineConfig::load(&path).is_err());
    }

    #[test]
    fn test_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        let c = PipelineConfig { capacity: 42, fps: 12.0, ..Default::default() };
        c.save(&path).unwrap();
        assert_eq!(PipelineConfig::load(&path).unwrap(), c);

        let paths = PathConfig { config_dir: Some(dir.path().to_path_buf()) };
        assert_eq!(PipelineConfig::load_default(&paths).unwrap().capacity, 42);
    }
}
