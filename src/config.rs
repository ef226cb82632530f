use std::path::PathBuf;
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;

use crate::error::ConfigError;

pub const DEFAULT_SETTINGS_FILE: &str = "skill-pipeline";
pub const ENV_PREFIX: &str = "SKILL_PIPELINE";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub log_level: String,
    pub run_seconds: u64,
    pub pipeline: PipelineSettings,
    pub source: SourceSettings,
    pub engine: EngineSettings,
    pub display: DisplaySettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub display_queue_capacity: usize,
    pub smoothing_factor: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKindSetting {
    Camera,
    File,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourceSettings {
    pub kind: SourceKindSetting,
    pub path: Option<PathBuf>,
    pub camera_id: String,
    pub frame_interval_ms: u64,
    pub looping: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Execution device name; the engine default is used when unset.
    pub device: Option<String>,
    pub bind_latency_ms: u64,
    pub eval_latency_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DisplaySettings {
    pub width: f32,
    pub height: f32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            run_seconds: 10,
            pipeline: PipelineSettings::default(),
            source: SourceSettings::default(),
            engine: EngineSettings::default(),
            display: DisplaySettings::default(),
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            display_queue_capacity: 64,
            smoothing_factor: 0.5,
        }
    }
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            kind: SourceKindSetting::Camera,
            path: None,
            camera_id: "test-pattern".to_string(),
            frame_interval_ms: 33,
            looping: false,
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            device: None,
            bind_latency_ms: 2,
            eval_latency_ms: 40,
        }
    }
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            width: 1280.0,
            height: 720.0,
        }
    }
}

impl SourceSettings {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }
}

impl Settings {
    /// Load settings from the optional `skill-pipeline.toml` file and
    /// `SKILL_PIPELINE__*` environment variables, on top of the defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(DEFAULT_SETTINGS_FILE).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        let settings: Settings = config.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::from_str(contents, FileFormat::Toml))
            .build()?;
        let settings: Settings = config.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pipeline.display_queue_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "pipeline.display_queue_capacity",
                reason: "must be greater than 0".to_string(),
            });
        }

        if !(0.0..=1.0).contains(&self.pipeline.smoothing_factor) {
            return Err(ConfigError::Invalid {
                field: "pipeline.smoothing_factor",
                reason: "must be between 0.0 and 1.0".to_string(),
            });
        }

        if self.source.kind == SourceKindSetting::File && self.source.path.is_none() {
            return Err(ConfigError::Invalid {
                field: "source.path",
                reason: "a file source needs a path".to_string(),
            });
        }

        if self.display.width <= 0.0 || self.display.height <= 0.0 {
            return Err(ConfigError::Invalid {
                field: "display",
                reason: "surface dimensions must be positive".to_string(),
            });
        }

        Ok(())
    }
}
