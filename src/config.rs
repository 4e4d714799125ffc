use crate::error::{VoxError, VoxResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Barge-in handling options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterruptionConfig {
    /// Completion ratio below which the cut-off response is kept in context
    pub threshold: f64,
    /// Pause after an interruption before the pipeline resumes
    pub ack_delay_seconds: f64,
}

impl Default for InterruptionConfig {
    fn default() -> Self {
        Self {
            threshold: 0.2,
            ack_delay_seconds: 0.05,
        }
    }
}

/// Latency metrics options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Seconds between periodic `metrics_update` events
    pub emit_interval_seconds: f64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            emit_interval_seconds: 10.0,
        }
    }
}

/// Event bus options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBusConfig {
    /// Ring buffer capacity for event history
    pub buffer_size: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self { buffer_size: 1000 }
    }
}

/// Conversation memory module options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Maximum turns kept in short-term memory
    pub max_history: usize,
    /// Persist memory to disk on shutdown
    pub save_to_disk: bool,
    /// Memory file location (empty string means the default data dir)
    pub memory_file: String,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_history: 100,
            save_to_disk: false,
            memory_file: default_memory_path().to_string_lossy().to_string(),
        }
    }
}

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub interruption: InterruptionConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,

    #[serde(default)]
    pub event_bus: EventBusConfig,

    #[serde(default)]
    pub memory: MemoryConfig,
}

impl Config {
    /// Load config from file, or create default
    pub fn load() -> VoxResult<Self> {
        let config_path = config_path();

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            match serde_json::from_str::<Config>(&content) {
                Ok(config) => {
                    config.validate()?;
                    Ok(config)
                }
                Err(e) => {
                    // Graceful degradation: log warning and use defaults
                    tracing::warn!("⚠️ Config file corrupted or invalid, using defaults: {}", e);
                    // Backup corrupt file for debugging
                    let backup_path = config_path.with_extension("json.corrupt");
                    let _ = std::fs::rename(&config_path, &backup_path);
                    Ok(Self::default())
                }
            }
        } else {
            Ok(Self::default())
        }
    }

    /// Save config to file
    pub fn save(&self) -> VoxResult<()> {
        let config_path = config_path();

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    /// Reject out-of-range values before anything is wired up
    pub fn validate(&self) -> VoxResult<()> {
        let t = self.interruption.threshold;
        if !(0.0..=1.0).contains(&t) || !t.is_finite() {
            return Err(VoxError::Config(format!(
                "interruption.threshold must be within [0.0, 1.0], got {}",
                t
            )));
        }
        if self.interruption.ack_delay_seconds < 0.0
            || !self.interruption.ack_delay_seconds.is_finite()
        {
            return Err(VoxError::Config(format!(
                "interruption.ack_delay_seconds must be non-negative, got {}",
                self.interruption.ack_delay_seconds
            )));
        }
        if self.metrics.emit_interval_seconds <= 0.0
            || !self.metrics.emit_interval_seconds.is_finite()
        {
            return Err(VoxError::Config(format!(
                "metrics.emit_interval_seconds must be positive, got {}",
                self.metrics.emit_interval_seconds
            )));
        }
        if self.event_bus.buffer_size == 0 {
            return Err(VoxError::Config(
                "event_bus.buffer_size must be at least 1".to_string(),
            ));
        }
        if self.memory.max_history == 0 {
            return Err(VoxError::Config(
                "memory.max_history must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

pub fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("voxweave")
        .join("config.json")
}

pub fn default_memory_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("voxweave")
        .join("memory.json")
}
