use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct StoryCaptureConfig {
    pub identifier: IdentifierConfig,
    pub recorder: RecorderConfig,
    pub upload: UploadConfig,
    pub chunked: ChunkedConfig,
    pub diagnostics: DiagnosticsConfig,
    pub storage: StorageConfig,
    pub system: SystemConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct IdentifierConfig {
    /// Oldest accepted link age in days
    #[serde(default = "default_max_age_days")]
    pub max_age_days: u32,

    /// Tolerated clock skew for links issued in the future, in seconds
    #[serde(default = "default_max_future_skew_seconds")]
    pub max_future_skew_seconds: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct RecorderConfig {
    /// Hard stop after this many recorded seconds
    #[serde(default = "default_max_duration_seconds")]
    pub max_duration_seconds: u32,

    /// One-shot warning fires at this many recorded seconds
    #[serde(default = "default_warning_seconds")]
    pub warning_seconds: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct UploadConfig {
    /// Total transfer attempts per upload call
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Backoff base; the wait doubles after each failed attempt
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Upper bound for a single backoff wait
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Fraction of the delay randomized in either direction (0.0 - 1.0)
    #[serde(default = "default_jitter")]
    pub jitter: f64,

    /// What to do when the completion transaction fails
    #[serde(default)]
    pub completion_policy: CompletionPolicy,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CompletionPolicy {
    /// Delete the stored object and report failure
    #[default]
    AtomicCleanup,
    /// Retry the transaction once, then keep the object and log a soft failure
    RetryThenLog,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ChunkedConfig {
    /// Upload partial data while recording
    #[serde(default = "default_chunked_enabled")]
    pub enabled: bool,

    /// Seconds of recording between partial uploads
    #[serde(default = "default_chunk_interval_seconds")]
    pub interval_seconds: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct DiagnosticsConfig {
    /// Number of events retained
    #[serde(default = "default_diagnostics_capacity")]
    pub capacity: usize,

    /// Where the ring buffer is persisted
    #[serde(default = "default_diagnostics_path")]
    pub path: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct StorageConfig {
    /// Root directory for stored recording objects
    #[serde(default = "default_objects_path")]
    pub objects_path: String,

    /// Directory holding one JSON file per session record
    #[serde(default = "default_records_path")]
    pub records_path: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SystemConfig {
    /// Event bus capacity
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,
}

impl StoryCaptureConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("storycapture.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default("identifier.max_age_days", default_max_age_days())?
            .set_default(
                "identifier.max_future_skew_seconds",
                default_max_future_skew_seconds(),
            )?
            .set_default(
                "recorder.max_duration_seconds",
                default_max_duration_seconds(),
            )?
            .set_default("recorder.warning_seconds", default_warning_seconds())?
            .set_default("upload.max_retries", default_max_retries())?
            .set_default("upload.base_delay_ms", default_base_delay_ms() as i64)?
            .set_default("upload.max_delay_ms", default_max_delay_ms() as i64)?
            .set_default("upload.jitter", default_jitter())?
            .set_default("upload.completion_policy", "atomic_cleanup")?
            .set_default("chunked.enabled", default_chunked_enabled())?
            .set_default("chunked.interval_seconds", default_chunk_interval_seconds())?
            .set_default(
                "diagnostics.capacity",
                default_diagnostics_capacity() as i64,
            )?
            .set_default("diagnostics.path", default_diagnostics_path())?
            .set_default("storage.objects_path", default_objects_path())?
            .set_default("storage.records_path", default_records_path())?
            .set_default(
                "system.event_bus_capacity",
                default_event_bus_capacity() as i64,
            )?
            // Add configuration file (optional)
            .add_source(File::with_name(&path_str).required(false))
            // Add environment variables with STORYCAPTURE_ prefix
            .add_source(
                Environment::with_prefix("STORYCAPTURE")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let config: StoryCaptureConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.identifier.max_age_days == 0 {
            return Err(ConfigError::Message(
                "Identifier max_age_days must be greater than 0".to_string(),
            ));
        }

        if self.recorder.max_duration_seconds == 0 {
            return Err(ConfigError::Message(
                "Recorder max_duration_seconds must be greater than 0".to_string(),
            ));
        }

        if self.recorder.warning_seconds >= self.recorder.max_duration_seconds {
            return Err(ConfigError::Message(
                "Recorder warning_seconds must be below max_duration_seconds".to_string(),
            ));
        }

        if self.upload.max_retries == 0 {
            return Err(ConfigError::Message(
                "Upload max_retries must be greater than 0".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.upload.jitter) {
            return Err(ConfigError::Message(
                "Upload jitter must be between 0.0 and 1.0".to_string(),
            ));
        }

        if self.upload.max_delay_ms < self.upload.base_delay_ms {
            return Err(ConfigError::Message(
                "Upload max_delay_ms must not be below base_delay_ms".to_string(),
            ));
        }

        if self.chunked.enabled && self.chunked.interval_seconds == 0 {
            return Err(ConfigError::Message(
                "Chunked interval_seconds must be greater than 0".to_string(),
            ));
        }

        if self.diagnostics.capacity == 0 {
            return Err(ConfigError::Message(
                "Diagnostics capacity must be greater than 0".to_string(),
            ));
        }

        if self.system.event_bus_capacity == 0 {
            return Err(ConfigError::Message(
                "Event bus capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl IdentifierConfig {
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_days as u64 * 24 * 3600)
    }

    pub fn max_future_skew(&self) -> Duration {
        Duration::from_secs(self.max_future_skew_seconds as u64)
    }
}

impl UploadConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

impl Default for StoryCaptureConfig {
    fn default() -> Self {
        Self {
            identifier: IdentifierConfig::default(),
            recorder: RecorderConfig::default(),
            upload: UploadConfig::default(),
            chunked: ChunkedConfig {
                enabled: default_chunked_enabled(),
                interval_seconds: default_chunk_interval_seconds(),
            },
            diagnostics: DiagnosticsConfig {
                capacity: default_diagnostics_capacity(),
                path: default_diagnostics_path(),
            },
            storage: StorageConfig {
                objects_path: default_objects_path(),
                records_path: default_records_path(),
            },
            system: SystemConfig {
                event_bus_capacity: default_event_bus_capacity(),
            },
        }
    }
}

impl Default for IdentifierConfig {
    fn default() -> Self {
        Self {
            max_age_days: default_max_age_days(),
            max_future_skew_seconds: default_max_future_skew_seconds(),
        }
    }
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            max_duration_seconds: default_max_duration_seconds(),
            warning_seconds: default_warning_seconds(),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: default_jitter(),
            completion_policy: CompletionPolicy::default(),
        }
    }
}

// Default value functions
fn default_max_age_days() -> u32 {
    365
}
fn default_max_future_skew_seconds() -> u32 {
    3600
}

fn default_max_duration_seconds() -> u32 {
    900
} // 15 minutes
fn default_warning_seconds() -> u32 {
    840
}

fn default_max_retries() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    1000
}
fn default_max_delay_ms() -> u64 {
    30_000
}
fn default_jitter() -> f64 {
    0.25
}

fn default_chunked_enabled() -> bool {
    false
}
fn default_chunk_interval_seconds() -> u32 {
    30
}

fn default_diagnostics_capacity() -> usize {
    50
}
fn default_diagnostics_path() -> String {
    "./diagnostics.json".to_string()
}

fn default_objects_path() -> String {
    "./storage".to_string()
}
fn default_records_path() -> String {
    "./records".to_string()
}

fn default_event_bus_capacity() -> usize {
    100
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = StoryCaptureConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.upload.max_retries, 3);
        assert_eq!(config.recorder.max_duration_seconds, 900);
        assert_eq!(config.diagnostics.capacity, 50);
        assert_eq!(config.upload.completion_policy, CompletionPolicy::AtomicCleanup);
    }

    #[test]
    fn test_config_validation() {
        let mut config = StoryCaptureConfig::default();
        config.recorder.warning_seconds = config.recorder.max_duration_seconds;

        // Warning must come before the hard stop
        assert!(config.validate().is_err());

        config.recorder.warning_seconds = 60;
        assert!(config.validate().is_ok());

        config.upload.jitter = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[recorder]\nmax_duration_seconds = 120\nwarning_seconds = 100\n\n[upload]\ncompletion_policy = \"retry_then_log\"\n"
        )
        .unwrap();

        let config = StoryCaptureConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.recorder.max_duration_seconds, 120);
        assert_eq!(config.recorder.warning_seconds, 100);
        assert_eq!(config.upload.completion_policy, CompletionPolicy::RetryThenLog);
        assert_eq!(config.upload.max_retries, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = StoryCaptureConfig::load_from_file("/nonexistent/storycapture.toml").unwrap();
        assert_eq!(config, StoryCaptureConfig::default());
    }
}
