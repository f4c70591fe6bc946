use crate::{
    error::{Result, SyncError},
    recording::Grouping,
    retention::{KeepRange, Priority, RecordingFilter, TypePriority, DEFAULT_TYPE_PRIORITY},
};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Configuration file looked up when none is given explicitly
pub const DEFAULT_CONFIG_FILE: &str = "blackvuesync.toml";

/// Prefix of the environment variables, e.g. `BLACKVUESYNC__DASHCAM__ADDRESS`
const ENV_PREFIX: &str = "BLACKVUESYNC";

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SyncConfig {
    /// Report what would be done without downloading or deleting anything
    #[serde(default)]
    pub dry_run: bool,

    pub dashcam: DashcamConfig,
    pub destination: DestinationConfig,
    pub download: DownloadConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct DashcamConfig {
    /// Dashcam IP address or hostname, optionally with scheme and port
    #[serde(default)]
    pub address: String,

    /// Timeout for connecting and for each request, in seconds
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: f64,

    /// Client affinity token sent as `X-Affinity-Key`
    pub session_key: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct DestinationConfig {
    /// Directory the recordings are synchronized into
    #[serde(default = "default_destination_path")]
    pub path: String,

    /// Group recordings into per-period subdirectories
    #[serde(default)]
    pub grouping: Grouping,

    /// Retention range such as `30d` or `4w`; unlimited when absent
    pub keep: Option<String>,

    /// Stop downloading once the destination disk is fuller than this
    #[serde(default = "default_max_used_disk_percent")]
    pub max_used_disk_percent: u8,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct DownloadConfig {
    /// Download order
    #[serde(default)]
    pub priority: Priority,

    /// Type+direction codes to restrict downloads to; everything when empty
    #[serde(default)]
    pub filter: Vec<String>,

    /// Hours to wait before retrying a file that failed to download
    #[serde(default = "default_retry_failed_after_hours")]
    pub retry_failed_after_hours: u32,

    /// Recording type letters, highest priority first
    #[serde(default = "default_type_priority")]
    pub type_priority: String,
}

/// Values given on the command line, applied over every other source
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub address: Option<String>,
    pub destination: Option<String>,
    pub grouping: Option<Grouping>,
    pub keep: Option<String>,
    pub priority: Option<Priority>,
    pub filter: Option<Vec<String>>,
    pub max_used_disk_percent: Option<u8>,
    pub timeout_seconds: Option<f64>,
    pub retry_failed_after_hours: Option<u32>,
    pub session_key: Option<String>,
    pub dry_run: bool,
}

impl SyncConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load(overrides: &ConfigOverrides) -> std::result::Result<Self, ConfigError> {
        Self::load_from_file(DEFAULT_CONFIG_FILE, false, overrides)
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(
        path: P,
        required: bool,
        overrides: &ConfigOverrides,
    ) -> std::result::Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let mut builder = Config::builder()
            // Start with default values
            .set_default("dry_run", false)?
            .set_default("dashcam.address", "")?
            .set_default("dashcam.timeout_seconds", default_timeout_seconds())?
            .set_default("destination.path", default_destination_path())?
            .set_default("destination.grouping", Grouping::default().to_string())?
            .set_default(
                "destination.max_used_disk_percent",
                u32::from(default_max_used_disk_percent()),
            )?
            .set_default("download.priority", Priority::default().to_string())?
            .set_default("download.filter", Vec::<String>::new())?
            .set_default(
                "download.retry_failed_after_hours",
                default_retry_failed_after_hours(),
            )?
            .set_default("download.type_priority", default_type_priority())?
            .add_source(File::with_name(&path_str).required(required))
            // Add environment variables with BLACKVUESYNC__ prefix
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .set_override_option("dashcam.address", overrides.address.clone())?
            .set_override_option("dashcam.timeout_seconds", overrides.timeout_seconds)?
            .set_override_option("dashcam.session_key", overrides.session_key.clone())?
            .set_override_option("destination.path", overrides.destination.clone())?
            .set_override_option(
                "destination.grouping",
                overrides.grouping.map(|g| g.to_string()),
            )?
            .set_override_option("destination.keep", overrides.keep.clone())?
            .set_override_option(
                "destination.max_used_disk_percent",
                overrides.max_used_disk_percent.map(u32::from),
            )?
            .set_override_option(
                "download.priority",
                overrides.priority.map(|p| p.to_string()),
            )?
            .set_override_option("download.filter", overrides.filter.clone())?
            .set_override_option(
                "download.retry_failed_after_hours",
                overrides.retry_failed_after_hours,
            )?;

        if overrides.dry_run {
            builder = builder.set_override("dry_run", true)?;
        }

        let config: SyncConfig = builder.build()?.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.dashcam.address.trim().is_empty() {
            return Err(SyncError::config("Dashcam address must be given"));
        }

        self.timeout()?;

        if !(5..=99).contains(&self.destination.max_used_disk_percent) {
            return Err(SyncError::config(format!(
                "Max used disk percent must be between 5 and 99: {}",
                self.destination.max_used_disk_percent
            )));
        }

        if self.destination.path.is_empty() {
            return Err(SyncError::config("Destination path must not be empty"));
        }

        if self.download.retry_failed_after_hours == 0 {
            return Err(SyncError::config(
                "Retry failed after hours must be greater than 0",
            ));
        }

        self.keep_range()?;
        self.recording_filter()?;
        self.type_priority()?;

        Ok(())
    }

    pub fn timeout(&self) -> Result<Duration> {
        let seconds = self.dashcam.timeout_seconds;
        if !(seconds.is_finite() && seconds > 0.0) {
            return Err(SyncError::config(format!(
                "Timeout must be a positive number of seconds: {}",
                seconds
            )));
        }
        Duration::try_from_secs_f64(seconds)
            .map_err(|e| SyncError::config(format!("Invalid timeout {}: {}", seconds, e)))
    }

    pub fn keep_range(&self) -> Result<Option<KeepRange>> {
        self.destination
            .keep
            .as_deref()
            .map(str::parse::<KeepRange>)
            .transpose()
    }

    pub fn recording_filter(&self) -> Result<Option<RecordingFilter>> {
        if self.download.filter.is_empty() {
            return Ok(None);
        }
        RecordingFilter::new(&self.download.filter).map(Some)
    }

    pub fn type_priority(&self) -> Result<TypePriority> {
        self.download.type_priority.parse()
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            dashcam: DashcamConfig {
                address: String::new(),
                timeout_seconds: default_timeout_seconds(),
                session_key: None,
            },
            destination: DestinationConfig {
                path: default_destination_path(),
                grouping: Grouping::default(),
                keep: None,
                max_used_disk_percent: default_max_used_disk_percent(),
            },
            download: DownloadConfig {
                priority: Priority::default(),
                filter: Vec::new(),
                retry_failed_after_hours: default_retry_failed_after_hours(),
                type_priority: default_type_priority(),
            },
        }
    }
}

// Default value functions
fn default_timeout_seconds() -> f64 {
    10.0
}
fn default_destination_path() -> String {
    ".".to_string()
}
fn default_max_used_disk_percent() -> u8 {
    90
}
fn default_retry_failed_after_hours() -> u32 {
    24
}
fn default_type_priority() -> String {
    DEFAULT_TYPE_PRIORITY.to_string()
}
