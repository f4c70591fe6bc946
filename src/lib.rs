pub mod config;
pub mod dashcam;
pub mod destination;
pub mod download;
pub mod error;
pub mod lock;
pub mod markers;
pub mod recording;
pub mod retention;
pub mod sync;

#[cfg(test)]
mod test_support;

/// Log target for messages that stay visible in cron mode
pub const CRON_TARGET: &str = "blackvuesync::cron";

pub use config::{ConfigOverrides, SyncConfig};
pub use destination::{CleanupResult, Destination};
pub use download::{DiskUsage, Downloader, StatvfsDiskUsage, Transfer};
pub use error::{ErrorClass, Result, SyncError};
pub use lock::InstanceLock;
pub use markers::FailureMarkers;
pub use recording::{DownloadedRecording, Grouping, Recording};
pub use retention::{KeepRange, Priority, RecordingFilter, TypePriority};
pub use sync::{SyncSummary, Synchronizer};
