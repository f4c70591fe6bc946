use super::types::SyncSummary;
use crate::{
    config::SyncConfig,
    dashcam::DashcamClient,
    destination::{ensure_destination, Destination},
    download::{DiskUsage, Downloader, StatvfsDiskUsage},
    error::Result,
    lock::InstanceLock,
    markers::FailureMarkers,
    recording::Recording,
    retention::{current_recordings, sort_recordings, RecordingFilter, TypePriority},
};
use chrono::{Local, NaiveDate};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Runs one synchronization pass of a dashcam into a destination directory
pub struct Synchronizer {
    config: SyncConfig,
    disk_usage: Arc<dyn DiskUsage>,
    today: Option<NaiveDate>,
}

/// Everything derived from the configuration before touching the network or disk
struct RunPlan {
    cutoff: Option<NaiveDate>,
    filter: Option<RecordingFilter>,
    type_priority: TypePriority,
}

impl Synchronizer {
    pub fn new(config: SyncConfig) -> Self {
        Self {
            config,
            disk_usage: Arc::new(StatvfsDiskUsage),
            today: None,
        }
    }

    /// Use another disk usage source than `statvfs`
    pub fn with_disk_usage(mut self, disk_usage: Arc<dyn DiskUsage>) -> Self {
        self.disk_usage = disk_usage;
        self
    }

    /// Fix the date retention is computed from instead of the local date
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    /// Synchronize once.
    ///
    /// Configuration problems are reported before anything is touched. Once
    /// the lock is held, cleanup runs whatever the outcome of the sync and the
    /// lock is released on every path.
    pub async fn run(&self) -> Result<SyncSummary> {
        let plan = self.plan()?;
        let config = &self.config;

        let client = DashcamClient::new(
            &config.dashcam.address,
            config.timeout()?,
            config.dashcam.session_key.clone(),
        )?;

        let root = PathBuf::from(&config.destination.path);
        ensure_destination(&root).await?;
        let lock = InstanceLock::acquire(&root)?;

        let destination = Destination::new(root.clone(), config.destination.grouping, config.dry_run);
        let markers = FailureMarkers::new(
            root,
            config.download.retry_failed_after_hours,
            config.dry_run,
        );

        let outcome = self.sync(&plan, client, &destination, &markers).await;
        let cleanup = destination.clean(&markers).await;
        lock.release();

        match (outcome, cleanup) {
            (Ok(mut summary), Ok(cleanup)) => {
                summary.cleanup = cleanup;
                Ok(summary)
            }
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(_)) => Err(e),
            (Err(e), Err(cleanup_error)) => {
                error!("Failed to clean destination: {}", cleanup_error);
                Err(e)
            }
        }
    }

    fn plan(&self) -> Result<RunPlan> {
        self.config.validate()?;

        let today = self.today.unwrap_or_else(|| Local::now().date_naive());
        let cutoff = match self.config.keep_range()? {
            Some(keep) => {
                let cutoff = keep.cutoff_date(today)?;
                info!("Keeping recordings from {} ({}) on", cutoff, keep);
                Some(cutoff)
            }
            None => None,
        };

        Ok(RunPlan {
            cutoff,
            filter: self.config.recording_filter()?,
            type_priority: self.config.type_priority()?,
        })
    }

    async fn sync(
        &self,
        plan: &RunPlan,
        client: DashcamClient,
        destination: &Destination,
        markers: &FailureMarkers,
    ) -> Result<SyncSummary> {
        let config = &self.config;
        let mut summary = SyncSummary::default();

        if let Some(cutoff) = plan.cutoff {
            summary.outdated_removed = destination.remove_outdated(cutoff).await?;
        }

        let filenames = client.list_filenames().await?;
        summary.listed = filenames.len();

        let recordings: Vec<Recording> = filenames
            .iter()
            .filter_map(|filename| {
                let recording = Recording::parse(filename, config.destination.grouping);
                if recording.is_none() {
                    debug!("Ignoring unrecognized filename: {}", filename);
                }
                recording
            })
            .collect();

        let mut recordings = current_recordings(recordings, plan.cutoff);
        summary.current = recordings.len();

        if let Some(filter) = &plan.filter {
            recordings = filter.apply(recordings);
        }
        summary.selected = recordings.len();

        sort_recordings(
            &mut recordings,
            config.download.priority,
            &plan.type_priority,
        );
        debug!(
            "Downloading {} recordings by {} priority",
            recordings.len(),
            config.download.priority
        );

        let downloader = Downloader::new(
            client,
            destination.clone(),
            markers.clone(),
            Arc::clone(&self.disk_usage),
            config.destination.max_used_disk_percent,
            config.dry_run,
        );

        for recording in &recordings {
            if downloader.download_recording(recording).await?.transferred {
                summary.transferred += 1;
            }
        }

        Ok(summary)
    }
}
