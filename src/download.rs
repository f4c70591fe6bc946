use crate::{
    dashcam::DashcamClient,
    destination::Destination,
    error::{Result, SyncError},
    markers::FailureMarkers,
    recording::Recording,
    CRON_TARGET,
};
use std::io;
use std::path::Path;
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info, warn};

/// Reports how full the filesystem holding a path is
pub trait DiskUsage: Send + Sync {
    fn used_percent(&self, path: &Path) -> io::Result<f64>;
}

/// Disk usage read from `statvfs`
#[derive(Debug, Clone, Copy, Default)]
pub struct StatvfsDiskUsage;

impl DiskUsage for StatvfsDiskUsage {
    fn used_percent(&self, path: &Path) -> io::Result<f64> {
        use std::ffi::CString;
        use std::os::unix::ffi::OsStrExt;

        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        let stat = unsafe {
            let mut stat: libc::statvfs = std::mem::zeroed();
            if libc::statvfs(c_path.as_ptr(), &mut stat) != 0 {
                return Err(io::Error::last_os_error());
            }
            stat
        };

        #[allow(clippy::unnecessary_cast)]
        let total = stat.f_blocks as u64 * stat.f_frsize as u64;
        #[allow(clippy::unnecessary_cast)]
        let free = stat.f_bfree as u64 * stat.f_frsize as u64;

        if total == 0 {
            return Ok(0.0);
        }
        Ok(total.saturating_sub(free) as f64 / total as f64 * 100.0)
    }
}

/// Outcome of downloading a file or a whole recording
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Transfer {
    /// Whether data was (or in a dry run would have been) transferred
    pub transferred: bool,
    /// Measured speed of the video file, in bits per second
    pub speed_bps: Option<u64>,
}

/// Downloads recordings from the dashcam into the destination
pub struct Downloader {
    client: DashcamClient,
    destination: Destination,
    markers: FailureMarkers,
    disk_usage: Arc<dyn DiskUsage>,
    max_used_disk_percent: u8,
    dry_run: bool,
}

impl Downloader {
    pub fn new(
        client: DashcamClient,
        destination: Destination,
        markers: FailureMarkers,
        disk_usage: Arc<dyn DiskUsage>,
        max_used_disk_percent: u8,
        dry_run: bool,
    ) -> Self {
        Self {
            client,
            destination,
            markers,
            disk_usage,
            max_used_disk_percent,
            dry_run,
        }
    }

    /// Download a single file into its group directory.
    ///
    /// Already present and recently failed files are skipped. An error status
    /// from the dashcam is a per-file failure: it is recorded as a failure
    /// marker and reported as "nothing transferred". Connectivity problems
    /// abort the run since they affect every following file too.
    pub async fn download_file(&self, filename: &str, group_name: Option<&str>) -> Result<Transfer> {
        let filepath = self.destination.group_dir(group_name).join(filename);

        if filepath.exists() {
            debug!("Ignoring already downloaded file: {}", filename);
            return Ok(Transfer::default());
        }

        if self.markers.is_blocked(filename).await {
            debug!("Ignoring recently failed file: {}", filename);
            return Ok(Transfer::default());
        }

        if self.dry_run {
            debug!("DRY RUN Would download file: {}", filename);
            return Ok(Transfer {
                transferred: true,
                speed_bps: None,
            });
        }

        let dir = self.destination.ensure_group_dir(group_name).await?;
        let temp_filepath = dir.join(format!(".{}", filename));
        if temp_filepath.exists() {
            debug!("Found incomplete download: {}", temp_filepath.display());
        }

        match self.client.fetch_file(filename, &temp_filepath).await {
            Ok(fetched) => {
                fs::rename(&temp_filepath, &filepath).await?;
                self.markers.clear(filename).await;
                debug!("Downloaded file: {} ({} bytes)", filename, fetched.bytes);

                Ok(Transfer {
                    transferred: true,
                    speed_bps: fetched.speed_bps(),
                })
            }
            Err(SyncError::RemoteFile { status, .. }) => {
                warn!(
                    "Could not download file: {}; status code: {}; ignoring.",
                    filename, status
                );
                self.markers.mark_failed(filename).await;
                Ok(Transfer::default())
            }
            Err(e) => Err(e),
        }
    }

    /// Download a recording: video, thumbnail, accelerometer and GPS data.
    ///
    /// Refuses to start when the destination disk is already fuller than
    /// allowed; that aborts the whole run rather than skipping the recording.
    pub async fn download_recording(&self, recording: &Recording) -> Result<Transfer> {
        let root = self.destination.root();
        let used_percent = self.disk_usage.used_percent(root)?;
        if used_percent > self.max_used_disk_percent as f64 {
            return Err(SyncError::DiskFull {
                used_percent,
                max_percent: self.max_used_disk_percent,
            });
        }

        let group_name = recording.group_name.as_deref();

        let video = self.download_file(&recording.filename, group_name).await?;
        let mut transferred = video.transferred;

        // GPS and accelerometer data are tried for every type; firmware varies
        for companion in [
            recording.thumbnail_filename(),
            recording.accelerometer_filename(),
            recording.gps_filename(),
        ] {
            transferred |= self.download_file(&companion, group_name).await?.transferred;
        }

        if transferred {
            log_recording(recording, video.speed_bps, self.dry_run);
        }

        Ok(Transfer {
            transferred,
            speed_bps: video.speed_bps,
        })
    }
}

/// Routine drives and manual recordings stay visible in cron mode; the rest don't
fn log_recording(recording: &Recording, speed_bps: Option<u64>, dry_run: bool) {
    let speed = speed_bps.map(format_speed).unwrap_or_default();
    let cron_visible = matches!(recording.recording_type, 'N' | 'M');

    match (dry_run, cron_visible) {
        (true, true) => info!(target: CRON_TARGET, "DRY RUN Would download recording: {}", recording.filename),
        (true, false) => info!("DRY RUN Would download recording: {}", recording.filename),
        (false, true) => info!(target: CRON_TARGET, "Downloaded recording: {}{}", recording.filename, speed),
        (false, false) => info!("Downloaded recording: {}{}", recording.filename, speed),
    }
}

fn format_speed(bps: u64) -> String {
    format!(" ({:.1} Mbps)", bps as f64 / 1_000_000.0)
}
