use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

const MARKER_SUFFIX: &str = ".failed";

/// Persisted record of recently failed downloads, one small file per filename.
///
/// A fresh marker suppresses further attempts at that file until the retry
/// window elapses. Stale or unreadable markers count as absent.
#[derive(Debug, Clone)]
pub struct FailureMarkers {
    root: PathBuf,
    retry_after: ChronoDuration,
    dry_run: bool,
}

impl FailureMarkers {
    pub fn new<P: Into<PathBuf>>(root: P, retry_after_hours: u32, dry_run: bool) -> Self {
        Self {
            root: root.into(),
            retry_after: ChronoDuration::hours(retry_after_hours as i64),
            dry_run,
        }
    }

    /// Marker path for a filename: `<root>/.<filename>.failed`
    pub fn marker_path(&self, filename: &str) -> PathBuf {
        self.root.join(format!(".{}{}", filename, MARKER_SUFFIX))
    }

    /// Check if a recent failure should prevent downloading the file again
    pub async fn is_blocked(&self, filename: &str) -> bool {
        self.is_blocked_at(filename, Utc::now()).await
    }

    pub async fn is_blocked_at(&self, filename: &str, now: DateTime<Utc>) -> bool {
        match read_marker(&self.marker_path(filename)).await {
            Some(failed_at) => self.is_fresh(failed_at, now),
            None => false,
        }
    }

    /// Record a failed attempt; best effort, a marker that can't be written is only logged
    pub async fn mark_failed(&self, filename: &str) {
        self.mark_failed_at(filename, Utc::now()).await
    }

    pub async fn mark_failed_at(&self, filename: &str, now: DateTime<Utc>) {
        if self.dry_run {
            debug!("DRY RUN Would mark download as failed: {}", filename);
            return;
        }

        let path = self.marker_path(filename);
        if let Err(e) = fs::write(&path, now.to_rfc3339()).await {
            warn!("Failed to write failure marker {}: {}", path.display(), e);
        } else {
            debug!("Marked download as failed: {}", filename);
        }
    }

    /// Remove the marker after a successful download
    pub async fn clear(&self, filename: &str) {
        let path = self.marker_path(filename);
        match fs::remove_file(&path).await {
            Ok(()) => debug!("Cleared failure marker: {}", filename),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove failure marker {}: {}", path.display(), e),
        }
    }

    /// Delete markers that are stale or unparsable, returning how many were removed
    pub async fn sweep_stale(&self) -> std::io::Result<usize> {
        self.sweep_stale_at(Utc::now()).await
    }

    pub async fn sweep_stale_at(&self, now: DateTime<Utc>) -> std::io::Result<usize> {
        let mut removed = 0;
        let mut entries = fs::read_dir(&self.root).await?;

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if !is_marker_name(name) {
                continue;
            }

            let path = entry.path();
            let fresh = match read_marker(&path).await {
                Some(failed_at) => self.is_fresh(failed_at, now),
                None => false,
            };
            if fresh {
                continue;
            }

            if self.dry_run {
                debug!("DRY RUN Would remove stale failure marker: {}", path.display());
                continue;
            }

            match fs::remove_file(&path).await {
                Ok(()) => {
                    debug!("Removed stale failure marker: {}", path.display());
                    removed += 1;
                }
                Err(e) => warn!("Failed to remove failure marker {}: {}", path.display(), e),
            }
        }

        Ok(removed)
    }

    /// Markers dated in the future, e.g. written before a clock correction, are stale
    fn is_fresh(&self, failed_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        failed_at <= now && now - failed_at < self.retry_after
    }
}

fn is_marker_name(name: &str) -> bool {
    name.len() > 1 + MARKER_SUFFIX.len() && name.starts_with('.') && name.ends_with(MARKER_SUFFIX)
}

async fn read_marker(path: &Path) -> Option<DateTime<Utc>> {
    let content = fs::read_to_string(path).await.ok()?;
    DateTime::parse_from_rfc3339(content.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const FILENAME: &str = "20190219_104220_NF.mp4";

    fn at(hours: i64) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2019-02-19T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
            + ChronoDuration::hours(hours)
    }

    #[tokio::test]
    async fn test_marker_blocks_within_retry_window() {
        let temp_dir = TempDir::new().unwrap();
        let markers = FailureMarkers::new(temp_dir.path(), 24, false);

        assert!(!markers.is_blocked_at(FILENAME, at(0)).await);

        markers.mark_failed_at(FILENAME, at(0)).await;
        assert!(markers.marker_path(FILENAME).exists());
        assert_eq!(
            markers.marker_path(FILENAME).file_name().unwrap(),
            ".20190219_104220_NF.mp4.failed"
        );

        assert!(markers.is_blocked_at(FILENAME, at(1)).await);
        assert!(markers.is_blocked_at(FILENAME, at(23)).await);
        assert!(!markers.is_blocked_at(FILENAME, at(24)).await);
        assert!(!markers.is_blocked_at(FILENAME, at(48)).await);
    }

    #[tokio::test]
    async fn test_clear_removes_marker() {
        let temp_dir = TempDir::new().unwrap();
        let markers = FailureMarkers::new(temp_dir.path(), 24, false);

        markers.mark_failed(FILENAME).await;
        assert!(markers.is_blocked(FILENAME).await);

        markers.clear(FILENAME).await;
        assert!(!markers.marker_path(FILENAME).exists());
        assert!(!markers.is_blocked(FILENAME).await);

        // Clearing a missing marker is fine
        markers.clear(FILENAME).await;
    }

    #[tokio::test]
    async fn test_corrupt_marker_is_ignored() {
        let temp_dir = TempDir::new().unwrap();
        let markers = FailureMarkers::new(temp_dir.path(), 24, false);

        std::fs::write(markers.marker_path(FILENAME), "not a timestamp").unwrap();
        assert!(!markers.is_blocked(FILENAME).await);
    }

    #[tokio::test]
    async fn test_sweep_removes_stale_and_corrupt_markers() {
        let temp_dir = TempDir::new().unwrap();
        let markers = FailureMarkers::new(temp_dir.path(), 24, false);

        markers.mark_failed_at("20190219_104220_NF.mp4", at(0)).await;
        markers.mark_failed_at("20190219_104220_NR.mp4", at(20)).await;
        std::fs::write(markers.marker_path("20190219_104220_N.gps"), "garbage").unwrap();
        std::fs::write(temp_dir.path().join("20190219_104220_NF.thm"), "thumbnail").unwrap();
        std::fs::write(temp_dir.path().join(".failed"), "").unwrap();

        let removed = markers.sweep_stale_at(at(30)).await.unwrap();
        assert_eq!(removed, 2);

        assert!(!markers.marker_path("20190219_104220_NF.mp4").exists());
        assert!(markers.marker_path("20190219_104220_NR.mp4").exists());
        assert!(!markers.marker_path("20190219_104220_N.gps").exists());
        assert!(temp_dir.path().join("20190219_104220_NF.thm").exists());
        assert!(temp_dir.path().join(".failed").exists());
    }

    #[tokio::test]
    async fn test_future_marker_is_stale() {
        let temp_dir = TempDir::new().unwrap();
        let markers = FailureMarkers::new(temp_dir.path(), 24, false);

        markers.mark_failed_at(FILENAME, at(5)).await;
        assert!(!markers.is_blocked_at(FILENAME, at(0)).await);

        assert_eq!(markers.sweep_stale_at(at(0)).await.unwrap(), 1);
        assert!(!markers.marker_path(FILENAME).exists());
    }

    #[tokio::test]
    async fn test_dry_run_writes_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let markers = FailureMarkers::new(temp_dir.path(), 24, true);

        markers.mark_failed(FILENAME).await;
        assert!(!markers.marker_path(FILENAME).exists());

        std::fs::write(markers.marker_path("20190219_104220_NR.mp4"), "garbage").unwrap();
        assert_eq!(markers.sweep_stale().await.unwrap(), 0);
        assert!(markers.marker_path("20190219_104220_NR.mp4").exists());
    }
}
