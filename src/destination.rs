use crate::{
    error::{Result, SyncError},
    markers::FailureMarkers,
    recording::{is_group_name, DownloadedRecording, Grouping, Recording, VIDEO_EXTENSION},
    retention::outdated_recordings,
};
use chrono::NaiveDate;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

/// Cleanup operation result
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupResult {
    pub temp_files_removed: usize,
    pub markers_removed: usize,
    pub group_dirs_removed: usize,
    pub errors: Vec<String>,
}

/// Make sure the destination exists and is a writable directory, creating it when absent
pub async fn ensure_destination(path: &Path) -> Result<()> {
    match fs::metadata(path).await {
        Ok(metadata) => {
            if !metadata.is_dir() {
                return Err(SyncError::destination(format!(
                    "destination is not a directory: {}",
                    path.display()
                )));
            }
            if !is_writable(path) {
                return Err(SyncError::destination(format!(
                    "destination directory not writable: {}",
                    path.display()
                )));
            }
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            fs::create_dir_all(path).await.map_err(|e| {
                SyncError::destination(format!(
                    "cannot create destination directory {}: {}",
                    path.display(),
                    e
                ))
            })?;
            info!("Created destination directory: {}", path.display());
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

fn is_writable(path: &Path) -> bool {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    match CString::new(path.as_os_str().as_bytes()) {
        Ok(c_path) => unsafe { libc::access(c_path.as_ptr(), libc::W_OK) == 0 },
        Err(_) => false,
    }
}

/// Local directory tree receiving the recordings
#[derive(Debug, Clone)]
pub struct Destination {
    root: PathBuf,
    grouping: Grouping,
    dry_run: bool,
}

impl Destination {
    pub fn new<P: Into<PathBuf>>(root: P, grouping: Grouping, dry_run: bool) -> Self {
        Self {
            root: root.into(),
            grouping,
            dry_run,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding the files of a group; the root when ungrouped
    pub fn group_dir(&self, group_name: Option<&str>) -> PathBuf {
        match group_name {
            Some(name) => self.root.join(name),
            None => self.root.clone(),
        }
    }

    /// Same as [`Destination::group_dir`], creating the group directory on first use
    pub async fn ensure_group_dir(&self, group_name: Option<&str>) -> Result<PathBuf> {
        let dir = self.group_dir(group_name);
        if group_name.is_some() {
            ensure_destination(&dir).await?;
        }
        Ok(dir)
    }

    /// Recordings present in the root and in every group directory.
    ///
    /// Group directories are scanned whatever the current grouping is, so
    /// retention still applies after the grouping setting changes.
    pub async fn downloaded_recordings(&self) -> Result<Vec<DownloadedRecording>> {
        let mut found = BTreeSet::new();

        for name in list_file_names(&self.root).await? {
            if let Some(recording) = DownloadedRecording::parse(&name, None) {
                found.insert((None, recording.base_filename, recording.datetime));
            }
        }

        for (group_name, dir) in self.group_dirs().await? {
            for name in list_file_names(&dir).await? {
                let parsed = DownloadedRecording::parse(&name, Some(group_name.as_str()));
                if let Some(recording) = parsed {
                    found.insert((
                        Some(group_name.clone()),
                        recording.base_filename,
                        recording.datetime,
                    ));
                }
            }
        }

        Ok(found
            .into_iter()
            .map(|(group_name, base_filename, datetime)| DownloadedRecording {
                base_filename,
                group_name,
                datetime,
            })
            .collect())
    }

    /// Delete every file belonging to a downloaded recording, returning how many were removed
    pub async fn remove_recording(&self, recording: &DownloadedRecording) -> Result<usize> {
        let dir = self.group_dir(recording.group_name.as_deref());
        let prefix = format!("{}_", recording.base_filename);
        let mut removed = 0;

        for name in list_file_names(&dir).await? {
            if !name.starts_with(&prefix) {
                continue;
            }
            let path = dir.join(&name);
            if self.dry_run {
                debug!("DRY RUN Would remove file: {}", path.display());
                continue;
            }
            fs::remove_file(&path).await?;
            debug!("Removed file: {}", path.display());
            removed += 1;
        }

        Ok(removed)
    }

    /// Delete downloaded recordings dated before the cutoff, returning how many were removed
    pub async fn remove_outdated(&self, cutoff: NaiveDate) -> Result<usize> {
        let downloaded = self.downloaded_recordings().await?;
        let outdated = outdated_recordings(&downloaded, Some(cutoff));

        for recording in &outdated {
            if self.dry_run {
                info!("DRY RUN Would remove outdated recording: {}", recording.base_filename);
            } else {
                info!("Removing outdated recording: {}", recording.base_filename);
            }
            self.remove_recording(recording).await?;
        }

        if outdated.is_empty() {
            debug!("No outdated recordings before {}", cutoff);
        }

        Ok(outdated.len())
    }

    /// Remove what interrupted or failed runs leave behind.
    ///
    /// Covers partial downloads, stale failure markers and, when grouping,
    /// group directories without any video. Problems with single entries are
    /// collected in the result instead of aborting the cleanup.
    pub async fn clean(&self, markers: &FailureMarkers) -> Result<CleanupResult> {
        let mut result = CleanupResult::default();
        let group_dirs = self.group_dirs().await?;

        let mut dirs = vec![self.root.clone()];
        dirs.extend(group_dirs.iter().map(|(_, dir)| dir.clone()));

        for dir in &dirs {
            for name in list_file_names(dir).await? {
                if !is_temp_file_name(&name) {
                    continue;
                }
                let path = dir.join(&name);
                if self.dry_run {
                    debug!("DRY RUN Would remove temporary file: {}", path.display());
                    continue;
                }
                match fs::remove_file(&path).await {
                    Ok(()) => {
                        debug!("Removed temporary file: {}", path.display());
                        result.temp_files_removed += 1;
                    }
                    Err(e) => result
                        .errors
                        .push(format!("Failed to remove {}: {}", path.display(), e)),
                }
            }
        }

        match markers.sweep_stale().await {
            Ok(removed) => result.markers_removed = removed,
            Err(e) => result
                .errors
                .push(format!("Failed to sweep failure markers: {}", e)),
        }

        if self.grouping != Grouping::None {
            for (_, dir) in &group_dirs {
                if contains_video(dir).await? {
                    continue;
                }
                if self.dry_run {
                    debug!("DRY RUN Would remove empty group directory: {}", dir.display());
                    continue;
                }
                match fs::remove_dir_all(dir).await {
                    Ok(()) => {
                        debug!("Removed empty group directory: {}", dir.display());
                        result.group_dirs_removed += 1;
                    }
                    Err(e) => result
                        .errors
                        .push(format!("Failed to remove {}: {}", dir.display(), e)),
                }
            }
        }

        if !result.errors.is_empty() {
            warn!(
                "Cleanup completed with {} errors: {:?}",
                result.errors.len(),
                result.errors
            );
        }

        Ok(result)
    }

    /// Subdirectories of the root named like group directories
    async fn group_dirs(&self) -> Result<Vec<(String, PathBuf)>> {
        let mut dirs = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if is_group_name(name) {
                    dirs.push((name.to_string(), entry.path()));
                }
            }
        }

        dirs.sort();
        Ok(dirs)
    }
}

/// Names of the regular files in a directory
async fn list_file_names(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    let mut entries = fs::read_dir(dir).await?;

    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            names.push(name.to_string());
        }
    }

    names.sort();
    Ok(names)
}

/// Partial downloads are recording names behind a leading dot
fn is_temp_file_name(name: &str) -> bool {
    name.strip_prefix('.')
        .and_then(|rest| Recording::parse(rest, Grouping::None))
        .is_some()
}

async fn contains_video(dir: &Path) -> Result<bool> {
    let suffix = format!(".{}", VIDEO_EXTENSION);
    Ok(list_file_names(dir)
        .await?
        .iter()
        .any(|name| !name.starts_with('.') && name.ends_with(&suffix)))
}
