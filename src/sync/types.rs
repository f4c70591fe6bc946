use crate::destination::CleanupResult;
use std::fmt;

/// What a synchronization run did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSummary {
    /// Recordings listed by the dashcam
    pub listed: usize,
    /// Listed recordings within the retention range
    pub current: usize,
    /// Current recordings passing the filter
    pub selected: usize,
    /// Recordings with at least one file transferred
    pub transferred: usize,
    /// Downloaded recordings removed for being outdated
    pub outdated_removed: usize,
    pub cleanup: CleanupResult,
}

impl fmt::Display for SyncSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} recordings listed, {} current, {} selected, {} downloaded, {} outdated removed, \
             {} temporary files and {} failure markers cleaned",
            self.listed,
            self.current,
            self.selected,
            self.transferred,
            self.outdated_removed,
            self.cleanup.temp_files_removed,
            self.cleanup.markers_removed
        )
    }
}
