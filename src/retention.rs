use crate::{
    error::{Result, SyncError},
    recording::{DownloadedRecording, Recording, DIRECTIONS, RECORDING_TYPES},
};
use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// Manual first, then event-class codes (including driver monitoring), then
/// impact, overspeed and hard driving, then geofence, then normal, then parking
pub const DEFAULT_TYPE_PRIORITY: &str = "MEDLYFIOATBRXGNP";

/// Unit of a keep range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepUnit {
    Days,
    Weeks,
}

/// How far back recordings are kept, e.g. `7d` or `2w`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepRange {
    pub count: u32,
    pub unit: KeepUnit,
}

impl KeepRange {
    pub fn days(&self) -> Option<u64> {
        match self.unit {
            KeepUnit::Days => Some(self.count as u64),
            KeepUnit::Weeks => (self.count as u64).checked_mul(7),
        }
    }

    /// The date before which recordings are outdated
    pub fn cutoff_date(&self, today: NaiveDate) -> Result<NaiveDate> {
        self.days()
            .and_then(|days| today.checked_sub_days(Days::new(days)))
            .ok_or_else(|| SyncError::config(format!("KEEP range is too large: {}", self)))
    }
}

impl FromStr for KeepRange {
    type Err = SyncError;

    fn from_str(keep: &str) -> Result<Self> {
        let format_error = || SyncError::config("KEEP must be in the format <number>[dw]");

        let digits_end = keep
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(keep.len());
        let (digits, unit) = keep.split_at(digits_end);

        if digits.is_empty() {
            return Err(format_error());
        }

        let unit = match unit {
            "" | "d" => KeepUnit::Days,
            "w" => KeepUnit::Weeks,
            _ => return Err(format_error()),
        };

        let count: u32 = digits
            .parse()
            .map_err(|_| SyncError::config(format!("KEEP range is too large: {}", keep)))?;

        if count < 1 {
            return Err(SyncError::config("KEEP must be greater than zero"));
        }

        Ok(Self { count, unit })
    }
}

impl fmt::Display for KeepRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unit = match self.unit {
            KeepUnit::Days => 'd',
            KeepUnit::Weeks => 'w',
        };
        write!(f, "{}{}", self.count, unit)
    }
}

/// Given a retention spec, calculate the date before which recordings are removed
pub fn calc_cutoff_date(keep: &str, today: NaiveDate) -> Result<NaiveDate> {
    keep.parse::<KeepRange>()?.cutoff_date(today)
}

/// Order in which pending recordings are downloaded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Oldest first
    #[default]
    Date,
    /// Newest first
    Rdate,
    /// By type priority, then oldest first
    Type,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Priority::Date => "date",
            Priority::Rdate => "rdate",
            Priority::Type => "type",
        };
        f.write_str(name)
    }
}

/// Ranking of recording types used by [`Priority::Type`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypePriority {
    order: Vec<char>,
}

impl TypePriority {
    /// Rank of a type letter; letters not listed rank after every listed one
    pub fn rank(&self, recording_type: char) -> usize {
        self.order
            .iter()
            .position(|&c| c == recording_type)
            .unwrap_or(self.order.len())
    }
}

impl Default for TypePriority {
    fn default() -> Self {
        Self {
            order: DEFAULT_TYPE_PRIORITY.chars().collect(),
        }
    }
}

impl FromStr for TypePriority {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        let mut order = Vec::with_capacity(s.len());
        for c in s.chars() {
            if !RECORDING_TYPES.contains(&c) {
                return Err(SyncError::config(format!(
                    "unknown recording type in type priority: {}",
                    c
                )));
            }
            if order.contains(&c) {
                return Err(SyncError::config(format!(
                    "duplicate recording type in type priority: {}",
                    c
                )));
            }
            order.push(c);
        }
        Ok(Self { order })
    }
}

fn direction_rank(direction: Option<char>) -> usize {
    direction
        .and_then(|d| DIRECTIONS.iter().position(|&c| c == d))
        .unwrap_or(0)
}

/// Sort recordings in place according to the given priority; the sort is stable
pub fn sort_recordings(recordings: &mut [Recording], priority: Priority, types: &TypePriority) {
    match priority {
        Priority::Date => {
            recordings.sort_by_key(|r| (r.datetime, direction_rank(r.direction)));
        }
        Priority::Rdate => {
            recordings.sort_by(|a, b| {
                b.datetime
                    .cmp(&a.datetime)
                    .then_with(|| direction_rank(a.direction).cmp(&direction_rank(b.direction)))
            });
        }
        Priority::Type => {
            recordings.sort_by_key(|r| {
                (
                    types.rank(r.recording_type),
                    r.datetime,
                    direction_rank(r.direction),
                )
            });
        }
    }
}

/// Recordings dated on or after the cutoff; all of them when there is no cutoff
pub fn current_recordings(recordings: Vec<Recording>, cutoff: Option<NaiveDate>) -> Vec<Recording> {
    match cutoff {
        None => recordings,
        Some(cutoff) => recordings
            .into_iter()
            .filter(|r| r.datetime.date() >= cutoff)
            .collect(),
    }
}

/// Downloaded recordings dated strictly before the cutoff
pub fn outdated_recordings(
    recordings: &[DownloadedRecording],
    cutoff: Option<NaiveDate>,
) -> Vec<&DownloadedRecording> {
    match cutoff {
        None => Vec::new(),
        Some(cutoff) => recordings
            .iter()
            .filter(|r| r.datetime.date() < cutoff)
            .collect(),
    }
}

/// Set of type+direction codes (e.g. `PF`, `PR`) to restrict downloads to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingFilter {
    codes: HashSet<String>,
}

impl RecordingFilter {
    pub fn new<I, S>(codes: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = HashSet::new();
        for code in codes {
            let code = code.as_ref();
            let mut chars = code.chars();
            let valid = matches!(
                (chars.next(), chars.next(), chars.next()),
                (Some(t), Some(d), None) if RECORDING_TYPES.contains(&t) && DIRECTIONS.contains(&d)
            );
            if !valid {
                return Err(SyncError::config(format!(
                    "FILTER must be a recording type followed by a direction, e.g. PF: {}",
                    code
                )));
            }
            set.insert(code.to_string());
        }
        Ok(Self { codes: set })
    }

    pub fn matches(&self, recording: &Recording) -> bool {
        self.codes.contains(&recording.type_direction())
    }

    pub fn apply(&self, recordings: Vec<Recording>) -> Vec<Recording> {
        recordings.into_iter().filter(|r| self.matches(r)).collect()
    }
}
