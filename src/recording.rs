use chrono::{Datelike, Duration as ChronoDuration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Recording type letters produced by the dashcam firmware.
///
/// N normal, E event, P parking, M manual, I impact, O overspeed,
/// A hard acceleration, T hard cornering, B hard braking,
/// R geofence enter, X geofence exit, G geofence pass,
/// D drowsiness, L distraction, Y seatbelt, F undetected driver.
pub const RECORDING_TYPES: &[char] = &[
    'N', 'E', 'P', 'M', 'I', 'O', 'A', 'T', 'B', 'R', 'X', 'G', 'D', 'L', 'Y', 'F',
];

/// Camera direction letters: front, rear, interior, optional
pub const DIRECTIONS: &[char] = &['F', 'R', 'I', 'O'];

/// Cloud upload markers appended by some firmware versions
pub const UPLOAD_FLAGS: &[char] = &['L', 'S'];

/// Extensions of the files making up a recording
pub const EXTENSIONS: &[&str] = &["mp4", "thm", "3gf", "gps"];

pub const VIDEO_EXTENSION: &str = "mp4";

/// Length of the `YYYYMMDD_HHMMSS` base filename
const BASE_FILENAME_LEN: usize = 15;

/// Optional bucketing of stored recordings into subdirectories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Grouping {
    #[default]
    None,
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl Grouping {
    /// Name of the group directory a recording made at `datetime` belongs to
    pub fn group_name(self, datetime: NaiveDateTime) -> Option<String> {
        let date = datetime.date();
        match self {
            Grouping::None => None,
            Grouping::Daily => Some(date.format("%Y-%m-%d").to_string()),
            Grouping::Weekly => {
                let monday =
                    date - ChronoDuration::days(date.weekday().num_days_from_monday() as i64);
                Some(monday.format("%Y-%m-%d").to_string())
            }
            Grouping::Monthly => Some(date.format("%Y-%m").to_string()),
            Grouping::Yearly => Some(date.format("%Y").to_string()),
        }
    }
}

impl fmt::Display for Grouping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Grouping::None => "none",
            Grouping::Daily => "daily",
            Grouping::Weekly => "weekly",
            Grouping::Monthly => "monthly",
            Grouping::Yearly => "yearly",
        };
        f.write_str(name)
    }
}

/// A file belonging to a dashcam recording, with the metadata encoded in its name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recording {
    pub filename: String,
    pub base_filename: String,
    pub group_name: Option<String>,
    pub datetime: NaiveDateTime,
    pub recording_type: char,
    pub direction: Option<char>,
    pub upload_flag: Option<char>,
    pub extension: String,
}

impl Recording {
    /// Parse a dashcam filename such as `20181029_131513_NF.mp4`.
    ///
    /// Returns `None` for anything that is not a recording file, including
    /// names whose embedded date or time does not exist on the calendar.
    pub fn parse(filename: &str, grouping: Grouping) -> Option<Self> {
        let (base_filename, datetime, rest) = split_timestamp_prefix(filename)?;
        let (stem, extension) = rest.split_once('.')?;

        if !EXTENSIONS.contains(&extension) {
            return None;
        }

        let mut chars = stem.chars();
        let recording_type = chars.next().filter(|c| RECORDING_TYPES.contains(c))?;

        let mut next = chars.next();
        let direction = next.filter(|c| DIRECTIONS.contains(c));
        if direction.is_some() {
            next = chars.next();
        }
        let upload_flag = next.filter(|c| UPLOAD_FLAGS.contains(c));
        if upload_flag.is_some() {
            next = chars.next();
        }
        if next.is_some() {
            return None;
        }

        Some(Self {
            filename: filename.to_string(),
            base_filename: base_filename.to_string(),
            group_name: grouping.group_name(datetime),
            datetime,
            recording_type,
            direction,
            upload_flag,
            extension: extension.to_string(),
        })
    }

    pub fn is_video(&self) -> bool {
        self.extension == VIDEO_EXTENSION
    }

    /// Type and direction letters, e.g. `PF`, as used by recording filters
    pub fn type_direction(&self) -> String {
        let mut code = String::with_capacity(2);
        code.push(self.recording_type);
        if let Some(direction) = self.direction {
            code.push(direction);
        }
        code
    }

    pub fn thumbnail_filename(&self) -> String {
        format!(
            "{}_{}{}{}.thm",
            self.base_filename,
            self.recording_type,
            opt_char(self.direction),
            opt_char(self.upload_flag)
        )
    }

    /// Accelerometer data is shared by all directions of a recording
    pub fn accelerometer_filename(&self) -> String {
        format!(
            "{}_{}{}.3gf",
            self.base_filename,
            self.recording_type,
            opt_char(self.upload_flag)
        )
    }

    pub fn gps_filename(&self) -> String {
        format!(
            "{}_{}{}.gps",
            self.base_filename,
            self.recording_type,
            opt_char(self.upload_flag)
        )
    }
}

/// A recording found in the destination; only what retention needs to know
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedRecording {
    pub base_filename: String,
    pub group_name: Option<String>,
    pub datetime: NaiveDateTime,
}

impl DownloadedRecording {
    /// Recognize any file starting with `YYYYMMDD_HHMMSS_`, whatever follows.
    ///
    /// Deliberately permissive so that companion files with extensions or type
    /// codes this tool doesn't know about still count towards retention.
    pub fn parse(filename: &str, group_name: Option<&str>) -> Option<Self> {
        let (base_filename, datetime, _) = split_timestamp_prefix(filename)?;

        Some(Self {
            base_filename: base_filename.to_string(),
            group_name: group_name.map(str::to_string),
            datetime,
        })
    }
}

/// Check if a directory name is one this tool creates when grouping
pub fn is_group_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    let is_digits = |range: std::ops::Range<usize>| bytes[range].iter().all(u8::is_ascii_digit);

    match bytes.len() {
        4 => is_digits(0..4),
        7 => is_digits(0..4) && bytes[4] == b'-' && is_digits(5..7),
        10 => {
            is_digits(0..4)
                && bytes[4] == b'-'
                && is_digits(5..7)
                && bytes[7] == b'-'
                && is_digits(8..10)
        }
        _ => false,
    }
}

/// Split `YYYYMMDD_HHMMSS_rest` into its base filename, timestamp and remainder
fn split_timestamp_prefix(name: &str) -> Option<(&str, NaiveDateTime, &str)> {
    let bytes = name.as_bytes();
    if bytes.len() <= BASE_FILENAME_LEN || bytes[BASE_FILENAME_LEN] != b'_' {
        return None;
    }

    let well_formed = bytes[..BASE_FILENAME_LEN]
        .iter()
        .enumerate()
        .all(|(i, b)| match i {
            8 => *b == b'_',
            _ => b.is_ascii_digit(),
        });
    if !well_formed {
        return None;
    }

    // Prefix is ASCII, so these slices fall on char boundaries
    let number = |range: std::ops::Range<usize>| name[range].parse::<u32>().ok();

    let year = number(0..4)? as i32;
    let datetime = NaiveDate::from_ymd_opt(year, number(4..6)?, number(6..8)?)?.and_hms_opt(
        number(9..11)?,
        number(11..13)?,
        number(13..15)?,
    )?;

    Some((
        &name[..BASE_FILENAME_LEN],
        datetime,
        &name[BASE_FILENAME_LEN + 1..],
    ))
}

fn opt_char(c: Option<char>) -> String {
    c.map(String::from).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;

    fn datetime(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_time(NaiveTime::from_hms_opt(h, mi, s).unwrap())
    }

    #[test]
    fn test_parse_video_filenames() {
        for (filename, recording_type, direction) in [
            ("20181029_131513_NF.mp4", 'N', 'F'),
            ("20181029_131513_EF.mp4", 'E', 'F'),
            ("20181029_131513_PF.mp4", 'P', 'F'),
            ("20181029_131513_MF.mp4", 'M', 'F'),
            ("20181029_131513_NR.mp4", 'N', 'R'),
            ("20181029_131513_ER.mp4", 'E', 'R'),
            ("20181029_131513_PR.mp4", 'P', 'R'),
            ("20181029_131513_MR.mp4", 'M', 'R'),
            ("20181029_131513_BI.mp4", 'B', 'I'),
            ("20181029_131513_FO.mp4", 'F', 'O'),
        ] {
            let recording = Recording::parse(filename, Grouping::None).unwrap();
            assert_eq!(recording.filename, filename);
            assert_eq!(recording.base_filename, "20181029_131513");
            assert_eq!(recording.group_name, None);
            assert_eq!(recording.datetime, datetime(2018, 10, 29, 13, 15, 13));
            assert_eq!(recording.recording_type, recording_type);
            assert_eq!(recording.direction, Some(direction));
            assert_eq!(recording.upload_flag, None);
            assert_eq!(recording.extension, "mp4");
            assert!(recording.is_video());
        }
    }

    #[test]
    fn test_parse_companion_and_upload_flag() {
        let recording = Recording::parse("20190219_104220_NFL.thm", Grouping::None).unwrap();
        assert_eq!(recording.direction, Some('F'));
        assert_eq!(recording.upload_flag, Some('L'));
        assert!(!recording.is_video());

        let recording = Recording::parse("20190219_104220_ES.3gf", Grouping::None).unwrap();
        assert_eq!(recording.recording_type, 'E');
        assert_eq!(recording.direction, None);
        assert_eq!(recording.upload_flag, Some('S'));

        let recording = Recording::parse("20190219_104220_N.gps", Grouping::None).unwrap();
        assert_eq!(recording.direction, None);
        assert_eq!(recording.type_direction(), "N");
    }

    #[test]
    fn test_parse_rejects_non_recordings() {
        for filename in [
            "20181029_131513_NX.mp4",
            "20181029_131513_PX.mp4",
            "20181029_131513_PF.mp3",
            "20181029_131513_ZF.mp4",
            "20181029_131513_NFLS.mp4",
            "20181029_131513_NF.mp4.failed",
            "2018102_131513_NF.mp4",
            "20181029_13151_NF.mp4",
            "20181029-131513_NF.mp4",
            ".20181029_131513_NF.mp4",
            "20181029_131513_.mp4",
            "20181029_131513_NF",
            "invalid.gif",
            "",
            "2018102é_131513_NF.mp4",
        ] {
            assert_eq!(Recording::parse(filename, Grouping::None), None, "{}", filename);
        }
    }

    #[test]
    fn test_parse_rejects_impossible_dates() {
        assert_eq!(Recording::parse("20181332_131513_NF.mp4", Grouping::None), None);
        assert_eq!(Recording::parse("20181032_131513_NF.mp4", Grouping::None), None);
        assert_eq!(Recording::parse("20190229_131513_NF.mp4", Grouping::None), None);
        assert_eq!(Recording::parse("20181029_251513_NF.mp4", Grouping::None), None);
        assert_eq!(DownloadedRecording::parse("20181332_131513_NF.mp4", None), None);
    }

    #[test]
    fn test_parse_reproduces_filename() {
        for filename in [
            "20181029_131513_NF.mp4",
            "20200101_000000_MRS.mp4",
            "20231231_235959_YIL.thm",
            "20190219_104220_G.3gf",
        ] {
            let recording = Recording::parse(filename, Grouping::None).unwrap();
            let rebuilt = format!(
                "{}_{}{}.{}",
                recording.datetime.format("%Y%m%d_%H%M%S"),
                recording.type_direction(),
                opt_char(recording.upload_flag),
                recording.extension
            );
            assert_eq!(rebuilt, filename);
        }
    }

    #[test]
    fn test_companion_filenames() {
        let recording = Recording::parse("20190219_104220_NRL.mp4", Grouping::None).unwrap();
        assert_eq!(recording.thumbnail_filename(), "20190219_104220_NRL.thm");
        assert_eq!(recording.accelerometer_filename(), "20190219_104220_NL.3gf");
        assert_eq!(recording.gps_filename(), "20190219_104220_NL.gps");

        let recording = Recording::parse("20190219_104220_PF.mp4", Grouping::None).unwrap();
        assert_eq!(recording.thumbnail_filename(), "20190219_104220_PF.thm");
        assert_eq!(recording.accelerometer_filename(), "20190219_104220_P.3gf");
        assert_eq!(recording.gps_filename(), "20190219_104220_P.gps");
    }

    #[test]
    fn test_group_names() {
        let dt = datetime(2019, 2, 19, 13, 15, 13);
        assert_eq!(Grouping::None.group_name(dt), None);
        assert_eq!(Grouping::Daily.group_name(dt).as_deref(), Some("2019-02-19"));
        assert_eq!(Grouping::Weekly.group_name(dt).as_deref(), Some("2019-02-18"));
        assert_eq!(Grouping::Monthly.group_name(dt).as_deref(), Some("2019-02"));
        assert_eq!(Grouping::Yearly.group_name(dt).as_deref(), Some("2019"));

        let recording = Recording::parse("20190219_131513_NF.mp4", Grouping::Weekly).unwrap();
        assert_eq!(recording.group_name.as_deref(), Some("2019-02-18"));
    }

    #[test]
    fn test_group_name_relationships() {
        let mut day = NaiveDate::from_ymd_opt(2018, 12, 20).unwrap();
        for _ in 0..30 {
            let dt = day.and_hms_opt(8, 0, 0).unwrap();
            let daily = Grouping::Daily.group_name(dt).unwrap();
            let weekly = Grouping::Weekly.group_name(dt).unwrap();

            if day.weekday() == chrono::Weekday::Mon {
                assert_eq!(daily, weekly);
            }
            assert!(weekly <= daily);
            assert!(daily.starts_with(&Grouping::Monthly.group_name(dt).unwrap()));
            assert!(daily.starts_with(&Grouping::Yearly.group_name(dt).unwrap()));
            day = day.succ_opt().unwrap();
        }

        // Weeks straddling a year boundary group under the previous year's Monday
        let dt = datetime(2019, 1, 1, 0, 0, 0);
        assert_eq!(Grouping::Weekly.group_name(dt).as_deref(), Some("2018-12-31"));
    }

    #[test]
    fn test_downloaded_recording_is_permissive() {
        let downloaded =
            DownloadedRecording::parse("20181029_131513_QZ.future", Some("2018-10-29")).unwrap();
        assert_eq!(downloaded.base_filename, "20181029_131513");
        assert_eq!(downloaded.group_name.as_deref(), Some("2018-10-29"));
        assert_eq!(downloaded.datetime, datetime(2018, 10, 29, 13, 15, 13));

        assert!(DownloadedRecording::parse("20181029_131513_NF.mp4", None).is_some());
        assert!(DownloadedRecording::parse("20181029_131513", None).is_none());
        assert!(DownloadedRecording::parse(".20181029_131513_NF.mp4", None).is_none());
        assert!(DownloadedRecording::parse(".blackvuesync.lock", None).is_none());
    }

    #[test]
    fn test_group_name_grammar() {
        assert!(is_group_name("2019"));
        assert!(is_group_name("2019-02"));
        assert!(is_group_name("2019-02-18"));
        assert!(!is_group_name("201"));
        assert!(!is_group_name("2019-2-18"));
        assert!(!is_group_name("photos"));
        assert!(!is_group_name("2019_02_18"));
    }
}
