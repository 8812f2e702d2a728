use chrono::{NaiveDate, NaiveDateTime};
use regex::{Captures, Regex};
use std::sync::LazyLock;

/// Calendar fields recovered from a filename. Date-only patterns leave the time fields empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateComponents {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub hour: Option<u32>,
    pub minute: Option<u32>,
    pub second: Option<u32>,
}

impl DateComponents {
    /// Build a local datetime; missing time fields become midnight.
    pub fn to_datetime(&self) -> Option<NaiveDateTime> {
        NaiveDate::from_ymd_opt(self.year, self.month, self.day)?.and_hms_opt(
            self.hour.unwrap_or(0),
            self.minute.unwrap_or(0),
            self.second.unwrap_or(0),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PatternKind {
    StandardCamera,
    ScreenshotMacos,
    Whatsapp,
    GenericDash,
    GenericCompact,
}

struct FilenamePattern {
    kind: PatternKind,
    regex: &'static LazyLock<Regex>,
    has_time: bool,
}

// IMG_20240315_143045.jpg, GOPR cameras
static RE_STANDARD_CAMERA: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)([0-9]{4})([0-9]{2})([0-9]{2})_([0-9]{2})([0-9]{2})([0-9]{2})").unwrap()
});
// Screenshot 2024-03-15 at 14.30.45.png
static RE_SCREENSHOT_MACOS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)([0-9]{4})-([0-9]{2})-([0-9]{2})\s+at\s+([0-9]{1,2})\.([0-9]{2})\.([0-9]{2})")
        .unwrap()
});
// IMG-20240315-WA0001.jpg
static RE_WHATSAPP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)([0-9]{4})([0-9]{2})([0-9]{2})-WA[0-9]+").unwrap());
static RE_GENERIC_DASH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)([0-9]{4})-([0-9]{2})-([0-9]{2})").unwrap());
// The trailing group stands in for a "not followed by a digit" lookahead.
static RE_GENERIC_COMPACT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)([0-9]{4})([0-9]{2})([0-9]{2})(?:[^0-9]|$)").unwrap());
static RE_CAMERA_TIME_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^_[0-9]{6}").unwrap());

static PATTERNS: &[FilenamePattern] = &[
    FilenamePattern { kind: PatternKind::StandardCamera, regex: &RE_STANDARD_CAMERA, has_time: true },
    FilenamePattern { kind: PatternKind::ScreenshotMacos, regex: &RE_SCREENSHOT_MACOS, has_time: true },
    FilenamePattern { kind: PatternKind::Whatsapp, regex: &RE_WHATSAPP, has_time: false },
    FilenamePattern { kind: PatternKind::GenericDash, regex: &RE_GENERIC_DASH, has_time: false },
    FilenamePattern { kind: PatternKind::GenericCompact, regex: &RE_GENERIC_COMPACT, has_time: false },
];

pub fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

pub fn days_in_month(month: u32, year: i32) -> u32 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 if is_leap_year(year) => 29,
        2 => 28,
        _ => 0,
    }
}

/// Calendar check used for every filename-derived date. Years outside 1970..=2100 are rejected.
pub fn is_valid_date(year: i32, month: u32, day: u32) -> bool {
    if !(1970..=2100).contains(&year) {
        return false;
    }
    if !(1..=12).contains(&month) {
        return false;
    }
    day >= 1 && day <= days_in_month(month, year)
}

fn is_valid_time(hour: u32, minute: u32, second: u32) -> bool {
    hour <= 23 && minute <= 59 && second <= 59
}

fn field(caps: &Captures, idx: usize) -> Option<u32> {
    caps.get(idx)?.as_str().parse().ok()
}

fn extract(caps: &Captures, has_time: bool) -> Option<DateComponents> {
    let year = field(caps, 1)? as i32;
    let month = field(caps, 2)?;
    let day = field(caps, 3)?;
    if !is_valid_date(year, month, day) {
        return None;
    }

    if !has_time {
        return Some(DateComponents { year, month, day, hour: None, minute: None, second: None });
    }

    let (hour, minute, second) = (field(caps, 4)?, field(caps, 5)?, field(caps, 6)?);
    if !is_valid_time(hour, minute, second) {
        return None;
    }
    Some(DateComponents {
        year,
        month,
        day,
        hour: Some(hour),
        minute: Some(minute),
        second: Some(second),
    })
}

/// Scan a filename (or path; only the last segment is used) for a known camera/app naming
/// convention. Patterns are tried in order and the first valid one wins.
pub fn parse_filename(filename: &str) -> Option<DateComponents> {
    let basename = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    if basename.is_empty() {
        return None;
    }

    for pat in PATTERNS {
        let Some(caps) = pat.regex.captures(basename) else {
            continue;
        };
        let Some(result) = extract(&caps, pat.has_time) else {
            continue;
        };

        if pat.kind == PatternKind::GenericCompact {
            // YYYYMMDD_HHMMSS whose time part failed validation above is not a plain date.
            let start = caps.get(1).map_or(0, |m| m.start());
            if RE_CAMERA_TIME_SUFFIX.is_match(&basename[start + 8..]) {
                continue;
            }
        }
        return Some(result);
    }

    None
}
