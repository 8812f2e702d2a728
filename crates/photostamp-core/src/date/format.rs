use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DateFormat {
    #[default]
    #[serde(rename = "YYYY/MM/DD")]
    YmdSlash,
    #[serde(rename = "YYYY-MM-DD")]
    YmdDash,
    #[serde(rename = "DD/MM/YYYY")]
    Dmy,
    #[serde(rename = "MM/DD/YYYY")]
    Mdy,
    #[serde(rename = "YYYY/MM/DD HH:mm:ss")]
    YmdSlashTime,
    #[serde(rename = "YYYY-MM-DD HH:mm:ss")]
    YmdDashTime,
    #[serde(rename = "DD/MM/YYYY HH:mm:ss")]
    DmyTime,
    #[serde(rename = "MM/DD/YYYY HH:mm:ss")]
    MdyTime,
}

impl DateFormat {
    pub const ALL: [DateFormat; 8] = [
        DateFormat::YmdSlash,
        DateFormat::YmdDash,
        DateFormat::Dmy,
        DateFormat::Mdy,
        DateFormat::YmdSlashTime,
        DateFormat::YmdDashTime,
        DateFormat::DmyTime,
        DateFormat::MdyTime,
    ];

    /// The user-facing pattern, e.g. `YYYY/MM/DD HH:mm:ss`.
    pub fn pattern(self) -> &'static str {
        match self {
            DateFormat::YmdSlash => "YYYY/MM/DD",
            DateFormat::YmdDash => "YYYY-MM-DD",
            DateFormat::Dmy => "DD/MM/YYYY",
            DateFormat::Mdy => "MM/DD/YYYY",
            DateFormat::YmdSlashTime => "YYYY/MM/DD HH:mm:ss",
            DateFormat::YmdDashTime => "YYYY-MM-DD HH:mm:ss",
            DateFormat::DmyTime => "DD/MM/YYYY HH:mm:ss",
            DateFormat::MdyTime => "MM/DD/YYYY HH:mm:ss",
        }
    }

    fn chrono_format(self) -> &'static str {
        match self {
            DateFormat::YmdSlash => "%Y/%m/%d",
            DateFormat::YmdDash => "%Y-%m-%d",
            DateFormat::Dmy => "%d/%m/%Y",
            DateFormat::Mdy => "%m/%d/%Y",
            DateFormat::YmdSlashTime => "%Y/%m/%d %H:%M:%S",
            DateFormat::YmdDashTime => "%Y-%m-%d %H:%M:%S",
            DateFormat::DmyTime => "%d/%m/%Y %H:%M:%S",
            DateFormat::MdyTime => "%m/%d/%Y %H:%M:%S",
        }
    }
}

impl std::str::FromStr for DateFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DateFormat::ALL
            .into_iter()
            .find(|f| f.pattern() == s)
            .ok_or_else(|| format!("unknown date format '{}'", s))
    }
}

impl std::fmt::Display for DateFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.pattern())
    }
}

/// Render a datetime as the overlay text.
pub fn format_timestamp(date: &NaiveDateTime, format: DateFormat) -> String {
    date.format(format.chrono_format()).to_string()
}

/// Parse a manually entered date (`YYYY-MM-DD`) with an optional `HH:MM` time.
pub fn parse_manual_date(date: &str, time: Option<&str>) -> Option<NaiveDateTime> {
    let day = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d").ok()?;
    let time = match time.map(str::trim).filter(|t| !t.is_empty()) {
        Some(t) => NaiveTime::parse_from_str(t, "%H:%M").ok()?,
        None => NaiveTime::MIN,
    };
    Some(day.and_time(time))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 5)
            .unwrap()
            .and_hms_opt(7, 8, 9)
            .unwrap()
    }

    #[test]
    fn test_all_formats() {
        let d = sample();
        let expected = [
            "2024/03/05",
            "2024-03-05",
            "05/03/2024",
            "03/05/2024",
            "2024/03/05 07:08:09",
            "2024-03-05 07:08:09",
            "05/03/2024 07:08:09",
            "03/05/2024 07:08:09",
        ];
        for (format, want) in DateFormat::ALL.into_iter().zip(expected) {
            assert_eq!(format_timestamp(&d, format), want, "{}", format);
        }
    }

    #[test]
    fn test_format_names_round_trip() {
        for format in DateFormat::ALL {
            assert_eq!(format.pattern().parse::<DateFormat>(), Ok(format));
            let json = serde_json::to_string(&format).unwrap();
            assert_eq!(json, format!("\"{}\"", format.pattern()));
        }
        assert!("YYYY.MM.DD".parse::<DateFormat>().is_err());
    }

    #[test]
    fn test_manual_date() {
        let d = parse_manual_date("2024-03-15", Some("14:30")).unwrap();
        assert_eq!(d.to_string(), "2024-03-15 14:30:00");
        let d = parse_manual_date("2024-03-15", None).unwrap();
        assert_eq!(d.to_string(), "2024-03-15 00:00:00");
        let d = parse_manual_date(" 2024-03-15 ", Some("")).unwrap();
        assert_eq!(d.to_string(), "2024-03-15 00:00:00");
        assert!(parse_manual_date("2024-02-30", None).is_none());
        assert!(parse_manual_date("2024-03-15", Some("25:00")).is_none());
        assert!(parse_manual_date("", None).is_none());
    }
}
