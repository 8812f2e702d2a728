pub mod exif;
pub mod filename;
pub mod format;
pub mod resolver;

use serde::{Deserialize, Serialize};

pub use format::{format_timestamp, parse_manual_date, DateFormat};
pub use resolver::{ResolveOptions, TimestampResolver, TimestampResult};

/// Where a resolved capture date came from, most trusted first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DateSource {
    ExifDatetimeOriginal,
    ExifCreateDate,
    ExifModifyDate,
    Filename,
    FileModified,
    UserInput,
    #[default]
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    #[default]
    None,
    Low,
    Medium,
    High,
}

impl DateSource {
    /// Confidence is fixed by the source; there is no other way to obtain one.
    pub fn confidence(self) -> Confidence {
        match self {
            DateSource::ExifDatetimeOriginal | DateSource::ExifCreateDate | DateSource::UserInput => {
                Confidence::High
            }
            DateSource::ExifModifyDate | DateSource::Filename => Confidence::Medium,
            DateSource::FileModified => Confidence::Low,
            DateSource::None => Confidence::None,
        }
    }

    /// Embedded metadata or filename: sources that describe the photo itself.
    pub fn is_content_derived(self) -> bool {
        matches!(
            self,
            DateSource::ExifDatetimeOriginal
                | DateSource::ExifCreateDate
                | DateSource::ExifModifyDate
                | DateSource::Filename
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DateSource::ExifDatetimeOriginal => "exif-datetime-original",
            DateSource::ExifCreateDate => "exif-create-date",
            DateSource::ExifModifyDate => "exif-modify-date",
            DateSource::Filename => "filename",
            DateSource::FileModified => "file-modified",
            DateSource::UserInput => "user-input",
            DateSource::None => "none",
        }
    }
}

impl std::fmt::Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Confidence::None => "none",
            Confidence::Low => "low",
            Confidence::Medium => "medium",
            Confidence::High => "high",
        })
    }
}

impl std::fmt::Display for DateSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_mapping() {
        let cases = [
            (DateSource::ExifDatetimeOriginal, Confidence::High),
            (DateSource::ExifCreateDate, Confidence::High),
            (DateSource::UserInput, Confidence::High),
            (DateSource::ExifModifyDate, Confidence::Medium),
            (DateSource::Filename, Confidence::Medium),
            (DateSource::FileModified, Confidence::Low),
            (DateSource::None, Confidence::None),
        ];
        for (source, confidence) in cases {
            assert_eq!(source.confidence(), confidence, "{}", source);
        }
    }

    #[test]
    fn test_wire_names() {
        for source in [
            DateSource::ExifDatetimeOriginal,
            DateSource::ExifCreateDate,
            DateSource::ExifModifyDate,
            DateSource::Filename,
            DateSource::FileModified,
            DateSource::UserInput,
            DateSource::None,
        ] {
            let json = serde_json::to_string(&source).unwrap();
            assert_eq!(json, format!("\"{}\"", source.as_str()));
        }
        assert_eq!(serde_json::to_string(&Confidence::Medium).unwrap(), "\"medium\"");
    }
}
