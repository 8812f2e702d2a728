use chrono::NaiveDateTime;
use exif::{In, Reader, Tag};
use std::io::Cursor;

use crate::media::PhotoFile;

/// Candidate capture dates found in embedded metadata, highest priority first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawMetadata {
    /// EXIF DateTimeOriginal
    pub original_capture: Option<NaiveDateTime>,
    /// EXIF DateTimeDigitized (CreateDate)
    pub created: Option<NaiveDateTime>,
    /// EXIF DateTime (ModifyDate)
    pub modified: Option<NaiveDateTime>,
}

impl RawMetadata {
    pub fn is_empty(&self) -> bool {
        self.original_capture.is_none() && self.created.is_none() && self.modified.is_none()
    }
}

/// Embedded-metadata reader. May fail or return nothing for files it cannot parse.
pub trait MetadataSource: Send + Sync {
    fn extract(&self, file: &PhotoFile) -> anyhow::Result<Option<RawMetadata>>;
}

/// Reads EXIF from any container kamadak-exif understands (JPEG, TIFF, PNG, WebP, HEIF).
#[derive(Debug, Clone, Copy, Default)]
pub struct ExifMetadata;

impl MetadataSource for ExifMetadata {
    fn extract(&self, file: &PhotoFile) -> anyhow::Result<Option<RawMetadata>> {
        let reader = Reader::new().read_from_container(&mut Cursor::new(&file.data[..]))?;
        let field = |tag: Tag| {
            reader
                .get_field(tag, In::PRIMARY)
                .and_then(|f| parse_exif_datetime(&f.display_value().to_string()))
        };

        let meta = RawMetadata {
            original_capture: field(Tag::DateTimeOriginal),
            created: field(Tag::DateTimeDigitized),
            modified: field(Tag::DateTime),
        };
        Ok((!meta.is_empty()).then_some(meta))
    }
}

/// Query the metadata source, folding a failure and an empty result into `None`.
pub fn extract_metadata(source: &dyn MetadataSource, file: &PhotoFile) -> Option<RawMetadata> {
    match source.extract(file) {
        Ok(Some(meta)) if !meta.is_empty() => Some(meta),
        Ok(_) => {
            log::debug!("{}: no usable metadata dates", file.name);
            None
        }
        Err(e) => {
            log::debug!("{}: metadata unreadable: {}", file.name, e);
            None
        }
    }
}

/// EXIF datetimes have no timezone info - they are local time as-is.
fn parse_exif_datetime(s: &str) -> Option<NaiveDateTime> {
    let cleaned = s
        .replace('-', ":")
        .replace('/', ":")
        .replace('\\', ":")
        .replace('.', ":");

    if let Ok(dt) = NaiveDateTime::parse_from_str(&cleaned, "%Y:%m:%d %H:%M:%S") {
        return Some(dt);
    }

    let day = cleaned.split(' ').next()?;
    chrono::NaiveDate::parse_from_str(day, "%Y:%m:%d")
        .ok()?
        .and_hms_opt(0, 0, 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Failing;

    impl MetadataSource for Failing {
        fn extract(&self, _file: &PhotoFile) -> anyhow::Result<Option<RawMetadata>> {
            anyhow::bail!("corrupt segment")
        }
    }

    struct Fixed(Option<RawMetadata>);

    impl MetadataSource for Fixed {
        fn extract(&self, _file: &PhotoFile) -> anyhow::Result<Option<RawMetadata>> {
            Ok(self.0)
        }
    }

    #[test]
    fn test_parse_exif_datetime_variants() {
        let want = "2023-06-01 12:34:56";
        assert_eq!(parse_exif_datetime("2023:06:01 12:34:56").unwrap().to_string(), want);
        assert_eq!(parse_exif_datetime("2023-06-01 12:34:56").unwrap().to_string(), want);
        assert_eq!(
            parse_exif_datetime("2023:06:01 garbage").unwrap().to_string(),
            "2023-06-01 00:00:00"
        );
        assert!(parse_exif_datetime("    :  :     :  :  ").is_none());
    }

    #[test]
    fn test_gateway_folds_errors_and_empty() {
        let file = PhotoFile::new("a.jpg", vec![0u8; 4]);
        assert!(extract_metadata(&Failing, &file).is_none());
        assert!(extract_metadata(&Fixed(None), &file).is_none());
        assert!(extract_metadata(&Fixed(Some(RawMetadata::default())), &file).is_none());

        let modified = parse_exif_datetime("2020:01:02 03:04:05");
        let meta = RawMetadata { modified, ..Default::default() };
        assert_eq!(extract_metadata(&Fixed(Some(meta)), &file), Some(meta));
    }

    #[test]
    fn test_exif_reader_rejects_non_image_bytes() {
        let file = PhotoFile::new("a.jpg", b"definitely not a jpeg".to_vec());
        assert!(ExifMetadata.extract(&file).is_err());
    }
}
