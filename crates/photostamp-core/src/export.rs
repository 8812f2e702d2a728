use std::io::Cursor;
use std::str::FromStr;

use image::codecs::jpeg::JpegEncoder;
use image::codecs::webp::WebPEncoder;
use image::{ExtendedColorType, Pixel, RgbImage, RgbaImage};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::archive::ArchiveEntry;
use crate::batch::ProcessedImage;
use crate::date::DateSource;
use crate::error::{ConfigError, ExportError};
use crate::media::PhotoFile;

/// Upload names browsers and clipboards hand out; never worth keeping.
const GENERIC_NAMES: &[&str] = &["blob", "image.jpg", "image.png", "image.jpeg", "image.webp"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Jpeg,
    Webp,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Jpeg => "jpg",
            ExportFormat::Webp => "webp",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "jpeg" | "jpg" => Ok(ExportFormat::Jpeg),
            "webp" => Ok(ExportFormat::Webp),
            other => Err(format!("unknown export format '{}' (expected jpeg or webp)", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportOptions {
    /// 0..=1; used by JPEG only
    pub quality: f32,
    pub format: ExportFormat,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            quality: 0.85,
            format: ExportFormat::Jpeg,
        }
    }
}

impl ExportOptions {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.quality) {
            return Err(ConfigError::Quality(self.quality));
        }
        Ok(())
    }
}

pub fn encode_image(surface: &RgbaImage, options: &ExportOptions) -> Result<Vec<u8>, ExportError> {
    let (width, height) = surface.dimensions();
    if width == 0 || height == 0 {
        return Err(ExportError::EmptySurface);
    }

    let mut out = Cursor::new(Vec::new());
    match options.format {
        ExportFormat::Jpeg => {
            // JPEG has no alpha channel.
            let rgb = RgbImage::from_fn(width, height, |x, y| surface.get_pixel(x, y).to_rgb());
            let quality = (options.quality.clamp(0.0, 1.0) * 100.0).round().max(1.0) as u8;
            JpegEncoder::new_with_quality(&mut out, quality).encode_image(&rgb)?;
        }
        ExportFormat::Webp => {
            WebPEncoder::new_lossless(&mut out).encode(surface.as_raw(), width, height, ExtendedColorType::Rgba8)?;
        }
    }
    Ok(out.into_inner())
}

/// Name without extension, or the whole name when it has none.
fn basename(name: &str) -> &str {
    match name.rfind('.') {
        Some(idx) => &name[..idx],
        None => name,
    }
}

fn is_generic_name(name: &str) -> bool {
    let lower = name.to_lowercase();
    GENERIC_NAMES.contains(&lower.as_str())
}

fn sanitize_timestamp(text: &str) -> String {
    text.chars()
        .map(|c| if matches!(c, '/' | ':' | '.' | '-') || c.is_whitespace() { '_' } else { c })
        .collect()
}

/// Short content hash, stable for identical bytes.
fn content_hash(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    hex::encode(&digest[..6])
}

/// Export name without extension.
///
/// The original name wins unless it is a generic placeholder. After that a timestamp taken from the
/// photo itself (EXIF or filename) becomes `IMG_<timestamp>`; anything else falls back to
/// `IMG_<12 hex chars of SHA-256>`.
pub fn suggest_filename(file: &PhotoFile, timestamp: Option<&str>, source: DateSource) -> String {
    let base = basename(&file.name);
    if !base.is_empty() && !is_generic_name(&file.name) {
        return format!("{}_timestamped", base);
    }

    if let Some(text) = timestamp.filter(|t| !t.is_empty()) {
        if source.is_content_derived() {
            return format!("IMG_{}", sanitize_timestamp(text));
        }
    }

    format!("IMG_{}", content_hash(&file.data))
}

/// Encode every exportable entry. Fails as a whole if any entry fails to encode.
pub fn export_completed(images: &[ProcessedImage], options: &ExportOptions) -> Result<Vec<ArchiveEntry>, ExportError> {
    let ext = options.format.extension();
    images
        .par_iter()
        .filter_map(|img| img.surface.as_ref().filter(|_| img.is_exportable()).map(|s| (img, s)))
        .map(|(img, surface)| -> Result<ArchiveEntry, ExportError> {
            let data = encode_image(surface, options)?;
            let stem = suggest_filename(&img.file, img.timestamp.as_deref(), img.date_source);
            Ok(ArchiveEntry {
                filename: format!("{}.{}", stem, ext),
                data,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn surface(w: u32, h: u32) -> RgbaImage {
        RgbaImage::from_fn(w, h, |x, y| Rgba([(x * 7) as u8, (y * 5) as u8, 90, 255]))
    }

    #[test]
    fn test_encode_jpeg_and_webp() {
        let img = surface(32, 24);

        let jpeg = encode_image(&img, &ExportOptions::default()).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (32, 24));

        let webp = encode_image(
            &img,
            &ExportOptions {
                format: ExportFormat::Webp,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(&webp[..4], b"RIFF");
        assert_eq!(&webp[8..12], b"WEBP");
        // Lossless: pixels survive.
        assert_eq!(image::load_from_memory(&webp).unwrap().to_rgba8(), img);
    }

    #[test]
    fn test_quality_affects_jpeg_size() {
        let img = surface(64, 64);
        let low = encode_image(&img, &ExportOptions { quality: 0.1, ..Default::default() }).unwrap();
        let high = encode_image(&img, &ExportOptions { quality: 1.0, ..Default::default() }).unwrap();
        assert!(low.len() < high.len());
    }

    #[test]
    fn test_encode_rejects_empty_surface() {
        let err = encode_image(&RgbaImage::new(0, 10), &ExportOptions::default()).unwrap_err();
        assert!(matches!(err, ExportError::EmptySurface));
        assert_eq!(err.to_string(), "Invalid canvas dimensions");
    }

    #[test]
    fn test_options() {
        assert_eq!(ExportOptions::default().quality, 0.85);
        assert!(ExportOptions { quality: 1.5, ..Default::default() }.validate().is_err());
        assert!(ExportOptions::default().validate().is_ok());
        assert_eq!("JPG".parse::<ExportFormat>().unwrap(), ExportFormat::Jpeg);
        assert_eq!("webp".parse::<ExportFormat>().unwrap(), ExportFormat::Webp);
        assert!("gif".parse::<ExportFormat>().is_err());
        let opts: ExportOptions = serde_json::from_str(r#"{"format":"webp"}"#).unwrap();
        assert_eq!(opts.format, ExportFormat::Webp);
        assert_eq!(opts.quality, 0.85);
    }

    #[test]
    fn test_suggest_keeps_original_name() {
        let file = PhotoFile::new("IMG_1234.HEIC.jpg", vec![1, 2, 3]);
        assert_eq!(
            suggest_filename(&file, Some("2024/03/15"), DateSource::ExifDatetimeOriginal),
            "IMG_1234.HEIC_timestamped"
        );
        let file = PhotoFile::new("holiday", vec![1]);
        assert_eq!(suggest_filename(&file, None, DateSource::None), "holiday_timestamped");
    }

    #[test]
    fn test_suggest_generic_uses_timestamp() {
        let file = PhotoFile::new("Image.JPG", vec![1, 2, 3]);
        assert_eq!(
            suggest_filename(&file, Some("2024/03/15 14:30:45"), DateSource::Filename),
            "IMG_2024_03_15_14_30_45"
        );
        assert_eq!(
            suggest_filename(&file, Some("15-03-2024"), DateSource::ExifModifyDate),
            "IMG_15_03_2024"
        );
    }

    #[test]
    fn test_suggest_hash_fallback() {
        let blob = PhotoFile::new("blob", b"same bytes".to_vec());
        let name = suggest_filename(&blob, None, DateSource::None);
        assert!(name.starts_with("IMG_"));
        let hex_part = &name[4..];
        assert_eq!(hex_part.len(), 12);
        assert!(hex_part.chars().all(|c| c.is_ascii_hexdigit()));

        let again = PhotoFile::new("image.png", b"same bytes".to_vec());
        assert_eq!(suggest_filename(&again, None, DateSource::None), name);
        let other = PhotoFile::new("blob", b"other bytes".to_vec());
        assert_ne!(suggest_filename(&other, None, DateSource::None), name);

        // Low-trust sources do not name files.
        assert_eq!(
            suggest_filename(&blob, Some("2024/03/15"), DateSource::FileModified),
            name
        );
        assert_eq!(suggest_filename(&blob, Some("2024/03/15"), DateSource::UserInput), name);
        let dotfile = PhotoFile::new(".jpg", b"same bytes".to_vec());
        assert_eq!(suggest_filename(&dotfile, None, DateSource::None), name);
    }

    #[test]
    fn test_content_hash_prefix() {
        // SHA-256("abc") = ba7816bf8f01cfea...
        assert_eq!(content_hash(b"abc"), "ba7816bf8f01");
    }
}
