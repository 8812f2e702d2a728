pub mod archive;
pub mod batch;
pub mod date;
pub mod error;
pub mod export;
pub mod media;
pub mod render;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::NaiveDateTime;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::batch::{BatchProcessor, ImageCrateDecoder, ImageStatus};
use crate::date::exif::ExifMetadata;
use crate::date::{format_timestamp, ResolveOptions, TimestampResolver, TimestampResult};
use crate::export::ExportOptions;
use crate::media::{MemoryStore, PhotoFile};
use crate::render::{BlockPainter, FontPainter, Renderer, TextPainter, TimestampConfig};

pub use archive::{create_archive, write_to_directory, ArchiveEntry};
pub use batch::{BatchCallbacks, BatchOptions, ImageId, ProcessedImage};
pub use error::{ConfigError, ExportError, ProcessError};
pub use export::{encode_image, export_completed, suggest_filename, ExportFormat};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessOptions {
    /// Image files and directories (searched recursively)
    pub inputs: Vec<PathBuf>,
    /// Write stamped images into this directory
    pub output: Option<PathBuf>,
    /// Write stamped images into this ZIP file
    pub zip: Option<PathBuf>,
    pub config: TimestampConfig,
    pub export: ExportOptions,
    pub resolve: ResolveOptions,
    /// Use this date for every image instead of resolving one
    pub manual_date: Option<NaiveDateTime>,
    /// Resolve each image on its own instead of broadcasting the first image's date
    pub per_image: bool,
    /// TrueType/OpenType font; the system monospace face or built-in glyphs otherwise
    pub font: Option<PathBuf>,
    /// Overwrite same-named files in `output`
    pub force: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessResult {
    pub total: u64,
    pub completed: u64,
    pub failed: u64,
    pub written: u64,
    /// Images left without a date; these are not written
    pub unresolved: u64,
}

/// Type alias for progress callback: (stage, current, total, message)
pub type ProgressCallback = dyn Fn(&str, u64, u64, &str) + Send + Sync;

const PROGRESS_INTERVAL: Duration = Duration::from_millis(200);

/// Forwards at most one report per interval, plus the last one of every stage.
pub struct ThrottledProgress<'a> {
    inner: &'a ProgressCallback,
    last_emit: Mutex<Option<Instant>>,
}

impl<'a> ThrottledProgress<'a> {
    pub fn new(inner: &'a ProgressCallback) -> Self {
        Self {
            inner,
            last_emit: Mutex::new(None),
        }
    }

    pub fn report(&self, stage: &str, current: u64, total: u64, message: &str) {
        if current + 1 < total {
            let mut last = self.last_emit.lock().unwrap_or_else(PoisonError::into_inner);
            if last.is_some_and(|t| t.elapsed() < PROGRESS_INTERVAL) {
                return;
            }
            *last = Some(Instant::now());
        }
        (self.inner)(stage, current, total, message);
    }
}

/// Explicit font, then a system monospace face, then the built-in block glyphs.
pub fn load_painter(font: Option<&Path>) -> anyhow::Result<Arc<dyn TextPainter>> {
    if let Some(path) = font {
        let painter = FontPainter::from_path(path)
            .map_err(|e| anyhow::anyhow!("Failed to load font {}: {}", path.display(), e))?;
        return Ok(Arc::new(painter));
    }
    match FontPainter::system_default() {
        Some(painter) => Ok(Arc::new(painter)),
        None => {
            log::warn!("No system font found; using built-in glyphs");
            Ok(Arc::new(BlockPainter))
        }
    }
}

/// Load, date, stamp and export a set of photos.
pub fn process(options: &ProcessOptions, progress: &ProgressCallback) -> anyhow::Result<ProcessResult> {
    let progress = ThrottledProgress::new(progress);
    if options.output.is_none() && options.zip.is_none() {
        anyhow::bail!("Nothing to write: give an output directory or a ZIP path");
    }
    options.config.validate()?;
    options.export.validate()?;

    let paths = media::collect_images(&options.inputs)?;
    if paths.is_empty() {
        anyhow::bail!("No images found");
    }
    let total = paths.len() as u64;
    log::info!("Found {} image(s)", total);

    let files: Vec<PhotoFile> = paths
        .par_iter()
        .map(|p| PhotoFile::open(p).map_err(|e| anyhow::anyhow!("{}: {}", p.display(), e)))
        .collect::<anyhow::Result<_>>()?;
    progress.report("load", total - 1, total, "");

    let renderer = Renderer::new(load_painter(options.font.as_deref())?);
    let batch = BatchProcessor::new(Arc::new(MemoryStore::new()), Arc::new(ImageCrateDecoder), renderer)
        .with_default_config(options.config.clone());
    let ids = batch.add_images(files.clone());

    let resolver = TimestampResolver::with_options(Arc::new(ExifMetadata), options.resolve);
    let format = options.config.format;
    let mut unresolved = 0u64;

    if options.per_image && options.manual_date.is_none() {
        for (i, (id, file)) in ids.iter().zip(&files).enumerate() {
            let result = resolver.resolve(Some(file));
            match result.date {
                Some(date) => {
                    batch.update_timestamp(*id, Some(format_timestamp(&date, format)), result.source);
                }
                None => {
                    log::warn!("{}: no capture date found", file.name);
                    unresolved += 1;
                }
            }
            progress.report("resolve", i as u64, total, &file.name);
        }
    } else {
        let result = match options.manual_date {
            Some(_) => TimestampResult::default().with_override(options.manual_date),
            None => resolver.resolve(files.first()),
        };
        match result.date {
            Some(date) => {
                let text = format_timestamp(&date, format);
                log::info!("Using {} ({}, {} confidence)", text, result.source, result.confidence());
                batch.update_timestamp_for_all(Some(text), result.source);
            }
            None => {
                log::warn!("No capture date found for {}; set one manually", files[0].name);
                unresolved = total;
            }
        }
        progress.report("resolve", total - 1, total, "");
    }

    batch.start_processing_with(&|done, run| {
        progress.report("render", done as u64 - 1, run as u64, "");
    });

    let images = batch.images();
    let completed = images.iter().filter(|img| img.status == ImageStatus::Completed).count() as u64;
    let failed = images.iter().filter(|img| img.status == ImageStatus::Error).count() as u64;

    // Only dated images are written.
    let (stamped, unstamped): (Vec<_>, Vec<_>) = images.into_iter().partition(|img| img.timestamp.is_some());
    let skipped = unstamped.iter().filter(|img| img.is_exportable()).count();
    if skipped > 0 {
        log::warn!("Skipping {} image(s) with no capture date", skipped);
    }
    let entries = export::export_completed(&stamped, &options.export)?;
    let mut written = 0u64;
    if !entries.is_empty() {
        if let Some(dir) = &options.output {
            written = write_to_directory(&entries, dir, options.force)?.len() as u64;
        }
        if let Some(zip_path) = &options.zip {
            let report = |percent: u8| progress.report("zip", percent as u64, 100, "");
            let bytes = create_archive(&entries, Some(&report))?;
            if let Some(parent) = zip_path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(zip_path, bytes)?;
            log::info!("Wrote {}", zip_path.display());
            if options.output.is_none() {
                written = entries.len() as u64;
            }
        }
    } else {
        log::warn!("No images were stamped; nothing written");
    }

    batch.clear_all();
    Ok(ProcessResult {
        total,
        completed,
        failed,
        written,
        unresolved,
    })
}
