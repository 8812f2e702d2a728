use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::exif::{extract_metadata, MetadataSource, RawMetadata};
use super::filename::parse_filename;
use super::{Confidence, DateSource};
use crate::media::PhotoFile;

/// Which fallback tiers may be used after embedded metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolveOptions {
    pub enable_filename_parser: bool,
    pub enable_file_modified: bool,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            enable_filename_parser: true,
            enable_file_modified: true,
        }
    }
}

/// Outcome of resolving one file's capture date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimestampResult {
    pub date: Option<NaiveDateTime>,
    pub source: DateSource,
    /// True only while the metadata query is outstanding
    pub loading: bool,
    /// Every tier was tried and none produced a date
    pub needs_user_input: bool,
}

impl TimestampResult {
    fn resolved(date: NaiveDateTime, source: DateSource) -> Self {
        Self {
            date: Some(date),
            source,
            loading: false,
            needs_user_input: false,
        }
    }

    fn unresolved() -> Self {
        Self {
            needs_user_input: true,
            ..Self::default()
        }
    }

    pub fn confidence(&self) -> Confidence {
        self.source.confidence()
    }

    /// A manually entered date wins over whatever was resolved.
    pub fn with_override(self, manual: Option<NaiveDateTime>) -> Self {
        match manual {
            Some(date) => Self::resolved(date, DateSource::UserInput),
            None => self,
        }
    }
}

/// The synchronous part of the waterfall, run once the metadata query has settled.
pub fn resolve_with_metadata(
    metadata: Option<RawMetadata>,
    file: &PhotoFile,
    options: ResolveOptions,
) -> TimestampResult {
    // 1. Embedded metadata
    if let Some(meta) = metadata {
        if let Some(date) = meta.original_capture {
            return TimestampResult::resolved(date, DateSource::ExifDatetimeOriginal);
        }
        if let Some(date) = meta.created {
            return TimestampResult::resolved(date, DateSource::ExifCreateDate);
        }
        if let Some(date) = meta.modified {
            return TimestampResult::resolved(date, DateSource::ExifModifyDate);
        }
    }

    // 2. Filename conventions
    if options.enable_filename_parser {
        if let Some(date) = parse_filename(&file.name).and_then(|c| c.to_datetime()) {
            return TimestampResult::resolved(date, DateSource::Filename);
        }
    }

    // 3. Filesystem mtime
    if options.enable_file_modified {
        if let Some(date) = file.modified {
            return TimestampResult::resolved(date, DateSource::FileModified);
        }
    }

    // 4. Ask the user
    TimestampResult::unresolved()
}

/// Resolves capture dates and keeps the latest result. A call for a newer file supersedes any
/// call still in flight: only the most recent call may write the shared state.
pub struct TimestampResolver {
    metadata: Arc<dyn MetadataSource>,
    options: ResolveOptions,
    generation: AtomicU64,
    state: Mutex<TimestampResult>,
}

impl TimestampResolver {
    pub fn new(metadata: Arc<dyn MetadataSource>) -> Self {
        Self::with_options(metadata, ResolveOptions::default())
    }

    pub fn with_options(metadata: Arc<dyn MetadataSource>, options: ResolveOptions) -> Self {
        Self {
            metadata,
            options,
            generation: AtomicU64::new(0),
            state: Mutex::new(TimestampResult::default()),
        }
    }

    /// Resolve `file` and return this call's own result. `None` means nothing to resolve and is
    /// not reported as needing user input.
    pub fn resolve(&self, file: Option<&PhotoFile>) -> TimestampResult {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let Some(file) = file else {
            let idle = TimestampResult::default();
            self.publish(generation, idle);
            return idle;
        };

        self.publish(
            generation,
            TimestampResult {
                loading: true,
                ..TimestampResult::default()
            },
        );

        let metadata = extract_metadata(self.metadata.as_ref(), file);
        let result = resolve_with_metadata(metadata, file, self.options);
        if !self.publish(generation, result) {
            log::debug!("{}: resolution superseded by a newer file", file.name);
        }
        result
    }

    /// State written by the most recent call.
    pub fn current(&self) -> TimestampResult {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, generation: u64, result: TimestampResult) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if self.generation.load(Ordering::SeqCst) != generation {
            return false;
        }
        *state = result;
        true
    }
}
