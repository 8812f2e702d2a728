use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Local, NaiveDateTime};

/// A photo as handed over by the user: name, raw bytes and the filesystem mtime.
#[derive(Debug, Clone)]
pub struct PhotoFile {
    /// Just the filename (no directories)
    pub name: String,
    /// Encoded image bytes, shared between the batch entry and its source handle
    pub data: Arc<[u8]>,
    /// Last-modified time as local wall-clock, if known
    pub modified: Option<NaiveDateTime>,
}

impl PhotoFile {
    pub fn new(name: impl Into<String>, data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
            modified: None,
        }
    }

    pub fn with_modified(mut self, modified: NaiveDateTime) -> Self {
        self.modified = Some(modified);
        self
    }

    /// Read a file from disk, keeping its mtime for the last-resort date.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let data = fs::read(path)?;
        let modified = fs::metadata(path)?
            .modified()
            .ok()
            .map(|t| DateTime::<Local>::from(t).naive_local());
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("blob")
            .to_string();
        Ok(Self {
            name,
            data: data.into(),
            modified,
        })
    }
}

/// Ownership-bearing reference to a registered source. Released exactly once by its owner.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceHandle(u64);

impl SourceHandle {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for SourceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "source:{}", self.0)
    }
}

/// Issues handles for source bytes and frees them on release.
pub trait SourceStore: Send + Sync {
    fn register(&self, file: &PhotoFile) -> SourceHandle;

    /// Bytes behind a live handle; `None` once released.
    fn load(&self, handle: &SourceHandle) -> Option<Arc<[u8]>>;

    fn release(&self, handle: &SourceHandle);
}

/// In-process store keyed by handle id.
#[derive(Default)]
pub struct MemoryStore {
    next_id: AtomicU64,
    sources: Mutex<HashMap<u64, Arc<[u8]>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of handles still alive.
    pub fn live_handles(&self) -> usize {
        self.sources.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl SourceStore for MemoryStore {
    fn register(&self, file: &PhotoFile) -> SourceHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.sources
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::clone(&file.data));
        SourceHandle::new(id)
    }

    fn load(&self, handle: &SourceHandle) -> Option<Arc<[u8]>> {
        self.sources
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&handle.id())
            .cloned()
    }

    fn release(&self, handle: &SourceHandle) {
        let removed = self
            .sources
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&handle.id());
        if removed.is_none() {
            log::warn!("release of unknown or already released {}", handle);
        }
    }
}

pub fn is_image(path: &Path) -> bool {
    mime_guess::from_path(path)
        .first()
        .map_or(false, |mime| mime.type_() == mime_guess::mime::IMAGE)
}

/// Expand input paths into image files: directories are walked recursively, non-images dropped.
/// Order is stable: arguments in the order given, directory contents sorted by path.
pub fn collect_images(inputs: &[PathBuf]) -> anyhow::Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for input in inputs {
        if input.is_dir() {
            let mut files = Vec::new();
            walk_dir(input, &mut files)?;
            files.sort();
            found.extend(files.into_iter().filter(|p| is_image(p)));
        } else if is_image(input) {
            found.push(input.clone());
        } else {
            log::warn!("Skipping {}: not an image", input.display());
        }
    }
    Ok(found)
}

fn walk_dir(dir: &Path, files: &mut Vec<PathBuf>) -> anyhow::Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            walk_dir(&path, files)?;
        } else {
            files.push(path);
        }
    }
    Ok(())
}
