//! The batch of images being stamped.
//!
//! [`BatchProcessor`] owns every [`ProcessedImage`] and is the only place they change. Each entry
//! moves `pending -> processing -> completed | error`; later style or timestamp changes re-render
//! completed entries in place without touching their status. The collection lock is never held
//! while decoding or drawing, so other threads may add, remove or restyle entries mid-run. Every
//! write after such a gap re-reads the entry by id and is dropped if the entry is gone.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use image::RgbaImage;
use serde::{Deserialize, Serialize};

use crate::date::{Confidence, DateSource};
use crate::error::ProcessError;
use crate::media::{PhotoFile, SourceHandle, SourceStore};
use crate::render::{ConfigPatch, Renderer, TimestampConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ImageId(u64);

impl std::fmt::Display for ImageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "img-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageStatus {
    Pending,
    Processing,
    Completed,
    Error,
}

/// What was last drawn onto an entry's surface.
#[derive(Debug, Clone, PartialEq)]
struct RenderKey {
    timestamp: Option<String>,
    config: TimestampConfig,
}

#[derive(Debug, Clone)]
pub struct ProcessedImage {
    pub id: ImageId,
    pub file: PhotoFile,
    /// Released exactly once, when the entry leaves the batch
    pub handle: SourceHandle,
    pub timestamp: Option<String>,
    pub config: TimestampConfig,
    pub date_source: DateSource,
    pub status: ImageStatus,
    /// Present once completed; replaced by a fresh buffer on every re-render
    pub surface: Option<Arc<RgbaImage>>,
    pub error: Option<String>,
    rendered: Option<RenderKey>,
}

impl ProcessedImage {
    pub fn confidence(&self) -> Confidence {
        self.date_source.confidence()
    }

    /// Completed with a surface: the only entries offered for export.
    pub fn is_exportable(&self) -> bool {
        self.status == ImageStatus::Completed && self.surface.is_some()
    }

    fn render_key(&self) -> RenderKey {
        RenderKey {
            timestamp: self.timestamp.clone(),
            config: self.config.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
}

/// Turns encoded bytes into pixels.
pub trait ImageDecoder: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> anyhow::Result<RgbaImage>;
}

/// Decodes whatever formats the `image` crate was built with.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageCrateDecoder;

impl ImageDecoder for ImageCrateDecoder {
    fn decode(&self, bytes: &[u8]) -> anyhow::Result<RgbaImage> {
        Ok(image::load_from_memory(bytes)?.to_rgba8())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchOptions {
    /// Accepted for compatibility; images are currently processed one at a time.
    pub concurrent_limit: usize,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self { concurrent_limit: 1 }
    }
}

/// Type alias for progress callback: (completed in this run, run size)
pub type ProgressCallback = dyn Fn(usize, usize) + Send + Sync;

#[derive(Default)]
pub struct BatchCallbacks {
    pub on_progress: Option<Box<ProgressCallback>>,
    pub on_image_complete: Option<Box<dyn Fn(ImageId) + Send + Sync>>,
    pub on_image_error: Option<Box<dyn Fn(ImageId, &str) + Send + Sync>>,
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown cause"
    }
}

/// Clears a run flag on every exit path, unwinding included.
struct RunGuard<'a>(&'a AtomicBool);

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct BatchProcessor {
    images: Mutex<Vec<ProcessedImage>>,
    store: Arc<dyn SourceStore>,
    decoder: Arc<dyn ImageDecoder>,
    renderer: Renderer,
    default_config: Mutex<TimestampConfig>,
    options: BatchOptions,
    callbacks: BatchCallbacks,
    next_id: AtomicU64,
    processing: AtomicBool,
    rerendering: AtomicBool,
}

impl BatchProcessor {
    pub fn new(store: Arc<dyn SourceStore>, decoder: Arc<dyn ImageDecoder>, renderer: Renderer) -> Self {
        Self {
            images: Mutex::new(Vec::new()),
            store,
            decoder,
            renderer,
            default_config: Mutex::new(TimestampConfig::default()),
            options: BatchOptions::default(),
            callbacks: BatchCallbacks::default(),
            next_id: AtomicU64::new(1),
            processing: AtomicBool::new(false),
            rerendering: AtomicBool::new(false),
        }
    }

    pub fn with_default_config(mut self, config: TimestampConfig) -> Self {
        self.default_config = Mutex::new(config);
        self
    }

    pub fn with_options(mut self, options: BatchOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_callbacks(mut self, callbacks: BatchCallbacks) -> Self {
        self.callbacks = callbacks;
        self
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ProcessedImage>> {
        self.images.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply `f` to the entry with `id`. Returns false (and does nothing) if it is gone.
    fn update(&self, id: ImageId, f: impl FnOnce(&mut ProcessedImage)) -> bool {
        match self.lock().iter_mut().find(|img| img.id == id) {
            Some(img) => {
                f(img);
                true
            }
            None => false,
        }
    }

    /// Snapshot of all entries in insertion order.
    pub fn images(&self) -> Vec<ProcessedImage> {
        self.lock().clone()
    }

    pub fn get(&self, id: ImageId) -> Option<ProcessedImage> {
        self.lock().iter().find(|img| img.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::SeqCst)
    }

    pub fn progress(&self) -> Progress {
        let images = self.lock();
        Progress {
            completed: images.iter().filter(|img| img.status == ImageStatus::Completed).count(),
            total: images.len(),
        }
    }

    /// Register files as pending entries. Files are assumed to be images already.
    pub fn add_images(&self, files: Vec<PhotoFile>) -> Vec<ImageId> {
        if files.is_empty() {
            return Vec::new();
        }
        let config = self.default_config.lock().unwrap_or_else(PoisonError::into_inner).clone();
        let added: Vec<ProcessedImage> = files
            .into_iter()
            .map(|file| ProcessedImage {
                id: ImageId(self.next_id.fetch_add(1, Ordering::Relaxed)),
                handle: self.store.register(&file),
                file,
                timestamp: None,
                config: config.clone(),
                date_source: DateSource::None,
                status: ImageStatus::Pending,
                surface: None,
                error: None,
                rendered: None,
            })
            .collect();
        let ids = added.iter().map(|img| img.id).collect();
        log::debug!("Added {} image(s)", added.len());
        self.lock().extend(added);
        ids
    }

    /// Drop one entry and release its source. Unknown ids are ignored.
    pub fn remove_image(&self, id: ImageId) -> bool {
        let removed = {
            let mut images = self.lock();
            images
                .iter()
                .position(|img| img.id == id)
                .map(|idx| images.remove(idx))
        };
        match removed {
            Some(img) => {
                self.store.release(&img.handle);
                true
            }
            None => false,
        }
    }

    pub fn clear_all(&self) {
        let removed = std::mem::take(&mut *self.lock());
        for img in &removed {
            self.store.release(&img.handle);
        }
        log::debug!("Cleared {} image(s)", removed.len());
    }

    /// Merge a style change into every entry, and into the style new entries start with.
    pub fn update_config(&self, patch: &ConfigPatch) {
        {
            let mut default = self.default_config.lock().unwrap_or_else(PoisonError::into_inner);
            *default = patch.apply(&default);
        }
        for img in self.lock().iter_mut() {
            img.config = patch.apply(&img.config);
        }
    }

    /// Set the overlay text on every entry. The source is recorded only on entries still pending;
    /// the others keep the source they were resolved with.
    pub fn update_timestamp_for_all(&self, timestamp: Option<String>, source: DateSource) {
        for img in self.lock().iter_mut() {
            img.timestamp = timestamp.clone();
            if img.status == ImageStatus::Pending {
                img.date_source = source;
            }
        }
    }

    /// Per-image resolution: set text and source on a single entry.
    pub fn update_timestamp(&self, id: ImageId, timestamp: Option<String>, source: DateSource) -> bool {
        self.update(id, |img| {
            img.timestamp = timestamp;
            img.date_source = source;
        })
    }

    /// Process every entry that is pending right now, in insertion order, one at a time.
    /// Returns how many entries this call went through; 0 if a run is already in progress.
    pub fn start_processing(&self) -> usize {
        self.start_processing_with(&|_, _| {})
    }

    /// [`start_processing`](Self::start_processing) with an extra per-run progress observer.
    pub fn start_processing_with(&self, on_progress: &dyn Fn(usize, usize)) -> usize {
        let Some(_guard) = RunGuard::acquire(&self.processing) else {
            log::debug!("start_processing ignored: already running");
            return 0;
        };

        let pending: Vec<ImageId> = self
            .lock()
            .iter()
            .filter(|img| img.status == ImageStatus::Pending)
            .map(|img| img.id)
            .collect();
        if pending.is_empty() {
            return 0;
        }
        if self.options.concurrent_limit > 1 {
            log::debug!(
                "concurrent_limit {} requested; processing sequentially",
                self.options.concurrent_limit
            );
        }

        let total = pending.len();
        log::info!("Processing {} image(s)", total);
        for (i, &id) in pending.iter().enumerate() {
            self.process_image(id);
            if let Some(cb) = &self.callbacks.on_progress {
                cb(i + 1, total);
            }
            on_progress(i + 1, total);
        }
        total
    }

    /// Move `id` from pending to processing. Any other status, or a missing entry, is left alone.
    fn claim(&self, id: ImageId) -> Option<ProcessedImage> {
        let mut images = self.lock();
        let img = images
            .iter_mut()
            .find(|img| img.id == id && img.status == ImageStatus::Pending)?;
        img.status = ImageStatus::Processing;
        Some(img.clone())
    }

    /// Decode, draw and stamp one pending entry. Failures end up on the entry, never in the
    /// caller. Entries that are not pending are ignored.
    pub fn process_image(&self, id: ImageId) {
        let Some(entry) = self.claim(id) else {
            log::debug!("{} is not pending; skipped", id);
            return;
        };

        let outcome = self.draw_guarded(&entry);

        match outcome {
            Ok(Some((surface, key))) => {
                let surface = Arc::new(surface);
                let applied = self.update(id, |img| {
                    img.surface = Some(surface);
                    img.status = ImageStatus::Completed;
                    img.timestamp = key.timestamp.clone();
                    img.error = None;
                    img.rendered = Some(key);
                });
                if applied {
                    if let Some(cb) = &self.callbacks.on_image_complete {
                        cb(id);
                    }
                }
            }
            Ok(None) => log::debug!("{} removed while processing", id),
            Err(message) => self.fail(id, &entry.file.name, &message),
        }
    }

    fn decode_entry(&self, entry: &ProcessedImage) -> Result<RgbaImage, ProcessError> {
        let bytes = self.store.load(&entry.handle).ok_or(ProcessError::SourceReleased)?;
        let decoded = self
            .decoder
            .decode(&bytes)
            .map_err(|e| ProcessError::Decode(e.to_string()))?;
        if decoded.width() == 0 || decoded.height() == 0 {
            return Err(ProcessError::EmptyImage);
        }
        Ok(decoded)
    }

    /// Steps between the two collection reads. `Ok(None)` means the entry disappeared meanwhile.
    fn draw_entry(&self, entry: &ProcessedImage) -> Result<Option<(RgbaImage, RenderKey)>, String> {
        let decoded = self.decode_entry(entry).map_err(|e| e.to_string())?;

        // Decoding took a while; draw with whatever text and style are current now.
        let Some(latest) = self.get(entry.id) else {
            return Ok(None);
        };
        let key = latest.render_key();
        let surface = match &key.timestamp {
            Some(text) => {
                let mut surface = RgbaImage::default();
                self.renderer.render(&mut surface, &decoded, text, &key.config);
                surface
            }
            None => decoded,
        };
        Ok(Some((surface, key)))
    }

    /// [`draw_entry`](Self::draw_entry) with a panic turned into an error message.
    fn draw_guarded(&self, entry: &ProcessedImage) -> Result<Option<(RgbaImage, RenderKey)>, String> {
        panic::catch_unwind(AssertUnwindSafe(|| self.draw_entry(entry)))
            .unwrap_or_else(|payload| Err(format!("Rendering panicked: {}", panic_message(payload.as_ref()))))
    }

    fn fail(&self, id: ImageId, name: &str, message: &str) {
        log::warn!("{}: {}", name, message);
        let applied = self.update(id, |img| {
            img.status = ImageStatus::Error;
            img.error = Some(message.to_string());
            img.surface = None;
        });
        if applied {
            if let Some(cb) = &self.callbacks.on_image_error {
                cb(id, message);
            }
        }
    }

    /// Redraw every completed entry that has a timestamp onto a fresh surface.
    pub fn rerender_completed_images(&self) -> usize {
        self.rerender_where(|_| true)
    }

    /// Redraw only completed entries whose text or style changed since they were last drawn.
    pub fn rerender_stale_images(&self) -> usize {
        self.rerender_where(|img| img.rendered.as_ref() != Some(&img.render_key()))
    }

    fn rerender_where(&self, wanted: impl Fn(&ProcessedImage) -> bool) -> usize {
        let Some(_guard) = RunGuard::acquire(&self.rerendering) else {
            log::debug!("re-render ignored: already running");
            return 0;
        };
        let targets: Vec<ImageId> = self
            .lock()
            .iter()
            .filter(|img| img.status == ImageStatus::Completed && img.timestamp.is_some() && wanted(img))
            .map(|img| img.id)
            .collect();
        targets.into_iter().filter(|&id| self.rerender_image(id)).count()
    }

    fn rerender_image(&self, id: ImageId) -> bool {
        let Some(entry) = self.get(id) else {
            return false;
        };
        let outcome = self.draw_guarded(&entry);

        match outcome {
            Ok(Some((surface, key))) if key.timestamp.is_some() => {
                let surface = Arc::new(surface);
                self.update(id, |img| {
                    if img.status == ImageStatus::Completed {
                        img.surface = Some(surface);
                        img.rendered = Some(key);
                    }
                })
            }
            Ok(_) => false,
            Err(message) => {
                // The previous surface stays; a completed entry is not demoted.
                log::warn!("{}: re-render failed: {}", entry.file.name, message);
                if let Some(cb) = &self.callbacks.on_image_error {
                    cb(id, &message);
                }
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::MemoryStore;
    use crate::render::Position;
    use image::Rgba;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;
    use std::thread;

    /// Counts releases on top of a real store.
    #[derive(Default)]
    struct CountingStore {
        inner: MemoryStore,
        releases: AtomicUsize,
    }

    impl SourceStore for CountingStore {
        fn register(&self, file: &PhotoFile) -> SourceHandle {
            self.inner.register(file)
        }

        fn load(&self, handle: &SourceHandle) -> Option<Arc<[u8]>> {
            self.inner.load(handle)
        }

        fn release(&self, handle: &SourceHandle) {
            self.releases.fetch_add(1, Ordering::SeqCst);
            self.inner.release(handle);
        }
    }

    /// White 200x100 image for any bytes except `broken`.
    struct FakeDecoder;

    impl ImageDecoder for FakeDecoder {
        fn decode(&self, bytes: &[u8]) -> anyhow::Result<RgbaImage> {
            if bytes == b"broken" {
                anyhow::bail!("Failed to load image");
            }
            Ok(RgbaImage::from_pixel(200, 100, Rgba([255, 255, 255, 255])))
        }
    }

    /// Blocks inside decode until released.
    struct GatedDecoder {
        entered: Mutex<mpsc::Sender<()>>,
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl ImageDecoder for GatedDecoder {
        fn decode(&self, bytes: &[u8]) -> anyhow::Result<RgbaImage> {
            self.entered.lock().unwrap().send(()).unwrap();
            self.release.lock().unwrap().recv().unwrap();
            FakeDecoder.decode(bytes)
        }
    }

    struct PanickingDecoder;

    impl ImageDecoder for PanickingDecoder {
        fn decode(&self, _bytes: &[u8]) -> anyhow::Result<RgbaImage> {
            panic!("decoder bug")
        }
    }

    /// Decodes once, then fails every later call.
    #[derive(Default)]
    struct OneShotDecoder {
        calls: AtomicUsize,
    }

    impl ImageDecoder for OneShotDecoder {
        fn decode(&self, bytes: &[u8]) -> anyhow::Result<RgbaImage> {
            if self.calls.fetch_add(1, Ordering::SeqCst) > 0 {
                anyhow::bail!("decoded twice");
            }
            FakeDecoder.decode(bytes)
        }
    }

    fn files(names: &[&str]) -> Vec<PhotoFile> {
        names.iter().map(|n| PhotoFile::new(*n, n.as_bytes().to_vec())).collect()
    }

    fn batch_with(store: Arc<dyn SourceStore>, decoder: Arc<dyn ImageDecoder>) -> BatchProcessor {
        BatchProcessor::new(store, decoder, Renderer::default())
    }

    fn batch() -> BatchProcessor {
        batch_with(Arc::new(MemoryStore::new()), Arc::new(FakeDecoder))
    }

    #[test]
    fn test_add_and_process_lifecycle() {
        let batch = batch();
        assert!(batch.add_images(Vec::new()).is_empty());

        let ids = batch.add_images(files(&["a.jpg", "b.jpg", "c.jpg"]));
        assert_eq!(ids.len(), 3);
        assert_ne!(ids[0], ids[1]);
        assert_ne!(ids[1], ids[2]);
        assert!(batch.images().iter().all(|img| img.status == ImageStatus::Pending));
        assert_eq!(batch.progress(), Progress { completed: 0, total: 3 });

        assert_eq!(batch.start_processing(), 3);
        assert_eq!(batch.progress(), Progress { completed: 3, total: 3 });
        for img in batch.images() {
            assert_eq!(img.status, ImageStatus::Completed);
            assert!(img.is_exportable());
            assert_eq!(img.surface.as_ref().unwrap().dimensions(), (200, 100));
        }
        assert!(!batch.is_processing());

        // Nothing pending: second call is a no-op.
        assert_eq!(batch.start_processing(), 0);
    }

    #[test]
    fn test_ids_unique_across_adds() {
        let batch = batch();
        let mut ids = batch.add_images(files(&["a.jpg", "b.jpg"]));
        batch.remove_image(ids[0]);
        ids.extend(batch.add_images(files(&["c.jpg", "d.jpg"])));
        let mut sorted = ids.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), ids.len());
    }

    #[test]
    fn test_release_once_per_entry() {
        let store = Arc::new(CountingStore::default());
        let batch = batch_with(store.clone(), Arc::new(FakeDecoder));
        let ids = batch.add_images(files(&["a.jpg", "b.jpg", "c.jpg", "d.jpg"]));

        assert!(batch.remove_image(ids[1]));
        assert_eq!(store.releases.load(Ordering::SeqCst), 1);
        assert!(!batch.remove_image(ids[1]));
        assert_eq!(store.releases.load(Ordering::SeqCst), 1);

        batch.clear_all();
        assert_eq!(store.releases.load(Ordering::SeqCst), 4);
        assert_eq!(store.inner.live_handles(), 0);
        assert_eq!(batch.progress(), Progress { completed: 0, total: 0 });

        batch.clear_all();
        assert_eq!(store.releases.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_decode_failure_is_isolated() {
        let errors = Arc::new(Mutex::new(Vec::new()));
        let progress = Arc::new(Mutex::new(Vec::new()));
        let (e, p) = (errors.clone(), progress.clone());
        let batch = batch().with_callbacks(BatchCallbacks {
            on_image_error: Some(Box::new(move |id, msg| e.lock().unwrap().push((id, msg.to_string())))),
            on_progress: Some(Box::new(move |done, total| p.lock().unwrap().push((done, total)))),
            ..Default::default()
        });
        let mut input = files(&["a.jpg", "c.jpg"]);
        input.insert(1, PhotoFile::new("b.jpg", b"broken".to_vec()));
        let ids = batch.add_images(input);

        assert_eq!(batch.start_processing(), 3);
        let bad = batch.get(ids[1]).unwrap();
        assert_eq!(bad.status, ImageStatus::Error);
        assert!(bad.error.as_deref().unwrap().contains("Failed to load image"));
        assert!(!bad.is_exportable());
        assert_eq!(batch.get(ids[2]).unwrap().status, ImageStatus::Completed);
        assert_eq!(batch.progress(), Progress { completed: 2, total: 3 });

        let errors = errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].0, ids[1]);
        assert_eq!(*progress.lock().unwrap(), vec![(1, 3), (2, 3), (3, 3)]);
    }

    #[test]
    fn test_panicking_decoder_does_not_wedge() {
        let batch = batch_with(Arc::new(MemoryStore::new()), Arc::new(PanickingDecoder));
        let ids = batch.add_images(files(&["a.jpg"]));
        assert_eq!(batch.start_processing(), 1);
        let failed = batch.get(ids[0]).unwrap();
        assert_eq!(failed.status, ImageStatus::Error);
        let message = failed.error.unwrap();
        assert!(message.starts_with("Rendering panicked"));
        assert!(message.contains("decoder bug"));
        assert!(!batch.is_processing());

        batch.add_images(files(&["b.jpg"]));
        assert_eq!(batch.start_processing(), 1);
    }

    #[test]
    fn test_process_image_leaves_finished_entries_alone() {
        let decoder = Arc::new(OneShotDecoder::default());
        let completions = Arc::new(AtomicUsize::new(0));
        let c = completions.clone();
        let batch = batch_with(Arc::new(MemoryStore::new()), decoder.clone()).with_callbacks(BatchCallbacks {
            on_image_complete: Some(Box::new(move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            })),
            ..Default::default()
        });
        let ids = batch.add_images(files(&["a.jpg"]));
        assert_eq!(batch.start_processing(), 1);
        let before = batch.get(ids[0]).unwrap();
        assert_eq!(before.status, ImageStatus::Completed);

        batch.process_image(ids[0]);
        let after = batch.get(ids[0]).unwrap();
        assert_eq!(after.status, ImageStatus::Completed);
        assert!(after.error.is_none());
        assert!(Arc::ptr_eq(before.surface.as_ref().unwrap(), after.surface.as_ref().unwrap()));
        assert_eq!(decoder.calls.load(Ordering::SeqCst), 1);
        assert_eq!(completions.load(Ordering::SeqCst), 1);

        // Errors are terminal too.
        let broken = batch_with(Arc::new(MemoryStore::new()), Arc::new(FakeDecoder));
        let ids = broken.add_images(vec![PhotoFile::new("b.jpg", b"broken".to_vec())]);
        broken.start_processing();
        let failed = broken.get(ids[0]).unwrap();
        broken.process_image(ids[0]);
        let again = broken.get(ids[0]).unwrap();
        assert_eq!(again.status, ImageStatus::Error);
        assert_eq!(again.error, failed.error);
    }

    #[test]
    fn test_timestamp_broadcast_keeps_resolved_sources() {
        let batch = batch();
        let first = batch.add_images(files(&["a.jpg"]));
        batch.update_timestamp_for_all(Some("2024/03/15".into()), DateSource::ExifDatetimeOriginal);
        batch.start_processing();
        let later = batch.add_images(files(&["b.jpg"]));

        batch.update_timestamp_for_all(Some("2020/01/01".into()), DateSource::FileModified);
        let done = batch.get(first[0]).unwrap();
        assert_eq!(done.timestamp.as_deref(), Some("2020/01/01"));
        assert_eq!(done.date_source, DateSource::ExifDatetimeOriginal);
        assert_eq!(done.confidence(), Confidence::High);
        assert_eq!(done.status, ImageStatus::Completed);

        let pending = batch.get(later[0]).unwrap();
        assert_eq!(pending.date_source, DateSource::FileModified);
        assert_eq!(pending.confidence(), Confidence::Low);
    }

    #[test]
    fn test_config_broadcast() {
        let batch = batch();
        batch.add_images(files(&["a.jpg", "b.jpg"]));
        batch.update_config(&ConfigPatch {
            position: Some(Position::TopLeft),
            ..Default::default()
        });
        assert!(batch.images().iter().all(|img| img.config.position == Position::TopLeft));

        // Entries added afterwards share the batch style.
        let ids = batch.add_images(files(&["c.jpg"]));
        assert_eq!(batch.get(ids[0]).unwrap().config.position, Position::TopLeft);
    }

    #[test]
    fn test_rerender_replaces_surface() {
        let batch = batch();
        let ids = batch.add_images(files(&["a.jpg"]));
        batch.update_timestamp_for_all(Some("2024/03/15".into()), DateSource::Filename);
        batch.start_processing();
        let before = batch.get(ids[0]).unwrap().surface.unwrap();

        // Nothing changed: stale pass skips, full pass redraws identical pixels on a new buffer.
        assert_eq!(batch.rerender_stale_images(), 0);
        assert_eq!(batch.rerender_completed_images(), 1);
        let same = batch.get(ids[0]).unwrap().surface.unwrap();
        assert!(!Arc::ptr_eq(&before, &same));
        assert_eq!(*before, *same);

        batch.update_config(&ConfigPatch {
            position: Some(Position::TopLeft),
            ..Default::default()
        });
        assert_eq!(batch.rerender_stale_images(), 1);
        let after = batch.get(ids[0]).unwrap();
        assert_eq!(after.status, ImageStatus::Completed);
        assert_ne!(*after.surface.unwrap(), *same);
        assert_eq!(batch.rerender_stale_images(), 0);
    }

    #[test]
    fn test_unstamped_entries_are_not_rerendered() {
        let batch = batch();
        batch.add_images(files(&["a.jpg"]));
        batch.start_processing();
        assert_eq!(batch.rerender_completed_images(), 0);
    }

    fn gated_batch() -> (Arc<BatchProcessor>, Arc<CountingStore>, mpsc::Receiver<()>, mpsc::Sender<()>) {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let store = Arc::new(CountingStore::default());
        let decoder = GatedDecoder {
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
        };
        let batch = Arc::new(batch_with(store.clone(), Arc::new(decoder)));
        (batch, store, entered_rx, release_tx)
    }

    #[test]
    fn test_timestamp_arriving_during_decode_is_drawn() {
        let (batch, _store, entered, release) = gated_batch();
        let ids = batch.add_images(files(&["a.jpg"]));

        let worker = Arc::clone(&batch);
        let handle = thread::spawn(move || worker.start_processing());
        entered.recv().unwrap();
        assert!(batch.is_processing());
        assert_eq!(batch.start_processing(), 0);
        assert_eq!(batch.get(ids[0]).unwrap().status, ImageStatus::Processing);

        batch.update_timestamp_for_all(Some("2024/03/15".into()), DateSource::Filename);
        release.send(()).unwrap();
        assert_eq!(handle.join().unwrap(), 1);

        let img = batch.get(ids[0]).unwrap();
        assert_eq!(img.status, ImageStatus::Completed);
        assert_eq!(img.timestamp.as_deref(), Some("2024/03/15"));
        let plain = RgbaImage::from_pixel(200, 100, Rgba([255, 255, 255, 255]));
        assert_ne!(*img.surface.unwrap(), plain);
    }

    #[test]
    fn test_remove_while_processing_settles() {
        let (batch, store, entered, release) = gated_batch();
        let ids = batch.add_images(files(&["a.jpg", "b.jpg"]));

        let worker = Arc::clone(&batch);
        let handle = thread::spawn(move || worker.start_processing());
        entered.recv().unwrap();
        assert!(batch.remove_image(ids[0]));
        release.send(()).unwrap();

        entered.recv().unwrap();
        release.send(()).unwrap();
        assert_eq!(handle.join().unwrap(), 2);

        assert!(batch.get(ids[0]).is_none());
        assert_eq!(batch.get(ids[1]).unwrap().status, ImageStatus::Completed);
        assert_eq!(store.releases.load(Ordering::SeqCst), 1);
        assert_eq!(batch.progress(), Progress { completed: 1, total: 1 });
    }

    #[test]
    fn test_images_added_mid_run_wait_for_next_run() {
        let (batch, _store, entered, release) = gated_batch();
        batch.add_images(files(&["a.jpg"]));

        let worker = Arc::clone(&batch);
        let handle = thread::spawn(move || worker.start_processing());
        entered.recv().unwrap();
        let late = batch.add_images(files(&["late.jpg"]));
        release.send(()).unwrap();
        assert_eq!(handle.join().unwrap(), 1);
        assert_eq!(batch.get(late[0]).unwrap().status, ImageStatus::Pending);

        let worker = Arc::clone(&batch);
        let handle = thread::spawn(move || worker.start_processing());
        entered.recv().unwrap();
        release.send(()).unwrap();
        assert_eq!(handle.join().unwrap(), 1);
        assert_eq!(batch.get(late[0]).unwrap().status, ImageStatus::Completed);
    }

    #[test]
    fn test_image_crate_decoder() {
        let img = RgbaImage::from_pixel(3, 2, Rgba([1, 2, 3, 255]));
        let mut png = std::io::Cursor::new(Vec::new());
        img.write_to(&mut png, image::ImageFormat::Png).unwrap();
        let decoded = ImageCrateDecoder.decode(png.get_ref()).unwrap();
        assert_eq!(decoded, img);
        assert!(ImageCrateDecoder.decode(b"nope").is_err());
    }
}
