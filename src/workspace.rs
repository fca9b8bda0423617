use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use image::RgbaImage;

use crate::canvas::MaskLayer;
use crate::io::{self, ImageLoadError};
use crate::ops::export::{self, ExportConvention, ExportError, OverwritePolicy};
use crate::ops::segment::{RectPromptBridge, SegmentOnSelect};
use crate::session::{MaskSession, SessionError};
use crate::settings::AppSettings;
use crate::{log_debug, log_err, log_info, log_warn};

/// A mask kept in memory for an image that is not currently shown.
#[derive(Clone, Debug)]
pub struct CachedMask {
    pub mask: MaskLayer,
    pub original_size: (u32, u32),
}

// ============================================================================
// SAVE DEBOUNCER - single-shot timer for navigation-triggered saves
// ============================================================================

#[derive(Clone, Debug)]
pub struct PendingSave {
    pub mask: MaskLayer,
    pub original_size: (u32, u32),
    pub path: PathBuf,
    pub due: Instant,
}

/// Holds at most one pending save. Scheduling replaces whatever was pending.
#[derive(Debug)]
pub struct SaveDebouncer {
    delay: Duration,
    pending: Option<PendingSave>,
}

impl SaveDebouncer {
    pub fn new(delay: Duration) -> Self {
        Self { delay, pending: None }
    }

    pub fn schedule(&mut self, mask: MaskLayer, original_size: (u32, u32), path: PathBuf, now: Instant) {
        if let Some(prev) = &self.pending {
            log_debug!("Dropping pending save of {}", prev.path.display());
        }
        self.pending = Some(PendingSave { mask, original_size, path, due: now + self.delay });
    }

    pub fn cancel(&mut self) -> Option<PendingSave> {
        self.pending.take()
    }

    pub fn pending_path(&self) -> Option<&Path> {
        self.pending.as_ref().map(|p| p.path.as_path())
    }

    pub fn due_at(&self) -> Option<Instant> {
        self.pending.as_ref().map(|p| p.due)
    }

    /// The pending save, once its deadline has passed.
    pub fn take_due(&mut self, now: Instant) -> Option<PendingSave> {
        if self.pending.as_ref().is_some_and(|p| p.due <= now) {
            self.pending.take()
        } else {
            None
        }
    }
}

// ============================================================================
// IMAGE PREFETCHER - background decode on a small rayon pool
// ============================================================================

type LoadResult = (PathBuf, Result<RgbaImage, ImageLoadError>);

/// Decodes neighbouring images off the interaction thread. Results are
/// handed back through a channel; only the owner touches the image cache.
pub struct ImagePrefetcher {
    pool: Option<rayon::ThreadPool>,
    sender: mpsc::Sender<LoadResult>,
    receiver: mpsc::Receiver<LoadResult>,
    in_flight: HashSet<PathBuf>,
}

impl ImagePrefetcher {
    pub fn new(threads: usize) -> Self {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(|i| format!("maskfe-prefetch-{}", i))
            .build();
        let pool = match pool {
            Ok(pool) => Some(pool),
            Err(e) => {
                log_warn!("Prefetch pool unavailable, using global pool: {}", e);
                None
            }
        };
        let (sender, receiver) = mpsc::channel();
        Self { pool, sender, receiver, in_flight: HashSet::new() }
    }

    pub fn is_in_flight(&self, path: &Path) -> bool {
        self.in_flight.contains(path)
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Queue a decode of `path` unless one is already running.
    pub fn request(&mut self, path: PathBuf) -> bool {
        if !self.in_flight.insert(path.clone()) {
            return false;
        }
        let sender = self.sender.clone();
        let job = move || {
            let result = io::read_image(&path);
            let _ = sender.send((path, result));
        };
        match &self.pool {
            Some(pool) => pool.spawn(job),
            None => rayon::spawn(job),
        }
        true
    }

    /// Finished loads since the last call.
    pub fn drain(&mut self) -> Vec<LoadResult> {
        let mut done = Vec::new();
        while let Ok(result) = self.receiver.try_recv() {
            self.in_flight.remove(&result.0);
            done.push(result);
        }
        done
    }

    /// Block until one load finishes or `timeout` passes.
    pub fn wait(&mut self, timeout: Duration) -> Option<LoadResult> {
        let result = self.receiver.recv_timeout(timeout).ok()?;
        self.in_flight.remove(&result.0);
        Some(result)
    }
}

// ============================================================================
// WORKSPACE - folder navigation around one MaskSession
// ============================================================================

/// Image list, per-image mask cache, prefetch and save around the session.
pub struct Workspace {
    session: MaskSession,
    files: Vec<PathBuf>,
    positions: HashMap<PathBuf, usize>,
    index: Option<usize>,
    masks: HashMap<PathBuf, CachedMask>,
    images: HashMap<PathBuf, Arc<RgbaImage>>,
    prefetcher: ImagePrefetcher,
    saver: SaveDebouncer,
    save_dir: Option<PathBuf>,
    convention: ExportConvention,
    prefetch_radius: usize,
    prefetch_keep: usize,
}

impl Workspace {
    pub fn new(settings: &AppSettings) -> Self {
        let bridge = RectPromptBridge::new(settings.segmentation_backend(), settings.prompt_options());
        let mut session = MaskSession::new(settings.tool_properties(), settings.max_undo_steps, bridge);
        session.set_rect_listener(Some(Box::new(SegmentOnSelect)));
        Self {
            session,
            files: Vec::new(),
            positions: HashMap::new(),
            index: None,
            masks: HashMap::new(),
            images: HashMap::new(),
            prefetcher: ImagePrefetcher::new(settings.worker_threads),
            saver: SaveDebouncer::new(settings.save_delay()),
            save_dir: settings.save_dir(),
            convention: settings.export_convention,
            prefetch_radius: settings.prefetch_radius,
            prefetch_keep: settings.prefetch_keep.max(settings.prefetch_radius),
        }
    }

    pub fn session(&self) -> &MaskSession {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut MaskSession {
        &mut self.session
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn index(&self) -> Option<usize> {
        self.index
    }

    pub fn current_path(&self) -> Option<&Path> {
        self.index.and_then(|i| self.files.get(i)).map(PathBuf::as_path)
    }

    pub fn save_dir(&self) -> Option<&Path> {
        self.save_dir.as_deref()
    }

    pub fn set_save_dir(&mut self, dir: Option<PathBuf>) {
        self.save_dir = dir;
    }

    pub fn convention(&self) -> ExportConvention {
        self.convention
    }

    pub fn set_convention(&mut self, convention: ExportConvention) {
        self.convention = convention;
    }

    pub fn cached_mask(&self, path: &Path) -> Option<&CachedMask> {
        self.masks.get(path)
    }

    pub fn is_image_cached(&self, path: &Path) -> bool {
        self.images.contains_key(path)
    }

    pub fn cached_image_count(&self) -> usize {
        self.images.len()
    }

    pub fn pending_save(&self) -> Option<&Path> {
        self.saver.pending_path()
    }

    pub fn next_save_due(&self) -> Option<Instant> {
        self.saver.due_at()
    }

    pub fn prefetcher(&self) -> &ImagePrefetcher {
        &self.prefetcher
    }

    // ---- opening -----------------------------------------------------------------

    /// Open a single image as a one-entry list.
    pub fn open_image(&mut self, path: &Path) -> Result<(), SessionError> {
        self.leave_current(Instant::now());
        self.set_files(vec![path.to_path_buf()]);
        self.show_index(0)
    }

    /// Open every supported image in `dir`. Returns the number found.
    pub fn open_folder(&mut self, dir: &Path) -> Result<usize, SessionError> {
        let files = io::list_folder_images(dir)?;
        if files.is_empty() {
            self.session.set_status(format!("No images found in {}", dir.display()));
            return Ok(0);
        }
        log_info!("Opened folder {} ({} images)", dir.display(), files.len());
        self.leave_current(Instant::now());
        self.set_files(files);
        self.show_index(0)?;
        Ok(self.files.len())
    }

    fn set_files(&mut self, files: Vec<PathBuf>) {
        self.positions = files.iter().cloned().enumerate().map(|(i, p)| (p, i)).collect();
        self.files = files;
        self.index = None;
        self.images.retain(|p, _| self.positions.contains_key(p));
    }

    // ---- navigation ----------------------------------------------------------------

    pub fn next(&mut self) -> bool {
        self.next_at(Instant::now())
    }

    pub fn previous(&mut self) -> bool {
        self.previous_at(Instant::now())
    }

    pub fn next_at(&mut self, now: Instant) -> bool {
        match self.index {
            Some(i) if i + 1 < self.files.len() => self.navigate(i + 1, now),
            _ => false,
        }
    }

    pub fn previous_at(&mut self, now: Instant) -> bool {
        match self.index {
            Some(i) if i > 0 => self.navigate(i - 1, now),
            _ => false,
        }
    }

    fn navigate(&mut self, target: usize, now: Instant) -> bool {
        self.leave_current(now);
        match self.show_index(target) {
            Ok(()) => true,
            Err(e) => {
                log_err!("Navigation failed: {}", e);
                self.session.set_status(e.to_string());
                false
            }
        }
    }

    /// Cache the outgoing mask and schedule its save. Empty masks are never
    /// written, and they replace whatever an earlier visit cached.
    fn leave_current(&mut self, now: Instant) {
        self.saver.cancel();
        let Some(path) = self.session.image_path().map(Path::to_path_buf) else { return };
        if !self.session.has_mask_content() {
            self.masks.remove(&path);
            return;
        }
        let Some(mask) = self.session.mask().cloned() else { return };
        let original_size = self.session.original_size();
        let save_path = io::mask_save_path(&path, self.save_dir.as_deref());
        self.saver.schedule(mask.clone(), original_size, save_path, now);
        self.masks.insert(path, CachedMask { mask, original_size });
    }

    fn show_index(&mut self, index: usize) -> Result<(), SessionError> {
        let path = self.files.get(index).cloned().ok_or(SessionError::NoImage)?;
        let pixels = match self.images.get(&path) {
            Some(pixels) => {
                log_debug!("Image cache hit: {}", path.display());
                Arc::clone(pixels)
            }
            None => {
                log_debug!("Image cache miss: {}", path.display());
                let pixels = Arc::new(io::read_image(&path)?);
                self.images.insert(path.clone(), Arc::clone(&pixels));
                pixels
            }
        };
        self.index = Some(index);
        self.session.set_image(path.clone(), pixels);
        if let Some(cached) = self.masks.get(&path) {
            self.session.restore_mask(cached.mask.clone());
        }
        self.prefetch_window();
        let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        self.session.set_status(format!("Image {}/{}: {}", index + 1, self.files.len(), name));
        Ok(())
    }

    /// Evict images outside the keep window and queue loads for neighbours.
    pub fn prefetch_window(&mut self) {
        let Some(index) = self.index else { return };
        let keep = self.prefetch_keep;
        let positions = &self.positions;
        self.images.retain(|p, _| positions.get(p).is_some_and(|&i| i.abs_diff(index) <= keep));

        let lo = index.saturating_sub(self.prefetch_radius);
        let hi = (index + self.prefetch_radius).min(self.files.len().saturating_sub(1));
        for i in lo..=hi {
            if i == index {
                continue;
            }
            let path = &self.files[i];
            if self.images.contains_key(path) || self.prefetcher.is_in_flight(path) {
                continue;
            }
            self.prefetcher.request(path.clone());
        }
    }

    fn accept_prefetched(&mut self, (path, result): LoadResult) {
        match result {
            Ok(pixels) => {
                let in_window = match (self.index, self.positions.get(&path)) {
                    (Some(index), Some(&i)) => i.abs_diff(index) <= self.prefetch_keep,
                    _ => false,
                };
                if in_window {
                    log_debug!("Prefetched {}", path.display());
                    self.images.entry(path).or_insert_with(|| Arc::new(pixels));
                }
            }
            Err(e) => log_warn!("Prefetch of {} failed: {}", path.display(), e),
        }
    }

    /// Collect prefetch results and fire a due debounced save. Call once per
    /// frame. Returns true when something changed.
    pub fn poll(&mut self, now: Instant) -> bool {
        let loaded = self.prefetcher.drain();
        let mut changed = !loaded.is_empty();
        for result in loaded {
            self.accept_prefetched(result);
        }
        if let Some(due) = self.saver.take_due(now) {
            changed = true;
            match export::save_mask(&due.mask, due.original_size, self.convention, &due.path, OverwritePolicy::Replace) {
                Ok(path) => {
                    log_info!("Auto-saved mask to {}", path.display());
                    self.session.set_status(format!("Mask saved: {}", path.display()));
                }
                Err(e) => {
                    log_err!("Auto-save to {} failed: {}", due.path.display(), e);
                    self.session.set_status(format!("Auto-save failed: {}", e));
                }
            }
        }
        changed
    }

    /// Block until `path` has been prefetched or `timeout` passes.
    pub fn wait_for_prefetch(&mut self, path: &Path, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !self.images.contains_key(path) && self.prefetcher.is_in_flight(path) {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                break;
            }
            if let Some(result) = self.prefetcher.wait(left) {
                self.accept_prefetched(result);
            }
        }
        self.images.contains_key(path)
    }

    // ---- mask operations -------------------------------------------------------------

    pub fn clear_mask(&mut self) -> bool {
        if let Some(path) = self.session.image_path().map(Path::to_path_buf) {
            self.masks.remove(&path);
        }
        self.session.clear_mask()
    }

    /// Write the current mask now. Cancels any pending debounced save.
    pub fn save_current(&mut self, policy: OverwritePolicy) -> Result<PathBuf, SessionError> {
        let result = self.try_save_current(policy);
        match &result {
            Ok(path) => self.session.set_status(format!("Mask saved: {}", path.display())),
            Err(SessionError::Export(ExportError::NothingToSave)) => {
                self.session.set_status("Nothing to save: the mask is empty");
            }
            Err(e) => {
                log_err!("Save failed: {}", e);
                self.session.set_status(format!("Save failed: {}", e));
            }
        }
        result
    }

    fn try_save_current(&mut self, policy: OverwritePolicy) -> Result<PathBuf, SessionError> {
        self.saver.cancel();
        let path = self.session.image_path().map(Path::to_path_buf).ok_or(SessionError::NoImage)?;
        let mask = self.session.mask().ok_or(SessionError::NoImage)?;
        if !mask.has_content() {
            return Err(ExportError::NothingToSave.into());
        }
        let original_size = self.session.original_size();
        self.masks.insert(path.clone(), CachedMask { mask: mask.clone(), original_size });
        let target = io::mask_save_path(&path, self.save_dir.as_deref());
        let written = export::save_mask(mask, original_size, self.convention, &target, policy)?;
        log_info!("Saved mask to {}", written.display());
        Ok(written)
    }

    /// Write every cached mask with content into `dir` (or beside each image
    /// when `None`). Returns the number of files written.
    pub fn save_all(&mut self, dir: Option<&Path>, policy: OverwritePolicy) -> usize {
        self.saver.cancel();
        if let Some(path) = self.session.image_path().map(Path::to_path_buf)
            && let Some(mask) = self.session.mask().filter(|m| m.has_content())
        {
            let original_size = self.session.original_size();
            self.masks.insert(path, CachedMask { mask: mask.clone(), original_size });
        }

        let dir = dir.map(Path::to_path_buf).or_else(|| self.save_dir.clone());
        let mut entries: Vec<_> = self.masks.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        let mut written = 0;
        let mut failed = 0;
        for (image, cached) in entries {
            if !cached.mask.has_content() {
                continue;
            }
            let target = io::mask_save_path(image, dir.as_deref());
            match export::save_mask(&cached.mask, cached.original_size, self.convention, &target, policy) {
                Ok(_) => written += 1,
                Err(e) => {
                    failed += 1;
                    log_err!("Save of {} failed: {}", target.display(), e);
                }
            }
        }
        log_info!("Saved {} masks ({} failed)", written, failed);
        let msg = if failed == 0 {
            format!("Saved {} masks", written)
        } else {
            format!("Saved {} masks, {} failed", written, failed)
        };
        self.session.set_status(msg);
        written
    }
}
