// ============================================================================
// SEGMENTATION - box prompts, backends, and merging predictions into the mask
// ============================================================================
//
// The model itself lives outside this crate. `SegmentationBackend` is the
// seam: the GUI and CLI use `CommandBackend`, which runs an external program,
// and tests plug in canned in-process backends. Calls are synchronous; the
// caller blocks until the backend returns.

use std::fmt;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::str::FromStr;
use std::time::Instant;

use image::imageops::{self, FilterType};
use image::{GrayImage, Luma, Rgba};

use crate::canvas::{Composition, MaskLayer, PixelRect};
use crate::components::tools::ToolMode;
use crate::{log_info, log_warn};

/// Colour written by a box-prompt overlay merge.
pub const OVERLAY_COLOR: Rgba<u8> = Rgba([0, 255, 0, 128]);
/// Normalised prediction values above this are selected.
pub const SELECT_THRESHOLD: u8 = 128;

// ---- box prompt ----------------------------------------------------------------

/// Normalised bounding box in image pixels, `x1 <= x2`, `y1 <= y2`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BoxPrompt {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl BoxPrompt {
    pub fn from_corners(a: (u32, u32), b: (u32, u32)) -> Self {
        Self {
            x1: a.0.min(b.0),
            y1: a.1.min(b.1),
            x2: a.0.max(b.0),
            y2: a.1.max(b.1),
        }
    }

    pub fn width(&self) -> u32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> u32 {
        self.y2 - self.y1
    }

    /// A box with zero width or height selects nothing.
    pub fn is_degenerate(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    /// Clamp both corners into a `width × height` image.
    pub fn clamped(&self, width: u32, height: u32) -> Self {
        let mx = width.saturating_sub(1);
        let my = height.saturating_sub(1);
        Self::from_corners((self.x1.min(mx), self.y1.min(my)), (self.x2.min(mx), self.y2.min(my)))
    }

    /// `x1,y1,x2,y2`, the form passed on backend command lines.
    pub fn to_arg(&self) -> String {
        format!("{},{},{},{}", self.x1, self.y1, self.x2, self.y2)
    }
}

impl fmt::Display for BoxPrompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}, {}, {}]", self.x1, self.y1, self.x2, self.y2)
    }
}

impl FromStr for BoxPrompt {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        if parts.len() != 4 {
            return Err(format!("expected x1,y1,x2,y2 but got '{}'", s));
        }
        let mut v = [0u32; 4];
        for (slot, part) in v.iter_mut().zip(&parts) {
            *slot = part
                .parse()
                .map_err(|_| format!("'{}' is not a pixel coordinate", part))?;
        }
        Ok(Self::from_corners((v[0], v[1]), (v[2], v[3])))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PromptOptions {
    pub multimask: bool,
    pub hq_token_only: bool,
}

// ---- errors --------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentError {
    /// No backend configured.
    Unavailable,
    /// No image is loaded to run on.
    NoImage,
    Launch(String),
    Failed(String),
    InvalidOutput(String),
    Panicked(String),
}

impl fmt::Display for SegmentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SegmentError::Unavailable => write!(f, "Segmentation backend is not available"),
            SegmentError::NoImage => write!(f, "No image loaded"),
            SegmentError::Launch(e) => write!(f, "Failed to start segmentation backend: {}", e),
            SegmentError::Failed(e) => write!(f, "Segmentation failed: {}", e),
            SegmentError::InvalidOutput(e) => write!(f, "Invalid segmentation output: {}", e),
            SegmentError::Panicked(e) => write!(f, "Segmentation backend crashed: {}", e),
        }
    }
}

impl std::error::Error for SegmentError {}

// ---- prediction ----------------------------------------------------------------

/// Raw values as returned by a backend, before normalisation.
#[derive(Clone, Debug, PartialEq)]
pub enum MaskValues {
    Bool(Vec<bool>),
    /// Probabilities in 0..=1, or already scaled to 0..=255.
    Float(Vec<f32>),
    /// 0/1 or 0..=255.
    Byte(Vec<u8>),
}

impl MaskValues {
    fn len(&self) -> usize {
        match self {
            MaskValues::Bool(v) => v.len(),
            MaskValues::Float(v) => v.len(),
            MaskValues::Byte(v) => v.len(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PredictedMask {
    pub width: u32,
    pub height: u32,
    pub values: MaskValues,
}

impl PredictedMask {
    pub fn from_gray(img: &GrayImage) -> Self {
        Self {
            width: img.width(),
            height: img.height(),
            values: MaskValues::Byte(img.as_raw().clone()),
        }
    }

    /// Scale to 0..=255. Rasters whose maximum is at most 1 are treated as
    /// binary/probability masks and multiplied by 255.
    pub fn normalized(&self) -> Result<GrayImage, SegmentError> {
        if self.width == 0 || self.height == 0 {
            return Err(SegmentError::InvalidOutput("empty mask".into()));
        }
        let expected = self.width as usize * self.height as usize;
        if self.values.len() != expected {
            return Err(SegmentError::InvalidOutput(format!(
                "{} values for a {}x{} mask",
                self.values.len(),
                self.width,
                self.height
            )));
        }
        let data: Vec<u8> = match &self.values {
            MaskValues::Bool(v) => v.iter().map(|&b| if b { 255 } else { 0 }).collect(),
            MaskValues::Byte(v) => {
                let unit = v.iter().all(|&b| b <= 1);
                if unit { v.iter().map(|&b| b * 255).collect() } else { v.clone() }
            }
            MaskValues::Float(v) => {
                if v.iter().any(|f| !f.is_finite()) {
                    return Err(SegmentError::InvalidOutput("non-finite probability".into()));
                }
                let max = v.iter().copied().fold(f32::MIN, f32::max);
                let gain = if max <= 1.0 { 255.0 } else { 1.0 };
                v.iter().map(|&f| (f * gain).round().clamp(0.0, 255.0) as u8).collect()
            }
        };
        GrayImage::from_raw(self.width, self.height, data)
            .ok_or_else(|| SegmentError::InvalidOutput("buffer size mismatch".into()))
    }
}

/// What a backend hands back: the mask plus the size of the image it ran on.
#[derive(Clone, Debug, PartialEq)]
pub struct Prediction {
    pub mask: PredictedMask,
    pub source_size: (u32, u32),
}

// ---- backend seam --------------------------------------------------------------

pub trait SegmentationBackend: Send {
    fn name(&self) -> &str;

    /// Predict a mask for `bbox` on the image at `image_path`. Blocks.
    fn predict(
        &mut self,
        image_path: &Path,
        bbox: BoxPrompt,
        options: PromptOptions,
    ) -> Result<Prediction, SegmentError>;
}

/// Runs an external program per prediction:
/// `<program> [args] --image P --box x1,y1,x2,y2 --output OUT.png [--multimask] [--hq-token-only]`.
pub struct CommandBackend {
    program: PathBuf,
    args: Vec<String>,
    label: String,
}

impl CommandBackend {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        let program = program.into();
        let label = program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| program.display().to_string());
        Self { program, args, label }
    }

    /// Build from a settings string, splitting extra args on whitespace.
    /// An empty command means no backend.
    pub fn from_config(command: &str, args: &str) -> Option<Self> {
        let command = command.trim();
        if command.is_empty() {
            return None;
        }
        Some(Self::new(command, args.split_whitespace().map(str::to_string).collect()))
    }

    /// Append arguments after the configured ones.
    pub fn with_extra_args(mut self, extra: impl IntoIterator<Item = String>) -> Self {
        self.args.extend(extra);
        self
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    fn build_command(&self, image_path: &Path, bbox: BoxPrompt, options: PromptOptions, out: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg("--image")
            .arg(image_path)
            .arg("--box")
            .arg(bbox.to_arg())
            .arg("--output")
            .arg(out);
        if options.multimask {
            cmd.arg("--multimask");
        }
        if options.hq_token_only {
            cmd.arg("--hq-token-only");
        }
        cmd
    }
}

/// Temp file removed on drop.
struct TempOutput(PathBuf);

impl TempOutput {
    fn new() -> Self {
        Self(std::env::temp_dir().join(format!("maskfe-{}.png", uuid::Uuid::new_v4())))
    }
}

impl Drop for TempOutput {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.0);
    }
}

impl SegmentationBackend for CommandBackend {
    fn name(&self) -> &str {
        &self.label
    }

    fn predict(
        &mut self,
        image_path: &Path,
        bbox: BoxPrompt,
        options: PromptOptions,
    ) -> Result<Prediction, SegmentError> {
        let source_size = image::image_dimensions(image_path)
            .map_err(|e| SegmentError::Failed(format!("{}: {}", image_path.display(), e)))?;
        let out = TempOutput::new();
        let output = self
            .build_command(image_path, bbox, options, &out.0)
            .output()
            .map_err(|e| SegmentError::Launch(format!("{}: {}", self.program.display(), e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let detail = if stderr.is_empty() { output.status.to_string() } else { stderr };
            return Err(SegmentError::Failed(detail));
        }

        let decoded = image::open(&out.0)
            .map_err(|e| SegmentError::InvalidOutput(format!("{}: {}", out.0.display(), e)))?;
        Ok(Prediction {
            mask: PredictedMask::from_gray(&decoded.into_luma8()),
            source_size,
        })
    }
}

// ---- selection -----------------------------------------------------------------

/// Thresholded prediction aligned to the mask layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Selection {
    width: u32,
    height: u32,
    selected: Vec<bool>,
    count: usize,
    bounds: PixelRect,
}

impl Selection {
    /// Normalise, resize (nearest) to `target`, and threshold.
    pub fn from_prediction(pred: &PredictedMask, target: (u32, u32)) -> Result<Self, SegmentError> {
        let gray = pred.normalized()?;
        let gray = if gray.dimensions() != target {
            imageops::resize(&gray, target.0, target.1, FilterType::Nearest)
        } else {
            gray
        };
        Ok(Self::from_gray(&gray))
    }

    fn from_gray(gray: &GrayImage) -> Self {
        let (width, height) = gray.dimensions();
        let mut count = 0;
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (i32::MAX, i32::MAX, i32::MIN, i32::MIN);
        let selected: Vec<bool> = gray
            .enumerate_pixels()
            .map(|(x, y, Luma([v]))| {
                let on = *v > SELECT_THRESHOLD;
                if on {
                    count += 1;
                    min_x = min_x.min(x as i32);
                    min_y = min_y.min(y as i32);
                    max_x = max_x.max(x as i32);
                    max_y = max_y.max(y as i32);
                }
                on
            })
            .collect();
        let bounds = if count == 0 {
            PixelRect::default()
        } else {
            PixelRect::from_min_max(min_x, min_y, max_x + 1, max_y + 1)
        };
        Self { width, height, selected, count, bounds }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn bounds(&self) -> PixelRect {
        self.bounds
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        x < self.width && y < self.height && self.selected[(y * self.width + x) as usize]
    }
}

// ---- merging -------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PromptMerge {
    /// Clear the selected pixels, then lay the overlay colour over them.
    Overlay,
    /// Clear the selected pixels only.
    Erase,
}

/// Merge `selection` into `mask`. Returns the touched image rectangle.
///
/// Overlay is a clear followed by a source-over, so applying the same
/// selection twice leaves the mask exactly as applying it once.
pub fn merge_selection(mask: &mut MaskLayer, selection: &Selection, how: PromptMerge, color: Rgba<u8>) -> PixelRect {
    let region = selection.bounds().intersect(&mask.bounds());
    for y in region.y..region.bottom() {
        for x in region.x..region.right() {
            let (ux, uy) = (x as u32, y as u32);
            if !selection.contains(ux, uy) {
                continue;
            }
            mask.compose_pixel(ux, uy, Rgba([0, 0, 0, 255]), 255, Composition::DestinationOut);
            if how == PromptMerge::Overlay {
                mask.compose_pixel(ux, uy, color, 255, Composition::SourceOver);
            }
        }
    }
    region
}

// ---- bridge --------------------------------------------------------------------

/// Outcome of a completed box prompt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PromptReport {
    pub painted: usize,
    pub elapsed_ms: u128,
    pub region: PixelRect,
}

/// Owns the optional backend and turns a box into a merged mask update.
pub struct RectPromptBridge {
    backend: Option<Box<dyn SegmentationBackend>>,
    options: PromptOptions,
    overlay: Rgba<u8>,
}

impl Default for RectPromptBridge {
    fn default() -> Self {
        Self::new(None, PromptOptions::default())
    }
}

impl RectPromptBridge {
    pub fn new(backend: Option<Box<dyn SegmentationBackend>>, options: PromptOptions) -> Self {
        Self { backend, options, overlay: OVERLAY_COLOR }
    }

    pub fn is_available(&self) -> bool {
        self.backend.is_some()
    }

    pub fn backend_name(&self) -> Option<&str> {
        self.backend.as_deref().map(|b| b.name())
    }

    pub fn set_backend(&mut self, backend: Option<Box<dyn SegmentationBackend>>) {
        self.backend = backend;
    }

    pub fn options(&self) -> PromptOptions {
        self.options
    }

    pub fn set_options(&mut self, options: PromptOptions) {
        self.options = options;
    }

    /// Run the backend for `bbox` and threshold the result at `target` size.
    /// Panics inside the backend are caught and reported as errors.
    pub fn predict_selection(
        &mut self,
        image_path: Option<&Path>,
        target: (u32, u32),
        bbox: BoxPrompt,
    ) -> Result<Selection, SegmentError> {
        let path = image_path.ok_or(SegmentError::NoImage)?;
        let options = self.options;
        let backend = self.backend.as_deref_mut().ok_or(SegmentError::Unavailable)?;

        log_info!("Segment {} on {} via {}", bbox, path.display(), backend.name());
        let prediction = panic::catch_unwind(AssertUnwindSafe(|| backend.predict(path, bbox, options)))
            .map_err(|payload| SegmentError::Panicked(panic_message(payload.as_ref())))??;

        if prediction.source_size != target {
            log_warn!(
                "Backend saw a {:?} image, mask is {:?}; resizing prediction",
                prediction.source_size,
                target
            );
        }
        Selection::from_prediction(&prediction.mask, target)
    }

    /// Full prompt: predict, then merge. The mask is only touched on success.
    pub fn apply(
        &mut self,
        mask: &mut MaskLayer,
        image_path: Option<&Path>,
        bbox: BoxPrompt,
        how: PromptMerge,
    ) -> Result<PromptReport, SegmentError> {
        let start = Instant::now();
        let selection = self.predict_selection(image_path, mask.size(), bbox)?;
        let region = merge_selection(mask, &selection, how, self.overlay);
        let report = PromptReport {
            painted: selection.count(),
            elapsed_ms: start.elapsed().as_millis(),
            region,
        };
        log_info!("Segment done: {} px in {} ms", report.painted, report.elapsed_ms);
        Ok(report)
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// ---- rect tool listener --------------------------------------------------------

/// What the session should do with a finished add/erase box.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RectFollowUp {
    Ignore,
    Segment(PromptMerge),
}

/// Host callback for the box-add and box-erase tools.
pub trait RectToolListener {
    fn rect_selected(&mut self, tool: ToolMode, bbox: BoxPrompt) -> RectFollowUp;
}

/// Runs the segmentation backend for box-add (overlay) and box-erase (erase).
#[derive(Clone, Copy, Debug, Default)]
pub struct SegmentOnSelect;

impl RectToolListener for SegmentOnSelect {
    fn rect_selected(&mut self, tool: ToolMode, _bbox: BoxPrompt) -> RectFollowUp {
        match tool {
            ToolMode::RectAdd => RectFollowUp::Segment(PromptMerge::Overlay),
            ToolMode::RectErase => RectFollowUp::Segment(PromptMerge::Erase),
            _ => RectFollowUp::Ignore,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Marks the box interior with 0/1 values at a fixed resolution.
    struct BoxBackend {
        size: (u32, u32),
    }

    impl SegmentationBackend for BoxBackend {
        fn name(&self) -> &str {
            "box"
        }

        fn predict(&mut self, _: &Path, bbox: BoxPrompt, _: PromptOptions) -> Result<Prediction, SegmentError> {
            let (w, h) = self.size;
            let values = (0..w * h)
                .map(|i| {
                    let (x, y) = (i % w, i / w);
                    u8::from(x >= bbox.x1 && x < bbox.x2 && y >= bbox.y1 && y < bbox.y2)
                })
                .collect();
            Ok(Prediction {
                mask: PredictedMask { width: w, height: h, values: MaskValues::Byte(values) },
                source_size: self.size,
            })
        }
    }

    struct PanickingBackend;

    impl SegmentationBackend for PanickingBackend {
        fn name(&self) -> &str {
            "panics"
        }

        fn predict(&mut self, _: &Path, _: BoxPrompt, _: PromptOptions) -> Result<Prediction, SegmentError> {
            panic!("out of device memory");
        }
    }

    fn bridge(backend: impl SegmentationBackend + 'static) -> RectPromptBridge {
        RectPromptBridge::new(Some(Box::new(backend)), PromptOptions::default())
    }

    #[test]
    fn box_prompt_parses_and_normalises() {
        let b: BoxPrompt = "30, 40, 10, 5".parse().expect("valid box");
        assert_eq!(b, BoxPrompt { x1: 10, y1: 5, x2: 30, y2: 40 });
        assert_eq!(b.to_arg(), "10,5,30,40");
        assert!("1,2,3".parse::<BoxPrompt>().is_err());
        assert!("a,2,3,4".parse::<BoxPrompt>().is_err());
        assert_eq!(b.clamped(20, 20), BoxPrompt { x1: 10, y1: 5, x2: 19, y2: 19 });
    }

    #[test]
    fn normalisation_handles_every_encoding() {
        let unit = PredictedMask { width: 2, height: 1, values: MaskValues::Float(vec![0.2, 1.0]) };
        assert_eq!(unit.normalized().expect("ok").as_raw(), &vec![51, 255]);
        let scaled = PredictedMask { width: 2, height: 1, values: MaskValues::Float(vec![10.0, 200.0]) };
        assert_eq!(scaled.normalized().expect("ok").as_raw(), &vec![10, 200]);
        let bools = PredictedMask { width: 2, height: 1, values: MaskValues::Bool(vec![true, false]) };
        assert_eq!(bools.normalized().expect("ok").as_raw(), &vec![255, 0]);
        let bad = PredictedMask { width: 3, height: 1, values: MaskValues::Byte(vec![1]) };
        assert!(matches!(bad.normalized(), Err(SegmentError::InvalidOutput(_))));
        let nan = PredictedMask { width: 1, height: 1, values: MaskValues::Float(vec![f32::NAN]) };
        assert!(nan.normalized().is_err());
    }

    #[test]
    fn smaller_prediction_is_resized_nearest() {
        let pred = PredictedMask {
            width: 2,
            height: 2,
            values: MaskValues::Byte(vec![1, 0, 0, 0]),
        };
        let sel = Selection::from_prediction(&pred, (10, 10)).expect("ok");
        assert_eq!(sel.count(), 25);
        assert_eq!(sel.bounds(), PixelRect::new(0, 0, 5, 5));
    }

    #[test]
    fn overlay_merge_is_idempotent() {
        let mut mask = MaskLayer::new(32, 32);
        mask.put_pixel(12, 12, Rgba([255, 0, 0, 50]));
        let mut b = bridge(BoxBackend { size: (32, 32) });
        let bbox = BoxPrompt { x1: 10, y1: 10, x2: 20, y2: 20 };

        let first = b.apply(&mut mask, Some(Path::new("img.png")), bbox, PromptMerge::Overlay).expect("ok");
        assert_eq!(first.painted, 100);
        assert_eq!(mask.get_pixel(12, 12), OVERLAY_COLOR);
        let once = mask.clone();
        b.apply(&mut mask, Some(Path::new("img.png")), bbox, PromptMerge::Overlay).expect("ok");
        assert_eq!(mask, once);
    }

    #[test]
    fn erase_merge_clears_selected_pixels() {
        let mut mask = MaskLayer::new(16, 16);
        mask.fill(Rgba([255, 0, 0, 50]));
        let mut b = bridge(BoxBackend { size: (16, 16) });
        let bbox = BoxPrompt { x1: 0, y1: 0, x2: 4, y2: 4 };
        b.apply(&mut mask, Some(Path::new("img.png")), bbox, PromptMerge::Erase).expect("ok");
        assert_eq!(mask.masked_pixel_count(), 256 - 16);
    }

    #[test]
    fn failures_leave_mask_untouched() {
        let mut mask = MaskLayer::new(8, 8);
        mask.put_pixel(1, 1, Rgba([1, 1, 1, 9]));
        let before = mask.clone();
        let bbox = BoxPrompt { x1: 0, y1: 0, x2: 4, y2: 4 };

        let mut none = RectPromptBridge::default();
        assert_eq!(
            none.apply(&mut mask, Some(Path::new("a.png")), bbox, PromptMerge::Overlay),
            Err(SegmentError::Unavailable)
        );
        let mut b = bridge(BoxBackend { size: (8, 8) });
        assert_eq!(b.apply(&mut mask, None, bbox, PromptMerge::Overlay), Err(SegmentError::NoImage));

        let mut crashing = bridge(PanickingBackend);
        let err = crashing
            .apply(&mut mask, Some(Path::new("a.png")), bbox, PromptMerge::Overlay)
            .expect_err("panic is caught");
        assert_eq!(err, SegmentError::Panicked("out of device memory".into()));
        assert_eq!(mask, before);
    }

    #[test]
    fn listener_routes_add_and_erase_tools() {
        let bbox = BoxPrompt { x1: 0, y1: 0, x2: 1, y2: 1 };
        let mut l = SegmentOnSelect;
        assert_eq!(l.rect_selected(ToolMode::RectAdd, bbox), RectFollowUp::Segment(PromptMerge::Overlay));
        assert_eq!(l.rect_selected(ToolMode::RectErase, bbox), RectFollowUp::Segment(PromptMerge::Erase));
        assert_eq!(l.rect_selected(ToolMode::Lasso, bbox), RectFollowUp::Ignore);
    }

    #[test]
    fn command_backend_from_empty_config_is_none() {
        assert!(CommandBackend::from_config("  ", "").is_none());
        let b = CommandBackend::from_config("/opt/sam/predict", "--device cpu").expect("configured");
        assert_eq!(b.name(), "predict");
        assert_eq!(b.args, vec!["--device".to_string(), "cpu".to_string()]);
        let b = b.with_extra_args(["--fp16".to_string()]);
        assert_eq!(b.args().len(), 3);
    }
}
