use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use egui::{ColorImage, Pos2};
use image::RgbaImage;

use crate::canvas::{MaskLayer, PixelRect};
use crate::components::history::HistoryStack;
use crate::components::tools::{
    LassoFiller, LassoOp, PaintEngine, RectSelection, StrokeSession, ToolMode, ToolProperties,
};
use crate::compositor::{CompositeCache, RenderOutcome, Scene};
use crate::io::{self, ImageLoadError};
use crate::ops::export::ExportError;
use crate::ops::segment::{
    merge_selection, panic_message, BoxPrompt, PromptMerge, RectFollowUp, RectPromptBridge,
    RectToolListener, SegmentError, OVERLAY_COLOR,
};
use crate::viewport::ViewTransform;
use crate::{log_debug, log_err, log_info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    NoImage,
    Load(ImageLoadError),
    Segment(SegmentError),
    Export(ExportError),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::NoImage => write!(f, "No image loaded"),
            SessionError::Load(e) => write!(f, "{}", e),
            SessionError::Segment(e) => write!(f, "{}", e),
            SessionError::Export(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<ImageLoadError> for SessionError {
    fn from(e: ImageLoadError) -> Self {
        SessionError::Load(e)
    }
}

impl From<SegmentError> for SessionError {
    fn from(e: SegmentError) -> Self {
        SessionError::Segment(e)
    }
}

impl From<ExportError> for SessionError {
    fn from(e: ExportError) -> Self {
        SessionError::Export(e)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PointerButton {
    Primary,
    /// Lasso strokes made with this button erase instead of add.
    Secondary,
}

/// The image currently being annotated.
#[derive(Clone, Debug)]
pub struct LoadedImage {
    pub path: PathBuf,
    pub pixels: Arc<RgbaImage>,
}

// ============================================================================
// MASK SESSION - single owner of all per-image editing state
// ============================================================================

/// One image plus its mask, history, view and tool state.
///
/// All mutation happens through the event handlers below, on one thread.
/// Each handler is an error boundary: failures and panics are logged and
/// turned into a status message, and the session stays usable.
pub struct MaskSession {
    image: Option<LoadedImage>,
    original_size: (u32, u32),
    mask: Option<MaskLayer>,
    history: HistoryStack,
    view: ViewTransform,
    cache: CompositeCache,
    /// Bumped when the image or the whole mask is replaced.
    generation: u64,
    /// Screen-space region awaiting re-render.
    pending_dirty: Option<PixelRect>,
    tool: ToolMode,
    /// Drawing tool restored when pan mode is toggled off.
    resume_tool: ToolMode,
    props: ToolProperties,
    stroke: StrokeSession,
    prompt: RectPromptBridge,
    rect_listener: Option<Box<dyn RectToolListener>>,
    status: Option<String>,
}

impl MaskSession {
    pub fn new(props: ToolProperties, max_undo_steps: usize, prompt: RectPromptBridge) -> Self {
        Self {
            image: None,
            original_size: (0, 0),
            mask: None,
            history: HistoryStack::new(max_undo_steps),
            view: ViewTransform::default(),
            cache: CompositeCache::new(),
            generation: 0,
            pending_dirty: None,
            tool: ToolMode::Paint,
            resume_tool: ToolMode::Paint,
            props,
            stroke: StrokeSession::Idle,
            prompt,
            rect_listener: None,
            status: None,
        }
    }

    /// Register the host callback for the box-add / box-erase tools.
    pub fn set_rect_listener(&mut self, listener: Option<Box<dyn RectToolListener>>) {
        self.rect_listener = listener;
    }

    pub fn prompt_bridge_mut(&mut self) -> &mut RectPromptBridge {
        &mut self.prompt
    }

    // ---- accessors ---------------------------------------------------------------

    pub fn image(&self) -> Option<&LoadedImage> {
        self.image.as_ref()
    }

    pub fn image_path(&self) -> Option<&Path> {
        self.image.as_ref().map(|i| i.path.as_path())
    }

    pub fn original_size(&self) -> (u32, u32) {
        self.original_size
    }

    pub fn mask(&self) -> Option<&MaskLayer> {
        self.mask.as_ref()
    }

    pub fn has_mask_content(&self) -> bool {
        self.mask.as_ref().is_some_and(MaskLayer::has_content)
    }

    pub fn history(&self) -> &HistoryStack {
        &self.history
    }

    pub fn view(&self) -> &ViewTransform {
        &self.view
    }

    pub fn tool(&self) -> ToolMode {
        self.tool
    }

    pub fn properties(&self) -> &ToolProperties {
        &self.props
    }

    pub fn stroke(&self) -> &StrokeSession {
        &self.stroke
    }

    /// Lasso outline collected so far, in image pixels.
    pub fn lasso_points(&self) -> Option<&[Pos2]> {
        match &self.stroke {
            StrokeSession::Lasso(filler) => Some(filler.points()),
            _ => None,
        }
    }

    pub fn rect_selection(&self) -> Option<RectSelection> {
        match &self.stroke {
            StrokeSession::Rect { selection, .. } => Some(*selection),
            _ => None,
        }
    }

    pub fn frame(&self) -> &ColorImage {
        self.cache.frame()
    }

    /// Copy of `rect` (screen pixels) out of the current frame, for partial
    /// texture uploads.
    pub fn frame_region(&self, rect: PixelRect) -> ColorImage {
        self.cache.extract(rect)
    }

    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    /// Latest status message, cleared once taken.
    pub fn take_status(&mut self) -> Option<String> {
        self.status.take()
    }

    pub fn set_status(&mut self, msg: impl Into<String>) {
        let msg = msg.into();
        log_debug!("status: {}", msg);
        self.status = Some(msg);
    }

    // ---- image lifecycle -----------------------------------------------------------

    /// Decode `path` and make it the current image with a fresh mask.
    pub fn load(&mut self, path: &Path) -> Result<(), SessionError> {
        let pixels = io::read_image(path)?;
        self.set_image(path.to_path_buf(), Arc::new(pixels));
        Ok(())
    }

    /// Replace the current image. The mask starts transparent and history
    /// is cleared.
    pub fn set_image(&mut self, path: PathBuf, pixels: Arc<RgbaImage>) {
        let (w, h) = pixels.dimensions();
        log_info!("Image {} ({}x{})", path.display(), w, h);
        self.original_size = (w, h);
        self.mask = Some(MaskLayer::new(w, h));
        self.image = Some(LoadedImage { path, pixels });
        self.history.clear();
        self.stroke = StrokeSession::Idle;
        self.view.set_image_size([w, h]);
        self.view.reset();
        self.replace_contents();
    }

    /// Restore a previously edited mask for the current image. Ignored when
    /// the size does not match.
    pub fn restore_mask(&mut self, mask: MaskLayer) -> bool {
        let Some(current) = self.mask.as_ref() else { return false };
        if current.size() != mask.size() {
            return false;
        }
        self.mask = Some(mask);
        self.replace_contents();
        true
    }

    fn replace_contents(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        self.pending_dirty = None;
        self.cache.invalidate();
    }

    pub fn resize(&mut self, widget_size: [u32; 2]) {
        if self.view.set_widget_size(widget_size) {
            self.cache.invalidate();
        }
    }

    // ---- rendering -------------------------------------------------------------------

    /// Bring the composite frame up to date.
    pub fn render(&mut self) -> RenderOutcome {
        let dirty = self.pending_dirty.take();
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            let scene = Scene {
                view: &self.view,
                base: self.image.as_ref().map(|i| i.pixels.as_ref()),
                mask: self.mask.as_ref(),
                mode_outline: self.image.is_some() && self.tool.shows_mode_outline(),
                generation: self.generation,
            };
            self.cache.render(&scene, dirty)
        }));
        match result {
            Ok(outcome) => outcome,
            Err(payload) => {
                let msg = panic_message(payload.as_ref());
                log_err!("Render failed: {}", msg);
                self.cache.invalidate();
                self.set_status(format!("Render failed: {}", msg));
                RenderOutcome::Unchanged
            }
        }
    }

    fn mark_image_dirty(&mut self, image_rect: PixelRect) {
        let screen = self.view.image_rect_to_screen(image_rect);
        if screen.is_empty() {
            return;
        }
        self.pending_dirty = Some(match self.pending_dirty {
            Some(prev) => prev.union(&screen),
            None => screen,
        });
    }

    // ---- error boundary ----------------------------------------------------------

    fn guarded<T: Default>(&mut self, action: &str, f: impl FnOnce(&mut Self) -> Result<T, SessionError>) -> T {
        match panic::catch_unwind(AssertUnwindSafe(|| f(self))) {
            Ok(Ok(value)) => value,
            Ok(Err(e)) => {
                log_err!("{} failed: {}", action, e);
                self.set_status(e.to_string());
                T::default()
            }
            Err(payload) => {
                let msg = panic_message(payload.as_ref());
                log_err!("{} panicked: {}", action, msg);
                self.stroke = StrokeSession::Idle;
                self.cache.invalidate();
                self.set_status(format!("{} failed: {}", action, msg));
                T::default()
            }
        }
    }

    // ---- pointer events --------------------------------------------------------------

    pub fn pointer_pressed(&mut self, pos: Pos2, button: PointerButton) {
        self.guarded("Press", |s| s.on_press(pos, button));
    }

    pub fn pointer_moved(&mut self, pos: Pos2) {
        self.guarded("Drag", |s| s.on_move(pos));
    }

    pub fn pointer_released(&mut self, pos: Pos2) {
        self.guarded("Release", |s| s.on_release(pos));
    }

    fn on_press(&mut self, pos: Pos2, button: PointerButton) -> Result<(), SessionError> {
        if self.image.is_none() || !self.stroke.is_idle() {
            return Ok(());
        }
        if self.tool == ToolMode::Pan {
            self.stroke = StrokeSession::Panning { last: pos };
            return Ok(());
        }
        let Some(point) = self.view.screen_to_image(pos) else {
            return Ok(());
        };
        match self.tool {
            ToolMode::Paint | ToolMode::Erase => {
                let Some(engine) = PaintEngine::for_mode(self.tool, &self.props) else {
                    return Ok(());
                };
                let mask = self.mask.as_mut().ok_or(SessionError::NoImage)?;
                self.history.snapshot(mask);
                let touched = engine.stroke_start(mask, point);
                self.mark_image_dirty(touched);
                self.stroke = StrokeSession::Painting { engine, last: point };
            }
            ToolMode::Lasso => {
                let op = match button {
                    PointerButton::Primary => LassoOp::Add,
                    PointerButton::Secondary => LassoOp::Erase,
                };
                self.stroke = StrokeSession::Lasso(LassoFiller::begin(point, op));
            }
            ToolMode::RectAdd | ToolMode::RectErase | ToolMode::RectPrompt => {
                self.stroke = StrokeSession::Rect {
                    tool: self.tool,
                    selection: RectSelection::begin(point),
                };
            }
            ToolMode::Pan => {}
        }
        Ok(())
    }

    fn on_move(&mut self, pos: Pos2) -> Result<(), SessionError> {
        match &mut self.stroke {
            StrokeSession::Idle => {}
            StrokeSession::Painting { engine, last } => {
                let Some(point) = self.view.screen_to_image(pos) else {
                    return Ok(());
                };
                if point == *last {
                    return Ok(());
                }
                let engine = *engine;
                let from = std::mem::replace(last, point);
                let mask = self.mask.as_mut().ok_or(SessionError::NoImage)?;
                let touched = engine.stroke_move(mask, from, point);
                self.mark_image_dirty(touched);
            }
            StrokeSession::Lasso(filler) => {
                if let Some(point) = self.view.screen_to_image(pos) {
                    filler.push(point);
                }
            }
            StrokeSession::Rect { selection, .. } => {
                if let Some(point) = self.view.screen_to_image_clamped(pos) {
                    selection.update(point);
                }
            }
            StrokeSession::Panning { last } => {
                let dx = (pos.x - last.x).round();
                let dy = (pos.y - last.y).round();
                last.x += dx;
                last.y += dy;
                self.view.pan_by(dx as i32, dy as i32);
            }
        }
        Ok(())
    }

    fn on_release(&mut self, pos: Pos2) -> Result<(), SessionError> {
        match std::mem::take(&mut self.stroke) {
            StrokeSession::Idle | StrokeSession::Painting { .. } => {}
            StrokeSession::Panning { last } => {
                self.stroke = StrokeSession::Panning { last };
                self.on_move(pos)?;
                self.stroke = StrokeSession::Idle;
            }
            StrokeSession::Lasso(filler) => {
                if filler.points().len() < 3 {
                    return Ok(());
                }
                let color = self.props.color;
                let mask = self.mask.as_mut().ok_or(SessionError::NoImage)?;
                self.history.snapshot(mask);
                if let Some(touched) = filler.finish(mask, color) {
                    self.mark_image_dirty(touched);
                }
            }
            StrokeSession::Rect { tool, mut selection } => {
                if let Some(point) = self.view.screen_to_image_clamped(pos) {
                    selection.update(point);
                }
                let Some(bbox) = selection.finish() else {
                    return Ok(());
                };
                self.finish_rect(tool, bbox)?;
            }
        }
        Ok(())
    }

    fn finish_rect(&mut self, tool: ToolMode, bbox: BoxPrompt) -> Result<(), SessionError> {
        let follow_up = match tool {
            ToolMode::RectPrompt => RectFollowUp::Segment(PromptMerge::Overlay),
            _ => match self.rect_listener.as_mut() {
                Some(listener) => listener.rect_selected(tool, bbox),
                None => RectFollowUp::Ignore,
            },
        };
        match follow_up {
            RectFollowUp::Ignore => Ok(()),
            RectFollowUp::Segment(how) => self.run_prompt(bbox, how),
        }
    }

    /// Blocking backend call, then snapshot and merge. The mask and history
    /// are untouched when the backend fails or selects nothing.
    fn run_prompt(&mut self, bbox: BoxPrompt, how: PromptMerge) -> Result<(), SessionError> {
        let path = self.image.as_ref().map(|i| i.path.clone());
        let mask = self.mask.as_mut().ok_or(SessionError::NoImage)?;
        let start = Instant::now();
        let selection = self.prompt.predict_selection(path.as_deref(), mask.size(), bbox)?;
        // An empty selection changes nothing, so it must not cost an undo step.
        if !selection.is_empty() {
            self.history.snapshot(mask);
            let touched = merge_selection(mask, &selection, how, OVERLAY_COLOR);
            self.mark_image_dirty(touched);
        }
        let elapsed = start.elapsed().as_millis();
        log_info!("Box {} merged: {} px in {} ms", bbox, selection.count(), elapsed);
        self.set_status(format!(
            "Box prompt done in {} ms, {} pixels {}",
            elapsed,
            selection.count(),
            match how {
                PromptMerge::Overlay => "added",
                PromptMerge::Erase => "erased",
            }
        ));
        Ok(())
    }

    // ---- keyboard / wheel ------------------------------------------------------------

    /// Ctrl+wheel zoom. Returns true when the zoom changed.
    pub fn wheel(&mut self, delta_y: f32, ctrl: bool) -> bool {
        if !ctrl || self.image.is_none() || delta_y == 0.0 {
            return false;
        }
        let changed = if delta_y > 0.0 { self.view.zoom_in() } else { self.view.zoom_out() };
        if changed {
            self.set_status(format!("Zoom: {}%", self.view.zoom_percent()));
        }
        changed
    }

    /// Abort an in-progress lasso or box without touching the mask.
    pub fn cancel(&mut self) -> bool {
        match self.stroke {
            StrokeSession::Lasso(_) | StrokeSession::Rect { .. } => {
                self.stroke = StrokeSession::Idle;
                self.set_status("Selection cancelled");
                true
            }
            _ => false,
        }
    }

    pub fn undo(&mut self) -> bool {
        self.step_history(true)
    }

    pub fn redo(&mut self) -> bool {
        self.step_history(false)
    }

    fn step_history(&mut self, back: bool) -> bool {
        if self.tool == ToolMode::Pan || !self.stroke.is_idle() {
            return false;
        }
        let Some(mask) = self.mask.as_mut() else { return false };
        let done = if back { self.history.undo(mask) } else { self.history.redo(mask) };
        let msg = match (back, done) {
            (true, true) => "Undo",
            (true, false) => "Nothing to undo",
            (false, true) => "Redo",
            (false, false) => "Nothing to redo",
        };
        if done {
            self.cache.invalidate();
        }
        self.set_status(msg);
        done
    }

    /// Make the mask transparent. Snapshots first when there was content.
    pub fn clear_mask(&mut self) -> bool {
        let Some(mask) = self.mask.as_mut() else { return false };
        let had_content = mask.has_content();
        if had_content {
            self.history.snapshot(mask);
        }
        mask.clear();
        self.cache.invalidate();
        self.set_status("Mask cleared");
        had_content
    }

    // ---- tools -----------------------------------------------------------------------

    pub fn set_tool(&mut self, mode: ToolMode) {
        if mode == self.tool {
            return;
        }
        // A half-drawn lasso or box does not survive a tool change.
        if matches!(self.stroke, StrokeSession::Lasso(_) | StrokeSession::Rect { .. }) {
            self.stroke = StrokeSession::Idle;
        }
        if mode == ToolMode::Pan {
            self.resume_tool = self.tool;
        }
        self.tool = mode;
        self.set_status(mode.hint());
    }

    /// Activate `mode`, or fall back to paint when it is already active.
    pub fn toggle_tool(&mut self, mode: ToolMode) {
        if mode == ToolMode::Pan {
            self.toggle_pan();
        } else if self.tool == mode {
            self.set_tool(ToolMode::Paint);
        } else {
            self.set_tool(mode);
        }
    }

    pub fn toggle_pan(&mut self) {
        if self.tool == ToolMode::Pan {
            let resume = self.resume_tool;
            self.set_tool(resume);
        } else {
            self.set_tool(ToolMode::Pan);
        }
    }

    pub fn set_brush_size(&mut self, size: u32) -> u32 {
        let size = self.props.set_brush_size(size);
        self.set_status(format!("Brush: {} px", size));
        size
    }

    pub fn step_brush(&mut self, delta: i32) -> u32 {
        let size = self.props.step_brush(delta);
        self.set_status(format!("Brush: {} px", size));
        size
    }

    pub fn set_preset_color(&mut self, index: usize) -> bool {
        self.props.set_preset(index)
    }

    pub fn set_custom_color(&mut self, rgb: [u8; 3]) {
        self.props.set_custom_color(rgb);
    }

    pub fn reset_view(&mut self) {
        self.view.reset();
        self.set_status("View reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::segment::{MaskValues, PredictedMask, Prediction, PromptOptions, SegmentationBackend, SegmentOnSelect};
    use image::Rgba;

    const WIDGET: [u32; 2] = [1000, 800];

    /// 100×100 image centred at (450, 350) with scale 1.
    fn session() -> MaskSession {
        let mut s = MaskSession::new(ToolProperties::default(), 20, RectPromptBridge::default());
        s.resize(WIDGET);
        s.set_image(PathBuf::from("img.png"), Arc::new(RgbaImage::new(100, 100)));
        s
    }

    fn at(x: f32, y: f32) -> Pos2 {
        Pos2::new(450.0 + x, 350.0 + y)
    }

    struct FullBox;

    impl SegmentationBackend for FullBox {
        fn name(&self) -> &str {
            "full-box"
        }

        fn predict(&mut self, _: &Path, bbox: BoxPrompt, _: PromptOptions) -> Result<Prediction, SegmentError> {
            let values = (0..100u32 * 100)
                .map(|i| {
                    let (x, y) = (i % 100, i / 100);
                    x >= bbox.x1 && x < bbox.x2 && y >= bbox.y1 && y < bbox.y2
                })
                .collect();
            Ok(Prediction {
                mask: PredictedMask { width: 100, height: 100, values: MaskValues::Bool(values) },
                source_size: (100, 100),
            })
        }
    }

    struct SelectsNothing;

    impl SegmentationBackend for SelectsNothing {
        fn name(&self) -> &str {
            "selects-nothing"
        }

        fn predict(&mut self, _: &Path, _: BoxPrompt, _: PromptOptions) -> Result<Prediction, SegmentError> {
            Ok(Prediction {
                mask: PredictedMask { width: 100, height: 100, values: MaskValues::Byte(vec![0; 100 * 100]) },
                source_size: (100, 100),
            })
        }
    }

    struct Exploding;

    impl SegmentationBackend for Exploding {
        fn name(&self) -> &str {
            "exploding"
        }

        fn predict(&mut self, _: &Path, _: BoxPrompt, _: PromptOptions) -> Result<Prediction, SegmentError> {
            panic!("model weights missing");
        }
    }

    #[test]
    fn click_paints_point_with_draw_colour() {
        let mut s = session();
        s.pointer_pressed(at(50.0, 50.0), PointerButton::Primary);
        s.pointer_released(at(50.0, 50.0));
        let mask = s.mask().expect("mask");
        assert_eq!(mask.get_pixel(50, 50), Rgba([255, 0, 0, 50]));
        assert_eq!(mask.alpha(50, 70), 0);
        assert_eq!(s.history().undo_len(), 1);
    }

    #[test]
    fn one_snapshot_per_stroke_and_undo_restores() {
        let mut s = session();
        s.pointer_pressed(at(10.0, 10.0), PointerButton::Primary);
        for i in 11..60 {
            s.pointer_moved(at(i as f32, 10.0));
        }
        s.pointer_released(at(60.0, 10.0));
        assert_eq!(s.history().undo_len(), 1);
        assert!(s.has_mask_content());
        assert!(s.undo());
        assert!(!s.has_mask_content());
        assert!(s.redo());
        assert_eq!(s.mask().expect("mask").alpha(30, 10), 50);
    }

    #[test]
    fn presses_outside_the_image_are_ignored() {
        let mut s = session();
        s.pointer_pressed(Pos2::new(5.0, 5.0), PointerButton::Primary);
        s.pointer_released(Pos2::new(5.0, 5.0));
        assert!(!s.has_mask_content());
        assert!(!s.history().can_undo());
    }

    #[test]
    fn events_without_an_image_are_no_ops() {
        let mut s = MaskSession::new(ToolProperties::default(), 20, RectPromptBridge::default());
        s.resize(WIDGET);
        s.pointer_pressed(Pos2::new(500.0, 400.0), PointerButton::Primary);
        s.pointer_released(Pos2::new(500.0, 400.0));
        assert!(!s.undo());
        assert!(!s.clear_mask());
        assert!(!s.wheel(1.0, true));
    }

    #[test]
    fn lasso_fills_on_release_and_escape_cancels() {
        let mut s = session();
        s.set_tool(ToolMode::Lasso);
        s.pointer_pressed(at(10.0, 10.0), PointerButton::Primary);
        s.pointer_moved(at(20.0, 10.0));
        s.pointer_moved(at(20.0, 20.0));
        s.pointer_moved(at(10.0, 20.0));
        s.pointer_released(at(10.0, 20.0));
        assert_eq!(s.mask().expect("mask").masked_pixel_count(), 100);

        s.pointer_pressed(at(40.0, 40.0), PointerButton::Primary);
        s.pointer_moved(at(60.0, 40.0));
        s.pointer_moved(at(60.0, 60.0));
        assert!(s.cancel());
        s.pointer_released(at(60.0, 60.0));
        assert_eq!(s.mask().expect("mask").masked_pixel_count(), 100);
        assert_eq!(s.history().undo_len(), 1);
    }

    #[test]
    fn secondary_button_lasso_erases() {
        let mut s = session();
        s.set_tool(ToolMode::Lasso);
        s.pointer_pressed(at(0.0, 0.0), PointerButton::Primary);
        s.pointer_moved(at(50.0, 0.0));
        s.pointer_moved(at(50.0, 50.0));
        s.pointer_moved(at(0.0, 50.0));
        s.pointer_released(at(0.0, 50.0));
        s.pointer_pressed(at(0.0, 0.0), PointerButton::Secondary);
        s.pointer_moved(at(10.0, 0.0));
        s.pointer_moved(at(10.0, 10.0));
        s.pointer_moved(at(0.0, 10.0));
        s.pointer_released(at(0.0, 10.0));
        assert_eq!(s.mask().expect("mask").masked_pixel_count(), 2500 - 100);
    }

    #[test]
    fn rect_prompt_merges_prediction_once_per_box() {
        let mut s = session();
        s.prompt_bridge_mut().set_backend(Some(Box::new(FullBox)));
        s.set_tool(ToolMode::RectPrompt);
        s.pointer_pressed(at(10.0, 10.0), PointerButton::Primary);
        s.pointer_moved(at(30.0, 20.0));
        s.pointer_released(at(30.0, 20.0));
        let mask = s.mask().expect("mask").clone();
        assert_eq!(mask.masked_pixel_count(), 20 * 10);
        assert_eq!(mask.get_pixel(15, 15), OVERLAY_COLOR);
        assert!(s.take_status().expect("status").contains("200 pixels"));

        // Same box again: identical mask, one more history entry.
        s.pointer_pressed(at(10.0, 10.0), PointerButton::Primary);
        s.pointer_released(at(30.0, 20.0));
        assert_eq!(s.mask().expect("mask"), &mask);
        assert_eq!(s.history().undo_len(), 2);
    }

    #[test]
    fn empty_prediction_leaves_history_alone() {
        let mut s = session();
        s.pointer_pressed(at(5.0, 5.0), PointerButton::Primary);
        s.pointer_released(at(5.0, 5.0));
        assert!(s.undo());
        assert!(s.history().can_redo());

        s.prompt_bridge_mut().set_backend(Some(Box::new(SelectsNothing)));
        s.set_tool(ToolMode::RectPrompt);
        s.take_status();
        s.pointer_pressed(at(10.0, 10.0), PointerButton::Primary);
        s.pointer_released(at(30.0, 20.0));
        let status = s.take_status().expect("status");
        assert!(status.contains("0 pixels added"), "{status}");
        assert!(!s.has_mask_content());
        assert!(!s.history().can_undo());
        assert!(s.history().can_redo());
    }

    #[test]
    fn rect_add_needs_a_listener() {
        let mut s = session();
        s.prompt_bridge_mut().set_backend(Some(Box::new(FullBox)));
        s.set_tool(ToolMode::RectAdd);
        s.pointer_pressed(at(0.0, 0.0), PointerButton::Primary);
        s.pointer_released(at(10.0, 10.0));
        assert!(!s.has_mask_content());

        s.set_rect_listener(Some(Box::new(SegmentOnSelect)));
        s.pointer_pressed(at(0.0, 0.0), PointerButton::Primary);
        s.pointer_released(at(10.0, 10.0));
        assert_eq!(s.mask().expect("mask").masked_pixel_count(), 100);

        s.set_tool(ToolMode::RectErase);
        s.pointer_pressed(at(0.0, 0.0), PointerButton::Primary);
        s.pointer_released(at(5.0, 10.0));
        assert_eq!(s.mask().expect("mask").masked_pixel_count(), 50);
    }

    #[test]
    fn backend_failures_become_status_messages() {
        let mut s = session();
        s.set_tool(ToolMode::RectPrompt);
        s.pointer_pressed(at(0.0, 0.0), PointerButton::Primary);
        s.pointer_released(at(10.0, 10.0));
        assert_eq!(s.take_status().as_deref(), Some("Segmentation backend is not available"));

        s.prompt_bridge_mut().set_backend(Some(Box::new(Exploding)));
        s.pointer_pressed(at(0.0, 0.0), PointerButton::Primary);
        s.pointer_released(at(10.0, 10.0));
        let status = s.take_status().expect("status");
        assert!(status.contains("model weights missing"), "{status}");
        assert!(!s.has_mask_content());
        assert!(!s.history().can_undo());

        // Still usable.
        s.set_tool(ToolMode::Paint);
        s.pointer_pressed(at(5.0, 5.0), PointerButton::Primary);
        s.pointer_released(at(5.0, 5.0));
        assert!(s.has_mask_content());
    }

    #[test]
    fn degenerate_box_is_ignored() {
        let mut s = session();
        s.prompt_bridge_mut().set_backend(Some(Box::new(FullBox)));
        s.set_tool(ToolMode::RectPrompt);
        s.pointer_pressed(at(10.0, 10.0), PointerButton::Primary);
        s.pointer_released(at(10.0, 40.0));
        assert!(!s.has_mask_content());
        assert!(s.status().is_none_or(|m| !m.contains("failed")));
    }

    #[test]
    fn tool_toggles_and_pan_resume() {
        let mut s = session();
        s.toggle_tool(ToolMode::Lasso);
        assert_eq!(s.tool(), ToolMode::Lasso);
        s.toggle_tool(ToolMode::Lasso);
        assert_eq!(s.tool(), ToolMode::Paint);

        s.set_tool(ToolMode::Erase);
        s.toggle_pan();
        assert_eq!(s.tool(), ToolMode::Pan);
        s.toggle_pan();
        assert_eq!(s.tool(), ToolMode::Erase);
    }

    #[test]
    fn undo_is_blocked_while_panning() {
        let mut s = session();
        s.pointer_pressed(at(5.0, 5.0), PointerButton::Primary);
        s.pointer_released(at(5.0, 5.0));
        s.toggle_pan();
        assert!(!s.undo());
        s.toggle_pan();
        assert!(s.undo());
    }

    #[test]
    fn pan_drag_moves_the_view() {
        let mut s = session();
        s.set_tool(ToolMode::Pan);
        s.pointer_pressed(Pos2::new(10.0, 10.0), PointerButton::Primary);
        s.pointer_moved(Pos2::new(40.0, 30.0));
        s.pointer_released(Pos2::new(45.0, 30.0));
        assert_eq!(s.view().pan(), [35, 20]);
        s.reset_view();
        assert_eq!(s.view().pan(), [0, 0]);
    }

    #[test]
    fn ctrl_wheel_zooms_and_reports() {
        let mut s = session();
        assert!(!s.wheel(1.0, false));
        assert!(s.wheel(1.0, true));
        assert_eq!(s.take_status().as_deref(), Some("Zoom: 110%"));
    }

    #[test]
    fn clear_mask_snapshots_only_with_content() {
        let mut s = session();
        assert!(!s.clear_mask());
        assert!(!s.history().can_undo());
        s.pointer_pressed(at(5.0, 5.0), PointerButton::Primary);
        s.pointer_released(at(5.0, 5.0));
        assert!(s.clear_mask());
        assert!(!s.has_mask_content());
        assert!(s.undo());
        assert!(s.has_mask_content());
    }

    #[test]
    fn incremental_frames_match_a_fresh_render() {
        let mut s = session();
        for _ in 0..3 {
            s.wheel(1.0, true);
        }
        assert_eq!(s.render(), RenderOutcome::Full);
        s.pointer_pressed(at(60.0, 60.0), PointerButton::Primary);
        s.pointer_moved(at(90.0, 75.0));
        s.pointer_released(at(90.0, 75.0));
        assert!(matches!(s.render(), RenderOutcome::Partial(_)));
        let incremental = s.frame().clone();

        s.cache.invalidate();
        assert_eq!(s.render(), RenderOutcome::Full);
        assert_eq!(s.frame(), &incremental);
    }

    #[test]
    fn restore_mask_requires_matching_size() {
        let mut s = session();
        let mut m = MaskLayer::new(100, 100);
        m.put_pixel(1, 1, Rgba([255, 0, 0, 50]));
        assert!(s.restore_mask(m));
        assert!(s.has_mask_content());
        assert!(!s.restore_mask(MaskLayer::new(10, 10)));
    }
}
