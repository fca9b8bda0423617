use egui::Pos2;

use crate::canvas::PixelRect;

pub const MIN_ZOOM: f64 = 0.1;
pub const MAX_ZOOM: f64 = 10.0;
pub const ZOOM_STEP: f64 = 1.1;
/// Total widget margin (split evenly) reserved when fitting the image.
pub const FIT_MARGIN: f64 = 20.0;
/// Below this displayed edge length the zoom factor is ignored.
pub const MIN_DISPLAY_EDGE: i32 = 10;

// ============================================================================
// VIEW TRANSFORM - widget-local screen space <-> image pixel space
// ============================================================================

/// Maps between widget-local screen coordinates and image pixels.
///
/// `scale = min(fit_w, fit_h, 1.0) * zoom`, unless the displayed image would
/// be smaller than `MIN_DISPLAY_EDGE` on either axis, in which case the plain
/// fit ratio is used. The image rectangle is centred in the widget and then
/// shifted by the pan offset.
#[derive(Clone, Debug, PartialEq)]
pub struct ViewTransform {
    zoom: f64,
    pan: [i32; 2],
    widget_size: [u32; 2],
    image_size: [u32; 2],
    scale: f64,
    image_rect: PixelRect,
}

impl Default for ViewTransform {
    fn default() -> Self {
        Self {
            zoom: 1.0,
            pan: [0, 0],
            widget_size: [0, 0],
            image_size: [0, 0],
            scale: 1.0,
            image_rect: PixelRect::default(),
        }
    }
}

impl ViewTransform {
    pub fn new(widget_size: [u32; 2], image_size: [u32; 2]) -> Self {
        let mut view = Self { widget_size, image_size, ..Default::default() };
        view.recompute();
        view
    }

    // ---- accessors -------------------------------------------------------------

    pub fn zoom(&self) -> f64 {
        self.zoom
    }

    /// Zoom as a truncated percentage, the way the status bar shows it.
    pub fn zoom_percent(&self) -> i32 {
        (self.zoom * 100.0) as i32
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn pan(&self) -> [i32; 2] {
        self.pan
    }

    pub fn widget_size(&self) -> [u32; 2] {
        self.widget_size
    }

    pub fn image_size(&self) -> [u32; 2] {
        self.image_size
    }

    /// Display rectangle of the image in widget-local screen pixels.
    pub fn image_rect(&self) -> PixelRect {
        self.image_rect
    }

    pub fn has_image(&self) -> bool {
        self.image_size[0] > 0 && self.image_size[1] > 0
    }

    // ---- state changes ---------------------------------------------------------

    /// Returns true when the widget size actually changed.
    pub fn set_widget_size(&mut self, size: [u32; 2]) -> bool {
        if self.widget_size == size {
            return false;
        }
        self.widget_size = size;
        self.recompute();
        true
    }

    pub fn set_image_size(&mut self, size: [u32; 2]) {
        self.image_size = size;
        self.recompute();
    }

    pub fn zoom_in(&mut self) -> bool {
        self.apply_zoom(self.zoom * ZOOM_STEP)
    }

    pub fn zoom_out(&mut self) -> bool {
        self.apply_zoom(self.zoom / ZOOM_STEP)
    }

    /// Out-of-range zoom requests are rejected and leave the view untouched.
    fn apply_zoom(&mut self, new_zoom: f64) -> bool {
        if !(MIN_ZOOM..=MAX_ZOOM).contains(&new_zoom) {
            return false;
        }
        self.zoom = new_zoom;
        self.recompute();
        true
    }

    /// Translate the display rectangle by a screen-space delta.
    pub fn pan_by(&mut self, dx: i32, dy: i32) {
        if dx == 0 && dy == 0 {
            return;
        }
        self.pan[0] += dx;
        self.pan[1] += dy;
        self.recompute();
    }

    /// Zoom back to 1.0 and drop the pan offset.
    pub fn reset(&mut self) {
        self.zoom = 1.0;
        self.pan = [0, 0];
        self.recompute();
    }

    pub fn recompute(&mut self) {
        if !self.has_image() {
            self.scale = 1.0;
            self.image_rect = PixelRect::default();
            return;
        }
        let iw = self.image_size[0] as f64;
        let ih = self.image_size[1] as f64;
        let fit_w = (self.widget_size[0] as f64 - FIT_MARGIN) / iw;
        let fit_h = (self.widget_size[1] as f64 - FIT_MARGIN) / ih;

        let mut scale = fit_w.min(fit_h).min(1.0) * self.zoom;
        let mut new_w = (iw * scale) as i32;
        let mut new_h = (ih * scale) as i32;
        if new_w < MIN_DISPLAY_EDGE || new_h < MIN_DISPLAY_EDGE {
            scale = fit_w.min(fit_h);
            new_w = (iw * scale) as i32;
            new_h = (ih * scale) as i32;
        }

        if scale <= 0.0 || new_w <= 0 || new_h <= 0 {
            // Widget smaller than its margin.
            self.scale = scale.max(f64::EPSILON);
            self.image_rect = PixelRect::default();
            return;
        }

        let x = (self.widget_size[0] as i32 - new_w).div_euclid(2) + self.pan[0];
        let y = (self.widget_size[1] as i32 - new_h).div_euclid(2) + self.pan[1];
        self.scale = scale;
        self.image_rect = PixelRect::new(x, y, new_w, new_h);
    }

    // ---- mapping ---------------------------------------------------------------

    /// Image pixel under `pos`, or `None` when `pos` is outside the displayed
    /// image. Callers ignore `None`; they never clamp.
    pub fn screen_to_image(&self, pos: Pos2) -> Option<(u32, u32)> {
        if self.image_rect.is_empty() || !pos.x.is_finite() || !pos.y.is_finite() {
            return None;
        }
        let sx = pos.x.floor() as i32;
        let sy = pos.y.floor() as i32;
        if !self.image_rect.contains(sx, sy) {
            return None;
        }
        let ix = ((sx - self.image_rect.x) as f64 / self.scale) as u32;
        let iy = ((sy - self.image_rect.y) as f64 / self.scale) as u32;
        if ix >= self.image_size[0] || iy >= self.image_size[1] {
            return None;
        }
        Some((ix, iy))
    }

    /// Like `screen_to_image` but clamps to the image edge instead of failing.
    /// Used while dragging a rectangle selection.
    pub fn screen_to_image_clamped(&self, pos: Pos2) -> Option<(u32, u32)> {
        if self.image_rect.is_empty() || !pos.x.is_finite() || !pos.y.is_finite() {
            return None;
        }
        let rel_x = (pos.x.floor() as i32 - self.image_rect.x) as f64 / self.scale;
        let rel_y = (pos.y.floor() as i32 - self.image_rect.y) as f64 / self.scale;
        let max_x = self.image_size[0].saturating_sub(1) as f64;
        let max_y = self.image_size[1].saturating_sub(1) as f64;
        Some((
            rel_x.floor().clamp(0.0, max_x) as u32,
            rel_y.floor().clamp(0.0, max_y) as u32,
        ))
    }

    /// Screen position of the top-left corner of image pixel `(x, y)`.
    pub fn image_to_screen(&self, x: f64, y: f64) -> Pos2 {
        Pos2::new(
            (self.image_rect.x + (x * self.scale) as i32) as f32,
            (self.image_rect.y + (y * self.scale) as i32) as f32,
        )
    }

    /// Screen rectangle covering every screen pixel that samples from `rect`.
    /// Clipped to the displayed image.
    pub fn image_rect_to_screen(&self, rect: PixelRect) -> PixelRect {
        if rect.is_empty() || self.image_rect.is_empty() {
            return PixelRect::default();
        }
        let ox = self.image_rect.x;
        let oy = self.image_rect.y;
        let screen = PixelRect::from_min_max(
            ox + (rect.x as f64 * self.scale).floor() as i32,
            oy + (rect.y as f64 * self.scale).floor() as i32,
            ox + (rect.right() as f64 * self.scale).ceil() as i32,
            oy + (rect.bottom() as f64 * self.scale).ceil() as i32,
        );
        // One pixel of slack for float rounding at the sampling boundary.
        screen.expand(1).intersect(&self.image_rect)
    }

    /// Image sub-rectangle sampled by the screen pixels of `rect`.
    /// Clipped to the image bounds.
    pub fn screen_rect_to_image(&self, rect: PixelRect) -> PixelRect {
        let visible = rect.intersect(&self.image_rect);
        if visible.is_empty() {
            return PixelRect::default();
        }
        let ox = self.image_rect.x;
        let oy = self.image_rect.y;
        let image = PixelRect::from_min_max(
            ((visible.x - ox) as f64 / self.scale).floor() as i32,
            ((visible.y - oy) as f64 / self.scale).floor() as i32,
            ((visible.right() - ox) as f64 / self.scale).ceil() as i32 + 1,
            ((visible.bottom() - oy) as f64 / self.scale).ceil() as i32 + 1,
        );
        image.intersect(&PixelRect::new(
            0,
            0,
            self.image_size[0] as i32,
            self.image_size[1] as i32,
        ))
    }

    /// Image pixel sampled by screen pixel `(sx, sy)`, which must lie inside
    /// `image_rect`. Shared by every render path so they agree exactly.
    #[inline]
    pub fn sample_source(&self, sx: i32, sy: i32) -> (u32, u32) {
        let ix = ((sx - self.image_rect.x) as f64 / self.scale) as u32;
        let iy = ((sy - self.image_rect.y) as f64 / self.scale) as u32;
        (
            ix.min(self.image_size[0].saturating_sub(1)),
            iy.min(self.image_size[1].saturating_sub(1)),
        )
    }
}
