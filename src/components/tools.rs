use egui::Pos2;
use image::Rgba;

use crate::canvas::{Composition, MaskLayer, PixelRect};
use crate::ops::segment::BoxPrompt;

// ============================================================================
// TOOL MODES
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum ToolMode {
    /// Brush that marks pixels with the draw colour.
    #[default]
    Paint,
    /// Brush that clears pixels.
    Erase,
    Lasso,
    /// Rectangle handed to the rect-tool listener, merged as an overlay.
    RectAdd,
    /// Rectangle handed to the rect-tool listener, merged as an erase.
    RectErase,
    /// Rectangle sent straight to the segmentation backend.
    RectPrompt,
    Pan,
}

impl ToolMode {
    pub const ALL: [ToolMode; 7] = [
        ToolMode::Paint,
        ToolMode::Erase,
        ToolMode::Lasso,
        ToolMode::RectAdd,
        ToolMode::RectErase,
        ToolMode::RectPrompt,
        ToolMode::Pan,
    ];

    pub fn label(self) -> &'static str {
        match self {
            ToolMode::Paint => "Paint",
            ToolMode::Erase => "Erase",
            ToolMode::Lasso => "Lasso",
            ToolMode::RectAdd => "Box add",
            ToolMode::RectErase => "Box erase",
            ToolMode::RectPrompt => "Box prompt",
            ToolMode::Pan => "Pan",
        }
    }

    /// Status line shown when the tool becomes active.
    pub fn hint(self) -> &'static str {
        match self {
            ToolMode::Paint => "Paint mode: add to mask (Ctrl+Z undo, Ctrl+Y redo)",
            ToolMode::Erase => "Erase mode: remove from mask (Ctrl+Z undo, Ctrl+Y redo)",
            ToolMode::Lasso => "Lasso mode: hold and draw a closed outline, release to fill",
            ToolMode::RectAdd => "Box add mode: drag a box to add the predicted region",
            ToolMode::RectErase => "Box erase mode: drag a box to erase the predicted region",
            ToolMode::RectPrompt => "Box prompt mode: drag a box to run segmentation",
            ToolMode::Pan => "Pan mode: drag to move the image",
        }
    }

    pub fn is_rect(self) -> bool {
        matches!(self, ToolMode::RectAdd | ToolMode::RectErase | ToolMode::RectPrompt)
    }

    pub fn is_brush(self) -> bool {
        matches!(self, ToolMode::Paint | ToolMode::Erase)
    }

    /// Every tool except the default paint brush gets the dashed frame.
    pub fn shows_mode_outline(self) -> bool {
        self != ToolMode::Paint
    }
}

// ============================================================================
// TOOL PROPERTIES
// ============================================================================

pub const MIN_BRUSH_SIZE: u32 = 1;
pub const MAX_BRUSH_SIZE: u32 = 50;
pub const DEFAULT_BRUSH_SIZE: u32 = 10;
/// Alpha applied to every preset and custom draw colour.
pub const DRAW_ALPHA: u8 = 50;

pub const COLOR_PRESETS: [(&str, [u8; 3]); 5] = [
    ("Red", [255, 0, 0]),
    ("White", [255, 255, 255]),
    ("Green", [0, 255, 0]),
    ("Blue", [0, 0, 255]),
    ("Yellow", [255, 255, 0]),
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ToolProperties {
    /// Brush diameter in image pixels.
    pub brush_size: u32,
    pub color: Rgba<u8>,
}

impl Default for ToolProperties {
    fn default() -> Self {
        Self {
            brush_size: DEFAULT_BRUSH_SIZE,
            color: Rgba([255, 0, 0, DRAW_ALPHA]),
        }
    }
}

impl ToolProperties {
    pub fn set_brush_size(&mut self, size: u32) -> u32 {
        self.brush_size = size.clamp(MIN_BRUSH_SIZE, MAX_BRUSH_SIZE);
        self.brush_size
    }

    /// Grow or shrink the brush by `delta`, staying inside the slider range.
    pub fn step_brush(&mut self, delta: i32) -> u32 {
        let next = (self.brush_size as i64 + delta as i64)
            .clamp(MIN_BRUSH_SIZE as i64, MAX_BRUSH_SIZE as i64);
        self.set_brush_size(next as u32)
    }

    /// Use an arbitrary RGB colour at the fixed draw alpha.
    pub fn set_custom_color(&mut self, rgb: [u8; 3]) {
        self.color = Rgba([rgb[0], rgb[1], rgb[2], DRAW_ALPHA]);
    }

    /// Select one of `COLOR_PRESETS`. Unknown indices are ignored.
    pub fn set_preset(&mut self, index: usize) -> bool {
        match COLOR_PRESETS.get(index) {
            Some((_, rgb)) => {
                self.set_custom_color(*rgb);
                true
            }
            None => false,
        }
    }
}

// ============================================================================
// PAINT ENGINE - round brush stamping
// ============================================================================

/// Round-capped brush segments written with direct replace (paint) or clear
/// (erase) composition.
///
/// A pixel is covered when the distance from its grid position to the
/// segment is at most half the diameter. Coverage is binary, so overlapping
/// strokes never accumulate alpha.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PaintEngine {
    diameter: u32,
    color: Rgba<u8>,
    composition: Composition,
}

impl PaintEngine {
    pub fn paint(props: &ToolProperties) -> Self {
        Self {
            diameter: props.brush_size.max(1),
            color: props.color,
            composition: Composition::Source,
        }
    }

    pub fn erase(props: &ToolProperties) -> Self {
        Self {
            diameter: props.brush_size.max(1),
            color: Rgba([0, 0, 0, 255]),
            composition: Composition::Clear,
        }
    }

    /// Brush for `mode`, or `None` when the mode does not paint.
    pub fn for_mode(mode: ToolMode, props: &ToolProperties) -> Option<Self> {
        match mode {
            ToolMode::Paint => Some(Self::paint(props)),
            ToolMode::Erase => Some(Self::erase(props)),
            _ => None,
        }
    }

    /// Dab a single point so a click without movement still marks the mask.
    pub fn stroke_start(&self, mask: &mut MaskLayer, point: (u32, u32)) -> PixelRect {
        self.stamp_segment(mask, point, point)
    }

    pub fn stroke_move(&self, mask: &mut MaskLayer, from: (u32, u32), to: (u32, u32)) -> PixelRect {
        self.stamp_segment(mask, from, to)
    }

    fn radius(&self) -> f32 {
        self.diameter as f32 / 2.0
    }

    /// Image-space bounds a segment can touch, clipped to the mask.
    pub fn segment_bounds(&self, mask: &MaskLayer, a: (u32, u32), b: (u32, u32)) -> PixelRect {
        let r = self.radius().ceil() as i32;
        PixelRect::from_min_max(
            a.0.min(b.0) as i32 - r,
            a.1.min(b.1) as i32 - r,
            a.0.max(b.0) as i32 + r + 1,
            a.1.max(b.1) as i32 + r + 1,
        )
        .intersect(&mask.bounds())
    }

    fn stamp_segment(&self, mask: &mut MaskLayer, a: (u32, u32), b: (u32, u32)) -> PixelRect {
        let bounds = self.segment_bounds(mask, a, b);
        if bounds.is_empty() {
            return bounds;
        }
        let r2 = self.radius() * self.radius();
        let (ax, ay) = (a.0 as f32, a.1 as f32);
        let (bx, by) = (b.0 as f32, b.1 as f32);
        for y in bounds.y..bounds.bottom() {
            for x in bounds.x..bounds.right() {
                if dist2_to_segment(x as f32, y as f32, ax, ay, bx, by) <= r2 {
                    mask.compose_pixel(x as u32, y as u32, self.color, 255, self.composition);
                }
            }
        }
        bounds
    }
}

fn dist2_to_segment(px: f32, py: f32, ax: f32, ay: f32, bx: f32, by: f32) -> f32 {
    let (dx, dy) = (bx - ax, by - ay);
    let len2 = dx * dx + dy * dy;
    let t = if len2 <= f32::EPSILON {
        0.0
    } else {
        (((px - ax) * dx + (py - ay) * dy) / len2).clamp(0.0, 1.0)
    };
    let (cx, cy) = (ax + t * dx - px, ay + t * dy - py);
    cx * cx + cy * cy
}

// ============================================================================
// LASSO FILLER
// ============================================================================

/// How a finished lasso polygon is merged into the mask.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum LassoOp {
    /// Source-over with the draw colour.
    #[default]
    Add,
    /// Destination-out; clears the enclosed area.
    Erase,
}

/// Vertical subsamples per pixel row when rasterising the polygon.
const LASSO_SUBSAMPLES: usize = 4;

/// Freehand polygon collector. Points are image pixel coordinates, in order,
/// with an implicit closing edge from last to first.
#[derive(Clone, Debug, Default)]
pub struct LassoFiller {
    points: Vec<Pos2>,
    op: LassoOp,
}

impl LassoFiller {
    pub fn begin(start: (u32, u32), op: LassoOp) -> Self {
        Self {
            points: vec![Pos2::new(start.0 as f32, start.1 as f32)],
            op,
        }
    }

    /// Record the next pointer position. No simplification is applied.
    pub fn push(&mut self, point: (u32, u32)) {
        self.points.push(Pos2::new(point.0 as f32, point.1 as f32));
    }

    pub fn points(&self) -> &[Pos2] {
        &self.points
    }

    pub fn op(&self) -> LassoOp {
        self.op
    }

    pub fn cancel(&mut self) {
        self.points.clear();
    }

    /// Image-space bounds of the collected outline, clipped to `mask`.
    pub fn bounds(&self, mask: &MaskLayer) -> PixelRect {
        let Some(first) = self.points.first() else {
            return PixelRect::default();
        };
        let (mut min, mut max) = (*first, *first);
        for p in &self.points {
            min = min.min(*p);
            max = max.max(*p);
        }
        PixelRect::from_min_max(
            min.x.floor() as i32,
            min.y.floor() as i32,
            max.x.ceil() as i32 + 1,
            max.y.ceil() as i32 + 1,
        )
        .intersect(&mask.bounds())
    }

    /// Fill the closed polygon into `mask`. Fewer than three points is a no-op
    /// and returns `None`; otherwise returns the touched image rectangle.
    pub fn finish(self, mask: &mut MaskLayer, color: Rgba<u8>) -> Option<PixelRect> {
        if self.points.len() < 3 {
            return None;
        }
        let bounds = self.bounds(mask);
        if bounds.is_empty() {
            return None;
        }
        let (src, composition) = match self.op {
            LassoOp::Add => (color, Composition::SourceOver),
            LassoOp::Erase => (Rgba([0, 0, 0, 255]), Composition::DestinationOut),
        };

        let width = bounds.width as usize;
        let mut coverage = vec![0f32; width];
        let mut crossings: Vec<f32> = Vec::new();
        for y in bounds.y..bounds.bottom() {
            coverage.iter_mut().for_each(|c| *c = 0.0);
            for s in 0..LASSO_SUBSAMPLES {
                let sample_y = y as f32 + (s as f32 + 0.5) / LASSO_SUBSAMPLES as f32;
                scanline_crossings(&self.points, sample_y, &mut crossings);
                for pair in crossings.chunks_exact(2) {
                    accumulate_span(&mut coverage, bounds.x, pair[0], pair[1]);
                }
            }
            for (i, c) in coverage.iter().enumerate() {
                let cov = (c / LASSO_SUBSAMPLES as f32 * 255.0).round().clamp(0.0, 255.0) as u8;
                if cov > 0 {
                    mask.compose_pixel((bounds.x + i as i32) as u32, y as u32, src, cov, composition);
                }
            }
        }
        Some(bounds)
    }
}

/// Sorted x positions where the closed polygon crosses `y` (even-odd pairs).
fn scanline_crossings(points: &[Pos2], y: f32, out: &mut Vec<f32>) {
    out.clear();
    let n = points.len();
    for i in 0..n {
        let a = points[i];
        let b = points[(i + 1) % n];
        if (a.y <= y && b.y > y) || (b.y <= y && a.y > y) {
            let t = (y - a.y) / (b.y - a.y);
            out.push(a.x + t * (b.x - a.x));
        }
    }
    out.sort_by(|a, b| a.total_cmp(b));
}

/// Add the exact horizontal overlap of `[x0, x1)` with each pixel column.
fn accumulate_span(coverage: &mut [f32], origin_x: i32, x0: f32, x1: f32) {
    let left = origin_x as f32;
    let right = left + coverage.len() as f32;
    let x0 = x0.max(left);
    let x1 = x1.min(right);
    if x1 <= x0 {
        return;
    }
    let first = (x0.floor() - left) as usize;
    let last = ((x1.ceil() - left) as usize).min(coverage.len());
    for (i, cell) in coverage.iter_mut().enumerate().take(last).skip(first) {
        let px = left + i as f32;
        let overlap = x1.min(px + 1.0) - x0.max(px);
        if overlap > 0.0 {
            *cell += overlap;
        }
    }
}

// ============================================================================
// RECTANGLE SELECTION
// ============================================================================

/// Corners of a box being dragged, in image pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RectSelection {
    pub start: (u32, u32),
    pub end: (u32, u32),
}

impl RectSelection {
    pub fn begin(start: (u32, u32)) -> Self {
        Self { start, end: start }
    }

    /// Move the free corner; `point` is expected to be clamped by the caller.
    pub fn update(&mut self, point: (u32, u32)) {
        self.end = point;
    }

    /// Normalised box, or `None` when it has no area.
    pub fn finish(&self) -> Option<BoxPrompt> {
        let bbox = BoxPrompt::from_corners(self.start, self.end);
        if bbox.is_degenerate() { None } else { Some(bbox) }
    }

    /// Image-space rectangle spanned by the corners (inclusive of both).
    pub fn bounds(&self) -> PixelRect {
        PixelRect::from_min_max(
            self.start.0.min(self.end.0) as i32,
            self.start.1.min(self.end.1) as i32,
            self.start.0.max(self.end.0) as i32 + 1,
            self.start.1.max(self.end.1) as i32 + 1,
        )
    }
}

// ============================================================================
// STROKE SESSION
// ============================================================================

/// Transient state while a pointer button is held.
#[derive(Clone, Debug, Default)]
pub enum StrokeSession {
    #[default]
    Idle,
    Painting {
        engine: PaintEngine,
        last: (u32, u32),
    },
    Lasso(LassoFiller),
    Rect {
        tool: ToolMode,
        selection: RectSelection,
    },
    Panning {
        last: Pos2,
    },
}

impl StrokeSession {
    pub fn is_idle(&self) -> bool {
        matches!(self, StrokeSession::Idle)
    }
}
