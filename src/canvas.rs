use std::fmt;
use std::sync::Arc;

use egui::{Pos2, Rect};
use image::{Rgba, RgbaImage};
use rayon::prelude::*;

// ============================================================================
// PIXEL RECT - integer geometry shared by screen space and image space
// ============================================================================

/// Axis-aligned integer rectangle. `right()` / `bottom()` are exclusive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct PixelRect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl PixelRect {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }

    /// Build from an exclusive max corner. Inverted input yields an empty rect.
    pub fn from_min_max(min_x: i32, min_y: i32, max_x: i32, max_y: i32) -> Self {
        Self {
            x: min_x,
            y: min_y,
            width: (max_x - min_x).max(0),
            height: (max_y - min_y).max(0),
        }
    }

    #[inline]
    pub fn right(&self) -> i32 {
        self.x + self.width
    }

    #[inline]
    pub fn bottom(&self) -> i32 {
        self.y + self.height
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    #[inline]
    pub fn contains(&self, px: i32, py: i32) -> bool {
        px >= self.x && px < self.right() && py >= self.y && py < self.bottom()
    }

    pub fn intersect(&self, other: &PixelRect) -> PixelRect {
        let r = PixelRect::from_min_max(
            self.x.max(other.x),
            self.y.max(other.y),
            self.right().min(other.right()),
            self.bottom().min(other.bottom()),
        );
        if r.is_empty() { PixelRect::default() } else { r }
    }

    pub fn intersects(&self, other: &PixelRect) -> bool {
        !self.intersect(other).is_empty()
    }

    /// Smallest rect covering both. Empty operands are ignored.
    pub fn union(&self, other: &PixelRect) -> PixelRect {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        PixelRect::from_min_max(
            self.x.min(other.x),
            self.y.min(other.y),
            self.right().max(other.right()),
            self.bottom().max(other.bottom()),
        )
    }

    pub fn expand(&self, amount: i32) -> PixelRect {
        PixelRect::from_min_max(
            self.x - amount,
            self.y - amount,
            self.right() + amount,
            self.bottom() + amount,
        )
    }

    pub fn area(&self) -> usize {
        if self.is_empty() { 0 } else { self.width as usize * self.height as usize }
    }

    pub fn to_egui(&self) -> Rect {
        Rect::from_min_max(
            Pos2::new(self.x as f32, self.y as f32),
            Pos2::new(self.right() as f32, self.bottom() as f32),
        )
    }

    /// Smallest integer rect that fully contains `rect`.
    pub fn from_egui_outer(rect: Rect) -> PixelRect {
        PixelRect::from_min_max(
            rect.min.x.floor() as i32,
            rect.min.y.floor() as i32,
            rect.max.x.ceil() as i32,
            rect.max.y.ceil() as i32,
        )
    }
}

// ============================================================================
// COMPOSITION RULES
// ============================================================================

/// Porter–Duff style rules used when writing into the mask layer.
///
/// Pixels are stored as straight (non-premultiplied) RGBA; the math is done
/// premultiplied and converted back. A fully transparent result is always
/// stored as `[0, 0, 0, 0]` so transparent pixels compare equal byte-for-byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Composition {
    /// Source replaces destination (weighted by coverage).
    Source,
    /// Standard alpha blending of source atop destination.
    SourceOver,
    /// Destination is cleared wherever the shape covers it.
    Clear,
    /// Destination alpha is reduced by the source alpha.
    DestinationOut,
}

pub const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);

impl Composition {
    /// Combine `src` into `dst` for a shape covering `coverage`/255 of the pixel.
    pub fn apply(self, dst: Rgba<u8>, src: Rgba<u8>, coverage: u8) -> Rgba<u8> {
        if coverage == 0 {
            return dst;
        }
        if coverage == 255 {
            match self {
                Composition::Source => return normalize_transparent(src),
                Composition::Clear => return TRANSPARENT,
                Composition::DestinationOut if src[3] == 255 => return TRANSPARENT,
                _ => {}
            }
        }

        let c = coverage as f32 / 255.0;
        let s = premultiply(src);
        let d = premultiply(dst);
        let out = match self {
            Composition::Source => lerp4(d, s, c),
            Composition::SourceOver => {
                let sa = s[3] * c;
                [
                    s[0] * c + d[0] * (1.0 - sa),
                    s[1] * c + d[1] * (1.0 - sa),
                    s[2] * c + d[2] * (1.0 - sa),
                    sa + d[3] * (1.0 - sa),
                ]
            }
            Composition::Clear => d.map(|v| v * (1.0 - c)),
            Composition::DestinationOut => {
                let sa = s[3] * c;
                d.map(|v| v * (1.0 - sa))
            }
        };
        unpremultiply(out)
    }
}

#[inline]
fn normalize_transparent(px: Rgba<u8>) -> Rgba<u8> {
    if px[3] == 0 { TRANSPARENT } else { px }
}

#[inline]
fn premultiply(px: Rgba<u8>) -> [f32; 4] {
    let a = px[3] as f32 / 255.0;
    [
        px[0] as f32 / 255.0 * a,
        px[1] as f32 / 255.0 * a,
        px[2] as f32 / 255.0 * a,
        a,
    ]
}

#[inline]
fn unpremultiply(p: [f32; 4]) -> Rgba<u8> {
    let a = p[3].clamp(0.0, 1.0);
    let alpha = (a * 255.0).round() as u8;
    if alpha == 0 {
        return TRANSPARENT;
    }
    let ch = |v: f32| ((v / a).clamp(0.0, 1.0) * 255.0).round() as u8;
    Rgba([ch(p[0]), ch(p[1]), ch(p[2]), alpha])
}

#[inline]
fn lerp4(a: [f32; 4], b: [f32; 4], t: f32) -> [f32; 4] {
    [
        a[0] + (b[0] - a[0]) * t,
        a[1] + (b[1] - a[1]) * t,
        a[2] + (b[2] - a[2]) * t,
        a[3] + (b[3] - a[3]) * t,
    ]
}

// ============================================================================
// MASK LAYER - sparse 64×64 chunk storage with copy-on-write chunks
// ============================================================================

pub const CHUNK_SIZE: u32 = 64;

/// Alpha byte of an RGBA pixel read as a native-endian `u32` word.
const ALPHA_WORD_MASK: u32 = u32::from_ne_bytes([0, 0, 0, 0xFF]);

/// The editable mask raster. Only alpha is meaningful; RGB is display colour.
///
/// Chunks are `Arc`-wrapped so `clone()` (a history snapshot) only bumps
/// reference counts. Writes go through `Arc::make_mut`, which copies just the
/// touched chunk when it is still shared with a snapshot. A missing chunk is
/// fully transparent. Chunk padding beyond the layer edge is never written.
#[derive(Clone)]
pub struct MaskLayer {
    width: u32,
    height: u32,
    chunks_per_row: u32,
    chunks: Vec<Option<Arc<RgbaImage>>>,
}

impl MaskLayer {
    /// Create a fully transparent layer. Zero dimensions are bumped to 1.
    pub fn new(width: u32, height: u32) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        let chunks_per_row = width.div_ceil(CHUNK_SIZE);
        let chunks_per_col = height.div_ceil(CHUNK_SIZE);
        Self {
            width,
            height,
            chunks_per_row,
            chunks: vec![None; (chunks_per_row * chunks_per_col) as usize],
        }
    }

    /// Import a flat RGBA image. Chunks without any alpha are not stored.
    pub fn from_rgba_image(src: &RgbaImage) -> Self {
        let mut layer = Self::new(src.width(), src.height());
        let (w, h) = (layer.width, layer.height);
        let cpr = layer.chunks_per_row;
        let raw = src.as_raw();

        let built: Vec<Option<Arc<RgbaImage>>> = (0..layer.chunks.len())
            .into_par_iter()
            .map(|flat| {
                let cx = flat as u32 % cpr;
                let cy = flat as u32 / cpr;
                let (bx, by) = (cx * CHUNK_SIZE, cy * CHUNK_SIZE);
                let cw = CHUNK_SIZE.min(w - bx) as usize;
                let ch = CHUNK_SIZE.min(h - by);
                let stride = CHUNK_SIZE as usize * 4;
                let mut data = vec![0u8; stride * CHUNK_SIZE as usize];
                for ly in 0..ch {
                    let src_start = ((by + ly) * w + bx) as usize * 4;
                    let dst_start = ly as usize * stride;
                    data[dst_start..dst_start + cw * 4]
                        .copy_from_slice(&raw[src_start..src_start + cw * 4]);
                }
                // Normalise fully transparent pixels to zero bytes.
                for px in data.chunks_exact_mut(4) {
                    if px[3] == 0 {
                        px.fill(0);
                    }
                }
                let chunk = RgbaImage::from_raw(CHUNK_SIZE, CHUNK_SIZE, data)?;
                if Self::chunk_has_alpha(&chunk) { Some(Arc::new(chunk)) } else { None }
            })
            .collect();

        layer.chunks = built;
        layer
    }

    /// Flatten to a contiguous `RgbaImage`.
    pub fn to_rgba_image(&self) -> RgbaImage {
        let mut out = RgbaImage::new(self.width, self.height);
        let stride = self.width as usize * 4;
        let out_raw: &mut [u8] = out.as_mut();
        for (idx, slot) in self.chunks.iter().enumerate() {
            let Some(chunk) = slot else { continue };
            let cx = idx as u32 % self.chunks_per_row;
            let cy = idx as u32 / self.chunks_per_row;
            let (bx, by) = (cx * CHUNK_SIZE, cy * CHUNK_SIZE);
            let cw = CHUNK_SIZE.min(self.width - bx) as usize;
            let ch = CHUNK_SIZE.min(self.height - by) as usize;
            let chunk_raw = chunk.as_raw();
            for ly in 0..ch {
                let src = ly * CHUNK_SIZE as usize * 4;
                let dst = (by as usize + ly) * stride + bx as usize * 4;
                out_raw[dst..dst + cw * 4].copy_from_slice(&chunk_raw[src..src + cw * 4]);
            }
        }
        out
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn bounds(&self) -> PixelRect {
        PixelRect::new(0, 0, self.width as i32, self.height as i32)
    }

    // ---- indexing helpers ----------------------------------------------------

    #[inline(always)]
    fn flat_index(&self, x: u32, y: u32) -> usize {
        ((y / CHUNK_SIZE) * self.chunks_per_row + x / CHUNK_SIZE) as usize
    }

    #[inline(always)]
    fn local(x: u32, y: u32) -> (u32, u32) {
        (x % CHUNK_SIZE, y % CHUNK_SIZE)
    }

    // ---- pixel access -------------------------------------------------------

    /// Read a pixel. Out-of-bounds reads are transparent.
    #[inline]
    pub fn get_pixel(&self, x: u32, y: u32) -> Rgba<u8> {
        if x >= self.width || y >= self.height {
            return TRANSPARENT;
        }
        let (lx, ly) = Self::local(x, y);
        match &self.chunks[self.flat_index(x, y)] {
            Some(chunk) => *chunk.get_pixel(lx, ly),
            None => TRANSPARENT,
        }
    }

    #[inline]
    pub fn alpha(&self, x: u32, y: u32) -> u8 {
        self.get_pixel(x, y)[3]
    }

    /// Write a pixel (creates the chunk on demand, copies it if shared).
    #[inline]
    pub fn put_pixel(&mut self, x: u32, y: u32, pixel: Rgba<u8>) {
        if x >= self.width || y >= self.height {
            return;
        }
        let pixel = normalize_transparent(pixel);
        let idx = self.flat_index(x, y);
        let (lx, ly) = Self::local(x, y);
        if pixel[3] == 0 && self.chunks[idx].is_none() {
            return;
        }
        let arc = self.chunks[idx]
            .get_or_insert_with(|| Arc::new(RgbaImage::new(CHUNK_SIZE, CHUNK_SIZE)));
        Arc::make_mut(arc).put_pixel(lx, ly, pixel);
    }

    /// Combine `src` into the pixel at `(x, y)` using `comp` at `coverage`.
    #[inline]
    pub fn compose_pixel(&mut self, x: u32, y: u32, src: Rgba<u8>, coverage: u8, comp: Composition) {
        if x >= self.width || y >= self.height || coverage == 0 {
            return;
        }
        let dst = self.get_pixel(x, y);
        let out = comp.apply(dst, src, coverage);
        if out != dst {
            self.put_pixel(x, y, out);
        }
    }

    // ---- bulk operations ----------------------------------------------------

    /// Fill every pixel with `color`. A transparent fill just drops all chunks.
    pub fn fill(&mut self, color: Rgba<u8>) {
        if color[3] == 0 {
            self.clear();
            return;
        }
        for flat in 0..self.chunks.len() {
            let cx = flat as u32 % self.chunks_per_row;
            let cy = flat as u32 / self.chunks_per_row;
            let cw = CHUNK_SIZE.min(self.width - cx * CHUNK_SIZE);
            let ch = CHUNK_SIZE.min(self.height - cy * CHUNK_SIZE);
            let mut chunk = RgbaImage::new(CHUNK_SIZE, CHUNK_SIZE);
            for ly in 0..ch {
                for lx in 0..cw {
                    chunk.put_pixel(lx, ly, color);
                }
            }
            self.chunks[flat] = Some(Arc::new(chunk));
        }
    }

    /// Make the layer fully transparent.
    pub fn clear(&mut self) {
        for slot in &mut self.chunks {
            *slot = None;
        }
    }

    /// True when any pixel has alpha > 0. Chunks are scanned in parallel.
    pub fn has_content(&self) -> bool {
        self.chunks
            .par_iter()
            .any(|slot| slot.as_deref().is_some_and(Self::chunk_has_alpha))
    }

    /// Number of pixels with alpha > 0.
    pub fn masked_pixel_count(&self) -> usize {
        self.chunks
            .par_iter()
            .filter_map(|slot| slot.as_deref())
            .map(Self::chunk_alpha_count)
            .sum()
    }

    fn chunk_has_alpha(chunk: &RgbaImage) -> bool {
        match bytemuck::try_cast_slice::<u8, u32>(chunk.as_raw()) {
            Ok(words) => words.iter().any(|&w| w & ALPHA_WORD_MASK != 0),
            Err(_) => Self::chunk_has_alpha_scalar(chunk),
        }
    }

    /// Per-pixel fallback for buffers that cannot be viewed as `u32` words.
    fn chunk_has_alpha_scalar(chunk: &RgbaImage) -> bool {
        chunk.pixels().any(|px| px[3] > 0)
    }

    fn chunk_alpha_count(chunk: &RgbaImage) -> usize {
        match bytemuck::try_cast_slice::<u8, u32>(chunk.as_raw()) {
            Ok(words) => words.iter().filter(|&&w| w & ALPHA_WORD_MASK != 0).count(),
            Err(_) => chunk.pixels().filter(|px| px[3] > 0).count(),
        }
    }

    /// Copy the pixels of `rect` into `buf` as tightly packed RGBA rows.
    /// Parts of `rect` outside the layer read as transparent.
    pub fn extract_region_rgba(&self, rect: PixelRect, buf: &mut Vec<u8>) {
        buf.clear();
        if rect.is_empty() {
            return;
        }
        buf.resize(rect.area() * 4, 0);
        let row_bytes = rect.width as usize * 4;
        let clipped = rect.intersect(&self.bounds());
        if clipped.is_empty() {
            return;
        }
        for y in clipped.y..clipped.bottom() {
            let row_off = (y - rect.y) as usize * row_bytes;
            let mut x = clipped.x;
            while x < clipped.right() {
                let (ux, uy) = (x as u32, y as u32);
                let (lx, ly) = Self::local(ux, uy);
                let run = ((CHUNK_SIZE - lx) as i32).min(clipped.right() - x);
                if let Some(chunk) = &self.chunks[self.flat_index(ux, uy)] {
                    let src = (ly * CHUNK_SIZE + lx) as usize * 4;
                    let dst = row_off + (x - rect.x) as usize * 4;
                    let len = run as usize * 4;
                    buf[dst..dst + len].copy_from_slice(&chunk.as_raw()[src..src + len]);
                }
                x += run;
            }
        }
    }

    /// Number of populated chunks.
    pub fn chunk_count(&self) -> usize {
        self.chunks.iter().filter(|c| c.is_some()).count()
    }

    /// Pixel bytes owned by this layer alone. Chunks shared with other
    /// snapshots count as zero.
    pub fn memory_bytes(&self) -> usize {
        let chunk_bytes = (CHUNK_SIZE * CHUNK_SIZE * 4) as usize;
        self.chunks.iter().flatten().filter(|arc| Arc::strong_count(arc) == 1).count() * chunk_bytes
    }
}

impl PartialEq for MaskLayer {
    /// Pixel-exact comparison. A missing chunk equals an all-zero chunk.
    fn eq(&self, other: &Self) -> bool {
        if self.width != other.width || self.height != other.height {
            return false;
        }
        self.chunks.iter().zip(&other.chunks).all(|(a, b)| match (a, b) {
            (None, None) => true,
            (Some(a), Some(b)) => Arc::ptr_eq(a, b) || a.as_raw() == b.as_raw(),
            (Some(c), None) | (None, Some(c)) => c.as_raw().iter().all(|&v| v == 0),
        })
    }
}

impl Eq for MaskLayer {}

impl fmt::Debug for MaskLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MaskLayer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("chunks", &self.chunk_count())
            .finish()
    }
}
