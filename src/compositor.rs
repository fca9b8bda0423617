use egui::{Color32, ColorImage};
use image::{Rgba, RgbaImage};
use rayon::prelude::*;

use crate::canvas::{MaskLayer, PixelRect};
use crate::viewport::ViewTransform;

pub const BACKGROUND: [u8; 3] = [220, 220, 220];
pub const MODE_OUTLINE: [u8; 3] = [255, 100, 100];
const DASH_ON: i32 = 8;
const DASH_PERIOD: i32 = 12;

/// Everything one frame is rendered from.
pub struct Scene<'a> {
    pub view: &'a ViewTransform,
    pub base: Option<&'a RgbaImage>,
    pub mask: Option<&'a MaskLayer>,
    /// Dashed outline around the image, shown while a non-paint tool is active.
    pub mode_outline: bool,
    /// Bumped whenever the base image or mask layer is replaced wholesale.
    pub generation: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderOutcome {
    Full,
    /// Only the given screen rectangle was re-shaded.
    Partial(PixelRect),
    Unchanged,
}

#[derive(Clone, Debug, PartialEq)]
struct CacheKey {
    widget_size: [u32; 2],
    image_rect: PixelRect,
    scale_bits: u64,
    mode_outline: bool,
    generation: u64,
}

impl CacheKey {
    fn of(scene: &Scene<'_>) -> Self {
        Self {
            widget_size: scene.view.widget_size(),
            image_rect: scene.view.image_rect(),
            scale_bits: scene.view.scale().to_bits(),
            mode_outline: scene.mode_outline,
            generation: scene.generation,
        }
    }
}

// ============================================================================
// COMPOSITE CACHE
// ============================================================================

/// Rendered display frame: background, nearest-sampled base image, mask
/// (source-over) and the optional mode outline.
///
/// Every path shades a screen pixel with the same `shade_pixel`, so a partial
/// re-render is pixel-identical to a full one as long as the dirty rectangle
/// covers every screen pixel whose inputs changed.
pub struct CompositeCache {
    frame: ColorImage,
    key: Option<CacheKey>,
    scratch: Vec<u8>,
}

impl Default for CompositeCache {
    fn default() -> Self {
        Self::new()
    }
}

impl CompositeCache {
    pub fn new() -> Self {
        Self {
            frame: ColorImage::new([0, 0], Color32::TRANSPARENT),
            key: None,
            scratch: Vec::new(),
        }
    }

    /// Force the next `render` to redraw everything.
    pub fn invalidate(&mut self) {
        self.key = None;
    }

    pub fn is_valid(&self) -> bool {
        self.key.is_some()
    }

    pub fn frame(&self) -> &ColorImage {
        &self.frame
    }

    /// Bring the frame up to date. `dirty` is in widget-local screen pixels.
    pub fn render(&mut self, scene: &Scene<'_>, dirty: Option<PixelRect>) -> RenderOutcome {
        let key = CacheKey::of(scene);
        if self.key.as_ref() != Some(&key) {
            self.render_full(scene);
            self.key = Some(key);
            return RenderOutcome::Full;
        }
        let Some(dirty) = dirty else {
            return RenderOutcome::Unchanged;
        };
        let [fw, fh] = self.frame.size;
        let clipped = dirty.intersect(&PixelRect::new(0, 0, fw as i32, fh as i32));
        if clipped.is_empty() {
            return RenderOutcome::Unchanged;
        }
        self.render_region(scene, clipped);
        RenderOutcome::Partial(clipped)
    }

    fn render_full(&mut self, scene: &Scene<'_>) {
        let [w, h] = scene.view.widget_size();
        let (w, h) = (w as usize, h as usize);
        let bg = Color32::from_rgb(BACKGROUND[0], BACKGROUND[1], BACKGROUND[2]);
        if self.frame.size != [w, h] {
            self.frame = ColorImage::new([w, h], bg);
        }
        if w == 0 || h == 0 {
            return;
        }
        self.frame
            .pixels
            .par_chunks_mut(w)
            .enumerate()
            .for_each(|(sy, row)| {
                for (sx, out) in row.iter_mut().enumerate() {
                    let (sx, sy) = (sx as i32, sy as i32);
                    let mask_px = sample_mask_direct(scene, sx, sy);
                    *out = shade_pixel(scene, sx, sy, mask_px);
                }
            });
    }

    fn render_region(&mut self, scene: &Scene<'_>, region: PixelRect) {
        let w = self.frame.size[0];
        let source = scene.view.screen_rect_to_image(region);
        if let Some(mask) = scene.mask {
            mask.extract_region_rgba(source, &mut self.scratch);
        } else {
            self.scratch.clear();
        }
        let scratch = &self.scratch;

        self.frame
            .pixels
            .par_chunks_mut(w)
            .enumerate()
            .skip(region.y as usize)
            .take(region.height as usize)
            .for_each(|(sy, row)| {
                let sy = sy as i32;
                for sx in region.x..region.right() {
                    let mask_px = sample_mask_region(scene, source, scratch, sx, sy);
                    row[sx as usize] = shade_pixel(scene, sx, sy, mask_px);
                }
            });
    }

    /// Copy a sub-rectangle of the frame, for partial texture uploads.
    pub fn extract(&self, rect: PixelRect) -> ColorImage {
        let [fw, fh] = self.frame.size;
        let r = rect.intersect(&PixelRect::new(0, 0, fw as i32, fh as i32));
        if r.is_empty() {
            return ColorImage::new([0, 0], Color32::TRANSPARENT);
        }
        let mut pixels = Vec::with_capacity(r.area());
        for y in r.y..r.bottom() {
            let start = y as usize * fw + r.x as usize;
            pixels.extend_from_slice(&self.frame.pixels[start..start + r.width as usize]);
        }
        ColorImage { size: [r.width as usize, r.height as usize], pixels }
    }
}

fn sample_mask_direct(scene: &Scene<'_>, sx: i32, sy: i32) -> Rgba<u8> {
    match scene.mask {
        Some(mask) if scene.view.image_rect().contains(sx, sy) => {
            let (ix, iy) = scene.view.sample_source(sx, sy);
            mask.get_pixel(ix, iy)
        }
        _ => Rgba([0, 0, 0, 0]),
    }
}

fn sample_mask_region(scene: &Scene<'_>, source: PixelRect, buf: &[u8], sx: i32, sy: i32) -> Rgba<u8> {
    if !scene.view.image_rect().contains(sx, sy) {
        return Rgba([0, 0, 0, 0]);
    }
    let (ix, iy) = scene.view.sample_source(sx, sy);
    let (ix, iy) = (ix as i32, iy as i32);
    if source.contains(ix, iy) && !buf.is_empty() {
        let idx = ((iy - source.y) as usize * source.width as usize + (ix - source.x) as usize) * 4;
        return Rgba([buf[idx], buf[idx + 1], buf[idx + 2], buf[idx + 3]]);
    }
    sample_mask_direct(scene, sx, sy)
}

#[inline]
fn blend_channel(src: u8, dst: u8, alpha: u8) -> u8 {
    let a = alpha as u32;
    ((src as u32 * a + dst as u32 * (255 - a) + 127) / 255) as u8
}

#[inline]
fn blend_rgb(src: [u8; 3], dst: [u8; 3], alpha: u8) -> [u8; 3] {
    [
        blend_channel(src[0], dst[0], alpha),
        blend_channel(src[1], dst[1], alpha),
        blend_channel(src[2], dst[2], alpha),
    ]
}

/// Dashed 2px band straddling the image rectangle edge.
fn on_mode_outline(rect: PixelRect, sx: i32, sy: i32) -> bool {
    let outer = rect.expand(1);
    let inner = rect.expand(-1);
    if !outer.contains(sx, sy) || inner.contains(sx, sy) {
        return false;
    }
    let along_horizontal = sy < inner.y || sy >= inner.bottom();
    let t = if along_horizontal { sx - outer.x } else { sy - outer.y };
    t.rem_euclid(DASH_PERIOD) < DASH_ON
}

fn shade_pixel(scene: &Scene<'_>, sx: i32, sy: i32, mask_px: Rgba<u8>) -> Color32 {
    let rect = scene.view.image_rect();
    if scene.mode_outline && !rect.is_empty() && on_mode_outline(rect, sx, sy) {
        return Color32::from_rgb(MODE_OUTLINE[0], MODE_OUTLINE[1], MODE_OUTLINE[2]);
    }
    let mut rgb = BACKGROUND;
    if rect.contains(sx, sy) {
        if let Some(base) = scene.base {
            let (ix, iy) = scene.view.sample_source(sx, sy);
            if ix < base.width() && iy < base.height() {
                let p = base.get_pixel(ix, iy);
                rgb = blend_rgb([p[0], p[1], p[2]], rgb, p[3]);
            }
        }
        if mask_px[3] > 0 {
            rgb = blend_rgb([mask_px[0], mask_px[1], mask_px[2]], rgb, mask_px[3]);
        }
    }
    Color32::from_rgb(rgb[0], rgb[1], rgb[2])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(w: u32, h: u32) -> RgbaImage {
        RgbaImage::from_fn(w, h, |x, y| Rgba([(x * 3) as u8, (y * 5) as u8, 90, 255]))
    }

    fn full_render(scene: &Scene<'_>) -> ColorImage {
        let mut cache = CompositeCache::new();
        cache.render(scene, None);
        cache.frame().clone()
    }

    #[test]
    fn cold_cache_renders_full_then_idles() {
        let view = ViewTransform::new([200, 150], [60, 40]);
        let base = gradient(60, 40);
        let mask = MaskLayer::new(60, 40);
        let scene = Scene { view: &view, base: Some(&base), mask: Some(&mask), mode_outline: false, generation: 0 };
        let mut cache = CompositeCache::new();
        assert_eq!(cache.render(&scene, None), RenderOutcome::Full);
        assert_eq!(cache.render(&scene, None), RenderOutcome::Unchanged);
        assert_eq!(cache.frame().size, [200, 150]);
        // Corner is background.
        assert_eq!(cache.frame().pixels[0], Color32::from_rgb(220, 220, 220));
    }

    #[test]
    fn partial_render_matches_full_render() {
        let mut view = ViewTransform::new([300, 240], [120, 90]);
        for _ in 0..4 {
            view.zoom_in();
        }
        view.pan_by(-7, 5);
        let base = gradient(120, 90);
        let mut mask = MaskLayer::new(120, 90);
        let mut cache = CompositeCache::new();
        {
            let scene = Scene { view: &view, base: Some(&base), mask: Some(&mask), mode_outline: true, generation: 1 };
            cache.render(&scene, None);
        }

        let changed = PixelRect::new(30, 20, 12, 9);
        for y in changed.y..changed.bottom() {
            for x in changed.x..changed.right() {
                mask.put_pixel(x as u32, y as u32, Rgba([255, 0, 0, 50]));
            }
        }
        let scene = Scene { view: &view, base: Some(&base), mask: Some(&mask), mode_outline: true, generation: 1 };
        let dirty = view.image_rect_to_screen(changed);
        assert!(matches!(cache.render(&scene, Some(dirty)), RenderOutcome::Partial(_)));
        assert_eq!(cache.frame(), &full_render(&scene));
    }

    #[test]
    fn key_change_forces_full_render() {
        let mut view = ViewTransform::new([100, 100], [50, 50]);
        let mask = MaskLayer::new(50, 50);
        let mut cache = CompositeCache::new();
        let scene = Scene { view: &view, base: None, mask: Some(&mask), mode_outline: false, generation: 0 };
        cache.render(&scene, None);
        let outlined = Scene { view: &view, base: None, mask: Some(&mask), mode_outline: true, generation: 0 };
        assert_eq!(cache.render(&outlined, Some(PixelRect::new(0, 0, 1, 1))), RenderOutcome::Full);
        view.pan_by(3, 0);
        let panned = Scene { view: &view, base: None, mask: Some(&mask), mode_outline: true, generation: 0 };
        assert_eq!(cache.render(&panned, None), RenderOutcome::Full);
        cache.invalidate();
        assert_eq!(cache.render(&panned, None), RenderOutcome::Full);
    }

    #[test]
    fn mask_is_blended_over_base() {
        let view = ViewTransform::new([100, 100], [20, 20]);
        let base = RgbaImage::from_pixel(20, 20, Rgba([0, 0, 0, 255]));
        let mut mask = MaskLayer::new(20, 20);
        mask.put_pixel(0, 0, Rgba([255, 0, 0, 255]));
        mask.put_pixel(1, 0, Rgba([255, 255, 255, 51]));
        let scene = Scene { view: &view, base: Some(&base), mask: Some(&mask), mode_outline: false, generation: 0 };
        let frame = full_render(&scene);
        let rect = view.image_rect();
        let at = |x: i32, y: i32| frame.pixels[(y as usize) * 100 + x as usize];
        assert_eq!(at(rect.x, rect.y), Color32::from_rgb(255, 0, 0));
        assert_eq!(at(rect.x + 1, rect.y), Color32::from_rgb(51, 51, 51));
        assert_eq!(at(rect.x + 2, rect.y), Color32::from_rgb(0, 0, 0));
    }

    #[test]
    fn extract_returns_clipped_subimage() {
        let view = ViewTransform::new([40, 30], [10, 10]);
        let scene = Scene { view: &view, base: None, mask: None, mode_outline: false, generation: 0 };
        let mut cache = CompositeCache::new();
        cache.render(&scene, None);
        let sub = cache.extract(PixelRect::new(35, 25, 10, 10));
        assert_eq!(sub.size, [5, 5]);
    }
}
