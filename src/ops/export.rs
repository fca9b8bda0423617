use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use rayon::prelude::*;

use crate::canvas::MaskLayer;
use crate::io::write_png_rgb;

/// Foreground/background colours of exported masks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ExportConvention {
    /// Masked pixels black, everything else white.
    #[default]
    BlackOnWhite,
    WhiteOnBlack,
}

impl ExportConvention {
    fn colors(self) -> (Rgb<u8>, Rgb<u8>) {
        match self {
            ExportConvention::BlackOnWhite => (Rgb([0, 0, 0]), Rgb([255, 255, 255])),
            ExportConvention::WhiteOnBlack => (Rgb([255, 255, 255]), Rgb([0, 0, 0])),
        }
    }

    pub fn foreground(self) -> Rgb<u8> {
        self.colors().0
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExportConvention::BlackOnWhite => "black_on_white",
            ExportConvention::WhiteOnBlack => "white_on_black",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "black_on_white" => Some(ExportConvention::BlackOnWhite),
            "white_on_black" => Some(ExportConvention::WhiteOnBlack),
            _ => None,
        }
    }
}

/// What to do when the target file already exists.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OverwritePolicy {
    Refuse,
    Replace,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportError {
    /// The mask has no pixel with alpha > 0.
    NothingToSave,
    AlreadyExists(PathBuf),
    Encode(String),
    Io(String),
}

impl fmt::Display for ExportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportError::NothingToSave => write!(f, "Nothing to save: the mask is empty"),
            ExportError::AlreadyExists(p) => write!(f, "File already exists: {}", p.display()),
            ExportError::Encode(e) => write!(f, "Failed to encode mask: {}", e),
            ExportError::Io(e) => write!(f, "Failed to write mask: {}", e),
        }
    }
}

impl std::error::Error for ExportError {}

impl From<std::io::Error> for ExportError {
    fn from(e: std::io::Error) -> Self {
        ExportError::Io(e.to_string())
    }
}

/// Binary raster of `mask` at `original_size`: alpha > 0 becomes foreground.
/// Fails with `NothingToSave` for an empty mask. Size mismatches are resized
/// nearest-neighbour so no intermediate grey values appear.
pub fn export_mask(
    mask: &MaskLayer,
    original_size: (u32, u32),
    convention: ExportConvention,
) -> Result<RgbImage, ExportError> {
    if !mask.has_content() {
        return Err(ExportError::NothingToSave);
    }
    let (fg, bg) = convention.colors();
    let (w, h) = mask.size();
    let rgba = mask.to_rgba_image();
    let mut out = RgbImage::new(w, h);
    let row_in = w as usize * 4;
    let row_out = w as usize * 3;
    let src: &[u8] = rgba.as_raw();
    let dst: &mut [u8] = out.as_mut();
    dst.par_chunks_mut(row_out)
        .zip(src.par_chunks(row_in))
        .for_each(|(out_row, in_row)| {
            for (o, i) in out_row.chunks_exact_mut(3).zip(in_row.chunks_exact(4)) {
                let c = if i[3] > 0 { fg } else { bg };
                o.copy_from_slice(&c.0);
            }
        });

    if (w, h) != original_size && original_size.0 > 0 && original_size.1 > 0 {
        out = imageops::resize(&out, original_size.0, original_size.1, FilterType::Nearest);
    }
    Ok(out)
}

/// Export and write `mask` to `path` as PNG.
///
/// The PNG is written to a sibling temp file and renamed into place, so a
/// failed encode never leaves a partial mask behind.
pub fn save_mask(
    mask: &MaskLayer,
    original_size: (u32, u32),
    convention: ExportConvention,
    path: &Path,
    policy: OverwritePolicy,
) -> Result<PathBuf, ExportError> {
    if policy == OverwritePolicy::Refuse && path.exists() {
        return Err(ExportError::AlreadyExists(path.to_path_buf()));
    }
    let raster = export_mask(mask, original_size, convention)?;
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension(format!("{}.tmp", uuid::Uuid::new_v4().simple()));
    if let Err(e) = write_png_rgb(&raster, &tmp) {
        let _ = fs::remove_file(&tmp);
        return Err(ExportError::Encode(e.to_string()));
    }
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn count_fg(img: &RgbImage, fg: Rgb<u8>) -> usize {
        img.pixels().filter(|p| **p == fg).count()
    }

    #[test]
    fn empty_mask_is_nothing_to_save() {
        let mask = MaskLayer::new(10, 10);
        assert_eq!(
            export_mask(&mask, (10, 10), ExportConvention::BlackOnWhite),
            Err(ExportError::NothingToSave)
        );
    }

    #[test]
    fn foreground_count_matches_masked_pixels() {
        let mut mask = MaskLayer::new(70, 70);
        for i in 0..65 {
            mask.put_pixel(i, i, Rgba([255, 0, 0, 1 + i as u8]));
        }
        let out = export_mask(&mask, (70, 70), ExportConvention::BlackOnWhite).expect("export");
        assert_eq!(count_fg(&out, Rgb([0, 0, 0])), mask.masked_pixel_count());
        assert_eq!(count_fg(&out, Rgb([255, 255, 255])), 70 * 70 - 65);
        let inv = export_mask(&mask, (70, 70), ExportConvention::WhiteOnBlack).expect("export");
        assert_eq!(count_fg(&inv, Rgb([255, 255, 255])), 65);
    }

    #[test]
    fn resize_to_original_stays_binary() {
        let mut mask = MaskLayer::new(10, 10);
        mask.put_pixel(0, 0, Rgba([0, 255, 0, 128]));
        let out = export_mask(&mask, (20, 30), ExportConvention::BlackOnWhite).expect("export");
        assert_eq!(out.dimensions(), (20, 30));
        assert!(out.pixels().all(|p| *p == Rgb([0, 0, 0]) || *p == Rgb([255, 255, 255])));
        assert_eq!(count_fg(&out, Rgb([0, 0, 0])), 2 * 3);
    }

    #[test]
    fn save_respects_overwrite_policy() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("cat_mask.png");
        let mut mask = MaskLayer::new(8, 8);
        mask.put_pixel(3, 3, Rgba([255, 0, 0, 50]));

        save_mask(&mask, (8, 8), ExportConvention::BlackOnWhite, &path, OverwritePolicy::Refuse).expect("first save");
        assert!(path.exists());
        assert_eq!(
            save_mask(&mask, (8, 8), ExportConvention::BlackOnWhite, &path, OverwritePolicy::Refuse),
            Err(ExportError::AlreadyExists(path.clone()))
        );
        save_mask(&mask, (8, 8), ExportConvention::BlackOnWhite, &path, OverwritePolicy::Replace).expect("replace");
        // Only the mask file remains; no temp files.
        assert_eq!(std::fs::read_dir(dir.path()).expect("read").count(), 1);
    }

    #[test]
    fn empty_mask_writes_no_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("x_mask.png");
        let mask = MaskLayer::new(8, 8);
        let err = save_mask(&mask, (8, 8), ExportConvention::BlackOnWhite, &path, OverwritePolicy::Replace);
        assert_eq!(err, Err(ExportError::NothingToSave));
        assert!(!path.exists());
    }

    #[test]
    fn convention_names_round_trip() {
        for c in [ExportConvention::BlackOnWhite, ExportConvention::WhiteOnBlack] {
            assert_eq!(ExportConvention::parse(c.as_str()), Some(c));
        }
        assert_eq!(ExportConvention::parse("grey"), None);
    }
}
