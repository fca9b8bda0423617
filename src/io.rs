use std::fmt;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageError, ImageFormat, ImageReader, RgbImage, RgbaImage};

/// Extensions the folder browser and open dialog accept (lowercase).
pub const SUPPORTED_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "tif", "tiff"];

/// Suffix appended to the image stem for exported masks.
pub const MASK_SUFFIX: &str = "_mask";

/// Error type for image decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageLoadError {
    NotFound(PathBuf),
    Unsupported(String),
    Decode(String),
    Io(String),
}

impl fmt::Display for ImageLoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageLoadError::NotFound(p) => write!(f, "Image not found: {}", p.display()),
            ImageLoadError::Unsupported(e) => write!(f, "Unsupported image format: {}", e),
            ImageLoadError::Decode(e) => write!(f, "Failed to decode image: {}", e),
            ImageLoadError::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for ImageLoadError {}

impl From<ImageError> for ImageLoadError {
    fn from(e: ImageError) -> Self {
        match e {
            ImageError::Unsupported(u) => ImageLoadError::Unsupported(u.to_string()),
            ImageError::IoError(io) => ImageLoadError::Io(io.to_string()),
            other => ImageLoadError::Decode(other.to_string()),
        }
    }
}

impl From<std::io::Error> for ImageLoadError {
    fn from(e: std::io::Error) -> Self {
        ImageLoadError::Io(e.to_string())
    }
}

pub fn is_supported_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| SUPPORTED_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// True for files this tool wrote itself (`{stem}_mask.png`).
pub fn is_mask_file(path: &Path) -> bool {
    path.file_stem()
        .and_then(|s| s.to_str())
        .is_some_and(|s| s.ends_with(MASK_SUFFIX))
}

/// Decode `path` to RGBA, applying any embedded EXIF orientation.
pub fn read_image(path: &Path) -> Result<RgbaImage, ImageLoadError> {
    if !path.is_file() {
        return Err(ImageLoadError::NotFound(path.to_path_buf()));
    }
    let mut decoder = ImageReader::open(path)?.with_guessed_format()?.into_decoder()?;
    let orientation = image::ImageDecoder::orientation(&mut decoder)?;
    let mut img = DynamicImage::from_decoder(decoder)?;
    img.apply_orientation(orientation);
    Ok(img.into_rgba8())
}

/// Supported images directly inside `dir`, sorted by path. Exported masks
/// sitting next to their images are skipped.
pub fn list_folder_images(dir: &Path) -> Result<Vec<PathBuf>, ImageLoadError> {
    if !dir.is_dir() {
        return Err(ImageLoadError::NotFound(dir.to_path_buf()));
    }
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && is_supported_image(p) && !is_mask_file(p))
        .collect();
    files.sort();
    Ok(files)
}

/// `{stem}_mask.png`
pub fn mask_file_name(image_path: &Path) -> String {
    let stem = image_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    format!("{}{}.png", stem, MASK_SUFFIX)
}

/// Where the mask for `image_path` is written: `save_dir` when given,
/// otherwise next to the image.
pub fn mask_save_path(image_path: &Path, save_dir: Option<&Path>) -> PathBuf {
    let dir = match save_dir {
        Some(d) => d.to_path_buf(),
        None => image_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default(),
    };
    dir.join(mask_file_name(image_path))
}

/// Encode an opaque RGB raster as PNG.
pub fn write_png_rgb(image: &RgbImage, path: &Path) -> Result<(), ImageError> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    image.write_to(&mut writer, ImageFormat::Png)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, Rgba};

    #[test]
    fn mask_names_follow_stem() {
        assert_eq!(mask_file_name(Path::new("/data/cat.01.jpg")), "cat.01_mask.png");
        assert_eq!(
            mask_save_path(Path::new("/data/cat.jpg"), None),
            PathBuf::from("/data/cat_mask.png")
        );
        assert_eq!(
            mask_save_path(Path::new("/data/cat.jpg"), Some(Path::new("/out"))),
            PathBuf::from("/out/cat_mask.png")
        );
    }

    #[test]
    fn extension_filter_is_case_insensitive() {
        assert!(is_supported_image(Path::new("a.PNG")));
        assert!(is_supported_image(Path::new("a.tif")));
        assert!(!is_supported_image(Path::new("a.gif")));
        assert!(!is_supported_image(Path::new("README")));
    }

    #[test]
    fn folder_listing_is_sorted_and_filtered() {
        let dir = tempfile::tempdir().expect("tempdir");
        for name in ["b.png", "a.JPG", "notes.txt", "c.bmp", "b_mask.png"] {
            std::fs::write(dir.path().join(name), b"x").expect("write");
        }
        let files = list_folder_images(dir.path()).expect("list");
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().expect("name").to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.JPG", "b.png", "c.bmp"]);
    }

    #[test]
    fn exported_masks_are_recognised() {
        assert!(is_mask_file(Path::new("/data/cat_mask.png")));
        assert!(!is_mask_file(Path::new("/data/cat.png")));
        assert!(!is_mask_file(Path::new("/data/mask.png")));
    }

    #[test]
    fn png_round_trip_and_missing_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("m.png");
        let img = RgbImage::from_pixel(7, 3, Rgb([0, 0, 0]));
        write_png_rgb(&img, &path).expect("write");
        let back = read_image(&path).expect("read");
        assert_eq!(back.dimensions(), (7, 3));
        assert_eq!(back.get_pixel(6, 2), &Rgba([0, 0, 0, 255]));

        let missing = dir.path().join("nope.png");
        assert_eq!(read_image(&missing), Err(ImageLoadError::NotFound(missing.clone())));
    }

    #[test]
    fn garbage_is_a_decode_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("broken.png");
        std::fs::write(&path, b"definitely not a png").expect("write");
        assert!(read_image(&path).is_err());
    }
}
