use std::path::{Path, PathBuf};

use image::{GrayImage, Luma, Rgb, RgbaImage};

use maskfe::cli::{process_image, Job};
use maskfe::ops::export::{ExportConvention, OverwritePolicy};
use maskfe::ops::segment::{
    BoxPrompt, CommandBackend, MaskValues, PredictedMask, Prediction, PromptOptions, RectPromptBridge,
    SegmentError, SegmentationBackend,
};

fn write_image(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    RgbaImage::new(64, 48).save(&path).expect("write image");
    path
}

/// Returns the box itself as a 0/1 byte mask.
struct Exact;

impl SegmentationBackend for Exact {
    fn name(&self) -> &str {
        "exact"
    }

    fn predict(&mut self, _: &Path, bbox: BoxPrompt, _: PromptOptions) -> Result<Prediction, SegmentError> {
        let values = (0..64u32 * 48)
            .map(|i| {
                let (x, y) = (i % 64, i / 64);
                u8::from(x >= bbox.x1 && x < bbox.x2 && y >= bbox.y1 && y < bbox.y2)
            })
            .collect();
        Ok(Prediction {
            mask: PredictedMask { width: 64, height: 48, values: MaskValues::Byte(values) },
            source_size: (64, 48),
        })
    }
}

fn job<'a>(boxes: &'a [BoxPrompt], erase: &'a [BoxPrompt], out: &'a Path, policy: OverwritePolicy) -> Job<'a> {
    Job {
        boxes,
        erase_boxes: erase,
        output_dir: Some(out),
        convention: ExportConvention::WhiteOnBlack,
        policy,
    }
}

#[test]
fn boxes_then_erase_boxes() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = write_image(dir.path(), "leaf.png");
    let boxes = ["0,0,20,10".parse().expect("box"), "10,0,30,10".parse().expect("box")];
    let erase = ["0,0,5,10".parse().expect("box")];
    let mut bridge = RectPromptBridge::new(Some(Box::new(Exact)), PromptOptions::default());

    let report = process_image(&input, &job(&boxes, &erase, dir.path(), OverwritePolicy::Refuse), &mut bridge)
        .expect("process");
    assert_eq!(report.output, dir.path().join("leaf_mask.png"));
    assert_eq!(report.masked, 25 * 10);

    let written = image::open(&report.output).expect("decode").into_rgb8();
    assert_eq!(*written.get_pixel(10, 5), Rgb([255, 255, 255]));
    assert_eq!(*written.get_pixel(2, 5), Rgb([0, 0, 0]));
}

#[test]
fn existing_output_is_refused_without_overwrite() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = write_image(dir.path(), "leaf.png");
    let boxes = ["0,0,8,8".parse().expect("box")];
    let mut bridge = RectPromptBridge::new(Some(Box::new(Exact)), PromptOptions::default());

    process_image(&input, &job(&boxes, &[], dir.path(), OverwritePolicy::Refuse), &mut bridge).expect("first");
    let err = process_image(&input, &job(&boxes, &[], dir.path(), OverwritePolicy::Refuse), &mut bridge)
        .expect_err("second run must refuse");
    assert!(err.contains("already exists"), "{err}");
    process_image(&input, &job(&boxes, &[], dir.path(), OverwritePolicy::Replace), &mut bridge).expect("replace");
}

#[test]
fn empty_result_writes_nothing() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = write_image(dir.path(), "leaf.png");
    let boxes = ["0,0,8,8".parse().expect("box")];
    let erase = ["0,0,8,8".parse().expect("box")];
    let mut bridge = RectPromptBridge::new(Some(Box::new(Exact)), PromptOptions::default());

    let err = process_image(&input, &job(&boxes, &erase, dir.path(), OverwritePolicy::Replace), &mut bridge)
        .expect_err("nothing to save");
    assert!(err.contains("Nothing to save"), "{err}");
    assert!(!dir.path().join("leaf_mask.png").exists());
}

#[test]
fn missing_input_fails_before_backend() {
    let dir = tempfile::tempdir().expect("tempdir");
    let boxes = ["0,0,8,8".parse().expect("box")];
    let mut bridge = RectPromptBridge::new(Some(Box::new(Exact)), PromptOptions::default());
    let err = process_image(
        &dir.path().join("absent.png"),
        &job(&boxes, &[], dir.path(), OverwritePolicy::Replace),
        &mut bridge,
    )
    .expect_err("missing");
    assert!(err.starts_with("load failed"), "{err}");
}

#[cfg(unix)]
mod external_process {
    use super::*;

    /// `sh <script>` so no executable bit is needed on the temp file.
    fn script_backend(dir: &Path, body: &str) -> CommandBackend {
        let script = dir.join("backend.sh");
        std::fs::write(&script, body).expect("write script");
        CommandBackend::new("sh", vec![script.display().to_string()])
    }

    #[test]
    fn command_backend_reads_the_written_mask() {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = write_image(dir.path(), "leaf.png");
        let fixture = dir.path().join("fixture.png");
        let mut gray = GrayImage::new(64, 48);
        for y in 10..20 {
            for x in 30..40 {
                gray.put_pixel(x, y, Luma([255]));
            }
        }
        gray.save(&fixture).expect("write fixture");

        let body = format!(
            "out=\"\"\n\
             while [ $# -gt 0 ]; do\n\
               if [ \"$1\" = \"--output\" ]; then out=\"$2\"; fi\n\
               shift\n\
             done\n\
             cp \"{}\" \"$out\"\n",
            fixture.display()
        );
        let backend = script_backend(dir.path(), &body);
        let mut bridge = RectPromptBridge::new(Some(Box::new(backend)), PromptOptions::default());
        let boxes = ["30,10,40,20".parse().expect("box")];
        let report = process_image(&input, &job(&boxes, &[], dir.path(), OverwritePolicy::Replace), &mut bridge)
            .expect("process");
        assert_eq!(report.masked, 100);
    }

    #[test]
    fn command_backend_failure_carries_stderr() {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = write_image(dir.path(), "leaf.png");
        let mut backend = script_backend(dir.path(), "echo 'model not loaded' >&2\nexit 3\n");
        let err = backend
            .predict(&input, BoxPrompt { x1: 0, y1: 0, x2: 5, y2: 5 }, PromptOptions::default())
            .expect_err("non-zero exit");
        assert_eq!(err, SegmentError::Failed("model not loaded".into()));
    }
}
