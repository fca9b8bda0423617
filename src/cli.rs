// ============================================================================
// MaskFE CLI - headless box-prompt segmentation via command-line arguments
// ============================================================================
//
// Usage examples:
//   maskfe --input photo.jpg --box 10,20,200,180 --backend ./sam_predict
//   maskfe -i "shots/*.png" --box 0,0,64,64 --erase-box 20,20,30,30 --output-dir masks/
//   maskfe -i a.png b.png --box 5,5,50,50 --backend-arg --device --backend-arg cpu --overwrite
//
// No GUI is opened in CLI mode. Every image gets a fresh transparent mask,
// the boxes are run through the segmentation backend in order, and the
// result is exported as `{stem}_mask.png`.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;

use crate::canvas::MaskLayer;
use crate::io;
use crate::ops::export::{self, ExportConvention, OverwritePolicy};
use crate::ops::segment::{BoxPrompt, CommandBackend, PromptMerge, RectPromptBridge};
use crate::settings::AppSettings;
use crate::{log_info, log_warn, logger};

// ============================================================================
// CLI argument definition (clap Derive)
// ============================================================================

/// MaskFE headless mask generator.
///
/// Run box prompts through a segmentation backend and export binary masks,
/// no GUI required.
#[derive(Parser, Debug)]
#[command(
    name = "maskfe",
    about = "MaskFE headless mask generator",
    long_about = "Run box prompts through an external segmentation program and write\n\
                  binary {stem}_mask.png files. Supports PNG, JPEG, BMP and TIFF input.\n\n\
                  Example:\n  \
                  maskfe --input photo.jpg --box 10,20,200,180 --backend ./sam_predict\n  \
                  maskfe -i \"*.png\" --box 0,0,64,64 --output-dir masks/"
)]
pub struct CliArgs {
    /// Input file(s). Glob patterns accepted (e.g. "*.png", "shots/*.jpg").
    #[arg(short, long, required = true, num_args = 1..)]
    pub input: Vec<String>,

    /// Box prompt `x1,y1,x2,y2` merged into the mask. Repeatable.
    #[arg(short, long = "box", value_name = "X1,Y1,X2,Y2")]
    pub boxes: Vec<BoxPrompt>,

    /// Box prompt whose selection is erased after all `--box` merges. Repeatable.
    #[arg(long = "erase-box", value_name = "X1,Y1,X2,Y2")]
    pub erase_boxes: Vec<BoxPrompt>,

    /// Segmentation program. Overrides `backend_command` from the settings file.
    #[arg(long, value_name = "PROGRAM")]
    pub backend: Option<PathBuf>,

    /// Extra argument passed to the backend before the standard ones. Repeatable.
    #[arg(long = "backend-arg", value_name = "ARG", allow_hyphen_values = true)]
    pub backend_args: Vec<String>,

    /// Directory for the exported masks. Defaults to the settings'
    /// `save_directory`, then to each image's own folder.
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Replace existing mask files instead of failing.
    #[arg(long)]
    pub overwrite: bool,

    /// Export white masks on black instead of black on white.
    #[arg(long)]
    pub white_on_black: bool,

    /// Settings file to use instead of the per-user one.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Mirror the log to stderr and print per-file timing.
    #[arg(short, long)]
    pub verbose: bool,
}

impl CliArgs {
    /// Returns `true` when any CLI-mode flag is present in the real process arguments.
    /// Used by `main()` to route before creating an eframe window.
    pub fn is_cli_mode() -> bool {
        std::env::args().any(|a| a == "--input" || a == "-i")
    }
}

/// Per-file result of a headless run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileReport {
    pub output: PathBuf,
    pub painted: usize,
    pub masked: usize,
}

// ============================================================================
// Public entry point
// ============================================================================

/// Run all CLI processing and return an OS exit code.
/// `0` = all files succeeded, `1` = one or more files failed.
pub fn run(args: CliArgs) -> ExitCode {
    logger::set_verbose(args.verbose);
    logger::init();

    let settings = match &args.config {
        Some(path) => AppSettings::load_from(path),
        None => AppSettings::load(),
    };

    let inputs = resolve_inputs(&args.input);
    if inputs.is_empty() {
        eprintln!("error: no input files matched the given pattern(s).");
        return ExitCode::FAILURE;
    }
    if args.boxes.is_empty() && args.erase_boxes.is_empty() {
        eprintln!("error: at least one --box or --erase-box is required.");
        return ExitCode::FAILURE;
    }

    let backend = match &args.backend {
        Some(program) => {
            let configured = settings.backend_args.split_whitespace().map(str::to_string).collect();
            Some(CommandBackend::new(program.clone(), configured))
        }
        None => CommandBackend::from_config(&settings.backend_command, &settings.backend_args),
    };
    let Some(backend) = backend.map(|b| b.with_extra_args(args.backend_args.iter().cloned())) else {
        eprintln!("error: no segmentation backend configured (use --backend).");
        return ExitCode::FAILURE;
    };
    let mut bridge = RectPromptBridge::new(Some(Box::new(backend)), settings.prompt_options());

    let output_dir = args.output_dir.clone().or_else(|| settings.save_dir());
    if let Some(dir) = &output_dir
        && let Err(e) = std::fs::create_dir_all(dir)
    {
        eprintln!("error: could not create output directory '{}': {}", dir.display(), e);
        return ExitCode::FAILURE;
    }

    let job = Job {
        boxes: &args.boxes,
        erase_boxes: &args.erase_boxes,
        output_dir: output_dir.as_deref(),
        convention: if args.white_on_black {
            ExportConvention::WhiteOnBlack
        } else {
            settings.export_convention
        },
        policy: if args.overwrite { OverwritePolicy::Replace } else { OverwritePolicy::Refuse },
    };

    let total = inputs.len();
    let multi = total > 1;
    let mut any_failure = false;

    for (idx, input_path) in inputs.iter().enumerate() {
        if multi || args.verbose {
            println!("[{}/{}] {}", idx + 1, total, input_path.display());
        }
        let file_start = Instant::now();
        match process_image(input_path, &job, &mut bridge) {
            Ok(report) => {
                if args.verbose || multi {
                    println!(
                        "  → {} ({} px, {:.0}ms)",
                        report.output.display(),
                        report.masked,
                        file_start.elapsed().as_secs_f64() * 1000.0
                    );
                }
            }
            Err(e) => {
                log_warn!("{}: {}", input_path.display(), e);
                eprintln!("  error: {}", e);
                any_failure = true;
            }
        }
    }

    if any_failure { ExitCode::FAILURE } else { ExitCode::SUCCESS }
}

// ============================================================================
// Per-file processing pipeline
// ============================================================================

/// What to do with every input image.
#[derive(Clone, Copy, Debug)]
pub struct Job<'a> {
    pub boxes: &'a [BoxPrompt],
    pub erase_boxes: &'a [BoxPrompt],
    pub output_dir: Option<&'a Path>,
    pub convention: ExportConvention,
    pub policy: OverwritePolicy,
}

pub fn process_image(input: &Path, job: &Job<'_>, bridge: &mut RectPromptBridge) -> Result<FileReport, String> {
    // -- Step 1: Load ----------------------------------------------------
    let pixels = io::read_image(input).map_err(|e| format!("load failed: {}", e))?;
    let (w, h) = pixels.dimensions();
    let mut mask = MaskLayer::new(w, h);

    // -- Step 2: Prompts -------------------------------------------------
    let mut painted = 0;
    let passes = job
        .boxes
        .iter()
        .map(|b| (b, PromptMerge::Overlay))
        .chain(job.erase_boxes.iter().map(|b| (b, PromptMerge::Erase)));
    for (bbox, how) in passes {
        let bbox = bbox.clamped(w, h);
        if bbox.is_degenerate() {
            log_warn!("Skipping empty box {} on {}", bbox, input.display());
            continue;
        }
        let report = bridge
            .apply(&mut mask, Some(input), bbox, how)
            .map_err(|e| format!("box {}: {}", bbox, e))?;
        if how == PromptMerge::Overlay {
            painted += report.painted;
        }
    }

    // -- Step 3: Export --------------------------------------------------
    let target = io::mask_save_path(input, job.output_dir);
    let output = export::save_mask(&mask, (w, h), job.convention, &target, job.policy)
        .map_err(|e| format!("save failed: {}", e))?;
    log_info!("CLI wrote {}", output.display());
    Ok(FileReport { output, painted, masked: mask.masked_pixel_count() })
}

// ============================================================================
// Helpers
// ============================================================================

/// Expand glob patterns and literal paths into a deduplicated, ordered list.
/// Globs skip previously exported masks; literal paths are taken as given.
pub fn resolve_inputs(patterns: &[String]) -> Vec<PathBuf> {
    let mut result: Vec<PathBuf> = Vec::new();

    for pattern in patterns {
        let as_path = Path::new(pattern);

        if as_path.exists() {
            if !result.iter().any(|p| p.as_path() == as_path) {
                result.push(as_path.to_path_buf());
            }
            continue;
        }

        match glob::glob(pattern) {
            Ok(entries) => {
                let mut matched = false;
                for entry in entries.flatten() {
                    if !io::is_supported_image(&entry) || io::is_mask_file(&entry) {
                        continue;
                    }
                    if !result.contains(&entry) {
                        result.push(entry);
                    }
                    matched = true;
                }
                if !matched {
                    eprintln!("warning: pattern '{}' matched no images.", pattern);
                }
            }
            Err(e) => {
                eprintln!("warning: invalid glob '{}': {}", pattern, e);
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_boxes_and_flags() {
        let args = CliArgs::try_parse_from([
            "maskfe",
            "--input",
            "a.png",
            "--box",
            "30,40,10,20",
            "--box",
            "0,0,5,5",
            "--erase-box",
            "1,1,2,2",
            "--backend-arg",
            "--device",
            "--overwrite",
        ])
        .expect("parse");
        assert_eq!(args.boxes, vec![BoxPrompt { x1: 10, y1: 20, x2: 30, y2: 40 }, BoxPrompt {
            x1: 0,
            y1: 0,
            x2: 5,
            y2: 5
        }]);
        assert_eq!(args.erase_boxes.len(), 1);
        assert_eq!(args.backend_args, vec!["--device".to_string()]);
        assert!(args.overwrite);
        assert!(!args.white_on_black);
    }

    #[test]
    fn rejects_malformed_box() {
        assert!(CliArgs::try_parse_from(["maskfe", "-i", "a.png", "--box", "1,2,3"]).is_err());
    }

    #[test]
    fn globs_keep_only_images() {
        let dir = tempfile::tempdir().expect("tempdir");
        for name in ["b.png", "a.png", "notes.txt", "a_mask.png"] {
            std::fs::write(dir.path().join(name), b"x").expect("write");
        }
        let pattern = format!("{}/*", dir.path().display());
        let found = resolve_inputs(&[pattern]);
        assert_eq!(found, vec![dir.path().join("a.png"), dir.path().join("b.png")]);
    }
}
