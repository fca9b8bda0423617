use std::path::{Path, PathBuf};
use std::time::Duration;

use image::Rgba;

use crate::components::history::DEFAULT_MAX_UNDO_STEPS;
use crate::components::tools::{DEFAULT_BRUSH_SIZE, DRAW_ALPHA, MAX_BRUSH_SIZE, MIN_BRUSH_SIZE, ToolProperties};
use crate::ops::export::ExportConvention;
use crate::ops::segment::{CommandBackend, PromptOptions, SegmentationBackend};
use crate::{log_info, log_warn};

const SETTINGS_FILE: &str = "maskfe_settings.cfg";

/// Persistent application settings (`key=value` lines).
#[derive(Clone, Debug, PartialEq)]
pub struct AppSettings {
    pub brush_size: u32,
    pub draw_color: Rgba<u8>,
    pub max_undo_steps: usize,
    /// Debounce for the save triggered by navigating away from an image.
    pub save_delay_ms: u64,
    /// Neighbours preloaded on each side of the current image.
    pub prefetch_radius: usize,
    /// Cached images further than this from the current index are evicted.
    pub prefetch_keep: usize,
    pub worker_threads: usize,
    /// External segmentation program. Empty disables box prompts.
    pub backend_command: String,
    /// Extra whitespace-separated arguments for `backend_command`.
    pub backend_args: String,
    pub multimask: bool,
    pub hq_token_only: bool,
    /// Empty means alongside each image.
    pub save_directory: String,
    pub export_convention: ExportConvention,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            brush_size: DEFAULT_BRUSH_SIZE,
            draw_color: Rgba([255, 0, 0, DRAW_ALPHA]),
            max_undo_steps: DEFAULT_MAX_UNDO_STEPS,
            save_delay_ms: 1000,
            prefetch_radius: 2,
            prefetch_keep: 5,
            worker_threads: 3,
            backend_command: String::new(),
            backend_args: String::new(),
            multimask: false,
            hq_token_only: false,
            save_directory: String::new(),
            export_convention: ExportConvention::BlackOnWhite,
        }
    }
}

impl AppSettings {
    /// Path to the settings file.
    /// On Linux:   ~/.config/maskfe/maskfe_settings.cfg  (XDG_CONFIG_HOME respected)
    /// On Windows: %APPDATA%\MaskFE\maskfe_settings.cfg
    /// On macOS:   ~/Library/Application Support/MaskFE/maskfe_settings.cfg
    /// Fallback:   same directory as the executable.
    pub fn settings_path() -> Option<PathBuf> {
        #[cfg(target_os = "linux")]
        {
            let config_dir = std::env::var("XDG_CONFIG_HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|_| {
                    let home = std::env::var("HOME").unwrap_or_else(|_| "~".to_string());
                    PathBuf::from(home).join(".config")
                })
                .join("maskfe");
            return Some(config_dir.join(SETTINGS_FILE));
        }
        #[cfg(target_os = "windows")]
        {
            let appdata = std::env::var("APPDATA").or_else(|_| std::env::var("USERPROFILE")).ok()?;
            return Some(PathBuf::from(appdata).join("MaskFE").join(SETTINGS_FILE));
        }
        #[cfg(target_os = "macos")]
        {
            let home = std::env::var("HOME").ok()?;
            return Some(
                PathBuf::from(home)
                    .join("Library")
                    .join("Application Support")
                    .join("MaskFE")
                    .join(SETTINGS_FILE),
            );
        }
        #[cfg(not(any(target_os = "linux", target_os = "windows", target_os = "macos")))]
        {
            std::env::current_exe().ok().and_then(|p| p.parent().map(|d| d.join(SETTINGS_FILE)))
        }
    }

    /// Load from the default location (defaults if missing or unreadable).
    pub fn load() -> Self {
        match Self::settings_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                log_info!("Settings loaded from {}", path.display());
                Self::parse(&content)
            }
            Err(_) => Self::default(),
        }
    }

    /// Save to the default location. Failures are logged, not returned.
    pub fn save(&self) {
        let Some(path) = Self::settings_path() else { return };
        if let Err(e) = self.save_to(&path) {
            log_warn!("Could not save settings to {}: {}", path.display(), e);
        }
    }

    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_config_string())
    }

    pub fn to_config_string(&self) -> String {
        let c = self.draw_color;
        format!(
            "brush_size={}\n\
             draw_color={},{},{},{}\n\
             max_undo_steps={}\n\
             save_delay_ms={}\n\
             prefetch_radius={}\n\
             prefetch_keep={}\n\
             worker_threads={}\n\
             backend_command={}\n\
             backend_args={}\n\
             multimask={}\n\
             hq_token_only={}\n\
             save_directory={}\n\
             export_convention={}\n",
            self.brush_size,
            c[0],
            c[1],
            c[2],
            c[3],
            self.max_undo_steps,
            self.save_delay_ms,
            self.prefetch_radius,
            self.prefetch_keep,
            self.worker_threads,
            self.backend_command,
            self.backend_args,
            self.multimask,
            self.hq_token_only,
            self.save_directory,
            self.export_convention.as_str(),
        )
    }

    /// Parse `key=value` lines. Unknown keys are skipped and malformed values
    /// keep their defaults.
    pub fn parse(content: &str) -> Self {
        let mut s = Self::default();
        let d = Self::default();
        for line in content.lines() {
            let Some((key, val)) = line.split_once('=') else { continue };
            let val = val.trim();
            match key.trim() {
                "brush_size" => {
                    s.brush_size = val
                        .parse::<u32>()
                        .map(|v| v.clamp(MIN_BRUSH_SIZE, MAX_BRUSH_SIZE))
                        .unwrap_or(d.brush_size);
                }
                "draw_color" => {
                    s.draw_color = Self::str_to_color(val).unwrap_or(d.draw_color);
                }
                "max_undo_steps" => {
                    s.max_undo_steps = val.parse().ok().filter(|&v| v > 0).unwrap_or(d.max_undo_steps);
                }
                "save_delay_ms" => {
                    s.save_delay_ms = val.parse().unwrap_or(d.save_delay_ms);
                }
                "prefetch_radius" => {
                    s.prefetch_radius = val.parse().unwrap_or(d.prefetch_radius);
                }
                "prefetch_keep" => {
                    s.prefetch_keep = val.parse().unwrap_or(d.prefetch_keep);
                }
                "worker_threads" => {
                    s.worker_threads = val.parse().ok().filter(|&v| v > 0).unwrap_or(d.worker_threads);
                }
                "backend_command" => {
                    s.backend_command = val.to_string();
                }
                "backend_args" => {
                    s.backend_args = val.to_string();
                }
                "multimask" => {
                    s.multimask = val == "true";
                }
                "hq_token_only" => {
                    s.hq_token_only = val == "true";
                }
                "save_directory" => {
                    s.save_directory = val.to_string();
                }
                "export_convention" => {
                    s.export_convention = ExportConvention::parse(val).unwrap_or(d.export_convention);
                }
                _ => {}
            }
        }
        // Keep the eviction window at least as wide as the prefetch window.
        s.prefetch_keep = s.prefetch_keep.max(s.prefetch_radius);
        s
    }

    fn str_to_color(val: &str) -> Option<Rgba<u8>> {
        let parts: Vec<u8> = val
            .split(',')
            .map(|p| p.trim().parse::<u8>())
            .collect::<Result<_, _>>()
            .ok()?;
        match parts.as_slice() {
            [r, g, b, a] => Some(Rgba([*r, *g, *b, *a])),
            [r, g, b] => Some(Rgba([*r, *g, *b, DRAW_ALPHA])),
            _ => None,
        }
    }

    // ---- derived values ----------------------------------------------------------

    pub fn tool_properties(&self) -> ToolProperties {
        ToolProperties {
            brush_size: self.brush_size.clamp(MIN_BRUSH_SIZE, MAX_BRUSH_SIZE),
            color: self.draw_color,
        }
    }

    pub fn prompt_options(&self) -> PromptOptions {
        PromptOptions {
            multimask: self.multimask,
            hq_token_only: self.hq_token_only,
        }
    }

    pub fn save_delay(&self) -> Duration {
        Duration::from_millis(self.save_delay_ms)
    }

    pub fn save_dir(&self) -> Option<PathBuf> {
        let trimmed = self.save_directory.trim();
        if trimmed.is_empty() { None } else { Some(PathBuf::from(trimmed)) }
    }

    pub fn segmentation_backend(&self) -> Option<Box<dyn SegmentationBackend>> {
        CommandBackend::from_config(&self.backend_command, &self.backend_args)
            .map(|b| Box::new(b) as Box<dyn SegmentationBackend>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let s = AppSettings::default();
        assert_eq!(s.brush_size, 10);
        assert_eq!(s.draw_color, Rgba([255, 0, 0, 50]));
        assert_eq!(s.max_undo_steps, 20);
        assert_eq!(s.save_delay(), Duration::from_millis(1000));
        assert_eq!((s.prefetch_radius, s.prefetch_keep, s.worker_threads), (2, 5, 3));
        assert!(s.save_dir().is_none());
        assert!(s.segmentation_backend().is_none());
    }

    #[test]
    fn round_trip_through_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join(SETTINGS_FILE);
        let s = AppSettings {
            brush_size: 33,
            draw_color: Rgba([0, 0, 255, 50]),
            backend_command: "/opt/sam/predict".into(),
            backend_args: "--device cuda".into(),
            multimask: true,
            save_directory: "/tmp/masks".into(),
            export_convention: ExportConvention::WhiteOnBlack,
            ..Default::default()
        };
        s.save_to(&path).expect("save");
        assert_eq!(AppSettings::load_from(&path), s);
    }

    #[test]
    fn malformed_values_fall_back() {
        let s = AppSettings::parse(
            "brush_size=900\n\
             draw_color=1,2\n\
             max_undo_steps=zero\n\
             worker_threads=0\n\
             unknown_key=5\n\
             export_convention=sideways\n\
             garbage line\n",
        );
        assert_eq!(s.brush_size, 50);
        assert_eq!(s.draw_color, Rgba([255, 0, 0, 50]));
        assert_eq!(s.max_undo_steps, 20);
        assert_eq!(s.worker_threads, 3);
        assert_eq!(s.export_convention, ExportConvention::BlackOnWhite);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert_eq!(AppSettings::load_from(&dir.path().join("absent.cfg")), AppSettings::default());
    }
}
