use std::path::PathBuf;
use std::time::{Duration, Instant};

use egui::{Color32, Key, Modifiers, Pos2, Rect, Sense, Stroke, TextureHandle, TextureOptions, Vec2};

use crate::components::tools::{ToolMode, COLOR_PRESETS, MAX_BRUSH_SIZE, MIN_BRUSH_SIZE};
use crate::compositor::RenderOutcome;
use crate::io::SUPPORTED_EXTENSIONS;
use crate::ops::export::{ExportError, OverwritePolicy};
use crate::session::{PointerButton, SessionError};
use crate::settings::AppSettings;
use crate::workspace::Workspace;
use crate::log_info;

const LASSO_STROKE: Color32 = Color32::from_rgb(255, 0, 0);
const RECT_STROKE: Color32 = Color32::from_rgb(0, 120, 255);

/// Thin eframe shell: widgets and input in, `Workspace` calls out.
pub struct MaskFEApp {
    workspace: Workspace,
    settings: AppSettings,
    texture: Option<TextureHandle>,
    status: String,
    title: String,
    custom_color: [u8; 3],
    /// Set when Ctrl+S hit an existing file; the confirm window is open.
    confirm_overwrite: Option<PathBuf>,
}

impl MaskFEApp {
    pub fn new(_cc: &eframe::CreationContext<'_>, settings: AppSettings) -> Self {
        let c = settings.draw_color;
        Self {
            workspace: Workspace::new(&settings),
            custom_color: [c[0], c[1], c[2]],
            settings,
            texture: None,
            status: "Open an image or a folder to start".to_string(),
            title: String::new(),
            confirm_overwrite: None,
        }
    }

    // ---- file actions ------------------------------------------------------------

    fn handle_open_image(&mut self) {
        let Some(path) = rfd::FileDialog::new()
            .add_filter("Images", SUPPORTED_EXTENSIONS)
            .pick_file()
        else {
            return;
        };
        if let Err(e) = self.workspace.open_image(&path) {
            self.workspace.session_mut().set_status(e.to_string());
        }
    }

    fn handle_open_folder(&mut self) {
        let Some(dir) = rfd::FileDialog::new().pick_folder() else { return };
        if let Err(e) = self.workspace.open_folder(&dir) {
            self.workspace.session_mut().set_status(e.to_string());
        }
    }

    fn handle_choose_save_dir(&mut self) {
        let Some(dir) = rfd::FileDialog::new().pick_folder() else { return };
        log_info!("Save directory set to {}", dir.display());
        self.settings.save_directory = dir.display().to_string();
        self.workspace.set_save_dir(Some(dir));
        self.settings.save();
    }

    fn handle_save(&mut self) {
        if let Err(SessionError::Export(ExportError::AlreadyExists(path))) =
            self.workspace.save_current(OverwritePolicy::Refuse)
        {
            self.confirm_overwrite = Some(path);
        }
    }

    fn handle_save_all(&mut self) {
        let Some(dir) = rfd::FileDialog::new().pick_folder() else { return };
        self.workspace.save_all(Some(&dir), OverwritePolicy::Replace);
    }

    // ---- input -------------------------------------------------------------------

    fn handle_shortcuts(&mut self, ctx: &egui::Context) {
        if ctx.wants_keyboard_input() || self.confirm_overwrite.is_some() {
            return;
        }
        let cmd = |k: Key| ctx.input_mut(|i| i.consume_key(Modifiers::COMMAND, k));
        let plain = |k: Key| ctx.input_mut(|i| i.consume_key(Modifiers::NONE, k));

        if cmd(Key::S) {
            self.handle_save();
        }
        if cmd(Key::Z) {
            self.workspace.session_mut().undo();
        }
        if cmd(Key::Y) {
            self.workspace.session_mut().redo();
        }
        if cmd(Key::ArrowUp) || cmd(Key::PlusEquals) {
            self.workspace.session_mut().step_brush(1);
        }
        if cmd(Key::ArrowDown) || cmd(Key::Minus) {
            self.workspace.session_mut().step_brush(-1);
        }
        if plain(Key::ArrowLeft) {
            self.workspace.previous();
        }
        if plain(Key::ArrowRight) {
            self.workspace.next();
        }

        let session = self.workspace.session_mut();
        if plain(Key::Space) {
            session.toggle_pan();
        }
        if plain(Key::R) {
            session.reset_view();
        }
        if plain(Key::Escape) {
            session.cancel();
        }
        for (key, mode) in [
            (Key::L, ToolMode::Lasso),
            (Key::B, ToolMode::RectPrompt),
            (Key::A, ToolMode::RectAdd),
            (Key::E, ToolMode::RectErase),
        ] {
            if plain(key) {
                session.toggle_tool(mode);
            }
        }
    }

    fn handle_canvas_input(&mut self, ui: &egui::Ui, response: &egui::Response) {
        let origin = response.rect.min;
        let local = |p: Pos2| Pos2::new(p.x - origin.x, p.y - origin.y);
        let (pos, primary, secondary, released, scroll, zoom, ctrl) = ui.input(|i| {
            (
                i.pointer.interact_pos(),
                i.pointer.primary_pressed(),
                i.pointer.secondary_pressed(),
                i.pointer.any_released(),
                i.scroll_delta.y,
                i.zoom_delta(),
                i.modifiers.command,
            )
        });
        let session = self.workspace.session_mut();

        if response.hovered() {
            // egui folds Ctrl+wheel into zoom_delta on most platforms.
            let delta = if zoom != 1.0 { zoom - 1.0 } else if ctrl { scroll } else { 0.0 };
            if delta != 0.0 {
                session.wheel(delta, true);
            }
        }

        let Some(pos) = pos else { return };
        let pressed = response.hovered() && (primary || secondary);
        if pressed {
            let button = if secondary { PointerButton::Secondary } else { PointerButton::Primary };
            session.pointer_pressed(local(pos), button);
        }
        // A click can press and release within one frame.
        if !session.stroke().is_idle() {
            if released {
                session.pointer_released(local(pos));
            } else if !pressed && ui.input(|i| i.pointer.is_moving()) {
                session.pointer_moved(local(pos));
            }
        }
    }

    // ---- panels ------------------------------------------------------------------

    fn toolbar(&mut self, ui: &mut egui::Ui) {
        ui.horizontal_wrapped(|ui| {
            if ui.button("Open Image…").clicked() {
                self.handle_open_image();
            }
            if ui.button("Open Folder…").clicked() {
                self.handle_open_folder();
            }
            if ui.button("Save Dir…").clicked() {
                self.handle_choose_save_dir();
            }
            if ui.button("Save").on_hover_text("Ctrl+S").clicked() {
                self.handle_save();
            }
            if ui.button("Save All…").clicked() {
                self.handle_save_all();
            }
            ui.separator();

            let active = self.workspace.session().tool();
            for mode in ToolMode::ALL {
                if ui.selectable_label(active == mode, mode.label()).clicked() {
                    self.workspace.session_mut().toggle_tool(mode);
                }
            }
            ui.separator();

            let mut size = self.workspace.session().properties().brush_size;
            let slider = egui::Slider::new(&mut size, MIN_BRUSH_SIZE..=MAX_BRUSH_SIZE).text("Brush");
            if ui.add(slider).changed() {
                self.workspace.session_mut().set_brush_size(size);
            }
            for (i, (name, rgb)) in COLOR_PRESETS.iter().enumerate() {
                let swatch = egui::Button::new("  ").fill(Color32::from_rgb(rgb[0], rgb[1], rgb[2]));
                if ui.add(swatch).on_hover_text(*name).clicked() {
                    self.workspace.session_mut().set_preset_color(i);
                    self.custom_color = *rgb;
                }
            }
            if ui.color_edit_button_srgb(&mut self.custom_color).changed() {
                let rgb = self.custom_color;
                self.workspace.session_mut().set_custom_color(rgb);
            }
            ui.separator();

            let session = self.workspace.session_mut();
            if ui.add_enabled(session.history().can_undo(), egui::Button::new("Undo")).clicked() {
                session.undo();
            }
            if ui.add_enabled(session.history().can_redo(), egui::Button::new("Redo")).clicked() {
                session.redo();
            }
            if ui.button("Clear").clicked() {
                self.workspace.clear_mask();
            }
            if ui.button("Reset View").on_hover_text("R").clicked() {
                self.workspace.session_mut().reset_view();
            }
            ui.separator();

            let bridge = self.workspace.session_mut().prompt_bridge_mut();
            let mut options = bridge.options();
            let available = bridge.is_available();
            ui.add_enabled_ui(available, |ui| {
                let a = ui.checkbox(&mut options.multimask, "Multimask").changed();
                let b = ui.checkbox(&mut options.hq_token_only, "HQ token only").changed();
                if a || b {
                    bridge.set_options(options);
                    self.settings.multimask = options.multimask;
                    self.settings.hq_token_only = options.hq_token_only;
                    self.settings.save();
                }
            });
            if !available {
                ui.weak("(no segmentation backend)");
            }
        });
    }

    fn nav_bar(&mut self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            let index = self.workspace.index();
            let total = self.workspace.files().len();
            if ui.add_enabled(index.is_some_and(|i| i > 0), egui::Button::new("◀ Previous")).clicked() {
                self.workspace.previous();
            }
            match (index, self.workspace.current_path()) {
                (Some(i), Some(path)) => {
                    let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
                    ui.label(format!("{} / {}  {}", i + 1, total, name));
                }
                _ => {
                    ui.weak("No image");
                }
            }
            if ui.add_enabled(index.is_some_and(|i| i + 1 < total), egui::Button::new("Next ▶")).clicked() {
                self.workspace.next();
            }
        });
    }

    fn canvas(&mut self, ui: &mut egui::Ui) {
        let (response, painter) = ui.allocate_painter(ui.available_size(), Sense::click_and_drag());
        let rect = response.rect;
        let size = [rect.width().max(0.0) as u32, rect.height().max(0.0) as u32];
        self.workspace.session_mut().resize(size);

        self.handle_canvas_input(ui, &response);

        let session = self.workspace.session_mut();
        let outcome = session.render();
        let texture_options = TextureOptions::NEAREST;
        let uploaded = match (outcome, self.texture.as_mut()) {
            (RenderOutcome::Unchanged, Some(_)) => true,
            (RenderOutcome::Partial(r), Some(tex)) if !r.is_empty() => {
                tex.set_partial([r.x as usize, r.y as usize], session.frame_region(r), texture_options);
                true
            }
            (_, Some(tex)) if tex.size() == session.frame().size => {
                tex.set(session.frame().clone(), texture_options);
                true
            }
            _ => false,
        };
        if !uploaded {
            self.texture = Some(ui.ctx().load_texture("mask_composite", session.frame().clone(), texture_options));
        }

        if let Some(tex) = &self.texture {
            let [w, h] = tex.size();
            let image_rect = Rect::from_min_size(rect.min, Vec2::new(w as f32, h as f32));
            let uv = Rect::from_min_max(Pos2::ZERO, Pos2::new(1.0, 1.0));
            painter.image(tex.id(), image_rect, uv, Color32::WHITE);
        }

        self.paint_overlays(ui, &painter, rect);
    }

    /// Lasso path, selection box and brush outline on top of the frame.
    fn paint_overlays(&self, ui: &egui::Ui, painter: &egui::Painter, rect: Rect) {
        let session = self.workspace.session();
        let view = session.view();
        let origin = rect.min.to_vec2();
        let to_screen = |x: f32, y: f32| view.image_to_screen(x as f64, y as f64) + origin;

        if let Some(points) = session.lasso_points()
            && points.len() > 1
        {
            let path: Vec<Pos2> = points.iter().map(|p| to_screen(p.x + 0.5, p.y + 0.5)).collect();
            painter.add(egui::Shape::line(path, Stroke::new(1.0, LASSO_STROKE)));
        }

        if let Some(selection) = session.rect_selection() {
            let b = selection.bounds();
            let min = to_screen(b.x as f32, b.y as f32);
            let max = to_screen(b.right() as f32, b.bottom() as f32);
            painter.rect_stroke(Rect::from_min_max(min, max), 0.0, Stroke::new(1.5, RECT_STROKE));
        }

        if session.tool().is_brush()
            && let Some(hover) = ui.input(|i| i.pointer.hover_pos())
            && rect.contains(hover)
        {
            let radius = session.properties().brush_size as f32 / 2.0 * view.scale() as f32;
            painter.circle_stroke(hover, radius.max(1.0), Stroke::new(1.0, Color32::from_gray(40)));
        }
    }

    fn overwrite_dialog(&mut self, ctx: &egui::Context) {
        let Some(path) = self.confirm_overwrite.clone() else { return };
        let mut decision = None;
        egui::Window::new("Overwrite mask?")
            .collapsible(false)
            .resizable(false)
            .anchor(egui::Align2::CENTER_CENTER, Vec2::ZERO)
            .show(ctx, |ui| {
                ui.label(format!("{} already exists.", path.display()));
                ui.horizontal(|ui| {
                    if ui.button("Overwrite").clicked() {
                        decision = Some(true);
                    }
                    if ui.button("Cancel").clicked() {
                        decision = Some(false);
                    }
                });
            });
        match decision {
            Some(true) => {
                self.confirm_overwrite = None;
                let _ = self.workspace.save_current(OverwritePolicy::Replace);
            }
            Some(false) => {
                self.confirm_overwrite = None;
                self.workspace.session_mut().set_status("Save cancelled");
            }
            None => {}
        }
    }

    /// Persist brush and colour when they changed this frame.
    fn sync_settings(&mut self) {
        let props = *self.workspace.session().properties();
        if props.brush_size != self.settings.brush_size || props.color != self.settings.draw_color {
            self.settings.brush_size = props.brush_size;
            self.settings.draw_color = props.color;
            self.settings.save();
        }
    }
}

impl eframe::App for MaskFEApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        // --- Background work: prefetched images and the debounced save ---
        self.workspace.poll(Instant::now());

        // --- Window title: "MaskFE - <image>" ---
        let title = match self.workspace.current_path().and_then(|p| p.file_name()) {
            Some(name) => format!("MaskFE - {}", name.to_string_lossy()),
            None => "MaskFE".to_string(),
        };
        if title != self.title {
            ctx.send_viewport_cmd(egui::ViewportCommand::Title(title.clone()));
            self.title = title;
        }

        self.handle_shortcuts(ctx);

        egui::TopBottomPanel::top("toolbar").show(ctx, |ui| self.toolbar(ui));
        egui::TopBottomPanel::bottom("status_bar").show(ctx, |ui| {
            ui.label(&self.status);
        });
        egui::TopBottomPanel::bottom("nav_bar").show(ctx, |ui| self.nav_bar(ui));
        egui::CentralPanel::default()
            .frame(egui::Frame::none())
            .show(ctx, |ui| self.canvas(ui));

        self.overwrite_dialog(ctx);
        self.sync_settings();

        if let Some(msg) = self.workspace.session_mut().take_status() {
            self.status = msg;
        }

        // Keep polling while a save is pending or neighbours are loading.
        if let Some(due) = self.workspace.next_save_due() {
            ctx.request_repaint_after(due.saturating_duration_since(Instant::now()));
        } else if self.workspace.prefetcher().in_flight_count() > 0 {
            ctx.request_repaint_after(Duration::from_millis(50));
        }
    }
}
