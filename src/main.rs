use std::time::Duration;

use eframe::egui;
use nifti_overlay_viewer::compositor::{present, Presentation};
use nifti_overlay_viewer::{
    format_mm, Axis, CoordinateBus, DisplayConfig, Fetcher, HttpFetcher, Kernel, MmCoord,
    SlotStatus, ThresholdMode, ViewerConfig, ViewerSession,
};

#[cfg(target_arch = "wasm32")]
use js_sys::Uint8Array;
#[cfg(target_arch = "wasm32")]
use std::cell::RefCell;
#[cfg(target_arch = "wasm32")]
use wasm_bindgen::closure::Closure;
#[cfg(target_arch = "wasm32")]
use wasm_bindgen::{JsCast, JsValue};
#[cfg(target_arch = "wasm32")]
use web_sys::{Event, FileReader, HtmlCanvasElement, HtmlInputElement};

/// Scroll distance (points) that moves one slice.
const SCROLL_STEP: f32 = 30.0;
const STRIP_H: f32 = 22.0;

/// A composed view uploaded to the GPU, valid for one session revision
/// and surface size.
struct CachedView {
    revision: u64,
    side_px: u32,
    presentation: Presentation,
    texture: egui::TextureHandle,
}

struct ViewerApp {
    session: ViewerSession,
    bus: CoordinateBus,
    query_input: String,
    views: [Option<CachedView>; 3],
    scroll_accum: [f32; 3],
    file_error: Option<String>,
}

impl ViewerApp {
    fn new(config: ViewerConfig, fetcher: Box<dyn Fetcher>) -> Self {
        let bus = CoordinateBus::default();
        let query_input = config.initial_query.clone().unwrap_or_default();
        let mut session = ViewerSession::new(config, fetcher, &bus);
        session.start();
        Self {
            session,
            bus,
            query_input,
            views: [None, None, None],
            scroll_accum: [0.0; 3],
            file_error: None,
        }
    }

    #[cfg(not(target_arch = "wasm32"))]
    fn pick_background_file(&mut self) {
        let Some(path) = rfd::FileDialog::new()
            .add_filter("NIfTI", &["nii", "gz"])
            .pick_file()
        else {
            return;
        };
        match std::fs::read(&path) {
            Ok(bytes) => {
                self.file_error = None;
                self.session
                    .load_background_bytes(&path.to_string_lossy(), &bytes);
            }
            Err(e) => self.file_error = Some(format!("Failed to read {}: {e}", path.display())),
        }
    }

    #[cfg(target_arch = "wasm32")]
    fn pick_background_file(&mut self, ctx: &egui::Context) {
        if let Err(e) = open_web_file_dialog(ctx) {
            self.file_error = Some(format!("File dialog unavailable: {e:?}"));
        }
    }

    /// Compose and upload the view normal to `axis` unless the cached one
    /// is still current.
    fn view_texture(&mut self, ctx: &egui::Context, axis: Axis, side: f32) -> Option<&CachedView> {
        let dpr = ctx.pixels_per_point() as f64;
        let side_px = (side as f64 * dpr).round() as u32;
        let revision = self.session.revision();
        let slot = &mut self.views[axis.index()];
        let fresh = slot
            .as_ref()
            .is_some_and(|v| v.revision == revision && v.side_px == side_px);
        if !fresh {
            *slot = self.session.compose(axis).and_then(|slice| {
                let (w, h) = slice.image.dimensions();
                let presentation = Presentation::fit(w, h, side as f64, dpr)?;
                let surface = present(&slice, side as f64, dpr)?;
                let image = egui::ColorImage::from_rgba_unmultiplied(
                    [surface.width() as usize, surface.height() as usize],
                    surface.as_raw(),
                );
                let texture =
                    ctx.load_texture(axis.view_name(), image, egui::TextureOptions::NEAREST);
                Some(CachedView {
                    revision,
                    side_px,
                    presentation,
                    texture,
                })
            });
        }
        slot.as_ref()
    }

    fn slice_cell(&mut self, ui: &mut egui::Ui, axis: Axis, size: egui::Vec2, accent: egui::Color32) {
        let (cell_rect, response) = ui.allocate_exact_size(size, egui::Sense::click());
        let painter = ui.painter_at(cell_rect);

        let label_strip = egui::Rect::from_min_size(cell_rect.min, egui::vec2(size.x, STRIP_H));
        let mm = self
            .session
            .grid()
            .map(|g| format_mm(g.index_to_mm(axis, self.session.cursor().index(axis))))
            .unwrap_or_default();
        painter.rect_filled(label_strip, 0.0, egui::Color32::from_black_alpha(160));
        painter.text(
            label_strip.left_center() + egui::vec2(6.0, 0.0),
            egui::Align2::LEFT_CENTER,
            format!("{}  {} = {} mm", axis.view_name(), axis, mm),
            egui::FontId::proportional(14.0),
            accent,
        );

        let side = size.x.min(size.y - STRIP_H).max(1.0);
        let image_rect = egui::Rect::from_center_size(
            egui::pos2(cell_rect.center().x, label_strip.max.y + (size.y - STRIP_H) / 2.0),
            egui::vec2(side, side),
        );
        let uv = egui::Rect::from_min_max(egui::pos2(0.0, 0.0), egui::pos2(1.0, 1.0));
        let dpr = ui.ctx().pixels_per_point();

        let ctx = ui.ctx().clone();
        let presentation = self.view_texture(&ctx, axis, side).map(|view| {
            painter.image(view.texture.id(), image_rect, uv, egui::Color32::WHITE);
            view.presentation
        });

        if let (Some(presentation), Some(pos)) = (presentation, response.interact_pointer_pos()) {
            if response.clicked() {
                let local = (pos - image_rect.min) * dpr;
                self.session
                    .click_surface(axis, &presentation, local.x as f64, local.y as f64);
            }
        }

        if ui.rect_contains_pointer(cell_rect) {
            let accum = &mut self.scroll_accum[axis.index()];
            *accum += ui.input(|i| i.raw_scroll_delta.y);
            let mut steps = 0isize;
            while *accum >= SCROLL_STEP {
                *accum -= SCROLL_STEP;
                steps += 1;
            }
            while *accum <= -SCROLL_STEP {
                *accum += SCROLL_STEP;
                steps -= 1;
            }
            if steps != 0 {
                self.session.step_slice(axis, steps);
            }
        }
    }

    fn controls(&mut self, ui: &mut egui::Ui, now: f64) {
        let mut display: DisplayConfig = *self.session.display();

        ui.heading("Threshold");
        ui.horizontal(|ui| {
            ui.radio_value(&mut display.threshold_mode, ThresholdMode::Percentile, "Percentile");
            ui.radio_value(&mut display.threshold_mode, ThresholdMode::Value, "Value");
        });
        match display.threshold_mode {
            ThresholdMode::Percentile => {
                ui.add(egui::Slider::new(&mut display.percentile, 50.0..=99.9).suffix(" %"));
            }
            ThresholdMode::Value => {
                let mut value = egui::DragValue::new(&mut display.threshold_value).speed(0.01);
                if let Some((min, max)) = self.session.overlay().map(|v| v.value_range()) {
                    value = value.range(min..=max);
                }
                ui.add(value);
            }
        }
        if let Some(t) = self.session.threshold() {
            ui.label(format!("cutoff {t:.3}"));
        }
        ui.checkbox(&mut display.positive_only, "Positive only");
        ui.checkbox(&mut display.use_abs, "Use |value|");
        ui.add(egui::Slider::new(&mut display.alpha, 0.0..=1.0).text("Opacity"));
        ui.checkbox(&mut display.mirror_x, "Right hemisphere on right");
        self.session.set_display(display);

        ui.separator();
        ui.heading("Map");
        let mut params = self.session.map_params();
        egui::Grid::new("map_params").num_columns(2).show(ui, |ui| {
            ui.label("Voxel");
            ui.add(egui::DragValue::new(&mut params.voxel).range(1.0..=6.0).speed(0.1).suffix(" mm"));
            ui.end_row();
            ui.label("FWHM");
            ui.add(egui::DragValue::new(&mut params.fwhm).range(0.0..=50.0).speed(0.5).suffix(" mm"));
            ui.end_row();
            ui.label("Kernel");
            egui::ComboBox::from_id_salt("kernel")
                .selected_text(params.kernel.to_string())
                .show_ui(ui, |ui| {
                    for kernel in Kernel::ALL {
                        ui.selectable_value(&mut params.kernel, kernel, kernel.to_string());
                    }
                });
            ui.end_row();
            ui.label("Radius");
            ui.add(egui::DragValue::new(&mut params.r).range(1.0..=50.0).speed(0.5).suffix(" mm"));
            ui.end_row();
        });
        if params != self.session.map_params() {
            self.session.set_map_params(params, now);
        }

        ui.separator();
        ui.heading("Cursor (mm)");
        for axis in Axis::ALL {
            ui.horizontal(|ui| {
                ui.label(axis.to_string());
                let mut text = self.session.cursor().text(axis).to_string();
                let response = ui.add(egui::TextEdit::singleline(&mut text).desired_width(72.0));
                if response.changed() {
                    self.session.edit_coord(axis, text);
                }
                if response.lost_focus() {
                    self.session.commit_coord(axis);
                }
            });
        }
    }
}

fn slot_status(ui: &mut egui::Ui, name: &str, status: SlotStatus<'_>) {
    if status.loading {
        ui.spinner();
        ui.label(format!("{name}: loading…"));
    } else if let Some(err) = status.error {
        ui.colored_label(egui::Color32::RED, format!("{name}: {err}"));
    }
}

impl eframe::App for ViewerApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        let now = ctx.input(|i| i.time);

        #[cfg(target_arch = "wasm32")]
        if let Some((name, bytes)) = take_pending_file() {
            self.file_error = None;
            self.session.load_background_bytes(&name, &bytes);
        }

        self.session.poll(now);

        egui::TopBottomPanel::top("menu_bar").show(ctx, |ui| {
            egui::MenuBar::new().ui(ui, |ui| {
                ui.menu_button("File", |ui| {
                    if ui.button("Load background…").clicked() {
                        ui.close();
                        #[cfg(not(target_arch = "wasm32"))]
                        self.pick_background_file();
                        #[cfg(target_arch = "wasm32")]
                        self.pick_background_file(ctx);
                    }
                    if ui.button("Reload template").clicked() {
                        ui.close();
                        self.session.reload_background();
                    }
                });
                ui.menu_button("View", |ui| {
                    if ui.button("Go to origin").clicked() {
                        ui.close();
                        self.bus.publish(MmCoord::new(0.0, 0.0, 0.0));
                    }
                });
            });
            ui.horizontal(|ui| {
                ui.label("Query");
                let response = ui.add(
                    egui::TextEdit::singleline(&mut self.query_input)
                        .hint_text("e.g. working memory")
                        .desired_width(280.0),
                );
                let submitted =
                    response.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter));
                if submitted || ui.button("Show").clicked() {
                    self.session.set_query(&self.query_input);
                }
                if let Some(url) = self.session.overlay_url() {
                    ui.hyperlink_to("Download map", url);
                }
            });
            ui.horizontal(|ui| {
                slot_status(ui, "Background", self.session.background_status());
                slot_status(ui, "Map", self.session.overlay_status());
            });
            if let Some(ref msg) = self.file_error {
                ui.colored_label(egui::Color32::RED, msg);
            }
        });

        egui::SidePanel::left("controls")
            .resizable(false)
            .show(ctx, |ui| self.controls(ui, now));

        let frame = egui::Frame::new()
            .fill(egui::Color32::BLACK)
            .inner_margin(0.0);
        egui::CentralPanel::default().frame(frame).show(ctx, |ui| {
            if self.session.grid().is_none() {
                let text = if self.session.background_status().loading
                    || self.session.overlay_status().loading
                {
                    "Loading…"
                } else {
                    "No volume loaded.\nUse File > Load background… to open a file."
                };
                ui.centered_and_justified(|ui| {
                    ui.label(egui::RichText::new(text).color(egui::Color32::GRAY).size(20.0));
                });
                return;
            }

            let avail = ui.available_size();
            let spacing = ui.spacing().item_spacing;
            let cell = egui::vec2((avail.x - spacing.x) / 2.0, (avail.y - spacing.y) / 2.0);

            // Axial upper-left, coronal lower-left, sagittal lower-right.
            ui.horizontal(|ui| {
                self.slice_cell(ui, Axis::Z, cell, egui::Color32::YELLOW);
                ui.allocate_ui(cell, |_ui| {});
            });
            ui.horizontal(|ui| {
                self.slice_cell(ui, Axis::Y, cell, egui::Color32::GREEN);
                self.slice_cell(ui, Axis::X, cell, egui::Color32::RED);
            });
        });

        if self.session.has_pending_params() {
            ctx.request_repaint_after(Duration::from_millis(50));
        }
    }
}

#[cfg(target_arch = "wasm32")]
fn open_web_file_dialog(ctx: &egui::Context) -> Result<(), JsValue> {
    let document = web_sys::window()
        .and_then(|w| w.document())
        .ok_or_else(|| JsValue::from_str("document not available"))?;
    let input: HtmlInputElement = document.create_element("input")?.dyn_into()?;
    input.set_type("file");
    input.set_accept(".nii,.nii.gz");

    let reader = FileReader::new()?;
    let file_name = std::rc::Rc::new(RefCell::new(String::new()));

    let name_for_load = file_name.clone();
    let ctx_clone = ctx.clone();
    let onload = Closure::wrap(Box::new(move |event: Event| {
        let Some(reader) = event.target().and_then(|t| t.dyn_into::<FileReader>().ok()) else {
            return;
        };
        if let Ok(result) = reader.result() {
            let array = Uint8Array::new(&result);
            let mut bytes = vec![0u8; array.length() as usize];
            array.copy_to(&mut bytes);
            set_pending_file(name_for_load.borrow().clone(), bytes);
            ctx_clone.request_repaint();
        }
    }) as Box<dyn FnMut(_)>);
    reader.set_onloadend(Some(onload.as_ref().unchecked_ref()));
    onload.forget();

    let input_clone = input.clone();
    let onchange = Closure::wrap(Box::new(move |_event: Event| {
        if let Some(file) = input_clone.files().and_then(|files| files.get(0)) {
            *file_name.borrow_mut() = file.name();
            if let Err(e) = reader.read_as_array_buffer(&file) {
                log::warn!("could not read {}: {e:?}", file.name());
            }
        }
    }) as Box<dyn FnMut(_)>);
    input.set_onchange(Some(onchange.as_ref().unchecked_ref()));
    onchange.forget();

    input.click();
    Ok(())
}

#[cfg(target_arch = "wasm32")]
thread_local! {
    static PENDING_FILE: RefCell<Option<(String, Vec<u8>)>> = const { RefCell::new(None) };
}

#[cfg(target_arch = "wasm32")]
fn set_pending_file(name: String, bytes: Vec<u8>) {
    PENDING_FILE.with(|cell| {
        *cell.borrow_mut() = Some((name, bytes));
    });
}

#[cfg(target_arch = "wasm32")]
fn take_pending_file() -> Option<(String, Vec<u8>)> {
    PENDING_FILE.with(|cell| cell.borrow_mut().take())
}

/// Defaults and environment, overridden by the JSON file named in
/// `NIIVIEW_CONFIG` if set.
#[cfg(not(target_arch = "wasm32"))]
fn load_config() -> anyhow::Result<ViewerConfig> {
    use anyhow::Context;

    match std::env::var("NIIVIEW_CONFIG") {
        Ok(path) => {
            let text =
                std::fs::read_to_string(&path).with_context(|| format!("reading {path}"))?;
            ViewerConfig::from_json(&text).with_context(|| format!("parsing {path}"))
        }
        Err(_) => Ok(ViewerConfig::default()),
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let config = load_config()?;
    log::info!("map service at {}", config.api_base);

    let native_options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default().with_inner_size([1100.0, 900.0]),
        ..Default::default()
    };
    eframe::run_native(
        "NIfTI Overlay Viewer",
        native_options,
        Box::new(move |cc| {
            let ctx = cc.egui_ctx.clone();
            let fetcher = HttpFetcher::new()?.with_wake(move || ctx.request_repaint());
            Ok(Box::new(ViewerApp::new(config, Box::new(fetcher))))
        }),
    )
    .map_err(|e| anyhow::anyhow!("{e}"))
}

/// `?q=` of the page URL, if present.
#[cfg(target_arch = "wasm32")]
fn page_query(window: &web_sys::Window) -> Option<String> {
    let search = window.location().search().ok()?;
    search
        .trim_start_matches('?')
        .split('&')
        .find_map(|pair| pair.strip_prefix("q="))
        .and_then(|q| urlencoding::decode(&q.replace('+', " ")).ok().map(|q| q.into_owned()))
        .filter(|q| !q.trim().is_empty())
}

#[cfg(target_arch = "wasm32")]
fn main() {
    console_error_panic_hook::set_once();
    wasm_logger::init(wasm_logger::Config::default());

    let Some(window) = web_sys::window() else {
        log::error!("window not available");
        return;
    };
    let mut config = ViewerConfig::default();
    if let Some(query) = page_query(&window) {
        config.initial_query = Some(query);
    }
    let canvas: Option<HtmlCanvasElement> = window
        .document()
        .and_then(|d| d.get_element_by_id("canvas_render"))
        .and_then(|e| e.dyn_into().ok());
    let Some(canvas) = canvas else {
        log::error!("canvas #canvas_render not found");
        return;
    };

    let web_options = eframe::WebOptions::default();
    wasm_bindgen_futures::spawn_local(async move {
        let started = eframe::WebRunner::new()
            .start(
                canvas,
                web_options,
                Box::new(move |cc| {
                    let ctx = cc.egui_ctx.clone();
                    let fetcher = HttpFetcher::new()?.with_wake(move || ctx.request_repaint());
                    Ok(Box::new(ViewerApp::new(config, Box::new(fetcher))))
                }),
            )
            .await;
        if let Err(e) = started {
            log::error!("failed to start viewer: {e:?}");
        }
    });
}
