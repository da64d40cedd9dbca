use aecg_lib::index::indexer::IndexerOptions;
use aecg_lib::index::info::{load_study_info, AnnotationMethod, StudyInfo};
use aecg_lib::index::stats::StudyStats;
use aecg_lib::plot::{Color, Figure, PlotBackend, PlotLayout, Series, Style};
use aecg_lib::signal::{lead_short_name, STANDARD_LEADS};
use chrono::Local;
use clap::Parser;
use eframe::{egui, egui::ViewportBuilder};
use egui::collapsing_header::CollapsingState;
use egui_plot::{Legend, Line, Plot, PlotPoint, Polygon, Text as PlotText};
use log::{error, info, warn};
use rfd::FileDialog;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

mod export;
mod indexing;
mod logging;
mod navigation;
mod store;
mod task;
mod tree;
mod validator;

use export::PngExporter;
use indexing::{run_indexing, IndexingOutcome, IndexingRequest};
use navigation::NavigationController;
use store::Store;
use task::{TaskEvent, TaskHandle, TaskRunner};
use tree::{IndexTree, NodeId, NodeKind, DERIVED_COLUMN, RHYTHM_COLUMN, SUBJECT_COLUMN, TIMEPOINT_COLUMN, XML_COLUMN, ZIP_COLUMN};
use validator::{stats_rows, ProgressClock, StudyInfoForm, APP_TYPES};

const CANCEL_WAIT: Duration = Duration::from_secs(3);
const PLOT_HEIGHT: f32 = 480.0;

/// Browse and validate annotated ECG study files.
#[derive(Parser, Debug)]
#[command(name = "aecgviewer", version, about)]
struct Args {
    /// Study index workbook to open at start-up
    #[arg(short = 'i', long = "indexfile")]
    indexfile: Option<PathBuf>,
    /// TOML logging configuration
    #[arg(short = 'l', long = "logconffile")]
    logconffile: Option<PathBuf>,
}

fn main() -> eframe::Result<()> {
    let args = Args::parse();
    if let Err(err) = logging::init(args.logconffile.as_deref()) {
        eprintln!("logging not configured: {err:#}");
    }
    info!("aecgviewer {} starting", env!("CARGO_PKG_VERSION"));

    let native_options = eframe::NativeOptions {
        viewport: ViewportBuilder::default().with_inner_size([1280.0, 800.0]),
        ..Default::default()
    };
    eframe::run_native(
        "aECG viewer",
        native_options,
        Box::new(move |cc| Ok(Box::new(ViewerApp::new(cc, args.indexfile)))),
    )
}

#[derive(Copy, Clone, PartialEq)]
enum GuiTab {
    StudyInfo,
    Validator,
    Waveforms,
    Xml,
    Options,
}

impl GuiTab {
    fn title(&self) -> &'static str {
        match self {
            GuiTab::StudyInfo => "Study information",
            GuiTab::Validator => "Validator",
            GuiTab::Waveforms => "Waveforms",
            GuiTab::Xml => "XML",
            GuiTab::Options => "Options",
        }
    }

    fn all() -> [GuiTab; 5] {
        [
            GuiTab::StudyInfo,
            GuiTab::Validator,
            GuiTab::Waveforms,
            GuiTab::Xml,
            GuiTab::Options,
        ]
    }
}

struct AppOptions {
    /// Save the index every N aECGs while indexing; 0 only at the end
    save_every: usize,
    parallel: bool,
    save_intervals: bool,
    aecg_dir: String,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            save_every: 0,
            parallel: true,
            save_intervals: false,
            aecg_dir: String::new(),
        }
    }
}

struct Notice {
    title: String,
    message: String,
}

struct IndexingJob {
    handle: TaskHandle<IndexingOutcome>,
    cancel: Arc<AtomicBool>,
    clock: ProgressClock,
    progress: (usize, usize),
    label: String,
    outcome: Option<IndexingOutcome>,
}

struct ViewerApp {
    nav: NavigationController,
    store: Store,
    runner: TaskRunner,
    indexing: Option<IndexingJob>,
    last_run: Option<(String, StudyStats)>,
    info_form: StudyInfoForm,
    options: AppOptions,
    active_tab: GuiTab,
    notices: Vec<Notice>,
    cwd: String,
    aecg_path: Option<PathBuf>,
}

impl ViewerApp {
    fn new(cc: &eframe::CreationContext<'_>, index_file: Option<PathBuf>) -> Self {
        let ctx = cc.egui_ctx.clone();
        let runner = TaskRunner::new(2).with_waker(Arc::new(move || ctx.request_repaint()));
        let mut app = Self {
            nav: NavigationController::new(),
            store: Store::new(),
            runner,
            indexing: None,
            last_run: None,
            info_form: StudyInfoForm::default(),
            options: AppOptions::default(),
            active_tab: GuiTab::StudyInfo,
            notices: Vec::new(),
            cwd: std::env::current_dir()
                .map(|dir| dir.display().to_string())
                .unwrap_or_default(),
            aecg_path: None,
        };
        if let Some(path) = index_file {
            app.open_index(&path);
        }
        app
    }

    fn notify(&mut self, title: &str, message: impl Into<String>) {
        self.notices.push(Notice {
            title: title.to_string(),
            message: message.into(),
        });
    }

    fn refresh_aecg_path(&mut self) {
        self.aecg_path = self
            .nav
            .index_path()
            .map(|_| self.nav.effective_dir())
            .filter(|resolved| resolved.found)
            .map(|resolved| resolved.dir);
    }

    fn open_index(&mut self, path: &Path) {
        match self.nav.load(path) {
            Ok(warnings) => {
                self.store.clear();
                self.info_form = StudyInfoForm::from_info(self.nav.info());
                if self.info_form.index_file.is_empty() {
                    self.info_form.index_file = path.display().to_string();
                }
                if !warnings.is_empty() {
                    self.notify("Study index loaded with warnings", warnings.join("\n"));
                }
            }
            Err(err) => {
                error!("{err}");
                self.notify("Could not open study index", err.to_string());
            }
        }
        self.refresh_aecg_path();
    }

    fn load_info_from(&mut self, path: &Path) {
        match load_study_info(path) {
            Ok(info) => {
                self.info_form = StudyInfoForm::from_info(&info);
                self.nav.set_info(info);
                self.refresh_aecg_path();
                info!("study information loaded from {}", path.display());
            }
            Err(err) => self.notify("Could not load study information", err.to_string()),
        }
    }

    fn select_node(&mut self, node: NodeId) {
        match self.nav.select(node) {
            Ok(selection) => {
                self.store.set_waveform(selection.document, selection.kind);
                if !matches!(self.active_tab, GuiTab::Waveforms | GuiTab::Xml) {
                    self.active_tab = GuiTab::Waveforms;
                }
            }
            Err(err) => {
                warn!("{err}");
                self.store.clear();
                self.notify("Could not load aECG", err.to_string());
            }
        }
    }

    fn save_image(&mut self) {
        self.store.prepare();
        let Some(figure) = self.store.figure().cloned() else {
            self.notify("Save image", "No waveform is displayed");
            return;
        };
        let Some(path) = FileDialog::new()
            .add_filter("PNG image", &["png"])
            .set_file_name("aecg.png")
            .save_file()
        else {
            return;
        };
        let mut exporter = PngExporter::for_zoom(path, self.store.zoom());
        if let Err(err) = exporter.draw(&figure) {
            error!("image export failed: {err:#}");
            self.notify("Could not save image", format!("{err:#}"));
        }
    }

    fn start_indexing(&mut self) {
        if self.indexing.is_some() {
            return;
        }
        let info = match self.info_form.to_info() {
            Ok(info) => info,
            Err(err) => return self.notify("Invalid study information", format!("{err:#}")),
        };
        let (study_dir, index_file) = match self.info_form.indexing_paths() {
            Ok(paths) => paths,
            Err(err) => return self.notify("Cannot generate study index", format!("{err:#}")),
        };
        let threads = if self.options.parallel {
            std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
        } else {
            1
        };
        let cancel = Arc::new(AtomicBool::new(false));
        let clock = ProgressClock::start();
        let request = IndexingRequest {
            study_dir,
            index_file,
            options: IndexerOptions {
                primary_lead: info.primary_lead_code(),
                checkpoint_every: self.options.save_every,
                parallel: self.options.parallel,
                save_intervals: self.options.save_intervals,
            },
            info,
            threads,
            cancel: cancel.clone(),
            clock,
        };
        info!("indexing {} on {threads} threads", request.study_dir.display());
        let handle = self.runner.submit(move |progress| run_indexing(request, progress));
        self.indexing = Some(IndexingJob {
            handle,
            cancel,
            clock,
            progress: (0, 0),
            label: "Scanning study directory".into(),
            outcome: None,
        });
    }

    fn cancel_indexing(&mut self) {
        if let Some(job) = self.indexing.as_mut() {
            job.cancel.store(true, Ordering::Relaxed);
            if !job.handle.wait_finished(CANCEL_WAIT) {
                warn!("indexing still running {}s after cancel", CANCEL_WAIT.as_secs());
            }
        }
    }

    fn poll_indexing(&mut self) {
        let Some(job) = self.indexing.as_mut() else {
            return;
        };
        let mut failure = None;
        for event in job.handle.poll() {
            match event {
                TaskEvent::Progress { current, total } => {
                    job.progress = (current, total);
                    job.label = job.clock.label(current, total, Local::now());
                }
                TaskEvent::Result(outcome) => {
                    job.label = job.clock.completed_label(job.progress.0, job.progress.1, Local::now());
                    job.outcome = Some(outcome);
                }
                TaskEvent::Error(err) => {
                    error!("indexing failed: {}", err.trace);
                    failure = Some(err);
                }
                TaskEvent::Finished => {}
            }
        }
        if let Some(err) = failure {
            self.notify("Study indexing failed", err.to_string());
        }
        if !self.indexing.as_ref().is_some_and(|job| job.handle.is_finished()) {
            return;
        }
        if let Some(job) = self.indexing.take() {
            if let Some(outcome) = job.outcome {
                let mut label = job.label;
                if outcome.intervals > 0 {
                    label.push_str(&format!(" | {} beat intervals saved", outcome.intervals));
                }
                if outcome.cancelled {
                    label.push_str(" (cancelled)");
                }
                self.last_run = Some((label, outcome.stats.clone()));
                self.open_index(&outcome.index_file);
            } else {
                self.last_run = None;
            }
        }
    }

    fn show_menu(&mut self, ctx: &egui::Context) {
        egui::TopBottomPanel::top("menu").show(ctx, |ui| {
            egui::menu::bar(ui, |ui| {
                ui.menu_button("File", |ui| {
                    if ui.button("Open study index…").clicked() {
                        ui.close_menu();
                        if let Some(path) = FileDialog::new().add_filter("Study index", &["xlsx"]).pick_file() {
                            self.open_index(&path);
                        }
                    }
                    if ui.button("Load study information…").clicked() {
                        ui.close_menu();
                        if let Some(path) = FileDialog::new().add_filter("Study index", &["xlsx"]).pick_file() {
                            self.load_info_from(&path);
                        }
                    }
                    if ui.button("Save image…").clicked() {
                        ui.close_menu();
                        self.save_image();
                    }
                    ui.separator();
                    if ui.button("Exit").clicked() {
                        ctx.send_viewport_cmd(egui::ViewportCommand::Close);
                    }
                });
            });
            ui.horizontal(|ui| {
                for tab in GuiTab::all() {
                    if ui.selectable_label(self.active_tab == tab, tab.title()).clicked() {
                        self.active_tab = tab;
                    }
                }
            });
        });
    }

    fn show_tree(&mut self, ctx: &egui::Context) {
        let mut clicked = None;
        egui::SidePanel::left("index_tree")
            .resizable(true)
            .default_width(300.0)
            .show(ctx, |ui| {
                ui.heading("Study index");
                let tree = self.nav.tree();
                if tree.is_empty() {
                    ui.label("Open a study index to browse its aECGs.");
                    return;
                }
                egui::ScrollArea::vertical().show(ui, |ui| {
                    for &subject in tree.children(tree.root()) {
                        tree_node_ui(ui, tree, subject, self.nav.selected(), &mut clicked);
                    }
                });
            });
        if let Some(node) = clicked {
            self.select_node(node);
        }
    }

    fn show_study_info_tab(&mut self, ui: &mut egui::Ui) {
        ui.heading("Study information");
        if self.nav.index_path().is_none() {
            ui.label("No study index loaded.");
            return;
        }
        study_info_grid(ui, self.nav.info());
        ui.separator();
        ui.heading("Found in aECG files");
        match self.nav.stats() {
            Some(stats) => stats_grid(ui, "loaded_stats", stats),
            None => {
                ui.label("The study index has no statistics.");
            }
        }
    }

    fn show_validator_tab(&mut self, ui: &mut egui::Ui) {
        let running = self.indexing.is_some();
        egui::ScrollArea::vertical().show(ui, |ui| {
            ui.heading("Study information");
            ui.add_enabled_ui(!running, |ui| study_info_form(ui, &mut self.info_form));

            ui.separator();
            ui.horizontal(|ui| {
                if ui
                    .add_enabled(!running, egui::Button::new("Generate/update study index"))
                    .clicked()
                {
                    self.start_indexing();
                }
                if ui.add_enabled(running, egui::Button::new("Cancel")).clicked() {
                    self.cancel_indexing();
                }
            });
            if let Some(job) = &self.indexing {
                let (current, total) = job.progress;
                let fraction = if total > 0 { current as f32 / total as f32 } else { 0.0 };
                ui.add(egui::ProgressBar::new(fraction).text(job.label.as_str()));
            } else if let Some((label, stats)) = &self.last_run {
                ui.label(label.as_str());
                ui.separator();
                ui.heading("Found in aECG files");
                stats_grid(ui, "run_stats", stats);
            }
        });
    }

    fn show_waveforms_tab(&mut self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            let mut layout = self.store.layout();
            egui::ComboBox::from_label("Layout")
                .selected_text(layout.label())
                .show_ui(ui, |ui| {
                    for option in PlotLayout::ALL {
                        ui.selectable_value(&mut layout, option, option.label());
                    }
                });
            self.store.set_layout(layout);
            ui.separator();
            if ui.button("Zoom in").clicked() {
                self.store.zoom_in();
            }
            if ui.button("Zoom out").clicked() {
                self.store.zoom_out();
            }
            if ui.button("Reset zoom").clicked() {
                self.store.reset_zoom();
            }
            ui.label(format!("{:.0} %", self.store.zoom() * 100.0));
        });
        if let Some(summary) = self.store.summary() {
            ui.label(summary);
        }
        ui.separator();

        let Some(figure) = self.store.figure() else {
            ui.centered_and_justified(|ui| {
                ui.label("Select a waveform in the study index.");
            });
            return;
        };
        let zoom = self.store.zoom();
        let superimposed = self.store.layout() == PlotLayout::Superimposed;
        egui::ScrollArea::both().show(ui, |ui| {
            let width = ui.available_width().max(200.0) * zoom;
            let mut plot = Plot::new("waveform_plot")
                .width(width)
                .height(PLOT_HEIGHT * zoom)
                .allow_scroll(false)
                .x_axis_label("Time (ms)")
                .y_axis_label("mV");
            if superimposed {
                plot = plot.legend(Legend::default());
            }
            plot.show(ui, |plot_ui| plot_figure(plot_ui, figure));
        });
    }

    fn show_xml_tab(&mut self, ui: &mut egui::Ui) {
        if self.store.document().is_none() {
            ui.label("Select a waveform in the study index.");
            return;
        }
        egui::ScrollArea::both().show(ui, |ui| {
            ui.add(egui::Label::new(egui::RichText::new(self.store.xml()).monospace()).extend());
        });
    }

    fn show_options_tab(&mut self, ui: &mut egui::Ui) {
        ui.heading("Indexing");
        ui.horizontal(|ui| {
            ui.label("Save index every");
            ui.add(
                egui::DragValue::new(&mut self.options.save_every)
                    .range(0..=50000)
                    .speed(100)
                    .suffix(" aECGs"),
            );
        });
        ui.checkbox(&mut self.options.parallel, "Parallel processing");
        ui.checkbox(&mut self.options.save_intervals, "Save individual beat intervals");
        ui.separator();
        ui.heading("aECG files");
        ui.horizontal(|ui| {
            ui.label("aECGs directory");
            let edited = ui.text_edit_singleline(&mut self.options.aecg_dir).lost_focus();
            let browsed = ui.button("Browse…").clicked()
                && match FileDialog::new().pick_folder() {
                    Some(dir) => {
                        self.options.aecg_dir = dir.display().to_string();
                        true
                    }
                    None => false,
                };
            if edited || browsed {
                let dir = self.options.aecg_dir.trim();
                self.nav.set_user_dir(Some(PathBuf::from(dir)));
                self.refresh_aecg_path();
            }
        });
        ui.label("Leave empty to use the study directory of the loaded index.");
    }

    fn show_status(&mut self, ctx: &egui::Context) {
        egui::TopBottomPanel::bottom("status").show(ctx, |ui| {
            ui.horizontal(|ui| {
                ui.label(format!("cwd: {}", self.cwd));
                ui.separator();
                match self.nav.index_path() {
                    Some(path) => ui.label(format!("project: {}", path.display())),
                    None => ui.label("project: None"),
                };
                ui.separator();
                match &self.aecg_path {
                    Some(path) => ui.label(format!("aECGs path: {}", path.display())),
                    None => ui.label("aECGs path: N/A"),
                };
            });
        });
    }

    fn show_notice(&mut self, ctx: &egui::Context) {
        let Some(notice) = self.notices.first() else {
            return;
        };
        let mut dismissed = false;
        egui::Window::new(notice.title.as_str())
            .collapsible(false)
            .resizable(false)
            .anchor(egui::Align2::CENTER_CENTER, [0.0, 0.0])
            .show(ctx, |ui| {
                ui.label(notice.message.as_str());
                if ui.button("OK").clicked() {
                    dismissed = true;
                }
            });
        if dismissed {
            self.notices.remove(0);
        }
    }
}

impl Drop for ViewerApp {
    fn drop(&mut self) {
        self.cancel_indexing();
    }
}

impl eframe::App for ViewerApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.poll_indexing();
        self.store.prepare();

        self.show_menu(ctx);
        self.show_status(ctx);
        self.show_tree(ctx);
        egui::CentralPanel::default().show(ctx, |ui| match self.active_tab {
            GuiTab::StudyInfo => self.show_study_info_tab(ui),
            GuiTab::Validator => self.show_validator_tab(ui),
            GuiTab::Waveforms => self.show_waveforms_tab(ui),
            GuiTab::Xml => self.show_xml_tab(ui),
            GuiTab::Options => self.show_options_tab(ui),
        });
        self.show_notice(ctx);
    }
}

fn node_label(tree: &IndexTree, node: NodeId) -> String {
    let value = |column| tree.value_at(node, column).unwrap_or_default();
    match tree.kind(node) {
        Some(NodeKind::Subject) => value(SUBJECT_COLUMN).to_string(),
        Some(NodeKind::Timepoint) => value(TIMEPOINT_COLUMN).to_string(),
        Some(NodeKind::Rhythm) => format!("Rhythm {}", value(RHYTHM_COLUMN)),
        Some(NodeKind::Derived) => format!("Derived {}", value(DERIVED_COLUMN)),
        _ => String::new(),
    }
}

fn tree_node_ui(ui: &mut egui::Ui, tree: &IndexTree, node: NodeId, selected: Option<NodeId>, clicked: &mut Option<NodeId>) {
    let label = node_label(tree, node);
    let is_waveform = matches!(tree.kind(node), Some(NodeKind::Rhythm | NodeKind::Derived));
    let header = |ui: &mut egui::Ui, clicked: &mut Option<NodeId>| {
        if is_waveform {
            let zip = tree.value_at(node, ZIP_COLUMN).unwrap_or_default();
            let xml = tree.value_at(node, XML_COLUMN).unwrap_or_default();
            let file = if zip.is_empty() { xml.to_string() } else { format!("{zip} : {xml}") };
            if ui.selectable_label(selected == Some(node), label.as_str()).on_hover_text(file).clicked() {
                *clicked = Some(node);
            }
        } else {
            ui.label(label.as_str());
        }
    };
    let children = tree.children(node);
    if children.is_empty() {
        ui.horizontal(|ui| {
            ui.add_space(ui.spacing().indent);
            header(ui, clicked);
        });
        return;
    }
    let id = ui.make_persistent_id(("tree_node", node));
    CollapsingState::load_with_default_open(ui.ctx(), id, false)
        .show_header(ui, |ui| header(ui, clicked))
        .body(|ui| {
            for &child in children {
                tree_node_ui(ui, tree, child, selected, clicked);
            }
        });
}

fn optional(value: Option<u32>) -> String {
    value.map(|n| n.to_string()).unwrap_or_default()
}

fn study_info_grid(ui: &mut egui::Ui, info: &StudyInfo) {
    let rows = [
        ("Application type", info.app_type.clone()),
        ("Application number", info.formatted_app_num()),
        ("Study ID", info.study_id.clone()),
        ("Sponsor", info.sponsor.clone()),
        ("Description", info.description.clone()),
        ("Annotation method", info.annotation_method.label().to_string()),
        ("Primary lead", lead_short_name(&info.primary_lead_code()).to_string()),
        ("Beats annotated per aECG", optional(info.annotation_beats)),
        ("Number of subjects", optional(info.num_subjects)),
        ("aECGs per subject", optional(info.ecgs_per_subject)),
        ("Total aECGs", optional(info.total_ecgs)),
        ("Study directory", info.study_dir.clone()),
        ("Index file", info.index_file.clone()),
        ("Indexing started", info.date.clone()),
        ("Indexing ended", info.end_date.clone()),
        ("Indexer version", info.version.clone()),
    ];
    egui::Grid::new("study_info").striped(true).num_columns(2).show(ui, |ui| {
        for (label, value) in rows {
            ui.label(label);
            ui.label(value);
            ui.end_row();
        }
    });
}

fn stats_grid(ui: &mut egui::Ui, id: &str, stats: &StudyStats) {
    egui::Grid::new(id).striped(true).num_columns(3).show(ui, |ui| {
        for row in stats_rows(stats) {
            ui.label(row.label);
            ui.label(row.value);
            ui.label(row.percent);
            ui.end_row();
        }
    });
}

fn study_info_form(ui: &mut egui::Ui, form: &mut StudyInfoForm) {
    egui::Grid::new("study_info_form").num_columns(2).show(ui, |ui| {
        ui.label("Application type");
        egui::ComboBox::from_id_salt("app_type")
            .selected_text(form.app_type.as_str())
            .show_ui(ui, |ui| {
                for app_type in APP_TYPES {
                    ui.selectable_value(&mut form.app_type, app_type.to_string(), app_type);
                }
            });
        ui.end_row();

        let text_rows: [(&str, &mut String); 4] = [
            ("Application number", &mut form.app_num),
            ("Study ID", &mut form.study_id),
            ("Sponsor", &mut form.sponsor),
            ("Description", &mut form.description),
        ];
        for (label, value) in text_rows {
            ui.label(label);
            ui.text_edit_singleline(value);
            ui.end_row();
        }

        ui.label("Annotation method");
        egui::ComboBox::from_id_salt("annotation_method")
            .selected_text(form.annotation_method.label())
            .show_ui(ui, |ui| {
                for method in AnnotationMethod::ALL {
                    ui.selectable_value(&mut form.annotation_method, method, method.label());
                }
            });
        ui.end_row();

        ui.label("Primary lead");
        egui::ComboBox::from_id_salt("primary_lead")
            .selected_text(form.annotation_lead.as_str())
            .show_ui(ui, |ui| {
                for code in STANDARD_LEADS {
                    let name = lead_short_name(code);
                    ui.selectable_value(&mut form.annotation_lead, name.to_string(), name);
                }
            });
        ui.end_row();

        let number_rows: [(&str, &mut String); 4] = [
            ("Beats annotated per aECG", &mut form.annotation_beats),
            ("Number of subjects", &mut form.num_subjects),
            ("aECGs per subject", &mut form.ecgs_per_subject),
            ("Total aECGs", &mut form.total_ecgs),
        ];
        for (label, value) in number_rows {
            ui.label(label);
            ui.add(egui::TextEdit::singleline(value).desired_width(80.0));
            ui.end_row();
        }

        ui.label("Study directory");
        ui.horizontal(|ui| {
            ui.text_edit_singleline(&mut form.study_dir);
            if ui.button("Browse…").clicked() {
                if let Some(dir) = FileDialog::new().pick_folder() {
                    form.study_dir = dir.display().to_string();
                    form.suggest_index_file(&dir);
                }
            }
        });
        ui.end_row();

        ui.label("Index file");
        ui.horizontal(|ui| {
            ui.text_edit_singleline(&mut form.index_file);
            if ui.button("Browse…").clicked() {
                if let Some(path) = FileDialog::new()
                    .add_filter("Study index", &["xlsx"])
                    .set_file_name("study_index.xlsx")
                    .save_file()
                {
                    form.index_file = path.display().to_string();
                }
            }
        });
        ui.end_row();
    });
}

fn plot_figure(plot_ui: &mut egui_plot::PlotUi, figure: &Figure) {
    for series in &figure.series {
        match series {
            Series::Span(span) => {
                let (r, g, b) = span.color.rgb();
                let fill = egui::Color32::from_rgba_unmultiplied(r, g, b, 60);
                plot_ui.polygon(
                    Polygon::new(vec![
                        [span.x[0], span.y[0]],
                        [span.x[1], span.y[0]],
                        [span.x[1], span.y[1]],
                        [span.x[0], span.y[1]],
                    ])
                    .fill_color(fill)
                    .stroke(egui::Stroke::NONE)
                    .name(span.name.clone()),
                );
            }
            Series::Line(line) => {
                plot_ui.line(
                    Line::new(line.points.clone())
                        .stroke(stroke_from_style(&line.style))
                        .name(line.name.clone()),
                );
            }
            Series::Text(text) => {
                plot_ui.text(
                    PlotText::new(PlotPoint::new(text.at[0], text.at[1]), text.text.clone())
                        .color(color32(text.color))
                        .anchor(egui::Align2::LEFT_BOTTOM),
                );
            }
        }
    }
}

fn stroke_from_style(style: &Style) -> egui::Stroke {
    egui::Stroke::new(style.width, color32(style.color))
}

fn color32(color: Color) -> egui::Color32 {
    let (r, g, b) = color.rgb();
    egui::Color32::from_rgb(r, g, b)
}
