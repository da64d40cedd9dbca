use aecg_lib::io::aecg::AecgDocument;
use aecg_lib::plot::{figure_from_waveform, Figure, PlotLayout};
use aecg_lib::signal::Annotation;
use aecg_lib::WaveformType;

const MAX_WAVEFORM_POINTS: usize = 4096;

pub const MIN_ZOOM: f32 = 0.2;
pub const MAX_ZOOM: f32 = 10.0;
pub const ZOOM_STEP: f32 = 0.1;

#[derive(Default)]
struct DirtyFlags {
    figure: bool,
}

#[derive(Default)]
struct Snapshot {
    document: Option<AecgDocument>,
    kind: WaveformType,
    figure: Option<Figure>,
}

/// Waveform shown in the Waveforms and XML tabs, with lazily built figure.
pub struct Store {
    snapshot: Snapshot,
    dirty: DirtyFlags,
    layout: PlotLayout,
    zoom: f32,
}

impl Default for Store {
    fn default() -> Self {
        Self {
            snapshot: Snapshot::default(),
            dirty: DirtyFlags::default(),
            layout: PlotLayout::default(),
            zoom: 1.0,
        }
    }
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_waveform(&mut self, document: AecgDocument, kind: WaveformType) {
        self.snapshot.document = Some(document);
        self.snapshot.kind = kind;
        self.snapshot.figure = None;
        self.dirty.figure = true;
    }

    pub fn clear(&mut self) {
        self.snapshot = Snapshot::default();
        self.dirty.figure = false;
    }

    pub fn set_layout(&mut self, layout: PlotLayout) {
        if self.layout != layout {
            self.layout = layout;
            self.dirty.figure = true;
        }
    }

    pub fn layout(&self) -> PlotLayout {
        self.layout
    }

    pub fn zoom(&self) -> f32 {
        self.zoom
    }

    pub fn zoom_in(&mut self) {
        self.set_zoom(self.zoom + ZOOM_STEP);
    }

    pub fn zoom_out(&mut self) {
        self.set_zoom(self.zoom - ZOOM_STEP);
    }

    pub fn reset_zoom(&mut self) {
        self.zoom = 1.0;
    }

    fn set_zoom(&mut self, zoom: f32) {
        // keep one decimal so repeated steps land on round values
        self.zoom = ((zoom * 10.0).round() / 10.0).clamp(MIN_ZOOM, MAX_ZOOM);
    }

    /// Rebuild derived state marked dirty since the last frame.
    pub fn prepare(&mut self) {
        if !self.dirty.figure {
            return;
        }
        let kind = self.snapshot.kind;
        self.snapshot.figure = self.snapshot.document.as_ref().and_then(|doc| {
            doc.waveform(kind).map(|wf| {
                figure_from_waveform(wf, doc.annotations(kind), self.layout, MAX_WAVEFORM_POINTS)
            })
        });
        self.dirty.figure = false;
    }

    pub fn document(&self) -> Option<&AecgDocument> {
        self.snapshot.document.as_ref()
    }

    pub fn kind(&self) -> WaveformType {
        self.snapshot.kind
    }

    pub fn figure(&self) -> Option<&Figure> {
        self.snapshot.figure.as_ref()
    }

    pub fn annotations(&self) -> &[Annotation] {
        self.snapshot
            .document
            .as_ref()
            .map(|doc| doc.annotations(self.snapshot.kind))
            .unwrap_or(&[])
    }

    pub fn xml(&self) -> &str {
        self.snapshot
            .document
            .as_ref()
            .map(|doc| doc.xml.as_str())
            .unwrap_or_default()
    }

    /// One-line description of the displayed waveform.
    pub fn summary(&self) -> Option<String> {
        let doc = self.snapshot.document.as_ref()?;
        let wf = doc.waveform(self.snapshot.kind)?;
        Some(format!(
            "{} | {} | {} | {} leads @ {:.0} Hz | {:.0} ms | {} annotations",
            doc.subject_id,
            doc.timepoint,
            self.snapshot.kind,
            wf.leads.len(),
            wf.fs(),
            wf.duration_ms(),
            self.annotations().len()
        ))
    }
}
