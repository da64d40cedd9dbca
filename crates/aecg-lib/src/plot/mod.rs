//! Backend-neutral ECG figures. The viewer draws them with egui and the PNG
//! export with plotters.

use crate::signal::{lead_short_name, Annotation, Waveform, STANDARD_LEADS};
use serde::{Deserialize, Serialize};

/// Vertical distance between stacked leads, in mV.
pub const V_OFFSET: f64 = 1.5;
/// Width of one column of the 3x4 layout, in ms.
pub const COLUMN_MS: f64 = 2500.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlotLayout {
    #[default]
    Stacked,
    ThreeByFourRhythm,
    Superimposed,
}

impl PlotLayout {
    pub const ALL: [PlotLayout; 3] = [
        PlotLayout::Stacked,
        PlotLayout::ThreeByFourRhythm,
        PlotLayout::Superimposed,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            PlotLayout::Stacked => "12-lead stacked",
            PlotLayout::ThreeByFourRhythm => "3x4 + lead II rhythm",
            PlotLayout::Superimposed => "Superimposed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Axis {
    pub label: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Style {
    pub width: f32,
    pub color: Color,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color(pub u32);

impl Color {
    pub fn rgb(&self) -> (u8, u8, u8) {
        (
            ((self.0 >> 16) & 0xFF) as u8,
            ((self.0 >> 8) & 0xFF) as u8,
            (self.0 & 0xFF) as u8,
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineSeries {
    pub name: String,
    pub points: Vec<[f64; 2]>,
    pub style: Style,
}

/// Shaded time interval, e.g. an annotated wave.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpanSeries {
    pub name: String,
    pub x: [f64; 2],
    pub y: [f64; 2],
    pub color: Color,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextSeries {
    pub text: String,
    pub at: [f64; 2],
    pub color: Color,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Series {
    Line(LineSeries),
    Span(SpanSeries),
    Text(TextSeries),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Figure {
    pub title: Option<String>,
    pub x: Axis,
    pub y: Axis,
    pub series: Vec<Series>,
}

impl Figure {
    pub fn new(title: impl Into<Option<String>>) -> Self {
        Self {
            title: title.into(),
            x: Axis { label: None },
            y: Axis { label: None },
            series: Vec::new(),
        }
    }

    pub fn add_series(&mut self, series: Series) {
        self.series.push(series);
    }

    pub fn lines(&self) -> impl Iterator<Item = &LineSeries> {
        self.series.iter().filter_map(|s| match s {
            Series::Line(line) => Some(line),
            _ => None,
        })
    }

    pub fn spans(&self) -> impl Iterator<Item = &SpanSeries> {
        self.series.iter().filter_map(|s| match s {
            Series::Span(span) => Some(span),
            _ => None,
        })
    }

    /// Data extent as ([x_min, x_max], [y_min, y_max]); unit box when empty.
    pub fn bounds(&self) -> ([f64; 2], [f64; 2]) {
        let mut x = [f64::INFINITY, f64::NEG_INFINITY];
        let mut y = [f64::INFINITY, f64::NEG_INFINITY];
        let mut include = |px: f64, py: f64| {
            if px.is_finite() && py.is_finite() {
                x = [x[0].min(px), x[1].max(px)];
                y = [y[0].min(py), y[1].max(py)];
            }
        };
        for series in &self.series {
            match series {
                Series::Line(line) => line.points.iter().for_each(|p| include(p[0], p[1])),
                Series::Span(span) => {
                    include(span.x[0], span.y[0]);
                    include(span.x[1], span.y[1]);
                }
                Series::Text(text) => include(text.at[0], text.at[1]),
            }
        }
        if x[0] > x[1] {
            return ([0.0, 1.0], [0.0, 1.0]);
        }
        if x[0] == x[1] {
            x[1] += 1.0;
        }
        if y[0] == y[1] {
            y[1] += 1.0;
        }
        (x, y)
    }
}

pub trait PlotBackend {
    fn draw(&mut self, fig: &Figure) -> anyhow::Result<()>;
}

pub fn decimate_points(points: &[[f64; 2]], max_points: usize) -> Vec<[f64; 2]> {
    if max_points == 0 || points.len() <= max_points {
        return points.to_vec();
    }
    let bucket_size = points.len() as f64 / max_points as f64;
    let mut result = Vec::with_capacity(max_points);
    for i in 0..max_points {
        let start = (i as f64 * bucket_size).floor() as usize;
        if start >= points.len() {
            break;
        }
        result.push(points[start]);
    }
    result
}

const LEAD_COLOR: Color = Color(0x000000);
const LABEL_COLOR: Color = Color(0x1F4E79);
const SUPERIMPOSED_COLORS: [u32; 6] = [0x1F77B4, 0xFF7F0E, 0x2CA02C, 0xD62728, 0x9467BD, 0x8C564B];

/// Colour used to shade an annotation, by wave.
pub fn annotation_color(ann: &Annotation) -> Color {
    if ann.code.ends_with("PWAVE") {
        Color(0x2CA02C)
    } else if ann.is_qrs() {
        Color(0xD62728)
    } else if ann.is_twave() {
        Color(0x1F77B4)
    } else {
        Color(0x7F7F7F)
    }
}

/// Leads in standard 12-lead order followed by any others in file order.
fn ordered_leads(wf: &Waveform) -> Vec<usize> {
    let mut order: Vec<usize> = STANDARD_LEADS
        .iter()
        .filter_map(|code| wf.leads.iter().position(|lead| lead.code == *code))
        .collect();
    for idx in 0..wf.leads.len() {
        if !order.contains(&idx) {
            order.push(idx);
        }
    }
    order
}

/// Samples of one lead as (ms, mV + offset), restricted to `window` when given.
fn lead_points(wf: &Waveform, lead: usize, offset: f64, window: Option<[f64; 2]>) -> Vec<[f64; 2]> {
    wf.leads[lead]
        .samples
        .iter()
        .enumerate()
        .map(|(i, v)| [wf.time_ms(i), v + offset])
        .filter(|p| window.map_or(true, |w| p[0] >= w[0] && p[0] < w[1]))
        .filter(|p| p[1].is_finite())
        .collect()
}

fn line(name: &str, points: Vec<[f64; 2]>, color: Color, max_points: usize) -> Series {
    Series::Line(LineSeries {
        name: name.to_string(),
        points: decimate_points(&points, max_points),
        style: Style { width: 1.0, color },
    })
}

fn label(text: &str, at: [f64; 2]) -> Series {
    Series::Text(TextSeries {
        text: text.to_string(),
        at,
        color: LABEL_COLOR,
    })
}

/// A row of the figure showing one lead over a time window.
struct Track {
    lead_code: String,
    offset: f64,
    window: [f64; 2],
}

/// Build the figure for a waveform and its annotations in the given layout.
pub fn figure_from_waveform(
    wf: &Waveform,
    annotations: &[Annotation],
    layout: PlotLayout,
    max_points: usize,
) -> Figure {
    let mut fig = Figure::new(Some(wf.kind.to_string()));
    fig.x.label = Some("Time (ms)".into());
    fig.y.label = Some("mV".into());
    let order = ordered_leads(wf);
    let full = [0.0, wf.duration_ms().max(wf.sample_interval_ms)];
    let mut tracks = Vec::new();

    match layout {
        PlotLayout::Stacked => {
            for (row, &idx) in order.iter().enumerate() {
                let offset = -(row as f64) * V_OFFSET;
                let lead = &wf.leads[idx];
                fig.add_series(line(lead.name(), lead_points(wf, idx, offset, None), LEAD_COLOR, max_points));
                fig.add_series(label(lead.name(), [0.0, offset + V_OFFSET / 3.0]));
                tracks.push(Track {
                    lead_code: lead.code.clone(),
                    offset,
                    window: full,
                });
            }
        }
        PlotLayout::ThreeByFourRhythm => {
            let row_height = 2.0 * V_OFFSET;
            for (slot, &idx) in order.iter().take(12).enumerate() {
                let (column, row) = (slot / 3, slot % 3);
                let offset = -(row as f64) * row_height;
                let window = [column as f64 * COLUMN_MS, (column + 1) as f64 * COLUMN_MS];
                let lead = &wf.leads[idx];
                fig.add_series(line(
                    lead.name(),
                    lead_points(wf, idx, offset, Some(window)),
                    LEAD_COLOR,
                    max_points,
                ));
                fig.add_series(label(lead.name(), [window[0], offset + V_OFFSET / 2.0]));
                tracks.push(Track {
                    lead_code: lead.code.clone(),
                    offset,
                    window,
                });
            }
            if let Some(idx) = wf.leads.iter().position(|l| l.name() == "II") {
                let offset = -3.0 * row_height;
                let lead = &wf.leads[idx];
                fig.add_series(line("II rhythm", lead_points(wf, idx, offset, None), LEAD_COLOR, max_points));
                fig.add_series(label("II", [0.0, offset + V_OFFSET / 2.0]));
                tracks.push(Track {
                    lead_code: lead.code.clone(),
                    offset,
                    window: full,
                });
            }
        }
        PlotLayout::Superimposed => {
            for (n, &idx) in order.iter().enumerate() {
                let lead = &wf.leads[idx];
                let color = Color(SUPERIMPOSED_COLORS[n % SUPERIMPOSED_COLORS.len()]);
                fig.add_series(line(lead.name(), lead_points(wf, idx, 0.0, None), color, max_points));
                tracks.push(Track {
                    lead_code: lead.code.clone(),
                    offset: 0.0,
                    window: full,
                });
            }
        }
    }

    let half = match layout {
        PlotLayout::ThreeByFourRhythm => V_OFFSET,
        _ => V_OFFSET / 2.0,
    };
    let (_, y_extent) = fig.bounds();
    for ann in annotations {
        let (Some(start), Some(end)) = (ann.start_ms, ann.end_ms) else {
            continue;
        };
        match ann.lead.as_deref() {
            Some(code) => {
                for track in tracks.iter().filter(|t| lead_short_name(&t.lead_code) == lead_short_name(code)) {
                    let x = [start.max(track.window[0]), end.min(track.window[1])];
                    if x[0] >= x[1] {
                        continue;
                    }
                    fig.add_series(Series::Span(SpanSeries {
                        name: ann.name().to_string(),
                        x,
                        y: [track.offset - half, track.offset + half],
                        color: annotation_color(ann),
                    }));
                }
            }
            None if !tracks.is_empty() => fig.add_series(Series::Span(SpanSeries {
                name: ann.name().to_string(),
                x: [start, end],
                y: y_extent,
                color: annotation_color(ann),
            })),
            None => {}
        }
    }
    fig
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::{Lead, WaveformType};

    fn waveform(codes: &[&str], len: usize) -> Waveform {
        Waveform {
            kind: WaveformType::Rhythm,
            effective_time: String::new(),
            sample_interval_ms: 2.0,
            leads: codes
                .iter()
                .map(|code| Lead {
                    code: code.to_string(),
                    samples: (0..len).map(|i| (i % 10) as f64 * 0.1).collect(),
                })
                .collect(),
        }
    }

    fn ann(code: &str, lead: Option<&str>, start: f64, end: f64) -> Annotation {
        Annotation {
            code: code.into(),
            lead: lead.map(Into::into),
            start_ms: Some(start),
            end_ms: Some(end),
        }
    }

    #[test]
    fn decimation_keeps_short_series() {
        let points: Vec<[f64; 2]> = (0..10).map(|i| [i as f64, 0.0]).collect();
        assert_eq!(decimate_points(&points, 20).len(), 10);
        assert_eq!(decimate_points(&points, 5).len(), 5);
        assert_eq!(decimate_points(&points, 0).len(), 10);
    }

    #[test]
    fn stacked_orders_standard_leads_with_offsets() {
        let wf = waveform(&["MDC_ECG_LEAD_II", "MDC_ECG_LEAD_X", "MDC_ECG_LEAD_I"], 20);
        let fig = figure_from_waveform(&wf, &[], PlotLayout::Stacked, 1000);
        let lines: Vec<&LineSeries> = fig.lines().collect();
        let names: Vec<&str> = lines.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, vec!["I", "II", "X"]);
        assert!((lines[1].points[0][1] + V_OFFSET).abs() < 1e-12);
        assert!((lines[2].points[0][1] + 2.0 * V_OFFSET).abs() < 1e-12);
    }

    #[test]
    fn three_by_four_adds_rhythm_strip() {
        let codes: Vec<&str> = STANDARD_LEADS.to_vec();
        // 5000 samples at 2 ms = 10 s, one 2.5 s window per column
        let wf = waveform(&codes, 5000);
        let fig = figure_from_waveform(&wf, &[], PlotLayout::ThreeByFourRhythm, 0);
        let lines: Vec<&LineSeries> = fig.lines().collect();
        assert_eq!(lines.len(), 13);
        assert_eq!(lines[0].points.len(), 1250);
        assert!(lines[3].points.iter().all(|p| p[0] >= COLUMN_MS && p[0] < 2.0 * COLUMN_MS));
        assert_eq!(lines[12].name, "II rhythm");
        assert_eq!(lines[12].points.len(), 5000);
    }

    #[test]
    fn superimposed_shares_baseline_and_varies_colour() {
        let wf = waveform(&["MDC_ECG_LEAD_I", "MDC_ECG_LEAD_II"], 10);
        let fig = figure_from_waveform(&wf, &[], PlotLayout::Superimposed, 1000);
        let lines: Vec<&LineSeries> = fig.lines().collect();
        assert_eq!(lines[0].points[0][1], lines[1].points[0][1]);
        assert_ne!(lines[0].style.color, lines[1].style.color);
    }

    #[test]
    fn annotations_shade_their_lead() {
        let wf = waveform(&["MDC_ECG_LEAD_I", "MDC_ECG_LEAD_II"], 50);
        let anns = vec![
            ann("MDC_ECG_WAVC_QRSWAVE", Some("MDC_ECG_LEAD_II"), 4.0, 10.0),
            ann("MDC_ECG_WAVC_TWAVE", None, 12.0, 16.0),
        ];
        let fig = figure_from_waveform(&wf, &anns, PlotLayout::Stacked, 1000);
        let spans: Vec<&SpanSeries> = fig.spans().collect();
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].name, "QRSWAVE");
        assert_eq!(spans[0].y, [-V_OFFSET - V_OFFSET / 2.0, -V_OFFSET + V_OFFSET / 2.0]);
        assert_eq!(spans[0].color, Color(0xD62728));
        assert_eq!(spans[1].x, [12.0, 16.0]);
    }

    #[test]
    fn empty_figure_has_unit_bounds() {
        let fig = Figure::new(None::<String>);
        assert_eq!(fig.bounds(), ([0.0, 1.0], [0.0, 1.0]));
    }
}
