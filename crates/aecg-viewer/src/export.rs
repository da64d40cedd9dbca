//! PNG export of the displayed waveform figure.

use aecg_lib::plot::{Color as FigureColor, Figure, PlotBackend, Series};
use anyhow::Result;
use plotters::prelude::*;
use std::ops::Range;
use std::path::{Path, PathBuf};

const BASE_SIZE: (u32, u32) = (1600, 1000);

pub struct PngExporter {
    path: PathBuf,
    size: (u32, u32),
}

impl PngExporter {
    pub fn new(path: impl Into<PathBuf>, size: (u32, u32)) -> Self {
        Self {
            path: png_path(&path.into()),
            size,
        }
    }

    /// Exporter whose image grows with the display zoom.
    pub fn for_zoom(path: impl Into<PathBuf>, zoom: f32) -> Self {
        Self::new(path, image_size(zoom))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> (u32, u32) {
        self.size
    }
}

impl PlotBackend for PngExporter {
    fn draw(&mut self, fig: &Figure) -> anyhow::Result<()> {
        draw_png(&self.path, self.size, fig)
    }
}

/// Append `.png` unless the path already ends with it.
pub fn png_path(path: &Path) -> PathBuf {
    let is_png = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("png"));
    if is_png {
        path.to_path_buf()
    } else {
        let mut name = path.as_os_str().to_owned();
        name.push(".png");
        PathBuf::from(name)
    }
}

pub fn image_size(zoom: f32) -> (u32, u32) {
    let zoom = zoom.clamp(0.2, 10.0);
    (
        (BASE_SIZE.0 as f32 * zoom).round() as u32,
        (BASE_SIZE.1 as f32 * zoom).round() as u32,
    )
}

/// Figure extent with 5 % vertical headroom.
pub fn chart_ranges(fig: &Figure) -> (Range<f64>, Range<f64>) {
    let (x, y) = fig.bounds();
    let pad = (y[1] - y[0]) * 0.05;
    (x[0]..x[1], (y[0] - pad)..(y[1] + pad))
}

fn rgb(color: FigureColor) -> RGBColor {
    let (r, g, b) = color.rgb();
    RGBColor(r, g, b)
}

fn draw_png(path: &Path, size: (u32, u32), fig: &Figure) -> Result<()> {
    let root = BitMapBackend::new(path, size).into_drawing_area();
    root.fill(&WHITE)?;
    let (x_range, y_range) = chart_ranges(fig);
    let mut chart = ChartBuilder::on(&root)
        .margin(10)
        .caption(fig.title.clone().unwrap_or_else(|| "aECG".into()), ("sans-serif", 24))
        .x_label_area_size(30)
        .y_label_area_size(40)
        .build_cartesian_2d(x_range, y_range)?;
    chart
        .configure_mesh()
        .x_desc(fig.x.label.clone().unwrap_or_default())
        .y_desc(fig.y.label.clone().unwrap_or_default())
        .draw()?;

    // spans underneath the traces
    for span in fig.spans() {
        chart.draw_series(std::iter::once(Rectangle::new(
            [(span.x[0], span.y[0]), (span.x[1], span.y[1])],
            rgb(span.color).mix(0.25).filled(),
        )))?;
    }
    for series in &fig.series {
        match series {
            Series::Line(line) => {
                chart.draw_series(LineSeries::new(
                    line.points.iter().map(|p| (p[0], p[1])),
                    rgb(line.style.color).stroke_width(line.style.width.round().max(1.0) as u32),
                ))?;
            }
            Series::Text(text) => {
                let style = ("sans-serif", 16).into_font().color(&rgb(text.color));
                chart.draw_series(std::iter::once(Text::new(
                    text.text.clone(),
                    (text.at[0], text.at[1]),
                    style,
                )))?;
            }
            Series::Span(_) => {}
        }
    }
    root.present()?;
    log::info!("saved waveform image to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use aecg_lib::plot::{LineSeries as Trace, Style};

    #[test]
    fn png_extension_is_added_once() {
        assert_eq!(png_path(Path::new("out/ecg")), PathBuf::from("out/ecg.png"));
        assert_eq!(png_path(Path::new("out/ecg.PNG")), PathBuf::from("out/ecg.PNG"));
        assert_eq!(png_path(Path::new("ecg.v2")), PathBuf::from("ecg.v2.png"));
        assert_eq!(PngExporter::new("a", (10, 10)).path(), Path::new("a.png"));
    }

    #[test]
    fn image_follows_zoom() {
        assert_eq!(image_size(1.0), BASE_SIZE);
        assert_eq!(image_size(0.5), (800, 500));
        assert_eq!(image_size(100.0), (16000, 10000));
        assert_eq!(PngExporter::for_zoom("a.png", 2.0).size(), (3200, 2000));
    }

    #[test]
    fn ranges_pad_vertical_extent() {
        let mut fig = Figure::new(Some("II".to_string()));
        fig.add_series(Series::Line(Trace {
            name: "II".into(),
            points: vec![[0.0, -1.0], [100.0, 1.0]],
            style: Style {
                width: 1.0,
                color: FigureColor(0),
            },
        }));
        let (x, y) = chart_ranges(&fig);
        assert_eq!(x, 0.0..100.0);
        assert!((y.start + 1.1).abs() < 1e-12);
        assert!((y.end - 1.1).abs() < 1e-12);
    }

    #[test]
    fn figure_colors_map_to_styles() {
        let color = rgb(FigureColor(0x1f77b4));
        assert_eq!((color.0, color.1, color.2), (0x1f, 0x77, 0xb4));
        let stroke = color.stroke_width(2);
        assert_eq!(stroke.stroke_width, 2);
        let fill = color.mix(0.25).filled();
        assert!(fill.filled);
    }
}
