//! Chart models and rendering.
//!
//! Three artifact-producing chart families, mirroring the three plotting
//! surfaces the executor exposes to generated code:
//!
//! - [`FigureSpec`]: raster figures (the matplotlib-style surface), rendered
//!   to an in-memory PNG at fixed high resolution on a dark background.
//! - [`InteractiveFigure`]: plotly-style traces + layout JSON, kept as an
//!   object and themed dark in place; rasterized only on demand for
//!   downloads.
//! - [`DeclarativeChart`]: Vega-Lite style spec, serialized to a
//!   self-contained HTML document for downloads.
//!
//! Rendering takes explicit per-call [`RenderOptions`] rather than any
//! process-wide style state.

use crate::error::{Result, VizError};
use plotters::prelude::*;
use polars::prelude::{AnyValue, DataFrame, DataType, Series};
use serde::Serialize;
use serde_json::json;

/// Explicit render configuration passed into every rendering call.
#[derive(Debug, Clone, Copy)]
pub struct RenderOptions {
    pub width: u32,
    pub height: u32,
}

impl Default for RenderOptions {
    fn default() -> Self {
        // 6x4.5 inches at 300 dpi.
        Self {
            width: 1800,
            height: 1350,
        }
    }
}

const BACKGROUND: RGBColor = RGBColor(0x12, 0x12, 0x12);
const GRID: RGBColor = RGBColor(0x33, 0x33, 0x33);
const AXIS: RGBColor = RGBColor(0xC8, 0xC8, 0xC8);
const PALETTE: [RGBColor; 6] = [
    RGBColor(0x4C, 0xAF, 0x50),
    RGBColor(0x42, 0xA5, 0xF5),
    RGBColor(0xFF, 0xB7, 0x4D),
    RGBColor(0xAB, 0x47, 0xBC),
    RGBColor(0xEF, 0x53, 0x50),
    RGBColor(0x26, 0xA6, 0x9A),
];

fn series_color(index: usize) -> RGBColor {
    PALETTE[index % PALETTE.len()]
}

/// How one plotted series is drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeriesKind {
    Bar,
    Line,
    Scatter,
}

/// One series of categorical labels and numeric values.
#[derive(Debug, Clone)]
pub struct PlotSeries {
    pub kind: SeriesKind,
    pub labels: Vec<String>,
    pub values: Vec<f64>,
}

/// A raster figure under construction: the matplotlib-style surface.
#[derive(Debug, Clone, Default)]
pub struct FigureSpec {
    pub title: Option<String>,
    pub xlabel: Option<String>,
    pub ylabel: Option<String>,
    pub series: Vec<PlotSeries>,
}

/// Open raster figures, indexed by handle. Mirrors the plotting library's
/// "current figure" state machine, but scoped to one execution namespace
/// instead of the process.
#[derive(Debug, Default)]
pub struct FigureRegistry {
    figures: Vec<(FigureSpec, bool)>,
}

impl FigureRegistry {
    pub fn new_figure(&mut self) -> usize {
        self.figures.push((FigureSpec::default(), true));
        self.figures.len() - 1
    }

    /// Last open figure, creating one if none is open.
    pub fn current_or_new(&mut self) -> usize {
        match self.figures.iter().rposition(|(_, open)| *open) {
            Some(idx) => idx,
            None => self.new_figure(),
        }
    }

    pub fn get(&self, handle: usize) -> Option<&FigureSpec> {
        self.figures.get(handle).map(|(spec, _)| spec)
    }

    pub fn get_mut(&mut self, handle: usize) -> Option<&mut FigureSpec> {
        self.figures.get_mut(handle).map(|(spec, _)| spec)
    }

    pub fn is_open(&self, handle: usize) -> bool {
        self.figures.get(handle).map(|(_, open)| *open).unwrap_or(false)
    }

    pub fn close(&mut self, handle: usize) {
        if let Some(entry) = self.figures.get_mut(handle) {
            entry.1 = false;
        }
    }

    pub fn close_all(&mut self) {
        for entry in &mut self.figures {
            entry.1 = false;
        }
    }

    pub fn first_open(&self) -> Option<usize> {
        self.figures.iter().position(|(_, open)| *open)
    }

    pub fn any_open(&self) -> bool {
        self.first_open().is_some()
    }
}

/// Render a raster figure to PNG bytes: dark background, fixed resolution.
pub fn render_figure_png(figure: &FigureSpec, options: &RenderOptions) -> Result<Vec<u8>> {
    let (width, height) = (options.width, options.height);
    let mut raw = vec![0u8; (width * height * 3) as usize];
    {
        let root = BitMapBackend::with_buffer(&mut raw, (width, height)).into_drawing_area();
        root.fill(&BACKGROUND)
            .map_err(|e| VizError::Render(e.to_string()))?;

        let point_count = figure.series.iter().map(|s| s.values.len()).max().unwrap_or(0);
        if point_count > 0 {
            let (y_min, y_max) = value_range(figure);
            let mut chart = ChartBuilder::on(&root)
                .margin(60)
                .x_label_area_size(50)
                .y_label_area_size(70)
                .build_cartesian_2d(-0.5f64..(point_count as f64 - 0.5), y_min..y_max)
                .map_err(|e| VizError::Render(e.to_string()))?;

            chart
                .configure_mesh()
                .x_labels(0)
                .y_labels(0)
                .axis_style(&AXIS)
                .light_line_style(&GRID)
                .draw()
                .map_err(|e| VizError::Render(e.to_string()))?;

            for (index, series) in figure.series.iter().enumerate() {
                let color = series_color(index);
                let points = || {
                    series
                        .values
                        .iter()
                        .enumerate()
                        .filter(|(_, v)| v.is_finite())
                        .map(|(i, v)| (i as f64, *v))
                };
                match series.kind {
                    SeriesKind::Bar => {
                        chart
                            .draw_series(points().map(|(x, y)| {
                                let (lo, hi) = if y >= 0.0 { (0.0, y) } else { (y, 0.0) };
                                Rectangle::new([(x - 0.35, lo), (x + 0.35, hi)], color.filled())
                            }))
                            .map_err(|e| VizError::Render(e.to_string()))?;
                    }
                    SeriesKind::Line => {
                        chart
                            .draw_series(LineSeries::new(points(), color.stroke_width(3)))
                            .map_err(|e| VizError::Render(e.to_string()))?;
                    }
                    SeriesKind::Scatter => {
                        chart
                            .draw_series(points().map(|p| Circle::new(p, 6, color.filled())))
                            .map_err(|e| VizError::Render(e.to_string()))?;
                    }
                }
            }
        }
        root.present().map_err(|e| VizError::Render(e.to_string()))?;
    }

    let img = image::RgbImage::from_raw(width, height, raw)
        .ok_or_else(|| VizError::Render("render buffer size mismatch".to_string()))?;
    let mut png = Vec::new();
    img.write_to(
        &mut std::io::Cursor::new(&mut png),
        image::ImageOutputFormat::Png,
    )
    .map_err(|e| VizError::Render(e.to_string()))?;
    Ok(png)
}

fn value_range(figure: &FigureSpec) -> (f64, f64) {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    let mut has_bar = false;
    for series in &figure.series {
        has_bar |= series.kind == SeriesKind::Bar;
        for v in series.values.iter().filter(|v| v.is_finite()) {
            min = min.min(*v);
            max = max.max(*v);
        }
    }
    if !min.is_finite() || !max.is_finite() {
        return (0.0, 1.0);
    }
    if has_bar {
        min = min.min(0.0);
        max = max.max(0.0);
    }
    if (max - min).abs() < f64::EPSILON {
        max = min + 1.0;
    }
    let pad = (max - min) * 0.05;
    (min - pad, max + pad)
}

/// Plotly-style figure: traces plus a layout object.
#[derive(Debug, Clone, Serialize, Default)]
pub struct InteractiveFigure {
    pub traces: Vec<serde_json::Value>,
    pub layout: serde_json::Map<String, serde_json::Value>,
}

impl InteractiveFigure {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_trace(&mut self, trace: serde_json::Value) {
        self.traces.push(trace);
    }

    pub fn set_layout(&mut self, key: &str, value: serde_json::Value) {
        self.layout.insert(key.to_string(), value);
    }

    /// Dark template: applied in place when the figure is classified, the
    /// object itself is retained.
    pub fn apply_dark_theme(&mut self) {
        self.set_layout("template", json!("plotly_dark"));
        self.set_layout("paper_bgcolor", json!("#121212"));
        self.set_layout("plot_bgcolor", json!("#1E1E1E"));
    }

    pub fn to_spec(&self) -> serde_json::Value {
        json!({ "data": self.traces, "layout": self.layout })
    }

    /// Downgrade the traces to a raster figure for on-demand PNG downloads.
    pub fn to_figure_spec(&self) -> FigureSpec {
        let mut figure = FigureSpec {
            title: self.layout.get("title").and_then(layout_title),
            ..Default::default()
        };
        for trace in &self.traces {
            let kind = match trace.get("type").and_then(|t| t.as_str()) {
                Some("bar") => SeriesKind::Bar,
                Some("scatter") => {
                    if trace.get("mode").and_then(|m| m.as_str()) == Some("markers") {
                        SeriesKind::Scatter
                    } else {
                        SeriesKind::Line
                    }
                }
                _ => SeriesKind::Line,
            };
            let labels = trace
                .get("x")
                .and_then(|x| x.as_array())
                .map(|xs| xs.iter().map(json_label).collect())
                .unwrap_or_default();
            let values = trace
                .get("y")
                .and_then(|y| y.as_array())
                .map(|ys| ys.iter().map(|v| v.as_f64().unwrap_or(f64::NAN)).collect())
                .unwrap_or_default();
            figure.series.push(PlotSeries { kind, labels, values });
        }
        figure
    }

    pub fn to_png(&self, options: &RenderOptions) -> Result<Vec<u8>> {
        render_figure_png(&self.to_figure_spec(), options)
    }
}

// a plotly title is either a string or {"text": ...}
fn layout_title(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Object(map) => map
            .get("text")
            .and_then(|t| t.as_str())
            .map(str::to_string),
        _ => None,
    }
}

fn json_label(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Vega-Lite style declarative chart.
#[derive(Debug, Clone, Serialize)]
pub struct DeclarativeChart {
    pub mark: String,
    pub encoding: serde_json::Map<String, serde_json::Value>,
    pub title: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub rows: Vec<serde_json::Value>,
}

impl DeclarativeChart {
    pub fn new(data: &DataFrame) -> Self {
        Self {
            mark: "bar".to_string(),
            encoding: serde_json::Map::new(),
            title: None,
            width: None,
            height: None,
            rows: frame_to_json_rows(data),
        }
    }

    pub fn with_mark(mut self, mark: &str) -> Self {
        self.mark = mark.to_string();
        self
    }

    /// Set one encoding channel from an `alt`-style shorthand like
    /// `"month:N"` or `"total"`.
    pub fn encode_channel(&mut self, channel: &str, shorthand: &str) {
        let (field, kind) = match shorthand.rsplit_once(':') {
            Some((field, code)) => (field, vega_type(code)),
            None => (
                shorthand,
                if channel == "y" { "quantitative" } else { "nominal" },
            ),
        };
        self.encoding.insert(
            channel.to_string(),
            json!({ "field": field, "type": kind }),
        );
    }

    pub fn to_spec(&self) -> serde_json::Value {
        let mut spec = serde_json::Map::new();
        spec.insert(
            "$schema".to_string(),
            json!("https://vega.github.io/schema/vega-lite/v5.json"),
        );
        if let Some(title) = &self.title {
            spec.insert("title".to_string(), json!(title));
        }
        if let Some(width) = self.width {
            spec.insert("width".to_string(), json!(width));
        }
        if let Some(height) = self.height {
            spec.insert("height".to_string(), json!(height));
        }
        spec.insert("data".to_string(), json!({ "values": self.rows }));
        spec.insert("mark".to_string(), json!(self.mark));
        spec.insert("encoding".to_string(), json!(self.encoding));
        serde_json::Value::Object(spec)
    }

    /// Self-contained HTML document embedding the spec.
    pub fn to_html(&self) -> Result<String> {
        let spec = serde_json::to_string(&self.to_spec())?;
        Ok(format!(
            r##"<!DOCTYPE html>
<html>
<head>
  <meta charset="utf-8" />
  <script src="https://cdn.jsdelivr.net/npm/vega@5"></script>
  <script src="https://cdn.jsdelivr.net/npm/vega-lite@5"></script>
  <script src="https://cdn.jsdelivr.net/npm/vega-embed@6"></script>
  <style>body {{ background-color: #121212; }}</style>
</head>
<body>
  <div id="vis"></div>
  <script>vegaEmbed("#vis", {});</script>
</body>
</html>
"##,
            spec
        ))
    }

    /// Raster fallback used when HTML serialization fails.
    pub fn to_figure_spec(&self) -> FigureSpec {
        let field = |channel: &str| {
            self.encoding
                .get(channel)
                .and_then(|e| e.get("field"))
                .and_then(|f| f.as_str())
                .map(str::to_string)
        };
        let x_field = field("x");
        let y_field = field("y");
        let mut labels = Vec::new();
        let mut values = Vec::new();
        for row in &self.rows {
            if let Some(x) = &x_field {
                labels.push(row.get(x.as_str()).map(json_label).unwrap_or_default());
            }
            if let Some(y) = &y_field {
                values.push(
                    row.get(y.as_str())
                        .and_then(|v| v.as_f64())
                        .unwrap_or(f64::NAN),
                );
            }
        }
        let kind = match self.mark.as_str() {
            "line" => SeriesKind::Line,
            "point" | "circle" => SeriesKind::Scatter,
            _ => SeriesKind::Bar,
        };
        FigureSpec {
            title: self.title.clone(),
            xlabel: x_field,
            ylabel: y_field,
            series: vec![PlotSeries { kind, labels, values }],
        }
    }
}

fn vega_type(code: &str) -> &'static str {
    match code {
        "Q" => "quantitative",
        "O" => "ordinal",
        "T" => "temporal",
        _ => "nominal",
    }
}

/// Serialize a frame row-wise to JSON objects, column order preserved.
pub fn frame_to_json_rows(df: &DataFrame) -> Vec<serde_json::Value> {
    let names: Vec<String> = df.get_column_names().iter().map(|s| s.to_string()).collect();
    let mut rows = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        let mut row = serde_json::Map::new();
        for name in &names {
            let value = match df.column(name) {
                Ok(series) => cell_to_json(series, i),
                Err(_) => serde_json::Value::Null,
            };
            row.insert(name.clone(), value);
        }
        rows.push(serde_json::Value::Object(row));
    }
    rows
}

/// A whole series as a JSON array, used when columns feed plotly traces.
pub(crate) fn series_to_json(series: &Series) -> Vec<serde_json::Value> {
    (0..series.len()).map(|i| cell_to_json(series, i)).collect()
}

fn cell_to_json(series: &Series, index: usize) -> serde_json::Value {
    let value = match series.get(index) {
        Ok(v) => v,
        Err(_) => return serde_json::Value::Null,
    };
    match value {
        AnyValue::Null => serde_json::Value::Null,
        AnyValue::Boolean(b) => json!(b),
        AnyValue::String(s) => json!(s),
        AnyValue::Float32(f) => json!(f as f64),
        AnyValue::Float64(f) => json!(f),
        AnyValue::Int8(v) => json!(v),
        AnyValue::Int16(v) => json!(v),
        AnyValue::Int32(v) => json!(v),
        AnyValue::Int64(v) => json!(v),
        AnyValue::UInt8(v) => json!(v),
        AnyValue::UInt16(v) => json!(v),
        AnyValue::UInt32(v) => json!(v),
        AnyValue::UInt64(v) => json!(v),
        other => serde_json::Value::String(other.to_string()),
    }
}

/// Labels for chart axes from a series: strings stay bare, everything else
/// goes through Display (dates format as dates).
pub fn series_labels(series: &Series) -> Vec<String> {
    (0..series.len())
        .map(|i| match series.get(i) {
            Ok(AnyValue::String(s)) => s.to_string(),
            Ok(AnyValue::Null) => String::new(),
            Ok(other) => other.to_string(),
            Err(_) => String::new(),
        })
        .collect()
}

/// Numeric values from a series via a Float64 cast; nulls become NaN.
pub fn series_values(series: &Series) -> Result<Vec<f64>> {
    let cast = series.cast(&DataType::Float64)?;
    let values = cast
        .f64()?
        .into_iter()
        .map(|v| v.unwrap_or(f64::NAN))
        .collect();
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::df;

    #[test]
    fn registry_tracks_open_figures() {
        let mut registry = FigureRegistry::default();
        assert!(!registry.any_open());
        let fig = registry.new_figure();
        assert!(registry.is_open(fig));
        assert_eq!(registry.current_or_new(), fig);
        registry.close(fig);
        assert!(!registry.any_open());
        // closing everything forces a fresh figure next time
        let next = registry.current_or_new();
        assert_ne!(next, fig);
    }

    #[test]
    fn render_produces_png_bytes() {
        let figure = FigureSpec {
            title: Some("totals".to_string()),
            series: vec![PlotSeries {
                kind: SeriesKind::Bar,
                labels: vec!["a".into(), "b".into()],
                values: vec![3.0, 5.0],
            }],
            ..Default::default()
        };
        let options = RenderOptions {
            width: 320,
            height: 240,
        };
        let png = render_figure_png(&figure, &options).unwrap();
        // PNG magic header
        assert_eq!(&png[..8], &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]);
    }

    #[test]
    fn dark_theme_sets_layout_colors() {
        let mut figure = InteractiveFigure::new();
        figure.push_trace(json!({"type": "bar", "x": ["a"], "y": [1.0]}));
        figure.apply_dark_theme();
        assert_eq!(figure.layout["template"], json!("plotly_dark"));
        assert_eq!(figure.layout["paper_bgcolor"], json!("#121212"));
        assert_eq!(figure.layout["plot_bgcolor"], json!("#1E1E1E"));
    }

    #[test]
    fn declarative_spec_embeds_rows_and_encoding() {
        let df = df! [ "month" => ["Jan", "Feb"], "total" => [10.0, 20.0] ].unwrap();
        let mut chart = DeclarativeChart::new(&df).with_mark("bar");
        chart.encode_channel("x", "month:N");
        chart.encode_channel("y", "total");
        let spec = chart.to_spec();
        assert_eq!(spec["mark"], json!("bar"));
        assert_eq!(spec["encoding"]["x"]["field"], json!("month"));
        assert_eq!(spec["encoding"]["y"]["type"], json!("quantitative"));
        assert_eq!(spec["data"]["values"].as_array().unwrap().len(), 2);
        let html = chart.to_html().unwrap();
        assert!(html.contains("vega-embed"));
        assert!(html.contains("\"month\""));
    }

    #[test]
    fn html_document_targets_the_vis_div() {
        let df = df! [ "x" => ["a"], "y" => [1.0] ].unwrap();
        let mut chart = DeclarativeChart::new(&df);
        chart.encode_channel("x", "x:N");
        chart.encode_channel("y", "y");
        let html = chart.to_html().unwrap();
        assert!(html.contains(r##"<div id="vis"></div>"##));
        assert!(html.contains(r##"vegaEmbed("#vis", {"$schema""##));
        assert!(html.trim_end().ends_with("</html>"));
    }
}
