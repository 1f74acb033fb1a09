//! Artifact extraction. After a code block runs, the finished namespace is
//! inspected once, in fixed precedence order, and at most one artifact comes
//! out: the `fig` slot (raster or plotly), the `chart` slot, any figure left
//! open, then the `result_value` slot as a text dump.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use polars::prelude::DataFrame;
use tracing::debug;

use crate::chart::{render_figure_png, DeclarativeChart, InteractiveFigure, RenderOptions};
use crate::error::Result;
use crate::exec::value::Value;
use crate::exec::Namespace;

/// One displayable product of a code block.
#[derive(Debug, Clone)]
pub enum Artifact {
    /// Rendered PNG bytes.
    Image(Vec<u8>),
    /// Plotly-style figure, dark theme already applied.
    Interactive(InteractiveFigure),
    /// Vega-Lite style chart, kept exactly as the code built it.
    Declarative(DeclarativeChart),
    /// Fixed-width table dump.
    Text(String),
}

impl Artifact {
    pub fn kind(&self) -> &'static str {
        match self {
            Artifact::Image(_) => "image",
            Artifact::Interactive(_) => "interactive",
            Artifact::Declarative(_) => "declarative",
            Artifact::Text(_) => "text",
        }
    }

    /// Data URI for downloads. Interactive figures rasterize on demand;
    /// declarative charts serialize to a self-contained HTML document,
    /// falling back to PNG if that fails. Text artifacts have none.
    pub fn download_uri(&self, options: &RenderOptions) -> Option<String> {
        match self {
            Artifact::Image(png) => Some(png_uri(png)),
            Artifact::Interactive(figure) => figure.to_png(options).ok().map(|png| png_uri(&png)),
            Artifact::Declarative(chart) => match chart.to_html() {
                Ok(html) => Some(format!(
                    "data:text/html;base64,{}",
                    STANDARD.encode(html.as_bytes())
                )),
                Err(_) => render_figure_png(&chart.to_figure_spec(), options)
                    .ok()
                    .map(|png| png_uri(&png)),
            },
            Artifact::Text(_) => None,
        }
    }
}

fn png_uri(png: &[u8]) -> String {
    format!("data:image/png;base64,{}", STANDARD.encode(png))
}

fn frame_dump(df: &DataFrame) -> String {
    format!("```\n{}\n```", df)
}

/// Classify the namespace into at most one artifact. First match wins.
pub fn extract(ns: &mut Namespace, options: &RenderOptions) -> Result<Option<Artifact>> {
    // 1-2. the fig slot
    match ns.get("fig") {
        Some(Value::Figure(handle)) => {
            let handle = *handle;
            if let Some(figure) = ns.figures.get(handle).cloned() {
                debug!("classifying fig slot as raster figure");
                let png = render_figure_png(&figure, options)?;
                ns.figures.close(handle);
                return Ok(Some(Artifact::Image(png)));
            }
        }
        Some(Value::Interactive(figure)) => {
            debug!("classifying fig slot as interactive figure");
            let mut figure = figure.clone();
            figure.apply_dark_theme();
            ns.set("fig", Value::Interactive(figure.clone()));
            return Ok(Some(Artifact::Interactive(figure)));
        }
        _ => {}
    }

    // 3. the chart slot
    if let Some(Value::Declarative(chart)) = ns.get("chart") {
        debug!("classifying chart slot as declarative chart");
        return Ok(Some(Artifact::Declarative(chart.clone())));
    }

    // 4. any figure left open
    if let Some(handle) = ns.figures.first_open() {
        if let Some(figure) = ns.figures.get(handle).cloned() {
            debug!("classifying open figure");
            let png = render_figure_png(&figure, options)?;
            ns.figures.close_all();
            return Ok(Some(Artifact::Image(png)));
        }
    }

    // 5. the result slot
    match ns.get("result_value") {
        Some(Value::Frame(df)) => {
            debug!("classifying result_value frame");
            return Ok(Some(Artifact::Text(frame_dump(df))));
        }
        Some(Value::Column(series)) => {
            debug!("classifying result_value series");
            return Ok(Some(Artifact::Text(format!("```\n{}\n```", series))));
        }
        _ => {}
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart::{PlotSeries, SeriesKind};
    use polars::df;
    use serde_json::json;

    fn draw(ns: &mut Namespace, handle: usize) {
        let figure = ns.figures.get_mut(handle).unwrap();
        figure.series.push(PlotSeries {
            kind: SeriesKind::Bar,
            labels: vec!["a".into(), "b".into()],
            values: vec![1.0, 2.0],
        });
    }

    #[test]
    fn fig_slot_beats_result_value() {
        let mut ns = Namespace::with_bindings();
        let handle = ns.figures.new_figure();
        draw(&mut ns, handle);
        ns.set("fig", Value::Figure(handle));
        let df = df! [ "x" => [1, 2] ].unwrap();
        ns.set("result_value", Value::Frame(df));

        let artifact = extract(&mut ns, &RenderOptions::default()).unwrap().unwrap();
        assert_eq!(artifact.kind(), "image");
    }

    #[test]
    fn interactive_fig_is_themed_in_place() {
        let mut ns = Namespace::with_bindings();
        let mut figure = InteractiveFigure::new();
        figure.push_trace(json!({"type": "bar", "x": ["a"], "y": [1.0]}));
        ns.set("fig", Value::Interactive(figure));

        let artifact = extract(&mut ns, &RenderOptions::default()).unwrap().unwrap();
        match artifact {
            Artifact::Interactive(figure) => {
                assert_eq!(figure.layout["template"], json!("plotly_dark"));
                assert_eq!(figure.layout["paper_bgcolor"], json!("#121212"));
            }
            other => panic!("expected interactive, got {}", other.kind()),
        }
        // the namespace copy carries the theme too
        match ns.get("fig") {
            Some(Value::Interactive(figure)) => {
                assert_eq!(figure.layout["plot_bgcolor"], json!("#1E1E1E"));
            }
            other => panic!("expected interactive fig, got {:?}", other),
        }
    }

    #[test]
    fn open_figure_without_binding_is_rendered() {
        let mut ns = Namespace::with_bindings();
        let handle = ns.figures.new_figure();
        draw(&mut ns, handle);

        let artifact = extract(&mut ns, &RenderOptions::default()).unwrap().unwrap();
        assert_eq!(artifact.kind(), "image");
    }

    #[test]
    fn blank_open_figure_still_renders() {
        let mut ns = Namespace::with_bindings();
        ns.figures.new_figure();

        let artifact = extract(&mut ns, &RenderOptions::default()).unwrap().unwrap();
        assert_eq!(artifact.kind(), "image");
        assert!(!ns.figures.any_open());
    }

    #[test]
    fn result_value_dumps_as_fenced_text() {
        let mut ns = Namespace::with_bindings();
        let df = df! [ "region" => ["East"], "total" => [230.0] ].unwrap();
        ns.set("result_value", Value::Frame(df));

        let artifact = extract(&mut ns, &RenderOptions::default()).unwrap().unwrap();
        match artifact {
            Artifact::Text(text) => {
                assert!(text.starts_with("```\n"));
                assert!(text.ends_with("\n```"));
                assert!(text.contains("region"));
                assert!(text.contains("East"));
            }
            other => panic!("expected text, got {}", other.kind()),
        }
    }

    #[test]
    fn empty_namespace_yields_nothing() {
        let mut ns = Namespace::with_bindings();
        assert!(extract(&mut ns, &RenderOptions::default()).unwrap().is_none());
    }

    #[test]
    fn download_uris_by_kind() {
        let options = RenderOptions {
            width: 320,
            height: 240,
        };
        let image = Artifact::Image(vec![1, 2, 3]);
        assert!(image
            .download_uri(&options)
            .unwrap()
            .starts_with("data:image/png;base64,"));

        let df = df! [ "x" => ["a"], "y" => [1.0] ].unwrap();
        let mut chart = DeclarativeChart::new(&df);
        chart.encode_channel("x", "x:N");
        chart.encode_channel("y", "y");
        assert!(Artifact::Declarative(chart)
            .download_uri(&options)
            .unwrap()
            .starts_with("data:text/html;base64,"));

        assert!(Artifact::Text("```\nx\n```".to_string())
            .download_uri(&options)
            .is_none());
    }
}
