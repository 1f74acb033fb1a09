//! Runtime values for the executor. Frames and columns wrap polars types
//! directly; figure handles index into the namespace's figure registry so
//! `fig`, `ax`, and the plotting module all mutate the same open figure.

use crate::chart::{DeclarativeChart, InteractiveFigure};
use polars::prelude::{DataFrame, Series};

/// The preloaded library bindings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Module {
    Pandas,
    Numpy,
    Matplotlib,
    Pyplot,
    PlotlyExpress,
    PlotlyGraphObjects,
    Altair,
    Seaborn,
    Datetime,
}

impl Module {
    pub fn name(&self) -> &'static str {
        match self {
            Module::Pandas => "pandas",
            Module::Numpy => "numpy",
            Module::Matplotlib => "matplotlib",
            Module::Pyplot => "matplotlib.pyplot",
            Module::PlotlyExpress => "plotly.express",
            Module::PlotlyGraphObjects => "plotly.graph_objects",
            Module::Altair => "altair",
            Module::Seaborn => "seaborn",
            Module::Datetime => "datetime",
        }
    }
}

#[derive(Debug, Clone)]
pub enum Value {
    Frame(DataFrame),
    Column(Series),
    /// Boolean row mask from a column comparison.
    Mask(Vec<bool>),
    /// Result of `frame.groupby(...)`, optionally narrowed to columns.
    Grouped {
        frame: DataFrame,
        keys: Vec<String>,
        selected: Option<Vec<String>>,
    },
    /// `column.dt` pending a component or format call.
    DtAccessor(Series),
    Figure(usize),
    Axes(usize),
    Interactive(InteractiveFigure),
    Declarative(DeclarativeChart),
    /// A plotly trace waiting to be collected into a figure.
    Trace(serde_json::Value),
    /// The read-only `dataframes` table mapping.
    Tables,
    Module(Module),
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    List(Vec<Value>),
    Tuple(Vec<Value>),
    None,
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Frame(_) => "DataFrame",
            Value::Column(_) => "Series",
            Value::Mask(_) => "boolean mask",
            Value::Grouped { .. } => "grouped frame",
            Value::DtAccessor(_) => "datetime accessor",
            Value::Figure(_) => "Figure",
            Value::Axes(_) => "Axes",
            Value::Interactive(_) => "plotly figure",
            Value::Declarative(_) => "altair chart",
            Value::Trace(_) => "plotly trace",
            Value::Tables => "dataframes",
            Value::Module(_) => "module",
            Value::Str(_) => "str",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bool(_) => "bool",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::None => "None",
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// How the value renders under `print`.
    pub fn display(&self) -> String {
        match self {
            Value::Frame(df) => format!("{}", df),
            Value::Column(s) => format!("{}", s),
            Value::Str(s) => s.clone(),
            Value::Int(v) => v.to_string(),
            Value::Float(v) => v.to_string(),
            Value::Bool(b) => {
                if *b {
                    "True".to_string()
                } else {
                    "False".to_string()
                }
            }
            Value::None => "None".to_string(),
            Value::List(items) => {
                let parts: Vec<String> = items.iter().map(Value::display).collect();
                format!("[{}]", parts.join(", "))
            }
            Value::Tuple(items) => {
                let parts: Vec<String> = items.iter().map(Value::display).collect();
                format!("({})", parts.join(", "))
            }
            other => format!("<{}>", other.type_name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_script_conventions() {
        assert_eq!(Value::Bool(true).display(), "True");
        assert_eq!(Value::None.display(), "None");
        assert_eq!(
            Value::List(vec![Value::Int(1), Value::Str("a".to_string())]).display(),
            "[1, a]"
        );
    }
}
