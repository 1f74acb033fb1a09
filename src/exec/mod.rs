//! Code execution. A block of generated script is parsed, evaluated against
//! the uploaded tables inside a fresh [`Namespace`], and the finished
//! namespace is handed to artifact extraction.
//!
//! Execution is sandboxed by construction: the interpreter exposes only the
//! library surface the evaluator implements, so there is no filesystem,
//! network, or process access to restrict.

pub mod eval;
pub mod script;
pub mod value;

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::chart::FigureRegistry;
use crate::error::{Result, VizError};
use crate::table::TableSet;

use eval::Evaluator;
use value::{Module, Value};

/// Variable bindings for one execution, in creation order, plus the open
/// figure registry and captured print output.
#[derive(Debug, Default)]
pub struct Namespace {
    values: HashMap<String, Value>,
    order: Vec<String>,
    pub figures: FigureRegistry,
    pub prints: Vec<String>,
}

impl Namespace {
    /// Fresh namespace with the standard preloaded bindings.
    pub fn with_bindings() -> Self {
        let mut ns = Self::default();
        ns.set("pd", Value::Module(Module::Pandas));
        ns.set("np", Value::Module(Module::Numpy));
        ns.set("plt", Value::Module(Module::Pyplot));
        ns.set("px", Value::Module(Module::PlotlyExpress));
        ns.set("go", Value::Module(Module::PlotlyGraphObjects));
        ns.set("alt", Value::Module(Module::Altair));
        ns.set("sns", Value::Module(Module::Seaborn));
        ns.set("datetime", Value::Module(Module::Datetime));
        ns.set("dataframes", Value::Tables);
        ns
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn set(&mut self, name: &str, value: Value) {
        if !self.values.contains_key(name) {
            self.order.push(name.to_string());
        }
        self.values.insert(name.to_string(), value);
    }

    pub fn names_in_order(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }
}

/// `True` when the code announces its own output, so the result-slot scan
/// should stay out of the way.
fn has_explicit_output(code: &str) -> bool {
    code.contains("print(") || code.contains("fig") || code.contains("plt")
}

/// Bind `result_value` to the first frame-like local, in creation order,
/// when the code produced no explicit output of its own.
fn fill_result_slot(ns: &mut Namespace, code: &str) {
    if has_explicit_output(code) || ns.get("result_value").is_some() {
        return;
    }
    let found = ns
        .order
        .iter()
        .find(|name| {
            matches!(
                ns.values.get(name.as_str()),
                Some(Value::Frame(_)) | Some(Value::Column(_))
            )
        })
        .cloned();
    if let Some(name) = found {
        if let Some(value) = ns.values.get(&name).cloned() {
            debug!(local = %name, "promoting frame to result_value");
            ns.set("result_value", value);
        }
    }
}

/// Strict datetime parse failures carry this signature; anything else is a
/// genuine execution error and is not retried.
fn is_date_mismatch(error: &VizError) -> bool {
    let message = error.to_string();
    message.contains("time data") && message.contains("doesn't match format")
}

/// Runs one code block against the uploaded tables.
pub struct Executor<'a> {
    tables: &'a mut TableSet,
}

impl<'a> Executor<'a> {
    pub fn new(tables: &'a mut TableSet) -> Self {
        Self { tables }
    }

    /// Execute a block. A strict date-format mismatch triggers one repair
    /// pass: temporal-looking columns are coerced in the stored tables and
    /// the block reruns against the repaired data. The coercion persists
    /// for later turns.
    pub fn run(&mut self, code: &str) -> Result<Namespace> {
        match self.run_once(code) {
            Ok(ns) => Ok(ns),
            Err(e) if is_date_mismatch(&e) => {
                warn!("date format mismatch, coercing temporal columns and retrying");
                self.tables.coerce_temporal_columns();
                self.run_once(code)
                    .map_err(|e2| VizError::Execution(format!("error after date preprocessing: {}", e2)))
            }
            Err(e) => Err(e),
        }
    }

    fn run_once(&self, code: &str) -> Result<Namespace> {
        let statements = script::parse(code)?;
        let mut ns = Namespace::with_bindings();
        {
            let mut evaluator = Evaluator {
                ns: &mut ns,
                tables: &*self.tables,
            };
            for statement in &statements {
                evaluator.exec_stmt(statement)?;
            }
        }
        fill_result_slot(&mut ns, code);
        Ok(ns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{SourceFormat, UploadedTable};
    use polars::df;
    use polars::prelude::*;

    fn sales_tables() -> TableSet {
        let data = df! [
            "region" => ["West", "East", "West", "East"],
            "sales" => [100.0, 150.0, 120.0, 80.0]
        ]
        .unwrap();
        let mut tables = TableSet::default();
        tables.insert(UploadedTable {
            name: "sales.csv".to_string(),
            data,
            format: SourceFormat::Csv,
        });
        tables
    }

    fn date_tables() -> TableSet {
        let data = df! [
            "order_date" => ["31/01/2023", "15/02/2023", "01/03/2023"],
            "amount" => [10.0, 20.0, 30.0]
        ]
        .unwrap();
        let mut tables = TableSet::default();
        tables.insert(UploadedTable {
            name: "orders.csv".to_string(),
            data,
            format: SourceFormat::Csv,
        });
        tables
    }

    #[test]
    fn groupby_and_bar_chart() {
        let mut tables = sales_tables();
        let code = "\
df = dataframes['sales.csv'].copy()
summary = df.groupby('region')['sales'].sum().reset_index()
plt.figure()
plt.bar(summary['region'], summary['sales'])
plt.title('Sales by region')
";
        let ns = Executor::new(&mut tables).run(code).unwrap();
        let handle = ns.figures.first_open().unwrap();
        let figure = ns.figures.get(handle).unwrap();
        assert_eq!(figure.title.as_deref(), Some("Sales by region"));
        assert_eq!(figure.series.len(), 1);
        // keys sorted: East then West
        assert_eq!(figure.series[0].labels, vec!["East", "West"]);
        assert_eq!(figure.series[0].values, vec![230.0, 220.0]);
    }

    #[test]
    fn filter_with_boolean_mask() {
        let mut tables = sales_tables();
        let code = "\
df = dataframes['sales.csv']
big = df[df['sales'] > 110]
";
        let ns = Executor::new(&mut tables).run(code).unwrap();
        match ns.get("big") {
            Some(Value::Frame(df)) => assert_eq!(df.height(), 2),
            other => panic!("expected frame, got {:?}", other),
        }
    }

    #[test]
    fn result_slot_promotes_first_frame() {
        let mut tables = sales_tables();
        let code = "summary = dataframes['sales.csv'].groupby('region')['sales'].mean()";
        let ns = Executor::new(&mut tables).run(code).unwrap();
        match ns.get("result_value") {
            Some(Value::Frame(df)) => {
                assert_eq!(df.height(), 2);
                assert!(df.column("region").is_ok());
            }
            other => panic!("expected result_value frame, got {:?}", other),
        }
    }

    #[test]
    fn result_slot_skipped_when_output_is_explicit() {
        let mut tables = sales_tables();
        let code = "\
summary = dataframes['sales.csv'].groupby('region')['sales'].sum()
print(summary)
";
        let ns = Executor::new(&mut tables).run(code).unwrap();
        assert!(ns.get("result_value").is_none());
        assert_eq!(ns.prints.len(), 1);
    }

    #[test]
    fn string_concatenation_in_print() {
        let mut tables = sales_tables();
        let code = "print('total for ' + 'East')";
        let ns = Executor::new(&mut tables).run(code).unwrap();
        assert_eq!(ns.prints, vec!["total for East".to_string()]);
    }

    #[test]
    fn date_mismatch_triggers_coercion_and_retry() {
        let mut tables = date_tables();
        let code = "\
df = dataframes['orders.csv'].copy()
df['order_date'] = pd.to_datetime(df['order_date'], format='%Y-%m-%d')
df['month'] = df['order_date'].dt.month
result_value = df
";
        // the strict format fails on day-first strings; the retry coerces
        // the stored column to dates, after which the parse passes through
        let ns = Executor::new(&mut tables).run(code).unwrap();
        match ns.get("result_value") {
            Some(Value::Frame(df)) => {
                assert_eq!(df.column("order_date").unwrap().dtype(), &DataType::Date);
                let months: Vec<Option<i8>> = df
                    .column("month")
                    .unwrap()
                    .cast(&DataType::Int8)
                    .unwrap()
                    .i8()
                    .unwrap()
                    .into_iter()
                    .collect();
                assert_eq!(months, vec![Some(1), Some(2), Some(3)]);
            }
            other => panic!("expected frame, got {:?}", other),
        }
        // the repaired column persists in the stored table
        assert_eq!(
            tables.frame("orders.csv").unwrap().column("order_date").unwrap().dtype(),
            &DataType::Date
        );
    }

    #[test]
    fn non_date_errors_are_not_retried() {
        let mut tables = sales_tables();
        let code = "df = dataframes['missing.csv']";
        let error = Executor::new(&mut tables).run(code).unwrap_err();
        assert!(!error.to_string().contains("after date preprocessing"));
    }

    #[test]
    fn plotly_express_builds_interactive_figure() {
        let mut tables = sales_tables();
        let code = "\
df = dataframes['sales.csv']
summary = df.groupby('region')['sales'].sum().reset_index()
fig = px.bar(summary, x='region', y='sales', title='Totals')
";
        let ns = Executor::new(&mut tables).run(code).unwrap();
        match ns.get("fig") {
            Some(Value::Interactive(figure)) => {
                assert_eq!(figure.traces.len(), 1);
                assert_eq!(figure.traces[0]["type"], serde_json::json!("bar"));
                assert_eq!(figure.layout["title"], serde_json::json!("Totals"));
            }
            other => panic!("expected interactive figure, got {:?}", other),
        }
    }

    #[test]
    fn altair_chart_round_trip() {
        let mut tables = sales_tables();
        let code = "\
df = dataframes['sales.csv']
chart = alt.Chart(df).mark_bar().encode(x='region:N', y='sales:Q').properties(title='By region')
";
        let ns = Executor::new(&mut tables).run(code).unwrap();
        match ns.get("chart") {
            Some(Value::Declarative(chart)) => {
                assert_eq!(chart.mark, "bar");
                assert_eq!(chart.title.as_deref(), Some("By region"));
                assert_eq!(chart.rows.len(), 4);
            }
            other => panic!("expected declarative chart, got {:?}", other),
        }
    }

    #[test]
    fn rejects_control_flow_with_visible_error() {
        let mut tables = sales_tables();
        let error = Executor::new(&mut tables)
            .run("for x in [1, 2]:\n    print(x)")
            .unwrap_err();
        assert!(error.to_string().contains("unsupported statement"));
    }
}
