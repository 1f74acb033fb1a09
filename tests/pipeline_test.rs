//! End-to-end turns driven by canned model replies: splitting, rewriting,
//! execution, artifact classification, and response ordering.

use polars::df;
use polars::prelude::DataType;

use viz_assistant::chart::RenderOptions;
use viz_assistant::pipeline::{respond_to_completion, ResponseItem};
use viz_assistant::table::{SourceFormat, TableSet, UploadedTable};

fn sales_tables() -> TableSet {
    let data = df! [
        "region" => ["West", "East", "West", "East"],
        "sales" => [100.0, 150.0, 120.0, 80.0]
    ]
    .unwrap();
    let mut tables = TableSet::new();
    tables.insert(UploadedTable {
        name: "sales.csv".to_string(),
        data,
        format: SourceFormat::Csv,
    });
    tables
}

fn orders_tables() -> TableSet {
    let data = df! [
        "order_date" => ["31/01/2023", "15/02/2023", "01/03/2023"],
        "amount" => [10.0, 20.0, 30.0]
    ]
    .unwrap();
    let mut tables = TableSet::new();
    tables.insert(UploadedTable {
        name: "orders.csv".to_string(),
        data,
        format: SourceFormat::Csv,
    });
    tables
}

fn text(item: &ResponseItem) -> &str {
    match item {
        ResponseItem::Text(text) => text,
        other => panic!("expected text, got {}", other.kind()),
    }
}

#[test]
fn bar_chart_reply_yields_image_then_code() {
    let mut tables = sales_tables();
    let reply = "```python\n\
import pandas as pd\n\
import matplotlib.pyplot as plt\n\
df = pd.read_csv('sales.csv')\n\
summary = df.groupby('region')['sales'].sum().reset_index()\n\
plt.figure()\n\
plt.bar(summary['region'], summary['sales'])\n\
plt.title('Sales by Region')\n\
```";
    let items = respond_to_completion(reply, &mut tables, &RenderOptions::default());
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].kind(), "image");
    let code = text(&items[1]);
    assert!(code.starts_with("```python\n"));
    // the executed code shows the table binding, not the file read
    assert!(code.contains("dataframes['sales.csv']"));
    assert!(!code.contains("read_csv"));
}

#[test]
fn reply_without_code_is_prose_only() {
    let mut tables = sales_tables();
    let reply = "Your data has four rows across two regions.";
    let items = respond_to_completion(reply, &mut tables, &RenderOptions::default());
    assert_eq!(items.len(), 1);
    assert_eq!(text(&items[0]), reply);
}

#[test]
fn analysis_prose_precedes_artifacts() {
    let mut tables = sales_tables();
    let reply = "Here is the breakdown you asked for.\n\n\
```python\n\
df = pd.read_csv('sales.csv')\n\
plt.figure()\n\
plt.bar(df['region'], df['sales'])\n\
```\n\nLet me know if you need a different view.";
    let items = respond_to_completion(reply, &mut tables, &RenderOptions::default());
    assert_eq!(items.len(), 3);
    let prose = text(&items[0]);
    assert!(prose.contains("breakdown"));
    assert!(prose.contains("different view"));
    assert!(!prose.contains("```"));
    assert_eq!(items[1].kind(), "image");
    assert_eq!(items[2].kind(), "text");
}

#[test]
fn strict_date_mismatch_recovers_without_error() {
    let mut tables = orders_tables();
    // the explicit format survives rewriting and fails on day-first strings
    let reply = "```python\n\
df = pd.read_csv('orders.csv')\n\
df['order_date'] = pd.to_datetime(df['order_date'], format='%Y-%m-%d')\n\
df['month'] = df['order_date'].dt.month\n\
monthly = df.groupby('month')['amount'].sum().reset_index()\n\
plt.figure()\n\
plt.plot(monthly['month'], monthly['amount'])\n\
plt.title('Monthly totals')\n\
```";
    let items = respond_to_completion(reply, &mut tables, &RenderOptions::default());
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].kind(), "image");
    assert!(!text(&items[1]).contains("Error"));
    // the coerced column persists in the stored table for later turns
    assert_eq!(
        tables
            .frame("orders.csv")
            .unwrap()
            .column("order_date")
            .unwrap()
            .dtype(),
        &DataType::Date
    );
}

#[test]
fn to_datetime_without_format_gets_tolerant_parsing() {
    let mut tables = orders_tables();
    let reply = "```python\n\
df = pd.read_csv('orders.csv')\n\
df['order_date'] = pd.to_datetime(df['order_date'])\n\
plt.figure()\n\
plt.plot(df['order_date'], df['amount'])\n\
```";
    let items = respond_to_completion(reply, &mut tables, &RenderOptions::default());
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].kind(), "image");
    let code = text(&items[1]);
    assert!(code.contains("format='mixed', dayfirst=True"));
}

#[test]
fn failing_block_reports_error_and_later_blocks_still_run() {
    let mut tables = sales_tables();
    let reply = "```python\n\
df = pd.read_csv('sales.csv')\n\
bad = df['no_such_column'].sum()\n\
```\n\
```python\n\
df = pd.read_csv('sales.csv')\n\
print(len(df))\n\
```";
    let items = respond_to_completion(reply, &mut tables, &RenderOptions::default());
    assert_eq!(items.len(), 3);
    let error = text(&items[0]);
    assert!(error.starts_with("Error executing code:"));
    assert!(error.contains("Code attempted:"));
    assert!(error.contains("```python"));
    // second block ran independently: captured print output, then its code
    assert_eq!(text(&items[1]), "```\n4\n```");
    assert!(text(&items[2]).starts_with("```python"));
}

#[test]
fn quiet_result_is_dumped_as_fenced_table() {
    let mut tables = sales_tables();
    let reply = "```python\n\
summary = pd.read_csv('sales.csv').groupby('region')['sales'].sum()\n\
```";
    let items = respond_to_completion(reply, &mut tables, &RenderOptions::default());
    assert_eq!(items.len(), 2);
    let dump = text(&items[0]);
    assert!(dump.starts_with("```\n"));
    assert!(dump.contains("region"));
    assert!(dump.contains("East"));
    assert!(text(&items[1]).starts_with("```python"));
}

#[test]
fn plotly_figure_comes_back_dark_themed() {
    let mut tables = sales_tables();
    let reply = "```python\n\
import plotly.express as px\n\
df = pd.read_csv('sales.csv')\n\
summary = df.groupby('region')['sales'].sum().reset_index()\n\
fig = px.bar(summary, x='region', y='sales', title='Sales by Region')\n\
```";
    let items = respond_to_completion(reply, &mut tables, &RenderOptions::default());
    assert_eq!(items.len(), 2);
    match &items[0] {
        ResponseItem::Interactive(figure) => {
            assert_eq!(figure.layout["template"], serde_json::json!("plotly_dark"));
            assert_eq!(figure.traces.len(), 1);
        }
        other => panic!("expected interactive figure, got {}", other.kind()),
    }
}

#[test]
fn altair_chart_is_kept_unmodified() {
    let mut tables = sales_tables();
    let reply = "```python\n\
import altair as alt\n\
df = pd.read_csv('sales.csv')\n\
chart = alt.Chart(df).mark_bar().encode(x='region:N', y='sales:Q')\n\
```";
    let items = respond_to_completion(reply, &mut tables, &RenderOptions::default());
    assert_eq!(items.len(), 2);
    match &items[0] {
        ResponseItem::Declarative(chart) => {
            let spec = chart.to_spec();
            assert_eq!(spec["mark"], serde_json::json!("bar"));
            // no dark theme is forced onto declarative charts
            assert!(spec.get("background").is_none());
        }
        other => panic!("expected declarative chart, got {}", other.kind()),
    }
}
