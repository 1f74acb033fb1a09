//! Prompt construction.
//!
//! Turns the uploaded tables and the user question into the single prompt
//! string sent to the LLM: per-table shape, columns, dtypes, and the first few
//! rows, followed by the standing instruction block (answer, suggest
//! visualizations, provide code, robust date parsing, dark-mode styling).

use crate::table::TableSet;
use polars::prelude::*;

/// Fixed system instruction sent with every chat completion.
pub const SYSTEM_PROMPT: &str = r#"You are a data visualization expert and data analyst.
Your primary goals are:
1. Answer questions about the data clearly and accurately
2. Create precise, high-quality visualizations based on the data provided

When responding:
- First answer any questions about the data directly
- Then recommend appropriate visualizations with explanations
- Finally, provide Python code for creating these visualizations

IMPORTANT: When working with dates in pandas, always use pd.to_datetime with parameters
format='mixed', dayfirst=True to handle various date formats.

Use matplotlib, plotly, or altair - with a preference for interactive visualizations where appropriate.
Focus on clarity, accuracy, and aesthetic appeal in dark mode.
All visualizations should have proper titles, labels, and legends."#;

/// Number of sample rows included per table summary.
const SAMPLE_ROWS: usize = 3;

/// Build the full user prompt: data summaries + verbatim question +
/// instruction block. An empty table set still yields a valid prompt;
/// guarding against it is the caller's responsibility.
pub fn build_prompt(tables: &TableSet, question: &str) -> String {
    let mut data_info = String::new();
    for table in tables.iter() {
        data_info.push_str(&summarize_table(&table.name, &table.data));
    }

    format!(
        r#"I need to analyze and visualize data from the following files:
{data_info}
User request: {question}

Please:
1. Answer any questions about the data
2. Suggest appropriate visualizations
3. Provide Python code for creating these visualizations

IMPORTANT: When working with dates in the data, use pd.to_datetime with parameters
format='mixed', dayfirst=True to handle various date formats.

Make sure to adapt the code to dark mode (dark background, light text/elements)."#
    )
}

fn summarize_table(name: &str, df: &DataFrame) -> String {
    let columns = df.get_column_names().join(", ");
    let mut dtypes = String::new();
    for (column, dtype) in df.get_column_names().iter().zip(df.dtypes().iter()) {
        dtypes.push_str(&format!("  {}: {}\n", column, dtype));
    }
    format!(
        "\nFile: {}\nShape: ({}, {})\nColumns: {}\nData types:\n{}First few rows:\n{}\n",
        name,
        df.height(),
        df.width(),
        columns,
        dtypes,
        df.head(Some(SAMPLE_ROWS))
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{SourceFormat, TableSet, UploadedTable};

    fn sample_tables() -> TableSet {
        let df = df! [
            "date" => ["01/02/2024", "02/02/2024", "03/02/2024", "04/02/2024"],
            "amount" => [10.0, 20.0, 30.0, 40.0]
        ]
        .unwrap();
        let mut tables = TableSet::new();
        tables.insert(UploadedTable {
            name: "sales.csv".to_string(),
            data: df,
            format: SourceFormat::Csv,
        });
        tables
    }

    #[test]
    fn prompt_contains_summary_and_question() {
        let prompt = build_prompt(&sample_tables(), "show monthly totals");
        assert!(prompt.contains("File: sales.csv"));
        assert!(prompt.contains("Shape: (4, 2)"));
        assert!(prompt.contains("Columns: date, amount"));
        assert!(prompt.contains("amount: f64"));
        assert!(prompt.contains("User request: show monthly totals"));
        assert!(prompt.contains("format='mixed', dayfirst=True"));
    }

    #[test]
    fn empty_table_set_still_builds() {
        let prompt = build_prompt(&TableSet::new(), "anything");
        assert!(prompt.contains("User request: anything"));
    }
}
