//! Heuristic code rewriting.
//!
//! Pure text transformation over the model's generated code, organized as an
//! explicit list of pattern -> replacement rules so the heuristics stay
//! visible and independently testable. Two passes:
//!
//! 1. Date robustness: `pd.to_datetime(..)` calls without explicit
//!    format/dayfirst arguments gain `format='mixed', dayfirst=True`;
//!    `datetime.strptime(expr, 'pattern')` is rewritten to the same call.
//! 2. Table binding: file-load calls whose literal path mentions an uploaded
//!    table name are replaced with a direct reference into the in-memory
//!    `dataframes` mapping.
//!
//! Best effort by design: regexes over source text can both under- and
//! over-match (nested parentheses in particular). Known limitation.

use regex::{Captures, Regex};
use tracing::debug;

/// One pattern -> replacement pair.
pub struct RewriteRule {
    pub name: &'static str,
    pattern: Regex,
    replace: Box<dyn Fn(&Captures) -> String + Send + Sync>,
}

impl RewriteRule {
    fn new(
        name: &'static str,
        pattern: &str,
        replace: impl Fn(&Captures) -> String + Send + Sync + 'static,
    ) -> Self {
        Self {
            name,
            pattern: Regex::new(pattern).unwrap_or_else(|e| panic!("rewrite rule {}: {}", name, e)),
            replace: Box::new(replace),
        }
    }

    fn apply(&self, code: &str) -> String {
        self.pattern
            .replace_all(code, |caps: &Captures| (self.replace)(caps))
            .into_owned()
    }
}

/// Ordered rule list for one request's table set.
pub struct Rewriter {
    rules: Vec<RewriteRule>,
}

impl Rewriter {
    /// Build the standard rule list: date-robustness rules first, then the
    /// binding rules for every table name. Assignment-shaped bindings run
    /// before the bare-call binding so the generic `df = ..` case still sees
    /// the original load call and gets its defensive copy.
    pub fn for_tables(table_names: &[String]) -> Self {
        let mut rules = vec![date_call_rule(), strptime_rule()];
        for name in table_names {
            rules.extend(table_binding_rules(name));
        }
        Self { rules }
    }

    /// Apply every rule in order, then make sure `datetime` is importable if
    /// the code references it through `from datetime import ..`.
    pub fn rewrite(&self, code: &str) -> String {
        let mut rewritten = code.to_string();
        for rule in &self.rules {
            let next = rule.apply(&rewritten);
            if next != rewritten {
                debug!("Rewrite rule '{}' applied", rule.name);
            }
            rewritten = next;
        }
        if rewritten.contains("from datetime import") && !rewritten.contains("import datetime") {
            rewritten = format!("import datetime\n{}", rewritten);
        }
        rewritten
    }
}

/// Convenience entry point used by the pipeline.
pub fn rewrite_code(code: &str, table_names: &[String]) -> String {
    Rewriter::for_tables(table_names).rewrite(code)
}

fn date_call_rule() -> RewriteRule {
    RewriteRule::new(
        "to_datetime robust args",
        r"pd\.to_datetime\((.*?)\)",
        |caps| {
            let args = &caps[1];
            if args.contains("format") || args.contains("dayfirst") {
                caps[0].to_string()
            } else {
                format!("pd.to_datetime({}, format='mixed', dayfirst=True)", args)
            }
        },
    )
}

fn strptime_rule() -> RewriteRule {
    RewriteRule::new(
        "strptime to to_datetime",
        r#"datetime\.strptime\((.*?),\s*['"][^'"]*['"]\)"#,
        |caps| format!("pd.to_datetime({}, format='mixed', dayfirst=True)", &caps[1]),
    )
}

fn table_binding_rules(table_name: &str) -> Vec<RewriteRule> {
    let escaped = regex::escape(table_name);
    let sanitized = table_name.replace(['.', ' '], "_");
    let sanitized_escaped = regex::escape(&sanitized);
    let mut rules = Vec::new();

    for loader in ["read_csv", "read_excel"] {
        let load_call = format!(r#"pd\.{}\(['"][^'"]*{}['"][^)]*\)"#, loader, escaped);

        // Generic `df = pd.read_csv('..name..')`: bind with a defensive copy,
        // downstream code commonly mutates `df` in place.
        let name = table_name.to_string();
        rules.push(RewriteRule::new(
            "generic df binding",
            &format!(r"\bdf\s*=\s*{}", load_call),
            move |_| format!("df = dataframes['{}'].copy()", name),
        ));

        // `sales_csv = pd.read_csv('..sales.csv..')`: sanitized variable name.
        let name = table_name.to_string();
        let sanitized = sanitized.clone();
        rules.push(RewriteRule::new(
            "sanitized name binding",
            &format!(r"\b{}\s*=\s*{}", sanitized_escaped, load_call),
            move |_| format!("{} = dataframes['{}']", sanitized, name),
        ));

        // Any remaining load call referencing the table.
        let name = table_name.to_string();
        rules.push(RewriteRule::new(
            "load call binding",
            &load_call,
            move |_| format!("dataframes['{}']", name),
        ));
    }

    rules
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tables(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn bare_to_datetime_gains_robust_args() {
        let out = rewrite_code("df['date'] = pd.to_datetime(df['date'])", &[]);
        assert_eq!(
            out,
            "df['date'] = pd.to_datetime(df['date'], format='mixed', dayfirst=True)"
        );
    }

    #[test]
    fn explicit_format_is_left_alone() {
        let code = "pd.to_datetime(df['date'], format='%Y-%m-%d')";
        assert_eq!(rewrite_code(code, &[]), code);
        let code = "pd.to_datetime(df['date'], dayfirst=False)";
        assert_eq!(rewrite_code(code, &[]), code);
    }

    #[test]
    fn strptime_is_rewritten() {
        let out = rewrite_code("d = datetime.strptime(value, '%d/%m/%Y')", &[]);
        assert_eq!(
            out,
            "d = pd.to_datetime(value, format='mixed', dayfirst=True)"
        );
    }

    #[test]
    fn from_import_gains_module_import() {
        let out = rewrite_code("from datetime import date\nx = date.today()", &[]);
        assert!(out.starts_with("import datetime\n"));
    }

    #[test]
    fn generic_df_load_binds_with_copy() {
        let out = rewrite_code(
            "df = pd.read_csv('data/sales.csv')",
            &tables(&["sales.csv"]),
        );
        assert_eq!(out, "df = dataframes['sales.csv'].copy()");
    }

    #[test]
    fn sanitized_variable_binds_directly() {
        let out = rewrite_code(
            "sales_csv = pd.read_csv('sales.csv')",
            &tables(&["sales.csv"]),
        );
        assert_eq!(out, "sales_csv = dataframes['sales.csv']");
    }

    #[test]
    fn bare_load_call_binds_directly() {
        let out = rewrite_code(
            "monthly = pd.read_excel('uploads/budget.xlsx').head()",
            &tables(&["budget.xlsx"]),
        );
        assert_eq!(out, "monthly = dataframes['budget.xlsx'].head()");
    }

    #[test]
    fn unreferenced_tables_are_untouched() {
        let code = "df = pd.read_csv('other.csv')";
        assert_eq!(rewrite_code(code, &tables(&["sales.csv"])), code);
    }
}
