//! LLM response splitting.
//!
//! Separates the model's prose from fenced code regions. Only blocks tagged
//! `python` count as executable; fenced regions of any language are stripped
//! from the prose.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref PYTHON_FENCE: Regex =
        Regex::new(r"(?s)```python(.*?)```").unwrap_or_else(|e| panic!("fence regex: {}", e));
    static ref ANY_FENCE: Regex =
        Regex::new(r"(?s)```.*?```").unwrap_or_else(|e| panic!("fence regex: {}", e));
}

/// Prose plus the extracted code blocks, in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitResponse {
    /// Remaining prose with all fenced regions removed; `None` when nothing
    /// is left after trimming.
    pub analysis: Option<String>,
    pub code_blocks: Vec<String>,
}

/// Split raw completion text into prose and executable code blocks.
/// Zero code blocks is valid.
pub fn split_response(text: &str) -> SplitResponse {
    let code_blocks: Vec<String> = PYTHON_FENCE
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .collect();

    let prose = ANY_FENCE.replace_all(text, "");
    let prose = prose.trim();
    let analysis = if prose.is_empty() {
        None
    } else {
        Some(prose.to_string())
    };

    SplitResponse {
        analysis,
        code_blocks,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_prose_and_code() {
        let text = "Here is the chart you asked for.\n```python\nfig = px.bar(df)\n```";
        let split = split_response(text);
        assert_eq!(
            split.analysis.as_deref(),
            Some("Here is the chart you asked for.")
        );
        assert_eq!(split.code_blocks, vec!["fig = px.bar(df)".to_string()]);
    }

    #[test]
    fn no_fences_yields_full_prose() {
        let split = split_response("  Just an answer, no code.  ");
        assert_eq!(split.analysis.as_deref(), Some("Just an answer, no code."));
        assert!(split.code_blocks.is_empty());
    }

    #[test]
    fn non_python_fences_are_stripped_but_not_executed() {
        let text = "Look:\n```json\n{\"a\": 1}\n```\ndone";
        let split = split_response(text);
        assert_eq!(split.analysis.as_deref(), Some("Look:\n\ndone"));
        assert!(split.code_blocks.is_empty());
    }

    #[test]
    fn multiple_blocks_keep_order() {
        let text = "```python\nfirst\n```\nmiddle\n```python\nsecond\n```";
        let split = split_response(text);
        assert_eq!(split.code_blocks, vec!["first", "second"]);
        assert_eq!(split.analysis.as_deref(), Some("middle"));
    }

    #[test]
    fn all_code_means_no_prose() {
        let split = split_response("```python\nx = 1\n```");
        assert_eq!(split.analysis, None);
        assert_eq!(split.code_blocks, vec!["x = 1"]);
    }
}
