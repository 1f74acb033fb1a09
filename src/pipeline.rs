//! Turn orchestration: prompt the model, split its reply, rewrite and run
//! each code block, and assemble the ordered response sequence.
//!
//! Failures are scoped deliberately: a model call failure aborts the turn
//! with an error message item, while a failing code block contributes an
//! error item and later blocks still run.

use tracing::{debug, info, warn};

use crate::artifact::{self, Artifact};
use crate::chart::{DeclarativeChart, InteractiveFigure, RenderOptions};
use crate::error::{Result, VizError};
use crate::exec::Executor;
use crate::llm::LlmClient;
use crate::prompt::build_prompt;
use crate::response::split_response;
use crate::rewrite::rewrite_code;
use crate::table::TableSet;

/// One element of the ordered response shown to the user.
#[derive(Debug, Clone)]
pub enum ResponseItem {
    Text(String),
    Image(Vec<u8>),
    Interactive(InteractiveFigure),
    Declarative(DeclarativeChart),
}

impl ResponseItem {
    pub fn kind(&self) -> &'static str {
        match self {
            ResponseItem::Text(_) => "text",
            ResponseItem::Image(_) => "image",
            ResponseItem::Interactive(_) => "interactive",
            ResponseItem::Declarative(_) => "declarative",
        }
    }

    pub fn download_uri(&self, options: &RenderOptions) -> Option<String> {
        let artifact = match self {
            ResponseItem::Text(_) => return None,
            ResponseItem::Image(png) => Artifact::Image(png.clone()),
            ResponseItem::Interactive(figure) => Artifact::Interactive(figure.clone()),
            ResponseItem::Declarative(chart) => Artifact::Declarative(chart.clone()),
        };
        artifact.download_uri(options)
    }
}

impl From<Artifact> for ResponseItem {
    fn from(artifact: Artifact) -> Self {
        match artifact {
            Artifact::Image(png) => ResponseItem::Image(png),
            Artifact::Interactive(figure) => ResponseItem::Interactive(figure),
            Artifact::Declarative(chart) => ResponseItem::Declarative(chart),
            Artifact::Text(text) => ResponseItem::Text(text),
        }
    }
}

/// One full turn: build the prompt from the uploaded tables, call the model,
/// and turn its reply into response items. Requires at least one table.
pub async fn process_request(
    client: &LlmClient,
    tables: &mut TableSet,
    question: &str,
    options: &RenderOptions,
) -> Result<Vec<ResponseItem>> {
    if tables.is_empty() {
        return Err(VizError::NoTables);
    }
    // date-named columns become real dates before the model ever sees the
    // dtype summary; the executor's retry covers what this pass misses
    tables.coerce_temporal_columns();
    let prompt = build_prompt(tables, question);
    debug!(chars = prompt.len(), "sending prompt");
    let completion = match client.complete(&prompt).await {
        Ok(completion) => completion,
        Err(e) => {
            warn!("model call failed: {}", e);
            return Ok(vec![ResponseItem::Text(format!("Error: {}", e))]);
        }
    };
    Ok(respond_to_completion(&completion, tables, options))
}

/// Turn a model reply into the ordered response sequence: analysis prose
/// first, then per block either its artifacts followed by the executed code,
/// or an error item. Blocks are independent.
pub fn respond_to_completion(
    completion: &str,
    tables: &mut TableSet,
    options: &RenderOptions,
) -> Vec<ResponseItem> {
    let split = split_response(completion);
    let mut items = Vec::new();
    if let Some(analysis) = split.analysis {
        items.push(ResponseItem::Text(analysis));
    }
    let names = tables.names();
    for block in &split.code_blocks {
        let code = rewrite_code(block, &names);
        match run_block(tables, &code, options) {
            Ok((artifact, prints)) => {
                if let Some(artifact) = artifact {
                    info!(kind = artifact.kind(), "code block produced artifact");
                    items.push(artifact.into());
                }
                if !prints.is_empty() {
                    items.push(ResponseItem::Text(format!("```\n{}\n```", prints.join("\n"))));
                }
                items.push(ResponseItem::Text(format!("```python\n{}\n```", code)));
            }
            Err(e) => {
                warn!("code block failed: {}", e);
                items.push(ResponseItem::Text(format!(
                    "Error executing code: {}\n\nCode attempted:\n```python\n{}\n```",
                    e, code
                )));
            }
        }
    }
    items
}

fn run_block(
    tables: &mut TableSet,
    code: &str,
    options: &RenderOptions,
) -> Result<(Option<Artifact>, Vec<String>)> {
    let mut ns = Executor::new(tables).run(code)?;
    let artifact = artifact::extract(&mut ns, options)?;
    Ok((artifact, ns.prints))
}
