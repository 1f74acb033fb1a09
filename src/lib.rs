//! Conversational data-visualization assistant: upload tabular files, ask a
//! question in plain language, and get back prose, executed analysis code,
//! and rendered charts.
//!
//! A turn flows through [`pipeline::process_request`]: the uploaded tables
//! are summarized into a prompt, the model's reply is split into prose and
//! code blocks, each block is rewritten for date robustness and table
//! binding, executed in a sandboxed interpreter over polars frames, and the
//! resulting figures and tables are classified into response artifacts.

pub mod artifact;
pub mod chart;
pub mod error;
pub mod exec;
pub mod ingestion;
pub mod llm;
pub mod pipeline;
pub mod prompt;
pub mod response;
pub mod rewrite;
pub mod session;
pub mod table;

pub use error::{Result, VizError};
pub use pipeline::ResponseItem;
pub use session::Session;
