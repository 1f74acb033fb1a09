use thiserror::Error;

#[derive(Error, Debug)]
pub enum VizError {
    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Ingestion error: {0}")]
    Ingestion(String),

    // execution errors surface verbatim in chat, keep them unprefixed
    #[error("{0}")]
    Execution(String),

    #[error("Render error: {0}")]
    Render(String),

    #[error("No API credential provided")]
    MissingCredential,

    #[error("No uploaded tables")]
    NoTables,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),
}

pub type Result<T> = std::result::Result<T, VizError>;
