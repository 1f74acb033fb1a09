//! Conversation state: uploaded tables, the chat transcript, and the model
//! client. Tables persist across turns, including any temporal coercion a
//! failed date parse triggered along the way.

use std::env;

use tracing::info;

use crate::chart::RenderOptions;
use crate::error::{Result, VizError};
use crate::ingestion::parse_upload;
use crate::llm::LlmClient;
use crate::pipeline::{process_request, ResponseItem};
use crate::table::TableSet;

pub const API_KEY_VAR: &str = "GROQ_API_KEY";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: Role,
    pub item: ResponseItem,
}

pub struct Session {
    pub tables: TableSet,
    messages: Vec<ChatMessage>,
    client: LlmClient,
    options: RenderOptions,
}

impl Session {
    pub fn new(client: LlmClient) -> Self {
        Self {
            tables: TableSet::new(),
            messages: Vec::new(),
            client,
            options: RenderOptions::default(),
        }
    }

    /// Build a session from `GROQ_API_KEY`.
    pub fn from_env() -> Result<Self> {
        let api_key = env::var(API_KEY_VAR).map_err(|_| VizError::MissingCredential)?;
        if api_key.trim().is_empty() {
            return Err(VizError::MissingCredential);
        }
        Ok(Self::new(LlmClient::new(api_key)))
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Parse and store one uploaded file, returning a short confirmation.
    pub fn upload(&mut self, name: &str, bytes: &[u8], extension: &str) -> Result<String> {
        let table = parse_upload(name, bytes, extension)?;
        let summary = format!(
            "Loaded {}: {} rows x {} columns",
            table.name,
            table.data.height(),
            table.data.width()
        );
        info!(table = %table.name, "stored uploaded table");
        self.tables.insert(table);
        Ok(summary)
    }

    /// Drop all tables and the transcript.
    pub fn clear(&mut self) {
        self.tables.clear();
        self.messages.clear();
    }

    /// One question-and-answer turn. The returned slice is the assistant's
    /// portion of this turn, already appended to the transcript.
    pub async fn ask(&mut self, question: &str) -> Result<&[ChatMessage]> {
        // prerequisite failures must leave the transcript untouched
        if self.tables.is_empty() {
            return Err(VizError::NoTables);
        }
        self.messages.push(ChatMessage {
            role: Role::User,
            item: ResponseItem::Text(question.to_string()),
        });
        let items =
            process_request(&self.client, &mut self.tables, question, &self.options).await?;
        let start = self.messages.len();
        for item in items {
            self.messages.push(ChatMessage {
                role: Role::Assistant,
                item,
            });
        }
        Ok(&self.messages[start..])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ask_without_tables_leaves_transcript_empty() {
        let mut session = Session::new(LlmClient::new("test-key"));
        let err = session.ask("show monthly totals").await.unwrap_err();
        assert!(matches!(err, VizError::NoTables));
        assert!(session.messages().is_empty());
    }

    #[test]
    fn upload_reports_shape() {
        let mut session = Session::new(LlmClient::new("test-key"));
        let summary = session
            .upload("sales.csv", b"region,sales\nEast,10\nWest,20\n", "csv")
            .unwrap();
        assert_eq!(summary, "Loaded sales.csv: 2 rows x 2 columns");
    }
}
