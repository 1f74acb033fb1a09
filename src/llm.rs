//! Chat-completion client.
//!
//! Thin wrapper over an OpenAI-compatible `/chat/completions` endpoint with
//! bearer-token auth. One request per turn, no retry at this layer; transport
//! failures and non-2xx statuses surface as a single `VizError::Llm` carrying
//! the cause.

use crate::error::{Result, VizError};
use crate::prompt::SYSTEM_PROMPT;
use tracing::{debug, info};

pub const DEFAULT_BASE_URL: &str = "https://api.groq.com/openai/v1";
pub const DEFAULT_MODEL: &str = "llama3-70b-8192";

const TEMPERATURE: f64 = 0.3;
const MAX_TOKENS: u32 = 4096;

#[derive(Clone)]
pub struct LlmClient {
    api_key: String,
    base_url: String,
    model: String,
    http: reqwest::Client,
}

impl LlmClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            http: reqwest::Client::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Send the prompt and return the raw completion text.
    pub async fn complete(&self, prompt: &str) -> Result<String> {
        info!("Requesting completion from {} ({})", self.base_url, self.model);
        debug!("Prompt length: {} chars", prompt.len());

        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": prompt}
            ],
            "temperature": TEMPERATURE,
            "max_tokens": MAX_TOKENS
        });

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| VizError::Llm(format!("API request failed: {}", e)))?
            .error_for_status()
            .map_err(|e| VizError::Llm(format!("API request failed: {}", e)))?;

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| VizError::Llm(format!("failed to parse LLM response: {}", e)))?;

        payload["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| VizError::Llm("no content in LLM response".to_string()))
    }
}
