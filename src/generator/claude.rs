use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::{ContentGenerator, GenerationRequest};
use crate::config::GeneratorSection;
use crate::errors::GeneratorError;
use crate::util::truncate;

const MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";

/// Anthropic Messages API client.
pub struct ClaudeGenerator {
    client: reqwest::Client,
    api_key: String,
    model: String,
    max_tokens: u32,
    endpoint: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

impl ClaudeGenerator {
    pub fn new(api_key: String, section: &GeneratorSection) -> Result<Self, GeneratorError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(section.timeout_secs))
            .build()
            .map_err(|e| GeneratorError::Unavailable(format!("HTTP client: {}", e)))?;
        Ok(Self {
            client,
            api_key,
            model: section.model.clone(),
            max_tokens: section.max_tokens,
            endpoint: MESSAGES_URL.to_string(),
        })
    }

    async fn complete(&self, prompt: &str) -> Result<String, GeneratorError> {
        let body = json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "messages": [{ "role": "user", "content": prompt }],
        });
        let response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| GeneratorError::Failed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(GeneratorError::Failed(format!(
                "HTTP {}: {}",
                status.as_u16(),
                truncate(&text, 300)
            )));
        }
        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| GeneratorError::Unparsable(e.to_string()))?;
        let text: String = parsed
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .map(|block| block.text)
            .collect::<Vec<_>>()
            .join("");
        if text.trim().is_empty() {
            return Err(GeneratorError::Unparsable("empty completion".into()));
        }
        Ok(text)
    }
}

#[async_trait]
impl ContentGenerator for ClaudeGenerator {
    fn is_available(&self) -> bool {
        true
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, GeneratorError> {
        tracing::debug!(purpose = %request.purpose, model = %self.model, "Calling content generator");
        self.complete(&request.render()).await
    }
}
