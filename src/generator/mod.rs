//! Content-generation capability.
//!
//! Free-text authoring and similarity scoring are delegated to an external
//! model, which answers every request with plain text. The rest of the crate only sees [`ContentGenerator`]; when no
//! credentials are configured the [`UnavailableGenerator`] stands in and every
//! dependent stage skips itself.

pub mod claude;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::SprintlineConfig;
use crate::errors::GeneratorError;

pub use claude::ClaudeGenerator;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Short label for logs, e.g. `"alignment"`.
    pub purpose: String,
    pub prompt: String,
    /// Extra material appended after the prompt.
    #[serde(default)]
    pub context: Vec<String>,
}

impl GenerationRequest {
    pub fn text(purpose: &str, prompt: impl Into<String>) -> Self {
        Self {
            purpose: purpose.to_string(),
            prompt: prompt.into(),
            context: Vec::new(),
        }
    }

    pub fn with_context(mut self, block: impl Into<String>) -> Self {
        self.context.push(block.into());
        self
    }

    /// Prompt and context joined into a single message.
    pub fn render(&self) -> String {
        let mut out = self.prompt.clone();
        for block in &self.context {
            out.push_str("\n\n");
            out.push_str(block);
        }
        out
    }
}

/// Abstraction over the content generator for testability.
/// Real implementation: `ClaudeGenerator`. Stand-in: `UnavailableGenerator`.
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    /// Checked once per cycle; an unavailable generator skips dependent stages.
    fn is_available(&self) -> bool;

    async fn generate(&self, request: &GenerationRequest) -> Result<String, GeneratorError>;
}

/// Generator used when no credentials are configured.
#[derive(Debug, Clone)]
pub struct UnavailableGenerator {
    reason: String,
}

impl UnavailableGenerator {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl ContentGenerator for UnavailableGenerator {
    fn is_available(&self) -> bool {
        false
    }

    async fn generate(&self, _request: &GenerationRequest) -> Result<String, GeneratorError> {
        Err(GeneratorError::Unavailable(self.reason.clone()))
    }
}

/// Claude when `ANTHROPIC_API_KEY` is set, otherwise unavailable.
pub fn from_config(config: &SprintlineConfig) -> Arc<dyn ContentGenerator> {
    match &config.credentials.anthropic_api_key {
        Some(key) => match ClaudeGenerator::new(key.clone(), &config.toml.generator) {
            Ok(generator) => Arc::new(generator),
            Err(e) => {
                tracing::warn!(error = %e, "Content generator disabled");
                Arc::new(UnavailableGenerator::new(e.to_string()))
            }
        },
        None => Arc::new(UnavailableGenerator::new("ANTHROPIC_API_KEY not set")),
    }
}

/// Replays canned answers in order; records every request it receives.
#[cfg(test)]
pub(crate) struct ScriptedGenerator {
    answers: std::sync::Mutex<std::collections::VecDeque<Result<String, GeneratorError>>>,
    pub requests: std::sync::Mutex<Vec<GenerationRequest>>,
}

#[cfg(test)]
impl ScriptedGenerator {
    pub fn new(answers: Vec<Result<String, GeneratorError>>) -> Self {
        Self {
            answers: std::sync::Mutex::new(answers.into()),
            requests: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[cfg(test)]
#[async_trait]
impl ContentGenerator for ScriptedGenerator {
    fn is_available(&self) -> bool {
        true
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, GeneratorError> {
        self.requests.lock().unwrap().push(request.clone());
        self.answers
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(GeneratorError::Failed("script exhausted".into())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unavailable_generator_reports_reason() {
        let generator = UnavailableGenerator::new("no key");
        assert!(!generator.is_available());
        let err = generator
            .generate(&GenerationRequest::text("test", "hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, GeneratorError::Unavailable(reason) if reason == "no key"));
    }

    #[test]
    fn missing_key_yields_unavailable_generator() {
        let config = SprintlineConfig::from_toml(Default::default());
        assert!(!from_config(&config).is_available());
    }

    #[test]
    fn render_appends_context_blocks() {
        let request = GenerationRequest::text("scoring", "Rate this")
            .with_context("Idea: faster checkout");
        assert_eq!(request.render(), "Rate this\n\nIdea: faster checkout");
    }
}
