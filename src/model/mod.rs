mod error;

pub use error::CompletionError;

use async_trait::async_trait;
use log::{debug, info};
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;

use crate::config::OpenAiConfig;
use crate::web::models::Message;

/// A single-shot text completion: send role-tagged messages, get one reply.
#[async_trait]
pub trait ChatCompletion: Send + Sync {
    /// Returns the reply text, or an empty string when the provider sent no
    /// content.
    async fn complete(&self, messages: &[Message]) -> Result<String, CompletionError>;
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: &'a [Message],
}

// A wrapper for the OpenAI chat completions API
pub struct OpenAiModel {
    config: OpenAiConfig,
    client: Client,
}

impl OpenAiModel {
    pub fn new(config: OpenAiConfig) -> anyhow::Result<Self> {
        info!(
            "Using model {} at {} (credential {})",
            config.model,
            config.base_url,
            if config.api_key.is_some() { "present" } else { "missing" }
        );

        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl ChatCompletion for OpenAiModel {
    async fn complete(&self, messages: &[Message]) -> Result<String, CompletionError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or(CompletionError::MissingCredential)?;

        let url = format!("{}/chat/completions", self.config.base_url);
        let payload = ChatCompletionRequest {
            model: &self.config.model,
            temperature: self.config.temperature,
            messages,
        };

        debug!("Sending {} messages to {}", messages.len(), url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(CompletionError::from_response(status, &error_text));
        }

        let response_json: Value = response.json().await?;
        debug!("Response JSON: {}", response_json);

        let content = response_json
            .get("choices")
            .and_then(|choices| choices.get(0))
            .and_then(|choice| choice.get("message"))
            .and_then(|message| message.get("content"))
            .and_then(|content| content.as_str())
            .unwrap_or_default();

        Ok(content.trim().to_string())
    }
}
