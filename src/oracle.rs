//! Text-completion oracle used by the alternative extraction strategy.

use crate::config::Config;
use crate::error::{AppError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

/// Black-box `prompt -> answer` capability.
#[async_trait]
pub(crate) trait CompletionOracle: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Oracle backed by an OpenAI-compatible `/chat/completions` endpoint.
pub(crate) struct OpenAiOracle {
    http_client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl OpenAiOracle {
    pub(crate) fn from_config(config: &Config) -> Result<Self> {
        let api_key = config
            .oracle_api_key
            .clone()
            .ok_or_else(|| AppError::Config("Missing API key for completion oracle".to_string()))?;

        let http_client = Client::builder()
            .timeout(config.request_timeout * 3)
            .build()
            .map_err(|e| {
                AppError::Generic(anyhow::anyhow!("Failed to build oracle HTTP client: {}", e))
            })?;

        Ok(Self {
            http_client,
            endpoint: format!(
                "{}/chat/completions",
                config.oracle_api_base.trim_end_matches('/')
            ),
            api_key,
            model: config.oracle_model.clone(),
            max_tokens: config.oracle_max_tokens,
        })
    }
}

#[async_trait]
impl CompletionOracle for OpenAiOracle {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let body = json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": 0.3,
            "top_p": 0.9,
            "max_tokens": self.max_tokens,
        });

        let response = self
            .http_client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Oracle(format!(
                "Completion endpoint returned {}",
                status
            )));
        }

        let text = response.text().await?;
        let parsed: ChatResponse = serde_json::from_str(&text)?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .ok_or_else(|| AppError::Oracle("Completion response had no choices".to_string()))
    }
}
