use crate::config::LlmConfig;
use crate::llm::{LanguageModel, LlmError, PromptContext};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};

const DEFAULT_API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";

/// Anthropic Messages API.
pub struct AnthropicProvider {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    system: &'a str,
    messages: Vec<Message<'a>>,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

impl AnthropicProvider {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var("ANTHROPIC_API_KEY").ok())
            .ok_or_else(|| {
                LlmError::ConfigError(
                    "API key is required for the anthropic provider (llm.api_key or ANTHROPIC_API_KEY)"
                        .to_string(),
                )
            })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| LlmError::ConnectionError(e.to_string()))?;

        Ok(Self {
            client,
            api_url: config
                .api_url
                .clone()
                .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            api_key,
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl LanguageModel for AnthropicProvider {
    async fn generate(&self, prompt: &str, context: &PromptContext) -> Result<String, LlmError> {
        let request = MessagesRequest {
            model: &self.model,
            max_tokens: context.max_tokens,
            temperature: context.temperature,
            system: &context.system,
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
        };

        let response = self
            .client
            .post(&self.api_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(|e| LlmError::ConnectionError(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("Anthropic API responded with status code: {} - {}", status, body);
            return Err(LlmError::ResponseError(format!(
                "Anthropic API responded with status code: {}",
                status
            )));
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| LlmError::ResponseError(e.to_string()))?;

        let text: String = parsed
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("\n");

        if text.trim().is_empty() {
            return Err(LlmError::ResponseError(
                "No text content in response".to_string(),
            ));
        }

        debug!("Anthropic returned {} characters", text.len());
        Ok(text)
    }

    async fn ping(&self) -> Result<(), LlmError> {
        super::check_reachable(&self.client, &self.api_url).await
    }

    fn name(&self) -> &str {
        "anthropic"
    }
}
