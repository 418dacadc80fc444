use crate::config::LlmConfig;
use crate::llm::{LanguageModel, LlmError, PromptContext};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// OpenAI-compatible chat completions endpoint. The key is optional so
/// self-hosted gateways without auth work too.
pub struct RemoteLlmProvider {
    client: reqwest::Client,
    endpoint: String,
    bearer: Option<String>,
    model: String,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

impl RemoteLlmProvider {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let endpoint = config.api_url.clone().ok_or_else(|| {
            LlmError::ConfigError("api_url is required for the remote backend".to_string())
        })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| LlmError::ConnectionError(e.to_string()))?;

        Ok(Self {
            client,
            endpoint,
            bearer: config.api_key.clone(),
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl LanguageModel for RemoteLlmProvider {
    async fn generate(&self, prompt: &str, context: &PromptContext) -> Result<String, LlmError> {
        let body = CompletionRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &context.system,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: context.temperature,
            max_tokens: context.max_tokens,
        };

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.bearer {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| LlmError::ConnectionError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(LlmError::ResponseError(format!("{} returned {}", self.endpoint, status)));
        }

        let completion: CompletionResponse = response
            .json()
            .await
            .map_err(|e| LlmError::ResponseError(e.to_string()))?;

        let content = completion
            .choices
            .into_iter()
            .find_map(|choice| choice.message.content)
            .ok_or_else(|| LlmError::ResponseError("completion had no message content".to_string()))?;

        debug!("{} returned {} characters", self.model, content.len());
        Ok(content)
    }

    async fn ping(&self) -> Result<(), LlmError> {
        super::check_reachable(&self.client, &self.endpoint).await
    }

    fn name(&self) -> &str {
        "remote"
    }
}
