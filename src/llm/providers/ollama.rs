use crate::config::LlmConfig;
use crate::llm::{LanguageModel, LlmError, PromptContext};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info};

pub struct OllamaProvider {
    client: reqwest::Client,
    api_url: String,
    model: String,
}

#[derive(Serialize, Debug)]
struct OllamaRequest {
    model: String,
    prompt: String,
    system: String,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize, Debug)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Deserialize, Debug)]
struct OllamaResponse {
    response: String,
    #[serde(default)]
    done: Option<bool>,
}

impl OllamaProvider {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_url = config
            .api_url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434/api/generate".to_string());

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| LlmError::ConnectionError(e.to_string()))?;

        Ok(Self {
            client,
            api_url,
            model: config.model.clone(),
        })
    }

    // The tags endpoint lives next to /api/generate
    fn tags_url(&self) -> String {
        match self.api_url.rfind("/api/") {
            Some(idx) => format!("{}/api/tags", &self.api_url[..idx]),
            None => format!("{}/api/tags", self.api_url.trim_end_matches('/')),
        }
    }
}

#[async_trait]
impl LanguageModel for OllamaProvider {
    async fn generate(&self, prompt: &str, context: &PromptContext) -> Result<String, LlmError> {
        info!("Sending request to Ollama with model: {}", self.model);
        debug!("API URL: {}", self.api_url);

        let request = OllamaRequest {
            model: self.model.clone(),
            prompt: prompt.to_string(),
            system: context.system.clone(),
            stream: false,
            options: OllamaOptions {
                temperature: context.temperature,
                num_predict: context.max_tokens,
            },
        };

        debug!("Sending request to Ollama: {:?}", request);

        let response = self
            .client
            .post(&self.api_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| LlmError::ConnectionError(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_body = match response.text().await {
                Ok(body) => format!(" - Response body: {}", body),
                Err(_) => String::new(),
            };

            error!("Ollama API responded with status code: {}{}", status, error_body);
            return Err(LlmError::ResponseError(format!(
                "Ollama API responded with status code: {}{}",
                status, error_body
            )));
        }

        // Raw text first, for diagnostics
        let response_text = response
            .text()
            .await
            .map_err(|e| LlmError::ResponseError(format!("Failed to read response body: {}", e)))?;

        debug!("Raw response from Ollama: {}", response_text);

        let ollama_response = serde_json::from_str::<OllamaResponse>(&response_text).map_err(|e| {
            error!("Failed to parse Ollama response: {} - Response was: {}", e, response_text);
            LlmError::ResponseError(format!(
                "Failed to parse Ollama response: {} - Response was: {}",
                e, response_text
            ))
        })?;

        if ollama_response.done == Some(false) {
            return Err(LlmError::ResponseError(
                "Ollama returned an incomplete response".to_string(),
            ));
        }

        Ok(ollama_response.response)
    }

    async fn ping(&self) -> Result<(), LlmError> {
        let response = self
            .client
            .get(self.tags_url())
            .send()
            .await
            .map_err(|e| LlmError::ConnectionError(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(LlmError::ResponseError(format!(
                "Ollama tags endpoint responded with status code: {}",
                response.status()
            )))
        }
    }

    fn name(&self) -> &str {
        "ollama"
    }
}
