pub mod prompts;
pub mod providers;

use crate::config::LlmConfig;
use async_trait::async_trait;
use std::error::Error;
use std::fmt;
use tracing::info;

#[derive(Debug)]
pub enum LlmError {
    ConnectionError(String),
    ResponseError(String),
    ConfigError(String),
}

impl fmt::Display for LlmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LlmError::ConnectionError(msg) => write!(f, "LLM connection error: {}", msg),
            LlmError::ResponseError(msg) => write!(f, "LLM response error: {}", msg),
            LlmError::ConfigError(msg) => write!(f, "LLM configuration error: {}", msg),
        }
    }
}

impl Error for LlmError {}

/// Per-call settings that travel with a prompt.
#[derive(Debug, Clone)]
pub struct PromptContext {
    pub system: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// The external language-model collaborator. Its output is untrusted text.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate(&self, prompt: &str, context: &PromptContext) -> Result<String, LlmError>;

    /// Reachability check used by the health route.
    async fn ping(&self) -> Result<(), LlmError> {
        Ok(())
    }

    fn name(&self) -> &str;
}

pub struct LlmManager {
    model: Box<dyn LanguageModel>,
    temperature: f32,
    max_tokens: u32,
}

impl LlmManager {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let model: Box<dyn LanguageModel> = match config.backend.as_str() {
            "anthropic" => Box::new(providers::anthropic::AnthropicProvider::new(config)?),
            "remote" => Box::new(providers::remote::RemoteLlmProvider::new(config)?),
            "ollama" => Box::new(providers::ollama::OllamaProvider::new(config)?),
            _ => {
                return Err(LlmError::ConfigError(format!(
                    "Unsupported LLM backend: {}",
                    config.backend
                )))
            }
        };

        info!("Using LLM provider {} with model {}", model.name(), config.model);

        Ok(Self {
            model,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    /// Wraps an already-built model, e.g. a scripted one.
    pub fn with_model(model: Box<dyn LanguageModel>) -> Self {
        Self {
            model,
            temperature: 0.0,
            max_tokens: 2000,
        }
    }

    pub fn context(&self, system: &str) -> PromptContext {
        PromptContext {
            system: system.to_string(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }

    pub async fn generate(&self, prompt: &str, context: &PromptContext) -> Result<String, LlmError> {
        self.model.generate(prompt, context).await
    }

    pub async fn ping(&self) -> Result<(), LlmError> {
        self.model.ping().await
    }

    pub fn model_name(&self) -> &str {
        self.model.name()
    }
}
