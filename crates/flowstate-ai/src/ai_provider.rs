use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::config::{AiConfig, AiProvider};
use crate::providers::{ollama::OllamaProvider, openai::OpenAiProvider};

/// Trait for AI providers
#[async_trait]
pub trait AiProviderTrait: Send + Sync {
    /// Generate text response for a given prompt
    async fn generate(&self, prompt: &str) -> Result<String>;

    /// Get the model name being used
    fn model_name(&self) -> &str;
}

/// Sampling settings shared by every provider
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationOptions {
    pub system_prompt: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl GenerationOptions {
    #[must_use]
    pub fn from_config(config: &AiConfig) -> Self {
        Self {
            system_prompt: None,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }

    #[must_use]
    pub fn with_system_prompt(mut self, system_prompt: &str) -> Self {
        self.system_prompt = Some(system_prompt.to_string());
        self
    }

    /// Chat messages for an OpenAI-style request body
    pub(crate) fn messages(&self, prompt: &str) -> serde_json::Value {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &self.system_prompt {
            messages.push(serde_json::json!({ "role": "system", "content": system }));
        }
        messages.push(serde_json::json!({ "role": "user", "content": prompt }));
        serde_json::Value::Array(messages)
    }
}

/// Create a provider instance based on configuration
///
/// # Errors
///
/// Returns an error if the API key is missing for providers that require one
/// (Groq, `OpenAI`).
pub fn create_provider(
    config: &AiConfig,
    options: GenerationOptions,
) -> Result<Box<dyn AiProviderTrait>> {
    let model = config.effective_model();
    let base_url = config.effective_base_url();

    match config.provider {
        AiProvider::Groq | AiProvider::OpenAi => {
            let api_key = config
                .effective_api_key()
                .with_context(|| format!("API Key required for {}", config.provider))?;
            Ok(Box::new(OpenAiProvider::new(
                &api_key,
                model,
                Some(base_url),
                options,
            )))
        }
        AiProvider::Ollama => Ok(Box::new(OllamaProvider::new(
            Some(base_url),
            model,
            options,
        ))),
    }
}
