//! Remote classifier configuration (the `[ai]` section of `config.toml`)

use serde::{Deserialize, Serialize};

/// Supported LLM backends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AiProvider {
    /// Groq's OpenAI-compatible endpoint
    #[default]
    Groq,
    OpenAi,
    /// Local Ollama server, no key required
    Ollama,
}

impl AiProvider {
    /// Parse a provider name, accepting a few common spellings
    #[must_use]
    pub fn parse_provider(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "groq" => Some(Self::Groq),
            "openai" | "open_ai" | "open-ai" => Some(Self::OpenAi),
            "ollama" => Some(Self::Ollama),
            _ => None,
        }
    }

    #[must_use]
    pub const fn default_model(self) -> &'static str {
        match self {
            Self::Groq => "llama-3.1-8b-instant",
            Self::OpenAi => "gpt-4o-mini",
            Self::Ollama => "llama3.1",
        }
    }

    #[must_use]
    pub const fn default_base_url(self) -> &'static str {
        match self {
            Self::Groq => "https://api.groq.com/openai/v1",
            Self::OpenAi => "https://api.openai.com/v1",
            Self::Ollama => "http://localhost:11434",
        }
    }

    /// Environment variable consulted when no key is configured
    #[must_use]
    pub const fn api_key_env(self) -> Option<&'static str> {
        match self {
            Self::Groq => Some("GROQ_API_KEY"),
            Self::OpenAi => Some("OPENAI_API_KEY"),
            Self::Ollama => None,
        }
    }
}

impl std::fmt::Display for AiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Groq => write!(f, "groq"),
            Self::OpenAi => write!(f, "openai"),
            Self::Ollama => write!(f, "ollama"),
        }
    }
}

/// AI configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    pub provider: AiProvider,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub enabled: bool,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            provider: AiProvider::default(),
            model: None,
            api_key: None,
            base_url: None,
            enabled: true,
            temperature: 0.3,
            max_tokens: 150,
        }
    }
}

impl AiConfig {
    #[must_use]
    pub fn effective_model(&self) -> &str {
        self.model
            .as_deref()
            .unwrap_or_else(|| self.provider.default_model())
    }

    #[must_use]
    pub fn effective_base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .unwrap_or_else(|| self.provider.default_base_url())
    }

    /// Configured key, falling back to the provider's environment variable
    #[must_use]
    pub fn effective_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .or_else(|| {
                self.provider
                    .api_key_env()
                    .and_then(|var| std::env::var(var).ok())
                    .filter(|key| !key.trim().is_empty())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_target_groq() {
        let config = AiConfig::default();
        assert_eq!(config.effective_model(), "llama-3.1-8b-instant");
        assert_eq!(config.effective_base_url(), "https://api.groq.com/openai/v1");
    }

    #[test]
    fn test_explicit_values_win() {
        let config = AiConfig {
            provider: AiProvider::Ollama,
            model: Some(String::from("qwen2")),
            base_url: Some(String::from("http://gpu-box:11434")),
            ..AiConfig::default()
        };
        assert_eq!(config.effective_model(), "qwen2");
        assert_eq!(config.effective_base_url(), "http://gpu-box:11434");
        assert_eq!(config.effective_api_key(), None);
    }

    #[test]
    fn test_parse_provider() {
        assert_eq!(AiProvider::parse_provider("Groq"), Some(AiProvider::Groq));
        assert_eq!(AiProvider::parse_provider("open-ai"), Some(AiProvider::OpenAi));
        assert_eq!(AiProvider::parse_provider("claude"), None);
    }
}
