use anyhow::{Context, Result};
use flowstate_storage::Classification;
use serde::{Deserialize, Serialize};

use crate::ai_provider::{create_provider, AiProviderTrait, GenerationOptions};
use crate::config::AiConfig;

const SYSTEM_PROMPT: &str = "You are a productivity assistant that classifies URLs and apps \
as productive or distracting. Always respond in valid JSON format.";

/// Classifier answer for one piece of content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentVerdict {
    pub classification: Classification,
    pub confidence: f64,
    pub reasoning: String,
}

/// Unified AI Service
///
/// Wraps the configured provider and turns content references into
/// productive / distracting verdicts.
pub struct AiService {
    provider: Box<dyn AiProviderTrait>,
    config: AiConfig,
}

impl AiService {
    /// Create a new AI service from configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the provider cannot be built (e.g. missing API key)
    pub fn new(config: AiConfig) -> Result<Self> {
        let options = GenerationOptions::from_config(&config).with_system_prompt(SYSTEM_PROMPT);
        let provider = create_provider(&config, options)?;
        Ok(Self { provider, config })
    }

    /// Create a service around an already built provider
    #[must_use]
    pub fn with_provider(provider: Box<dyn AiProviderTrait>, config: AiConfig) -> Self {
        Self { provider, config }
    }

    /// Get the model name in use
    #[must_use]
    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    /// Classify a URL or window title for a user in deep work mode
    ///
    /// # Errors
    ///
    /// Returns an error if the provider call fails or the answer is not the
    /// expected JSON object
    pub async fn classify_content(
        &self,
        content_ref: &str,
        app: Option<&str>,
    ) -> Result<ContentVerdict> {
        let prompt = build_classification_prompt(content_ref, app);
        let response = self.provider.generate(&prompt).await?;
        let verdict = parse_classification_response(&response)?;
        log::debug!(
            "{} classified {content_ref} as {} ({:.2})",
            self.model_name(),
            verdict.classification,
            verdict.confidence
        );
        Ok(verdict)
    }
}

fn looks_like_url(content_ref: &str) -> bool {
    content_ref.contains("://") || (content_ref.contains('.') && !content_ref.contains(' '))
}

fn build_classification_prompt(content_ref: &str, app: Option<&str>) -> String {
    let (subject, details, considerations) = if looks_like_url(content_ref) {
        (
            "URL",
            format!("URL: {content_ref}"),
            "- Is this URL related to work, learning, or research? (productive)\n\
             - Is this URL related to entertainment, social media, or procrastination? (distracting)\n\
             - Context matters: YouTube can be productive (tutorials) or distracting (entertainment)",
        )
    } else {
        (
            "application",
            format!(
                "Application: {}\nWindow Title: {content_ref}",
                app.unwrap_or("unknown")
            ),
            "- Is this app used for work, coding, writing, or learning? (productive)\n\
             - Is this app used for entertainment, gaming, or social media? (distracting)\n\
             - Window title provides context about current activity",
        )
    };

    format!(
        "Classify this {subject} as either \"productive\" or \"distracting\" \
         for a user in deep work mode.\n\
         \n\
         {details}\n\
         \n\
         Consider:\n\
         {considerations}\n\
         \n\
         Respond in JSON format:\n\
         {{\n  \"classification\": \"productive\" or \"distracting\",\n  \
         \"confidence\": 0.0-1.0,\n  \"reasoning\": \"brief explanation\"\n}}"
    )
}

fn parse_classification_response(response: &str) -> Result<ContentVerdict> {
    // Clean up response if it contains markdown code blocks
    let clean = response
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    let json: serde_json::Value = serde_json::from_str(clean)
        .with_context(|| format!("Failed to parse JSON from AI response: {response}"))?;

    let classification = json["classification"]
        .as_str()
        .context("JSON missing classification field")?
        .parse::<Classification>()
        .map_err(anyhow::Error::msg)?;

    Ok(ContentVerdict {
        classification,
        confidence: json["confidence"].as_f64().unwrap_or(0.5).clamp(0.0, 1.0),
        reasoning: json["reasoning"].as_str().unwrap_or_default().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct CannedProvider(&'static str);

    #[async_trait]
    impl AiProviderTrait for CannedProvider {
        async fn generate(&self, _prompt: &str) -> Result<String> {
            Ok(self.0.to_string())
        }

        fn model_name(&self) -> &str {
            "canned"
        }
    }

    #[test]
    fn test_parse_plain_json() {
        let verdict = parse_classification_response(
            r#"{"classification": "distracting", "confidence": 0.92, "reasoning": "short-form video"}"#,
        )
        .unwrap();
        assert_eq!(verdict.classification, Classification::Distracting);
        assert!((verdict.confidence - 0.92).abs() < 1e-9);
        assert_eq!(verdict.reasoning, "short-form video");
    }

    #[test]
    fn test_parse_fenced_json() {
        let verdict = parse_classification_response(
            "```json\n{\"classification\": \"Productive\", \"confidence\": 3.0}\n```",
        )
        .unwrap();
        assert_eq!(verdict.classification, Classification::Productive);
        assert!((verdict.confidence - 1.0).abs() < f64::EPSILON);
        assert!(verdict.reasoning.is_empty());
    }

    #[test]
    fn test_parse_rejects_unknown_label() {
        assert!(parse_classification_response(r#"{"classification": "maybe"}"#).is_err());
        assert!(parse_classification_response("I think it is productive").is_err());
    }

    #[test]
    fn test_prompt_shape_depends_on_content() {
        let url_prompt = build_classification_prompt("https://docs.rs/tokio", None);
        assert!(url_prompt.contains("URL: https://docs.rs/tokio"));

        let app_prompt = build_classification_prompt("Untitled - Notepad", Some("notepad.exe"));
        assert!(app_prompt.contains("Application: notepad.exe"));
        assert!(app_prompt.contains("Window Title: Untitled - Notepad"));
    }

    #[tokio::test]
    async fn test_classify_content_uses_provider() {
        let service = AiService::with_provider(
            Box::new(CannedProvider(
                r#"{"classification": "productive", "confidence": 0.8, "reasoning": "docs"}"#,
            )),
            AiConfig::default(),
        );
        let verdict = service
            .classify_content("https://doc.rust-lang.org/book/", None)
            .await
            .unwrap();
        assert_eq!(verdict.classification, Classification::Productive);
        assert_eq!(service.model_name(), "canned");
    }
}
