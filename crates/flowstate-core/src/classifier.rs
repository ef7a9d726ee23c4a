use anyhow::{Context, Result};
use async_trait::async_trait;
use flowstate_ai::ContentVerdict;
use flowstate_storage::Classification;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::config::ClassifierConfig;

/// Where a verdict came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationSource {
    /// Remote (LLM) classifier answered in time
    Remote,
    /// Matched a user-defined rule
    UserRule,
    /// Built-in keyword lists
    Keyword,
}

impl std::fmt::Display for ClassificationSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Remote => write!(f, "remote"),
            Self::UserRule => write!(f, "user_rule"),
            Self::Keyword => write!(f, "keyword"),
        }
    }
}

/// A strategy for classifying a URL or window title
#[async_trait]
pub trait ContentClassifier: Send + Sync {
    async fn classify(&self, content_ref: &str, app: Option<&str>) -> Result<ContentVerdict>;

    fn name(&self) -> &'static str;
}

fn looks_like_url(content_ref: &str) -> bool {
    content_ref.contains("://") || (content_ref.contains('.') && !content_ref.contains(' '))
}

fn lowercase_all(words: &[String]) -> Vec<String> {
    words.iter().map(|w| w.to_lowercase()).collect()
}

/// Deterministic classifier.
///
/// Priority: user rules > productive keywords > distracting keywords > neutral
pub struct KeywordClassifier {
    rules: Vec<(Regex, Classification)>,
    productive_url: Vec<String>,
    distracting_url: Vec<String>,
    productive_app: Vec<String>,
    distracting_app: Vec<String>,
}

impl KeywordClassifier {
    /// Build from the `[classifier]` config section
    ///
    /// # Errors
    ///
    /// Returns an error if a rule pattern is not a valid regex
    pub fn from_config(config: &ClassifierConfig) -> Result<Self> {
        let rules = config
            .rules
            .iter()
            .map(|rule| {
                Regex::new(&rule.pattern)
                    .map(|re| (re, rule.classification))
                    .with_context(|| format!("Invalid classifier rule pattern: {}", rule.pattern))
            })
            .collect::<Result<Vec<_>>>()?;
        log::info!("Loaded {} user classification rules", rules.len());

        Ok(Self {
            rules,
            productive_url: lowercase_all(&config.productive_url_keywords),
            distracting_url: lowercase_all(&config.distracting_url_keywords),
            productive_app: lowercase_all(&config.productive_app_keywords),
            distracting_app: lowercase_all(&config.distracting_app_keywords),
        })
    }

    /// Classify with the source that decided it
    #[must_use]
    pub fn classify_full(
        &self,
        content_ref: &str,
        app: Option<&str>,
    ) -> (ContentVerdict, ClassificationSource) {
        // 1. User rules (highest priority)
        for (re, classification) in &self.rules {
            if re.is_match(content_ref) || app.is_some_and(|a| re.is_match(a)) {
                log::debug!("Matched user rule '{}' -> {classification}", re.as_str());
                return (
                    ContentVerdict {
                        classification: *classification,
                        confidence: 0.9,
                        reasoning: format!("Matched rule '{}'", re.as_str()),
                    },
                    ClassificationSource::UserRule,
                );
            }
        }

        // 2. Keyword lists, productive first
        let (haystack, productive, distracting) = if looks_like_url(content_ref) {
            (
                content_ref.to_lowercase(),
                &self.productive_url,
                &self.distracting_url,
            )
        } else {
            (
                format!("{} {}", app.unwrap_or_default(), content_ref).to_lowercase(),
                &self.productive_app,
                &self.distracting_app,
            )
        };

        let found = |words: &[String]| {
            words
                .iter()
                .find(|w| haystack.contains(w.as_str()))
                .cloned()
        };
        let verdict = if let Some(word) = found(productive) {
            ContentVerdict {
                classification: Classification::Productive,
                confidence: 0.7,
                reasoning: format!("Contains productive keyword '{word}'"),
            }
        } else if let Some(word) = found(distracting) {
            ContentVerdict {
                classification: Classification::Distracting,
                confidence: 0.8,
                reasoning: format!("Contains distracting keyword '{word}'"),
            }
        } else {
            ContentVerdict {
                classification: Classification::Neutral,
                confidence: 0.5,
                reasoning: String::from("No clear indicators"),
            }
        };
        (verdict, ClassificationSource::Keyword)
    }
}

#[async_trait]
impl ContentClassifier for KeywordClassifier {
    async fn classify(&self, content_ref: &str, app: Option<&str>) -> Result<ContentVerdict> {
        Ok(self.classify_full(content_ref, app).0)
    }

    fn name(&self) -> &'static str {
        "keyword"
    }
}

/// Remote classifier bounded by a timeout, with the keyword classifier behind it.
///
/// User rules always win over the remote answer. Never fails.
pub struct ResilientClassifier {
    remote: Option<Arc<dyn ContentClassifier>>,
    fallback: KeywordClassifier,
    timeout: Duration,
}

impl ResilientClassifier {
    #[must_use]
    pub fn new(
        remote: Option<Arc<dyn ContentClassifier>>,
        fallback: KeywordClassifier,
        timeout: Duration,
    ) -> Self {
        Self {
            remote,
            fallback,
            timeout,
        }
    }

    /// Keyword-only classifier
    #[must_use]
    pub fn offline(fallback: KeywordClassifier) -> Self {
        Self::new(None, fallback, Duration::ZERO)
    }

    pub async fn classify(
        &self,
        content_ref: &str,
        app: Option<&str>,
    ) -> (ContentVerdict, ClassificationSource) {
        let local = self.fallback.classify_full(content_ref, app);
        if local.1 == ClassificationSource::UserRule {
            return local;
        }

        let Some(remote) = &self.remote else {
            return local;
        };

        match tokio::time::timeout(self.timeout, remote.classify(content_ref, app)).await {
            Ok(Ok(verdict)) => (verdict, ClassificationSource::Remote),
            Ok(Err(e)) => {
                log::warn!("{} classifier failed: {e:#}. Using fallback.", remote.name());
                local
            }
            Err(_) => {
                log::warn!(
                    "{} classifier timed out after {:?}. Using fallback.",
                    remote.name(),
                    self.timeout
                );
                local
            }
        }
    }
}

#[cfg(test)]
mod tests;
