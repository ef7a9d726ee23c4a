use anyhow::Result;
use async_trait::async_trait;
use flowstate_ai::{AiService, ContentVerdict};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::classifier::ContentClassifier;

const DEFAULT_CACHE_SIZE: NonZeroUsize = match NonZeroUsize::new(100) {
    Some(v) => v,
    None => unreachable!(),
};

/// Cache key: content reference plus the application showing it
type CacheKey = (String, Option<String>);

/// Remote LLM classifier with an LRU cache in front of it
pub struct AiClassifier {
    ai_service: Arc<AiService>,
    cache: RwLock<LruCache<CacheKey, ContentVerdict>>,
}

impl AiClassifier {
    #[must_use]
    pub fn new(ai_service: Arc<AiService>, cache_size: usize) -> Self {
        let cache_size = NonZeroUsize::new(cache_size).unwrap_or(DEFAULT_CACHE_SIZE);
        Self {
            ai_service,
            cache: RwLock::new(LruCache::new(cache_size)),
        }
    }
}

#[async_trait]
impl ContentClassifier for AiClassifier {
    async fn classify(&self, content_ref: &str, app: Option<&str>) -> Result<ContentVerdict> {
        let key = (content_ref.to_string(), app.map(ToString::to_string));

        {
            let mut cache = self.cache.write().await;
            if let Some(cached) = cache.get(&key) {
                return Ok(cached.clone());
            }
        }

        let verdict = self.ai_service.classify_content(content_ref, app).await?;

        self.cache.write().await.put(key, verdict.clone());
        Ok(verdict)
    }

    fn name(&self) -> &'static str {
        "ai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowstate_ai::{AiConfig, AiProviderTrait};
    use flowstate_storage::Classification;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProvider {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl AiProviderTrait for CountingProvider {
        async fn generate(&self, _prompt: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(String::from(
                r#"{"classification": "distracting", "confidence": 0.9, "reasoning": "feed"}"#,
            ))
        }

        fn model_name(&self) -> &str {
            "counting"
        }
    }

    #[tokio::test]
    async fn test_repeat_lookups_hit_cache() {
        let calls = Arc::new(AtomicUsize::new(0));
        let service = AiService::with_provider(
            Box::new(CountingProvider {
                calls: calls.clone(),
            }),
            AiConfig::default(),
        );
        let classifier = AiClassifier::new(Arc::new(service), 8);

        for _ in 0..3 {
            let verdict = classifier
                .classify("https://news.ycombinator.com", None)
                .await
                .unwrap();
            assert_eq!(verdict.classification, Classification::Distracting);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        classifier
            .classify("https://news.ycombinator.com", Some("firefox"))
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
