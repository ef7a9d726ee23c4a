use super::*;
use crate::config::ClassificationRule;
use std::time::Instant;

struct SlowClassifier;

#[async_trait]
impl ContentClassifier for SlowClassifier {
    async fn classify(&self, _content_ref: &str, _app: Option<&str>) -> Result<ContentVerdict> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(ContentVerdict {
            classification: Classification::Productive,
            confidence: 1.0,
            reasoning: String::from("too late"),
        })
    }

    fn name(&self) -> &'static str {
        "slow"
    }
}

struct BrokenClassifier;

#[async_trait]
impl ContentClassifier for BrokenClassifier {
    async fn classify(&self, _content_ref: &str, _app: Option<&str>) -> Result<ContentVerdict> {
        anyhow::bail!("API key rejected")
    }

    fn name(&self) -> &'static str {
        "broken"
    }
}

struct FixedClassifier(Classification);

#[async_trait]
impl ContentClassifier for FixedClassifier {
    async fn classify(&self, _content_ref: &str, _app: Option<&str>) -> Result<ContentVerdict> {
        Ok(ContentVerdict {
            classification: self.0,
            confidence: 0.95,
            reasoning: String::from("remote says so"),
        })
    }

    fn name(&self) -> &'static str {
        "fixed"
    }
}

fn keywords() -> KeywordClassifier {
    KeywordClassifier::from_config(&ClassifierConfig::default()).unwrap()
}

#[test]
fn test_url_keywords() {
    let classifier = keywords();
    let (verdict, source) = classifier.classify_full("https://www.tiktok.com/@someone", None);
    assert_eq!(verdict.classification, Classification::Distracting);
    assert!((verdict.confidence - 0.8).abs() < f64::EPSILON);
    assert_eq!(source, ClassificationSource::Keyword);

    let (verdict, _) = classifier.classify_full("https://stackoverflow.com/questions/1", None);
    assert_eq!(verdict.classification, Classification::Productive);
    assert!((verdict.confidence - 0.7).abs() < f64::EPSILON);
}

#[test]
fn test_productive_keywords_checked_first() {
    let (verdict, _) = keywords().classify_full("https://www.reddit.com/r/learnrust", None);
    assert_eq!(verdict.classification, Classification::Productive);
}

#[test]
fn test_app_keywords_use_app_and_title() {
    let classifier = keywords();
    let (verdict, _) = classifier.classify_full("Friends - Voice Connected", Some("Discord"));
    assert_eq!(verdict.classification, Classification::Distracting);

    let (verdict, _) = classifier.classify_full("main.rs - flowstate", Some("VSCode"));
    assert_eq!(verdict.classification, Classification::Productive);
}

#[test]
fn test_no_indicators_is_neutral() {
    let (verdict, _) = keywords().classify_full("https://example.org", None);
    assert_eq!(verdict.classification, Classification::Neutral);
    assert!((verdict.confidence - 0.5).abs() < f64::EPSILON);
    assert_eq!(verdict.reasoning, "No clear indicators");
}

#[test]
fn test_user_rules_win() {
    let config = ClassifierConfig {
        rules: vec![ClassificationRule {
            pattern: String::from(r"(?i)github\.com/trending"),
            classification: Classification::Distracting,
        }],
        ..ClassifierConfig::default()
    };
    let classifier = KeywordClassifier::from_config(&config).unwrap();
    let (verdict, source) = classifier.classify_full("https://GitHub.com/trending", None);
    assert_eq!(verdict.classification, Classification::Distracting);
    assert_eq!(source, ClassificationSource::UserRule);
}

#[tokio::test]
async fn test_timeout_falls_back_to_keywords() {
    let classifier = ResilientClassifier::new(
        Some(Arc::new(SlowClassifier)),
        keywords(),
        Duration::from_millis(50),
    );
    let started = Instant::now();
    let (verdict, source) = classifier.classify("https://twitch.tv/streamer", None).await;
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(source, ClassificationSource::Keyword);
    assert_eq!(verdict.classification, Classification::Distracting);
}

#[tokio::test]
async fn test_error_falls_back_to_keywords() {
    let classifier = ResilientClassifier::new(
        Some(Arc::new(BrokenClassifier)),
        keywords(),
        Duration::from_secs(1),
    );
    let (verdict, source) = classifier.classify("https://netflix.com", None).await;
    assert_eq!(source, ClassificationSource::Keyword);
    assert_eq!(verdict.classification, Classification::Distracting);
}

#[tokio::test]
async fn test_remote_answer_used_when_in_time() {
    let classifier = ResilientClassifier::new(
        Some(Arc::new(FixedClassifier(Classification::Productive))),
        keywords(),
        Duration::from_secs(1),
    );
    let (verdict, source) = classifier
        .classify("https://youtube.com/watch?v=rust-tutorial", None)
        .await;
    assert_eq!(source, ClassificationSource::Remote);
    assert_eq!(verdict.classification, Classification::Productive);
}

#[tokio::test]
async fn test_offline_classifier_is_keyword_only() {
    let classifier = ResilientClassifier::offline(keywords());
    let (_, source) = classifier.classify("https://instagram.com", None).await;
    assert_eq!(source, ClassificationSource::Keyword);
}
