use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::config::AggregatorConfig;
use crate::signal_bus::ActivitySample;

/// Coarse activity level over the sliding window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityPattern {
    /// No samples at all in the window
    #[default]
    Idle,
    Passive,
    Active,
}

impl std::fmt::Display for ActivityPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Passive => write!(f, "passive"),
            Self::Active => write!(f, "active"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateWindow {
    pub actions_per_minute: f64,
    pub activity_pattern: ActivityPattern,
}

/// Most recent URL or window title seen on the stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentContent {
    pub content_ref: String,
    pub app: Option<String>,
    pub seen_at: DateTime<Utc>,
}

/// Sliding-window activity metrics
pub struct SignalAggregator {
    window: Duration,
    window_seconds: f64,
    active_threshold: f64,
    samples: VecDeque<ActivitySample>,
    last_sample_at: Option<DateTime<Utc>>,
    current_content: Option<CurrentContent>,
}

impl SignalAggregator {
    #[must_use]
    pub fn new(config: &AggregatorConfig) -> Self {
        Self {
            window: Duration::seconds(i64::from(config.window_seconds)),
            window_seconds: f64::from(config.window_seconds),
            active_threshold: config.active_threshold_apm,
            samples: VecDeque::new(),
            last_sample_at: None,
            current_content: None,
        }
    }

    /// Add samples drained from the bus (already ordered)
    pub fn ingest(&mut self, samples: &[ActivitySample]) {
        for sample in samples {
            if let Some(content_ref) = &sample.payload.content_ref {
                self.current_content = Some(CurrentContent {
                    content_ref: content_ref.clone(),
                    app: sample.payload.app.clone(),
                    seen_at: sample.timestamp,
                });
            }
            self.last_sample_at = Some(
                self.last_sample_at
                    .map_or(sample.timestamp, |last| last.max(sample.timestamp)),
            );
            self.samples.push_back(sample.clone());
        }
    }

    /// Evict samples older than the window and compute the metrics at `now`
    pub fn tick(&mut self, now: DateTime<Utc>) -> AggregateWindow {
        let cutoff = now - self.window;
        while self
            .samples
            .front()
            .is_some_and(|sample| sample.timestamp <= cutoff)
        {
            self.samples.pop_front();
        }

        if self.samples.is_empty() {
            return AggregateWindow::default();
        }

        let actions: u64 = self
            .samples
            .iter()
            .filter(|s| s.is_input())
            .map(|s| u64::from(s.payload.input_count))
            .sum();
        #[allow(clippy::cast_precision_loss)]
        let actions_per_minute = actions as f64 * 60.0 / self.window_seconds;

        let activity_pattern = if actions_per_minute >= self.active_threshold {
            ActivityPattern::Active
        } else {
            ActivityPattern::Passive
        };

        AggregateWindow {
            actions_per_minute,
            activity_pattern,
        }
    }

    #[must_use]
    pub const fn last_sample_at(&self) -> Option<DateTime<Utc>> {
        self.last_sample_at
    }

    #[must_use]
    pub const fn current_content(&self) -> Option<&CurrentContent> {
        self.current_content.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal_bus::{SampleKind, SamplePayload};
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 2, 9, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn input(secs: i64, count: u32) -> ActivitySample {
        ActivitySample {
            timestamp: t(secs),
            kind: SampleKind::InputEvent,
            payload: SamplePayload {
                input_count: count,
                ..SamplePayload::default()
            },
        }
    }

    #[test]
    fn test_empty_window_is_idle() {
        let mut aggregator = SignalAggregator::new(&AggregatorConfig::default());
        let window = aggregator.tick(t(0));
        assert_eq!(window.activity_pattern, ActivityPattern::Idle);
        assert!(window.actions_per_minute.abs() < f64::EPSILON);
    }

    #[test]
    fn test_apm_thresholds() {
        let mut aggregator = SignalAggregator::new(&AggregatorConfig::default());
        aggregator.ingest(&[input(0, 4), input(10, 5)]);
        let window = aggregator.tick(t(20));
        assert!((window.actions_per_minute - 9.0).abs() < 1e-9);
        assert_eq!(window.activity_pattern, ActivityPattern::Passive);

        aggregator.ingest(&[input(21, 1)]);
        assert_eq!(aggregator.tick(t(21)).activity_pattern, ActivityPattern::Active);
    }

    #[test]
    fn test_old_samples_leave_window() {
        let mut aggregator = SignalAggregator::new(&AggregatorConfig::default());
        aggregator.ingest(&[input(0, 30)]);
        assert_eq!(aggregator.tick(t(59)).activity_pattern, ActivityPattern::Active);
        assert_eq!(aggregator.tick(t(60)).activity_pattern, ActivityPattern::Idle);
        assert_eq!(aggregator.last_sample_at(), Some(t(0)));
    }

    #[test]
    fn test_non_input_samples_make_window_passive() {
        let mut aggregator = SignalAggregator::new(&AggregatorConfig::default());
        aggregator.ingest(&[ActivitySample {
            timestamp: t(0),
            kind: SampleKind::BrowserNav,
            payload: SamplePayload {
                content_ref: Some(String::from("https://news.ycombinator.com")),
                ..SamplePayload::default()
            },
        }]);
        let window = aggregator.tick(t(1));
        assert_eq!(window.activity_pattern, ActivityPattern::Passive);
        assert_eq!(
            aggregator.current_content().map(|c| c.content_ref.as_str()),
            Some("https://news.ycombinator.com")
        );
    }
}
