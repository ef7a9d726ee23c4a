//! Normalizes raw activity reports into one ordered, deduplicated stream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Source of an activity sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleKind {
    WindowFocus,
    InputEvent,
    BrowserNav,
}

impl std::fmt::Display for SampleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WindowFocus => write!(f, "window_focus"),
            Self::InputEvent => write!(f, "input_event"),
            Self::BrowserNav => write!(f, "browser_nav"),
        }
    }
}

impl std::str::FromStr for SampleKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "window_focus" | "window" => Ok(Self::WindowFocus),
            "input_event" | "input" => Ok(Self::InputEvent),
            "browser_nav" | "url" => Ok(Self::BrowserNav),
            _ => Err(format!("Unknown sample kind: {s}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SamplePayload {
    /// URL or window title
    pub content_ref: Option<String>,
    pub app: Option<String>,
    /// Raw input actions batched into this sample
    pub input_count: u32,
}

impl Default for SamplePayload {
    fn default() -> Self {
        Self {
            content_ref: None,
            app: None,
            input_count: 1,
        }
    }
}

/// Activity report as received from a collector; fields may be missing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSample {
    pub timestamp: Option<DateTime<Utc>>,
    pub kind: Option<SampleKind>,
    pub payload: SamplePayload,
}

impl RawSample {
    #[must_use]
    pub fn input(timestamp: DateTime<Utc>, input_count: u32) -> Self {
        Self {
            timestamp: Some(timestamp),
            kind: Some(SampleKind::InputEvent),
            payload: SamplePayload {
                input_count,
                ..SamplePayload::default()
            },
        }
    }

    #[must_use]
    pub fn browser_nav(timestamp: DateTime<Utc>, url: &str) -> Self {
        Self {
            timestamp: Some(timestamp),
            kind: Some(SampleKind::BrowserNav),
            payload: SamplePayload {
                content_ref: Some(url.to_string()),
                ..SamplePayload::default()
            },
        }
    }

    #[must_use]
    pub fn window_focus(timestamp: DateTime<Utc>, app: &str, title: &str) -> Self {
        Self {
            timestamp: Some(timestamp),
            kind: Some(SampleKind::WindowFocus),
            payload: SamplePayload {
                content_ref: Some(title.to_string()),
                app: Some(app.to_string()),
                ..SamplePayload::default()
            },
        }
    }
}

/// Validated sample on the ordered stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivitySample {
    pub timestamp: DateTime<Utc>,
    pub kind: SampleKind,
    pub payload: SamplePayload,
}

impl ActivitySample {
    #[must_use]
    pub fn is_input(&self) -> bool {
        self.kind == SampleKind::InputEvent
    }
}

/// Why samples were rejected
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropCounters {
    pub malformed: u64,
    pub late: u64,
    pub duplicate: u64,
}

impl DropCounters {
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.malformed + self.late + self.duplicate
    }
}

#[derive(Debug, Default)]
pub struct ActivitySignalBus {
    pending: Vec<RawSample>,
    last_emitted: Option<DateTime<Utc>>,
    /// Samples emitted at `last_emitted`, for duplicate detection across drains
    emitted_at_last: Vec<ActivitySample>,
    dropped: DropCounters,
}

impl ActivitySignalBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&mut self, sample: RawSample) {
        self.pending.push(sample);
    }

    /// Yield everything reported since the last drain, oldest first.
    ///
    /// Malformed, late and duplicate samples are dropped and counted.
    pub fn drain(&mut self) -> Vec<ActivitySample> {
        let mut valid = Vec::with_capacity(self.pending.len());
        for raw in self.pending.drain(..) {
            match (raw.timestamp, raw.kind) {
                (Some(timestamp), Some(kind)) => valid.push(ActivitySample {
                    timestamp,
                    kind,
                    payload: raw.payload,
                }),
                _ => self.dropped.malformed += 1,
            }
        }
        // Stable, so same-timestamp samples keep arrival order
        valid.sort_by_key(|s| s.timestamp);

        let mut emitted = Vec::with_capacity(valid.len());
        for sample in valid {
            match self.last_emitted {
                Some(last) if sample.timestamp < last => {
                    self.dropped.late += 1;
                    continue;
                }
                Some(last) if sample.timestamp == last => {
                    if self.emitted_at_last.contains(&sample) {
                        self.dropped.duplicate += 1;
                        continue;
                    }
                }
                _ => {
                    self.last_emitted = Some(sample.timestamp);
                    self.emitted_at_last.clear();
                }
            }
            self.emitted_at_last.push(sample.clone());
            emitted.push(sample);
        }
        emitted
    }

    #[must_use]
    pub const fn dropped(&self) -> DropCounters {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 2, 9, 0, 0).unwrap() + Duration::seconds(secs)
    }

    #[test]
    fn test_drain_orders_by_timestamp() {
        let mut bus = ActivitySignalBus::new();
        bus.report(RawSample::input(t(3), 1));
        bus.report(RawSample::input(t(1), 1));
        bus.report(RawSample::browser_nav(t(2), "https://github.com"));

        let drained = bus.drain();
        let times: Vec<_> = drained.iter().map(|s| s.timestamp).collect();
        assert_eq!(times, vec![t(1), t(2), t(3)]);
        assert_eq!(bus.dropped().total(), 0);
    }

    #[test]
    fn test_malformed_samples_counted() {
        let mut bus = ActivitySignalBus::new();
        bus.report(RawSample {
            timestamp: None,
            kind: Some(SampleKind::InputEvent),
            payload: SamplePayload::default(),
        });
        bus.report(RawSample {
            timestamp: Some(t(0)),
            kind: None,
            payload: SamplePayload::default(),
        });

        assert!(bus.drain().is_empty());
        assert_eq!(bus.dropped().malformed, 2);
    }

    #[test]
    fn test_late_samples_across_drains_dropped() {
        let mut bus = ActivitySignalBus::new();
        bus.report(RawSample::input(t(10), 1));
        assert_eq!(bus.drain().len(), 1);

        bus.report(RawSample::input(t(5), 1));
        bus.report(RawSample::input(t(11), 1));
        let drained = bus.drain();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].timestamp, t(11));
        assert_eq!(bus.dropped().late, 1);
    }

    #[test]
    fn test_exact_duplicates_dropped() {
        let mut bus = ActivitySignalBus::new();
        bus.report(RawSample::input(t(1), 2));
        bus.report(RawSample::input(t(1), 2));
        // Same timestamp, different payload is kept
        bus.report(RawSample::input(t(1), 3));
        assert_eq!(bus.drain().len(), 2);

        bus.report(RawSample::input(t(1), 2));
        assert!(bus.drain().is_empty());
        assert_eq!(bus.dropped().duplicate, 2);
    }

    #[test]
    fn test_sample_kind_parse() {
        assert_eq!("browser-nav".parse::<SampleKind>(), Ok(SampleKind::BrowserNav));
        assert_eq!("input".parse::<SampleKind>(), Ok(SampleKind::InputEvent));
        assert!("mouse".parse::<SampleKind>().is_err());
    }
}
