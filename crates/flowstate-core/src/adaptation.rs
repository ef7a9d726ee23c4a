//! Learning from finished sessions.
//!
//! Sources the user keeps yielding to are auto-blocked, and the flow threshold
//! follows the recent success rate (progressive overload). Both are applied
//! to the configuration once, when the daemon starts.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use flowstate_storage::{Classification, Database, FlowBreaker, SessionPerformance};

use crate::config::{ClassificationRule, EngineConfig};

/// Sessions needed before the threshold is retuned
pub const MIN_TUNING_SESSIONS: usize = 5;
pub const TUNING_LOOKBACK_DAYS: i64 = 14;
pub const TUNING_SESSION_LIMIT: u32 = 20;
/// A session with a focus score above this counts as a success
const SUCCESS_FOCUS_SCORE: f64 = 70.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdTrend {
    /// Too few sessions to judge
    Baseline,
    Raised,
    Held,
    Lowered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThresholdAdvice {
    pub threshold_seconds: u32,
    /// Share of successful sessions, 0-100
    pub success_percent: u32,
    pub trend: ThresholdTrend,
}

/// Flow threshold for the next run.
///
/// Above 80% successful sessions the threshold grows by 10%; below 40% it
/// shrinks by 10%, never under `min_seconds`.
#[must_use]
pub fn advise_threshold(
    recent: &[SessionPerformance],
    baseline_seconds: u32,
    min_seconds: u32,
) -> ThresholdAdvice {
    if recent.len() < MIN_TUNING_SESSIONS {
        return ThresholdAdvice {
            threshold_seconds: baseline_seconds,
            success_percent: 0,
            trend: ThresholdTrend::Baseline,
        };
    }

    let successes = recent
        .iter()
        .filter(|s| s.focus_score > SUCCESS_FOCUS_SCORE)
        .count();
    let success_percent = u32::try_from(successes * 100 / recent.len()).unwrap_or(100);

    let (threshold_seconds, trend) = if successes * 10 > recent.len() * 8 {
        (
            baseline_seconds.saturating_mul(11) / 10,
            ThresholdTrend::Raised,
        )
    } else if successes * 10 < recent.len() * 4 {
        let floor = min_seconds.min(baseline_seconds);
        (
            (baseline_seconds / 10 * 9).max(floor),
            ThresholdTrend::Lowered,
        )
    } else {
        (baseline_seconds, ThresholdTrend::Held)
    };

    ThresholdAdvice {
        threshold_seconds,
        success_percent,
        trend,
    }
}

/// One case-insensitive distracting rule per flow breaker
#[must_use]
pub fn auto_block_rules(breakers: &[FlowBreaker]) -> Vec<ClassificationRule> {
    breakers
        .iter()
        .map(|breaker| ClassificationRule {
            pattern: format!("(?i){}", regex::escape(&breaker.source)),
            classification: Classification::Distracting,
        })
        .collect()
}

/// Apply what the store has learned to `config`
///
/// # Errors
///
/// Returns an error if the store cannot be queried
pub fn adapt_config(
    mut config: EngineConfig,
    database: &Database,
    now: DateTime<Utc>,
) -> Result<EngineConfig> {
    if config.classifier.auto_block_after > 0 {
        let breakers = database.get_flow_breakers(config.classifier.auto_block_after)?;
        for breaker in &breakers {
            log::info!(
                "Auto-blocking {} (broke flow {} times)",
                breaker.source,
                breaker.flow_breaks
            );
        }
        config.classifier.rules.extend(auto_block_rules(&breakers));
    }

    if config.flow.adaptive_threshold {
        let since = now - Duration::days(TUNING_LOOKBACK_DAYS);
        let recent = database.get_recent_performance(since, TUNING_SESSION_LIMIT)?;
        let advice = advise_threshold(
            &recent,
            config.flow.threshold_seconds,
            config.flow.min_threshold_seconds,
        );
        if advice.threshold_seconds != config.flow.threshold_seconds {
            log::info!(
                "Flow threshold {}s -> {}s ({}% of recent sessions successful)",
                config.flow.threshold_seconds,
                advice.threshold_seconds,
                advice.success_percent
            );
        }
        config.flow.threshold_seconds = advice.threshold_seconds;
    }

    Ok(config)
}
