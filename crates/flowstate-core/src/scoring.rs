//! Energy, fatigue, resilience, focus and XP.
//!
//! Time-based quantities are pure functions of elapsed time and the last
//! committed state, so replaying the same ticks always yields the same numbers.

use chrono::{DateTime, Utc};
use flowstate_storage::{Decision, XpBreakdown};
use serde::{Deserialize, Serialize};

use crate::config::ScoringConfig;
use crate::error::EngineError;
use crate::state_machine::FlowState;

/// Live cognitive metrics of the current session
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CognitiveState {
    pub energy: f64,
    pub fatigue_score: f64,
    pub resilience: u32,
    pub focus_score: f64,
    pub flow_seconds: f64,
    /// XP from `wait_for_break` decisions, paid out with stamina
    pub wait_bonus_xp: u32,
}

impl CognitiveState {
    fn fresh(config: &ScoringConfig) -> Self {
        Self {
            energy: config.energy_baseline,
            fatigue_score: 0.0,
            resilience: 0,
            focus_score: 100.0,
            flow_seconds: 0.0,
            wait_bonus_xp: 0,
        }
    }

    /// Minutes of flow, the basis of stamina
    #[must_use]
    pub fn stamina_minutes(&self) -> f64 {
        self.flow_seconds / 60.0
    }
}

/// Energy after `minutes` spent in `state`, clamped to 0-100
#[must_use]
pub fn energy_after(energy: f64, minutes: f64, state: FlowState, config: &ScoringConfig) -> f64 {
    let delta = match state {
        FlowState::Flow | FlowState::Intervening => -config.energy_decay_per_minute * minutes,
        FlowState::Idle => config.energy_regen_per_minute * minutes,
        FlowState::Active => 0.0,
    };
    (energy + delta).clamp(0.0, 100.0)
}

/// Convex fatigue curve over cumulative flow minutes, clamped to 0-100
#[must_use]
pub fn fatigue_for(flow_minutes: f64, config: &ScoringConfig) -> f64 {
    if flow_minutes <= 0.0 {
        return 0.0;
    }
    let ratio = flow_minutes / config.fatigue_full_minutes;
    (100.0 * ratio.powf(config.fatigue_exponent)).clamp(0.0, 100.0)
}

/// Resilience and XP change caused by one resolved intervention
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecisionDeltas {
    pub resilience_delta: i32,
    pub xp_delta: i32,
}

pub struct ScoringEngine {
    config: ScoringConfig,
    state: CognitiveState,
    last_update: Option<DateTime<Utc>>,
    /// When the user started dwelling on distracting content
    distracted_since: Option<DateTime<Utc>>,
    decay_minutes_applied: i64,
    fatigue_alerted: bool,
}

impl ScoringEngine {
    #[must_use]
    pub fn new(config: ScoringConfig) -> Self {
        Self {
            state: CognitiveState::fresh(&config),
            config,
            last_update: None,
            distracted_since: None,
            decay_minutes_applied: 0,
            fatigue_alerted: false,
        }
    }

    #[must_use]
    pub const fn state(&self) -> &CognitiveState {
        &self.state
    }

    #[must_use]
    pub const fn fatigue_alert(&self) -> bool {
        self.fatigue_alerted
    }

    /// Reset session-local metrics
    pub fn start_session(&mut self, now: DateTime<Utc>) {
        self.state = CognitiveState::fresh(&self.config);
        self.last_update = Some(now);
        self.clear_distraction();
        self.fatigue_alerted = false;
    }

    /// Stop the distraction clock; energy keeps regenerating from here
    pub fn end_session(&mut self, now: DateTime<Utc>) {
        self.last_update = Some(now);
        self.clear_distraction();
    }

    /// Advance time-based metrics to `now`, with `state` being the state held
    /// since the previous update.
    ///
    /// Returns `true` when fatigue has just crossed the alert threshold.
    pub fn advance(&mut self, now: DateTime<Utc>, state: FlowState) -> bool {
        let elapsed = self
            .last_update
            .map_or(0.0, |last| seconds_between(last, now));
        self.last_update = Some(now);

        self.state.energy = energy_after(self.state.energy, elapsed / 60.0, state, &self.config);

        if state.is_flow() {
            self.state.flow_seconds += elapsed;
            self.state.fatigue_score = fatigue_for(self.state.stamina_minutes(), &self.config);
        }

        if let Some(since) = self.distracted_since {
            let full_minutes = (now - since).num_minutes();
            let due = full_minutes - self.decay_minutes_applied;
            if due > 0 {
                let penalty = u32::try_from(due)
                    .unwrap_or(u32::MAX)
                    .saturating_mul(self.config.distraction_decay_per_minute);
                self.state.resilience = self.state.resilience.saturating_sub(penalty);
                self.decay_minutes_applied = full_minutes;
            }
        }

        let over = self.state.fatigue_score >= self.config.fatigue_alert_threshold;
        let crossed = over && !self.fatigue_alerted;
        if crossed {
            log::warn!(
                "Fatigue at {:.0}, consider taking a break",
                self.state.fatigue_score
            );
        }
        self.fatigue_alerted = over;
        crossed
    }

    /// Start the distraction clock if it is not already running
    pub fn enter_distraction(&mut self, now: DateTime<Utc>) {
        if self.distracted_since.is_none() {
            self.distracted_since = Some(now);
            self.decay_minutes_applied = 0;
        }
    }

    pub fn clear_distraction(&mut self) {
        self.distracted_since = None;
        self.decay_minutes_applied = 0;
    }

    #[must_use]
    pub const fn is_distracted(&self) -> bool {
        self.distracted_since.is_some()
    }

    /// Apply the reward or penalty of a resolved intervention
    pub fn apply_decision(&mut self, decision: Decision) -> DecisionDeltas {
        let before = self.state.resilience;
        let xp_delta = match decision {
            Decision::OpenAnyway => {
                let cfg = &self.config;
                self.state.resilience = before.saturating_sub(cfg.open_anyway_resilience_penalty);
                self.state.focus_score =
                    (self.state.focus_score - cfg.open_anyway_focus_penalty).clamp(0.0, 100.0);
                0
            }
            Decision::WaitForBreak => {
                let cfg = &self.config;
                self.state.resilience = before.saturating_add(cfg.wait_resilience_reward);
                self.state.focus_score =
                    (self.state.focus_score + cfg.wait_focus_bonus).clamp(0.0, 100.0);
                self.state.wait_bonus_xp =
                    self.state.wait_bonus_xp.saturating_add(cfg.wait_xp_bonus);
                self.clear_distraction();
                i32::try_from(self.config.wait_xp_bonus).unwrap_or(i32::MAX)
            }
        };
        let resilience_delta = i64::from(self.state.resilience) - i64::from(before);
        DecisionDeltas {
            resilience_delta: i32::try_from(resilience_delta).unwrap_or(0),
            xp_delta,
        }
    }

    /// Override the focus score from outside
    ///
    /// # Errors
    ///
    /// Returns `InvalidFocusScore` when `score` is not within 0-100
    pub fn set_focus_score(&mut self, score: f64) -> Result<(), EngineError> {
        if !(0.0..=100.0).contains(&score) {
            return Err(EngineError::InvalidFocusScore(score));
        }
        self.state.focus_score = score;
        Ok(())
    }

    /// XP components for a session of `duration_seconds` so far
    #[must_use]
    pub fn xp_breakdown(&self, duration_seconds: u32, distraction_count: u32) -> XpBreakdown {
        let cfg = &self.config;
        let long_enough = duration_seconds >= cfg.xp_min_session_seconds;

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let flow_minutes = self.state.stamina_minutes().floor().max(0.0) as u32;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let focus_points = (self.state.focus_score.clamp(0.0, 100.0)
            / f64::from(cfg.xp_focus_divisor))
        .floor() as u32;

        XpBreakdown {
            base: if long_enough { cfg.xp_base } else { 0 },
            resilience: self.state.resilience.saturating_mul(cfg.xp_per_resilience),
            stamina: flow_minutes
                .saturating_mul(cfg.xp_per_flow_minute)
                .saturating_add(self.state.wait_bonus_xp),
            focus: if long_enough { focus_points } else { 0 },
            penalty: distraction_count.saturating_mul(cfg.xp_per_distraction),
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds().max(0) as f64 / 1000.0
}
