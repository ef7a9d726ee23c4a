use chrono::{DateTime, Duration, Utc};
use flowstate_storage::Decision;
use serde::{Deserialize, Serialize};

use crate::aggregator::{ActivityPattern, AggregateWindow};
use crate::config::FlowConfig;

/// Session lifecycle state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowState {
    #[default]
    Idle,
    Active,
    Flow,
    /// A distraction is waiting for the user's decision
    Intervening,
}

impl FlowState {
    /// Time in this state counts as flow time
    #[must_use]
    pub const fn is_flow(&self) -> bool {
        matches!(self, Self::Flow | Self::Intervening)
    }
}

impl std::fmt::Display for FlowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Active => write!(f, "active"),
            Self::Flow => write!(f, "flow"),
            Self::Intervening => write!(f, "intervening"),
        }
    }
}

/// A state change and what caused it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: FlowState,
    pub to: FlowState,
    pub reason: &'static str,
}

/// Owns the idle / active / flow / intervening transitions
pub struct FlowStateMachine {
    state: FlowState,
    /// Start of the current uninterrupted `active` streak
    active_since: Option<DateTime<Utc>>,
    flow_threshold: Duration,
    idle_timeout: Duration,
}

impl FlowStateMachine {
    #[must_use]
    pub fn new(config: &FlowConfig) -> Self {
        Self {
            state: FlowState::Idle,
            active_since: None,
            flow_threshold: Duration::seconds(i64::from(config.threshold_seconds)),
            idle_timeout: Duration::seconds(i64::from(config.idle_timeout_seconds)),
        }
    }

    #[must_use]
    pub const fn state(&self) -> FlowState {
        self.state
    }

    fn move_to(&mut self, to: FlowState, reason: &'static str) -> Option<Transition> {
        if self.state == to {
            return None;
        }
        let transition = Transition {
            from: self.state,
            to,
            reason,
        };
        log::debug!("Flow state {} -> {to} ({reason})", self.state);
        self.state = to;
        Some(transition)
    }

    /// `IDLE -> ACTIVE` when a session opens
    pub fn start(&mut self) -> Option<Transition> {
        if self.state != FlowState::Idle {
            return None;
        }
        self.active_since = None;
        self.move_to(FlowState::Active, "session started")
    }

    /// Any state back to `IDLE`; the session is closed by the caller
    pub fn stop(&mut self, reason: &'static str) -> Option<Transition> {
        self.active_since = None;
        self.move_to(FlowState::Idle, reason)
    }

    /// Per-tick update from the aggregate window.
    ///
    /// Returns `Some` with an `IDLE` target when the idle timeout fired; the
    /// caller must then close the session.
    pub fn observe(
        &mut self,
        now: DateTime<Utc>,
        window: &AggregateWindow,
        last_activity: DateTime<Utc>,
    ) -> Option<Transition> {
        if self.state == FlowState::Idle {
            return None;
        }

        if window.activity_pattern == ActivityPattern::Active {
            self.active_since.get_or_insert(now);
        } else {
            self.active_since = None;
        }

        match self.state {
            FlowState::Active | FlowState::Flow if now - last_activity >= self.idle_timeout => {
                self.stop("idle timeout")
            }
            FlowState::Active => match self.active_since {
                Some(since) if now - since >= self.flow_threshold => {
                    self.move_to(FlowState::Flow, "sustained activity")
                }
                _ => None,
            },
            _ => None,
        }
    }

    /// `FLOW -> INTERVENING` on a distracting classification
    pub fn intervene(&mut self) -> Option<Transition> {
        if self.state != FlowState::Flow {
            return None;
        }
        self.move_to(FlowState::Intervening, "distracting content")
    }

    /// Leave `INTERVENING` according to the user's decision
    pub fn resolve(&mut self, decision: Decision) -> Option<Transition> {
        if self.state != FlowState::Intervening {
            return None;
        }
        match decision {
            Decision::WaitForBreak => self.move_to(FlowState::Flow, "waited for break"),
            Decision::OpenAnyway => {
                self.active_since = None;
                self.move_to(FlowState::Active, "opened anyway")
            }
        }
    }

    /// Seconds of uninterrupted `active` pattern so far
    #[must_use]
    pub fn streak_seconds(&self, now: DateTime<Utc>) -> i64 {
        self.active_since
            .map_or(0, |since| (now - since).num_seconds().max(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 2, 9, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn window(pattern: ActivityPattern) -> AggregateWindow {
        AggregateWindow {
            actions_per_minute: 0.0,
            activity_pattern: pattern,
        }
    }

    fn machine() -> FlowStateMachine {
        let mut machine = FlowStateMachine::new(&FlowConfig::default());
        machine.start();
        machine
    }

    #[test]
    fn test_flow_after_threshold() {
        let mut machine = machine();
        let active = window(ActivityPattern::Active);
        for secs in 0..600 {
            assert!(machine.observe(t(secs), &active, t(secs)).is_none());
        }
        let transition = machine.observe(t(600), &active, t(600)).unwrap();
        assert_eq!(transition.to, FlowState::Flow);
    }

    #[test]
    fn test_passive_tick_resets_streak() {
        let mut machine = machine();
        let active = window(ActivityPattern::Active);
        for secs in 0..500 {
            machine.observe(t(secs), &active, t(secs));
        }
        machine.observe(t(500), &window(ActivityPattern::Passive), t(500));
        assert_eq!(machine.streak_seconds(t(500)), 0);

        for secs in 501..1100 {
            machine.observe(t(secs), &active, t(secs));
        }
        assert_eq!(machine.state(), FlowState::Active);
        machine.observe(t(1101), &active, t(1101));
        assert_eq!(machine.state(), FlowState::Flow);
    }

    #[test]
    fn test_idle_timeout_stops() {
        let mut machine = machine();
        let idle = window(ActivityPattern::Idle);
        assert!(machine.observe(t(299), &idle, t(0)).is_none());
        let transition = machine.observe(t(300), &idle, t(0)).unwrap();
        assert_eq!(transition.to, FlowState::Idle);
        assert_eq!(transition.reason, "idle timeout");
    }

    #[test]
    fn test_intervention_round_trip() {
        let mut machine = machine();
        assert!(machine.intervene().is_none(), "only FLOW can intervene");

        let active = window(ActivityPattern::Active);
        for secs in 0..=600 {
            machine.observe(t(secs), &active, t(secs));
        }
        assert_eq!(machine.intervene().unwrap().to, FlowState::Intervening);
        // No idle timeout while a decision is pending
        assert!(machine.observe(t(5000), &window(ActivityPattern::Idle), t(600)).is_none());

        assert_eq!(
            machine.resolve(Decision::WaitForBreak).unwrap().to,
            FlowState::Flow
        );
        machine.intervene();
        assert_eq!(
            machine.resolve(Decision::OpenAnyway).unwrap().to,
            FlowState::Active
        );
        assert_eq!(machine.streak_seconds(t(5000)), 0);
    }
}
