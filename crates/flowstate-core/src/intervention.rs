use chrono::{DateTime, Utc};
use flowstate_storage::{Classification, Decision, InterventionEvent};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use uuid::Uuid;

use crate::error::EngineError;
use crate::scoring::DecisionDeltas;
use crate::state_machine::FlowState;

/// Intervention stub waiting for the user's decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingIntervention {
    pub id: Uuid,
    pub session_id: Uuid,
    pub trigger_content_ref: String,
    pub classification: Classification,
    pub occurred_at: DateTime<Utc>,
}

impl PendingIntervention {
    /// Turn the stub into the immutable event record
    #[must_use]
    pub fn resolve(
        self,
        decision: Decision,
        deltas: DecisionDeltas,
        resolved_at: DateTime<Utc>,
    ) -> InterventionEvent {
        InterventionEvent {
            id: self.id,
            session_id: self.session_id,
            trigger_content_ref: self.trigger_content_ref,
            classification: self.classification,
            decision,
            resilience_delta: deltas.resilience_delta,
            xp_delta: deltas.xp_delta,
            occurred_at: self.occurred_at,
            resolved_at,
        }
    }
}

/// Request for the content owner (e.g. the browser bridge) to close a source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseRequest {
    pub event_id: Uuid,
    pub content_ref: String,
    pub requested_at: DateTime<Utc>,
}

/// Decides when to intercept and tracks the pending intervention.
///
/// There is no cooldown: each distracting encounter in flow is evaluated on
/// its own.
#[derive(Debug, Default)]
pub struct InterventionPolicy {
    pending: Option<PendingIntervention>,
    close_requests: VecDeque<CloseRequest>,
}

impl InterventionPolicy {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn should_intercept(&self, state: FlowState, classification: Classification) -> bool {
        state == FlowState::Flow && classification.is_distracting() && self.pending.is_none()
    }

    /// Open an intervention stub for distracting content
    pub fn open(
        &mut self,
        session_id: Uuid,
        content_ref: &str,
        classification: Classification,
        now: DateTime<Utc>,
    ) -> PendingIntervention {
        let pending = PendingIntervention {
            id: Uuid::new_v4(),
            session_id,
            trigger_content_ref: content_ref.to_string(),
            classification,
            occurred_at: now,
        };
        log::info!("Intercepting {content_ref} (intervention {})", pending.id);
        self.pending = Some(pending.clone());
        pending
    }

    #[must_use]
    pub const fn pending(&self) -> Option<&PendingIntervention> {
        self.pending.as_ref()
    }

    /// Take the pending intervention matching `event_id`
    ///
    /// # Errors
    ///
    /// Returns `NoPendingIntervention` if nothing is pending, or
    /// `UnknownIntervention` if a different intervention is pending
    pub fn take(&mut self, event_id: Uuid) -> Result<PendingIntervention, EngineError> {
        match &self.pending {
            None => Err(EngineError::NoPendingIntervention),
            Some(pending) if pending.id != event_id => {
                Err(EngineError::UnknownIntervention(event_id))
            }
            Some(_) => self.pending.take().ok_or(EngineError::NoPendingIntervention),
        }
    }

    /// Drop the pending intervention without a decision (session stopped)
    pub fn discard(&mut self) -> Option<PendingIntervention> {
        let discarded = self.pending.take();
        if let Some(pending) = &discarded {
            log::info!("Discarding unresolved intervention {}", pending.id);
        }
        discarded
    }

    pub fn request_close(&mut self, request: CloseRequest) {
        self.close_requests.push_back(request);
    }

    /// Hand all queued close requests to the content owner
    pub fn drain_close_requests(&mut self) -> Vec<CloseRequest> {
        self.close_requests.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 2, 9, 30, 0).unwrap()
    }

    #[test]
    fn test_intercepts_only_distracting_in_flow() {
        let policy = InterventionPolicy::new();
        assert!(policy.should_intercept(FlowState::Flow, Classification::Distracting));
        assert!(!policy.should_intercept(FlowState::Active, Classification::Distracting));
        assert!(!policy.should_intercept(FlowState::Flow, Classification::Neutral));
        assert!(!policy.should_intercept(FlowState::Flow, Classification::Productive));
    }

    #[test]
    fn test_take_checks_event_id() {
        let mut policy = InterventionPolicy::new();
        assert_eq!(
            policy.take(Uuid::new_v4()),
            Err(EngineError::NoPendingIntervention)
        );

        let pending = policy.open(
            Uuid::new_v4(),
            "https://twitch.tv",
            Classification::Distracting,
            now(),
        );
        assert!(!policy.should_intercept(FlowState::Flow, Classification::Distracting));

        let other = Uuid::new_v4();
        assert_eq!(policy.take(other), Err(EngineError::UnknownIntervention(other)));
        assert_eq!(policy.take(pending.id), Ok(pending));
        assert!(policy.pending().is_none());
    }

    #[test]
    fn test_resolve_builds_event() {
        let mut policy = InterventionPolicy::new();
        let pending = policy.open(
            Uuid::new_v4(),
            "https://reddit.com",
            Classification::Distracting,
            now(),
        );
        let event = pending.clone().resolve(
            Decision::WaitForBreak,
            DecisionDeltas {
                resilience_delta: 5,
                xp_delta: 10,
            },
            now() + chrono::Duration::seconds(3),
        );
        assert_eq!(event.id, pending.id);
        assert_eq!(event.decision, Decision::WaitForBreak);
        assert_eq!(event.trigger_content_ref, "https://reddit.com");
        assert!(event.resolved_at > event.occurred_at);
    }

    #[test]
    fn test_close_requests_drain_once() {
        let mut policy = InterventionPolicy::new();
        policy.request_close(CloseRequest {
            event_id: Uuid::new_v4(),
            content_ref: String::from("https://tiktok.com"),
            requested_at: now(),
        });
        assert_eq!(policy.drain_close_requests().len(), 1);
        assert!(policy.drain_close_requests().is_empty());
    }
}
