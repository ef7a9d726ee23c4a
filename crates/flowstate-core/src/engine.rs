//! The session engine: one owned state advanced in discrete ticks.
//!
//! Every arrival (activity samples, start/stop, resolutions, classifier
//! answers) is a [`Command`]. Commands are applied only inside [`Engine::tick`],
//! in arrival order, and the tick ends by committing one [`StatusSnapshot`].
//! Side effects the engine cannot perform itself (classification calls and
//! persistence) are returned as [`Effect`]s for the caller to run.

use chrono::{DateTime, Utc};
use flowstate_ai::ContentVerdict;
use flowstate_storage::{Decision, InterventionEvent, Session, SessionStatus};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::aggregator::{ActivityPattern, AggregateWindow, SignalAggregator};
use crate::classifier::ClassificationSource;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::intervention::{CloseRequest, InterventionPolicy, PendingIntervention};
use crate::recorder::StoreRecord;
use crate::scoring::ScoringEngine;
use crate::signal_bus::{ActivitySignalBus, RawSample};
use crate::state_machine::{FlowState, FlowStateMachine, Transition};

/// Input to the engine, applied at the next tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Command {
    Report(RawSample),
    Start {
        task: Option<String>,
    },
    Stop,
    Resolve {
        event_id: Uuid,
        decision: Decision,
    },
    SetFocusScore(f64),
    /// Classifier answer for content seen earlier
    Classified {
        content_ref: String,
        verdict: ContentVerdict,
        source: ClassificationSource,
    },
    DrainCloseRequests,
}

/// Result of one command, index-aligned with the commands of the tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CommandOutcome {
    Accepted,
    Started(Session),
    /// The finalized session; `None` if no session was ever closed
    Stopped(Option<Session>),
    Resolved(InterventionEvent),
    CloseRequests(Vec<CloseRequest>),
    Rejected(EngineError),
}

/// Work the caller performs on the engine's behalf
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Classify content and post the answer back as `Command::Classified`
    Classify {
        content_ref: String,
        app: Option<String>,
    },
    Persist(StoreRecord),
}

/// Status surface, committed once per tick
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub is_running: bool,
    pub state: FlowState,
    pub session_id: Option<Uuid>,
    pub energy: f64,
    pub fatigue_score: f64,
    pub fatigue_alert: bool,
    pub resilience: u32,
    /// XP the session would earn if it closed now
    pub xp: u32,
    pub focus_score: f64,
    pub current_task: Option<String>,
    pub current_content: Option<String>,
    pub session_duration: u64,
    pub flow_seconds: u64,
    pub apm: f64,
    pub activity_pattern: ActivityPattern,
    pub distraction_count: u32,
    pub pending_intervention: Option<PendingIntervention>,
    pub dropped_samples: u64,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Everything one tick produced
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub outcomes: Vec<CommandOutcome>,
    pub effects: Vec<Effect>,
    pub transitions: Vec<Transition>,
    pub snapshot: StatusSnapshot,
}

pub struct Engine {
    config: EngineConfig,
    bus: ActivitySignalBus,
    aggregator: SignalAggregator,
    machine: FlowStateMachine,
    scoring: ScoringEngine,
    policy: InterventionPolicy,
    session: Option<Session>,
    last_finalized: Option<Session>,
    /// Time the last session closed; earlier samples never auto-start
    idle_since: Option<DateTime<Utc>>,
    /// Content most recently sent for classification
    classified_content: Option<String>,
    window: AggregateWindow,
    apm_sum: f64,
    apm_ticks: u32,
    snapshot: StatusSnapshot,
}

/// Per-tick scratch space
#[derive(Default)]
struct TickOutput {
    effects: Vec<Effect>,
    transitions: Vec<Transition>,
}

impl TickOutput {
    fn record(&mut self, transition: Option<Transition>) {
        if let Some(transition) = transition {
            self.transitions.push(transition);
        }
    }
}

impl Engine {
    /// Create an engine with no open session
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self {
            bus: ActivitySignalBus::new(),
            aggregator: SignalAggregator::new(&config.aggregator),
            machine: FlowStateMachine::new(&config.flow),
            scoring: ScoringEngine::new(config.scoring.clone()),
            policy: InterventionPolicy::new(),
            session: None,
            last_finalized: None,
            idle_since: None,
            classified_content: None,
            window: AggregateWindow::default(),
            apm_sum: 0.0,
            apm_ticks: 0,
            snapshot: StatusSnapshot::default(),
            config,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub const fn state(&self) -> FlowState {
        self.machine.state()
    }

    #[must_use]
    pub const fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Snapshot committed by the last tick
    #[must_use]
    pub const fn snapshot(&self) -> &StatusSnapshot {
        &self.snapshot
    }

    /// Apply `commands` in order, then advance all time-based state to `now`
    pub fn tick(&mut self, now: DateTime<Utc>, commands: Vec<Command>) -> TickReport {
        let mut out = TickOutput::default();
        let mut outcomes = Vec::with_capacity(commands.len());

        for command in commands {
            if !matches!(command, Command::Report(_)) {
                // Samples reported before this command take effect first
                self.ingest_samples(now, &mut out);
            }
            outcomes.push(self.apply(now, command, &mut out));
        }
        self.ingest_samples(now, &mut out);
        self.advance(now, &mut out);

        self.snapshot = self.build_snapshot(now);
        TickReport {
            outcomes,
            effects: out.effects,
            transitions: out.transitions,
            snapshot: self.snapshot.clone(),
        }
    }

    fn apply(
        &mut self,
        now: DateTime<Utc>,
        command: Command,
        out: &mut TickOutput,
    ) -> CommandOutcome {
        match command {
            Command::Report(sample) => {
                self.bus.report(sample);
                CommandOutcome::Accepted
            }
            Command::Start { task } => match &self.session {
                Some(open) => CommandOutcome::Rejected(EngineError::SessionAlreadyOpen(open.id)),
                None => CommandOutcome::Started(self.open_session(now, task, out)),
            },
            Command::Stop => match self.session {
                Some(_) => {
                    CommandOutcome::Stopped(self.close_session(now, "session stopped", out))
                }
                None => CommandOutcome::Stopped(self.last_finalized.clone()),
            },
            Command::Resolve { event_id, decision } => {
                match self.resolve(now, event_id, decision, out) {
                    Ok(event) => CommandOutcome::Resolved(event),
                    Err(e) => CommandOutcome::Rejected(e),
                }
            }
            Command::SetFocusScore(score) => match self.scoring.set_focus_score(score) {
                Ok(()) => CommandOutcome::Accepted,
                Err(e) => CommandOutcome::Rejected(e),
            },
            Command::Classified {
                content_ref,
                verdict,
                source,
            } => {
                self.on_classified(now, &content_ref, &verdict, source, out);
                CommandOutcome::Accepted
            }
            Command::DrainCloseRequests => {
                CommandOutcome::CloseRequests(self.policy.drain_close_requests())
            }
        }
    }

    /// Drain the bus into the aggregator, auto-starting and requesting
    /// classification of new content as needed
    fn ingest_samples(&mut self, now: DateTime<Utc>, out: &mut TickOutput) {
        let samples = self.bus.drain();
        if samples.is_empty() {
            return;
        }
        self.aggregator.ingest(&samples);

        if self.session.is_none() && self.config.flow.auto_start {
            let fresh = samples
                .iter()
                .any(|s| !self.idle_since.is_some_and(|idle| s.timestamp <= idle));
            if fresh {
                log::info!("Activity detected, auto-starting session");
                self.open_session(now, None, out);
                return;
            }
        }

        if self.session.is_some() {
            for sample in &samples {
                if let Some(content_ref) = &sample.payload.content_ref {
                    self.request_classification(content_ref, sample.payload.app.as_deref(), out);
                }
            }
        }
    }

    fn request_classification(
        &mut self,
        content_ref: &str,
        app: Option<&str>,
        out: &mut TickOutput,
    ) {
        if self.classified_content.as_deref() == Some(content_ref) {
            return;
        }
        self.classified_content = Some(content_ref.to_string());
        out.effects.push(Effect::Classify {
            content_ref: content_ref.to_string(),
            app: app.map(ToString::to_string),
        });
    }

    fn on_classified(
        &mut self,
        now: DateTime<Utc>,
        content_ref: &str,
        verdict: &ContentVerdict,
        source: ClassificationSource,
        out: &mut TickOutput,
    ) {
        let Some(session_id) = self.session.as_ref().map(|s| s.id) else {
            return;
        };
        // The user may have moved on while the classifier was thinking
        if self.classified_content.as_deref() != Some(content_ref) {
            log::debug!("Ignoring stale classification of {content_ref}");
            return;
        }
        log::debug!(
            "{content_ref} is {} ({source}, {:.2}): {}",
            verdict.classification,
            verdict.confidence,
            verdict.reasoning
        );

        if !verdict.classification.is_distracting() {
            if self.policy.pending().is_none() {
                self.scoring.clear_distraction();
            }
            return;
        }

        if self.policy.should_intercept(self.machine.state(), verdict.classification) {
            self.policy
                .open(session_id, content_ref, verdict.classification, now);
            out.record(self.machine.intervene());
            self.scoring.enter_distraction(now);
        }
    }

    fn resolve(
        &mut self,
        now: DateTime<Utc>,
        event_id: Uuid,
        decision: Decision,
        out: &mut TickOutput,
    ) -> Result<InterventionEvent, EngineError> {
        let pending = self.policy.take(event_id)?;
        // Time since the last tick was spent intervening
        self.scoring.advance(now, self.machine.state());
        let deltas = self.scoring.apply_decision(decision);
        out.record(self.machine.resolve(decision));

        if decision == Decision::WaitForBreak {
            self.policy.request_close(CloseRequest {
                event_id,
                content_ref: pending.trigger_content_ref.clone(),
                requested_at: now,
            });
        }
        if let Some(session) = &mut self.session {
            if decision == Decision::OpenAnyway {
                session.distraction_count += 1;
            }
            session.resilience_score = self.scoring.state().resilience;
        }

        let event = pending.resolve(decision, deltas, now);
        log::info!(
            "Intervention {} resolved: {decision} (resilience {:+})",
            event.id,
            event.resilience_delta
        );
        out.effects
            .push(Effect::Persist(StoreRecord::Intervention(event.clone())));
        Ok(event)
    }

    fn open_session(
        &mut self,
        now: DateTime<Utc>,
        task: Option<String>,
        out: &mut TickOutput,
    ) -> Session {
        let session = Session::open(now, task);
        log::info!("Session {} started", session.id);

        self.scoring.start_session(now);
        out.record(self.machine.start());
        self.apm_sum = 0.0;
        self.apm_ticks = 0;
        self.classified_content = None;
        self.session = Some(session.clone());

        // Content already on screen is judged right away
        if let Some(current) = self.aggregator.current_content().cloned() {
            self.request_classification(&current.content_ref, current.app.as_deref(), out);
        }
        out.effects
            .push(Effect::Persist(StoreRecord::SessionOpened(session.clone())));
        session
    }

    fn close_session(
        &mut self,
        now: DateTime<Utc>,
        reason: &'static str,
        out: &mut TickOutput,
    ) -> Option<Session> {
        // Account for time since the last tick in the state it was spent in
        self.scoring.advance(now, self.machine.state());
        self.sync_session(now);
        self.policy.discard();

        let mut session = self.session.take()?;
        let breakdown = self
            .scoring
            .xp_breakdown(session.duration_seconds, session.distraction_count);
        session.end_time = Some(now);
        session.xp_breakdown = breakdown;
        session.xp_earned = breakdown.total();
        session.status = SessionStatus::Completed;

        out.record(self.machine.stop(reason));
        self.scoring.end_session(now);
        self.classified_content = None;
        self.idle_since = Some(now);

        log::info!(
            "Session {} finished ({reason}): {}s, {} XP",
            session.id,
            session.duration_seconds,
            session.xp_earned
        );
        out.effects
            .push(Effect::Persist(StoreRecord::SessionClosed(session.clone())));
        self.last_finalized = Some(session.clone());
        Some(session)
    }

    /// Per-tick time-based update
    fn advance(&mut self, now: DateTime<Utc>, out: &mut TickOutput) {
        let window = self.aggregator.tick(now);
        self.window = window;
        self.scoring.advance(now, self.machine.state());

        let Some(started) = self.session.as_ref().map(|s| s.start_time) else {
            return;
        };

        self.apm_sum += window.actions_per_minute;
        self.apm_ticks += 1;

        let last_activity = self
            .aggregator
            .last_sample_at()
            .map_or(started, |at| at.max(started));
        let transition = self.machine.observe(now, &window, last_activity);
        let timed_out = transition.is_some_and(|t| t.to == FlowState::Idle);
        out.record(transition);

        if timed_out {
            // The machine is already idle; finalize the session it left behind
            self.close_session(now, "idle timeout", out);
        } else {
            self.sync_session(now);
        }
    }

    /// Copy live metrics into the open session record
    fn sync_session(&mut self, now: DateTime<Utc>) {
        let metrics = *self.scoring.state();
        let apm_average = if self.apm_ticks == 0 {
            0.0
        } else {
            self.apm_sum / f64::from(self.apm_ticks)
        };
        if let Some(session) = &mut self.session {
            let elapsed = (now - session.start_time).num_seconds().max(0);
            session.duration_seconds = u32::try_from(elapsed).unwrap_or(u32::MAX);
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let flow_seconds = metrics.flow_seconds.max(0.0) as u32;
            session.flow_seconds = flow_seconds;
            session.resilience_score = metrics.resilience;
            session.focus_score = metrics.focus_score;
            session.fatigue_score = metrics.fatigue_score;
            session.apm_average = apm_average;
        }
    }

    fn build_snapshot(&self, now: DateTime<Utc>) -> StatusSnapshot {
        let metrics = self.scoring.state();
        let (xp, session_duration, distraction_count) = match &self.session {
            Some(s) => (
                self.scoring
                    .xp_breakdown(s.duration_seconds, s.distraction_count)
                    .total(),
                u64::from(s.duration_seconds),
                s.distraction_count,
            ),
            None => (0, 0, 0),
        };

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let flow_seconds = metrics.flow_seconds.max(0.0) as u64;

        StatusSnapshot {
            is_running: self.session.is_some(),
            state: self.machine.state(),
            session_id: self.session.as_ref().map(|s| s.id),
            energy: metrics.energy,
            fatigue_score: metrics.fatigue_score,
            fatigue_alert: self.scoring.fatigue_alert(),
            resilience: metrics.resilience,
            xp,
            focus_score: metrics.focus_score,
            current_task: self.session.as_ref().and_then(|s| s.current_task.clone()),
            current_content: self
                .aggregator
                .current_content()
                .map(|c| c.content_ref.clone()),
            session_duration,
            flow_seconds: if self.session.is_some() { flow_seconds } else { 0 },
            apm: self.window.actions_per_minute,
            activity_pattern: self.window.activity_pattern,
            distraction_count,
            pending_intervention: self.policy.pending().cloned(),
            dropped_samples: self.bus.dropped().total(),
            updated_at: Some(now),
        }
    }
}
