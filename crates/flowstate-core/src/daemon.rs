use crate::{
    adaptation::adapt_config,
    ai_classifier::AiClassifier,
    classifier::{ContentClassifier, KeywordClassifier, ResilientClassifier},
    config::EngineConfig,
    engine::{Command, CommandOutcome, Effect, Engine, StatusSnapshot},
    ipc::{listen, socket_path, DaemonIpcHandler},
    recorder::{SessionRecorder, StoreRecord},
};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use flowstate_ai::AiService;
use flowstate_storage::Database;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
    time::interval,
};

struct Envelope {
    command: Command,
    reply: Option<oneshot::Sender<CommandOutcome>>,
}

/// Cloneable handle for submitting commands to the engine and reading its
/// last committed status
#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::UnboundedSender<Envelope>,
    status: watch::Receiver<StatusSnapshot>,
}

impl EngineHandle {
    /// Queue a command; the outcome arrives after the next tick
    ///
    /// # Errors
    ///
    /// Returns an error if the daemon has stopped
    pub fn submit(&self, command: Command) -> Result<oneshot::Receiver<CommandOutcome>> {
        let (reply, outcome) = oneshot::channel();
        self.commands
            .send(Envelope {
                command,
                reply: Some(reply),
            })
            .map_err(|_| anyhow::anyhow!("engine is not running"))?;
        Ok(outcome)
    }

    /// Queue a command and wait for its outcome
    ///
    /// # Errors
    ///
    /// Returns an error if the daemon stops before answering
    pub async fn send(&self, command: Command) -> Result<CommandOutcome> {
        self.submit(command)?
            .await
            .context("engine stopped before answering")
    }

    /// Queue a command without waiting for the outcome
    ///
    /// # Errors
    ///
    /// Returns an error if the daemon has stopped
    pub fn post(&self, command: Command) -> Result<()> {
        self.commands
            .send(Envelope {
                command,
                reply: None,
            })
            .map_err(|_| anyhow::anyhow!("engine is not running"))
    }

    /// Status committed by the last completed tick
    #[must_use]
    pub fn status(&self) -> StatusSnapshot {
        self.status.borrow().clone()
    }
}

pub struct Daemon {
    engine: Engine,
    classifier: Arc<ResilientClassifier>,
    commands: mpsc::UnboundedReceiver<Envelope>,
    handle: EngineHandle,
    status_tx: watch::Sender<StatusSnapshot>,
    store_tx: Option<mpsc::UnboundedSender<StoreRecord>>,
    /// Recorder waiting to be spawned, with its receiving end
    recorder: Option<(SessionRecorder<Database>, mpsc::UnboundedReceiver<StoreRecord>)>,
    recorder_task: Option<JoinHandle<()>>,
    shutdown_signal: Arc<AtomicBool>,
}

fn build_classifier(config: &EngineConfig) -> Result<ResilientClassifier> {
    let fallback = KeywordClassifier::from_config(&config.classifier)?;
    if !config.ai.enabled {
        log::info!("Remote classification disabled, using keyword rules only");
        return Ok(ResilientClassifier::offline(fallback));
    }

    match AiService::new(config.ai.clone()) {
        Ok(service) => {
            log::info!(
                "Classifying content with {} ({})",
                config.ai.provider,
                service.model_name()
            );
            let remote: Arc<dyn ContentClassifier> = Arc::new(AiClassifier::new(
                Arc::new(service),
                config.classifier.cache_size,
            ));
            Ok(ResilientClassifier::new(
                Some(remote),
                fallback,
                Duration::from_millis(config.classifier.timeout_ms),
            ))
        }
        Err(e) => {
            log::info!("Remote classifier unavailable ({e:#}), using keyword rules only");
            Ok(ResilientClassifier::offline(fallback))
        }
    }
}

impl Daemon {
    /// Build the daemon. Sessions left open by a previous run are marked
    /// abandoned before anything else happens.
    ///
    /// # Errors
    ///
    /// Returns an error if crash recovery or adaptation fails, or a classifier
    /// rule is invalid
    pub fn new(config: EngineConfig, database: Arc<Database>) -> Result<Self> {
        let now = Utc::now();
        let recovered = database.abandon_open_sessions(now)?;
        if recovered > 0 {
            log::warn!("Marked {recovered} session(s) from a previous run as abandoned");
        }
        let config = adapt_config(config, &database, now)?;

        let classifier = Arc::new(build_classifier(&config)?);
        let engine = Engine::new(config);
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(StatusSnapshot::default());
        let (store_tx, store_rx) = mpsc::unbounded_channel();

        Ok(Self {
            engine,
            classifier,
            commands,
            handle: EngineHandle {
                commands: commands_tx,
                status: status_rx,
            },
            status_tx,
            store_tx: Some(store_tx),
            recorder: Some((SessionRecorder::new(database), store_rx)),
            recorder_task: None,
            shutdown_signal: Arc::new(AtomicBool::new(false)),
        })
    }

    #[must_use]
    pub fn handle(&self) -> EngineHandle {
        self.handle.clone()
    }

    /// Flag checked after every tick of [`Daemon::run_with_signals`]
    #[must_use]
    pub fn shutdown_signal(&self) -> Arc<AtomicBool> {
        self.shutdown_signal.clone()
    }

    /// Spawn the write-behind recorder if it is not running yet
    pub fn start_recorder(&mut self) {
        if let Some((recorder, records)) = self.recorder.take() {
            let retry = Duration::from_secs(self.engine.config().tick.flush_interval_secs);
            self.recorder_task = Some(tokio::spawn(recorder.run(records, retry)));
        }
    }

    pub async fn run_with_signals(&mut self) -> Result<()> {
        let sock_path = socket_path()?;
        self.start_recorder();

        let ipc_handler = Arc::new(DaemonIpcHandler::new(
            self.handle(),
            self.shutdown_signal.clone(),
        ));
        let listen_path = sock_path.clone();
        tokio::spawn(async move {
            if let Err(e) = listen(ipc_handler, &listen_path).await {
                log::error!("IPC listener failed: {e}");
            }
        });

        let mut interval = interval(Duration::from_millis(self.engine.config().tick.interval_ms));
        log::info!("Daemon started with signal handling and IPC");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick_at(Utc::now());
                }
                _ = tokio::signal::ctrl_c() => {
                    log::info!("Received Ctrl-C, shutting down...");
                    self.shutdown_signal.store(true, Ordering::SeqCst);
                }
            }

            if self.shutdown_signal.load(Ordering::SeqCst) {
                break;
            }
        }

        self.finish(Utc::now()).await;
        if sock_path.exists() {
            if let Err(e) = std::fs::remove_file(&sock_path) {
                log::warn!("Failed to remove {}: {e}", sock_path.display());
            }
        }
        log::info!("Daemon shut down gracefully.");
        Ok(())
    }

    /// Run one engine tick over everything queued since the last one
    pub fn tick_at(&mut self, now: DateTime<Utc>) {
        let mut commands = Vec::new();
        let mut replies = Vec::new();
        while let Ok(envelope) = self.commands.try_recv() {
            commands.push(envelope.command);
            replies.push(envelope.reply);
        }

        let report = self.engine.tick(now, commands);

        for (reply, outcome) in replies.into_iter().zip(report.outcomes) {
            if let Some(reply) = reply {
                // The client may have given up waiting
                let _ = reply.send(outcome);
            }
        }
        for transition in &report.transitions {
            log::info!(
                "{} -> {} ({})",
                transition.from,
                transition.to,
                transition.reason
            );
        }
        for effect in report.effects {
            self.run_effect(effect);
        }

        self.status_tx.send_replace(report.snapshot);
    }

    fn run_effect(&self, effect: Effect) {
        match effect {
            Effect::Classify { content_ref, app } => {
                let classifier = self.classifier.clone();
                let handle = self.handle();
                tokio::spawn(async move {
                    let (verdict, source) = classifier.classify(&content_ref, app.as_deref()).await;
                    let command = Command::Classified {
                        content_ref,
                        verdict,
                        source,
                    };
                    if let Err(e) = handle.post(command) {
                        log::debug!("Dropping classification: {e}");
                    }
                });
            }
            Effect::Persist(record) => match &self.store_tx {
                Some(store) => {
                    if store.send(record).is_err() {
                        log::error!("Recorder is gone, record lost");
                    }
                }
                None => log::error!("Recorder already closed, record lost"),
            },
        }
    }

    /// Finalize any open session and wait for the recorder to drain
    pub async fn finish(&mut self, now: DateTime<Utc>) {
        self.start_recorder();
        if self.handle.post(Command::Stop).is_ok() {
            self.tick_at(now);
        }

        self.store_tx = None;
        if let Some(task) = self.recorder_task.take() {
            if let Err(e) = task.await {
                log::error!("Recorder task failed: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::ClassificationSource;
    use chrono::TimeZone;
    use flowstate_storage::{Classification, Decision, InterventionEvent, Session, SessionStatus};
    use uuid::Uuid;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 2, 9, 0, 0).unwrap() + chrono::Duration::seconds(secs)
    }

    fn offline_config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.ai.enabled = false;
        config
    }

    #[tokio::test]
    async fn test_commands_answered_at_tick() {
        let db = Arc::new(Database::in_memory().unwrap());
        let mut daemon = Daemon::new(offline_config(), db.clone()).unwrap();
        let handle = daemon.handle();

        let started = handle
            .submit(Command::Start {
                task: Some(String::from("write docs")),
            })
            .unwrap();
        daemon.tick_at(t(0));
        let CommandOutcome::Started(session) = started.await.unwrap() else {
            panic!("expected start");
        };
        assert!(handle.status().is_running);
        assert_eq!(handle.status().session_id, Some(session.id));

        let stopped = handle.submit(Command::Stop).unwrap();
        daemon.tick_at(t(300));
        assert!(matches!(stopped.await.unwrap(), CommandOutcome::Stopped(Some(_))));

        daemon.finish(t(301)).await;
        let saved = db.get_session(session.id).unwrap().unwrap();
        assert_eq!(saved.status, SessionStatus::Completed);
        assert_eq!(saved.duration_seconds, 300);
    }

    #[tokio::test]
    async fn test_finish_closes_open_session() {
        let db = Arc::new(Database::in_memory().unwrap());
        let mut daemon = Daemon::new(offline_config(), db.clone()).unwrap();
        daemon.handle().post(Command::Start { task: None }).unwrap();
        daemon.tick_at(t(0));
        let id = daemon.handle().status().session_id.unwrap();

        daemon.finish(t(90)).await;
        let saved = db.get_session(id).unwrap().unwrap();
        assert_eq!(saved.status, SessionStatus::Completed);
        assert_eq!(db.get_profile().unwrap().sessions_count, 1);
    }

    #[tokio::test]
    async fn test_open_sessions_abandoned_on_start() {
        let db = Arc::new(Database::in_memory().unwrap());
        let leftover = Session::open(t(0), None);
        db.upsert_session(&leftover).unwrap();

        let _daemon = Daemon::new(offline_config(), db.clone()).unwrap();
        let saved = db.get_session(leftover.id).unwrap().unwrap();
        assert_eq!(saved.status, SessionStatus::Abandoned);
        assert_eq!(db.get_profile().unwrap().total_xp, 0);
    }

    #[tokio::test]
    async fn test_reported_content_visible_in_status() {
        let db = Arc::new(Database::in_memory().unwrap());
        let mut daemon = Daemon::new(offline_config(), db).unwrap();
        let handle = daemon.handle();

        handle.post(Command::Start { task: None }).unwrap();
        handle
            .post(Command::Report(crate::signal_bus::RawSample::browser_nav(
                t(1),
                "https://www.youtube.com/watch?v=abc",
            )))
            .unwrap();
        daemon.tick_at(t(1));

        let status = handle.status();
        assert_eq!(
            status.current_content.as_deref(),
            Some("https://www.youtube.com/watch?v=abc")
        );
        assert!(status.pending_intervention.is_none());
    }

    #[tokio::test]
    async fn test_flow_breakers_blocked_on_start() {
        let db = Arc::new(Database::in_memory().unwrap());
        for _ in 0..5 {
            db.insert_intervention_event(&InterventionEvent {
                id: Uuid::new_v4(),
                session_id: Uuid::new_v4(),
                trigger_content_ref: String::from("https://news.ycombinator.com/news"),
                classification: Classification::Neutral,
                decision: Decision::OpenAnyway,
                resilience_delta: -10,
                xp_delta: 0,
                occurred_at: t(0),
                resolved_at: t(5),
            })
            .unwrap();
        }

        let daemon = Daemon::new(offline_config(), db).unwrap();
        let (verdict, source) = daemon
            .classifier
            .classify("https://news.ycombinator.com/item?id=1", None)
            .await;
        assert_eq!(verdict.classification, Classification::Distracting);
        assert_eq!(source, ClassificationSource::UserRule);
    }
}
