//! Write-behind persistence of sessions and intervention events.

use anyhow::Result;
use chrono::{DateTime, Utc};
use flowstate_storage::{Database, InterventionEvent, Session};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Immutable record handed to the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StoreRecord {
    SessionOpened(Session),
    SessionClosed(Session),
    Intervention(InterventionEvent),
}

impl StoreRecord {
    fn describe(&self) -> String {
        match self {
            Self::SessionOpened(s) => format!("session {} opened", s.id),
            Self::SessionClosed(s) => format!("session {} closed", s.id),
            Self::Intervention(e) => format!("intervention {}", e.id),
        }
    }
}

/// Persistence boundary of the engine
pub trait SessionStore: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if the write fails; the record will be retried
    fn session_opened(&self, session: &Session) -> Result<()>;

    /// Persist a finalized session. Must be idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails; the record will be retried
    fn session_closed(&self, session: &Session) -> Result<()>;

    /// # Errors
    ///
    /// Returns an error if the write fails; the record will be retried
    fn intervention_recorded(&self, event: &InterventionEvent) -> Result<()>;

    /// Mark sessions left open by a previous run as abandoned
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails
    fn abandon_open_sessions(&self, now: DateTime<Utc>) -> Result<u32>;
}

impl SessionStore for Database {
    fn session_opened(&self, session: &Session) -> Result<()> {
        self.upsert_session(session)
    }

    fn session_closed(&self, session: &Session) -> Result<()> {
        self.close_session(session).map(|_| ())
    }

    fn intervention_recorded(&self, event: &InterventionEvent) -> Result<()> {
        self.insert_intervention_event(event)
    }

    fn abandon_open_sessions(&self, now: DateTime<Utc>) -> Result<u32> {
        Self::abandon_open_sessions(self, now)
    }
}

/// Outcome of one flush
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub written: usize,
    pub failed: usize,
}

/// Queue of records with retry of failed writes on the next flush
pub struct SessionRecorder<S: SessionStore + ?Sized> {
    store: Arc<S>,
    pending: VecDeque<StoreRecord>,
}

impl<S: SessionStore + ?Sized> SessionRecorder<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            pending: VecDeque::new(),
        }
    }

    pub fn enqueue(&mut self, record: StoreRecord) {
        self.pending.push_back(record);
    }

    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Write queued records in order. The first failure stops the pass and
    /// leaves it, and everything behind it, queued for the next flush.
    pub fn flush(&mut self) -> FlushReport {
        let mut report = FlushReport::default();

        while let Some(record) = self.pending.front() {
            let result = match record {
                StoreRecord::SessionOpened(s) => self.store.session_opened(s),
                StoreRecord::SessionClosed(s) => self.store.session_closed(s),
                StoreRecord::Intervention(e) => self.store.intervention_recorded(e),
            };
            if let Err(e) = result {
                log::error!("Failed to persist {}: {e:#}", record.describe());
                report.failed += 1;
                break;
            }
            self.pending.pop_front();
            report.written += 1;
        }

        if report.failed > 0 {
            log::warn!(
                "{} record(s) will be retried on the next flush",
                self.pending.len()
            );
        }
        report
    }

    /// Receive records until the sender side closes, flushing as they arrive
    /// and retrying failures every `retry_interval`.
    pub async fn run(
        mut self,
        mut records: mpsc::UnboundedReceiver<StoreRecord>,
        retry_interval: Duration,
    ) {
        let mut interval = tokio::time::interval(retry_interval);
        loop {
            tokio::select! {
                received = records.recv() => match received {
                    Some(record) => {
                        self.enqueue(record);
                        self.flush();
                    }
                    None => break,
                },
                _ = interval.tick() => {
                    if self.pending_len() > 0 {
                        self.flush();
                    }
                }
            }
        }

        self.flush();
        if self.pending_len() > 0 {
            log::error!(
                "Recorder stopped with {} unsaved record(s)",
                self.pending_len()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use flowstate_storage::SessionStatus;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Database wrapper that fails the first `failures` writes
    struct FlakyStore {
        db: Database,
        failures: AtomicUsize,
    }

    impl FlakyStore {
        fn check(&self) -> Result<()> {
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                anyhow::bail!("disk I/O error");
            }
            Ok(())
        }
    }

    impl SessionStore for FlakyStore {
        fn session_opened(&self, session: &Session) -> Result<()> {
            self.check()?;
            self.db.session_opened(session)
        }

        fn session_closed(&self, session: &Session) -> Result<()> {
            self.check()?;
            self.db.session_closed(session)
        }

        fn intervention_recorded(&self, event: &InterventionEvent) -> Result<()> {
            self.check()?;
            self.db.intervention_recorded(event)
        }

        fn abandon_open_sessions(&self, now: DateTime<Utc>) -> Result<u32> {
            self.db.abandon_open_sessions(now)
        }
    }

    fn open_session() -> Session {
        let start = Utc.with_ymd_and_hms(2024, 5, 2, 9, 0, 0).unwrap();
        Session::open(start, None)
    }

    fn closed(open: &Session) -> Session {
        let mut session = open.clone();
        let start = session.start_time;
        session.end_time = Some(start + chrono::Duration::minutes(20));
        session.duration_seconds = 1200;
        session.xp_earned = 60;
        session.status = SessionStatus::Completed;
        session
    }

    #[test]
    fn test_failed_writes_retried_next_flush() {
        let store = Arc::new(FlakyStore {
            db: Database::in_memory().unwrap(),
            failures: AtomicUsize::new(1),
        });
        let mut recorder = SessionRecorder::new(store.clone());
        recorder.enqueue(StoreRecord::SessionClosed(closed(&open_session())));

        let first = recorder.flush();
        assert_eq!(first, FlushReport { written: 0, failed: 1 });
        assert_eq!(recorder.pending_len(), 1);

        let second = recorder.flush();
        assert_eq!(second, FlushReport { written: 1, failed: 0 });
        assert_eq!(store.db.get_profile().unwrap().total_xp, 60);
    }

    #[test]
    fn test_duplicate_close_awards_xp_once() {
        let store = Arc::new(Database::in_memory().unwrap());
        let mut recorder = SessionRecorder::new(store.clone());
        let session = closed(&open_session());
        recorder.enqueue(StoreRecord::SessionClosed(session.clone()));
        recorder.enqueue(StoreRecord::SessionClosed(session));
        recorder.flush();
        assert_eq!(store.get_profile().unwrap().total_xp, 60);
    }

    #[test]
    fn test_failed_open_does_not_reopen_closed_session() {
        let store = Arc::new(FlakyStore {
            db: Database::in_memory().unwrap(),
            failures: AtomicUsize::new(1),
        });
        let mut recorder = SessionRecorder::new(store.clone());
        let opened = open_session();
        let session = closed(&opened);
        recorder.enqueue(StoreRecord::SessionOpened(opened));
        recorder.enqueue(StoreRecord::SessionClosed(session.clone()));

        let first = recorder.flush();
        assert_eq!(first, FlushReport { written: 0, failed: 1 });
        assert_eq!(recorder.pending_len(), 2);
        assert!(store.db.get_session(session.id).unwrap().is_none());

        let second = recorder.flush();
        assert_eq!(second, FlushReport { written: 2, failed: 0 });

        let saved = store.db.get_session(session.id).unwrap().unwrap();
        assert_eq!(saved.status, SessionStatus::Completed);
        assert_eq!(saved.end_time, session.end_time);
        assert!(store.db.get_open_sessions().unwrap().is_empty());
        assert_eq!(store.db.get_profile().unwrap().total_xp, 60);
    }

    #[tokio::test]
    async fn test_run_drains_channel_before_exit() {
        let store = Arc::new(Database::in_memory().unwrap());
        let recorder = SessionRecorder::new(store.clone());
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(recorder.run(rx, Duration::from_millis(20)));

        let opened = open_session();
        let session = closed(&opened);
        tx.send(StoreRecord::SessionOpened(opened)).unwrap();
        tx.send(StoreRecord::SessionClosed(session.clone())).unwrap();
        drop(tx);
        task.await.unwrap();

        let saved = store.get_session(session.id).unwrap().unwrap();
        assert_eq!(saved.status, SessionStatus::Completed);
    }
}
