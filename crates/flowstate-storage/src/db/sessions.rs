use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::models::{FlowWindow, Session, SessionStatus, XpBreakdown};

use super::flow_windows::log_flow_window_in;
use super::helpers::{parse_datetime, parse_enum, parse_uuid};
use super::profile::{load_profile, save_profile};
use super::Database;

const SESSION_COLUMNS: &str = "id, start_time, end_time, duration_seconds, flow_seconds,
     distraction_count, resilience_score, focus_score, fatigue_score, apm_average,
     xp_earned, xp_breakdown, current_task, status";

impl Database {
    /// Insert or update a session row. A row that is already closed is left
    /// untouched, so a late open record cannot reopen it.
    ///
    /// # Errors
    ///
    /// Returns an error if the database upsert operation fails
    pub fn upsert_session(&self, session: &Session) -> Result<()> {
        let conn = self.lock()?;
        upsert_session_in(&conn, session)
    }

    /// Persist a finalized session and fold it into the user profile.
    ///
    /// Returns `false` when the session was already closed in the store, so a
    /// retried write never awards XP twice.
    ///
    /// # Errors
    ///
    /// Returns an error if any statement in the transaction fails
    pub fn close_session(&self, session: &Session) -> Result<bool> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let existing: Option<String> = tx
            .query_row(
                "SELECT status FROM sessions WHERE id = ?1",
                params![session.id.to_string()],
                |row| row.get(0),
            )
            .optional()?;

        if existing.is_some_and(|status| status != SessionStatus::Open.to_string()) {
            log::debug!("Session {} already closed, skipping", session.id);
            return Ok(false);
        }

        upsert_session_in(&tx, session)?;

        if session.status == SessionStatus::Completed {
            let mut profile = load_profile(&tx)?;
            profile.absorb_session(session);
            save_profile(&tx, &profile)?;
            log_flow_window_in(&tx, &FlowWindow::from_session(session))?;
        }

        tx.commit().context("Failed to commit session close")?;
        log::info!(
            "Closed session {} ({}, {} XP)",
            session.id,
            session.status,
            session.xp_earned
        );
        Ok(true)
    }

    /// Mark every session left open (e.g. by a crashed engine) as abandoned
    ///
    /// # Errors
    ///
    /// Returns an error if the database update fails
    pub fn abandon_open_sessions(&self, now: DateTime<Utc>) -> Result<u32> {
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE sessions
             SET status = ?1, end_time = ?2, xp_earned = 0
             WHERE status = ?3",
            params![
                SessionStatus::Abandoned.to_string(),
                now.to_rfc3339(),
                SessionStatus::Open.to_string(),
            ],
        )?;
        let updated = u32::try_from(updated).unwrap_or(u32::MAX);
        if updated > 0 {
            log::warn!("Marked {updated} unfinished session(s) as abandoned");
        }
        Ok(updated)
    }

    /// Get a session by ID
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails
    pub fn get_session(&self, id: Uuid) -> Result<Option<Session>> {
        let conn = self.lock()?;
        let session = conn
            .query_row(
                &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"),
                params![id.to_string()],
                row_to_session,
            )
            .optional()?;
        Ok(session)
    }

    /// Get sessions that have no end time
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails
    pub fn get_open_sessions(&self) -> Result<Vec<Session>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE status = ?1 ORDER BY start_time DESC"
        ))?;
        let sessions = stmt
            .query_map(params![SessionStatus::Open.to_string()], row_to_session)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(sessions)
    }

    /// Get the most recent sessions, newest first
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails
    pub fn get_recent_sessions(&self, limit: u32) -> Result<Vec<Session>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions ORDER BY start_time DESC LIMIT ?1"
        ))?;
        let sessions = stmt
            .query_map(params![limit], row_to_session)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(sessions)
    }
}

fn upsert_session_in(conn: &Connection, session: &Session) -> Result<()> {
    let breakdown = serde_json::to_string(&session.xp_breakdown)?;
    conn.execute(
        "INSERT INTO sessions (id, start_time, end_time, duration_seconds, flow_seconds,
             distraction_count, resilience_score, focus_score, fatigue_score, apm_average,
             xp_earned, xp_breakdown, current_task, status)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
         ON CONFLICT(id) DO UPDATE SET
             end_time = excluded.end_time,
             duration_seconds = excluded.duration_seconds,
             flow_seconds = excluded.flow_seconds,
             distraction_count = excluded.distraction_count,
             resilience_score = excluded.resilience_score,
             focus_score = excluded.focus_score,
             fatigue_score = excluded.fatigue_score,
             apm_average = excluded.apm_average,
             xp_earned = excluded.xp_earned,
             xp_breakdown = excluded.xp_breakdown,
             current_task = excluded.current_task,
             status = excluded.status
         WHERE sessions.status = 'open'",
        params![
            session.id.to_string(),
            session.start_time.to_rfc3339(),
            session.end_time.map(|t| t.to_rfc3339()),
            session.duration_seconds,
            session.flow_seconds,
            session.distraction_count,
            session.resilience_score,
            session.focus_score,
            session.fatigue_score,
            session.apm_average,
            session.xp_earned,
            breakdown,
            session.current_task,
            session.status.to_string(),
        ],
    )?;
    Ok(())
}

fn row_to_session(row: &rusqlite::Row) -> rusqlite::Result<Session> {
    let breakdown_json: String = row.get(11)?;
    let xp_breakdown: XpBreakdown = serde_json::from_str(&breakdown_json).unwrap_or_default();

    Ok(Session {
        id: parse_uuid(&row.get::<_, String>(0)?)?,
        start_time: parse_datetime(&row.get::<_, String>(1)?)?,
        end_time: row
            .get::<_, Option<String>>(2)?
            .map(|s| parse_datetime(&s))
            .transpose()?,
        duration_seconds: row.get(3)?,
        flow_seconds: row.get(4)?,
        distraction_count: row.get(5)?,
        resilience_score: row.get(6)?,
        focus_score: row.get(7)?,
        fatigue_score: row.get(8)?,
        apm_average: row.get(9)?,
        xp_earned: row.get(10)?,
        xp_breakdown,
        current_task: row.get(12)?,
        status: parse_enum(&row.get::<_, String>(13)?)?,
    })
}
