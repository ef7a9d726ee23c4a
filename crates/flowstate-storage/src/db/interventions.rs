use anyhow::Result;
use rusqlite::params;
use uuid::Uuid;

use crate::models::InterventionEvent;

use super::helpers::{parse_datetime, parse_enum, parse_uuid};
use super::Database;

impl Database {
    /// Record a resolved intervention event.
    ///
    /// Events are immutable: writing the same event twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the database insert operation fails
    pub fn insert_intervention_event(&self, event: &InterventionEvent) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR IGNORE INTO intervention_events (id, session_id, trigger_content_ref,
                 classification, decision, resilience_delta, xp_delta, occurred_at, resolved_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                event.id.to_string(),
                event.session_id.to_string(),
                event.trigger_content_ref,
                event.classification.to_string(),
                event.decision.to_string(),
                event.resilience_delta,
                event.xp_delta,
                event.occurred_at.to_rfc3339(),
                event.resolved_at.to_rfc3339(),
            ],
        )?;
        log::debug!(
            "Recorded intervention {} ({}) for session {}",
            event.id,
            event.decision,
            event.session_id
        );
        Ok(())
    }

    /// Get all intervention events of a session in the order they occurred
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails
    pub fn get_intervention_events(&self, session_id: Uuid) -> Result<Vec<InterventionEvent>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, session_id, trigger_content_ref, classification, decision,
                    resilience_delta, xp_delta, occurred_at, resolved_at
             FROM intervention_events
             WHERE session_id = ?1
             ORDER BY occurred_at ASC",
        )?;

        let events = stmt
            .query_map(params![session_id.to_string()], Self::row_to_intervention_event)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(events)
    }

    fn row_to_intervention_event(row: &rusqlite::Row) -> rusqlite::Result<InterventionEvent> {
        Ok(InterventionEvent {
            id: parse_uuid(&row.get::<_, String>(0)?)?,
            session_id: parse_uuid(&row.get::<_, String>(1)?)?,
            trigger_content_ref: row.get(2)?,
            classification: parse_enum(&row.get::<_, String>(3)?)?,
            decision: parse_enum(&row.get::<_, String>(4)?)?,
            resilience_delta: row.get(5)?,
            xp_delta: row.get(6)?,
            occurred_at: parse_datetime(&row.get::<_, String>(7)?)?,
            resolved_at: parse_datetime(&row.get::<_, String>(8)?)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::{Classification, Database, Decision, InterventionEvent};
    use chrono::{Duration, TimeZone, Utc};
    use uuid::Uuid;

    fn event(session_id: Uuid, minutes: i64, decision: Decision) -> InterventionEvent {
        let at = Utc.with_ymd_and_hms(2024, 5, 2, 10, 0, 0).unwrap() + Duration::minutes(minutes);
        InterventionEvent {
            id: Uuid::new_v4(),
            session_id,
            trigger_content_ref: String::from("https://www.reddit.com/r/all"),
            classification: Classification::Distracting,
            decision,
            resilience_delta: if decision == Decision::OpenAnyway { -10 } else { 5 },
            xp_delta: if decision == Decision::OpenAnyway { 0 } else { 10 },
            occurred_at: at,
            resolved_at: at + Duration::seconds(4),
        }
    }

    #[test]
    fn test_events_are_ordered_and_idempotent() {
        let db = Database::in_memory().unwrap();
        let session_id = Uuid::new_v4();
        let later = event(session_id, 20, Decision::WaitForBreak);
        let earlier = event(session_id, 5, Decision::OpenAnyway);

        db.insert_intervention_event(&later).unwrap();
        db.insert_intervention_event(&earlier).unwrap();
        db.insert_intervention_event(&later).unwrap();

        let events = db.get_intervention_events(session_id).unwrap();
        assert_eq!(events, vec![earlier, later]);
    }
}
