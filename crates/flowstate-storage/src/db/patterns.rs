use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::params;
use std::collections::HashMap;

use crate::models::{content_source, Decision, FlowBreaker, SessionPerformance, SessionStatus};

use super::helpers::parse_datetime;
use super::Database;

impl Database {
    /// Content sources the user opened anyway at least `min_breaks` times,
    /// most frequent first
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails
    pub fn get_flow_breakers(&self, min_breaks: u32) -> Result<Vec<FlowBreaker>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT trigger_content_ref, resolved_at
             FROM intervention_events
             WHERE decision = ?1",
        )?;
        let rows = stmt
            .query_map(params![Decision::OpenAnyway.to_string()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    parse_datetime(&row.get::<_, String>(1)?)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut counts: HashMap<String, (u32, DateTime<Utc>)> = HashMap::new();
        for (content_ref, resolved_at) in rows {
            let entry = counts
                .entry(content_source(&content_ref))
                .or_insert((0, resolved_at));
            entry.0 += 1;
            entry.1 = entry.1.max(resolved_at);
        }

        let mut breakers: Vec<FlowBreaker> = counts
            .into_iter()
            .filter(|(_, (breaks, _))| *breaks >= min_breaks)
            .map(|(source, (flow_breaks, last_break))| FlowBreaker {
                source,
                flow_breaks,
                last_break,
            })
            .collect();
        breakers.sort_by(|a, b| {
            b.flow_breaks
                .cmp(&a.flow_breaks)
                .then_with(|| a.source.cmp(&b.source))
        });
        Ok(breakers)
    }

    /// Completed sessions started since `since`, newest first
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails
    pub fn get_recent_performance(
        &self,
        since: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<SessionPerformance>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT duration_seconds, focus_score
             FROM sessions
             WHERE status = ?1 AND start_time >= ?2 AND duration_seconds > 0
             ORDER BY start_time DESC
             LIMIT ?3",
        )?;
        let sessions = stmt
            .query_map(
                params![SessionStatus::Completed.to_string(), since.to_rfc3339(), limit],
                |row| {
                    Ok(SessionPerformance {
                        duration_seconds: row.get(0)?,
                        focus_score: row.get(1)?,
                    })
                },
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(sessions)
    }
}

#[cfg(test)]
mod tests {
    use crate::models::{Classification, Decision, InterventionEvent, Session, SessionStatus};
    use crate::Database;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use uuid::Uuid;

    fn t(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 2, 9, 0, 0).unwrap() + Duration::minutes(minutes)
    }

    fn event(content_ref: &str, decision: Decision, minutes: i64) -> InterventionEvent {
        InterventionEvent {
            id: Uuid::new_v4(),
            session_id: Uuid::new_v4(),
            trigger_content_ref: content_ref.to_string(),
            classification: Classification::Distracting,
            decision,
            resilience_delta: 0,
            xp_delta: 0,
            occurred_at: t(minutes),
            resolved_at: t(minutes),
        }
    }

    #[test]
    fn test_flow_breakers_grouped_by_host() {
        let db = Database::in_memory().unwrap();
        for (i, url) in [
            "https://www.reddit.com/r/rust",
            "https://reddit.com/r/programming",
            "https://old.reddit.com/",
            "https://reddit.com/",
            "https://www.youtube.com/watch?v=1",
        ]
        .iter()
        .enumerate()
        {
            let minutes = i64::try_from(i).unwrap();
            db.insert_intervention_event(&event(url, Decision::OpenAnyway, minutes))
                .unwrap();
        }
        // Resisting does not count as a break
        db.insert_intervention_event(&event("https://youtube.com/", Decision::WaitForBreak, 9))
            .unwrap();

        let breakers = db.get_flow_breakers(1).unwrap();
        assert_eq!(breakers.len(), 3);
        assert_eq!(breakers[0].source, "reddit.com");
        assert_eq!(breakers[0].flow_breaks, 3);
        assert_eq!(breakers[0].last_break, t(3));
        assert_eq!(breakers[1].source, "old.reddit.com");
        assert_eq!(breakers[2].source, "youtube.com");
        assert_eq!(breakers[2].flow_breaks, 1);

        assert_eq!(db.get_flow_breakers(3).unwrap().len(), 1);
        assert!(db.get_flow_breakers(4).unwrap().is_empty());
    }

    #[test]
    fn test_recent_performance_skips_old_and_abandoned() {
        let db = Database::in_memory().unwrap();
        let add = |start: DateTime<Utc>, status: SessionStatus, focus: f64| {
            let mut session = Session::open(start, None);
            session.end_time = Some(start + Duration::minutes(30));
            session.duration_seconds = 1800;
            session.focus_score = focus;
            session.status = status;
            db.upsert_session(&session).unwrap();
        };
        add(t(0), SessionStatus::Completed, 80.0);
        add(t(60), SessionStatus::Completed, 40.0);
        add(t(120), SessionStatus::Abandoned, 90.0);
        add(t(-60 * 24 * 30), SessionStatus::Completed, 95.0);

        let recent = db.get_recent_performance(t(-60 * 24 * 14), 20).unwrap();
        assert_eq!(recent.len(), 2);
        assert!((recent[0].focus_score - 40.0).abs() < f64::EPSILON);
        assert_eq!(recent[1].duration_seconds, 1800);
        assert_eq!(db.get_recent_performance(t(-60 * 24 * 14), 1).unwrap().len(), 1);
    }
}
