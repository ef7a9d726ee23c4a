use anyhow::Result;
use chrono::NaiveDate;
use rusqlite::{params, Connection};

use crate::models::{FlowWindow, HourQuality};

use super::Database;

impl Database {
    /// Hours of the day with the best average flow quality since `since`.
    ///
    /// Hours with fewer than `min_samples` logged windows are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails
    pub fn get_peak_flow_hours(
        &self,
        since: NaiveDate,
        min_samples: u32,
        limit: u32,
    ) -> Result<Vec<HourQuality>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT hour, AVG(flow_quality), SUM(duration_minutes), COUNT(*)
             FROM flow_windows
             WHERE date >= ?1
             GROUP BY hour
             HAVING COUNT(*) >= ?2
             ORDER BY AVG(flow_quality) DESC
             LIMIT ?3",
        )?;

        let hours = stmt
            .query_map(params![since.to_string(), min_samples, limit], |row| {
                Ok(HourQuality {
                    hour: row.get(0)?,
                    average_quality: row.get(1)?,
                    total_minutes: row.get(2)?,
                    samples: row.get(3)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(hours)
    }
}

/// Log a flow window, averaging quality with any earlier window in the same hour
pub(super) fn log_flow_window_in(conn: &Connection, window: &FlowWindow) -> Result<()> {
    conn.execute(
        "INSERT INTO flow_windows (date, hour, flow_quality, apm_average, duration_minutes)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(date, hour) DO UPDATE SET
             flow_quality = (flow_quality + excluded.flow_quality) / 2,
             apm_average = (apm_average + excluded.apm_average) / 2,
             duration_minutes = duration_minutes + excluded.duration_minutes",
        params![
            window.date.to_string(),
            window.hour,
            window.flow_quality,
            window.apm_average,
            window.duration_minutes,
        ],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::log_flow_window_in;
    use crate::{Database, FlowWindow};
    use chrono::NaiveDate;

    fn window(day: u32, hour: u32, quality: f64) -> FlowWindow {
        FlowWindow {
            date: NaiveDate::from_ymd_opt(2024, 5, day).unwrap(),
            hour,
            flow_quality: quality,
            apm_average: 40.0,
            duration_minutes: 30,
        }
    }

    #[test]
    fn test_peak_hours_ranked_by_quality() {
        let db = Database::in_memory().unwrap();
        {
            let conn = db.lock().unwrap();
            for day in 1..=3 {
                log_flow_window_in(&conn, &window(day, 9, 90.0)).unwrap();
                log_flow_window_in(&conn, &window(day, 15, 50.0)).unwrap();
            }
            log_flow_window_in(&conn, &window(1, 22, 99.0)).unwrap();
        }

        let since = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let hours = db.get_peak_flow_hours(since, 3, 5).unwrap();
        let ranked: Vec<u32> = hours.iter().map(|h| h.hour).collect();
        assert_eq!(ranked, vec![9, 15]);
        assert_eq!(hours[0].total_minutes, 90);
    }

    #[test]
    fn test_same_hour_windows_are_merged() {
        let db = Database::in_memory().unwrap();
        {
            let conn = db.lock().unwrap();
            log_flow_window_in(&conn, &window(1, 9, 80.0)).unwrap();
            log_flow_window_in(&conn, &window(1, 9, 60.0)).unwrap();
        }

        let since = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let hours = db.get_peak_flow_hours(since, 1, 5).unwrap();
        assert_eq!(hours.len(), 1);
        assert!((hours[0].average_quality - 70.0).abs() < 1e-9);
        assert_eq!(hours[0].total_minutes, 60);
    }
}
