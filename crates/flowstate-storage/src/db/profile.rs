use anyhow::Result;
use rusqlite::{params, Connection};

use crate::models::{CognitiveProfile, UserProfile};

use super::helpers::parse_date;
use super::Database;

impl Database {
    /// Get the user profile (totals and cognitive profile)
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails
    pub fn get_profile(&self) -> Result<UserProfile> {
        let conn = self.lock()?;
        load_profile(&conn)
    }
}

pub(super) fn load_profile(conn: &Connection) -> Result<UserProfile> {
    let profile = conn.query_row(
        "SELECT level, total_xp, focus, stamina, resilience, consistency,
                sessions_count, streak_days, last_session_date
         FROM user_profile WHERE id = 1",
        [],
        |row| {
            let total_xp: i64 = row.get(1)?;
            Ok(UserProfile {
                level: row.get(0)?,
                total_xp: u64::try_from(total_xp).unwrap_or(0),
                cognitive_profile: CognitiveProfile {
                    focus: row.get(2)?,
                    stamina: row.get(3)?,
                    resilience: row.get(4)?,
                    consistency: row.get(5)?,
                },
                sessions_count: row.get(6)?,
                streak_days: row.get(7)?,
                last_session_date: row
                    .get::<_, Option<String>>(8)?
                    .map(|s| parse_date(&s))
                    .transpose()?,
            })
        },
    )?;
    Ok(profile)
}

pub(super) fn save_profile(conn: &Connection, profile: &UserProfile) -> Result<()> {
    let cp = &profile.cognitive_profile;
    conn.execute(
        "UPDATE user_profile SET
             level = ?1, total_xp = ?2, focus = ?3, stamina = ?4, resilience = ?5,
             consistency = ?6, sessions_count = ?7, streak_days = ?8, last_session_date = ?9
         WHERE id = 1",
        params![
            profile.level,
            i64::try_from(profile.total_xp).unwrap_or(i64::MAX),
            cp.focus,
            cp.stamina,
            cp.resilience,
            cp.consistency,
            profile.sessions_count,
            profile.streak_days,
            profile.last_session_date.map(|d| d.to_string()),
        ],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::{Database, UserProfile};

    #[test]
    fn test_fresh_profile_is_default() {
        let db = Database::in_memory().unwrap();
        assert_eq!(db.get_profile().unwrap(), UserProfile::default());
    }
}
