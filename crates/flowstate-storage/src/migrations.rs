use anyhow::Result;
use rusqlite::Connection;

/// Initialize database schema
///
/// # Errors
///
/// Returns an error if database table creation or index creation fails
pub fn init_schema(conn: &Connection) -> Result<()> {
    // Sessions table - one row per tracked focus session
    conn.execute(
        "CREATE TABLE IF NOT EXISTS sessions (
            id TEXT PRIMARY KEY,
            start_time TEXT NOT NULL,
            end_time TEXT,
            duration_seconds INTEGER NOT NULL DEFAULT 0,
            flow_seconds INTEGER NOT NULL DEFAULT 0,
            distraction_count INTEGER NOT NULL DEFAULT 0,
            resilience_score INTEGER NOT NULL DEFAULT 0,
            focus_score REAL NOT NULL DEFAULT 100,
            fatigue_score REAL NOT NULL DEFAULT 0,
            apm_average REAL NOT NULL DEFAULT 0,
            xp_earned INTEGER NOT NULL DEFAULT 0,
            xp_breakdown TEXT NOT NULL DEFAULT '{}',
            current_task TEXT,
            status TEXT NOT NULL DEFAULT 'open'
        )",
        [],
    )?;

    // Intervention events - immutable distraction encounters
    conn.execute(
        "CREATE TABLE IF NOT EXISTS intervention_events (
            id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL,
            trigger_content_ref TEXT NOT NULL,
            classification TEXT NOT NULL,
            decision TEXT NOT NULL,
            resilience_delta INTEGER NOT NULL,
            xp_delta INTEGER NOT NULL,
            occurred_at TEXT NOT NULL,
            resolved_at TEXT NOT NULL,
            FOREIGN KEY (session_id) REFERENCES sessions(id)
        )",
        [],
    )?;

    // User profile - single row of cross-session totals
    conn.execute(
        "CREATE TABLE IF NOT EXISTS user_profile (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            level INTEGER NOT NULL DEFAULT 1,
            total_xp INTEGER NOT NULL DEFAULT 0,
            focus REAL NOT NULL DEFAULT 0,
            stamina REAL NOT NULL DEFAULT 0,
            resilience REAL NOT NULL DEFAULT 0,
            consistency REAL NOT NULL DEFAULT 0,
            sessions_count INTEGER NOT NULL DEFAULT 0,
            streak_days INTEGER NOT NULL DEFAULT 0,
            last_session_date TEXT
        )",
        [],
    )?;

    // Flow windows - flow quality per calendar hour
    conn.execute(
        "CREATE TABLE IF NOT EXISTS flow_windows (
            date TEXT NOT NULL,
            hour INTEGER NOT NULL,
            flow_quality REAL NOT NULL,
            apm_average REAL NOT NULL,
            duration_minutes INTEGER NOT NULL,
            PRIMARY KEY (date, hour)
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_sessions_start_time ON sessions(start_time)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_sessions_status ON sessions(status)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_intervention_events_session
         ON intervention_events(session_id)",
        [],
    )?;

    Ok(())
}

/// Insert the profile row if this is a fresh database
///
/// # Errors
///
/// Returns an error if the insert fails
pub fn insert_default_profile(conn: &Connection) -> Result<()> {
    conn.execute("INSERT OR IGNORE INTO user_profile (id) VALUES (1)", [])?;
    Ok(())
}
