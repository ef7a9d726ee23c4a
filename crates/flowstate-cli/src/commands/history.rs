/// History, profile and peak-hours command handlers
use anyhow::Result;
use chrono::{Duration, Local, Utc};
use flowstate_core::{
    adaptation::{
        advise_threshold, ThresholdTrend, TUNING_LOOKBACK_DAYS, TUNING_SESSION_LIMIT,
    },
    config::default_config_path,
    EngineConfig,
};
use flowstate_storage::{
    models::XP_PER_LEVEL, Database, FlowBreaker, HourQuality, Session, UserProfile,
};
use tabled::{Table, Tabled};

use super::helpers::{format_duration, print_rule, truncate_str};

#[derive(Tabled)]
struct SessionRow {
    #[tabled(rename = "Started")]
    started: String,
    #[tabled(rename = "Duration")]
    duration: String,
    #[tabled(rename = "Flow (min)")]
    flow_minutes: u32,
    #[tabled(rename = "Distractions")]
    distractions: u32,
    #[tabled(rename = "XP")]
    xp: u32,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Task")]
    task: String,
}

impl From<&Session> for SessionRow {
    fn from(session: &Session) -> Self {
        Self {
            started: session
                .start_time
                .with_timezone(&Local)
                .format("%Y-%m-%d %H:%M")
                .to_string(),
            duration: format_duration(u64::from(session.duration_seconds)),
            flow_minutes: session.flow_seconds / 60,
            distractions: session.distraction_count,
            xp: session.xp_earned,
            status: session.status.to_string(),
            task: session
                .current_task
                .as_deref()
                .map_or_else(String::new, |t| truncate_str(t, 30)),
        }
    }
}

#[derive(Tabled)]
struct HourRow {
    #[tabled(rename = "Hour (UTC)")]
    hour: String,
    #[tabled(rename = "Flow quality")]
    quality: String,
    #[tabled(rename = "Flow minutes")]
    minutes: u32,
    #[tabled(rename = "Sessions")]
    samples: u32,
}

impl From<&HourQuality> for HourRow {
    fn from(hour: &HourQuality) -> Self {
        Self {
            hour: format!("{:02}:00", hour.hour),
            quality: format!("{:.1}", hour.average_quality),
            minutes: hour.total_minutes,
            samples: hour.samples,
        }
    }
}

#[derive(Tabled)]
struct BreakerRow {
    #[tabled(rename = "Source")]
    source: String,
    #[tabled(rename = "Opened anyway")]
    flow_breaks: u32,
    #[tabled(rename = "Last time")]
    last_break: String,
}

impl From<&FlowBreaker> for BreakerRow {
    fn from(breaker: &FlowBreaker) -> Self {
        Self {
            source: truncate_str(&breaker.source, 40),
            flow_breaks: breaker.flow_breaks,
            last_break: breaker
                .last_break
                .with_timezone(&Local)
                .format("%Y-%m-%d %H:%M")
                .to_string(),
        }
    }
}

fn describe_trend(trend: ThresholdTrend) -> &'static str {
    match trend {
        ThresholdTrend::Baseline => "not enough recent sessions, keeping the configured value",
        ThresholdTrend::Raised => "most recent sessions went well, raising it",
        ThresholdTrend::Held => "holding steady",
        ThresholdTrend::Lowered => "recent sessions were a struggle, lowering it",
    }
}

pub fn handle_history_command(limit: u32) -> Result<()> {
    let db = Database::new(None)?;
    let sessions = db.get_recent_sessions(limit)?;

    if sessions.is_empty() {
        println!("No sessions recorded yet.");
        return Ok(());
    }

    println!("\nRecent sessions");
    print_rule(28);
    let rows: Vec<SessionRow> = sessions.iter().map(SessionRow::from).collect();
    println!("\n{}", Table::new(rows));

    let total_xp: u32 = sessions.iter().map(|s| s.xp_earned).sum();
    println!("\nXP across these sessions: {total_xp}");
    Ok(())
}

/// XP still needed to reach the next level
fn xp_to_next_level(profile: &UserProfile) -> u64 {
    let next_level_at = u64::from(profile.level) * XP_PER_LEVEL;
    next_level_at.saturating_sub(profile.total_xp)
}

pub fn handle_profile_command() -> Result<()> {
    let db = Database::new(None)?;
    let profile = db.get_profile()?;
    let cognitive = &profile.cognitive_profile;

    println!("\nLevel {}", profile.level);
    print_rule(28);
    println!("Total XP:      {}", profile.total_xp);
    println!("Next level in: {} XP", xp_to_next_level(&profile));
    println!("Sessions:      {}", profile.sessions_count);
    println!("Streak:        {} day(s)", profile.streak_days);
    if let Some(last) = profile.last_session_date {
        println!("Last session:  {last}");
    }

    println!("\nCognitive profile");
    println!("  focus        {:.1}", cognitive.focus);
    println!("  stamina      {:.1}", cognitive.stamina);
    println!("  resilience   {:.1}", cognitive.resilience);
    println!("  consistency  {:.1}", cognitive.consistency);
    Ok(())
}

pub fn handle_hours_command(days: u32, min_samples: u32) -> Result<()> {
    let db = Database::new(None)?;
    let since = (Utc::now() - Duration::days(i64::from(days))).date_naive();
    let hours = db.get_peak_flow_hours(since, min_samples, 5)?;

    if hours.is_empty() {
        println!("Not enough sessions in the last {days} days to find your best hours.");
        return Ok(());
    }

    println!("\nBest flow hours (last {days} days)");
    print_rule(28);
    let rows: Vec<HourRow> = hours.iter().map(HourRow::from).collect();
    println!("\n{}", Table::new(rows));
    Ok(())
}

pub fn handle_patterns_command() -> Result<()> {
    let config = EngineConfig::load(&default_config_path()?)?;
    let db = Database::new(None)?;

    let min_breaks = config.classifier.auto_block_after.max(1);
    let breakers = db.get_flow_breakers(min_breaks)?;
    println!("\nFlow breakers (opened anyway {min_breaks}+ times)");
    print_rule(28);
    if breakers.is_empty() {
        println!("None yet.");
    } else {
        let rows: Vec<BreakerRow> = breakers.iter().map(BreakerRow::from).collect();
        println!("\n{}", Table::new(rows));
        if config.classifier.auto_block_after == 0 {
            println!("Auto-blocking is off (classifier.auto_block_after = 0).");
        } else {
            println!("These are treated as distracting when the daemon starts.");
        }
    }

    let since = Utc::now() - Duration::days(TUNING_LOOKBACK_DAYS);
    let recent = db.get_recent_performance(since, TUNING_SESSION_LIMIT)?;
    let advice = advise_threshold(
        &recent,
        config.flow.threshold_seconds,
        config.flow.min_threshold_seconds,
    );
    println!("\nFlow threshold");
    print_rule(28);
    println!("Configured:  {}", format_duration(config.flow.threshold_seconds.into()));
    println!("Next run:    {}", format_duration(advice.threshold_seconds.into()));
    println!(
        "Recent:      {} session(s), {}% successful",
        recent.len(),
        advice.success_percent
    );
    if config.flow.adaptive_threshold {
        println!("             {}", describe_trend(advice.trend));
    } else {
        println!("             adaptive threshold is off (flow.adaptive_threshold)");
    }
    Ok(())
}
