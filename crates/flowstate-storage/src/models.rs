use chrono::{DateTime, NaiveDate, Timelike, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// XP needed per profile level
pub const XP_PER_LEVEL: u64 = 100;

/// Smoothing factor for the cognitive profile moving averages
const PROFILE_SMOOTHING: f64 = 0.3;

/// Flow minutes that count as a full-stamina session
const FULL_STAMINA_FLOW_MINUTES: f64 = 90.0;

/// Streak length (days) that counts as full consistency
const FULL_CONSISTENCY_DAYS: f64 = 7.0;

/// Lifecycle status of a tracked session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Session is running (`end_time` is null)
    Open,
    /// Session was closed by stop or idle timeout, XP awarded
    Completed,
    /// Session was left open by a crashed engine, progress forfeited
    Abandoned,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Completed => write!(f, "completed"),
            Self::Abandoned => write!(f, "abandoned"),
        }
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "open" => Ok(Self::Open),
            "completed" => Ok(Self::Completed),
            "abandoned" => Ok(Self::Abandoned),
            _ => Err(format!("Unknown session status: {s}")),
        }
    }
}

/// Content classification verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Productive,
    Distracting,
    /// No clear indicators either way; never intercepted
    Neutral,
}

impl Classification {
    #[must_use]
    pub const fn is_distracting(&self) -> bool {
        matches!(self, Self::Distracting)
    }
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Productive => write!(f, "productive"),
            Self::Distracting => write!(f, "distracting"),
            Self::Neutral => write!(f, "neutral"),
        }
    }
}

impl std::str::FromStr for Classification {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "productive" => Ok(Self::Productive),
            "distracting" => Ok(Self::Distracting),
            "neutral" | "unknown" => Ok(Self::Neutral),
            _ => Err(format!("Unknown classification: {s}")),
        }
    }
}

/// User resolution of an intervention
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// Yield to the distraction; flow is broken
    OpenAnyway,
    /// Resist; the distraction source is closed
    WaitForBreak,
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OpenAnyway => write!(f, "open_anyway"),
            Self::WaitForBreak => write!(f, "wait_for_break"),
        }
    }
}

impl std::str::FromStr for Decision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "open_anyway" | "open" => Ok(Self::OpenAnyway),
            "wait_for_break" | "wait" => Ok(Self::WaitForBreak),
            _ => Err(format!("Unknown decision: {s}")),
        }
    }
}

/// Per-component XP awarded at session close
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct XpBreakdown {
    pub base: u32,
    pub resilience: u32,
    pub stamina: u32,
    pub focus: u32,
    pub penalty: u32,
}

impl XpBreakdown {
    /// Sum of the components, clamped at zero
    #[must_use]
    pub fn total(&self) -> u32 {
        let positive = u64::from(self.base)
            + u64::from(self.resilience)
            + u64::from(self.stamina)
            + u64::from(self.focus);
        let total = positive.saturating_sub(u64::from(self.penalty));
        u32::try_from(total).unwrap_or(u32::MAX)
    }
}

/// Tracked focus session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_seconds: u32,
    /// Seconds spent in flow (including pending interventions)
    pub flow_seconds: u32,
    pub distraction_count: u32,
    pub resilience_score: u32,
    pub focus_score: f64,
    pub fatigue_score: f64,
    pub apm_average: f64,
    pub xp_earned: u32,
    pub xp_breakdown: XpBreakdown,
    pub current_task: Option<String>,
    pub status: SessionStatus,
}

impl Session {
    /// Open a new session at `start_time`
    #[must_use]
    pub fn open(start_time: DateTime<Utc>, current_task: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            start_time,
            end_time: None,
            duration_seconds: 0,
            flow_seconds: 0,
            distraction_count: 0,
            resilience_score: 0,
            focus_score: 100.0,
            fatigue_score: 0.0,
            apm_average: 0.0,
            xp_earned: 0,
            xp_breakdown: XpBreakdown::default(),
            current_task,
            status: SessionStatus::Open,
        }
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.end_time.is_none()
    }

    #[must_use]
    pub fn flow_minutes(&self) -> f64 {
        f64::from(self.flow_seconds) / 60.0
    }
}

/// One distraction encounter and how it was resolved
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterventionEvent {
    pub id: Uuid,
    pub session_id: Uuid,
    pub trigger_content_ref: String,
    pub classification: Classification,
    pub decision: Decision,
    pub resilience_delta: i32,
    pub xp_delta: i32,
    pub occurred_at: DateTime<Utc>,
    pub resolved_at: DateTime<Utc>,
}

/// Long-lived aggregate of session quality, each axis in 0-100
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CognitiveProfile {
    pub focus: f64,
    pub stamina: f64,
    pub resilience: f64,
    pub consistency: f64,
}

/// Cross-session user totals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub level: u32,
    pub total_xp: u64,
    pub cognitive_profile: CognitiveProfile,
    pub sessions_count: u32,
    pub streak_days: u32,
    pub last_session_date: Option<NaiveDate>,
}

impl Default for UserProfile {
    fn default() -> Self {
        Self {
            level: 1,
            total_xp: 0,
            cognitive_profile: CognitiveProfile::default(),
            sessions_count: 0,
            streak_days: 0,
            last_session_date: None,
        }
    }
}

impl UserProfile {
    /// Level reached with `total_xp` (100 XP per level, starting at 1)
    #[must_use]
    pub fn level_for_xp(total_xp: u64) -> u32 {
        u32::try_from(total_xp / XP_PER_LEVEL + 1).unwrap_or(u32::MAX)
    }

    /// Fold a closed session into the profile.
    ///
    /// Only completed sessions count; abandoned ones forfeit their progress.
    pub fn absorb_session(&mut self, session: &Session) {
        if session.status != SessionStatus::Completed {
            return;
        }

        self.total_xp = self.total_xp.saturating_add(u64::from(session.xp_earned));
        let level = Self::level_for_xp(self.total_xp);
        if level > self.level {
            log::info!("Level up: {} -> {level}", self.level);
            self.level = level;
        }

        let day = session.end_time.unwrap_or(session.start_time).date_naive();
        self.update_streak(day);

        let samples = CognitiveProfile {
            focus: session.focus_score.clamp(0.0, 100.0),
            stamina: (session.flow_minutes() * 100.0 / FULL_STAMINA_FLOW_MINUTES).min(100.0),
            resilience: (f64::from(session.resilience_score) * 5.0).min(100.0),
            consistency: (f64::from(self.streak_days) * 100.0 / FULL_CONSISTENCY_DAYS).min(100.0),
        };

        self.cognitive_profile = if self.sessions_count == 0 {
            samples
        } else {
            let blend = |old: f64, new: f64| old + PROFILE_SMOOTHING * (new - old);
            let current = self.cognitive_profile;
            CognitiveProfile {
                focus: blend(current.focus, samples.focus),
                stamina: blend(current.stamina, samples.stamina),
                resilience: blend(current.resilience, samples.resilience),
                consistency: blend(current.consistency, samples.consistency),
            }
        };
        self.sessions_count += 1;
    }

    fn update_streak(&mut self, day: NaiveDate) {
        match self.last_session_date {
            None => self.streak_days = 1,
            Some(last) if last == day => self.streak_days = self.streak_days.max(1),
            Some(last) if last.succ_opt() == Some(day) => self.streak_days += 1,
            // Late record for an earlier day leaves the streak alone
            Some(last) if day < last => return,
            Some(_) => self.streak_days = 1,
        }
        self.last_session_date = Some(day);
    }
}

/// Flow quality observed in one hour-of-day slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowWindow {
    pub date: NaiveDate,
    pub hour: u32,
    pub flow_quality: f64,
    pub apm_average: f64,
    pub duration_minutes: u32,
}

impl FlowWindow {
    /// Flow window for the hour a session started in
    #[must_use]
    pub fn from_session(session: &Session) -> Self {
        Self {
            date: session.start_time.date_naive(),
            hour: session.start_time.hour(),
            flow_quality: (session.focus_score + (100.0 - session.fatigue_score)) / 2.0,
            apm_average: session.apm_average,
            duration_minutes: session.duration_seconds / 60,
        }
    }
}

/// Average flow quality for one hour of the day across recent windows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourQuality {
    pub hour: u32,
    pub average_quality: f64,
    pub total_minutes: u32,
    pub samples: u32,
}

/// Host of a URL without a leading `www.`, or the trimmed, lowercased text for
/// window titles. Flow breaks are counted per source.
#[must_use]
pub fn content_source(content_ref: &str) -> String {
    let content_ref = content_ref.trim();
    let Some((_, rest)) = content_ref.split_once("://") else {
        return content_ref.to_lowercase();
    };
    let host = rest
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default()
        .rsplit('@')
        .next()
        .unwrap_or_default();
    let host = host.split(':').next().unwrap_or_default().to_lowercase();
    host.strip_prefix("www.").map_or_else(|| host.clone(), ToString::to_string)
}

/// A content source the user kept yielding to during flow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowBreaker {
    pub source: String,
    pub flow_breaks: u32,
    pub last_break: DateTime<Utc>,
}

/// The parts of a finished session used to tune the flow threshold
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SessionPerformance {
    pub duration_seconds: u32,
    pub focus_score: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn completed(start: DateTime<Utc>, xp: u32) -> Session {
        let mut session = Session::open(start, None);
        session.end_time = Some(start + Duration::minutes(30));
        session.duration_seconds = 1800;
        session.flow_seconds = 1200;
        session.resilience_score = 10;
        session.xp_earned = xp;
        session.status = SessionStatus::Completed;
        session
    }

    #[test]
    fn test_xp_breakdown_total_never_negative() {
        let breakdown = XpBreakdown {
            base: 5,
            resilience: 0,
            stamina: 0,
            focus: 2,
            penalty: 40,
        };
        assert_eq!(breakdown.total(), 0);
    }

    #[test]
    fn test_xp_breakdown_total_sums_components() {
        let breakdown = XpBreakdown {
            base: 25,
            resilience: 10,
            stamina: 60,
            focus: 9,
            penalty: 5,
        };
        assert_eq!(breakdown.total(), 99);
    }

    #[test]
    fn test_level_for_xp() {
        assert_eq!(UserProfile::level_for_xp(0), 1);
        assert_eq!(UserProfile::level_for_xp(99), 1);
        assert_eq!(UserProfile::level_for_xp(100), 2);
        assert_eq!(UserProfile::level_for_xp(1050), 11);
    }

    #[test]
    fn test_absorb_session_levels_up() {
        let mut profile = UserProfile::default();
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        profile.absorb_session(&completed(start, 150));

        assert_eq!(profile.total_xp, 150);
        assert_eq!(profile.level, 2);
        assert_eq!(profile.sessions_count, 1);
        assert_eq!(profile.streak_days, 1);
    }

    #[test]
    fn test_absorb_session_ignores_abandoned() {
        let mut profile = UserProfile::default();
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        let mut session = completed(start, 150);
        session.status = SessionStatus::Abandoned;
        profile.absorb_session(&session);

        assert_eq!(profile, UserProfile::default());
    }

    #[test]
    fn test_streak_counts_consecutive_days() {
        let mut profile = UserProfile::default();
        let day1 = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        profile.absorb_session(&completed(day1, 10));
        profile.absorb_session(&completed(day1 + Duration::hours(3), 10));
        assert_eq!(profile.streak_days, 1);

        profile.absorb_session(&completed(day1 + Duration::days(1), 10));
        assert_eq!(profile.streak_days, 2);

        // Skipping a day resets the streak
        profile.absorb_session(&completed(day1 + Duration::days(3), 10));
        assert_eq!(profile.streak_days, 1);
    }

    #[test]
    fn test_total_xp_never_decreases() {
        let mut profile = UserProfile::default();
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        let mut previous = 0;
        for (i, xp) in [30, 0, 75, 0, 12].into_iter().enumerate() {
            profile.absorb_session(&completed(start + Duration::hours(i as i64), xp));
            assert!(profile.total_xp >= previous);
            previous = profile.total_xp;
        }
    }

    #[test]
    fn test_cognitive_profile_stays_in_range() {
        let mut profile = UserProfile::default();
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        for day in 0..10 {
            let mut session = completed(start + Duration::days(day), 40);
            session.flow_seconds = 10_000;
            session.resilience_score = 100;
            profile.absorb_session(&session);
        }
        let cp = profile.cognitive_profile;
        for value in [cp.focus, cp.stamina, cp.resilience, cp.consistency] {
            assert!((0.0..=100.0).contains(&value));
        }
        assert!(cp.consistency > 90.0);
    }

    #[test]
    fn test_decision_parse() {
        assert_eq!("open_anyway".parse::<Decision>(), Ok(Decision::OpenAnyway));
        assert_eq!("wait-for-break".parse::<Decision>(), Ok(Decision::WaitForBreak));
        assert!("later".parse::<Decision>().is_err());
    }

    #[test]
    fn test_content_source() {
        assert_eq!(
            content_source("https://www.Reddit.com/r/rust/comments/1?x=1"),
            "reddit.com"
        );
        assert_eq!(
            content_source("http://user@news.ycombinator.com:8080/"),
            "news.ycombinator.com"
        );
        assert_eq!(content_source("  Steam - Library "), "steam - library");
    }

    #[test]
    fn test_flow_window_quality() {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 14, 5, 0).unwrap();
        let mut session = completed(start, 10);
        session.focus_score = 80.0;
        session.fatigue_score = 40.0;
        let window = FlowWindow::from_session(&session);
        assert_eq!(window.hour, 14);
        assert!((window.flow_quality - 70.0).abs() < f64::EPSILON);
        assert_eq!(window.duration_minutes, 30);
    }
}
