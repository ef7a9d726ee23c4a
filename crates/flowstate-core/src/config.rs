use anyhow::{Context, Result};
use flowstate_ai::AiConfig;
use flowstate_storage::Classification;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Get the local data directory for flowstate.
///
/// # Errors
///
/// Returns an error if the local data directory cannot be determined.
pub fn get_data_dir() -> Result<PathBuf> {
    let mut path =
        dirs::data_local_dir().ok_or_else(|| anyhow::anyhow!("Failed to get local data dir"))?;
    path.push("flowstate");
    Ok(path)
}

/// Location of `config.toml` inside the data directory.
///
/// # Errors
///
/// Returns an error if the local data directory cannot be determined.
pub fn default_config_path() -> Result<PathBuf> {
    Ok(get_data_dir()?.join("config.toml"))
}

/// Engine configuration. Every field has a default, so a partial file is fine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub tick: TickConfig,
    pub aggregator: AggregatorConfig,
    pub flow: FlowConfig,
    pub scoring: ScoringConfig,
    pub classifier: ClassifierConfig,
    pub ai: AiConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TickConfig {
    pub interval_ms: u64,
    /// How often the recorder retries writes that failed
    pub flush_interval_secs: u64,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            flush_interval_secs: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    pub window_seconds: u32,
    /// Actions per minute at or above which the pattern is `active`
    pub active_threshold_apm: f64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            window_seconds: 60,
            active_threshold_apm: 10.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    /// Uninterrupted active time needed to enter flow
    pub threshold_seconds: u32,
    /// Silence after which an open session is closed
    pub idle_timeout_seconds: u32,
    /// Open a session on the first sample seen while idle
    pub auto_start: bool,
    /// Retune `threshold_seconds` from recent sessions at daemon start
    pub adaptive_threshold: bool,
    /// Lower bound for a retuned threshold
    pub min_threshold_seconds: u32,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            threshold_seconds: 600,
            idle_timeout_seconds: 300,
            auto_start: true,
            adaptive_threshold: true,
            min_threshold_seconds: 600,
        }
    }
}

/// Curve constants for the scoring engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub energy_baseline: f64,
    pub energy_decay_per_minute: f64,
    pub energy_regen_per_minute: f64,
    pub fatigue_full_minutes: f64,
    pub fatigue_exponent: f64,
    pub fatigue_alert_threshold: f64,
    pub open_anyway_resilience_penalty: u32,
    pub wait_resilience_reward: u32,
    pub distraction_decay_per_minute: u32,
    pub open_anyway_focus_penalty: f64,
    pub wait_focus_bonus: f64,
    pub wait_xp_bonus: u32,
    pub xp_base: u32,
    pub xp_min_session_seconds: u32,
    pub xp_per_resilience: u32,
    pub xp_per_flow_minute: u32,
    pub xp_focus_divisor: u32,
    pub xp_per_distraction: u32,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            energy_baseline: 100.0,
            energy_decay_per_minute: 0.5,
            energy_regen_per_minute: 1.0,
            fatigue_full_minutes: 120.0,
            fatigue_exponent: 1.5,
            fatigue_alert_threshold: 70.0,
            open_anyway_resilience_penalty: 10,
            wait_resilience_reward: 5,
            distraction_decay_per_minute: 1,
            open_anyway_focus_penalty: 15.0,
            wait_focus_bonus: 5.0,
            wait_xp_bonus: 10,
            xp_base: 25,
            xp_min_session_seconds: 60,
            xp_per_resilience: 2,
            xp_per_flow_minute: 5,
            xp_focus_divisor: 10,
            xp_per_distraction: 5,
        }
    }
}

/// A user rule: content matching `pattern` gets `classification`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationRule {
    pub pattern: String,
    pub classification: Classification,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Bound on a remote classification before the keyword fallback is used
    pub timeout_ms: u64,
    pub cache_size: usize,
    pub productive_url_keywords: Vec<String>,
    pub distracting_url_keywords: Vec<String>,
    pub productive_app_keywords: Vec<String>,
    pub distracting_app_keywords: Vec<String>,
    /// Checked before any keyword list
    pub rules: Vec<ClassificationRule>,
    /// Sources opened anyway this many times are treated as distracting;
    /// 0 turns auto-blocking off
    pub auto_block_after: u32,
}

fn to_strings(words: &[&str]) -> Vec<String> {
    words.iter().map(|w| (*w).to_string()).collect()
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 3000,
            cache_size: 256,
            productive_url_keywords: to_strings(&[
                "stackoverflow",
                "github",
                "docs",
                "documentation",
                "tutorial",
                "learn",
                "course",
                "education",
                "wiki",
                "research",
            ]),
            distracting_url_keywords: to_strings(&[
                "youtube.com/shorts",
                "tiktok",
                "instagram",
                "facebook",
                "twitter",
                "reddit",
                "netflix",
                "twitch",
                "gaming",
            ]),
            productive_app_keywords: to_strings(&[
                "code",
                "vscode",
                "visual studio",
                "pycharm",
                "sublime",
                "notepad++",
                "terminal",
                "cmd",
                "powershell",
                "docs",
                "word",
                "excel",
                "notion",
                "obsidian",
            ]),
            distracting_app_keywords: to_strings(&[
                "steam",
                "game",
                "valorant",
                "league",
                "discord",
                "spotify",
                "netflix",
                "instagram",
                "messenger",
            ]),
            rules: Vec::new(),
            auto_block_after: 5,
        }
    }
}

impl EngineConfig {
    /// Load configuration from `path`; a missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Self = toml::from_str(&text)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration as TOML, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the file write fails
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        std::fs::write(path, self.to_toml()?)
            .with_context(|| format!("Failed to write config {}", path.display()))?;
        Ok(())
    }

    /// Render as TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config")
    }

    /// Reject values that would break the scoring curves.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first offending field
    pub fn validate(&self) -> Result<()> {
        if self.tick.interval_ms == 0 {
            anyhow::bail!("tick.interval_ms must be positive");
        }
        if self.aggregator.window_seconds == 0 {
            anyhow::bail!("aggregator.window_seconds must be positive");
        }
        if self.scoring.fatigue_exponent <= 1.0 {
            anyhow::bail!("scoring.fatigue_exponent must be greater than 1");
        }
        if self.scoring.fatigue_full_minutes <= 0.0 {
            anyhow::bail!("scoring.fatigue_full_minutes must be positive");
        }
        if !(0.0..=100.0).contains(&self.scoring.energy_baseline) {
            anyhow::bail!("scoring.energy_baseline must be within 0-100");
        }
        if self.flow.min_threshold_seconds == 0 {
            anyhow::bail!("flow.min_threshold_seconds must be positive");
        }
        if self.scoring.xp_focus_divisor == 0 {
            anyhow::bail!("scoring.xp_focus_divisor must be positive");
        }
        for rule in &self.classifier.rules {
            regex::Regex::new(&rule.pattern)
                .with_context(|| format!("Invalid classifier rule pattern: {}", rule.pattern))?;
        }
        Ok(())
    }
}
