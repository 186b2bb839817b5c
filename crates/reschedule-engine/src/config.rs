//! TOML-based engine configuration.
//!
//! Every field has a default, so an empty document is a valid configuration:
//!
//! ```toml
//! [planner]
//! step_minutes = 15
//! max_slots = 3
//!
//! [schedule]
//! horizon_days = 7
//! proposal_ttl_hours = 48
//!
//! [logging]
//! level = "info"
//! ```

use std::path::Path;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::window::{DEFAULT_MAX_SLOTS, DEFAULT_STEP_MINUTES};

const MINUTES_PER_DAY: i64 = 24 * 60;
const MAX_SLOTS_LIMIT: usize = 50;
const MAX_HORIZON_DAYS: i64 = 366;
const MAX_TTL_HOURS: i64 = 90 * 24;
const MAX_BATCH_TIMEOUT_SECS: u64 = 60 * 60;

/// Slot-search and eligibility knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannerConfig {
    #[serde(default = "default_step_minutes")]
    pub step_minutes: i64,
    #[serde(default = "default_max_slots")]
    pub max_slots: usize,
    /// Floor applied to the original event duration.
    #[serde(default = "default_min_duration")]
    pub min_duration_minutes: i64,
    /// Events without a policy are treated as flexible.
    #[serde(default = "default_true")]
    pub missing_policy_is_flexible: bool,
    /// Narrow the search window by `maxShiftMinutes` / `maxShiftDays`.
    #[serde(default)]
    pub enforce_shift_bounds: bool,
}

/// Cron-run horizon and proposal timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_horizon_days")]
    pub horizon_days: i64,
    #[serde(default = "default_lead_time")]
    pub lead_time_minutes: i64,
    #[serde(default = "default_ttl_hours")]
    pub proposal_ttl_hours: i64,
    #[serde(default = "default_batch_timeout")]
    pub batch_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub planner: PlannerConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_step_minutes() -> i64 {
    DEFAULT_STEP_MINUTES
}
fn default_max_slots() -> usize {
    DEFAULT_MAX_SLOTS
}
fn default_min_duration() -> i64 {
    15
}
fn default_true() -> bool {
    true
}
fn default_horizon_days() -> i64 {
    7
}
fn default_lead_time() -> i64 {
    60
}
fn default_ttl_hours() -> i64 {
    48
}
fn default_batch_timeout() -> u64 {
    30
}
fn default_level() -> String {
    "info".to_string()
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            step_minutes: default_step_minutes(),
            max_slots: default_max_slots(),
            min_duration_minutes: default_min_duration(),
            missing_policy_is_flexible: true,
            enforce_shift_bounds: false,
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            horizon_days: default_horizon_days(),
            lead_time_minutes: default_lead_time(),
            proposal_ttl_hours: default_ttl_hours(),
            batch_timeout_secs: default_batch_timeout(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

impl ScheduleConfig {
    // Out-of-range values saturate; `validate` rejects them on load.

    pub fn horizon(&self) -> Duration {
        Duration::try_days(self.horizon_days).unwrap_or(Duration::MAX)
    }

    pub fn lead_time(&self) -> Duration {
        Duration::try_minutes(self.lead_time_minutes).unwrap_or(Duration::MAX)
    }

    pub fn proposal_ttl(&self) -> Duration {
        Duration::try_hours(self.proposal_ttl_hours).unwrap_or(Duration::MAX)
    }

    pub fn batch_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.batch_timeout_secs)
    }
}

impl EngineConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and validate a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&raw)
    }

    /// Check every numeric field against its allowed range.
    ///
    /// # Errors
    /// `EngineError::Config` naming the first field that is out of range.
    pub fn validate(&self) -> Result<()> {
        let planner = &self.planner;
        let schedule = &self.schedule;
        let checks: [(&str, bool); 7] = [
            (
                "planner.step_minutes",
                (1..=MINUTES_PER_DAY).contains(&planner.step_minutes),
            ),
            (
                "planner.max_slots",
                (1..=MAX_SLOTS_LIMIT).contains(&planner.max_slots),
            ),
            (
                "planner.min_duration_minutes",
                (1..=MINUTES_PER_DAY).contains(&planner.min_duration_minutes),
            ),
            (
                "schedule.horizon_days",
                (1..=MAX_HORIZON_DAYS).contains(&schedule.horizon_days),
            ),
            (
                "schedule.lead_time_minutes",
                (0..=schedule.horizon_days.clamp(0, MAX_HORIZON_DAYS) * MINUTES_PER_DAY)
                    .contains(&schedule.lead_time_minutes),
            ),
            (
                "schedule.proposal_ttl_hours",
                (1..=MAX_TTL_HOURS).contains(&schedule.proposal_ttl_hours),
            ),
            (
                "schedule.batch_timeout_secs",
                (1..=MAX_BATCH_TIMEOUT_SECS).contains(&schedule.batch_timeout_secs),
            ),
        ];
        match checks.iter().find(|(_, ok)| !ok) {
            Some((field, _)) => Err(EngineError::Config(format!("{} out of range", field))),
            None => Ok(()),
        }
    }
}
