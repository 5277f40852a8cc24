//! Configuration schema types
//!
//! Deserialized from YAML. Every field has a default, so an empty document
//! is a valid configuration.

use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::lifecycle::LifecycleTiming;
use crate::lifecycle::state::{DEFAULT_HOLD_DURATION, DEFAULT_SUBSIDE_TEXT, DEFAULT_WARNING_DELAY};
use crate::scheduler::SchedulerTiming;

// ============================================================================
// Top-Level Configuration
// ============================================================================

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MayhemConfig {
    /// Scheduler and lifecycle settings
    pub chaos: ChaosConfig,

    /// Participant settings
    pub session: SessionConfig,

    /// How announcements are presented
    pub announcer: AnnouncerConfig,

    /// Per-effect overrides keyed by effect id
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub effects: IndexMap<String, EffectOverride>,
}

// ============================================================================
// Chaos
// ============================================================================

/// Scheduler and lifecycle settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChaosConfig {
    /// Master toggle; `false` runs the session without a scheduler
    pub enabled: bool,

    /// Lower bound of the wait between cycles
    #[serde(with = "duration_format")]
    pub interval_min: Duration,

    /// Upper bound of the wait between cycles
    #[serde(with = "duration_format")]
    pub interval_max: Duration,

    /// How long an effect stays active
    #[serde(with = "duration_format")]
    pub duration: Duration,

    /// Quiet period after the session starts
    #[serde(with = "duration_format")]
    pub grace_period: Duration,

    /// Delay between the warning and activation
    #[serde(with = "duration_format")]
    pub warning_delay: Duration,

    /// Period of `on_tick` while an effect is active
    #[serde(with = "duration_format")]
    pub tick_interval: Duration,

    /// Avoid selecting the same effect twice in a row when possible
    pub anti_repeat: bool,

    /// Seed for reproducible selection; random when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,

    /// Text broadcast when an effect ends
    pub subside_text: String,
}

impl Default for ChaosConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_min: Duration::from_secs(20),
            interval_max: Duration::from_secs(45),
            duration: DEFAULT_HOLD_DURATION,
            grace_period: Duration::from_secs(15),
            warning_delay: DEFAULT_WARNING_DELAY,
            tick_interval: Duration::from_millis(50),
            anti_repeat: true,
            seed: None,
            subside_text: DEFAULT_SUBSIDE_TEXT.to_owned(),
        }
    }
}

impl ChaosConfig {
    /// Scheduler loop timing.
    #[must_use]
    pub const fn scheduler_timing(&self) -> SchedulerTiming {
        SchedulerTiming {
            grace_period: self.grace_period,
            interval_min: self.interval_min,
            interval_max: self.interval_max,
        }
    }

    /// Per-run phase timing.
    #[must_use]
    pub fn lifecycle_timing(&self) -> LifecycleTiming {
        LifecycleTiming {
            warning_delay: self.warning_delay,
            hold_duration: self.duration,
            subside_text: self.subside_text.clone(),
        }
    }
}

// ============================================================================
// Session
// ============================================================================

/// Whether this participant drives the chaos or follows it.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Authoritative: runs the scheduler and broadcasts phases.
    #[default]
    Host,
    /// Replays phases received from the host.
    Follower,
}

impl Role {
    /// Returns `true` for the participant that owns scheduling.
    #[must_use]
    pub const fn is_authoritative(self) -> bool {
        matches!(self, Self::Host)
    }

    /// Label used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Host => "host",
            Self::Follower => "follower",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Participant settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// Role of this participant
    pub role: Role,
}

// ============================================================================
// Announcer
// ============================================================================

/// How announcements are presented.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnnouncerConfig {
    /// Show phase texts at all
    pub enabled: bool,

    /// Prefix placed before every announcement
    pub name: String,
}

impl Default for AnnouncerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            name: "GolfMayhem".to_owned(),
        }
    }
}

// ============================================================================
// Effects
// ============================================================================

/// Override of a single effect's selection knobs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EffectOverride {
    /// Enable or disable the effect
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// Relative selection weight
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
}

// ============================================================================
// Duration (de)serialization
// ============================================================================

/// Durations are written as humantime strings (`"15s"`, `"250ms"`) or as
/// plain numbers of seconds.
mod duration_format {
    use std::time::Duration;

    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Seconds(f64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        match Raw::deserialize(deserializer)? {
            Raw::Seconds(secs) => Duration::try_from_secs_f64(secs).map_err(|_| {
                D::Error::custom(format!(
                    "invalid duration {secs}: expected a non-negative number of seconds"
                ))
            }),
            Raw::Text(text) => humantime::parse_duration(text.trim())
                .map_err(|e| D::Error::custom(format!("invalid duration '{text}': {e}"))),
        }
    }
}
