//! Lifecycle state types.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::effect::EffectDescriptor;

/// Default pause between the warning and activation.
pub const DEFAULT_WARNING_DELAY: Duration = Duration::from_secs(3);

/// Default time an effect stays active.
pub const DEFAULT_HOLD_DURATION: Duration = Duration::from_secs(8);

/// Default text broadcast with the deactivate phase.
pub const DEFAULT_SUBSIDE_TEXT: &str = "Chaos subsides... for now.";

/// Where the runner is in the current run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LifecycleState {
    /// Nothing in progress.
    #[default]
    Idle,
    /// Warning issued, effect not yet applied.
    Warning,
    /// Effect applied; `deactivate()` still owed.
    Active,
    /// Forced teardown in progress.
    Aborting,
}

impl LifecycleState {
    /// Label used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Warning => "warning",
            Self::Active => "active",
            Self::Aborting => "aborting",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Local start/end notifications, delivered to every subscriber.
#[derive(Debug, Clone)]
pub enum LifecycleNotification {
    /// `activate()` returned successfully.
    Started(Arc<EffectDescriptor>),
    /// `deactivate()` was invoked (successfully or not).
    Ended(Arc<EffectDescriptor>),
}

impl LifecycleNotification {
    /// The effect this notification is about.
    #[must_use]
    pub const fn effect(&self) -> &Arc<EffectDescriptor> {
        match self {
            Self::Started(effect) | Self::Ended(effect) => effect,
        }
    }

    /// Returns `true` for [`Started`](Self::Started).
    #[must_use]
    pub const fn is_started(&self) -> bool {
        matches!(self, Self::Started(_))
    }
}

/// How a run finished without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The effect was activated, held and deactivated.
    Completed,
    /// The run was cancelled or torn down from outside before it finished.
    /// An effect that was already active is left for forced teardown.
    Cancelled,
}

/// Phase timings of a single run.
#[derive(Debug, Clone)]
pub struct LifecycleTiming {
    /// Delay between the warning and activation.
    pub warning_delay: Duration,
    /// How long the effect stays active.
    pub hold_duration: Duration,
    /// Text broadcast with the deactivate phase.
    pub subside_text: String,
}

impl Default for LifecycleTiming {
    fn default() -> Self {
        Self {
            warning_delay: DEFAULT_WARNING_DELAY,
            hold_duration: DEFAULT_HOLD_DURATION,
            subside_text: DEFAULT_SUBSIDE_TEXT.to_owned(),
        }
    }
}
