//! Error types for `Mayhem`
//!
//! One error enum per subsystem, aggregated by [`MayhemError`] which maps
//! every failure to a process exit code.

use std::path::PathBuf;
use thiserror::Error;

use crate::effect::EffectId;

// ============================================================================
// Exit Codes
// ============================================================================

/// Exit codes for `mayhem` CLI operations.
///
/// These codes follow Unix conventions.
pub struct ExitCode;

impl ExitCode {
    /// Successful execution
    pub const SUCCESS: i32 = 0;

    /// General error
    pub const ERROR: i32 = 1;

    /// Configuration error (invalid YAML, validation failure)
    pub const CONFIG_ERROR: i32 = 2;

    /// I/O error (file not found, permission denied)
    pub const IO_ERROR: i32 = 3;

    /// Transport error (channel closed, framing error)
    pub const TRANSPORT_ERROR: i32 = 4;

    /// Chaos engine error (effect callback failure, registry misuse)
    pub const CHAOS_ERROR: i32 = 5;

    /// Interrupted by SIGINT (Ctrl+C)
    pub const INTERRUPTED: i32 = 130;

    /// Terminated by SIGTERM
    pub const TERMINATED: i32 = 143;
}

// ============================================================================
// Top-Level Error
// ============================================================================

/// Top-level error type for `Mayhem` operations.
///
/// Aggregates all domain-specific errors and provides a unified
/// exit code mapping for the CLI.
#[derive(Debug, Error)]
pub enum MayhemError {
    /// Configuration loading or validation error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Transport layer error
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Scheduling or lifecycle error
    #[error(transparent)]
    Chaos(#[from] ChaosError),

    /// Effect registration error
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failure serializing command output as JSON
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MayhemError {
    /// Returns the appropriate exit code for this error.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => ExitCode::CONFIG_ERROR,
            Self::Transport(_) => ExitCode::TRANSPORT_ERROR,
            Self::Chaos(_) | Self::Registry(_) => ExitCode::CHAOS_ERROR,
            Self::Io(_) => ExitCode::IO_ERROR,
            Self::Json(_) => ExitCode::ERROR,
        }
    }
}

// ============================================================================
// Effect Callback Errors
// ============================================================================

/// Failure reported by an effect's `activate`, `deactivate` or `on_tick`
/// callback.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EffectError {
    /// The callback could not complete.
    #[error("{0}")]
    Failed(String),

    /// The callback panicked; the payload message is captured when it is a string.
    #[error("callback panicked: {0}")]
    Panicked(String),
}

impl EffectError {
    /// Creates a [`EffectError::Failed`] from any displayable message.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Which effect callback failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackKind {
    /// `activate()`
    Activate,
    /// `deactivate()`
    Deactivate,
    /// `on_tick()`
    Tick,
}

impl CallbackKind {
    /// Returns the label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Activate => "activate",
            Self::Deactivate => "deactivate",
            Self::Tick => "tick",
        }
    }
}

impl std::fmt::Display for CallbackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Registry Errors
// ============================================================================

/// Effect registration errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// The descriptor cannot be registered as given.
    #[error("invalid effect descriptor: {0}")]
    InvalidArgument(String),

    /// No session is running, so there is no registry to register into.
    ///
    /// Callers should retry when the next session starts.
    #[error("chaos registry is not ready; retry after the session starts")]
    NotReady,
}

// ============================================================================
// Chaos Engine Errors
// ============================================================================

/// Scheduling and lifecycle errors.
#[derive(Debug, Error)]
pub enum ChaosError {
    /// Selection was attempted against an empty or zero-weight pool.
    #[error("no eligible chaos effects to pick from")]
    NoEligibleEffects,

    /// A received phase frame referenced an effect id unknown locally.
    #[error("unresolved effect id '{0}'")]
    UnresolvedEffectId(String),

    /// An effect callback failed during normal operation.
    #[error("effect '{effect}' failed in {callback}: {source}")]
    EffectCallbackFailure {
        /// Effect whose callback failed
        effect: EffectId,
        /// Which callback failed
        callback: CallbackKind,
        /// Error reported by the callback
        #[source]
        source: EffectError,
    },

    /// A run was requested while another run is still in progress.
    #[error("effect '{requested}' cannot start: '{running}' is still running")]
    Busy {
        /// Effect that was requested
        requested: EffectId,
        /// Effect currently occupying the runner
        running: EffectId,
    },

    /// Scheduler task ended abnormally (panic or abort).
    #[error("scheduler task failed: {0}")]
    TaskFailed(String),
}

// ============================================================================
// Wire Frame Errors
// ============================================================================

/// Phase frame decoding errors.
///
/// Only produced for frames that carry the phase sentinel; ordinary
/// messages are never errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FrameError {
    /// Fewer than three `|`-separated fields after the sentinel.
    #[error("phase frame has {found} field(s), expected 3")]
    MissingFields {
        /// Number of fields found
        found: usize,
    },

    /// The phase field is not one of `0`, `1`, `2`.
    #[error("unknown phase '{phase}'")]
    UnknownPhase {
        /// Raw phase field
        phase: String,
        /// Effect id field
        effect_id: String,
        /// Display text field, still presentable
        text: String,
    },
}

// ============================================================================
// Transport Errors
// ============================================================================

/// Transport layer errors for the loopback and stdio transports.
#[derive(Debug, Error)]
pub enum TransportError {
    /// I/O error during transport operations
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The channel or stream was closed
    #[error("transport closed: {0}")]
    Closed(String),

    /// Frame cannot be represented on this transport
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Frame exceeds size limit
    #[error("frame too large: {size} bytes (limit: {limit})")]
    FrameTooLarge {
        /// Actual frame size in bytes
        size: usize,
        /// Configured size limit in bytes
        limit: usize,
    },
}

// ============================================================================
// Configuration Errors
// ============================================================================

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// YAML parsing failed
    #[error("parse error in {path}{}: {message}", line.map_or_else(String::new, |l| format!(" (line {l})")))]
    ParseError {
        /// Path to the configuration file
        path: PathBuf,
        /// Line number where the error occurred (if available)
        line: Option<usize>,
        /// Error message from the parser
        message: String,
    },

    /// Configuration validation failed
    #[error("validation failed for {path}: {}", format_issues(errors))]
    ValidationError {
        /// Path to the configuration file
        path: String,
        /// List of validation issues found
        errors: Vec<ValidationIssue>,
    },

    /// Referenced configuration file not found
    #[error("file not found: {path}")]
    MissingFile {
        /// Path to the missing file
        path: PathBuf,
    },

    /// Field has an invalid value
    #[error("invalid value for '{field}': got '{value}', expected {expected}")]
    InvalidValue {
        /// Name of the field with invalid value
        field: String,
        /// The actual value provided
        value: String,
        /// Description of what was expected
        expected: String,
    },

    /// Environment variable referenced in configuration is not set
    #[error("environment variable '{var}' not set (referenced at {location})")]
    EnvVarNotSet {
        /// Name of the environment variable
        var: String,
        /// Location in the configuration where it was referenced
        location: String,
    },
}

fn format_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

// ============================================================================
// Validation Types
// ============================================================================

/// A single validation issue found during configuration validation.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// Path to the problematic field (e.g., "chaos.interval_min")
    pub path: String,
    /// Description of the validation issue
    pub message: String,
    /// Severity level of the issue
    pub severity: Severity,
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let prefix = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(f, "{}: {} at {}", prefix, self.message, self.path)
    }
}

/// Severity level for validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Prevents the configuration from being used
    Error,
    /// Reported, but the configuration still loads
    Warning,
}
