//! CLI argument definitions
//!
//! All Clap derive structs for `mayhem` command-line parsing.

use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};

use crate::config::schema::Role;
use crate::observability::LogFormat;

// ============================================================================
// Root CLI
// ============================================================================

/// Chaos effect scheduler with a synchronized warn/activate/deactivate
/// lifecycle.
#[derive(Parser, Debug)]
#[command(name = "mayhem", author, version, about)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all non-error output.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Color output control.
    #[arg(long, default_value = "auto", global = true, env = "MAYHEM_COLOR")]
    pub color: ColorChoice,
}

impl Cli {
    /// Log format requested by the subcommand, if it takes one.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        match &self.command {
            Commands::Run(args) => args.log_format,
            _ => LogFormat::Human,
        }
    }
}

// ============================================================================
// Top-Level Commands
// ============================================================================

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a chaos session over stdin/stdout.
    Run(RunArgs),

    /// Validate configuration files without starting a session.
    Validate(ValidateArgs),

    /// List the built-in effects with their effective settings.
    Effects(EffectsArgs),

    /// Generate shell completion scripts.
    Completions(CompletionsArgs),

    /// Display version and build information.
    Version(VersionArgs),
}

// ============================================================================
// Run
// ============================================================================

/// Arguments for `run`.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Path to YAML configuration file.
    #[arg(short, long, env = "MAYHEM_CONFIG")]
    pub config: Option<PathBuf>,

    /// Participant role; overrides `session.role`.
    #[arg(long, env = "MAYHEM_ROLE")]
    pub role: Option<Role>,

    /// Selection seed; overrides `chaos.seed`.
    #[arg(long, env = "MAYHEM_SEED")]
    pub seed: Option<u64>,

    /// Write JSONL events to this file instead of stderr.
    #[arg(long, env = "MAYHEM_EVENTS_FILE")]
    pub events_file: Option<PathBuf>,

    /// Serve Prometheus metrics on this port.
    #[arg(long, env = "MAYHEM_METRICS_PORT")]
    pub metrics_port: Option<u16>,

    /// Log output format.
    #[arg(long, default_value = "human", env = "MAYHEM_LOG_FORMAT")]
    pub log_format: LogFormat,
}

// ============================================================================
// Validate
// ============================================================================

/// Arguments for `validate`.
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Configuration files to validate.
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Output format.
    #[arg(short, long, default_value = "human")]
    pub format: OutputFormat,

    /// Enable strict validation (warnings become errors).
    #[arg(long)]
    pub strict: bool,
}

// ============================================================================
// Effects
// ============================================================================

/// Arguments for `effects`.
#[derive(Args, Debug)]
pub struct EffectsArgs {
    /// Apply overrides from this configuration file.
    #[arg(short, long, env = "MAYHEM_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output format.
    #[arg(short, long, default_value = "human")]
    pub format: OutputFormat,
}

// ============================================================================
// Completions / Version
// ============================================================================

/// Arguments for shell completion generation.
#[derive(Args, Debug)]
pub struct CompletionsArgs {
    /// Target shell for completion script.
    pub shell: Shell,
}

/// Arguments for version display.
#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Output format.
    #[arg(short, long, default_value = "human")]
    pub format: OutputFormat,
}

// ============================================================================
// CLI-Local Enums
// ============================================================================

/// Color output choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ColorChoice {
    /// Auto-detect terminal support.
    #[default]
    Auto,
    /// Always use color.
    Always,
    /// Never use color.
    Never,
}

/// Output format for structured output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable output.
    #[default]
    Human,
    /// JSON output.
    Json,
}

/// Shell type for completion generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Shell {
    /// Bash shell.
    Bash,
    /// Zsh shell.
    Zsh,
    /// Fish shell.
    Fish,
    /// `PowerShell`.
    #[value(name = "powershell")]
    PowerShell,
    /// Elvish shell.
    Elvish,
}

// ============================================================================
// Tests
// ============================================================================
