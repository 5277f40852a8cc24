//! Configuration validation
//!
//! Runs on the fully deserialized [`MayhemConfig`] and collects every issue
//! rather than stopping at the first, so a user sees all problems at once.

use std::time::Duration;

use crate::config::schema::MayhemConfig;
use crate::error::{Severity, ValidationIssue};

/// Maximum edit distance for "did you mean" suggestions.
const SUGGESTION_DISTANCE: usize = 3;

/// Result of configuration validation.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// Validation errors (prevent loading).
    pub errors: Vec<ValidationIssue>,

    /// Validation warnings (informational).
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationResult {
    /// Returns `true` if there are any errors.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Returns `true` if validation passed (no errors).
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Moves every warning into the error list.
    pub fn promote_warnings(&mut self) {
        for mut issue in self.warnings.drain(..) {
            issue.severity = Severity::Error;
            self.errors.push(issue);
        }
    }
}

/// Configuration validator.
///
/// `known_effects` is the catalog the `effects` overrides are checked
/// against; an empty slice disables the unknown-id check.
#[derive(Debug, Default)]
pub struct Validator {
    errors: Vec<ValidationIssue>,
    warnings: Vec<ValidationIssue>,
}

impl Validator {
    /// Creates a new validator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates a configuration and returns every issue found.
    pub fn validate(&mut self, config: &MayhemConfig, known_effects: &[&str]) -> ValidationResult {
        self.errors.clear();
        self.warnings.clear();

        self.validate_chaos(config);
        self.validate_announcer(config);
        self.validate_effects(config, known_effects);

        ValidationResult {
            errors: std::mem::take(&mut self.errors),
            warnings: std::mem::take(&mut self.warnings),
        }
    }

    // ========================================================================
    // Sections
    // ========================================================================

    fn validate_chaos(&mut self, config: &MayhemConfig) {
        let chaos = &config.chaos;

        if chaos.interval_min > chaos.interval_max {
            self.add_error(
                "chaos.interval_min",
                &format!(
                    "interval_min ({}) must not exceed interval_max ({})",
                    humantime::format_duration(chaos.interval_min),
                    humantime::format_duration(chaos.interval_max),
                ),
            );
        }

        if chaos.interval_max.is_zero() {
            self.add_error(
                "chaos.interval_max",
                "interval_max must be greater than zero",
            );
        }

        if chaos.tick_interval.is_zero() {
            self.add_error(
                "chaos.tick_interval",
                "tick_interval must be greater than zero",
            );
        }

        if chaos.duration.is_zero() {
            self.add_warning(
                "chaos.duration",
                "duration is zero; effects deactivate as soon as they activate",
            );
        }

        if chaos.tick_interval > Duration::ZERO && chaos.tick_interval > chaos.duration {
            self.add_warning(
                "chaos.tick_interval",
                "tick_interval is longer than duration; effects may never tick",
            );
        }

        if chaos.subside_text.contains(['\n', '\r']) {
            self.add_error("chaos.subside_text", "subside_text must be a single line");
        }
    }

    fn validate_announcer(&mut self, config: &MayhemConfig) {
        let name = &config.announcer.name;
        if name.contains(['\n', '\r']) {
            self.add_error("announcer.name", "announcer name must be a single line");
        }
        if config.announcer.enabled && name.trim().is_empty() {
            self.add_warning(
                "announcer.name",
                "announcer name is empty; messages are shown without a prefix",
            );
        }
    }

    fn validate_effects(&mut self, config: &MayhemConfig, known_effects: &[&str]) {
        for (id, override_) in &config.effects {
            let path = format!("effects.{id}");

            if let Some(weight) = override_.weight {
                if !weight.is_finite() || weight < 0.0 {
                    self.add_error(
                        &format!("{path}.weight"),
                        &format!("weight must be a finite number >= 0, got {weight}"),
                    );
                }
            }

            if !known_effects.is_empty() && !known_effects.contains(&id.as_str()) {
                let message = suggest_effect(id, known_effects).map_or_else(
                    || format!("unknown effect '{id}'"),
                    |s| format!("unknown effect '{id}', did you mean '{s}'?"),
                );
                self.add_warning(&path, &message);
            }
        }

        if config.chaos.enabled && !known_effects.is_empty() {
            let any_selectable = known_effects.iter().any(|id| {
                config.effects.get(*id).is_none_or(|o| {
                    o.enabled.unwrap_or(true) && o.weight.is_none_or(|w| w > 0.0)
                })
            });
            if !any_selectable {
                self.add_warning(
                    "effects",
                    "every effect is disabled or has zero weight; no cycle will select anything",
                );
            }
        }
    }

    // ========================================================================
    // Helper Methods
    // ========================================================================

    fn add_error(&mut self, path: &str, message: &str) {
        self.errors.push(ValidationIssue {
            path: path.to_string(),
            message: message.to_string(),
            severity: Severity::Error,
        });
    }

    fn add_warning(&mut self, path: &str, message: &str) {
        self.warnings.push(ValidationIssue {
            path: path.to_string(),
            message: message.to_string(),
            severity: Severity::Warning,
        });
    }
}

/// Returns the closest known effect id within [`SUGGESTION_DISTANCE`] edits.
///
/// Case, spaces and underscores are ignored, so `fog_of_war` finds
/// `Fog of War`.
#[must_use]
pub fn suggest_effect<'a>(input: &str, known: &[&'a str]) -> Option<&'a str> {
    let input = fold_id(input);
    known
        .iter()
        .map(|id| (*id, strsim::damerau_levenshtein(&input, &fold_id(id))))
        .filter(|(_, d)| *d <= SUGGESTION_DISTANCE)
        .min_by_key(|(_, d)| *d)
        .map(|(id, _)| id)
}

fn fold_id(id: &str) -> String {
    id.chars()
        .filter(|c| !matches!(c, ' ' | '_' | '-'))
        .flat_map(char::to_lowercase)
        .collect()
}
