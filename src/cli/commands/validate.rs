//! `validate` command
//!
//! Loads each file through the full pipeline and reports every issue,
//! continuing past failures so one run covers all files.

use std::path::Path;

use serde::Serialize;

use crate::cli::args::{OutputFormat, ValidateArgs};
use crate::config::loader::{ConfigLoader, LoaderOptions};
use crate::error::{ConfigError, MayhemError};

/// Outcome for one file.
#[derive(Debug, Serialize)]
struct FileReport {
    file: String,
    valid: bool,
    errors: Vec<String>,
    warnings: Vec<String>,
}

/// Validate configuration files without starting a session.
///
/// # Errors
///
/// Returns the first file's error when any file fails to load or validate.
pub fn run(args: &ValidateArgs) -> Result<(), MayhemError> {
    let loader = ConfigLoader::new(LoaderOptions {
        strict: args.strict,
        ..LoaderOptions::default()
    });

    let mut first_error: Option<MayhemError> = None;
    let mut reports = Vec::with_capacity(args.files.len());

    for path in &args.files {
        tracing::info!(file = %path.display(), "validating configuration");
        let (report, error) = check(&loader, path);
        reports.push(report);
        if first_error.is_none() {
            first_error = error;
        }
    }

    match args.format {
        OutputFormat::Human => {
            for report in &reports {
                print!("{}", render_human(report));
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&reports)?),
    }

    first_error.map_or(Ok(()), Err)
}

fn check(loader: &ConfigLoader, path: &Path) -> (FileReport, Option<MayhemError>) {
    let file = path.display().to_string();
    match loader.load(path) {
        Ok(loaded) => (
            FileReport {
                file,
                valid: true,
                errors: Vec::new(),
                warnings: loaded.warnings.iter().map(ToString::to_string).collect(),
            },
            None,
        ),
        Err(e) => {
            let errors = match &e {
                ConfigError::ValidationError { errors, .. } => {
                    errors.iter().map(ToString::to_string).collect()
                }
                other => vec![other.to_string()],
            };
            (
                FileReport {
                    file,
                    valid: false,
                    errors,
                    warnings: Vec::new(),
                },
                Some(e.into()),
            )
        }
    }
}

fn render_human(report: &FileReport) -> String {
    let mut out = format!(
        "{}: {}\n",
        report.file,
        if report.valid { "ok" } else { "invalid" }
    );
    for line in report.errors.iter().chain(&report.warnings) {
        out.push_str("  ");
        out.push_str(line);
        out.push('\n');
    }
    out
}
