//! `effects` command: lists the built-in catalog.

use serde::Serialize;

use crate::cli::args::{EffectsArgs, OutputFormat};
use crate::config::schema::MayhemConfig;
use crate::effects::catalog::{self, BUILTIN};
use crate::error::MayhemError;

#[derive(Debug, Serialize)]
struct EffectRow {
    id: &'static str,
    name: &'static str,
    enabled: bool,
    weight: f64,
    default_weight: f64,
    warn_text: &'static str,
    activate_text: &'static str,
}

/// Print every built-in effect with configuration overrides applied.
///
/// # Errors
///
/// Returns a configuration error if `--config` fails to load.
pub fn run(args: &EffectsArgs) -> Result<(), MayhemError> {
    let config = super::load_config(args.config.as_deref())?;
    let rows = rows(&config);

    match args.format {
        OutputFormat::Human => print!("{}", render_table(&rows)),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
    }
    Ok(())
}

fn rows(config: &MayhemConfig) -> Vec<EffectRow> {
    BUILTIN
        .iter()
        .map(|entry| {
            let knobs = catalog::knobs_for(entry, config);
            EffectRow {
                id: entry.id,
                name: entry.display_name,
                enabled: knobs.enabled(),
                weight: knobs.weight(),
                default_weight: entry.default_weight,
                warn_text: entry.warn_text,
                activate_text: entry.activate_text,
            }
        })
        .collect()
}

fn render_table(rows: &[EffectRow]) -> String {
    let id_width = rows.iter().map(|r| r.id.len()).max().unwrap_or(2).max(2);
    let mut out = format!("{:<id_width$}  {:<7}  {:>6}  NAME\n", "ID", "ENABLED", "WEIGHT");
    for row in rows {
        out.push_str(&format!(
            "{:<id_width$}  {:<7}  {:>6.2}  {}\n",
            row.id,
            if row.enabled { "yes" } else { "no" },
            row.weight,
            row.name
        ));
    }
    out
}
