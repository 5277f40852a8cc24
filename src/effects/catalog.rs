//! Built-in effect catalog.
//!
//! The stock effects ship as metadata plus log-only callbacks: the
//! scheduler and protocol treat them exactly like effects registered by an
//! embedding application, which supplies the real behaviour.

use std::sync::Arc;

use tracing::{info, trace};

use crate::config::schema::MayhemConfig;
use crate::effect::{EffectDescriptor, EffectKnobs};
use crate::error::RegistryError;
use crate::registry::EffectRegistry;

/// Static description of a built-in effect.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CatalogEntry {
    /// Wire id, matching what other participants already send
    pub id: &'static str,
    /// Name shown in listings and logs
    pub display_name: &'static str,
    /// Warning broadcast before activation
    pub warn_text: &'static str,
    /// Announcement on activation
    pub activate_text: &'static str,
    /// Weight used when configuration does not override it
    pub default_weight: f64,
    /// Whether the effect does per-tick work while active; the rest run
    /// entirely from their activate and deactivate callbacks
    pub ticks: bool,
}

/// Every built-in effect, in registration order.
pub const BUILTIN: &[CatalogEntry] = &[
    CatalogEntry {
        id: "Gravity Flip",
        display_name: "Gravity Flip",
        warn_text: "⚠️ GRAVITY IS ABOUT TO MISBEHAVE...",
        activate_text: "🌀 GRAVITY FLIP! HOLD ON TO YOUR CLUBS!",
        default_weight: 1.0,
        ticks: false,
    },
    CatalogEntry {
        id: "Speed Surge",
        display_name: "Speed Surge",
        warn_text: "⚠️ SOMETHING IS ACCELERATING...",
        activate_text: "💨 SPEED SURGE! EVERYTHING IS FASTER!",
        default_weight: 1.2,
        ticks: true,
    },
    CatalogEntry {
        id: "Mine Flood",
        display_name: "Mine Flood",
        warn_text: "⚠️ SOMETHING IS BEING PLANTED...",
        activate_text: "💣 MINE FLOOD! WATCH YOUR STEP!",
        default_weight: 0.8,
        ticks: true,
    },
    CatalogEntry {
        id: "Magnet Hole",
        display_name: "Magnet Hole",
        warn_text: "⚠️ THE HOLE IS ACTING STRANGE...",
        activate_text: "🕳️ MAGNET HOLE! THE HOLE IS FIGHTING BACK!",
        default_weight: 1.0,
        ticks: true,
    },
    CatalogEntry {
        id: "Fog of War",
        display_name: "Fog of War",
        warn_text: "A strange mist approaches...",
        activate_text: "A thick fog has appeared on the map!",
        default_weight: 1.0,
        ticks: false,
    },
    CatalogEntry {
        id: "MiniatureMode",
        display_name: "Miniature Mode",
        warn_text: "Something feels different...",
        activate_text: "Everyone is now tiny!",
        default_weight: 1.0,
        ticks: false,
    },
    CatalogEntry {
        id: "OrbitalStrike",
        display_name: "Orbital Strike",
        warn_text: "Something is locking on...",
        activate_text: "Orbital Strike! Take cover!",
        default_weight: 1.0,
        ticks: false,
    },
    CatalogEntry {
        id: "GiantMode",
        display_name: "Giant Mode",
        warn_text: "Something feels different...",
        activate_text: "Everyone is now giant!",
        default_weight: 1.0,
        ticks: false,
    },
    CatalogEntry {
        id: "NightTime",
        display_name: "Night Time",
        warn_text: "The sky is darkening...",
        activate_text: "Night has fallen, watch your step!",
        default_weight: 1.0,
        ticks: false,
    },
    CatalogEntry {
        id: "GolfCartChaos",
        display_name: "Golf Cart Chaos",
        warn_text: "Something's approaching...",
        activate_text: "Everyone now has golf carts!",
        default_weight: 1.0,
        ticks: false,
    },
    CatalogEntry {
        id: "CoffeeRush",
        display_name: "Coffee Rush",
        warn_text: "Something's brewing...",
        activate_text: "Coffee rush! Everyone's wired!",
        default_weight: 1.0,
        ticks: false,
    },
    CatalogEntry {
        id: "Tornado",
        display_name: "Tornado",
        warn_text: "The wind is picking up...",
        activate_text: "Tornado! Hold on!",
        default_weight: 1.0,
        ticks: false,
    },
];

/// Ids of every built-in effect.
#[must_use]
pub fn builtin_ids() -> Vec<&'static str> {
    BUILTIN.iter().map(|e| e.id).collect()
}

/// Looks up a built-in entry by id.
#[must_use]
pub fn find(id: &str) -> Option<&'static CatalogEntry> {
    BUILTIN.iter().find(|e| e.id == id)
}

/// Knobs for `entry` with configuration overrides applied.
#[must_use]
pub fn knobs_for(entry: &CatalogEntry, config: &MayhemConfig) -> Arc<EffectKnobs> {
    let overrides = config.effects.get(entry.id);
    let enabled = overrides.and_then(|o| o.enabled).unwrap_or(true);
    let weight = overrides
        .and_then(|o| o.weight)
        .unwrap_or(entry.default_weight);
    Arc::new(EffectKnobs::new(enabled, weight))
}

/// Builds the descriptor for one entry.
///
/// # Errors
///
/// Returns [`RegistryError::InvalidArgument`] if the configured weight is
/// negative or not finite.
pub fn build(entry: &CatalogEntry, config: &MayhemConfig) -> Result<EffectDescriptor, RegistryError> {
    let knobs = knobs_for(entry, config);
    let weight = knobs.weight();
    if !(weight.is_finite() && weight >= 0.0) {
        return Err(RegistryError::InvalidArgument(format!(
            "weight of effect '{}' must be a finite non-negative number, got {weight}",
            entry.id
        )));
    }

    let id = entry.id;
    let mut builder = EffectDescriptor::builder(entry.display_name)
        .id(id)
        .warn_text(entry.warn_text)
        .activate_text(entry.activate_text)
        .knobs(knobs)
        .on_activate(move || {
            info!(effect = id, "effect applied");
            Ok(())
        })
        .on_deactivate(move || {
            info!(effect = id, "effect reverted");
            Ok(())
        });

    if entry.ticks {
        builder = builder.on_tick(move || {
            trace!(effect = id, "effect tick");
            Ok(())
        });
    }

    builder.build()
}

/// Registers every built-in effect with configuration overrides applied.
///
/// Returns the number of effects registered.
///
/// # Errors
///
/// Returns the first [`RegistryError`] encountered.
pub fn register_builtins(
    registry: &EffectRegistry,
    config: &MayhemConfig,
) -> Result<usize, RegistryError> {
    for entry in BUILTIN {
        registry.register(build(entry, config)?)?;
    }
    Ok(BUILTIN.len())
}
