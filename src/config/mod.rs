//! Configuration
//!
//! Loads and validates the YAML configuration: scheduler timing, session
//! role, announcer and per-effect overrides.

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{ConfigLimits, ConfigLoader, LoadResult, LoadWarning, LoaderOptions};
pub use schema::*;
pub use validation::{ValidationResult, Validator, suggest_effect};
