//! `Mayhem` - chaos effect scheduler
//!
//! Periodically picks a weighted-random effect, runs it through a
//! warn → activate → hold → deactivate lifecycle, and keeps every
//! participant in step by broadcasting each phase as a text frame.

pub mod cli;
pub mod config;
pub mod effect;
pub mod effects;
pub mod error;
pub mod lifecycle;
pub mod observability;
pub mod presentation;
pub mod protocol;
pub mod registry;
pub mod scheduler;
pub mod selector;
pub mod session;
pub mod transport;

pub use effect::{EffectDescriptor, EffectId, EffectKnobs};
pub use error::{ChaosError, MayhemError, RegistryError};
pub use registry::EffectRegistry;
pub use session::{ChaosApi, Session, SessionContext};
