//! Effect lifecycle
//!
//! Drives one effect at a time through warn → activate → hold → deactivate
//! and owns the single-active-effect bookkeeping every other component
//! queries.

pub mod runner;
pub mod state;

pub use runner::LifecycleRunner;
pub use state::{LifecycleNotification, LifecycleState, LifecycleTiming, RunOutcome};
