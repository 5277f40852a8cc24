//! Observability module
//!
//! Logging, metrics, and structured event infrastructure for watching a
//! chaos session from the outside.

pub mod events;
pub mod logging;
pub mod metrics;

pub use events::{Event, EventEmitter, StopReason};
pub use logging::{LogFormat, init_logging};
pub use metrics::init_metrics;
