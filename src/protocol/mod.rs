//! Phase protocol
//!
//! Keeps followers' view of the active effect in step with the host by
//! announcing each lifecycle transition as a single-line text frame.

pub mod broadcaster;
pub mod frame;
pub mod receiver;

pub use broadcaster::PhaseBroadcaster;
pub use frame::{Phase, PhaseMessage, SENTINEL};
pub use receiver::{FrameDisposition, PhaseReceiver};
