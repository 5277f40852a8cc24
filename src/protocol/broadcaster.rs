//! Outbound side of the phase protocol.

use std::sync::Arc;

use tracing::{debug, warn};

use super::frame::{Phase, PhaseMessage};
use crate::config::schema::Role;
use crate::effect::EffectId;
use crate::observability::metrics;
use crate::transport::PhaseTransport;

/// Serializes lifecycle transitions and hands them to the transport.
///
/// Only the authoritative participant broadcasts; on a follower every call
/// is a no-op. A send failure is logged and counted but never interrupts
/// the run that produced it.
pub struct PhaseBroadcaster {
    transport: Option<Arc<dyn PhaseTransport>>,
    role: Role,
}

impl PhaseBroadcaster {
    /// Creates a broadcaster over `transport`.
    #[must_use]
    pub fn new(transport: Arc<dyn PhaseTransport>, role: Role) -> Self {
        Self {
            transport: Some(transport),
            role,
        }
    }

    /// Creates a broadcaster with nowhere to send (single-participant sessions).
    #[must_use]
    pub const fn detached(role: Role) -> Self {
        Self {
            transport: None,
            role,
        }
    }

    /// Returns the role this broadcaster was created for.
    #[must_use]
    pub const fn role(&self) -> Role {
        self.role
    }

    /// Broadcasts one transition.
    ///
    /// Returns `true` when the frame was handed to the transport.
    pub async fn broadcast(&self, phase: Phase, effect_id: &EffectId, text: &str) -> bool {
        if !self.role.is_authoritative() {
            return false;
        }
        let Some(transport) = &self.transport else {
            return false;
        };

        let frame = PhaseMessage::new(phase, effect_id.clone(), text).encode();
        match transport.send_frame(&frame).await {
            Ok(()) => {
                debug!(%phase, effect = %effect_id, "phase broadcast");
                true
            }
            Err(e) => {
                warn!(%phase, effect = %effect_id, error = %e, "phase broadcast failed");
                metrics::record_broadcast_failure();
                false
            }
        }
    }
}

impl std::fmt::Debug for PhaseBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhaseBroadcaster")
            .field(
                "transport",
                &self.transport.as_ref().map(|t| t.transport_type()),
            )
            .field("role", &self.role)
            .finish()
    }
}
