//! Inbound side of the phase protocol.
//!
//! Every participant runs a receiver. All of them show the frame text; only
//! followers replay activate/deactivate, because the host already applied
//! the transition when it produced the frame.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::frame::{self, Phase};
use crate::config::schema::Role;
use crate::error::{ChaosError, FrameError};
use crate::lifecycle::LifecycleRunner;
use crate::observability::{Event, EventEmitter, metrics};
use crate::presentation::Presenter;
use crate::registry::EffectRegistry;
use crate::transport::PhaseTransport;

/// What the caller should do with a frame after [`PhaseReceiver::handle_frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDisposition {
    /// Not a phase frame; treat it as an ordinary message, unmodified.
    PassThrough,
    /// A phase frame (well-formed or not); suppress it from normal handling.
    Consumed,
}

/// Decodes phase frames, presents their text and replays transitions on
/// followers.
pub struct PhaseReceiver {
    role: Role,
    registry: Arc<EffectRegistry>,
    runner: Arc<LifecycleRunner>,
    presenter: Arc<dyn Presenter>,
    events: Arc<EventEmitter>,
}

impl PhaseReceiver {
    /// Creates a receiver.
    #[must_use]
    pub fn new(
        role: Role,
        registry: Arc<EffectRegistry>,
        runner: Arc<LifecycleRunner>,
        presenter: Arc<dyn Presenter>,
        events: Arc<EventEmitter>,
    ) -> Self {
        Self {
            role,
            registry,
            runner,
            presenter,
            events,
        }
    }

    /// Handles one incoming frame.
    ///
    /// Never fails: malformed frames, unknown phases, unknown effect ids and
    /// callback failures during replay are logged and absorbed.
    pub fn handle_frame(&self, raw: &str) -> FrameDisposition {
        let message = match frame::decode(raw) {
            Ok(None) => return FrameDisposition::PassThrough,
            Ok(Some(message)) => message,
            Err(FrameError::MissingFields { found }) => {
                warn!(found, "malformed phase frame ignored");
                metrics::record_frame_received("malformed");
                self.record_frame("malformed", None);
                return FrameDisposition::Consumed;
            }
            Err(FrameError::UnknownPhase {
                phase,
                effect_id,
                text,
            }) => {
                warn!(%phase, effect = %effect_id, "phase frame with unknown phase");
                metrics::record_frame_received("unknown_phase");
                self.record_frame("unknown_phase", Some(effect_id));
                self.presenter.show_message(&text);
                return FrameDisposition::Consumed;
            }
        };

        debug!(phase = %message.phase, effect = %message.effect_id, "phase frame received");
        metrics::record_frame_received(message.phase.as_str());
        self.record_frame(message.phase.as_str(), Some(message.effect_id.to_string()));
        self.presenter.show_message(&message.text);

        if self.role.is_authoritative() || message.phase == Phase::Warn {
            return FrameDisposition::Consumed;
        }

        let Some(effect) = self.registry.find_by_id(message.effect_id.as_str()) else {
            let err = ChaosError::UnresolvedEffectId(message.effect_id.to_string());
            warn!(error = %err, "phase frame ignored");
            return FrameDisposition::Consumed;
        };

        let applied = match message.phase {
            Phase::Activate => self.runner.apply_activate_locally(&effect),
            Phase::Deactivate => self.runner.apply_deactivate_locally(&effect),
            Phase::Warn => Ok(()),
        };
        if let Err(e) = applied {
            warn!(error = %e, "local replay of phase frame failed");
        }
        FrameDisposition::Consumed
    }

    /// Spawns the pump that feeds received frames to
    /// [`handle_frame`](Self::handle_frame).
    ///
    /// Pass-through frames are forwarded to `passthrough` when given. The
    /// task ends on cancellation, when the transport closes, or on a
    /// transport error.
    pub fn start(
        self: &Arc<Self>,
        transport: Arc<dyn PhaseTransport>,
        cancel: CancellationToken,
        passthrough: Option<mpsc::UnboundedSender<String>>,
    ) -> JoinHandle<()> {
        let receiver = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let received = tokio::select! {
                    () = cancel.cancelled() => {
                        debug!("receiver task cancelled");
                        break;
                    }
                    received = transport.recv_frame() => received,
                };

                match received {
                    Ok(Some(raw)) => {
                        if receiver.handle_frame(&raw) == FrameDisposition::PassThrough {
                            if let Some(tx) = &passthrough {
                                let _ = tx.send(raw);
                            }
                        }
                    }
                    Ok(None) => {
                        info!(transport = %transport.transport_type(), "transport closed");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "transport receive failed; receiver stopping");
                        break;
                    }
                }
            }
        })
    }

    fn record_frame(&self, phase: &str, effect_id: Option<String>) {
        self.events.emit(Event::FrameReceived {
            timestamp: Utc::now(),
            phase: phase.to_owned(),
            effect_id,
        });
    }
}

impl std::fmt::Debug for PhaseReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhaseReceiver")
            .field("role", &self.role)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
