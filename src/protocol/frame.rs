//! Phase frame codec.
//!
//! ```text
//! ##GOLFMAYHEM##<phase>|<effect_id>|<text>
//! ```
//!
//! `<phase>` is a single digit. The payload is split into at most three
//! fields, so `|` inside `<text>` survives a round trip.

use std::fmt;

use crate::effect::{EffectId, ID_DELIMITER};
use crate::error::FrameError;

/// Marker that distinguishes phase frames from ordinary messages.
pub const SENTINEL: &str = "##GOLFMAYHEM##";

/// A lifecycle transition announced on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Teaser before activation; no state change.
    Warn,
    /// The effect becomes active.
    Activate,
    /// The effect is reverted.
    Deactivate,
}

impl Phase {
    /// Wire digit for this phase.
    #[must_use]
    pub const fn digit(self) -> char {
        match self {
            Self::Warn => '0',
            Self::Activate => '1',
            Self::Deactivate => '2',
        }
    }

    /// Parses a wire field into a phase.
    #[must_use]
    pub fn from_field(field: &str) -> Option<Self> {
        match field {
            "0" => Some(Self::Warn),
            "1" => Some(Self::Activate),
            "2" => Some(Self::Deactivate),
            _ => None,
        }
    }

    /// Lower-case name used in logs, events and metric labels.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Warn => "warn",
            Self::Activate => "activate",
            Self::Deactivate => "deactivate",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decoded phase frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseMessage {
    /// Transition being announced.
    pub phase: Phase,
    /// Wire id of the effect.
    pub effect_id: EffectId,
    /// Text to present to the participant.
    pub text: String,
}

impl PhaseMessage {
    /// Creates a message.
    #[must_use]
    pub fn new(phase: Phase, effect_id: EffectId, text: impl Into<String>) -> Self {
        Self {
            phase,
            effect_id,
            text: text.into(),
        }
    }

    /// Serializes the message into a single-line frame.
    ///
    /// Line breaks in `text` are replaced with spaces so the frame stays
    /// one line on line-oriented transports.
    #[must_use]
    pub fn encode(&self) -> String {
        let text = if self.text.contains(['\n', '\r']) {
            self.text.replace(['\n', '\r'], " ")
        } else {
            self.text.clone()
        };
        format!(
            "{SENTINEL}{}{ID_DELIMITER}{}{ID_DELIMITER}{text}",
            self.phase.digit(),
            self.effect_id
        )
    }
}

/// Returns `true` if `frame` starts with the phase sentinel.
#[must_use]
pub fn is_phase_frame(frame: &str) -> bool {
    frame.starts_with(SENTINEL)
}

/// Decodes a frame.
///
/// Returns `Ok(None)` for anything without the sentinel: it is an ordinary
/// message and must be handed back untouched.
///
/// # Errors
///
/// - [`FrameError::MissingFields`] when the payload has fewer than three
///   `|`-separated fields.
/// - [`FrameError::UnknownPhase`] when the phase field is not `0`, `1` or
///   `2`; the id and text are still returned inside the error.
pub fn decode(frame: &str) -> Result<Option<PhaseMessage>, FrameError> {
    let Some(payload) = frame.strip_prefix(SENTINEL) else {
        return Ok(None);
    };

    let fields: Vec<&str> = payload.splitn(3, ID_DELIMITER).collect();
    let [phase, effect_id, text] = fields[..] else {
        return Err(FrameError::MissingFields {
            found: fields.len(),
        });
    };

    let Some(parsed) = Phase::from_field(phase) else {
        return Err(FrameError::UnknownPhase {
            phase: phase.to_owned(),
            effect_id: effect_id.to_owned(),
            text: text.to_owned(),
        });
    };

    Ok(Some(PhaseMessage::new(
        parsed,
        EffectId::new(effect_id),
        text,
    )))
}
