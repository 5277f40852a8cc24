//! Structured event stream for `Mayhem`.
//!
//! Discrete, typed events emitted while a session runs. Events are written
//! as newline-delimited JSON (JSONL) with a monotonically increasing
//! sequence number so consumers can order them.

use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::config::schema::Role;

/// Why a session stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Session ended normally (match over, transport closed).
    Shutdown,
    /// SIGINT / Ctrl+C.
    Interrupted,
    /// SIGTERM.
    Terminated,
    /// The scheduler stopped on an effect callback failure.
    Error,
}

/// A discrete event emitted during a chaos session.
///
/// Tagged with `"type"` when serialized so consumers can dispatch on kind.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum Event {
    /// A session was started and the chaos API attached.
    SessionStarted {
        /// When the session started.
        timestamp: DateTime<Utc>,
        /// Unique id of this session.
        session_id: Uuid,
        /// Whether this participant is authoritative.
        role: Role,
        /// Number of registered effects at start.
        effects: usize,
        /// Whether the scheduler loop runs.
        scheduler: bool,
    },

    /// A session was torn down.
    SessionStopped {
        /// When the session stopped.
        timestamp: DateTime<Utc>,
        /// Id of the stopped session.
        session_id: Uuid,
        /// Why it stopped.
        reason: StopReason,
    },

    /// The warning phase of a run began.
    EffectWarned {
        /// When the warning was issued.
        timestamp: DateTime<Utc>,
        /// Effect about to activate.
        effect_id: String,
    },

    /// An effect became active.
    EffectActivated {
        /// When `activate()` returned.
        timestamp: DateTime<Utc>,
        /// Active effect.
        effect_id: String,
        /// `false` when replayed from a received frame.
        authoritative: bool,
    },

    /// An effect was reverted at the end of its hold.
    EffectDeactivated {
        /// When the effect ended.
        timestamp: DateTime<Utc>,
        /// Reverted effect.
        effect_id: String,
        /// Whether `deactivate()` reported success.
        success: bool,
    },

    /// An active effect was reverted by forced teardown.
    EffectTornDown {
        /// When teardown happened.
        timestamp: DateTime<Utc>,
        /// Reverted effect.
        effect_id: String,
        /// Whether `deactivate()` reported success.
        success: bool,
    },

    /// A scheduler cycle started nothing.
    CycleSkipped {
        /// When the cycle fired.
        timestamp: DateTime<Utc>,
        /// Machine-readable reason (`"busy"`, `"no_eligible_effects"`).
        reason: String,
    },

    /// A phase frame was received.
    FrameReceived {
        /// When the frame arrived.
        timestamp: DateTime<Utc>,
        /// Phase name, or `"malformed"`.
        phase: String,
        /// Effect id carried by the frame, if it had one.
        #[serde(skip_serializing_if = "Option::is_none")]
        effect_id: Option<String>,
    },
}

#[derive(Debug, Serialize)]
struct EventEnvelope {
    sequence: u64,
    #[serde(flatten)]
    event: Event,
}

/// Thread-safe, buffered JSONL event writer.
///
/// Each [`emit`](Self::emit) takes the next sequence number, writes one
/// JSON line and flushes. Serialization or I/O failures are dropped.
pub struct EventEmitter {
    writer: Mutex<BufWriter<Box<dyn Write + Send>>>,
    sequence: AtomicU64,
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("sequence", &self.sequence.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl EventEmitter {
    /// Creates an emitter that writes to the given writer.
    #[must_use]
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Mutex::new(BufWriter::new(writer)),
            sequence: AtomicU64::new(0),
        }
    }

    /// Creates an emitter that writes to stderr.
    ///
    /// stdout is reserved for phase frames when running over stdio.
    #[must_use]
    pub fn stderr() -> Self {
        Self::new(Box::new(std::io::stderr()))
    }

    /// Creates an emitter that discards everything.
    #[must_use]
    pub fn noop() -> Self {
        Self::new(Box::new(std::io::sink()))
    }

    /// Creates an emitter that writes to a file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be created.
    pub fn from_file(path: &Path) -> std::io::Result<Self> {
        let file = std::fs::File::create(path)?;
        Ok(Self::new(Box::new(file)))
    }

    /// Emits an event as a single JSONL line.
    pub fn emit(&self, event: Event) {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        let envelope = EventEnvelope { sequence, event };

        if let Ok(mut w) = self.writer.lock() {
            if let Ok(line) = serde_json::to_string(&envelope) {
                let _ = writeln!(w, "{line}");
                let _ = w.flush();
            }
        }
    }

    /// Returns the number of events emitted so far.
    #[must_use]
    pub fn event_count(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }
}
