//! Presentation collaborator.
//!
//! Every received phase frame's text is handed to a [`Presenter`]; what
//! "showing" means (chat line, HUD toast, log line) is up to the host
//! application.

use std::io::Write;
use std::sync::{Mutex, PoisonError};

use tracing::info;

/// Shows announcement text to the local participant.
pub trait Presenter: Send + Sync {
    /// Displays one message.
    fn show_message(&self, text: &str);
}

/// Presenter that emits each message as an `info` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingPresenter;

impl Presenter for TracingPresenter {
    fn show_message(&self, text: &str) {
        info!(target: "mayhem::announce", message = text, "announcement");
    }
}

/// Presenter that writes one line per message, prefixed by the announcer
/// name (`"<name>: <text>"`).
pub struct ConsolePresenter {
    prefix: Option<String>,
    writer: Mutex<Box<dyn Write + Send>>,
}

impl ConsolePresenter {
    /// Creates a presenter over any writer.
    #[must_use]
    pub fn new(writer: Box<dyn Write + Send>, prefix: Option<String>) -> Self {
        Self {
            prefix: prefix.filter(|p| !p.trim().is_empty()),
            writer: Mutex::new(writer),
        }
    }

    /// Creates a presenter on stderr.
    #[must_use]
    pub fn stderr(prefix: Option<String>) -> Self {
        Self::new(Box::new(std::io::stderr()), prefix)
    }

    /// Formats a message the way it will be written.
    #[must_use]
    pub fn format_message(&self, text: &str) -> String {
        self.prefix
            .as_ref()
            .map_or_else(|| text.to_owned(), |p| format!("{p}: {text}"))
    }
}

impl Presenter for ConsolePresenter {
    fn show_message(&self, text: &str) {
        let line = self.format_message(text);
        let mut w = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let _ = writeln!(w, "{line}");
        let _ = w.flush();
    }
}

impl std::fmt::Debug for ConsolePresenter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsolePresenter")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}
