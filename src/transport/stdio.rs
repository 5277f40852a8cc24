//! Line-framed transport over stdin/stdout.
//!
//! One phase frame per line. Used by the `run` command so a host process
//! can be piped into follower processes (or into any relay that fans
//! lines out to participants).

use super::{
    DEFAULT_MAX_FRAME_SIZE, DEFAULT_STDIO_BUFFER_SIZE, PhaseTransport, Result, TransportType,
};
use crate::error::TransportError;

use std::str::FromStr;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Configuration for the stdio transport.
#[derive(Debug, Clone, Copy)]
pub struct StdioConfig {
    /// Maximum frame size in bytes; longer lines are skipped.
    pub max_frame_size: usize,
    /// Read/write buffer size in bytes.
    pub buffer_size: usize,
}

impl StdioConfig {
    /// Loads configuration from environment variables with defaults.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `MAYHEM_MAX_FRAME_SIZE` | 64 KB |
    /// | `MAYHEM_STDIO_BUFFER_SIZE` | 64 KB |
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            max_frame_size: env_or("MAYHEM_MAX_FRAME_SIZE", DEFAULT_MAX_FRAME_SIZE),
            buffer_size: env_or("MAYHEM_STDIO_BUFFER_SIZE", DEFAULT_STDIO_BUFFER_SIZE),
        }
    }
}

impl Default for StdioConfig {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            buffer_size: DEFAULT_STDIO_BUFFER_SIZE,
        }
    }
}

/// Newline-framed transport.
///
/// Reader and writer sit behind separate async mutexes so a pending
/// receive never blocks a broadcast.
pub struct StdioTransport {
    reader: Mutex<BufReader<BoxedReader>>,
    writer: Mutex<BufWriter<BoxedWriter>>,
    config: StdioConfig,
    closed: CancellationToken,
}

impl StdioTransport {
    /// Creates a transport on the process's stdin/stdout, configured from
    /// the environment.
    #[must_use]
    pub fn new() -> Self {
        Self::from_io(
            Box::new(tokio::io::stdin()),
            Box::new(tokio::io::stdout()),
            StdioConfig::from_env(),
        )
    }

    /// Creates a transport on arbitrary byte streams.
    #[must_use]
    pub fn from_io(reader: BoxedReader, writer: BoxedWriter, config: StdioConfig) -> Self {
        Self {
            reader: Mutex::new(BufReader::with_capacity(config.buffer_size, reader)),
            writer: Mutex::new(BufWriter::with_capacity(config.buffer_size, writer)),
            config,
            closed: CancellationToken::new(),
        }
    }

    /// Reads one line, capped at `max_frame_size + 1` bytes.
    ///
    /// Returns `Ok(None)` at EOF and `Ok(Some(None))` for a line that was
    /// too long (already drained).
    #[allow(clippy::significant_drop_tightening)] // reader must be held across the loop
    async fn read_bounded_line(&self) -> Result<Option<Option<Vec<u8>>>> {
        let mut reader = self.reader.lock().await;
        let read_limit = self.config.max_frame_size + 1;
        let mut buf: Vec<u8> = Vec::with_capacity(read_limit.min(4 * 1024));
        let mut overflowed = false;

        loop {
            let available = reader.fill_buf().await?;
            if available.is_empty() {
                if buf.is_empty() && !overflowed {
                    return Ok(None);
                }
                break;
            }

            let (chunk, found_newline) = available
                .iter()
                .position(|&b| b == b'\n')
                .map_or((available, false), |pos| (&available[..pos], true));

            if !overflowed {
                let remaining_cap = read_limit.saturating_sub(buf.len());
                let copy_len = chunk.len().min(remaining_cap);
                buf.extend_from_slice(&chunk[..copy_len]);
                overflowed = chunk.len() > remaining_cap || buf.len() > self.config.max_frame_size;
            }

            let consumed = chunk.len() + usize::from(found_newline);
            reader.consume(consumed);
            if found_newline {
                break;
            }
        }

        Ok(Some((!overflowed).then_some(buf)))
    }
}

impl Default for StdioTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StdioTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StdioTransport")
            .field("config", &self.config)
            .field("closed", &self.closed.is_cancelled())
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl PhaseTransport for StdioTransport {
    async fn send_frame(&self, frame: &str) -> Result<()> {
        if self.closed.is_cancelled() {
            return Err(TransportError::Closed("stdio transport closed".into()));
        }
        if frame.contains(['\n', '\r']) {
            return Err(TransportError::Protocol(
                "frame contains a line break".into(),
            ));
        }
        if frame.len() > self.config.max_frame_size {
            return Err(TransportError::FrameTooLarge {
                size: frame.len(),
                limit: self.config.max_frame_size,
            });
        }
        let mut writer = self.writer.lock().await;
        writer.write_all(frame.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        drop(writer);
        Ok(())
    }

    async fn recv_frame(&self) -> Result<Option<String>> {
        loop {
            let line = tokio::select! {
                () = self.closed.cancelled() => return Ok(None),
                line = self.read_bounded_line() => line?,
            };

            let Some(line) = line else {
                return Ok(None);
            };
            let Some(bytes) = line else {
                tracing::warn!(
                    limit = self.config.max_frame_size,
                    "frame exceeds size limit, skipping"
                );
                continue;
            };

            let text = match String::from_utf8(bytes) {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!("invalid UTF-8 in frame, skipping line: {e}");
                    continue;
                }
            };
            let text = text.strip_suffix('\r').unwrap_or(&text);
            if text.trim().is_empty() {
                continue;
            }
            return Ok(Some(text.to_owned()));
        }
    }

    async fn close(&self) -> Result<()> {
        self.closed.cancel();
        let mut writer = self.writer.lock().await;
        writer.flush().await?;
        drop(writer);
        Ok(())
    }

    fn transport_type(&self) -> TransportType {
        TransportType::Stdio
    }
}

/// Reads an environment variable, parsing it to type `T`, or returns the default.
///
/// Logs a warning if the variable is set but cannot be parsed.
fn env_or<T: FromStr>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(v) => v.parse().unwrap_or_else(|_| {
            tracing::warn!(name, value = %v, "invalid env var value, using default");
            default
        }),
        Err(_) => default,
    }
}
