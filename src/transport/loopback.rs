//! In-process loopback transport.
//!
//! A [`LoopbackBus`] is a tokio broadcast channel; every endpoint created
//! from it sees every frame sent after it was created, including its own.
//! Used to wire a host and followers together inside one process.

use tokio::sync::{Mutex, broadcast};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::{DEFAULT_LOOPBACK_CAPACITY, PhaseTransport, Result, TransportType};
use crate::error::TransportError;

/// Shared in-process frame bus.
#[derive(Debug, Clone)]
pub struct LoopbackBus {
    tx: broadcast::Sender<String>,
}

impl LoopbackBus {
    /// Creates a bus with the default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_LOOPBACK_CAPACITY)
    }

    /// Creates a bus that buffers up to `capacity` frames per slow endpoint.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Attaches a new participant.
    #[must_use]
    pub fn endpoint(&self) -> LoopbackEndpoint {
        LoopbackEndpoint {
            tx: self.tx.clone(),
            rx: Mutex::new(self.tx.subscribe()),
            closed: CancellationToken::new(),
        }
    }
}

impl Default for LoopbackBus {
    fn default() -> Self {
        Self::new()
    }
}

/// One participant's view of a [`LoopbackBus`].
#[derive(Debug)]
pub struct LoopbackEndpoint {
    tx: broadcast::Sender<String>,
    rx: Mutex<broadcast::Receiver<String>>,
    closed: CancellationToken,
}

#[async_trait::async_trait]
impl PhaseTransport for LoopbackEndpoint {
    async fn send_frame(&self, frame: &str) -> Result<()> {
        if self.closed.is_cancelled() {
            return Err(TransportError::Closed("loopback endpoint closed".into()));
        }
        self.tx
            .send(frame.to_owned())
            .map(|_| ())
            .map_err(|_| TransportError::Closed("no participants on loopback bus".into()))
    }

    /// Frames already queued for this endpoint are drained before a closed
    /// endpoint reports `None`.
    #[allow(clippy::significant_drop_tightening)] // receiver is held across the wait
    async fn recv_frame(&self) -> Result<Option<String>> {
        let mut rx = self.rx.lock().await;
        loop {
            tokio::select! {
                biased;
                received = rx.recv() => match received {
                    Ok(frame) => return Ok(Some(frame)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "loopback endpoint lagged; frames dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => return Ok(None),
                },
                () = self.closed.cancelled() => return Ok(None),
            }
        }
    }

    async fn close(&self) -> Result<()> {
        self.closed.cancel();
        Ok(())
    }

    fn transport_type(&self) -> TransportType {
        TransportType::Loopback
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frames_reach_every_endpoint_including_sender() {
        let bus = LoopbackBus::new();
        let host = bus.endpoint();
        let follower = bus.endpoint();

        host.send_frame("hello").await.unwrap();

        assert_eq!(follower.recv_frame().await.unwrap().as_deref(), Some("hello"));
        assert_eq!(host.recv_frame().await.unwrap().as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn frames_keep_send_order() {
        let bus = LoopbackBus::new();
        let a = bus.endpoint();
        let b = bus.endpoint();
        for i in 0..5 {
            a.send_frame(&format!("f{i}")).await.unwrap();
        }
        for i in 0..5 {
            assert_eq!(b.recv_frame().await.unwrap(), Some(format!("f{i}")));
        }
    }

    #[tokio::test]
    async fn close_ends_pending_receive() {
        let bus = LoopbackBus::new();
        let endpoint = std::sync::Arc::new(bus.endpoint());

        let reader = std::sync::Arc::clone(&endpoint);
        let pending = tokio::spawn(async move { reader.recv_frame().await });
        tokio::task::yield_now().await;

        endpoint.close().await.unwrap();
        assert_eq!(pending.await.unwrap().unwrap(), None);
        assert!(endpoint.send_frame("late").await.is_err());
    }

    #[tokio::test]
    async fn lagging_endpoint_skips_dropped_frames() {
        let bus = LoopbackBus::with_capacity(2);
        let sender = bus.endpoint();
        let slow = bus.endpoint();
        for i in 0..4 {
            sender.send_frame(&format!("f{i}")).await.unwrap();
        }
        assert_eq!(slow.recv_frame().await.unwrap(), Some("f2".to_owned()));
        assert_eq!(slow.recv_frame().await.unwrap(), Some("f3".to_owned()));
    }
}
