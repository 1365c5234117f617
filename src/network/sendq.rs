//! Outbound queue accounting.
//!
//! Every connection (client or peer link) writes through a [`WireSender`]:
//! an unbounded channel to the writer task plus a shared byte counter. The
//! data model never blocks on a slow socket; instead the counter is checked
//! against the class sendq cap and the owner is told to drop the connection
//! when it overflows.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

/// Result of enqueueing a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Queued,
    /// The sendq cap was exceeded; the connection must be dropped.
    SendqExceeded,
    /// The writer is gone; the connection is already dead.
    Closed,
}

/// Handle for queueing lines toward one connection.
#[derive(Debug, Clone)]
pub struct WireSender {
    tx: mpsc::UnboundedSender<String>,
    queued: Arc<AtomicUsize>,
    max: usize,
}

impl WireSender {
    /// Create a sender and its paired receiver for the writer task.
    pub fn new(max: usize) -> (Self, WireReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let queued = Arc::new(AtomicUsize::new(0));
        (
            Self {
                tx,
                queued: Arc::clone(&queued),
                max,
            },
            WireReceiver { rx, queued },
        )
    }

    /// Queue one terminator-free line.
    pub fn send_line(&self, line: impl Into<String>) -> SendOutcome {
        let line = line.into();
        let len = line.len() + 2;
        if self.queued.fetch_add(len, Ordering::Relaxed) + len > self.max {
            self.queued.fetch_sub(len, Ordering::Relaxed);
            return SendOutcome::SendqExceeded;
        }
        match self.tx.send(line) {
            Ok(()) => SendOutcome::Queued,
            Err(_) => SendOutcome::Closed,
        }
    }

    /// Bytes currently queued toward the socket.
    pub fn queued_bytes(&self) -> usize {
        self.queued.load(Ordering::Relaxed)
    }
}

/// Receiver half, owned by the connection's writer task.
pub struct WireReceiver {
    rx: mpsc::UnboundedReceiver<String>,
    queued: Arc<AtomicUsize>,
}

impl WireReceiver {
    /// Next queued line; `None` once the sender side is dropped and drained.
    pub async fn recv(&mut self) -> Option<String> {
        let line = self.rx.recv().await?;
        self.queued.fetch_sub(line.len() + 2, Ordering::Relaxed);
        Some(line)
    }

    /// Non-blocking receive; used by tests to inspect queued output.
    pub fn try_recv(&mut self) -> Result<String, mpsc::error::TryRecvError> {
        let line = self.rx.try_recv()?;
        self.queued.fetch_sub(line.len() + 2, Ordering::Relaxed);
        Ok(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_and_drain() {
        let (tx, mut rx) = WireSender::new(1024);
        assert_eq!(tx.send_line("PING a"), SendOutcome::Queued);
        assert_eq!(tx.queued_bytes(), 8);
        assert_eq!(rx.recv().await.as_deref(), Some("PING a"));
        assert_eq!(tx.queued_bytes(), 0);
    }

    #[tokio::test]
    async fn test_sendq_cap() {
        let (tx, _rx) = WireSender::new(16);
        assert_eq!(tx.send_line("12345678"), SendOutcome::Queued);
        assert_eq!(tx.send_line("12345678"), SendOutcome::SendqExceeded);
    }

    #[tokio::test]
    async fn test_closed_receiver() {
        let (tx, rx) = WireSender::new(1024);
        drop(rx);
        assert_eq!(tx.send_line("x"), SendOutcome::Closed);
    }
}
