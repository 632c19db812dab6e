use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{CoreError, TransportError};
use crate::protocol::{classify_line, InboundMessage, Malformed, OutboundRequest};

use super::{ActivityClock, AtomicConnectionState, ConnectionState, FrameTransport};

/// Scripted in-memory transport for session tests.
///
/// Inbound frames are pushed as raw lines with [`MockTransport::push_line`];
/// every written frame is captured and returned by [`MockTransport::sent`].
pub struct MockTransport {
    state: AtomicConnectionState,
    activity: ActivityClock,
    sent: Mutex<Vec<String>>,
    inbound_tx: Mutex<Option<mpsc::UnboundedSender<InboundMessage>>>,
    inbound_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<InboundMessage>>,
    fail_writes: Mutex<bool>,
}

impl MockTransport {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            state: AtomicConnectionState::new(ConnectionState::Unconnected),
            activity: ActivityClock::new(),
            sent: Mutex::new(Vec::new()),
            inbound_tx: Mutex::new(Some(tx)),
            inbound_rx: tokio::sync::Mutex::new(rx),
            fail_writes: Mutex::new(false),
        }
    }

    /// Queue one server line for a later `receive_one`.
    pub fn push_line(&self, line: &str) {
        if let Some(tx) = self.inbound_tx.lock().unwrap_or_else(PoisonError::into_inner).as_ref() {
            let _ = tx.send(classify_line(line.as_bytes()));
        }
    }

    /// Simulate the server closing its end once queued lines are consumed.
    pub fn hang_up(&self) {
        self.inbound_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    pub fn fail_writes(&self) {
        *self.fail_writes.lock().unwrap_or_else(PoisonError::into_inner) = true;
    }

    /// Frames written so far, terminators included.
    pub fn sent(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FrameTransport for MockTransport {
    async fn open(&self) -> Result<(), CoreError> {
        if self.state.load() == ConnectionState::Closed {
            return Err(TransportError::Closed.into());
        }
        self.state.store(ConnectionState::Open);
        Ok(())
    }

    async fn send_all(&self, requests: &[OutboundRequest]) -> Result<(), CoreError> {
        self.open().await?;
        if *self.fail_writes.lock().unwrap_or_else(PoisonError::into_inner) {
            return Err(TransportError::Io(std::io::ErrorKind::BrokenPipe.into()).into());
        }
        let mut sent = self.sent.lock().unwrap_or_else(PoisonError::into_inner);
        for request in requests {
            sent.push(String::from_utf8_lossy(&request.to_frame()).into_owned());
        }
        self.activity.touch();
        Ok(())
    }

    async fn receive_one(&self) -> Result<InboundMessage, CoreError> {
        self.open().await?;
        let next = self.inbound_rx.lock().await.recv().await;
        match next {
            Some(message) => {
                self.activity.touch();
                Ok(message)
            }
            None => {
                self.state.store(ConnectionState::Closed);
                Ok(InboundMessage::Malformed(Malformed::StreamClosed))
            }
        }
    }

    async fn close(&self) {
        self.state.store(ConnectionState::Closed);
        self.hang_up();
    }

    fn state(&self) -> ConnectionState {
        self.state.load()
    }

    fn idle_time(&self) -> Duration {
        self.activity.idle_time()
    }
}
