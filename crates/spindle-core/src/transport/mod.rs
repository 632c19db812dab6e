//! Framed transport to a single server.
//!
//! [`FrameTransport`] is the seam the session is written against;
//! [`FramedConnection`] is the socket-backed implementation (plain TCP or
//! pinned TLS) and `mock::MockTransport` a scripted one for tests.

pub(crate) mod codec;
mod framed;
#[cfg(test)]
pub mod mock;

pub use framed::FramedConnection;

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::CoreError;
use crate::protocol::{InboundMessage, OutboundRequest};

/// One bidirectional, newline-framed JSON channel.
///
/// One writer (`send_all`) and one reader (`receive_one`) may run
/// concurrently. Both lazily open the connection on first use.
#[async_trait]
pub trait FrameTransport: Send + Sync {
    /// Establish the connection if it is not open yet. Idempotent.
    async fn open(&self) -> Result<(), CoreError>;

    /// Write every request as one frame and wait for the writes to drain.
    async fn send_all(&self, requests: &[OutboundRequest]) -> Result<(), CoreError>;

    /// Wait for the next complete inbound frame.
    async fn receive_one(&self) -> Result<InboundMessage, CoreError>;

    /// Close the connection. Safe to call repeatedly or before `open`.
    async fn close(&self);

    fn state(&self) -> ConnectionState;

    /// Time since a byte was last read or written.
    fn idle_time(&self) -> Duration;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Unconnected = 0,
    Connecting = 1,
    Open = 2,
    Closed = 3,
}

impl ConnectionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Unconnected,
            1 => Self::Connecting,
            2 => Self::Open,
            _ => Self::Closed,
        }
    }
}

/// Lock-free holder for a [`ConnectionState`].
#[derive(Debug)]
pub(crate) struct AtomicConnectionState(AtomicU8);

impl AtomicConnectionState {
    pub(crate) fn new(state: ConnectionState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub(crate) fn load(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn store(&self, state: ConnectionState) {
        self.0.store(state as u8, Ordering::Release);
    }

    pub(crate) fn swap(&self, state: ConnectionState) -> ConnectionState {
        ConnectionState::from_u8(self.0.swap(state as u8, Ordering::AcqRel))
    }

    /// Move `from` -> `to`; returns false if another transition won.
    pub(crate) fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Shared "last byte exchanged" instant.
#[derive(Debug, Clone)]
pub(crate) struct ActivityClock(Arc<Mutex<Instant>>);

impl ActivityClock {
    pub(crate) fn new() -> Self {
        Self(Arc::new(Mutex::new(Instant::now())))
    }

    pub(crate) fn touch(&self) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    pub(crate) fn idle_time(&self) -> Duration {
        let last = *self.0.lock().unwrap_or_else(PoisonError::into_inner);
        Instant::now().saturating_duration_since(last)
    }
}
