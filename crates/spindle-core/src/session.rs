//! A multiplexed JSON-RPC session with one server.
//!
//! The session owns the outbound [`RequestQueue`], the [`CorrelationTable`]
//! of unanswered requests and one [`FrameTransport`]. It never reconnects or
//! re-sends on its own; the owning layer polls [`Session::has_timed_out`],
//! closes the session and builds a new one when it decides to.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;
use tracing::{info, trace, warn};

use crate::config::SessionConfig;
use crate::correlation::CorrelationTable;
use crate::error::{CoreError, ProtocolError, RpcError, SessionError};
use crate::protocol::{response_result, InboundMessage, Malformed, OutboundRequest};
use crate::queue::RequestQueue;
use crate::transport::{ConnectionState, FrameTransport, FramedConnection};
use crate::trust::TrustStore;

/// Unanswered requests allowed on the wire at once.
pub const MAX_UNANSWERED: usize = 100;
pub const PING_INTERVAL: Duration = Duration::from_secs(60);
/// Age of the oldest unanswered request before the session may time out.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Silence on the socket before the session may time out.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Nothing unanswered.
    Idle,
    /// At least one request waiting for its response.
    Awaiting,
    /// Stale; the owning layer should tear the session down.
    TimedOut,
}

/// A response paired with the request that asked for it.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub request: OutboundRequest,
    /// The response frame without `id`/`jsonrpc`.
    pub payload: Value,
}

impl Response {
    pub fn into_result(self) -> Result<Value, RpcError> {
        response_result(self.payload)
    }
}

/// Outcome of one [`Session::pump_inbound`] call.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Response(Response),
    /// Unsolicited frame without an `id`, e.g. a subscription update.
    Notification(Value),
    /// The frame was unusable and has been dropped.
    Discarded(ProtocolError),
    /// The server closed the connection.
    ClosedRemotely,
}

pub struct Session {
    server: String,
    transport: Arc<dyn FrameTransport>,
    unsent: RequestQueue,
    unanswered: CorrelationTable,
    next_wire_id: AtomicU64,
    flush: tokio::sync::Mutex<()>,
    last_ping: Mutex<Option<Instant>>,
    closed_remotely: AtomicBool,
    verbose: AtomicBool,
}

impl Session {
    /// Build a session over any transport. `server` names the peer in logs.
    pub fn new(server: impl Into<String>, transport: Arc<dyn FrameTransport>) -> Self {
        Self {
            server: server.into(),
            transport,
            unsent: RequestQueue::new(),
            unanswered: CorrelationTable::new(),
            next_wire_id: AtomicU64::new(0),
            flush: tokio::sync::Mutex::new(()),
            last_ping: Mutex::new(None),
            closed_remotely: AtomicBool::new(false),
            verbose: AtomicBool::new(false),
        }
    }

    /// Build a session over a [`FramedConnection`] described by `config`.
    /// No I/O happens until the first request is flushed or read.
    pub fn from_config(config: SessionConfig) -> Self {
        let trust = Arc::new(TrustStore::new(&config.config_dir, config.first_use));
        let server = config.endpoint.to_string();
        let connection =
            FramedConnection::new(config.endpoint, Some(trust), config.connection);
        let session = Self::new(server, Arc::new(connection));
        session.set_verbose(config.verbose);
        session
    }

    /// Diagnostic name of the peer, `host:port:mode`.
    pub fn server(&self) -> &str {
        &self.server
    }

    /// Connect now instead of on first use.
    pub async fn open(&self) -> Result<(), CoreError> {
        self.transport.open().await
    }

    pub async fn close(&self) {
        self.transport.close().await;
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.transport.state()
    }

    pub fn closed_remotely(&self) -> bool {
        self.closed_remotely.load(Ordering::Acquire)
    }

    /// Toggle frame dumps at `info` level.
    pub fn set_verbose(&self, verbose: bool) {
        self.verbose.store(verbose, Ordering::Relaxed);
    }

    /// A wire ID not used before by this session.
    pub fn next_wire_id(&self) -> u64 {
        self.next_wire_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Queue a request to be written by a later [`Session::flush_ready`].
    ///
    /// Refused if `wire_id` is already queued or waiting for its response.
    pub fn queue_request(
        &self,
        method: impl Into<String>,
        params: Vec<Value>,
        wire_id: u64,
    ) -> Result<(), SessionError> {
        if self.unanswered.contains(wire_id) || self.unsent.contains(wire_id) {
            return Err(SessionError::DuplicateWireId(wire_id));
        }
        self.unsent
            .enqueue(OutboundRequest::new(method, params, wire_id));
        Ok(())
    }

    pub fn queued_count(&self) -> usize {
        self.unsent.pending_count()
    }

    pub fn unanswered_count(&self) -> usize {
        self.unanswered.len()
    }

    /// How many queued requests may be written now without exceeding
    /// [`MAX_UNANSWERED`].
    fn admission_count(&self) -> usize {
        let room = MAX_UNANSWERED.saturating_sub(self.unanswered.len());
        room.min(self.unsent.pending_count())
    }

    /// Write as many queued requests as admission allows and return how
    /// many were written.
    ///
    /// Requests are recorded before the write so a fast response cannot
    /// beat its own entry. If the write fails they are retired again and
    /// the error is returned; nothing is re-queued.
    pub async fn flush_ready(&self) -> Result<usize, CoreError> {
        let _writer = self.flush.lock().await;

        let admitted = self.admission_count();
        if admitted == 0 {
            return Ok(0);
        }

        let mut batch = Vec::with_capacity(admitted);
        for _ in 0..admitted {
            let request = self.unsent.dequeue_one().await;
            // Only reachable when two callers race on the same ID; the
            // loser is dropped and the rest of the batch still goes out.
            if let Err(err) = self.unanswered.record(request.wire_id, request.clone()) {
                warn!(
                    server = %self.server,
                    rpc.id = request.wire_id,
                    rpc.method = %request.method,
                    error = %err,
                    "dropping request with duplicate wire id"
                );
                continue;
            }
            batch.push(request);
        }
        if batch.is_empty() {
            return Ok(0);
        }

        if let Err(err) = self.transport.send_all(&batch).await {
            for request in &batch {
                self.unanswered.retire(request.wire_id);
            }
            warn!(server = %self.server, error = %err, dropped = batch.len(), "send failed");
            return Err(err);
        }

        let verbose = self.verbose.load(Ordering::Relaxed);
        for request in &batch {
            if verbose {
                info!(server = %self.server, rpc.id = request.wire_id, rpc.method = %request.method, params = ?request.params, "-->");
            } else {
                trace!(server = %self.server, rpc.id = request.wire_id, rpc.method = %request.method, "-->");
            }
        }
        Ok(batch.len())
    }

    /// Read and classify the next inbound frame.
    ///
    /// Transport failures are returned as errors. Protocol problems are
    /// logged and returned as [`Inbound::Discarded`]; the session stays
    /// usable.
    pub async fn pump_inbound(&self) -> Result<Inbound, CoreError> {
        let message = self.transport.receive_one().await?;
        let verbose = self.verbose.load(Ordering::Relaxed);

        let inbound = match message {
            InboundMessage::Malformed(Malformed::StreamClosed) => {
                self.closed_remotely.store(true, Ordering::Release);
                info!(server = %self.server, "connection closed remotely");
                Inbound::ClosedRemotely
            }
            InboundMessage::Malformed(Malformed::Protocol(err)) => {
                warn!(server = %self.server, error = %err, "discarding malformed frame");
                Inbound::Discarded(err)
            }
            InboundMessage::Notification { payload } => {
                if verbose {
                    info!(server = %self.server, %payload, "<-- notification");
                } else {
                    trace!(server = %self.server, "<-- notification");
                }
                Inbound::Notification(payload)
            }
            InboundMessage::Response { wire_id, payload } => {
                match self.unanswered.retire(wire_id) {
                    Some(request) => {
                        if verbose {
                            info!(server = %self.server, rpc.id = wire_id, rpc.method = %request.method, %payload, "<--");
                        } else {
                            trace!(server = %self.server, rpc.id = wire_id, "<--");
                        }
                        Inbound::Response(Response { request, payload })
                    }
                    None => {
                        warn!(server = %self.server, rpc.id = wire_id, "unknown wire id");
                        Inbound::Discarded(ProtocolError::UnknownWireId(wire_id))
                    }
                }
            }
        };
        Ok(inbound)
    }

    /// `true` when a keep-alive ping is due: on the first call, then once
    /// more than [`PING_INTERVAL`] has passed since the last `true`.
    pub fn ping_required(&self) -> bool {
        let now = Instant::now();
        let mut last = self.last_ping.lock().unwrap_or_else(PoisonError::into_inner);
        match *last {
            Some(at) if now.duration_since(at) <= PING_INTERVAL => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }

    fn is_stale(&self) -> bool {
        let Some(oldest) = self.unanswered.oldest_sent_at() else {
            return false;
        };
        Instant::now().saturating_duration_since(oldest) > REQUEST_TIMEOUT
            && self.transport.idle_time() > IDLE_TIMEOUT
    }

    /// `true` when the oldest unanswered request is older than
    /// [`REQUEST_TIMEOUT`] and nothing crossed the socket for
    /// [`IDLE_TIMEOUT`]. Either alone is not enough.
    pub fn has_timed_out(&self) -> bool {
        let stale = self.is_stale();
        if stale {
            warn!(
                server = %self.server,
                unanswered = self.unanswered.len(),
                idle_secs = self.transport.idle_time().as_secs(),
                "timeout"
            );
        }
        stale
    }

    pub fn state(&self) -> SessionState {
        if self.unanswered.is_empty() {
            SessionState::Idle
        } else if self.is_stale() {
            SessionState::TimedOut
        } else {
            SessionState::Awaiting
        }
    }
}
