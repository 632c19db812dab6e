//! Request/response driver on top of a [`Session`].
//!
//! A reader task pumps inbound frames and hands each response to the caller
//! waiting on its wire ID. A ticker task flushes queued requests, keeps the
//! connection alive with `server.ping` and tears everything down once the
//! session times out or the server hangs up.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use eyre::eyre;
use serde_json::Value;
use spindle_core::{Inbound, Response, Session};
use tokio::sync::{broadcast, oneshot, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// How often the ticker checks timers when no request is waiting to go out.
pub const TICK: Duration = Duration::from_secs(1);

type Pending = Mutex<HashMap<u64, oneshot::Sender<Response>>>;

struct Shared {
    session: Arc<Session>,
    pending: Pending,
    flush_now: Notify,
    /// Why the driver stopped, once it has.
    ended: Mutex<Option<String>>,
    notifications: broadcast::Sender<Value>,
}

impl Shared {
    /// Record why the driver stops and fail every waiting call.
    fn end(&self, reason: String) {
        let mut ended = self.ended.lock().unwrap_or_else(PoisonError::into_inner);
        if ended.is_none() {
            warn!(server = self.session.server(), reason = %reason, "session ended");
            *ended = Some(reason);
        }
        drop(ended);
        // Dropping the senders wakes every caller with a closed channel.
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn end_reason(&self) -> Option<String> {
        self.ended
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

pub struct Client {
    shared: Arc<Shared>,
    reader: JoinHandle<()>,
    ticker: JoinHandle<()>,
}

impl Client {
    /// Start driving `session`. Must be called inside a tokio runtime.
    pub fn start(session: Session, tick: Duration) -> Self {
        let (notifications, _) = broadcast::channel(64);
        let shared = Arc::new(Shared {
            session: Arc::new(session),
            pending: Mutex::new(HashMap::new()),
            flush_now: Notify::new(),
            ended: Mutex::new(None),
            notifications,
        });
        let reader = tokio::spawn(read_loop(Arc::clone(&shared)));
        let ticker = tokio::spawn(tick_loop(Arc::clone(&shared), tick));
        Self {
            shared,
            reader,
            ticker,
        }
    }

    /// Subscription updates pushed by the server.
    pub fn notifications(&self) -> broadcast::Receiver<Value> {
        self.shared.notifications.subscribe()
    }

    /// Send one request and wait for its result.
    pub async fn call(&self, method: &str, params: Vec<Value>) -> eyre::Result<Value> {
        if let Some(reason) = self.shared.end_reason() {
            return Err(eyre!("session with {} ended: {reason}", self.server()));
        }

        let session = &self.shared.session;
        let wire_id = session.next_wire_id();
        let (tx, rx) = oneshot::channel();
        self.shared
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(wire_id, tx);
        // The driver may have stopped between the check above and the insert.
        if let Some(reason) = self.shared.end_reason() {
            self.shared
                .pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&wire_id);
            return Err(eyre!("session with {} ended: {reason}", self.server()));
        }
        if let Err(err) = session.queue_request(method, params, wire_id) {
            self.shared
                .pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&wire_id);
            return Err(err.into());
        }
        self.shared.flush_now.notify_one();

        match rx.await {
            Ok(response) => Ok(response.into_result()?),
            Err(_) => {
                let reason = self
                    .shared
                    .end_reason()
                    .unwrap_or_else(|| "driver stopped".to_owned());
                Err(eyre!("{method} to {} failed: {reason}", self.server()))
            }
        }
    }

    pub fn server(&self) -> &str {
        self.shared.session.server()
    }

    /// Stop both tasks and close the connection.
    pub async fn shutdown(self) {
        self.reader.abort();
        self.ticker.abort();
        self.shared.end("client shut down".to_owned());
        self.shared.session.close().await;
    }
}

async fn read_loop(shared: Arc<Shared>) {
    loop {
        let inbound = match shared.session.pump_inbound().await {
            Ok(inbound) => inbound,
            Err(err) => {
                shared.end(format!("read failed: {err}"));
                return;
            }
        };
        match inbound {
            Inbound::Response(response) => {
                let wire_id = response.request.wire_id;
                let waiter = shared
                    .pending
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&wire_id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(response);
                    }
                    // Keep-alive pings have nobody waiting.
                    None => trace!(rpc.id = wire_id, rpc.method = %response.request.method, "unclaimed response"),
                }
            }
            Inbound::Notification(frame) => {
                let _ = shared.notifications.send(frame);
            }
            Inbound::Discarded(err) => debug!(error = %err, "ignored inbound frame"),
            Inbound::ClosedRemotely => {
                shared.end("server closed the connection".to_owned());
                return;
            }
        }
    }
}

async fn tick_loop(shared: Arc<Shared>, tick: Duration) {
    let session = &shared.session;
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shared.flush_now.notified() => {}
        }

        if shared.end_reason().is_some() || session.closed_remotely() {
            return;
        }
        if session.has_timed_out() {
            shared.end("server stopped responding".to_owned());
            session.close().await;
            return;
        }
        if session.ping_required() {
            let wire_id = session.next_wire_id();
            debug!(server = session.server(), rpc.id = wire_id, "sending keep-alive");
            if let Err(err) = session.queue_request("server.ping", Vec::new(), wire_id) {
                warn!(server = session.server(), error = %err, "keep-alive not queued");
            }
        }
        match session.flush_ready().await {
            Ok(0) => {}
            Ok(written) => trace!(server = session.server(), written, "flushed"),
            Err(err) => {
                shared.end(format!("send failed: {err}"));
                session.close().await;
                return;
            }
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.reader.abort();
        self.ticker.abort();
        debug!(server = self.server(), "client dropped");
    }
}
