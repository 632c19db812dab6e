use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::ConnectionOptions;
use crate::endpoint::{Endpoint, TransportKind};
use crate::error::{ConfigError, CoreError, ProtocolError, TransportError};
use crate::protocol::{classify_line, InboundMessage, Malformed, OutboundRequest};
use crate::trust::{self, TrustStore};

use super::codec::{Frame, FrameReader};
use super::{ActivityClock, AtomicConnectionState, ConnectionState, FrameTransport};

trait Io: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> Io for T {}

type BoxedIo = Box<dyn Io>;

/// How long `close` waits for the write half to shut down. A peer that
/// stopped reading can hold a TLS close_notify forever.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Socket-backed [`FrameTransport`] for one server endpoint.
///
/// The socket is dialed on first use. The dial happens under `setup`, after
/// re-checking `state`, so concurrent first callers share one connection.
pub struct FramedConnection {
    endpoint: Endpoint,
    server: String,
    trust: Option<Arc<TrustStore>>,
    options: ConnectionOptions,
    state: AtomicConnectionState,
    setup: Mutex<()>,
    reader: Mutex<Option<FrameReader<ReadHalf<BoxedIo>>>>,
    writer: Mutex<Option<WriteHalf<BoxedIo>>>,
    activity: ActivityClock,
    cancel: CancellationToken,
}

impl FramedConnection {
    /// `trust` is required for TLS endpoints and ignored for plaintext ones.
    pub fn new(
        endpoint: Endpoint,
        trust: Option<Arc<TrustStore>>,
        options: ConnectionOptions,
    ) -> Self {
        Self {
            server: endpoint.to_string(),
            endpoint,
            trust,
            options,
            state: AtomicConnectionState::new(ConnectionState::Unconnected),
            setup: Mutex::new(()),
            reader: Mutex::new(None),
            writer: Mutex::new(None),
            activity: ActivityClock::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    async fn dial(&self) -> Result<BoxedIo, CoreError> {
        // Resolve the pin first: first use needs its own throwaway handshake.
        let connector = match self.endpoint.transport {
            TransportKind::Plaintext => None,
            TransportKind::Tls => {
                let store = self.trust.as_ref().ok_or(ConfigError::MissingTrustStore)?;
                let pin = store
                    .get_or_pin(&self.endpoint.host, self.endpoint.port)
                    .await?;
                Some(trust::pinned_connector(&pin)?)
            }
        };

        let tcp = TcpStream::connect(self.endpoint.socket_addr())
            .await
            .map_err(|source| TransportError::Dial {
                server: self.server.clone(),
                source,
            })?;
        tcp.set_nodelay(true).map_err(TransportError::Io)?;

        let Some(connector) = connector else {
            return Ok(Box::new(tcp));
        };
        let stream = connector
            .connect(trust::server_name(&self.endpoint.host), tcp)
            .await
            .map_err(|err| trust::map_handshake_error(&self.endpoint.host, &self.server, err))?;
        debug!(server = %self.server, "TLS session established against pinned certificate");
        Ok(Box::new(stream))
    }

    fn ensure_not_closed(&self) -> Result<(), TransportError> {
        if self.state.load() == ConnectionState::Closed {
            return Err(TransportError::Closed);
        }
        Ok(())
    }

    fn mark_closed_remotely(&self) {
        if self.state.swap(ConnectionState::Closed) != ConnectionState::Closed {
            info!(server = %self.server, "connection closed by peer");
        }
        self.cancel.cancel();
    }
}

#[async_trait]
impl FrameTransport for FramedConnection {
    async fn open(&self) -> Result<(), CoreError> {
        if self.state.load() == ConnectionState::Open {
            return Ok(());
        }
        self.ensure_not_closed()?;

        let _setup = self.setup.lock().await;
        match self.state.load() {
            ConnectionState::Open => return Ok(()),
            ConnectionState::Closed => return Err(TransportError::Closed.into()),
            ConnectionState::Unconnected | ConnectionState::Connecting => {}
        }
        self.state.store(ConnectionState::Connecting);
        debug!(server = %self.server, "connecting");

        let dialed = tokio::select! {
            _ = self.cancel.cancelled() => Err(TransportError::Closed.into()),
            dialed = self.dial() => dialed,
        };
        let io = match dialed {
            Ok(io) => io,
            Err(err) => {
                self.state
                    .transition(ConnectionState::Connecting, ConnectionState::Unconnected);
                return Err(err);
            }
        };

        let (read_half, write_half) = tokio::io::split(io);
        *self.reader.lock().await = Some(FrameReader::new(
            read_half,
            self.options.max_frame_bytes,
            self.activity.clone(),
        ));
        *self.writer.lock().await = Some(write_half);
        self.activity.touch();

        if !self
            .state
            .transition(ConnectionState::Connecting, ConnectionState::Open)
        {
            // Closed while dialing.
            self.reader.lock().await.take();
            self.writer.lock().await.take();
            return Err(TransportError::Closed.into());
        }
        info!(server = %self.server, "connection open");
        Ok(())
    }

    async fn send_all(&self, requests: &[OutboundRequest]) -> Result<(), CoreError> {
        if requests.is_empty() {
            return Ok(());
        }
        self.open().await?;

        let mut buf = Vec::new();
        for request in requests {
            buf.extend_from_slice(&request.to_frame());
        }

        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(TransportError::Closed)?;
        let write = async {
            writer.write_all(&buf).await?;
            writer.flush().await
        };
        tokio::select! {
            _ = self.cancel.cancelled() => Err(TransportError::Closed.into()),
            written = write => {
                written.map_err(TransportError::Io)?;
                self.activity.touch();
                Ok(())
            }
        }
    }

    async fn receive_one(&self) -> Result<InboundMessage, CoreError> {
        self.open().await?;

        let mut guard = self.reader.lock().await;
        let reader = guard.as_mut().ok_or(TransportError::Closed)?;
        let read_timeout = self.options.read_timeout;
        let read = async {
            match read_timeout {
                Some(limit) => tokio::time::timeout(limit, reader.next_frame())
                    .await
                    .map_err(|_| TransportError::ReadTimeout(limit))?
                    .map_err(TransportError::Io),
                None => reader.next_frame().await.map_err(TransportError::Io),
            }
        };
        let frame = tokio::select! {
            _ = self.cancel.cancelled() => return Err(TransportError::Closed.into()),
            frame = read => frame?,
        };
        drop(guard);

        Ok(match frame {
            Frame::Line(line) => classify_line(&line),
            Frame::TooLarge { max_bytes } => {
                InboundMessage::Malformed(Malformed::Protocol(ProtocolError::FrameTooLarge {
                    max_bytes,
                }))
            }
            Frame::Eof => {
                self.mark_closed_remotely();
                InboundMessage::Malformed(Malformed::StreamClosed)
            }
        })
    }

    async fn close(&self) {
        let previous = self.state.swap(ConnectionState::Closed);
        self.cancel.cancel();

        if let Some(mut writer) = self.writer.lock().await.take() {
            if tokio::time::timeout(SHUTDOWN_GRACE, writer.shutdown())
                .await
                .is_err()
            {
                debug!(server = %self.server, "write half did not shut down in time");
            }
        }
        self.reader.lock().await.take();

        if previous != ConnectionState::Closed {
            info!(server = %self.server, "connection closed");
        }
    }

    fn state(&self) -> ConnectionState {
        self.state.load()
    }

    fn idle_time(&self) -> Duration {
        self.activity.idle_time()
    }
}
