//! Loopback Electrum-style server used by the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

pub const SERVER_PEM: &[u8] = include_bytes!("../fixtures/server.pem");
pub const SERVER_KEY: &[u8] = include_bytes!("../fixtures/server.key");
pub const OTHER_PEM: &[u8] = include_bytes!("../fixtures/other.pem");

static TRACING_INIT: Once = Once::new();

pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("spindle_core=debug")),
            )
            .with_test_writer()
            .try_init();
    });
}

pub fn first_cert(pem: &[u8]) -> CertificateDer<'static> {
    let mut reader = pem;
    let first = rustls_pemfile::certs(&mut reader).next();
    first
        .expect("fixture must contain a certificate")
        .expect("fixture certificate must parse")
}

fn private_key(pem: &[u8]) -> PrivateKeyDer<'static> {
    let mut reader = pem;
    rustls_pemfile::private_key(&mut reader)
        .expect("fixture key must parse")
        .expect("fixture must contain a key")
}

pub struct FakeServer {
    pub port: u16,
    /// TCP connections accepted so far.
    pub accepted: Arc<AtomicUsize>,
}

impl FakeServer {
    pub async fn plain() -> Self {
        Self::start(None).await
    }

    pub async fn tls() -> Self {
        let config = ServerConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .expect("default protocol versions")
        .with_no_client_auth()
        .with_single_cert(vec![first_cert(SERVER_PEM)], private_key(SERVER_KEY))
        .expect("fixture cert/key must be usable");
        Self::start(Some(TlsAcceptor::from(Arc::new(config)))).await
    }

    async fn start(tls: Option<TlsAcceptor>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("local addr").port();
        let accepted = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&accepted);
        tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    return;
                };
                counter.fetch_add(1, Ordering::SeqCst);
                let tls = tls.clone();
                tokio::spawn(async move {
                    match tls {
                        None => serve(socket).await,
                        Some(acceptor) => {
                            if let Ok(stream) = acceptor.accept(socket).await {
                                serve(stream).await;
                            }
                        }
                    }
                });
            }
        });

        Self { port, accepted }
    }

    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    pub fn endpoint(&self, mode: char) -> String {
        format!("127.0.0.1:{}:{mode}", self.port)
    }
}

/// Answer each request line. `server.version` gets a fixed banner,
/// `blockchain.headers.subscribe` also triggers a notification,
/// `test.hang_up` closes the connection, and anything else echoes its params.
async fn serve<S: AsyncRead + AsyncWrite + Unpin>(stream: S) {
    let (read, mut write) = tokio::io::split(stream);
    let mut lines = BufReader::new(read).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let Ok(request) = serde_json::from_str::<Value>(&line) else {
            continue;
        };
        let id = request["id"].clone();
        let mut replies = Vec::new();
        match request["method"].as_str().unwrap_or_default() {
            "server.version" => replies.push(json!({"jsonrpc": "2.0", "id": id, "result": ["ElectrumX", "1.1"]})),
            "blockchain.headers.subscribe" => {
                replies.push(json!({"jsonrpc": "2.0", "id": id, "result": {"height": 100}}));
                replies.push(json!({
                    "jsonrpc": "2.0",
                    "method": "blockchain.headers.subscribe",
                    "params": [{"height": 101}],
                }));
            }
            "test.hang_up" => return,
            _ => replies.push(json!({"jsonrpc": "2.0", "id": id, "result": request["params"]})),
        }
        for reply in replies {
            let mut frame = reply.to_string().into_bytes();
            frame.push(b'\n');
            if write.write_all(&frame).await.is_err() {
                return;
            }
        }
    }
}
