//! Trust-on-first-use against a loopback TLS server.

mod common;

use std::time::Duration;

use serde_json::json;
use spindle_core::error::TrustError;
use spindle_core::trust::{FirstUsePolicy, TrustStore};
use spindle_core::{CoreError, Endpoint, Inbound, Session, SessionConfig};

use common::{first_cert, init_tracing, FakeServer, OTHER_PEM, SERVER_PEM};

const HOST: &str = "127.0.0.1";

#[tokio::test]
async fn first_contact_pins_and_later_contacts_reuse_the_pin() {
    init_tracing();
    let server = FakeServer::tls().await;
    let dir = tempfile::tempdir().expect("tempdir");
    let store = TrustStore::new(dir.path(), FirstUsePolicy::TrustSilently);

    let pin = store.get_or_pin(HOST, server.port).await.expect("first use");
    assert_eq!(pin.der(), &first_cert(SERVER_PEM));
    assert_eq!(pin.path(), dir.path().join("certs").join(HOST));
    assert_eq!(server.accepted(), 1);

    let on_disk = std::fs::read(pin.path()).expect("pin file written");
    assert_eq!(on_disk, pin.pem_bytes());
    let staged = std::fs::read_dir(dir.path().join("certs"))
        .expect("certs dir")
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_string_lossy().ends_with(".temp"))
        .count();
    assert_eq!(staged, 0, "no staging file may outlive the pin");

    let again = store.get_or_pin(HOST, server.port).await.expect("second use");
    assert_eq!(server.accepted(), 1, "existing pin must not trigger a handshake");
    assert_eq!(again.pem_bytes(), on_disk.as_slice());
    assert_eq!(std::fs::read(pin.path()).expect("pin file"), on_disk);
}

#[tokio::test]
async fn session_runs_over_pinned_tls() {
    init_tracing();
    let server = FakeServer::tls().await;
    let dir = tempfile::tempdir().expect("tempdir");
    let endpoint: Endpoint = server.endpoint('s').parse().expect("endpoint");
    let session = Session::from_config(SessionConfig::new(endpoint, dir.path()));

    session
        .queue_request("server.version", vec![json!("spindle"), json!("1.4")], 1)
        .expect("fresh id");
    session.flush_ready().await.expect("flush over TLS");

    let inbound = tokio::time::timeout(Duration::from_secs(5), session.pump_inbound())
        .await
        .expect("answer in time")
        .expect("transport healthy");
    let Inbound::Response(response) = inbound else {
        panic!("expected a response, got {inbound:?}");
    };
    assert_eq!(
        response.into_result().expect("no rpc error"),
        json!(["ElectrumX", "1.1"])
    );

    // One throwaway handshake to pin, one real connection.
    assert_eq!(server.accepted(), 2);
    assert!(dir.path().join("certs").join(HOST).is_file());
}

#[tokio::test]
async fn rotated_certificate_is_rejected() {
    init_tracing();
    let server = FakeServer::tls().await;
    let dir = tempfile::tempdir().expect("tempdir");
    let store = TrustStore::new(dir.path(), FirstUsePolicy::TrustSilently);
    store.pin_pem(HOST, OTHER_PEM).await.expect("pin a different cert");
    let pinned_before = std::fs::read(dir.path().join("certs").join(HOST)).expect("pin");

    let endpoint: Endpoint = server.endpoint('s').parse().expect("endpoint");
    let session = Session::from_config(SessionConfig::new(endpoint, dir.path()));
    session.queue_request("server.ping", Vec::new(), 1).expect("fresh id");

    let err = session.flush_ready().await.expect_err("pin mismatch");
    assert!(
        matches!(err, CoreError::Trust(TrustError::PinMismatch { ref host }) if host == HOST),
        "unexpected error: {err}"
    );
    assert_eq!(session.unanswered_count(), 0);

    // The pin is never replaced behind the user's back.
    let pinned_after = std::fs::read(dir.path().join("certs").join(HOST)).expect("pin");
    assert_eq!(pinned_before, pinned_after);
}

#[tokio::test]
async fn refuse_policy_never_contacts_unknown_hosts() {
    init_tracing();
    let server = FakeServer::tls().await;
    let dir = tempfile::tempdir().expect("tempdir");
    let store = TrustStore::new(dir.path(), FirstUsePolicy::Refuse);

    let err = store
        .get_or_pin(HOST, server.port)
        .await
        .expect_err("no pin and pinning refused");
    assert!(matches!(err, CoreError::Trust(TrustError::NotPinned { .. })));
    assert_eq!(server.accepted(), 0);
    assert!(store.list_pins().await.expect("list").is_empty());
}
