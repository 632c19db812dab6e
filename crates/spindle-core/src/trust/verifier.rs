//! rustls plumbing for pinned and first-use TLS connections.
//!
//! Both verifiers skip hostname and chain validation: the pinned verifier
//! compares the leaf byte-for-byte, the bootstrap verifier accepts anything.
//! Handshake signatures are always checked with the provider's algorithms.

use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{CertificateError, ClientConfig, DigitallySignedStruct, SignatureScheme};
use tokio_rustls::TlsConnector;

use crate::error::{CoreError, TransportError, TrustError};

/// SNI used when the host is not a valid DNS name or IP literal.
const FALLBACK_SERVER_NAME: &str = "spindle.invalid";

#[derive(Debug)]
pub(crate) struct PinVerifier {
    /// `None` accepts any leaf; only used for the first-use handshake.
    pinned: Option<CertificateDer<'static>>,
    provider: Arc<CryptoProvider>,
}

impl PinVerifier {
    pub(crate) fn pinned(leaf: CertificateDer<'static>) -> Self {
        Self {
            pinned: Some(leaf),
            provider: Arc::new(rustls::crypto::ring::default_provider()),
        }
    }

    pub(crate) fn accept_any() -> Self {
        Self {
            pinned: None,
            provider: Arc::new(rustls::crypto::ring::default_provider()),
        }
    }

    pub(crate) fn into_connector(self) -> Result<TlsConnector, TrustError> {
        let config = ClientConfig::builder_with_provider(Arc::clone(&self.provider))
            .with_safe_default_protocol_versions()?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(self))
            .with_no_client_auth();
        Ok(TlsConnector::from(Arc::new(config)))
    }
}

impl ServerCertVerifier for PinVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        match &self.pinned {
            None => Ok(ServerCertVerified::assertion()),
            Some(pin) if pin.as_ref() == end_entity.as_ref() => Ok(ServerCertVerified::assertion()),
            Some(_) => Err(rustls::Error::InvalidCertificate(
                CertificateError::ApplicationVerificationFailure,
            )),
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

pub(crate) fn server_name(host: &str) -> ServerName<'static> {
    ServerName::try_from(host.to_owned()).unwrap_or_else(|_| {
        ServerName::try_from(FALLBACK_SERVER_NAME).expect("fallback server name is a valid DNS name")
    })
}

/// Sort a failed handshake into a trust failure or a plain transport one.
pub(crate) fn map_handshake_error(host: &str, server: &str, err: std::io::Error) -> CoreError {
    let rejected_certificate = err
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<rustls::Error>())
        .is_some_and(|inner| matches!(inner, rustls::Error::InvalidCertificate(_)));
    if rejected_certificate {
        tracing::warn!(server, "peer certificate does not match pin");
        return TrustError::PinMismatch {
            host: host.to_owned(),
        }
        .into();
    }
    TransportError::Tls {
        server: server.to_owned(),
        source: err,
    }
    .into()
}
