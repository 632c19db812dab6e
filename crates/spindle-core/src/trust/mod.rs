//! Trust-on-first-use certificate pinning.
//!
//! The first TLS contact with a host is made without verification; the
//! leaf certificate it presents is written to `<config>/certs/<host>` and
//! every later connection must present exactly that certificate.
//!
//! Pins are staged in a `.temp` file and linked into place without
//! clobbering, so a partially written pin is never observed and two
//! processes pinning the same host agree on one certificate. Pins are
//! never rewritten: a server that rotates its certificate fails with
//! [`TrustError::PinMismatch`] until the pin file is removed by hand.

mod inspect;
mod pem;
mod verifier;

pub use inspect::{inspect, match_hostname, CertificateReport};

pub(crate) use verifier::{map_handshake_error, server_name};

use std::io::Write;
use std::path::{Path, PathBuf};

use rustls::pki_types::CertificateDer;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, info};

use crate::error::{ConfigError, CoreError, TransportError, TrustError};

use verifier::PinVerifier;

const CERTS_DIR: &str = "certs";
const TEMP_SUFFIX: &str = ".temp";

/// What to do when a host has no pin yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FirstUsePolicy {
    /// Pin whatever certificate the server presents.
    #[default]
    TrustSilently,
    /// Fail with [`TrustError::NotPinned`]; pins must be added with
    /// [`TrustStore::pin_pem`] beforehand.
    Refuse,
}

/// A leaf certificate pinned for one host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinnedCertificate {
    host: String,
    path: PathBuf,
    pem_bytes: Vec<u8>,
    der: CertificateDer<'static>,
}

impl PinnedCertificate {
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn pem_bytes(&self) -> &[u8] {
        &self.pem_bytes
    }

    pub fn der(&self) -> &CertificateDer<'static> {
        &self.der
    }

    fn from_pem(host: &str, path: PathBuf, pem_bytes: Vec<u8>) -> Result<Self, TrustError> {
        let der = pem::decode_first_certificate(&pem_bytes).map_err(|reason| {
            TrustError::InvalidPem {
                path: path.clone(),
                reason,
            }
        })?;
        Ok(Self {
            host: host.to_owned(),
            path,
            pem_bytes,
            der,
        })
    }
}

#[derive(Debug)]
pub struct TrustStore {
    certs_dir: PathBuf,
    policy: FirstUsePolicy,
}

impl TrustStore {
    /// Pins live in the `certs` subdirectory of `config_dir`, created on
    /// first write.
    pub fn new(config_dir: impl AsRef<Path>, policy: FirstUsePolicy) -> Self {
        Self {
            certs_dir: config_dir.as_ref().join(CERTS_DIR),
            policy,
        }
    }

    pub fn certs_dir(&self) -> &Path {
        &self.certs_dir
    }

    /// Return the pin for `host`, establishing it on first contact.
    ///
    /// An existing pin is returned as stored; expiry is not checked here.
    pub async fn get_or_pin(&self, host: &str, port: u16) -> Result<PinnedCertificate, CoreError> {
        let path = self.pin_path(host)?;
        if let Some(pin) = self.load(host, &path).await? {
            debug!(host, path = %path.display(), "using pinned certificate");
            return Ok(pin);
        }

        if self.policy == FirstUsePolicy::Refuse {
            return Err(TrustError::NotPinned {
                host: host.to_owned(),
            }
            .into());
        }

        let leaf = fetch_leaf_certificate(host, port).await?;
        let pin = self.store(host, path, &leaf).await?;
        info!(host, path = %pin.path().display(), "pinned new server certificate");
        Ok(pin)
    }

    /// Pin a PEM certificate for `host` without contacting it.
    ///
    /// Fails if a pin already exists; pins are never replaced.
    pub async fn pin_pem(&self, host: &str, pem_bytes: &[u8]) -> Result<PinnedCertificate, CoreError> {
        let path = self.pin_path(host)?;
        if self.load(host, &path).await?.is_some() {
            return Err(TrustError::TrustStoreIo {
                path,
                source: std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    "certificate already pinned",
                ),
            }
            .into());
        }
        let checked = PinnedCertificate::from_pem(host, path.clone(), pem_bytes.to_vec())?;
        let pin = self.store(host, path, checked.der()).await?;
        if pin.der() != checked.der() {
            return Err(TrustError::TrustStoreIo {
                path: pin.path,
                source: std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    "certificate already pinned",
                ),
            }
            .into());
        }
        Ok(pin)
    }

    /// Every pin currently on disk, sorted by host. Half-written `.temp`
    /// files are skipped.
    pub async fn list_pins(&self) -> Result<Vec<PinnedCertificate>, TrustError> {
        let mut entries = match tokio::fs::read_dir(&self.certs_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(TrustError::TrustStoreIo {
                    path: self.certs_dir.clone(),
                    source,
                })
            }
        };

        let io_err = |source| TrustError::TrustStoreIo {
            path: self.certs_dir.clone(),
            source,
        };
        let mut pins = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
            let Some(host) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            if host.ends_with(TEMP_SUFFIX) || !entry.file_type().await.map_err(io_err)?.is_file() {
                continue;
            }
            if let Some(pin) = self.load(&host, &entry.path()).await? {
                pins.push(pin);
            }
        }
        pins.sort_by(|a, b| a.host.cmp(&b.host));
        Ok(pins)
    }

    fn pin_path(&self, host: &str) -> Result<PathBuf, ConfigError> {
        let usable = !host.is_empty()
            && host != "."
            && host != ".."
            && !host.ends_with(TEMP_SUFFIX)
            && !host.contains(&['/', '\\', '\0'][..]);
        if !usable {
            return Err(ConfigError::InvalidPinHost(host.to_owned()));
        }
        Ok(self.certs_dir.join(host))
    }

    async fn load(&self, host: &str, path: &Path) -> Result<Option<PinnedCertificate>, TrustError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => PinnedCertificate::from_pem(host, path.to_path_buf(), bytes).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(TrustError::TrustStoreIo {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Write a pin for `host` unless one already exists. A pin that
    /// appears between the caller's lookup and this write wins; it is
    /// loaded and returned unchanged.
    async fn store(
        &self,
        host: &str,
        path: PathBuf,
        der: &CertificateDer<'_>,
    ) -> Result<PinnedCertificate, TrustError> {
        let pem_bytes = pem::encode_certificate(der.as_ref()).into_bytes();
        tokio::fs::create_dir_all(&self.certs_dir)
            .await
            .map_err(|source| TrustError::TrustStoreIo {
                path: self.certs_dir.clone(),
                source,
            })?;

        let certs_dir = self.certs_dir.clone();
        let target = path.clone();
        let contents = pem_bytes.clone();
        let written = tokio::task::spawn_blocking(move || {
            write_new_pin(&certs_dir, &target, &contents)
        })
        .await
        .unwrap_or_else(|join| Err(std::io::Error::other(join)));

        match written {
            Ok(()) => PinnedCertificate::from_pem(host, path, pem_bytes),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                debug!(host, path = %path.display(), "pin appeared concurrently, keeping it");
                match self.load(host, &path).await? {
                    Some(existing) => Ok(existing),
                    None => Err(TrustError::TrustStoreIo { path, source: e }),
                }
            }
            Err(source) => Err(TrustError::TrustStoreIo { path, source }),
        }
    }
}

/// Stage `contents` in a temp file beside `path` and link it into place
/// without replacing anything already there. The temp file is removed on
/// every failure path when it drops.
fn write_new_pin(certs_dir: &Path, path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut staged = tempfile::Builder::new()
        .prefix(".pin-")
        .suffix(TEMP_SUFFIX)
        .tempfile_in(certs_dir)?;
    staged.write_all(contents)?;
    staged.as_file().sync_all()?;
    staged.persist_noclobber(path).map_err(|err| err.error)?;
    Ok(())
}

/// Handshake once without verification and return the leaf the server
/// presented. The connection is shut down afterwards and never reused.
async fn fetch_leaf_certificate(
    host: &str,
    port: u16,
) -> Result<CertificateDer<'static>, CoreError> {
    let server = format!("{host}:{port}:s");
    let tcp = TcpStream::connect((host, port))
        .await
        .map_err(|source| TransportError::Dial {
            server: server.clone(),
            source,
        })?;
    let connector = PinVerifier::accept_any().into_connector()?;
    let mut stream = connector
        .connect(server_name(host), tcp)
        .await
        .map_err(|source| TransportError::Tls {
            server: server.clone(),
            source,
        })?;

    let leaf = stream
        .get_ref()
        .1
        .peer_certificates()
        .and_then(|certs| certs.first())
        .map(|cert| cert.clone().into_owned())
        .ok_or_else(|| TrustError::NoPeerCertificate {
            host: host.to_owned(),
        })?;
    let _ = stream.shutdown().await;
    debug!(server, "captured certificate for first-use pinning");
    Ok(leaf)
}

/// Build a connector that only accepts `pin`'s leaf certificate.
pub(crate) fn pinned_connector(
    pin: &PinnedCertificate,
) -> Result<tokio_rustls::TlsConnector, TrustError> {
    PinVerifier::pinned(pin.der().clone()).into_connector()
}
