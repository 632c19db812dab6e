//! Read-only diagnostics over pinned certificates. Nothing here takes part
//! in the trust decision.

use x509_parser::extensions::ParsedExtension;
use x509_parser::prelude::{FromDer, GeneralName, X509Certificate};
use x509_parser::time::ASN1Time;

use crate::error::TrustError;

use super::PinnedCertificate;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateReport {
    pub host: String,
    pub subject: String,
    /// Expiry as seconds since the Unix epoch.
    pub not_after: i64,
    pub expired: bool,
    /// Whether any DNS SAN or CN of the certificate matches `host`.
    pub covers_host: bool,
}

pub fn inspect(pin: &PinnedCertificate) -> Result<CertificateReport, TrustError> {
    let (_remaining, cert) =
        X509Certificate::from_der(pin.der().as_ref()).map_err(|e| TrustError::InvalidPem {
            path: pin.path().to_path_buf(),
            reason: format!("invalid X.509 certificate: {e}"),
        })?;

    let not_after = cert.validity().not_after;

    let names = certificate_names(&cert);
    let covers_host = names.iter().any(|name| match_hostname(pin.host(), name));

    Ok(CertificateReport {
        host: pin.host().to_owned(),
        subject: cert.subject().to_string(),
        not_after: not_after.timestamp(),
        expired: ASN1Time::now() > not_after,
        covers_host,
    })
}

/// DNS subject alternative names followed by common names.
fn certificate_names(cert: &X509Certificate<'_>) -> Vec<String> {
    let mut names = Vec::new();
    for extension in cert.extensions() {
        if let ParsedExtension::SubjectAlternativeName(san) = extension.parsed_extension() {
            for name in &san.general_names {
                if let GeneralName::DNSName(value) = name {
                    names.push((*value).to_string());
                }
            }
        }
    }
    names.extend(
        cert.subject()
            .iter_common_name()
            .filter_map(|cn| cn.as_str().ok().map(str::to_string)),
    );
    names
}

/// `true` if `name` equals `pattern`, or `pattern` is `*.suffix` and `name`
/// ends with `.suffix`. Comparison ignores ASCII case.
pub fn match_hostname(name: &str, pattern: &str) -> bool {
    let name = name.to_ascii_lowercase();
    let pattern = pattern.to_ascii_lowercase();
    if name == pattern {
        return true;
    }
    match pattern.strip_prefix('*') {
        Some(suffix) if suffix.starts_with('.') => name.ends_with(suffix),
        _ => false,
    }
}
