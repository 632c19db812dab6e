use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rustls::pki_types::CertificateDer;

const BEGIN: &str = "-----BEGIN CERTIFICATE-----";
const END: &str = "-----END CERTIFICATE-----";

/// Encode a DER certificate as PEM with 64-column lines.
pub(crate) fn encode_certificate(der: &[u8]) -> String {
    let body = STANDARD.encode(der);
    let mut pem = String::with_capacity(body.len() + body.len() / 64 + BEGIN.len() + END.len() + 4);
    pem.push_str(BEGIN);
    pem.push('\n');
    for chunk in body.as_bytes().chunks(64) {
        // base64 output is ASCII
        pem.push_str(std::str::from_utf8(chunk).unwrap_or_default());
        pem.push('\n');
    }
    pem.push_str(END);
    pem.push('\n');
    pem
}

/// Decode the first certificate in a PEM document.
pub(crate) fn decode_first_certificate(pem: &[u8]) -> Result<CertificateDer<'static>, String> {
    let mut reader = pem;
    let first = rustls_pemfile::certs(&mut reader).next();
    first
        .ok_or_else(|| "no certificate found".to_owned())?
        .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_then_decode_yields_same_der() {
        let der: Vec<u8> = (0u8..=200).collect();
        let pem = encode_certificate(&der);
        assert!(pem.starts_with(BEGIN));
        assert!(pem.lines().all(|line| line.len() <= 64));
        let decoded = decode_first_certificate(pem.as_bytes()).expect("must decode");
        assert_eq!(decoded.as_ref(), der.as_slice());
    }

    #[test]
    fn decode_takes_first_certificate_of_a_real_pem() {
        let pem = include_bytes!("../../tests/fixtures/server.pem");
        let der = decode_first_certificate(pem).expect("fixture decodes");
        // DER SEQUENCE with a two-byte length.
        assert_eq!(&der.as_ref()[..2], &[0x30, 0x82]);
        let reencoded = encode_certificate(der.as_ref());
        assert_eq!(decode_first_certificate(reencoded.as_bytes()).expect("re-decodes"), der);
    }

    #[test]
    fn decode_rejects_documents_without_certificates() {
        assert!(decode_first_certificate(b"not a pem").is_err());
    }
}
