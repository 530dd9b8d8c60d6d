//! Push certificate handling.

use chrono::{DateTime, Utc};
use rustls::pki_types::{
    CertificateDer, PrivateKeyDer, PrivatePkcs1KeyDer, PrivatePkcs8KeyDer, PrivateSec1KeyDer,
};
use x509_parser::prelude::*;

/// OID of the X.500 `UID` attribute, which carries the app's bundle id.
const UID_OID: &str = "0.9.2342.19200300.100.1.1";

/// Certificate errors.
#[derive(Debug, thiserror::Error)]
pub enum CertError {
    #[error("failed to parse PEM: {0}")]
    Pem(#[from] ::pem::PemError),
    #[error("PEM bundle contains no certificate")]
    MissingCertificate,
    #[error("PEM bundle contains no private key")]
    MissingPrivateKey,
    #[error("unsupported PEM block {0:?}")]
    UnsupportedBlock(String),
    #[error("failed to parse certificate DER: {0}")]
    Der(String),
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid TLS configuration: {0}")]
    Tls(#[from] rustls::Error),
}

/// A push certificate chain and its private key.
///
/// Apps store both in one PEM bundle, the way the legacy tooling exported
/// them.
pub struct PushCertificate {
    chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
}

impl std::fmt::Debug for PushCertificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushCertificate")
            .field("chain_len", &self.chain.len())
            .finish_non_exhaustive()
    }
}

impl Clone for PushCertificate {
    fn clone(&self) -> Self {
        Self {
            chain: self.chain.clone(),
            key: self.key.clone_key(),
        }
    }
}

impl PushCertificate {
    /// Parse a PEM bundle holding the certificate chain and private key.
    pub fn from_pem(bundle: &str) -> Result<Self, CertError> {
        let mut chain = Vec::new();
        let mut key = None;

        for block in ::pem::parse_many(bundle)? {
            let contents = block.contents().to_vec();
            match block.tag() {
                "CERTIFICATE" => chain.push(CertificateDer::from(contents)),
                "PRIVATE KEY" => key = Some(PrivatePkcs8KeyDer::from(contents).into()),
                "RSA PRIVATE KEY" => key = Some(PrivatePkcs1KeyDer::from(contents).into()),
                "EC PRIVATE KEY" => key = Some(PrivateSec1KeyDer::from(contents).into()),
                other => return Err(CertError::UnsupportedBlock(other.to_string())),
            }
        }

        if chain.is_empty() {
            return Err(CertError::MissingCertificate);
        }
        let key = key.ok_or(CertError::MissingPrivateKey)?;

        Ok(Self { chain, key })
    }

    /// Read a PEM bundle from disk.
    pub fn from_pem_file(path: &std::path::Path) -> Result<Self, CertError> {
        let bundle = std::fs::read_to_string(path).map_err(|source| CertError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_pem(&bundle)
    }

    /// The leaf certificate.
    pub fn leaf(&self) -> &CertificateDer<'static> {
        &self.chain[0]
    }

    pub fn chain(&self) -> &[CertificateDer<'static>] {
        &self.chain
    }

    pub fn key(&self) -> &PrivateKeyDer<'static> {
        &self.key
    }

    /// Topic and validity of the leaf certificate.
    pub fn info(&self) -> Result<CertInfo, CertError> {
        cert_info(self.leaf())
    }
}

/// Details read from a push certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertInfo {
    /// Bundle id the certificate is issued for, from the subject UID.
    pub topic: Option<String>,
    pub subject: String,
    pub not_after: DateTime<Utc>,
}

impl CertInfo {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.not_after <= now
    }
}

/// Read topic and expiry from a DER certificate.
pub fn cert_info(cert_der: &[u8]) -> Result<CertInfo, CertError> {
    let (_, cert) =
        X509Certificate::from_der(cert_der).map_err(|e| CertError::Der(e.to_string()))?;

    let mut topic = None;
    for rdn in cert.subject().iter() {
        for attr in rdn.iter() {
            if attr.attr_type().to_id_string() == UID_OID {
                if let Ok(value) = attr.as_str() {
                    topic = Some(value.to_string());
                }
            }
        }
    }

    let not_after = DateTime::from_timestamp(cert.validity().not_after.timestamp(), 0)
        .ok_or_else(|| CertError::Der("certificate expiry out of range".into()))?;

    Ok(CertInfo {
        topic,
        subject: cert.subject().to_string(),
        not_after,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(tag: &str, contents: &[u8]) -> String {
        ::pem::encode(&::pem::Pem::new(tag, contents.to_vec()))
    }

    #[test]
    fn test_bundle_with_chain_and_key() {
        let bundle = format!(
            "{}{}{}",
            block("CERTIFICATE", b"leaf"),
            block("CERTIFICATE", b"intermediate"),
            block("RSA PRIVATE KEY", b"key"),
        );
        let cert = PushCertificate::from_pem(&bundle).unwrap();
        assert_eq!(cert.chain().len(), 2);
        assert_eq!(&cert.leaf()[..], b"leaf");
        assert!(matches!(cert.key(), PrivateKeyDer::Pkcs1(_)));
    }

    #[test]
    fn test_bundle_without_key() {
        let bundle = block("CERTIFICATE", b"leaf");
        assert!(matches!(
            PushCertificate::from_pem(&bundle),
            Err(CertError::MissingPrivateKey)
        ));
    }

    #[test]
    fn test_bundle_without_certificate() {
        let bundle = block("PRIVATE KEY", b"key");
        assert!(matches!(
            PushCertificate::from_pem(&bundle),
            Err(CertError::MissingCertificate)
        ));
    }

    #[test]
    fn test_bundle_with_unknown_block() {
        let bundle = format!("{}{}", block("CERTIFICATE", b"leaf"), block("PUBLIC KEY", b"k"));
        assert!(matches!(
            PushCertificate::from_pem(&bundle),
            Err(CertError::UnsupportedBlock(tag)) if tag == "PUBLIC KEY"
        ));
    }

    #[test]
    fn test_garbage_der() {
        assert!(matches!(cert_info(b"not a certificate"), Err(CertError::Der(_))));
    }
}
