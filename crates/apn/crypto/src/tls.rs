//! TLS client configuration for the gateway and feedback services.

use std::sync::Arc;

use rustls::pki_types::CertificateDer;
use rustls::{ClientConfig, RootCertStore};

use crate::{CertError, PushCertificate};

/// Build a rustls client config presenting `cert` for client auth.
///
/// Trust anchors are the Mozilla roots plus any certificates in `extra_ca`,
/// a PEM bundle.
pub fn client_config(
    cert: &PushCertificate,
    extra_ca: Option<&str>,
) -> Result<Arc<ClientConfig>, CertError> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    if let Some(bundle) = extra_ca {
        let extra = pem::parse_many(bundle)?
            .into_iter()
            .filter(|block| block.tag() == "CERTIFICATE")
            .map(|block| CertificateDer::from(block.into_contents()))
            .collect::<Vec<_>>();
        if extra.is_empty() {
            return Err(CertError::MissingCertificate);
        }
        let (added, ignored) = roots.add_parsable_certificates(extra);
        tracing::debug!(added, ignored, "loaded extra trust anchors");
    }

    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_client_auth_cert(cert.chain().to_vec(), cert.key().clone_key())?;

    Ok(Arc::new(config))
}
