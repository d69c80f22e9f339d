use crate::error::TransportError;
use rustls::{ClientConfig, OwnedTrustAnchor, RootCertStore, ServerName};
use std::sync::Arc;
use tokio_rustls::TlsConnector;

/// TLS connector trusting the bundled Mozilla root set
pub(crate) fn connector() -> TlsConnector {
    let mut roots = RootCertStore::empty();
    roots.add_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.iter().map(|ta| {
        OwnedTrustAnchor::from_subject_spki_name_constraints(
            ta.subject,
            ta.spki,
            ta.name_constraints,
        )
    }));

    let config = ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(roots)
        .with_no_client_auth();

    TlsConnector::from(Arc::new(config))
}

pub(crate) fn server_name(host: &str) -> Result<ServerName, TransportError> {
    ServerName::try_from(host)
        .map_err(|e| TransportError::Tls(format!("invalid server name {:?}: {}", host, e)))
}
