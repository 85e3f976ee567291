//! TLS material handling (C7 boundary, §4.7).
//!
//! Certificate-format parsing internals are explicitly out of core scope;
//! this module only turns already-PEM-encoded bytes into the rustls types
//! the connection factory needs, using `rustls-pemfile` the way the rest of
//! this corpus loads TLS material rather than re-implementing ASN.1/DER
//! parsing. PKCS#12 archives are out of scope: split them into PEM with an
//! external tool before handing them to this crate.

use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};

use crate::error::ConfigError;

/// Exactly one of these two is required; mixing them is a [`ConfigError`].
#[derive(Clone)]
pub enum Credentials {
    /// Client-certificate (mTLS) authentication.
    Certificate {
        cert_chain: Vec<CertificateDer<'static>>,
        private_key: Arc<PrivateKeyDer<'static>>,
    },
    /// Token-based authentication: an ES256 signing key plus its APNs key id
    /// and team id, handed to the [`crate::auth::TokenProvider`].
    SigningKey {
        ec_private_key_pem: Vec<u8>,
        key_id: String,
        team_id: String,
    },
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credentials::Certificate { cert_chain, .. } => f
                .debug_struct("Credentials::Certificate")
                .field("cert_chain_len", &cert_chain.len())
                .finish(),
            Credentials::SigningKey { key_id, team_id, .. } => f
                .debug_struct("Credentials::SigningKey")
                .field("key_id", key_id)
                .field("team_id", team_id)
                .finish(),
        }
    }
}

/// Parses a PEM certificate chain and PEM private key into
/// [`Credentials::Certificate`].
pub fn load_certificate_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<Credentials, ConfigError> {
    let cert_chain: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut &cert_pem[..])
        .collect::<Result<_, _>>()
        .map_err(|e| ConfigError::InvalidTlsMaterial(format!("certificate chain: {e}")))?;
    if cert_chain.is_empty() {
        return Err(ConfigError::InvalidTlsMaterial("no certificates found in PEM".into()));
    }

    let private_key = rustls_pemfile::private_key(&mut &key_pem[..])
        .map_err(|e| ConfigError::InvalidTlsMaterial(format!("private key: {e}")))?
        .ok_or_else(|| ConfigError::InvalidTlsMaterial("no private key found in PEM".into()))?;

    Ok(Credentials::Certificate {
        cert_chain,
        private_key: Arc::new(private_key),
    })
}

/// A verifier that validates nothing. Used only when
/// `hostname_verification_enabled` is explicitly set to `false`: rustls has
/// no supported API for "verify the chain but not the name", so this crate
/// takes the conservative, clearly-insecure reading documented in
/// `ClientConfig::hostname_verification_enabled` rather than hand-rolling
/// partial chain verification. Intended for the mock test server, not
/// production traffic.
#[derive(Debug)]
struct NoVerification(Arc<rustls::crypto::CryptoProvider>);

impl ServerCertVerifier for NoVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        tracing::warn!("TLS hostname verification disabled: accepting server certificate unchecked");
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

/// Builds the rustls `ClientConfig` used by the channel factory (§4.2).
///
/// `use_alpn` controls whether `h2` is negotiated via ALPN or the connection
/// proceeds directly to an HTTP/2 preface ("prior knowledge"), matching
/// APNs' direct-HTTP/2 default.
pub fn build_tls_config(
    credentials: &Credentials,
    hostname_verification_enabled: bool,
    use_alpn: bool,
) -> Result<Arc<ClientConfig>, ConfigError> {
    let builder = if hostname_verification_enabled {
        let root_store = rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        ClientConfig::builder().with_root_certificates(root_store)
    } else {
        let provider = rustls::crypto::CryptoProvider::get_default()
            .cloned()
            .unwrap_or_else(|| Arc::new(rustls::crypto::ring::default_provider()));
        ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerification(provider)))
    };

    let mut config = match credentials {
        Credentials::Certificate { cert_chain, private_key } => builder
            .with_client_auth_cert(cert_chain.clone(), private_key.clone_key())
            .map_err(|e| ConfigError::InvalidTlsMaterial(e.to_string()))?,
        Credentials::SigningKey { .. } => builder.with_no_client_auth(),
    };

    config.alpn_protocols = if use_alpn { vec![b"h2".to_vec()] } else { vec![] };
    Ok(Arc::new(config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_certificate_chain() {
        let err = load_certificate_pem(b"", b"").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidTlsMaterial(_)));
    }
}
