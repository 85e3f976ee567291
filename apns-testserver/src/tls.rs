//! Self-signed TLS material for the mock server.
//!
//! Tests never hand the real APNs root of trust to this crate; instead the
//! server mints a fresh self-signed certificate for `localhost` on every
//! start, and client-side tests disable hostname verification (the same
//! `hostname_verification_enabled(false)` escape hatch `apns::tls` documents
//! as "intended for the mock test server, not production traffic").

use std::sync::Arc;

use rustls::ServerConfig;
use rustls_pki_types::{CertificateDer, PrivatePkcs8KeyDer};

/// Generates a throwaway self-signed certificate and builds a server-side
/// `rustls::ServerConfig` from it. ALPN is left empty; `h2` is spoken by
/// prior knowledge once the HTTP/2 preface arrives, matching how APNs
/// itself is reached in production.
pub fn build_self_signed_server_config() -> Arc<ServerConfig> {
    let rcgen::CertifiedKey { cert, signing_key } =
        rcgen::generate_simple_self_signed(["localhost".to_string(), "127.0.0.1".to_string()])
            .expect("self-signed certificate generation must not fail");

    let cert_der: CertificateDer<'static> = cert.der().clone();
    let key_der = PrivatePkcs8KeyDer::from(signing_key.serialize_der());

    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(vec![cert_der], key_der.into())
        .expect("self-signed cert/key pair must be accepted by rustls");
    config.alpn_protocols = vec![];
    Arc::new(config)
}
