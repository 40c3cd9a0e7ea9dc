//! rustls configuration loaders for servers and clients.

use std::fs;
use std::io::Cursor;
use std::sync::Arc;

use anyhow::{Context, Result};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls_pemfile::{certs, pkcs8_private_keys, rsa_private_keys};

/// Build a rustls ServerConfig from PEM certificate and key file paths.
pub fn server_config_from_files(
    cert_file: &str,
    key_file: &str,
) -> Result<Arc<rustls::ServerConfig>> {
    let cert_pem =
        fs::read(cert_file).with_context(|| format!("read TLS certificate {}", cert_file))?;
    let key_pem = fs::read(key_file).with_context(|| format!("read TLS key {}", key_file))?;
    server_config_from_pem(&cert_pem, &key_pem)
}

/// Build a ServerConfig from PEM bytes.
pub fn server_config_from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<Arc<rustls::ServerConfig>> {
    let chain = certs_from_pem(cert_pem)?;
    let key = key_from_pem(key_pem)?;
    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(chain, key)
        .context("assemble rustls server config")?;
    Ok(Arc::new(config))
}

/// Every CERTIFICATE block in the PEM data, in order.
fn certs_from_pem(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>> {
    let mut chain = Vec::new();
    for block in certs(&mut Cursor::new(pem)) {
        chain.push(block.context("malformed CERTIFICATE block")?);
    }
    if chain.is_empty() {
        anyhow::bail!("no CERTIFICATE blocks in PEM data");
    }
    Ok(chain)
}

/// First private key in the PEM data, trying PKCS#8 before the legacy RSA
/// framing.
fn key_from_pem(pem: &[u8]) -> Result<PrivateKeyDer<'static>> {
    if let Some(key) = pkcs8_private_keys(&mut Cursor::new(pem)).next() {
        return Ok(key.context("malformed PKCS#8 PRIVATE KEY block")?.into());
    }
    if let Some(key) = rsa_private_keys(&mut Cursor::new(pem)).next() {
        return Ok(key.context("malformed RSA PRIVATE KEY block")?.into());
    }
    anyhow::bail!("no PRIVATE KEY block in PEM data (tried PKCS#8 and RSA)");
}

/// Check that cert and key files exist and parse (for startup validation).
pub fn validate_tls_files(cert_file: &str, key_file: &str) -> Result<()> {
    server_config_from_files(cert_file, key_file).map(|_| ())
}

/// Client config trusting the CAs in the given PEM bundle.
pub fn client_config_from_ca_pem(ca_pem: &[u8]) -> Result<Arc<rustls::ClientConfig>> {
    let mut roots = rustls::RootCertStore::empty();
    for ca in certs_from_pem(ca_pem)? {
        roots.add(ca).context("add CA certificate to root store")?;
    }
    let config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(Arc::new(config))
}

pub mod danger {
    //! Certificate verification bypass for tests and closed networks.

    use std::sync::Arc;

    use rustls::client::danger::{
        HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
    };
    use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use rustls::{DigitallySignedStruct, SignatureScheme};

    /// Accepts any server certificate without looking at it.
    #[derive(Debug)]
    pub struct NoVerification;

    impl ServerCertVerifier for NoVerification {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, rustls::Error> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn verify_tls13_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            // Everything the default provider can negotiate; the verifier
            // accepts the handshake regardless, so the list only has to be
            // broad enough not to veto a cipher choice.
            vec![
                SignatureScheme::ED25519,
                SignatureScheme::ECDSA_NISTP256_SHA256,
                SignatureScheme::ECDSA_NISTP384_SHA384,
                SignatureScheme::ECDSA_NISTP521_SHA512,
                SignatureScheme::RSA_PSS_SHA256,
                SignatureScheme::RSA_PSS_SHA384,
                SignatureScheme::RSA_PSS_SHA512,
                SignatureScheme::RSA_PKCS1_SHA256,
                SignatureScheme::RSA_PKCS1_SHA384,
                SignatureScheme::RSA_PKCS1_SHA512,
            ]
        }
    }

    /// Client config that skips server certificate verification.
    pub fn insecure_client_config() -> Arc<rustls::ClientConfig> {
        let mut config = rustls::ClientConfig::builder()
            .with_root_certificates(rustls::RootCertStore::empty())
            .with_no_client_auth();
        config
            .dangerous()
            .set_certificate_verifier(Arc::new(NoVerification));
        Arc::new(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CERT: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/certs/cert.pem");
    const KEY: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/certs/key.pem");

    #[test]
    fn load_test_certificate() {
        server_config_from_files(CERT, KEY).unwrap();
        validate_tls_files(CERT, KEY).unwrap();
    }

    #[test]
    fn missing_files_are_rejected() {
        assert!(validate_tls_files("/nonexistent/cert.pem", KEY).is_err());
        assert!(validate_tls_files(CERT, "/nonexistent/key.pem").is_err());
    }

    #[test]
    fn server_config_from_pem_bytes() {
        let cert = std::fs::read(CERT).unwrap();
        let key = std::fs::read(KEY).unwrap();
        server_config_from_pem(&cert, &key).unwrap();
    }

    #[test]
    fn key_without_certificate_is_rejected() {
        let key = std::fs::read(KEY).unwrap();
        assert!(server_config_from_pem(&key, &key).is_err());
        let cert = std::fs::read(CERT).unwrap();
        assert!(server_config_from_pem(&cert, &cert).is_err());
    }

    #[test]
    fn client_config_accepts_ca_bundle() {
        let cert = std::fs::read(CERT).unwrap();
        client_config_from_ca_pem(&cert).unwrap();
    }

    #[test]
    fn insecure_config_builds() {
        danger::insecure_client_config();
    }
}
