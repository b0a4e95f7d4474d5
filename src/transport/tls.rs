//! TLS utilities for LDAPS and StartTLS
//!
//! This module provides helper functions for creating client TLS
//! configurations and loading certificates.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls_pemfile::{certs, private_key};
use tokio_rustls::rustls::{
    self,
    crypto::{ring, CryptoProvider},
    pki_types::{CertificateDer, PrivateKeyDer, ServerName},
    ClientConfig, RootCertStore, SupportedProtocolVersion,
};
use tokio_rustls::TlsConnector;

use crate::{LdapError, Result};

/// Load certificates from a PEM file
pub fn load_certs(path: impl AsRef<Path>) -> Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path.as_ref()).map_err(|e| {
        LdapError::param(format!("Failed to open cert file: {}", e))
    })?;
    let mut reader = BufReader::new(file);

    let certs_result: std::result::Result<Vec<_>, _> = certs(&mut reader).collect();
    certs_result.map_err(|e| {
        LdapError::param(format!("Failed to parse certificates: {}", e))
    })
}

/// Load private key from a PEM file
pub fn load_private_key(path: impl AsRef<Path>) -> Result<PrivateKeyDer<'static>> {
    let file = File::open(path.as_ref()).map_err(|e| {
        LdapError::param(format!("Failed to open key file: {}", e))
    })?;
    let mut reader = BufReader::new(file);

    private_key(&mut reader)
        .map_err(|e| LdapError::param(format!("Failed to parse private key: {}", e)))?
        .ok_or_else(|| LdapError::param("No private key found in file"))
}

fn root_store_from(ca_cert_path: impl AsRef<Path>) -> Result<RootCertStore> {
    let mut root_store = RootCertStore::empty();
    for cert in load_certs(ca_cert_path)? {
        root_store.add(cert).map_err(|e| {
            LdapError::param(format!("Failed to add CA cert to store: {}", e))
        })?;
    }
    Ok(root_store)
}

fn webpki_root_store() -> RootCertStore {
    RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    }
}

/// Map protocol names such as `"TLSv1.2"` to rustls versions
pub fn parse_protocol_versions<S: AsRef<str>>(names: &[S]) -> Result<Vec<&'static SupportedProtocolVersion>> {
    names
        .iter()
        .map(|name| match name.as_ref().to_ascii_uppercase().as_str() {
            "TLSV1.2" | "TLS1.2" | "1.2" => Ok(&rustls::version::TLS12),
            "TLSV1.3" | "TLS1.3" | "1.3" => Ok(&rustls::version::TLS13),
            other => Err(LdapError::param(format!("Unsupported TLS protocol version: {}", other))),
        })
        .collect()
}

/// Crypto provider limited to the named cipher suites, e.g. `"TLS13_AES_256_GCM_SHA384"`.
///
/// Names are matched case-insensitively against the ring provider's suites.
pub fn provider_with_cipher_suites<S: AsRef<str>>(names: &[S]) -> Result<CryptoProvider> {
    let mut provider = ring::default_provider();
    let all = std::mem::take(&mut provider.cipher_suites);
    for name in names {
        let name = name.as_ref();
        let suite = all
            .iter()
            .find(|suite| format!("{:?}", suite.suite()).eq_ignore_ascii_case(name))
            .ok_or_else(|| LdapError::param(format!("Unsupported TLS cipher suite: {}", name)))?;
        provider.cipher_suites.push(*suite);
    }
    if provider.cipher_suites.is_empty() {
        return Err(LdapError::param("At least one TLS cipher suite is required"));
    }
    Ok(provider)
}

/// Create a client TLS configuration with custom CA certificate
///
/// # Example
/// ```ignore
/// let tls_config = create_client_config("ca.pem")?;
/// let options = LdapOptions::default().with_start_tls(Arc::new(tls_config));
/// ```
pub fn create_client_config(ca_cert_path: impl AsRef<Path>) -> Result<ClientConfig> {
    let config = ClientConfig::builder()
        .with_root_certificates(root_store_from(ca_cert_path)?)
        .with_no_client_auth();

    Ok(config)
}

/// Create a client TLS configuration restricted to the given protocol versions.
///
/// Uses the webpki roots when `ca_cert_path` is `None`.
pub fn create_client_config_with_versions(
    ca_cert_path: Option<&Path>,
    versions: &[&'static SupportedProtocolVersion],
) -> Result<ClientConfig> {
    if versions.is_empty() {
        return Err(LdapError::param("At least one TLS protocol version is required"));
    }
    create_restricted_client_config(ca_cert_path, versions, ring::default_provider())
}

/// Create a client TLS configuration from protocol version and cipher suite names.
///
/// Empty lists keep the rustls defaults.
pub fn create_client_config_with_suites<S: AsRef<str>>(
    ca_cert_path: Option<&Path>,
    protocols: &[S],
    cipher_suites: &[S],
) -> Result<ClientConfig> {
    let versions = if protocols.is_empty() {
        rustls::DEFAULT_VERSIONS.to_vec()
    } else {
        parse_protocol_versions(protocols)?
    };
    let provider = if cipher_suites.is_empty() {
        ring::default_provider()
    } else {
        provider_with_cipher_suites(cipher_suites)?
    };
    create_restricted_client_config(ca_cert_path, &versions, provider)
}

fn create_restricted_client_config(
    ca_cert_path: Option<&Path>,
    versions: &[&'static SupportedProtocolVersion],
    provider: CryptoProvider,
) -> Result<ClientConfig> {
    let root_store = match ca_cert_path {
        Some(path) => root_store_from(path)?,
        None => webpki_root_store(),
    };

    let config = ClientConfig::builder_with_provider(Arc::new(provider))
        .with_protocol_versions(versions)
        .map_err(|e| LdapError::param(format!("Invalid TLS protocol settings: {}", e)))?
        .with_root_certificates(root_store)
        .with_no_client_auth();

    Ok(config)
}

/// Create a client TLS configuration with the bundled webpki root certificates
pub fn create_client_config_with_webpki_roots() -> Result<ClientConfig> {
    let config = ClientConfig::builder()
        .with_root_certificates(webpki_root_store())
        .with_no_client_auth();

    Ok(config)
}

/// Create a client TLS configuration that skips certificate verification
///
/// **WARNING**: This is insecure and should only be used for testing!
pub fn create_insecure_client_config() -> Result<ClientConfig> {
    let config = ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(NoVerifier))
        .with_no_client_auth();

    Ok(config)
}

/// Create a client TLS configuration presenting a client certificate
pub fn create_mtls_client_config(
    ca_cert_path: impl AsRef<Path>,
    client_cert_path: impl AsRef<Path>,
    client_key_path: impl AsRef<Path>,
) -> Result<ClientConfig> {
    let client_certs = load_certs(client_cert_path)?;
    let client_key = load_private_key(client_key_path)?;

    let config = ClientConfig::builder()
        .with_root_certificates(root_store_from(ca_cert_path)?)
        .with_client_auth_cert(client_certs, client_key)
        .map_err(|e| LdapError::param(format!("Failed to set client auth: {}", e)))?;

    Ok(config)
}

/// Create a TLS connector from client config
pub fn create_tls_connector(config: Arc<ClientConfig>) -> TlsConnector {
    TlsConnector::from(config)
}

/// Parse server name from an address such as `host:636` or `[::1]:636`
pub fn parse_server_name(addr: &str) -> Result<ServerName<'static>> {
    let host = match addr.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host,
        _ => addr,
    };
    let host = host.trim_start_matches('[').trim_end_matches(']');

    ServerName::try_from(host.to_string())
        .map_err(|e| LdapError::param(format!("Invalid server name '{}': {}", host, e)))
}

/// Certificate verifier that accepts any certificate (for testing only)
#[derive(Debug)]
struct NoVerifier;

impl rustls::client::danger::ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
            rustls::SignatureScheme::ED25519,
        ]
    }
}
