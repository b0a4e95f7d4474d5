//! # Transport Module
//!
//! This module handles the socket underneath an LDAP connection.
//!
//! ## Components
//!
//! - **LdapTransport**: TCP/TLS socket owned by a single I/O task
//! - **TcpConnector**: opens `LdapTransport`s for a connection factory
//! - **LdapOptions**: connection and factory options
//! - **TLS**: TLS utilities for LDAPS and StartTLS

mod client;
mod config;
pub mod tls;
#[cfg(test)]
pub(crate) mod testing;

pub use client::LdapTransport;
pub use config::LdapOptions;
pub use tls::{
    load_certs, load_private_key, parse_protocol_versions, provider_with_cipher_suites,
    create_client_config, create_client_config_with_suites, create_client_config_with_versions,
    create_client_config_with_webpki_roots,
    create_insecure_client_config, create_mtls_client_config, create_tls_connector, parse_server_name,
};

use std::sync::{Arc, Weak};
use async_trait::async_trait;
use tokio_rustls::rustls::ClientConfig;

use crate::{LdapError, Result};
use crate::codec::PackageStatus;

/// Client protocol interface for handling incoming data
pub trait ClientProtocol: Send + Sync {
    /// Parse package boundary
    /// Returns (package_length, status)
    fn parse_package(&self, buff: &[u8]) -> (usize, PackageStatus);

    /// Handle received package
    fn recv(&self, pkg: Vec<u8>);

    /// The transport stopped delivering data (EOF, I/O error or bad framing)
    fn transport_error(&self, error: LdapError);
}

/// Byte stream underneath a connection
#[async_trait]
pub trait Transport: Send + Sync {
    /// Start delivering inbound packages to `protocol`
    fn start(&self, protocol: Weak<dyn ClientProtocol>);

    /// Queue a complete frame for writing
    fn write(&self, frame: Vec<u8>) -> Result<()>;

    /// Install TLS on the open stream; frames queued before the call are written first
    async fn start_tls(&self, config: Arc<ClientConfig>) -> Result<()>;

    fn is_tls_enabled(&self) -> bool;

    /// Close the socket; idempotent
    fn close(&self);
}

/// Opens transports for a connection factory
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, address: &str, options: &LdapOptions) -> Result<Arc<dyn Transport>>;
}

/// Default connector over TCP (and TLS for LDAPS)
#[derive(Debug, Default, Clone)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, address: &str, options: &LdapOptions) -> Result<Arc<dyn Transport>> {
        let transport: Arc<dyn Transport> = LdapTransport::connect(address, options).await?;
        Ok(transport)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_tcp_connector_refused() {
        let options = LdapOptions::default().with_connect_timeout(Duration::from_millis(500));
        // Port 1 on localhost is not expected to accept connections
        let err = match TcpConnector.connect("127.0.0.1:1", &options).await {
            Ok(_) => panic!("connect should fail"),
            Err(e) => e,
        };
        assert_eq!(err.code(), crate::ResultCode::CLIENT_SIDE_CONNECT_ERROR);
    }
}
