//! Configuration structures

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use serde::{Deserialize, Serialize};

use crate::{consts, LdapError, Result};
use crate::logger::LogLevel;
use crate::protocol::{BindRequest, SearchRequest};
use crate::transport::{self, LdapOptions};

/// Client configuration as read from a TOML file
///
/// Millisecond values `<= 0` disable the corresponding feature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LdapClientConfig {
    /// Server address (`host:port`)
    pub address: String,
    /// Connect timeout (ms)
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: i64,
    /// Request timeout (ms)
    #[serde(default)]
    pub request_timeout: i64,
    /// Heartbeat interval (ms)
    #[serde(default)]
    pub heartbeat_interval: i64,
    /// Base DN of the heartbeat search
    #[serde(default)]
    pub heartbeat_base_dn: String,
    /// Abandon operations that time out
    #[serde(default)]
    pub abandon_on_timeout: bool,
    /// Upgrade with StartTLS after connecting
    #[serde(default)]
    pub use_start_tls: bool,
    /// Connect with TLS (ldaps)
    #[serde(default)]
    pub use_ssl: bool,
    /// TLS settings
    #[serde(default)]
    pub tls: TlsSettings,
    /// Simple bind performed before use
    #[serde(default)]
    pub bind_dn: Option<String>,
    #[serde(default)]
    pub bind_password: Option<String>,
    #[serde(default = "default_tcp_nodelay")]
    pub tcp_nodelay: bool,
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// TLS section of the configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TlsSettings {
    /// CA certificate (PEM); webpki roots when absent
    #[serde(default)]
    pub ca_cert: Option<PathBuf>,
    /// Client certificate and key (PEM) for mutual TLS
    #[serde(default)]
    pub client_cert: Option<PathBuf>,
    #[serde(default)]
    pub client_key: Option<PathBuf>,
    /// Allowed protocol versions, e.g. `["TLSv1.3"]`
    #[serde(default)]
    pub protocols: Vec<String>,
    /// Allowed cipher suites, e.g. `["TLS13_AES_256_GCM_SHA384"]`
    #[serde(default)]
    pub cipher_suites: Vec<String>,
    /// Skip certificate verification (testing only)
    #[serde(default)]
    pub insecure: bool,
}

fn default_connect_timeout() -> i64 { consts::DEFAULT_CONNECT_TIMEOUT as i64 }
fn default_tcp_nodelay() -> bool { true }
fn default_log_level() -> String { "INFO".to_string() }

fn millis(value: i64) -> Duration {
    if value <= 0 {
        Duration::ZERO
    } else {
        Duration::from_millis(value as u64)
    }
}

impl Default for LdapClientConfig {
    fn default() -> Self {
        Self {
            address: format!("127.0.0.1:{}", consts::LDAP_PORT),
            connect_timeout: default_connect_timeout(),
            request_timeout: 0,
            heartbeat_interval: 0,
            heartbeat_base_dn: String::new(),
            abandon_on_timeout: false,
            use_start_tls: false,
            use_ssl: false,
            tls: TlsSettings::default(),
            bind_dn: None,
            bind_password: None,
            tcp_nodelay: default_tcp_nodelay(),
            log_level: default_log_level(),
        }
    }
}

impl LdapClientConfig {
    /// Load from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| LdapError::param(format!("Failed to read config {}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| LdapError::param(format!("Invalid configuration: {}", e)))
    }

    pub fn connect_timeout_duration(&self) -> Duration {
        millis(self.connect_timeout)
    }

    pub fn request_timeout_duration(&self) -> Duration {
        millis(self.request_timeout)
    }

    pub fn heartbeat_interval_duration(&self) -> Duration {
        millis(self.heartbeat_interval)
    }

    pub fn log_level(&self) -> Result<LogLevel> {
        self.log_level.parse()
    }

    fn tls_client_config(&self) -> Result<tokio_rustls::rustls::ClientConfig> {
        let tls = &self.tls;
        if tls.insecure {
            return transport::create_insecure_client_config();
        }
        if let (Some(cert), Some(key)) = (&tls.client_cert, &tls.client_key) {
            let ca = tls
                .ca_cert
                .as_ref()
                .ok_or_else(|| LdapError::param("tls.ca_cert is required with a client certificate"))?;
            return transport::create_mtls_client_config(ca, cert, key);
        }
        if !tls.protocols.is_empty() || !tls.cipher_suites.is_empty() {
            return transport::create_client_config_with_suites(
                tls.ca_cert.as_deref(),
                &tls.protocols,
                &tls.cipher_suites,
            );
        }
        match &tls.ca_cert {
            Some(ca) => transport::create_client_config(ca),
            None => transport::create_client_config_with_webpki_roots(),
        }
    }

    /// Build connection options
    pub fn to_options(&self) -> Result<LdapOptions> {
        if self.use_ssl && self.use_start_tls {
            return Err(LdapError::param("use_ssl and use_start_tls are mutually exclusive"));
        }

        let mut heartbeat = SearchRequest::heartbeat();
        heartbeat.base_dn = self.heartbeat_base_dn.clone();

        let mut options = LdapOptions::default()
            .with_connect_timeout(self.connect_timeout_duration())
            .with_request_timeout(self.request_timeout_duration())
            .with_heartbeat_interval(self.heartbeat_interval_duration())
            .with_heartbeat_search(heartbeat)
            .with_abandon_on_timeout(self.abandon_on_timeout);
        options.tcp_nodelay = self.tcp_nodelay;

        if let Some(dn) = &self.bind_dn {
            let password = self.bind_password.clone().unwrap_or_default();
            options = options.with_bind_request(BindRequest::simple(dn.clone(), password));
        }

        if self.use_ssl || self.use_start_tls {
            let tls_config = Arc::new(self.tls_client_config()?);
            options = if self.use_start_tls {
                options.with_start_tls(tls_config)
            } else {
                options.with_ssl(tls_config)
            };
        }
        Ok(options)
    }
}
