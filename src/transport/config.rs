//! Connection options

use std::fmt;
use std::time::Duration;
use std::sync::Arc;
use tokio_rustls::rustls;

use crate::consts;
use crate::protocol::{BindRequest, SearchRequest};

/// Options shared by a connection factory and every connection it creates
#[derive(Clone)]
pub struct LdapOptions {
    /// Socket connect timeout, also bounds the initial liveness probe
    pub connect_timeout: Duration,
    /// Per-operation timeout; zero disables client-side timeouts
    pub request_timeout: Duration,
    /// Heartbeat interval; zero disables heartbeats
    pub heartbeat_interval: Duration,
    /// No-op search used for heartbeats and as the default liveness probe
    pub heartbeat_search: SearchRequest,
    /// Bind performed before the connection is handed out
    pub bind_request: Option<BindRequest>,
    /// Upgrade with StartTLS before the connection is handed out
    pub use_start_tls: bool,
    /// TLS configuration (LDAPS when `use_start_tls` is false)
    pub tls_config: Option<Arc<rustls::ClientConfig>>,
    /// Send an Abandon for ordinary operations that time out
    pub abandon_on_timeout: bool,
    /// Disable Nagle's algorithm on the socket
    pub tcp_nodelay: bool,
}

impl Default for LdapOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(consts::DEFAULT_CONNECT_TIMEOUT),
            request_timeout: Duration::from_millis(consts::DEFAULT_REQUEST_TIMEOUT),
            heartbeat_interval: Duration::from_millis(consts::DEFAULT_HEARTBEAT_INTERVAL),
            heartbeat_search: SearchRequest::heartbeat(),
            bind_request: None,
            use_start_tls: false,
            tls_config: None,
            abandon_on_timeout: false,
            tcp_nodelay: true,
        }
    }
}

impl fmt::Debug for LdapOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LdapOptions")
            .field("connect_timeout", &self.connect_timeout)
            .field("request_timeout", &self.request_timeout)
            .field("heartbeat_interval", &self.heartbeat_interval)
            .field("bind_dn", &self.bind_request.as_ref().map(|b| b.name.as_str()))
            .field("use_start_tls", &self.use_start_tls)
            .field("tls", &self.tls_config.is_some())
            .field("abandon_on_timeout", &self.abandon_on_timeout)
            .finish()
    }
}

impl LdapOptions {
    /// Set connect timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set request timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set heartbeat interval
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Set heartbeat search
    pub fn with_heartbeat_search(mut self, request: SearchRequest) -> Self {
        self.heartbeat_search = request;
        self
    }

    /// Set bind request
    pub fn with_bind_request(mut self, request: BindRequest) -> Self {
        self.bind_request = Some(request);
        self
    }

    /// Use StartTLS with the given TLS configuration
    pub fn with_start_tls(mut self, tls_config: Arc<rustls::ClientConfig>) -> Self {
        self.use_start_tls = true;
        self.tls_config = Some(tls_config);
        self
    }

    /// Connect with TLS from the first byte (LDAPS)
    pub fn with_ssl(mut self, tls_config: Arc<rustls::ClientConfig>) -> Self {
        self.use_start_tls = false;
        self.tls_config = Some(tls_config);
        self
    }

    /// Abandon operations that time out
    pub fn with_abandon_on_timeout(mut self, abandon: bool) -> Self {
        self.abandon_on_timeout = abandon;
        self
    }

    pub fn is_heartbeat_enabled(&self) -> bool {
        !self.heartbeat_interval.is_zero()
    }

    pub fn is_timeout_enabled(&self) -> bool {
        !self.request_timeout.is_zero()
    }

    /// Check if the socket is TLS from the start
    pub fn is_ssl(&self) -> bool {
        self.tls_config.is_some() && !self.use_start_tls
    }

    /// Minimum idle time before a heartbeat is sent
    pub fn minimum_idle_delay(&self) -> Duration {
        self.heartbeat_interval / 2
    }

    /// How long an unanswered heartbeat may stay outstanding.
    ///
    /// Falls back to the connect timeout, then to the heartbeat interval when
    /// both timeouts are disabled.
    pub fn heartbeat_timeout(&self) -> Duration {
        if self.is_timeout_enabled() {
            self.request_timeout
        } else if !self.connect_timeout.is_zero() {
            self.connect_timeout
        } else {
            self.heartbeat_interval
        }
    }
}
