//! # Factory Module
//!
//! Opens connections and hands them out only after an initial request has
//! proved the server usable. Every connection from one factory shares the
//! factory's scheduler, which also drives heartbeats.
//!
//! The initial request is the first of:
//!
//! - StartTLS, when `use_start_tls` is set (followed by the bind, if any)
//! - Bind, when a bind request is configured
//! - the heartbeat search, when heartbeats are enabled
//!
//! It must complete within the connect timeout.

mod heartbeat;

pub(crate) use heartbeat::HeartbeatRegistry;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

use crate::{LdapError, Result};
use crate::connection::{ConnectionStatus, LdapConnection};
use crate::scheduler::{Lease, Scheduler};
use crate::transport::{Connector, LdapOptions, TcpConnector, Transport};
use crate::util::config::LdapClientConfig;

/// Creates connections to one server with one set of options
#[derive(Clone)]
pub struct LdapConnectionFactory {
    inner: Arc<FactoryInner>,
}

struct FactoryInner {
    address: String,
    options: LdapOptions,
    connector: Arc<dyn Connector>,
    scheduler: Scheduler,
    /// The factory's own reference on the scheduler
    lease: Lease,
    heartbeat: Option<Arc<HeartbeatRegistry>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for LdapConnectionFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LdapConnectionFactory")
            .field("address", &self.inner.address)
            .field("options", &self.inner.options)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl LdapConnectionFactory {
    /// Factory connecting over TCP, or TLS when the options ask for LDAPS
    pub fn new(address: impl Into<String>, options: LdapOptions) -> Self {
        Self::with_connector(address, options, Arc::new(TcpConnector))
    }

    pub fn with_connector(address: impl Into<String>, options: LdapOptions, connector: Arc<dyn Connector>) -> Self {
        let scheduler = Scheduler::new();
        let lease = scheduler.acquire();
        let heartbeat = options
            .is_heartbeat_enabled()
            .then(|| HeartbeatRegistry::new(scheduler.clone(), &options));
        Self {
            inner: Arc::new(FactoryInner {
                address: address.into(),
                options,
                connector,
                scheduler,
                lease,
                heartbeat,
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn from_config(config: &LdapClientConfig) -> Result<Self> {
        Ok(Self::new(config.address.clone(), config.to_options()?))
    }

    pub fn address(&self) -> &str {
        &self.inner.address
    }

    pub fn options(&self) -> &LdapOptions {
        &self.inner.options
    }

    /// Scheduler shared with every connection from this factory
    pub fn scheduler(&self) -> &Scheduler {
        &self.inner.scheduler
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Stop handing out connections. Open connections keep working and keep
    /// the scheduler alive until they are closed.
    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::SeqCst) {
            info!("Connection factory for {} closed", self.inner.address);
            self.inner.lease.release();
        }
    }

    /// Open a connection and run the initial request on it
    pub async fn get_connection(&self) -> Result<LdapConnection> {
        if self.is_closed() {
            return Err(LdapError::connect("Connection factory is closed"));
        }
        let options = &self.inner.options;

        // Dropped on every early return, so the reference goes back exactly once
        let lease = self.inner.scheduler.acquire();
        let transport = self.open_transport().await?;
        let connection = LdapConnection::create(transport, options.clone(), lease, self.inner.heartbeat.clone());
        debug!("Connection {} opened to {}", connection.id(), self.inner.address);

        let initial = self.initial_request(&connection).await.and_then(|()| match connection.state() {
            ConnectionStatus::Invalid(e) => Err(e),
            ConnectionStatus::Closed => Err(LdapError::server_down("Connection closed during the initial request")),
            ConnectionStatus::Open => Ok(()),
        });
        if let Err(e) = initial {
            warn!("Initial request on connection {} failed: {}", connection.id(), e);
            connection.close();
            return Err(e);
        }

        if let Some(registry) = &self.inner.heartbeat {
            registry.register(&connection);
        }
        info!("Connection {} to {} ready", connection.id(), self.inner.address);
        Ok(connection)
    }

    async fn open_transport(&self) -> Result<Arc<dyn Transport>> {
        let address = &self.inner.address;
        let timeout = self.inner.options.connect_timeout;
        let connect = self.inner.connector.connect(address, &self.inner.options);
        if timeout.is_zero() {
            return connect.await;
        }
        tokio::time::timeout(timeout, connect).await.map_err(|_| {
            LdapError::connect(format!("Timed out connecting to {} after {} ms", address, timeout.as_millis()))
        })?
    }

    async fn initial_request(&self, connection: &LdapConnection) -> Result<()> {
        let options = &self.inner.options;
        let probe = async {
            let mut probed = false;
            if options.use_start_tls {
                connection.start_tls().await?;
                probed = true;
            }
            if let Some(bind) = &options.bind_request {
                connection.bind(bind.clone()).await?;
                probed = true;
            }
            if !probed && options.is_heartbeat_enabled() {
                match connection.search_async(options.heartbeat_search.clone(), None).await {
                    Ok(_) => {}
                    // An error result from the server shows it is alive
                    Err(e) if e.result().is_some() && !e.code().is_client_side() => {
                        debug!("Connection {}: initial search returned {}", connection.id(), e.code());
                    }
                    Err(e) => return Err(e),
                }
            }
            Ok::<(), LdapError>(())
        };

        let timeout = options.connect_timeout;
        if timeout.is_zero() {
            return probe.await;
        }
        tokio::time::timeout(timeout, probe).await.unwrap_or_else(|_| {
            Err(LdapError::connect(format!(
                "The initial request to {} timed out after {} ms",
                self.inner.address,
                timeout.as_millis()
            )))
        })
    }

    #[cfg(test)]
    fn heartbeat_registry(&self) -> Option<&Arc<HeartbeatRegistry>> {
        self.inner.heartbeat.as_ref()
    }
}
