//! LDAP socket transport
//!
//! A single I/O task owns the stream. Writes, the StartTLS upgrade and
//! close requests reach it through a command channel, so the upgrade is
//! ordered after every frame queued before it.

use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicBool, Ordering};
use std::io;
use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::ClientConfig;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::{consts, LdapError, Result};
use crate::codec::PackageStatus;
use super::{ClientProtocol, LdapOptions, Transport};
use super::tls::{create_tls_connector, parse_server_name};

/// Command for the I/O task
enum Command {
    Write(Vec<u8>),
    StartTls {
        config: Arc<ClientConfig>,
        ack: oneshot::Sender<Result<()>>,
    },
    Close,
}

/// Stream owned by the I/O task
enum LdapStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
    Closed,
}

impl LdapStream {
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            LdapStream::Plain(s) => s.read(buf).await,
            LdapStream::Tls(s) => s.read(buf).await,
            LdapStream::Closed => std::future::pending().await,
        }
    }

    async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        match self {
            LdapStream::Plain(s) => s.write_all(data).await,
            LdapStream::Tls(s) => {
                s.write_all(data).await?;
                s.flush().await
            }
            LdapStream::Closed => Err(io::Error::new(io::ErrorKind::NotConnected, "stream closed")),
        }
    }

    async fn shutdown(&mut self) {
        let result = match self {
            LdapStream::Plain(s) => s.shutdown().await,
            LdapStream::Tls(s) => s.shutdown().await,
            LdapStream::Closed => Ok(()),
        };
        if let Err(e) = result {
            debug!("Shutdown error: {}", e);
        }
    }

    /// Replace a plain stream with a TLS stream over the same socket
    async fn upgrade(&mut self, address: &str, config: Arc<ClientConfig>) -> Result<()> {
        let tcp = match std::mem::replace(self, LdapStream::Closed) {
            LdapStream::Plain(tcp) => tcp,
            other => {
                *self = other;
                return Err(LdapError::operations("This connection is already TLS enabled"));
            }
        };
        let server_name = parse_server_name(address)?;
        let connector = create_tls_connector(config);
        let tls = connector
            .connect(server_name, tcp)
            .await
            .map_err(|e| LdapError::server_down(format!("TLS handshake failed: {}", e)).with_cause(e))?;
        *self = LdapStream::Tls(Box::new(tls));
        Ok(())
    }
}

/// TCP/TLS transport for one LDAP connection
pub struct LdapTransport {
    /// Remote address
    address: String,
    /// Command channel to the I/O task
    commands: mpsc::UnboundedSender<Command>,
    /// Stream and receiver until `start` hands them to the I/O task
    idle: Mutex<Option<(LdapStream, mpsc::UnboundedReceiver<Command>)>>,
    tls: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
}

impl LdapTransport {
    /// Open a socket to `address`, with TLS when the options ask for LDAPS
    pub async fn connect(address: &str, options: &LdapOptions) -> Result<Arc<Self>> {
        let tcp = tokio::time::timeout(options.connect_timeout, TcpStream::connect(address))
            .await
            .map_err(|_| {
                LdapError::connect(format!(
                    "connect to {} timed out after {} ms",
                    address,
                    options.connect_timeout.as_millis()
                ))
            })?
            .map_err(|e| LdapError::connect(format!("connect to {} failed: {}", address, e)).with_cause(e))?;

        if options.tcp_nodelay {
            tcp.set_nodelay(true)?;
        }

        let stream = match options.tls_config.as_ref().filter(|_| options.is_ssl()) {
            Some(tls_config) => {
                let server_name = parse_server_name(address)?;
                let connector = create_tls_connector(Arc::clone(tls_config));

                info!("Establishing TLS connection to {}", address);

                let tls = tokio::time::timeout(options.connect_timeout, connector.connect(server_name, tcp))
                    .await
                    .map_err(|_| LdapError::connect(format!("TLS handshake with {} timed out", address)))?
                    .map_err(|e| {
                        LdapError::connect(format!("TLS handshake with {} failed: {}", address, e)).with_cause(e)
                    })?;
                LdapStream::Tls(Box::new(tls))
            }
            None => LdapStream::Plain(tcp),
        };

        debug!("Connected to {}", address);
        Ok(Self::from_stream(address, stream))
    }

    fn from_stream(address: &str, stream: LdapStream) -> Arc<Self> {
        let tls = matches!(stream, LdapStream::Tls(_));
        let (commands, receiver) = mpsc::unbounded_channel();
        Arc::new(Self {
            address: address.to_string(),
            commands,
            idle: Mutex::new(Some((stream, receiver))),
            tls: Arc::new(AtomicBool::new(tls)),
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Remote address
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Check if transport is closed
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for LdapTransport {
    fn start(&self, protocol: Weak<dyn ClientProtocol>) {
        let Some((stream, receiver)) = self.idle.lock().take() else {
            warn!("Transport to {} already started", self.address);
            return;
        };
        let address = self.address.clone();
        let tls = Arc::clone(&self.tls);
        let closed = Arc::clone(&self.closed);
        tokio::spawn(async move {
            io_loop(address, stream, receiver, protocol, tls).await;
            closed.store(true, Ordering::SeqCst);
        });
    }

    fn write(&self, frame: Vec<u8>) -> Result<()> {
        if self.is_closed() {
            return Err(LdapError::server_down("Connection closed"));
        }
        self.commands
            .send(Command::Write(frame))
            .map_err(|_| LdapError::server_down("Connection closed"))
    }

    async fn start_tls(&self, config: Arc<ClientConfig>) -> Result<()> {
        let (ack, done) = oneshot::channel();
        self.commands
            .send(Command::StartTls { config, ack })
            .map_err(|_| LdapError::server_down("Connection closed"))?;
        done.await
            .map_err(|_| LdapError::server_down("Connection closed during TLS handshake"))?
    }

    fn is_tls_enabled(&self) -> bool {
        self.tls.load(Ordering::SeqCst)
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!("Closing transport to {}", self.address);
            let _ = self.commands.send(Command::Close);
            // Never started: drop the socket here
            self.idle.lock().take();
        }
    }
}

/// Hand every complete package in `accumulated` to the protocol
fn deliver(accumulated: &mut Vec<u8>, protocol: &dyn ClientProtocol) -> Result<()> {
    loop {
        let (pkg_len, status) = protocol.parse_package(accumulated);
        match status {
            PackageStatus::Full => {
                let pkg: Vec<u8> = accumulated.drain(..pkg_len).collect();
                protocol.recv(pkg);
            }
            PackageStatus::Less => return Ok(()),
            PackageStatus::Error => {
                error!("Package parse error");
                return Err(LdapError::decoding("Malformed LDAP message received from server"));
            }
        }
    }
}

async fn io_loop(
    address: String,
    mut stream: LdapStream,
    mut commands: mpsc::UnboundedReceiver<Command>,
    protocol: Weak<dyn ClientProtocol>,
    tls: Arc<AtomicBool>,
) {
    let mut buffer = vec![0u8; consts::READ_BUFFER_SIZE];
    let mut accumulated = Vec::new();

    let failure = loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Write(data)) => {
                    if let Err(e) = stream.write_all(&data).await {
                        error!("Write error on {}: {}", address, e);
                        break Some(LdapError::from(e));
                    }
                }
                Some(Command::StartTls { config, ack }) => {
                    match stream.upgrade(&address, config).await {
                        Ok(()) => {
                            tls.store(true, Ordering::SeqCst);
                            info!("TLS installed on connection to {}", address);
                            let _ = ack.send(Ok(()));
                        }
                        Err(e) => {
                            let _ = ack.send(Err(e.clone()));
                            break Some(e);
                        }
                    }
                }
                Some(Command::Close) | None => break None,
            },
            read = stream.read(&mut buffer) => match read {
                Ok(0) => {
                    debug!("Connection to {} closed by peer", address);
                    break Some(LdapError::server_down("Connection closed by server"));
                }
                Ok(n) => {
                    accumulated.extend_from_slice(&buffer[..n]);
                    let Some(protocol) = protocol.upgrade() else {
                        break None;
                    };
                    if let Err(e) = deliver(&mut accumulated, protocol.as_ref()) {
                        break Some(e);
                    }
                }
                Err(e) => {
                    error!("Read error on {}: {}", address, e);
                    break Some(LdapError::from(e));
                }
            }
        }
    };

    stream.shutdown().await;
    if let Some(error) = failure {
        if let Some(protocol) = protocol.upgrade() {
            protocol.transport_error(error);
        }
    }
    debug!("I/O task for {} finished", address);
}
