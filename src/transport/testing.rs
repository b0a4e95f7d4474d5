//! In-memory transport for unit tests

use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_rustls::rustls::ClientConfig;

use crate::{LdapError, Result};
use crate::protocol::{LdapMessage, ProtocolOp, Request};
use super::{ClientProtocol, Connector, LdapOptions, Transport};

type Responder = Box<dyn Fn(&LdapMessage) -> Vec<LdapMessage> + Send + Sync>;

/// Records written messages and lets a test play the server
#[derive(Default)]
pub(crate) struct MockTransport {
    protocol: Mutex<Option<Weak<dyn ClientProtocol>>>,
    written: Mutex<Vec<LdapMessage>>,
    responder: Mutex<Option<Arc<Responder>>>,
    tls: AtomicBool,
    closed: AtomicBool,
    fail_writes: AtomicBool,
    fail_tls: AtomicBool,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Transport that answers every written message through `responder`
    pub fn with_responder<F>(responder: F) -> Arc<Self>
    where
        F: Fn(&LdapMessage) -> Vec<LdapMessage> + Send + Sync + 'static,
    {
        let transport = Self::default();
        *transport.responder.lock() = Some(Arc::new(Box::new(responder)));
        Arc::new(transport)
    }

    pub fn written(&self) -> Vec<LdapMessage> {
        self.written.lock().clone()
    }

    /// Written requests as (message id, request)
    pub fn requests(&self) -> Vec<(i32, Request)> {
        self.written
            .lock()
            .iter()
            .filter_map(|m| match &m.op {
                ProtocolOp::Request(r) => Some((m.message_id, r.clone())),
                _ => None,
            })
            .collect()
    }

    /// Id of the last written request of the given kind
    pub fn last_id(&self, name: &str) -> Option<i32> {
        self.requests()
            .into_iter()
            .rev()
            .find(|(_, r)| r.name() == name)
            .map(|(id, _)| id)
    }

    pub fn reply(&self, message: LdapMessage) {
        let frame = message.encode().unwrap();
        self.reply_raw(frame);
    }

    pub fn reply_raw(&self, frame: Vec<u8>) {
        if let Some(protocol) = self.protocol() {
            protocol.recv(frame);
        }
    }

    /// Simulate the socket dying
    pub fn drop_connection(&self, error: LdapError) {
        if let Some(protocol) = self.protocol() {
            protocol.transport_error(error);
        }
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_tls(&self, fail: bool) {
        self.fail_tls.store(fail, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn protocol(&self) -> Option<Arc<dyn ClientProtocol>> {
        self.protocol.lock().as_ref().and_then(Weak::upgrade)
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn start(&self, protocol: Weak<dyn ClientProtocol>) {
        *self.protocol.lock() = Some(protocol);
    }

    fn write(&self, frame: Vec<u8>) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) || self.is_closed() {
            return Err(LdapError::server_down("write failed"));
        }
        let message = LdapMessage::decode(&frame)?;
        self.written.lock().push(message.clone());

        let responder = self.responder.lock().clone();
        if let Some(responder) = responder {
            for reply in responder(&message) {
                self.reply(reply);
            }
        }
        Ok(())
    }

    async fn start_tls(&self, _config: Arc<ClientConfig>) -> Result<()> {
        if self.fail_tls.load(Ordering::SeqCst) {
            return Err(LdapError::server_down("TLS handshake failed"));
        }
        self.tls.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_tls_enabled(&self) -> bool {
        self.tls.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Connector handing out mock transports built by a closure
pub(crate) struct MockConnector {
    make: Box<dyn Fn() -> Arc<MockTransport> + Send + Sync>,
    pub transports: Mutex<Vec<Arc<MockTransport>>>,
    pub attempts: AtomicUsize,
    pub refuse: AtomicBool,
}

impl MockConnector {
    pub fn new<F>(make: F) -> Arc<Self>
    where
        F: Fn() -> Arc<MockTransport> + Send + Sync + 'static,
    {
        Arc::new(Self {
            make: Box::new(make),
            transports: Mutex::new(Vec::new()),
            attempts: AtomicUsize::new(0),
            refuse: AtomicBool::new(false),
        })
    }

    pub fn last(&self) -> Arc<MockTransport> {
        Arc::clone(self.transports.lock().last().unwrap())
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, address: &str, _options: &LdapOptions) -> Result<Arc<dyn Transport>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.refuse.load(Ordering::SeqCst) {
            return Err(LdapError::connect(format!("connect to {} refused", address)));
        }
        let transport = (self.make)();
        self.transports.lock().push(Arc::clone(&transport));
        Ok(transport)
    }
}
