//! # Connection Module
//!
//! One LDAP connection multiplexing many operations.
//!
//! ## Components
//!
//! - **LdapConnection**: per-operation async surface, response routing, close
//! - **Gate**: keeps Bind/StartTLS apart from heartbeat probes
//! - **PendingOperation / LdapFuture**: in-flight requests and their results
//! - **ConnectionState**: open/closed/invalid and listener notification
//!
//! ## Bind and StartTLS
//!
//! Bind and StartTLS hold the gate shared while in flight and heartbeat
//! probes hold it exclusively, so neither can overlap the other. A Bind or
//! StartTLS that finds a probe outstanding is queued on the gate and sent
//! when the probe completes. Ordinary operations do not touch the gate;
//! they are refused while a Bind or StartTLS is in progress.

mod gate;
mod pending;
mod state;

pub use gate::{Gate, GateState};
pub use pending::{IntermediateResponseHandler, LdapFuture, OperationKind, SearchResultHandler, SearchResults};
pub use state::{ConnectionEventListener, ConnectionStatus};

use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::{codec, LdapError, Result};
use crate::factory::HeartbeatRegistry;
use crate::protocol::{
    AbandonRequest, AddRequest, BindRequest, BindResult, CompareRequest, CompareResult, DeleteRequest,
    ExtendedRequest, ExtendedResult, LdapProtocol, LdapResult, ModifyDnRequest, ModifyRequest, Protocol,
    ProtocolOp, Request, SearchRequest, UnbindRequest,
};
use crate::scheduler::{Lease, Scheduler, ScheduledTask};
use crate::transport::{ClientProtocol, LdapOptions, Transport};
use crate::util::MessageIdGenerator;
use pending::{Completer, PendingOperation, SearchCollector};
use state::ConnectionState;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

const BIND_IN_PROGRESS: &str = "Bind or Start TLS operation in progress";

/// Handle to an LDAP connection; clones share the connection
#[derive(Clone)]
pub struct LdapConnection {
    inner: Arc<ConnectionInner>,
}

pub(crate) struct ConnectionInner {
    id: u64,
    me: Weak<ConnectionInner>,
    options: LdapOptions,
    transport: Arc<dyn Transport>,
    protocol: LdapProtocol,
    ids: MessageIdGenerator,
    pending: DashMap<i32, Arc<PendingOperation>>,
    gate: Gate,
    /// Guards `bind_or_start_tls_in_progress` transitions and abandon lookups
    privileged_lock: Mutex<()>,
    bind_or_start_tls_in_progress: AtomicBool,
    state: ConnectionState,
    /// Time any message was last received
    last_response: Mutex<Instant>,
    lease: Lease,
    heartbeat: Option<Arc<HeartbeatRegistry>>,
    sweeper: Mutex<Option<ScheduledTask>>,
}

impl std::fmt::Debug for LdapConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LdapConnection")
            .field("id", &self.inner.id)
            .field("status", &self.inner.state.status())
            .field("pending", &self.inner.pending.len())
            .finish()
    }
}

impl LdapConnection {
    /// Wrap a connected transport with a private scheduler
    pub fn from_transport(transport: Arc<dyn Transport>, options: LdapOptions) -> Self {
        let lease = Scheduler::new().acquire();
        Self::create(transport, options, lease, None)
    }

    pub(crate) fn create(
        transport: Arc<dyn Transport>,
        options: LdapOptions,
        lease: Lease,
        heartbeat: Option<Arc<HeartbeatRegistry>>,
    ) -> Self {
        let inner = Arc::new_cyclic(|me| ConnectionInner {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            me: me.clone(),
            options,
            transport,
            protocol: LdapProtocol::new(),
            ids: MessageIdGenerator::new(),
            pending: DashMap::new(),
            gate: Gate::new(),
            privileged_lock: Mutex::new(()),
            bind_or_start_tls_in_progress: AtomicBool::new(false),
            state: ConnectionState::new(),
            last_response: Mutex::new(Instant::now()),
            lease,
            heartbeat,
            sweeper: Mutex::new(None),
        });

        let weak = Arc::downgrade(&inner);
        let protocol: Weak<dyn ClientProtocol> = weak;
        inner.transport.start(protocol);
        inner.start_sweeper();
        debug!("Connection {} created", inner.id);
        Self { inner }
    }

    pub(crate) fn inner(&self) -> &Arc<ConnectionInner> {
        &self.inner
    }

    /// Process-unique connection id used in log lines
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn options(&self) -> &LdapOptions {
        &self.inner.options
    }

    pub fn state(&self) -> ConnectionStatus {
        self.inner.state.status()
    }

    pub fn is_valid(&self) -> bool {
        self.inner.state.is_valid()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.is_closed()
    }

    pub fn is_tls_enabled(&self) -> bool {
        self.inner.transport.is_tls_enabled()
    }

    /// Number of operations awaiting a response
    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    pub fn add_listener(&self, listener: Arc<dyn ConnectionEventListener>) {
        self.inner.state.add_listener(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn ConnectionEventListener>) {
        self.inner.state.remove_listener(listener);
    }

    pub fn add_async(&self, request: AddRequest) -> LdapFuture<LdapResult> {
        self.inner.submit_result(Request::Add(request), OperationKind::Add, None, None)
    }

    pub async fn add(&self, request: AddRequest) -> Result<LdapResult> {
        self.add_async(request).await
    }

    pub fn delete_async(&self, request: DeleteRequest) -> LdapFuture<LdapResult> {
        self.inner.submit_result(Request::Delete(request), OperationKind::Delete, None, None)
    }

    pub async fn delete(&self, request: DeleteRequest) -> Result<LdapResult> {
        self.delete_async(request).await
    }

    pub fn modify_async(&self, request: ModifyRequest) -> LdapFuture<LdapResult> {
        self.inner.submit_result(Request::Modify(request), OperationKind::Modify, None, None)
    }

    pub async fn modify(&self, request: ModifyRequest) -> Result<LdapResult> {
        self.modify_async(request).await
    }

    pub fn modify_dn_async(&self, request: ModifyDnRequest) -> LdapFuture<LdapResult> {
        self.inner.submit_result(Request::ModifyDn(request), OperationKind::ModifyDn, None, None)
    }

    pub async fn modify_dn(&self, request: ModifyDnRequest) -> Result<LdapResult> {
        self.modify_dn_async(request).await
    }

    /// `compareTrue` and `compareFalse` both succeed; see [`CompareResult::matched`]
    pub fn compare_async(&self, request: CompareRequest) -> LdapFuture<CompareResult> {
        let (tx, rx) = oneshot::channel();
        self.inner
            .submit_ordinary(Request::Compare(request), OperationKind::Compare, Completer::Compare(tx), None, None)
            .map_or_else(LdapFuture::failed, |id| self.inner.future(id, rx))
    }

    pub async fn compare(&self, request: CompareRequest) -> Result<CompareResult> {
        self.compare_async(request).await
    }

    /// Entries and references go to `handler` as they arrive; the future
    /// resolves with the final result
    pub fn search_async(
        &self,
        request: SearchRequest,
        handler: Option<Arc<dyn SearchResultHandler>>,
    ) -> LdapFuture<LdapResult> {
        self.inner.submit_result(Request::Search(request), OperationKind::Search, handler, None)
    }

    /// Search and collect every entry and reference
    pub async fn search(&self, request: SearchRequest) -> Result<SearchResults> {
        let collector = Arc::new(SearchCollector::default());
        let handler: Arc<dyn SearchResultHandler> = collector.clone();
        let result = self.search_async(request, Some(handler)).await?;
        Ok(collector.finish(result))
    }

    pub fn extended_async(
        &self,
        request: ExtendedRequest,
        handler: Option<Arc<dyn IntermediateResponseHandler>>,
    ) -> LdapFuture<ExtendedResult> {
        if request.is_start_tls() {
            return LdapFuture::failed(LdapError::param("Use start_tls to send a StartTLS request"));
        }
        let (tx, rx) = oneshot::channel();
        self.inner
            .submit_ordinary(Request::Extended(request), OperationKind::Extended, Completer::Extended(tx), None, handler)
            .map_or_else(LdapFuture::failed, |id| self.inner.future(id, rx))
    }

    pub async fn extended(&self, request: ExtendedRequest) -> Result<ExtendedResult> {
        self.extended_async(request, None).await
    }

    /// Bind; refused while other operations are pending
    pub fn bind_async(&self, request: BindRequest) -> LdapFuture<BindResult> {
        let (tx, rx) = oneshot::channel();
        let id = self.inner.submit_privileged(Request::Bind(request), OperationKind::Bind, Completer::Bind(tx));
        LdapFuture::new(id.unwrap_or(-1), rx, self.inner.me.clone(), false)
    }

    pub async fn bind(&self, request: BindRequest) -> Result<BindResult> {
        self.bind_async(request).await
    }

    /// StartTLS; TLS is installed on the transport before the future resolves
    pub fn start_tls_async(&self) -> LdapFuture<ExtendedResult> {
        let (tx, rx) = oneshot::channel();
        let id = self.inner.submit_privileged(
            Request::Extended(ExtendedRequest::start_tls()),
            OperationKind::StartTls,
            Completer::Extended(tx),
        );
        LdapFuture::new(id.unwrap_or(-1), rx, self.inner.me.clone(), false)
    }

    pub async fn start_tls(&self) -> Result<ExtendedResult> {
        self.start_tls_async().await
    }

    /// Cancel the operation `request.message_id` and send an Abandon.
    /// An operation that already completed is not an error.
    pub fn abandon(&self, request: AbandonRequest) -> Result<()> {
        self.inner.abandon_request(request).map(drop)
    }

    /// Unbind and close. Pending operations fail as cancelled. Idempotent.
    pub fn close(&self) {
        self.inner.close();
    }
}

impl ConnectionInner {
    fn future<T>(&self, message_id: i32, receiver: oneshot::Receiver<Result<T>>) -> LdapFuture<T> {
        LdapFuture::new(message_id, receiver, self.me.clone(), true)
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn is_valid(&self) -> bool {
        self.state.is_valid()
    }

    fn submit_result(
        &self,
        request: Request,
        kind: OperationKind,
        search_handler: Option<Arc<dyn SearchResultHandler>>,
        intermediate_handler: Option<Arc<dyn IntermediateResponseHandler>>,
    ) -> LdapFuture<LdapResult> {
        let (tx, rx) = oneshot::channel();
        self.submit_ordinary(request, kind, Completer::Result(tx), search_handler, intermediate_handler)
            .map_or_else(LdapFuture::failed, |id| self.future(id, rx))
    }

    /// Register and send an ordinary request.
    ///
    /// `Err` means nothing was registered; afterwards every failure is
    /// delivered through the completer.
    fn submit_ordinary(
        &self,
        request: Request,
        kind: OperationKind,
        completer: Completer,
        search_handler: Option<Arc<dyn SearchResultHandler>>,
        intermediate_handler: Option<Arc<dyn IntermediateResponseHandler>>,
    ) -> Result<i32> {
        self.state.check_valid()?;
        if self.bind_or_start_tls_in_progress.load(Ordering::SeqCst) {
            return Err(LdapError::operations(BIND_IN_PROGRESS));
        }

        let message_id = self.ids.next_id();
        let op = Arc::new(
            PendingOperation::new(message_id, kind, request.is_timeout_eligible(), completer)
                .with_search_handler(search_handler)
                .with_intermediate_handler(intermediate_handler),
        );
        self.add_pending(Arc::clone(&op));

        // close() may have run since the first check
        if let Err(e) = self.state.check_valid() {
            if self.pending.remove(&message_id).is_some() {
                self.resolve(&op, Err(e));
            }
            return Ok(message_id);
        }

        self.send(&op, &request);
        Ok(message_id)
    }

    /// Bind or StartTLS: take the gate shared now, or queue until a probe finishes
    fn submit_privileged(&self, request: Request, kind: OperationKind, completer: Completer) -> Option<i32> {
        if self.gate.try_acquire_shared() {
            return self.send_privileged(request, kind, completer);
        }

        debug!("Connection {}: {} waits for heartbeat", self.id, kind.name());
        let me = self.me.clone();
        self.gate.defer(Box::new(move || match me.upgrade() {
            Some(inner) if inner.gate.try_acquire_shared() => {
                inner.send_privileged(request, kind, completer);
            }
            Some(_) => completer.fail(LdapError::operations(BIND_IN_PROGRESS)),
            None => completer.fail(LdapError::cancelled("Connection dropped")),
        }));
        None
    }

    /// Called holding one shared count on the gate, which the operation keeps
    fn send_privileged(&self, request: Request, kind: OperationKind, completer: Completer) -> Option<i32> {
        let refuse = |error: LdapError, completer: Completer| {
            self.gate.release_shared();
            self.gate.flush();
            completer.fail(error);
            None
        };

        if let Err(e) = self.state.check_valid() {
            return refuse(e, completer);
        }
        if kind == OperationKind::StartTls {
            if self.transport.is_tls_enabled() {
                return refuse(LdapError::operations("This connection is already TLS enabled"), completer);
            }
            if self.options.tls_config.is_none() {
                return refuse(LdapError::param("StartTLS requires a TLS client configuration"), completer);
            }
        }

        let op = {
            let _guard = self.privileged_lock.lock();
            if !self.pending.is_empty() {
                drop(_guard);
                return refuse(
                    LdapError::operations("There are other operations pending on this connection"),
                    completer,
                );
            }
            if self
                .bind_or_start_tls_in_progress
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                drop(_guard);
                return refuse(LdapError::operations(BIND_IN_PROGRESS), completer);
            }
            let op = Arc::new(PendingOperation::new(self.ids.next_id(), kind, true, completer));
            self.add_pending(Arc::clone(&op));
            op
        };

        if let Err(e) = self.state.check_valid() {
            if self.pending.remove(&op.message_id).is_some() {
                self.resolve(&op, Err(e));
            }
            return Some(op.message_id);
        }

        self.send(&op, &request);
        Some(op.message_id)
    }

    /// # Panics
    /// If the message id is already in flight.
    fn add_pending(&self, op: Arc<PendingOperation>) {
        let message_id = op.message_id;
        let previous = self.pending.insert(message_id, op);
        assert!(previous.is_none(), "message id {} registered twice", message_id);
    }

    /// Encode and write a registered request
    fn send(&self, op: &Arc<PendingOperation>, request: &Request) {
        let frame = match self.protocol.request_pack(op.message_id, request) {
            Ok(frame) => frame,
            Err(e) => {
                let error = LdapError::encoding(format!("Unable to encode {} request: {}", request.name(), e.message()));
                if self.pending.remove(&op.message_id).is_some() {
                    self.resolve(op, Err(error.clone()));
                }
                self.invalidate(false, error);
                return;
            }
        };

        debug!("Connection {}: sending {} request {}", self.id, request.name(), op.message_id);
        // No locks held here: a transport may deliver the response before returning
        if let Err(error) = self.transport.write(frame) {
            if self.pending.remove(&op.message_id).is_some() {
                self.resolve(op, Err(error.clone()));
            }
            self.invalidate(false, error);
        }
    }

    /// Every completion goes through here so the gate and the in-progress
    /// flag are released exactly once
    fn resolve(&self, op: &PendingOperation, outcome: Result<ProtocolOp>) {
        let completed = match outcome {
            Ok(response) => op.complete(response),
            Err(error) => op.fail(error),
        };
        if !completed {
            return;
        }

        if op.is_bind_or_start_tls() {
            {
                let _guard = self.privileged_lock.lock();
                self.bind_or_start_tls_in_progress.store(false, Ordering::SeqCst);
            }
            self.gate.release_shared();
            self.gate.flush();
        } else if op.is_heartbeat() {
            debug!("Connection {}: heartbeat {} completed", self.id, op.message_id);
            self.gate.release_exclusive();
            self.gate.flush();
        }
    }

    /// Remove and cancel the target, then send an Abandon.
    /// Returns whether the target was still pending.
    pub(crate) fn abandon_request(&self, request: AbandonRequest) -> Result<bool> {
        self.state.check_valid()?;
        let target = {
            let _guard = self.privileged_lock.lock();
            // Bind and StartTLS are only pending while the flag is set,
            // so they can never be the target here
            if self.bind_or_start_tls_in_progress.load(Ordering::SeqCst) {
                return Err(LdapError::operations(BIND_IN_PROGRESS));
            }
            self.pending.remove(&request.message_id).map(|(_, op)| op)
        };

        let Some(op) = target else {
            debug!("Connection {}: abandon of {} ignored, not pending", self.id, request.message_id);
            return Ok(false);
        };
        self.resolve(&op, Err(LdapError::cancelled("Request cancelled by client")));
        self.write_unregistered(Request::Abandon(request))?;
        Ok(true)
    }

    /// Write a request that gets no response
    fn write_unregistered(&self, request: Request) -> Result<()> {
        let message_id = self.ids.next_id();
        let frame = self.protocol.request_pack(message_id, &request).map_err(|e| {
            let error = LdapError::encoding(format!("Unable to encode {} request: {}", request.name(), e.message()));
            self.invalidate(false, error.clone());
            error
        })?;
        self.transport.write(frame).map_err(|error| {
            self.invalidate(false, error.clone());
            error
        })
    }

    /// Fail the connection and everything pending on it. Only the first call has an effect.
    pub(crate) fn invalidate(&self, is_disconnect_notification: bool, error: LdapError) {
        if !self.state.set_error(is_disconnect_notification, error.clone()) {
            return;
        }
        warn!("Connection {} invalidated: {}", self.id, error);
        self.shutdown(error);
    }

    fn shutdown(&self, error: LdapError) {
        if let Some(registry) = &self.heartbeat {
            registry.deregister(self.id);
        }
        if let Some(sweeper) = self.sweeper.lock().take() {
            sweeper.cancel();
        }
        self.fail_all(error);
        self.transport.close();
    }

    /// Fail every pending operation with the same error
    fn fail_all(&self, error: LdapError) {
        let ids: Vec<i32> = self.pending.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, op)) = self.pending.remove(&id) {
                self.resolve(&op, Err(error.clone()));
            }
        }
    }

    fn close(&self) {
        let was_valid = self.state.is_valid();
        if !self.state.set_closed(LdapError::cancelled("Connection closed by client")) {
            return;
        }
        info!("Connection {} closed", self.id);
        if was_valid {
            // Best effort; the server may already be gone
            if let Err(e) = self.write_unregistered(Request::Unbind(UnbindRequest::default())) {
                debug!("Connection {}: unbind not sent: {}", self.id, e);
            }
            self.shutdown(LdapError::cancelled("Connection closed by client"));
        }
        self.transport.close();
        self.lease.release();
    }

    /// Timeout sweeper entry point; returns the delay until the next sweep
    pub(crate) fn handle_timeout(&self, now: Instant) -> Duration {
        let timeout = self.options.request_timeout;
        if timeout.is_zero() {
            return Duration::ZERO;
        }

        let mut delay = timeout;
        let snapshot: Vec<Arc<PendingOperation>> =
            self.pending.iter().map(|entry| Arc::clone(entry.value())).collect();
        for op in snapshot {
            if !op.is_timeout_eligible() || op.is_heartbeat() {
                continue;
            }
            let elapsed = now.saturating_duration_since(op.last_activity());
            if elapsed < timeout {
                delay = delay.min(timeout - elapsed);
                continue;
            }

            let error = LdapError::timeout(format!(
                "The {} request {} timed out after {} ms",
                op.kind.name(),
                op.message_id,
                timeout.as_millis()
            ));
            if op.is_bind_or_start_tls() {
                // Nothing else can run until it completes
                self.invalidate(false, error);
                continue;
            }
            if self.pending.remove(&op.message_id).is_some() {
                debug!("Connection {}: {} request {} timed out", self.id, op.kind.name(), op.message_id);
                self.resolve(&op, Err(error));
                if self.options.abandon_on_timeout {
                    let _ = self.write_unregistered(Request::Abandon(AbandonRequest::new(op.message_id)));
                }
            }
        }
        delay
    }

    fn start_sweeper(&self) {
        if !self.options.is_timeout_enabled() {
            return;
        }
        let me = self.me.clone();
        let task = self.lease.scheduler().schedule_adaptive(self.options.request_timeout, move || {
            let inner = me.upgrade()?;
            if !inner.is_valid() {
                return None;
            }
            let delay = inner.handle_timeout(Instant::now());
            (!delay.is_zero()).then_some(delay)
        });
        *self.sweeper.lock() = Some(task);
    }

    /// Send a heartbeat probe if idle long enough and the gate is free.
    ///
    /// Returns true when the connection is idle, even if the probe could not
    /// be sent because a Bind, StartTLS or earlier probe holds the gate.
    pub(crate) fn send_heartbeat(&self) -> bool {
        if !self.state.is_valid() {
            return false;
        }
        let idle = Instant::now().saturating_duration_since(*self.last_response.lock());
        if idle < self.options.minimum_idle_delay() {
            return false;
        }
        if self.gate.try_acquire_exclusive() {
            let request = Request::Search(self.options.heartbeat_search.clone());
            match self.submit_ordinary(request, OperationKind::Search, Completer::Heartbeat, None, None) {
                Ok(id) => debug!("Connection {}: heartbeat {} sent", self.id, id),
                Err(e) => {
                    debug!("Connection {}: heartbeat not sent: {}", self.id, e);
                    self.gate.release_exclusive();
                    self.gate.flush();
                }
            }
        }
        true
    }

    /// Fail the connection if the gate is still held and nothing arrived within the heartbeat timeout
    pub(crate) fn check_for_heartbeat_timeout(&self) {
        let timeout = self.options.heartbeat_timeout();
        let silent = Instant::now().saturating_duration_since(*self.last_response.lock());
        if self.gate.is_held() && silent > timeout {
            self.invalidate(
                false,
                LdapError::server_down(format!("Heartbeat timed out after {} ms", timeout.as_millis())),
            );
        }
    }

    fn handle_unsolicited(&self, op: ProtocolOp) {
        match op {
            ProtocolOp::ExtendedResponse(notification) if notification.is_notice_of_disconnection() => {
                let result = &notification.result;
                let error = LdapError::server_down(format!(
                    "Connection closed by server: {}: {}",
                    result.result_code, result.diagnostic_message
                ))
                .with_result(result.clone());
                self.invalidate(true, error);
            }
            ProtocolOp::ExtendedResponse(notification) => {
                debug!("Connection {}: unsolicited notification {:?}", self.id, notification.name);
                self.state.notify_unsolicited(&notification);
            }
            other => warn!("Connection {}: ignoring unsolicited {}", self.id, other.name()),
        }
    }

    /// Route a partial response without removing the operation
    fn with_pending(&self, message_id: i32, deliver: impl FnOnce(&PendingOperation)) {
        let op = self.pending.get(&message_id).map(|entry| Arc::clone(entry.value()));
        match op {
            Some(op) => deliver(&op),
            None => debug!("Connection {}: partial response for unknown id {}", self.id, message_id),
        }
    }

    fn complete_start_tls(&self, op: Arc<PendingOperation>, response: ProtocolOp) {
        let (Some(inner), Some(config)) = (self.me.upgrade(), self.options.tls_config.clone()) else {
            self.resolve(&op, Err(LdapError::param("StartTLS requires a TLS client configuration")));
            return;
        };
        tokio::spawn(async move {
            match inner.transport.start_tls(config).await {
                Ok(()) => {
                    info!("Connection {}: TLS installed", inner.id);
                    inner.resolve(&op, Ok(response));
                }
                Err(error) => {
                    inner.resolve(&op, Err(error.clone()));
                    inner.invalidate(false, error);
                }
            }
        });
    }
}

impl Drop for ConnectionInner {
    fn drop(&mut self) {
        if let Some(registry) = &self.heartbeat {
            registry.deregister(self.id);
        }
        self.transport.close();
    }
}

impl ClientProtocol for ConnectionInner {
    fn parse_package(&self, buff: &[u8]) -> (usize, codec::PackageStatus) {
        self.protocol.parse_package(buff)
    }

    fn recv(&self, pkg: Vec<u8>) {
        let message = match self.protocol.response_unpack(&pkg) {
            Ok(message) => message,
            Err(e) => {
                self.invalidate(false, LdapError::decoding(format!("Unable to decode response: {}", e.message())));
                return;
            }
        };
        *self.last_response.lock() = Instant::now();

        let message_id = message.message_id;
        if message_id == 0 {
            self.handle_unsolicited(message.op);
            return;
        }

        match message.op {
            ProtocolOp::SearchResultEntry(entry) => self.with_pending(message_id, |op| op.handle_entry(entry)),
            ProtocolOp::SearchResultReference(reference) => {
                self.with_pending(message_id, |op| op.handle_reference(reference))
            }
            ProtocolOp::IntermediateResponse(response) => {
                self.with_pending(message_id, |op| op.handle_intermediate(response))
            }
            ProtocolOp::Request(request) => {
                self.invalidate(
                    false,
                    LdapError::decoding(format!("Unexpected {} request received from server", request.name())),
                );
            }
            response => {
                let Some((_, op)) = self.pending.remove(&message_id) else {
                    debug!("Connection {}: ignoring {} for unknown id {}", self.id, response.name(), message_id);
                    return;
                };
                if !op.accepts(&response) {
                    let error = LdapError::decoding(format!(
                        "Unexpected {} for {} request {}",
                        response.name(),
                        op.kind.name(),
                        message_id
                    ));
                    self.resolve(&op, Err(error.clone()));
                    self.invalidate(false, error);
                    return;
                }

                let tls_accepted = matches!(
                    &response,
                    ProtocolOp::ExtendedResponse(r) if op.kind == OperationKind::StartTls && r.result.is_success()
                );
                if tls_accepted {
                    self.complete_start_tls(op, response);
                } else {
                    self.resolve(&op, Ok(response));
                }
            }
        }
    }

    fn transport_error(&self, error: LdapError) {
        self.invalidate(false, error);
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use crate::protocol::{
        Attribute, CompareResult, Control, Filter, LdapMessage, Modification, ResultCode, SearchResultEntry,
        SearchScope, OID_NOTICE_OF_DISCONNECTION,
    };
    use crate::transport::testing::MockTransport;
    use crate::transport::create_insecure_client_config;

    fn success_for(request: &Request) -> Vec<ProtocolOp> {
        let ok = LdapResult::success();
        match request {
            Request::Add(_) => vec![ProtocolOp::AddResponse(ok)],
            Request::Delete(_) => vec![ProtocolOp::DeleteResponse(ok)],
            Request::Modify(_) => vec![ProtocolOp::ModifyResponse(ok)],
            Request::ModifyDn(_) => vec![ProtocolOp::ModifyDnResponse(ok)],
            Request::Compare(_) => vec![ProtocolOp::CompareResponse(CompareResult {
                result: LdapResult::new(ResultCode::COMPARE_TRUE, "", ""),
            })],
            Request::Search(s) => vec![
                ProtocolOp::SearchResultEntry(SearchResultEntry::new(format!("cn=found,{}", s.base_dn))),
                ProtocolOp::SearchResultDone(ok),
            ],
            Request::Extended(_) => vec![ProtocolOp::ExtendedResponse(ExtendedResult::new(ok))],
            Request::Bind(_) => vec![ProtocolOp::BindResponse(BindResult { result: ok, server_sasl_credentials: None })],
            Request::Abandon(_) | Request::Unbind(_) => vec![],
        }
    }

    fn echo_server() -> Arc<MockTransport> {
        MockTransport::with_responder(|message| match &message.op {
            ProtocolOp::Request(request) => success_for(request)
                .into_iter()
                .map(|op| LdapMessage::new(message.message_id, op))
                .collect(),
            _ => vec![],
        })
    }

    fn connect(transport: &Arc<MockTransport>, options: LdapOptions) -> LdapConnection {
        let transport: Arc<dyn Transport> = transport.clone();
        LdapConnection::from_transport(transport, options)
    }

    fn search(base: &str) -> SearchRequest {
        SearchRequest::new(base, SearchScope::WholeSubtree, Filter::present("objectClass"))
    }

    fn done(message_id: i32, diagnostic: &str) -> LdapMessage {
        LdapMessage::new(
            message_id,
            ProtocolOp::SearchResultDone(LdapResult::new(ResultCode::SUCCESS, "", diagnostic)),
        )
    }

    fn bind_ok(message_id: i32) -> LdapMessage {
        LdapMessage::new(
            message_id,
            ProtocolOp::BindResponse(BindResult { result: LdapResult::success(), server_sasl_credentials: None }),
        )
    }

    #[derive(Default)]
    struct Events {
        errors: Mutex<Vec<(bool, ResultCode)>>,
        closed: AtomicUsize,
        notices: Mutex<Vec<Option<String>>>,
    }

    impl ConnectionEventListener for Events {
        fn connection_closed(&self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }

        fn connection_error(&self, is_disconnect_notification: bool, error: &LdapError) {
            self.errors.lock().push((is_disconnect_notification, error.code()));
        }

        fn unsolicited_notification(&self, notification: &ExtendedResult) {
            self.notices.lock().push(notification.name.clone());
        }
    }

    #[tokio::test]
    async fn test_each_operation_resolves() {
        let transport = echo_server();
        let connection = connect(&transport, LdapOptions::default());

        connection.add(AddRequest::new("cn=a,dc=example", vec![Attribute::new("cn", ["a"])])).await.unwrap();
        connection.modify(ModifyRequest::new("cn=a,dc=example", vec![Modification::replace("sn", ["b"])])).await.unwrap();
        connection.modify_dn(ModifyDnRequest::new("cn=a,dc=example", "cn=c", true)).await.unwrap();
        assert!(connection.compare(CompareRequest::new("cn=c,dc=example", "sn", "b")).await.unwrap().matched());
        connection.delete(DeleteRequest::new("cn=c,dc=example")).await.unwrap();
        connection.extended(ExtendedRequest::new("1.3.6.1.4.1.4203.1.11.3", None)).await.unwrap();
        connection.bind(BindRequest::simple("cn=admin", "secret")).await.unwrap();

        let results = connection.search(search("dc=example")).await.unwrap();
        assert_eq!(results.entries.len(), 1);
        assert_eq!(results.entries[0].dn, "cn=found,dc=example");
        assert!(results.result.is_success());

        assert_eq!(connection.pending_count(), 0);
        assert_eq!(transport.requests().len(), 8);
        assert!(connection.is_valid());
    }

    #[tokio::test]
    async fn test_responses_routed_by_message_id() {
        let transport = MockTransport::new();
        let connection = connect(&transport, LdapOptions::default());

        let futures: Vec<_> = (0..3).map(|n| connection.search_async(search(&format!("ou={}", n)), None)).collect();
        let ids: Vec<i32> = futures.iter().map(|f| f.message_id()).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(connection.pending_count(), 3);

        for id in ids.iter().rev() {
            transport.reply(done(*id, &format!("done {}", id)));
        }
        for (future, id) in futures.into_iter().zip(ids) {
            assert_eq!(future.await.unwrap().diagnostic_message, format!("done {}", id));
        }
        assert_eq!(connection.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_operations_complete_once() {
        let transport = echo_server();
        let connection = connect(&transport, LdapOptions::default());

        let tasks: Vec<_> = (0..50)
            .map(|n| {
                let connection = connection.clone();
                tokio::spawn(async move { connection.delete(DeleteRequest::new(format!("cn={}", n))).await })
            })
            .collect();
        for task in tasks {
            assert!(task.await.unwrap().unwrap().is_success());
        }
        assert_eq!(connection.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_server_error_fails_future() {
        let transport = MockTransport::new();
        let connection = connect(&transport, LdapOptions::default());

        let future = connection.delete_async(DeleteRequest::new("cn=missing"));
        transport.reply(LdapMessage::new(
            future.message_id(),
            ProtocolOp::DeleteResponse(LdapResult::new(ResultCode::NO_SUCH_OBJECT, "dc=example", "no such entry")),
        ));

        let err = future.await.unwrap_err();
        assert_eq!(err.code(), ResultCode::NO_SUCH_OBJECT);
        assert_eq!(err.result().unwrap().matched_dn, "dc=example");
        assert!(connection.is_valid());
    }

    #[tokio::test]
    async fn test_search_handler_receives_entries() {
        struct Count(AtomicUsize);
        impl SearchResultHandler for Count {
            fn handle_entry(&self, _entry: SearchResultEntry) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
            fn handle_reference(&self, _reference: crate::protocol::SearchResultReference) {}
        }

        let transport = echo_server();
        let connection = connect(&transport, LdapOptions::default());
        let handler = Arc::new(Count(AtomicUsize::new(0)));
        connection
            .search_async(search("dc=example"), Some(handler.clone() as Arc<dyn SearchResultHandler>))
            .await
            .unwrap();
        assert_eq!(handler.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_ordinary_operation_refused_during_bind() {
        let transport = MockTransport::new();
        let connection = connect(&transport, LdapOptions::default());

        let bind = connection.bind_async(BindRequest::simple("cn=admin", "secret"));
        assert_eq!(bind.message_id(), 1);
        assert!(!bind.cancel());

        let err = connection.add_async(AddRequest::new("cn=x", vec![])).await.unwrap_err();
        assert_eq!(err.code(), ResultCode::OPERATIONS_ERROR);
        assert_eq!(err.message(), BIND_IN_PROGRESS);
        assert_eq!(transport.requests().len(), 1);

        let err = connection.abandon(AbandonRequest::new(1)).unwrap_err();
        assert_eq!(err.code(), ResultCode::OPERATIONS_ERROR);

        transport.reply(bind_ok(1));
        bind.await.unwrap();
        assert_eq!(connection.inner.gate.state(), GateState::Unlocked);

        let delete = connection.delete_async(DeleteRequest::new("cn=x"));
        transport.reply(LdapMessage::new(delete.message_id(), ProtocolOp::DeleteResponse(LdapResult::success())));
        delete.await.unwrap();
    }

    #[tokio::test]
    async fn test_bind_refused_while_operations_pending() {
        let transport = MockTransport::new();
        let connection = connect(&transport, LdapOptions::default());

        let _search = connection.search_async(search("dc=example"), None);
        let err = connection.bind(BindRequest::anonymous()).await.unwrap_err();
        assert_eq!(err.code(), ResultCode::OPERATIONS_ERROR);
        assert_eq!(err.message(), "There are other operations pending on this connection");
        assert_eq!(connection.inner.gate.state(), GateState::Unlocked);
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_bind_clears_in_progress() {
        let transport = MockTransport::new();
        let connection = connect(&transport, LdapOptions::default());

        let bind = connection.bind_async(BindRequest::simple("cn=admin", "wrong"));
        transport.reply(LdapMessage::new(
            1,
            ProtocolOp::BindResponse(BindResult {
                result: LdapResult::new(ResultCode::INVALID_CREDENTIALS, "", "bad password"),
                server_sasl_credentials: None,
            }),
        ));
        assert_eq!(bind.await.unwrap_err().code(), ResultCode::INVALID_CREDENTIALS);
        assert!(!connection.inner.bind_or_start_tls_in_progress.load(Ordering::SeqCst));
        assert!(!connection.inner.gate.is_held());
        assert!(connection.is_valid());
    }

    #[tokio::test(start_paused = true)]
    async fn test_bind_deferred_behind_heartbeat() {
        let transport = MockTransport::new();
        let options = LdapOptions::default().with_heartbeat_interval(Duration::from_secs(10));
        let connection = connect(&transport, options);

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(connection.inner.send_heartbeat());
        assert_eq!(connection.inner.gate.state(), GateState::Exclusive);
        let heartbeat_id = transport.last_id("search").unwrap();

        let bind = connection.bind_async(BindRequest::simple("cn=admin", "secret"));
        assert_eq!(bind.message_id(), -1);
        assert_eq!(connection.inner.gate.deferred_len(), 1);
        assert!(transport.last_id("bind").is_none());

        transport.reply(done(heartbeat_id, ""));
        let bind_id = transport.last_id("bind").unwrap();
        assert_eq!(connection.inner.gate.state(), GateState::Shared(1));

        transport.reply(bind_ok(bind_id));
        bind.await.unwrap();
        assert_eq!(connection.inner.gate.state(), GateState::Unlocked);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_needs_idle_connection() {
        let transport = MockTransport::new();
        let options = LdapOptions::default().with_heartbeat_interval(Duration::from_secs(10));
        let connection = connect(&transport, options);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!connection.inner.send_heartbeat());
        assert!(transport.requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_skipped_while_bind_in_progress() {
        let transport = MockTransport::new();
        let options = LdapOptions::default().with_heartbeat_interval(Duration::from_secs(10));
        let connection = connect(&transport, options);

        let _bind = connection.bind_async(BindRequest::anonymous());
        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(connection.inner.send_heartbeat());
        assert!(transport.last_id("search").is_none());
        assert_eq!(connection.inner.gate.state(), GateState::Shared(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_heartbeat_invalidates() {
        let transport = MockTransport::new();
        let options = LdapOptions::default()
            .with_heartbeat_interval(Duration::from_secs(10))
            .with_connect_timeout(Duration::from_millis(500));
        let connection = connect(&transport, options);
        let events = Arc::new(Events::default());
        connection.add_listener(events.clone());

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(connection.inner.send_heartbeat());
        let pending = connection.search_async(search("dc=example"), None);

        tokio::time::advance(Duration::from_millis(600)).await;
        connection.inner.check_for_heartbeat_timeout();

        let err = pending.await.unwrap_err();
        assert_eq!(err.code(), ResultCode::CLIENT_SIDE_SERVER_DOWN);
        assert!(err.message().starts_with("Heartbeat timed out"));
        assert!(matches!(connection.state(), ConnectionStatus::Invalid(_)));
        assert_eq!(*events.errors.lock(), vec![(false, ResultCode::CLIENT_SIDE_SERVER_DOWN)]);
        assert!(transport.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_survives_with_timeouts_disabled() {
        let transport = MockTransport::new();
        let options = LdapOptions::default()
            .with_heartbeat_interval(Duration::from_secs(10))
            .with_connect_timeout(Duration::ZERO);
        let connection = connect(&transport, options);

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(connection.inner.send_heartbeat());
        let heartbeat_id = transport.last_id("search").unwrap();

        tokio::time::advance(Duration::from_millis(1)).await;
        connection.inner.check_for_heartbeat_timeout();
        assert!(connection.is_valid());

        transport.reply(done(heartbeat_id, ""));
        assert!(!connection.inner.gate.is_held());
    }

    #[tokio::test(start_paused = true)]
    async fn test_answered_heartbeat_keeps_connection() {
        let transport = echo_server();
        let options = LdapOptions::default()
            .with_heartbeat_interval(Duration::from_secs(10))
            .with_connect_timeout(Duration::from_millis(500));
        let connection = connect(&transport, options);

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(connection.inner.send_heartbeat());
        assert!(!connection.inner.gate.is_held());

        tokio::time::advance(Duration::from_millis(600)).await;
        connection.inner.check_for_heartbeat_timeout();
        assert!(connection.is_valid());
    }

    #[tokio::test]
    async fn test_cancel_sends_abandon_and_ignores_late_response() {
        let transport = MockTransport::new();
        let connection = connect(&transport, LdapOptions::default());

        let future = connection.search_async(search("dc=example"), None);
        let id = future.message_id();
        assert!(future.cancel());
        assert!(!future.cancel());

        let abandoned = transport
            .requests()
            .into_iter()
            .find_map(|(_, r)| match r {
                Request::Abandon(a) => Some(a.message_id),
                _ => None,
            });
        assert_eq!(abandoned, Some(id));
        assert!(future.await.unwrap_err().is_cancelled());

        transport.reply(done(id, "late"));
        assert!(connection.is_valid());
        assert_eq!(connection.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_future_abandons_operation() {
        let transport = MockTransport::new();
        let connection = connect(&transport, LdapOptions::default());

        let outcome = tokio::time::timeout(Duration::from_secs(1), connection.search(search("dc=example"))).await;
        assert!(outcome.is_err());
        let search_id = transport.last_id("search").unwrap();
        let abandoned = transport.requests().into_iter().find_map(|(_, r)| match r {
            Request::Abandon(a) => Some(a.message_id),
            _ => None,
        });
        assert_eq!(abandoned, Some(search_id));
        assert_eq!(connection.pending_count(), 0);

        let bind = connection.bind_async(BindRequest::anonymous());
        let bind_id = transport.last_id("bind").unwrap();
        transport.reply(bind_ok(bind_id));
        bind.await.unwrap();

        // A completed future is not abandoned when dropped
        let echo = echo_server();
        let connection = connect(&echo, LdapOptions::default());
        let future = connection.delete_async(DeleteRequest::new("cn=gone"));
        drop(future);
        assert!(echo.last_id("abandon").is_none());
    }

    #[tokio::test]
    async fn test_abandon_unknown_id_sends_nothing() {
        let transport = MockTransport::new();
        let connection = connect(&transport, LdapOptions::default());
        connection.abandon(AbandonRequest::new(42)).unwrap();
        assert!(transport.requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_scan() {
        let transport = MockTransport::new();
        let options = LdapOptions::default().with_request_timeout(Duration::from_secs(1));
        let connection = connect(&transport, options);
        let start = Instant::now();

        let ordinary = connection.search_async(search("dc=example"), None);
        let persistent = search("dc=example").with_control(Control::persistent_search(1, true, false).unwrap());
        let _persistent = connection.search_async(persistent, None);

        let next = connection.inner.handle_timeout(start + Duration::from_millis(300));
        assert_eq!(next, Duration::from_millis(700));
        assert_eq!(connection.pending_count(), 2);

        let next = connection.inner.handle_timeout(start + Duration::from_secs(1));
        assert!(next <= Duration::from_secs(1));
        let err = ordinary.await.unwrap_err();
        assert!(err.is_timeout());
        assert!(err.message().contains("timed out after 1000 ms"));
        assert_eq!(connection.pending_count(), 1);
        assert!(transport.last_id("abandon").is_none());
        assert!(connection.is_valid());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_with_abandon() {
        let transport = MockTransport::new();
        let options = LdapOptions::default()
            .with_request_timeout(Duration::from_secs(1))
            .with_abandon_on_timeout(true);
        let connection = connect(&transport, options);

        let future = connection.delete_async(DeleteRequest::new("cn=slow"));
        tokio::time::advance(Duration::from_millis(1100)).await;
        assert!(future.await.unwrap_err().is_timeout());
        assert!(transport.last_id("abandon").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_bind_timeout_invalidates() {
        let transport = MockTransport::new();
        let options = LdapOptions::default().with_request_timeout(Duration::from_secs(1));
        let connection = connect(&transport, options);
        let start = Instant::now();

        let bind = connection.bind_async(BindRequest::anonymous());
        connection.inner.handle_timeout(start + Duration::from_secs(2));
        assert!(bind.await.unwrap_err().is_timeout());
        assert!(matches!(connection.state(), ConnectionStatus::Invalid(_)));
        assert!(!connection.inner.gate.is_held());
    }

    #[tokio::test]
    async fn test_transport_failure_fails_everything_once() {
        let transport = MockTransport::new();
        let connection = connect(&transport, LdapOptions::default());
        let events = Arc::new(Events::default());
        connection.add_listener(events.clone());

        let first = connection.search_async(search("ou=a"), None);
        let second = connection.delete_async(DeleteRequest::new("cn=b"));
        transport.drop_connection(LdapError::server_down("Connection reset"));
        transport.drop_connection(LdapError::decoding("second failure"));

        assert_eq!(first.await.unwrap_err().message(), "Connection reset");
        assert_eq!(second.await.unwrap_err().message(), "Connection reset");
        assert_eq!(events.errors.lock().len(), 1);

        let err = connection.add(AddRequest::new("cn=c", vec![])).await.unwrap_err();
        assert_eq!(err.message(), "Connection reset");
        assert!(transport.is_closed());
    }

    #[tokio::test]
    async fn test_notice_of_disconnection() {
        let transport = MockTransport::new();
        let connection = connect(&transport, LdapOptions::default());
        let events = Arc::new(Events::default());
        connection.add_listener(events.clone());

        let pending = connection.search_async(search("dc=example"), None);
        let mut notice = ExtendedResult::new(LdapResult::new(ResultCode::UNAVAILABLE, "", "shutting down"));
        notice.name = Some(OID_NOTICE_OF_DISCONNECTION.to_string());
        transport.reply(LdapMessage::new(0, ProtocolOp::ExtendedResponse(notice)));

        let err = pending.await.unwrap_err();
        assert_eq!(err.code(), ResultCode::CLIENT_SIDE_SERVER_DOWN);
        assert_eq!(err.result().map(|r| r.result_code), Some(ResultCode::UNAVAILABLE));
        assert_eq!(*events.errors.lock(), vec![(true, ResultCode::CLIENT_SIDE_SERVER_DOWN)]);
    }

    #[tokio::test]
    async fn test_other_unsolicited_notification_reaches_listener() {
        let transport = MockTransport::new();
        let connection = connect(&transport, LdapOptions::default());
        let events = Arc::new(Events::default());
        connection.add_listener(events.clone());

        let mut notice = ExtendedResult::new(LdapResult::success());
        notice.name = Some("1.2.3.4".to_string());
        transport.reply(LdapMessage::new(0, ProtocolOp::ExtendedResponse(notice)));

        assert_eq!(*events.notices.lock(), vec![Some("1.2.3.4".to_string())]);
        assert!(connection.is_valid());
    }

    #[tokio::test]
    async fn test_mismatched_response_invalidates() {
        let transport = MockTransport::new();
        let connection = connect(&transport, LdapOptions::default());

        let future = connection.search_async(search("dc=example"), None);
        transport.reply(LdapMessage::new(future.message_id(), ProtocolOp::AddResponse(LdapResult::success())));
        assert_eq!(future.await.unwrap_err().code(), ResultCode::CLIENT_SIDE_DECODING_ERROR);
        assert!(!connection.is_valid());
    }

    #[tokio::test]
    async fn test_malformed_frame_invalidates() {
        let transport = MockTransport::new();
        let connection = connect(&transport, LdapOptions::default());
        let future = connection.delete_async(DeleteRequest::new("cn=x"));

        transport.reply_raw(vec![0x30, 0x00]);
        assert_eq!(future.await.unwrap_err().code(), ResultCode::CLIENT_SIDE_DECODING_ERROR);
        assert!(!connection.is_valid());
    }

    #[tokio::test]
    async fn test_write_failure_invalidates() {
        let transport = MockTransport::new();
        transport.set_fail_writes(true);
        let connection = connect(&transport, LdapOptions::default());

        let err = connection.delete(DeleteRequest::new("cn=x")).await.unwrap_err();
        assert_eq!(err.code(), ResultCode::CLIENT_SIDE_SERVER_DOWN);
        assert!(!connection.is_valid());
        assert_eq!(connection.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let transport = MockTransport::new();
        let connection = connect(&transport, LdapOptions::default());
        let events = Arc::new(Events::default());
        connection.add_listener(events.clone());

        let pending = connection.search_async(search("dc=example"), None);
        connection.close();
        connection.close();

        assert!(pending.await.unwrap_err().is_cancelled());
        assert!(connection.is_closed());
        assert!(transport.is_closed());
        assert_eq!(events.closed.load(Ordering::SeqCst), 1);
        assert!(events.errors.lock().is_empty());
        assert!(transport.last_id("unbind").is_some());
        assert!(connection.inner.lease.is_released());

        let err = connection.delete(DeleteRequest::new("cn=x")).await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_start_tls_upgrade() {
        let transport = echo_server();
        let tls = Arc::new(create_insecure_client_config().unwrap());
        let connection = connect(&transport, LdapOptions::default().with_start_tls(tls));

        connection.start_tls().await.unwrap();
        assert!(connection.is_tls_enabled());
        assert!(!connection.inner.gate.is_held());

        let err = connection.start_tls().await.unwrap_err();
        assert_eq!(err.code(), ResultCode::OPERATIONS_ERROR);
        assert_eq!(err.message(), "This connection is already TLS enabled");
    }

    #[tokio::test]
    async fn test_start_tls_handshake_failure_invalidates() {
        let transport = echo_server();
        transport.set_fail_tls(true);
        let tls = Arc::new(create_insecure_client_config().unwrap());
        let connection = connect(&transport, LdapOptions::default().with_start_tls(tls));

        assert!(connection.start_tls().await.is_err());
        assert!(!connection.is_valid());
        assert!(!connection.is_tls_enabled());
    }

    #[tokio::test]
    async fn test_start_tls_requires_configuration() {
        let transport = echo_server();
        let connection = connect(&transport, LdapOptions::default());
        let err = connection.start_tls().await.unwrap_err();
        assert_eq!(err.code(), ResultCode::CLIENT_SIDE_PARAM_ERROR);
        assert!(transport.requests().is_empty());

        let err = connection.extended(ExtendedRequest::start_tls()).await.unwrap_err();
        assert_eq!(err.code(), ResultCode::CLIENT_SIDE_PARAM_ERROR);
    }
}
