//! In-flight operations and the futures callers hold

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::{LdapError, Result};
use crate::protocol::{
    AbandonRequest, BindResult, CompareResult, ExtendedResult, IntermediateResponse, LdapResult, ProtocolOp,
    SearchResultEntry, SearchResultReference,
};
use super::ConnectionInner;

/// Receives search entries and references as they arrive
pub trait SearchResultHandler: Send + Sync {
    fn handle_entry(&self, entry: SearchResultEntry);

    fn handle_reference(&self, reference: SearchResultReference);

    fn handle_intermediate_response(&self, _response: IntermediateResponse) {}
}

/// Receives intermediate responses for an extended operation
pub trait IntermediateResponseHandler: Send + Sync {
    fn handle_intermediate_response(&self, response: IntermediateResponse);
}

impl<F> IntermediateResponseHandler for F
where
    F: Fn(IntermediateResponse) + Send + Sync,
{
    fn handle_intermediate_response(&self, response: IntermediateResponse) {
        self(response)
    }
}

/// Entries, references and final result of a completed search
#[derive(Debug, Clone)]
pub struct SearchResults {
    pub entries: Vec<SearchResultEntry>,
    pub references: Vec<SearchResultReference>,
    pub result: LdapResult,
}

#[derive(Default)]
pub(crate) struct SearchCollector {
    entries: Mutex<Vec<SearchResultEntry>>,
    references: Mutex<Vec<SearchResultReference>>,
}

impl SearchCollector {
    pub(crate) fn finish(&self, result: LdapResult) -> SearchResults {
        SearchResults {
            entries: std::mem::take(&mut *self.entries.lock()),
            references: std::mem::take(&mut *self.references.lock()),
            result,
        }
    }
}

impl SearchResultHandler for SearchCollector {
    fn handle_entry(&self, entry: SearchResultEntry) {
        self.entries.lock().push(entry);
    }

    fn handle_reference(&self, reference: SearchResultReference) {
        self.references.lock().push(reference);
    }
}

/// Request kind, which fixes the response type that completes it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Add,
    Delete,
    Modify,
    ModifyDn,
    Compare,
    Search,
    Extended,
    StartTls,
    Bind,
}

impl OperationKind {
    pub fn name(self) -> &'static str {
        match self {
            OperationKind::Add => "add",
            OperationKind::Delete => "delete",
            OperationKind::Modify => "modify",
            OperationKind::ModifyDn => "modifyDN",
            OperationKind::Compare => "compare",
            OperationKind::Search => "search",
            OperationKind::Extended => "extended",
            OperationKind::StartTls => "startTLS",
            OperationKind::Bind => "bind",
        }
    }

    pub fn is_bind_or_start_tls(self) -> bool {
        matches!(self, OperationKind::Bind | OperationKind::StartTls)
    }

    fn accepts(self, response: &ProtocolOp) -> bool {
        matches!(
            (self, response),
            (OperationKind::Add, ProtocolOp::AddResponse(_))
                | (OperationKind::Delete, ProtocolOp::DeleteResponse(_))
                | (OperationKind::Modify, ProtocolOp::ModifyResponse(_))
                | (OperationKind::ModifyDn, ProtocolOp::ModifyDnResponse(_))
                | (OperationKind::Compare, ProtocolOp::CompareResponse(_))
                | (OperationKind::Search, ProtocolOp::SearchResultDone(_))
                | (OperationKind::Extended | OperationKind::StartTls, ProtocolOp::ExtendedResponse(_))
                | (OperationKind::Bind, ProtocolOp::BindResponse(_))
        )
    }
}

/// Completion slot, typed by the operation's result
pub(crate) enum Completer {
    Result(oneshot::Sender<Result<LdapResult>>),
    Compare(oneshot::Sender<Result<CompareResult>>),
    Extended(oneshot::Sender<Result<ExtendedResult>>),
    Bind(oneshot::Sender<Result<BindResult>>),
    /// Heartbeat probe; nobody waits on it
    Heartbeat,
}

fn checked(result: &LdapResult) -> Result<()> {
    if result.result_code.is_exceptional() {
        Err(LdapError::from_result(result.clone()))
    } else {
        Ok(())
    }
}

impl Completer {
    pub(crate) fn fail(self, error: LdapError) {
        // A dropped receiver means the caller stopped waiting
        match self {
            Completer::Result(tx) => drop(tx.send(Err(error))),
            Completer::Compare(tx) => drop(tx.send(Err(error))),
            Completer::Extended(tx) => drop(tx.send(Err(error))),
            Completer::Bind(tx) => drop(tx.send(Err(error))),
            Completer::Heartbeat => {}
        }
    }

    fn complete(self, response: ProtocolOp) {
        match (self, response) {
            (
                Completer::Result(tx),
                ProtocolOp::SearchResultDone(r)
                | ProtocolOp::AddResponse(r)
                | ProtocolOp::DeleteResponse(r)
                | ProtocolOp::ModifyResponse(r)
                | ProtocolOp::ModifyDnResponse(r),
            ) => drop(tx.send(r.into_result())),
            (Completer::Compare(tx), ProtocolOp::CompareResponse(r)) => drop(tx.send(checked(&r.result).map(|_| r))),
            (Completer::Extended(tx), ProtocolOp::ExtendedResponse(r)) => drop(tx.send(checked(&r.result).map(|_| r))),
            (Completer::Bind(tx), ProtocolOp::BindResponse(r)) => drop(tx.send(checked(&r.result).map(|_| r))),
            (Completer::Heartbeat, _) => {}
            (completer, response) => {
                completer.fail(LdapError::decoding(format!("Unexpected {} response", response.name())));
            }
        }
    }
}

/// One request written to the wire and not yet resolved
pub(crate) struct PendingOperation {
    pub message_id: i32,
    pub kind: OperationKind,
    heartbeat: bool,
    timeout_eligible: bool,
    last_activity: Mutex<Instant>,
    completer: Mutex<Option<Completer>>,
    search_handler: Option<Arc<dyn SearchResultHandler>>,
    intermediate_handler: Option<Arc<dyn IntermediateResponseHandler>>,
}

impl PendingOperation {
    pub fn new(message_id: i32, kind: OperationKind, timeout_eligible: bool, completer: Completer) -> Self {
        let heartbeat = matches!(completer, Completer::Heartbeat);
        Self {
            message_id,
            kind,
            heartbeat,
            timeout_eligible,
            last_activity: Mutex::new(Instant::now()),
            completer: Mutex::new(Some(completer)),
            search_handler: None,
            intermediate_handler: None,
        }
    }

    pub fn with_search_handler(mut self, handler: Option<Arc<dyn SearchResultHandler>>) -> Self {
        self.search_handler = handler;
        self
    }

    pub fn with_intermediate_handler(mut self, handler: Option<Arc<dyn IntermediateResponseHandler>>) -> Self {
        self.intermediate_handler = handler;
        self
    }

    pub fn is_bind_or_start_tls(&self) -> bool {
        self.kind.is_bind_or_start_tls()
    }

    pub fn is_heartbeat(&self) -> bool {
        self.heartbeat
    }

    pub fn is_timeout_eligible(&self) -> bool {
        self.timeout_eligible
    }

    pub fn is_done(&self) -> bool {
        self.completer.lock().is_none()
    }

    pub fn last_activity(&self) -> Instant {
        *self.last_activity.lock()
    }

    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    /// Whether `response` is the final response type for this request
    pub fn accepts(&self, response: &ProtocolOp) -> bool {
        self.kind.accepts(response)
    }

    /// Resolve with the final response. Returns false if already resolved.
    pub fn complete(&self, response: ProtocolOp) -> bool {
        match self.completer.lock().take() {
            Some(completer) => {
                completer.complete(response);
                true
            }
            None => false,
        }
    }

    /// Resolve with an error. Returns false if already resolved.
    pub fn fail(&self, error: LdapError) -> bool {
        match self.completer.lock().take() {
            Some(completer) => {
                completer.fail(error);
                true
            }
            None => false,
        }
    }

    pub fn handle_entry(&self, entry: SearchResultEntry) {
        self.touch();
        if let Some(handler) = &self.search_handler {
            handler.handle_entry(entry);
        }
    }

    pub fn handle_reference(&self, reference: SearchResultReference) {
        self.touch();
        if let Some(handler) = &self.search_handler {
            handler.handle_reference(reference);
        }
    }

    pub fn handle_intermediate(&self, response: IntermediateResponse) {
        self.touch();
        if let Some(handler) = &self.intermediate_handler {
            handler.handle_intermediate_response(response);
        } else if let Some(handler) = &self.search_handler {
            handler.handle_intermediate_response(response);
        }
    }
}

/// Result of an asynchronous LDAP operation
///
/// Resolves exactly once with the operation's result or an `LdapError`.
pub struct LdapFuture<T> {
    message_id: i32,
    receiver: oneshot::Receiver<Result<T>>,
    connection: Weak<ConnectionInner>,
    cancellable: bool,
}

impl<T> LdapFuture<T> {
    pub(crate) fn new(
        message_id: i32,
        receiver: oneshot::Receiver<Result<T>>,
        connection: Weak<ConnectionInner>,
        cancellable: bool,
    ) -> Self {
        Self { message_id, receiver, connection, cancellable }
    }

    /// Future that is already resolved with `error`
    pub(crate) fn failed(error: LdapError) -> Self {
        let (tx, receiver) = oneshot::channel();
        let _ = tx.send(Err(error));
        Self { message_id: -1, receiver, connection: Weak::new(), cancellable: false }
    }

    /// Message id of the request, or -1 if it was never sent or is still queued
    pub fn message_id(&self) -> i32 {
        self.message_id
    }

    /// Abandon the operation. Returns false for Bind and StartTLS, and when
    /// the operation has already completed.
    pub fn cancel(&self) -> bool {
        if !self.cancellable || self.message_id <= 0 {
            return false;
        }
        match self.connection.upgrade() {
            Some(connection) => connection
                .abandon_request(AbandonRequest::new(self.message_id))
                .unwrap_or(false),
            None => false,
        }
    }
}

impl<T> Future for LdapFuture<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|received| received.unwrap_or_else(|_| Err(LdapError::cancelled("Connection dropped"))))
    }
}

/// Dropping an unresolved future abandons its operation
impl<T> Drop for LdapFuture<T> {
    fn drop(&mut self) {
        if !self.cancellable || self.message_id <= 0 {
            return;
        }
        if let Err(oneshot::error::TryRecvError::Empty) = self.receiver.try_recv() {
            if let Some(connection) = self.connection.upgrade() {
                let _ = connection.abandon_request(AbandonRequest::new(self.message_id));
            }
        }
    }
}

impl<T> std::fmt::Debug for LdapFuture<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LdapFuture")
            .field("message_id", &self.message_id)
            .field("cancellable", &self.cancellable)
            .finish()
    }
}
