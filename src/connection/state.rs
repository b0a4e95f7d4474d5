//! Connection state and event listeners

use std::sync::Arc;
use parking_lot::Mutex;

use crate::LdapError;
use crate::protocol::ExtendedResult;

/// Receives connection lifecycle events. All methods default to no-ops.
pub trait ConnectionEventListener: Send + Sync {
    /// The connection was closed by the client
    fn connection_closed(&self) {}

    /// The connection failed; `is_disconnect_notification` is set when the
    /// server sent a notice of disconnection
    fn connection_error(&self, _is_disconnect_notification: bool, _error: &LdapError) {}

    /// The server sent an unsolicited notification other than a disconnect
    fn unsolicited_notification(&self, _notification: &ExtendedResult) {}
}

/// Connection lifecycle
#[derive(Debug, Clone)]
pub enum ConnectionStatus {
    Open,
    /// Closed by the client
    Closed,
    /// Failed; the reason fails every later request
    Invalid(LdapError),
}

impl ConnectionStatus {
    pub fn is_open(&self) -> bool {
        matches!(self, ConnectionStatus::Open)
    }
}

struct StateInner {
    status: ConnectionStatus,
    /// Reason later requests fail with once the connection is no longer open
    reason: Option<LdapError>,
    disconnect_notification: bool,
    listeners: Vec<Arc<dyn ConnectionEventListener>>,
}

pub(crate) struct ConnectionState {
    inner: Mutex<StateInner>,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self {
            inner: Mutex::new(StateInner {
                status: ConnectionStatus::Open,
                reason: None,
                disconnect_notification: false,
                listeners: Vec::new(),
            }),
        }
    }
}

impl ConnectionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.inner.lock().status.clone()
    }

    pub fn is_valid(&self) -> bool {
        self.inner.lock().status.is_open()
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.inner.lock().status, ConnectionStatus::Closed)
    }

    /// `Ok` while open, otherwise the stored reason
    pub fn check_valid(&self) -> Result<(), LdapError> {
        let inner = self.inner.lock();
        match &inner.reason {
            None => Ok(()),
            Some(reason) => Err(reason.clone()),
        }
    }

    /// Open → Invalid. Returns true if this call made the transition.
    pub fn set_error(&self, is_disconnect_notification: bool, error: LdapError) -> bool {
        let listeners = {
            let mut inner = self.inner.lock();
            if !inner.status.is_open() {
                return false;
            }
            inner.status = ConnectionStatus::Invalid(error.clone());
            inner.reason = Some(error.clone());
            inner.disconnect_notification = is_disconnect_notification;
            inner.listeners.clone()
        };
        for listener in listeners {
            listener.connection_error(is_disconnect_notification, &error);
        }
        true
    }

    /// Open or Invalid → Closed. Returns true if this call made the transition.
    ///
    /// `reason` is kept only when the connection had not already failed.
    pub fn set_closed(&self, reason: LdapError) -> bool {
        let listeners = {
            let mut inner = self.inner.lock();
            if matches!(inner.status, ConnectionStatus::Closed) {
                return false;
            }
            inner.status = ConnectionStatus::Closed;
            inner.reason.get_or_insert(reason);
            std::mem::take(&mut inner.listeners)
        };
        for listener in listeners {
            listener.connection_closed();
        }
        true
    }

    pub fn notify_unsolicited(&self, notification: &ExtendedResult) {
        let listeners = {
            let inner = self.inner.lock();
            if !inner.status.is_open() {
                return;
            }
            inner.listeners.clone()
        };
        for listener in listeners {
            listener.unsolicited_notification(notification);
        }
    }

    /// Register a listener; if the connection already failed or closed it is told at once
    pub fn add_listener(&self, listener: Arc<dyn ConnectionEventListener>) {
        let mut inner = self.inner.lock();
        match inner.status.clone() {
            ConnectionStatus::Open => inner.listeners.push(listener),
            ConnectionStatus::Invalid(error) => {
                let disconnect = inner.disconnect_notification;
                inner.listeners.push(Arc::clone(&listener));
                drop(inner);
                listener.connection_error(disconnect, &error);
            }
            ConnectionStatus::Closed => {
                drop(inner);
                listener.connection_closed();
            }
        }
    }

    pub fn remove_listener(&self, listener: &Arc<dyn ConnectionEventListener>) {
        self.inner.lock().listeners.retain(|l| !Arc::ptr_eq(l, listener));
    }
}
