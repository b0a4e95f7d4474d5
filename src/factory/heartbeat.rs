//! Periodic heartbeats for the connections of one factory

use std::sync::{Arc, Weak};
use std::time::Duration;
use parking_lot::Mutex;
use tracing::debug;

use crate::connection::{ConnectionInner, LdapConnection};
use crate::scheduler::{Scheduler, ScheduledTask};
use crate::transport::LdapOptions;

#[derive(Default)]
struct RegistryState {
    connections: Vec<(u64, Weak<ConnectionInner>)>,
    /// Running while at least one connection is registered
    task: Option<ScheduledTask>,
}

pub(crate) struct HeartbeatRegistry {
    me: Weak<HeartbeatRegistry>,
    scheduler: Scheduler,
    interval: Duration,
    heartbeat_timeout: Duration,
    state: Mutex<RegistryState>,
}

impl HeartbeatRegistry {
    pub fn new(scheduler: Scheduler, options: &LdapOptions) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            scheduler,
            interval: options.heartbeat_interval,
            heartbeat_timeout: options.heartbeat_timeout(),
            state: Mutex::new(RegistryState::default()),
        })
    }

    /// Start heartbeats for `connection`, starting the periodic task if it is the first
    pub fn register(&self, connection: &LdapConnection) {
        let inner = connection.inner();
        let mut state = self.state.lock();
        state.connections.push((inner.id(), Arc::downgrade(inner)));
        if state.task.is_none() {
            let me = self.me.clone();
            let task = self.scheduler.schedule_with_fixed_delay(self.interval, self.interval, move || {
                if let Some(registry) = me.upgrade() {
                    registry.send_heartbeats();
                }
            });
            state.task = Some(task);
            debug!("Heartbeat task started, interval {} ms", self.interval.as_millis());
        }
    }

    /// Stop heartbeats for the connection; the last one out stops the task
    pub fn deregister(&self, connection_id: u64) {
        let mut state = self.state.lock();
        state.connections.retain(|(id, _)| *id != connection_id);
        if state.connections.is_empty() {
            if let Some(task) = state.task.take() {
                task.cancel();
                debug!("Heartbeat task stopped");
            }
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.state.lock().connections.len()
    }

    #[cfg(test)]
    pub fn is_running(&self) -> bool {
        self.state.lock().task.is_some()
    }

    fn snapshot(&self) -> Vec<Arc<ConnectionInner>> {
        self.state
            .lock()
            .connections
            .iter()
            .filter_map(|(_, connection)| connection.upgrade())
            .collect()
    }

    fn send_heartbeats(&self) {
        let mut sent = false;
        for connection in self.snapshot() {
            sent |= connection.send_heartbeat();
        }
        if !sent {
            return;
        }

        let me = self.me.clone();
        self.scheduler.schedule(self.heartbeat_timeout, move || {
            if let Some(registry) = me.upgrade() {
                for connection in registry.snapshot() {
                    connection.check_for_heartbeat_timeout();
                }
            }
        });
    }
}
