//! # Utility Module
//!
//! Common utilities used across the client.

pub mod config;

pub use config::LdapClientConfig;

use std::sync::atomic::{AtomicI32, Ordering};

/// Per-connection message id generator.
///
/// Ids start at 1; 0 is reserved for unsolicited notifications.
#[derive(Debug)]
pub struct MessageIdGenerator {
    next: AtomicI32,
}

impl Default for MessageIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageIdGenerator {
    pub fn new() -> Self {
        Self { next: AtomicI32::new(1) }
    }

    /// Generate the next message id
    pub fn next_id(&self) -> i32 {
        loop {
            let current = self.next.load(Ordering::SeqCst);
            let following = if current >= i32::MAX { 1 } else { current + 1 };

            if self
                .next
                .compare_exchange(current, following, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return current;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_message_ids_start_at_one() {
        let ids = MessageIdGenerator::new();
        assert_eq!(ids.next_id(), 1);
        assert_eq!(ids.next_id(), 2);
    }

    #[test]
    fn test_message_ids_skip_zero_on_wrap() {
        let ids = MessageIdGenerator { next: AtomicI32::new(i32::MAX) };
        assert_eq!(ids.next_id(), i32::MAX);
        assert_eq!(ids.next_id(), 1);
    }

    #[test]
    fn test_message_ids_unique_across_threads() {
        let ids = Arc::new(MessageIdGenerator::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let ids = Arc::clone(&ids);
                std::thread::spawn(move || (0..1000).map(|_| ids.next_id()).collect::<Vec<_>>())
            })
            .collect();
        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id));
            }
        }
        assert_eq!(seen.len(), 4000);
    }
}
