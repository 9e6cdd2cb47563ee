//! Per-port serialization of reconciliation passes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Registry of one async lock per port id.
///
/// Two passes on the same port never interleave; passes on different ports
/// run concurrently. Entries are kept for the life of the registry.
#[derive(Debug, Default)]
pub struct PortLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl PortLocks {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `port_id`.
    ///
    /// The returned guard releases the port when dropped.
    pub async fn lock(&self, port_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(port_id.to_string()).or_default())
        };
        lock.lock_owned().await
    }

    /// Number of ports seen so far.
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether no port was locked yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio_test::{assert_pending, assert_ready, task};

    use super::*;

    #[test]
    fn test_same_port_is_exclusive() {
        let locks = PortLocks::new();
        let mut first = task::spawn(locks.lock("p1"));
        let guard = assert_ready!(first.poll());

        let mut contender = task::spawn(locks.lock("p1"));
        assert_pending!(contender.poll());

        drop(guard);
        assert!(contender.is_woken());
        assert_ready!(contender.poll());
        assert_eq!(locks.len(), 1);
    }

    #[tokio::test]
    async fn test_different_ports_do_not_block() {
        let locks = PortLocks::new();
        assert!(locks.is_empty());

        let _p1 = locks.lock("p1").await;
        let _p2 = tokio::time::timeout(Duration::from_secs(1), locks.lock("p2"))
            .await
            .unwrap();
        assert_eq!(locks.len(), 2);
    }
}
