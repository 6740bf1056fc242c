use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::oneshot;
use uuid::Uuid;

/// Process-local rendezvous between wait-mode callers and workers.
///
/// A waiter registers its submission id before the id is enqueued, so a
/// commit can never race past an unregistered waiter. The waiter owns the
/// lifetime of its entry: on timeout it unregisters itself, and the job runs
/// to completion regardless.
#[derive(Default)]
pub struct WaitMap {
    waiters: Mutex<HashMap<Uuid, oneshot::Sender<()>>>,
}

impl WaitMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the completion signal for the given id.
    ///
    /// A second registration for the same id replaces the first; the earlier
    /// waiter then observes a closed channel and gives up.
    pub fn register(&self, id: Uuid) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().unwrap().insert(id, tx);
        rx
    }

    /// Blocks until the completion signal fires or the timeout elapses.
    ///
    /// Returns true when the signal fired; the caller re-reads the store for
    /// the terminal record. On timeout the entry is dropped.
    pub async fn await_terminal(
        &self,
        id: Uuid,
        rx: oneshot::Receiver<()>,
        timeout: Duration,
    ) -> bool {
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(())) => true,
            Ok(Err(_)) => false,
            Err(_) => {
                self.waiters.lock().unwrap().remove(&id);
                false
            }
        }
    }

    /// Fires the completion signal for the given id.
    ///
    /// Idempotent and safe when no one is waiting.
    pub fn publish(&self, id: Uuid) {
        if let Some(tx) = self.waiters.lock().unwrap().remove(&id) {
            let _ = tx.send(());
        }
    }

    #[cfg(test)]
    fn waiter_count(&self) -> usize {
        self.waiters.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_wakes_waiter() {
        let map = WaitMap::new();
        let id = Uuid::new_v4();
        let rx = map.register(id);
        map.publish(id);
        assert!(map.await_terminal(id, rx, Duration::from_secs(1)).await);
        assert_eq!(map.waiter_count(), 0);
    }

    #[tokio::test]
    async fn test_publish_before_await_is_not_lost() {
        let map = WaitMap::new();
        let id = Uuid::new_v4();
        let rx = map.register(id);
        map.publish(id);
        // The oneshot buffers the signal even though nobody awaited yet
        assert!(map.await_terminal(id, rx, Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn test_timeout_unregisters_waiter() {
        let map = WaitMap::new();
        let id = Uuid::new_v4();
        let rx = map.register(id);
        assert!(!map.await_terminal(id, rx, Duration::from_millis(20)).await);
        assert_eq!(map.waiter_count(), 0);
        // A publish after the timeout is a no-op
        map.publish(id);
    }

    #[tokio::test]
    async fn test_publish_without_waiter_is_noop() {
        let map = WaitMap::new();
        map.publish(Uuid::new_v4());
    }
}
