//! # Request Coalescing
//!
//! Deduplicates concurrent identical requests. The first caller for a key runs the
//! producer; every caller that arrives while that request is still running awaits the
//! same shared future and receives the same result, success or failure.
//!
//! The in-flight map only keeps a weak reference to each shared future. The entry is
//! removed by a guard living inside the future, so it disappears when the request
//! settles and also when every waiter has been dropped before it could settle. A
//! cancelled request therefore never blocks a retry.

use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Weak};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared, WeakShared};
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::SyncError;

type SharedRequest<V> = Shared<BoxFuture<'static, Result<V, SyncError>>>;

struct InFlight<V> {
    id: u64,
    future: WeakShared<BoxFuture<'static, Result<V, SyncError>>>,
}

struct Registry<K, V> {
    next_id: u64,
    in_flight: HashMap<K, InFlight<V>>,
}

pub struct RequestCoalescer<K, V> {
    registry: Arc<Mutex<Registry<K, V>>>,
}

impl<K, V> Clone for RequestCoalescer<K, V> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<K, V> Default for RequestCoalescer<K, V>
where
    K: Hash + Eq + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> RequestCoalescer<K, V>
where
    K: Hash + Eq + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                next_id: 0,
                in_flight: HashMap::new(),
            })),
        }
    }

    /// Run `producer` for `key`, or join the request already running for it.
    ///
    /// The lookup and the registration happen under one lock acquisition, before the
    /// first suspension point, so two callers can never both become the producer.
    pub async fn get<F, Fut>(&self, key: K, producer: F) -> Result<V, SyncError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, SyncError>> + Send + 'static,
    {
        let request = self.join_or_register(key, producer);
        request.await
    }

    fn join_or_register<F, Fut>(&self, key: K, producer: F) -> SharedRequest<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, SyncError>> + Send + 'static,
    {
        let mut registry = self.registry.lock();

        if let Some(existing) = registry
            .in_flight
            .get(&key)
            .and_then(|entry| entry.future.upgrade())
        {
            debug!(key = ?key, "Joining in-flight request");
            return existing;
        }

        registry.next_id += 1;
        let id = registry.next_id;
        let guard = EntryGuard {
            registry: Arc::downgrade(&self.registry),
            key: key.clone(),
            id,
        };

        let request = producer();
        let shared = async move {
            let _guard = guard;
            request.await
        }
        .boxed()
        .shared();

        if let Some(weak) = shared.downgrade() {
            trace!(key = ?key, id = id, "Registered in-flight request");
            registry.in_flight.insert(key, InFlight { id, future: weak });
        }

        shared
    }

    /// Whether a request for `key` is currently running.
    pub fn in_flight(&self, key: &K) -> bool {
        // the upgraded handle may be the last strong one; drop it after unlocking
        let upgraded = {
            let registry = self.registry.lock();
            registry
                .in_flight
                .get(key)
                .and_then(|entry| entry.future.upgrade())
        };
        upgraded.is_some()
    }

    pub fn len(&self) -> usize {
        self.registry.lock().in_flight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget every registration. Running requests complete for their current waiters
    /// but new callers start fresh ones.
    pub fn reset(&self) {
        let drained: Vec<InFlight<V>> = {
            let mut registry = self.registry.lock();
            registry.in_flight.drain().map(|(_, entry)| entry).collect()
        };
        debug!(count = drained.len(), "Coalescer reset");
    }
}

/// Removes its registry entry when the request future completes or is dropped.
struct EntryGuard<K, V>
where
    K: Hash + Eq,
{
    registry: Weak<Mutex<Registry<K, V>>>,
    key: K,
    id: u64,
}

impl<K, V> Drop for EntryGuard<K, V>
where
    K: Hash + Eq,
{
    fn drop(&mut self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let removed = {
            let mut registry = registry.lock();
            // only remove our own registration, never a newer one for the same key
            if registry
                .in_flight
                .get(&self.key)
                .is_some_and(|entry| entry.id == self.id)
            {
                registry.in_flight.remove(&self.key)
            } else {
                None
            }
        };
        drop(removed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    fn coalescer() -> RequestCoalescer<String, u32> {
        RequestCoalescer::new()
    }

    #[tokio::test]
    async fn test_concurrent_calls_share_one_producer() {
        let coalescer = coalescer();
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());

        let make = |calls: Arc<AtomicUsize>, gate: Arc<Notify>| {
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                gate.notified().await;
                Ok(7)
            }
        };

        let first = coalescer.get("a".into(), make(calls.clone(), gate.clone()));
        let second = coalescer.get("a".into(), make(calls.clone(), gate.clone()));
        let release = async {
            tokio::task::yield_now().await;
            gate.notify_waiters();
        };

        let (a, b, _) = tokio::join!(first, second, release);
        assert_eq!(a.unwrap(), 7);
        assert_eq!(b.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(coalescer.is_empty());
    }

    #[tokio::test]
    async fn test_failure_is_shared_and_entry_removed() {
        let coalescer = coalescer();
        let gate = Arc::new(Notify::new());

        let g1 = gate.clone();
        let first = coalescer.get("a".into(), move || async move {
            g1.notified().await;
            Err(SyncError::Status(reqwest::StatusCode::INTERNAL_SERVER_ERROR))
        });
        let second = coalescer.get("a".into(), || async { Ok(1) });
        let release = async {
            tokio::task::yield_now().await;
            gate.notify_waiters();
        };

        let (a, b, _) = tokio::join!(first, second, release);
        assert!(matches!(a, Err(SyncError::Status(_))));
        assert!(matches!(b, Err(SyncError::Status(_))));
        assert!(!coalescer.in_flight(&"a".to_string()));

        // the next call is a fresh request
        let third = coalescer.get("a".into(), || async { Ok(3) }).await;
        assert_eq!(third.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_different_keys_do_not_coalesce() {
        let coalescer = coalescer();
        let calls = Arc::new(AtomicUsize::new(0));

        let c1 = calls.clone();
        let c2 = calls.clone();
        let (a, b) = tokio::join!(
            coalescer.get("a".into(), move || async move {
                c1.fetch_add(1, Ordering::SeqCst);
                Ok(1)
            }),
            coalescer.get("b".into(), move || async move {
                c2.fetch_add(1, Ordering::SeqCst);
                Ok(2)
            }),
        );
        assert_eq!((a.unwrap(), b.unwrap()), (1, 2));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_aborted_waiter_releases_entry() {
        let coalescer = coalescer();
        let pending = coalescer.get("a".into(), || async {
            std::future::pending::<()>().await;
            Ok(1)
        });

        let timed_out = tokio::time::timeout(Duration::from_millis(10), pending).await;
        assert!(timed_out.is_err());
        // the only waiter was dropped, so the ghost entry must be gone
        assert!(!coalescer.in_flight(&"a".to_string()));
        assert!(coalescer.is_empty());

        let retry = coalescer.get("a".into(), || async { Ok(2) }).await;
        assert_eq!(retry.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_reset_forgets_registrations() {
        let coalescer = coalescer();
        let gate = Arc::new(Notify::new());
        let g = gate.clone();
        let running = tokio::spawn({
            let coalescer = coalescer.clone();
            async move {
                coalescer
                    .get("a".into(), move || async move {
                        g.notified().await;
                        Ok(1)
                    })
                    .await
            }
        });
        while !coalescer.in_flight(&"a".to_string()) {
            tokio::task::yield_now().await;
        }

        coalescer.reset();
        assert!(coalescer.is_empty());
        let fresh = coalescer.get("a".into(), || async { Ok(5) }).await;
        assert_eq!(fresh.unwrap(), 5);

        gate.notify_waiters();
        assert_eq!(running.await.unwrap().unwrap(), 1);
    }
}
