//! Datasource cache.
//!
//! Connection-id-keyed cache of pooled datasource handles. Handles are
//! built lazily by a backend-specific factory and must be invalidated
//! when the connection record is updated or deleted; a stale pool would
//! keep serving with obsolete credentials.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::EngineResult;

/// Builds and tears down pooled handles for connection records.
#[async_trait]
pub trait DatasourceFactory: Send + Sync {
    type Handle: Clone + Send + Sync + 'static;

    /// Build a pooled handle from the stored connection record.
    async fn build(&self, connection_id: &str) -> EngineResult<Self::Handle>;

    /// Close an evicted handle.
    async fn close(&self, handle: Self::Handle);
}

/// Thread-safe id → pooled-handle cache.
pub struct DatasourceCache<F: DatasourceFactory> {
    factory: F,
    handles: DashMap<String, F::Handle>,
}

impl<F: DatasourceFactory> DatasourceCache<F> {
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            handles: DashMap::new(),
        }
    }

    /// Get the cached handle, building it on first use. A racing build
    /// keeps the first inserted handle and closes the loser.
    pub async fn get(&self, connection_id: &str) -> EngineResult<F::Handle> {
        if let Some(handle) = self.handles.get(connection_id) {
            return Ok(handle.clone());
        }

        let built = self.factory.build(connection_id).await?;
        match self.handles.entry(connection_id.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(existing) => {
                let winner = existing.get().clone();
                drop(existing);
                self.factory.close(built).await;
                Ok(winner)
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(built.clone());
                Ok(built)
            }
        }
    }

    /// Drop the cached handle and close it. Required after a connection
    /// update or delete.
    pub async fn invalidate(&self, connection_id: &str) {
        if let Some((_, handle)) = self.handles.remove(connection_id) {
            self.factory.close(handle).await;
        }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingFactory {
        built: AtomicUsize,
        closed: AtomicUsize,
    }

    #[async_trait]
    impl DatasourceFactory for Arc<CountingFactory> {
        type Handle = String;

        async fn build(&self, connection_id: &str) -> EngineResult<String> {
            let n = self.built.fetch_add(1, Ordering::SeqCst);
            Ok(format!("{connection_id}#{n}"))
        }

        async fn close(&self, _handle: String) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn builds_once_and_caches() {
        let factory = Arc::new(CountingFactory {
            built: AtomicUsize::new(0),
            closed: AtomicUsize::new(0),
        });
        let cache = DatasourceCache::new(factory.clone());

        let a = cache.get("conn1").await.unwrap();
        let b = cache.get("conn1").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(factory.built.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn invalidate_closes_and_rebuilds() {
        let factory = Arc::new(CountingFactory {
            built: AtomicUsize::new(0),
            closed: AtomicUsize::new(0),
        });
        let cache = DatasourceCache::new(factory.clone());

        let first = cache.get("conn1").await.unwrap();
        cache.invalidate("conn1").await;
        assert_eq!(factory.closed.load(Ordering::SeqCst), 1);

        let second = cache.get("conn1").await.unwrap();
        assert_ne!(first, second);
        assert_eq!(factory.built.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn invalidate_of_unknown_id_is_a_noop() {
        let factory = Arc::new(CountingFactory {
            built: AtomicUsize::new(0),
            closed: AtomicUsize::new(0),
        });
        let cache = DatasourceCache::new(factory.clone());
        cache.invalidate("ghost").await;
        assert_eq!(factory.closed.load(Ordering::SeqCst), 0);
        assert!(cache.is_empty());
    }
}
