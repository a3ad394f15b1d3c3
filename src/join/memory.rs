//! In-process join stores

use async_trait::async_trait;
use futures::future;
use futures::stream::{self, StreamExt};
use rustc_hash::FxHashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

use super::{
    ChildSideJoin, ChildSideJoinStore, ChildSideJoinStream, JoinStoreError, JoinStoreProvider,
    JoinStoreResult, ParentSideJoinKey, ParentSideJoinStore, ParentValues,
};

fn poisoned<T>(_: PoisonError<T>) -> JoinStoreError {
    JoinStoreError::Poisoned("in-memory join store")
}

#[derive(Debug, Default)]
pub struct MemoryChildStore {
    joins: Mutex<Vec<ChildSideJoin>>,
}

#[async_trait]
impl ChildSideJoinStore for MemoryChildStore {
    async fn add_all(&self, joins: Vec<ChildSideJoin>) -> JoinStoreResult<()> {
        self.joins.lock().map_err(poisoned)?.extend(joins);
        Ok(())
    }

    fn clearing_stream(&self) -> ChildSideJoinStream {
        let drained = match self.joins.lock() {
            Ok(mut stored) => std::mem::take(&mut *stored),
            Err(e) => return stream::once(future::ready(Err(poisoned(e)))).boxed(),
        };
        debug!("Draining {} in-memory join candidates", drained.len());
        stream::iter(drained.into_iter().map(Ok)).boxed()
    }
}

#[derive(Debug, Default)]
pub struct MemoryParentStore {
    index: Mutex<FxHashMap<ParentSideJoinKey, ParentValues>>,
}

#[async_trait]
impl ParentSideJoinStore for MemoryParentStore {
    async fn put(&self, key: ParentSideJoinKey, values: ParentValues) -> JoinStoreResult<()> {
        self.index
            .lock()
            .map_err(poisoned)?
            .entry(key)
            .or_default()
            .extend(values);
        Ok(())
    }

    async fn get(&self, key: &ParentSideJoinKey) -> JoinStoreResult<Option<ParentValues>> {
        Ok(self.index.lock().map_err(poisoned)?.get(key).cloned())
    }

    async fn contains(&self, key: &ParentSideJoinKey) -> JoinStoreResult<bool> {
        Ok(self.index.lock().map_err(poisoned)?.contains_key(key))
    }

    async fn clear(&self) -> JoinStoreResult<()> {
        self.index.lock().map_err(poisoned)?.clear();
        Ok(())
    }
}

/// Hands out in-memory stores; a name maps to the same store until released
#[derive(Debug, Default)]
pub struct MemoryJoinStoreProvider {
    children: Mutex<FxHashMap<String, Arc<MemoryChildStore>>>,
    parents: Mutex<FxHashMap<String, Arc<MemoryParentStore>>>,
}

impl MemoryJoinStoreProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Named child and parent stores not yet released
    pub fn store_count(&self) -> JoinStoreResult<usize> {
        let children = self.children.lock().map_err(poisoned)?.len();
        let parents = self.parents.lock().map_err(poisoned)?.len();
        Ok(children + parents)
    }
}

#[async_trait]
impl JoinStoreProvider for MemoryJoinStoreProvider {
    fn child_store(&self, name: &str) -> JoinStoreResult<Arc<dyn ChildSideJoinStore>> {
        let mut children = self.children.lock().map_err(poisoned)?;
        Ok(Arc::clone(children.entry(name.to_string()).or_default()) as Arc<dyn ChildSideJoinStore>)
    }

    fn parent_store(&self, name: &str) -> JoinStoreResult<Arc<dyn ParentSideJoinStore>> {
        let mut parents = self.parents.lock().map_err(poisoned)?;
        Ok(Arc::clone(parents.entry(name.to_string()).or_default()) as Arc<dyn ParentSideJoinStore>)
    }

    async fn release(&self, name: &str) -> JoinStoreResult<()> {
        let child = self.children.lock().map_err(poisoned)?.remove(name);
        let parent = self.parents.lock().map_err(poisoned)?.remove(name);
        if let Some(child) = child {
            child.joins.lock().map_err(poisoned)?.clear();
        }
        if let Some(parent) = parent {
            parent.clear().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;

    #[tokio::test]
    async fn test_drain_once() {
        let store = MemoryChildStore::default();
        let (a, b) = (child("a", "1"), child("b", "2"));
        store.add_all(vec![a.clone(), b.clone()]).await.unwrap();

        let drained: Vec<_> = store
            .clearing_stream()
            .map(|item| item.unwrap())
            .collect()
            .await;
        assert_eq!(drained, vec![a, b]);

        let again: Vec<_> = store.clearing_stream().collect().await;
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn test_parent_put_get_contains_clear() {
        let store = MemoryParentStore::default();
        let key = ParentSideJoinKey::new("id", "1");
        assert!(!store.contains(&key).await.unwrap());

        store.put(key.clone(), values(&["p1"])).await.unwrap();
        store.put(key.clone(), values(&["p2", "p1"])).await.unwrap();
        assert!(store.contains(&key).await.unwrap());
        assert_eq!(store.get(&key).await.unwrap(), Some(values(&["p1", "p2"])));

        store.clear().await.unwrap();
        assert_eq!(store.get(&key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_provider_shares_named_stores() {
        let provider = MemoryJoinStoreProvider::new();
        let first = provider.parent_store("people").unwrap();
        first
            .put(ParentSideJoinKey::new("id", "1"), values(&["p1"]))
            .await
            .unwrap();
        let second = provider.parent_store("people").unwrap();
        assert!(second
            .contains(&ParentSideJoinKey::new("id", "1"))
            .await
            .unwrap());
        let other = provider.parent_store("teams").unwrap();
        assert!(!other
            .contains(&ParentSideJoinKey::new("id", "1"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_release_forgets_the_store() {
        let provider = MemoryJoinStoreProvider::new();
        let child_store = provider.child_store("run:people").unwrap();
        child_store.add_all(vec![child("a", "1")]).await.unwrap();
        let parent = provider.parent_store("run:teams").unwrap();
        parent
            .put(ParentSideJoinKey::new("id", "1"), values(&["p1"]))
            .await
            .unwrap();
        assert_eq!(provider.store_count().unwrap(), 2);

        provider.release("run:people").await.unwrap();
        provider.release("run:teams").await.unwrap();
        provider.release("never-created").await.unwrap();
        assert_eq!(provider.store_count().unwrap(), 0);
        assert!(!parent
            .contains(&ParentSideJoinKey::new("id", "1"))
            .await
            .unwrap());

        let fresh = provider.child_store("run:people").unwrap();
        let drained: Vec<_> = fresh.clearing_stream().collect().await;
        assert!(drained.is_empty());
    }

    #[tokio::test]
    async fn test_poisoned_lock_is_an_error() {
        let store = Arc::new(MemoryChildStore::default());
        let holder = Arc::clone(&store);
        let _ = std::thread::spawn(move || {
            let _guard = holder.joins.lock().unwrap();
            panic!("panicked while holding the lock");
        })
        .join();

        assert!(matches!(
            store.add_all(vec![child("a", "1")]).await,
            Err(JoinStoreError::Poisoned(_))
        ));
        let drained: Vec<_> = store.clearing_stream().collect().await;
        assert!(matches!(drained.as_slice(), [Err(JoinStoreError::Poisoned(_))]));

        let parents = Arc::new(MemoryParentStore::default());
        let holder = Arc::clone(&parents);
        let _ = std::thread::spawn(move || {
            let _guard = holder.index.lock().unwrap();
            panic!("panicked while holding the lock");
        })
        .join();
        assert!(matches!(
            parents.get(&ParentSideJoinKey::new("id", "1")).await,
            Err(JoinStoreError::Poisoned(_))
        ));
    }
}
