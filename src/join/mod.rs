//! Join subsystem
//!
//! A referencing object map joins a child TriplesMap to the subjects of a
//! parent TriplesMap. While the parent streams, its subjects are indexed by
//! `(parent reference, value)` in a [`ParentSideJoinStore`]. While the child
//! streams, each record with an unresolved join becomes a [`ChildSideJoin`]
//! in a [`ChildSideJoinStore`]. After every pipeline has finished, child
//! stores are drained once and each candidate is looked up in the parent
//! index.
//!
//! Three interchangeable backends implement both sides:
//!
//! - [`memory`]: in-process maps
//! - [`spill`]: compressed segment files and RocksDB in a scratch directory
//! - [`remote`]: a Redis-compatible server over RESP

pub mod memory;
pub mod remote;
pub mod resp;
pub mod spill;

pub use memory::MemoryJoinStoreProvider;
pub use remote::{KvConnection, MemoryKv, RemoteJoinStoreProvider, RespConnection};
pub use spill::SpillJoinStoreProvider;

use async_trait::async_trait;
use futures::stream::BoxStream;
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::config::JoinStoreConfig;
use crate::generator::MappedValue;
use crate::rdf::{NamedNode, RdfSubject};

/// Join store errors
#[derive(Error, Debug)]
pub enum JoinStoreError {
    #[error("Join store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Join store serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Join store RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    #[error("Remote join store error: {0}")]
    Remote(String),

    #[error("Join store lock poisoned: {0}")]
    Poisoned(&'static str),
}

impl From<resp::RespError> for JoinStoreError {
    fn from(error: resp::RespError) -> Self {
        match error {
            resp::RespError::Io(e) => JoinStoreError::Io(e),
            other => JoinStoreError::Remote(other.to_string()),
        }
    }
}

pub type JoinStoreResult<T> = Result<T, JoinStoreError>;

/// One join condition of a child candidate, with the child's values
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChildSideJoinCondition {
    pub child_reference: String,
    pub child_values: Vec<String>,
    pub parent_reference: String,
}

/// A child record waiting for its parent objects
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChildSideJoin {
    pub subjects: Vec<MappedValue<RdfSubject>>,
    pub predicates: Vec<MappedValue<NamedNode>>,
    pub graphs: Vec<MappedValue<RdfSubject>>,
    pub conditions: Vec<ChildSideJoinCondition>,
}

/// Parent index key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParentSideJoinKey {
    pub parent_reference: String,
    pub parent_value: String,
}

impl ParentSideJoinKey {
    pub fn new(parent_reference: impl Into<String>, parent_value: impl Into<String>) -> Self {
        Self {
            parent_reference: parent_reference.into(),
            parent_value: parent_value.into(),
        }
    }
}

/// Subjects of the parent records that produced a key
pub type ParentValues = IndexSet<RdfSubject>;

/// Parent index: `(parent reference, value)` → parent subjects
#[async_trait]
pub trait ParentSideJoinStore: Send + Sync {
    /// Add `values` to the set stored under `key`
    async fn put(&self, key: ParentSideJoinKey, values: ParentValues) -> JoinStoreResult<()>;

    async fn get(&self, key: &ParentSideJoinKey) -> JoinStoreResult<Option<ParentValues>>;

    async fn contains(&self, key: &ParentSideJoinKey) -> JoinStoreResult<bool>;

    async fn clear(&self) -> JoinStoreResult<()>;
}

pub type ChildSideJoinStream = BoxStream<'static, JoinStoreResult<ChildSideJoin>>;

/// Child candidates, drained once
#[async_trait]
pub trait ChildSideJoinStore: Send + Sync {
    async fn add_all(&self, joins: Vec<ChildSideJoin>) -> JoinStoreResult<()>;

    /// Every candidate added so far, exactly once. The store is empty
    /// afterwards, including anything it spilled.
    fn clearing_stream(&self) -> ChildSideJoinStream;
}

/// Creates the named stores of one mapping run
#[async_trait]
pub trait JoinStoreProvider: Send + Sync {
    fn child_store(&self, name: &str) -> JoinStoreResult<Arc<dyn ChildSideJoinStore>>;

    fn parent_store(&self, name: &str) -> JoinStoreResult<Arc<dyn ParentSideJoinStore>>;

    /// Forget the child and parent stores named `name` and drop their data.
    /// Handles given out earlier stay usable until they are dropped.
    async fn release(&self, name: &str) -> JoinStoreResult<()>;
}

/// Provider for a configured backend
pub async fn provider_from_config(
    config: &JoinStoreConfig,
) -> JoinStoreResult<Arc<dyn JoinStoreProvider>> {
    Ok(match config {
        JoinStoreConfig::Memory => Arc::new(MemoryJoinStoreProvider::new()),
        JoinStoreConfig::Spill {
            directory,
            commit_batch_size,
        } => {
            let root = directory.clone().unwrap_or_else(std::env::temp_dir);
            Arc::new(SpillJoinStoreProvider::new(root, *commit_batch_size)?)
        }
        JoinStoreConfig::Remote {
            address,
            key_prefix,
        } => {
            let connection = RespConnection::connect(address).await?;
            Arc::new(RemoteJoinStoreProvider::new(
                Arc::new(connection),
                key_prefix.clone(),
            ))
        }
    })
}

/// Parent subjects matching every condition of `join`
///
/// A condition matches the parents indexed under any of its child values;
/// several conditions intersect. An empty result means no match.
pub async fn lookup_parents(
    store: &dyn ParentSideJoinStore,
    join: &ChildSideJoin,
) -> JoinStoreResult<ParentValues> {
    let mut matched: Option<ParentValues> = None;
    for condition in &join.conditions {
        let mut found = ParentValues::new();
        for value in &condition.child_values {
            let key = ParentSideJoinKey::new(condition.parent_reference.clone(), value.clone());
            if let Some(values) = store.get(&key).await? {
                found.extend(values);
            }
        }
        let next = match matched {
            None => found,
            Some(previous) => previous.intersection(&found).cloned().collect(),
        };
        if next.is_empty() {
            return Ok(next);
        }
        matched = Some(next);
    }
    Ok(matched.unwrap_or_default())
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[tokio::test]
    async fn test_lookup_intersects_conditions() {
        let store = memory::MemoryParentStore::default();
        store
            .put(ParentSideJoinKey::new("id", "1"), values(&["p1", "p2"]))
            .await
            .unwrap();
        store
            .put(ParentSideJoinKey::new("team", "red"), values(&["p2", "p3"]))
            .await
            .unwrap();

        let mut join = child("c", "1");
        assert_eq!(lookup_parents(&store, &join).await.unwrap(), values(&["p1", "p2"]));

        join.conditions.push(ChildSideJoinCondition {
            child_reference: "team".to_string(),
            child_values: vec!["red".to_string()],
            parent_reference: "team".to_string(),
        });
        assert_eq!(lookup_parents(&store, &join).await.unwrap(), values(&["p2"]));

        join.conditions[1].child_values = vec!["blue".to_string()];
        assert!(lookup_parents(&store, &join).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lookup_unindexed_value_is_empty() {
        let store = memory::MemoryParentStore::default();
        let join = child("c", "never-indexed");
        assert!(lookup_parents(&store, &join).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lookup_any_child_value() {
        let store = memory::MemoryParentStore::default();
        store
            .put(ParentSideJoinKey::new("id", "2"), values(&["p2"]))
            .await
            .unwrap();
        let mut join = child("c", "1");
        join.conditions[0].child_values.push("2".to_string());
        assert_eq!(lookup_parents(&store, &join).await.unwrap(), values(&["p2"]));
    }
}
