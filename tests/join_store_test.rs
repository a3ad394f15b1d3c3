use futures::StreamExt;
use samyama_rml::generator::MappedValue;
use samyama_rml::join::{
    lookup_parents, ChildSideJoin, ChildSideJoinCondition, JoinStoreProvider, MemoryJoinStoreProvider,
    MemoryKv, ParentSideJoinKey, ParentValues, RemoteJoinStoreProvider, SpillJoinStoreProvider,
};
use samyama_rml::{NamedNode, RdfSubject};
use std::sync::Arc;
use tempfile::TempDir;

fn subject(name: &str) -> RdfSubject {
    RdfSubject::from(NamedNode::new(format!("http://example.org/{}", name)).unwrap())
}

fn candidate(name: &str, team: &str) -> ChildSideJoin {
    ChildSideJoin {
        subjects: vec![MappedValue::new(subject(name))],
        predicates: vec![MappedValue::new(
            NamedNode::new("http://example.org/memberOf").unwrap(),
        )],
        graphs: Vec::new(),
        conditions: vec![ChildSideJoinCondition {
            child_reference: "team".to_string(),
            child_values: vec![team.to_string()],
            parent_reference: "code".to_string(),
        }],
    }
}

fn parents(names: &[&str]) -> ParentValues {
    names.iter().map(|n| subject(n)).collect()
}

async fn check_drain_once(provider: &dyn JoinStoreProvider) {
    let store = provider.child_store("people:1:0").unwrap();
    let (a, b) = (candidate("ada", "red"), candidate("grace", "blue"));
    store.add_all(vec![a.clone(), b.clone()]).await.unwrap();

    let drained: Vec<ChildSideJoin> = store
        .clearing_stream()
        .map(|item| item.unwrap())
        .collect()
        .await;
    assert_eq!(drained.len(), 2);
    assert!(drained.contains(&a));
    assert!(drained.contains(&b));

    let again: Vec<_> = store.clearing_stream().collect().await;
    assert!(again.is_empty(), "store must be empty after a drain");
}

async fn check_parent_index(provider: &dyn JoinStoreProvider) {
    let store = provider.parent_store("teams").unwrap();
    let red = ParentSideJoinKey::new("code", "red");

    assert!(!store.contains(&red).await.unwrap());
    store.put(red.clone(), parents(&["team/red"])).await.unwrap();
    store.put(red.clone(), parents(&["team/red2"])).await.unwrap();
    assert!(store.contains(&red).await.unwrap());
    assert_eq!(
        store.get(&red).await.unwrap(),
        Some(parents(&["team/red", "team/red2"]))
    );

    // Example: a value that was never indexed joins nothing
    let orphan = candidate("alan", "green");
    assert!(lookup_parents(store.as_ref(), &orphan).await.unwrap().is_empty());
    let member = candidate("ada", "red");
    assert_eq!(
        lookup_parents(store.as_ref(), &member).await.unwrap().len(),
        2
    );

    store.clear().await.unwrap();
    assert!(!store.contains(&red).await.unwrap());
}

#[tokio::test]
async fn test_memory_backend() {
    let provider = MemoryJoinStoreProvider::new();
    check_drain_once(&provider).await;
    check_parent_index(&provider).await;
}

#[tokio::test]
async fn test_spill_backend_below_batch_size() {
    let root = TempDir::new().unwrap();
    let provider = SpillJoinStoreProvider::new(root.path().to_path_buf(), 100).unwrap();
    check_drain_once(&provider).await;
    check_parent_index(&provider).await;
}

#[tokio::test]
async fn test_spill_backend_past_batch_size() {
    let root = TempDir::new().unwrap();
    let provider = SpillJoinStoreProvider::new(root.path().to_path_buf(), 1).unwrap();
    check_drain_once(&provider).await;

    let store = provider.child_store("big").unwrap();
    let all: Vec<_> = (0..25)
        .map(|i| candidate(&format!("p{}", i), &format!("t{}", i % 3)))
        .collect();
    for chunk in all.chunks(4) {
        store.add_all(chunk.to_vec()).await.unwrap();
    }
    let drained: Vec<_> = store
        .clearing_stream()
        .map(|item| item.unwrap())
        .collect()
        .await;
    assert_eq!(drained, all);
}

#[tokio::test]
async fn test_remote_backend_with_in_memory_server() {
    let kv = Arc::new(MemoryKv::new());
    let provider = RemoteJoinStoreProvider::new(kv.clone(), "it");
    check_drain_once(&provider).await;
    check_parent_index(&provider).await;
    assert_eq!(kv.key_count(), 0);
}
