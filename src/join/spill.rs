//! Disk-backed join stores
//!
//! Child candidates accumulate in memory until `commit_batch_size` of them
//! are buffered, then go to a gzip segment file of length-prefixed bincode
//! records. The parent index lives in a RocksDB instance per store. All of
//! it sits in one scratch directory that is removed when the provider and
//! its stores are dropped.

use async_trait::async_trait;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use futures::future;
use futures::stream::{self, StreamExt};
use rocksdb::{IteratorMode, Options, WriteBatch, DB};
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    ChildSideJoin, ChildSideJoinStore, ChildSideJoinStream, JoinStoreError, JoinStoreProvider,
    JoinStoreResult, ParentSideJoinKey, ParentSideJoinStore, ParentValues,
};

/// Scratch directory, removed on drop
#[derive(Debug)]
struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    fn create(root: &Path) -> JoinStoreResult<Self> {
        let path = root.join(format!("rml-join-{}", Uuid::new_v4()));
        fs::create_dir_all(&path)?;
        debug!("Created join scratch directory {}", path.display());
        Ok(Self { path })
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_dir_all(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("Failed to remove {}: {}", self.path.display(), e);
            }
        }
    }
}

/// Run file or RocksDB work on the blocking pool
async fn blocking<T, F>(work: F) -> JoinStoreResult<T>
where
    F: FnOnce() -> JoinStoreResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| JoinStoreError::Io(io::Error::new(io::ErrorKind::Other, e)))?
}

fn write_segment(path: &Path, joins: &[ChildSideJoin]) -> JoinStoreResult<()> {
    let file = File::create(path)?;
    let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::fast());
    for join in joins {
        let bytes = bincode::serialize(join)?;
        encoder.write_all(&(bytes.len() as u32).to_le_bytes())?;
        encoder.write_all(&bytes)?;
    }
    encoder.finish()?.flush()?;
    Ok(())
}

fn read_segment(path: &Path) -> JoinStoreResult<Vec<ChildSideJoin>> {
    let mut decoder = GzDecoder::new(BufReader::new(File::open(path)?));
    let mut joins = Vec::new();
    let mut len = [0u8; 4];
    loop {
        match decoder.read_exact(&mut len) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }
        let mut bytes = vec![0u8; u32::from_le_bytes(len) as usize];
        decoder.read_exact(&mut bytes)?;
        joins.push(bincode::deserialize(&bytes)?);
    }
    Ok(joins)
}

fn remove_segment(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        warn!("Failed to remove join segment {}: {}", path.display(), e);
    }
}

#[derive(Debug, Default)]
struct SpillState {
    buffer: Vec<ChildSideJoin>,
    segments: Vec<PathBuf>,
    next_segment: usize,
}

/// Child store that spills to segment files
#[derive(Debug)]
pub struct SpillChildStore {
    scratch: Arc<ScratchDir>,
    id: Uuid,
    commit_batch_size: usize,
    state: Mutex<SpillState>,
}

impl SpillChildStore {
    fn new(scratch: Arc<ScratchDir>, commit_batch_size: usize) -> Self {
        Self {
            scratch,
            id: Uuid::new_v4(),
            commit_batch_size: commit_batch_size.max(1),
            state: Mutex::new(SpillState::default()),
        }
    }

    fn lock(&self) -> JoinStoreResult<std::sync::MutexGuard<'_, SpillState>> {
        self.state
            .lock()
            .map_err(|_| JoinStoreError::Poisoned("spill state"))
    }

    /// Segment files written and not yet drained
    pub fn spilled_segments(&self) -> JoinStoreResult<usize> {
        Ok(self.lock()?.segments.len())
    }
}

#[async_trait]
impl ChildSideJoinStore for SpillChildStore {
    async fn add_all(&self, joins: Vec<ChildSideJoin>) -> JoinStoreResult<()> {
        let batches = {
            let mut state = self.lock()?;
            state.buffer.extend(joins);
            let mut batches = Vec::new();
            while state.buffer.len() >= self.commit_batch_size {
                let batch: Vec<_> = state.buffer.drain(..self.commit_batch_size).collect();
                let path = self
                    .scratch
                    .path
                    .join(format!("child-{}-{:06}.seg", self.id, state.next_segment));
                state.next_segment += 1;
                batches.push((path, batch));
            }
            batches
        };
        for (path, batch) in batches {
            let count = batch.len();
            let target = path.clone();
            blocking(move || write_segment(&target, &batch)).await?;
            debug!("Spilled {} join candidates to {}", count, path.display());
            self.lock()?.segments.push(path);
        }
        Ok(())
    }

    fn clearing_stream(&self) -> ChildSideJoinStream {
        let (segments, buffered) = match self.lock() {
            Ok(mut state) => (
                std::mem::take(&mut state.segments),
                std::mem::take(&mut state.buffer),
            ),
            Err(e) => return stream::once(future::ready(Err(e))).boxed(),
        };
        debug!(
            "Draining {} spilled segments and {} buffered join candidates",
            segments.len(),
            buffered.len()
        );
        let drain = SpillDrain {
            _scratch: Arc::clone(&self.scratch),
            segments: segments.into(),
            buffered: Some(buffered),
        };
        stream::unfold(drain, |mut drain| async move {
            let batch = drain.next_batch().await?;
            Some((stream::iter(batch), drain))
        })
        .flatten()
        .boxed()
    }
}

impl Drop for SpillChildStore {
    fn drop(&mut self) {
        if let Ok(state) = self.state.get_mut() {
            for path in state.segments.drain(..) {
                remove_segment(&path);
            }
        }
    }
}

/// Reads segments oldest first, deleting each once read, then the buffer
struct SpillDrain {
    _scratch: Arc<ScratchDir>,
    segments: VecDeque<PathBuf>,
    buffered: Option<Vec<ChildSideJoin>>,
}

impl SpillDrain {
    async fn next_batch(&mut self) -> Option<Vec<JoinStoreResult<ChildSideJoin>>> {
        if let Some(path) = self.segments.pop_front() {
            let read = blocking(move || {
                let read = read_segment(&path);
                remove_segment(&path);
                read
            })
            .await;
            return Some(match read {
                Ok(joins) => joins.into_iter().map(Ok).collect(),
                Err(e) => vec![Err(e)],
            });
        }
        let buffered = self.buffered.take()?;
        Some(buffered.into_iter().map(Ok).collect())
    }
}

impl Drop for SpillDrain {
    fn drop(&mut self) {
        for path in self.segments.drain(..) {
            remove_segment(&path);
        }
    }
}

/// RocksDB instance behind a [`SpillParentStore`], destroyed on drop
struct ParentDb {
    path: PathBuf,
    db: Option<DB>,
    write_lock: Mutex<()>,
    _scratch: Arc<ScratchDir>,
}

impl ParentDb {
    fn open(scratch: Arc<ScratchDir>) -> JoinStoreResult<Self> {
        let path = scratch.path.join(format!("parent-{}", Uuid::new_v4()));
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        let db = DB::open(&opts, &path)?;
        debug!("Opened parent join index at {}", path.display());
        Ok(Self {
            path,
            db: Some(db),
            write_lock: Mutex::new(()),
            _scratch: scratch,
        })
    }

    fn db(&self) -> JoinStoreResult<&DB> {
        self.db
            .as_ref()
            .ok_or_else(|| JoinStoreError::Io(io::Error::new(io::ErrorKind::Other, "parent index closed")))
    }

    fn write_guard(&self) -> JoinStoreResult<std::sync::MutexGuard<'_, ()>> {
        self.write_lock
            .lock()
            .map_err(|_| JoinStoreError::Poisoned("parent index"))
    }

    fn read(&self, key: &[u8]) -> JoinStoreResult<Option<ParentValues>> {
        match self.db()?.get(key)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn merge(&self, key: &[u8], values: ParentValues) -> JoinStoreResult<()> {
        let _guard = self.write_guard()?;
        let mut merged = self.read(key)?.unwrap_or_default();
        merged.extend(values);
        self.db()?.put(key, bincode::serialize(&merged)?)?;
        Ok(())
    }

    fn clear(&self) -> JoinStoreResult<()> {
        let _guard = self.write_guard()?;
        let db = self.db()?;
        let mut batch = WriteBatch::default();
        for item in db.iterator(IteratorMode::Start) {
            let (key, _) = item?;
            batch.delete(key);
        }
        db.write(batch)?;
        Ok(())
    }
}

impl Drop for ParentDb {
    fn drop(&mut self) {
        drop(self.db.take());
        if let Err(e) = DB::destroy(&Options::default(), &self.path) {
            warn!("Failed to destroy parent index {}: {}", self.path.display(), e);
        }
        let _ = fs::remove_dir_all(&self.path);
    }
}

/// Parent index in RocksDB
pub struct SpillParentStore {
    db: Arc<ParentDb>,
}

impl SpillParentStore {
    fn open(scratch: Arc<ScratchDir>) -> JoinStoreResult<Self> {
        Ok(Self {
            db: Arc::new(ParentDb::open(scratch)?),
        })
    }
}

#[async_trait]
impl ParentSideJoinStore for SpillParentStore {
    async fn put(&self, key: ParentSideJoinKey, values: ParentValues) -> JoinStoreResult<()> {
        let key = bincode::serialize(&key)?;
        let db = Arc::clone(&self.db);
        blocking(move || db.merge(&key, values)).await
    }

    async fn get(&self, key: &ParentSideJoinKey) -> JoinStoreResult<Option<ParentValues>> {
        let key = bincode::serialize(key)?;
        let db = Arc::clone(&self.db);
        blocking(move || db.read(&key)).await
    }

    async fn contains(&self, key: &ParentSideJoinKey) -> JoinStoreResult<bool> {
        let key = bincode::serialize(key)?;
        let db = Arc::clone(&self.db);
        blocking(move || Ok(db.db()?.get(&key)?.is_some())).await
    }

    async fn clear(&self) -> JoinStoreResult<()> {
        let db = Arc::clone(&self.db);
        blocking(move || db.clear()).await
    }
}

/// Spilling stores in a fresh scratch directory under `root`
pub struct SpillJoinStoreProvider {
    scratch: Arc<ScratchDir>,
    commit_batch_size: usize,
    children: Mutex<FxHashMap<String, Arc<SpillChildStore>>>,
    parents: Mutex<FxHashMap<String, Arc<SpillParentStore>>>,
}

impl SpillJoinStoreProvider {
    pub fn new(root: PathBuf, commit_batch_size: usize) -> JoinStoreResult<Self> {
        let scratch = ScratchDir::create(&root)?;
        info!(
            "Spilling joins to {} in batches of {}",
            scratch.path.display(),
            commit_batch_size
        );
        Ok(Self {
            scratch: Arc::new(scratch),
            commit_batch_size,
            children: Mutex::new(FxHashMap::default()),
            parents: Mutex::new(FxHashMap::default()),
        })
    }

    pub fn directory(&self) -> &Path {
        &self.scratch.path
    }

    /// Named child and parent stores not yet released
    pub fn store_count(&self) -> JoinStoreResult<usize> {
        let children = self.children.lock().map_err(|_| Self::poisoned())?.len();
        let parents = self.parents.lock().map_err(|_| Self::poisoned())?.len();
        Ok(children + parents)
    }

    fn poisoned() -> JoinStoreError {
        JoinStoreError::Poisoned("spill store registry")
    }
}

#[async_trait]
impl JoinStoreProvider for SpillJoinStoreProvider {
    fn child_store(&self, name: &str) -> JoinStoreResult<Arc<dyn ChildSideJoinStore>> {
        let mut children = self.children.lock().map_err(|_| Self::poisoned())?;
        let store = children.entry(name.to_string()).or_insert_with(|| {
            Arc::new(SpillChildStore::new(
                Arc::clone(&self.scratch),
                self.commit_batch_size,
            ))
        });
        Ok(Arc::clone(store) as Arc<dyn ChildSideJoinStore>)
    }

    fn parent_store(&self, name: &str) -> JoinStoreResult<Arc<dyn ParentSideJoinStore>> {
        let mut parents = self.parents.lock().map_err(|_| Self::poisoned())?;
        if let Some(store) = parents.get(name) {
            return Ok(Arc::clone(store) as Arc<dyn ParentSideJoinStore>);
        }
        let store = Arc::new(SpillParentStore::open(Arc::clone(&self.scratch))?);
        parents.insert(name.to_string(), Arc::clone(&store));
        Ok(store)
    }

    async fn release(&self, name: &str) -> JoinStoreResult<()> {
        let child = self
            .children
            .lock()
            .map_err(|_| Self::poisoned())?
            .remove(name);
        let parent = self
            .parents
            .lock()
            .map_err(|_| Self::poisoned())?
            .remove(name);
        if child.is_some() || parent.is_some() {
            debug!("Released spill join store {}", name);
        }
        // Segments and the RocksDB directory go with the last handle
        drop(child);
        if let Some(parent) = parent {
            blocking(move || {
                drop(parent);
                Ok(())
            })
            .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use tempfile::TempDir;

    fn segment_files(dir: &Path) -> usize {
        fs::read_dir(dir)
            .unwrap()
            .filter_map(Result::ok)
            .filter(|entry| entry.path().extension().map_or(false, |ext| ext == "seg"))
            .count()
    }

    #[tokio::test]
    async fn test_drain_once_spills_and_cleans_up() {
        let root = TempDir::new().unwrap();
        let provider = SpillJoinStoreProvider::new(root.path().to_path_buf(), 2).unwrap();
        let store = SpillChildStore::new(Arc::clone(&provider.scratch), 2);

        let joins: Vec<_> = (0..5).map(|i| child(&format!("c{}", i), &i.to_string())).collect();
        store.add_all(joins[..3].to_vec()).await.unwrap();
        store.add_all(joins[3..].to_vec()).await.unwrap();
        assert_eq!(store.spilled_segments().unwrap(), 2);
        assert_eq!(segment_files(provider.directory()), 2);

        let drained: Vec<_> = store
            .clearing_stream()
            .map(|item| item.unwrap())
            .collect()
            .await;
        assert_eq!(drained, joins);
        assert_eq!(segment_files(provider.directory()), 0);

        let again: Vec<_> = store.clearing_stream().collect().await;
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn test_abandoned_drain_removes_segments() {
        let root = TempDir::new().unwrap();
        let provider = SpillJoinStoreProvider::new(root.path().to_path_buf(), 1).unwrap();
        let store = provider.child_store("people:0:0").unwrap();
        store
            .add_all(vec![child("a", "1"), child("b", "2"), child("c", "3")])
            .await
            .unwrap();
        assert_eq!(segment_files(provider.directory()), 3);

        let mut drain = store.clearing_stream();
        assert_eq!(drain.next().await.unwrap().unwrap(), child("a", "1"));
        drop(drain);
        assert_eq!(segment_files(provider.directory()), 0);
    }

    #[tokio::test]
    async fn test_parent_store_round_trip() {
        let root = TempDir::new().unwrap();
        let provider = SpillJoinStoreProvider::new(root.path().to_path_buf(), 10).unwrap();
        let store = provider.parent_store("people").unwrap();
        let key = ParentSideJoinKey::new("id", "1");

        assert!(!store.contains(&key).await.unwrap());
        store.put(key.clone(), values(&["p1"])).await.unwrap();
        store.put(key.clone(), values(&["p2", "p1"])).await.unwrap();
        assert!(store.contains(&key).await.unwrap());
        assert_eq!(store.get(&key).await.unwrap(), Some(values(&["p1", "p2"])));

        let same = provider.parent_store("people").unwrap();
        assert!(same.contains(&key).await.unwrap());

        store.clear().await.unwrap();
        assert_eq!(store.get(&key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_scratch_directory_removed_on_drop() {
        let root = TempDir::new().unwrap();
        let provider = SpillJoinStoreProvider::new(root.path().to_path_buf(), 1).unwrap();
        let directory = provider.directory().to_path_buf();
        {
            let child_store = provider.child_store("c").unwrap();
            child_store.add_all(vec![child("a", "1")]).await.unwrap();
            let parent = provider.parent_store("p").unwrap();
            parent
                .put(ParentSideJoinKey::new("id", "1"), values(&["p1"]))
                .await
                .unwrap();
        }
        assert!(directory.exists());
        drop(provider);
        assert!(!directory.exists());
    }

    fn parent_dirs(dir: &Path) -> usize {
        fs::read_dir(dir)
            .unwrap()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_name().to_string_lossy().starts_with("parent-"))
            .count()
    }

    #[tokio::test]
    async fn test_release_destroys_parent_index() {
        let root = TempDir::new().unwrap();
        let provider = SpillJoinStoreProvider::new(root.path().to_path_buf(), 1).unwrap();
        let parent = provider.parent_store("run:teams").unwrap();
        parent
            .put(ParentSideJoinKey::new("id", "1"), values(&["p1"]))
            .await
            .unwrap();
        let child_store = provider.child_store("run:people").unwrap();
        child_store.add_all(vec![child("a", "1")]).await.unwrap();
        assert_eq!(provider.store_count().unwrap(), 2);
        assert_eq!(parent_dirs(provider.directory()), 1);

        drop(parent);
        drop(child_store);
        provider.release("run:teams").await.unwrap();
        provider.release("run:people").await.unwrap();
        assert_eq!(provider.store_count().unwrap(), 0);
        assert_eq!(parent_dirs(provider.directory()), 0);
        assert_eq!(segment_files(provider.directory()), 0);
    }
}
