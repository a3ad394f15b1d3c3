//! Join stores on a Redis-compatible key/value server
//!
//! Child candidates are bincode blobs in one list per store, drained with
//! `MULTI / LRANGE / DEL / EXEC` so a drain sees every element exactly once.
//! Parent keys are sets of serialized subjects; each store also keeps a set
//! of its own keys so `clear` can delete them.

use async_trait::async_trait;
use bytes::BytesMut;
use futures::stream::{self, StreamExt, TryStreamExt};
use indexmap::IndexSet;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::resp::RespValue;
use super::{
    ChildSideJoin, ChildSideJoinStore, ChildSideJoinStream, JoinStoreError, JoinStoreProvider,
    JoinStoreResult, ParentSideJoinKey, ParentSideJoinStore, ParentValues,
};
use crate::rdf::RdfSubject;

/// One command: name followed by its arguments
pub type Command = Vec<Vec<u8>>;

pub fn command<I, A>(parts: I) -> Command
where
    I: IntoIterator<Item = A>,
    A: AsRef<[u8]>,
{
    parts.into_iter().map(|part| part.as_ref().to_vec()).collect()
}

/// A connection to the key/value server
#[async_trait]
pub trait KvConnection: Send + Sync {
    /// Run one command. Error replies become [`JoinStoreError::Remote`].
    async fn call(&self, command: Command) -> JoinStoreResult<RespValue>;

    /// Run `commands` atomically and return their replies in order
    async fn transaction(&self, commands: Vec<Command>) -> JoinStoreResult<Vec<RespValue>>;
}

fn reply(value: RespValue) -> JoinStoreResult<RespValue> {
    match value {
        RespValue::Error(message) => Err(JoinStoreError::Remote(message)),
        other => Ok(other),
    }
}

struct ConnectionState {
    address: String,
    stream: TcpStream,
    buffer: BytesMut,
    /// Set after a transport error; the reply stream can no longer be trusted
    broken: bool,
}

impl ConnectionState {
    async fn send(&mut self, command: &Command) -> JoinStoreResult<()> {
        let mut out = Vec::new();
        RespValue::command(command).encode(&mut out)?;
        self.stream.write_all(&out).await?;
        Ok(())
    }

    async fn receive(&mut self) -> JoinStoreResult<RespValue> {
        loop {
            if let Some(value) = RespValue::decode(&mut self.buffer)? {
                return Ok(value);
            }
            if self.stream.read_buf(&mut self.buffer).await? == 0 {
                return Err(JoinStoreError::Remote("connection closed by server".to_string()));
            }
        }
    }

    /// Send one command and read its raw reply
    async fn exchange(&mut self, command: &Command) -> JoinStoreResult<RespValue> {
        if self.broken {
            return Err(JoinStoreError::Remote(format!(
                "connection to {} is unusable after an earlier failure",
                self.address
            )));
        }
        let result = match self.send(command).await {
            Ok(()) => self.receive().await,
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            warn!("Remote join store connection to {} failed: {}", self.address, e);
            self.broken = true;
        }
        result
    }

    async fn round_trip(&mut self, command: &Command) -> JoinStoreResult<RespValue> {
        reply(self.exchange(command).await?)
    }

    async fn transaction(&mut self, commands: &[Command]) -> JoinStoreResult<Vec<RespValue>> {
        self.round_trip(&command(["MULTI"])).await?;
        for queued in commands {
            if let Err(e) = self.round_trip(queued).await {
                if let Err(discard) = self.round_trip(&command(["DISCARD"])).await {
                    warn!("DISCARD after failed MULTI failed: {}", discard);
                }
                return Err(e);
            }
        }
        match self.round_trip(&command(["EXEC"])).await? {
            RespValue::Array(replies) => replies.into_iter().map(reply).collect(),
            RespValue::Null => Err(JoinStoreError::Remote("transaction aborted".to_string())),
            other => Err(JoinStoreError::Remote(format!(
                "unexpected EXEC reply: {:?}",
                other
            ))),
        }
    }
}

enum Request {
    Call(Command, oneshot::Sender<JoinStoreResult<RespValue>>),
    Transaction(Vec<Command>, oneshot::Sender<JoinStoreResult<Vec<RespValue>>>),
}

/// Owns the socket and runs each request to completion, in arrival order.
/// A caller that stops waiting only loses its reply.
async fn serve_requests(mut state: ConnectionState, mut requests: mpsc::UnboundedReceiver<Request>) {
    while let Some(request) = requests.recv().await {
        match request {
            Request::Call(command, respond) => {
                let _ = respond.send(state.round_trip(&command).await);
            }
            Request::Transaction(commands, respond) => {
                let _ = respond.send(state.transaction(&commands).await);
            }
        }
    }
    debug!("Remote join store connection to {} closed", state.address);
}

/// RESP over TCP
///
/// The socket belongs to a background task. Requests are queued to it and
/// never interleave, and a dropped caller cannot leave a reply unread on
/// the wire.
pub struct RespConnection {
    address: String,
    requests: mpsc::UnboundedSender<Request>,
}

impl RespConnection {
    pub async fn connect(address: impl ToSocketAddrs + fmt::Display) -> JoinStoreResult<Self> {
        let label = address.to_string();
        let stream = TcpStream::connect(address).await?;
        stream.set_nodelay(true)?;
        info!("Connected to remote join store at {}", label);

        let (requests, receiver) = mpsc::unbounded_channel();
        tokio::spawn(serve_requests(
            ConnectionState {
                address: label.clone(),
                stream,
                buffer: BytesMut::with_capacity(4096),
                broken: false,
            },
            receiver,
        ));
        Ok(Self {
            address: label,
            requests,
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    fn closed(&self) -> JoinStoreError {
        JoinStoreError::Remote(format!("connection to {} is closed", self.address))
    }
}

#[async_trait]
impl KvConnection for RespConnection {
    async fn call(&self, command: Command) -> JoinStoreResult<RespValue> {
        let (respond, response) = oneshot::channel();
        self.requests
            .send(Request::Call(command, respond))
            .map_err(|_| self.closed())?;
        response.await.map_err(|_| self.closed())?
    }

    async fn transaction(&self, commands: Vec<Command>) -> JoinStoreResult<Vec<RespValue>> {
        let (respond, response) = oneshot::channel();
        self.requests
            .send(Request::Transaction(commands, respond))
            .map_err(|_| self.closed())?;
        response.await.map_err(|_| self.closed())?
    }
}

impl fmt::Debug for RespConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RespConnection")
            .field("address", &self.address)
            .finish()
    }
}

#[derive(Debug, Default)]
struct KvState {
    lists: HashMap<Vec<u8>, Vec<Vec<u8>>>,
    sets: HashMap<Vec<u8>, IndexSet<Vec<u8>>>,
}

impl KvState {
    fn apply(&mut self, command: &[Vec<u8>]) -> RespValue {
        let Some((name, args)) = command.split_first() else {
            return RespValue::Error("ERR empty command".to_string());
        };
        let name = String::from_utf8_lossy(name).to_ascii_uppercase();
        match (name.as_str(), args) {
            ("PING", _) => RespValue::SimpleString("PONG".to_string()),
            ("RPUSH", [key, values @ ..]) if !values.is_empty() => {
                let list = self.lists.entry(key.clone()).or_default();
                list.extend(values.iter().cloned());
                RespValue::Integer(list.len() as i64)
            }
            ("LLEN", [key]) => {
                RespValue::Integer(self.lists.get(key).map_or(0, |list| list.len() as i64))
            }
            ("LRANGE", [key, start, stop]) => {
                let list = self.lists.get(key).map(Vec::as_slice).unwrap_or(&[]);
                match (index(start, list.len()), index(stop, list.len())) {
                    (Some(start), Some(stop)) if start <= stop && start < list.len() => {
                        let stop = stop.min(list.len() - 1);
                        bulk_array(list[start..=stop].iter().cloned())
                    }
                    (Some(_), Some(_)) => RespValue::Array(Vec::new()),
                    _ => RespValue::Error("ERR value is not an integer".to_string()),
                }
            }
            ("SADD", [key, members @ ..]) if !members.is_empty() => {
                let set = self.sets.entry(key.clone()).or_default();
                let added = members.iter().filter(|m| set.insert((*m).clone())).count();
                RespValue::Integer(added as i64)
            }
            ("SMEMBERS", [key]) => bulk_array(
                self.sets
                    .get(key)
                    .into_iter()
                    .flat_map(|set| set.iter().cloned()),
            ),
            ("EXISTS", keys) if !keys.is_empty() => RespValue::Integer(
                keys.iter()
                    .filter(|k| self.lists.contains_key(*k) || self.sets.contains_key(*k))
                    .count() as i64,
            ),
            ("DEL", keys) if !keys.is_empty() => RespValue::Integer(
                keys.iter()
                    .filter(|k| {
                        let list = self.lists.remove(*k).is_some();
                        let set = self.sets.remove(*k).is_some();
                        list || set
                    })
                    .count() as i64,
            ),
            _ => RespValue::Error(format!("ERR unknown command or arity '{}'", name)),
        }
    }
}

/// Resolve a Redis list index (negative counts from the end)
fn index(raw: &[u8], len: usize) -> Option<usize> {
    let value: i64 = std::str::from_utf8(raw).ok()?.parse().ok()?;
    if value >= 0 {
        Some(value as usize)
    } else {
        Some((len as i64 + value).max(0) as usize)
    }
}

fn bulk_array(items: impl Iterator<Item = Vec<u8>>) -> RespValue {
    RespValue::Array(items.map(|item| RespValue::BulkString(Some(item))).collect())
}

/// In-process stand-in for the key/value server
///
/// Understands the commands the remote stores send: `RPUSH`, `LRANGE`,
/// `LLEN`, `SADD`, `SMEMBERS`, `EXISTS`, `DEL` and `PING`.
#[derive(Debug, Default)]
pub struct MemoryKv {
    state: Mutex<KvState>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply `commands` under one lock and return the raw replies
    pub fn execute(&self, commands: &[Command]) -> Vec<RespValue> {
        match self.state.lock() {
            Ok(mut state) => commands.iter().map(|c| state.apply(c)).collect(),
            Err(_) => commands
                .iter()
                .map(|_| RespValue::Error("ERR store poisoned".to_string()))
                .collect(),
        }
    }

    /// Number of keys currently held
    pub fn key_count(&self) -> usize {
        self.state
            .lock()
            .map(|state| state.lists.len() + state.sets.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl KvConnection for MemoryKv {
    async fn call(&self, command: Command) -> JoinStoreResult<RespValue> {
        let mut replies = self.execute(&[command]);
        reply(replies.pop().unwrap_or(RespValue::Null))
    }

    async fn transaction(&self, commands: Vec<Command>) -> JoinStoreResult<Vec<RespValue>> {
        self.execute(&commands).into_iter().map(reply).collect()
    }
}

/// Child store backed by one remote list
pub struct RemoteChildStore {
    connection: Arc<dyn KvConnection>,
    key: Vec<u8>,
}

#[async_trait]
impl ChildSideJoinStore for RemoteChildStore {
    async fn add_all(&self, joins: Vec<ChildSideJoin>) -> JoinStoreResult<()> {
        if joins.is_empty() {
            return Ok(());
        }
        let mut push = vec![b"RPUSH".to_vec(), self.key.clone()];
        for join in &joins {
            push.push(bincode::serialize(join)?);
        }
        self.connection.call(push).await?;
        Ok(())
    }

    fn clearing_stream(&self) -> ChildSideJoinStream {
        let connection = Arc::clone(&self.connection);
        let key = self.key.clone();
        stream::once(async move {
            let replies = connection
                .transaction(vec![
                    vec![b"LRANGE".to_vec(), key.clone(), b"0".to_vec(), b"-1".to_vec()],
                    vec![b"DEL".to_vec(), key.clone()],
                ])
                .await?;
            let items = match replies.first() {
                Some(range) => range.as_array()?.to_vec(),
                None => Vec::new(),
            };
            debug!(
                "Drained {} join candidates from {}",
                items.len(),
                String::from_utf8_lossy(&key)
            );
            let joins: Vec<JoinStoreResult<ChildSideJoin>> = items
                .into_iter()
                .map(|item| -> JoinStoreResult<ChildSideJoin> {
                    let bytes = item.as_bulk_string()?.unwrap_or_default();
                    Ok(bincode::deserialize(bytes)?)
                })
                .collect();
            Ok::<_, JoinStoreError>(stream::iter(joins))
        })
        .try_flatten()
        .boxed()
    }
}

/// Parent store backed by remote sets
pub struct RemoteParentStore {
    connection: Arc<dyn KvConnection>,
    prefix: Vec<u8>,
    index_key: Vec<u8>,
}

impl RemoteParentStore {
    fn key(&self, key: &ParentSideJoinKey) -> JoinStoreResult<Vec<u8>> {
        let mut out = self.prefix.clone();
        out.push(b':');
        out.extend(bincode::serialize(key)?);
        Ok(out)
    }
}

#[async_trait]
impl ParentSideJoinStore for RemoteParentStore {
    async fn put(&self, key: ParentSideJoinKey, values: ParentValues) -> JoinStoreResult<()> {
        if values.is_empty() {
            return Ok(());
        }
        let key = self.key(&key)?;
        let mut add = vec![b"SADD".to_vec(), key.clone()];
        for value in &values {
            add.push(bincode::serialize(value)?);
        }
        self.connection
            .transaction(vec![add, vec![b"SADD".to_vec(), self.index_key.clone(), key]])
            .await?;
        Ok(())
    }

    async fn get(&self, key: &ParentSideJoinKey) -> JoinStoreResult<Option<ParentValues>> {
        let members = self
            .connection
            .call(vec![b"SMEMBERS".to_vec(), self.key(key)?])
            .await?;
        let members = members.as_array()?;
        if members.is_empty() {
            return Ok(None);
        }
        let mut values = ParentValues::with_capacity(members.len());
        for member in members {
            let bytes = member.as_bulk_string()?.unwrap_or_default();
            values.insert(bincode::deserialize::<RdfSubject>(bytes)?);
        }
        Ok(Some(values))
    }

    async fn contains(&self, key: &ParentSideJoinKey) -> JoinStoreResult<bool> {
        let exists = self
            .connection
            .call(vec![b"EXISTS".to_vec(), self.key(key)?])
            .await?;
        Ok(exists.as_integer()? > 0)
    }

    async fn clear(&self) -> JoinStoreResult<()> {
        let keys = self
            .connection
            .call(vec![b"SMEMBERS".to_vec(), self.index_key.clone()])
            .await?;
        let mut delete = vec![b"DEL".to_vec(), self.index_key.clone()];
        for key in keys.as_array()? {
            if let Some(bytes) = key.as_bulk_string()? {
                delete.push(bytes.to_vec());
            }
        }
        self.connection.call(delete).await?;
        Ok(())
    }
}

/// Stores on one shared connection, keys namespaced by `key_prefix`
pub struct RemoteJoinStoreProvider {
    connection: Arc<dyn KvConnection>,
    key_prefix: String,
}

impl RemoteJoinStoreProvider {
    pub fn new(connection: Arc<dyn KvConnection>, key_prefix: impl Into<String>) -> Self {
        Self {
            connection,
            key_prefix: key_prefix.into(),
        }
    }
}

#[async_trait]
impl JoinStoreProvider for RemoteJoinStoreProvider {
    fn child_store(&self, name: &str) -> JoinStoreResult<Arc<dyn ChildSideJoinStore>> {
        Ok(Arc::new(RemoteChildStore {
            connection: Arc::clone(&self.connection),
            key: format!("{}:child:{}", self.key_prefix, name).into_bytes(),
        }))
    }

    fn parent_store(&self, name: &str) -> JoinStoreResult<Arc<dyn ParentSideJoinStore>> {
        let prefix = format!("{}:parent:{}", self.key_prefix, name);
        Ok(Arc::new(RemoteParentStore {
            connection: Arc::clone(&self.connection),
            index_key: format!("{}:keys", prefix).into_bytes(),
            prefix: prefix.into_bytes(),
        }))
    }

    async fn release(&self, name: &str) -> JoinStoreResult<()> {
        self.parent_store(name)?.clear().await?;
        self.connection
            .call(vec![
                b"DEL".to_vec(),
                format!("{}:child:{}", self.key_prefix, name).into_bytes(),
            ])
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use std::time::Duration;
    use tokio::net::TcpListener;

    /// Reply to `command` only after `delay`
    type SlowCommand = Option<(&'static [u8], Duration)>;

    /// Minimal RESP server over a [`MemoryKv`], with MULTI/EXEC queueing
    async fn serve(listener: TcpListener, kv: Arc<MemoryKv>, slow: SlowCommand) {
        while let Ok((mut socket, _)) = listener.accept().await {
            let kv = Arc::clone(&kv);
            tokio::spawn(async move {
                let mut buffer = BytesMut::new();
                let mut queued: Option<Vec<Command>> = None;
                loop {
                    let frame = match RespValue::decode(&mut buffer) {
                        Ok(Some(frame)) => frame,
                        Ok(None) => match socket.read_buf(&mut buffer).await {
                            Ok(0) | Err(_) => return,
                            Ok(_) => continue,
                        },
                        Err(_) => return,
                    };
                    let parts: Command = frame
                        .as_array()
                        .unwrap()
                        .iter()
                        .map(|p| p.as_bulk_string().unwrap().unwrap().to_vec())
                        .collect();
                    let name = parts[0].clone();
                    if let Some((slow_name, delay)) = slow {
                        if name.as_slice() == slow_name {
                            tokio::time::sleep(delay).await;
                        }
                    }
                    let response = match (name.as_slice(), queued.take()) {
                        (b"MULTI", _) => {
                            queued = Some(Vec::new());
                            RespValue::SimpleString("OK".to_string())
                        }
                        (b"EXEC", Some(commands)) => RespValue::Array(kv.execute(&commands)),
                        (b"DISCARD", Some(_)) => RespValue::SimpleString("OK".to_string()),
                        (_, Some(mut pending)) => {
                            pending.push(parts);
                            queued = Some(pending);
                            RespValue::SimpleString("QUEUED".to_string())
                        }
                        (_, None) => kv.execute(&[parts]).remove(0),
                    };
                    let mut out = Vec::new();
                    response.encode(&mut out).unwrap();
                    socket.write_all(&out).await.unwrap();
                }
            });
        }
    }

    async fn tcp_connection_with(slow: SlowCommand) -> (RespConnection, Arc<MemoryKv>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let kv = Arc::new(MemoryKv::new());
        tokio::spawn(serve(listener, Arc::clone(&kv), slow));
        (RespConnection::connect(address.to_string()).await.unwrap(), kv)
    }

    async fn tcp_connection() -> (RespConnection, Arc<MemoryKv>) {
        tcp_connection_with(None).await
    }

    async fn check_drain_once(provider: &RemoteJoinStoreProvider) {
        let store = provider.child_store("people:0:0").unwrap();
        let (a, b) = (child("a", "1"), child("b", "2"));
        store.add_all(vec![a.clone()]).await.unwrap();
        store.add_all(vec![b.clone()]).await.unwrap();

        let drained: Vec<_> = store
            .clearing_stream()
            .map(|item| item.unwrap())
            .collect()
            .await;
        assert_eq!(drained, vec![a, b]);
        let again: Vec<_> = store.clearing_stream().collect().await;
        assert!(again.is_empty());
    }

    async fn check_parent_store(provider: &RemoteJoinStoreProvider) {
        let store = provider.parent_store("people").unwrap();
        let key = ParentSideJoinKey::new("id", "1");
        assert!(!store.contains(&key).await.unwrap());
        assert_eq!(store.get(&key).await.unwrap(), None);

        store.put(key.clone(), values(&["p1"])).await.unwrap();
        store.put(key.clone(), values(&["p2", "p1"])).await.unwrap();
        store
            .put(ParentSideJoinKey::new("id", "2"), values(&["p3"]))
            .await
            .unwrap();
        assert!(store.contains(&key).await.unwrap());
        assert_eq!(store.get(&key).await.unwrap(), Some(values(&["p1", "p2"])));

        store.clear().await.unwrap();
        assert!(!store.contains(&key).await.unwrap());
        assert!(!store
            .contains(&ParentSideJoinKey::new("id", "2"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_memory_kv_drain_once() {
        let kv = Arc::new(MemoryKv::new());
        let provider = RemoteJoinStoreProvider::new(kv.clone(), "test");
        check_drain_once(&provider).await;
        assert_eq!(kv.key_count(), 0);
    }

    #[tokio::test]
    async fn test_memory_kv_parent_store() {
        let kv = Arc::new(MemoryKv::new());
        let provider = RemoteJoinStoreProvider::new(kv.clone(), "test");
        check_parent_store(&provider).await;
        assert_eq!(kv.key_count(), 0);
    }

    #[tokio::test]
    async fn test_release_deletes_undrained_keys() {
        let kv = Arc::new(MemoryKv::new());
        let provider = RemoteJoinStoreProvider::new(kv.clone(), "test");
        provider
            .child_store("run:people")
            .unwrap()
            .add_all(vec![child("a", "1")])
            .await
            .unwrap();
        provider
            .parent_store("run:teams")
            .unwrap()
            .put(ParentSideJoinKey::new("id", "1"), values(&["p1"]))
            .await
            .unwrap();
        assert!(kv.key_count() > 0);

        provider.release("run:people").await.unwrap();
        provider.release("run:teams").await.unwrap();
        assert_eq!(kv.key_count(), 0);
    }

    #[tokio::test]
    async fn test_tcp_drain_once_and_parent_store() {
        let (connection, kv) = tcp_connection().await;
        let provider = RemoteJoinStoreProvider::new(Arc::new(connection), "tcp");
        check_drain_once(&provider).await;
        check_parent_store(&provider).await;
        assert_eq!(kv.key_count(), 0);
    }

    #[tokio::test]
    async fn test_error_reply_is_remote_error() {
        let (connection, _kv) = tcp_connection().await;
        assert!(matches!(
            connection.call(command(["NOPE"])).await,
            Err(JoinStoreError::Remote(_))
        ));
        let pong = connection.call(command(["PING"])).await.unwrap();
        assert_eq!(pong, RespValue::SimpleString("PONG".to_string()));
    }

    #[tokio::test]
    async fn test_abandoned_call_keeps_replies_in_step() {
        let (connection, kv) =
            tcp_connection_with(Some((&b"RPUSH"[..], Duration::from_millis(100)))).await;

        let pushed = tokio::time::timeout(
            Duration::from_millis(20),
            connection.call(command(["RPUSH", "k", "v"])),
        )
        .await;
        assert!(pushed.is_err(), "the push should still be waiting on the server");

        let pong = connection.call(command(["PING"])).await.unwrap();
        assert_eq!(pong, RespValue::SimpleString("PONG".to_string()));
        let length = connection.call(command(["LLEN", "k"])).await.unwrap();
        assert_eq!(length, RespValue::Integer(1));
        assert_eq!(kv.key_count(), 1);
    }

    #[tokio::test]
    async fn test_abandoned_transaction_still_completes() {
        let (connection, _kv) =
            tcp_connection_with(Some((&b"MULTI"[..], Duration::from_millis(100)))).await;

        let abandoned = tokio::time::timeout(
            Duration::from_millis(20),
            connection.transaction(vec![command(["RPUSH", "k", "a", "b"])]),
        )
        .await;
        assert!(abandoned.is_err());

        // Not queued inside a dangling MULTI
        let range = connection
            .call(command(["LRANGE", "k", "0", "-1"]))
            .await
            .unwrap();
        assert_eq!(range.as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_lrange_indices() {
        let kv = MemoryKv::new();
        let replies = kv.execute(&[
            command(["RPUSH", "l", "a", "b", "c"]),
            command(["LRANGE", "l", "1", "-1"]),
            command(["LRANGE", "l", "5", "9"]),
            command(["LLEN", "missing"]),
        ]);
        assert_eq!(replies[0], RespValue::Integer(3));
        assert_eq!(replies[1].as_array().unwrap().len(), 2);
        assert_eq!(replies[2], RespValue::Array(Vec::new()));
        assert_eq!(replies[3], RespValue::Integer(0));
    }
}
