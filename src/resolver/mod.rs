//! Logical source resolvers
//!
//! A resolver turns a resolved source handle into a lazy stream of
//! format-native records, each tagged with its logical source, and builds an
//! [`ExpressionEvaluation`] per record. The engine only sees the type-erased
//! [`AnyResolver`] form, picked per logical source by the
//! [`ResolverRegistry`].
//!
//! Source lookup (paths, URLs, DSNs) is outside the engine: a
//! [`SourceResolver`] maps a [`SourceRef`] to a [`SourceHandle`].

pub mod csv;
pub mod flow;
pub mod json;
pub mod matcher;
pub mod sql;
pub mod xml;

pub use flow::{DemandGate, RecordSink, RecordStream};
pub use matcher::{MatchScore, ResolverRegistry};

use futures::stream::BoxStream;
use futures::StreamExt;
use std::collections::HashMap;
use std::fmt;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

use crate::expression::dom::XmlElement;
use crate::expression::{ExpressionError, ExpressionEvaluation};
use crate::mapping::{LogicalSource, SourceRef};
use sql::DatabaseConnection;

/// Resolver errors
#[derive(Error, Debug)]
pub enum ResolverError {
    /// No registered resolver applies to the logical source
    #[error("No resolver matches logical source '{0}'")]
    NoMatchingResolver(String),

    /// The handle is of a kind the resolver cannot read
    #[error("Resolver '{resolver}' does not support {handle} sources")]
    UnsupportedSource { resolver: String, handle: String },

    /// `get_records` called with no logical sources
    #[error("No logical sources given")]
    NoLogicalSources,

    /// The source resolver found nothing for the source name
    #[error("Source '{0}' could not be resolved")]
    UnresolvedSource(String),

    /// Reading or parsing the source failed
    #[error("Failed to read source '{source_name}': {message}")]
    Read {
        source_name: String,
        message: String,
    },

    #[error(transparent)]
    Expression(#[from] ExpressionError),

    /// The consumer went away
    #[error("Record stream cancelled")]
    Cancelled,
}

impl ResolverError {
    pub fn read(source: &LogicalSource, message: impl fmt::Display) -> Self {
        ResolverError::Read {
            source_name: source.source.name.clone(),
            message: message.to_string(),
        }
    }
}

pub type ResolverResult<T> = Result<T, ResolverError>;

/// A record tagged with the logical source it came from
#[derive(Debug, Clone)]
pub struct LogicalSourceRecord<R> {
    pub logical_source: Arc<LogicalSource>,
    pub record: R,
}

impl<R> LogicalSourceRecord<R> {
    pub fn new(logical_source: Arc<LogicalSource>, record: R) -> Self {
        Self {
            logical_source,
            record,
        }
    }
}

/// Already parsed input handed over instead of bytes
#[derive(Debug, Clone)]
pub enum NativeRecord {
    Json(serde_json::Value),
    Xml(XmlElement),
}

/// A resolved source
pub enum SourceHandle {
    Bytes(Box<dyn Read + Send>),
    Native(NativeRecord),
    Database(Box<dyn DatabaseConnection>),
}

impl SourceHandle {
    pub fn bytes(reader: impl Read + Send + 'static) -> Self {
        SourceHandle::Bytes(Box::new(reader))
    }

    /// Short description used in errors and logs
    pub fn kind(&self) -> &'static str {
        match self {
            SourceHandle::Bytes(_) => "byte stream",
            SourceHandle::Native(NativeRecord::Json(_)) => "native JSON",
            SourceHandle::Native(NativeRecord::Xml(_)) => "native XML",
            SourceHandle::Database(_) => "database",
        }
    }
}

impl fmt::Debug for SourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SourceHandle({})", self.kind())
    }
}

/// Looks up source handles by reference
pub trait SourceResolver: Send + Sync {
    /// `Ok(None)` when the reference is unknown
    fn resolve(&self, source: &SourceRef) -> ResolverResult<Option<SourceHandle>>;
}

type HandleFactory = Box<dyn Fn() -> ResolverResult<SourceHandle> + Send + Sync>;

/// A [`SourceResolver`] backed by a name → handle factory table
///
/// Every resolution calls the factory again, so each TriplesMap iterating a
/// source gets its own handle.
#[derive(Default)]
pub struct NamedSources {
    factories: HashMap<String, HandleFactory>,
}

impl NamedSources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_factory<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> ResolverResult<SourceHandle> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Box::new(factory));
        self
    }

    /// In-memory bytes
    pub fn with_bytes(self, name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        let bytes: Arc<[u8]> = Arc::from(bytes.into());
        self.with_factory(name, move || {
            Ok(SourceHandle::bytes(std::io::Cursor::new(ArcBytes(Arc::clone(&bytes)))))
        })
    }

    /// A file opened on each resolution
    pub fn with_file(self, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        let name = name.into();
        let path = path.into();
        let source_name = name.clone();
        self.with_factory(name, move || {
            let file = std::fs::File::open(&path).map_err(|e| ResolverError::Read {
                source_name: source_name.clone(),
                message: format!("{}: {}", path.display(), e),
            })?;
            Ok(SourceHandle::bytes(std::io::BufReader::new(file)))
        })
    }

    pub fn with_native(self, name: impl Into<String>, record: NativeRecord) -> Self {
        self.with_factory(name, move || Ok(SourceHandle::Native(record.clone())))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }
}

impl SourceResolver for NamedSources {
    fn resolve(&self, source: &SourceRef) -> ResolverResult<Option<SourceHandle>> {
        match self.factories.get(&source.name) {
            Some(factory) => factory().map(Some),
            None => Ok(None),
        }
    }
}

struct ArcBytes(Arc<[u8]>);

impl AsRef<[u8]> for ArcBytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// A format resolver
///
/// Implementations are cheap to clone; clones share compiled-query caches.
pub trait LogicalSourceResolver: Clone + Send + Sync + 'static {
    type Record: Send + 'static;

    /// Name used in include / exclude lists and logs
    fn name(&self) -> &str;

    /// Applicability of this resolver to `source`
    fn score(&self, source: &LogicalSource) -> MatchScore;

    /// Whether the handle kind can be read
    fn accepts(&self, handle: &SourceHandle) -> bool;

    /// Read `handle`, emitting records for every source in `sources`.
    ///
    /// Runs on the blocking pool. Must return promptly once `sink` reports
    /// cancellation; the handle is closed when this returns.
    fn produce(
        &self,
        sources: &[Arc<LogicalSource>],
        handle: SourceHandle,
        sink: &mut RecordSink<Self::Record>,
    ) -> ResolverResult<()>;

    /// Evaluator for one record
    fn expression_evaluation(&self, record: Self::Record) -> Arc<dyn ExpressionEvaluation>;

    /// Stream the records of `sources` from `handle`
    fn get_records(
        &self,
        sources: Vec<Arc<LogicalSource>>,
        handle: SourceHandle,
        prefetch: usize,
    ) -> ResolverResult<RecordStream<Self::Record>> {
        if sources.is_empty() {
            return Err(ResolverError::NoLogicalSources);
        }
        if !self.accepts(&handle) {
            return Err(ResolverError::UnsupportedSource {
                resolver: self.name().to_string(),
                handle: handle.kind().to_string(),
            });
        }

        let resolver = self.clone();
        let label = format!("{}:{}", self.name(), sources[0].source.name);
        Ok(flow::spawn_producer(label, prefetch, move |sink| {
            resolver.produce(&sources, handle, sink)
        }))
    }
}

/// A record ready for term generation
#[derive(Clone)]
pub struct EvaluatedRecord {
    pub logical_source: Arc<LogicalSource>,
    pub evaluation: Arc<dyn ExpressionEvaluation>,
}

pub type EvaluatedRecordStream = BoxStream<'static, ResolverResult<EvaluatedRecord>>;

/// Object-safe view of a [`LogicalSourceResolver`]
pub trait AnyResolver: Send + Sync {
    fn resolver_name(&self) -> &str;

    fn score_source(&self, source: &LogicalSource) -> MatchScore;

    fn records(
        &self,
        sources: Vec<Arc<LogicalSource>>,
        handle: SourceHandle,
        prefetch: usize,
    ) -> ResolverResult<EvaluatedRecordStream>;
}

impl<T: LogicalSourceResolver> AnyResolver for T {
    fn resolver_name(&self) -> &str {
        self.name()
    }

    fn score_source(&self, source: &LogicalSource) -> MatchScore {
        self.score(source)
    }

    fn records(
        &self,
        sources: Vec<Arc<LogicalSource>>,
        handle: SourceHandle,
        prefetch: usize,
    ) -> ResolverResult<EvaluatedRecordStream> {
        let resolver = self.clone();
        let stream = self.get_records(sources, handle, prefetch)?;
        Ok(stream
            .map(move |item| {
                item.map(|record| EvaluatedRecord {
                    logical_source: record.logical_source,
                    evaluation: resolver.expression_evaluation(record.record),
                })
            })
            .boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn test_named_sources_resolve_fresh_handles() {
        let sources = NamedSources::new().with_bytes("a.csv", "id\n1\n");
        for _ in 0..2 {
            let handle = sources.resolve(&SourceRef::new("a.csv")).unwrap().unwrap();
            let SourceHandle::Bytes(mut reader) = handle else {
                panic!("expected bytes");
            };
            let mut text = String::new();
            reader.read_to_string(&mut text).unwrap();
            assert_eq!(text, "id\n1\n");
        }
        assert!(sources.resolve(&SourceRef::new("b.csv")).unwrap().is_none());
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let sources = NamedSources::new().with_file("f", "/definitely/not/here.csv");
        assert!(matches!(
            sources.resolve(&SourceRef::new("f")),
            Err(ResolverError::Read { .. })
        ));
    }

    #[test]
    fn test_handle_kind() {
        let handle = SourceHandle::Native(NativeRecord::Json(serde_json::json!({})));
        assert_eq!(handle.kind(), "native JSON");
    }
}
