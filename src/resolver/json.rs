//! JSON resolver
//!
//! The iterator is a JSONPath. Iterators of the form `$`, `$.a.b` and
//! `$.a.b[*]` are evaluated while the document is being read, so only the
//! current record is held in memory. Any other iterator is evaluated on the
//! parsed document.

use serde::de::{self, DeserializeSeed, Deserializer, IgnoredAny, MapAccess, SeqAccess, Visitor};
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::io::{BufReader, Read};
use std::sync::Arc;
use tracing::{debug, trace};

use super::matcher::MatchScore;
use super::{
    LogicalSourceRecord, LogicalSourceResolver, NativeRecord, RecordSink, ResolverError,
    ResolverResult, SourceHandle,
};
use crate::expression::jsonpath::JsonPath;
use crate::expression::{CompiledCache, ExpressionEvaluation, ExpressionResult, Values};
use crate::mapping::LogicalSource;
use crate::rdf::vocab;

const DEFAULT_ITERATOR: &str = "$";

/// JSON resolver
#[derive(Clone)]
pub struct JsonResolver {
    cache: Arc<CompiledCache<JsonPath>>,
}

impl JsonResolver {
    pub fn new(cache_capacity: usize) -> Self {
        Self {
            cache: Arc::new(CompiledCache::new(cache_capacity)),
        }
    }

    fn compile(&self, expression: &str) -> ExpressionResult<Arc<JsonPath>> {
        self.cache.get_or_compile(expression, JsonPath::compile)
    }

    fn emit_selected(
        &self,
        sources: &[Arc<LogicalSource>],
        document: &Value,
        sink: &mut RecordSink<Value>,
    ) -> ResolverResult<()> {
        for source in sources {
            let iterator = self.compile(source.iterator.as_deref().unwrap_or(DEFAULT_ITERATOR))?;
            for node in iterator.select(document) {
                sink.emit(LogicalSourceRecord::new(Arc::clone(source), node.clone()))?;
            }
        }
        Ok(())
    }

    fn stream(
        &self,
        source: &Arc<LogicalSource>,
        keys: &[String],
        iterate: bool,
        input: Box<dyn Read + Send>,
        sink: &mut RecordSink<Value>,
    ) -> ResolverResult<()> {
        let mut context = WalkContext {
            emit: |value: Value| {
                trace!("json record from '{}'", source.source.name);
                sink.emit(LogicalSourceRecord::new(Arc::clone(source), value))
            },
            failure: None,
        };

        let mut deserializer = serde_json::Deserializer::from_reader(BufReader::new(input));
        let walked = Walk {
            keys,
            iterate,
            context: &mut context,
        }
        .deserialize(&mut deserializer)
        .and_then(|()| deserializer.end());

        match walked {
            Ok(()) => Ok(()),
            Err(e) => Err(context
                .failure
                .take()
                .unwrap_or_else(|| ResolverError::read(source, e))),
        }
    }
}

impl Default for JsonResolver {
    fn default() -> Self {
        Self::new(256)
    }
}

impl LogicalSourceResolver for JsonResolver {
    type Record = Value;

    fn name(&self) -> &str {
        "json"
    }

    fn score(&self, source: &LogicalSource) -> MatchScore {
        MatchScore::builder().strong_if(
            source
                .reference_formulation
                .as_deref()
                .is_some_and(vocab::is_json_path_formulation),
        )
    }

    fn accepts(&self, handle: &SourceHandle) -> bool {
        matches!(
            handle,
            SourceHandle::Bytes(_) | SourceHandle::Native(NativeRecord::Json(_))
        )
    }

    fn produce(
        &self,
        sources: &[Arc<LogicalSource>],
        handle: SourceHandle,
        sink: &mut RecordSink<Value>,
    ) -> ResolverResult<()> {
        match handle {
            SourceHandle::Bytes(input) => {
                if let [source] = sources {
                    let iterator =
                        self.compile(source.iterator.as_deref().unwrap_or(DEFAULT_ITERATOR))?;
                    if let Some((keys, iterate)) = iterator.streaming_plan() {
                        debug!("Streaming JSON source '{}'", source.source.name);
                        return self.stream(source, &keys, iterate, input, sink);
                    }
                }
                let document: Value = serde_json::from_reader(BufReader::new(input))
                    .map_err(|e| ResolverError::read(&sources[0], e))?;
                self.emit_selected(sources, &document, sink)
            }
            SourceHandle::Native(NativeRecord::Json(document)) => {
                self.emit_selected(sources, &document, sink)
            }
            other => Err(ResolverError::UnsupportedSource {
                resolver: self.name().to_string(),
                handle: other.kind().to_string(),
            }),
        }
    }

    fn expression_evaluation(&self, record: Value) -> Arc<dyn ExpressionEvaluation> {
        let resolver = self.clone();
        Arc::new(move |expression: &str| -> ExpressionResult<Option<Values>> {
            Ok(resolver.compile(expression)?.evaluate(&record))
        })
    }
}

struct WalkContext<F> {
    emit: F,
    failure: Option<ResolverError>,
}

impl<F> WalkContext<F>
where
    F: FnMut(Value) -> ResolverResult<()>,
{
    fn push<E: de::Error>(&mut self, value: Value) -> Result<(), E> {
        match (self.emit)(value) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.failure = Some(e);
                Err(E::custom("record stream stopped"))
            }
        }
    }
}

/// Descends `keys` while deserializing, then emits the value found there or,
/// with `iterate`, each of its members.
struct Walk<'a, F> {
    keys: &'a [String],
    iterate: bool,
    context: &'a mut WalkContext<F>,
}

impl<'de, 'a, F> DeserializeSeed<'de> for Walk<'a, F>
where
    F: FnMut(Value) -> ResolverResult<()>,
{
    type Value = ();

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<(), D::Error> {
        if self.keys.is_empty() && !self.iterate {
            let value = Value::deserialize(deserializer)?;
            return self.context.push(value);
        }
        deserializer.deserialize_any(self)
    }
}

impl<'de, 'a, F> Visitor<'de> for Walk<'a, F>
where
    F: FnMut(Value) -> ResolverResult<()>,
{
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a JSON value")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<(), A::Error> {
        match self.keys.split_first() {
            Some((wanted, rest)) => {
                while let Some(key) = map.next_key::<String>()? {
                    if &key == wanted {
                        map.next_value_seed(Walk {
                            keys: rest,
                            iterate: self.iterate,
                            context: &mut *self.context,
                        })?;
                    } else {
                        map.next_value::<IgnoredAny>()?;
                    }
                }
            }
            None => {
                while let Some((_, value)) = map.next_entry::<IgnoredAny, Value>()? {
                    self.context.push(value)?;
                }
            }
        }
        Ok(())
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<(), A::Error> {
        if self.keys.is_empty() {
            while let Some(value) = seq.next_element::<Value>()? {
                self.context.push(value)?;
            }
        } else {
            while seq.next_element::<IgnoredAny>()?.is_some() {}
        }
        Ok(())
    }

    fn visit_bool<E: de::Error>(self, _: bool) -> Result<(), E> {
        Ok(())
    }

    fn visit_i64<E: de::Error>(self, _: i64) -> Result<(), E> {
        Ok(())
    }

    fn visit_u64<E: de::Error>(self, _: u64) -> Result<(), E> {
        Ok(())
    }

    fn visit_f64<E: de::Error>(self, _: f64) -> Result<(), E> {
        Ok(())
    }

    fn visit_str<E: de::Error>(self, _: &str) -> Result<(), E> {
        Ok(())
    }

    fn visit_unit<E: de::Error>(self) -> Result<(), E> {
        Ok(())
    }
}
