//! XML resolver
//!
//! The iterator is an XPath. Plain element paths (`/a/b`, `//b`, `//a/b`)
//! are matched against the stack of open elements while quick-xml reads the
//! input. A matching subtree becomes a record once it closes and every
//! match that opened before it has been emitted, so nested matches keep
//! document order. Other iterators run on the parsed document.

use quick_xml::events::Event;
use quick_xml::Reader;
use std::collections::VecDeque;
use std::io::{BufReader, Read};
use std::sync::Arc;
use tracing::{debug, trace};

use super::matcher::MatchScore;
use super::{
    LogicalSourceRecord, LogicalSourceResolver, NativeRecord, RecordSink, ResolverError,
    ResolverResult, SourceHandle,
};
use crate::expression::dom::{name_matches, start_to_element, TreeBuilder, XmlElement};
use crate::expression::xpath::{NodeRef, XPath};
use crate::expression::{CompiledCache, ExpressionEvaluation, ExpressionResult, Values};
use crate::mapping::LogicalSource;
use crate::rdf::vocab;

const DEFAULT_ITERATOR: &str = "/*";

/// XML resolver
#[derive(Clone)]
pub struct XmlResolver {
    cache: Arc<CompiledCache<XPath>>,
}

/// Element-name path matched while streaming
struct StreamPlan {
    names: Vec<String>,
    descendant: bool,
}

impl StreamPlan {
    fn matches(&self, open: &[String], name: &str) -> bool {
        let depth = open.len() + 1;
        if depth < self.names.len() || (!self.descendant && depth != self.names.len()) {
            return false;
        }
        let (last, ancestors) = match self.names.split_last() {
            Some(split) => split,
            None => return false,
        };
        if !name_matches(last, name) {
            return false;
        }
        let tail = &open[open.len() - ancestors.len()..];
        ancestors
            .iter()
            .zip(tail)
            .all(|(test, name)| name_matches(test, name))
    }
}

impl XmlResolver {
    pub fn new(cache_capacity: usize) -> Self {
        Self {
            cache: Arc::new(CompiledCache::new(cache_capacity)),
        }
    }

    fn compile(&self, expression: &str) -> ExpressionResult<Arc<XPath>> {
        self.cache.get_or_compile(expression, XPath::compile)
    }

    fn emit_selected(
        &self,
        sources: &[Arc<LogicalSource>],
        document: &XmlElement,
        sink: &mut RecordSink<XmlElement>,
    ) -> ResolverResult<()> {
        for source in sources {
            let iterator = self.compile(source.iterator.as_deref().unwrap_or(DEFAULT_ITERATOR))?;
            for node in iterator.select(document) {
                match node {
                    NodeRef::Element(element) => {
                        sink.emit(LogicalSourceRecord::new(Arc::clone(source), element.clone()))?
                    }
                    _ => trace!("iterator '{}' selected a non-element node", iterator.as_str()),
                }
            }
        }
        Ok(())
    }

    fn stream(
        &self,
        source: &Arc<LogicalSource>,
        plan: StreamPlan,
        input: Box<dyn Read + Send>,
        sink: &mut RecordSink<XmlElement>,
    ) -> ResolverResult<()> {
        let mut reader = Reader::from_reader(BufReader::new(input));
        let mut buf = Vec::new();
        let mut open: Vec<String> = Vec::new();
        // Subtrees being built, innermost last, each with its slot in `ready`
        let mut captures: Vec<(TreeBuilder, usize)> = Vec::new();
        // Matches in document order; a slot is filled once its subtree closes
        let mut ready: VecDeque<Option<XmlElement>> = VecDeque::new();
        let mut first_slot = 0;

        loop {
            sink.checkpoint()?;
            let event = reader
                .read_event_into(&mut buf)
                .map_err(|e| ResolverError::read(source, e))?;

            match &event {
                Event::Start(start) => {
                    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
                    for (builder, _) in captures.iter_mut() {
                        builder.feed(&event)?;
                    }
                    if plan.matches(&open, &name) {
                        captures.push((TreeBuilder::begin(start)?, first_slot + ready.len()));
                        ready.push_back(None);
                    }
                    open.push(name);
                }
                Event::Empty(start) => {
                    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
                    for (builder, _) in captures.iter_mut() {
                        builder.feed(&event)?;
                    }
                    if plan.matches(&open, &name) {
                        ready.push_back(Some(start_to_element(start)?));
                    }
                }
                Event::End(_) => {
                    open.pop();
                    let mut closed = None;
                    for (builder, slot) in captures.iter_mut() {
                        if let Some(element) = builder.feed(&event)? {
                            closed = Some((*slot, element));
                        }
                    }
                    if let Some((slot, element)) = closed {
                        captures.pop();
                        ready[slot - first_slot] = Some(element);
                    }
                }
                Event::Eof if !captures.is_empty() => {
                    return Err(ResolverError::read(source, "unexpected end of document"));
                }
                Event::Eof => break,
                _ => {
                    for (builder, _) in captures.iter_mut() {
                        builder.feed(&event)?;
                    }
                }
            }

            while matches!(ready.front(), Some(Some(_))) {
                if let Some(Some(element)) = ready.pop_front() {
                    first_slot += 1;
                    sink.emit(LogicalSourceRecord::new(Arc::clone(source), element))?;
                }
            }
            buf.clear();
        }
        Ok(())
    }
}

impl Default for XmlResolver {
    fn default() -> Self {
        Self::new(256)
    }
}

impl LogicalSourceResolver for XmlResolver {
    type Record = XmlElement;

    fn name(&self) -> &str {
        "xml"
    }

    fn score(&self, source: &LogicalSource) -> MatchScore {
        MatchScore::builder().strong_if(
            source
                .reference_formulation
                .as_deref()
                .is_some_and(vocab::is_xpath_formulation),
        )
    }

    fn accepts(&self, handle: &SourceHandle) -> bool {
        matches!(
            handle,
            SourceHandle::Bytes(_) | SourceHandle::Native(NativeRecord::Xml(_))
        )
    }

    fn produce(
        &self,
        sources: &[Arc<LogicalSource>],
        handle: SourceHandle,
        sink: &mut RecordSink<XmlElement>,
    ) -> ResolverResult<()> {
        match handle {
            SourceHandle::Bytes(input) => {
                if let [source] = sources {
                    let iterator =
                        self.compile(source.iterator.as_deref().unwrap_or(DEFAULT_ITERATOR))?;
                    if let Some((names, descendant)) = iterator.streaming_plan() {
                        debug!("Streaming XML source '{}'", source.source.name);
                        let plan = StreamPlan { names, descendant };
                        return self.stream(source, plan, input, sink);
                    }
                }
                let document = XmlElement::parse_document(BufReader::new(input))
                    .map_err(|e| ResolverError::read(&sources[0], e.message))?;
                self.emit_selected(sources, &document, sink)
            }
            SourceHandle::Native(NativeRecord::Xml(element)) => {
                let document = if element.is_document() {
                    element
                } else {
                    XmlElement::document(vec![element])
                };
                self.emit_selected(sources, &document, sink)
            }
            other => Err(ResolverError::UnsupportedSource {
                resolver: self.name().to_string(),
                handle: other.kind().to_string(),
            }),
        }
    }

    fn expression_evaluation(&self, record: XmlElement) -> Arc<dyn ExpressionEvaluation> {
        let resolver = self.clone();
        Arc::new(move |expression: &str| -> ExpressionResult<Option<Values>> {
            Ok(resolver.compile(expression)?.evaluate(&record))
        })
    }
}
