//! Mapping execution
//!
//! Every requested TriplesMap becomes one pipeline: resolve the source,
//! select a resolver, stream records, generate terms and emit statements.
//! Pipelines run concurrently and are merged into one statement stream.
//! Referencing object maps that cannot be answered from the record itself
//! are parked in child join stores and resolved once every pipeline,
//! including index-only parents, has finished.
//!
//! # Example
//!
//! ```rust,no_run
//! use samyama_rml::mapping::{
//!     LogicalSource, Mapping, PredicateObjectMap, SourceRef, SubjectMap, TermMap, TriplesMap,
//! };
//! use samyama_rml::pipeline::Mapper;
//! use samyama_rml::rdf::vocab::rml;
//! use samyama_rml::resolver::NamedSources;
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let sources = NamedSources::new().with_bytes("people.csv", "id,name\n1,Ada\n");
//! let people = TriplesMap::new(
//!     "people",
//!     Arc::new(
//!         LogicalSource::new(SourceRef::new("people.csv")).with_reference_formulation(rml::CSV),
//!     ),
//!     SubjectMap::new(TermMap::template("http://ex.org/person/{id}")?),
//! )
//! .with_predicate_object_map(
//!     PredicateObjectMap::new()
//!         .with_predicate(TermMap::iri("http://xmlns.com/foaf/0.1/name")?)
//!         .with_object(TermMap::reference("name")),
//! );
//!
//! let mapper = Mapper::builder().source_resolver(sources).build().await?;
//! let statements = mapper.map_to_vec(&Mapping::new(vec![people])?).await?;
//! assert_eq!(statements.len(), 1);
//! # Ok(())
//! # }
//! ```

use futures::future;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use indexmap::map::Entry;
use indexmap::{IndexMap, IndexSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::config::{ConfigError, EngineConfig};
use crate::expression::{ExpressionError, ExpressionEvaluation, Values};
use crate::function::{FunctionError, FunctionRegistry};
use crate::generator::{generate, MappedValue, Statement, StatementError, TermError, TermGenerator};
use crate::join::{
    lookup_parents, provider_from_config, ChildSideJoin, ChildSideJoinCondition,
    ChildSideJoinStore, JoinStoreError, JoinStoreProvider, ParentSideJoinKey,
    ParentSideJoinStore, ParentValues,
};
use crate::mapping::{Join, Mapping, TriplesMap, ValidationError};
use crate::rdf::vocab::rdf;
use crate::rdf::{NamedNode, RdfError, RdfObject, RdfSubject};
use crate::resolver::csv::CsvResolver;
use crate::resolver::json::JsonResolver;
use crate::resolver::sql::{SqlDialect, SqlResolver};
use crate::resolver::xml::XmlResolver;
use crate::resolver::{
    EvaluatedRecord, NamedSources, ResolverError, ResolverRegistry, SourceResolver,
};
use crate::template::TemplateError;

/// Capacity of the compiled JSONPath / XPath caches of the default resolvers
const QUERY_CACHE_CAPACITY: usize = 256;

/// Errors surfaced on the statement stream
#[derive(Error, Debug)]
pub enum MappingError {
    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Resolver(#[from] ResolverError),

    #[error(transparent)]
    Expression(#[from] ExpressionError),

    #[error(transparent)]
    Term(#[from] TermError),

    #[error(transparent)]
    Statement(#[from] StatementError),

    #[error(transparent)]
    Function(#[from] FunctionError),

    #[error(transparent)]
    JoinStore(#[from] JoinStoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Rdf(#[from] RdfError),

    #[error("Unknown TriplesMap '{0}'")]
    UnknownTriplesMap(String),
}

pub type MappingResult<T> = Result<T, MappingError>;

pub type StatementStream = BoxStream<'static, MappingResult<Statement>>;

/// Rewrites named graphs before statements are built
pub type GraphModifier = Arc<dyn Fn(RdfSubject) -> RdfSubject + Send + Sync>;

/// The resolvers registered when none are given: CSV, JSON, XML, then the
/// SQL dialects
pub fn default_registry(config: &EngineConfig) -> ResolverRegistry {
    ResolverRegistry::new()
        .with(Arc::new(CsvResolver::new(config.csv.clone())))
        .with(Arc::new(JsonResolver::new(QUERY_CACHE_CAPACITY)))
        .with(Arc::new(XmlResolver::new(QUERY_CACHE_CAPACITY)))
        .with(Arc::new(SqlResolver::new(SqlDialect::Sqlite)))
        .with(Arc::new(SqlResolver::new(SqlDialect::MySql)))
        .with(Arc::new(SqlResolver::new(SqlDialect::PostgreSql)))
}

/// Builder for [`Mapper`]
#[derive(Default)]
pub struct MapperBuilder {
    config: EngineConfig,
    registry: Option<ResolverRegistry>,
    functions: Option<Arc<FunctionRegistry>>,
    joins: Option<Arc<dyn JoinStoreProvider>>,
    graph_modifier: Option<GraphModifier>,
    sources: Option<Arc<dyn SourceResolver>>,
}

impl MapperBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Resolvers in priority order; defaults to [`default_registry`]
    pub fn registry(mut self, registry: ResolverRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Defaults to [`FunctionRegistry::with_builtins`]
    pub fn functions(mut self, functions: FunctionRegistry) -> Self {
        self.functions = Some(Arc::new(functions));
        self
    }

    /// Overrides the store configured in `config.join_store`
    pub fn join_store_provider(mut self, provider: Arc<dyn JoinStoreProvider>) -> Self {
        self.joins = Some(provider);
        self
    }

    pub fn graph_modifier<F>(mut self, modifier: F) -> Self
    where
        F: Fn(RdfSubject) -> RdfSubject + Send + Sync + 'static,
    {
        self.graph_modifier = Some(Arc::new(modifier));
        self
    }

    pub fn source_resolver(mut self, sources: impl SourceResolver + 'static) -> Self {
        self.sources = Some(Arc::new(sources));
        self
    }

    /// Validate the configuration and connect the join store
    pub async fn build(self) -> MappingResult<Mapper> {
        self.config.validate()?;

        let registry = self
            .registry
            .unwrap_or_else(|| default_registry(&self.config))
            .filtered(&self.config.resolvers);
        let functions = self
            .functions
            .unwrap_or_else(|| Arc::new(FunctionRegistry::with_builtins()));
        let mut terms = TermGenerator::new(functions);
        if let Some(base) = &self.config.base_iri {
            terms = terms.with_base_iri(base)?;
        }
        let joins = match self.joins {
            Some(provider) => provider,
            None => provider_from_config(&self.config.join_store).await?,
        };
        let sources = self
            .sources
            .unwrap_or_else(|| Arc::new(NamedSources::new()));

        info!(
            "Mapper ready with resolvers {:?}, prefetch {}",
            registry.names(),
            self.config.prefetch
        );
        Ok(Mapper {
            engine: Arc::new(Engine {
                registry,
                terms,
                joins,
                sources,
                graph_modifier: self
                    .graph_modifier
                    .unwrap_or_else(|| Arc::new(|graph: RdfSubject| graph)),
                prefetch: self.config.prefetch,
                rdf_type: NamedNode::new(rdf::TYPE)?,
            }),
        })
    }
}

/// Runs mappings
#[derive(Clone)]
pub struct Mapper {
    engine: Arc<Engine>,
}

impl Mapper {
    pub fn builder() -> MapperBuilder {
        MapperBuilder::default()
    }

    /// Statements of every TriplesMap in `mapping`
    pub fn map(&self, mapping: &Mapping) -> MappingResult<StatementStream> {
        let ids: Vec<&str> = mapping.ids().collect();
        self.map_only(mapping, &ids)
    }

    /// Statements of the TriplesMaps named in `ids`
    ///
    /// Parents referenced by the requested maps are read as well, but only
    /// to index their subjects.
    pub fn map_only(&self, mapping: &Mapping, ids: &[&str]) -> MappingResult<StatementStream> {
        let plan = Plan::build(&self.engine, mapping, ids)?;
        info!(
            "Mapping {} TriplesMaps ({} pipelines, {} deferred joins)",
            ids.len(),
            plan.pipelines.len(),
            plan.joins.len()
        );

        let pipelines: Vec<StatementStream> = plan
            .pipelines
            .into_iter()
            .map(|pipeline| Engine::pipeline_stream(&self.engine, Arc::new(pipeline)))
            .collect();

        let engine = Arc::clone(&self.engine);
        let stores = plan.stores;
        let drain_stores = Arc::clone(&stores);
        let drains = stream::iter(plan.joins)
            .map(move |join| Engine::drain_stream(&engine, join, &drain_stores))
            .flatten();

        let cleanup = stream::once(async move { stores.release_all().await })
            .filter_map(|()| future::ready(None::<MappingResult<Statement>>));

        Ok(stream::select_all(pipelines)
            .chain(drains)
            .chain(cleanup)
            .boxed())
    }

    /// Collect every statement, failing on the first error
    pub async fn map_to_vec(&self, mapping: &Mapping) -> MappingResult<Vec<Statement>> {
        self.map(mapping)?.try_collect().await
    }
}

impl fmt::Debug for Mapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mapper")
            .field("registry", &self.engine.registry)
            .field("prefetch", &self.engine.prefetch)
            .finish()
    }
}

struct Engine {
    registry: ResolverRegistry,
    terms: TermGenerator,
    joins: Arc<dyn JoinStoreProvider>,
    sources: Arc<dyn SourceResolver>,
    graph_modifier: GraphModifier,
    prefetch: usize,
    rdf_type: NamedNode,
}

/// What a parent pipeline writes to its parent join store
#[derive(Clone)]
struct ParentIndex {
    store: Arc<dyn ParentSideJoinStore>,
    references: IndexSet<String>,
    all_subjects: bool,
}

/// A referencing object map resolved after all pipelines finish
#[derive(Clone)]
struct DeferredJoin {
    name: String,
    conditions: Vec<Join>,
    store: Arc<dyn ChildSideJoinStore>,
    parent_store: Arc<dyn ParentSideJoinStore>,
}

/// Referencing object maps of one predicate-object map
#[derive(Default)]
struct PomPlan {
    inline_parents: Vec<Arc<TriplesMap>>,
    deferred: Vec<DeferredJoin>,
}

struct Pipeline {
    triples_map: Arc<TriplesMap>,
    /// `false` for parents that are only read to fill their index
    emit: bool,
    poms: Vec<PomPlan>,
    index: Option<ParentIndex>,
}

struct Plan {
    pipelines: Vec<Pipeline>,
    joins: Vec<DeferredJoin>,
    stores: Arc<RunStores>,
}

/// Names of the join stores created for one run
///
/// A child store is released after its drain and the parent stores after
/// the last drain. Whatever is still pending when the run is dropped early
/// is released on a spawned task.
struct RunStores {
    provider: Arc<dyn JoinStoreProvider>,
    pending: Mutex<Vec<String>>,
}

impl RunStores {
    fn new(provider: Arc<dyn JoinStoreProvider>) -> Self {
        Self {
            provider,
            pending: Mutex::new(Vec::new()),
        }
    }

    fn pending(&self) -> MutexGuard<'_, Vec<String>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn track(&self, name: &str) {
        self.pending().push(name.to_string());
    }

    async fn release(&self, name: &str) {
        self.pending().retain(|pending| pending != name);
        release_store(self.provider.as_ref(), name).await;
    }

    async fn release_all(&self) {
        let names = std::mem::take(&mut *self.pending());
        for name in names {
            release_store(self.provider.as_ref(), &name).await;
        }
    }
}

impl Drop for RunStores {
    fn drop(&mut self) {
        let names = std::mem::take(self.pending.get_mut().unwrap_or_else(PoisonError::into_inner));
        if names.is_empty() {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!("Releasing {} join stores of an unfinished run", names.len());
                let provider = Arc::clone(&self.provider);
                handle.spawn(async move {
                    for name in names {
                        release_store(provider.as_ref(), &name).await;
                    }
                });
            }
            Err(_) => warn!(
                "No runtime to release {} join stores of an unfinished run",
                names.len()
            ),
        }
    }
}

async fn release_store(provider: &dyn JoinStoreProvider, name: &str) {
    if let Err(e) = provider.release(name).await {
        warn!("Failed to release join store '{}': {}", name, e);
    }
}

/// Key under which parents of condition-less joins index every subject
fn all_subjects_key() -> ParentSideJoinKey {
    ParentSideJoinKey::new("", "")
}

impl Plan {
    fn build(engine: &Engine, mapping: &Mapping, ids: &[&str]) -> MappingResult<Self> {
        let run = Uuid::new_v4();
        let stores = Arc::new(RunStores::new(Arc::clone(&engine.joins)));
        let mut requested = Vec::with_capacity(ids.len());
        for id in ids {
            let map = mapping
                .get(id)
                .ok_or_else(|| MappingError::UnknownTriplesMap(id.to_string()))?;
            requested.push(Arc::clone(map));
        }

        let mut indexes: IndexMap<String, ParentIndex> = IndexMap::new();
        let mut joins = Vec::new();
        let mut planned = Vec::with_capacity(requested.len());
        for map in requested {
            let mut poms = Vec::with_capacity(map.predicate_object_maps.len());
            for (p, pom) in map.predicate_object_maps.iter().enumerate() {
                let mut plan = PomPlan::default();
                for (r, rom) in pom.ref_object_maps().enumerate() {
                    let parent = mapping.get(&rom.parent_triples_map).ok_or_else(|| {
                        MappingError::UnknownTriplesMap(rom.parent_triples_map.clone())
                    })?;

                    if rom.join_conditions.is_empty()
                        && parent.logical_source.same_records_as(&map.logical_source)
                    {
                        plan.inline_parents.push(Arc::clone(parent));
                        continue;
                    }

                    let index = match indexes.entry(parent.id.clone()) {
                        Entry::Occupied(entry) => entry.into_mut(),
                        Entry::Vacant(entry) => {
                            let name = format!("{}:{}", run, parent.id);
                            let store = engine.joins.parent_store(&name)?;
                            stores.track(&name);
                            entry.insert(ParentIndex {
                                store,
                                references: IndexSet::new(),
                                all_subjects: false,
                            })
                        }
                    };
                    if rom.join_conditions.is_empty() {
                        index.all_subjects = true;
                    }
                    index.references.extend(
                        rom.join_conditions
                            .iter()
                            .map(|join| join.parent_reference.clone()),
                    );

                    let name = format!("{}:{}:{}:{}", run, map.id, p, r);
                    let store = engine.joins.child_store(&name)?;
                    stores.track(&name);
                    let join = DeferredJoin {
                        store,
                        parent_store: Arc::clone(&index.store),
                        conditions: rom.join_conditions.clone(),
                        name,
                    };
                    plan.deferred.push(join.clone());
                    joins.push(join);
                }
                poms.push(plan);
            }
            planned.push((map, poms));
        }

        let mut pipelines = Vec::with_capacity(planned.len() + indexes.len());
        for (map, poms) in planned {
            pipelines.push(Pipeline {
                index: indexes.get(&map.id).cloned(),
                triples_map: map,
                emit: true,
                poms,
            });
        }
        for (id, index) in &indexes {
            if ids.contains(&id.as_str()) {
                continue;
            }
            let parent = mapping
                .get(id)
                .ok_or_else(|| MappingError::UnknownTriplesMap(id.clone()))?;
            debug!("Reading parent TriplesMap '{}' for its join index only", id);
            pipelines.push(Pipeline {
                triples_map: Arc::clone(parent),
                emit: false,
                poms: Vec::new(),
                index: Some(index.clone()),
            });
        }

        Ok(Self {
            pipelines,
            joins,
            stores,
        })
    }
}

/// Forward items until the first error, which is yielded and ends the
/// stream. Dropping the inner stream cancels its producer.
fn stop_after_error<T: Send + 'static>(
    inner: BoxStream<'static, MappingResult<T>>,
) -> BoxStream<'static, MappingResult<T>> {
    stream::unfold(Some(inner), |state| async move {
        let mut inner = state?;
        match inner.next().await? {
            Ok(item) => Some((Ok(item), Some(inner))),
            Err(e) => Some((Err(e), None)),
        }
    })
    .boxed()
}

impl Engine {
    fn pipeline_stream(engine: &Arc<Self>, pipeline: Arc<Pipeline>) -> StatementStream {
        let opener = Arc::clone(engine);
        let opened = Arc::clone(&pipeline);
        let records = stream::once(async move { opener.open(&opened) }).try_flatten();

        let engine = Arc::clone(engine);
        let statements = records
            .and_then(move |record| {
                let engine = Arc::clone(&engine);
                let pipeline = Arc::clone(&pipeline);
                async move { engine.process(&pipeline, record).await }
            })
            .map_ok(|statements| stream::iter(statements.into_iter().map(Ok::<_, MappingError>)))
            .try_flatten();
        stop_after_error(statements.boxed())
    }

    fn open(
        &self,
        pipeline: &Pipeline,
    ) -> MappingResult<BoxStream<'static, MappingResult<EvaluatedRecord>>> {
        let map = &pipeline.triples_map;
        let source = &map.logical_source;
        let handle = self
            .sources
            .resolve(&source.source)?
            .ok_or_else(|| ResolverError::UnresolvedSource(source.source.name.clone()))?;
        let resolver = self.registry.select(source)?;
        info!(
            "TriplesMap '{}' reading '{}' with resolver '{}'",
            map.id,
            source.source.name,
            resolver.resolver_name()
        );
        let records = resolver.records(vec![Arc::clone(source)], handle, self.prefetch)?;
        Ok(records.map_err(MappingError::from).boxed())
    }

    async fn process(
        &self,
        pipeline: &Pipeline,
        record: EvaluatedRecord,
    ) -> MappingResult<Vec<Statement>> {
        let map = &pipeline.triples_map;
        let evaluation = record.evaluation.as_ref();
        let subjects = self.terms.subjects(&map.subject_map, evaluation)?;
        trace!("TriplesMap '{}': {} subjects", map.id, subjects.len());

        if let Some(index) = &pipeline.index {
            self.index_parent(index, &subjects, evaluation).await?;
        }
        if !pipeline.emit || subjects.is_empty() {
            return Ok(Vec::new());
        }

        let mut statements = Vec::new();
        let subject_graphs = self.terms.graphs(&map.subject_map.graph_maps, evaluation)?;
        if !map.subject_map.classes.is_empty() {
            let classes: Vec<MappedValue<RdfObject>> = map
                .subject_map
                .classes
                .iter()
                .map(|class| MappedValue::new(RdfObject::from(class.clone())))
                .collect();
            self.emit(
                &mut statements,
                &map.id,
                &subjects,
                &[MappedValue::new(self.rdf_type.clone())],
                &classes,
                &subject_graphs,
            );
        }

        for (pom, plan) in map.predicate_object_maps.iter().zip(&pipeline.poms) {
            let predicates = self.terms.predicates(&pom.predicate_maps, evaluation)?;
            let mut graphs = subject_graphs.clone();
            for graph in self.terms.graphs(&pom.graph_maps, evaluation)? {
                if !graphs.contains(&graph) {
                    graphs.push(graph);
                }
            }

            let mut objects: IndexSet<MappedValue<RdfObject>> = IndexSet::new();
            for object_map in pom.term_object_maps() {
                objects.extend(self.terms.objects(object_map, evaluation)?);
            }
            for parent in &plan.inline_parents {
                let parents = self.terms.subjects(&parent.subject_map, evaluation)?;
                objects.extend(parents.into_iter().map(|s| s.map(RdfObject::from)));
            }
            if !objects.is_empty() {
                let objects: Vec<_> = objects.into_iter().collect();
                self.emit(
                    &mut statements,
                    &map.id,
                    &subjects,
                    &predicates,
                    &objects,
                    &graphs,
                );
            }

            if predicates.is_empty() {
                continue;
            }
            for join in &plan.deferred {
                if let Some(candidate) =
                    Self::child_candidate(join, &subjects, &predicates, &graphs, evaluation)?
                {
                    join.store.add_all(vec![candidate]).await?;
                }
            }
        }
        Ok(statements)
    }

    async fn index_parent(
        &self,
        index: &ParentIndex,
        subjects: &[MappedValue<RdfSubject>],
        evaluation: &dyn ExpressionEvaluation,
    ) -> MappingResult<()> {
        if subjects.is_empty() {
            return Ok(());
        }
        let values: ParentValues = subjects.iter().map(|s| s.value.clone()).collect();
        for reference in &index.references {
            let Some(found) = evaluation.evaluate(reference)? else {
                continue;
            };
            let found: IndexSet<String> = found.into_vec().into_iter().collect();
            for value in found {
                index
                    .store
                    .put(ParentSideJoinKey::new(reference.clone(), value), values.clone())
                    .await?;
            }
        }
        if index.all_subjects {
            index.store.put(all_subjects_key(), values).await?;
        }
        Ok(())
    }

    /// `None` when a join condition has no child value, so it can never match
    fn child_candidate(
        join: &DeferredJoin,
        subjects: &[MappedValue<RdfSubject>],
        predicates: &[MappedValue<NamedNode>],
        graphs: &[MappedValue<RdfSubject>],
        evaluation: &dyn ExpressionEvaluation,
    ) -> MappingResult<Option<ChildSideJoin>> {
        let mut conditions = Vec::with_capacity(join.conditions.len());
        for condition in &join.conditions {
            let child_values = evaluation
                .evaluate(&condition.child_reference)?
                .map(Values::into_vec)
                .unwrap_or_default();
            if child_values.is_empty() {
                trace!(
                    "Join '{}': no value for '{}', dropping candidate",
                    join.name,
                    condition.child_reference
                );
                return Ok(None);
            }
            conditions.push(ChildSideJoinCondition {
                child_reference: condition.child_reference.clone(),
                child_values,
                parent_reference: condition.parent_reference.clone(),
            });
        }
        Ok(Some(ChildSideJoin {
            subjects: subjects.to_vec(),
            predicates: predicates.to_vec(),
            graphs: graphs.to_vec(),
            conditions,
        }))
    }

    /// Append the product of the given values. A position without values
    /// yields no statements.
    fn emit(
        &self,
        out: &mut Vec<Statement>,
        triples_map: &str,
        subjects: &[MappedValue<RdfSubject>],
        predicates: &[MappedValue<NamedNode>],
        objects: &[MappedValue<RdfObject>],
        graphs: &[MappedValue<RdfSubject>],
    ) {
        match generate(subjects, predicates, objects, graphs, &*self.graph_modifier) {
            Ok(statements) => out.extend(statements),
            Err(StatementError::EmptyTermSet(position)) => {
                debug!(
                    "TriplesMap '{}': no {} values for record, skipping",
                    triples_map, position
                );
            }
        }
    }

    fn drain_stream(
        engine: &Arc<Self>,
        join: DeferredJoin,
        stores: &Arc<RunStores>,
    ) -> StatementStream {
        debug!("Resolving deferred join '{}'", join.name);
        let engine = Arc::clone(engine);
        let parent_store = Arc::clone(&join.parent_store);
        let name = join.name.clone();
        let statements = join
            .store
            .clearing_stream()
            .map_err(MappingError::from)
            .and_then(move |candidate| {
                let engine = Arc::clone(&engine);
                let parent_store = Arc::clone(&parent_store);
                let name = name.clone();
                async move {
                    let parents = if candidate.conditions.is_empty() {
                        parent_store.get(&all_subjects_key()).await?.unwrap_or_default()
                    } else {
                        lookup_parents(parent_store.as_ref(), &candidate).await?
                    };
                    if parents.is_empty() {
                        trace!("Join '{}': candidate has no matching parent", name);
                        return Ok(Vec::new());
                    }
                    let objects: Vec<MappedValue<RdfObject>> = parents
                        .into_iter()
                        .map(|parent| MappedValue::new(RdfObject::from(parent)))
                        .collect();
                    let mut statements = Vec::new();
                    engine.emit(
                        &mut statements,
                        &name,
                        &candidate.subjects,
                        &candidate.predicates,
                        &objects,
                        &candidate.graphs,
                    );
                    Ok(statements)
                }
            })
            .map_ok(|statements| stream::iter(statements.into_iter().map(Ok::<_, MappingError>)))
            .try_flatten();

        let stores = Arc::clone(stores);
        let release = stream::once(async move { stores.release(&join.name).await })
            .filter_map(|()| future::ready(None::<MappingResult<Statement>>));
        stop_after_error(statements.boxed()).chain(release).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::join::MemoryJoinStoreProvider;
    use crate::mapping::{
        LogicalSource, ObjectMap, PredicateObjectMap, RefObjectMap, SourceRef, SubjectMap,
        TermMap,
    };
    use crate::rdf::vocab::rml;
    use crate::rdf::Literal;

    fn csv_source(name: &str) -> Arc<LogicalSource> {
        Arc::new(LogicalSource::new(SourceRef::new(name)).with_reference_formulation(rml::CSV))
    }

    fn person_map(id: &str, source: &str) -> TriplesMap {
        TriplesMap::new(
            id,
            csv_source(source),
            SubjectMap::new(TermMap::template("http://ex.org/person/{id}").unwrap()),
        )
    }

    fn name_pom() -> PredicateObjectMap {
        PredicateObjectMap::new()
            .with_predicate(TermMap::iri("http://xmlns.com/foaf/0.1/name").unwrap())
            .with_object(TermMap::reference("name"))
    }

    async fn mapper(sources: NamedSources) -> Mapper {
        Mapper::builder()
            .source_resolver(sources)
            .join_store_provider(Arc::new(MemoryJoinStoreProvider::new()))
            .build()
            .await
            .unwrap()
    }

    fn lines(statements: &[Statement]) -> Vec<String> {
        let mut lines: Vec<String> = statements.iter().map(|s| s.quad.to_string()).collect();
        lines.sort();
        lines
    }

    #[tokio::test]
    async fn test_simple_csv_mapping() {
        let sources = NamedSources::new().with_bytes("people.csv", "id,name\n1,Ada\n2,Grace\n");
        let mapping = Mapping::new(vec![person_map("people", "people.csv")
            .with_predicate_object_map(name_pom())])
        .unwrap();
        let statements = mapper(sources).await.map_to_vec(&mapping).await.unwrap();
        assert_eq!(
            lines(&statements),
            vec![
                "<http://ex.org/person/1> <http://xmlns.com/foaf/0.1/name> \"Ada\" .",
                "<http://ex.org/person/2> <http://xmlns.com/foaf/0.1/name> \"Grace\" .",
            ]
        );
    }

    #[tokio::test]
    async fn test_classes_become_rdf_type() {
        let sources = NamedSources::new().with_bytes("people.csv", "id\n1\n");
        let mut map = person_map("people", "people.csv");
        map.subject_map = map
            .subject_map
            .with_class(NamedNode::new("http://xmlns.com/foaf/0.1/Person").unwrap());
        let statements = mapper(sources)
            .await
            .map_to_vec(&Mapping::new(vec![map]).unwrap())
            .await
            .unwrap();
        assert_eq!(statements.len(), 1);
        assert_eq!(statements[0].quad.predicate.as_str(), rdf::TYPE);
    }

    #[tokio::test]
    async fn test_join_resolves_after_parent_indexing() {
        let sources = NamedSources::new()
            .with_bytes("people.csv", "id,name,team\n1,Ada,red\n2,Grace,blue\n3,Alan,green\n")
            .with_bytes("teams.csv", "code,label\nred,Red Team\nblue,Blue Team\n");
        let teams = TriplesMap::new(
            "teams",
            csv_source("teams.csv"),
            SubjectMap::new(TermMap::template("http://ex.org/team/{code}").unwrap()),
        );
        let people = person_map("people", "people.csv").with_predicate_object_map(
            PredicateObjectMap::new()
                .with_predicate(TermMap::iri("http://ex.org/memberOf").unwrap())
                .with_ref_object(RefObjectMap::new("teams").with_join("team", "code")),
        );
        let mapping = Mapping::new(vec![people, teams]).unwrap();

        let statements = mapper(sources)
            .await
            .map_only(&mapping, &["people"])
            .unwrap()
            .try_collect::<Vec<_>>()
            .await
            .unwrap();
        assert_eq!(
            lines(&statements),
            vec![
                "<http://ex.org/person/1> <http://ex.org/memberOf> <http://ex.org/team/red> .",
                "<http://ex.org/person/2> <http://ex.org/memberOf> <http://ex.org/team/blue> .",
            ]
        );
    }

    #[tokio::test]
    async fn test_join_without_conditions_on_same_source_is_inline() {
        let sources = NamedSources::new().with_bytes("people.csv", "id,name\n1,Ada\n2,Grace\n");
        let alias = TriplesMap::new(
            "alias",
            csv_source("people.csv"),
            SubjectMap::new(TermMap::template("http://ex.org/alias/{name}").unwrap()),
        );
        let people = person_map("people", "people.csv").with_predicate_object_map(
            PredicateObjectMap::new()
                .with_predicate(TermMap::iri("http://ex.org/alias").unwrap())
                .with_ref_object(RefObjectMap::new("alias")),
        );
        let mapping = Mapping::new(vec![people, alias]).unwrap();
        let statements = mapper(sources)
            .await
            .map_only(&mapping, &["people"])
            .unwrap()
            .try_collect::<Vec<_>>()
            .await
            .unwrap();
        assert_eq!(
            lines(&statements),
            vec![
                "<http://ex.org/person/1> <http://ex.org/alias> <http://ex.org/alias/Ada> .",
                "<http://ex.org/person/2> <http://ex.org/alias> <http://ex.org/alias/Grace> .",
            ]
        );
    }

    #[tokio::test]
    async fn test_join_without_conditions_across_sources_pairs_all() {
        let sources = NamedSources::new()
            .with_bytes("people.csv", "id\n1\n2\n")
            .with_bytes("teams.csv", "code\nred\nblue\n");
        let teams = TriplesMap::new(
            "teams",
            csv_source("teams.csv"),
            SubjectMap::new(TermMap::template("http://ex.org/team/{code}").unwrap()),
        );
        let people = person_map("people", "people.csv").with_predicate_object_map(
            PredicateObjectMap::new()
                .with_predicate(TermMap::iri("http://ex.org/knows").unwrap())
                .with_ref_object(RefObjectMap::new("teams")),
        );
        let mapping = Mapping::new(vec![people, teams]).unwrap();
        let statements = mapper(sources)
            .await
            .map_only(&mapping, &["people"])
            .unwrap()
            .try_collect::<Vec<_>>()
            .await
            .unwrap();
        assert_eq!(statements.len(), 4);
    }

    #[tokio::test]
    async fn test_pom_graph_and_subject_graph_union() {
        let sources = NamedSources::new().with_bytes("people.csv", "id,name\n1,Ada\n");
        let mut map = person_map("people", "people.csv")
            .with_predicate_object_map(name_pom().with_graph(TermMap::iri("http://ex.org/g2").unwrap()));
        map.subject_map = map
            .subject_map
            .with_graph(TermMap::iri("http://ex.org/g1").unwrap());
        let statements = mapper(sources)
            .await
            .map_to_vec(&Mapping::new(vec![map]).unwrap())
            .await
            .unwrap();
        let graphs: Vec<_> = statements
            .iter()
            .map(|s| s.quad.graph.clone().unwrap().to_string())
            .collect();
        assert_eq!(graphs, vec!["<http://ex.org/g1>", "<http://ex.org/g2>"]);
    }

    #[tokio::test]
    async fn test_missing_reference_value_skips_statement() {
        let sources = NamedSources::new().with_bytes("people.csv", "id,name\n1,\n2,Grace\n");
        let map = person_map("people", "people.csv").with_predicate_object_map(
            PredicateObjectMap::new()
                .with_predicate(TermMap::iri("http://xmlns.com/foaf/0.1/name").unwrap())
                .with_object(
                    ObjectMap::new(TermMap::reference("name")).with_language("en"),
                ),
        );
        let statements = mapper(sources)
            .await
            .map_to_vec(&Mapping::new(vec![map]).unwrap())
            .await
            .unwrap();
        assert_eq!(statements.len(), 1);
        assert_eq!(
            statements[0].quad.object,
            RdfObject::from(Literal::new_language_tagged_literal("Grace", "en").unwrap())
        );
    }

    #[tokio::test]
    async fn test_unresolved_source_ends_only_its_pipeline() {
        let sources = NamedSources::new().with_bytes("people.csv", "id,name\n1,Ada\n");
        let good = person_map("people", "people.csv").with_predicate_object_map(name_pom());
        let bad = person_map("ghosts", "ghosts.csv").with_predicate_object_map(name_pom());
        let mapping = Mapping::new(vec![good, bad]).unwrap();

        let results: Vec<_> = mapper(sources).await.map(&mapping).unwrap().collect().await;
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results.iter().any(|r| matches!(
            r,
            Err(MappingError::Resolver(ResolverError::UnresolvedSource(name))) if name == "ghosts.csv"
        )));
    }

    #[tokio::test]
    async fn test_unknown_triples_map_id() {
        let mapping = Mapping::new(vec![person_map("people", "people.csv")]).unwrap();
        let result = mapper(NamedSources::new()).await.map_only(&mapping, &["nope"]);
        assert!(matches!(result, Err(MappingError::UnknownTriplesMap(id)) if id == "nope"));
    }

    #[tokio::test]
    async fn test_graph_modifier_applied() {
        let sources = NamedSources::new().with_bytes("people.csv", "id,name\n1,Ada\n");
        let map = person_map("people", "people.csv")
            .with_predicate_object_map(name_pom().with_graph(TermMap::iri("http://ex.org/g").unwrap()));
        let mapper = Mapper::builder()
            .source_resolver(sources)
            .graph_modifier(|graph| match graph {
                RdfSubject::NamedNode(iri) => RdfSubject::from(
                    NamedNode::new(format!("{}/2024", iri.as_str())).unwrap(),
                ),
                other => other,
            })
            .build()
            .await
            .unwrap();
        let statements = mapper
            .map_to_vec(&Mapping::new(vec![map]).unwrap())
            .await
            .unwrap();
        assert_eq!(
            statements[0].quad.graph,
            Some(RdfSubject::from(NamedNode::new("http://ex.org/g/2024").unwrap()))
        );
    }
}
