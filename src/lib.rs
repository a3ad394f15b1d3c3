//! Samyama RML
//!
//! A streaming RML/R2RML mapping engine. Given compiled TriplesMaps and a
//! way to resolve their sources, it reads CSV, JSON, XML and SQL records,
//! evaluates term maps against each record and emits RDF quads.
//!
//! # Architecture
//!
//! - [`template`]: the `text{expr}text` grammar and its cartesian evaluation
//! - [`expression`]: per-format reference evaluation (column names,
//!   JSONPath, XPath)
//! - [`resolver`]: format resolvers that stream records with explicit
//!   demand, and the matcher that picks one per logical source
//! - [`generator`]: term generation and the statement product
//! - [`join`]: parent index and child candidates for referencing object
//!   maps, held in memory, spilled to disk or on a RESP server
//! - [`pipeline`]: one pipeline per TriplesMap, merged into a single
//!   statement stream
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use samyama_rml::mapping::{
//!     LogicalSource, Mapping, PredicateObjectMap, SourceRef, SubjectMap, TermMap, TriplesMap,
//! };
//! use samyama_rml::rdf::vocab::ql;
//! use samyama_rml::{Mapper, NamedSources};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let json = r#"{"people": [{"id": 1, "name": "Ada"}, {"id": 2, "name": "Grace"}]}"#;
//! let sources = NamedSources::new().with_bytes("people.json", json);
//!
//! let source = LogicalSource::new(SourceRef::new("people.json"))
//!     .with_iterator("$.people[*]")
//!     .with_reference_formulation(ql::JSON_PATH);
//! let people = TriplesMap::new(
//!     "people",
//!     Arc::new(source),
//!     SubjectMap::new(TermMap::template("http://example.org/person/{id}")?),
//! )
//! .with_predicate_object_map(
//!     PredicateObjectMap::new()
//!         .with_predicate(TermMap::iri("http://xmlns.com/foaf/0.1/name")?)
//!         .with_object(TermMap::reference("name")),
//! );
//!
//! let mapper = Mapper::builder().source_resolver(sources).build().await?;
//! for statement in mapper.map_to_vec(&Mapping::new(vec![people])?).await? {
//!     println!("{}", statement.quad);
//! }
//! # Ok(())
//! # }
//! ```

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod expression;
pub mod function;
pub mod generator;
pub mod join;
pub mod mapping;
pub mod pipeline;
pub mod rdf;
pub mod resolver;
pub mod template;

// Re-export main types for convenience
pub use config::{ConfigError, ConfigResult, EngineConfig, JoinStoreConfig, ResolverSelection};

pub use expression::{ExpressionError, ExpressionEvaluation, ExpressionResult, Values};

pub use function::{FunctionError, FunctionRegistry, FunctionResult, ParameterKind, ParameterSpec};

pub use generator::{MappedValue, Statement, StatementError, TermError, TermGenerator};

pub use join::{
    ChildSideJoin, ChildSideJoinStore, JoinStoreError, JoinStoreProvider, JoinStoreResult,
    MemoryJoinStoreProvider, ParentSideJoinKey, ParentSideJoinStore, RemoteJoinStoreProvider,
    SpillJoinStoreProvider,
};

pub use mapping::{
    LogicalSource, Mapping, ObjectMap, PredicateObjectMap, RefObjectMap, SourceRef, SubjectMap,
    TermMap, TermMapKind, TermType, TriplesMap,
};

pub use pipeline::{Mapper, MapperBuilder, MappingError, MappingResult, StatementStream};

pub use rdf::{BlankNode, Literal, NamedNode, Quad, RdfObject, RdfSubject, RdfTerm};

pub use resolver::{
    LogicalSourceResolver, NamedSources, NativeRecord, ResolverError, ResolverRegistry,
    ResolverResult, SourceHandle, SourceResolver,
};

pub use template::{Segment, Template, TemplateError, TemplateResult};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get version string
pub fn version() -> &'static str {
    VERSION
}
