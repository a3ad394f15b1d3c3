//! Compiled mapping model
//!
//! The engine consumes mappings that were already loaded from their RDF
//! form: TriplesMaps over shared logical sources, with term maps modelled as
//! sum types. A [`Mapping`] groups the TriplesMaps of one document so
//! referencing object maps can find their parents by id.
//!
//! # Example
//!
//! ```rust
//! use samyama_rml::mapping::{
//!     LogicalSource, Mapping, PredicateObjectMap, SourceRef, SubjectMap, TermMap, TriplesMap,
//! };
//! use std::sync::Arc;
//!
//! let source = Arc::new(LogicalSource::new(SourceRef::new("people.csv")));
//! let people = TriplesMap::new(
//!     "people",
//!     source,
//!     SubjectMap::new(TermMap::template("http://ex.org/person/{id}").unwrap()),
//! )
//! .with_predicate_object_map(
//!     PredicateObjectMap::new()
//!         .with_predicate(TermMap::iri("http://xmlns.com/foaf/0.1/name").unwrap())
//!         .with_object(TermMap::reference("name")),
//! );
//!
//! let mapping = Mapping::new(vec![people]).unwrap();
//! assert_eq!(mapping.len(), 1);
//! ```

mod logical_source;
mod term_map;
mod triples_map;

pub use logical_source::{CsvDialect, LogicalSource, SourceRef};
pub use term_map::{
    FunctionExecution, ObjectMap, ParameterBinding, Target, TermMap, TermMapKind, TermType,
};
pub use triples_map::{
    Join, ObjectMapping, PredicateObjectMap, RefObjectMap, SubjectMap, TriplesMap,
};

use indexmap::IndexMap;
use std::sync::Arc;
use thiserror::Error;

/// Mapping validation error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid TriplesMap '{triples_map}': {message}")]
pub struct ValidationError {
    pub triples_map: String,
    pub message: String,
}

pub type ValidationResult<T> = Result<T, ValidationError>;

/// The TriplesMaps of one mapping document, by id, in declaration order
#[derive(Debug, Clone, Default)]
pub struct Mapping {
    triples_maps: IndexMap<String, Arc<TriplesMap>>,
}

impl Mapping {
    /// Build and validate a mapping
    pub fn new(triples_maps: Vec<TriplesMap>) -> ValidationResult<Self> {
        let mut by_id = IndexMap::with_capacity(triples_maps.len());
        for map in triples_maps {
            map.validate()?;
            let id = map.id.clone();
            if by_id.insert(id.clone(), Arc::new(map)).is_some() {
                return Err(ValidationError {
                    triples_map: id,
                    message: "duplicate TriplesMap id".to_string(),
                });
            }
        }

        let mapping = Self { triples_maps: by_id };
        for map in mapping.triples_maps.values() {
            for pom in &map.predicate_object_maps {
                for ref_object in pom.ref_object_maps() {
                    if !mapping.triples_maps.contains_key(&ref_object.parent_triples_map) {
                        return Err(ValidationError {
                            triples_map: map.id.clone(),
                            message: format!(
                                "unknown parent TriplesMap '{}'",
                                ref_object.parent_triples_map
                            ),
                        });
                    }
                }
            }
        }
        Ok(mapping)
    }

    pub fn get(&self, id: &str) -> Option<&Arc<TriplesMap>> {
        self.triples_maps.get(id)
    }

    pub fn triples_maps(&self) -> impl Iterator<Item = &Arc<TriplesMap>> {
        self.triples_maps.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.triples_maps.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.triples_maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triples_maps.is_empty()
    }
}
