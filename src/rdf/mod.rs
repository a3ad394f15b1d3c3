//! RDF data model used by the mapping engine
//!
//! Generated statements are quads over oxrdf terms. The wrappers here are
//! serializable so join candidates can be spilled to disk or sent to a
//! remote store.
//!
//! # Example
//!
//! ```rust
//! use samyama_rml::rdf::{Literal, NamedNode, Quad};
//!
//! let subject = NamedNode::new("http://example.org/alice").unwrap();
//! let predicate = NamedNode::new("http://xmlns.com/foaf/0.1/name").unwrap();
//! let quad = Quad::new(subject.into(), predicate, Literal::new_simple_literal("Alice").into(), None);
//! assert!(quad.in_default_graph());
//! ```

mod types;
pub mod vocab;

pub use types::{
    BlankNode, Literal, NamedNode, Quad, RdfError, RdfObject, RdfResult, RdfSubject, RdfTerm,
};
