//! From evaluated records to RDF statements
//!
//! [`term`] turns term maps into terms for one record; [`statement`] combines
//! the terms of every position into quads.

pub mod statement;
pub mod term;

pub use statement::{generate, MappedValue, Statement, StatementError, StatementResult};
pub use term::{blank_node_for, iri_safe, TermError, TermGenerator, TermResult};
