//! Term maps
//!
//! A term map derives one RDF term position (subject, predicate, object or
//! graph) from a record. Exactly one way of producing values is set, which
//! the [`TermMapKind`] sum type enforces by construction.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::rdf::{Literal, NamedNode, RdfResult, RdfTerm};
use crate::template::{Template, TemplateResult};

/// Output sink a generated statement is routed to
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Target(pub String);

impl Target {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Term type (`rr:termType`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TermType {
    Iri,
    BlankNode,
    Literal,
}

/// A function call whose result supplies term values
///
/// Parameters are bound to term maps evaluated against the same record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionExecution {
    pub function: NamedNode,
    pub parameters: Vec<ParameterBinding>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParameterBinding {
    pub parameter: NamedNode,
    pub value: TermMap,
}

impl FunctionExecution {
    pub fn new(function: NamedNode) -> Self {
        Self {
            function,
            parameters: Vec::new(),
        }
    }

    pub fn with_parameter(mut self, parameter: NamedNode, value: TermMap) -> Self {
        self.parameters.push(ParameterBinding { parameter, value });
        self
    }
}

/// How a term map produces its values
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TermMapKind {
    Constant(RdfTerm),
    Reference(String),
    Template(Template),
    FunctionValue(FunctionExecution),
}

/// A term map with its term type and output targets
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TermMap {
    pub kind: TermMapKind,
    /// Explicit term type; `None` applies the position's default
    pub term_type: Option<TermType>,
    pub targets: BTreeSet<Target>,
}

impl TermMap {
    pub fn new(kind: TermMapKind) -> Self {
        Self {
            kind,
            term_type: None,
            targets: BTreeSet::new(),
        }
    }

    pub fn constant(term: impl Into<RdfTerm>) -> Self {
        Self::new(TermMapKind::Constant(term.into()))
    }

    /// Constant IRI
    pub fn iri(iri: &str) -> RdfResult<Self> {
        Ok(Self::constant(NamedNode::new(iri)?))
    }

    /// Constant plain literal
    pub fn literal(value: impl Into<String>) -> Self {
        Self::constant(Literal::new_simple_literal(value))
    }

    pub fn reference(expression: impl Into<String>) -> Self {
        Self::new(TermMapKind::Reference(expression.into()))
    }

    pub fn template(raw: &str) -> TemplateResult<Self> {
        Ok(Self::new(TermMapKind::Template(Template::parse(raw)?)))
    }

    pub fn function(execution: FunctionExecution) -> Self {
        Self::new(TermMapKind::FunctionValue(execution))
    }

    pub fn with_term_type(mut self, term_type: TermType) -> Self {
        self.term_type = Some(term_type);
        self
    }

    pub fn with_target(mut self, target: Target) -> Self {
        self.targets.insert(target);
        self
    }

    /// Reference expressions this term map reads from the record
    pub fn references(&self) -> Vec<&str> {
        match &self.kind {
            TermMapKind::Constant(_) => Vec::new(),
            TermMapKind::Reference(expression) => vec![expression.as_str()],
            TermMapKind::Template(template) => template.expressions().map(|(_, raw)| raw).collect(),
            TermMapKind::FunctionValue(execution) => execution
                .parameters
                .iter()
                .flat_map(|binding| binding.value.references())
                .collect(),
        }
    }
}

/// An object map: a term map plus optional datatype or language tag
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectMap {
    pub term_map: TermMap,
    pub datatype: Option<NamedNode>,
    pub language: Option<String>,
}

impl ObjectMap {
    pub fn new(term_map: TermMap) -> Self {
        Self {
            term_map,
            datatype: None,
            language: None,
        }
    }

    pub fn with_datatype(mut self, datatype: NamedNode) -> Self {
        self.datatype = Some(datatype);
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }
}

impl From<TermMap> for ObjectMap {
    fn from(term_map: TermMap) -> Self {
        ObjectMap::new(term_map)
    }
}
