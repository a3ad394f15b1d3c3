//! Term generation
//!
//! Turns a term map plus a record evaluator into RDF terms. Values come from
//! a constant, a reference, a template or a function call; the term type then
//! decides whether each value becomes an IRI, a blank node or a literal.

use indexmap::IndexSet;
use oxiri::Iri;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use super::statement::MappedValue;
use crate::expression::{ExpressionError, ExpressionEvaluation};
use crate::function::{FunctionError, FunctionRegistry};
use crate::mapping::{ObjectMap, SubjectMap, TermMap, TermMapKind, TermType};
use crate::rdf::{
    BlankNode, Literal, NamedNode, RdfError, RdfObject, RdfSubject, RdfTerm,
};
use crate::template::ExprId;

/// Term generation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TermError {
    #[error("Invalid IRI '{value}': {reason}")]
    InvalidIri { value: String, reason: String },

    #[error("Invalid literal '{value}': {reason}")]
    InvalidLiteral { value: String, reason: String },

    /// Term type not allowed in the position, e.g. a literal subject
    #[error("A {position} cannot be a {term_type:?}")]
    InvalidTermType {
        position: &'static str,
        term_type: TermType,
    },

    #[error(transparent)]
    Expression(#[from] ExpressionError),

    #[error(transparent)]
    Function(#[from] FunctionError),
}

pub type TermResult<T> = Result<T, TermError>;

/// Characters kept verbatim in template values placed into IRIs
const IRI_UNSAFE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Percent-encode every ASCII character outside the unreserved set.
/// Non-ASCII characters are valid in IRIs and stay as they are.
pub fn iri_safe(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut buf = [0u8; 4];
    for c in value.chars() {
        if c.is_ascii() {
            out.extend(utf8_percent_encode(c.encode_utf8(&mut buf), IRI_UNSAFE));
        } else {
            out.push(c);
        }
    }
    out
}

/// Blank node for a generated value
///
/// Values that are valid blank node labels are used directly; anything else
/// is replaced by a digest, so equal values still give equal nodes.
pub fn blank_node_for(value: &str) -> BlankNode {
    if let Ok(node) = BlankNode::from_id(value) {
        return node;
    }
    let digest = Sha256::digest(value.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    BlankNode::from_id(&format!("b{}", hex)).unwrap_or_default()
}

/// Which term position is being generated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Position {
    Subject,
    Predicate,
    Object,
    Graph,
}

impl Position {
    fn name(&self) -> &'static str {
        match self {
            Position::Subject => "subject",
            Position::Predicate => "predicate",
            Position::Object => "object",
            Position::Graph => "graph",
        }
    }
}

/// Builds terms from term maps
#[derive(Clone)]
pub struct TermGenerator {
    base_iri: Option<Iri<String>>,
    functions: Arc<FunctionRegistry>,
}

impl TermGenerator {
    pub fn new(functions: Arc<FunctionRegistry>) -> Self {
        Self {
            base_iri: None,
            functions,
        }
    }

    /// Resolve relative IRIs against `base`
    pub fn with_base_iri(mut self, base: &str) -> TermResult<Self> {
        let iri = Iri::parse(base.to_string()).map_err(|e| TermError::InvalidIri {
            value: base.to_string(),
            reason: e.to_string(),
        })?;
        self.base_iri = Some(iri);
        Ok(self)
    }

    pub fn functions(&self) -> &Arc<FunctionRegistry> {
        &self.functions
    }

    /// Subjects of one record; a subject map without a value source yields
    /// one fresh blank node
    pub fn subjects(
        &self,
        map: &SubjectMap,
        record: &dyn ExpressionEvaluation,
    ) -> TermResult<Vec<MappedValue<RdfSubject>>> {
        let Some(term_map) = &map.term_map else {
            return Ok(vec![MappedValue::new(RdfSubject::BlankNode(BlankNode::new()))]);
        };
        self.resources(term_map, Position::Subject, record)
    }

    pub fn predicates(
        &self,
        maps: &[TermMap],
        record: &dyn ExpressionEvaluation,
    ) -> TermResult<Vec<MappedValue<NamedNode>>> {
        let mut out = IndexSet::new();
        for map in maps {
            let term_type = map.term_type.unwrap_or(TermType::Iri);
            if term_type != TermType::Iri {
                return Err(TermError::InvalidTermType {
                    position: Position::Predicate.name(),
                    term_type,
                });
            }
            for term in self.terms(map, term_type, None, None, record)? {
                match term.into_named_node() {
                    Some(iri) => {
                        out.insert(MappedValue::with_targets(iri, map.targets.clone()));
                    }
                    None => {
                        return Err(TermError::InvalidTermType {
                            position: Position::Predicate.name(),
                            term_type: TermType::BlankNode,
                        })
                    }
                }
            }
        }
        Ok(out.into_iter().collect())
    }

    pub fn objects(
        &self,
        map: &ObjectMap,
        record: &dyn ExpressionEvaluation,
    ) -> TermResult<Vec<MappedValue<RdfObject>>> {
        let term_type = map.term_map.term_type.unwrap_or_else(|| default_object_type(map));
        let terms = self.terms(
            &map.term_map,
            term_type,
            map.datatype.as_ref(),
            map.language.as_deref(),
            record,
        )?;
        let unique: IndexSet<MappedValue<RdfObject>> = terms
            .into_iter()
            .map(|term| MappedValue::with_targets(term.into_object(), map.term_map.targets.clone()))
            .collect();
        Ok(unique.into_iter().collect())
    }

    pub fn graphs(
        &self,
        maps: &[TermMap],
        record: &dyn ExpressionEvaluation,
    ) -> TermResult<Vec<MappedValue<RdfSubject>>> {
        let mut out = IndexSet::new();
        for map in maps {
            out.extend(self.resources(map, Position::Graph, record)?);
        }
        Ok(out.into_iter().collect())
    }

    fn resources(
        &self,
        map: &TermMap,
        position: Position,
        record: &dyn ExpressionEvaluation,
    ) -> TermResult<Vec<MappedValue<RdfSubject>>> {
        let term_type = map.term_type.unwrap_or(TermType::Iri);
        if term_type == TermType::Literal {
            return Err(TermError::InvalidTermType {
                position: position.name(),
                term_type,
            });
        }
        let mut out = IndexSet::new();
        for term in self.terms(map, term_type, None, None, record)? {
            let resource = term.into_subject().ok_or(TermError::InvalidTermType {
                position: position.name(),
                term_type: TermType::Literal,
            })?;
            out.insert(MappedValue::with_targets(resource, map.targets.clone()));
        }
        Ok(out.into_iter().collect())
    }

    /// Generate the terms of `map` as `term_type`
    pub fn terms(
        &self,
        map: &TermMap,
        term_type: TermType,
        datatype: Option<&NamedNode>,
        language: Option<&str>,
        record: &dyn ExpressionEvaluation,
    ) -> TermResult<Vec<RdfTerm>> {
        if let TermMapKind::Constant(term) = &map.kind {
            return Ok(vec![term.clone()]);
        }

        let encode = term_type == TermType::Iri && matches!(map.kind, TermMapKind::Template(_));
        let values = self.lexical_values(map, encode, record)?;
        values
            .iter()
            .map(|value| match term_type {
                TermType::Iri => self.iri(value).map(RdfTerm::NamedNode),
                TermType::BlankNode => Ok(RdfTerm::BlankNode(blank_node_for(value))),
                TermType::Literal => literal(value, datatype, language).map(RdfTerm::Literal),
            })
            .collect()
    }

    /// The string values a term map yields for a record, before they are
    /// turned into terms. Template values are IRI-encoded when `encode` is set.
    pub fn lexical_values(
        &self,
        map: &TermMap,
        encode: bool,
        record: &dyn ExpressionEvaluation,
    ) -> TermResult<Vec<String>> {
        match &map.kind {
            TermMapKind::Constant(term) => Ok(vec![lexical_form(term)]),
            TermMapKind::Reference(expression) => Ok(record
                .evaluate(expression)?
                .map(|values| unique(values.into_vec()))
                .unwrap_or_default()),
            TermMapKind::Template(template) => {
                let mut bindings: HashMap<ExprId, IndexSet<String>> = HashMap::new();
                for (id, expression) in template.expressions() {
                    let values = record
                        .evaluate(expression)?
                        .map(|values| values.into_vec())
                        .unwrap_or_default();
                    let values = values
                        .into_iter()
                        .map(|value| if encode { iri_safe(&value) } else { value })
                        .collect();
                    bindings.insert(id, values);
                }
                Ok(template.evaluate(&bindings).into_iter().collect())
            }
            TermMapKind::FunctionValue(execution) => {
                let mut inputs: HashMap<String, Vec<String>> = HashMap::new();
                for binding in &execution.parameters {
                    let values = self.lexical_values(&binding.value, false, record)?;
                    inputs
                        .entry(binding.parameter.as_str().to_string())
                        .or_default()
                        .extend(values);
                }
                let output = self.functions.invoke(execution.function.as_str(), &inputs)?;
                Ok(unique(output))
            }
        }
    }

    fn iri(&self, value: &str) -> TermResult<NamedNode> {
        if let Ok(iri) = Iri::parse(value) {
            return NamedNode::new(iri.as_str()).map_err(|e| invalid_iri(value, e));
        }
        match &self.base_iri {
            Some(base) => {
                let resolved = base.resolve(value).map_err(|e| TermError::InvalidIri {
                    value: value.to_string(),
                    reason: e.to_string(),
                })?;
                NamedNode::new(resolved.into_inner()).map_err(|e| invalid_iri(value, e))
            }
            None => Err(TermError::InvalidIri {
                value: value.to_string(),
                reason: "relative IRI and no base IRI configured".to_string(),
            }),
        }
    }
}

fn invalid_iri(value: &str, error: RdfError) -> TermError {
    TermError::InvalidIri {
        value: value.to_string(),
        reason: error.to_string(),
    }
}

fn default_object_type(map: &ObjectMap) -> TermType {
    let literal_kind = matches!(
        map.term_map.kind,
        TermMapKind::Reference(_) | TermMapKind::FunctionValue(_)
    );
    if literal_kind || map.datatype.is_some() || map.language.is_some() {
        TermType::Literal
    } else {
        TermType::Iri
    }
}

fn literal(value: &str, datatype: Option<&NamedNode>, language: Option<&str>) -> TermResult<Literal> {
    match (language, datatype) {
        (Some(language), _) => Literal::new_language_tagged_literal(value, language).map_err(|e| {
            TermError::InvalidLiteral {
                value: value.to_string(),
                reason: e.to_string(),
            }
        }),
        (None, Some(datatype)) => Ok(Literal::new_typed_literal(value, datatype.clone())),
        (None, None) => Ok(Literal::new_simple_literal(value)),
    }
}

fn lexical_form(term: &RdfTerm) -> String {
    match term {
        RdfTerm::NamedNode(node) => node.as_str().to_string(),
        RdfTerm::BlankNode(node) => node.as_str().to_string(),
        RdfTerm::Literal(literal) => literal.value().to_string(),
    }
}

fn unique(values: Vec<String>) -> Vec<String> {
    values.into_iter().collect::<IndexSet<_>>().into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::{ExpressionResult, Values};
    use crate::mapping::{FunctionExecution, Target};
    use crate::rdf::vocab::{grel, xsd};

    fn record(pairs: &'static [(&'static str, &'static [&'static str])]) -> impl ExpressionEvaluation {
        move |expression: &str| -> ExpressionResult<Option<Values>> {
            match pairs.iter().find(|(name, _)| *name == expression) {
                Some((_, values)) => {
                    Ok(Values::from_vec(values.iter().map(|v| v.to_string()).collect()))
                }
                None => Err(ExpressionError::new(expression, "no such field")),
            }
        }
    }

    fn generator() -> TermGenerator {
        TermGenerator::new(Arc::new(FunctionRegistry::with_builtins()))
    }

    #[test]
    fn test_iri_safe() {
        assert_eq!(iri_safe("Alice Smith"), "Alice%20Smith");
        assert_eq!(iri_safe("a/b?c"), "a%2Fb%3Fc");
        assert_eq!(iri_safe("Müller-1.x_~"), "Müller-1.x_~");
    }

    #[test]
    fn test_template_subject_is_encoded() {
        let rec = record(&[("name", &["Alice Smith"])]);
        let map = SubjectMap::new(TermMap::template("http://ex.org/{name}").unwrap());
        let subjects = generator().subjects(&map, &rec).unwrap();
        assert_eq!(subjects.len(), 1);
        assert_eq!(subjects[0].value.to_string(), "<http://ex.org/Alice%20Smith>");
    }

    #[test]
    fn test_reference_iri_used_as_is() {
        let rec = record(&[("homepage", &["http://ex.org/a b"])]);
        let map = SubjectMap::new(TermMap::reference("homepage"));
        assert!(matches!(
            generator().subjects(&map, &rec),
            Err(TermError::InvalidIri { .. })
        ));

        let rec = record(&[("homepage", &["http://ex.org/~alice"])]);
        let subjects = generator().subjects(&map, &rec).unwrap();
        assert_eq!(subjects[0].value.to_string(), "<http://ex.org/~alice>");
    }

    #[test]
    fn test_relative_iri_resolution() {
        let rec = record(&[("id", &["7"])]);
        let map = SubjectMap::new(TermMap::template("person/{id}").unwrap());
        assert!(generator().subjects(&map, &rec).is_err());

        let generator = generator().with_base_iri("http://ex.org/base/").unwrap();
        let subjects = generator.subjects(&map, &rec).unwrap();
        assert_eq!(subjects[0].value.to_string(), "<http://ex.org/base/person/7>");
    }

    #[test]
    fn test_blank_nodes() {
        let rec = record(&[("id", &["p1"]), ("label", &["not a label!"])]);
        let map = SubjectMap::new(TermMap::reference("id").with_term_type(TermType::BlankNode));
        let subjects = generator().subjects(&map, &rec).unwrap();
        assert_eq!(subjects[0].value.to_string(), "_:p1");

        let map = SubjectMap::new(TermMap::reference("label").with_term_type(TermType::BlankNode));
        let first = generator().subjects(&map, &rec).unwrap();
        let second = generator().subjects(&map, &rec).unwrap();
        assert!(first[0].value.is_blank_node());
        assert_eq!(first, second);

        let fresh = generator().subjects(&SubjectMap::blank(), &rec).unwrap();
        let again = generator().subjects(&SubjectMap::blank(), &rec).unwrap();
        assert_ne!(fresh, again);
    }

    #[test]
    fn test_object_defaults() {
        let rec = record(&[("name", &["Alice"]), ("id", &["1"])]);
        let g = generator();

        let objects = g.objects(&ObjectMap::new(TermMap::reference("name")), &rec).unwrap();
        assert!(objects[0].value.is_literal());

        let objects = g
            .objects(&ObjectMap::new(TermMap::template("http://ex.org/{id}").unwrap()), &rec)
            .unwrap();
        assert_eq!(objects[0].value.to_string(), "<http://ex.org/1>");

        let typed = ObjectMap::new(TermMap::reference("id"))
            .with_datatype(NamedNode::new(xsd::INTEGER).unwrap());
        let objects = g.objects(&typed, &rec).unwrap();
        assert_eq!(
            objects[0].value.to_string(),
            "\"1\"^^<http://www.w3.org/2001/XMLSchema#integer>"
        );

        let tagged = ObjectMap::new(TermMap::reference("name")).with_language("en");
        assert_eq!(g.objects(&tagged, &rec).unwrap()[0].value.to_string(), "\"Alice\"@en");

        let templated_literal = ObjectMap::new(TermMap::template("{name}!").unwrap())
            .with_language("en");
        assert_eq!(
            g.objects(&templated_literal, &rec).unwrap()[0].value.to_string(),
            "\"Alice!\"@en"
        );
    }

    #[test]
    fn test_multi_valued_reference() {
        let rec = record(&[("tag", &["a", "b", "a"])]);
        let objects = generator()
            .objects(&ObjectMap::new(TermMap::reference("tag")), &rec)
            .unwrap();
        assert_eq!(objects.len(), 2);
    }

    #[test]
    fn test_missing_value_yields_nothing() {
        let rec = |expression: &str| -> ExpressionResult<Option<Values>> {
            let _ = expression;
            Ok(None)
        };
        let map = SubjectMap::new(TermMap::template("http://ex.org/{id}").unwrap());
        assert!(generator().subjects(&map, &rec).unwrap().is_empty());
    }

    #[test]
    fn test_expression_error_propagates() {
        let rec = record(&[]);
        let map = SubjectMap::new(TermMap::template("http://ex.org/{id}").unwrap());
        assert!(matches!(
            generator().subjects(&map, &rec),
            Err(TermError::Expression(_))
        ));
    }

    #[test]
    fn test_literal_predicate_rejected() {
        let rec = record(&[("p", &["http://ex.org/p"])]);
        let maps = vec![TermMap::reference("p").with_term_type(TermType::Literal)];
        assert!(matches!(
            generator().predicates(&maps, &rec),
            Err(TermError::InvalidTermType { position: "predicate", .. })
        ));
    }

    #[test]
    fn test_targets_travel_with_values() {
        let rec = record(&[("name", &["Alice"])]);
        let map = ObjectMap::new(TermMap::reference("name").with_target(Target::new("out")));
        let objects = generator().objects(&map, &rec).unwrap();
        assert!(objects[0].targets.contains(&Target::new("out")));
    }

    #[test]
    fn test_function_value() {
        let rec = record(&[("name", &["alice"])]);
        let call = FunctionExecution::new(NamedNode::new(grel::TO_UPPER_CASE).unwrap())
            .with_parameter(
                NamedNode::new(grel::VALUE_PARAM).unwrap(),
                TermMap::reference("name"),
            );
        let objects = generator()
            .objects(&ObjectMap::new(TermMap::function(call)), &rec)
            .unwrap();
        assert_eq!(objects[0].value.to_string(), "\"ALICE\"");
    }
}
