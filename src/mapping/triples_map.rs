//! TriplesMaps and their subject / predicate-object maps

use std::sync::Arc;

use super::logical_source::LogicalSource;
use super::term_map::{ObjectMap, TermMap, TermMapKind, TermType};
use super::{ValidationError, ValidationResult};
use crate::rdf::{NamedNode, RdfTerm};

/// Subject map
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectMap {
    /// `None` mints a fresh blank node per record
    pub term_map: Option<TermMap>,
    /// `rr:class` values, emitted as `rdf:type` statements
    pub classes: Vec<NamedNode>,
    pub graph_maps: Vec<TermMap>,
}

impl SubjectMap {
    pub fn new(term_map: TermMap) -> Self {
        Self {
            term_map: Some(term_map),
            classes: Vec::new(),
            graph_maps: Vec::new(),
        }
    }

    /// Subject map without a value source, producing blank nodes
    pub fn blank() -> Self {
        Self {
            term_map: None,
            classes: Vec::new(),
            graph_maps: Vec::new(),
        }
    }

    pub fn with_class(mut self, class: NamedNode) -> Self {
        self.classes.push(class);
        self
    }

    pub fn with_graph(mut self, graph: TermMap) -> Self {
        self.graph_maps.push(graph);
        self
    }
}

/// Join condition between a child and a parent TriplesMap
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Join {
    pub child_reference: String,
    pub parent_reference: String,
}

/// Object map whose values are the subjects of another TriplesMap
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefObjectMap {
    /// Id of the parent TriplesMap
    pub parent_triples_map: String,
    pub join_conditions: Vec<Join>,
}

impl RefObjectMap {
    pub fn new(parent_triples_map: impl Into<String>) -> Self {
        Self {
            parent_triples_map: parent_triples_map.into(),
            join_conditions: Vec::new(),
        }
    }

    pub fn with_join(
        mut self,
        child_reference: impl Into<String>,
        parent_reference: impl Into<String>,
    ) -> Self {
        let join = Join {
            child_reference: child_reference.into(),
            parent_reference: parent_reference.into(),
        };
        if !self.join_conditions.contains(&join) {
            self.join_conditions.push(join);
        }
        self
    }
}

/// Either kind of object map a predicate-object map can hold
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectMapping {
    Term(ObjectMap),
    Ref(RefObjectMap),
}

/// Predicate-object map
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PredicateObjectMap {
    pub predicate_maps: Vec<TermMap>,
    pub object_maps: Vec<ObjectMapping>,
    pub graph_maps: Vec<TermMap>,
}

impl PredicateObjectMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_predicate(mut self, predicate: TermMap) -> Self {
        self.predicate_maps.push(predicate);
        self
    }

    pub fn with_object(mut self, object: impl Into<ObjectMap>) -> Self {
        self.object_maps.push(ObjectMapping::Term(object.into()));
        self
    }

    pub fn with_ref_object(mut self, object: RefObjectMap) -> Self {
        self.object_maps.push(ObjectMapping::Ref(object));
        self
    }

    pub fn with_graph(mut self, graph: TermMap) -> Self {
        self.graph_maps.push(graph);
        self
    }

    pub fn term_object_maps(&self) -> impl Iterator<Item = &ObjectMap> {
        self.object_maps.iter().filter_map(|object| match object {
            ObjectMapping::Term(map) => Some(map),
            ObjectMapping::Ref(_) => None,
        })
    }

    pub fn ref_object_maps(&self) -> impl Iterator<Item = &RefObjectMap> {
        self.object_maps.iter().filter_map(|object| match object {
            ObjectMapping::Ref(map) => Some(map),
            ObjectMapping::Term(_) => None,
        })
    }
}

/// One mapping rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriplesMap {
    pub id: String,
    pub logical_source: Arc<LogicalSource>,
    pub subject_map: SubjectMap,
    pub predicate_object_maps: Vec<PredicateObjectMap>,
}

impl TriplesMap {
    pub fn new(
        id: impl Into<String>,
        logical_source: Arc<LogicalSource>,
        subject_map: SubjectMap,
    ) -> Self {
        Self {
            id: id.into(),
            logical_source,
            subject_map,
            predicate_object_maps: Vec::new(),
        }
    }

    pub fn with_predicate_object_map(mut self, map: PredicateObjectMap) -> Self {
        self.predicate_object_maps.push(map);
        self
    }

    /// Check the structural rules a compiled TriplesMap must satisfy
    pub fn validate(&self) -> ValidationResult<()> {
        if let Some(subject) = &self.subject_map.term_map {
            self.check_resource_position(subject, "subject")?;
        }
        for graph in &self.subject_map.graph_maps {
            self.check_resource_position(graph, "graph")?;
        }

        for pom in &self.predicate_object_maps {
            if pom.predicate_maps.is_empty() {
                return Err(self.invalid("predicate-object map without predicate map"));
            }
            if pom.object_maps.is_empty() {
                return Err(self.invalid("predicate-object map without object map"));
            }
            for predicate in &pom.predicate_maps {
                if matches!(predicate.term_type, Some(TermType::BlankNode | TermType::Literal)) {
                    return Err(self.invalid("predicate maps must produce IRIs"));
                }
                if let TermMapKind::Constant(term) = &predicate.kind {
                    if !matches!(term, RdfTerm::NamedNode(_)) {
                        return Err(self.invalid("constant predicate must be an IRI"));
                    }
                }
            }
            for graph in &pom.graph_maps {
                self.check_resource_position(graph, "graph")?;
            }
            for object in pom.term_object_maps() {
                if object.datatype.is_some() && object.language.is_some() {
                    return Err(self.invalid("object map has both datatype and language"));
                }
                let typed = object.datatype.is_some() || object.language.is_some();
                if typed && matches!(object.term_map.term_type, Some(TermType::Iri | TermType::BlankNode)) {
                    return Err(self.invalid("datatype or language on a non-literal object map"));
                }
            }
            for ref_object in pom.ref_object_maps() {
                if ref_object.parent_triples_map.is_empty() {
                    return Err(self.invalid("referencing object map without parent"));
                }
            }
        }
        Ok(())
    }

    fn check_resource_position(&self, map: &TermMap, position: &str) -> ValidationResult<()> {
        if map.term_type == Some(TermType::Literal) {
            return Err(self.invalid(format!("{} map cannot produce literals", position)));
        }
        if let TermMapKind::Constant(RdfTerm::Literal(_)) = &map.kind {
            return Err(self.invalid(format!("constant {} cannot be a literal", position)));
        }
        Ok(())
    }

    fn invalid(&self, message: impl Into<String>) -> ValidationError {
        ValidationError {
            triples_map: self.id.clone(),
            message: message.into(),
        }
    }
}
