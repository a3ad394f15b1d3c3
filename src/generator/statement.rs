//! Cartesian-product statement generation

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

use crate::mapping::Target;
use crate::rdf::{NamedNode, Quad, RdfObject, RdfSubject};

/// A generated term value and the targets it is routed to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MappedValue<V> {
    pub value: V,
    pub targets: BTreeSet<Target>,
}

impl<V> MappedValue<V> {
    pub fn new(value: V) -> Self {
        Self {
            value,
            targets: BTreeSet::new(),
        }
    }

    pub fn with_targets(value: V, targets: BTreeSet<Target>) -> Self {
        Self { value, targets }
    }

    pub fn map<U>(self, f: impl FnOnce(V) -> U) -> MappedValue<U> {
        MappedValue {
            value: f(self.value),
            targets: self.targets,
        }
    }
}

/// A generated quad plus the union of its components' targets
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Statement {
    pub quad: Quad,
    pub targets: BTreeSet<Target>,
}

impl Statement {
    pub fn new(quad: Quad) -> Self {
        Self {
            quad,
            targets: BTreeSet::new(),
        }
    }
}

/// Statement generation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StatementError {
    /// Subjects, predicates or objects is empty
    #[error("No {0} values to build statements from")]
    EmptyTermSet(&'static str),
}

pub type StatementResult<T> = Result<T, StatementError>;

/// Build every subject × predicate × object (× graph) combination.
///
/// With no graphs every statement goes to the default graph. Otherwise each
/// graph other than `rr:defaultGraph` is passed through `graph_modifier`
/// before use, and `rr:defaultGraph` stands for the default graph.
pub fn generate<F>(
    subjects: &[MappedValue<RdfSubject>],
    predicates: &[MappedValue<NamedNode>],
    objects: &[MappedValue<RdfObject>],
    graphs: &[MappedValue<RdfSubject>],
    graph_modifier: F,
) -> StatementResult<Vec<Statement>>
where
    F: Fn(RdfSubject) -> RdfSubject,
{
    if subjects.is_empty() {
        return Err(StatementError::EmptyTermSet("subject"));
    }
    if predicates.is_empty() {
        return Err(StatementError::EmptyTermSet("predicate"));
    }
    if objects.is_empty() {
        return Err(StatementError::EmptyTermSet("object"));
    }

    let graphs: Vec<MappedValue<Option<RdfSubject>>> = if graphs.is_empty() {
        vec![MappedValue::new(None)]
    } else {
        graphs
            .iter()
            .map(|graph| {
                graph.clone().map(|value| {
                    if value.is_default_graph() {
                        None
                    } else {
                        Some(graph_modifier(value))
                    }
                })
            })
            .collect()
    };

    let mut statements =
        Vec::with_capacity(subjects.len() * predicates.len() * objects.len() * graphs.len());
    for subject in subjects {
        for predicate in predicates {
            for object in objects {
                for graph in &graphs {
                    let mut targets = subject.targets.clone();
                    targets.extend(predicate.targets.iter().cloned());
                    targets.extend(object.targets.iter().cloned());
                    targets.extend(graph.targets.iter().cloned());
                    statements.push(Statement {
                        quad: Quad::new(
                            subject.value.clone(),
                            predicate.value.clone(),
                            object.value.clone(),
                            graph.value.clone(),
                        ),
                        targets,
                    });
                }
            }
        }
    }
    Ok(statements)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rdf::vocab::rr;
    use crate::rdf::Literal;

    fn iri(s: &str) -> NamedNode {
        NamedNode::new(format!("http://ex.org/{}", s)).unwrap()
    }

    fn subjects(names: &[&str]) -> Vec<MappedValue<RdfSubject>> {
        names.iter().map(|n| MappedValue::new(iri(n).into())).collect()
    }

    fn predicates(names: &[&str]) -> Vec<MappedValue<NamedNode>> {
        names.iter().map(|n| MappedValue::new(iri(n))).collect()
    }

    fn objects(values: &[&str]) -> Vec<MappedValue<RdfObject>> {
        values
            .iter()
            .map(|v| MappedValue::new(Literal::new_simple_literal(*v).into()))
            .collect()
    }

    #[test]
    fn test_single_subject_two_predicates() {
        let statements = generate(
            &subjects(&["s1"]),
            &predicates(&["p1", "p2"]),
            &objects(&["o1"]),
            &[],
            |g| g,
        )
        .unwrap();
        assert_eq!(statements.len(), 2);
        assert!(statements.iter().all(|s| s.quad.in_default_graph()));
    }

    #[test]
    fn test_product_count() {
        fn names(prefix: &str, n: usize) -> Vec<String> {
            (0..n).map(|i| format!("{}{}", prefix, i)).collect()
        }
        fn refs(values: &[String]) -> Vec<&str> {
            values.iter().map(String::as_str).collect()
        }

        for (s, p, o, g) in [(1, 1, 1, 0), (2, 3, 4, 0), (2, 1, 3, 2), (3, 2, 1, 3)] {
            let (s_names, p_names) = (names("s", s), names("p", p));
            let (o_names, g_names) = (names("o", o), names("g", g));

            let statements = generate(
                &subjects(&refs(&s_names)),
                &predicates(&refs(&p_names)),
                &objects(&refs(&o_names)),
                &subjects(&refs(&g_names)),
                |g| g,
            )
            .unwrap();
            assert_eq!(statements.len(), s * p * o * g.max(1));
        }
    }

    #[test]
    fn test_empty_positions_fail() {
        let err = generate(&[], &predicates(&["p"]), &objects(&["o"]), &[], |g| g).unwrap_err();
        assert_eq!(err, StatementError::EmptyTermSet("subject"));
        assert!(generate(&subjects(&["s"]), &[], &objects(&["o"]), &[], |g| g).is_err());
        assert!(generate(&subjects(&["s"]), &predicates(&["p"]), &[], &[], |g| g).is_err());
    }

    #[test]
    fn test_graph_modifier_and_default_graph() {
        let graphs = vec![
            MappedValue::new(RdfSubject::from(iri("g"))),
            MappedValue::new(RdfSubject::from(NamedNode::new(rr::DEFAULT_GRAPH).unwrap())),
        ];
        let statements = generate(
            &subjects(&["s"]),
            &predicates(&["p"]),
            &objects(&["o"]),
            &graphs,
            |g| match g {
                RdfSubject::NamedNode(n) => {
                    RdfSubject::from(NamedNode::new(format!("{}/v2", n.as_str())).unwrap())
                }
                other => other,
            },
        )
        .unwrap();
        assert_eq!(statements.len(), 2);
        assert_eq!(
            statements[0].quad.graph,
            Some(RdfSubject::from(NamedNode::new("http://ex.org/g/v2").unwrap()))
        );
        assert!(statements[1].quad.in_default_graph());
    }

    #[test]
    fn test_targets_are_unioned() {
        let mut subject = subjects(&["s"]);
        subject[0].targets.insert(Target::new("a"));
        let mut object = objects(&["o"]);
        object[0].targets.insert(Target::new("b"));
        let statements = generate(&subject, &predicates(&["p"]), &object, &[], |g| g).unwrap();
        let targets: Vec<_> = statements[0].targets.iter().map(Target::as_str).collect();
        assert_eq!(targets, vec!["a", "b"]);
    }
}
