//! XPath subset compiled with Pest
//!
//! Location paths made of child (`/`) and descendant (`//`) steps over
//! element names, `*`, `@attr`, `text()` and `.`, with positional,
//! existence and equality predicates. Unprefixed name tests match the local
//! name of an element.

use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser;
use std::collections::HashSet;

use super::dom::{name_matches, XmlElement, XmlNode};
use super::{ExpressionError, ExpressionResult, Values};

#[derive(Parser)]
#[grammar = "expression/xpath.pest"]
struct XPathParser;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    Child,
    Descendant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum NodeTest {
    SelfNode,
    Text,
    /// `None` is `@*`
    Attribute(Option<String>),
    /// `None` is `*`
    Element(Option<String>),
}

#[derive(Debug, Clone, PartialEq)]
enum Predicate {
    Position(usize),
    Exists(XPath),
    Compare {
        path: XPath,
        negated: bool,
        literal: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
struct Step {
    axis: Axis,
    test: NodeTest,
    predicates: Vec<Predicate>,
}

/// A compiled XPath expression
#[derive(Debug, Clone, PartialEq)]
pub struct XPath {
    source: String,
    absolute: bool,
    steps: Vec<Step>,
}

/// A node selected by an expression
#[derive(Debug, Clone, Copy)]
pub enum NodeRef<'a> {
    Element(&'a XmlElement),
    Text(&'a str),
    Attribute(&'a str),
}

impl<'a> NodeRef<'a> {
    /// XPath string value
    pub fn string_value(&self) -> String {
        match self {
            NodeRef::Element(element) => element.text_content(),
            NodeRef::Text(text) | NodeRef::Attribute(text) => text.to_string(),
        }
    }

    fn identity(&self) -> (u8, usize) {
        match self {
            NodeRef::Element(element) => (0, *element as *const XmlElement as usize),
            NodeRef::Text(text) => (1, text.as_ptr() as usize),
            NodeRef::Attribute(value) => (2, value.as_ptr() as usize),
        }
    }
}

impl XPath {
    /// Compile an XPath expression
    pub fn compile(expression: &str) -> ExpressionResult<Self> {
        let mut pairs = XPathParser::parse(Rule::path, expression.trim())
            .map_err(|e| ExpressionError::new(expression, e.to_string()))?;
        let path = pairs
            .next()
            .and_then(|pair| pair.into_inner().next())
            .ok_or_else(|| ExpressionError::new(expression, "empty XPath"))?;
        Self::from_location(expression, path)
    }

    fn from_location(expression: &str, pair: Pair<'_, Rule>) -> ExpressionResult<Self> {
        let absolute = matches!(pair.as_rule(), Rule::absolute | Rule::root_only);
        let mut steps = Vec::new();
        let mut axis = Axis::Child;

        for part in pair.into_inner() {
            match part.as_rule() {
                Rule::separator => {
                    axis = match part.into_inner().next().map(|p| p.as_rule()) {
                        Some(Rule::descendant) => Axis::Descendant,
                        _ => Axis::Child,
                    };
                }
                Rule::step => {
                    steps.push(compile_step(expression, axis, part)?);
                    axis = Axis::Child;
                }
                _ => {}
            }
        }

        Ok(Self {
            source: expression.trim().to_string(),
            absolute,
            steps,
        })
    }

    /// The expression as written
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Select nodes starting from `context`.
    ///
    /// Absolute paths start at the document node. A record that is not a
    /// document is treated as the only child of an implicit document.
    pub fn select<'a>(&self, context: &'a XmlElement) -> Vec<NodeRef<'a>> {
        if self.absolute && !context.is_document() {
            return self.select_absolute_in_record(context);
        }
        self.select_from(vec![NodeRef::Element(context)])
    }

    fn select_from<'a>(&self, start: Vec<NodeRef<'a>>) -> Vec<NodeRef<'a>> {
        let mut current = start;
        for step in &self.steps {
            current = apply_step(step, &current);
        }
        current
    }

    fn select_absolute_in_record<'a>(&self, record: &'a XmlElement) -> Vec<NodeRef<'a>> {
        let Some((first, rest)) = self.steps.split_first() else {
            return vec![NodeRef::Element(record)];
        };

        // Candidates for the first step: the record itself, plus its
        // descendants for `//`.
        let mut roots: Vec<&'a XmlElement> = vec![record];
        if first.axis == Axis::Descendant {
            roots = descendants_or_self(record);
        }
        let matched: Vec<NodeRef<'a>> = roots
            .into_iter()
            .filter(|element| element_matches(&first.test, element))
            .map(NodeRef::Element)
            .collect();
        let mut current = filter_predicates(&first.predicates, matched);
        for step in rest {
            current = apply_step(step, &current);
        }
        current
    }

    /// Select and convert matches to their string values
    pub fn evaluate(&self, context: &XmlElement) -> Option<Values> {
        Values::from_vec(
            self.select(context)
                .into_iter()
                .map(|node| node.string_value())
                .collect(),
        )
    }

    /// For purely structural iterators (`/a/b`, `//b`, no predicates, no
    /// wildcards) the element names to match while streaming, with a flag
    /// telling whether the first step is a descendant step.
    pub fn streaming_plan(&self) -> Option<(Vec<String>, bool)> {
        if !self.absolute || self.steps.is_empty() {
            return None;
        }
        let mut names = Vec::with_capacity(self.steps.len());
        for (position, step) in self.steps.iter().enumerate() {
            if !step.predicates.is_empty() || (position > 0 && step.axis == Axis::Descendant) {
                return None;
            }
            match &step.test {
                NodeTest::Element(Some(name)) => names.push(name.clone()),
                _ => return None,
            }
        }
        let descendant = self.steps[0].axis == Axis::Descendant;
        Some((names, descendant))
    }
}

fn compile_step(expression: &str, axis: Axis, pair: Pair<'_, Rule>) -> ExpressionResult<Step> {
    let mut inner = pair.into_inner();
    let test_pair = inner
        .next()
        .ok_or_else(|| ExpressionError::new(expression, "empty step"))?;

    let test = match test_pair.as_rule() {
        Rule::self_node => NodeTest::SelfNode,
        Rule::text_test => NodeTest::Text,
        Rule::attribute => NodeTest::Attribute(name_of(test_pair.into_inner().next())),
        Rule::name_test => NodeTest::Element(name_of(test_pair.into_inner().next())),
        other => {
            return Err(ExpressionError::new(
                expression,
                format!("unexpected XPath step {:?}", other),
            ))
        }
    };

    let mut predicates = Vec::new();
    for predicate in inner {
        predicates.push(compile_predicate(expression, predicate)?);
    }

    Ok(Step {
        axis,
        test,
        predicates,
    })
}

fn name_of(pair: Option<Pair<'_, Rule>>) -> Option<String> {
    pair.filter(|p| p.as_rule() == Rule::qname)
        .map(|p| p.as_str().to_string())
}

fn compile_predicate(expression: &str, pair: Pair<'_, Rule>) -> ExpressionResult<Predicate> {
    let body = pair
        .into_inner()
        .next()
        .ok_or_else(|| ExpressionError::new(expression, "empty predicate"))?;

    match body.as_rule() {
        Rule::position => {
            let position: usize = body
                .as_str()
                .parse()
                .map_err(|e| ExpressionError::new(expression, format!("bad position: {}", e)))?;
            if position == 0 {
                return Err(ExpressionError::new(expression, "positions start at 1"));
            }
            Ok(Predicate::Position(position))
        }
        Rule::existence => {
            let path = body
                .into_inner()
                .next()
                .ok_or_else(|| ExpressionError::new(expression, "empty predicate path"))?;
            Ok(Predicate::Exists(XPath::from_location(expression, path)?))
        }
        Rule::comparison => {
            let mut parts = body.into_inner();
            let (Some(path), Some(op), Some(literal)) = (parts.next(), parts.next(), parts.next())
            else {
                return Err(ExpressionError::new(expression, "incomplete comparison"));
            };
            let literal = literal
                .into_inner()
                .next()
                .map(|p| p.as_str().to_string())
                .unwrap_or_default();
            Ok(Predicate::Compare {
                path: XPath::from_location(expression, path)?,
                negated: op.as_str() == "!=",
                literal,
            })
        }
        other => Err(ExpressionError::new(
            expression,
            format!("unexpected predicate {:?}", other),
        )),
    }
}

/// `element` and its descendant elements in document order
fn descendants_or_self(element: &XmlElement) -> Vec<&XmlElement> {
    let mut out = Vec::new();
    let mut pending = vec![element];
    while let Some(current) = pending.pop() {
        out.push(current);
        let children: Vec<&XmlElement> = current.child_elements().collect();
        pending.extend(children.into_iter().rev());
    }
    out
}

fn element_matches(test: &NodeTest, element: &XmlElement) -> bool {
    match test {
        NodeTest::Element(None) => !element.is_document(),
        NodeTest::Element(Some(name)) => name_matches(name, &element.name),
        _ => false,
    }
}

fn children_for<'a>(test: &NodeTest, element: &'a XmlElement) -> Vec<NodeRef<'a>> {
    match test {
        NodeTest::SelfNode => vec![NodeRef::Element(element)],
        NodeTest::Text => element
            .children
            .iter()
            .filter_map(|child| match child {
                XmlNode::Text(text) => Some(NodeRef::Text(text.as_str())),
                XmlNode::Element(_) => None,
            })
            .collect(),
        NodeTest::Attribute(name) => element
            .attributes
            .iter()
            .filter(|(key, _)| match name {
                None => true,
                Some(name) => name_matches(name, key),
            })
            .map(|(_, value)| NodeRef::Attribute(value.as_str()))
            .collect(),
        NodeTest::Element(_) => element
            .child_elements()
            .filter(|child| element_matches(test, child))
            .map(NodeRef::Element)
            .collect(),
    }
}

fn apply_step<'a>(step: &Step, contexts: &[NodeRef<'a>]) -> Vec<NodeRef<'a>> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    for context in contexts {
        let element = match *context {
            NodeRef::Element(element) => element,
            other => {
                if step.test == NodeTest::SelfNode {
                    out.push(other);
                }
                continue;
            }
        };
        let origins = match step.axis {
            Axis::Child => vec![element],
            Axis::Descendant => descendants_or_self(element),
        };
        for origin in origins {
            let candidates = filter_predicates(&step.predicates, children_for(&step.test, origin));
            for candidate in candidates {
                if seen.insert(candidate.identity()) {
                    out.push(candidate);
                }
            }
        }
    }
    out
}

fn filter_predicates<'a>(predicates: &[Predicate], mut nodes: Vec<NodeRef<'a>>) -> Vec<NodeRef<'a>> {
    for predicate in predicates {
        nodes = match predicate {
            Predicate::Position(position) => nodes.get(position - 1).copied().into_iter().collect(),
            Predicate::Exists(path) => nodes
                .into_iter()
                .filter(|node| !select_relative(path, *node).is_empty())
                .collect(),
            Predicate::Compare {
                path,
                negated,
                literal,
            } => nodes
                .into_iter()
                .filter(|node| {
                    select_relative(path, *node).iter().any(|candidate| {
                        loosely_equal(&candidate.string_value(), literal) != *negated
                    })
                })
                .collect(),
        };
    }
    nodes
}

fn select_relative<'a>(path: &XPath, node: NodeRef<'a>) -> Vec<NodeRef<'a>> {
    match node {
        NodeRef::Element(element) => path.select(element),
        other if path.steps.iter().all(|s| s.test == NodeTest::SelfNode) => vec![other],
        _ => Vec::new(),
    }
}

fn loosely_equal(actual: &str, expected: &str) -> bool {
    if actual == expected {
        return true;
    }
    match (actual.trim().parse::<f64>(), expected.parse::<f64>()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
