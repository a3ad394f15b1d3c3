//! JSONPath subset compiled with Pest
//!
//! Supports root (`$`, `@` or an implicit root for relative references),
//! member access, wildcards, recursive descent, index unions, slices and
//! simple `?(@.a.b == literal)` filters.

use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser;
use serde_json::Value;

use super::{ExpressionError, ExpressionResult, Values};

#[derive(Parser)]
#[grammar = "expression/jsonpath.pest"]
struct JsonPathParser;

#[derive(Debug, Clone, PartialEq)]
enum UnionItem {
    Index(i64),
    Slice(Option<i64>, Option<i64>),
    Name(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmpOp {
    Eq,
    Ne,
}

#[derive(Debug, Clone, PartialEq)]
enum Selector {
    Name(String),
    Wildcard,
    Union(Vec<UnionItem>),
    Filter {
        path: Vec<String>,
        condition: Option<(CmpOp, Value)>,
    },
}

#[derive(Debug, Clone, PartialEq)]
struct Step {
    recursive: bool,
    selector: Selector,
}

/// A compiled JSONPath expression
#[derive(Debug, Clone, PartialEq)]
pub struct JsonPath {
    source: String,
    steps: Vec<Step>,
}

impl JsonPath {
    /// Compile a JSONPath expression
    pub fn compile(expression: &str) -> ExpressionResult<Self> {
        let mut pairs = JsonPathParser::parse(Rule::path, expression.trim())
            .map_err(|e| ExpressionError::new(expression, e.to_string()))?;
        let path = pairs
            .next()
            .ok_or_else(|| ExpressionError::new(expression, "empty JSONPath"))?;

        let mut steps = Vec::new();
        for pair in path.into_inner() {
            match pair.as_rule() {
                Rule::root | Rule::EOI => {}
                Rule::name => steps.push(Step {
                    recursive: false,
                    selector: Selector::Name(pair.as_str().to_string()),
                }),
                Rule::child => steps.push(Step {
                    recursive: false,
                    selector: compile_selector(expression, inner_one(expression, pair)?)?,
                }),
                Rule::recursive => steps.push(Step {
                    recursive: true,
                    selector: compile_selector(expression, inner_one(expression, pair)?)?,
                }),
                other => {
                    return Err(ExpressionError::new(
                        expression,
                        format!("unexpected JSONPath element {:?}", other),
                    ))
                }
            }
        }

        Ok(Self {
            source: expression.to_string(),
            steps,
        })
    }

    /// The expression as written
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Select matching nodes under `root`, in document order
    pub fn select<'a>(&self, root: &'a Value) -> Vec<&'a Value> {
        let mut current = vec![root];
        for step in &self.steps {
            let candidates: Vec<&'a Value> = if step.recursive {
                current.into_iter().flat_map(descendants_or_self).collect()
            } else {
                current
            };
            current = candidates
                .into_iter()
                .flat_map(|node| apply_selector(&step.selector, node))
                .collect();
        }
        current
    }

    /// Select and convert the matches to scalar strings.
    ///
    /// Arrays contribute their elements, nulls contribute nothing, objects
    /// are rendered as compact JSON.
    pub fn evaluate(&self, root: &Value) -> Option<Values> {
        let mut values = Vec::new();
        for node in self.select(root) {
            push_scalar(node, &mut values);
        }
        Values::from_vec(values)
    }

    /// For iterators of the shape `$`, `$.a.b` or `$.a.b[*]`, the member path
    /// to descend and whether the final array is iterated.
    ///
    /// Such iterators can be evaluated while the document is still being read.
    pub fn streaming_plan(&self) -> Option<(Vec<String>, bool)> {
        let mut keys = Vec::new();
        let mut iterate = false;
        for (position, step) in self.steps.iter().enumerate() {
            if step.recursive {
                return None;
            }
            match &step.selector {
                Selector::Name(name) if !iterate => keys.push(name.clone()),
                Selector::Wildcard if position + 1 == self.steps.len() => iterate = true,
                _ => return None,
            }
        }
        Some((keys, iterate))
    }
}

fn inner_one<'i>(expression: &str, pair: Pair<'i, Rule>) -> ExpressionResult<Pair<'i, Rule>> {
    pair.into_inner()
        .next()
        .ok_or_else(|| ExpressionError::new(expression, "incomplete JSONPath step"))
}

fn compile_selector(expression: &str, pair: Pair<'_, Rule>) -> ExpressionResult<Selector> {
    match pair.as_rule() {
        Rule::wildcard => Ok(Selector::Wildcard),
        Rule::name => Ok(Selector::Name(pair.as_str().to_string())),
        Rule::union => {
            let mut items = Vec::new();
            for item in pair.into_inner() {
                items.push(match item.as_rule() {
                    Rule::index => UnionItem::Index(parse_int(expression, item.as_str())?),
                    Rule::slice => {
                        let text = item.as_str();
                        let (start, end) = text.split_once(':').unwrap_or((text, ""));
                        UnionItem::Slice(
                            parse_optional_int(expression, start)?,
                            parse_optional_int(expression, end)?,
                        )
                    }
                    Rule::quoted => UnionItem::Name(quoted_text(item)),
                    other => {
                        return Err(ExpressionError::new(
                            expression,
                            format!("unexpected union element {:?}", other),
                        ))
                    }
                });
            }
            Ok(Selector::Union(items))
        }
        Rule::filter => {
            let mut path = Vec::new();
            let mut op = None;
            let mut literal = None;
            for part in pair.into_inner() {
                match part.as_rule() {
                    Rule::filter_path => {
                        path = part.into_inner().map(|p| p.as_str().to_string()).collect();
                    }
                    Rule::cmp_op => {
                        op = Some(if part.as_str() == "==" { CmpOp::Eq } else { CmpOp::Ne });
                    }
                    Rule::literal => literal = Some(literal_value(expression, part)?),
                    _ => {}
                }
            }
            let condition = match (op, literal) {
                (Some(op), Some(value)) => Some((op, value)),
                _ => None,
            };
            Ok(Selector::Filter { path, condition })
        }
        other => Err(ExpressionError::new(
            expression,
            format!("unexpected JSONPath selector {:?}", other),
        )),
    }
}

fn literal_value(expression: &str, pair: Pair<'_, Rule>) -> ExpressionResult<Value> {
    let inner = inner_one(expression, pair)?;
    Ok(match inner.as_rule() {
        Rule::quoted => Value::String(quoted_text(inner)),
        Rule::number => serde_json::from_str(inner.as_str())
            .map_err(|e| ExpressionError::new(expression, e.to_string()))?,
        Rule::boolean => Value::Bool(inner.as_str() == "true"),
        _ => Value::Null,
    })
}

fn quoted_text(pair: Pair<'_, Rule>) -> String {
    pair.into_inner()
        .next()
        .map(|inner| inner.as_str().to_string())
        .unwrap_or_default()
}

fn parse_int(expression: &str, text: &str) -> ExpressionResult<i64> {
    text.parse::<i64>()
        .map_err(|e| ExpressionError::new(expression, format!("invalid index '{}': {}", text, e)))
}

fn parse_optional_int(expression: &str, text: &str) -> ExpressionResult<Option<i64>> {
    if text.is_empty() {
        Ok(None)
    } else {
        parse_int(expression, text).map(Some)
    }
}

fn descendants_or_self(node: &Value) -> Vec<&Value> {
    let mut out = vec![node];
    let mut index = 0;
    while index < out.len() {
        let current = out[index];
        match current {
            Value::Array(items) => out.extend(items.iter()),
            Value::Object(map) => out.extend(map.values()),
            _ => {}
        }
        index += 1;
    }
    out
}

fn resolve_index(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let resolved = if index < 0 { len + index } else { index };
    (0..len).contains(&resolved).then_some(resolved as usize)
}

fn apply_selector<'a>(selector: &Selector, node: &'a Value) -> Vec<&'a Value> {
    match selector {
        Selector::Name(name) => node.get(name.as_str()).into_iter().collect(),
        Selector::Wildcard => match node {
            Value::Array(items) => items.iter().collect(),
            Value::Object(map) => map.values().collect(),
            _ => Vec::new(),
        },
        Selector::Union(items) => {
            let mut out = Vec::new();
            for item in items {
                match (item, node) {
                    (UnionItem::Index(i), Value::Array(array)) => {
                        if let Some(position) = resolve_index(*i, array.len()) {
                            out.push(&array[position]);
                        }
                    }
                    (UnionItem::Slice(start, end), Value::Array(array)) => {
                        let len = array.len() as i64;
                        let clamp = |v: i64| if v < 0 { (len + v).max(0) } else { v.min(len) };
                        let from = start.map(clamp).unwrap_or(0);
                        let to = end.map(clamp).unwrap_or(len);
                        if from < to {
                            out.extend(array[from as usize..to as usize].iter());
                        }
                    }
                    (UnionItem::Name(name), Value::Object(map)) => {
                        if let Some(value) = map.get(name) {
                            out.push(value);
                        }
                    }
                    _ => {}
                }
            }
            out
        }
        Selector::Filter { path, condition } => {
            let children: Vec<&Value> = match node {
                Value::Array(items) => items.iter().collect(),
                Value::Object(map) => map.values().collect(),
                _ => Vec::new(),
            };
            children
                .into_iter()
                .filter(|child| {
                    let target = path
                        .iter()
                        .try_fold(*child, |current, key| current.get(key.as_str()));
                    match (target, condition) {
                        (None, _) => false,
                        (Some(_), None) => true,
                        (Some(value), Some((CmpOp::Eq, expected))) => loosely_equal(value, expected),
                        (Some(value), Some((CmpOp::Ne, expected))) => !loosely_equal(value, expected),
                    }
                })
                .collect()
        }
    }
}

fn loosely_equal(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => actual == expected,
    }
}

fn push_scalar(node: &Value, out: &mut Vec<String>) {
    match node {
        Value::Null => {}
        Value::String(s) => out.push(s.clone()),
        Value::Number(n) => out.push(n.to_string()),
        Value::Bool(b) => out.push(b.to_string()),
        Value::Array(items) => {
            for item in items {
                match item {
                    Value::Array(_) | Value::Object(_) => out.push(item.to_string()),
                    other => push_scalar(other, out),
                }
            }
        }
        Value::Object(_) => out.push(node.to_string()),
    }
}
