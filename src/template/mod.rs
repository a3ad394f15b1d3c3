//! Template strings: `text{expression}text...`
//!
//! A template is parsed once, when the mapping is compiled, into an ordered
//! list of literal text and expression segments. Evaluation binds every
//! expression id to the set of values the record produced for it and returns
//! the cartesian product of all substitutions.
//!
//! # Example
//!
//! ```rust
//! use samyama_rml::template::Template;
//! use std::collections::HashMap;
//! use indexmap::IndexSet;
//!
//! let template = Template::parse("http://ex.org/{id}").unwrap();
//! let mut bindings = HashMap::new();
//! bindings.insert(0, IndexSet::from(["1".to_string(), "2".to_string()]));
//!
//! let values = template.evaluate(&bindings);
//! assert!(values.contains("http://ex.org/1"));
//! assert!(values.contains("http://ex.org/2"));
//! ```

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Identifier of an expression segment, assigned left to right from 0
pub type ExprId = usize;

/// Template errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    /// Input ended inside `{...}`
    #[error("Unclosed expression in template '{template}'")]
    UnclosedExpression { template: String },

    /// `{` found inside `{...}`
    #[error("Nested expression at position {position} in template '{template}'")]
    NestedExpression { template: String, position: usize },

    /// `\` followed by something other than `{`, `}` or `\`
    #[error("Invalid escape at position {position} in template '{template}'")]
    InvalidEscape { template: String, position: usize },
}

pub type TemplateResult<T> = Result<T, TemplateError>;

/// One piece of a parsed template
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Segment {
    /// Literal text, with escapes already resolved
    Text(String),
    /// Reference expression to substitute
    Expression { id: ExprId, raw: String },
}

/// A parsed template
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Template {
    segments: Vec<Segment>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum State {
    Text,
    Expression,
}

impl Template {
    /// Parse a template string
    pub fn parse(raw: &str) -> TemplateResult<Self> {
        let mut segments = Vec::new();
        let mut state = State::Text;
        let mut escaping = false;
        let mut current = String::new();
        let mut next_id: ExprId = 0;

        for (position, c) in raw.chars().enumerate() {
            if escaping {
                match c {
                    '{' | '}' | '\\' => current.push(c),
                    _ => {
                        return Err(TemplateError::InvalidEscape {
                            template: raw.to_string(),
                            position,
                        })
                    }
                }
                escaping = false;
                continue;
            }

            match (c, state) {
                ('\\', _) => escaping = true,
                ('{', State::Text) => {
                    if !current.is_empty() {
                        segments.push(Segment::Text(std::mem::take(&mut current)));
                    }
                    state = State::Expression;
                }
                ('{', State::Expression) => {
                    return Err(TemplateError::NestedExpression {
                        template: raw.to_string(),
                        position,
                    })
                }
                ('}', State::Expression) => {
                    if !current.is_empty() {
                        segments.push(Segment::Expression {
                            id: next_id,
                            raw: std::mem::take(&mut current),
                        });
                        next_id += 1;
                    }
                    state = State::Text;
                }
                _ => current.push(c),
            }
        }

        if escaping {
            return Err(TemplateError::InvalidEscape {
                template: raw.to_string(),
                position: raw.chars().count(),
            });
        }
        if state == State::Expression {
            return Err(TemplateError::UnclosedExpression {
                template: raw.to_string(),
            });
        }
        if !current.is_empty() {
            segments.push(Segment::Text(current));
        }

        Ok(Self { segments })
    }

    /// The parsed segments, in template order
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Expression segments as `(id, raw expression)` pairs
    pub fn expressions(&self) -> impl Iterator<Item = (ExprId, &str)> {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Expression { id, raw } => Some((*id, raw.as_str())),
            Segment::Text(_) => None,
        })
    }

    /// Substitute every expression with each of its bound values.
    ///
    /// Returns the cartesian product over all bindings. If any expression has
    /// no binding, or an empty one, the result is empty.
    pub fn evaluate(&self, bindings: &HashMap<ExprId, IndexSet<String>>) -> IndexSet<String> {
        let mut results = vec![String::new()];

        for segment in &self.segments {
            match segment {
                Segment::Text(text) => {
                    for result in results.iter_mut() {
                        result.push_str(text);
                    }
                }
                Segment::Expression { id, .. } => {
                    let values = match bindings.get(id) {
                        Some(values) if !values.is_empty() => values,
                        _ => return IndexSet::new(),
                    };
                    results = results
                        .iter()
                        .flat_map(|prefix| {
                            values.iter().map(move |value| {
                                let mut next = String::with_capacity(prefix.len() + value.len());
                                next.push_str(prefix);
                                next.push_str(value);
                                next
                            })
                        })
                        .collect();
                }
            }
        }

        results.into_iter().collect()
    }

    /// Serialize back to template syntax, escaping `{`, `}` and `\`
    pub fn to_template_string(&self) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => escape_into(text, &mut out),
                Segment::Expression { raw, .. } => {
                    out.push('{');
                    escape_into(raw, &mut out);
                    out.push('}');
                }
            }
        }
        out
    }
}

fn escape_into(text: &str, out: &mut String) {
    for c in text.chars() {
        if matches!(c, '{' | '}' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_template_string())
    }
}
