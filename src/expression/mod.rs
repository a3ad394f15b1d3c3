//! Reference expression evaluation
//!
//! Every source format answers the same question: given one record and a
//! reference expression, which values does the expression select? CSV and
//! SQL look up a column, JSON sources run JSONPath, XML sources run XPath.
//!
//! Evaluation is pure. The only state is the per-resolver cache of compiled
//! queries, which never changes a result.

pub mod dom;
pub mod jsonpath;
pub mod xpath;

use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Expression evaluation error
///
/// Raised for malformed expressions or references that cannot exist in the
/// record. A query that legitimately matches nothing is not an error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Failed to evaluate expression '{expression}': {message}")]
pub struct ExpressionError {
    /// The expression as written in the mapping
    pub expression: String,
    /// What went wrong
    pub message: String,
}

impl ExpressionError {
    pub fn new(expression: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            message: message.into(),
        }
    }
}

pub type ExpressionResult<T> = Result<T, ExpressionError>;

/// Values selected by an expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Values {
    /// Exactly one scalar
    Single(String),
    /// An ordered sequence (JSONPath / XPath can select several nodes)
    Many(Vec<String>),
}

impl Values {
    /// Build from a list of matches; `None` when nothing matched
    pub fn from_vec(mut values: Vec<String>) -> Option<Self> {
        match values.len() {
            0 => None,
            1 => values.pop().map(Values::Single),
            _ => Some(Values::Many(values)),
        }
    }

    /// Flatten into a list
    pub fn into_vec(self) -> Vec<String> {
        match self {
            Values::Single(value) => vec![value],
            Values::Many(values) => values,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Values::Single(_) => 1,
            Values::Many(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Per-record expression evaluator
pub trait ExpressionEvaluation: Send + Sync {
    /// Evaluate `expression` against the record this evaluator was built for
    fn evaluate(&self, expression: &str) -> ExpressionResult<Option<Values>>;
}

impl<F> ExpressionEvaluation for F
where
    F: Fn(&str) -> ExpressionResult<Option<Values>> + Send + Sync,
{
    fn evaluate(&self, expression: &str) -> ExpressionResult<Option<Values>> {
        self(expression)
    }
}

/// LRU cache of compiled queries, shared by all evaluators of one resolver
pub struct CompiledCache<T> {
    inner: Mutex<LruCache<String, Arc<T>>>,
}

impl<T> CompiledCache<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Return the compiled form of `expression`, compiling it on a miss
    pub fn get_or_compile<F>(&self, expression: &str, compile: F) -> ExpressionResult<Arc<T>>
    where
        F: FnOnce(&str) -> ExpressionResult<T>,
    {
        if let Ok(mut cache) = self.inner.lock() {
            if let Some(compiled) = cache.get(expression) {
                return Ok(Arc::clone(compiled));
            }
        }

        let compiled = Arc::new(compile(expression)?);
        if let Ok(mut cache) = self.inner.lock() {
            cache.put(expression.to_string(), Arc::clone(&compiled));
        }
        Ok(compiled)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|cache| cache.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
