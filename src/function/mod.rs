//! Function registry
//!
//! Function-valued term maps name a function IRI and bind parameter IRIs to
//! term maps. The registry maps each function IRI to a closure plus the
//! parameter schema used to convert the evaluated parameter values before the
//! call.
//!
//! # Example
//!
//! ```rust
//! use samyama_rml::function::FunctionRegistry;
//! use samyama_rml::rdf::vocab::grel;
//! use std::collections::HashMap;
//!
//! let functions = FunctionRegistry::with_builtins();
//! let mut inputs = HashMap::new();
//! inputs.insert(grel::VALUE_PARAM.to_string(), vec!["alice".to_string()]);
//!
//! let out = functions.invoke(grel::TO_UPPER_CASE, &inputs).unwrap();
//! assert_eq!(out, vec!["ALICE".to_string()]);
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::trace;

use crate::rdf::vocab::grel;

/// Function errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FunctionError {
    #[error("Unknown function: {0}")]
    UnknownFunction(String),

    #[error("Function {function}: missing required parameter {parameter}")]
    MissingParameter { function: String, parameter: String },

    #[error("Function {function}: parameter {parameter} expects {expected}, got '{value}'")]
    Conversion {
        function: String,
        parameter: String,
        expected: ParameterKind,
        value: String,
    },

    #[error("Function {function} failed: {message}")]
    Execution { function: String, message: String },
}

pub type FunctionResult<T> = Result<T, FunctionError>;

/// Declared type of a parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParameterKind {
    String,
    Integer,
    Double,
    Boolean,
    /// Every value the parameter term map produced, in order
    List,
}

impl fmt::Display for ParameterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParameterKind::String => "a string",
            ParameterKind::Integer => "an integer",
            ParameterKind::Double => "a double",
            ParameterKind::Boolean => "a boolean",
            ParameterKind::List => "a list",
        };
        f.write_str(name)
    }
}

/// Parameter schema entry
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParameterSpec {
    pub iri: String,
    pub kind: ParameterKind,
    pub required: bool,
}

impl ParameterSpec {
    pub fn required(iri: impl Into<String>, kind: ParameterKind) -> Self {
        Self {
            iri: iri.into(),
            kind,
            required: true,
        }
    }

    pub fn optional(iri: impl Into<String>, kind: ParameterKind) -> Self {
        Self {
            iri: iri.into(),
            kind,
            required: false,
        }
    }
}

/// A converted argument
#[derive(Debug, Clone, PartialEq)]
pub enum Argument {
    String(String),
    Integer(i64),
    Double(f64),
    Boolean(bool),
    List(Vec<String>),
}

/// Converted arguments of one call, by parameter IRI
#[derive(Debug, Clone, Default)]
pub struct Arguments {
    function: String,
    values: HashMap<String, Argument>,
}

impl Arguments {
    pub fn get(&self, parameter: &str) -> Option<&Argument> {
        self.values.get(parameter)
    }

    pub fn string(&self, parameter: &str) -> Option<&str> {
        match self.values.get(parameter) {
            Some(Argument::String(value)) => Some(value),
            _ => None,
        }
    }

    pub fn integer(&self, parameter: &str) -> Option<i64> {
        match self.values.get(parameter) {
            Some(Argument::Integer(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn double(&self, parameter: &str) -> Option<f64> {
        match self.values.get(parameter) {
            Some(Argument::Double(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn boolean(&self, parameter: &str) -> Option<bool> {
        match self.values.get(parameter) {
            Some(Argument::Boolean(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn list(&self, parameter: &str) -> Option<&[String]> {
        match self.values.get(parameter) {
            Some(Argument::List(values)) => Some(values),
            _ => None,
        }
    }

    /// String argument that must be present
    pub fn required_string(&self, parameter: &str) -> FunctionResult<&str> {
        self.string(parameter)
            .ok_or_else(|| FunctionError::MissingParameter {
                function: self.function.clone(),
                parameter: parameter.to_string(),
            })
    }

    pub fn fail(&self, message: impl Into<String>) -> FunctionError {
        FunctionError::Execution {
            function: self.function.clone(),
            message: message.into(),
        }
    }
}

type Implementation = Arc<dyn Fn(&Arguments) -> FunctionResult<Vec<String>> + Send + Sync>;

/// A registered function
#[derive(Clone)]
pub struct FunctionDefinition {
    pub iri: String,
    pub parameters: Vec<ParameterSpec>,
    implementation: Implementation,
}

impl FunctionDefinition {
    fn convert(&self, inputs: &HashMap<String, Vec<String>>) -> FunctionResult<Arguments> {
        let mut values = HashMap::with_capacity(self.parameters.len());
        for spec in &self.parameters {
            let raw = match inputs.get(&spec.iri) {
                Some(raw) if !raw.is_empty() => raw,
                _ if spec.required => {
                    return Err(FunctionError::MissingParameter {
                        function: self.iri.clone(),
                        parameter: spec.iri.clone(),
                    })
                }
                _ => continue,
            };
            values.insert(spec.iri.clone(), self.convert_one(spec, raw)?);
        }
        Ok(Arguments {
            function: self.iri.clone(),
            values,
        })
    }

    fn convert_one(&self, spec: &ParameterSpec, raw: &[String]) -> FunctionResult<Argument> {
        if spec.kind == ParameterKind::List {
            return Ok(Argument::List(raw.to_vec()));
        }

        let conversion_error = |value: &str| FunctionError::Conversion {
            function: self.iri.clone(),
            parameter: spec.iri.clone(),
            expected: spec.kind,
            value: value.to_string(),
        };
        let value = match raw {
            [value] => value,
            _ => return Err(conversion_error(&raw.join(", "))),
        };

        match spec.kind {
            ParameterKind::String => Ok(Argument::String(value.clone())),
            ParameterKind::Integer => value
                .trim()
                .parse()
                .map(Argument::Integer)
                .map_err(|_| conversion_error(value)),
            ParameterKind::Double => value
                .trim()
                .parse()
                .map(Argument::Double)
                .map_err(|_| conversion_error(value)),
            ParameterKind::Boolean => match value.trim() {
                "true" | "1" => Ok(Argument::Boolean(true)),
                "false" | "0" => Ok(Argument::Boolean(false)),
                _ => Err(conversion_error(value)),
            },
            ParameterKind::List => Ok(Argument::List(raw.to_vec())),
        }
    }
}

impl fmt::Debug for FunctionDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionDefinition")
            .field("iri", &self.iri)
            .field("parameters", &self.parameters)
            .finish()
    }
}

/// Function IRI → definition
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, FunctionDefinition>,
}

impl FunctionRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the GREL string helpers
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        register_builtins(&mut registry);
        registry
    }

    /// Register `implementation` under `iri`, replacing any earlier one
    pub fn register<F>(&mut self, iri: impl Into<String>, parameters: Vec<ParameterSpec>, implementation: F)
    where
        F: Fn(&Arguments) -> FunctionResult<Vec<String>> + Send + Sync + 'static,
    {
        let iri = iri.into();
        self.functions.insert(
            iri.clone(),
            FunctionDefinition {
                iri,
                parameters,
                implementation: Arc::new(implementation),
            },
        );
    }

    pub fn get(&self, iri: &str) -> Option<&FunctionDefinition> {
        self.functions.get(iri)
    }

    pub fn contains(&self, iri: &str) -> bool {
        self.functions.contains_key(iri)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Convert `inputs` (parameter IRI → evaluated values) per the schema and
    /// call the function
    pub fn invoke(
        &self,
        iri: &str,
        inputs: &HashMap<String, Vec<String>>,
    ) -> FunctionResult<Vec<String>> {
        let definition = self
            .functions
            .get(iri)
            .ok_or_else(|| FunctionError::UnknownFunction(iri.to_string()))?;
        let arguments = definition.convert(inputs)?;
        trace!("invoking function {}", iri);
        (definition.implementation)(&arguments)
    }
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.functions.keys().collect();
        names.sort();
        f.debug_struct("FunctionRegistry")
            .field("functions", &names)
            .finish()
    }
}

fn register_builtins(registry: &mut FunctionRegistry) {
    let value = || ParameterSpec::required(grel::VALUE_PARAM, ParameterKind::String);

    registry.register(grel::TO_UPPER_CASE, vec![value()], |args| {
        Ok(vec![args.required_string(grel::VALUE_PARAM)?.to_uppercase()])
    });
    registry.register(grel::TO_LOWER_CASE, vec![value()], |args| {
        Ok(vec![args.required_string(grel::VALUE_PARAM)?.to_lowercase()])
    });
    registry.register(grel::STRING_TRIM, vec![value()], |args| {
        Ok(vec![args.required_string(grel::VALUE_PARAM)?.trim().to_string()])
    });
    registry.register(
        grel::STRING_SPLIT,
        vec![
            value(),
            ParameterSpec::required(grel::SEPARATOR_PARAM, ParameterKind::String),
        ],
        |args| {
            let separator = args.required_string(grel::SEPARATOR_PARAM)?;
            if separator.is_empty() {
                return Err(args.fail("empty separator"));
            }
            Ok(args
                .required_string(grel::VALUE_PARAM)?
                .split(separator)
                .map(str::to_string)
                .collect())
        },
    );
    registry.register(
        grel::ARRAY_JOIN,
        vec![
            ParameterSpec::required(grel::ARRAY_PARAM, ParameterKind::List),
            ParameterSpec::optional(grel::SEPARATOR_PARAM, ParameterKind::String),
        ],
        |args| {
            let separator = args.string(grel::SEPARATOR_PARAM).unwrap_or("");
            let values = args.list(grel::ARRAY_PARAM).unwrap_or(&[]);
            Ok(vec![values.join(separator)])
        },
    );
}
