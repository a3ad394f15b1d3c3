//! Vocabulary constants used by the mapping engine
//!
//! Namespaces of the RML/R2RML family plus the handful of RDF and XSD terms
//! the generator emits.

/// RDF namespace
pub mod rdf {
    pub const NS: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#";
    pub const TYPE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";
    pub const LANG_STRING: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#langString";
}

/// XML Schema datatypes
pub mod xsd {
    pub const NS: &str = "http://www.w3.org/2001/XMLSchema#";
    pub const STRING: &str = "http://www.w3.org/2001/XMLSchema#string";
    pub const INTEGER: &str = "http://www.w3.org/2001/XMLSchema#integer";
    pub const DOUBLE: &str = "http://www.w3.org/2001/XMLSchema#double";
    pub const BOOLEAN: &str = "http://www.w3.org/2001/XMLSchema#boolean";
}

/// R2RML vocabulary
pub mod rr {
    pub const NS: &str = "http://www.w3.org/ns/r2rml#";
    pub const IRI: &str = "http://www.w3.org/ns/r2rml#IRI";
    pub const BLANK_NODE: &str = "http://www.w3.org/ns/r2rml#BlankNode";
    pub const LITERAL: &str = "http://www.w3.org/ns/r2rml#Literal";
    pub const DEFAULT_GRAPH: &str = "http://www.w3.org/ns/r2rml#defaultGraph";
    /// Generic SQL marker; vendor-neutral, so only a weak resolver signal
    pub const SQL2008: &str = "http://www.w3.org/ns/r2rml#SQL2008";
}

/// RML vocabulary (core and legacy `ql:` formulations)
pub mod rml {
    pub const NS: &str = "http://w3id.org/rml/";
    pub const CSV: &str = "http://w3id.org/rml/CSV";
    pub const JSON_PATH: &str = "http://w3id.org/rml/JSONPath";
    pub const XPATH: &str = "http://w3id.org/rml/XPath";
    pub const SQL2008_TABLE: &str = "http://w3id.org/rml/SQL2008Table";
    pub const SQL2008_QUERY: &str = "http://w3id.org/rml/SQL2008Query";
}

/// Legacy query-language namespace used by RML 1.0 mappings
pub mod ql {
    pub const NS: &str = "http://semweb.mmlab.be/ns/ql#";
    pub const CSV: &str = "http://semweb.mmlab.be/ns/ql#CSV";
    pub const JSON_PATH: &str = "http://semweb.mmlab.be/ns/ql#JSONPath";
    pub const XPATH: &str = "http://semweb.mmlab.be/ns/ql#XPath";
}

/// Vendor dialect markers carried on database sources
pub mod sql_dialect {
    pub const SQLITE: &str = "http://w3id.org/rml/sql/SQLite";
    pub const MYSQL: &str = "http://w3id.org/rml/sql/MySQL";
    pub const POSTGRESQL: &str = "http://w3id.org/rml/sql/PostgreSQL";
}

/// GREL function namespace used by the built-in function registry
pub mod grel {
    pub const NS: &str = "http://users.ugent.be/~bjdmeest/function/grel.ttl#";
    pub const TO_UPPER_CASE: &str = "http://users.ugent.be/~bjdmeest/function/grel.ttl#toUpperCase";
    pub const TO_LOWER_CASE: &str = "http://users.ugent.be/~bjdmeest/function/grel.ttl#toLowerCase";
    pub const STRING_TRIM: &str = "http://users.ugent.be/~bjdmeest/function/grel.ttl#string_trim";
    pub const STRING_SPLIT: &str = "http://users.ugent.be/~bjdmeest/function/grel.ttl#string_split";
    pub const ARRAY_JOIN: &str = "http://users.ugent.be/~bjdmeest/function/grel.ttl#array_join";
    pub const VALUE_PARAM: &str = "http://users.ugent.be/~bjdmeest/function/grel.ttl#valueParameter";
    pub const SEPARATOR_PARAM: &str = "http://users.ugent.be/~bjdmeest/function/grel.ttl#p_string_sep";
    pub const ARRAY_PARAM: &str = "http://users.ugent.be/~bjdmeest/function/grel.ttl#p_array_a";
}

/// Whether `iri` names a CSV reference formulation
pub fn is_csv_formulation(iri: &str) -> bool {
    iri == rml::CSV || iri == ql::CSV
}

/// Whether `iri` names a JSONPath reference formulation
pub fn is_json_path_formulation(iri: &str) -> bool {
    iri == rml::JSON_PATH || iri == ql::JSON_PATH
}

/// Whether `iri` names an XPath reference formulation
pub fn is_xpath_formulation(iri: &str) -> bool {
    iri == rml::XPATH || iri == ql::XPATH
}

/// Whether `iri` is one of the vendor-neutral SQL markers
pub fn is_generic_sql(iri: &str) -> bool {
    iri == rr::SQL2008 || iri == rml::SQL2008_TABLE || iri == rml::SQL2008_QUERY
}
