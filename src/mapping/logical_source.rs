//! Logical sources: where records come from and how they are iterated

use serde::{Deserialize, Serialize};

/// CSV dialect (csvw:Dialect subset)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct CsvDialect {
    pub delimiter: char,
    pub quote: char,
    /// First row holds column names
    pub header: bool,
    /// Cell values treated as "no value"; the empty cell by default
    pub null_values: Vec<String>,
    /// Trim whitespace around cells
    pub trim: bool,
}

impl Default for CsvDialect {
    fn default() -> Self {
        Self {
            delimiter: ',',
            quote: '"',
            header: true,
            null_values: vec![String::new()],
            trim: false,
        }
    }
}

/// Reference to a source, resolved by a [`SourceResolver`](crate::resolver::SourceResolver)
///
/// Besides the name, a source may carry the explicit dialect markers the
/// resolver matcher looks at.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceRef {
    /// Opaque handle name
    pub name: String,
    /// SQL version / vendor dialect IRI for database sources
    pub sql_version: Option<String>,
    /// Explicit CSV dialect
    pub csv_dialect: Option<CsvDialect>,
}

impl SourceRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql_version: None,
            csv_dialect: None,
        }
    }

    pub fn with_sql_version(mut self, iri: impl Into<String>) -> Self {
        self.sql_version = Some(iri.into());
        self
    }

    pub fn with_csv_dialect(mut self, dialect: CsvDialect) -> Self {
        self.csv_dialect = Some(dialect);
        self
    }
}

/// A logical source
///
/// Immutable once built. TriplesMaps that iterate the same data share one
/// instance through an `Arc`; two TriplesMaps are on the "same logical
/// source" when their logical sources compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogicalSource {
    pub source: SourceRef,
    /// Iterator expression (JSONPath / XPath); CSV and SQL ignore it
    pub iterator: Option<String>,
    /// Reference formulation IRI
    pub reference_formulation: Option<String>,
    /// `rr:tableName`
    pub table_name: Option<String>,
    /// `rr:sqlQuery`
    pub query: Option<String>,
}

impl LogicalSource {
    pub fn new(source: SourceRef) -> Self {
        Self {
            source,
            iterator: None,
            reference_formulation: None,
            table_name: None,
            query: None,
        }
    }

    pub fn with_iterator(mut self, iterator: impl Into<String>) -> Self {
        self.iterator = Some(iterator.into());
        self
    }

    pub fn with_reference_formulation(mut self, iri: impl Into<String>) -> Self {
        self.reference_formulation = Some(iri.into());
        self
    }

    pub fn with_table_name(mut self, table: impl Into<String>) -> Self {
        self.table_name = Some(table.into());
        self
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    /// Whether both sources read the same records
    ///
    /// Logical sources that differ only in the iterator are different sources.
    pub fn same_records_as(&self, other: &LogicalSource) -> bool {
        self == other
    }
}
