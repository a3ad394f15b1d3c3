//! SQL resolver
//!
//! The handle is a [`DatabaseConnection`]. A logical source either carries
//! its own query or names a table, read with `SELECT *`. Records are rows;
//! a reference names a column, case-sensitively first and then ignoring
//! case. SQL NULL is "no value".
//!
//! One resolver is registered per dialect. The dialect only changes how a
//! table name is quoted; the connection itself comes from the source
//! resolver.

use rusqlite::types::ValueRef;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, trace};

use super::matcher::MatchScore;
use super::{
    LogicalSourceRecord, LogicalSourceResolver, RecordSink, ResolverError, ResolverResult,
    SourceHandle,
};
use crate::expression::{ExpressionError, ExpressionEvaluation, ExpressionResult, Values};
use crate::mapping::LogicalSource;
use crate::rdf::vocab::{self, sql_dialect};

/// SQL vendor dialect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlDialect {
    Sqlite,
    MySql,
    PostgreSql,
}

impl SqlDialect {
    /// Marker IRI carried by sources of this dialect
    pub fn marker(&self) -> &'static str {
        match self {
            SqlDialect::Sqlite => sql_dialect::SQLITE,
            SqlDialect::MySql => sql_dialect::MYSQL,
            SqlDialect::PostgreSql => sql_dialect::POSTGRESQL,
        }
    }

    pub fn resolver_name(&self) -> &'static str {
        match self {
            SqlDialect::Sqlite => "sql-sqlite",
            SqlDialect::MySql => "sql-mysql",
            SqlDialect::PostgreSql => "sql-postgresql",
        }
    }

    /// Quote an identifier unless it is already quoted
    pub fn quote_identifier(&self, identifier: &str) -> String {
        let quote = match self {
            SqlDialect::MySql => '`',
            SqlDialect::Sqlite | SqlDialect::PostgreSql => '"',
        };
        let trimmed = identifier.trim();
        if trimmed.len() >= 2 && trimmed.starts_with(quote) && trimmed.ends_with(quote) {
            return trimmed.to_string();
        }
        let escaped = trimmed.replace(quote, &format!("{}{}", quote, quote));
        format!("{}{}{}", quote, escaped, quote)
    }
}

/// One result row
#[derive(Debug, Clone)]
pub struct SqlRow {
    columns: Arc<Vec<String>>,
    values: Vec<Option<String>>,
}

impl SqlRow {
    pub fn new(columns: Arc<Vec<String>>, values: Vec<Option<String>>) -> Self {
        Self { columns, values }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Column value; `Ok(None)` for NULL
    pub fn get(&self, column: &str) -> ExpressionResult<Option<&str>> {
        let position = self
            .columns
            .iter()
            .position(|name| name == column)
            .or_else(|| {
                self.columns
                    .iter()
                    .position(|name| name.eq_ignore_ascii_case(column))
            })
            .ok_or_else(|| ExpressionError::new(column, "no such column in result set"))?;
        Ok(self.values.get(position).and_then(|v| v.as_deref()))
    }
}

/// A database connection able to run a query row by row
pub trait DatabaseConnection: Send {
    /// Run `query`, handing each row to `emit`; stop at the first error
    /// `emit` returns
    fn for_each_row(
        &mut self,
        query: &str,
        emit: &mut dyn FnMut(SqlRow) -> ResolverResult<()>,
    ) -> ResolverResult<()>;
}

/// SQLite connection via rusqlite
pub struct SqliteConnection {
    connection: rusqlite::Connection,
}

impl SqliteConnection {
    pub fn open(path: impl AsRef<Path>) -> ResolverResult<Self> {
        let path = path.as_ref();
        let connection = rusqlite::Connection::open(path).map_err(|e| ResolverError::Read {
            source_name: path.display().to_string(),
            message: e.to_string(),
        })?;
        Ok(Self { connection })
    }

    pub fn open_in_memory() -> ResolverResult<Self> {
        let connection =
            rusqlite::Connection::open_in_memory().map_err(|e| ResolverError::Read {
                source_name: ":memory:".to_string(),
                message: e.to_string(),
            })?;
        Ok(Self { connection })
    }

    pub fn from_connection(connection: rusqlite::Connection) -> Self {
        Self { connection }
    }

    /// Run statements that return no rows (schema setup, inserts)
    pub fn execute_batch(&self, sql: &str) -> ResolverResult<()> {
        self.connection
            .execute_batch(sql)
            .map_err(|e| query_error(sql, e))
    }
}

impl fmt::Debug for SqliteConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteConnection").finish_non_exhaustive()
    }
}

fn query_error(query: &str, error: impl fmt::Display) -> ResolverError {
    ResolverError::Read {
        source_name: query.to_string(),
        message: error.to_string(),
    }
}

fn render_value(value: ValueRef<'_>) -> Option<String> {
    match value {
        ValueRef::Null => None,
        ValueRef::Integer(i) => Some(i.to_string()),
        ValueRef::Real(f) => Some(f.to_string()),
        ValueRef::Text(text) => Some(String::from_utf8_lossy(text).into_owned()),
        ValueRef::Blob(bytes) => Some(bytes.iter().map(|b| format!("{:02X}", b)).collect()),
    }
}

impl DatabaseConnection for SqliteConnection {
    fn for_each_row(
        &mut self,
        query: &str,
        emit: &mut dyn FnMut(SqlRow) -> ResolverResult<()>,
    ) -> ResolverResult<()> {
        let mut statement = self
            .connection
            .prepare(query)
            .map_err(|e| query_error(query, e))?;
        let columns: Arc<Vec<String>> = Arc::new(
            statement
                .column_names()
                .into_iter()
                .map(str::to_string)
                .collect(),
        );
        let width = columns.len();

        let mut rows = statement.query([]).map_err(|e| query_error(query, e))?;
        while let Some(row) = rows.next().map_err(|e| query_error(query, e))? {
            let mut values = Vec::with_capacity(width);
            for index in 0..width {
                let value = row.get_ref(index).map_err(|e| query_error(query, e))?;
                values.push(render_value(value));
            }
            emit(SqlRow::new(Arc::clone(&columns), values))?;
        }
        Ok(())
    }
}

/// SQL resolver for one dialect
#[derive(Debug, Clone)]
pub struct SqlResolver {
    dialect: SqlDialect,
}

impl SqlResolver {
    pub fn new(dialect: SqlDialect) -> Self {
        Self { dialect }
    }

    pub fn dialect(&self) -> SqlDialect {
        self.dialect
    }

    /// The query a logical source reads
    pub fn query_for(&self, source: &LogicalSource) -> ResolverResult<String> {
        if let Some(query) = &source.query {
            return Ok(query.clone());
        }
        match &source.table_name {
            Some(table) => Ok(format!("SELECT * FROM {}", self.dialect.quote_identifier(table))),
            None => Err(ResolverError::read(source, "no table name or query")),
        }
    }
}

impl LogicalSourceResolver for SqlResolver {
    type Record = SqlRow;

    fn name(&self) -> &str {
        self.dialect.resolver_name()
    }

    fn score(&self, source: &LogicalSource) -> MatchScore {
        let marker = source.source.sql_version.as_deref();
        let formulation = source.reference_formulation.as_deref();
        MatchScore::builder()
            .strong_if(marker == Some(self.dialect.marker()))
            .weak_if(marker.is_some_and(vocab::is_generic_sql) || formulation.is_some_and(vocab::is_generic_sql))
    }

    fn accepts(&self, handle: &SourceHandle) -> bool {
        matches!(handle, SourceHandle::Database(_))
    }

    fn produce(
        &self,
        sources: &[Arc<LogicalSource>],
        handle: SourceHandle,
        sink: &mut RecordSink<SqlRow>,
    ) -> ResolverResult<()> {
        let SourceHandle::Database(mut connection) = handle else {
            return Err(ResolverError::UnsupportedSource {
                resolver: self.name().to_string(),
                handle: handle.kind().to_string(),
            });
        };

        for source in sources {
            let query = self.query_for(source)?;
            debug!("Running query for '{}': {}", source.source.name, query);
            connection.for_each_row(&query, &mut |row| {
                trace!("sql row from '{}'", source.source.name);
                sink.emit(LogicalSourceRecord::new(Arc::clone(source), row))
            })?;
        }
        Ok(())
    }

    fn expression_evaluation(&self, record: SqlRow) -> Arc<dyn ExpressionEvaluation> {
        Arc::new(move |expression: &str| -> ExpressionResult<Option<Values>> {
            Ok(record
                .get(expression)?
                .map(|value| Values::Single(value.to_string())))
        })
    }
}
