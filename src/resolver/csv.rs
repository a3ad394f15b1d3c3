//! CSV resolver
//!
//! Records are rows; a reference names a column. Without a header row the
//! reference is the zero-based column index.

use std::sync::Arc;
use tracing::trace;

use super::matcher::MatchScore;
use super::{LogicalSourceRecord, LogicalSourceResolver, RecordSink, ResolverError, ResolverResult, SourceHandle};
use crate::expression::{ExpressionError, ExpressionEvaluation, ExpressionResult, Values};
use crate::mapping::{CsvDialect, LogicalSource};
use crate::rdf::vocab;

#[derive(Debug)]
struct Columns {
    names: Option<Vec<String>>,
    null_values: Vec<String>,
}

impl Columns {
    fn position(&self, reference: &str) -> Option<usize> {
        match &self.names {
            Some(names) => names
                .iter()
                .position(|name| name == reference)
                .or_else(|| names.iter().position(|name| name.trim() == reference.trim())),
            None => reference.trim().parse().ok(),
        }
    }
}

/// One CSV row
#[derive(Debug, Clone)]
pub struct CsvRecord {
    columns: Arc<Columns>,
    values: ::csv::StringRecord,
}

impl CsvRecord {
    /// Value of a column; `Ok(None)` for null cells
    pub fn get(&self, reference: &str) -> ExpressionResult<Option<&str>> {
        let position = self
            .columns
            .position(reference)
            .ok_or_else(|| ExpressionError::new(reference, "no such column"))?;
        let value = self.values.get(position).ok_or_else(|| {
            ExpressionError::new(
                reference,
                format!(
                    "column {} is out of range for a row of {} fields",
                    position,
                    self.values.len()
                ),
            )
        })?;
        if self.columns.null_values.iter().any(|null| null == value) {
            Ok(None)
        } else {
            Ok(Some(value))
        }
    }
}

/// CSV resolver
#[derive(Debug, Clone, Default)]
pub struct CsvResolver {
    default_dialect: CsvDialect,
}

impl CsvResolver {
    /// Resolver using `dialect` for sources without their own
    pub fn new(default_dialect: CsvDialect) -> Self {
        Self { default_dialect }
    }
}

fn ascii_byte(c: char, what: &str, source: &LogicalSource) -> ResolverResult<u8> {
    if c.is_ascii() {
        Ok(c as u8)
    } else {
        Err(ResolverError::read(source, format!("{} '{}' is not ASCII", what, c)))
    }
}

impl LogicalSourceResolver for CsvResolver {
    type Record = CsvRecord;

    fn name(&self) -> &str {
        "csv"
    }

    fn score(&self, source: &LogicalSource) -> MatchScore {
        let formulation = source.reference_formulation.as_deref();
        MatchScore::builder()
            .strong_if(formulation.is_some_and(vocab::is_csv_formulation))
            .weak_if(formulation.is_none() && source.source.csv_dialect.is_some())
    }

    fn accepts(&self, handle: &SourceHandle) -> bool {
        matches!(handle, SourceHandle::Bytes(_))
    }

    fn produce(
        &self,
        sources: &[Arc<LogicalSource>],
        handle: SourceHandle,
        sink: &mut RecordSink<CsvRecord>,
    ) -> ResolverResult<()> {
        let SourceHandle::Bytes(input) = handle else {
            return Err(ResolverError::UnsupportedSource {
                resolver: self.name().to_string(),
                handle: handle.kind().to_string(),
            });
        };
        let first = &sources[0];
        let dialect = first
            .source
            .csv_dialect
            .as_ref()
            .unwrap_or(&self.default_dialect);

        let mut reader = ::csv::ReaderBuilder::new()
            .delimiter(ascii_byte(dialect.delimiter, "delimiter", first)?)
            .quote(ascii_byte(dialect.quote, "quote", first)?)
            .has_headers(dialect.header)
            .trim(if dialect.trim {
                ::csv::Trim::All
            } else {
                ::csv::Trim::None
            })
            .flexible(true)
            .from_reader(input);

        let names = if dialect.header {
            let headers = reader
                .headers()
                .map_err(|e| ResolverError::read(first, e))?;
            Some(headers.iter().map(str::to_string).collect())
        } else {
            None
        };
        let columns = Arc::new(Columns {
            names,
            null_values: dialect.null_values.clone(),
        });

        let mut row = ::csv::StringRecord::new();
        loop {
            sink.checkpoint()?;
            let more = reader
                .read_record(&mut row)
                .map_err(|e| ResolverError::read(first, e))?;
            if !more {
                break;
            }
            trace!("csv row {:?}", row.position().map(|p| p.line()));
            for source in sources {
                let record = CsvRecord {
                    columns: Arc::clone(&columns),
                    values: row.clone(),
                };
                sink.emit(LogicalSourceRecord::new(Arc::clone(source), record))?;
            }
        }
        Ok(())
    }

    fn expression_evaluation(&self, record: CsvRecord) -> Arc<dyn ExpressionEvaluation> {
        Arc::new(move |expression: &str| -> ExpressionResult<Option<Values>> {
            Ok(record
                .get(expression)?
                .map(|value| Values::Single(value.to_string())))
        })
    }
}
