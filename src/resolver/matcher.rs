//! Resolver selection
//!
//! Each resolver scores a logical source: +2 for a strong signal (its
//! reference formulation, or a dialect marker it declares), +1 for a weak one
//! (a vendor-neutral marker). The highest total wins. Registration order
//! breaks ties, so the first registered resolver is chosen among equals.

use std::fmt;
use std::sync::Arc;
use tracing::debug;

use super::{AnyResolver, ResolverError, ResolverResult};
use crate::config::ResolverSelection;
use crate::mapping::LogicalSource;

/// Match score of a resolver against a logical source
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MatchScore(pub u32);

impl MatchScore {
    pub const NONE: MatchScore = MatchScore(0);
    pub const WEAK: u32 = 1;
    pub const STRONG: u32 = 2;

    /// Start from zero and add signals
    pub fn builder() -> MatchScore {
        MatchScore::NONE
    }

    pub fn strong_if(self, signal: bool) -> MatchScore {
        if signal {
            MatchScore(self.0 + Self::STRONG)
        } else {
            self
        }
    }

    pub fn weak_if(self, signal: bool) -> MatchScore {
        if signal {
            MatchScore(self.0 + Self::WEAK)
        } else {
            self
        }
    }

    pub fn is_match(&self) -> bool {
        self.0 > 0
    }
}

impl fmt::Display for MatchScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Ordered list of available resolvers
#[derive(Clone, Default)]
pub struct ResolverRegistry {
    resolvers: Vec<Arc<dyn AnyResolver>>,
}

impl ResolverRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a resolver; earlier registrations win ties
    pub fn register(&mut self, resolver: Arc<dyn AnyResolver>) {
        self.resolvers.push(resolver);
    }

    pub fn with(mut self, resolver: Arc<dyn AnyResolver>) -> Self {
        self.register(resolver);
        self
    }

    pub fn names(&self) -> Vec<&str> {
        self.resolvers.iter().map(|r| r.resolver_name()).collect()
    }

    pub fn len(&self) -> usize {
        self.resolvers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolvers.is_empty()
    }

    /// Keep only the resolvers the selection allows, preserving order
    pub fn filtered(&self, selection: &ResolverSelection) -> Self {
        Self {
            resolvers: self
                .resolvers
                .iter()
                .filter(|r| selection.allows(r.resolver_name()))
                .cloned()
                .collect(),
        }
    }

    /// Pick the best resolver for `source`
    pub fn select(&self, source: &LogicalSource) -> ResolverResult<Arc<dyn AnyResolver>> {
        let mut best: Option<(MatchScore, &Arc<dyn AnyResolver>)> = None;
        for resolver in &self.resolvers {
            let score = resolver.score_source(source);
            if !score.is_match() {
                continue;
            }
            if best.map_or(true, |(top, _)| score > top) {
                best = Some((score, resolver));
            }
        }

        match best {
            Some((score, resolver)) => {
                debug!(
                    "Selected resolver '{}' (score {}) for source '{}'",
                    resolver.resolver_name(),
                    score,
                    source.source.name
                );
                Ok(Arc::clone(resolver))
            }
            None => Err(ResolverError::NoMatchingResolver(source.source.name.clone())),
        }
    }
}

impl fmt::Debug for ResolverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolverRegistry")
            .field("resolvers", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::SourceRef;
    use crate::rdf::vocab::{ql, rr, sql_dialect};
    use crate::resolver::sql::{SqlDialect, SqlResolver};
    use crate::resolver::{csv::CsvResolver, json::JsonResolver, xml::XmlResolver};

    fn registry() -> ResolverRegistry {
        ResolverRegistry::new()
            .with(Arc::new(CsvResolver::default()))
            .with(Arc::new(JsonResolver::default()))
            .with(Arc::new(XmlResolver::default()))
            .with(Arc::new(SqlResolver::new(SqlDialect::Sqlite)))
            .with(Arc::new(SqlResolver::new(SqlDialect::MySql)))
    }

    #[test]
    fn test_strong_formulation_match() {
        let source = LogicalSource::new(SourceRef::new("a.json"))
            .with_reference_formulation(ql::JSON_PATH);
        assert_eq!(registry().select(&source).unwrap().resolver_name(), "json");
    }

    #[test]
    fn test_vendor_marker_beats_generic() {
        let source = LogicalSource::new(SourceRef::new("db").with_sql_version(sql_dialect::MYSQL))
            .with_reference_formulation(rr::SQL2008);
        assert_eq!(registry().select(&source).unwrap().resolver_name(), "sql-mysql");
    }

    #[test]
    fn test_tie_goes_to_first_registered() {
        let source = LogicalSource::new(SourceRef::new("db")).with_reference_formulation(rr::SQL2008);
        let registry = registry();
        for _ in 0..10 {
            assert_eq!(registry.select(&source).unwrap().resolver_name(), "sql-sqlite");
        }

        let reordered = ResolverRegistry::new()
            .with(Arc::new(SqlResolver::new(SqlDialect::MySql)))
            .with(Arc::new(SqlResolver::new(SqlDialect::Sqlite)));
        assert_eq!(reordered.select(&source).unwrap().resolver_name(), "sql-mysql");
    }

    #[test]
    fn test_no_match() {
        let source = LogicalSource::new(SourceRef::new("x"))
            .with_reference_formulation("http://example.org/UnknownFormulation");
        assert!(matches!(
            registry().select(&source),
            Err(ResolverError::NoMatchingResolver(name)) if name == "x"
        ));
    }

    #[test]
    fn test_exclusion_forces_dialect() {
        let source = LogicalSource::new(SourceRef::new("db")).with_reference_formulation(rr::SQL2008);
        let selection = ResolverSelection {
            include: Vec::new(),
            exclude: vec!["sql-sqlite".to_string()],
        };
        let filtered = registry().filtered(&selection);
        assert_eq!(filtered.select(&source).unwrap().resolver_name(), "sql-mysql");
        assert_eq!(filtered.len(), 4);
    }

    #[test]
    fn test_score_builder() {
        let score = MatchScore::builder().strong_if(true).weak_if(true).weak_if(false);
        assert_eq!(score, MatchScore(3));
        assert!(!MatchScore::NONE.is_match());
    }
}
