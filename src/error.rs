//! Public error taxonomy.
//!
//! Only hard failures cross the public boundary. Soft failures (a degraded
//! retrieval stage, a rerank fallback, a cache fault) are recorded in
//! [`SearchMetrics::degradations`](crate::metrics::SearchMetrics) and never
//! surface as errors.

use thiserror::Error;

use crate::taxonomy::TaxonomyError;

#[derive(Debug, Error)]
pub enum SearchError {
    /// Empty or whitespace-only query, or `k` out of bounds.
    #[error("invalid query: {0}")]
    InvalidQuery(String),
    /// Filter failed validation: bad content type, inverted date range,
    /// unknown taxonomy version, or malformed node id.
    #[error("invalid filter: {0}")]
    InvalidFilter(String),
    /// Cycle or dangling node reference in the taxonomy DAG.
    #[error("taxonomy corrupt: {0}")]
    TaxonomyCorrupt(String),
    /// Both retrieval stages failed; no candidates to return.
    #[error("all retrieval stages failed (lexical: {lexical}; dense: {dense})")]
    AllRetrievalFailed { lexical: String, dense: String },
    /// Caller-initiated cancellation.
    #[error("search cancelled by caller")]
    Cancelled,
}

impl From<TaxonomyError> for SearchError {
    fn from(e: TaxonomyError) -> Self {
        match e {
            TaxonomyError::Cycle(_) | TaxonomyError::Corrupt(_) => {
                SearchError::TaxonomyCorrupt(e.to_string())
            }
            TaxonomyError::UnknownVersion(_) | TaxonomyError::Backend(_) => {
                SearchError::InvalidFilter(e.to_string())
            }
        }
    }
}
