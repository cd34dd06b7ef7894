//! Filter validation and compilation.
//!
//! A [`Filter`] arrives as untrusted wire data. Compilation validates every
//! field against its whitelist, expands the taxonomy scope to the full
//! descendant closure, and produces a [`CompiledFilter`]: a structured
//! predicate plus a parameterized SQL rendering with bound values. User data
//! is never interpolated into query text; anything outside the whitelists is
//! rejected with `InvalidFilter` before the store is contacted.

use std::collections::HashSet;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, SecondsFormat, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::SearchError;
use crate::model::ContentType;
use crate::taxonomy::ScopeResolver;

/// Node ids are either short slugs or hyphenated UUIDs; everything else is
/// rejected before reaching the store.
static NODE_SLUG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,64}$").expect("valid regex"));

/// Confidence floor for taxonomy classifications. Requests may raise it but
/// never lower it.
pub const MIN_CONFIDENCE_FLOOR: f64 = 0.7;

/// 128-bit truncated SHA-256 of a canonical serialization.
pub type Fingerprint = [u8; 16];

/// Search filter wire form. All fields optional, combined by AND.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Filter {
    /// Scope to these taxonomy nodes and their descendants (inclusive).
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub taxonomy_node_ids: Vec<String>,
    /// Taxonomy version; required when `taxonomy_node_ids` is non-empty.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub taxonomy_version: Option<String>,
    /// Restrict to these content types.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub content_types: Vec<ContentType>,
    /// Inclusive lower bound on `processed_at`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `processed_at`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_to: Option<DateTime<Utc>>,
    /// Classification confidence floor; defaults to 0.7 and cannot be set
    /// lower.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_confidence: Option<f64>,
}

impl Filter {
    /// True when no field constrains the result set.
    pub fn is_empty(&self) -> bool {
        self.taxonomy_node_ids.is_empty()
            && self.taxonomy_version.is_none()
            && self.content_types.is_empty()
            && self.date_from.is_none()
            && self.date_to.is_none()
            && self.min_confidence.is_none()
    }
}

/// Taxonomy scope constraint after descendant expansion.
#[derive(Debug, Clone)]
pub struct ScopeConstraint {
    /// Taxonomy version the scope was resolved under.
    pub version: String,
    /// Admissible node ids: the requested nodes plus all descendants.
    pub nodes: HashSet<String>,
    /// Classification confidence floor.
    pub min_confidence: f64,
}

/// A bound value for a parameterized predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum BindValue {
    Text(String),
    Int(i64),
    Real(f64),
}

/// Validated, scope-expanded filter.
///
/// Carries both the structured predicate (for stores that match in memory)
/// and a parameterized SQL rendering (for the bundled SQLite store). The
/// canonical serialization feeds cache keys and the coarse-invalidation
/// fingerprint.
#[derive(Debug, Clone)]
pub struct CompiledFilter {
    scope: Option<ScopeConstraint>,
    content_types: Vec<ContentType>,
    date_from: Option<DateTime<Utc>>,
    date_to: Option<DateTime<Utc>>,
    canonical: String,
    fingerprint: Fingerprint,
}

/// Fixed-field-order serialization target for the canonical form.
///
/// Struct serialization order is declaration order, so the canonical bytes
/// do not depend on map implementation details or wire key order. Floats
/// are quantized to six decimals; dates are rendered as UTC RFC 3339 with
/// second precision.
#[derive(Serialize)]
struct CanonicalFilter<'a> {
    taxonomy_node_ids: &'a [String],
    taxonomy_version: Option<&'a str>,
    content_types: Vec<&'static str>,
    date_from: Option<String>,
    date_to: Option<String>,
    min_confidence: f64,
}

/// Validate `filter` and expand its taxonomy scope via `resolver`.
///
/// # Errors
///
/// `InvalidFilter` for malformed node ids, a missing or unknown taxonomy
/// version, an inverted date range, or an out-of-range confidence;
/// `TaxonomyCorrupt` if scope expansion detects a cycle or dangling node.
pub fn compile(filter: &Filter, resolver: &ScopeResolver) -> Result<CompiledFilter, SearchError> {
    // Node ids: whitelist check, then sort + dedup for determinism.
    let mut node_ids: Vec<String> = Vec::with_capacity(filter.taxonomy_node_ids.len());
    for id in &filter.taxonomy_node_ids {
        if !is_valid_node_id(id) {
            return Err(SearchError::InvalidFilter(format!(
                "malformed taxonomy node id '{}'",
                id
            )));
        }
        node_ids.push(id.clone());
    }
    node_ids.sort();
    node_ids.dedup();

    let min_confidence = match filter.min_confidence {
        None => MIN_CONFIDENCE_FLOOR,
        Some(c) if (MIN_CONFIDENCE_FLOOR..=1.0).contains(&c) => quantize(c),
        Some(c) => {
            return Err(SearchError::InvalidFilter(format!(
                "min_confidence {} outside [{}, 1.0]",
                c, MIN_CONFIDENCE_FLOOR
            )));
        }
    };

    let scope = if node_ids.is_empty() {
        // A version without scope nodes constrains nothing, but it must
        // still name a real catalog entry.
        if let Some(version) = filter.taxonomy_version.as_deref() {
            if !resolver.version_exists(version)? {
                return Err(SearchError::InvalidFilter(format!(
                    "unknown taxonomy version '{}'",
                    version
                )));
            }
        }
        None
    } else {
        let version = filter.taxonomy_version.as_deref().ok_or_else(|| {
            SearchError::InvalidFilter(
                "taxonomy_version is required when taxonomy_node_ids is set".to_string(),
            )
        })?;
        let nodes = resolver.resolve_scope(version, &node_ids)?;
        Some(ScopeConstraint {
            version: version.to_string(),
            nodes,
            min_confidence,
        })
    };

    if let (Some(from), Some(to)) = (filter.date_from, filter.date_to) {
        if from > to {
            return Err(SearchError::InvalidFilter(format!(
                "date_from {} is after date_to {}",
                from.to_rfc3339(),
                to.to_rfc3339()
            )));
        }
    }

    let mut content_types = filter.content_types.clone();
    content_types.sort_by_key(|ct| ct.as_str());
    content_types.dedup();

    let canonical = serde_json::to_string(&CanonicalFilter {
        taxonomy_node_ids: &node_ids,
        taxonomy_version: filter.taxonomy_version.as_deref(),
        content_types: content_types.iter().map(|ct| ct.as_str()).collect(),
        date_from: filter
            .date_from
            .map(|d| d.to_rfc3339_opts(SecondsFormat::Secs, true)),
        date_to: filter
            .date_to
            .map(|d| d.to_rfc3339_opts(SecondsFormat::Secs, true)),
        min_confidence,
    })
    .map_err(|e| SearchError::InvalidFilter(format!("filter serialization failed: {}", e)))?;

    let fingerprint = fingerprint_of(&canonical);

    Ok(CompiledFilter {
        scope,
        content_types,
        date_from: filter.date_from,
        date_to: filter.date_to,
        canonical,
        fingerprint,
    })
}

impl CompiledFilter {
    /// Expanded taxonomy scope, if the filter had one.
    pub fn scope(&self) -> Option<&ScopeConstraint> {
        self.scope.as_ref()
    }

    /// Admitted content types; empty means unconstrained.
    pub fn content_types(&self) -> &[ContentType] {
        &self.content_types
    }

    /// Inclusive `processed_at` lower bound.
    pub fn date_from(&self) -> Option<DateTime<Utc>> {
        self.date_from
    }

    /// Inclusive `processed_at` upper bound.
    pub fn date_to(&self) -> Option<DateTime<Utc>> {
        self.date_to
    }

    /// Canonical serialization (sorted node ids, fixed field order,
    /// quantized floats). Stable across wire key order and whitespace.
    pub fn canonical_json(&self) -> &str {
        &self.canonical
    }

    /// 128-bit fingerprint of the canonical form; the key prefix used by
    /// coarse cache invalidation.
    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    /// Render as a parameterized SQL predicate over chunk alias `c` and
    /// classifications alias table `classifications`.
    ///
    /// Returns conjunction fragments (to be ANDed into a WHERE clause) and
    /// the bound values in placeholder order, starting at `?{first_bind}`.
    pub fn to_sql(&self, first_bind: usize) -> (Vec<String>, Vec<BindValue>) {
        let mut conditions = Vec::new();
        let mut binds: Vec<BindValue> = Vec::new();
        let mut next = first_bind;

        if !self.content_types.is_empty() {
            let placeholders: Vec<String> = (0..self.content_types.len())
                .map(|i| format!("?{}", next + i))
                .collect();
            conditions.push(format!("c.content_type IN ({})", placeholders.join(",")));
            for ct in &self.content_types {
                binds.push(BindValue::Text(ct.as_str().to_string()));
            }
            next += self.content_types.len();
        }

        if let Some(from) = self.date_from {
            conditions.push(format!("c.processed_at >= ?{}", next));
            binds.push(BindValue::Int(from.timestamp()));
            next += 1;
        }

        if let Some(to) = self.date_to {
            conditions.push(format!("c.processed_at <= ?{}", next));
            binds.push(BindValue::Int(to.timestamp()));
            next += 1;
        }

        if let Some(ref scope) = self.scope {
            let mut nodes: Vec<&String> = scope.nodes.iter().collect();
            nodes.sort();
            let placeholders: Vec<String> = (0..nodes.len())
                .map(|i| format!("?{}", next + 2 + i))
                .collect();
            conditions.push(format!(
                "EXISTS (SELECT 1 FROM classifications tc \
                 WHERE tc.document_id = c.document_id AND tc.version = ?{} \
                 AND tc.confidence >= ?{} AND tc.node_id IN ({}))",
                next,
                next + 1,
                placeholders.join(",")
            ));
            binds.push(BindValue::Text(scope.version.clone()));
            binds.push(BindValue::Real(scope.min_confidence));
            for node in nodes {
                binds.push(BindValue::Text(node.clone()));
            }
        }

        (conditions, binds)
    }
}

fn is_valid_node_id(id: &str) -> bool {
    NODE_SLUG_RE.is_match(id) || uuid::Uuid::try_parse(id).is_ok()
}

fn quantize(x: f64) -> f64 {
    (x * 1e6).round() / 1e6
}

fn fingerprint_of(canonical: &str) -> Fingerprint {
    let digest = Sha256::digest(canonical.as_bytes());
    let mut out = [0u8; 16];
    out.copy_from_slice(&digest[..16]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::taxonomy::{TaxonomyError, TaxonomyReader};
    use std::collections::HashMap;
    use std::sync::Arc;

    struct FixtureReader {
        versions: HashSet<String>,
        edges: HashMap<String, Vec<String>>,
    }

    impl TaxonomyReader for FixtureReader {
        fn list_versions(&self) -> Result<HashSet<String>, TaxonomyError> {
            Ok(self.versions.clone())
        }

        fn children(&self, _version: &str, node_id: &str) -> Result<Vec<String>, TaxonomyError> {
            Ok(self.edges.get(node_id).cloned().unwrap_or_default())
        }

        fn classify(
            &self,
            _document_id: &str,
            _version: &str,
        ) -> Result<Vec<(String, f32)>, TaxonomyError> {
            Ok(vec![])
        }
    }

    fn resolver() -> ScopeResolver {
        ScopeResolver::new(Arc::new(FixtureReader {
            versions: ["1.8.1".to_string()].into_iter().collect(),
            edges: [("ai-ml".to_string(), vec!["rag".to_string()])]
                .into_iter()
                .collect(),
        }))
    }

    fn scoped_filter(nodes: &[&str], version: Option<&str>) -> Filter {
        Filter {
            taxonomy_node_ids: nodes.iter().map(|s| s.to_string()).collect(),
            taxonomy_version: version.map(|s| s.to_string()),
            ..Filter::default()
        }
    }

    #[test]
    fn test_empty_filter_compiles() {
        let compiled = compile(&Filter::default(), &resolver()).unwrap();
        assert!(compiled.scope().is_none());
        assert!(compiled.content_types().is_empty());
        let (conditions, binds) = compiled.to_sql(1);
        assert!(conditions.is_empty());
        assert!(binds.is_empty());
    }

    #[test]
    fn test_scope_expansion_includes_descendants() {
        let compiled = compile(&scoped_filter(&["ai-ml"], Some("1.8.1")), &resolver()).unwrap();
        let scope = compiled.scope().unwrap();
        assert!(scope.nodes.contains("ai-ml"));
        assert!(scope.nodes.contains("rag"));
        assert_eq!(scope.min_confidence, MIN_CONFIDENCE_FLOOR);
    }

    #[test]
    fn test_scope_requires_version() {
        let err = compile(&scoped_filter(&["ai-ml"], None), &resolver()).unwrap_err();
        assert!(matches!(err, SearchError::InvalidFilter(_)));
    }

    #[test]
    fn test_unknown_version_rejected() {
        let err = compile(&scoped_filter(&["ai-ml"], Some("9.9.9")), &resolver()).unwrap_err();
        assert!(matches!(err, SearchError::InvalidFilter(_)));
    }

    #[test]
    fn test_malformed_node_id_rejected() {
        for bad in ["a b", "x;drop", "", "node/../etc", &"n".repeat(65)] {
            let err = compile(&scoped_filter(&[bad], Some("1.8.1")), &resolver()).unwrap_err();
            assert!(matches!(err, SearchError::InvalidFilter(_)), "{:?}", bad);
        }
    }

    #[test]
    fn test_uuid_node_id_accepted() {
        let reader = FixtureReader {
            versions: ["1.8.1".to_string()].into_iter().collect(),
            edges: HashMap::new(),
        };
        let resolver = ScopeResolver::new(Arc::new(reader));
        let filter = scoped_filter(&["550e8400-e29b-41d4-a716-446655440000"], Some("1.8.1"));
        assert!(compile(&filter, &resolver).is_ok());
    }

    #[test]
    fn test_inverted_date_range_rejected() {
        let filter = Filter {
            date_from: Some("2026-02-01T00:00:00Z".parse().unwrap()),
            date_to: Some("2026-01-01T00:00:00Z".parse().unwrap()),
            ..Filter::default()
        };
        let err = compile(&filter, &resolver()).unwrap_err();
        assert!(matches!(err, SearchError::InvalidFilter(_)));
    }

    #[test]
    fn test_min_confidence_floor_enforced() {
        let low = Filter {
            min_confidence: Some(0.5),
            ..Filter::default()
        };
        assert!(matches!(
            compile(&low, &resolver()).unwrap_err(),
            SearchError::InvalidFilter(_)
        ));

        let high = Filter {
            min_confidence: Some(0.9),
            ..Filter::default()
        };
        let compiled = compile(&high, &resolver()).unwrap();
        assert!(compiled.canonical_json().contains("0.9"));
    }

    #[test]
    fn test_canonical_stable_under_wire_key_order() {
        let a: Filter = serde_json::from_str(
            r#"{"taxonomy_version":"1.8.1","taxonomy_node_ids":["rag","ai-ml"]}"#,
        )
        .unwrap();
        let b: Filter = serde_json::from_str(
            r#"{"taxonomy_node_ids":["ai-ml","rag"],"taxonomy_version":"1.8.1"}"#,
        )
        .unwrap();
        let r = resolver();
        let ca = compile(&a, &r).unwrap();
        let cb = compile(&b, &r).unwrap();
        assert_eq!(ca.canonical_json(), cb.canonical_json());
        assert_eq!(ca.fingerprint(), cb.fingerprint());
    }

    #[test]
    fn test_fingerprint_distinguishes_filters() {
        let r = resolver();
        let empty = compile(&Filter::default(), &r).unwrap();
        let typed = compile(
            &Filter {
                content_types: vec![ContentType::Pdf],
                ..Filter::default()
            },
            &r,
        )
        .unwrap();
        assert_ne!(empty.fingerprint(), typed.fingerprint());
    }

    #[test]
    fn test_wire_round_trip() {
        let filter = Filter {
            taxonomy_node_ids: vec!["ai-ml".to_string()],
            taxonomy_version: Some("1.8.1".to_string()),
            content_types: vec![ContentType::Pdf, ContentType::Markdown],
            date_from: Some("2026-01-01T00:00:00Z".parse().unwrap()),
            date_to: Some("2026-06-30T23:59:59Z".parse().unwrap()),
            min_confidence: Some(0.8),
        };
        let json = serde_json::to_string(&filter).unwrap();
        let back: Filter = serde_json::from_str(&json).unwrap();
        assert_eq!(back, filter);
    }

    #[test]
    fn test_to_sql_bind_alignment() {
        let filter = Filter {
            content_types: vec![ContentType::Pdf, ContentType::Html],
            date_from: Some("2026-01-01T00:00:00Z".parse().unwrap()),
            ..Filter::default()
        };
        let compiled = compile(&filter, &resolver()).unwrap();
        let (conditions, binds) = compiled.to_sql(3);
        assert_eq!(conditions.len(), 2);
        assert!(conditions[0].contains("?3") && conditions[0].contains("?4"));
        assert!(conditions[1].contains("?5"));
        assert_eq!(binds.len(), 3);
        assert!(matches!(binds[2], BindValue::Int(_)));
    }

    #[test]
    fn test_scope_sql_references_classifications() {
        let compiled = compile(&scoped_filter(&["ai-ml"], Some("1.8.1")), &resolver()).unwrap();
        let (conditions, binds) = compiled.to_sql(1);
        assert_eq!(conditions.len(), 1);
        assert!(conditions[0].contains("classifications"));
        // version + confidence + 2 scope nodes
        assert_eq!(binds.len(), 4);
    }
}
