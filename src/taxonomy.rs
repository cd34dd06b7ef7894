//! Taxonomy reading and scope resolution.
//!
//! Each taxonomy version is an immutable DAG (in practice a forest). The
//! resolver expands a set of scope nodes to their full descendant closure,
//! memoizing adjacency per version. Memoization is dropped only when the
//! reader's version catalog changes; the DAGs themselves never mutate.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TaxonomyError {
    #[error("taxonomy backend error: {0}")]
    Backend(String),
    #[error("unknown taxonomy version '{0}'")]
    UnknownVersion(String),
    #[error("taxonomy cycle detected at node '{0}'")]
    Cycle(String),
    #[error("taxonomy corrupt: {0}")]
    Corrupt(String),
}

/// Read-only view of the taxonomy service.
///
/// Implementations are expected to be cheap to call repeatedly; the resolver
/// caches adjacency on top regardless.
pub trait TaxonomyReader: Send + Sync {
    /// All known taxonomy versions.
    fn list_versions(&self) -> Result<HashSet<String>, TaxonomyError>;

    /// Child node ids of `node_id` under `version`. Unknown nodes yield an
    /// empty list.
    fn children(&self, version: &str, node_id: &str) -> Result<Vec<String>, TaxonomyError>;

    /// Node classifications of a document under `version`, as
    /// `(node_id, confidence)` pairs.
    fn classify(&self, document_id: &str, version: &str)
        -> Result<Vec<(String, f32)>, TaxonomyError>;
}

/// Descendant-closure resolver with per-version adjacency memoization.
///
/// Read-mostly: lookups take a read lock; only adjacency misses and catalog
/// refreshes take the write lock.
pub struct ScopeResolver {
    reader: Arc<dyn TaxonomyReader>,
    catalog: RwLock<Option<HashSet<String>>>,
    adjacency: RwLock<HashMap<String, HashMap<String, Arc<Vec<String>>>>>,
}

impl ScopeResolver {
    pub fn new(reader: Arc<dyn TaxonomyReader>) -> Self {
        Self {
            reader,
            catalog: RwLock::new(None),
            adjacency: RwLock::new(HashMap::new()),
        }
    }

    /// True if `version` exists in the reader's catalog.
    ///
    /// The catalog is cached; a version missing from the cached snapshot
    /// triggers one refresh before the verdict.
    pub fn version_exists(&self, version: &str) -> Result<bool, TaxonomyError> {
        {
            let catalog = self.catalog.read().unwrap_or_else(|p| p.into_inner());
            if let Some(ref known) = *catalog {
                if known.contains(version) {
                    return Ok(true);
                }
            }
        }
        self.refresh_catalog()?;
        let catalog = self.catalog.read().unwrap_or_else(|p| p.into_inner());
        Ok(catalog.as_ref().is_some_and(|known| known.contains(version)))
    }

    /// Expand `roots` to the union of the roots and all transitive
    /// descendants under `version`.
    ///
    /// Cycles cannot occur in a well-formed taxonomy; detection is
    /// defensive and surfaces as [`TaxonomyError::Cycle`].
    pub fn resolve_scope(
        &self,
        version: &str,
        roots: &[String],
    ) -> Result<HashSet<String>, TaxonomyError> {
        if !self.version_exists(version)? {
            return Err(TaxonomyError::UnknownVersion(version.to_string()));
        }

        let mut closure: HashSet<String> = HashSet::new();
        for root in roots {
            self.expand(version, root, &mut closure)?;
        }
        Ok(closure)
    }

    /// Drop all cached state. Called when the consumer knows the catalog
    /// changed (e.g. a taxonomy deployment).
    pub fn invalidate(&self) {
        *self.catalog.write().unwrap_or_else(|p| p.into_inner()) = None;
        self.adjacency
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .clear();
    }

    fn refresh_catalog(&self) -> Result<(), TaxonomyError> {
        let fresh = self.reader.list_versions()?;
        let mut catalog = self.catalog.write().unwrap_or_else(|p| p.into_inner());
        let changed = catalog.as_ref() != Some(&fresh);
        if changed {
            tracing::debug!(versions = fresh.len(), "taxonomy catalog refreshed");
            // New catalog invalidates memoized adjacency wholesale; versions
            // are immutable so only additions/removals can occur.
            self.adjacency
                .write()
                .unwrap_or_else(|p| p.into_inner())
                .clear();
        }
        *catalog = Some(fresh);
        Ok(())
    }

    fn children_cached(&self, version: &str, node: &str) -> Result<Arc<Vec<String>>, TaxonomyError> {
        {
            let adjacency = self.adjacency.read().unwrap_or_else(|p| p.into_inner());
            if let Some(kids) = adjacency.get(version).and_then(|m| m.get(node)) {
                return Ok(Arc::clone(kids));
            }
        }
        let kids = Arc::new(self.reader.children(version, node)?);
        let mut adjacency = self.adjacency.write().unwrap_or_else(|p| p.into_inner());
        adjacency
            .entry(version.to_string())
            .or_default()
            .insert(node.to_string(), Arc::clone(&kids));
        Ok(kids)
    }

    /// Iterative DFS from `root`, accumulating into `closure`.
    ///
    /// An explicit frame stack keeps deep chains off the call stack; the
    /// in-stack set detects back edges (a node reached again while still
    /// being expanded).
    fn expand(
        &self,
        version: &str,
        root: &str,
        closure: &mut HashSet<String>,
    ) -> Result<(), TaxonomyError> {
        struct Frame {
            node: String,
            children: Arc<Vec<String>>,
            next: usize,
        }

        if !closure.insert(root.to_string()) {
            // Already expanded via another root (DAG).
            return Ok(());
        }
        let mut on_path: HashSet<String> = [root.to_string()].into_iter().collect();
        let mut stack = vec![Frame {
            node: root.to_string(),
            children: self.children_cached(version, root)?,
            next: 0,
        }];

        while let Some(frame) = stack.last_mut() {
            if frame.next >= frame.children.len() {
                on_path.remove(&frame.node);
                stack.pop();
                continue;
            }
            let child = frame.children[frame.next].clone();
            frame.next += 1;

            if on_path.contains(&child) {
                return Err(TaxonomyError::Cycle(child));
            }
            if !closure.insert(child.clone()) {
                // Already expanded via a shared parent (DAG).
                continue;
            }
            let children = self.children_cached(version, &child)?;
            on_path.insert(child.clone());
            stack.push(Frame {
                node: child,
                children,
                next: 0,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// In-memory taxonomy fixture: one version, edges as given.
    struct FixtureReader {
        version: String,
        edges: HashMap<String, Vec<String>>,
        children_calls: Mutex<usize>,
    }

    impl FixtureReader {
        fn new(version: &str, edges: &[(&str, &[&str])]) -> Self {
            Self {
                version: version.to_string(),
                edges: edges
                    .iter()
                    .map(|(p, cs)| {
                        (p.to_string(), cs.iter().map(|c| c.to_string()).collect())
                    })
                    .collect(),
                children_calls: Mutex::new(0),
            }
        }
    }

    impl TaxonomyReader for FixtureReader {
        fn list_versions(&self) -> Result<HashSet<String>, TaxonomyError> {
            Ok([self.version.clone()].into_iter().collect())
        }

        fn children(&self, version: &str, node_id: &str) -> Result<Vec<String>, TaxonomyError> {
            if version != self.version {
                return Err(TaxonomyError::UnknownVersion(version.to_string()));
            }
            *self.children_calls.lock().unwrap() += 1;
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

    fn set(ids: &[&str]) -> HashSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_resolve_tree_closure() {
        let reader = FixtureReader::new(
            "1.8.1",
            &[("ai", &["ml", "nlp"]), ("ml", &["rag"]), ("db", &["sql"])],
        );
        let resolver = ScopeResolver::new(Arc::new(reader));
        let closure = resolver
            .resolve_scope("1.8.1", &["ai".to_string()])
            .unwrap();
        assert_eq!(closure, set(&["ai", "ml", "nlp", "rag"]));
    }

    #[test]
    fn test_resolve_leaf_is_identity() {
        let reader = FixtureReader::new("1.8.1", &[("ai", &["ml"])]);
        let resolver = ScopeResolver::new(Arc::new(reader));
        let closure = resolver
            .resolve_scope("1.8.1", &["ml".to_string()])
            .unwrap();
        assert_eq!(closure, set(&["ml"]));
    }

    #[test]
    fn test_resolve_multiple_roots_union() {
        let reader = FixtureReader::new("v1", &[("a", &["b"]), ("c", &["d"])]);
        let resolver = ScopeResolver::new(Arc::new(reader));
        let closure = resolver
            .resolve_scope("v1", &["a".to_string(), "c".to_string()])
            .unwrap();
        assert_eq!(closure, set(&["a", "b", "c", "d"]));
    }

    #[test]
    fn test_diamond_dag_visits_shared_node_once() {
        // a -> b, a -> c, b -> d, c -> d: d reachable twice, no cycle
        let reader = FixtureReader::new("v1", &[("a", &["b", "c"]), ("b", &["d"]), ("c", &["d"])]);
        let resolver = ScopeResolver::new(Arc::new(reader));
        let closure = resolver.resolve_scope("v1", &["a".to_string()]).unwrap();
        assert_eq!(closure, set(&["a", "b", "c", "d"]));
    }

    #[test]
    fn test_cycle_detected() {
        let reader = FixtureReader::new("v1", &[("a", &["b"]), ("b", &["a"])]);
        let resolver = ScopeResolver::new(Arc::new(reader));
        let err = resolver
            .resolve_scope("v1", &["a".to_string()])
            .unwrap_err();
        assert!(matches!(err, TaxonomyError::Cycle(_)));
    }

    #[test]
    fn test_unknown_version_rejected() {
        let reader = FixtureReader::new("v1", &[]);
        let resolver = ScopeResolver::new(Arc::new(reader));
        let err = resolver
            .resolve_scope("v2", &["a".to_string()])
            .unwrap_err();
        assert!(matches!(err, TaxonomyError::UnknownVersion(_)));
    }

    #[test]
    fn test_adjacency_memoized() {
        let reader = Arc::new(FixtureReader::new("v1", &[("a", &["b"]), ("b", &[])]));
        let resolver = ScopeResolver::new(Arc::clone(&reader) as Arc<dyn TaxonomyReader>);
        resolver.resolve_scope("v1", &["a".to_string()]).unwrap();
        let first = *reader.children_calls.lock().unwrap();
        resolver.resolve_scope("v1", &["a".to_string()]).unwrap();
        let second = *reader.children_calls.lock().unwrap();
        assert_eq!(first, second, "warm resolve must not re-query the reader");
    }

    #[test]
    fn test_invalidate_drops_memoization() {
        let reader = Arc::new(FixtureReader::new("v1", &[("a", &[])]));
        let resolver = ScopeResolver::new(Arc::clone(&reader) as Arc<dyn TaxonomyReader>);
        resolver.resolve_scope("v1", &["a".to_string()]).unwrap();
        resolver.invalidate();
        resolver.resolve_scope("v1", &["a".to_string()]).unwrap();
        assert_eq!(*reader.children_calls.lock().unwrap(), 2);
    }
}
