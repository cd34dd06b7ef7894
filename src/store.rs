//! Bundled SQLite chunk store.
//!
//! Reference implementation of [`ChunkStore`] on sqlx + SQLite: FTS5 for
//! lexical scoring, brute-force cosine over stored vectors for dense
//! scoring, and the compiled filter predicate applied as parameterized SQL
//! in both paths.
//!
//! # Lexical scoring equivalence
//!
//! Scores come from FTS5 `bm25()`, which — like PostgreSQL `ts_rank_cd`
//! with the length-normalization and log-normalization flags (32|1) —
//! normalizes by document length and dampens raw term frequency. The two
//! engines do not produce equal numbers; the contract pinned by the tests
//! is *ordering* agreement on fixtures, which is all fusion consumes
//! (scores are min-max normalized per side before weighting).
//!
//! Dense retrieval here is exact (no ANN index), so recall equals exact
//! cosine by construction; approximate backends live behind the same trait.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::DateTime;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};

use crate::filter::{BindValue, CompiledFilter};
use crate::math::dense_score;
use crate::model::{Chunk, ContentType, Embedding};
use crate::traits::{ChunkStore, StoreError};

/// Rows scanned per batch during the brute-force vector pass. Bounds memory
/// to O(batch) instead of O(total chunks).
const VECTOR_SCAN_BATCH: i64 = 5000;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS chunks (
    id            TEXT PRIMARY KEY,
    document_id   TEXT NOT NULL,
    text          TEXT NOT NULL,
    title         TEXT,
    source_url    TEXT,
    taxonomy_path TEXT NOT NULL DEFAULT '[]',
    content_type  TEXT NOT NULL,
    processed_at  INTEGER NOT NULL,
    metadata      TEXT NOT NULL DEFAULT '{}',
    embedding     BLOB
);
CREATE VIRTUAL TABLE IF NOT EXISTS chunks_fts USING fts5(chunk_id UNINDEXED, text);
CREATE TABLE IF NOT EXISTS classifications (
    document_id TEXT NOT NULL,
    version     TEXT NOT NULL,
    node_id     TEXT NOT NULL,
    confidence  REAL NOT NULL,
    PRIMARY KEY (document_id, version, node_id)
);
CREATE INDEX IF NOT EXISTS idx_classifications_doc ON classifications(document_id, version);
"#;

/// SQLite-backed chunk and embedding store.
///
/// All methods take `&self`; the connection pool makes it safe to share
/// across concurrent requests.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) a store at `path`.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        let opts = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(opts).await?;
        Self::init(pool).await
    }

    /// Open an in-memory store.
    ///
    /// Pinned to a single connection: each SQLite `:memory:` connection is
    /// its own database.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::init(pool).await
    }

    async fn init(pool: SqlitePool) -> Result<Self, StoreError> {
        for statement in SCHEMA.split(';').filter(|s| !s.trim().is_empty()) {
            sqlx::query(statement).execute(&pool).await?;
        }
        Ok(Self { pool })
    }

    /// Insert or replace a chunk and its optional embedding.
    ///
    /// Fixture/consumer write path; the ingestion pipeline proper lives
    /// outside the retrieval core.
    pub async fn insert_chunk(
        &self,
        chunk: &Chunk,
        embedding: Option<&Embedding>,
    ) -> Result<(), StoreError> {
        let taxonomy_path = serde_json::to_string(&chunk.taxonomy_path)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let metadata = serde_json::to_string(&chunk.metadata)
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        sqlx::query(
            "INSERT OR REPLACE INTO chunks \
             (id, document_id, text, title, source_url, taxonomy_path, content_type, processed_at, metadata, embedding) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )
        .bind(&chunk.id)
        .bind(&chunk.document_id)
        .bind(&chunk.text)
        .bind(&chunk.title)
        .bind(&chunk.source_url)
        .bind(&taxonomy_path)
        .bind(chunk.content_type.as_str())
        .bind(chunk.processed_at.timestamp())
        .bind(&metadata)
        .bind(embedding.map(|e| embedding_to_blob(e.as_slice())))
        .execute(&self.pool)
        .await?;

        sqlx::query("DELETE FROM chunks_fts WHERE chunk_id = ?1")
            .bind(&chunk.id)
            .execute(&self.pool)
            .await?;
        sqlx::query("INSERT INTO chunks_fts (chunk_id, text) VALUES (?1, ?2)")
            .bind(&chunk.id)
            .bind(&chunk.text)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Record a document-to-node classification under a taxonomy version.
    pub async fn insert_classification(
        &self,
        document_id: &str,
        version: &str,
        node_id: &str,
        confidence: f64,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT OR REPLACE INTO classifications (document_id, version, node_id, confidence) \
             VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(document_id)
        .bind(version)
        .bind(node_id)
        .bind(confidence)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ChunkStore for SqliteStore {
    async fn lexical_search(
        &self,
        query: &str,
        filter: &CompiledFilter,
        limit: usize,
    ) -> Result<Vec<(String, f32)>, StoreError> {
        let match_query = sanitize_fts_query(query);
        if match_query.is_empty() {
            return Ok(Vec::new());
        }

        // ?1 = MATCH query, filter binds from ?2, LIMIT last.
        let (conditions, binds) = filter.to_sql(2);
        let where_extra = if conditions.is_empty() {
            String::new()
        } else {
            format!(" AND {}", conditions.join(" AND "))
        };
        let limit_placeholder = 2 + binds.len();
        let sql = format!(
            "SELECT c.id AS id, -bm25(chunks_fts) AS score \
             FROM chunks_fts JOIN chunks c ON c.id = chunks_fts.chunk_id \
             WHERE chunks_fts MATCH ?1{} \
             ORDER BY bm25(chunks_fts) LIMIT ?{}",
            where_extra, limit_placeholder
        );

        let mut q = sqlx::query(&sql).bind(&match_query);
        q = bind_values(q, &binds);
        q = q.bind(limit as i64);
        let rows = q.fetch_all(&self.pool).await?;

        Ok(rows
            .iter()
            .map(|row| (row.get::<String, _>("id"), row.get::<f64, _>("score") as f32))
            .collect())
    }

    async fn vector_search(
        &self,
        query: &Embedding,
        filter: &CompiledFilter,
        limit: usize,
    ) -> Result<Vec<(String, f32)>, StoreError> {
        if query.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        // ?1 = rowid cursor, filter binds from ?2, batch size last.
        let (conditions, binds) = filter.to_sql(2);
        let where_extra = if conditions.is_empty() {
            String::new()
        } else {
            format!(" AND {}", conditions.join(" AND "))
        };
        let batch_placeholder = 2 + binds.len();
        let sql = format!(
            "SELECT c.rowid AS rowid, c.id AS id, c.embedding AS embedding \
             FROM chunks c \
             WHERE c.embedding IS NOT NULL AND c.rowid > ?1{} \
             ORDER BY c.rowid ASC LIMIT ?{}",
            where_extra, batch_placeholder
        );

        let mut heap = TopScores::new(limit);
        let mut last_rowid: i64 = 0;
        loop {
            let mut q = sqlx::query(&sql).bind(last_rowid);
            q = bind_values(q, &binds);
            q = q.bind(VECTOR_SCAN_BATCH);
            let batch = q.fetch_all(&self.pool).await?;
            if batch.is_empty() {
                break;
            }
            last_rowid = batch
                .last()
                .map(|row| row.get::<i64, _>("rowid"))
                .unwrap_or(last_rowid);

            for row in &batch {
                let blob: Vec<u8> = row.get("embedding");
                let vector = blob_to_embedding(&blob);
                let Some(score) = dense_score(query.as_slice(), &vector) else {
                    continue; // dimension mismatch or zero vector; skip
                };
                heap.push(row.get::<String, _>("id"), score);
            }
        }

        Ok(heap.into_sorted_vec())
    }

    async fn fetch_chunks(&self, ids: &[String]) -> Result<Vec<Chunk>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{}", i)).collect();
        let sql = format!(
            "SELECT id, document_id, text, title, source_url, taxonomy_path, \
             content_type, processed_at, metadata FROM chunks WHERE id IN ({})",
            placeholders.join(",")
        );
        let mut q = sqlx::query(&sql);
        for id in ids {
            q = q.bind(id);
        }
        let rows = q.fetch_all(&self.pool).await?;

        let mut by_id: HashMap<String, Chunk> = HashMap::with_capacity(rows.len());
        for row in &rows {
            let chunk = row_to_chunk(row)?;
            by_id.insert(chunk.id.clone(), chunk);
        }
        // Preserve caller order; unknown ids are absent.
        Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }
}

fn row_to_chunk(row: &sqlx::sqlite::SqliteRow) -> Result<Chunk, StoreError> {
    let content_type_raw: String = row.get("content_type");
    let content_type = ContentType::from_str(&content_type_raw)
        .map_err(StoreError::Backend)?;
    let taxonomy_path: Vec<String> =
        serde_json::from_str(&row.get::<String, _>("taxonomy_path"))
            .map_err(|e| StoreError::Backend(e.to_string()))?;
    let metadata: serde_json::Map<String, serde_json::Value> =
        serde_json::from_str(&row.get::<String, _>("metadata"))
            .map_err(|e| StoreError::Backend(e.to_string()))?;
    let processed_at = DateTime::from_timestamp(row.get::<i64, _>("processed_at"), 0)
        .ok_or_else(|| StoreError::Backend("processed_at out of range".to_string()))?;

    Ok(Chunk {
        id: row.get("id"),
        document_id: row.get("document_id"),
        text: row.get("text"),
        title: row.get("title"),
        source_url: row.get("source_url"),
        taxonomy_path,
        content_type,
        processed_at,
        metadata,
    })
}

fn bind_values<'q>(
    mut q: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    binds: &'q [BindValue],
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    for bind in binds {
        q = match bind {
            BindValue::Text(s) => q.bind(s),
            BindValue::Int(i) => q.bind(i),
            BindValue::Real(r) => q.bind(r),
        };
    }
    q
}

/// Reduce a raw query to alphanumeric tokens joined by spaces.
///
/// Neutralizes FTS5 operators (`OR`, `NEAR`, `*`, quotes, parentheses) so
/// untrusted query text cannot change the MATCH grammar.
fn sanitize_fts_query(query: &str) -> String {
    query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

fn embedding_to_blob(vector: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(vector.len() * 4);
    for v in vector {
        blob.extend_from_slice(&v.to_le_bytes());
    }
    blob
}

fn blob_to_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Bounded min-heap keeping the top `capacity` scores.
///
/// Equal scores keep the earlier-seen id, which combined with the rowid
/// scan order makes results deterministic.
struct TopScores {
    heap: BinaryHeap<Reverse<(OrderedScore, String)>>,
    capacity: usize,
}

#[derive(Clone, Copy, PartialEq)]
struct OrderedScore(f32);

impl Eq for OrderedScore {}

impl PartialOrd for OrderedScore {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderedScore {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl TopScores {
    fn new(capacity: usize) -> Self {
        Self {
            heap: BinaryHeap::with_capacity(capacity + 1),
            capacity,
        }
    }

    fn push(&mut self, id: String, score: f32) {
        if !score.is_finite() || self.capacity == 0 {
            return;
        }
        if self.heap.len() < self.capacity {
            self.heap.push(Reverse((OrderedScore(score), id)));
            return;
        }
        if let Some(Reverse((OrderedScore(min), _))) = self.heap.peek() {
            if score > *min {
                self.heap.pop();
                self.heap.push(Reverse((OrderedScore(score), id)));
            }
        }
    }

    fn into_sorted_vec(self) -> Vec<(String, f32)> {
        let mut out: Vec<(String, f32)> = self
            .heap
            .into_iter()
            .map(|Reverse((OrderedScore(score), id))| (id, score))
            .collect();
        out.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        out
    }
}
