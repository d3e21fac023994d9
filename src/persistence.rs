//! Persistence layer: the one place that talks to Postgres.
//!
//! Implements exactly the operations named in the spec's component design —
//! `claim`, `finalise_success`, `mark_failed`, `vector_search`,
//! `keyword_search`, `chunks_range`, the 3D read paths, `replace_3d`, and
//! task CRUD — plus `list_documents`/`delete_document` (named in the HTTP
//! surface table but not spelled out as a component, grounded in
//! `cloudsql.py`'s `list_documents`/`delete_document`).
//!
//! All writes acquire a connection from the shared pool and release it on
//! every exit path; no operation holds a connection across a model call —
//! `claim` and `finalise_success` are separate acquisitions.

use chrono::Utc;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::errors::{CoreError, CoreResult};
use crate::models::{
    CandidateChunk, Chunk3D, Document, DocumentStatus, IngestTask, TaskKind, TaskStatus,
};

pub struct PgStore {
    pool: PgPool,
}

/// Outcome of [`PgStore::claim`]: whether this caller won the race to own
/// ingestion of this (bucket, object, generation).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    Fresh,
    Existing(DocumentStatus),
}

#[derive(Debug, Clone)]
pub struct ClaimResult {
    pub doc_id: Uuid,
    pub outcome: ClaimOutcome,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Atomically insert a new Document in Processing, or return the
    /// existing row. Contention between concurrent callers for the same
    /// (original_gcs, gcs_generation) resolves so exactly one sees `Fresh`;
    /// the rest observe `Existing` (invariant 6).
    pub async fn claim(
        &self,
        filename: &str,
        original_gcs: &str,
        gcs_generation: i64,
    ) -> CoreResult<ClaimResult> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO documents (id, filename, original_gcs, gcs_generation, status, created_at)
            VALUES ($1, $2, $3, $4, 'Processing', now())
            ON CONFLICT (original_gcs, gcs_generation) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(filename)
        .bind(original_gcs)
        .bind(gcs_generation)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(row) = inserted {
            tx.commit().await?;
            let doc_id: Uuid = row.get("id");
            return Ok(ClaimResult {
                doc_id,
                outcome: ClaimOutcome::Fresh,
            });
        }

        // Lost the race (or this (gcs, generation) already has a row) —
        // read back the existing row within the same transaction so we see
        // a consistent status.
        let existing = sqlx::query("SELECT id, status FROM documents WHERE original_gcs = $1 AND gcs_generation = $2")
            .bind(original_gcs)
            .bind(gcs_generation)
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;

        let doc_id: Uuid = existing.get("id");
        let status_str: String = existing.get("status");
        let status = DocumentStatus::parse(&status_str)
            .ok_or_else(|| CoreError::Fatal(format!("unknown document status '{}'", status_str)))?;

        Ok(ClaimResult {
            doc_id,
            outcome: ClaimOutcome::Existing(status),
        })
    }

    /// Single transaction: mark Ready, clear error, replace all chunks with
    /// their vectors (ordinal = array index). Rolled back on any failure.
    pub async fn finalise_success(
        &self,
        doc_id: Uuid,
        processed_gcs: Option<&str>,
        chunks: &[String],
        vectors: &[Vec<f32>],
    ) -> CoreResult<()> {
        if chunks.len() != vectors.len() {
            return Err(CoreError::Fatal(
                "chunk/vector count mismatch at finalise_success".to_string(),
            ));
        }

        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE documents SET status = 'Ready', error_message = NULL, processed_gcs = $2 WHERE id = $1")
            .bind(doc_id)
            .bind(processed_gcs)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM chunks WHERE doc_id = $1")
            .bind(doc_id)
            .execute(&mut *tx)
            .await?;

        for (idx, (text, vector)) in chunks.iter().zip(vectors.iter()).enumerate() {
            sqlx::query(
                "INSERT INTO chunks (doc_id, chunk_index, text, embedding) VALUES ($1, $2, $3, $4)",
            )
            .bind(doc_id)
            .bind(idx as i32)
            .bind(text)
            .bind(pgvector_literal(vector))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn mark_failed(&self, doc_id: Uuid, error: &str) -> CoreResult<()> {
        sqlx::query("UPDATE documents SET status = 'Failed', error_message = $2 WHERE id = $1")
            .bind(doc_id)
            .bind(error)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Top-`limit` chunks from Ready documents, ordered by ascending cosine
    /// distance against `query_vector`. The `<=>` operator is pgvector's
    /// cosine-distance operator.
    pub async fn vector_search(
        &self,
        query_vector: &[f32],
        limit: i64,
    ) -> CoreResult<Vec<CandidateChunk>> {
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.doc_id, d.filename, c.chunk_index, c.text,
                   (c.embedding <=> $1::vector) AS distance
            FROM chunks c
            JOIN documents d ON d.id = c.doc_id
            WHERE d.status = 'Ready'
            ORDER BY distance ASC
            LIMIT $2
            "#,
        )
        .bind(pgvector_literal(query_vector))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let distance: f64 = row.get("distance");
                CandidateChunk {
                    chunk_id: row.get("id"),
                    doc_id: row.get("doc_id"),
                    doc_filename: row.get("filename"),
                    chunk_index: row.get("chunk_index"),
                    text: row.get("text"),
                    score: -distance,
                }
            })
            .collect())
    }

    /// Like [`Self::vector_search`] but keeps only rows whose cosine
    /// similarity (`1 - distance`) meets `min_similarity`.
    pub async fn vector_search_with_threshold(
        &self,
        query_vector: &[f32],
        limit: i64,
        min_similarity: f64,
    ) -> CoreResult<Vec<CandidateChunk>> {
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.doc_id, d.filename, c.chunk_index, c.text,
                   (c.embedding <=> $1::vector) AS distance
            FROM chunks c
            JOIN documents d ON d.id = c.doc_id
            WHERE d.status = 'Ready' AND (1 - (c.embedding <=> $1::vector)) >= $3
            ORDER BY distance ASC
            LIMIT $2
            "#,
        )
        .bind(pgvector_literal(query_vector))
        .bind(limit)
        .bind(min_similarity)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let distance: f64 = row.get("distance");
                CandidateChunk {
                    chunk_id: row.get("id"),
                    doc_id: row.get("doc_id"),
                    doc_filename: row.get("filename"),
                    chunk_index: row.get("chunk_index"),
                    text: row.get("text"),
                    score: -distance,
                }
            })
            .collect())
    }

    /// Naive term scan: lowercase-tokenize the query minus a stopword set,
    /// count occurrences per Ready document's chunk text, return nonzero
    /// scores sorted desc, capped at `limit`. Deliberately not a `tsvector`
    /// index — the spec calls this scan "naive".
    pub async fn keyword_search(&self, query: &str, limit: i64) -> CoreResult<Vec<CandidateChunk>> {
        let terms = tokenize_query(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r#"
            SELECT c.id, c.doc_id, d.filename, c.chunk_index, c.text
            FROM chunks c
            JOIN documents d ON d.id = c.doc_id
            WHERE d.status = 'Ready'
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut scored: Vec<CandidateChunk> = rows
            .into_iter()
            .filter_map(|row| {
                let text: String = row.get("text");
                let lower = text.to_lowercase();
                let score: i64 = terms.iter().map(|t| lower.matches(t.as_str()).count() as i64).sum();
                if score == 0 {
                    return None;
                }
                Some(CandidateChunk {
                    chunk_id: row.get("id"),
                    doc_id: row.get("doc_id"),
                    doc_filename: row.get("filename"),
                    chunk_index: row.get("chunk_index"),
                    text,
                    score: score as f64,
                })
            })
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap());
        scored.truncate(limit as usize);
        Ok(scored)
    }

    /// Chunks with ordinals in `[start, end)` for a document, ordinal order.
    pub async fn chunks_range(
        &self,
        doc_id: Uuid,
        start: i32,
        end: i32,
    ) -> CoreResult<Vec<CandidateChunk>> {
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.doc_id, d.filename, c.chunk_index, c.text
            FROM chunks c
            JOIN documents d ON d.id = c.doc_id
            WHERE c.doc_id = $1 AND c.chunk_index >= $2 AND c.chunk_index < $3
            ORDER BY c.chunk_index ASC
            "#,
        )
        .bind(doc_id)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| CandidateChunk {
                chunk_id: row.get("id"),
                doc_id: row.get("doc_id"),
                doc_filename: row.get("filename"),
                chunk_index: row.get("chunk_index"),
                text: row.get("text"),
                score: 0.0,
            })
            .collect())
    }

    pub async fn documents_3d(&self) -> CoreResult<Vec<(Uuid, String)>> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT d.id, d.filename
            FROM documents d
            JOIN chunks c ON c.doc_id = d.id
            JOIN chunks_3d c3 ON c3.chunk_id = c.id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|r| (r.get("id"), r.get("filename"))).collect())
    }

    pub async fn chunks_3d_for_document(&self, doc_id: Uuid) -> CoreResult<Vec<Chunk3D>> {
        let rows = sqlx::query(
            r#"
            SELECT c3.chunk_id, c3.x, c3.y, c3.z
            FROM chunks_3d c3
            JOIN chunks c ON c.id = c3.chunk_id
            WHERE c.doc_id = $1
            ORDER BY c.chunk_index ASC
            "#,
        )
        .bind(doc_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| Chunk3D {
                chunk_id: r.get("chunk_id"),
                x: r.get("x"),
                y: r.get("y"),
                z: r.get("z"),
            })
            .collect())
    }

    /// DELETE all chunks_3d rows then bulk-insert new pairs, in a single
    /// transaction so concurrent readers never see a partially-replaced map.
    pub async fn replace_3d(&self, pairs: &[(i64, f64, f64, f64)]) -> CoreResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM chunks_3d").execute(&mut *tx).await?;
        for (chunk_id, x, y, z) in pairs {
            sqlx::query("INSERT INTO chunks_3d (chunk_id, x, y, z) VALUES ($1, $2, $3, $4)")
                .bind(chunk_id)
                .bind(x)
                .bind(y)
                .bind(z)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// All (chunk_id, embedding) pairs ordered by chunk_id, for the reducer.
    pub async fn all_chunk_vectors(&self) -> CoreResult<Vec<(i64, Vec<f32>)>> {
        let rows = sqlx::query("SELECT id, embedding FROM chunks WHERE embedding IS NOT NULL ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|r| {
                let id: i64 = r.get("id");
                let raw: String = r.get("embedding");
                (id, parse_pgvector_literal(&raw))
            })
            .collect())
    }

    pub async fn list_documents(&self) -> CoreResult<Vec<Document>> {
        let rows = sqlx::query(
            "SELECT id, filename, original_gcs, gcs_generation, processed_gcs, status, error_message, created_at FROM documents ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_document).collect()
    }

    pub async fn get_document(&self, id: Uuid) -> CoreResult<Document> {
        let row = sqlx::query(
            "SELECT id, filename, original_gcs, gcs_generation, processed_gcs, status, error_message, created_at FROM documents WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("document {}", id)))?;
        row_to_document(row)
    }

    /// Cascades to chunks and chunks_3d via the foreign-key ON DELETE
    /// CASCADE constraints (ownership is exclusive — spec section 3).
    pub async fn delete_document(&self, id: Uuid) -> CoreResult<()> {
        let result = sqlx::query("DELETE FROM documents WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound(format!("document {}", id)));
        }
        Ok(())
    }

    pub async fn create_task(&self, task_type: TaskKind, input_data: serde_json::Value) -> CoreResult<Uuid> {
        let task_id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO processing_tasks (task_id, task_type, status, input_data, created_at, updated_at) VALUES ($1, $2, 'queued', $3, now(), now())",
        )
        .bind(task_id)
        .bind(task_type.as_str())
        .bind(&input_data)
        .execute(&self.pool)
        .await?;
        Ok(task_id)
    }

    pub async fn update_task_status(
        &self,
        task_id: Uuid,
        status: TaskStatus,
        result_data: Option<serde_json::Value>,
        error_message: Option<&str>,
    ) -> CoreResult<()> {
        let completed_at = matches!(status, TaskStatus::Completed | TaskStatus::Failed).then(Utc::now);
        sqlx::query(
            r#"
            UPDATE processing_tasks
            SET status = $2, result_data = $3, error_message = $4, updated_at = now(), completed_at = COALESCE($5, completed_at)
            WHERE task_id = $1
            "#,
        )
        .bind(task_id)
        .bind(status.as_str())
        .bind(&result_data)
        .bind(error_message)
        .bind(completed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_task(&self, task_id: Uuid) -> CoreResult<IngestTask> {
        let row = sqlx::query(
            "SELECT task_id, task_type, status, input_data, result_data, error_message, created_at, updated_at, completed_at FROM processing_tasks WHERE task_id = $1",
        )
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("task {}", task_id)))?;
        row_to_task(row)
    }

    pub async fn list_tasks(
        &self,
        kind: Option<TaskKind>,
        status: Option<TaskStatus>,
    ) -> CoreResult<Vec<IngestTask>> {
        let rows = sqlx::query(
            r#"
            SELECT task_id, task_type, status, input_data, result_data, error_message, created_at, updated_at, completed_at
            FROM processing_tasks
            WHERE ($1::text IS NULL OR task_type = $1)
              AND ($2::text IS NULL OR status = $2)
            ORDER BY created_at DESC
            "#,
        )
        .bind(kind.map(|k| k.as_str()))
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_task).collect()
    }
}

fn row_to_document(row: sqlx::postgres::PgRow) -> CoreResult<Document> {
    let status_str: String = row.get("status");
    let status = DocumentStatus::parse(&status_str)
        .ok_or_else(|| CoreError::Fatal(format!("unknown document status '{}'", status_str)))?;
    Ok(Document {
        id: row.get("id"),
        filename: row.get("filename"),
        original_gcs: row.get("original_gcs"),
        gcs_generation: row.get("gcs_generation"),
        processed_gcs: row.get("processed_gcs"),
        status,
        error_message: row.get("error_message"),
        created_at: row.get("created_at"),
    })
}

fn row_to_task(row: sqlx::postgres::PgRow) -> CoreResult<IngestTask> {
    let type_str: String = row.get("task_type");
    let status_str: String = row.get("status");
    Ok(IngestTask {
        task_id: row.get("task_id"),
        task_type: TaskKind::parse(&type_str)
            .ok_or_else(|| CoreError::Fatal(format!("unknown task type '{}'", type_str)))?,
        status: TaskStatus::parse(&status_str)
            .ok_or_else(|| CoreError::Fatal(format!("unknown task status '{}'", status_str)))?,
        input_data: row.get("input_data"),
        result_data: row.get("result_data"),
        error_message: row.get("error_message"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        completed_at: row.get("completed_at"),
    })
}

/// pgvector's text input/output format is `[1,2,3]`.
fn pgvector_literal(v: &[f32]) -> String {
    let mut s = String::with_capacity(v.len() * 8 + 2);
    s.push('[');
    for (i, x) in v.iter().enumerate() {
        if i > 0 {
            s.push(',');
        }
        s.push_str(&x.to_string());
    }
    s.push(']');
    s
}

fn parse_pgvector_literal(s: &str) -> Vec<f32> {
    s.trim_matches(|c| c == '[' || c == ']')
        .split(',')
        .filter(|p| !p.is_empty())
        .filter_map(|p| p.trim().parse::<f32>().ok())
        .collect()
}

const STOPWORDS: &[&str] = &[
    "a", "an", "the", "is", "are", "of", "to", "in", "on", "for", "and", "or", "with", "how",
    "do", "i", "what",
];

fn tokenize_query(query: &str) -> Vec<String> {
    query
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty() && !STOPWORDS.contains(w))
        .map(|w| w.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pgvector_roundtrip() {
        let v = vec![1.0f32, -2.5, 0.0, 3.125];
        let literal = pgvector_literal(&v);
        assert_eq!(literal, "[1,-2.5,0,3.125]");
        let parsed = parse_pgvector_literal(&literal);
        assert_eq!(parsed, v);
    }

    #[test]
    fn tokenize_query_strips_stopwords() {
        let terms = tokenize_query("How do I create a google_storage_bucket resource?");
        assert!(terms.contains(&"create".to_string()));
        assert!(terms.contains(&"google_storage_bucket".to_string()));
        assert!(!terms.contains(&"how".to_string()));
        assert!(!terms.contains(&"a".to_string()));
    }
}
