//! `SQLite`-backed [`VectorIndex`]: chunk rows with little-endian `f32` vector blobs.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::{SqliteConnection, SqlitePool};
use tokio::sync::Mutex;

use crate::chunker::{Chunk, ChunkKind};
use crate::error::{IndexError, Result};
use crate::languages::Lang;
use crate::store::{
    BoxFuture, FileState, IndexRecord, IndexStats, ScoredRecord, VectorIndex, blob_to_vec,
    check_dimension, cosine_similarity, rank, vec_to_blob,
};

const DIMENSION_KEY: &str = "dimension";

const CHUNK_COLUMNS: &str = "id, file_path, language, kind, name, scope_chain, content, \
     start_line, end_line, token_count, content_hash, oversized, embedding_truncated, vector";

#[derive(sqlx::FromRow)]
struct ChunkRow {
    id: String,
    file_path: String,
    language: Option<String>,
    kind: String,
    name: Option<String>,
    scope_chain: String,
    content: String,
    start_line: i64,
    end_line: i64,
    token_count: i64,
    content_hash: String,
    oversized: bool,
    embedding_truncated: bool,
    vector: Vec<u8>,
}

impl ChunkRow {
    /// Chunk, truncation flag and vector.
    fn into_parts(self) -> Result<(Chunk, bool, Vec<f32>)> {
        let kind = ChunkKind::from_id(&self.kind)
            .ok_or_else(|| IndexError::Other(format!("unknown chunk kind {}", self.kind)))?;
        let chunk = Chunk {
            id: self.id,
            file_path: self.file_path,
            language: self.language.as_deref().and_then(Lang::from_id),
            kind,
            name: self.name,
            scope_chain: self.scope_chain,
            content: self.content,
            start_line: usize::try_from(self.start_line)?,
            end_line: usize::try_from(self.end_line)?,
            token_count: usize::try_from(self.token_count)?,
            content_hash: self.content_hash,
            oversized: self.oversized,
        };
        Ok((chunk, self.embedding_truncated, blob_to_vec(&self.vector)))
    }
}

/// Vector index stored in a single `SQLite` database file.
///
/// Similarity search is an exact cosine scan over all stored vectors. Writes are serialized
/// through one lock and each per-file replacement runs in a transaction.
#[derive(Debug)]
pub struct SqliteVectorIndex {
    pool: SqlitePool,
    write_lock: Mutex<()>,
}

impl SqliteVectorIndex {
    /// Open (or create) the database at `path`. `":memory:"` opens a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if the parent directory cannot be created or the database cannot be opened.
    pub async fn open(path: &str) -> Result<Self> {
        let (url, max_connections) = if path == ":memory:" {
            ("sqlite::memory:".to_owned(), 1)
        } else {
            if let Some(parent) = Path::new(path).parent()
                && !parent.as_os_str().is_empty()
            {
                tokio::fs::create_dir_all(parent).await?;
            }
            (format!("sqlite:{path}?mode=rwc"), 4)
        };

        let opts = SqliteConnectOptions::from_str(&url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(opts)
            .await?;

        Ok(Self {
            pool,
            write_lock: Mutex::new(()),
        })
    }

    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

async fn read_dimension(conn: &mut SqliteConnection) -> Result<Option<usize>> {
    let value: Option<String> =
        sqlx::query_scalar("SELECT value FROM index_meta WHERE key = ?")
            .bind(DIMENSION_KEY)
            .fetch_optional(&mut *conn)
            .await?;
    value
        .map(|v| {
            v.parse::<usize>()
                .map_err(|e| IndexError::Other(format!("corrupt dimension {v:?}: {e}")))
        })
        .transpose()
}

/// Validate and insert `records`, recording the dimension on the first write.
async fn write_records(conn: &mut SqliteConnection, records: &[IndexRecord]) -> Result<()> {
    let recorded = read_dimension(conn).await?;
    let dimension = check_dimension(recorded, records)?;
    if recorded.is_none()
        && let Some(d) = dimension
    {
        sqlx::query("INSERT OR REPLACE INTO index_meta (key, value) VALUES (?, ?)")
            .bind(DIMENSION_KEY)
            .bind(d.to_string())
            .execute(&mut *conn)
            .await
            .map_err(IndexError::IndexWrite)?;
    }

    for record in records {
        let chunk = &record.chunk;
        sqlx::query(
            "INSERT OR REPLACE INTO chunks (id, file_path, language, kind, name, scope_chain, \
             content, start_line, end_line, token_count, content_hash, oversized, \
             embedding_truncated, vector) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&chunk.id)
        .bind(&chunk.file_path)
        .bind(chunk.language.map(Lang::id))
        .bind(chunk.kind.as_str())
        .bind(chunk.name.as_deref())
        .bind(&chunk.scope_chain)
        .bind(&chunk.content)
        .bind(i64::try_from(chunk.start_line)?)
        .bind(i64::try_from(chunk.end_line)?)
        .bind(i64::try_from(chunk.token_count)?)
        .bind(&chunk.content_hash)
        .bind(chunk.oversized)
        .bind(record.embedding_truncated)
        .bind(vec_to_blob(&record.vector))
        .execute(&mut *conn)
        .await
        .map_err(IndexError::IndexWrite)?;
    }
    Ok(())
}

async fn delete_chunks(conn: &mut SqliteConnection, file_path: &str) -> Result<usize> {
    let result = sqlx::query("DELETE FROM chunks WHERE file_path = ?")
        .bind(file_path)
        .execute(&mut *conn)
        .await
        .map_err(IndexError::IndexWrite)?;
    Ok(usize::try_from(result.rows_affected())?)
}

impl VectorIndex for SqliteVectorIndex {
    fn initialize(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            sqlx::migrate!("./migrations").run(&self.pool).await?;
            Ok(())
        })
    }

    fn dimension(&self) -> BoxFuture<'_, Result<Option<usize>>> {
        Box::pin(async move {
            let mut conn = self.pool.acquire().await?;
            read_dimension(&mut conn).await
        })
    }

    fn upsert(&self, records: Vec<IndexRecord>) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if records.is_empty() {
                return Ok(());
            }
            let _guard = self.write_lock.lock().await;
            let mut tx = self.pool.begin().await.map_err(IndexError::IndexWrite)?;
            write_records(&mut tx, &records).await?;
            tx.commit().await.map_err(IndexError::IndexWrite)?;
            Ok(())
        })
    }

    fn delete_by_file(&self, file_path: &str) -> BoxFuture<'_, Result<usize>> {
        let file_path = file_path.to_owned();
        Box::pin(async move {
            let _guard = self.write_lock.lock().await;
            let mut conn = self.pool.acquire().await?;
            delete_chunks(&mut conn, &file_path).await
        })
    }

    fn replace_file(
        &self,
        state: FileState,
        records: Vec<IndexRecord>,
    ) -> BoxFuture<'_, Result<usize>> {
        Box::pin(async move {
            let chunk_ids = serde_json::to_string(&state.chunk_ids)?;
            let _guard = self.write_lock.lock().await;
            let mut tx = self.pool.begin().await.map_err(IndexError::IndexWrite)?;

            let removed = delete_chunks(&mut tx, &state.path).await?;
            write_records(&mut tx, &records).await?;
            sqlx::query(
                "INSERT OR REPLACE INTO file_state (path, content_hash, chunk_ids) VALUES (?, ?, ?)",
            )
            .bind(&state.path)
            .bind(&state.content_hash)
            .bind(chunk_ids)
            .execute(&mut *tx)
            .await
            .map_err(IndexError::IndexWrite)?;

            tx.commit().await.map_err(IndexError::IndexWrite)?;
            Ok(removed)
        })
    }

    fn remove_file(&self, file_path: &str) -> BoxFuture<'_, Result<usize>> {
        let file_path = file_path.to_owned();
        Box::pin(async move {
            let _guard = self.write_lock.lock().await;
            let mut tx = self.pool.begin().await.map_err(IndexError::IndexWrite)?;
            let removed = delete_chunks(&mut tx, &file_path).await?;
            sqlx::query("DELETE FROM file_state WHERE path = ?")
                .bind(&file_path)
                .execute(&mut *tx)
                .await
                .map_err(IndexError::IndexWrite)?;
            tx.commit().await.map_err(IndexError::IndexWrite)?;
            Ok(removed)
        })
    }

    fn search_similar(
        &self,
        query: Vec<f32>,
        k: usize,
    ) -> BoxFuture<'_, Result<Vec<ScoredRecord>>> {
        Box::pin(async move {
            let mut conn = self.pool.acquire().await?;
            if let Some(expected) = read_dimension(&mut conn).await?
                && expected != query.len()
            {
                return Err(IndexError::DimensionMismatch {
                    expected,
                    actual: query.len(),
                });
            }
            if k == 0 {
                return Ok(Vec::new());
            }

            let rows: Vec<ChunkRow> =
                sqlx::query_as(&format!("SELECT {CHUNK_COLUMNS} FROM chunks"))
                    .fetch_all(&mut *conn)
                    .await?;

            let mut scored = Vec::with_capacity(rows.len());
            for row in rows {
                let (chunk, embedding_truncated, vector) = row.into_parts()?;
                let score = cosine_similarity(&query, &vector);
                scored.push(ScoredRecord {
                    chunk,
                    score,
                    embedding_truncated,
                });
            }
            rank(&mut scored, k);
            Ok(scored)
        })
    }

    fn file_states(&self) -> BoxFuture<'_, Result<HashMap<String, FileState>>> {
        Box::pin(async move {
            let rows: Vec<(String, String, String)> =
                sqlx::query_as("SELECT path, content_hash, chunk_ids FROM file_state")
                    .fetch_all(&self.pool)
                    .await?;
            let mut states = HashMap::with_capacity(rows.len());
            for (path, content_hash, chunk_ids) in rows {
                let chunk_ids: Vec<String> = serde_json::from_str(&chunk_ids)?;
                states.insert(
                    path.clone(),
                    FileState {
                        path,
                        content_hash,
                        chunk_ids,
                    },
                );
            }
            Ok(states)
        })
    }

    fn stats(&self) -> BoxFuture<'_, Result<IndexStats>> {
        Box::pin(async move {
            let (chunks, files): (i64, i64) =
                sqlx::query_as("SELECT COUNT(*), COUNT(DISTINCT file_path) FROM chunks")
                    .fetch_one(&self.pool)
                    .await?;
            let dimension = self.dimension().await?;
            Ok(IndexStats {
                chunks: usize::try_from(chunks)?,
                files: usize::try_from(files)?,
                dimension,
            })
        })
    }
}
