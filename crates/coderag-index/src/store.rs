//! Vector index contract shared by the `SQLite` and in-memory backends.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use crate::chunker::Chunk;
use crate::error::{IndexError, Result};

pub(crate) type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A chunk with its embedding, as persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexRecord {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
    /// The embedded text was head-truncated to the model's input limit.
    pub embedding_truncated: bool,
}

/// Per-file bookkeeping used to skip unchanged files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileState {
    pub path: String,
    pub content_hash: String,
    pub chunk_ids: Vec<String>,
}

/// A stored chunk with its similarity to a query vector.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredRecord {
    pub chunk: Chunk,
    pub score: f32,
    /// The stored vector was computed from head-truncated text.
    pub embedding_truncated: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexStats {
    pub chunks: usize,
    pub files: usize,
    /// `None` until the first vector is written.
    pub dimension: Option<usize>,
}

/// Persistent chunk/vector store with cosine similarity search.
///
/// Writes are visible to subsequent reads through the same instance.
pub trait VectorIndex: Send + Sync {
    /// Open or create the backing tables. Idempotent.
    fn initialize(&self) -> BoxFuture<'_, Result<()>>;

    /// Recorded vector dimensionality, fixed by the first write.
    fn dimension(&self) -> BoxFuture<'_, Result<Option<usize>>>;

    /// Insert records, overwriting any with the same chunk id.
    fn upsert(&self, records: Vec<IndexRecord>) -> BoxFuture<'_, Result<()>>;

    /// Remove every record of `file_path`, returning how many were removed.
    fn delete_by_file(&self, file_path: &str) -> BoxFuture<'_, Result<usize>>;

    /// Atomically swap a file's chunk set and its [`FileState`]. Returns the number of
    /// records removed. On error the previous chunk set is left intact.
    fn replace_file(
        &self,
        state: FileState,
        records: Vec<IndexRecord>,
    ) -> BoxFuture<'_, Result<usize>>;

    /// Atomically remove a file's chunks and its [`FileState`].
    fn remove_file(&self, file_path: &str) -> BoxFuture<'_, Result<usize>>;

    /// The `k` records most similar to `query`, best first; equal scores ordered by id.
    fn search_similar(&self, query: Vec<f32>, k: usize)
    -> BoxFuture<'_, Result<Vec<ScoredRecord>>>;

    fn file_states(&self) -> BoxFuture<'_, Result<HashMap<String, FileState>>>;

    fn stats(&self) -> BoxFuture<'_, Result<IndexStats>>;
}

pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Sort best-first with id as tie-break, then keep `k`.
pub(crate) fn rank(scored: &mut Vec<ScoredRecord>, k: usize) {
    scored.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.chunk.id.cmp(&b.chunk.id))
    });
    scored.truncate(k);
}

/// Validate `records` against the recorded dimension, returning the dimension after the write.
pub(crate) fn check_dimension(recorded: Option<usize>, records: &[IndexRecord]) -> Result<Option<usize>> {
    let mut dimension = recorded;
    for record in records {
        let actual = record.vector.len();
        if actual == 0 {
            return Err(IndexError::Other(format!(
                "empty embedding vector for chunk {}",
                record.chunk.id
            )));
        }
        match dimension {
            Some(expected) if expected != actual => {
                return Err(IndexError::DimensionMismatch { expected, actual });
            }
            Some(_) => {}
            None => dimension = Some(actual),
        }
    }
    Ok(dimension)
}

pub(crate) fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

pub(crate) fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}


#[cfg(test)]
mod tests {
    use super::test_support::record;
    use super::*;

    #[test]
    fn cosine_identical_and_orthogonal() {
        assert!((cosine_similarity(&[1.0, 2.0], &[1.0, 2.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!(cosine_similarity(&[], &[]).abs() < f32::EPSILON);
        assert!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]).abs() < f32::EPSILON);
    }

    #[test]
    fn rank_breaks_ties_by_id() {
        let mut a = record("a.rs", 1, "x", vec![1.0]);
        a.chunk.id = "b".into();
        let mut b = record("a.rs", 2, "y", vec![1.0]);
        b.chunk.id = "a".into();
        let mut scored = vec![
            ScoredRecord {
                chunk: a.chunk,
                score: 0.5,
                embedding_truncated: false,
            },
            ScoredRecord {
                chunk: b.chunk,
                score: 0.5,
                embedding_truncated: false,
            },
        ];
        rank(&mut scored, 1);
        assert_eq!(scored.len(), 1);
        assert_eq!(scored[0].chunk.id, "a");
    }

    #[test]
    fn dimension_set_by_first_record() {
        let records = vec![record("a.rs", 1, "x", vec![0.0; 3])];
        assert_eq!(check_dimension(None, &records).unwrap(), Some(3));
    }

    #[test]
    fn dimension_mismatch_rejected() {
        let records = vec![record("a.rs", 1, "x", vec![0.0; 4])];
        let err = check_dimension(Some(3), &records).unwrap_err();
        assert!(matches!(
            err,
            IndexError::DimensionMismatch {
                expected: 3,
                actual: 4
            }
        ));
    }

    #[test]
    fn ragged_batch_rejected_on_first_write() {
        let records = vec![
            record("a.rs", 1, "x", vec![0.0; 2]),
            record("a.rs", 2, "y", vec![0.0; 5]),
        ];
        assert!(check_dimension(None, &records).unwrap_err().is_fatal());
    }

    #[test]
    fn blob_roundtrip_preserves_values() {
        let v = vec![0.25, -1.5, f32::MAX];
        assert_eq!(blob_to_vec(&vec_to_blob(&v)), v);
    }
}
