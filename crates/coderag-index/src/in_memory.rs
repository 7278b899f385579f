use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{IndexError, Result};
use crate::store::{
    BoxFuture, FileState, IndexRecord, IndexStats, ScoredRecord, VectorIndex, check_dimension,
    cosine_similarity, rank,
};

#[derive(Default)]
struct Inner {
    dimension: Option<usize>,
    records: HashMap<String, IndexRecord>,
    files: HashMap<String, FileState>,
}

impl Inner {
    fn insert(&mut self, records: Vec<IndexRecord>) -> Result<()> {
        self.dimension = check_dimension(self.dimension, &records)?;
        for record in records {
            self.records.insert(record.chunk.id.clone(), record);
        }
        Ok(())
    }

    fn delete_file(&mut self, file_path: &str) -> usize {
        let before = self.records.len();
        self.records.retain(|_, r| r.chunk.file_path != file_path);
        before - self.records.len()
    }
}

/// Process-local [`VectorIndex`] backed by a hash map; nothing is persisted.
pub struct InMemoryVectorIndex {
    inner: RwLock<Inner>,
}

impl InMemoryVectorIndex {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|e| IndexError::Other(format!("index lock poisoned: {e}")))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|e| IndexError::Other(format!("index lock poisoned: {e}")))
    }
}

impl Default for InMemoryVectorIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryVectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryVectorIndex").finish_non_exhaustive()
    }
}

impl VectorIndex for InMemoryVectorIndex {
    fn initialize(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async { Ok(()) })
    }

    fn dimension(&self) -> BoxFuture<'_, Result<Option<usize>>> {
        Box::pin(async move { Ok(self.read()?.dimension) })
    }

    fn upsert(&self, records: Vec<IndexRecord>) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move { self.write()?.insert(records) })
    }

    fn delete_by_file(&self, file_path: &str) -> BoxFuture<'_, Result<usize>> {
        let file_path = file_path.to_owned();
        Box::pin(async move { Ok(self.write()?.delete_file(&file_path)) })
    }

    fn replace_file(
        &self,
        state: FileState,
        records: Vec<IndexRecord>,
    ) -> BoxFuture<'_, Result<usize>> {
        Box::pin(async move {
            let mut inner = self.write()?;
            // validate before mutating so a failed write leaves the old set in place
            let dimension = check_dimension(inner.dimension, &records)?;
            let removed = inner.delete_file(&state.path);
            inner.dimension = dimension;
            for record in records {
                inner.records.insert(record.chunk.id.clone(), record);
            }
            inner.files.insert(state.path.clone(), state);
            Ok(removed)
        })
    }

    fn remove_file(&self, file_path: &str) -> BoxFuture<'_, Result<usize>> {
        let file_path = file_path.to_owned();
        Box::pin(async move {
            let mut inner = self.write()?;
            let removed = inner.delete_file(&file_path);
            inner.files.remove(&file_path);
            Ok(removed)
        })
    }

    fn search_similar(
        &self,
        query: Vec<f32>,
        k: usize,
    ) -> BoxFuture<'_, Result<Vec<ScoredRecord>>> {
        Box::pin(async move {
            let inner = self.read()?;
            if let Some(expected) = inner.dimension
                && expected != query.len()
            {
                return Err(IndexError::DimensionMismatch {
                    expected,
                    actual: query.len(),
                });
            }
            let mut scored: Vec<ScoredRecord> = inner
                .records
                .values()
                .map(|r| ScoredRecord {
                    chunk: r.chunk.clone(),
                    score: cosine_similarity(&query, &r.vector),
                    embedding_truncated: r.embedding_truncated,
                })
                .collect();
            rank(&mut scored, k);
            Ok(scored)
        })
    }

    fn file_states(&self) -> BoxFuture<'_, Result<HashMap<String, FileState>>> {
        Box::pin(async move { Ok(self.read()?.files.clone()) })
    }

    fn stats(&self) -> BoxFuture<'_, Result<IndexStats>> {
        Box::pin(async move {
            let inner = self.read()?;
            let mut files: Vec<&str> = inner
                .records
                .values()
                .map(|r| r.chunk.file_path.as_str())
                .collect();
            files.sort_unstable();
            files.dedup();
            Ok(IndexStats {
                chunks: inner.records.len(),
                files: files.len(),
                dimension: inner.dimension,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::record;

    fn state(path: &str, hash: &str, records: &[IndexRecord]) -> FileState {
        FileState {
            path: path.into(),
            content_hash: hash.into(),
            chunk_ids: records.iter().map(|r| r.chunk.id.clone()).collect(),
        }
    }

    #[tokio::test]
    async fn upsert_and_search_best_first() {
        let index = InMemoryVectorIndex::new();
        index
            .upsert(vec![
                record("a.rs", 1, "alpha", vec![1.0, 0.0, 0.0]),
                record("a.rs", 2, "beta", vec![0.0, 1.0, 0.0]),
                record("b.rs", 1, "gamma", vec![0.7, 0.7, 0.0]),
            ])
            .await
            .unwrap();

        let results = index.search_similar(vec![1.0, 0.0, 0.0], 2).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].chunk.content, "alpha");
        assert_eq!(results[1].chunk.content, "gamma");
        assert!((results[0].score - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn upsert_same_id_overwrites() {
        let index = InMemoryVectorIndex::new();
        let mut r = record("a.rs", 1, "alpha", vec![1.0, 0.0]);
        index.upsert(vec![r.clone()]).await.unwrap();
        r.vector = vec![0.0, 1.0];
        index.upsert(vec![r]).await.unwrap();
        assert_eq!(index.stats().await.unwrap().chunks, 1);
        let top = index.search_similar(vec![0.0, 1.0], 1).await.unwrap();
        assert!((top[0].score - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn replace_file_leaves_other_files() {
        let index = InMemoryVectorIndex::new();
        let a = vec![record("a.rs", 1, "old a", vec![1.0, 0.0])];
        let b = vec![record("b.rs", 1, "b", vec![0.0, 1.0])];
        index.replace_file(state("a.rs", "h1", &a), a).await.unwrap();
        index.replace_file(state("b.rs", "h2", &b), b).await.unwrap();

        let new_a = vec![
            record("a.rs", 1, "new a", vec![1.0, 0.0]),
            record("a.rs", 2, "new a2", vec![1.0, 0.1]),
        ];
        let removed = index
            .replace_file(state("a.rs", "h3", &new_a), new_a)
            .await
            .unwrap();
        assert_eq!(removed, 1);

        let stats = index.stats().await.unwrap();
        assert_eq!(stats.chunks, 3);
        assert_eq!(stats.files, 2);
        let states = index.file_states().await.unwrap();
        assert_eq!(states["a.rs"].content_hash, "h3");
        assert_eq!(states["a.rs"].chunk_ids.len(), 2);
        assert_eq!(states["b.rs"].content_hash, "h2");
    }

    #[tokio::test]
    async fn mismatched_replace_keeps_previous_set() {
        let index = InMemoryVectorIndex::new();
        let a = vec![record("a.rs", 1, "a", vec![1.0, 0.0])];
        index.replace_file(state("a.rs", "h1", &a), a).await.unwrap();

        let bad = vec![record("a.rs", 1, "a2", vec![1.0, 0.0, 0.0])];
        let err = index
            .replace_file(state("a.rs", "h2", &bad), bad)
            .await
            .unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(index.stats().await.unwrap().chunks, 1);
        assert_eq!(index.file_states().await.unwrap()["a.rs"].content_hash, "h1");
    }

    #[tokio::test]
    async fn remove_file_drops_chunks_and_state() {
        let index = InMemoryVectorIndex::new();
        let a = vec![record("a.rs", 1, "a", vec![1.0, 0.0])];
        index.replace_file(state("a.rs", "h1", &a), a).await.unwrap();
        assert_eq!(index.remove_file("a.rs").await.unwrap(), 1);
        assert!(index.file_states().await.unwrap().is_empty());
        assert!(index.search_similar(vec![1.0, 0.0], 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn query_with_wrong_dimension_fails() {
        let index = InMemoryVectorIndex::new();
        index
            .upsert(vec![record("a.rs", 1, "a", vec![1.0, 0.0])])
            .await
            .unwrap();
        let err = index.search_similar(vec![1.0], 1).await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn delete_by_file_counts() {
        let index = InMemoryVectorIndex::new();
        index
            .upsert(vec![
                record("a.rs", 1, "a", vec![1.0]),
                record("a.rs", 2, "b", vec![1.0]),
                record("c.rs", 1, "c", vec![1.0]),
            ])
            .await
            .unwrap();
        assert_eq!(index.delete_by_file("a.rs").await.unwrap(), 2);
        assert_eq!(index.stats().await.unwrap().chunks, 1);
    }
}
