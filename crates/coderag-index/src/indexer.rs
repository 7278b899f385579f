//! Repository indexing: walk → hash → chunk → embed → replace, one file at a time.

use std::collections::{HashMap, HashSet};
use std::path::{Component, Path};
use std::sync::Arc;
use std::time::Instant;

use coderag_llm::{EmbeddingGateway, EmbeddingProvider};
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use ignore::gitignore::GitignoreBuilder;
use tokio::sync::watch;

use crate::chunker::{FallbackReason, chunk_file, content_hash};
use crate::context::contextualize_for_embedding;
use crate::error::{IndexError, Result};
use crate::store::{FileState, IndexRecord, VectorIndex};

/// Bytes inspected for a NUL when sniffing binary content.
const BINARY_SNIFF_LEN: usize = 8 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexerConfig {
    /// Token budget handed to the chunker.
    pub max_chunk_tokens: usize,
    /// Files larger than this many bytes are skipped.
    pub max_file_size: u64,
    /// Files processed concurrently.
    pub file_parallelism: usize,
    /// Repository-specific ignore file, honored alongside `.gitignore`.
    pub ignore_filename: String,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            max_chunk_tokens: 500,
            max_file_size: 1024 * 1024,
            file_parallelism: 4,
            ignore_filename: ".coderagignore".into(),
        }
    }
}

/// Summary of an indexing run.
///
/// Every walked file of a completed run lands in exactly one of `files_indexed`, `files_skipped`
/// or `errors`. Stale files found only in the index count in `files_removed` alone.
#[derive(Debug, Clone, Default)]
pub struct IndexSummary {
    pub files_scanned: usize,
    pub files_indexed: usize,
    /// Unchanged, excluded, binary or oversized files.
    pub files_skipped: usize,
    pub files_removed: usize,
    pub chunks_written: usize,
    pub chunks_removed: usize,
    /// `(path, message)` for every file that failed.
    pub errors: Vec<(String, String)>,
    pub duration_ms: u64,
    /// The run stopped early on a shutdown signal; stale files were not cleaned up.
    pub cancelled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    TooLarge { size: u64 },
    Binary,
    Excluded,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TooLarge { size } => write!(f, "file too large ({size} bytes)"),
            Self::Binary => f.write_str("binary file"),
            Self::Excluded => f.write_str("excluded by ignore rules"),
        }
    }
}

/// What happened to a single file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    /// Content hash matched the recorded state; nothing was parsed or embedded.
    Unchanged,
    Indexed {
        chunks_written: usize,
        chunks_removed: usize,
    },
    /// A previously indexed file that is gone or now excluded.
    Removed { chunks_removed: usize },
    Skipped { reason: SkipReason },
}

/// Drives chunking, embedding and index writes over a repository.
pub struct RepositoryIndexer<P> {
    index: Arc<dyn VectorIndex>,
    gateway: Arc<EmbeddingGateway<P>>,
    config: IndexerConfig,
}

impl<P> std::fmt::Debug for RepositoryIndexer<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositoryIndexer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<P: EmbeddingProvider> RepositoryIndexer<P> {
    #[must_use]
    pub fn new(
        index: Arc<dyn VectorIndex>,
        gateway: Arc<EmbeddingGateway<P>>,
        config: IndexerConfig,
    ) -> Self {
        Self {
            index,
            gateway,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    #[must_use]
    pub fn index(&self) -> &Arc<dyn VectorIndex> {
        &self.index
    }

    /// Incrementally index every file under `root`.
    ///
    /// Unchanged files cost one hash and no embedding calls. Changed files get their chunk set
    /// swapped atomically. Files recorded in the index but no longer found are removed, unless
    /// the run was cancelled through `shutdown`.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be read or a fatal error (dimension mismatch)
    /// occurs. Per-file failures are collected in [`IndexSummary::errors`] instead.
    pub async fn index_repository(
        &self,
        root: &Path,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<IndexSummary> {
        let start = Instant::now();
        let mut summary = IndexSummary::default();

        self.index.initialize().await?;
        let states = self.index.file_states().await?;

        let files = walk_repository(root, &self.config.ignore_filename).await?;
        let total = files.len();
        summary.files_scanned = total;
        tracing::info!(root = %root.display(), total, "indexing started");

        let mut seen: HashSet<&str> = HashSet::with_capacity(total);
        let mut pending = files.iter();
        let mut in_flight = FuturesUnordered::new();
        let mut done = 0usize;

        loop {
            while !summary.cancelled && in_flight.len() < self.config.file_parallelism.max(1) {
                if *shutdown.borrow() {
                    tracing::info!(done, total, "indexing cancelled");
                    summary.cancelled = true;
                    break;
                }
                let Some(rel) = pending.next() else {
                    break;
                };
                let previous = states.get(rel);
                in_flight.push(async move { (rel, self.process_file(root, rel, previous).await) });
            }

            let Some((rel, result)) = in_flight.next().await else {
                break;
            };
            done += 1;
            seen.insert(rel.as_str());

            match result {
                Ok(outcome) => {
                    tally(&mut summary, &outcome);
                    let progress = format!("{done}/{total}");
                    tracing::info!(file = %rel, %progress, ?outcome, "file processed");
                }
                Err(e) if e.is_fatal() => {
                    tracing::error!(file = %rel, "fatal indexing error: {e}");
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(file = %rel, "indexing failed: {e}");
                    summary.errors.push((rel.clone(), e.to_string()));
                }
            }
        }

        if !summary.cancelled {
            self.remove_stale(&states, &seen, &mut summary).await;
        }

        summary.duration_ms = start.elapsed().as_millis().try_into().unwrap_or(u64::MAX);
        tracing::info!(
            indexed = summary.files_indexed,
            skipped = summary.files_skipped,
            removed = summary.files_removed,
            chunks = summary.chunks_written,
            errors = summary.errors.len(),
            duration_ms = summary.duration_ms,
            "indexing finished"
        );
        Ok(summary)
    }

    /// Re-index one file after a change, or drop it if it was deleted or is now excluded.
    ///
    /// Exclusion is evaluated against hidden path components plus the `.gitignore` and
    /// ignore file at `root`; nested ignore files are only honored by a full run.
    ///
    /// # Errors
    ///
    /// Returns an error if `abs_path` is outside `root` or the file cannot be processed.
    pub async fn reindex_file(&self, root: &Path, abs_path: &Path) -> Result<FileOutcome> {
        let rel = relative_path(root, abs_path)?;
        let states = self.index.file_states().await?;
        let previous = states.get(&rel);

        let exists = tokio::fs::metadata(abs_path)
            .await
            .is_ok_and(|m| m.is_file());
        if !exists || is_excluded(root, &rel, &self.config.ignore_filename) {
            return match previous {
                Some(_) => {
                    let chunks_removed = self.index.remove_file(&rel).await?;
                    tracing::info!(file = %rel, chunks_removed, "file removed from index");
                    Ok(FileOutcome::Removed { chunks_removed })
                }
                None => Ok(FileOutcome::Skipped {
                    reason: SkipReason::Excluded,
                }),
            };
        }

        self.process_file(root, &rel, previous).await
    }

    async fn process_file(
        &self,
        root: &Path,
        rel: &str,
        previous: Option<&FileState>,
    ) -> Result<FileOutcome> {
        let abs = root.join(rel);
        let size = tokio::fs::metadata(&abs).await?.len();
        if size > self.config.max_file_size {
            return self
                .skip(rel, previous, SkipReason::TooLarge { size })
                .await;
        }

        let Some(text) = decode_text(tokio::fs::read(&abs).await?) else {
            return self.skip(rel, previous, SkipReason::Binary).await;
        };

        let hash = content_hash(&text);
        if previous.is_some_and(|state| state.content_hash == hash) {
            return Ok(FileOutcome::Unchanged);
        }

        let path = rel.to_owned();
        let max_tokens = self.config.max_chunk_tokens;
        let chunked = tokio::task::spawn_blocking(move || chunk_file(&path, &text, max_tokens))
            .await
            .map_err(|e| IndexError::Other(format!("chunking task failed: {e}")))?;

        match &chunked.fallback {
            Some(FallbackReason::ParseFailure(msg)) => {
                tracing::warn!(file = %rel, "parse failed, using line windows: {msg}");
            }
            Some(FallbackReason::Unsupported) => {
                tracing::debug!(file = %rel, "no grammar, using line windows");
            }
            None => {}
        }

        let texts: Vec<String> = chunked
            .chunks
            .iter()
            .map(contextualize_for_embedding)
            .collect();
        let embeddings = self.gateway.embed(&texts).await?;

        let state = FileState {
            path: rel.to_owned(),
            content_hash: hash,
            chunk_ids: chunked.chunks.iter().map(|c| c.id.clone()).collect(),
        };
        let records: Vec<IndexRecord> = chunked
            .chunks
            .into_iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| IndexRecord {
                chunk,
                vector: embedding.vector,
                embedding_truncated: embedding.truncated,
            })
            .collect();

        let chunks_written = records.len();
        let chunks_removed = self.index.replace_file(state, records).await?;
        tracing::debug!(file = %rel, chunks_written, chunks_removed, "file indexed");
        Ok(FileOutcome::Indexed {
            chunks_written,
            chunks_removed,
        })
    }

    async fn skip(
        &self,
        rel: &str,
        previous: Option<&FileState>,
        reason: SkipReason,
    ) -> Result<FileOutcome> {
        tracing::debug!(file = %rel, %reason, "file skipped");
        if previous.is_none() {
            return Ok(FileOutcome::Skipped { reason });
        }
        let chunks_removed = self.index.remove_file(rel).await?;
        Ok(FileOutcome::Removed { chunks_removed })
    }

    async fn remove_stale(
        &self,
        states: &HashMap<String, FileState>,
        seen: &HashSet<&str>,
        summary: &mut IndexSummary,
    ) {
        let mut stale: Vec<&String> = states
            .keys()
            .filter(|path| !seen.contains(path.as_str()))
            .collect();
        stale.sort();

        for path in stale {
            match self.index.remove_file(path).await {
                Ok(n) => {
                    tracing::info!(file = %path, chunks_removed = n, "stale file removed");
                    summary.files_removed += 1;
                    summary.chunks_removed += n;
                }
                Err(e) => {
                    tracing::warn!(file = %path, "stale cleanup failed: {e}");
                    summary.errors.push((path.clone(), format!("cleanup: {e}")));
                }
            }
        }
    }
}

fn tally(summary: &mut IndexSummary, outcome: &FileOutcome) {
    match outcome {
        FileOutcome::Unchanged | FileOutcome::Skipped { .. } => summary.files_skipped += 1,
        FileOutcome::Indexed {
            chunks_written,
            chunks_removed,
        } => {
            summary.files_indexed += 1;
            summary.chunks_written += chunks_written;
            summary.chunks_removed += chunks_removed;
        }
        FileOutcome::Removed { chunks_removed } => {
            summary.files_skipped += 1;
            summary.files_removed += 1;
            summary.chunks_removed += chunks_removed;
        }
    }
}

/// Relative paths of indexable candidates under `root`, sorted.
async fn walk_repository(root: &Path, ignore_filename: &str) -> Result<Vec<String>> {
    if !root.is_dir() {
        return Err(IndexError::Other(format!(
            "not a directory: {}",
            root.display()
        )));
    }
    let root = root.to_path_buf();
    let ignore_filename = ignore_filename.to_owned();
    tokio::task::spawn_blocking(move || {
        let mut files: Vec<String> = ignore::WalkBuilder::new(&root)
            .hidden(true)
            .git_ignore(true)
            .require_git(false)
            .add_custom_ignore_filename(&ignore_filename)
            .build()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    tracing::warn!("walk error: {e}");
                    None
                }
            })
            .filter(|e| e.file_type().is_some_and(|ft| ft.is_file()))
            .filter_map(|e| relative_path(&root, e.path()).ok())
            .collect();
        files.sort();
        files
    })
    .await
    .map_err(|e| IndexError::Other(format!("walk task failed: {e}")))
}

fn relative_path(root: &Path, abs_path: &Path) -> Result<String> {
    let rel = abs_path.strip_prefix(root).map_err(|_| {
        IndexError::Other(format!(
            "{} is outside {}",
            abs_path.display(),
            root.display()
        ))
    })?;
    let parts: Vec<String> = rel
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    if parts.is_empty() {
        return Err(IndexError::Other(format!("{} is not a file", abs_path.display())));
    }
    Ok(parts.join("/"))
}

fn is_hidden(rel: &str) -> bool {
    rel.split('/').any(|part| part.starts_with('.'))
}

fn is_excluded(root: &Path, rel: &str, ignore_filename: &str) -> bool {
    if is_hidden(rel) {
        return true;
    }
    let mut builder = GitignoreBuilder::new(root);
    for name in [".gitignore", ignore_filename] {
        let file = root.join(name);
        if file.is_file()
            && let Some(e) = builder.add(&file)
        {
            tracing::warn!(file = %file.display(), "invalid ignore file: {e}");
        }
    }
    match builder.build() {
        Ok(matcher) => matcher
            .matched_path_or_any_parents(rel, false)
            .is_ignore(),
        Err(e) => {
            tracing::warn!("ignore rules unavailable: {e}");
            false
        }
    }
}

/// UTF-8 text of `bytes`, or `None` for binary content.
fn decode_text(bytes: Vec<u8>) -> Option<String> {
    let sniff = &bytes[..bytes.len().min(BINARY_SNIFF_LEN)];
    if sniff.contains(&0) {
        return None;
    }
    String::from_utf8(bytes).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = IndexerConfig::default();
        assert_eq!(config.max_chunk_tokens, 500);
        assert_eq!(config.max_file_size, 1024 * 1024);
        assert_eq!(config.ignore_filename, ".coderagignore");
    }

    #[test]
    fn summary_defaults() {
        let summary = IndexSummary::default();
        assert_eq!(summary.files_scanned, 0);
        assert!(summary.errors.is_empty());
        assert!(!summary.cancelled);
    }

    #[test]
    fn decode_rejects_nul_and_invalid_utf8() {
        assert_eq!(decode_text(b"fn main() {}".to_vec()).as_deref(), Some("fn main() {}"));
        assert!(decode_text(vec![b'a', 0, b'b']).is_none());
        assert!(decode_text(vec![0xff, 0xfe, 0x41]).is_none());
    }

    #[test]
    fn nul_after_sniff_window_is_text() {
        let mut bytes = vec![b'a'; BINARY_SNIFF_LEN + 10];
        bytes[BINARY_SNIFF_LEN + 5] = 0;
        assert!(decode_text(bytes).is_some());
    }

    #[test]
    fn relative_path_uses_forward_slashes() {
        let root = Path::new("/repo");
        assert_eq!(
            relative_path(root, Path::new("/repo/src/lib.rs")).unwrap(),
            "src/lib.rs"
        );
        assert!(relative_path(root, Path::new("/elsewhere/a.rs")).is_err());
        assert!(relative_path(root, root).is_err());
    }

    #[test]
    fn hidden_components() {
        assert!(is_hidden(".env"));
        assert!(is_hidden("src/.cache/x.rs"));
        assert!(!is_hidden("src/lib.rs"));
    }

    #[test]
    fn tally_counts_outcomes() {
        let mut summary = IndexSummary::default();
        tally(
            &mut summary,
            &FileOutcome::Indexed {
                chunks_written: 3,
                chunks_removed: 1,
            },
        );
        tally(&mut summary, &FileOutcome::Unchanged);
        tally(&mut summary, &FileOutcome::Removed { chunks_removed: 2 });
        tally(
            &mut summary,
            &FileOutcome::Skipped {
                reason: SkipReason::Binary,
            },
        );
        assert_eq!(summary.files_indexed, 1);
        assert_eq!(summary.files_skipped, 3);
        assert_eq!(summary.files_removed, 1);
        assert_eq!(summary.chunks_written, 3);
        assert_eq!(summary.chunks_removed, 3);
    }

    #[tokio::test]
    async fn walk_honors_ignore_files_and_hidden() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("src")).unwrap();
        std::fs::create_dir_all(root.join("target")).unwrap();
        std::fs::create_dir_all(root.join(".git")).unwrap();
        std::fs::write(root.join("src/lib.rs"), "fn a() {}\n").unwrap();
        std::fs::write(root.join("target/out.rs"), "fn b() {}\n").unwrap();
        std::fs::write(root.join("secret.txt"), "x\n").unwrap();
        std::fs::write(root.join(".env"), "KEY=1\n").unwrap();
        std::fs::write(root.join(".git/config"), "[core]\n").unwrap();
        std::fs::write(root.join(".gitignore"), "target/\n").unwrap();
        std::fs::write(root.join(".coderagignore"), "secret.txt\n").unwrap();

        let files = walk_repository(root, ".coderagignore").await.unwrap();
        assert_eq!(files, ["src/lib.rs"]);
    }

    #[tokio::test]
    async fn walk_rejects_missing_root() {
        assert!(
            walk_repository(Path::new("/nonexistent/coderag/root"), ".coderagignore")
                .await
                .is_err()
        );
    }

    #[test]
    fn exclusion_reads_root_ignore_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".coderagignore"), "generated/\n*.log\n").unwrap();
        assert!(is_excluded(dir.path(), "generated/a.rs", ".coderagignore"));
        assert!(is_excluded(dir.path(), "run.log", ".coderagignore"));
        assert!(is_excluded(dir.path(), ".hidden/a.rs", ".coderagignore"));
        assert!(!is_excluded(dir.path(), "src/a.rs", ".coderagignore"));
    }
}
