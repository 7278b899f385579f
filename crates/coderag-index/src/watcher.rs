use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use coderag_llm::EmbeddingProvider;
use notify_debouncer_mini::{DebouncedEvent, DebouncedEventKind, new_debouncer};
use tokio::sync::{mpsc, watch};

use crate::error::Result;
use crate::indexer::RepositoryIndexer;

const DEBOUNCE: Duration = Duration::from_secs(1);

/// Re-runs the incremental index whenever files under the root settle after a change.
pub struct IndexWatcher {
    handle: tokio::task::JoinHandle<()>,
}

impl IndexWatcher {
    /// # Errors
    ///
    /// Returns an error if the filesystem watcher cannot be initialized.
    pub fn start<P: EmbeddingProvider + 'static>(
        root: &Path,
        indexer: Arc<RepositoryIndexer<P>>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<Self> {
        let (notify_tx, mut notify_rx) = mpsc::channel::<()>(16);
        let watch_root = root.to_path_buf();

        let mut debouncer = new_debouncer(
            DEBOUNCE,
            move |events: std::result::Result<Vec<DebouncedEvent>, notify::Error>| {
                let events = match events {
                    Ok(events) => events,
                    Err(e) => {
                        tracing::warn!("index watcher error: {e}");
                        return;
                    }
                };

                let relevant = events
                    .iter()
                    .filter(|e| e.kind == DebouncedEventKind::Any)
                    .any(|e| !is_hidden_under(&watch_root, &e.path));

                // a full channel already has a rerun queued
                if relevant {
                    let _ = notify_tx.try_send(());
                }
            },
        )?;

        debouncer
            .watcher()
            .watch(root, notify::RecursiveMode::Recursive)?;

        let root: PathBuf = root.to_path_buf();
        let handle = tokio::spawn(async move {
            let _debouncer = debouncer;
            loop {
                tokio::select! {
                    signal = notify_rx.recv() => {
                        if signal.is_none() {
                            break;
                        }
                        while notify_rx.try_recv().is_ok() {}
                        match indexer.index_repository(&root, &shutdown).await {
                            Ok(summary) => tracing::info!(
                                indexed = summary.files_indexed,
                                removed = summary.files_removed,
                                errors = summary.errors.len(),
                                "re-index after change"
                            ),
                            Err(e) => tracing::warn!("re-index failed: {e}"),
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!(root = %root.display(), "index watcher stopped");
        });

        Ok(Self { handle })
    }

    /// Wait for the watch loop to exit after shutdown.
    pub async fn join(self) {
        if let Err(e) = self.handle.await {
            tracing::warn!("index watcher task failed: {e}");
        }
    }
}

fn is_hidden_under(root: &Path, path: &Path) -> bool {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .any(|c| matches!(c, Component::Normal(part) if part.to_string_lossy().starts_with('.')))
}

#[cfg(test)]
mod tests {
    use coderag_llm::mock::MockEmbedder;
    use coderag_llm::{EmbeddingGateway, GatewayConfig};

    use super::*;
    use crate::in_memory::InMemoryVectorIndex;
    use crate::indexer::IndexerConfig;

    fn test_indexer() -> Arc<RepositoryIndexer<MockEmbedder>> {
        let gateway = Arc::new(EmbeddingGateway::new(
            Arc::new(MockEmbedder::new(16)),
            GatewayConfig::default(),
        ));
        Arc::new(RepositoryIndexer::new(
            Arc::new(InMemoryVectorIndex::new()),
            gateway,
            IndexerConfig::default(),
        ))
    }

    #[test]
    fn hidden_paths_are_ignored() {
        let root = Path::new("/repo");
        assert!(is_hidden_under(root, Path::new("/repo/.git/index")));
        assert!(is_hidden_under(root, Path::new("/repo/.coderag/index.db-wal")));
        assert!(!is_hidden_under(root, Path::new("/repo/src/main.rs")));
    }

    #[test]
    fn root_may_itself_be_hidden() {
        let root = Path::new("/home/me/.projects/repo");
        assert!(!is_hidden_under(root, Path::new("/home/me/.projects/repo/src/lib.rs")));
    }

    #[tokio::test]
    async fn start_with_valid_directory_and_stop() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = watch::channel(false);
        let watcher = IndexWatcher::start(dir.path(), test_indexer(), rx).unwrap();
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), watcher.join())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn start_with_nonexistent_directory_fails() {
        let (_tx, rx) = watch::channel(false);
        let result = IndexWatcher::start(Path::new("/nonexistent/path/xyz"), test_indexer(), rx);
        assert!(result.is_err());
    }
}
