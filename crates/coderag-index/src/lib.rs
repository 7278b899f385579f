//! Syntax-aware code indexing and two-stage semantic retrieval.
//!
//! Tree-sitter splits source files into bounded chunks, chunks are embedded and stored with
//! their vectors, and queries are answered by cosine similarity over an over-fetched pool
//! followed by an optional reranking pass.

pub mod chunker;
pub mod context;
pub mod error;
pub mod in_memory;
pub mod indexer;
pub mod languages;
pub mod search;
pub mod sqlite;
pub mod store;
pub mod watcher;

pub use chunker::{Chunk, ChunkKind, chunk_file};
pub use error::{IndexError, Result};
pub use in_memory::InMemoryVectorIndex;
pub use indexer::{FileOutcome, IndexSummary, IndexerConfig, RepositoryIndexer, SkipReason};
pub use languages::Lang;
pub use search::{RerankStatus, ScoreStage, SearchConfig, SearchOrchestrator, SearchResponse, SearchResult};
pub use sqlite::SqliteVectorIndex;
pub use store::{FileState, IndexRecord, IndexStats, ScoredRecord, VectorIndex};
pub use watcher::IndexWatcher;
