//! Contextualized embedding text.
//!
//! Raw code alone embeds poorly for conceptual queries; the path, scope chain and language
//! are prepended. The stored chunk content stays the raw text.

use crate::chunker::Chunk;

/// Text sent to the embedding model for `chunk` (not for display).
#[must_use]
pub fn contextualize_for_embedding(chunk: &Chunk) -> String {
    let mut text = String::with_capacity(chunk.content.len() + 128);

    text.push_str("# ");
    text.push_str(&chunk.file_path);
    text.push('\n');

    if !chunk.scope_chain.is_empty() {
        text.push_str("# Scope: ");
        text.push_str(&chunk.scope_chain);
        text.push('\n');
    }

    text.push_str("# Language: ");
    text.push_str(chunk.language.map_or("text", |l| l.id()));
    text.push('\n');

    text.push_str(&chunk.content);
    text
}

/// Short header for displaying a retrieved chunk.
#[must_use]
pub fn chunk_display_header(chunk: &Chunk) -> String {
    let name = chunk.name.as_deref().unwrap_or(chunk.kind.as_str());
    format!("{} :: {name} ({})", chunk.location(), chunk.kind)
}
