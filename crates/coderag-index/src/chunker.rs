//! Syntax-aware chunking into line-aligned, token-bounded units with a line-window fallback.
//!
//! The AST path anchors chunks on named entities (functions, classes, methods, ...). Text not
//! covered by an entity is attached to the next entity when it fits the budget (leading comments,
//! imports, a class header before its first method) and text after the last entity of a region
//! is attached to the preceding chunk. Whatever cannot be attached is emitted as `block` windows,
//! so the chunk sequence of a file always concatenates back to the file text.

use std::fmt;
use std::path::Path;

use coderag_llm::tokens::estimate_tokens;
use serde::{Deserialize, Serialize};
use tree_sitter::{Node, Tree};
use uuid::Uuid;

use crate::languages::{EntityKind, Lang, Resolution, resolve};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChunkKind {
    Module,
    Class,
    Function,
    Method,
    Block,
    TextFallback,
}

impl ChunkKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Module => "module",
            Self::Class => "class",
            Self::Function => "function",
            Self::Method => "method",
            Self::Block => "block",
            Self::TextFallback => "text-fallback",
        }
    }

    #[must_use]
    pub fn from_id(id: &str) -> Option<Self> {
        [
            Self::Module,
            Self::Class,
            Self::Function,
            Self::Method,
            Self::Block,
            Self::TextFallback,
        ]
        .into_iter()
        .find(|k| k.as_str() == id)
    }
}

impl fmt::Display for ChunkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One contiguous, line-aligned unit of a source file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub file_path: String,
    pub language: Option<Lang>,
    pub kind: ChunkKind,
    pub name: Option<String>,
    /// Enclosing entities, outermost first, joined with `" > "`.
    pub scope_chain: String,
    pub content: String,
    /// 1-indexed, inclusive.
    pub start_line: usize,
    /// 1-indexed, inclusive.
    pub end_line: usize,
    pub token_count: usize,
    pub content_hash: String,
    /// Exceeds the token budget because it could not be split without breaking a syntactic unit.
    pub oversized: bool,
}

impl Chunk {
    /// `path:start-end`.
    #[must_use]
    pub fn location(&self) -> String {
        format!("{}:{}-{}", self.file_path, self.start_line, self.end_line)
    }
}

/// Stable chunk identity: re-chunking an unchanged region yields the same id.
#[must_use]
pub fn chunk_id(file_path: &str, start_line: usize, end_line: usize, content_hash: &str) -> String {
    let key = format!("{file_path}\0{start_line}\0{end_line}\0{content_hash}");
    Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes()).to_string()
}

#[must_use]
pub fn content_hash(text: &str) -> String {
    blake3::hash(text.as_bytes()).to_hex().to_string()
}

/// Why a file was chunked by line windows instead of by its syntax tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackReason {
    Unsupported,
    ParseFailure(String),
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unsupported => f.write_str("unsupported language"),
            Self::ParseFailure(msg) => write!(f, "parse failure: {msg}"),
        }
    }
}

/// How a file will be chunked, decided once per file.
#[derive(Debug)]
pub enum ChunkSource {
    AstDerived { lang: Lang, tree: Tree },
    TextFallback {
        lang: Option<Lang>,
        reason: FallbackReason,
    },
}

impl ChunkSource {
    /// Resolve the grammar for `path` and parse `text` with it.
    #[must_use]
    pub fn resolve(path: &Path, text: &str) -> Self {
        match resolve(path) {
            Resolution::Supported(grammar) => match grammar.parse(text) {
                Ok(tree) => Self::AstDerived {
                    lang: grammar.lang(),
                    tree,
                },
                Err(e) => Self::TextFallback {
                    lang: Some(grammar.lang()),
                    reason: FallbackReason::ParseFailure(e.to_string()),
                },
            },
            Resolution::Unsupported(lang) => Self::TextFallback {
                lang,
                reason: FallbackReason::Unsupported,
            },
        }
    }

    #[must_use]
    pub fn lang(&self) -> Option<Lang> {
        match self {
            Self::AstDerived { lang, .. } => Some(*lang),
            Self::TextFallback { lang, .. } => *lang,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChunkedFile {
    pub chunks: Vec<Chunk>,
    /// Set when the file went through the line-window path.
    pub fallback: Option<FallbackReason>,
}

/// Chunk `text` of `file_path` into units of at most `max_tokens` estimated tokens.
#[must_use]
pub fn chunk_file(file_path: &str, text: &str, max_tokens: usize) -> ChunkedFile {
    let source = ChunkSource::resolve(Path::new(file_path), text);
    chunk_source(file_path, text, max_tokens, &source)
}

/// Chunk `text` along an already resolved [`ChunkSource`].
#[must_use]
pub fn chunk_source(
    file_path: &str,
    text: &str,
    max_tokens: usize,
    source: &ChunkSource,
) -> ChunkedFile {
    let mut chunker = Chunker {
        file_path,
        lang: source.lang(),
        lines: LineIndex::new(text),
        max_tokens: max_tokens.max(1),
        chunks: Vec::new(),
    };

    let fallback = match source {
        ChunkSource::AstDerived { lang, tree } => {
            if !chunker.lines.is_empty() {
                chunker.chunk_tree(*lang, tree.root_node());
            }
            None
        }
        ChunkSource::TextFallback { reason, .. } => {
            if let Some(all) = chunker.lines.all() {
                chunker.windows(all, ChunkKind::TextFallback, "");
            }
            Some(reason.clone())
        }
    };

    ChunkedFile {
        chunks: chunker.chunks,
        fallback,
    }
}

/// Inclusive range of 0-indexed lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
    first: usize,
    last: usize,
}

impl Span {
    fn new(first: usize, last: usize) -> Self {
        Self { first, last }
    }
}

struct LineIndex<'a> {
    text: &'a str,
    starts: Vec<usize>,
}

impl<'a> LineIndex<'a> {
    fn new(text: &'a str) -> Self {
        let mut starts = Vec::new();
        if !text.is_empty() {
            starts.push(0);
            starts.extend(
                text.bytes()
                    .enumerate()
                    .filter(|&(i, b)| b == b'\n' && i + 1 < text.len())
                    .map(|(i, _)| i + 1),
            );
        }
        Self { text, starts }
    }

    fn is_empty(&self) -> bool {
        self.starts.is_empty()
    }

    fn all(&self) -> Option<Span> {
        self.starts.len().checked_sub(1).map(|last| Span::new(0, last))
    }

    fn last_line(&self) -> usize {
        self.starts.len().saturating_sub(1)
    }

    fn slice(&self, span: Span) -> &'a str {
        let start = self.starts[span.first];
        let end = self
            .starts
            .get(span.last + 1)
            .copied()
            .unwrap_or(self.text.len());
        &self.text[start..end]
    }

    fn is_blank(&self, span: Span) -> bool {
        self.slice(span).trim().is_empty()
    }
}

struct Anchor<'t> {
    /// Node whose children are searched when the anchor is subdivided.
    entity: Node<'t>,
    kind: EntityKind,
    name: Option<String>,
    span: Span,
}

/// Anchors sharing at least one line; always emitted together.
struct Group<'t> {
    span: Span,
    anchors: Vec<Anchor<'t>>,
}

struct Chunker<'a> {
    file_path: &'a str,
    lang: Option<Lang>,
    lines: LineIndex<'a>,
    max_tokens: usize,
    chunks: Vec<Chunk>,
}

impl<'a> Chunker<'a> {
    fn tokens(&self, span: Span) -> usize {
        estimate_tokens(self.lines.slice(span))
    }

    fn fits(&self, span: Span) -> bool {
        self.tokens(span) <= self.max_tokens
    }

    fn push(&mut self, span: Span, kind: ChunkKind, name: Option<String>, scope: &str) {
        let content = self.lines.slice(span);
        let token_count = estimate_tokens(content);
        let hash = content_hash(content);
        let (start_line, end_line) = (span.first + 1, span.last + 1);
        self.chunks.push(Chunk {
            id: chunk_id(self.file_path, start_line, end_line, &hash),
            file_path: self.file_path.to_owned(),
            language: self.lang,
            kind,
            name,
            scope_chain: scope.to_owned(),
            content: content.to_owned(),
            start_line,
            end_line,
            token_count,
            content_hash: hash,
            oversized: token_count > self.max_tokens,
        });
    }

    /// Greedy line windows; a single line above budget becomes its own oversized chunk.
    fn windows(&mut self, span: Span, kind: ChunkKind, scope: &str) {
        let mut first = span.first;
        for line in span.first..=span.last {
            if line > first && !self.fits(Span::new(first, line)) {
                self.push(Span::new(first, line - 1), kind, None, scope);
                first = line;
            }
        }
        self.push(Span::new(first, span.last), kind, None, scope);
    }

    fn chunk_tree(&mut self, lang: Lang, root: Node<'_>) {
        let Some(all) = self.lines.all() else {
            return;
        };
        let mut anchors = Vec::new();
        if !lang.is_flat() {
            self.collect_anchors(lang, root, &mut anchors);
        }

        if anchors.is_empty() {
            if self.fits(all) {
                self.push(all, ChunkKind::Module, None, "");
            } else {
                self.windows(all, ChunkKind::Block, "");
            }
            return;
        }

        self.region(lang, all, group_anchors(anchors), "", false);
    }

    /// Emit `groups` and the text between them so that exactly `span` is covered.
    fn region(
        &mut self,
        lang: Lang,
        span: Span,
        groups: Vec<Group<'_>>,
        scope: &str,
        in_container: bool,
    ) {
        let groups: Vec<_> = groups
            .into_iter()
            .filter(|g| g.span.first <= span.last && g.span.last >= span.first)
            .collect();
        if groups.is_empty() {
            self.windows(span, ChunkKind::Block, scope);
            return;
        }

        let count = groups.len();
        let mut cursor = span.first;
        for (i, mut group) in groups.into_iter().enumerate() {
            group.span.first = group.span.first.max(cursor);
            group.span.last = group.span.last.min(span.last).max(group.span.first);
            let lead = (group.span.first > cursor).then(|| Span::new(cursor, group.span.first - 1));
            let trail = (i + 1 == count && group.span.last < span.last)
                .then(|| Span::new(group.span.last + 1, span.last));
            cursor = group.span.last + 1;
            self.segment(lang, lead, &group, trail, scope, in_container);
        }
    }

    fn segment(
        &mut self,
        lang: Lang,
        lead: Option<Span>,
        group: &Group<'_>,
        trail: Option<Span>,
        scope: &str,
        in_container: bool,
    ) {
        let core = group.span;
        let whole = Span::new(
            lead.map_or(core.first, |l| l.first),
            trail.map_or(core.last, |t| t.last),
        );
        if self.fits(whole) {
            self.push_group(whole, group, scope, in_container);
            return;
        }

        if let [anchor] = group.anchors.as_slice()
            && matches!(anchor.kind, EntityKind::Container | EntityKind::Module)
        {
            let mut nested = Vec::new();
            self.collect_anchors(lang, anchor.entity, &mut nested);
            if !nested.is_empty() {
                let label = anchor
                    .name
                    .clone()
                    .unwrap_or_else(|| anchor.entity.kind().to_owned());
                let inner_scope = extend_scope(scope, &label);
                self.region(
                    lang,
                    whole,
                    group_anchors(nested),
                    &inner_scope,
                    anchor.kind == EntityKind::Container,
                );
                return;
            }
        }

        let core_oversized = !self.fits(core);
        let attach_lead = lead.is_some_and(|l| {
            self.fits(Span::new(l.first, core.last)) || (core_oversized && self.lines.is_blank(l))
        });
        if let Some(l) = lead.filter(|_| !attach_lead) {
            self.windows(l, ChunkKind::Block, scope);
        }
        let first = match lead {
            Some(l) if attach_lead => l.first,
            _ => core.first,
        };

        let attach_trail = trail.is_some_and(|t| {
            self.fits(Span::new(first, t.last)) || (core_oversized && self.lines.is_blank(t))
        });
        let last = match trail {
            Some(t) if attach_trail => t.last,
            _ => core.last,
        };
        self.push_group(Span::new(first, last), group, scope, in_container);
        if let Some(t) = trail.filter(|_| !attach_trail) {
            self.windows(t, ChunkKind::Block, scope);
        }
    }

    fn push_group(&mut self, span: Span, group: &Group<'_>, scope: &str, in_container: bool) {
        let anchor = &group.anchors[0];
        let kind = match anchor.kind {
            EntityKind::Module => ChunkKind::Module,
            EntityKind::Container => ChunkKind::Class,
            EntityKind::Function if in_container => ChunkKind::Method,
            EntityKind::Function => ChunkKind::Function,
            EntityKind::Method => ChunkKind::Method,
            EntityKind::Declaration => ChunkKind::Block,
        };
        self.push(span, kind, anchor.name.clone(), scope);
    }

    /// Named entities below `node` in document order, looking through multi-line
    /// non-entity nodes but never into an entity.
    fn collect_anchors<'t>(&self, lang: Lang, node: Node<'t>, out: &mut Vec<Anchor<'t>>) {
        let child_count = u32::try_from(node.named_child_count()).unwrap_or(u32::MAX);
        for i in 0..child_count {
            let Some(child) = node.named_child(i) else {
                continue;
            };

            if let Some(kind) = lang.entity_kind(child.kind()) {
                out.push(Anchor {
                    entity: child,
                    kind,
                    name: self.direct_name(child),
                    span: self.rows(child),
                });
                continue;
            }

            if lang.wrapper_node_kinds().contains(&child.kind()) {
                let mut path = vec![child];
                if let Some(entity) = wrapped_entity(lang, child, &mut path)
                    && let Some(kind) = lang.entity_kind(entity.kind())
                {
                    out.push(Anchor {
                        entity,
                        kind,
                        name: path.iter().rev().find_map(|n| self.direct_name(*n)),
                        span: self.rows(child),
                    });
                    continue;
                }
            }

            if child.end_position().row > child.start_position().row {
                self.collect_anchors(lang, child, out);
            }
        }
    }

    fn rows(&self, node: Node<'_>) -> Span {
        let last_line = self.lines.last_line();
        let first = node.start_position().row.min(last_line);
        let end = node.end_position();
        let mut last = end.row;
        if end.column == 0 && last > first {
            last -= 1;
        }
        Span::new(first, last.clamp(first, last_line))
    }

    fn node_text(&self, node: Node<'_>) -> &'a str {
        self.lines.text.get(node.byte_range()).unwrap_or_default()
    }

    fn direct_name(&self, node: Node<'_>) -> Option<String> {
        let named = node
            .child_by_field_name("name")
            .or_else(|| innermost_declarator(node))
            .or_else(|| node.child_by_field_name("type"))
            .or_else(|| node.named_child(0)?.child_by_field_name("name"))?;
        let text = self.node_text(named).lines().next()?.trim();
        (!text.is_empty()).then(|| text.to_owned())
    }
}

/// Identifier at the bottom of a C-style declarator chain (`*f(int)` -> `f`).
fn innermost_declarator(node: Node<'_>) -> Option<Node<'_>> {
    let mut cur = node.child_by_field_name("declarator")?;
    while let Some(inner) = cur.child_by_field_name("declarator") {
        cur = inner;
    }
    Some(cur)
}

/// Find the entity a wrapper node stands for, recording the wrappers passed on the way.
fn wrapped_entity<'t>(lang: Lang, node: Node<'t>, path: &mut Vec<Node<'t>>) -> Option<Node<'t>> {
    let child_count = u32::try_from(node.named_child_count()).unwrap_or(u32::MAX);
    for i in 0..child_count {
        let Some(child) = node.named_child(i) else {
            continue;
        };
        if lang.entity_kind(child.kind()).is_some() {
            path.push(child);
            return Some(child);
        }
        if lang.wrapper_node_kinds().contains(&child.kind()) {
            path.push(child);
            if let Some(found) = wrapped_entity(lang, child, path) {
                return Some(found);
            }
            path.pop();
        }
    }
    None
}

fn group_anchors(anchors: Vec<Anchor<'_>>) -> Vec<Group<'_>> {
    let mut groups: Vec<Group<'_>> = Vec::new();
    for anchor in anchors {
        if let Some(group) = groups.last_mut()
            && anchor.span.first <= group.span.last
        {
            group.span.last = group.span.last.max(anchor.span.last);
            group.anchors.push(anchor);
        } else {
            groups.push(Group {
                span: anchor.span,
                anchors: vec![anchor],
            });
        }
    }
    groups
}

fn extend_scope(parent_scope: &str, name: &str) -> String {
    if parent_scope.is_empty() {
        name.to_owned()
    } else {
        format!("{parent_scope} > {name}")
    }
}
