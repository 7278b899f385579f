//! Language detection and the process-wide tree-sitter grammar registry.

use std::path::Path;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use tree_sitter::{Parser, Tree};

use crate::error::{IndexError, Result};

/// Supported language with its tree-sitter grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lang {
    Rust,
    Python,
    JavaScript,
    TypeScript,
    Tsx,
    Go,
    Java,
    C,
    Cpp,
    CSharp,
    Bash,
    Toml,
    Json,
    Markdown,
}

const LANG_COUNT: usize = 14;

/// Role a syntax node plays when deciding chunk boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    /// Inline module or namespace; subdivided by its members when oversized.
    Module,
    /// Class-like declaration whose nested functions are methods.
    Container,
    Function,
    Method,
    /// Named declaration that is neither callable nor a container.
    Declaration,
}

impl Lang {
    pub const ALL: [Lang; LANG_COUNT] = [
        Self::Rust,
        Self::Python,
        Self::JavaScript,
        Self::TypeScript,
        Self::Tsx,
        Self::Go,
        Self::Java,
        Self::C,
        Self::Cpp,
        Self::CSharp,
        Self::Bash,
        Self::Toml,
        Self::Json,
        Self::Markdown,
    ];

    /// Identifier persisted with each chunk.
    #[must_use]
    pub fn id(self) -> &'static str {
        match self {
            Self::Rust => "rust",
            Self::Python => "python",
            Self::JavaScript => "javascript",
            Self::TypeScript => "typescript",
            Self::Tsx => "tsx",
            Self::Go => "go",
            Self::Java => "java",
            Self::C => "c",
            Self::Cpp => "cpp",
            Self::CSharp => "csharp",
            Self::Bash => "bash",
            Self::Toml => "toml",
            Self::Json => "json",
            Self::Markdown => "markdown",
        }
    }

    #[must_use]
    pub fn from_id(id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|l| l.id() == id)
    }

    fn slot(self) -> usize {
        self as usize
    }

    /// Load the tree-sitter grammar. Returns `None` if the corresponding feature is not enabled.
    fn load_grammar(self) -> Option<tree_sitter::Language> {
        match self {
            #[cfg(feature = "lang-rust")]
            Self::Rust => Some(tree_sitter_rust::LANGUAGE.into()),
            #[cfg(feature = "lang-python")]
            Self::Python => Some(tree_sitter_python::LANGUAGE.into()),
            #[cfg(feature = "lang-js")]
            Self::JavaScript => Some(tree_sitter_javascript::LANGUAGE.into()),
            #[cfg(feature = "lang-js")]
            Self::TypeScript => Some(tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()),
            #[cfg(feature = "lang-js")]
            Self::Tsx => Some(tree_sitter_typescript::LANGUAGE_TSX.into()),
            #[cfg(feature = "lang-go")]
            Self::Go => Some(tree_sitter_go::LANGUAGE.into()),
            #[cfg(feature = "lang-java")]
            Self::Java => Some(tree_sitter_java::LANGUAGE.into()),
            #[cfg(feature = "lang-c")]
            Self::C => Some(tree_sitter_c::LANGUAGE.into()),
            #[cfg(feature = "lang-c")]
            Self::Cpp => Some(tree_sitter_cpp::LANGUAGE.into()),
            #[cfg(feature = "lang-csharp")]
            Self::CSharp => Some(tree_sitter_c_sharp::LANGUAGE.into()),
            #[cfg(feature = "lang-config")]
            Self::Bash => Some(tree_sitter_bash::LANGUAGE.into()),
            #[cfg(feature = "lang-config")]
            Self::Toml => Some(tree_sitter_toml_ng::LANGUAGE.into()),
            #[cfg(feature = "lang-config")]
            Self::Json => Some(tree_sitter_json::LANGUAGE.into()),
            #[cfg(feature = "lang-config")]
            Self::Markdown => Some(tree_sitter_md::LANGUAGE.into()),
            #[allow(unreachable_patterns)]
            _ => None,
        }
    }

    /// Grammar for this language, loaded on first use and kept for the process lifetime.
    #[must_use]
    pub fn grammar(self) -> Option<&'static tree_sitter::Language> {
        static CACHE: [OnceLock<Option<tree_sitter::Language>>; LANG_COUNT] =
            [const { OnceLock::new() }; LANG_COUNT];
        CACHE[self.slot()]
            .get_or_init(|| {
                tracing::debug!(lang = self.id(), "loading grammar");
                self.load_grammar()
            })
            .as_ref()
    }

    /// Classify a node kind as a chunk anchor. `None` means the node is not a named entity.
    #[must_use]
    pub fn entity_kind(self, kind: &str) -> Option<EntityKind> {
        use EntityKind::{Container, Declaration, Function, Method, Module};
        let role = match (self, kind) {
            (Self::Rust, "function_item" | "macro_definition") => Function,
            (
                Self::Rust,
                "struct_item" | "enum_item" | "union_item" | "trait_item" | "impl_item",
            ) => Container,
            (Self::Rust, "mod_item") => Module,

            (Self::Python, "function_definition") => Function,
            (Self::Python, "class_definition") => Container,

            (
                Self::JavaScript | Self::TypeScript | Self::Tsx,
                "function_declaration"
                | "generator_function_declaration"
                | "function_expression"
                | "generator_function"
                | "arrow_function",
            ) => Function,
            (Self::JavaScript | Self::TypeScript | Self::Tsx, "method_definition") => Method,
            (
                Self::JavaScript | Self::TypeScript | Self::Tsx,
                "class_declaration" | "abstract_class_declaration" | "interface_declaration" | "class",
            ) => Container,
            (
                Self::TypeScript | Self::Tsx,
                "type_alias_declaration" | "enum_declaration",
            ) => Declaration,
            (Self::TypeScript | Self::Tsx, "internal_module" | "module") => Module,

            (Self::Go, "function_declaration") => Function,
            (Self::Go, "method_declaration") => Method,
            (Self::Go, "type_declaration") => Declaration,

            (Self::Java, "method_declaration" | "constructor_declaration") => Method,
            (
                Self::Java,
                "class_declaration"
                | "interface_declaration"
                | "enum_declaration"
                | "record_declaration"
                | "annotation_type_declaration",
            ) => Container,

            (Self::C | Self::Cpp, "function_definition") => Function,
            (Self::C | Self::Cpp, "struct_specifier" | "union_specifier" | "enum_specifier") => {
                Container
            }
            (Self::C | Self::Cpp, "type_definition") => Declaration,
            (Self::Cpp, "class_specifier") => Container,
            (Self::Cpp, "namespace_definition") => Module,

            (
                Self::CSharp,
                "method_declaration" | "constructor_declaration" | "destructor_declaration",
            ) => Method,
            (
                Self::CSharp,
                "class_declaration"
                | "struct_declaration"
                | "interface_declaration"
                | "record_declaration"
                | "enum_declaration",
            ) => Container,
            (Self::CSharp, "namespace_declaration" | "file_scoped_namespace_declaration") => {
                Module
            }

            (Self::Bash, "function_definition") => Function,
            _ => return None,
        };
        Some(role)
    }

    /// Node kinds that wrap a single entity (decorators, `export`, templates) and take its role.
    #[must_use]
    pub fn wrapper_node_kinds(self) -> &'static [&'static str] {
        match self {
            Self::Python => &["decorated_definition"],
            Self::JavaScript | Self::TypeScript | Self::Tsx => &[
                "export_statement",
                "lexical_declaration",
                "variable_declaration",
                "variable_declarator",
            ],
            Self::Cpp => &["template_declaration"],
            _ => &[],
        }
    }

    /// True when the grammar yields no named entities and files are chunked as a whole.
    #[must_use]
    pub fn is_flat(self) -> bool {
        matches!(self, Self::Toml | Self::Json | Self::Markdown)
    }
}

impl std::fmt::Display for Lang {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

/// Detect language from the file name, then the extension.
#[must_use]
pub fn detect_language(path: &Path) -> Option<Lang> {
    if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
        let by_name = match name {
            "BUILD" | "BUILD.bazel" | "WORKSPACE" | "SConstruct" | "SConscript" => {
                Some(Lang::Python)
            }
            "Cargo.lock" | "Pipfile" | "poetry.lock" => Some(Lang::Toml),
            "PKGBUILD" | ".bashrc" | ".bash_profile" | ".profile" => Some(Lang::Bash),
            "Jakefile" => Some(Lang::JavaScript),
            _ => None,
        };
        if by_name.is_some() {
            return by_name;
        }
    }

    let ext = path.extension()?.to_str()?;
    match ext {
        "rs" => Some(Lang::Rust),
        "py" | "pyi" => Some(Lang::Python),
        "js" | "jsx" | "mjs" | "cjs" => Some(Lang::JavaScript),
        "ts" | "mts" | "cts" => Some(Lang::TypeScript),
        "tsx" => Some(Lang::Tsx),
        "go" => Some(Lang::Go),
        "java" => Some(Lang::Java),
        "c" | "h" => Some(Lang::C),
        "cc" | "cpp" | "cxx" | "hh" | "hpp" | "hxx" => Some(Lang::Cpp),
        "cs" => Some(Lang::CSharp),
        "sh" | "bash" | "zsh" => Some(Lang::Bash),
        "toml" => Some(Lang::Toml),
        "json" | "jsonc" => Some(Lang::Json),
        "md" | "markdown" => Some(Lang::Markdown),
        _ => None,
    }
}

/// A loaded grammar able to parse text of one language.
#[derive(Debug, Clone, Copy)]
pub struct Grammar {
    lang: Lang,
    language: &'static tree_sitter::Language,
}

impl Grammar {
    #[must_use]
    pub fn lang(&self) -> Lang {
        self.lang
    }

    /// Parse `text` into a syntax tree.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Parse`] if the parser yields no tree or the tree contains
    /// syntax errors.
    pub fn parse(&self, text: &str) -> Result<Tree> {
        let mut parser = Parser::new();
        parser
            .set_language(self.language)
            .map_err(|e| IndexError::Parse(format!("set_language failed: {e}")))?;
        let tree = parser
            .parse(text, None)
            .ok_or_else(|| IndexError::Parse("parser produced no tree".into()))?;
        if tree.root_node().has_error() {
            return Err(IndexError::Parse(format!(
                "{} syntax errors in tree",
                self.lang
            )));
        }
        Ok(tree)
    }
}

/// Outcome of looking up a grammar for a path.
#[derive(Debug, Clone, Copy)]
pub enum Resolution {
    Supported(Grammar),
    /// No grammar: unknown extension (`None`) or a known language whose feature is disabled.
    Unsupported(Option<Lang>),
}

/// Resolve the grammar for `path`. Pure function of the file name; unknown files are not an error.
#[must_use]
pub fn resolve(path: &Path) -> Resolution {
    let Some(lang) = detect_language(path) else {
        return Resolution::Unsupported(None);
    };
    match lang.grammar() {
        Some(language) => Resolution::Supported(Grammar { lang, language }),
        None => Resolution::Unsupported(Some(lang)),
    }
}
