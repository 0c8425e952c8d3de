//! Language parsing for the code index
//!
//! Defines the parser-facing data model (symbols with body ranges,
//! references with source context) and language detection. The concrete
//! tree-sitter walker lives behind the `tree-sitter-parsing` feature.

use anyhow::Result;
use serde::{Deserialize, Serialize};

#[cfg(feature = "tree-sitter-parsing")]
mod tree_sitter;

/// Supported programming languages for parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SupportedLanguage {
    Rust,
    Python,
    TypeScript,
    JavaScript,
}

impl SupportedLanguage {
    /// Detect language from file extension.
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.to_lowercase().as_str() {
            "rs" => Some(SupportedLanguage::Rust),
            "py" => Some(SupportedLanguage::Python),
            "ts" | "tsx" => Some(SupportedLanguage::TypeScript),
            "js" | "jsx" | "mjs" => Some(SupportedLanguage::JavaScript),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SupportedLanguage::Rust => "rust",
            SupportedLanguage::Python => "python",
            SupportedLanguage::TypeScript => "typescript",
            SupportedLanguage::JavaScript => "javascript",
        }
    }
}

impl std::fmt::Display for SupportedLanguage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a symbol is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    Function,
    Method,
    Class,
    Interface,
    TypeAlias,
}

impl SymbolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SymbolKind::Function => "function",
            SymbolKind::Method => "method",
            SymbolKind::Class => "class",
            SymbolKind::Interface => "interface",
            SymbolKind::TypeAlias => "type",
        }
    }

    /// Leaf callables get their bodies collapsed by the outline renderer;
    /// containers never do.
    pub fn is_callable(&self) -> bool {
        matches!(self, SymbolKind::Function | SymbolKind::Method)
    }
}

impl std::fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of symbol use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefKind {
    Call,
    TypeRef,
}

impl RefKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefKind::Call => "call",
            RefKind::TypeRef => "type_ref",
        }
    }
}

/// One symbol extracted from source.
///
/// Lines are 1-based. The body range covers the delimited block including
/// both brace lines; symbols without a block body have `body_start_line ==
/// body_end_line == 0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedSymbol {
    pub name: String,
    pub kind: SymbolKind,
    /// Declaration head with whitespace collapsed, e.g.
    /// `pub fn claim(&self, id: &SortableId) -> Result<Task>`.
    pub signature: String,
    pub doc_comment: Option<String>,
    pub start_line: usize,
    pub end_line: usize,
    pub body_start_line: usize,
    pub body_end_line: usize,
}

/// One call site or type use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedReference {
    pub symbol_name: String,
    pub kind: RefKind,
    /// 1-based line, 0-based column.
    pub line: usize,
    pub column: usize,
    /// The surrounding source line, trimmed.
    pub context: String,
}

/// Parser output for one file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedFile {
    pub language: SupportedLanguage,
    pub symbols: Vec<ParsedSymbol>,
    pub references: Vec<ParsedReference>,
}

/// Multi-language code parser.
///
/// Parsing is best-effort: an error on one file never aborts an indexing
/// batch; the caller counts the file as skipped.
pub struct CodeParser {
    #[cfg(feature = "tree-sitter-parsing")]
    inner: tree_sitter::TreeSitterParser,
}

impl CodeParser {
    pub fn new() -> Result<Self> {
        Ok(Self {
            #[cfg(feature = "tree-sitter-parsing")]
            inner: tree_sitter::TreeSitterParser::new()?,
        })
    }

    /// Parse source content in the given language.
    #[cfg(feature = "tree-sitter-parsing")]
    pub fn parse_content(
        &mut self,
        content: &str,
        language: SupportedLanguage,
    ) -> Result<ParsedFile> {
        self.inner.parse_content(content, language)
    }

    #[cfg(not(feature = "tree-sitter-parsing"))]
    pub fn parse_content(
        &mut self,
        _content: &str,
        _language: SupportedLanguage,
    ) -> Result<ParsedFile> {
        anyhow::bail!(crate::error::StoreError::Invalid(
            "built without tree-sitter-parsing; code indexing is unavailable".into()
        ))
    }
}
