//! Tree-sitter walker for multi-language symbol and reference extraction

use anyhow::{Context, Result};
use std::collections::HashMap;
use tree_sitter::{Language, Node, Parser};

use super::{ParsedFile, ParsedReference, ParsedSymbol, RefKind, SupportedLanguage, SymbolKind};

// Node kind tables per grammar. Grouped by role rather than language so the
// walker stays a single pass.
const FUNCTION_NODES: &[&str] = &[
    "function_item",        // Rust
    "function_declaration", // TS/JS
    "function_definition",  // Python
];
const METHOD_NODES: &[&str] = &["method_definition"]; // TS/JS class members
const CLASS_NODES: &[&str] = &[
    "struct_item",      // Rust
    "enum_item",        // Rust
    "class_declaration", // TS/JS
    "class_definition", // Python
];
const INTERFACE_NODES: &[&str] = &[
    "trait_item",            // Rust
    "interface_declaration", // TS
];
const TYPE_ALIAS_NODES: &[&str] = &[
    "type_item",              // Rust
    "type_alias_declaration", // TS
];
const COMMENT_NODES: &[&str] = &["line_comment", "block_comment", "comment"];
const CALL_NODES: &[&str] = &["call_expression", "call"];
const TYPE_REF_NODES: &[&str] = &["type_identifier"];

/// Containers whose directly enclosed callables are methods.
const METHOD_CONTAINER_NODES: &[&str] = &[
    "impl_item",        // Rust
    "trait_item",       // Rust
    "class_definition", // Python
    "class_body",       // TS/JS
];

/// Python wraps decorated functions/classes in this node.
const DECORATED_DEFINITION: &str = "decorated_definition";

fn language_of(language: SupportedLanguage) -> Language {
    match language {
        SupportedLanguage::Rust => tree_sitter_rust::LANGUAGE.into(),
        SupportedLanguage::Python => tree_sitter_python::LANGUAGE.into(),
        SupportedLanguage::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
        SupportedLanguage::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
    }
}

/// Tree-sitter backed parser, one cached `Parser` per language.
pub struct TreeSitterParser {
    parsers: HashMap<SupportedLanguage, Parser>,
}

impl TreeSitterParser {
    pub fn new() -> Result<Self> {
        let mut parsers = HashMap::new();
        for language in [
            SupportedLanguage::Rust,
            SupportedLanguage::Python,
            SupportedLanguage::TypeScript,
            SupportedLanguage::JavaScript,
        ] {
            let mut parser = Parser::new();
            parser
                .set_language(&language_of(language))
                .with_context(|| format!("Failed to set parser language for {language}"))?;
            parsers.insert(language, parser);
        }
        Ok(Self { parsers })
    }

    pub fn parse_content(
        &mut self,
        content: &str,
        language: SupportedLanguage,
    ) -> Result<ParsedFile> {
        let parser = self
            .parsers
            .get_mut(&language)
            .with_context(|| format!("Parser not available for language {language}"))?;
        let tree = parser
            .parse(content, None)
            .context("Tree-sitter returned no parse tree")?;

        let lines: Vec<&str> = content.lines().collect();
        let mut walker = Walker {
            content,
            lines: &lines,
            symbols: Vec::new(),
            references: Vec::new(),
        };
        walker.visit(tree.root_node());

        Ok(ParsedFile {
            language,
            symbols: walker.symbols,
            references: walker.references,
        })
    }
}

struct Walker<'a> {
    content: &'a str,
    lines: &'a [&'a str],
    symbols: Vec<ParsedSymbol>,
    references: Vec<ParsedReference>,
}

impl Walker<'_> {
    fn visit(&mut self, node: Node) {
        let node_type = node.kind();

        let kind = if FUNCTION_NODES.contains(&node_type) {
            if Self::inside_method_container(node) {
                Some(SymbolKind::Method)
            } else {
                Some(SymbolKind::Function)
            }
        } else if METHOD_NODES.contains(&node_type) {
            Some(SymbolKind::Method)
        } else if CLASS_NODES.contains(&node_type) {
            Some(SymbolKind::Class)
        } else if INTERFACE_NODES.contains(&node_type) {
            Some(SymbolKind::Interface)
        } else if TYPE_ALIAS_NODES.contains(&node_type) {
            Some(SymbolKind::TypeAlias)
        } else {
            None
        };

        if let Some(kind) = kind {
            if let Some(symbol) = self.extract_symbol(node, kind) {
                self.symbols.push(symbol);
            }
        } else if CALL_NODES.contains(&node_type) {
            self.extract_call(node);
        } else if TYPE_REF_NODES.contains(&node_type) {
            self.extract_type_ref(node);
        }

        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            self.visit(child);
        }
    }

    fn inside_method_container(node: Node) -> bool {
        let mut current = node.parent();
        while let Some(parent) = current {
            let kind = parent.kind();
            if METHOD_CONTAINER_NODES.contains(&kind) {
                return true;
            }
            // A nested function inside another function is not a method.
            if FUNCTION_NODES.contains(&kind) {
                return false;
            }
            current = parent.parent();
        }
        false
    }

    fn text_of(&self, node: Node) -> &str {
        node.utf8_text(self.content.as_bytes()).unwrap_or("")
    }

    fn extract_symbol(&self, node: Node, kind: SymbolKind) -> Option<ParsedSymbol> {
        let name = self.symbol_name(node)?;
        let body = Self::body_node(node);

        let sig_end = body.map(|b| b.start_byte()).unwrap_or(node.end_byte());
        let raw_sig = &self.content[node.start_byte()..sig_end];
        let signature = raw_sig.split_whitespace().collect::<Vec<_>>().join(" ");

        let (body_start_line, body_end_line) = match body {
            Some(b) => (b.start_position().row + 1, b.end_position().row + 1),
            None => (0, 0),
        };

        Some(ParsedSymbol {
            name,
            kind,
            signature,
            doc_comment: self.doc_comment_before(node),
            start_line: node.start_position().row + 1,
            end_line: node.end_position().row + 1,
            body_start_line,
            body_end_line,
        })
    }

    /// The delimited body block, when the grammar exposes one.
    fn body_node(node: Node) -> Option<Node> {
        node.child_by_field_name("body").or_else(|| {
            // Rust struct/enum/trait bodies are field lists, not "body".
            let mut cursor = node.walk();
            let found = node.children(&mut cursor).find(|c| {
                matches!(
                    c.kind(),
                    "field_declaration_list"
                        | "enum_variant_list"
                        | "declaration_list"
                        | "statement_block"
                        | "class_body"
                        | "block"
                )
            });
            found
        })
    }

    fn symbol_name(&self, node: Node) -> Option<String> {
        if let Some(name_node) = node.child_by_field_name("name") {
            return Some(self.text_of(name_node).to_string());
        }
        // Fall back to the first identifier-ish child.
        let mut cursor = node.walk();
        let result = node
            .children(&mut cursor)
            .find(|c| matches!(c.kind(), "identifier" | "type_identifier" | "field_identifier"))
            .map(|c| self.text_of(c).to_string());
        result
    }

    /// Contiguous comment lines immediately above the declaration (or its
    /// decorator wrapper), with comment markers stripped.
    fn doc_comment_before(&self, node: Node) -> Option<String> {
        let mut anchor = node;
        if let Some(parent) = node.parent() {
            if parent.kind() == DECORATED_DEFINITION {
                anchor = parent;
            }
        }

        let mut parts: Vec<String> = Vec::new();
        let mut expected_end = anchor.start_position().row;
        let mut current = anchor.prev_sibling();
        while let Some(prev) = current {
            if !COMMENT_NODES.contains(&prev.kind()) {
                break;
            }
            // Only adjacent comments count as documentation.
            if prev.end_position().row + 1 < expected_end {
                break;
            }
            expected_end = prev.start_position().row;
            parts.push(Self::strip_comment_markers(self.text_of(prev)));
            current = prev.prev_sibling();
        }

        if parts.is_empty() {
            return None;
        }
        parts.reverse();
        let joined = parts.join("\n").trim().to_string();
        if joined.is_empty() {
            None
        } else {
            Some(joined)
        }
    }

    fn strip_comment_markers(raw: &str) -> String {
        raw.lines()
            .map(|line| {
                let trimmed = line.trim_start();
                let stripped = trimmed
                    .strip_prefix("///")
                    .or_else(|| trimmed.strip_prefix("//!"))
                    .or_else(|| trimmed.strip_prefix("//"))
                    .or_else(|| trimmed.strip_prefix("/**"))
                    .or_else(|| trimmed.strip_prefix("/*"))
                    .or_else(|| trimmed.strip_prefix("#"))
                    .unwrap_or(trimmed);
                stripped.trim_end_matches("*/").trim_start_matches('*').trim()
            })
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string()
    }

    fn context_line(&self, row: usize) -> String {
        self.lines.get(row).map(|l| l.trim().to_string()).unwrap_or_default()
    }

    fn extract_call(&mut self, node: Node) {
        let Some(function) = node.child_by_field_name("function") else {
            return;
        };
        let Some(name) = self.callee_name(function) else {
            return;
        };
        let pos = node.start_position();
        self.references.push(ParsedReference {
            symbol_name: name,
            kind: RefKind::Call,
            line: pos.row + 1,
            column: pos.column,
            context: self.context_line(pos.row),
        });
    }

    /// The rightmost identifier of the callee: `a.b.c()` refers to `c`,
    /// `mod::f()` to `f`.
    fn callee_name(&self, node: Node) -> Option<String> {
        match node.kind() {
            "identifier" | "field_identifier" | "property_identifier" => {
                Some(self.text_of(node).to_string())
            }
            "field_expression" => {
                let field = node.child_by_field_name("field")?;
                Some(self.text_of(field).to_string())
            }
            "attribute" => {
                let attr = node.child_by_field_name("attribute")?;
                Some(self.text_of(attr).to_string())
            }
            "member_expression" => {
                let prop = node.child_by_field_name("property")?;
                Some(self.text_of(prop).to_string())
            }
            "scoped_identifier" => {
                let name = node.child_by_field_name("name")?;
                Some(self.text_of(name).to_string())
            }
            "generic_function" => {
                let function = node.child_by_field_name("function")?;
                self.callee_name(function)
            }
            _ => None,
        }
    }

    fn extract_type_ref(&mut self, node: Node) {
        // A type_identifier that names its own declaration is not a use.
        if let Some(parent) = node.parent() {
            let is_declaration_name = parent
                .child_by_field_name("name")
                .map(|n| n.id() == node.id())
                .unwrap_or(false);
            if is_declaration_name {
                return;
            }
        }
        let pos = node.start_position();
        self.references.push(ParsedReference {
            symbol_name: self.text_of(node).to_string(),
            kind: RefKind::TypeRef,
            line: pos.row + 1,
            column: pos.column,
            context: self.context_line(pos.row),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(content: &str, language: SupportedLanguage) -> ParsedFile {
        TreeSitterParser::new()
            .unwrap()
            .parse_content(content, language)
            .unwrap()
    }

    #[test]
    fn rust_functions_and_methods() {
        let source = r#"
/// Adds two numbers.
pub fn add(a: i32, b: i32) -> i32 {
    a + b
}

struct Counter {
    n: u64,
}

impl Counter {
    fn bump(&mut self) {
        self.n += 1;
    }
}
"#;
        let parsed = parse(source, SupportedLanguage::Rust);
        let add = parsed.symbols.iter().find(|s| s.name == "add").unwrap();
        assert_eq!(add.kind, SymbolKind::Function);
        assert_eq!(add.signature, "pub fn add(a: i32, b: i32) -> i32");
        assert_eq!(add.doc_comment.as_deref(), Some("Adds two numbers."));
        assert_eq!(add.start_line, 3);
        assert_eq!(add.body_start_line, 3);
        assert_eq!(add.body_end_line, 5);

        let bump = parsed.symbols.iter().find(|s| s.name == "bump").unwrap();
        assert_eq!(bump.kind, SymbolKind::Method);

        let counter = parsed.symbols.iter().find(|s| s.name == "Counter").unwrap();
        assert_eq!(counter.kind, SymbolKind::Class);
    }

    #[test]
    fn rust_trait_is_interface_and_alias_is_type() {
        let source = "trait Store { fn get(&self) -> u8; }\ntype Alias = Vec<u8>;\n";
        let parsed = parse(source, SupportedLanguage::Rust);
        assert!(parsed
            .symbols
            .iter()
            .any(|s| s.name == "Store" && s.kind == SymbolKind::Interface));
        assert!(parsed
            .symbols
            .iter()
            .any(|s| s.name == "Alias" && s.kind == SymbolKind::TypeAlias));
    }

    #[test]
    fn rust_call_and_type_references() {
        let source = r#"
fn caller(input: Config) -> u32 {
    helper(input.len())
}
"#;
        let parsed = parse(source, SupportedLanguage::Rust);
        let calls: Vec<_> = parsed
            .references
            .iter()
            .filter(|r| r.kind == RefKind::Call)
            .collect();
        assert!(calls.iter().any(|r| r.symbol_name == "helper"));
        assert!(calls.iter().any(|r| r.symbol_name == "len"));
        let helper = calls.iter().find(|r| r.symbol_name == "helper").unwrap();
        assert_eq!(helper.line, 3);
        assert_eq!(helper.context, "helper(input.len())");

        assert!(parsed
            .references
            .iter()
            .any(|r| r.kind == RefKind::TypeRef && r.symbol_name == "Config"));
    }

    #[test]
    fn python_methods_and_docs() {
        let source = r#"
# Accumulates totals.
class Tally:
    def add(self, n):
        self.total += n

def standalone():
    pass
"#;
        let parsed = parse(source, SupportedLanguage::Python);
        let tally = parsed.symbols.iter().find(|s| s.name == "Tally").unwrap();
        assert_eq!(tally.kind, SymbolKind::Class);
        assert_eq!(tally.doc_comment.as_deref(), Some("Accumulates totals."));

        let add = parsed.symbols.iter().find(|s| s.name == "add").unwrap();
        assert_eq!(add.kind, SymbolKind::Method);

        let standalone = parsed
            .symbols
            .iter()
            .find(|s| s.name == "standalone")
            .unwrap();
        assert_eq!(standalone.kind, SymbolKind::Function);
    }

    #[test]
    fn typescript_interface_and_method() {
        let source = r#"
interface Store {
    get(key: string): string;
}

class MemoryStore {
    get(key: string): string {
        return lookup(key);
    }
}
"#;
        let parsed = parse(source, SupportedLanguage::TypeScript);
        assert!(parsed
            .symbols
            .iter()
            .any(|s| s.name == "Store" && s.kind == SymbolKind::Interface));
        assert!(parsed
            .symbols
            .iter()
            .any(|s| s.name == "get" && s.kind == SymbolKind::Method));
        assert!(parsed
            .references
            .iter()
            .any(|r| r.kind == RefKind::Call && r.symbol_name == "lookup"));
    }

    #[test]
    fn javascript_functions() {
        let source = "function greet(name) {\n  return format(name);\n}\n";
        let parsed = parse(source, SupportedLanguage::JavaScript);
        assert!(parsed
            .symbols
            .iter()
            .any(|s| s.name == "greet" && s.kind == SymbolKind::Function));
        assert!(parsed
            .references
            .iter()
            .any(|r| r.symbol_name == "format" && r.kind == RefKind::Call));
    }
}
