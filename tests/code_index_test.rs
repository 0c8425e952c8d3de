// Code index end-to-end: freshness cache, symbol fidelity and the outline
// over real parsed source.
#![cfg(feature = "tree-sitter-parsing")]

use anyhow::Result;
use tempfile::TempDir;

use aide::backend::{Backend, DirectBackend};
use aide::outline::{render_outline, OutlineOptions};
use aide::parsing::SymbolKind;
use aide::paths::ProjectPaths;

const SOURCE: &str = r#"/// Accumulating counter.
pub struct Counter {
    total: u64,
}

impl Counter {
    /// Add one sample.
    pub fn record(&mut self, value: u64) {
        self.total += value;
        self.normalise();
    }

    fn normalise(&mut self) {
        if self.total > 1_000_000 {
            self.total = 1_000_000;
        }
    }
}

pub fn fresh() -> Counter {
    Counter { total: 0 }
}
"#;

async fn project() -> Result<(TempDir, DirectBackend)> {
    let dir = TempDir::new()?;
    std::fs::create_dir_all(dir.path().join("src"))?;
    std::fs::write(dir.path().join("src/counter.rs"), SOURCE)?;
    let backend = DirectBackend::open(&ProjectPaths::new(dir.path())).await?;
    Ok((dir, backend))
}

#[tokio::test]
async fn index_extracts_symbols_and_freshness() -> Result<()> {
    let (dir, backend) = project().await?;

    let stats = backend.code_index(false).await?;
    assert_eq!(stats.files_indexed, 1);
    assert_eq!(stats.files_skipped, 0);
    assert!(stats.symbols_indexed >= 4, "struct + 2 methods + function");

    let symbols = backend.code_symbols("src/counter.rs".into()).await?;
    let record = symbols.iter().find(|s| s.name == "record").unwrap();
    assert_eq!(record.kind, SymbolKind::Method);
    assert!(record.signature.contains("pub fn record"));
    assert_eq!(record.doc_comment.as_deref(), Some("Add one sample."));

    let fresh = symbols.iter().find(|s| s.name == "fresh").unwrap();
    assert_eq!(fresh.kind, SymbolKind::Function);

    // Property 5: a second run without edits indexes nothing and counts one
    // skipped file.
    let stats = backend.code_index(false).await?;
    assert_eq!(stats.files_indexed, 0);
    assert_eq!(stats.files_skipped, 1);

    drop(dir);
    Ok(())
}

#[tokio::test]
async fn references_carry_context_lines() -> Result<()> {
    let (_dir, backend) = project().await?;
    backend.code_index(false).await?;

    let refs = backend.code_references("normalise".into()).await?;
    assert_eq!(refs.len(), 1);
    assert_eq!(refs[0].file_path, "src/counter.rs");
    assert_eq!(refs[0].context, "self.normalise();");
    Ok(())
}

#[tokio::test]
async fn search_finds_symbols_by_fragment() -> Result<()> {
    let (_dir, backend) = project().await?;
    backend.code_index(false).await?;

    let hits = backend.code_search("normal".into(), 10).await?;
    assert!(hits.iter().any(|(s, _)| s.name == "normalise"));
    Ok(())
}

#[tokio::test]
async fn outline_folds_callables_only() -> Result<()> {
    let (_dir, backend) = project().await?;
    backend.code_index(false).await?;

    let symbols = backend.code_symbols("src/counter.rs".into()).await?;
    let outline = render_outline(SOURCE, &symbols, &OutlineOptions::default());

    // Method bodies fold; the struct body does not.
    assert!(outline.contains("{ ... }"));
    assert!(outline.contains("total: u64"));
    // Signature lines keep their original numbers.
    assert!(outline.contains("   8 | "), "outline:\n{outline}");
    assert!(!outline.contains("self.total += value"));
    Ok(())
}

#[tokio::test]
async fn clear_then_stats_reports_empty() -> Result<()> {
    let (_dir, backend) = project().await?;
    backend.code_index(false).await?;
    assert!(backend.code_stats().await?.symbols > 0);

    backend.code_clear().await?;
    let stats = backend.code_stats().await?;
    assert_eq!(stats.files, 0);
    assert_eq!(stats.symbols, 0);
    assert_eq!(stats.references, 0);
    Ok(())
}
