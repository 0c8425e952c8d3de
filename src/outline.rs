// Code outline renderer
// Compacts a source file using its symbol table: leaf callable bodies fold
// into one marker line, original line numbers are preserved so downstream
// tooling can re-open the file at the right offset.

use std::collections::BTreeMap;

use crate::code_store::SymbolRecord;

/// Rendering options.
#[derive(Debug, Clone, Default)]
pub struct OutlineOptions {
    /// Drop standalone comment lines outside bodies.
    pub strip_comments: bool,
}

fn is_comment_line(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("//")
        || trimmed.starts_with('#')
        || trimmed.starts_with("/*")
        || trimmed.starts_with('*')
}

/// Render a compact outline of `source`.
///
/// For each leaf callable (function or method, never class/interface
/// containers) the lines `[body_start+1 ..= body_end]` collapse into
/// `{ ... }  // lines A-B`. Everything else keeps its original line number.
/// Runs of blank lines collapse to one.
pub fn render_outline(
    source: &str,
    symbols: &[SymbolRecord],
    options: &OutlineOptions,
) -> String {
    let lines: Vec<&str> = source.lines().collect();

    // line -> end of the folded range starting at that line
    let mut folds: BTreeMap<usize, usize> = BTreeMap::new();
    let mut callables: Vec<&SymbolRecord> = symbols
        .iter()
        .filter(|s| s.kind.is_callable() && s.body_end_line > s.body_start_line)
        .collect();
    callables.sort_by_key(|s| s.body_start_line);

    let mut covered_until = 0usize;
    for symbol in callables {
        let fold_start = symbol.body_start_line + 1;
        let fold_end = symbol.body_end_line;
        if fold_start > fold_end {
            continue;
        }
        // A callable nested inside an already folded body stays folded with
        // its parent.
        if fold_start <= covered_until {
            continue;
        }
        folds.insert(fold_start, fold_end);
        covered_until = fold_end;
    }

    let mut out = String::new();
    let mut line_no = 1usize;
    let mut previous_blank = false;
    while line_no <= lines.len() {
        if let Some(&fold_end) = folds.get(&line_no) {
            out.push_str(&format!(
                "     | {{ ... }}  // lines {line_no}-{fold_end}\n"
            ));
            line_no = fold_end + 1;
            previous_blank = false;
            continue;
        }
        let line = lines[line_no - 1];
        if line.trim().is_empty() {
            if !previous_blank {
                out.push_str(&format!("{line_no:>4} |\n"));
            }
            previous_blank = true;
            line_no += 1;
            continue;
        }
        if options.strip_comments && is_comment_line(line) {
            line_no += 1;
            continue;
        }
        out.push_str(&format!("{line_no:>4} | {line}\n"));
        previous_blank = false;
        line_no += 1;
    }
    out
}
