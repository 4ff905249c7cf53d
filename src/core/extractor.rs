//! Symbol-precise context extraction around a traceback frame.

use std::path::Path;

use super::models::{Language, Symbol, SymbolKind};
use super::parsers::ParserRegistry;

/// Lines of context on each side when no symbol contains the target line.
const FALLBACK_CONTEXT_LINES: usize = 50;

/// Extracts the enclosing symbol for (file, line) pairs.
///
/// Never fails: parse errors are recorded as diagnostics on the registry
/// and the line-window fallback is used instead.
pub struct ContextExtractor {
    registry: ParserRegistry,
}

impl ContextExtractor {
    pub fn new() -> Self {
        Self {
            registry: ParserRegistry::new(),
        }
    }

    /// Best symbol whose span contains `line`, with `source_text` filled
    /// from the file content. Falls back to a synthetic window symbol.
    pub fn extract(&mut self, path: &Path, line: usize, language: Language) -> Option<Symbol> {
        let source = match std::fs::read_to_string(path) {
            Ok(source) => source,
            Err(e) => {
                self.registry
                    .record_diagnostic(format!("cannot read {}: {e}", path.display()));
                return None;
            }
        };
        Some(self.extract_from_source(path, &source, line, language))
    }

    /// Same as [`extract`] but for already-loaded source.
    pub fn extract_from_source(
        &mut self,
        path: &Path,
        source: &str,
        line: usize,
        language: Language,
    ) -> Symbol {
        let language = if language == Language::Unknown {
            Language::from_path(path)
        } else {
            language
        };

        let symbols = self.registry.symbols(language, source).unwrap_or_default();
        let best = select_enclosing(&symbols, line);

        let lines: Vec<&str> = source.lines().collect();
        match best {
            Some(symbol) => {
                let mut symbol = symbol.clone();
                symbol.source_text = slice_lines(&lines, symbol.start_line, symbol.end_line);
                symbol
            }
            None => fallback_symbol(path, &lines, line),
        }
    }

    pub fn diagnostics(&self) -> &[String] {
        self.registry.diagnostics()
    }
}

impl Default for ContextExtractor {
    fn default() -> Self {
        Self::new()
    }
}

/// Innermost symbol containing the line: smallest span wins, ties broken by
/// the latest start line.
fn select_enclosing(symbols: &[Symbol], line: usize) -> Option<&Symbol> {
    symbols
        .iter()
        .filter(|s| s.contains_line(line))
        .min_by(|a, b| a.span().cmp(&b.span()).then(b.start_line.cmp(&a.start_line)))
}

/// Synthetic window around the target line, clipped to file bounds.
fn fallback_symbol(path: &Path, lines: &[&str], line: usize) -> Symbol {
    let total = lines.len().max(1);
    let target = line.clamp(1, total);
    let start = target.saturating_sub(FALLBACK_CONTEXT_LINES).max(1);
    let end = (target + FALLBACK_CONTEXT_LINES).min(total);
    Symbol {
        name: path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("file")
            .to_string(),
        kind: SymbolKind::Other,
        start_line: start,
        end_line: end,
        parent: None,
        source_text: slice_lines(lines, start, end),
    }
}

fn slice_lines(lines: &[&str], start: usize, end: usize) -> String {
    let start_idx = start.saturating_sub(1);
    let end_idx = end.min(lines.len());
    if start_idx >= end_idx {
        return String::new();
    }
    lines[start_idx..end_idx].join("\n")
}
