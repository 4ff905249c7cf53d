//! Language parsers for symbol extraction.
//!
//! Two backends share the [`SourceParser`] trait: a dedicated AST walker for
//! Python and a query-driven tree-sitter parser for the other languages. The
//! registry creates parsers lazily and keeps them for the analysis lifetime;
//! compiled grammars are cached process-wide.

mod python;
mod treesitter;

pub use python::PythonAstParser;
pub use treesitter::QueryParser;

use std::collections::HashMap;
use std::sync::{LazyLock, Mutex};

use crate::error::Result;

use super::models::{Language, Symbol};

/// Trait that all language parsers implement.
pub trait SourceParser: Send {
    fn language(&self) -> Language;

    /// Extract all symbols from a source file.
    ///
    /// Syntax errors do not fail the parse; tree-sitter recovers around
    /// ERROR nodes and whatever symbols remain recognizable are returned.
    fn parse(&mut self, source: &str) -> Result<Vec<Symbol>>;
}

/// Process-wide cache of compiled grammars, loaded on first use.
static GRAMMARS: LazyLock<Mutex<HashMap<Language, tree_sitter::Language>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// Get the compiled grammar for a language, loading it on first use.
pub fn grammar_for(language: Language) -> Option<tree_sitter::Language> {
    let mut cache = GRAMMARS.lock().expect("grammar cache poisoned");
    if let Some(grammar) = cache.get(&language) {
        return Some(grammar.clone());
    }
    let grammar = match language {
        Language::Python => tree_sitter_python::language(),
        Language::Javascript => tree_sitter_javascript::language(),
        Language::Typescript => tree_sitter_typescript::language_typescript(),
        Language::Go => tree_sitter_go::language(),
        Language::Rust => tree_sitter_rust::language(),
        Language::Java => tree_sitter_java::language(),
        Language::Unknown => return None,
    };
    cache.insert(language, grammar.clone());
    Some(grammar)
}

/// Registry mapping languages to parser instances.
pub struct ParserRegistry {
    parsers: HashMap<Language, Box<dyn SourceParser>>,
    diagnostics: Vec<String>,
}

impl ParserRegistry {
    pub fn new() -> Self {
        Self {
            parsers: HashMap::new(),
            diagnostics: Vec::new(),
        }
    }

    /// Extract symbols from `source`, creating the language's parser on
    /// first use. Returns `None` when the language is unsupported or the
    /// parser could not be built; failures are recorded as diagnostics.
    pub fn symbols(&mut self, language: Language, source: &str) -> Option<Vec<Symbol>> {
        if language == Language::Unknown {
            return None;
        }

        if !self.parsers.contains_key(&language) {
            match Self::create_parser(language) {
                Ok(parser) => {
                    self.parsers.insert(language, parser);
                }
                Err(e) => {
                    self.diagnostics
                        .push(format!("failed to initialize {language} parser: {e}"));
                    return None;
                }
            }
        }

        let parser = self.parsers.get_mut(&language)?;
        match parser.parse(source) {
            Ok(symbols) => Some(symbols),
            Err(e) => {
                self.diagnostics.push(format!("{language} parse error: {e}"));
                None
            }
        }
    }

    pub fn diagnostics(&self) -> &[String] {
        &self.diagnostics
    }

    pub fn record_diagnostic(&mut self, message: String) {
        self.diagnostics.push(message);
    }

    fn create_parser(language: Language) -> Result<Box<dyn SourceParser>> {
        match language {
            Language::Python => Ok(Box::new(PythonAstParser::new()?)),
            _ => Ok(Box::new(QueryParser::new(language)?)),
        }
    }
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self::new()
    }
}
