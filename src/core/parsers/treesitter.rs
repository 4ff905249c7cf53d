use tree_sitter::{Parser, Query, QueryCursor};

use crate::error::{Result, RomaError};

use super::super::models::{Language, Symbol, SymbolKind};
use super::{grammar_for, SourceParser};

/// Query-driven parser for the non-Python languages.
///
/// Each language ships a query file selecting declaration nodes; the outer
/// capture name determines the symbol kind and the `@name` capture supplies
/// the identifier.
pub struct QueryParser {
    language: Language,
    parser: Parser,
    query: Query,
    name_index: u32,
}

fn query_source(language: Language) -> Option<&'static str> {
    match language {
        Language::Javascript => Some(include_str!("queries/javascript.scm")),
        Language::Typescript => Some(include_str!("queries/typescript.scm")),
        Language::Go => Some(include_str!("queries/go.scm")),
        Language::Rust => Some(include_str!("queries/rust.scm")),
        Language::Java => Some(include_str!("queries/java.scm")),
        _ => None,
    }
}

fn kind_from_capture(name: &str) -> Option<SymbolKind> {
    match name {
        "function" => Some(SymbolKind::Function),
        "method" => Some(SymbolKind::Method),
        "class" => Some(SymbolKind::Class),
        "struct" => Some(SymbolKind::Struct),
        "interface" => Some(SymbolKind::Interface),
        "impl" => Some(SymbolKind::Impl),
        "enum" => Some(SymbolKind::Enum),
        "constructor" => Some(SymbolKind::Constructor),
        _ => None,
    }
}

impl QueryParser {
    pub fn new(language: Language) -> Result<Self> {
        let grammar = grammar_for(language)
            .ok_or_else(|| RomaError::Parser(format!("no grammar for {language}")))?;
        let source = query_source(language)
            .ok_or_else(|| RomaError::Parser(format!("no symbol query for {language}")))?;

        let mut parser = Parser::new();
        parser
            .set_language(&grammar)
            .map_err(|e| RomaError::Parser(format!("Failed to set {language} language: {e}")))?;

        let query = Query::new(&grammar, source)
            .map_err(|e| RomaError::Parser(format!("invalid {language} symbol query: {e}")))?;
        let name_index = query
            .capture_index_for_name("name")
            .ok_or_else(|| RomaError::Parser(format!("{language} query lacks a @name capture")))?;

        Ok(Self {
            language,
            parser,
            query,
            name_index,
        })
    }

    /// Functions captured inside a container span are methods of it.
    fn attach_parents(symbols: &mut Vec<Symbol>) {
        let containers: Vec<(String, usize, usize)> = symbols
            .iter()
            .filter(|s| {
                matches!(
                    s.kind,
                    SymbolKind::Class | SymbolKind::Struct | SymbolKind::Impl | SymbolKind::Interface
                )
            })
            .map(|s| (s.name.clone(), s.start_line, s.end_line))
            .collect();

        for symbol in symbols.iter_mut() {
            if !matches!(
                symbol.kind,
                SymbolKind::Function | SymbolKind::Method | SymbolKind::Constructor
            ) || symbol.parent.is_some()
            {
                continue;
            }
            let enclosing = containers
                .iter()
                .filter(|(_, start, end)| *start < symbol.start_line && symbol.end_line <= *end)
                .min_by_key(|(_, start, end)| end - start);
            if let Some((parent, _, _)) = enclosing {
                if symbol.kind == SymbolKind::Function {
                    symbol.kind = SymbolKind::Method;
                }
                symbol.parent = Some(parent.clone());
            }
        }
    }
}

impl SourceParser for QueryParser {
    fn language(&self) -> Language {
        self.language
    }

    fn parse(&mut self, source: &str) -> Result<Vec<Symbol>> {
        let tree = self
            .parser
            .parse(source, None)
            .ok_or_else(|| RomaError::Parser(format!("failed to parse {} source", self.language)))?;

        let capture_names = self.query.capture_names();
        let mut cursor = QueryCursor::new();
        let mut symbols = Vec::new();

        for query_match in cursor.matches(&self.query, tree.root_node(), source.as_bytes()) {
            let mut name = None;
            let mut body = None;
            for capture in query_match.captures {
                if capture.index == self.name_index {
                    name = Some(source[capture.node.byte_range()].to_string());
                } else if let Some(kind) =
                    kind_from_capture(capture_names[capture.index as usize])
                {
                    body = Some((kind, capture.node));
                }
            }
            if let (Some(name), Some((kind, node))) = (name, body) {
                symbols.push(Symbol {
                    name,
                    kind,
                    start_line: node.start_position().row + 1,
                    end_line: node.end_position().row + 1,
                    parent: None,
                    source_text: String::new(),
                });
            }
        }

        Self::attach_parents(&mut symbols);
        Ok(symbols)
    }
}
