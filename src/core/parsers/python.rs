use tree_sitter::{Node, Parser};

use crate::error::{Result, RomaError};

use super::super::models::{Language, Symbol, SymbolKind};
use super::{grammar_for, SourceParser};

/// Python parser walking the AST directly.
///
/// Collects functions (sync and async), classes, and class-nested methods
/// with exact line spans. Decorated definitions span from the first
/// decorator so the extractor slices the whole unit.
pub struct PythonAstParser {
    parser: Parser,
}

impl PythonAstParser {
    pub fn new() -> Result<Self> {
        let mut parser = Parser::new();
        let language = grammar_for(Language::Python)
            .ok_or_else(|| RomaError::Parser("Python grammar unavailable".to_string()))?;
        parser
            .set_language(&language)
            .map_err(|e| RomaError::Parser(format!("Failed to set Python language: {e}")))?;
        Ok(Self { parser })
    }

    fn walk(&self, node: Node, source: &str, class_name: Option<&str>, out: &mut Vec<Symbol>) {
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            match child.kind() {
                "function_definition" => {
                    if let Some(symbol) = self.function_symbol(child, source, class_name, None) {
                        out.push(symbol);
                    }
                    // Nested defs are still reachable symbols.
                    if let Some(body) = child.child_by_field_name("body") {
                        self.walk(body, source, None, out);
                    }
                }
                "class_definition" => {
                    if let Some(symbol) = self.class_symbol(child, source, None) {
                        let name = symbol.name.clone();
                        out.push(symbol);
                        if let Some(body) = child.child_by_field_name("body") {
                            self.walk(body, source, Some(&name), out);
                        }
                    }
                }
                "decorated_definition" => {
                    // The span includes the decorators.
                    let start = child.start_position().row + 1;
                    if let Some(def) = child.child_by_field_name("definition") {
                        match def.kind() {
                            "function_definition" => {
                                if let Some(symbol) =
                                    self.function_symbol(def, source, class_name, Some(start))
                                {
                                    out.push(symbol);
                                }
                                if let Some(body) = def.child_by_field_name("body") {
                                    self.walk(body, source, None, out);
                                }
                            }
                            "class_definition" => {
                                if let Some(mut symbol) = self.class_symbol(def, source, None) {
                                    symbol.start_line = start;
                                    let name = symbol.name.clone();
                                    out.push(symbol);
                                    if let Some(body) = def.child_by_field_name("body") {
                                        self.walk(body, source, Some(&name), out);
                                    }
                                }
                            }
                            _ => {}
                        }
                    }
                }
                _ => self.walk(child, source, class_name, out),
            }
        }
    }

    fn function_symbol(
        &self,
        node: Node,
        source: &str,
        class_name: Option<&str>,
        start_override: Option<usize>,
    ) -> Option<Symbol> {
        let name = self.node_text(node.child_by_field_name("name")?, source);
        let kind = match class_name {
            Some(_) if name == "__init__" => SymbolKind::Constructor,
            Some(_) => SymbolKind::Method,
            None => SymbolKind::Function,
        };
        Some(Symbol {
            name,
            kind,
            start_line: start_override.unwrap_or(node.start_position().row + 1),
            end_line: node.end_position().row + 1,
            parent: class_name.map(|c| c.to_string()),
            source_text: String::new(),
        })
    }

    fn class_symbol(&self, node: Node, source: &str, parent: Option<&str>) -> Option<Symbol> {
        let name = self.node_text(node.child_by_field_name("name")?, source);
        Some(Symbol {
            name,
            kind: SymbolKind::Class,
            start_line: node.start_position().row + 1,
            end_line: node.end_position().row + 1,
            parent: parent.map(|p| p.to_string()),
            source_text: String::new(),
        })
    }

    fn node_text(&self, node: Node, source: &str) -> String {
        source[node.byte_range()].to_string()
    }
}

impl SourceParser for PythonAstParser {
    fn language(&self) -> Language {
        Language::Python
    }

    fn parse(&mut self, source: &str) -> Result<Vec<Symbol>> {
        let tree = self
            .parser
            .parse(source, None)
            .ok_or_else(|| RomaError::Parser("Failed to parse Python source".to_string()))?;

        let mut symbols = Vec::new();
        self.walk(tree.root_node(), source, None, &mut symbols);
        Ok(symbols)
    }
}
