//! Prompt assembly: labeled sections with per-section character budgets.

use super::chain::CallChain;
use super::models::{ErrorReport, ProjectDescriptor, Symbol};

/// System prompt demanding a strict-JSON structured fix.
pub const SYSTEM_PROMPT: &str = r#"You are a code repair engine. Analyze the error and context provided.

CRITICAL RULES:
1. Return ONLY valid JSON. No markdown. No prose outside the JSON object.
2. "full_code_block" must contain the COMPLETE corrected content for the file, ready to replace it.
3. Do not include line numbers or markers in the code.
4. Preserve all imports and dependencies that were in the original context.

OUTPUT FORMAT (strict JSON):
{
  "filepath": "path/to/file.py",
  "full_code_block": "complete corrected file content",
  "explanation": "One paragraph describing what was fixed and why.",
  "root_cause_file": "path/to/other/file.py or null",
  "root_cause_explanation": "Why the bug originates elsewhere, or null",
  "additional_fixes": [
    {"filepath": "path", "full_code_block": "content", "explanation": "why"}
  ]
}

FILEPATH RULES:
- Use the exact path shown in the traceback or the provided context.
- If no specific source file is identified (network errors, configuration
  problems, missing environment variables), set "filepath" to null.
- NEVER invent or guess file paths.
- Set "root_cause_file" only when the defect demonstrably originates in a
  different file than the crash site; otherwise leave it null.
- Use "additional_fixes" when correcting the error requires coordinated
  changes in other files."#;

/// Follow-up system message for the one-shot malformed-output retry.
pub const RETRY_SYSTEM_PROMPT: &str = "Your previous reply was not parseable. Return ONLY a valid JSON object of the required shape. No markdown fences, no commentary.";

/// Character budgets for each prompt section.
#[derive(Debug, Clone)]
pub struct SectionBudgets {
    pub error_log: usize,
    pub descriptor: usize,
    pub call_chain: usize,
    pub upstream: usize,
}

impl Default for SectionBudgets {
    fn default() -> Self {
        Self {
            error_log: 8_000,
            descriptor: 3_000,
            call_chain: 16_000,
            upstream: 10_000,
        }
    }
}

pub struct PromptBuilder {
    budgets: SectionBudgets,
}

impl PromptBuilder {
    pub fn new(budgets: SectionBudgets) -> Self {
        Self { budgets }
    }

    /// Render the full user prompt from whatever investigation produced.
    pub fn build(
        &self,
        error_log: &str,
        descriptor: Option<&ProjectDescriptor>,
        file_tree: Option<&str>,
        chain: Option<&CallChain>,
        upstream_excerpts: &[(String, Vec<Symbol>)],
        graph_summary: Option<&str>,
        report: Option<&ErrorReport>,
    ) -> String {
        let mut prompt = String::new();

        prompt.push_str("## ERROR LOG\n");
        prompt.push_str(&truncate_chars(error_log, self.budgets.error_log));
        prompt.push('\n');

        if let Some(descriptor) = descriptor {
            prompt.push_str("\n## PROJECT DESCRIPTOR\n");
            let mut section = descriptor.summary();
            if let Some(tree) = file_tree {
                section.push_str("\n\nFile tree (verify paths against this before proposing fixes):\n```\n");
                section.push_str(tree);
                section.push_str("\n```");
            }
            prompt.push_str(&truncate_chars(&section, self.budgets.descriptor));
            prompt.push('\n');
        }

        if let Some(report) = report {
            prompt.push_str("\n## ERROR ANALYSIS\n");
            prompt.push_str(&format!(
                "Kind: {}\nCategory: {}\nConfidence: {:.2}\n",
                report.kind.as_str(),
                report.category,
                report.confidence
            ));
            if !report.routes.is_empty() {
                prompt.push_str(&format!("Affected routes: {}\n", report.routes.join(", ")));
            }
            if !report.keywords.is_empty() {
                prompt.push_str(&format!("Keywords: {}\n", report.keywords.join(", ")));
            }
        }

        if let Some(chain) = chain {
            if !chain.entries.is_empty() {
                prompt.push_str("\n## CALL CHAIN\n");
                prompt.push_str("(oldest caller first; the last entry is the crash site)\n");
                let mut section = String::new();
                for (index, entry) in chain.entries.iter().enumerate() {
                    let location = format!("{}:{}", entry.frame.filepath, entry.frame.line);
                    if entry.frame.external {
                        section.push_str(&format!("\n### [{index}] {location} (external)\n"));
                        continue;
                    }
                    let name = entry
                        .symbol
                        .as_ref()
                        .map(|s| s.qualified_name())
                        .or_else(|| entry.frame.symbol.clone())
                        .unwrap_or_else(|| "<unknown>".to_string());
                    section.push_str(&format!("\n### [{index}] {location} in {name}\n"));
                    if let Some(symbol) = &entry.symbol {
                        section.push_str(&format!(
                            "```\n{}\n```\n",
                            clip_symbol(symbol, self.budgets.call_chain / chain.entries.len().max(1))
                        ));
                    }
                }
                prompt.push_str(&truncate_chars(&section, self.budgets.call_chain));
                prompt.push('\n');
            }
        }

        if !upstream_excerpts.is_empty() || graph_summary.is_some() {
            prompt.push_str("\n## UPSTREAM CONTEXT\n");
            prompt.push_str("(files importing the crash site; possible root-cause locations)\n");
            let mut section = String::new();
            if let Some(summary) = graph_summary {
                section.push_str(summary);
                section.push('\n');
            }
            let per_file = self.budgets.upstream / upstream_excerpts.len().max(1);
            for (path, symbols) in upstream_excerpts {
                section.push_str(&format!("\n### {path}\n"));
                for symbol in symbols {
                    section.push_str(&format!("```\n{}\n```\n", clip_symbol(symbol, per_file)));
                }
            }
            prompt.push_str(&truncate_chars(&section, self.budgets.upstream));
            prompt.push('\n');
        }

        prompt.push_str("\n## INSTRUCTIONS\n");
        prompt.push_str(
            "Analyze the error above using the supplied context. Return the corrected code as a JSON object of the required shape. \
             full_code_block must be the complete replacement content for the file named in filepath. \
             If the root cause lies in a different file than the crash site, set root_cause_file and add coordinated changes to additional_fixes.\n",
        );

        prompt
    }
}

/// Clip a symbol body to a budget, marking the elided line range.
fn clip_symbol(symbol: &Symbol, budget: usize) -> String {
    if symbol.source_text.len() <= budget {
        return symbol.source_text.clone();
    }
    let kept_lines = symbol
        .source_text
        .chars()
        .take(budget)
        .collect::<String>()
        .matches('\n')
        .count();
    let first_hidden = symbol.start_line + kept_lines;
    let mut clipped: String = symbol.source_text.chars().take(budget).collect();
    clipped.push_str(&format!(
        "\n… [lines {}-{} truncated]",
        first_hidden, symbol.end_line
    ));
    clipped
}

fn truncate_chars(text: &str, budget: usize) -> String {
    if text.len() <= budget {
        return text.to_string();
    }
    let mut clipped: String = text.chars().take(budget).collect();
    clipped.push_str("\n… [truncated]");
    clipped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::chain::CallChain;
    use crate::core::models::{CallChainEntry, Frame, Symbol, SymbolKind};

    fn symbol(name: &str, start: usize, end: usize, body: &str) -> Symbol {
        Symbol {
            name: name.to_string(),
            kind: SymbolKind::Function,
            start_line: start,
            end_line: end,
            parent: None,
            source_text: body.to_string(),
        }
    }

    fn entry(path: &str, line: usize, sym: Option<Symbol>) -> CallChainEntry {
        CallChainEntry {
            frame: Frame {
                filepath: path.to_string(),
                line,
                column: None,
                symbol: None,
                raw: String::new(),
                external: false,
            },
            resolved_path: None,
            symbol: sym,
            imports: vec![],
        }
    }

    #[test]
    fn prompt_contains_labeled_sections_and_symbol_bodies() {
        let body = "def process_data(items, index):\n    return items[index]";
        let chain = CallChain {
            entries: vec![entry("src/main.py", 42, Some(symbol("process_data", 38, 47, body)))],
            upstream_files: vec![],
            files_read: vec![],
        };
        let builder = PromptBuilder::new(SectionBudgets::default());
        let prompt = builder.build(
            "IndexError: list index out of range",
            None,
            None,
            Some(&chain),
            &[],
            None,
            None,
        );
        assert!(prompt.contains("## ERROR LOG"));
        assert!(prompt.contains("## CALL CHAIN"));
        assert!(prompt.contains("## INSTRUCTIONS"));
        assert!(prompt.contains("src/main.py:42 in process_data"));
        assert!(prompt.contains(body));
    }

    #[test]
    fn long_symbols_are_truncated_with_line_range_marker() {
        let body: String = (1..=200)
            .map(|i| format!("    statement_{i}()"))
            .collect::<Vec<_>>()
            .join("\n");
        let sym = symbol("huge", 10, 209, &body);
        let clipped = clip_symbol(&sym, 400);
        assert!(clipped.len() < body.len());
        assert!(clipped.contains("truncated]"));
        assert!(clipped.contains("… [lines "));
    }

    #[test]
    fn external_frames_render_as_markers_only() {
        let mut external = entry("node:internal/run", 23, None);
        external.frame.external = true;
        let chain = CallChain {
            entries: vec![external],
            upstream_files: vec![],
            files_read: vec![],
        };
        let builder = PromptBuilder::new(SectionBudgets::default());
        let prompt = builder.build("Error: x", None, None, Some(&chain), &[], None, None);
        assert!(prompt.contains("node:internal/run:23 (external)"));
        assert!(!prompt.contains("```\n\n```"));
    }
}
