//! Core data model shared across the investigation pipeline.
//!
//! Everything here is derived from a (log, project_root) pair during one
//! analysis and discarded afterwards; nothing is persisted.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Supported source languages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    Javascript,
    Typescript,
    Go,
    Rust,
    Java,
    Unknown,
}

impl Language {
    /// Map a file extension (with or without leading dot) to a language.
    pub fn from_extension(ext: &str) -> Self {
        match ext.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "py" | "pyw" | "pyi" => Language::Python,
            "js" | "mjs" | "cjs" | "jsx" => Language::Javascript,
            "ts" | "tsx" | "mts" | "cts" => Language::Typescript,
            "go" => Language::Go,
            "rs" => Language::Rust,
            "java" | "kt" => Language::Java,
            _ => Language::Unknown,
        }
    }

    /// Map a file path to a language by its extension.
    pub fn from_path(path: &Path) -> Self {
        path.extension()
            .and_then(|e| e.to_str())
            .map(Language::from_extension)
            .unwrap_or(Language::Unknown)
    }

    /// Parse a user-supplied language name (CLI/API hint).
    pub fn from_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "python" | "py" => Language::Python,
            "javascript" | "js" => Language::Javascript,
            "typescript" | "ts" => Language::Typescript,
            "go" | "golang" => Language::Go,
            "rust" | "rs" => Language::Rust,
            "java" => Language::Java,
            _ => Language::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::Javascript => "javascript",
            Language::Typescript => "typescript",
            Language::Go => "go",
            Language::Rust => "rust",
            Language::Java => "java",
            Language::Unknown => "unknown",
        }
    }

    /// All languages with traceback and parser support.
    pub fn supported() -> &'static [Language] {
        &[
            Language::Python,
            Language::Javascript,
            Language::Typescript,
            Language::Go,
            Language::Rust,
            Language::Java,
        ]
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a stack trace after normalization.
///
/// Frames are ordered oldest-caller-first: index 0 is the outermost caller,
/// the last frame is the crash site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    /// Path as it appeared in the log (absolute or repo-relative).
    pub filepath: String,
    /// 1-based line number.
    pub line: usize,
    /// Optional column, when the trace format carries one.
    pub column: Option<usize>,
    /// Function/method name, when the trace format carries one.
    pub symbol: Option<String>,
    /// The raw log line this frame was extracted from.
    pub raw: String,
    /// True for frames outside the project (stdlib, node internals, vendored deps).
    pub external: bool,
}

impl Default for Language {
    fn default() -> Self {
        Language::Unknown
    }
}

/// A fully parsed traceback: normalized frames plus the error line.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParsedTraceback {
    pub language: Language,
    pub frames: Vec<Frame>,
    pub error_type: Option<String>,
    pub error_message: Option<String>,
}

impl ParsedTraceback {
    /// The crash site (deepest frame), after normalization the last one.
    pub fn crash_frame(&self) -> Option<&Frame> {
        self.frames.last()
    }

    /// Unique file paths across all frames, in frame order.
    pub fn files(&self) -> Vec<&str> {
        let mut seen = Vec::new();
        for frame in &self.frames {
            if !seen.contains(&frame.filepath.as_str()) {
                seen.push(frame.filepath.as_str());
            }
        }
        seen
    }
}

/// Kind of syntactic unit a [`Symbol`] represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolKind {
    Function,
    Method,
    Class,
    Struct,
    Interface,
    Impl,
    Enum,
    Constructor,
    Other,
}

impl SymbolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SymbolKind::Function => "function",
            SymbolKind::Method => "method",
            SymbolKind::Class => "class",
            SymbolKind::Struct => "struct",
            SymbolKind::Interface => "interface",
            SymbolKind::Impl => "impl",
            SymbolKind::Enum => "enum",
            SymbolKind::Constructor => "constructor",
            SymbolKind::Other => "other",
        }
    }
}

/// A syntactic region extracted from a source file.
///
/// Spans are inclusive and 1-based. Symbols never overlap except by
/// containment (a method nested in its class).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    pub start_line: usize,
    pub end_line: usize,
    /// Name of the enclosing class/impl for methods.
    pub parent: Option<String>,
    /// Source text between `start_line` and `end_line`, inclusive.
    pub source_text: String,
}

impl Symbol {
    pub fn contains_line(&self, line: usize) -> bool {
        self.start_line <= line && line <= self.end_line
    }

    pub fn span(&self) -> usize {
        self.end_line - self.start_line
    }

    /// `Class.method` when a parent is known, the bare name otherwise.
    pub fn qualified_name(&self) -> String {
        match &self.parent {
            Some(parent) => format!("{}.{}", parent, self.name),
            None => self.name.clone(),
        }
    }
}

/// How confident the resolver is that an import maps to the resolved file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    /// Exactly one candidate file existed.
    Certain,
    /// One of several plausible candidates was chosen.
    Heuristic,
    /// No project-local file matched (bare specifier, stdlib, external).
    Unresolved,
}

/// A resolved import edge from one source file to another.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Import {
    /// File containing the import statement.
    pub source_file: PathBuf,
    /// The statement text as written.
    pub text: String,
    /// The imported module/path as written (`a.b`, `./utils`, `repo/pkg`).
    pub module: String,
    /// 1-based line of the statement.
    pub line: usize,
    /// Absolute path of the target file when resolution succeeded.
    pub resolved: Option<PathBuf>,
    pub confidence: Confidence,
}

/// A frame enriched with its enclosing symbol and the file's imports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallChainEntry {
    pub frame: Frame,
    /// Resolved absolute path, when the frame's file was found on disk.
    pub resolved_path: Option<PathBuf>,
    pub symbol: Option<Symbol>,
    pub imports: Vec<Import>,
}

/// Classification of a scanned project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectType {
    Python,
    Node,
    Go,
    Rust,
    Java,
    Unknown,
}

impl ProjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectType::Python => "python",
            ProjectType::Node => "node",
            ProjectType::Go => "go",
            ProjectType::Rust => "rust",
            ProjectType::Java => "java",
            ProjectType::Unknown => "unknown",
        }
    }
}

/// One source file found by the project scanner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceFile {
    /// Path relative to the project root.
    pub path: PathBuf,
    pub language: Language,
    pub is_entry_point: bool,
    pub size: u64,
}

impl SourceFile {
    pub fn filename(&self) -> &str {
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
    }
}

/// Result of scanning a project root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectDescriptor {
    pub root: PathBuf,
    pub project_type: ProjectType,
    pub frameworks: Vec<String>,
    pub entry_points: Vec<PathBuf>,
    pub source_files: Vec<SourceFile>,
    pub config_files: Vec<PathBuf>,
    pub language_counts: HashMap<Language, usize>,
}

impl ProjectDescriptor {
    /// The language with the most source files.
    pub fn primary_language(&self) -> Language {
        self.language_counts
            .iter()
            .max_by_key(|(_, count)| **count)
            .map(|(lang, _)| *lang)
            .unwrap_or(Language::Unknown)
    }

    pub fn summary(&self) -> String {
        let mut lines = vec![
            format!("Type: {}", self.project_type.as_str()),
            format!("Primary language: {}", self.primary_language()),
            format!(
                "Frameworks: {}",
                if self.frameworks.is_empty() {
                    "none detected".to_string()
                } else {
                    self.frameworks.join(", ")
                }
            ),
            format!("Source files: {}", self.source_files.len()),
        ];
        if !self.entry_points.is_empty() {
            lines.push("Entry points:".to_string());
            for ep in self.entry_points.iter().take(5) {
                lines.push(format!("  - {}", ep.display()));
            }
        }
        lines.join("\n")
    }
}

/// Coarse classification of an error message (no-traceback path).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    Http,
    Database,
    Import,
    Runtime,
    Type,
    Other,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Http => "http",
            ErrorKind::Database => "database",
            ErrorKind::Import => "import",
            ErrorKind::Runtime => "runtime",
            ErrorKind::Type => "type",
            ErrorKind::Other => "other",
        }
    }
}

/// A candidate file scored against an error message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredFile {
    pub file: SourceFile,
    pub score: f64,
}

/// Result of analyzing an error message without usable frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    /// Fine-grained category, e.g. `http_404` or `python_import`.
    pub category: String,
    pub message: String,
    pub keywords: Vec<String>,
    pub routes: Vec<String>,
    pub confidence: f64,
    pub candidates: Vec<ScoredFile>,
    pub suggested_language: Option<Language>,
}

/// The model-returned structured fix, validated by the normalizer.
///
/// `additional_fixes` nest one level deep in practice.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FixProposal {
    #[serde(default)]
    pub filepath: Option<String>,
    #[serde(default)]
    pub full_code_block: String,
    #[serde(default)]
    pub explanation: String,
    #[serde(default)]
    pub root_cause_file: Option<String>,
    #[serde(default)]
    pub root_cause_explanation: Option<String>,
    #[serde(default)]
    pub additional_fixes: Vec<FixProposal>,
}

/// Where a file read during investigation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadSource {
    Traceback,
    Import,
    Scan,
    Manual,
}

impl ReadSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadSource::Traceback => "traceback",
            ReadSource::Import => "import",
            ReadSource::Scan => "scan",
            ReadSource::Manual => "manual",
        }
    }
}

/// Audit record of one file read during investigation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadRecord {
    pub path: PathBuf,
    pub source: ReadSource,
}

/// One validated file patch with its unified diff.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilePatch {
    /// Project-relative, normalized path.
    pub path: PathBuf,
    /// Complete replacement content.
    pub new_content: String,
    /// Unified diff against the live file (3 lines of context).
    pub diff: String,
    pub explanation: String,
}

/// A rejected patch and the reason it was refused.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectedPatch {
    pub path: String,
    pub reason: String,
}

/// The normalized proposal plus computed diffs and the read audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchSet {
    pub proposal: FixProposal,
    /// Patches in apply order: primary first, then additional fixes.
    pub patches: Vec<FilePatch>,
    pub rejected: Vec<RejectedPatch>,
    pub files_read: Vec<ReadRecord>,
}

impl PatchSet {
    pub fn files_read_sources(&self) -> HashMap<String, &'static str> {
        self.files_read
            .iter()
            .map(|r| (r.path.display().to_string(), r.source.as_str()))
            .collect()
    }
}
