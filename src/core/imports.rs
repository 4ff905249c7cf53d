//! Static import resolution: maps textual import statements to files on disk.
//!
//! No user code is executed; resolution is pattern-directed per language.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use walkdir::WalkDir;

use super::models::{Confidence, Import, Language};

static PY_IMPORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*import\s+(?P<modules>[\w.]+(?:\s*,\s*[\w.]+)*)").unwrap());

static PY_FROM_IMPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*from\s+(?P<dots>\.*)(?P<module>[\w.]*)\s+import\s+").unwrap()
});

static JS_IMPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)(?:import|export)\s+(?:[\w{},*\s$]+\s+from\s+)?['"](?P<module>[^'"]+)['"]"#)
        .unwrap()
});

static JS_REQUIRE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"require\s*\(\s*['"](?P<module>[^'"]+)['"]\s*\)"#).unwrap());

static GO_IMPORT_SINGLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?m)^\s*import\s+(?:\w+\s+)?"(?P<module>[^"]+)""#).unwrap());

static GO_IMPORT_SPEC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?m)^\s*(?:[\w.]+\s+)?"(?P<module>[^"]+)"\s*$"#).unwrap());

static RUST_USE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*(?:pub(?:\([\w:\s]*\))?\s+)?use\s+(?P<path>[\w:]+)").unwrap()
});

static JAVA_IMPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*import\s+(?:static\s+)?(?P<module>[\w.]+?)(?:\.\*)?\s*;").unwrap()
});

static GO_MODULE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^module\s+(?P<path>\S+)").unwrap());

/// A parsed but unresolved import statement.
#[derive(Debug, Clone)]
struct RawImport {
    text: String,
    module: String,
    line: usize,
    relative_level: usize,
}

/// Resolves import statements of one project to concrete file paths.
pub struct ImportResolver {
    project_root: PathBuf,
    cache: HashMap<String, (Option<PathBuf>, Confidence)>,
    go_module: Option<Option<String>>,
}

impl ImportResolver {
    pub fn new(project_root: &Path) -> Self {
        Self {
            project_root: project_root.to_path_buf(),
            cache: HashMap::new(),
            go_module: None,
        }
    }

    /// Enumerate and resolve every import statement of a source file.
    pub fn resolve_file(&mut self, source_file: &Path, language: Language) -> Vec<Import> {
        let source = match std::fs::read_to_string(source_file) {
            Ok(source) => source,
            Err(_) => return Vec::new(),
        };
        self.resolve_source(source_file, &source, language)
    }

    /// Same as [`resolve_file`] for already-loaded source.
    pub fn resolve_source(
        &mut self,
        source_file: &Path,
        source: &str,
        language: Language,
    ) -> Vec<Import> {
        extract_statements(source, language)
            .into_iter()
            .map(|raw| self.resolve_one(source_file, raw, language))
            .collect()
    }

    fn resolve_one(&mut self, source_file: &Path, raw: RawImport, language: Language) -> Import {
        let cache_key = format!(
            "{}:{}:{}:{}",
            language,
            source_file.display(),
            raw.module,
            raw.relative_level
        );
        let (resolved, confidence) = match self.cache.get(&cache_key) {
            Some(hit) => hit.clone(),
            None => {
                let result = match language {
                    Language::Python => self.resolve_python(&raw, source_file),
                    Language::Javascript | Language::Typescript => {
                        self.resolve_js(&raw, source_file)
                    }
                    Language::Go => self.resolve_go(&raw),
                    Language::Rust => self.resolve_rust(&raw),
                    Language::Java => self.resolve_java(&raw),
                    Language::Unknown => (None, Confidence::Unresolved),
                };
                self.cache.insert(cache_key, result.clone());
                result
            }
        };

        Import {
            source_file: source_file.to_path_buf(),
            text: raw.text,
            module: raw.module,
            line: raw.line,
            resolved,
            confidence,
        }
    }

    /// `a.b` -> `a/b.py` or `a/b/__init__.py`, probed from the project root
    /// and common source directories. Relative imports resolve against the
    /// source file's package directory.
    fn resolve_python(&self, raw: &RawImport, source_file: &Path) -> (Option<PathBuf>, Confidence) {
        let parts: Vec<&str> = raw.module.split('.').filter(|p| !p.is_empty()).collect();

        if raw.relative_level > 0 {
            let mut base = source_file.parent().map(Path::to_path_buf).unwrap_or_default();
            for _ in 1..raw.relative_level {
                base = base.parent().map(Path::to_path_buf).unwrap_or_default();
            }
            let target = parts.iter().fold(base, |acc, part| acc.join(part));
            return pick_candidate(&[
                target.with_extension("py"),
                target.join("__init__.py"),
            ]);
        }

        let mut candidates = Vec::new();
        for base in ["", "src", "lib", "app"] {
            let root = if base.is_empty() {
                self.project_root.clone()
            } else {
                self.project_root.join(base)
            };
            if !root.is_dir() {
                continue;
            }
            let target = parts.iter().fold(root, |acc, part| acc.join(part));
            candidates.push(target.with_extension("py"));
            candidates.push(target.join("__init__.py"));
        }
        pick_candidate(&candidates)
    }

    /// Relative specifiers probe extensions then index files; bare
    /// specifiers (npm packages) stay unresolved.
    fn resolve_js(&self, raw: &RawImport, source_file: &Path) -> (Option<PathBuf>, Confidence) {
        let module = raw.module.as_str();
        let target = if module.starts_with("./") || module.starts_with("../") {
            match source_file.parent() {
                Some(dir) => normalize_lexically(&dir.join(module)),
                None => return (None, Confidence::Unresolved),
            }
        } else if let Some(stripped) = module.strip_prefix('/') {
            self.project_root.join(stripped)
        } else {
            return (None, Confidence::Unresolved);
        };

        let mut candidates = Vec::new();
        if target.is_file() {
            candidates.push(target.clone());
        }
        for ext in ["ts", "tsx", "js", "jsx", "mjs", "cjs"] {
            let mut path = target.as_os_str().to_os_string();
            path.push(format!(".{ext}"));
            candidates.push(PathBuf::from(path));
        }
        for index in ["index.ts", "index.tsx", "index.js", "index.jsx"] {
            candidates.push(target.join(index));
        }
        pick_candidate(&candidates)
    }

    /// Module-path-aware when go.mod is present, otherwise the import path
    /// tail is matched against directory suffixes; the first .go file of the
    /// matched package directory is the edge target.
    fn resolve_go(&mut self, raw: &RawImport) -> (Option<PathBuf>, Confidence) {
        let module = raw.module.clone();
        if !module.contains('/') {
            // Standard library.
            return (None, Confidence::Unresolved);
        }

        if let Some(module_path) = self.go_module_path() {
            if let Some(rest) = module.strip_prefix(&module_path) {
                let rel = rest.trim_start_matches('/');
                let dir = self.project_root.join(rel);
                if let Some(file) = first_go_file(&dir) {
                    return (Some(file), Confidence::Certain);
                }
            }
        }

        // Suffix match against project directories; first match wins.
        let mut parts: Vec<&str> = module.split('/').collect();
        if parts.first().map(|p| p.contains('.')).unwrap_or(false) {
            parts.remove(0);
        }
        for start in 0..parts.len() {
            let dir = parts[start..]
                .iter()
                .fold(self.project_root.clone(), |acc, part| acc.join(part));
            if let Some(file) = first_go_file(&dir) {
                return (Some(file), Confidence::Heuristic);
            }
        }
        (None, Confidence::Unresolved)
    }

    /// `use a::b::c` -> `src/a/b.rs` or `src/a/b/mod.rs`.
    fn resolve_rust(&self, raw: &RawImport) -> (Option<PathBuf>, Confidence) {
        let segments: Vec<&str> = raw
            .module
            .split("::")
            .filter(|s| !matches!(*s, "crate" | "self" | "super" | ""))
            .collect();
        if segments.is_empty() {
            return (None, Confidence::Unresolved);
        }
        if matches!(segments[0], "std" | "core" | "alloc") {
            return (None, Confidence::Unresolved);
        }

        let src = self.project_root.join("src");
        let mut candidates = Vec::new();
        for depth in (1..=segments.len().min(2)).rev() {
            let stem = segments[..depth].iter().fold(src.clone(), |acc, s| acc.join(s));
            candidates.push(stem.with_extension("rs"));
            candidates.push(stem.join("mod.rs"));
        }
        pick_candidate(&candidates)
    }

    /// Dots to slashes, `.java` appended, probed under standard source roots.
    fn resolve_java(&self, raw: &RawImport) -> (Option<PathBuf>, Confidence) {
        let rel: PathBuf = raw.module.split('.').collect();
        let mut candidates = Vec::new();
        for root in ["src/main/java", "src", ""] {
            let base = if root.is_empty() {
                self.project_root.clone()
            } else {
                self.project_root.join(root)
            };
            candidates.push(base.join(&rel).with_extension("java"));
        }
        pick_candidate(&candidates)
    }

    fn go_module_path(&mut self) -> Option<String> {
        if self.go_module.is_none() {
            let path = std::fs::read_to_string(self.project_root.join("go.mod"))
                .ok()
                .and_then(|content| {
                    GO_MODULE
                        .captures(&content)
                        .map(|cap| cap["path"].to_string())
                });
            self.go_module = Some(path);
        }
        self.go_module.clone().flatten()
    }
}

/// Enumerate import statements without resolving them.
fn extract_statements(source: &str, language: Language) -> Vec<RawImport> {
    let mut raws = Vec::new();
    let line_of = |offset: usize| source[..offset].matches('\n').count() + 1;

    match language {
        Language::Python => {
            for cap in PY_IMPORT.captures_iter(source) {
                let whole = cap.get(0).unwrap();
                for module in cap["modules"].split(',') {
                    raws.push(RawImport {
                        text: whole.as_str().trim().to_string(),
                        module: module.trim().to_string(),
                        line: line_of(whole.start()),
                        relative_level: 0,
                    });
                }
            }
            for cap in PY_FROM_IMPORT.captures_iter(source) {
                let whole = cap.get(0).unwrap();
                raws.push(RawImport {
                    text: whole.as_str().trim().to_string(),
                    module: cap["module"].to_string(),
                    line: line_of(whole.start()),
                    relative_level: cap["dots"].len(),
                });
            }
        }
        Language::Javascript | Language::Typescript => {
            for regex in [&*JS_IMPORT, &*JS_REQUIRE] {
                for cap in regex.captures_iter(source) {
                    let whole = cap.get(0).unwrap();
                    raws.push(RawImport {
                        text: whole.as_str().trim().to_string(),
                        module: cap["module"].to_string(),
                        line: line_of(whole.start()),
                        relative_level: 0,
                    });
                }
            }
        }
        Language::Go => {
            for cap in GO_IMPORT_SINGLE.captures_iter(source) {
                let whole = cap.get(0).unwrap();
                if whole.as_str().trim_start().starts_with("import (") {
                    continue;
                }
                raws.push(RawImport {
                    text: whole.as_str().trim().to_string(),
                    module: cap["module"].to_string(),
                    line: line_of(whole.start()),
                    relative_level: 0,
                });
            }
            // import ( ... ) blocks
            let mut offset = 0;
            while let Some(start) = source[offset..].find("import (") {
                let block_start = offset + start;
                let Some(end) = source[block_start..].find(')') else {
                    break;
                };
                let block = &source[block_start..block_start + end];
                for cap in GO_IMPORT_SPEC.captures_iter(block) {
                    let whole = cap.get(0).unwrap();
                    raws.push(RawImport {
                        text: whole.as_str().trim().to_string(),
                        module: cap["module"].to_string(),
                        line: line_of(block_start + whole.start()),
                        relative_level: 0,
                    });
                }
                offset = block_start + end;
            }
        }
        Language::Rust => {
            for cap in RUST_USE.captures_iter(source) {
                let whole = cap.get(0).unwrap();
                raws.push(RawImport {
                    text: whole.as_str().trim().to_string(),
                    module: cap["path"].to_string(),
                    line: line_of(whole.start()),
                    relative_level: 0,
                });
            }
        }
        Language::Java => {
            for cap in JAVA_IMPORT.captures_iter(source) {
                let whole = cap.get(0).unwrap();
                raws.push(RawImport {
                    text: whole.as_str().trim().to_string(),
                    module: cap["module"].to_string(),
                    line: line_of(whole.start()),
                    relative_level: 0,
                });
            }
        }
        Language::Unknown => {}
    }
    raws
}

/// Exactly one existing candidate is certain; several is a heuristic pick
/// of the first; none is unresolved.
fn pick_candidate(candidates: &[PathBuf]) -> (Option<PathBuf>, Confidence) {
    let mut existing: Vec<&PathBuf> = Vec::new();
    for candidate in candidates {
        if candidate.is_file() && !existing.contains(&candidate) {
            existing.push(candidate);
        }
    }
    match existing.len() {
        0 => (None, Confidence::Unresolved),
        1 => (Some(existing[0].clone()), Confidence::Certain),
        _ => (Some(existing[0].clone()), Confidence::Heuristic),
    }
}

fn first_go_file(dir: &Path) -> Option<PathBuf> {
    if !dir.is_dir() {
        return None;
    }
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| p.extension().map(|x| x == "go").unwrap_or(false))
        .collect();
    files.sort();
    files.into_iter().next()
}

/// Resolve `.` and `..` components without touching the filesystem.
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            std::path::Component::CurDir => {}
            std::path::Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
