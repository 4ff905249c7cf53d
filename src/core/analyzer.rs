//! Error-message analysis for logs that carry no usable stack frames:
//! categorize the error, pull keywords, and score candidate files.

use std::collections::HashSet;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use super::models::{
    ErrorKind, ErrorReport, Language, ProjectDescriptor, ScoredFile, SourceFile,
};

/// Bytes of file content inspected per candidate when scoring.
const CONTENT_PROBE_BYTES: usize = 8 * 1024;

/// (category, kind, language hint, weighted patterns)
struct CategoryRule {
    category: &'static str,
    kind: ErrorKind,
    language: Option<Language>,
    patterns: &'static [(&'static str, f64)],
}

static CATEGORY_RULES: LazyLock<Vec<(CategoryRule, Vec<(Regex, f64)>)>> = LazyLock::new(|| {
    let rules = vec![
        CategoryRule {
            category: "http_404",
            kind: ErrorKind::Http,
            language: None,
            patterns: &[
                (r"cannot\s+(?:get|post|put|delete|patch)\s+[/\w]+", 0.9),
                (r"404\s+(?:not\s+found|\(not\s+found\))", 0.95),
                (r"route\s+not\s+found", 0.9),
            ],
        },
        CategoryRule {
            category: "http_5xx",
            kind: ErrorKind::Http,
            language: None,
            patterns: &[
                (r"500\s+internal\s+server\s+error", 0.95),
                (r"internal\s+server\s+error", 0.8),
                (r"502\s+bad\s+gateway", 0.9),
            ],
        },
        CategoryRule {
            category: "http_auth",
            kind: ErrorKind::Http,
            language: None,
            patterns: &[
                (r"401\s+unauthorized", 0.95),
                (r"403\s+forbidden", 0.95),
                (r"authentication\s+required", 0.85),
            ],
        },
        CategoryRule {
            category: "database",
            kind: ErrorKind::Database,
            language: None,
            patterns: &[
                (r"sql\s+error", 0.9),
                (r"database\s+error", 0.85),
                (r"connection\s+refused.*(?:5432|3306|27017)", 0.9),
                (r"operationalerror", 0.9),
            ],
        },
        CategoryRule {
            category: "python_import",
            kind: ErrorKind::Import,
            language: Some(Language::Python),
            patterns: &[
                (r"modulenotfounderror", 0.95),
                (r"no\s+module\s+named", 0.95),
                (r"cannot\s+import\s+name", 0.9),
                (r"importerror", 0.9),
            ],
        },
        CategoryRule {
            category: "js_module",
            kind: ErrorKind::Import,
            language: Some(Language::Javascript),
            patterns: &[
                (r"cannot\s+find\s+module", 0.95),
                (r"module\s+not\s+found", 0.9),
            ],
        },
        CategoryRule {
            category: "python_type",
            kind: ErrorKind::Type,
            language: Some(Language::Python),
            patterns: &[(r"typeerror", 0.95), (r"expected\s+\w+,?\s+got\s+\w+", 0.8)],
        },
        CategoryRule {
            category: "js_type",
            kind: ErrorKind::Type,
            language: Some(Language::Javascript),
            patterns: &[
                (r"cannot\s+read\s+propert", 0.9),
                (r"is\s+not\s+a\s+function", 0.9),
                (r"undefined\s+is\s+not", 0.85),
            ],
        },
        CategoryRule {
            category: "python_runtime",
            kind: ErrorKind::Runtime,
            language: Some(Language::Python),
            patterns: &[
                (r"attributeerror", 0.95),
                (r"keyerror", 0.95),
                (r"indexerror", 0.95),
                (r"list\s+index\s+out\s+of\s+range", 0.95),
                (r"nameerror", 0.95),
                (r"valueerror", 0.9),
            ],
        },
        CategoryRule {
            category: "js_runtime",
            kind: ErrorKind::Runtime,
            language: Some(Language::Javascript),
            patterns: &[(r"referenceerror", 0.95), (r"is\s+not\s+defined", 0.8)],
        },
        CategoryRule {
            category: "go_runtime",
            kind: ErrorKind::Runtime,
            language: Some(Language::Go),
            patterns: &[
                (r"nil\s+pointer", 0.95),
                (r"runtime\s+error:", 0.9),
                (r"panic:", 0.9),
            ],
        },
        CategoryRule {
            category: "rust_runtime",
            kind: ErrorKind::Runtime,
            language: Some(Language::Rust),
            patterns: &[
                (r"thread\s+.*\s+panicked", 0.95),
                (r"called\s+`option::unwrap\(\)`", 0.9),
            ],
        },
    ];

    rules
        .into_iter()
        .map(|rule| {
            let compiled = rule
                .patterns
                .iter()
                .map(|(pattern, weight)| (Regex::new(pattern).unwrap(), *weight))
                .collect();
            (rule, compiled)
        })
        .collect()
});

static ROUTE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:cannot\s+(?:get|post|put|delete|patch)|route|path)\s+['\x22]?(?P<route>/[\w\-/.]*)")
        .unwrap()
});

static CAMEL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[A-Z][a-z]+(?:[A-Z][a-z]+)+\b").unwrap());

static SNAKE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[a-z]+(?:_[a-z]+)+\b").unwrap());

static WORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[A-Za-z_][A-Za-z0-9_]{3,}\b").unwrap());

static QUOTED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"['\x22`]([^'\x22`]{2,40})['\x22`]"#).unwrap());

static FILE_REF_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\w\-]+\.(?:py|js|jsx|ts|tsx|go|rs|java)\b").unwrap());

static STATUS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:[1-5]\d{2})\b").unwrap());

/// Words too generic to discriminate between files.
static STOPWORDS: &[&str] = &[
    "error", "exception", "failed", "cannot", "could", "not", "the", "and", "with", "from",
    "this", "that", "have", "has", "when", "while", "http", "https", "line", "file",
];

pub struct ErrorAnalyzer;

impl ErrorAnalyzer {
    /// Classify an error message and score project files against it.
    pub fn analyze(message: &str, descriptor: &ProjectDescriptor, limit: usize) -> ErrorReport {
        let lowered = message.to_lowercase();

        let mut best: Option<(&CategoryRule, f64)> = None;
        for (rule, patterns) in CATEGORY_RULES.iter() {
            for (regex, weight) in patterns {
                if regex.is_match(&lowered) {
                    let better = best.map(|(_, w)| *weight > w).unwrap_or(true);
                    if better {
                        best = Some((rule, *weight));
                    }
                }
            }
        }

        let (category, kind, language, confidence) = match best {
            Some((rule, weight)) => (rule.category.to_string(), rule.kind, rule.language, weight),
            None => ("unknown".to_string(), ErrorKind::Other, None, 0.0),
        };

        let keywords = extract_keywords(message);
        let routes = extract_routes(message);
        let candidates = score_files(descriptor, &keywords, &lowered, limit);

        ErrorReport {
            kind,
            category,
            message: truncate(message, 500),
            keywords,
            routes,
            confidence,
            candidates,
            suggested_language: language.or(Some(descriptor.primary_language())),
        }
    }
}

/// Identifiers (>3 chars), quoted literals, HTTP verbs/status codes, URL
/// path segments, and file references.
fn extract_keywords(message: &str) -> Vec<String> {
    let mut keywords: Vec<String> = Vec::new();

    for m in FILE_REF_RE.find_iter(message) {
        push_keyword(&mut keywords, m.as_str());
    }
    for cap in QUOTED_RE.captures_iter(message) {
        push_keyword(&mut keywords, &cap[1]);
    }
    for m in CAMEL_RE.find_iter(message) {
        push_keyword(&mut keywords, m.as_str());
    }
    for m in SNAKE_RE.find_iter(message) {
        push_keyword(&mut keywords, m.as_str());
    }
    for m in WORD_RE.find_iter(message) {
        push_keyword(&mut keywords, m.as_str());
    }
    for m in STATUS_RE.find_iter(message) {
        let code = m.as_str().to_string();
        if !keywords.contains(&code) {
            keywords.push(code);
        }
    }
    for route in extract_routes(message) {
        for part in route.split('/').filter(|p| p.len() > 2) {
            push_keyword(&mut keywords, part);
        }
    }

    keywords.truncate(20);
    keywords
}

fn push_keyword(keywords: &mut Vec<String>, candidate: &str) {
    let lowered = candidate.to_lowercase();
    if lowered.len() > 3 && !STOPWORDS.contains(&lowered.as_str()) && !keywords.contains(&lowered) {
        keywords.push(lowered);
    }
}

fn extract_routes(message: &str) -> Vec<String> {
    let mut routes = Vec::new();
    for cap in ROUTE_RE.captures_iter(message) {
        let route = cap["route"].to_string();
        if !routes.contains(&route) {
            routes.push(route);
        }
    }
    routes
}

/// Score each project file by filename/path keyword hits plus heuristic
/// boosts, then confirm top candidates against file content.
fn score_files(
    descriptor: &ProjectDescriptor,
    keywords: &[String],
    lowered_message: &str,
    limit: usize,
) -> Vec<ScoredFile> {
    let mut scored: Vec<(f64, &SourceFile)> = Vec::new();

    for file in &descriptor.source_files {
        let mut score = 0.0;
        let filename = file.filename().to_lowercase();
        let path = file.path.display().to_string().to_lowercase();

        if file.is_entry_point {
            score += 2.0;
        }
        for keyword in keywords {
            if filename.contains(keyword.as_str()) {
                score += 3.0;
            } else if path.contains(keyword.as_str()) {
                score += 1.5;
            }
        }

        let is_http_error = lowered_message.contains("404") || lowered_message.contains("cannot get");
        if is_http_error
            && ["route", "app", "server", "index", "view", "controller"]
                .iter()
                .any(|hint| filename.contains(hint))
        {
            score += 2.0;
        }
        if lowered_message.contains("api") && path.contains("api") {
            score += 2.0;
        }

        if score > 0.0 {
            scored.push((score, file));
        }
    }

    scored.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.1.path.cmp(&b.1.path))
    });

    // Content confirmation for the leading candidates.
    let keyword_set: HashSet<&str> = keywords.iter().map(|k| k.as_str()).collect();
    let mut confirmed: Vec<ScoredFile> = Vec::new();
    for (score, file) in scored.into_iter().take(limit * 4) {
        let mut score = score;
        if let Some(content) = read_probe(&descriptor.root, &file.path) {
            let lowered = content.to_lowercase();
            let hits = keyword_set.iter().filter(|k| lowered.contains(**k)).count();
            score += hits as f64;
        }
        confirmed.push(ScoredFile {
            file: file.clone(),
            score,
        });
    }

    confirmed.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.file.path.cmp(&b.file.path))
    });
    confirmed.truncate(limit);
    confirmed
}

fn read_probe(root: &Path, rel: &Path) -> Option<String> {
    let content = std::fs::read_to_string(root.join(rel)).ok()?;
    let mut end = content.len().min(CONTENT_PROBE_BYTES);
    while end > 0 && !content.is_char_boundary(end) {
        end -= 1;
    }
    Some(content[..end].to_string())
}

fn truncate(text: &str, max: usize) -> String {
    let mut end = text.len().min(max);
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn descriptor(root: &Path, files: &[(&str, &str, bool)]) -> ProjectDescriptor {
        let mut source_files = Vec::new();
        for (rel, content, entry) in files {
            let path = root.join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, content).unwrap();
            source_files.push(SourceFile {
                path: rel.into(),
                language: Language::from_path(Path::new(rel)),
                is_entry_point: *entry,
                size: content.len() as u64,
            });
        }
        ProjectDescriptor {
            root: root.to_path_buf(),
            project_type: super::super::models::ProjectType::Python,
            frameworks: vec![],
            entry_points: vec![],
            source_files,
            config_files: vec![],
            language_counts: std::collections::HashMap::new(),
        }
    }

    #[test]
    fn categorizes_import_and_http_errors() {
        let tmp = TempDir::new().unwrap();
        let empty = descriptor(tmp.path(), &[]);

        let report =
            ErrorAnalyzer::analyze("ModuleNotFoundError: No module named 'requests'", &empty, 5);
        assert_eq!(report.kind, ErrorKind::Import);
        assert_eq!(report.category, "python_import");
        assert!(report.confidence > 0.9);

        let report = ErrorAnalyzer::analyze("Cannot GET /api/users 404 Not Found", &empty, 5);
        assert_eq!(report.kind, ErrorKind::Http);
        assert!(report.routes.contains(&"/api/users".to_string()));
    }

    #[test]
    fn keywords_include_identifiers_and_quoted_literals() {
        let tmp = TempDir::new().unwrap();
        let empty = descriptor(tmp.path(), &[]);
        let report = ErrorAnalyzer::analyze(
            "AttributeError: 'UserCache' object has no attribute 'flush_all' in user_cache.py",
            &empty,
            5,
        );
        assert!(report.keywords.contains(&"usercache".to_string()));
        assert!(report.keywords.contains(&"flush_all".to_string()));
        assert!(report.keywords.contains(&"user_cache.py".to_string()));
    }

    #[test]
    fn filename_hits_outrank_path_hits() {
        let tmp = TempDir::new().unwrap();
        let descriptor = descriptor(
            tmp.path(),
            &[
                ("src/payment.py", "def charge():\n    pass\n", false),
                ("src/payment_utils/misc.py", "x = 1\n", false),
                ("src/other.py", "y = 2\n", false),
            ],
        );
        let report = ErrorAnalyzer::analyze("payment failed unexpectedly", &descriptor, 5);
        assert!(!report.candidates.is_empty());
        assert_eq!(
            report.candidates[0].file.path,
            PathBuf::from("src/payment.py")
        );
    }

    #[test]
    fn content_probe_boosts_matching_files() {
        let tmp = TempDir::new().unwrap();
        let descriptor = descriptor(
            tmp.path(),
            &[
                ("src/app.py", "def start():\n    connect_billing()\n", true),
                ("src/db.py", "def query():\n    pass\n", false),
            ],
        );
        let report = ErrorAnalyzer::analyze(
            "RuntimeError: connect_billing raised during startup",
            &descriptor,
            5,
        );
        assert_eq!(report.candidates[0].file.path, PathBuf::from("src/app.py"));
    }
}
