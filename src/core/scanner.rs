//! Project structure scanning: type classification, frameworks, entry
//! points, and a bounded file inventory used when no traceback is present.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use ignore::WalkBuilder;
use tracing::debug;

use super::models::{Language, ProjectDescriptor, ProjectType, SourceFile};

/// Marker files that classify a project, in priority order.
const PROJECT_MARKERS: &[(&str, ProjectType)] = &[
    ("pyproject.toml", ProjectType::Python),
    ("setup.py", ProjectType::Python),
    ("requirements.txt", ProjectType::Python),
    ("Pipfile", ProjectType::Python),
    ("package.json", ProjectType::Node),
    ("go.mod", ProjectType::Go),
    ("Cargo.toml", ProjectType::Rust),
    ("pom.xml", ProjectType::Java),
    ("build.gradle", ProjectType::Java),
];

/// Framework names matched against marker-file contents.
const FRAMEWORKS: &[&str] = &[
    "flask", "fastapi", "django", "express", "react", "vue", "gin", "actix", "axum", "spring",
];

/// Well-known entry-point filenames per language.
fn entry_point_names(language: Language) -> &'static [&'static str] {
    match language {
        Language::Python => &["main.py", "app.py", "server.py", "run.py", "manage.py", "wsgi.py", "__main__.py"],
        Language::Javascript => &["index.js", "app.js", "server.js", "main.js"],
        Language::Typescript => &["index.ts", "app.ts", "server.ts", "main.ts"],
        Language::Go => &["main.go"],
        Language::Rust => &["main.rs", "lib.rs"],
        Language::Java => &["Main.java", "App.java", "Application.java"],
        Language::Unknown => &[],
    }
}

pub struct ProjectScanner {
    root: PathBuf,
    max_files: usize,
    max_bytes: u64,
}

impl ProjectScanner {
    pub fn new(root: &Path, max_files: usize, max_bytes: u64) -> Self {
        Self {
            root: root.to_path_buf(),
            max_files,
            max_bytes,
        }
    }

    /// Walk the project (respecting `.gitignore`) and classify it.
    pub fn scan(&self) -> ProjectDescriptor {
        let mut source_files = Vec::new();
        let mut config_files = Vec::new();
        let mut entry_points = Vec::new();
        let mut language_counts: HashMap<Language, usize> = HashMap::new();
        let mut bytes_seen: u64 = 0;

        let walker = WalkBuilder::new(&self.root)
            .hidden(true)
            .git_ignore(true)
            .require_git(false)
            .build();

        for entry in walker {
            let Ok(entry) = entry else { continue };
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            if source_files.len() >= self.max_files || bytes_seen >= self.max_bytes {
                debug!("scan bounded: {} files, {} bytes", source_files.len(), bytes_seen);
                break;
            }

            let Ok(rel) = path.strip_prefix(&self.root) else { continue };
            let filename = path.file_name().and_then(|n| n.to_str()).unwrap_or("");

            if PROJECT_MARKERS.iter().any(|(marker, _)| *marker == filename) {
                config_files.push(rel.to_path_buf());
                continue;
            }

            let language = Language::from_path(path);
            if language == Language::Unknown {
                continue;
            }

            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            bytes_seen += size;

            let is_entry = entry_point_names(language).contains(&filename);
            let file = SourceFile {
                path: rel.to_path_buf(),
                language,
                is_entry_point: is_entry,
                size,
            };
            if is_entry {
                entry_points.push(rel.to_path_buf());
            }
            *language_counts.entry(language).or_insert(0) += 1;
            source_files.push(file);
        }

        source_files.sort_by(|a, b| a.path.cmp(&b.path));
        entry_points.sort();
        config_files.sort();

        let frameworks = self.detect_frameworks(&config_files);
        let project_type = self.classify(&config_files, &language_counts);

        ProjectDescriptor {
            root: self.root.clone(),
            project_type,
            frameworks,
            entry_points,
            source_files,
            config_files,
            language_counts,
        }
    }

    /// Read a file's content relative to the project root.
    pub fn read_file(&self, rel: &Path) -> Option<String> {
        std::fs::read_to_string(self.root.join(rel)).ok()
    }

    /// Render a bounded `tree`-style listing of the project.
    pub fn file_tree(&self, max_depth: usize, max_entries_per_dir: usize) -> String {
        let mut lines = vec![format!(
            "{}/",
            self.root
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| ".".to_string())
        )];
        self.tree_level(&self.root, "", 0, max_depth, max_entries_per_dir, &mut lines);
        lines.join("\n")
    }

    fn tree_level(
        &self,
        dir: &Path,
        prefix: &str,
        depth: usize,
        max_depth: usize,
        max_entries: usize,
        lines: &mut Vec<String>,
    ) {
        if depth >= max_depth {
            return;
        }
        let Ok(read) = std::fs::read_dir(dir) else { return };

        let mut dirs = Vec::new();
        let mut files = Vec::new();
        for entry in read.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') || is_vendored_dir(&name) {
                continue;
            }
            if entry.path().is_dir() {
                dirs.push(name);
            } else {
                files.push(name);
            }
        }
        dirs.sort();
        files.sort();

        let all: Vec<(String, bool)> = dirs
            .into_iter()
            .map(|d| (d, true))
            .chain(files.into_iter().map(|f| (f, false)))
            .collect();
        let truncated = all.len().saturating_sub(max_entries);
        let shown = &all[..all.len().min(max_entries)];

        for (i, (name, is_dir)) in shown.iter().enumerate() {
            let last = i == shown.len() - 1 && truncated == 0;
            let connector = if last { "└── " } else { "├── " };
            let child_prefix = if last {
                format!("{prefix}    ")
            } else {
                format!("{prefix}│   ")
            };
            if *is_dir {
                lines.push(format!("{prefix}{connector}{name}/"));
                self.tree_level(
                    &dir.join(name),
                    &child_prefix,
                    depth + 1,
                    max_depth,
                    max_entries,
                    lines,
                );
            } else {
                lines.push(format!("{prefix}{connector}{name}"));
            }
        }
        if truncated > 0 {
            lines.push(format!("{prefix}└── ... ({truncated} more)"));
        }
    }

    fn detect_frameworks(&self, config_files: &[PathBuf]) -> Vec<String> {
        let mut found = Vec::new();
        for config in config_files {
            let Some(content) = self.read_file(config) else { continue };
            let lowered = content.to_lowercase();
            for framework in FRAMEWORKS {
                if lowered.contains(framework) && !found.contains(&framework.to_string()) {
                    found.push(framework.to_string());
                }
            }
        }
        found.sort();
        found
    }

    fn classify(
        &self,
        config_files: &[PathBuf],
        language_counts: &HashMap<Language, usize>,
    ) -> ProjectType {
        for (marker, project_type) in PROJECT_MARKERS {
            if config_files
                .iter()
                .any(|c| c.file_name().map(|n| n == *marker).unwrap_or(false))
            {
                return *project_type;
            }
        }
        // No marker file: fall back to the dominant language.
        let primary = language_counts
            .iter()
            .max_by_key(|(_, count)| **count)
            .map(|(lang, _)| *lang)
            .unwrap_or(Language::Unknown);
        match primary {
            Language::Python => ProjectType::Python,
            Language::Javascript | Language::Typescript => ProjectType::Node,
            Language::Go => ProjectType::Go,
            Language::Rust => ProjectType::Rust,
            Language::Java => ProjectType::Java,
            Language::Unknown => ProjectType::Unknown,
        }
    }
}

fn is_vendored_dir(name: &str) -> bool {
    matches!(
        name,
        "node_modules" | "__pycache__" | "venv" | "env" | "dist" | "build" | "target" | "coverage"
    )
}
