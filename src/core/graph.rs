//! Directed graph of file dependencies, built lazily from import resolution.
//!
//! Nodes are files, edges are resolved imports with multi-edges collapsed by
//! target. Cycles are permitted in the input; traversal prunes them with a
//! visited set.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};

use super::imports::ImportResolver;
use super::models::{Import, Language};

/// Default traversal depth for neighborhood queries.
pub const DEFAULT_DEPTH: usize = 2;

pub struct DependencyGraph {
    resolver: ImportResolver,
    /// Files eligible as reverse-edge sources (importers).
    seeds: Vec<PathBuf>,
    edges: HashMap<PathBuf, Vec<PathBuf>>,
    reverse: HashMap<PathBuf, Vec<PathBuf>>,
    imports: HashMap<PathBuf, Vec<Import>>,
    resolved: HashSet<PathBuf>,
    seeds_resolved: bool,
}

impl DependencyGraph {
    pub fn new(project_root: &Path) -> Self {
        Self {
            resolver: ImportResolver::new(project_root),
            seeds: Vec::new(),
            edges: HashMap::new(),
            reverse: HashMap::new(),
            imports: HashMap::new(),
            resolved: HashSet::new(),
            seeds_resolved: false,
        }
    }

    /// Register candidate files whose imports may be resolved later.
    /// Nothing is read until a query needs it.
    pub fn seed<I>(&mut self, files: I)
    where
        I: IntoIterator<Item = PathBuf>,
    {
        for file in files {
            if !self.seeds.contains(&file) {
                self.seeds.push(file);
            }
        }
        self.seeds_resolved = false;
    }

    /// Resolved imports of one file, resolving and caching on first access.
    pub fn imports_of(&mut self, file: &Path) -> Vec<Import> {
        self.ensure_resolved(file);
        self.imports.get(file).cloned().unwrap_or_default()
    }

    /// Files that `file` imports, directly.
    pub fn dependencies(&mut self, file: &Path) -> Vec<PathBuf> {
        self.ensure_resolved(file);
        self.edges.get(file).cloned().unwrap_or_default()
    }

    /// Files that import `file`, directly. Requires resolving the seeds.
    pub fn dependents(&mut self, file: &Path) -> Vec<PathBuf> {
        self.resolve_seeds();
        self.reverse.get(file).cloned().unwrap_or_default()
    }

    /// Files that (transitively) import `file`, breadth-first up to `depth`,
    /// ordered by BFS distance then path.
    pub fn upstream(&mut self, file: &Path, depth: usize) -> Vec<PathBuf> {
        self.resolve_seeds();
        self.bfs(file, depth, |graph, node| {
            graph.reverse.get(node).cloned().unwrap_or_default()
        })
    }

    /// Files that `file` (transitively) imports, breadth-first up to `depth`.
    pub fn downstream(&mut self, file: &Path, depth: usize) -> Vec<PathBuf> {
        self.ensure_resolved(file);
        self.bfs(file, depth, |graph, node| {
            graph.ensure_resolved(node);
            graph.edges.get(node).cloned().unwrap_or_default()
        })
    }

    /// Text summary for prompt rendering.
    pub fn summary(&self) -> String {
        let edge_count: usize = self.edges.values().map(|targets| targets.len()).sum();
        let mut lines = vec![
            "Dependency graph:".to_string(),
            format!("  files: {}", self.resolved.len()),
            format!("  resolved edges: {edge_count}"),
        ];

        let mut import_counts: Vec<(&PathBuf, usize)> = self
            .reverse
            .iter()
            .map(|(path, importers)| (path, importers.len()))
            .collect();
        import_counts.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
        if !import_counts.is_empty() {
            lines.push("  most imported:".to_string());
            for (path, count) in import_counts.into_iter().take(5) {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| path.display().to_string());
                lines.push(format!("    {name}: imported by {count} file(s)"));
            }
        }
        lines.join("\n")
    }

    fn bfs<F>(&mut self, start: &Path, depth: usize, mut neighbors: F) -> Vec<PathBuf>
    where
        F: FnMut(&mut Self, &Path) -> Vec<PathBuf>,
    {
        let mut visited: HashSet<PathBuf> = HashSet::new();
        visited.insert(start.to_path_buf());
        let mut queue: VecDeque<(PathBuf, usize)> = VecDeque::new();
        queue.push_back((start.to_path_buf(), 0));
        let mut result: Vec<(usize, PathBuf)> = Vec::new();

        while let Some((node, distance)) = queue.pop_front() {
            if distance >= depth {
                continue;
            }
            let mut next = neighbors(self, &node);
            next.sort();
            for neighbor in next {
                if visited.insert(neighbor.clone()) {
                    result.push((distance + 1, neighbor.clone()));
                    queue.push_back((neighbor, distance + 1));
                }
            }
        }

        result.sort();
        result.into_iter().map(|(_, path)| path).collect()
    }

    fn ensure_resolved(&mut self, file: &Path) {
        if !self.resolved.insert(file.to_path_buf()) {
            return;
        }
        let language = Language::from_path(file);
        let imports = self.resolver.resolve_file(file, language);

        let mut targets: Vec<PathBuf> = Vec::new();
        for import in &imports {
            if let Some(target) = &import.resolved {
                if !targets.contains(target) {
                    targets.push(target.clone());
                }
            }
        }
        for target in &targets {
            let importers = self.reverse.entry(target.clone()).or_default();
            if !importers.contains(&file.to_path_buf()) {
                importers.push(file.to_path_buf());
            }
        }
        self.edges.insert(file.to_path_buf(), targets);
        self.imports.insert(file.to_path_buf(), imports);
    }

    fn resolve_seeds(&mut self) {
        if self.seeds_resolved {
            return;
        }
        for seed in self.seeds.clone() {
            self.ensure_resolved(&seed);
        }
        self.seeds_resolved = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &str) -> PathBuf {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        path
    }

    fn project() -> (TempDir, PathBuf, PathBuf, PathBuf) {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().to_path_buf();
        let utils = write(&root, "src/utils.py", "VALUE = 1\n");
        let mid = write(&root, "src/mid.py", "from src.utils import VALUE\n");
        let main = write(&root, "src/main.py", "from src.mid import run\n");
        (tmp, main, mid, utils)
    }

    #[test]
    fn downstream_follows_imports_transitively() {
        let (tmp, main, mid, utils) = project();
        let mut graph = DependencyGraph::new(tmp.path());
        let down = graph.downstream(&main, 2);
        assert_eq!(down, vec![mid.clone(), utils.clone()]);

        let shallow = graph.downstream(&main, 1);
        assert_eq!(shallow, vec![mid]);
    }

    #[test]
    fn upstream_finds_importers_via_seeds() {
        let (tmp, main, mid, utils) = project();
        let mut graph = DependencyGraph::new(tmp.path());
        graph.seed(vec![main.clone(), mid.clone(), utils.clone()]);

        let up = graph.upstream(&utils, 2);
        assert_eq!(up, vec![mid.clone(), main.clone()]);

        assert_eq!(graph.dependents(&mid), vec![main]);
    }

    #[test]
    fn cycles_are_pruned_by_the_visited_set() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        let a = write(root, "a.py", "import b\n");
        let b = write(root, "b.py", "import a\n");

        let mut graph = DependencyGraph::new(root);
        graph.seed(vec![a.clone(), b.clone()]);
        let down = graph.downstream(&a, 10);
        assert_eq!(down, vec![b.clone()]);
        let up = graph.upstream(&a, 10);
        assert_eq!(up, vec![b]);
    }

    #[test]
    fn unresolved_imports_add_no_edges() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        let app = write(root, "app.js", "const _ = require('lodash');\n");

        let mut graph = DependencyGraph::new(root);
        assert!(graph.downstream(&app, 2).is_empty());
        let imports = graph.imports_of(&app);
        assert_eq!(imports.len(), 1);
        assert!(imports[0].resolved.is_none());
    }

    #[test]
    fn multi_edges_collapse_by_target() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        write(root, "src/utils.py", "A = 1\nB = 2\n");
        let main = write(
            root,
            "src/main.py",
            "from src.utils import A\nfrom src.utils import B\n",
        );

        let mut graph = DependencyGraph::new(root);
        assert_eq!(graph.dependencies(&main).len(), 1);
        assert_eq!(graph.imports_of(&main).len(), 2);
    }
}
