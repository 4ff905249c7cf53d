//! Call-chain assembly: traceback frames enriched with symbols and imports,
//! plus the upstream file neighborhood for root-cause context.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use super::extractor::ContextExtractor;
use super::graph::DependencyGraph;
use super::models::{CallChainEntry, Frame, Language, ReadRecord, ReadSource};

/// Maximum entries in a rendered call chain; excess frames are dropped from
/// the middle so both the outermost caller and the crash site survive.
pub const MAX_CHAIN_LENGTH: usize = 10;

/// Maximum upstream files added beyond the chain itself.
pub const MAX_UPSTREAM_FILES: usize = 5;

pub struct CallChain {
    pub entries: Vec<CallChainEntry>,
    pub upstream_files: Vec<PathBuf>,
    pub files_read: Vec<ReadRecord>,
}

pub struct ChainAssembler {
    project_root: PathBuf,
}

impl ChainAssembler {
    pub fn new(project_root: &Path) -> Self {
        Self {
            project_root: project_root.to_path_buf(),
        }
    }

    /// Build the chain for normalized frames (oldest-caller-first).
    ///
    /// External frames are kept as path-only markers: no extraction, no
    /// import resolution. The upstream set is the BFS neighborhood of the
    /// crash file minus files already in the chain.
    pub fn assemble(
        &self,
        frames: &[Frame],
        language: Language,
        extractor: &mut ContextExtractor,
        graph: &mut DependencyGraph,
    ) -> CallChain {
        let frames = limit_frames(frames, MAX_CHAIN_LENGTH);
        let mut entries = Vec::new();
        let mut files_read = Vec::new();
        let mut chain_files: HashSet<PathBuf> = HashSet::new();

        for frame in &frames {
            let resolved = if frame.external {
                None
            } else {
                self.resolve_frame_path(&frame.filepath)
            };

            let in_project = resolved
                .as_ref()
                .map(|path| path.starts_with(&self.project_root))
                .unwrap_or(false);

            let entry = if in_project {
                let path = resolved.expect("checked above");
                let symbol = extractor.extract(&path, frame.line, language);
                if symbol.is_some() {
                    files_read.push(ReadRecord {
                        path: path.clone(),
                        source: ReadSource::Traceback,
                    });
                }
                let imports = graph.imports_of(&path);
                chain_files.insert(path.clone());
                CallChainEntry {
                    frame: frame.clone(),
                    resolved_path: Some(path),
                    symbol,
                    imports,
                }
            } else {
                // Outside the project root: marker only.
                CallChainEntry {
                    frame: Frame {
                        external: true,
                        ..frame.clone()
                    },
                    resolved_path: resolved,
                    symbol: None,
                    imports: Vec::new(),
                }
            };
            entries.push(entry);
        }

        let mut upstream_files = Vec::new();
        if let Some(crash) = entries.iter().rev().find_map(|e| e.resolved_path.clone()) {
            for path in graph.upstream(&crash, super::graph::DEFAULT_DEPTH) {
                if upstream_files.len() >= MAX_UPSTREAM_FILES {
                    break;
                }
                if !chain_files.contains(&path) && !upstream_files.contains(&path) {
                    files_read.push(ReadRecord {
                        path: path.clone(),
                        source: ReadSource::Import,
                    });
                    upstream_files.push(path);
                }
            }
        }

        CallChain {
            entries,
            upstream_files,
            files_read,
        }
    }

    /// Resolve a traceback path: as-is, relative to the project root, by
    /// common source directories, then by filename search.
    fn resolve_frame_path(&self, filepath: &str) -> Option<PathBuf> {
        let direct = PathBuf::from(filepath);
        if direct.is_file() {
            return Some(direct);
        }

        let relative = self.project_root.join(filepath.trim_start_matches('/'));
        if relative.is_file() {
            return Some(relative);
        }

        let filename = Path::new(filepath).file_name()?;
        for dir in ["src", "lib", "app", "pkg"] {
            let candidate = self.project_root.join(dir).join(filename);
            if candidate.is_file() {
                return Some(candidate);
            }
        }

        WalkDir::new(&self.project_root)
            .into_iter()
            .filter_entry(|e| !is_hidden_or_vendored(e.file_name().to_str().unwrap_or("")))
            .filter_map(|e| e.ok())
            .find(|e| e.file_type().is_file() && e.file_name() == filename)
            .map(|e| e.into_path())
    }
}

fn is_hidden_or_vendored(name: &str) -> bool {
    name.starts_with('.') && name.len() > 1
        || matches!(
            name,
            "node_modules" | "target" | "venv" | "__pycache__" | "dist" | "build"
        )
}

/// Keep at most `max` frames, dropping from the middle.
fn limit_frames(frames: &[Frame], max: usize) -> Vec<Frame> {
    if frames.len() <= max {
        return frames.to_vec();
    }
    let head = max / 2;
    let tail = max - head;
    let mut limited = frames[..head].to_vec();
    limited.extend_from_slice(&frames[frames.len() - tail..]);
    limited
}
