//! Unified diff computation and safe batch application.
//!
//! The applier guards every write with containment and size checks, backs up
//! existing files to `.bak`, and writes through a `.tmp` + atomic rename.
//! Batches apply in order without rollback; a failure reports what was
//! already written.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use similar::TextDiff;
use tracing::{debug, warn};

use crate::error::{Result, RomaError};

use super::imports::normalize_lexically;
use super::models::{FilePatch, FixProposal, PatchSet, ReadRecord, RejectedPatch};

/// Unified diff (3 lines of context) between the live file and the proposed
/// content. A missing file diffs against the empty string.
pub fn unified_diff(old: &str, new: &str, path: &str) -> String {
    TextDiff::from_lines(old, new)
        .unified_diff()
        .context_radius(3)
        .header(&format!("a/{path}"), &format!("b/{path}"))
        .to_string()
}

/// Build a [`PatchSet`] from a normalized proposal: one [`FilePatch`] per
/// targeted file (primary first), each with its diff, plus the audit trail.
pub fn build_patch_set(
    proposal: FixProposal,
    project_root: &Path,
    max_patch_bytes: usize,
    files_read: Vec<ReadRecord>,
) -> PatchSet {
    let mut patches = Vec::new();
    let mut rejected = Vec::new();

    let mut add = |filepath: &Option<String>, code: &str, explanation: &str| {
        let Some(filepath) = filepath else { return };
        match validate_target(filepath, project_root, code.len(), max_patch_bytes) {
            Ok(relative) => {
                let live = std::fs::read_to_string(project_root.join(&relative))
                    .unwrap_or_default();
                let diff = unified_diff(&live, code, &relative.display().to_string());
                patches.push(FilePatch {
                    path: relative,
                    new_content: code.to_string(),
                    diff,
                    explanation: explanation.to_string(),
                });
            }
            Err(reason) => {
                warn!(%filepath, %reason, "patch rejected");
                rejected.push(RejectedPatch {
                    path: filepath.clone(),
                    reason: reason.to_string(),
                });
            }
        }
    };

    add(
        &proposal.filepath,
        &proposal.full_code_block,
        &proposal.explanation,
    );
    for fix in &proposal.additional_fixes {
        add(&fix.filepath, &fix.full_code_block, &fix.explanation);
    }

    PatchSet {
        proposal,
        patches,
        rejected,
        files_read,
    }
}

/// Containment plus size-cap validation; returns the normalized relative path.
fn validate_target(
    filepath: &str,
    project_root: &Path,
    code_len: usize,
    max_patch_bytes: usize,
) -> std::result::Result<PathBuf, RomaError> {
    if code_len > max_patch_bytes {
        return Err(RomaError::SizeCapExceeded {
            what: "patch body",
            actual: code_len,
            cap: max_patch_bytes,
        });
    }

    let candidate = Path::new(filepath);
    let absolute = if candidate.is_absolute() {
        normalize_lexically(candidate)
    } else {
        normalize_lexically(&project_root.join(candidate))
    };
    let root = normalize_lexically(project_root);
    let relative = absolute
        .strip_prefix(&root)
        .map(|rel| rel.to_path_buf())
        .map_err(|_| RomaError::PathEscape(filepath.to_string()))?;
    if relative.as_os_str().is_empty() {
        return Err(RomaError::PathEscape(filepath.to_string()));
    }
    Ok(relative)
}

/// Result of applying a batch.
#[derive(Debug)]
pub struct ApplyReport {
    /// Project-relative paths written, in order.
    pub applied: Vec<PathBuf>,
    /// First failure, if any; later patches were not attempted.
    pub failure: Option<RomaError>,
}

impl ApplyReport {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }
}

pub struct SafeApplier {
    project_root: PathBuf,
}

impl SafeApplier {
    pub fn new(project_root: &Path) -> Self {
        Self {
            project_root: project_root.to_path_buf(),
        }
    }

    /// Apply patches in order. Already-written files stay written on
    /// failure; the report carries both. `cancelled` is checked before
    /// every write so a cancellation never leaves a partial batch beyond
    /// what was already completed.
    pub fn apply(&self, patches: &[FilePatch], cancelled: &AtomicBool) -> ApplyReport {
        let mut applied = Vec::new();

        for patch in patches {
            if cancelled.load(Ordering::SeqCst) {
                return ApplyReport {
                    applied,
                    failure: Some(RomaError::Cancelled),
                };
            }
            match self.apply_one(patch) {
                Ok(()) => applied.push(patch.path.clone()),
                Err(e) => {
                    let failure = RomaError::WriteFailed {
                        path: patch.path.display().to_string(),
                        source: e,
                        applied: applied.iter().map(|p| p.display().to_string()).collect(),
                    };
                    return ApplyReport {
                        applied,
                        failure: Some(failure),
                    };
                }
            }
        }

        ApplyReport {
            applied,
            failure: None,
        }
    }

    fn apply_one(&self, patch: &FilePatch) -> std::io::Result<()> {
        let target = self.project_root.join(&patch.path);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }

        // Existing files get a .bak copy; a prior backup is clobbered.
        if target.is_file() {
            let backup = sibling_with_suffix(&target, ".bak");
            std::fs::copy(&target, &backup)?;
            debug!(path = %target.display(), "backed up to .bak");
        }

        let tmp = sibling_with_suffix(&target, ".tmp");
        if let Err(e) = std::fs::write(&tmp, &patch.new_content) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e);
        }
        if let Err(e) = std::fs::rename(&tmp, &target) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e);
        }
        Ok(())
    }
}

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}
