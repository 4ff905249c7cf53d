//! Response normalization: tolerant JSON extraction and field coercion for
//! model output.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{Result, RomaError};

use super::imports::normalize_lexically;
use super::models::FixProposal;

/// Placeholder paths models emit when they could not determine a real one.
static INVALID_PATHS: &[&str] = &[
    "unknown",
    "path/to/file.py",
    "path/to/your/code.py",
    "path/to/your/file.py",
    "example.py",
    "your_file.py",
    "file.py",
    "",
];

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(?:path/to/|your[_-]|example[_-]?|<.*>)").unwrap());

/// Parse model output into a [`FixProposal`].
///
/// Tolerates markdown fences and surrounding prose by extracting the first
/// balanced `{…}` block. Filepaths are stripped to project-relative form and
/// placeholder paths become `None`. A missing `root_cause_file` stays absent.
pub fn normalize(raw: &str, project_root: &Path) -> Result<FixProposal> {
    let block = extract_json_block(raw).ok_or_else(|| {
        RomaError::ModelOutputInvalid(format!("no JSON object found in: {}", preview(raw)))
    })?;

    let mut proposal: FixProposal = serde_json::from_str(block)
        .map_err(|e| RomaError::ModelOutputInvalid(format!("malformed JSON: {e}")))?;

    proposal.filepath = proposal
        .filepath
        .take()
        .and_then(|p| normalize_filepath(&p, project_root));
    proposal.root_cause_file = proposal
        .root_cause_file
        .take()
        .and_then(|p| normalize_filepath(&p, project_root));

    for fix in &mut proposal.additional_fixes {
        fix.filepath = fix
            .filepath
            .take()
            .and_then(|p| normalize_filepath(&p, project_root));
        // Nesting depth is one; deeper nesting is dropped.
        fix.additional_fixes.clear();
    }

    Ok(proposal)
}

/// First balanced `{…}` block, honoring string literals and escapes.
pub fn extract_json_block(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &byte) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Strip a model-supplied path to clean project-relative form, rejecting
/// placeholders.
fn normalize_filepath(raw: &str, project_root: &Path) -> Option<String> {
    let trimmed = raw.trim();
    if INVALID_PATHS.contains(&trimmed.to_lowercase().as_str()) {
        return None;
    }
    if PLACEHOLDER_RE.is_match(trimmed) {
        return None;
    }

    let mut path = PathBuf::from(trimmed);
    if path.is_absolute() {
        path = match path.strip_prefix(project_root) {
            Ok(rel) => rel.to_path_buf(),
            // Absolute but outside the root: keep as-is so the applier's
            // containment check can reject it explicitly.
            Err(_) => path,
        };
    }
    let normalized = normalize_lexically(&path);
    if normalized.as_os_str().is_empty() {
        return None;
    }
    Some(normalized.to_string_lossy().replace('\\', "/"))
}

fn preview(text: &str) -> String {
    let mut end = text.len().min(120);
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root() -> PathBuf {
        PathBuf::from("/work/project")
    }

    #[test]
    fn parses_clean_json() {
        let raw = r#"{"filepath": "src/main.py", "full_code_block": "x = 1", "explanation": "fix"}"#;
        let proposal = normalize(raw, &root()).unwrap();
        assert_eq!(proposal.filepath.as_deref(), Some("src/main.py"));
        assert_eq!(proposal.full_code_block, "x = 1");
        assert!(proposal.additional_fixes.is_empty());
        assert!(proposal.root_cause_file.is_none());
    }

    #[test]
    fn tolerates_fences_and_surrounding_prose() {
        let raw = "Here is the fix you asked for:\n```json\n{\"filepath\": \"a.py\", \"full_code_block\": \"y = 2\", \"explanation\": \"e\"}\n```\nHope that helps!";
        let proposal = normalize(raw, &root()).unwrap();
        assert_eq!(proposal.filepath.as_deref(), Some("a.py"));
    }

    #[test]
    fn balanced_extraction_respects_braces_in_strings() {
        let raw = r#"{"filepath": "a.py", "full_code_block": "d = {\"k\": 1}", "explanation": "braces { in } strings"}"#;
        let proposal = normalize(raw, &root()).unwrap();
        assert_eq!(proposal.full_code_block, "d = {\"k\": 1}");
    }

    #[test]
    fn placeholder_paths_become_none() {
        for placeholder in ["path/to/file.py", "your_module.py", "<filename>", "unknown"] {
            let raw = format!(
                r#"{{"filepath": "{placeholder}", "full_code_block": "x", "explanation": "e"}}"#
            );
            let proposal = normalize(&raw, &root()).unwrap();
            assert!(proposal.filepath.is_none(), "{placeholder} should be rejected");
        }
    }

    #[test]
    fn absolute_paths_under_root_become_relative() {
        let raw = r#"{"filepath": "/work/project/src/app.py", "full_code_block": "x", "explanation": "e"}"#;
        let proposal = normalize(raw, &root()).unwrap();
        assert_eq!(proposal.filepath.as_deref(), Some("src/app.py"));
    }

    #[test]
    fn additional_fixes_are_normalized_one_level_deep() {
        let raw = r#"{
            "filepath": "src/utils.py",
            "full_code_block": "fixed",
            "explanation": "primary",
            "root_cause_file": "src/main.py",
            "additional_fixes": [
                {"filepath": "./src/main.py", "full_code_block": "also fixed", "explanation": "caller",
                 "additional_fixes": [{"filepath": "deep.py", "full_code_block": "no", "explanation": "no"}]}
            ]
        }"#;
        let proposal = normalize(raw, &root()).unwrap();
        assert_eq!(proposal.root_cause_file.as_deref(), Some("src/main.py"));
        assert_eq!(proposal.additional_fixes.len(), 1);
        assert_eq!(
            proposal.additional_fixes[0].filepath.as_deref(),
            Some("src/main.py")
        );
        assert!(proposal.additional_fixes[0].additional_fixes.is_empty());
    }

    #[test]
    fn missing_json_is_model_output_invalid() {
        let result = normalize("I cannot fix this, sorry.", &root());
        assert!(matches!(result, Err(RomaError::ModelOutputInvalid(_))));
    }

    #[test]
    fn missing_root_cause_is_not_invented() {
        let raw = r#"{"filepath": "a.py", "full_code_block": "x", "explanation": "e"}"#;
        let proposal = normalize(raw, &root()).unwrap();
        assert!(proposal.root_cause_file.is_none());
        assert!(proposal.root_cause_explanation.is_none());
    }
}
