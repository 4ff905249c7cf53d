//! Pipeline orchestration: traceback → extraction → resolution → graph →
//! prompt → model → normalization → diffs → (optional) apply.

use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Result, RomaError};

use super::analyzer::ErrorAnalyzer;
use super::chain::{CallChain, ChainAssembler};
use super::extractor::ContextExtractor;
use super::graph::DependencyGraph;
use super::llm::Completion;
use super::models::{
    Language, ParsedTraceback, PatchSet, ProjectDescriptor, ReadRecord, ReadSource, Symbol,
};
use super::patch::{build_patch_set, ApplyReport, SafeApplier};
use super::prompt::{PromptBuilder, SectionBudgets, RETRY_SYSTEM_PROMPT, SYSTEM_PROMPT};
use super::scanner::ProjectScanner;
use super::traceback;

/// Candidate files pulled into the prompt on the no-traceback path.
const MAX_SCAN_CANDIDATES: usize = 5;

/// Everything one analysis produced.
pub struct Analysis {
    pub traceback: ParsedTraceback,
    pub descriptor: ProjectDescriptor,
    pub patch_set: PatchSet,
    pub model_prompt: String,
}

pub struct Engine {
    config: Config,
    project_root: PathBuf,
    llm: Arc<dyn Completion>,
    cancelled: Arc<AtomicBool>,
}

impl Engine {
    pub fn new(config: Config, project_root: &Path, llm: Arc<dyn Completion>) -> Self {
        Self {
            config,
            project_root: project_root.to_path_buf(),
            llm,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handle used to cancel an in-flight analysis from another task.
    pub fn cancellation_handle(&self) -> Arc<AtomicBool> {
        self.cancelled.clone()
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    /// Run the full investigation and produce a patch set. Nothing is
    /// written to disk; [`Engine::apply`] does that separately.
    pub async fn analyze(&self, log: &str, language_hint: Option<Language>) -> Result<Analysis> {
        self.analyze_with_context(log, None, language_hint).await
    }

    /// Like [`Engine::analyze`], with caller-supplied context appended to
    /// the prompt (the HTTP API's `context` field).
    pub async fn analyze_with_context(
        &self,
        log: &str,
        client_context: Option<&str>,
        language_hint: Option<Language>,
    ) -> Result<Analysis> {
        let log = log.trim();
        if log.is_empty() {
            return Err(RomaError::LogEmpty);
        }
        if log.len() > self.config.limits.max_log_bytes {
            return Err(RomaError::SizeCapExceeded {
                what: "error log",
                actual: log.len(),
                cap: self.config.limits.max_log_bytes,
            });
        }

        let parsed = traceback::parse(log, language_hint);
        info!(
            language = %parsed.language,
            frames = parsed.frames.len(),
            "parsed traceback"
        );

        let scanner = ProjectScanner::new(
            &self.project_root,
            self.config.limits.max_repo_files,
            self.config.limits.max_repo_bytes,
        );
        let descriptor = scanner.scan();
        debug!(
            project_type = descriptor.project_type.as_str(),
            files = descriptor.source_files.len(),
            "scanned project"
        );

        let mut extractor = ContextExtractor::new();
        let mut graph = DependencyGraph::new(&self.project_root);
        graph.seed(
            descriptor
                .source_files
                .iter()
                .map(|f| self.project_root.join(&f.path)),
        );

        let budgets = SectionBudgets::default();
        let builder = PromptBuilder::new(budgets);
        let file_tree = scanner.file_tree(4, 15);

        let (mut prompt, mut files_read) = if parsed.frames.is_empty() {
            // No usable frames: classify the message and pull candidates.
            let report = ErrorAnalyzer::analyze(log, &descriptor, MAX_SCAN_CANDIDATES);
            let mut files_read = Vec::new();
            let excerpts = self.candidate_excerpts(&report, &mut extractor, &mut files_read);
            let prompt = builder.build(
                log,
                Some(&descriptor),
                Some(&file_tree),
                None,
                &excerpts,
                None,
                Some(&report),
            );
            (prompt, files_read)
        } else {
            let assembler = ChainAssembler::new(&self.project_root);
            let chain =
                assembler.assemble(&parsed.frames, parsed.language, &mut extractor, &mut graph);
            let excerpts = self.upstream_excerpts(&chain, &mut extractor);
            let graph_summary = (!chain.upstream_files.is_empty()).then(|| graph.summary());
            let prompt = builder.build(
                log,
                Some(&descriptor),
                Some(&file_tree),
                Some(&chain),
                &excerpts,
                graph_summary.as_deref(),
                None,
            );
            (prompt, chain.files_read)
        };

        if let Some(context) = client_context.map(str::trim).filter(|c| !c.is_empty()) {
            prompt.push_str("\n## CLIENT CONTEXT\n");
            prompt.push_str(context);
            prompt.push('\n');
        }

        for diagnostic in extractor.diagnostics() {
            debug!(%diagnostic, "extraction diagnostic");
        }

        let raw = self.llm.complete(SYSTEM_PROMPT, &prompt).await?;
        let proposal = match super::normalize::normalize(&raw, &self.project_root) {
            Ok(proposal) => proposal,
            Err(RomaError::ModelOutputInvalid(first)) => {
                // One corrective retry, then give up.
                warn!(%first, "model output unparseable, retrying once");
                let retry = self.llm.complete(RETRY_SYSTEM_PROMPT, &prompt).await?;
                super::normalize::normalize(&retry, &self.project_root)?
            }
            Err(e) => return Err(e),
        };

        files_read.dedup_by(|a, b| a.path == b.path);
        let patch_set = build_patch_set(
            proposal,
            &self.project_root,
            self.config.limits.max_patch_bytes,
            files_read,
        );

        Ok(Analysis {
            traceback: parsed,
            descriptor,
            patch_set,
            model_prompt: prompt,
        })
    }

    /// Write a patch set to disk with the safe applier.
    pub fn apply(&self, patch_set: &PatchSet) -> ApplyReport {
        SafeApplier::new(&self.project_root).apply(&patch_set.patches, &self.cancelled)
    }

    /// Symbol excerpts for the upstream files of a chain.
    fn upstream_excerpts(
        &self,
        chain: &CallChain,
        extractor: &mut ContextExtractor,
    ) -> Vec<(String, Vec<Symbol>)> {
        chain
            .upstream_files
            .iter()
            .filter_map(|path| {
                let symbol = extractor.extract(path, 1, Language::from_path(path))?;
                let display = path
                    .strip_prefix(&self.project_root)
                    .unwrap_or(path)
                    .display()
                    .to_string();
                Some((display, vec![symbol]))
            })
            .collect()
    }

    /// Excerpts for analyzer-selected candidate files (scan path).
    fn candidate_excerpts(
        &self,
        report: &super::models::ErrorReport,
        extractor: &mut ContextExtractor,
        files_read: &mut Vec<ReadRecord>,
    ) -> Vec<(String, Vec<Symbol>)> {
        report
            .candidates
            .iter()
            .filter_map(|candidate| {
                let absolute = self.project_root.join(&candidate.file.path);
                let symbol = extractor.extract(&absolute, 1, candidate.file.language)?;
                files_read.push(ReadRecord {
                    path: absolute,
                    source: ReadSource::Scan,
                });
                Some((candidate.file.path.display().to_string(), vec![symbol]))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Scripted model: pops canned responses and records prompts.
    struct StubModel {
        responses: Mutex<VecDeque<String>>,
        prompts: Mutex<Vec<String>>,
    }

    impl StubModel {
        fn new(responses: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.iter().map(|r| r.to_string()).collect()),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Completion for StubModel {
        async fn complete(&self, _system: &str, prompt: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| RomaError::UpstreamExhausted("stub out of responses".to_string()))
        }
    }

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
    }

    fn engine(root: &Path, llm: Arc<dyn Completion>) -> Engine {
        Engine::new(Config::default(), root, llm)
    }

    #[tokio::test]
    async fn python_index_error_end_to_end() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        // process_data spans lines 38-47.
        let mut content = String::new();
        for i in 1..=36 {
            content.push_str(&format!("# filler {i}\n"));
        }
        content.push('\n');
        content.push_str(
            "def process_data(items, index):\n    \"\"\"Pick one item.\"\"\"\n    if not items:\n        return None\n    if index is None:\n        index = 0\n    value = items[index]\n    cleaned = str(value)\n    result = cleaned.strip()\n    return result\n",
        );
        write(root, "src/main.py", &content);

        let stub = StubModel::new(&[r#"{"filepath": "src/main.py", "full_code_block": "fixed", "explanation": "bounds check added"}"#]);
        let engine = engine(root, stub.clone());

        let log = "Traceback (most recent call last):\n  File \"src/main.py\", line 42, in process_data\n    return items[index]\nIndexError: list index out of range\n";
        let analysis = engine.analyze(log, None).await.unwrap();

        assert_eq!(analysis.traceback.frames.len(), 1);
        assert_eq!(analysis.traceback.frames[0].line, 42);

        let prompt = &stub.prompts()[0];
        assert!(prompt.contains("def process_data(items, index):"));
        assert!(prompt.contains("return result"));
        assert!(prompt.contains("src/main.py:42 in process_data"));

        assert_eq!(analysis.patch_set.patches.len(), 1);
        assert!(analysis.patch_set.patches[0].diff.contains("+fixed"));
        assert!(analysis
            .patch_set
            .files_read
            .iter()
            .any(|r| r.source == ReadSource::Traceback));
    }

    #[tokio::test]
    async fn cross_file_chain_feeds_additional_fixes() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        write(
            root,
            "src/utils.py",
            "def process_data(items):\n    total = 0\n    for item in items:\n        total += item.value\n    return total\n",
        );
        write(
            root,
            "src/main.py",
            "from src.utils import process_data\n\n\ndef run():\n    data = [1, 2]\n    result = process_data(data)\n    return result\n\n\nrun()\n",
        );

        let stub = StubModel::new(&[r#"{
            "filepath": "src/utils.py",
            "full_code_block": "def process_data(items):\n    return sum(items)\n",
            "explanation": "ints have no .value",
            "root_cause_file": "src/main.py",
            "root_cause_explanation": "main passes bare ints",
            "additional_fixes": [
                {"filepath": "src/main.py", "full_code_block": "from src.utils import process_data\n\nprint(process_data([1, 2]))\n", "explanation": "pass ints deliberately"}
            ]
        }"#]);
        let engine = engine(root, stub.clone());

        let log = "  File \"src/main.py\", line 10, in <module>\n    run()\n  File \"src/main.py\", line 6, in run\n    result = process_data(data)\n  File \"src/utils.py\", line 4, in process_data\n    total += item.value\nAttributeError: 'int' object has no attribute 'value'\n";
        let analysis = engine.analyze(log, None).await.unwrap();

        assert_eq!(analysis.traceback.frames.len(), 3);
        assert_eq!(
            analysis.traceback.crash_frame().unwrap().filepath,
            "src/utils.py"
        );

        let prompt = &stub.prompts()[0];
        assert!(prompt.contains("in run"));
        assert!(prompt.contains("process_data"));

        let paths: Vec<String> = analysis
            .patch_set
            .patches
            .iter()
            .map(|p| p.path.display().to_string())
            .collect();
        assert_eq!(paths, vec!["src/utils.py", "src/main.py"]);
        assert_eq!(
            analysis.patch_set.proposal.root_cause_file.as_deref(),
            Some("src/main.py")
        );
    }

    #[tokio::test]
    async fn no_frames_falls_back_to_scan_and_analyzer() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        write(root, "package.json", r#"{"dependencies": {"express": "^4"}}"#);
        write(
            root,
            "server.js",
            "const express = require('express');\nconst app = express();\napp.listen(3000);\n",
        );

        let stub = StubModel::new(&[r#"{"filepath": "server.js", "full_code_block": "// routes added", "explanation": "missing route"}"#]);
        let engine = engine(root, stub.clone());

        let analysis = engine.analyze("Cannot GET /api/users", None).await.unwrap();
        assert!(analysis.traceback.frames.is_empty());
        assert_eq!(analysis.descriptor.frameworks, vec!["express"]);

        let prompt = &stub.prompts()[0];
        assert!(prompt.contains("## ERROR ANALYSIS"));
        assert!(prompt.contains("## PROJECT DESCRIPTOR"));
        assert!(analysis
            .patch_set
            .files_read
            .iter()
            .all(|r| r.source == ReadSource::Scan));
    }

    #[tokio::test]
    async fn malformed_output_retries_once_then_fails() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        write(root, "main.py", "x = 1\n");

        let stub = StubModel::new(&["not json at all", "still not json"]);
        let engine = engine(root, stub.clone());

        let result = engine
            .analyze("  File \"main.py\", line 1, in <module>\nValueError: x\n", None)
            .await;
        assert!(matches!(result, Err(RomaError::ModelOutputInvalid(_))));
        assert_eq!(stub.prompts().len(), 2);
    }

    #[tokio::test]
    async fn malformed_then_valid_output_recovers() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        write(root, "main.py", "x = 1\n");

        let stub = StubModel::new(&[
            "sorry, here is prose",
            r#"{"filepath": "main.py", "full_code_block": "x = 2\n", "explanation": "bump"}"#,
        ]);
        let engine = engine(root, stub.clone());

        let analysis = engine
            .analyze("  File \"main.py\", line 1, in <module>\nValueError: x\n", None)
            .await
            .unwrap();
        assert_eq!(analysis.patch_set.patches.len(), 1);
    }

    #[tokio::test]
    async fn empty_log_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let engine = engine(tmp.path(), StubModel::new(&[]));
        assert!(matches!(
            engine.analyze("   \n  ", None).await,
            Err(RomaError::LogEmpty)
        ));
    }

    #[tokio::test]
    async fn oversized_log_is_rejected_before_the_model_call() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.limits.max_log_bytes = 16;
        let stub = StubModel::new(&[]);
        let engine = Engine::new(config, tmp.path(), stub.clone());

        let result = engine.analyze(&"x".repeat(64), None).await;
        assert!(matches!(result, Err(RomaError::SizeCapExceeded { .. })));
        assert!(stub.prompts().is_empty());
    }
}
