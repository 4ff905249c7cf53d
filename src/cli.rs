use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::error;

use crate::config::Config;
use crate::core::{Analysis, Engine, GeminiClient, KeyPool, Language};
use crate::server;

#[derive(Parser)]
#[command(name = "roma")]
#[command(about = "Investigation-first automated debugger: paste an error log, get an applicable fix")]
#[command(version)]
pub struct Cli {
    /// Error log file to analyze; omit to paste the log interactively.
    pub log_file: Option<PathBuf>,

    /// Override traceback language detection
    /// (python, javascript, typescript, go, rust, java).
    #[arg(long)]
    pub language: Option<String>,

    /// Print the proposed fix and diff without writing any file.
    #[arg(long)]
    pub no_apply: bool,

    /// Start the HTTP API server instead of analyzing a log.
    #[arg(long)]
    pub serve: bool,

    /// Port for the HTTP API server.
    #[arg(long, default_value_t = 8080)]
    pub port: u16,

    /// Project root to investigate (defaults to the current directory).
    #[arg(long)]
    pub project_root: Option<PathBuf>,
}

impl Cli {
    /// Exit codes: 0 success or user declined, 1 analysis failure,
    /// 2 usage error (produced by clap before we get here).
    pub async fn execute(self) -> ExitCode {
        let config = match Config::from_env() {
            Ok(config) => config,
            Err(e) => {
                error!("{e}");
                return ExitCode::from(2);
            }
        };

        let project_root = self
            .project_root
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));

        if self.serve {
            return match server::serve(config, project_root, self.port).await {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    error!("server failed: {e}");
                    ExitCode::FAILURE
                }
            };
        }

        let log = match &self.log_file {
            Some(path) => match std::fs::read_to_string(path) {
                Ok(log) => log,
                Err(e) => {
                    eprintln!("error: cannot read {}: {e}", path.display());
                    return ExitCode::FAILURE;
                }
            },
            None => read_log_interactively(),
        };

        let language = self.language.as_deref().map(Language::from_name);
        if language == Some(Language::Unknown) {
            eprintln!("error: unsupported --language value");
            return ExitCode::from(2);
        }

        let llm = match GeminiClient::new(
            &config.llm,
            Arc::new(KeyPool::new(config.llm.api_keys.clone())),
        ) {
            Ok(client) => client,
            Err(e) => {
                eprintln!("error: {e}");
                return ExitCode::FAILURE;
            }
        };
        let engine = Engine::new(config, &project_root, Arc::new(llm));

        let analysis = match engine.analyze(&log, language).await {
            Ok(analysis) => analysis,
            Err(e) => {
                eprintln!("analysis failed: {e}");
                return ExitCode::FAILURE;
            }
        };

        present(&analysis);

        if self.no_apply || analysis.patch_set.patches.is_empty() {
            return ExitCode::SUCCESS;
        }

        if !confirm_apply() {
            println!("Not applied.");
            return ExitCode::SUCCESS;
        }

        let report = engine.apply(&analysis.patch_set);
        for path in &report.applied {
            println!("applied {}", path.display());
        }
        match report.failure {
            None => ExitCode::SUCCESS,
            Some(e) => {
                eprintln!("apply failed: {e}");
                ExitCode::FAILURE
            }
        }
    }
}

/// Read a pasted log from stdin until an empty line follows content.
fn read_log_interactively() -> String {
    println!("Paste the error log, then finish with an empty line:");
    let stdin = std::io::stdin();
    let mut lines = Vec::new();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        if line.trim().is_empty() {
            if !lines.is_empty() {
                break;
            }
            continue;
        }
        lines.push(line);
    }
    lines.join("\n")
}

fn present(analysis: &Analysis) {
    let patch_set = &analysis.patch_set;

    println!();
    println!("== Explanation ==");
    println!("{}", patch_set.proposal.explanation);

    if let (Some(file), Some(reason)) = (
        &patch_set.proposal.root_cause_file,
        &patch_set.proposal.root_cause_explanation,
    ) {
        println!();
        println!("Root cause in {file}: {reason}");
    }

    if patch_set.patches.is_empty() {
        println!();
        println!("No file patch was proposed.");
        if !patch_set.proposal.full_code_block.is_empty() {
            println!("Suggested code:");
            println!("{}", patch_set.proposal.full_code_block);
        }
    }

    for patch in &patch_set.patches {
        println!();
        println!("== {} ==", patch.path.display());
        println!("{}", patch.diff);
    }

    for rejected in &patch_set.rejected {
        println!();
        println!("rejected patch for {}: {}", rejected.path, rejected.reason);
    }
}

fn confirm_apply() -> bool {
    print!("Apply these changes? [Y/n] ");
    let _ = std::io::stdout().flush();
    let mut answer = String::new();
    if std::io::stdin().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim().to_lowercase().as_str(), "" | "y" | "yes")
}
