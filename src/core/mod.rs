mod analyzer;
mod chain;
mod engine;
mod extractor;
mod graph;
mod imports;
mod llm;
mod models;
mod normalize;
mod parsers;
mod patch;
mod prompt;
mod scanner;
mod traceback;

pub use analyzer::ErrorAnalyzer;
pub use chain::{CallChain, ChainAssembler, MAX_CHAIN_LENGTH, MAX_UPSTREAM_FILES};
pub use engine::{Analysis, Engine};
pub use extractor::ContextExtractor;
pub use graph::DependencyGraph;
pub use imports::ImportResolver;
pub use llm::{Completion, GeminiClient, KeyPool};
pub use models::{
    CallChainEntry, Confidence, ErrorKind, ErrorReport, FilePatch, FixProposal, Frame, Import,
    Language, ParsedTraceback, PatchSet, ProjectDescriptor, ProjectType, ReadRecord, ReadSource,
    RejectedPatch, ScoredFile, SourceFile, Symbol, SymbolKind,
};
pub use patch::{build_patch_set, unified_diff, ApplyReport, SafeApplier};
pub use prompt::{PromptBuilder, SectionBudgets};
pub use scanner::ProjectScanner;
pub use traceback::{parse as parse_traceback, parse_as as parse_traceback_as};
