use thiserror::Error;

/// Main error type for roma-debug operations
#[derive(Error, Debug)]
pub enum RomaError {
    #[error("error log is empty")]
    LogEmpty,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parser error: {0}")]
    Parser(String),

    #[error("patch path escapes the project root: {0}")]
    PathEscape(String),

    #[error("{what} is {actual} bytes, exceeding the {cap} byte cap")]
    SizeCapExceeded {
        what: &'static str,
        actual: usize,
        cap: usize,
    },

    #[error("upstream rate limited: {0}")]
    UpstreamRateLimited(String),

    #[error("all model/key combinations failed; last error: {0}")]
    UpstreamExhausted(String),

    #[error("model returned unusable output: {0}")]
    ModelOutputInvalid(String),

    #[error("write failed for {path} after applying {} file(s)", applied.len())]
    WriteFailed {
        path: String,
        #[source]
        source: std::io::Error,
        applied: Vec<String>,
    },

    #[error("analysis cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, RomaError>;
