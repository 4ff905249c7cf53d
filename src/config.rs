use serde::{Deserialize, Serialize};

use crate::error::{Result, RomaError};

/// Default model priority, most preferred first.
pub const DEFAULT_MODELS: [&str; 3] = [
    "gemini-3-flash-preview",
    "gemini-2.5-flash",
    "gemini-2.5-flash-lite",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// API key pool, rotated round-robin per call.
    pub api_keys: Vec<String>,

    /// Model priority list, tried in order on quota/not-found/5xx errors.
    pub models: Vec<String>,

    /// Base URL of the generative API endpoint.
    pub base_url: String,

    /// Per-call wall timeout in seconds.
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum accepted error log size in bytes.
    pub max_log_bytes: usize,

    /// Maximum size of a single patch body in bytes.
    pub max_patch_bytes: usize,

    /// Maximum files visited during a project scan.
    pub max_repo_files: usize,

    /// Maximum cumulative bytes visited during a project scan.
    pub max_repo_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// When false, the API ignores client-supplied `project_root`.
    pub allow_project_root: bool,

    /// Exact-match CORS origin allowlist.
    pub allowed_origins: Vec<String>,

    /// Regex CORS origin allowlist.
    pub allowed_origin_regex: Option<String>,

    /// When set, requests must carry a matching `X-ROMA-API-KEY` header.
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub llm: LlmConfig,
    pub limits: LimitsConfig,
    pub server: ServerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            llm: LlmConfig {
                api_keys: Vec::new(),
                models: DEFAULT_MODELS.iter().map(|m| m.to_string()).collect(),
                base_url: "https://generativelanguage.googleapis.com".to_string(),
                timeout_secs: 60,
            },
            limits: LimitsConfig {
                max_log_bytes: 256 * 1024,
                max_patch_bytes: 200 * 1024,
                max_repo_files: 1000,
                max_repo_bytes: 64 * 1024 * 1024,
            },
            server: ServerConfig {
                allow_project_root: true,
                allowed_origins: Vec::new(),
                allowed_origin_regex: None,
                api_key: None,
            },
        }
    }
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        config.llm.api_keys = collect_api_keys(&lookup);

        if let Some(models) = lookup("ROMA_MODELS").or_else(|| lookup("GEMINI_MODELS")) {
            let models: Vec<String> = models
                .split(',')
                .map(|m| m.trim().to_string())
                .filter(|m| !m.is_empty())
                .collect();
            if !models.is_empty() {
                config.llm.models = models;
            }
        }

        if let Some(url) = lookup("ROMA_LLM_BASE_URL") {
            config.llm.base_url = url.trim_end_matches('/').to_string();
        }

        config.limits.max_log_bytes =
            parse_var(&lookup, "ROMA_MAX_LOG_BYTES", config.limits.max_log_bytes)?;
        config.limits.max_patch_bytes =
            parse_var(&lookup, "ROMA_MAX_PATCH_BYTES", config.limits.max_patch_bytes)?;
        config.limits.max_repo_files =
            parse_var(&lookup, "ROMA_MAX_REPO_FILES", config.limits.max_repo_files)?;
        config.limits.max_repo_bytes =
            parse_var(&lookup, "ROMA_MAX_REPO_BYTES", config.limits.max_repo_bytes)?;

        if let Some(value) = lookup("ROMA_ALLOW_PROJECT_ROOT") {
            config.server.allow_project_root = parse_bool(&value);
        }
        if let Some(origins) = lookup("ROMA_ALLOWED_ORIGINS") {
            config.server.allowed_origins = origins
                .split(',')
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect();
        }
        config.server.allowed_origin_regex = lookup("ROMA_ALLOWED_ORIGIN_REGEX");
        config.server.api_key = lookup("ROMA_API_KEY").filter(|k| !k.is_empty());

        Ok(config)
    }

    pub fn api_key_configured(&self) -> bool {
        !self.llm.api_keys.is_empty()
    }
}

/// Gather the key pool: `GEMINI_API_KEYS` (comma-separated) wins, otherwise
/// `GEMINI_API_KEY` plus enumerated `GEMINI_API_KEY2`, `GEMINI_API_KEY3`, ...
fn collect_api_keys<F>(lookup: &F) -> Vec<String>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(joined) = lookup("GEMINI_API_KEYS") {
        let keys: Vec<String> = joined
            .split(',')
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();
        if !keys.is_empty() {
            return keys;
        }
    }

    let mut keys = Vec::new();
    if let Some(base) = lookup("GEMINI_API_KEY").filter(|k| !k.is_empty()) {
        keys.push(base);
    }
    for index in 2.. {
        match lookup(&format!("GEMINI_API_KEY{index}")).filter(|k| !k.is_empty()) {
            Some(key) => keys.push(key),
            None => break,
        }
    }
    keys
}

fn parse_var<F, T>(lookup: &F, name: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(name) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| RomaError::Config(format!("{name} is not a valid number: {value}"))),
        None => Ok(default),
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn defaults_when_environment_is_empty() {
        let config = Config::from_lookup(|_| None).unwrap();
        assert!(config.llm.api_keys.is_empty());
        assert_eq!(config.llm.models, DEFAULT_MODELS.to_vec());
        assert_eq!(config.limits.max_patch_bytes, 200 * 1024);
        assert!(config.server.allow_project_root);
    }

    #[test]
    fn comma_separated_key_pool_wins() {
        let lookup = lookup_from(&[
            ("GEMINI_API_KEYS", "ka, kb ,kc"),
            ("GEMINI_API_KEY", "ignored"),
        ]);
        let config = Config::from_lookup(lookup).unwrap();
        assert_eq!(config.llm.api_keys, vec!["ka", "kb", "kc"]);
    }

    #[test]
    fn enumerated_keys_collected_until_gap() {
        let lookup = lookup_from(&[
            ("GEMINI_API_KEY", "k1"),
            ("GEMINI_API_KEY2", "k2"),
            ("GEMINI_API_KEY3", "k3"),
            ("GEMINI_API_KEY5", "unreachable"),
        ]);
        let config = Config::from_lookup(lookup).unwrap();
        assert_eq!(config.llm.api_keys, vec!["k1", "k2", "k3"]);
    }

    #[test]
    fn model_list_and_caps_override() {
        let lookup = lookup_from(&[
            ("ROMA_MODELS", "m-one , m-two"),
            ("ROMA_MAX_LOG_BYTES", "1024"),
            ("ROMA_ALLOW_PROJECT_ROOT", "false"),
            ("ROMA_API_KEY", "sekrit"),
        ]);
        let config = Config::from_lookup(lookup).unwrap();
        assert_eq!(config.llm.models, vec!["m-one", "m-two"]);
        assert_eq!(config.limits.max_log_bytes, 1024);
        assert!(!config.server.allow_project_root);
        assert_eq!(config.server.api_key.as_deref(), Some("sekrit"));
    }

    #[test]
    fn bad_numeric_value_is_a_config_error() {
        let lookup = lookup_from(&[("ROMA_MAX_REPO_FILES", "lots")]);
        assert!(Config::from_lookup(lookup).is_err());
    }
}
