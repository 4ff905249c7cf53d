//! Gemini client with key rotation, model fallback, and bounded retries.
//!
//! All key-pool mutation goes through [`KeyPool::use_key`] and
//! [`KeyPool::quarantine_key`]; quarantine is monotonic for the process.

use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::LlmConfig;
use crate::error::{Result, RomaError};

const BACKOFF_BASE_MS: u64 = 500;
const BACKOFF_CAP_MS: u64 = 8_000;
const MAX_TRANSIENT_ATTEMPTS: u32 = 3;

/// Seam between the engine and the model transport.
#[async_trait]
pub trait Completion: Send + Sync {
    /// Send one prompt and return the raw model text.
    async fn complete(&self, system: &str, prompt: &str) -> Result<String>;
}

/// Why a single (model, key) call failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallFailure {
    /// 429 / quota exhausted / provider RESOURCE_EXHAUSTED.
    Quota(String),
    /// 401 / 403: the key itself is bad.
    Auth(String),
    /// 404: the model does not exist for this key/API version.
    ModelNotFound(String),
    /// 5xx or transport error worth retrying.
    Transient(String),
    /// Anything else; surfaced immediately.
    Fatal(String),
}

/// Round-robin key pool with process-lifetime quarantine.
pub struct KeyPool {
    keys: Vec<String>,
    state: Mutex<PoolState>,
}

struct PoolState {
    next: usize,
    quarantined: HashSet<usize>,
}

impl KeyPool {
    pub fn new(keys: Vec<String>) -> Self {
        Self {
            keys,
            state: Mutex::new(PoolState {
                next: 0,
                quarantined: HashSet::new(),
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Next non-quarantined key, round-robin. `None` once every key is out.
    pub fn use_key(&self) -> Option<(usize, String)> {
        let mut state = self.state.lock().expect("key pool poisoned");
        if state.quarantined.len() >= self.keys.len() {
            return None;
        }
        for _ in 0..self.keys.len() {
            let index = state.next % self.keys.len();
            state.next = state.next.wrapping_add(1);
            if !state.quarantined.contains(&index) {
                return Some((index, self.keys[index].clone()));
            }
        }
        None
    }

    /// Remove a key from rotation for the rest of the process.
    pub fn quarantine_key(&self, index: usize) {
        let mut state = self.state.lock().expect("key pool poisoned");
        state.quarantined.insert(index);
    }

    pub fn quarantined_count(&self) -> usize {
        self.state.lock().expect("key pool poisoned").quarantined.len()
    }

    pub fn is_quarantined(&self, index: usize) -> bool {
        self.state
            .lock()
            .expect("key pool poisoned")
            .quarantined
            .contains(&index)
    }
}

pub struct GeminiClient {
    http: reqwest::Client,
    base_url: String,
    models: Vec<String>,
    pool: Arc<KeyPool>,
}

impl GeminiClient {
    pub fn new(config: &LlmConfig, pool: Arc<KeyPool>) -> Result<Self> {
        if pool.is_empty() {
            return Err(RomaError::Config(
                "no API keys configured; set GEMINI_API_KEY or GEMINI_API_KEYS".to_string(),
            ));
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            models: config.models.clone(),
            pool,
        })
    }

    pub fn pool(&self) -> Arc<KeyPool> {
        self.pool.clone()
    }

    /// Model-priority walk with key rotation:
    /// quota/auth failures quarantine the key and rotate to the next one on
    /// the same model; model-not-found advances to the next model; transient
    /// errors back off and retry the SAME key before giving the model up.
    /// Once every pair is spent the call surfaces `UpstreamExhausted`, or
    /// `UpstreamRateLimited` when every failure was a quota rejection.
    async fn run<F, Fut>(&self, mut attempt: F) -> Result<String>
    where
        F: FnMut(String, String) -> Fut,
        Fut: Future<Output = std::result::Result<String, CallFailure>>,
    {
        let mut last_error = String::from("no attempts made");
        let mut any_failure = false;
        let mut quota_only = true;

        for model in &self.models {
            let mut transient_attempts: u32 = 0;
            let mut backoff_ms = BACKOFF_BASE_MS;
            // Held across transient retries so backoff re-attempts the same
            // key instead of silently rotating through the pool.
            let mut current = self.pool.use_key();

            loop {
                let Some((key_index, key)) = current.clone() else {
                    last_error = format!("all keys quarantined before model {model}");
                    break;
                };

                match attempt(model.clone(), key).await {
                    Ok(text) => return Ok(text),
                    Err(CallFailure::Quota(message)) => {
                        warn!(%model, key_index, "quota exhausted, quarantining key");
                        self.pool.quarantine_key(key_index);
                        last_error = message;
                        any_failure = true;
                        current = self.pool.use_key();
                    }
                    Err(CallFailure::Auth(message)) => {
                        warn!(%model, key_index, "key rejected, quarantining");
                        self.pool.quarantine_key(key_index);
                        last_error = message;
                        any_failure = true;
                        quota_only = false;
                        current = self.pool.use_key();
                    }
                    Err(CallFailure::ModelNotFound(message)) => {
                        debug!(%model, "model not available, falling through");
                        last_error = message;
                        any_failure = true;
                        quota_only = false;
                        break;
                    }
                    Err(CallFailure::Transient(message)) => {
                        transient_attempts += 1;
                        last_error = message;
                        any_failure = true;
                        quota_only = false;
                        if transient_attempts >= MAX_TRANSIENT_ATTEMPTS {
                            break;
                        }
                        tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                        backoff_ms = (backoff_ms * 2).min(BACKOFF_CAP_MS);
                    }
                    Err(CallFailure::Fatal(message)) => {
                        return Err(RomaError::ModelOutputInvalid(message));
                    }
                }
            }
        }

        if any_failure && quota_only {
            Err(RomaError::UpstreamRateLimited(last_error))
        } else {
            Err(RomaError::UpstreamExhausted(last_error))
        }
    }

    async fn call_model(&self, model: &str, key: &str, system: &str, prompt: &str)
        -> std::result::Result<String, CallFailure>
    {
        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.base_url, model, key
        );
        let payload = json!({
            "systemInstruction": {"parts": [{"text": system}]},
            "contents": [{"parts": [{"text": prompt}]}],
            "generationConfig": {
                "temperature": 0,
                "responseMimeType": "application/json"
            }
        });

        let response = self
            .http
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    CallFailure::Transient(format!("request failed: {e}"))
                } else {
                    CallFailure::Fatal(format!("request failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status.as_u16(), &body));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| CallFailure::Transient(format!("unreadable response body: {e}")))?;
        body["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .map(|text| text.to_string())
            .ok_or_else(|| {
                CallFailure::Fatal(format!(
                    "response lacks candidate text: {}",
                    truncate_for_log(&body.to_string())
                ))
            })
    }
}

#[async_trait]
impl Completion for GeminiClient {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String> {
        self.run(|model, key| async move {
            self.call_model(&model, &key, system, prompt).await
        })
        .await
    }
}

/// Map an HTTP status (plus provider body hints) to a failure class.
pub fn classify_status(status: u16, body: &str) -> CallFailure {
    let message = format!("HTTP {status}: {}", truncate_for_log(body));
    let body_lower = body.to_lowercase();
    match status {
        429 => CallFailure::Quota(message),
        401 | 403 => CallFailure::Auth(message),
        404 => CallFailure::ModelNotFound(message),
        500..=599 => CallFailure::Transient(message),
        _ if body_lower.contains("resource_exhausted") || body_lower.contains("quota") => {
            CallFailure::Quota(message)
        }
        _ => CallFailure::Fatal(message),
    }
}

fn truncate_for_log(text: &str) -> String {
    let mut end = text.len().min(200);
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn client_with(keys: &[&str], models: &[&str]) -> GeminiClient {
        let config = LlmConfig {
            api_keys: keys.iter().map(|k| k.to_string()).collect(),
            models: models.iter().map(|m| m.to_string()).collect(),
            base_url: "http://127.0.0.1:1".to_string(),
            timeout_secs: 1,
        };
        let pool = Arc::new(KeyPool::new(config.api_keys.clone()));
        GeminiClient::new(&config, pool).unwrap()
    }

    #[test]
    fn key_pool_round_robins_and_quarantines() {
        let pool = KeyPool::new(vec!["a".into(), "b".into(), "c".into()]);
        assert_eq!(pool.use_key().unwrap().1, "a");
        assert_eq!(pool.use_key().unwrap().1, "b");
        assert_eq!(pool.use_key().unwrap().1, "c");
        assert_eq!(pool.use_key().unwrap().1, "a");

        pool.quarantine_key(1);
        let seen: Vec<String> = (0..4).map(|_| pool.use_key().unwrap().1).collect();
        assert!(!seen.contains(&"b".to_string()));
        assert!(pool.is_quarantined(1));

        pool.quarantine_key(0);
        pool.quarantine_key(2);
        assert!(pool.use_key().is_none());
    }

    #[test]
    fn quarantine_is_monotonic() {
        let pool = KeyPool::new(vec!["a".into(), "b".into()]);
        pool.quarantine_key(0);
        for _ in 0..10 {
            let (index, key) = pool.use_key().unwrap();
            assert_eq!(index, 1);
            assert_eq!(key, "b");
        }
        assert_eq!(pool.quarantined_count(), 1);
    }

    #[tokio::test]
    async fn quota_rotates_key_without_advancing_model() {
        let client = client_with(&["key-a", "key-b"], &["model-1", "model-2"]);
        let pool = client.pool();
        let calls = AtomicUsize::new(0);
        let models_used = Mutex::new(Vec::new());

        let result = client
            .run(|model, key| {
                calls.fetch_add(1, Ordering::SeqCst);
                models_used.lock().unwrap().push(model);
                async move {
                    if key == "key-a" {
                        Err(classify_status(429, "quota exceeded"))
                    } else {
                        Ok("fixed".to_string())
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "fixed");
        // Exactly one retry, on the same model, with key A flagged.
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let models_used = models_used.lock().unwrap();
        assert_eq!(models_used.as_slice(), ["model-1", "model-1"]);
        assert!(pool.is_quarantined(0));
        assert!(!pool.is_quarantined(1));
    }

    #[tokio::test]
    async fn model_not_found_falls_through_to_next_model() {
        let client = client_with(&["only-key"], &["gone-model", "live-model"]);
        let result = client
            .run(|model, _key| async move {
                if model == "gone-model" {
                    Err(classify_status(404, "not found"))
                } else {
                    Ok("ok".to_string())
                }
            })
            .await;
        assert_eq!(result.unwrap(), "ok");
    }

    #[tokio::test]
    async fn quota_exhaustion_of_every_pair_surfaces_rate_limited() {
        let client = client_with(&["k1", "k2"], &["m1", "m2"]);
        let result = client
            .run(|_model, _key| async move {
                Err::<String, _>(classify_status(429, "quota"))
            })
            .await;
        assert!(matches!(result, Err(RomaError::UpstreamRateLimited(_))));
        assert_eq!(client.pool().quarantined_count(), 2);
    }

    #[tokio::test]
    async fn mixed_failures_surface_upstream_exhausted() {
        let client = client_with(&["k1", "k2"], &["m1"]);
        let result = client
            .run(|_model, key| async move {
                if key == "k1" {
                    Err::<String, _>(classify_status(429, "quota"))
                } else {
                    Err::<String, _>(classify_status(403, "forbidden"))
                }
            })
            .await;
        assert!(matches!(result, Err(RomaError::UpstreamExhausted(_))));
        assert_eq!(client.pool().quarantined_count(), 2);
    }

    #[tokio::test]
    async fn transient_errors_retry_then_give_up_per_model() {
        let client = client_with(&["k"], &["m"]);
        let calls = AtomicUsize::new(0);
        let result = client
            .run(|_model, _key| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { Err::<String, _>(classify_status(503, "unavailable")) }
            })
            .await;
        assert!(matches!(result, Err(RomaError::UpstreamExhausted(_))));
        assert_eq!(calls.load(Ordering::SeqCst), MAX_TRANSIENT_ATTEMPTS as usize);
    }

    #[tokio::test]
    async fn transient_retries_reuse_the_same_key() {
        let client = client_with(&["key-a", "key-b"], &["m"]);
        let keys_used = Mutex::new(Vec::new());
        let result = client
            .run(|_model, key| {
                keys_used.lock().unwrap().push(key);
                async move { Err::<String, _>(classify_status(503, "unavailable")) }
            })
            .await;
        assert!(matches!(result, Err(RomaError::UpstreamExhausted(_))));

        let keys_used = keys_used.lock().unwrap();
        assert_eq!(keys_used.len(), MAX_TRANSIENT_ATTEMPTS as usize);
        assert!(keys_used.iter().all(|k| k == "key-a"));
        // Backoff never quarantines.
        assert_eq!(client.pool().quarantined_count(), 0);
    }

    #[test]
    fn status_classification() {
        assert!(matches!(classify_status(429, ""), CallFailure::Quota(_)));
        assert!(matches!(classify_status(401, ""), CallFailure::Auth(_)));
        assert!(matches!(classify_status(404, ""), CallFailure::ModelNotFound(_)));
        assert!(matches!(classify_status(502, ""), CallFailure::Transient(_)));
        assert!(matches!(
            classify_status(400, "RESOURCE_EXHAUSTED"),
            CallFailure::Quota(_)
        ));
        assert!(matches!(classify_status(400, "bad request"), CallFailure::Fatal(_)));
    }
}
