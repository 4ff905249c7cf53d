//! HTTP API surface: POST /analyze, GET /health, GET /info.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{error, info};

use crate::config::Config;
use crate::core::{Engine, GeminiClient, KeyPool, Language};
use crate::error::RomaError;

const API_KEY_HEADER: &str = "x-roma-api-key";

#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    pool: Arc<KeyPool>,
    default_root: PathBuf,
}

#[derive(Deserialize)]
pub struct AnalyzeRequest {
    log: String,
    #[serde(default)]
    context: Option<String>,
    #[serde(default)]
    project_root: Option<String>,
    #[serde(default)]
    language: Option<String>,
}

#[derive(Serialize)]
pub struct AdditionalFixResponse {
    filepath: Option<String>,
    code: String,
    explanation: String,
    diff: Option<String>,
}

#[derive(Serialize)]
pub struct AnalyzeResponse {
    explanation: String,
    code: String,
    filepath: Option<String>,
    diff: Option<String>,
    root_cause_file: Option<String>,
    root_cause_explanation: Option<String>,
    additional_fixes: Vec<AdditionalFixResponse>,
    files_read: Vec<String>,
    files_read_sources: HashMap<String, &'static str>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    api_key_configured: bool,
}

#[derive(Serialize)]
struct Capabilities {
    multi_language: bool,
    deep_debugging: bool,
    root_cause_analysis: bool,
    multiple_fixes: bool,
}

#[derive(Serialize)]
struct InfoResponse {
    version: &'static str,
    supported_languages: Vec<&'static str>,
    capabilities: Capabilities,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Start serving on the given port; blocks until the listener stops.
pub async fn serve(config: Config, project_root: PathBuf, port: u16) -> anyhow::Result<()> {
    let pool = Arc::new(KeyPool::new(config.llm.api_keys.clone()));
    let state = AppState {
        config: Arc::new(config),
        pool,
        default_root: project_root,
    };

    let app = build_router(state.clone());
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/analyze", post(analyze))
        .route("/health", get(health))
        .route("/info", get(info_handler))
        .layer(cors_layer(&state.config))
        .with_state(state)
}

/// CORS from the configured allowlists; absent configuration allows any
/// origin (the server binds loopback by default).
fn cors_layer(config: &Config) -> CorsLayer {
    let origins = config.server.allowed_origins.clone();
    let regex = config
        .server
        .allowed_origin_regex
        .as_deref()
        .and_then(|pattern| Regex::new(pattern).ok());

    if origins.is_empty() && regex.is_none() {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }

    let allow = AllowOrigin::predicate(move |origin: &HeaderValue, _| {
        let Ok(origin) = origin.to_str() else {
            return false;
        };
        origins.iter().any(|allowed| allowed == origin)
            || regex.as_ref().map(|re| re.is_match(origin)).unwrap_or(false)
    });
    CorsLayer::new()
        .allow_origin(allow)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Gate a request on `X-ROMA-API-KEY` when a server key is configured.
fn check_api_key(config: &Config, headers: &HeaderMap) -> Result<(), Response> {
    let Some(expected) = &config.server.api_key else {
        return Ok(());
    };
    let presented = headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok());
    if presented == Some(expected.as_str()) {
        Ok(())
    } else {
        Err((
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse {
                error: "missing or invalid API key".to_string(),
            }),
        )
            .into_response())
    }
}

async fn analyze(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<AnalyzeRequest>,
) -> Result<Json<AnalyzeResponse>, Response> {
    check_api_key(&state.config, &headers)?;

    let project_root = match (&request.project_root, state.config.server.allow_project_root) {
        (Some(root), true) => PathBuf::from(root),
        _ => state.default_root.clone(),
    };

    let llm = GeminiClient::new(&state.config.llm, state.pool.clone())
        .map_err(|e| error_response(&e))?;
    let engine = Engine::new((*state.config).clone(), &project_root, Arc::new(llm));

    let language = request
        .language
        .as_deref()
        .map(Language::from_name)
        .filter(|l| *l != Language::Unknown);

    let analysis = engine
        .analyze_with_context(&request.log, request.context.as_deref(), language)
        .await
        .map_err(|e| error_response(&e))?;

    let patch_set = &analysis.patch_set;
    let proposal = &patch_set.proposal;
    let diff_for = |path: &Option<String>| {
        path.as_deref().and_then(|p| {
            patch_set
                .patches
                .iter()
                .find(|patch| patch.path == std::path::Path::new(p))
                .map(|patch| patch.diff.clone())
        })
    };

    let additional_fixes = proposal
        .additional_fixes
        .iter()
        .map(|fix| AdditionalFixResponse {
            filepath: fix.filepath.clone(),
            code: fix.full_code_block.clone(),
            explanation: fix.explanation.clone(),
            diff: diff_for(&fix.filepath),
        })
        .collect();

    Ok(Json(AnalyzeResponse {
        explanation: proposal.explanation.clone(),
        code: proposal.full_code_block.clone(),
        filepath: proposal.filepath.clone(),
        diff: diff_for(&proposal.filepath),
        root_cause_file: proposal.root_cause_file.clone(),
        root_cause_explanation: proposal.root_cause_explanation.clone(),
        additional_fixes,
        files_read: patch_set
            .files_read
            .iter()
            .map(|r| r.path.display().to_string())
            .collect(),
        files_read_sources: patch_set.files_read_sources(),
    }))
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        api_key_configured: state.config.api_key_configured(),
    })
}

async fn info_handler() -> Json<InfoResponse> {
    Json(InfoResponse {
        version: env!("CARGO_PKG_VERSION"),
        supported_languages: Language::supported().iter().map(|l| l.as_str()).collect(),
        capabilities: Capabilities {
            multi_language: true,
            deep_debugging: true,
            root_cause_analysis: true,
            multiple_fixes: true,
        },
    })
}

fn error_response(error: &RomaError) -> Response {
    let status = match error {
        RomaError::LogEmpty | RomaError::SizeCapExceeded { .. } => StatusCode::BAD_REQUEST,
        RomaError::UpstreamRateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
        RomaError::UpstreamExhausted(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error!(%error, "analysis request failed");
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn config_with_key(key: Option<&str>) -> Config {
        let mut config = Config::default();
        config.server.api_key = key.map(|k| k.to_string());
        config
    }

    #[test]
    fn api_key_gate_accepts_matching_header() {
        let config = config_with_key(Some("sekrit"));
        let mut headers = HeaderMap::new();
        headers.insert(API_KEY_HEADER, HeaderValue::from_static("sekrit"));
        assert!(check_api_key(&config, &headers).is_ok());
    }

    #[test]
    fn api_key_gate_rejects_missing_or_wrong_header() {
        let config = config_with_key(Some("sekrit"));
        assert!(check_api_key(&config, &HeaderMap::new()).is_err());

        let mut headers = HeaderMap::new();
        headers.insert(API_KEY_HEADER, HeaderValue::from_static("wrong"));
        assert!(check_api_key(&config, &headers).is_err());
    }

    #[test]
    fn api_key_gate_is_open_when_unconfigured() {
        let config = config_with_key(None);
        assert!(check_api_key(&config, &HeaderMap::new()).is_ok());
    }

    #[tokio::test]
    async fn health_reports_key_state() {
        let mut config = Config::default();
        config.llm.api_keys = vec!["k".to_string()];
        let state = AppState {
            config: Arc::new(config),
            pool: Arc::new(KeyPool::new(vec!["k".to_string()])),
            default_root: PathBuf::from("."),
        };
        let response = health(State(state)).await;
        assert_eq!(response.0.status, "ok");
        assert!(response.0.api_key_configured);
    }

    #[test]
    fn quota_exhaustion_maps_to_429_and_full_exhaustion_to_502() {
        let response = error_response(&RomaError::UpstreamRateLimited("quota".to_string()));
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        let response = error_response(&RomaError::UpstreamExhausted("spent".to_string()));
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        let response = error_response(&RomaError::LogEmpty);
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn info_lists_supported_languages_and_capabilities() {
        let response = info_handler().await;
        assert!(response.0.supported_languages.contains(&"python"));
        assert!(response.0.supported_languages.contains(&"java"));
        assert!(response.0.capabilities.root_cause_analysis);
    }
}
