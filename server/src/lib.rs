pub mod assets;
pub mod config;
pub mod error;
pub mod validation;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use axum::{
    extract::{DefaultBodyLimit, Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, services::ServeDir, timeout::TimeoutLayer, trace::TraceLayer};
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::GlobalKeyExtractor, GovernorLayer,
};
use tracing::{info, warn};

use tts_core::{SpeechGateway, SynthesisRequest, CHANNELS, SAMPLE_RATE};

use crate::assets::AssetStore;
use crate::config::ServerConfig;
use crate::error::ApiError;
use crate::validation::{validate_tts_text, validate_voice_request};

/// Maximum accepted JSON body size.
const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<SpeechGateway>,
    pub assets: Arc<AssetStore>,
    pub config: ServerConfig,
    pub request_count: Arc<AtomicU64>,
}

static START_TIME: OnceLock<Instant> = OnceLock::new();

#[derive(Deserialize)]
pub struct TtsRequest {
    text: Option<String>,
    voice: Option<String>,
    model: Option<String>,
    #[serde(rename = "return")]
    return_format: Option<String>,
}

#[derive(Deserialize)]
pub struct TtsUrlRequest {
    text: Option<String>,
    voice: Option<String>,
    model: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TtsBase64Response {
    audio: String,
    mime_type: &'static str,
    sample_rate: u32,
    channels: u16,
    model: String,
    voice: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TtsUrlResponse {
    url: String,
    sample_rate: u32,
    channels: u16,
    model: String,
    voice: String,
}

#[derive(Deserialize)]
pub struct BatchRequest {
    items: Option<Vec<BatchItem>>,
}

#[derive(Deserialize)]
pub struct BatchItem {
    text: Option<String>,
    voice: Option<String>,
    model: Option<String>,
}

#[derive(Serialize)]
#[serde(untagged)]
pub enum BatchResult {
    Success(TtsUrlResponse),
    Failure { error: String },
}

#[derive(Serialize)]
pub struct BatchResponse {
    results: Vec<BatchResult>,
}

#[derive(Deserialize)]
pub struct VapiRequest {
    message: Option<VapiMessage>,
}

#[derive(Deserialize)]
pub struct VapiMessage {
    #[serde(rename = "type")]
    kind: Option<String>,
    text: Option<String>,
    #[serde(rename = "sampleRate")]
    sample_rate: Option<u32>,
}

#[derive(Serialize)]
pub struct HealthResponse {
    ok: bool,
    uptime: u64,
    model: String,
    voice: String,
}

/// Build the application router with the full middleware stack.
pub fn app(state: AppState) -> Router {
    let _ = START_TIME.get_or_init(Instant::now);

    let cors = build_cors(&state.config);

    // Rate limiting configuration
    // Using GlobalKeyExtractor to rate limit globally (all requests share the
    // same limit), which works behind proxies where IP extraction is unreliable
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second((state.config.rate_limit_per_minute / 60).max(1) as u64)
            .burst_size(state.config.rate_limit_per_minute)
            .key_extractor(GlobalKeyExtractor)
            .finish()
            .unwrap(),
    );

    // Request ID middleware for tracing
    async fn add_request_id(mut request: Request, next: Next) -> Response {
        let request_id = uuid::Uuid::new_v4().to_string();
        request.headers_mut().insert(
            "x-request-id",
            axum::http::HeaderValue::from_str(&request_id).unwrap(),
        );
        let mut response = next.run(request).await;
        response.headers_mut().insert(
            "x-request-id",
            axum::http::HeaderValue::from_str(&request_id).unwrap(),
        );
        response
    }

    let middleware_stack = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(GovernorLayer::new(governor_conf))
        .layer(TimeoutLayer::new(state.config.request_timeout()))
        .layer(cors)
        .into_inner();

    Router::new()
        .route("/health", get(health_check))
        .route("/healthz", get(health_check))
        .route("/tts", post(tts_endpoint))
        .route("/tts-url", post(tts_url_endpoint))
        .route("/batch-url", post(batch_url_endpoint))
        .route("/vapi-tts", post(vapi_tts_endpoint))
        .route("/metrics", get(metrics_endpoint))
        .nest_service("/audio", ServeDir::new(state.assets.root()))
        .layer(axum::middleware::from_fn(add_request_id))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(middleware_stack)
        .with_state(state)
}

// CORS configuration - environment-aware
fn build_cors(config: &ServerConfig) -> CorsLayer {
    let methods = [
        axum::http::Method::GET,
        axum::http::Method::POST,
        axum::http::Method::OPTIONS,
    ];

    if let Some(ref allowed_origins) = config.cors_allowed_origins {
        let origins: Vec<axum::http::HeaderValue> = allowed_origins
            .iter()
            .filter_map(|origin: &String| origin.parse::<axum::http::HeaderValue>().ok())
            .collect();

        if origins.is_empty() {
            warn!("CORS_ALLOWED_ORIGINS is empty, falling back to permissive CORS");
            CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(methods)
                .allow_headers(tower_http::cors::Any)
                .allow_credentials(false)
        } else {
            info!("CORS configured for {} origin(s)", origins.len());
            CorsLayer::new()
                .allow_origin(tower_http::cors::AllowOrigin::list(origins))
                .allow_methods(methods)
                .allow_headers(tower_http::cors::Any)
                .allow_credentials(false)
        }
    } else {
        warn!("CORS_ALLOWED_ORIGINS not set, allowing all origins (development mode)");
        CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods(methods)
            .allow_headers(tower_http::cors::Any)
            .allow_credentials(false)
    }
}

pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = START_TIME
        .get()
        .map(|start| start.elapsed().as_secs())
        .unwrap_or(0);

    Json(HealthResponse {
        ok: true,
        uptime,
        model: state.config.model.clone(),
        voice: state.config.voice.clone(),
    })
}

/// Apply server defaults to an inbound request and validate its text.
fn resolve_request(
    state: &AppState,
    text: Option<String>,
    voice: Option<String>,
    model: Option<String>,
) -> Result<SynthesisRequest, ApiError> {
    let text = text.unwrap_or_default();
    validate_tts_text(&text)?;
    Ok(SynthesisRequest {
        text,
        voice: voice.unwrap_or_else(|| state.config.voice.clone()),
        model: model.unwrap_or_else(|| state.config.model.clone()),
    })
}

/// Reconstruct the externally visible scheme and host, honoring
/// reverse-proxy forwarded headers when present.
fn external_base_url(headers: &HeaderMap) -> String {
    let proto = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .unwrap_or("http");

    let host = headers
        .get("x-forwarded-host")
        .or_else(|| headers.get(header::HOST))
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .unwrap_or("localhost");

    format!("{proto}://{host}")
}

pub async fn tts_endpoint(
    State(state): State<AppState>,
    Json(req): Json<TtsRequest>,
) -> Result<Response, ApiError> {
    state.request_count.fetch_add(1, Ordering::Relaxed);
    let request = resolve_request(&state, req.text, req.voice, req.model)?;

    let wav = state.gateway.synthesize(&request, true).await?;

    if req.return_format.as_deref() == Some("base64") {
        let audio = general_purpose::STANDARD.encode(&wav);
        return Ok(Json(TtsBase64Response {
            audio,
            mime_type: "audio/wav",
            sample_rate: SAMPLE_RATE,
            channels: CHANNELS,
            model: request.model,
            voice: request.voice,
        })
        .into_response());
    }

    Ok(([(header::CONTENT_TYPE, "audio/wav")], wav).into_response())
}

pub async fn tts_url_endpoint(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<TtsUrlRequest>,
) -> Result<Json<TtsUrlResponse>, ApiError> {
    state.request_count.fetch_add(1, Ordering::Relaxed);
    let request = resolve_request(&state, req.text, req.voice, req.model)?;
    let response = synthesize_to_url(&state, &headers, request).await?;
    Ok(Json(response))
}

/// Synthesize a WAV, persist it, and describe where it can be fetched.
async fn synthesize_to_url(
    state: &AppState,
    headers: &HeaderMap,
    request: SynthesisRequest,
) -> Result<TtsUrlResponse, ApiError> {
    let wav = state.gateway.synthesize(&request, true).await?;

    let file_name = state
        .assets
        .put(&wav)
        .await
        .map_err(|e| ApiError::InternalError(format!("Failed to persist audio: {e}")))?;

    let url = format!(
        "{}{}",
        external_base_url(headers),
        state.assets.resolve(&file_name)
    );

    Ok(TtsUrlResponse {
        url,
        sample_rate: SAMPLE_RATE,
        channels: CHANNELS,
        model: request.model,
        voice: request.voice,
    })
}

pub async fn batch_url_endpoint(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<BatchRequest>,
) -> Result<Json<BatchResponse>, ApiError> {
    state.request_count.fetch_add(1, Ordering::Relaxed);

    let items = match req.items {
        Some(items) if !items.is_empty() => items,
        _ => {
            return Err(ApiError::InvalidInput(
                "items must be a non-empty list".to_string(),
            ))
        }
    };

    info!(count = items.len(), "processing batch synthesis");

    // All items run concurrently; one item's failure never aborts its
    // siblings, and the output preserves input order.
    let futures = items.into_iter().map(|item| {
        let state = state.clone();
        let headers = headers.clone();
        async move {
            let outcome = async {
                let request = resolve_request(&state, item.text, item.voice, item.model)?;
                synthesize_to_url(&state, &headers, request).await
            }
            .await;

            match outcome {
                Ok(ok) => BatchResult::Success(ok),
                Err(e) => BatchResult::Failure {
                    error: e.to_string(),
                },
            }
        }
    });

    let results = futures_util::future::join_all(futures).await;
    Ok(Json(BatchResponse { results }))
}

pub async fn vapi_tts_endpoint(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<VapiRequest>,
) -> Result<Response, ApiError> {
    state.request_count.fetch_add(1, Ordering::Relaxed);

    if let Some(expected) = state.config.vapi_secret.as_deref() {
        let provided = headers.get("x-vapi-secret").and_then(|v| v.to_str().ok());
        if provided != Some(expected) {
            return Err(ApiError::Unauthorized);
        }
    }

    let message = req
        .message
        .ok_or_else(|| ApiError::InvalidInput("Missing message".to_string()))?;
    validate_voice_request(message.kind.as_deref(), message.sample_rate)?;

    let text = message.text.unwrap_or_default();
    validate_tts_text(&text)?;

    // This route always speaks with the server-default model and voice;
    // per-request overrides are not honored.
    let request = SynthesisRequest {
        text,
        voice: state.config.voice.clone(),
        model: state.config.model.clone(),
    };
    let pcm = state.gateway.synthesize(&request, false).await?;

    Ok(([(header::CONTENT_TYPE, "application/octet-stream")], pcm).into_response())
}

#[derive(Serialize)]
pub struct MetricsResponse {
    pub cpu_usage_percent: f32,
    pub memory_used_mb: u64,
    pub memory_total_mb: u64,
    pub memory_usage_percent: f32,
    pub request_count: u64,
    pub uptime_seconds: u64,
    pub system_load: Option<f64>,
}

pub async fn metrics_endpoint(State(state): State<AppState>) -> Json<MetricsResponse> {
    let mut system = sysinfo::System::new();
    system.refresh_cpu();
    system.refresh_memory();

    let cpu_usage = system.global_cpu_info().cpu_usage();

    let memory_used = system.used_memory();
    let memory_total = system.total_memory();
    let memory_usage_percent = if memory_total > 0 {
        (memory_used as f64 / memory_total as f64 * 100.0) as f32
    } else {
        0.0
    };

    let request_count = state.request_count.load(Ordering::Relaxed);

    let uptime = START_TIME
        .get()
        .map(|start| start.elapsed().as_secs())
        .unwrap_or(0);

    // System load (Unix-like systems only)
    let system_load = {
        #[cfg(unix)]
        {
            use std::fs;
            if let Ok(loadavg) = fs::read_to_string("/proc/loadavg") {
                loadavg
                    .split_whitespace()
                    .next()
                    .and_then(|s| s.parse::<f64>().ok())
            } else {
                None
            }
        }
        #[cfg(not(unix))]
        None
    };

    Json(MetricsResponse {
        cpu_usage_percent: cpu_usage,
        memory_used_mb: memory_used / 1024 / 1024,
        memory_total_mb: memory_total / 1024 / 1024,
        memory_usage_percent,
        request_count,
        uptime_seconds: uptime,
        system_load,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_external_base_url_prefers_forwarded_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("host", "internal:8085".parse().unwrap());
        headers.insert("x-forwarded-host", "tts.example.com".parse().unwrap());
        headers.insert("x-forwarded-proto", "https".parse().unwrap());

        assert_eq!(external_base_url(&headers), "https://tts.example.com");
    }

    #[test]
    fn test_external_base_url_falls_back_to_host() {
        let mut headers = HeaderMap::new();
        headers.insert("host", "localhost:8085".parse().unwrap());

        assert_eq!(external_base_url(&headers), "http://localhost:8085");
    }

    #[test]
    fn test_external_base_url_takes_first_forwarded_value() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-host", "edge.example.com, inner".parse().unwrap());
        headers.insert("x-forwarded-proto", "https, http".parse().unwrap());

        assert_eq!(external_base_url(&headers), "https://edge.example.com");
    }
}
