//! Common utilities for integration tests

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;

use server::assets::AssetStore;
use server::config::ServerConfig;
use server::{app, AppState};
use tts_core::{ResultCache, SpeechBackend, SpeechGateway, DEFAULT_TTL};

/// Stub speech backend returning a fixed PCM buffer. An optional trigger
/// text simulates an upstream failure for requests carrying exactly that
/// text, which lets batch tests fail one item while its siblings succeed.
pub struct StubBackend {
    pcm: Vec<u8>,
    fail_on: Option<String>,
    calls: AtomicUsize,
}

impl StubBackend {
    pub fn returning(pcm: Vec<u8>) -> Self {
        Self {
            pcm,
            fail_on: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing_on(pcm: Vec<u8>, text: &str) -> Self {
        Self {
            pcm,
            fail_on: Some(text.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechBackend for StubBackend {
    async fn generate(&self, _model: &str, _voice: &str, text: &str) -> anyhow::Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_on.as_deref() == Some(text) {
            anyhow::bail!("No audio produced by model");
        }
        Ok(self.pcm.clone())
    }
}

pub fn test_config(vapi_secret: Option<&str>) -> ServerConfig {
    ServerConfig {
        api_key: "test-key".to_string(),
        model: "m1".to_string(),
        voice: "Kore".to_string(),
        port: 0,
        audio_dir: std::env::temp_dir().join(format!("tts-gateway-test-{}", uuid::Uuid::new_v4())),
        vapi_secret: vapi_secret.map(|s| s.to_string()),
        rate_limit_per_minute: 600,
        request_timeout_secs: 60,
        cors_allowed_origins: None,
    }
}

/// Create a test app instance backed by a 4-zero-byte PCM stub.
pub fn create_test_app() -> Router {
    create_app_with(
        Arc::new(StubBackend::returning(vec![0u8; 4])),
        test_config(None),
    )
}

pub fn create_app_with(backend: Arc<StubBackend>, config: ServerConfig) -> Router {
    let gateway = Arc::new(SpeechGateway::new(backend, ResultCache::new(DEFAULT_TTL)));
    let assets = Arc::new(AssetStore::new(config.audio_dir.clone()));
    let state = AppState {
        gateway,
        assets,
        config,
        request_count: Arc::new(AtomicU64::new(0)),
    };
    app(state)
}
