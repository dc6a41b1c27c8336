use std::net::SocketAddr;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{info, warn};

use gemini_core::GeminiClient;
use server::assets::AssetStore;
use server::config::ServerConfig;
use server::{app, AppState};
use tts_core::{ResultCache, SpeechGateway, DEFAULT_TTL};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let _ = dotenv::dotenv();

    info!("Starting TTS gateway...");

    // Refuses to start without the API credential.
    let config = ServerConfig::from_env()?;

    let backend = Arc::new(GeminiClient::new(&config.api_key));
    let gateway = Arc::new(SpeechGateway::new(backend, ResultCache::new(DEFAULT_TTL)));
    let assets = Arc::new(AssetStore::new(config.audio_dir.clone()));

    info!(
        "Server configuration loaded: port={}, model={}, voice={}, rate_limit={}/min",
        config.port, config.model, config.voice, config.rate_limit_per_minute
    );
    if config.vapi_secret.is_none() {
        warn!("VAPI_SECRET not set, webhook authentication disabled");
    }

    let state = AppState {
        gateway,
        assets,
        config: config.clone(),
        request_count: Arc::new(AtomicU64::new(0)),
    };
    let app = app(state);

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind {addr}: {e}. Try a different PORT."))?;

    info!("Server listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}
