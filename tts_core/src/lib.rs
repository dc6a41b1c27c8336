mod cache;
mod wav;

pub use cache::{Clock, ResultCache, SystemClock, DEFAULT_TTL};
pub use wav::encode_wav;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info};

/// The only audio profile this system produces: 16-bit PCM, mono, 24 kHz.
pub const SAMPLE_RATE: u32 = 24_000;
pub const CHANNELS: u16 = 1;
pub const BITS_PER_SAMPLE: u16 = 16;

/// One synthesis job. The (model, voice, text) triple is the cache identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesisRequest {
    pub text: String,
    pub voice: String,
    pub model: String,
}

/// Shape of the bytes a cache entry holds. WAV-wrapped and raw-PCM results
/// for the same logical request are kept apart so one endpoint can never
/// serve the other's framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    Wav,
    Pcm,
}

impl PayloadKind {
    fn prefix(self) -> &'static str {
        match self {
            PayloadKind::Wav => "wav",
            PayloadKind::Pcm => "pcm",
        }
    }
}

/// Cache key for a synthesis request. Text is trimmed before keying so
/// requests differing only in surrounding whitespace share an entry.
pub fn fingerprint(kind: PayloadKind, model: &str, voice: &str, text: &str) -> String {
    format!("{}::{}::{}::{}", kind.prefix(), model, voice, text.trim())
}

#[derive(Debug, Error)]
pub enum SynthError {
    #[error("Text cannot be empty")]
    EmptyText,

    #[error(transparent)]
    Upstream(#[from] anyhow::Error),
}

/// The remote speech model. Implementations take the model/voice/text and
/// return raw 16-bit mono 24 kHz PCM, already decoded from the transport
/// encoding.
#[async_trait]
pub trait SpeechBackend: Send + Sync {
    async fn generate(&self, model: &str, voice: &str, text: &str) -> anyhow::Result<Vec<u8>>;
}

/// Orchestrates one synthesis: cache consultation, the backend call on a
/// miss, WAV wrapping when asked for, and cache population.
///
/// Concurrent misses for the same fingerprint each call the backend and each
/// write the cache; last write wins. The cache lock is never held across the
/// backend call.
pub struct SpeechGateway {
    backend: Arc<dyn SpeechBackend>,
    cache: ResultCache,
}

impl SpeechGateway {
    pub fn new(backend: Arc<dyn SpeechBackend>, cache: ResultCache) -> Self {
        Self { backend, cache }
    }

    /// Synthesize `request`, returning WAV bytes when `want_wav` is set and
    /// raw PCM otherwise.
    pub async fn synthesize(
        &self,
        request: &SynthesisRequest,
        want_wav: bool,
    ) -> Result<Vec<u8>, SynthError> {
        let text = request.text.trim();
        if text.is_empty() {
            return Err(SynthError::EmptyText);
        }

        let kind = if want_wav {
            PayloadKind::Wav
        } else {
            PayloadKind::Pcm
        };
        let key = fingerprint(kind, &request.model, &request.voice, text);

        if let Some(hit) = self.cache.get(&key) {
            return Ok(hit);
        }

        debug!(model = %request.model, voice = %request.voice, chars = text.len(), "cache miss, calling backend");
        let pcm = self
            .backend
            .generate(&request.model, &request.voice, text)
            .await?;
        info!(bytes = pcm.len(), "backend returned audio");

        let payload = if want_wav {
            wav::encode_wav(&pcm, SAMPLE_RATE, CHANNELS, BITS_PER_SAMPLE)
        } else {
            pcm
        };

        self.cache.set(&key, payload.clone());
        Ok(payload)
    }
}
