use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use tts_core::SpeechBackend;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Structure for the Gemini generateContent request
#[derive(Serialize)]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig<'a>,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct GenerationConfig<'a> {
    #[serde(rename = "responseModalities")]
    response_modalities: Vec<&'a str>,
    #[serde(rename = "speechConfig")]
    speech_config: SpeechConfig<'a>,
}

#[derive(Serialize)]
struct SpeechConfig<'a> {
    #[serde(rename = "voiceConfig")]
    voice_config: VoiceConfig<'a>,
}

#[derive(Serialize)]
struct VoiceConfig<'a> {
    #[serde(rename = "prebuiltVoiceConfig")]
    prebuilt_voice_config: PrebuiltVoiceConfig<'a>,
}

#[derive(Serialize)]
struct PrebuiltVoiceConfig<'a> {
    #[serde(rename = "voiceName")]
    voice_name: &'a str,
}

/// Structure for the Gemini generateContent response. Only the audio path
/// is mapped; everything else in the payload is ignored.
#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(rename = "inlineData")]
    inline_data: Option<InlineData>,
}

#[derive(Deserialize)]
struct InlineData {
    data: String,
}

/// HTTP client for Gemini's speech generation.
///
/// Sends the text with an audio-only response modality and the requested
/// prebuilt voice, and returns the raw PCM bytes decoded from the response.
pub struct GeminiClient {
    api_key: String,
    base_url: String,
    client: Client,
}

impl GeminiClient {
    pub fn new(api_key: &str) -> Self {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    /// Point the client at a non-default API root.
    pub fn with_base_url(api_key: &str, base_url: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::new(),
        }
    }

    /// Request speech for `text` and return the decoded PCM payload.
    pub async fn generate_speech(&self, model: &str, voice: &str, text: &str) -> Result<Vec<u8>> {
        let url = format!("{}/models/{}:generateContent", self.base_url, model);
        let req_body = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![Part { text }],
            }],
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO"],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig { voice_name: voice },
                    },
                },
            },
        };

        debug!(%model, %voice, chars = text.len(), "requesting speech generation");
        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&req_body)
            .send()
            .await
            .context("Gemini request failed")?
            .error_for_status()
            .context("Gemini returned an error status")?
            .json::<GenerateContentResponse>()
            .await
            .context("Gemini response was not valid JSON")?;

        let data = extract_audio_data(response)?;
        let pcm = general_purpose::STANDARD
            .decode(data)
            .context("audio payload was not valid base64")?;
        Ok(pcm)
    }
}

/// Pull the base64 audio out of the first candidate's first content part.
fn extract_audio_data(response: GenerateContentResponse) -> Result<String> {
    response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .and_then(|c| c.parts.into_iter().next())
        .and_then(|p| p.inline_data)
        .map(|d| d.data)
        .ok_or_else(|| anyhow!("No audio produced by model"))
}

#[async_trait]
impl SpeechBackend for GeminiClient {
    async fn generate(&self, model: &str, voice: &str, text: &str) -> Result<Vec<u8>> {
        self.generate_speech(model, voice, text).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_body_shape() {
        let req_body = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![Part { text: "Hello" }],
            }],
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO"],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig { voice_name: "Kore" },
                    },
                },
            },
        };

        let value = serde_json::to_value(&req_body).unwrap();
        assert_eq!(value["contents"][0]["parts"][0]["text"], "Hello");
        assert_eq!(value["generationConfig"]["responseModalities"][0], "AUDIO");
        assert_eq!(
            value["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]
                ["voiceName"],
            "Kore"
        );
    }

    #[test]
    fn test_extract_audio_data() {
        let response: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {
                    "parts": [{
                        "inlineData": { "mimeType": "audio/L16;rate=24000", "data": "AAAA" }
                    }]
                }
            }]
        }))
        .unwrap();

        assert_eq!(extract_audio_data(response).unwrap(), "AAAA");
    }

    #[test]
    fn test_missing_audio_is_an_error() {
        let no_candidates: GenerateContentResponse = serde_json::from_value(json!({})).unwrap();
        let err = extract_audio_data(no_candidates).unwrap_err();
        assert_eq!(err.to_string(), "No audio produced by model");

        let text_only: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": { "parts": [{ "text": "sorry, no audio" }] }
            }]
        }))
        .unwrap();
        let err = extract_audio_data(text_only).unwrap_err();
        assert_eq!(err.to_string(), "No audio produced by model");
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = GeminiClient::with_base_url("k", "http://localhost:9999/v1beta/");
        assert_eq!(client.base_url, "http://localhost:9999/v1beta");
    }
}
