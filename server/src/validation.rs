use crate::error::ApiError;

/// Maximum text length for synthesis requests
const MAX_TEXT_LENGTH: usize = 5000;

/// Validate synthesis text: must be non-blank after trimming and within the
/// length bound. Missing text fields surface here as empty strings.
pub fn validate_tts_text(text: &str) -> Result<(), ApiError> {
    if text.trim().is_empty() {
        return Err(ApiError::InvalidInput("Text cannot be empty".to_string()));
    }
    if text.len() > MAX_TEXT_LENGTH {
        return Err(ApiError::InvalidInput(format!(
            "Text too long (max {} characters)",
            MAX_TEXT_LENGTH
        )));
    }
    Ok(())
}

/// Validate the webhook message envelope: only `voice-request` messages at
/// the fixed 24 kHz profile are accepted.
pub fn validate_voice_request(kind: Option<&str>, sample_rate: Option<u32>) -> Result<(), ApiError> {
    if kind != Some("voice-request") {
        return Err(ApiError::InvalidInput(
            "Unsupported message type".to_string(),
        ));
    }
    if sample_rate != Some(tts_core::SAMPLE_RATE) {
        return Err(ApiError::InvalidInput(format!(
            "Only {} Hz sample rate is supported",
            tts_core::SAMPLE_RATE
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_tts_text_valid() {
        assert!(validate_tts_text("Hello").is_ok());
        assert!(validate_tts_text("  Hello  ").is_ok());
    }

    #[test]
    fn test_validate_tts_text_empty() {
        let result = validate_tts_text("");
        assert!(result.is_err());
        if let Err(ApiError::InvalidInput(msg)) = result {
            assert!(msg.contains("empty"));
        }
    }

    #[test]
    fn test_validate_tts_text_whitespace_only() {
        assert!(validate_tts_text(" \t\n ").is_err());
    }

    #[test]
    fn test_validate_tts_text_too_long() {
        let long_text = "a".repeat(6000);
        let result = validate_tts_text(&long_text);
        assert!(result.is_err());
        if let Err(ApiError::InvalidInput(msg)) = result {
            assert!(msg.contains("too long"));
        }
    }

    #[test]
    fn test_validate_voice_request() {
        assert!(validate_voice_request(Some("voice-request"), Some(24000)).is_ok());
        assert!(validate_voice_request(Some("assistant-request"), Some(24000)).is_err());
        assert!(validate_voice_request(None, Some(24000)).is_err());
        assert!(validate_voice_request(Some("voice-request"), Some(44100)).is_err());
        assert!(validate_voice_request(Some("voice-request"), None).is_err());
    }
}
