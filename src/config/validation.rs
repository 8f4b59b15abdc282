use super::AgentConfig;
use crate::core::realtime::RealtimeProvider;

/// Validate a merged configuration.
///
/// Credentials are checked separately by [`validate_credentials`].
pub(crate) fn validate(config: &AgentConfig) -> Result<(), Box<dyn std::error::Error>> {
    validate_turn_detection(config.turn_detection.threshold)?;
    validate_non_zero("transport.send_timeout_ms", config.send_timeout_ms as usize)?;
    validate_non_zero("functions.handler_timeout_ms", config.handler_timeout_ms as usize)?;
    validate_non_zero("audio.frame_samples", config.audio_frame_samples)?;
    validate_non_zero("audio.capture_queue_frames", config.audio_capture_queue_frames)?;
    validate_non_zero("audio.playback_queue_frames", config.audio_playback_queue_frames)?;
    validate_url(&config.realtime_url)?;
    Ok(())
}

/// The VAD threshold is a probability.
pub(crate) fn validate_turn_detection(threshold: f32) -> Result<(), String> {
    if !(0.0..=1.0).contains(&threshold) {
        return Err(format!(
            "turn_detection threshold must be between 0.0 and 1.0, got {threshold}"
        ));
    }
    Ok(())
}

fn validate_non_zero(name: &str, value: usize) -> Result<(), String> {
    if value == 0 {
        return Err(format!("{name} must be greater than zero"));
    }
    Ok(())
}

fn validate_url(url: &str) -> Result<(), String> {
    if !(url.starts_with("ws://") || url.starts_with("wss://")) {
        return Err(format!(
            "Realtime URL must use ws:// or wss://, got {url}"
        ));
    }
    Ok(())
}

/// The OpenAI connector needs an API key; the loopback connector needs nothing.
pub(crate) fn validate_credentials(
    provider: RealtimeProvider,
    api_key: Option<&str>,
) -> Result<(), String> {
    match provider {
        RealtimeProvider::Loopback => Ok(()),
        RealtimeProvider::OpenAI => match api_key {
            Some(key) if !key.trim().is_empty() => Ok(()),
            _ => Err("OpenAI API key not configured (set OPENAI_API_KEY or openai.api_key)".to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::merge::defaults;

    #[test]
    fn test_threshold_bounds() {
        assert!(validate_turn_detection(0.0).is_ok());
        assert!(validate_turn_detection(1.0).is_ok());
        assert!(validate_turn_detection(-0.1).is_err());
        assert!(validate_turn_detection(1.01).is_err());
        assert!(validate_turn_detection(f32::NAN).is_err());
    }

    #[test]
    fn test_zero_sizes_rejected() {
        let mut config = defaults();
        config.audio_capture_queue_frames = 0;
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("audio.capture_queue_frames"));

        let mut config = defaults();
        config.send_timeout_ms = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_url_scheme() {
        let mut config = defaults();
        config.realtime_url = "https://api.openai.com/v1/realtime".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_credentials() {
        assert!(validate_credentials(RealtimeProvider::Loopback, None).is_ok());
        assert!(validate_credentials(RealtimeProvider::OpenAI, Some("sk-1")).is_ok());
        assert!(validate_credentials(RealtimeProvider::OpenAI, Some("  ")).is_err());
        assert!(validate_credentials(RealtimeProvider::OpenAI, None).is_err());
    }
}
