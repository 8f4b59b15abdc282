use super::env::{apply_env, transcription_model};
use super::yaml::YamlConfig;
use super::{AgentConfig, DEFAULT_INSTRUCTIONS, TurnDetectionSettings};
use crate::core::audio::AudioSettings;
use crate::core::orchestrator::{DEFAULT_SEND_TIMEOUT, InputMode};
use crate::core::realtime::{OPENAI_REALTIME_URL, OpenAIRealtimeModel, OpenAIRealtimeVoice, RealtimeProvider};

/// Default capability handler bound in milliseconds.
const DEFAULT_HANDLER_TIMEOUT_MS: u64 = 10_000;

/// Built-in defaults.
pub(crate) fn defaults() -> AgentConfig {
    let audio = AudioSettings::default();
    AgentConfig {
        provider: RealtimeProvider::OpenAI,
        openai_api_key: None,
        realtime_url: OPENAI_REALTIME_URL.to_string(),
        model: OpenAIRealtimeModel::default().as_str().to_string(),
        voice: OpenAIRealtimeVoice::default().as_str().to_string(),
        instructions: DEFAULT_INSTRUCTIONS.to_string(),
        input_mode: InputMode::Auto,
        turn_detection: TurnDetectionSettings::default(),
        interruption_enabled: true,
        input_transcription_model: Some("whisper-1".to_string()),
        send_timeout_ms: DEFAULT_SEND_TIMEOUT.as_millis() as u64,
        handler_timeout_ms: DEFAULT_HANDLER_TIMEOUT_MS,
        audio_frame_samples: audio.frame_samples,
        audio_capture_queue_frames: audio.capture_queue_frames,
        audio_playback_queue_frames: audio.playback_queue_frames,
    }
}

/// Build the configuration: defaults, then environment, then YAML overrides.
pub(crate) fn merge_config(
    yaml: Option<YamlConfig>,
) -> Result<AgentConfig, Box<dyn std::error::Error>> {
    let mut config = defaults();
    apply_env(&mut config)?;
    if let Some(yaml) = yaml {
        apply_yaml(&mut config, yaml)?;
    }
    Ok(config)
}

fn apply_yaml(config: &mut AgentConfig, yaml: YamlConfig) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(provider) = yaml.provider {
        config.provider = RealtimeProvider::parse(&provider)
            .ok_or_else(|| format!("Invalid provider in YAML: {provider}"))?;
    }

    if let Some(openai) = yaml.openai {
        if let Some(key) = openai.api_key.filter(|k| !k.trim().is_empty()) {
            config.openai_api_key = Some(key);
        }
        if let Some(url) = openai.url {
            config.realtime_url = url;
        }
        if let Some(model) = openai.model {
            config.model = model;
        }
        if let Some(voice) = openai.voice {
            config.voice = voice;
        }
    }

    if let Some(agent) = yaml.agent {
        if let Some(instructions) = agent.instructions {
            config.instructions = instructions;
        }
        if let Some(mode) = agent.input_mode {
            config.input_mode = mode
                .parse::<InputMode>()
                .map_err(|e| format!("Invalid agent.input_mode: {e}"))?;
        }
        if let Some(model) = agent.input_transcription_model {
            config.input_transcription_model = transcription_model(model);
        }
    }

    if let Some(turn) = yaml.turn_detection {
        if let Some(threshold) = turn.threshold {
            config.turn_detection.threshold = threshold;
        }
        if let Some(padding) = turn.prefix_padding_ms {
            config.turn_detection.prefix_padding_ms = padding;
        }
        if let Some(silence) = turn.silence_duration_ms {
            config.turn_detection.silence_duration_ms = silence;
        }
    }

    if let Some(enabled) = yaml.interruption.and_then(|i| i.enabled) {
        config.interruption_enabled = enabled;
    }
    if let Some(timeout) = yaml.transport.and_then(|t| t.send_timeout_ms) {
        config.send_timeout_ms = timeout;
    }
    if let Some(timeout) = yaml.functions.and_then(|f| f.handler_timeout_ms) {
        config.handler_timeout_ms = timeout;
    }

    if let Some(audio) = yaml.audio {
        if let Some(samples) = audio.frame_samples {
            config.audio_frame_samples = samples;
        }
        if let Some(frames) = audio.capture_queue_frames {
            config.audio_capture_queue_frames = frames;
        }
        if let Some(frames) = audio.playback_queue_frames {
            config.audio_playback_queue_frames = frames;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_yaml_partial_sections() {
        let yaml: YamlConfig = serde_yaml::from_str(
            r#"
agent:
  input_mode: "voice"
audio:
  playback_queue_frames: 64
"#,
        )
        .unwrap();

        let mut config = defaults();
        apply_yaml(&mut config, yaml).unwrap();

        assert_eq!(config.input_mode, InputMode::Voice);
        assert_eq!(config.audio_playback_queue_frames, 64);
        assert_eq!(config.audio_capture_queue_frames, 32);
        assert_eq!(config.voice, "alloy");
    }

    #[test]
    fn test_apply_yaml_invalid_mode() {
        let yaml: YamlConfig = serde_yaml::from_str("agent:\n  input_mode: \"telepathy\"\n").unwrap();
        let mut config = defaults();
        let err = apply_yaml(&mut config, yaml).unwrap_err();
        assert!(err.to_string().contains("input_mode"));
    }

    #[test]
    fn test_blank_yaml_key_keeps_env_key() {
        let yaml: YamlConfig = serde_yaml::from_str("openai:\n  api_key: \"\"\n").unwrap();
        let mut config = defaults();
        config.openai_api_key = Some("sk-env".to_string());
        apply_yaml(&mut config, yaml).unwrap();
        assert_eq!(config.openai_api_key.as_deref(), Some("sk-env"));
    }
}
