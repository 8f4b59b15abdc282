use super::AgentConfig;
use super::utils::{env_bool, env_parse, env_string};
use crate::core::orchestrator::InputMode;
use crate::core::realtime::RealtimeProvider;

/// Values that switch input transcription off.
const TRANSCRIPTION_DISABLED: [&str; 3] = ["none", "off", "disabled"];

/// Apply environment variables on top of `config`.
///
/// Unset variables leave the current value untouched.
pub(crate) fn apply_env(config: &mut AgentConfig) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(provider) = env_string("REALTIME_PROVIDER") {
        config.provider = RealtimeProvider::parse(&provider)
            .ok_or_else(|| format!("Invalid REALTIME_PROVIDER: {provider}"))?;
    }

    if let Some(key) = env_string("OPENAI_API_KEY") {
        config.openai_api_key = Some(key);
    }
    if let Some(url) = env_string("OPENAI_REALTIME_URL") {
        config.realtime_url = url;
    }
    if let Some(model) = env_string("OPENAI_REALTIME_MODEL") {
        config.model = model;
    }
    if let Some(voice) = env_string("OPENAI_REALTIME_VOICE") {
        config.voice = voice;
    }

    if let Some(instructions) = env_string("AGENT_INSTRUCTIONS") {
        config.instructions = instructions;
    }
    if let Some(mode) = env_string("AGENT_INPUT_MODE") {
        config.input_mode = mode
            .parse::<InputMode>()
            .map_err(|e| format!("Invalid AGENT_INPUT_MODE: {e}"))?;
    }

    config.turn_detection.threshold = env_parse("VAD_THRESHOLD", config.turn_detection.threshold)?;
    config.turn_detection.prefix_padding_ms =
        env_parse("VAD_PREFIX_PADDING_MS", config.turn_detection.prefix_padding_ms)?;
    config.turn_detection.silence_duration_ms = env_parse(
        "VAD_SILENCE_DURATION_MS",
        config.turn_detection.silence_duration_ms,
    )?;

    config.interruption_enabled = env_bool("INTERRUPTION_ENABLED", config.interruption_enabled)?;

    if let Some(model) = env_string("INPUT_TRANSCRIPTION_MODEL") {
        config.input_transcription_model = transcription_model(model);
    }

    config.send_timeout_ms = env_parse("TRANSPORT_SEND_TIMEOUT_MS", config.send_timeout_ms)?;
    config.handler_timeout_ms = env_parse("FUNCTION_HANDLER_TIMEOUT_MS", config.handler_timeout_ms)?;

    config.audio_frame_samples = env_parse("AUDIO_FRAME_SAMPLES", config.audio_frame_samples)?;
    config.audio_capture_queue_frames =
        env_parse("AUDIO_CAPTURE_QUEUE_FRAMES", config.audio_capture_queue_frames)?;
    config.audio_playback_queue_frames = env_parse(
        "AUDIO_PLAYBACK_QUEUE_FRAMES",
        config.audio_playback_queue_frames,
    )?;

    Ok(())
}

/// Map a configured transcription model, where "none" disables transcription.
pub(crate) fn transcription_model(model: String) -> Option<String> {
    if TRANSCRIPTION_DISABLED.contains(&model.to_lowercase().as_str()) {
        None
    } else {
        Some(model)
    }
}
