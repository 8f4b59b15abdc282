use serde::Deserialize;
use std::path::PathBuf;

/// Complete YAML configuration structure
///
/// All fields are optional to allow partial configuration. Values present in
/// the file override environment variables.
///
/// # Example YAML structure
/// ```yaml
/// provider: "openai"
///
/// openai:
///   api_key: "sk-..."
///   url: "wss://api.openai.com/v1/realtime"
///   model: "gpt-4o-realtime-preview-2024-10-01"
///   voice: "alloy"
///
/// agent:
///   instructions: "You are a cafe service robot..."
///   input_mode: "auto"
///   input_transcription_model: "whisper-1"
///
/// turn_detection:
///   threshold: 0.5
///   prefix_padding_ms: 300
///   silence_duration_ms: 200
///
/// interruption:
///   enabled: true
///
/// transport:
///   send_timeout_ms: 500
///
/// functions:
///   handler_timeout_ms: 10000
///
/// audio:
///   frame_samples: 1024
///   capture_queue_frames: 32
///   playback_queue_frames: 512
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub provider: Option<String>,
    pub openai: Option<OpenAIYaml>,
    pub agent: Option<AgentYaml>,
    pub turn_detection: Option<TurnDetectionYaml>,
    pub interruption: Option<InterruptionYaml>,
    pub transport: Option<TransportYaml>,
    pub functions: Option<FunctionsYaml>,
    pub audio: Option<AudioYaml>,
}

/// OpenAI Realtime settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct OpenAIYaml {
    pub api_key: Option<String>,
    pub url: Option<String>,
    pub model: Option<String>,
    pub voice: Option<String>,
}

/// Assistant persona and input settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AgentYaml {
    pub instructions: Option<String>,
    /// "auto", "voice" or "text"
    pub input_mode: Option<String>,
    /// Transcription model, or "none"
    pub input_transcription_model: Option<String>,
}

/// Server VAD settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TurnDetectionYaml {
    pub threshold: Option<f32>,
    pub prefix_padding_ms: Option<u32>,
    pub silence_duration_ms: Option<u32>,
}

/// Barge-in settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct InterruptionYaml {
    pub enabled: Option<bool>,
}

/// Transport settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TransportYaml {
    pub send_timeout_ms: Option<u64>,
}

/// Capability dispatch settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct FunctionsYaml {
    pub handler_timeout_ms: Option<u64>,
}

/// Audio sizing from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AudioYaml {
    pub frame_samples: Option<usize>,
    pub capture_queue_frames: Option<usize>,
    pub playback_queue_frames: Option<usize>,
}

impl YamlConfig {
    /// Load configuration from a YAML file
    ///
    /// # Errors
    /// Returns an error if:
    /// - The file cannot be read
    /// - The YAML is malformed
    /// - Fields have invalid types
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {e}", path.display()))?;

        let config: YamlConfig = serde_yaml::from_str(&contents)
            .map_err(|e| format!("Failed to parse YAML config: {e}"))?;

        Ok(config)
    }
}
