//! Configuration for the concierge agent
//!
//! Configuration comes from environment variables (a `.env` file is loaded in
//! `main`) and an optional YAML file. Priority: YAML > ENV vars > .env values >
//! defaults.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable loading
//! - `merge`: Applying YAML overrides on top of the environment
//! - `validation`: Configuration validation logic
//! - `utils`: Utility functions for configuration parsing
//!
//! # Example
//! ```rust,no_run
//! use waav_concierge::config::AgentConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = AgentConfig::from_env()?;
//!
//! // Load from YAML file with environment variable base
//! let config = AgentConfig::from_file(&PathBuf::from("agent.yaml"))?;
//! println!("Model: {}", config.model);
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;
use std::time::Duration;

mod env;
mod merge;
mod utils;
mod validation;
mod yaml;

use crate::core::audio::AudioSettings;
use crate::core::orchestrator::{InputMode, OrchestratorConfig};
use crate::core::realtime::{
    InputTranscriptionConfig, OPENAI_REALTIME_SAMPLE_RATE, OpenAIRealtimeSettings,
    RealtimeProvider, TurnDetectionConfig,
};

pub use yaml::YamlConfig;

/// Default system instructions for the cafe concierge.
pub const DEFAULT_INSTRUCTIONS: &str = "You are a cafe service robot that talks with customers. \
Help them browse the menu by category, build and review an order, and answer questions. \
You can also drive the robot: move, turn, stop, set LED colors and report status. \
Confirm before moving. Keep replies short and conversational, and use the available \
functions instead of guessing.";

/// Server-side voice activity detection parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TurnDetectionSettings {
    /// Speech probability threshold (0.0 - 1.0)
    pub threshold: f32,
    /// Audio kept before detected speech
    pub prefix_padding_ms: u32,
    /// Silence that ends a user turn
    pub silence_duration_ms: u32,
}

impl Default for TurnDetectionSettings {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            prefix_padding_ms: 300,
            silence_duration_ms: 200,
        }
    }
}

/// Agent configuration
///
/// Everything needed to run one conversation: endpoint credentials, the
/// assistant's persona, turn detection, interruption and audio sizing.
#[derive(Clone)]
pub struct AgentConfig {
    /// Which connector to use
    pub provider: RealtimeProvider,
    /// OpenAI API key (required for the OpenAI connector)
    pub openai_api_key: Option<String>,
    /// Realtime endpoint URL
    pub realtime_url: String,
    /// Realtime model id
    pub model: String,
    /// Output voice
    pub voice: String,
    /// System instructions
    pub instructions: String,
    /// How the user talks to the assistant
    pub input_mode: InputMode,
    /// Barge-in threshold and silence duration
    pub turn_detection: TurnDetectionSettings,
    /// Whether user speech cancels a streaming response
    pub interruption_enabled: bool,
    /// Model for transcribing user audio; None disables transcription
    pub input_transcription_model: Option<String>,
    /// Bound on each outbound send
    pub send_timeout_ms: u64,
    /// Bound on each capability handler
    pub handler_timeout_ms: u64,
    /// Samples per capture frame
    pub audio_frame_samples: usize,
    /// Capture queue depth in frames
    pub audio_capture_queue_frames: usize,
    /// Playback queue depth in frames
    pub audio_playback_queue_frames: usize,
}

impl Drop for AgentConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;

        if let Some(ref mut key) = self.openai_api_key {
            key.zeroize();
        }
    }
}

impl std::fmt::Debug for AgentConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentConfig")
            .field("provider", &self.provider)
            .field(
                "openai_api_key",
                &self.openai_api_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("realtime_url", &self.realtime_url)
            .field("model", &self.model)
            .field("voice", &self.voice)
            .field("input_mode", &self.input_mode)
            .field("turn_detection", &self.turn_detection)
            .field("interruption_enabled", &self.interruption_enabled)
            .field("input_transcription_model", &self.input_transcription_model)
            .field("send_timeout_ms", &self.send_timeout_ms)
            .field("handler_timeout_ms", &self.handler_timeout_ms)
            .finish()
    }
}

impl AgentConfig {
    /// Load configuration from environment variables and defaults.
    ///
    /// # Errors
    /// Returns an error if a variable has an invalid format or validation fails.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let config = merge::merge_config(None)?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variable base
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    ///
    /// # Errors
    /// Returns an error if:
    /// - The YAML file cannot be read or is malformed
    /// - Environment variables have invalid formats
    /// - Configuration validation fails
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        // .env is loaded in main.rs; YAML overrides the resulting environment.
        let yaml_config = yaml::YamlConfig::from_file(path)?;
        let config = merge::merge_config(Some(yaml_config))?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Check that the selected connector has what it needs.
    ///
    /// Kept separate from loading so command-line overrides (such as an
    /// offline run) can be applied first.
    pub fn validate_credentials(&self) -> Result<(), String> {
        validation::validate_credentials(self.provider, self.openai_api_key.as_deref())
    }

    /// Settings for the OpenAI connector.
    pub fn openai_settings(&self) -> Result<OpenAIRealtimeSettings, String> {
        let api_key = self
            .openai_api_key
            .as_ref()
            .cloned()
            .ok_or_else(|| "OpenAI API key not configured (OPENAI_API_KEY)".to_string())?;
        Ok(OpenAIRealtimeSettings::new(api_key)
            .with_model(self.model.clone())
            .with_endpoint(self.realtime_url.clone()))
    }

    /// Bound on each outbound send.
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    /// Bound on each capability handler.
    pub fn handler_timeout(&self) -> Duration {
        Duration::from_millis(self.handler_timeout_ms)
    }

    /// Audio format and queue sizing.
    pub fn audio_settings(&self) -> AudioSettings {
        AudioSettings {
            sample_rate: OPENAI_REALTIME_SAMPLE_RATE,
            frame_samples: self.audio_frame_samples,
            capture_queue_frames: self.audio_capture_queue_frames,
            playback_queue_frames: self.audio_playback_queue_frames,
        }
    }

    /// Runtime settings for the orchestrator.
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            input_mode: self.input_mode,
            instructions: Some(self.instructions.clone()),
            voice: Some(self.voice.clone()),
            turn_detection: TurnDetectionConfig::server_vad(
                self.turn_detection.threshold,
                self.turn_detection.prefix_padding_ms,
                self.turn_detection.silence_duration_ms,
            ),
            input_transcription: self
                .input_transcription_model
                .clone()
                .map(|model| InputTranscriptionConfig { model }),
            interruption_enabled: self.interruption_enabled,
            send_timeout: self.send_timeout(),
            audio: self.audio_settings(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;
    use std::fs;
    use tempfile::TempDir;

    // Helper to clean up environment variables
    fn cleanup_env_vars() {
        unsafe {
            env::remove_var("REALTIME_PROVIDER");
            env::remove_var("OPENAI_API_KEY");
            env::remove_var("OPENAI_REALTIME_URL");
            env::remove_var("OPENAI_REALTIME_MODEL");
            env::remove_var("OPENAI_REALTIME_VOICE");
            env::remove_var("AGENT_INSTRUCTIONS");
            env::remove_var("AGENT_INPUT_MODE");
            env::remove_var("VAD_THRESHOLD");
            env::remove_var("VAD_PREFIX_PADDING_MS");
            env::remove_var("VAD_SILENCE_DURATION_MS");
            env::remove_var("INTERRUPTION_ENABLED");
            env::remove_var("INPUT_TRANSCRIPTION_MODEL");
            env::remove_var("TRANSPORT_SEND_TIMEOUT_MS");
            env::remove_var("FUNCTION_HANDLER_TIMEOUT_MS");
            env::remove_var("AUDIO_FRAME_SAMPLES");
            env::remove_var("AUDIO_CAPTURE_QUEUE_FRAMES");
            env::remove_var("AUDIO_PLAYBACK_QUEUE_FRAMES");
        }
    }

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        cleanup_env_vars();

        let config = AgentConfig::from_env().unwrap();

        assert_eq!(config.provider, RealtimeProvider::OpenAI);
        assert_eq!(config.model, "gpt-4o-realtime-preview-2024-10-01");
        assert_eq!(config.voice, "alloy");
        assert_eq!(config.input_mode, InputMode::Auto);
        assert_eq!(config.turn_detection, TurnDetectionSettings::default());
        assert!(config.interruption_enabled);
        assert_eq!(config.input_transcription_model.as_deref(), Some("whisper-1"));
        assert_eq!(config.send_timeout(), Duration::from_millis(500));
        assert_eq!(config.handler_timeout(), Duration::from_secs(10));
        assert!(config.validate_credentials().is_err());

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_env_values() {
        cleanup_env_vars();

        unsafe {
            env::set_var("OPENAI_API_KEY", "sk-env");
            env::set_var("AGENT_INPUT_MODE", "text");
            env::set_var("VAD_THRESHOLD", "0.7");
            env::set_var("VAD_SILENCE_DURATION_MS", "600");
            env::set_var("INTERRUPTION_ENABLED", "false");
            env::set_var("INPUT_TRANSCRIPTION_MODEL", "none");
        }

        let config = AgentConfig::from_env().unwrap();

        assert_eq!(config.openai_api_key.as_deref(), Some("sk-env"));
        assert_eq!(config.input_mode, InputMode::Text);
        assert_eq!(config.turn_detection.threshold, 0.7);
        assert_eq!(config.turn_detection.silence_duration_ms, 600);
        assert!(!config.interruption_enabled);
        assert!(config.input_transcription_model.is_none());
        assert!(config.validate_credentials().is_ok());

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_env_invalid_threshold() {
        cleanup_env_vars();

        unsafe {
            env::set_var("VAD_THRESHOLD", "1.5");
        }
        let result = AgentConfig::from_env();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("threshold"));

        unsafe {
            env::set_var("VAD_THRESHOLD", "loud");
        }
        assert!(AgentConfig::from_env().is_err());

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_yaml_overrides_env() {
        cleanup_env_vars();

        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("agent.yaml");

        let yaml_content = r#"
openai:
  api_key: "yaml-key"
  voice: "shimmer"

turn_detection:
  threshold: 0.6
  silence_duration_ms: 500

interruption:
  enabled: false
"#;
        fs::write(&config_path, yaml_content).unwrap();

        unsafe {
            env::set_var("OPENAI_API_KEY", "env-key");
            env::set_var("OPENAI_REALTIME_VOICE", "echo");
            env::set_var("VAD_PREFIX_PADDING_MS", "250");
        }

        let config = AgentConfig::from_file(&config_path).unwrap();

        // YAML overrides ENV
        assert_eq!(config.openai_api_key.as_deref(), Some("yaml-key"));
        assert_eq!(config.voice, "shimmer");
        assert_eq!(config.turn_detection.threshold, 0.6);
        assert_eq!(config.turn_detection.silence_duration_ms, 500);
        assert!(!config.interruption_enabled);
        // ENV value kept where YAML is silent
        assert_eq!(config.turn_detection.prefix_padding_ms, 250);

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_missing_file() {
        cleanup_env_vars();

        let config_path = PathBuf::from("/nonexistent/agent.yaml");
        let result = AgentConfig::from_file(&config_path);

        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Failed to read config file")
        );

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_invalid_yaml() {
        cleanup_env_vars();

        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("invalid.yaml");
        fs::write(&config_path, "invalid: yaml: [content").unwrap();

        let result = AgentConfig::from_file(&config_path);

        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Failed to parse YAML")
        );

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_orchestrator_config_mapping() {
        cleanup_env_vars();

        unsafe {
            env::set_var("OPENAI_API_KEY", "sk-test");
            env::set_var("VAD_THRESHOLD", "0.8");
        }
        let config = AgentConfig::from_env().unwrap();
        let orchestrator = config.orchestrator_config();

        assert_eq!(
            orchestrator.turn_detection,
            TurnDetectionConfig::server_vad(0.8, 300, 200)
        );
        assert_eq!(orchestrator.voice.as_deref(), Some("alloy"));
        assert_eq!(orchestrator.audio.sample_rate, 24000);
        assert_eq!(
            orchestrator
                .input_transcription
                .as_ref()
                .map(|t| t.model.as_str()),
            Some("whisper-1")
        );

        let settings = config.openai_settings().unwrap();
        assert!(settings.connect_url().unwrap().as_str().contains("model="));

        cleanup_env_vars();
    }

    #[test]
    fn test_debug_redacts_key() {
        let mut config = merge::defaults();
        config.openai_api_key = Some("sk-secret".to_string());
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("REDACTED"));
    }
}
