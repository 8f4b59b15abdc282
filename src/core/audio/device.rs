//! Audio device abstraction.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur in the audio pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AudioError {
    /// The device could not be opened
    #[error("Audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The device failed while in use
    #[error("Audio device lost: {0}")]
    DeviceLost(String),

    /// The playback queue is full; the frame was dropped
    #[error("Playback queue full")]
    PlaybackOverflow,

    /// Capture is already running
    #[error("Capture already active")]
    CaptureActive,

    /// The pipeline has shut down
    #[error("Audio pipeline closed")]
    PipelineClosed,
}

/// Result type for audio operations.
pub type AudioResult<T> = Result<T, AudioError>;

// =============================================================================
// Settings and Frames
// =============================================================================

/// Audio format and queue sizing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioSettings {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Samples per capture frame
    pub frame_samples: usize,
    /// Capacity of the capture queue, in frames
    pub capture_queue_frames: usize,
    /// Capacity of the playback queue, in frames
    pub playback_queue_frames: usize,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            sample_rate: 24000,
            frame_samples: 1024,
            capture_queue_frames: 32,
            playback_queue_frames: 512,
        }
    }
}

impl AudioSettings {
    /// Bytes per capture frame (PCM16 mono).
    pub fn frame_bytes(&self) -> usize {
        self.frame_samples * 2
    }

    /// Wall-clock duration of one capture frame.
    pub fn frame_duration(&self) -> Duration {
        Duration::from_micros(self.frame_samples as u64 * 1_000_000 / self.sample_rate.max(1) as u64)
    }
}

/// Direction of an audio frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioDirection {
    /// Microphone to endpoint
    Capture,
    /// Endpoint to speaker
    Playback,
}

impl fmt::Display for AudioDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AudioDirection::Capture => write!(f, "capture"),
            AudioDirection::Playback => write!(f, "playback"),
        }
    }
}

/// A chunk of PCM audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    /// Capture or playback
    pub direction: AudioDirection,
    /// Per-direction sequence number, strictly increasing
    pub sequence: u64,
    /// PCM16 little-endian bytes
    pub payload: Bytes,
}

// =============================================================================
// Device Traits
// =============================================================================

/// An open input device, read from a dedicated thread.
pub trait CaptureDevice: Send {
    /// Block for at most `timeout` waiting for the next frame.
    ///
    /// `Ok(None)` means no frame arrived in time; an error means the device
    /// is gone.
    fn read_frame(&mut self, timeout: Duration) -> AudioResult<Option<Bytes>>;
}

/// An open output device.
///
/// `write_frame` is called from the playback thread; `discard` may be called
/// from any thread while a write is in progress.
pub trait PlaybackDevice: Send + Sync {
    /// Play one frame, blocking until the device accepted it.
    fn write_frame(&self, frame: &[u8]) -> AudioResult<()>;

    /// Drop audio the device has accepted but not yet emitted.
    fn discard(&self);
}

/// Source of capture and playback devices.
pub trait AudioBackend: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Open the input device.
    fn open_capture(&self, settings: &AudioSettings) -> AudioResult<Box<dyn CaptureDevice>>;

    /// Open the output device.
    fn open_playback(&self, settings: &AudioSettings) -> AudioResult<Arc<dyn PlaybackDevice>>;
}

/// Backend for hosts without audio devices.
#[derive(Debug, Clone, Default)]
pub struct UnavailableBackend {
    reason: Option<String>,
}

impl UnavailableBackend {
    /// Backend that reports the given reason.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
        }
    }

    fn error(&self) -> AudioError {
        AudioError::DeviceUnavailable(
            self.reason
                .clone()
                .unwrap_or_else(|| "no audio backend available".to_string()),
        )
    }
}

impl AudioBackend for UnavailableBackend {
    fn name(&self) -> &'static str {
        "unavailable"
    }

    fn open_capture(&self, _settings: &AudioSettings) -> AudioResult<Box<dyn CaptureDevice>> {
        Err(self.error())
    }

    fn open_playback(&self, _settings: &AudioSettings) -> AudioResult<Arc<dyn PlaybackDevice>> {
        Err(self.error())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = AudioSettings::default();
        assert_eq!(settings.frame_bytes(), 2048);
        assert_eq!(settings.sample_rate, 24000);
        assert_eq!(settings.frame_duration().as_micros(), 42_666);
    }

    #[test]
    fn test_unavailable_backend() {
        let backend = UnavailableBackend::new("headless host");
        let settings = AudioSettings::default();
        assert!(matches!(
            backend.open_capture(&settings),
            Err(AudioError::DeviceUnavailable(reason)) if reason == "headless host"
        ));
        assert!(backend.open_playback(&settings).is_err());
    }
}
