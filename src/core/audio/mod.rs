//! Audio capture and playback.
//!
//! # Audio Format
//!
//! PCM 16-bit signed little-endian, mono, 24kHz. Capture frames are 1024
//! samples (2048 bytes) unless configured otherwise.
//!
//! # Backends
//!
//! - [`UnavailableBackend`] - headless hosts; opening always fails
//! - [`MemoryBackend`] - scripted devices for tests and offline runs
//! - `CpalBackend` - host microphone and speaker (feature `audio-device`)

#[cfg(feature = "audio-device")]
mod cpal_device;
mod device;
mod memory;
mod pipeline;

use std::sync::Arc;

#[cfg(feature = "audio-device")]
pub use cpal_device::CpalBackend;
pub use device::{
    AudioBackend, AudioDirection, AudioError, AudioFrame, AudioResult, AudioSettings,
    CaptureDevice, PlaybackDevice, UnavailableBackend,
};
pub use memory::MemoryBackend;
pub use pipeline::{AudioNotice, AudioPipeline};

/// The host audio backend for this build.
pub fn default_backend() -> Arc<dyn AudioBackend> {
    #[cfg(feature = "audio-device")]
    {
        Arc::new(CpalBackend::new())
    }
    #[cfg(not(feature = "audio-device"))]
    {
        Arc::new(UnavailableBackend::new(
            "built without the audio-device feature",
        ))
    }
}
