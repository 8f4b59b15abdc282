//! Scripted in-memory audio devices.
//!
//! Capture replays a queue of frames; playback records what it was given.
//! Both can be told to fail after a number of frames to simulate a device
//! being unplugged.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;

use super::device::{
    AudioBackend, AudioError, AudioResult, AudioSettings, CaptureDevice, PlaybackDevice,
};

#[derive(Debug, Clone, Default)]
struct MemoryConfig {
    capture_unavailable: bool,
    playback_unavailable: bool,
    capture_fail_after: Option<usize>,
    playback_fail_after: Option<usize>,
    capture_interval: Duration,
    playback_delay: Duration,
}

#[derive(Debug, Default)]
struct MemoryState {
    capture_script: Mutex<VecDeque<Bytes>>,
    played: Mutex<Vec<Bytes>>,
    discards: AtomicUsize,
    captures_opened: AtomicUsize,
}

/// In-memory backend. Clones share recorded state.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    config: MemoryConfig,
    state: Arc<MemoryState>,
}

impl MemoryBackend {
    /// Backend with working devices and an empty capture script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue frames for capture, in order.
    pub fn with_capture_frames(self, frames: impl IntoIterator<Item = Bytes>) -> Self {
        self.state.capture_script.lock().extend(frames);
        self
    }

    /// Fail capture after this many frames.
    pub fn with_capture_failure_after(mut self, frames: usize) -> Self {
        self.config.capture_fail_after = Some(frames);
        self
    }

    /// Fail playback after this many frames.
    pub fn with_playback_failure_after(mut self, frames: usize) -> Self {
        self.config.playback_fail_after = Some(frames);
        self
    }

    /// Make the input device impossible to open.
    pub fn without_capture(mut self) -> Self {
        self.config.capture_unavailable = true;
        self
    }

    /// Make the output device impossible to open.
    pub fn without_playback(mut self) -> Self {
        self.config.playback_unavailable = true;
        self
    }

    /// Pace capture: wait this long before yielding each frame.
    pub fn with_capture_interval(mut self, interval: Duration) -> Self {
        self.config.capture_interval = interval;
        self
    }

    /// Simulate device latency per played frame.
    pub fn with_playback_delay(mut self, delay: Duration) -> Self {
        self.config.playback_delay = delay;
        self
    }

    /// Frames the playback device has emitted.
    pub fn played_frames(&self) -> Vec<Bytes> {
        self.state.played.lock().clone()
    }

    /// Number of device-level discards.
    pub fn discard_count(&self) -> usize {
        self.state.discards.load(Ordering::SeqCst)
    }

    /// Number of times capture was opened.
    pub fn captures_opened(&self) -> usize {
        self.state.captures_opened.load(Ordering::SeqCst)
    }
}

impl AudioBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn open_capture(&self, _settings: &AudioSettings) -> AudioResult<Box<dyn CaptureDevice>> {
        if self.config.capture_unavailable {
            return Err(AudioError::DeviceUnavailable(
                "no input device".to_string(),
            ));
        }
        self.state.captures_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryCapture {
            state: self.state.clone(),
            fail_after: self.config.capture_fail_after,
            interval: self.config.capture_interval,
            produced: 0,
        }))
    }

    fn open_playback(&self, _settings: &AudioSettings) -> AudioResult<Arc<dyn PlaybackDevice>> {
        if self.config.playback_unavailable {
            return Err(AudioError::DeviceUnavailable(
                "no output device".to_string(),
            ));
        }
        Ok(Arc::new(MemoryPlayback {
            state: self.state.clone(),
            fail_after: self.config.playback_fail_after,
            delay: self.config.playback_delay,
            written: AtomicUsize::new(0),
        }))
    }
}

struct MemoryCapture {
    state: Arc<MemoryState>,
    fail_after: Option<usize>,
    interval: Duration,
    produced: usize,
}

impl CaptureDevice for MemoryCapture {
    fn read_frame(&mut self, timeout: Duration) -> AudioResult<Option<Bytes>> {
        if self.fail_after.is_some_and(|limit| self.produced >= limit) {
            return Err(AudioError::DeviceLost("input device disconnected".to_string()));
        }

        let next = self.state.capture_script.lock().pop_front();
        match next {
            Some(frame) => {
                if !self.interval.is_zero() {
                    std::thread::sleep(self.interval);
                }
                self.produced += 1;
                Ok(Some(frame))
            }
            None => {
                std::thread::sleep(timeout);
                Ok(None)
            }
        }
    }
}

struct MemoryPlayback {
    state: Arc<MemoryState>,
    fail_after: Option<usize>,
    delay: Duration,
    written: AtomicUsize,
}

impl PlaybackDevice for MemoryPlayback {
    fn write_frame(&self, frame: &[u8]) -> AudioResult<()> {
        let written = self.written.fetch_add(1, Ordering::SeqCst);
        if self.fail_after.is_some_and(|limit| written >= limit) {
            return Err(AudioError::DeviceLost("output device disconnected".to_string()));
        }
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        self.state.played.lock().push(Bytes::copy_from_slice(frame));
        Ok(())
    }

    fn discard(&self) {
        self.state.discards.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_replays_script_then_idles() {
        let backend = MemoryBackend::new().with_capture_frames([
            Bytes::from_static(&[1, 0]),
            Bytes::from_static(&[2, 0]),
        ]);
        let mut capture = backend.open_capture(&AudioSettings::default()).unwrap();
        let timeout = Duration::from_millis(1);

        assert_eq!(capture.read_frame(timeout).unwrap().unwrap()[0], 1);
        assert_eq!(capture.read_frame(timeout).unwrap().unwrap()[0], 2);
        assert!(capture.read_frame(timeout).unwrap().is_none());
        assert_eq!(backend.captures_opened(), 1);
    }

    #[test]
    fn test_capture_failure_after_limit() {
        let backend = MemoryBackend::new()
            .with_capture_frames([Bytes::from_static(&[1, 0]), Bytes::from_static(&[2, 0])])
            .with_capture_failure_after(1);
        let mut capture = backend.open_capture(&AudioSettings::default()).unwrap();
        let timeout = Duration::from_millis(1);

        assert!(capture.read_frame(timeout).unwrap().is_some());
        assert!(matches!(
            capture.read_frame(timeout),
            Err(AudioError::DeviceLost(_))
        ));
    }

    #[test]
    fn test_playback_records_and_discards() {
        let backend = MemoryBackend::new();
        let playback = backend.open_playback(&AudioSettings::default()).unwrap();

        playback.write_frame(&[9, 9]).unwrap();
        playback.discard();

        assert_eq!(backend.played_frames(), vec![Bytes::from_static(&[9, 9])]);
        assert_eq!(backend.discard_count(), 1);
    }

    #[test]
    fn test_unavailable_devices() {
        let backend = MemoryBackend::new().without_capture().without_playback();
        let settings = AudioSettings::default();
        assert!(backend.open_capture(&settings).is_err());
        assert!(backend.open_playback(&settings).is_err());
    }
}
