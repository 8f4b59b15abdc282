//! Capture and playback pipeline.
//!
//! Capture runs on its own OS thread and forwards frames through a bounded
//! queue. Playback frames go through a bounded queue to a playback thread;
//! clearing bumps an epoch so frames queued before the clear are skipped, and
//! asks the device to drop what it has already accepted.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::device::{
    AudioBackend, AudioDirection, AudioError, AudioFrame, AudioResult, AudioSettings,
    CaptureDevice, PlaybackDevice,
};

/// How long the capture thread waits for a frame before re-checking its stop flag.
const CAPTURE_POLL: Duration = Duration::from_millis(50);

/// Device failures reported to the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioNotice {
    /// The input device failed mid-session
    CaptureLost(String),
    /// The output device failed mid-session
    PlaybackLost(String),
}

struct PlaybackItem {
    epoch: u64,
    frame: AudioFrame,
}

struct CaptureHandle {
    stop: Arc<AtomicBool>,
    thread: thread::JoinHandle<()>,
}

/// Audio capture and playback for one session.
pub struct AudioPipeline {
    backend: Arc<dyn AudioBackend>,
    settings: AudioSettings,
    playback: Arc<dyn PlaybackDevice>,
    playback_tx: mpsc::Sender<PlaybackItem>,
    epoch: Arc<AtomicU64>,
    playback_seq: AtomicU64,
    overflow_drops: AtomicUsize,
    capture_drops: Arc<AtomicUsize>,
    idle_capture: Mutex<Option<Box<dyn CaptureDevice>>>,
    capture: Mutex<Option<CaptureHandle>>,
    notices: mpsc::Sender<AudioNotice>,
}

impl AudioPipeline {
    /// Open both devices and start the playback thread.
    ///
    /// Fails with `DeviceUnavailable` if either device cannot be opened.
    pub fn open(
        backend: Arc<dyn AudioBackend>,
        settings: AudioSettings,
    ) -> AudioResult<(Self, mpsc::Receiver<AudioNotice>)> {
        let capture = backend.open_capture(&settings)?;
        let playback = backend.open_playback(&settings)?;

        let (notice_tx, notice_rx) = mpsc::channel(8);
        let (playback_tx, playback_rx) = mpsc::channel(settings.playback_queue_frames.max(1));
        let epoch = Arc::new(AtomicU64::new(0));

        spawn_playback_thread(playback.clone(), playback_rx, epoch.clone(), notice_tx.clone())?;

        tracing::info!(
            backend = backend.name(),
            sample_rate = settings.sample_rate,
            frame_samples = settings.frame_samples,
            "Audio pipeline opened"
        );

        Ok((
            Self {
                backend,
                settings,
                playback,
                playback_tx,
                epoch,
                playback_seq: AtomicU64::new(0),
                overflow_drops: AtomicUsize::new(0),
                capture_drops: Arc::new(AtomicUsize::new(0)),
                idle_capture: Mutex::new(Some(capture)),
                capture: Mutex::new(None),
                notices: notice_tx,
            },
            notice_rx,
        ))
    }

    /// Settings in use.
    pub fn settings(&self) -> &AudioSettings {
        &self.settings
    }

    /// Acquire the input device and start producing capture frames.
    pub fn start_capture(&self) -> AudioResult<mpsc::Receiver<AudioFrame>> {
        let mut active = self.capture.lock();
        if active.is_some() {
            return Err(AudioError::CaptureActive);
        }

        let idle = self.idle_capture.lock().take();
        let mut device = match idle {
            Some(device) => device,
            None => self.backend.open_capture(&self.settings)?,
        };

        let (tx, rx) = mpsc::channel(self.settings.capture_queue_frames.max(1));
        let stop = Arc::new(AtomicBool::new(false));
        let notices = self.notices.clone();
        let drops = self.capture_drops.clone();
        let thread_stop = stop.clone();

        let thread = thread::Builder::new()
            .name("audio-capture".to_string())
            .spawn(move || {
                let mut sequence = 0u64;
                while !thread_stop.load(Ordering::SeqCst) {
                    match device.read_frame(CAPTURE_POLL) {
                        Ok(Some(payload)) => {
                            let frame = AudioFrame {
                                direction: AudioDirection::Capture,
                                sequence,
                                payload,
                            };
                            sequence += 1;
                            match tx.try_send(frame) {
                                Ok(()) => {}
                                Err(TrySendError::Full(frame)) => {
                                    let dropped = drops.fetch_add(1, Ordering::Relaxed) + 1;
                                    if dropped % 50 == 1 {
                                        tracing::warn!(sequence = frame.sequence, dropped, "Capture queue full; dropping frames");
                                    }
                                }
                                Err(TrySendError::Closed(_)) => break,
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            tracing::error!(error = %e, "Capture device failed");
                            let _ = notices.try_send(AudioNotice::CaptureLost(e.to_string()));
                            break;
                        }
                    }
                }
                tracing::debug!(frames = sequence, "Capture thread stopped");
            })
            .map_err(|e| AudioError::DeviceUnavailable(format!("capture thread: {e}")))?;

        *active = Some(CaptureHandle { stop, thread });
        tracing::info!("Audio capture started");
        Ok(rx)
    }

    /// Stop capture and release the input device.
    pub fn stop_capture(&self) {
        if let Some(handle) = self.capture.lock().take() {
            handle.stop.store(true, Ordering::SeqCst);
            // The thread exits within one poll interval and drops the device.
            drop(handle.thread);
            tracing::info!("Audio capture stopped");
        }
    }

    /// Whether capture is running.
    pub fn is_capturing(&self) -> bool {
        self.capture
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.thread.is_finished())
    }

    /// Queue a frame for playback without blocking.
    ///
    /// A full queue drops the frame and returns `PlaybackOverflow`.
    pub fn enqueue_playback(&self, payload: Bytes) -> AudioResult<()> {
        let frame = AudioFrame {
            direction: AudioDirection::Playback,
            sequence: self.playback_seq.fetch_add(1, Ordering::SeqCst),
            payload,
        };
        let item = PlaybackItem {
            epoch: self.epoch.load(Ordering::SeqCst),
            frame,
        };
        match self.playback_tx.try_send(item) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(item)) => {
                self.overflow_drops.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(sequence = item.frame.sequence, "Playback queue full; dropping frame");
                Err(AudioError::PlaybackOverflow)
            }
            Err(TrySendError::Closed(_)) => Err(AudioError::PipelineClosed),
        }
    }

    /// Discard every buffered frame that has not been emitted yet.
    pub fn clear_playback(&self) {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.playback.discard();
        tracing::debug!(epoch, "Playback cleared");
    }

    /// Frames dropped because the playback queue was full.
    pub fn playback_overflows(&self) -> usize {
        self.overflow_drops.load(Ordering::Relaxed)
    }

    /// Frames dropped because the capture queue was full.
    pub fn capture_overflows(&self) -> usize {
        self.capture_drops.load(Ordering::Relaxed)
    }
}

impl Drop for AudioPipeline {
    fn drop(&mut self) {
        self.stop_capture();
    }
}

fn spawn_playback_thread(
    device: Arc<dyn PlaybackDevice>,
    mut rx: mpsc::Receiver<PlaybackItem>,
    epoch: Arc<AtomicU64>,
    notices: mpsc::Sender<AudioNotice>,
) -> AudioResult<()> {
    thread::Builder::new()
        .name("audio-playback".to_string())
        .spawn(move || {
            while let Some(item) = rx.blocking_recv() {
                if item.epoch < epoch.load(Ordering::SeqCst) {
                    continue;
                }
                if let Err(e) = device.write_frame(&item.frame.payload) {
                    tracing::error!(error = %e, "Playback device failed");
                    let _ = notices.try_send(AudioNotice::PlaybackLost(e.to_string()));
                    break;
                }
            }
            tracing::debug!("Playback thread stopped");
        })
        .map(|_| ())
        .map_err(|e| AudioError::DeviceUnavailable(format!("playback thread: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::audio::device::UnavailableBackend;
    use crate::core::audio::memory::MemoryBackend;

    fn frame(n: u8) -> Bytes {
        Bytes::from(vec![n; 4])
    }

    async fn wait_for<F: Fn() -> bool>(check: F) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_open_fails_without_devices() {
        let result = AudioPipeline::open(
            Arc::new(UnavailableBackend::default()),
            AudioSettings::default(),
        );
        assert!(matches!(result, Err(AudioError::DeviceUnavailable(_))));
    }

    #[tokio::test]
    async fn test_capture_frames_in_order() {
        let backend = MemoryBackend::new().with_capture_frames((0..5).map(frame));
        let (pipeline, _notices) =
            AudioPipeline::open(Arc::new(backend), AudioSettings::default()).unwrap();

        let mut rx = pipeline.start_capture().unwrap();
        for expected in 0..5u64 {
            let captured = rx.recv().await.unwrap();
            assert_eq!(captured.direction, AudioDirection::Capture);
            assert_eq!(captured.sequence, expected);
            assert_eq!(captured.payload[0], expected as u8);
        }
        pipeline.stop_capture();
    }

    #[tokio::test]
    async fn test_start_capture_twice() {
        let (pipeline, _notices) =
            AudioPipeline::open(Arc::new(MemoryBackend::new()), AudioSettings::default()).unwrap();
        let _rx = pipeline.start_capture().unwrap();
        assert!(matches!(
            pipeline.start_capture(),
            Err(AudioError::CaptureActive)
        ));
        pipeline.stop_capture();
    }

    #[tokio::test]
    async fn test_restart_reopens_device() {
        let backend = MemoryBackend::new();
        let (pipeline, _notices) =
            AudioPipeline::open(Arc::new(backend.clone()), AudioSettings::default()).unwrap();

        let _first = pipeline.start_capture().unwrap();
        pipeline.stop_capture();
        let _second = pipeline.start_capture().unwrap();
        assert_eq!(backend.captures_opened(), 2);
        pipeline.stop_capture();
    }

    #[tokio::test]
    async fn test_playback_preserves_order() {
        let backend = MemoryBackend::new();
        let (pipeline, _notices) =
            AudioPipeline::open(Arc::new(backend.clone()), AudioSettings::default()).unwrap();

        for n in 0..4 {
            pipeline.enqueue_playback(frame(n)).unwrap();
        }
        wait_for(|| backend.played_frames().len() == 4).await;
        let played: Vec<u8> = backend.played_frames().iter().map(|f| f[0]).collect();
        assert_eq!(played, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_clear_discards_queued_frames() {
        let backend = MemoryBackend::new().with_playback_delay(Duration::from_millis(30));
        let (pipeline, _notices) =
            AudioPipeline::open(Arc::new(backend.clone()), AudioSettings::default()).unwrap();

        for n in 0..10 {
            pipeline.enqueue_playback(frame(n)).unwrap();
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        pipeline.clear_playback();
        pipeline.enqueue_playback(frame(99)).unwrap();

        wait_for(|| backend.played_frames().last().is_some_and(|f| f[0] == 99)).await;
        assert!(backend.played_frames().len() < 11);
        assert_eq!(backend.discard_count(), 1);
    }

    #[tokio::test]
    async fn test_playback_overflow_drops_newest() {
        let backend = MemoryBackend::new().with_playback_delay(Duration::from_millis(200));
        let settings = AudioSettings {
            playback_queue_frames: 1,
            ..AudioSettings::default()
        };
        let (pipeline, _notices) = AudioPipeline::open(Arc::new(backend), settings).unwrap();

        let mut overflowed = false;
        for n in 0..4 {
            if pipeline.enqueue_playback(frame(n)) == Err(AudioError::PlaybackOverflow) {
                overflowed = true;
            }
        }
        assert!(overflowed);
        assert!(pipeline.playback_overflows() >= 1);
    }

    #[tokio::test]
    async fn test_capture_loss_reported() {
        let backend = MemoryBackend::new()
            .with_capture_frames((0..3).map(frame))
            .with_capture_failure_after(2);
        let (pipeline, mut notices) =
            AudioPipeline::open(Arc::new(backend), AudioSettings::default()).unwrap();

        let mut rx = pipeline.start_capture().unwrap();
        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_some());
        assert!(matches!(
            notices.recv().await,
            Some(AudioNotice::CaptureLost(_))
        ));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_playback_loss_reported() {
        let backend = MemoryBackend::new().with_playback_failure_after(1);
        let (pipeline, mut notices) =
            AudioPipeline::open(Arc::new(backend), AudioSettings::default()).unwrap();

        pipeline.enqueue_playback(frame(1)).unwrap();
        pipeline.enqueue_playback(frame(2)).unwrap();
        assert!(matches!(
            notices.recv().await,
            Some(AudioNotice::PlaybackLost(_))
        ));
    }
}
