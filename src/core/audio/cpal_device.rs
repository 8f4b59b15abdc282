//! Host audio devices through cpal.
//!
//! cpal streams are `!Send` on some platforms, so each stream lives on a
//! keeper thread for as long as the device handle exists. Capture hands
//! PCM16 frames to the reader over a bounded channel; playback feeds a shared
//! sample buffer drained by the output callback.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use parking_lot::Mutex;

use super::device::{
    AudioBackend, AudioError, AudioResult, AudioSettings, CaptureDevice, PlaybackDevice,
};

/// Playback writes block while more than this many frames are buffered.
const PLAYBACK_BUFFER_FRAMES: usize = 8;

/// Default host input and output devices.
#[derive(Debug, Clone, Default)]
pub struct CpalBackend;

impl CpalBackend {
    /// Backend for the default host.
    pub fn new() -> Self {
        Self
    }
}

fn stream_config(settings: &AudioSettings) -> StreamConfig {
    StreamConfig {
        channels: 1,
        sample_rate: SampleRate(settings.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    }
}

/// Run `build` on a keeper thread and keep its result alive until `stop_rx`
/// disconnects. Returns once the stream is playing or failed to start.
fn spawn_keeper<B>(name: &str, build: B) -> AudioResult<std_mpsc::Sender<()>>
where
    B: FnOnce() -> Result<cpal::Stream, String> + Send + 'static,
{
    let (ready_tx, ready_rx) = std_mpsc::channel::<Result<(), String>>();
    let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

    thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            let stream = match build() {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            if let Err(e) = stream.play() {
                let _ = ready_tx.send(Err(e.to_string()));
                return;
            }
            let _ = ready_tx.send(Ok(()));
            // Blocks until the device handle is dropped.
            let _ = stop_rx.recv();
            drop(stream);
        })
        .map_err(|e| AudioError::DeviceUnavailable(e.to_string()))?;

    match ready_rx.recv() {
        Ok(Ok(())) => Ok(stop_tx),
        Ok(Err(e)) => Err(AudioError::DeviceUnavailable(e)),
        Err(_) => Err(AudioError::DeviceUnavailable(
            "stream thread exited".to_string(),
        )),
    }
}

impl AudioBackend for CpalBackend {
    fn name(&self) -> &'static str {
        "cpal"
    }

    fn open_capture(&self, settings: &AudioSettings) -> AudioResult<Box<dyn CaptureDevice>> {
        let config = stream_config(settings);
        let frame_samples = settings.frame_samples;
        let (frame_tx, frame_rx) =
            std_mpsc::sync_channel::<Result<Bytes, String>>(settings.capture_queue_frames.max(1));

        let stop = spawn_keeper("cpal-capture", move || {
            let device = cpal::default_host()
                .default_input_device()
                .ok_or_else(|| "No input device available".to_string())?;
            tracing::info!(
                device = %device.name().unwrap_or_else(|_| "Unknown".to_string()),
                "Using input device"
            );

            let mut pending: Vec<u8> = Vec::with_capacity(frame_samples * 2);
            let data_tx = frame_tx.clone();
            device
                .build_input_stream(
                    &config,
                    move |data: &[i16], _: &cpal::InputCallbackInfo| {
                        for sample in data {
                            pending.extend_from_slice(&sample.to_le_bytes());
                            if pending.len() >= frame_samples * 2 {
                                let frame = Bytes::from(std::mem::take(&mut pending));
                                // Reader behind: the frame is dropped.
                                let _ = data_tx.try_send(Ok(frame));
                            }
                        }
                    },
                    move |err| {
                        let _ = frame_tx.try_send(Err(err.to_string()));
                    },
                    None,
                )
                .map_err(|e| e.to_string())
        })?;

        Ok(Box::new(CpalCapture {
            frames: frame_rx,
            _stop: stop,
        }))
    }

    fn open_playback(&self, settings: &AudioSettings) -> AudioResult<Arc<dyn PlaybackDevice>> {
        let config = stream_config(settings);
        let buffer = Arc::new(Mutex::new(VecDeque::<i16>::new()));
        let lost = Arc::new(AtomicBool::new(false));

        let cb_buffer = buffer.clone();
        let cb_lost = lost.clone();
        let stop = spawn_keeper("cpal-playback", move || {
            let device = cpal::default_host()
                .default_output_device()
                .ok_or_else(|| "No output device available".to_string())?;
            tracing::info!(
                device = %device.name().unwrap_or_else(|_| "Unknown".to_string()),
                "Using output device"
            );

            device
                .build_output_stream(
                    &config,
                    move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                        let mut buffer = cb_buffer.lock();
                        for slot in data.iter_mut() {
                            *slot = buffer.pop_front().unwrap_or(0);
                        }
                    },
                    move |err| {
                        tracing::error!(error = %err, "Output stream error");
                        cb_lost.store(true, Ordering::SeqCst);
                    },
                    None,
                )
                .map_err(|e| e.to_string())
        })?;

        Ok(Arc::new(CpalPlayback {
            buffer,
            lost,
            high_water: settings.frame_samples * PLAYBACK_BUFFER_FRAMES,
            frame_duration: settings.frame_duration(),
            _stop: Mutex::new(stop),
        }))
    }
}

struct CpalCapture {
    frames: std_mpsc::Receiver<Result<Bytes, String>>,
    _stop: std_mpsc::Sender<()>,
}

impl CaptureDevice for CpalCapture {
    fn read_frame(&mut self, timeout: Duration) -> AudioResult<Option<Bytes>> {
        match self.frames.recv_timeout(timeout) {
            Ok(Ok(frame)) => Ok(Some(frame)),
            Ok(Err(e)) => Err(AudioError::DeviceLost(e)),
            Err(std_mpsc::RecvTimeoutError::Timeout) => Ok(None),
            Err(std_mpsc::RecvTimeoutError::Disconnected) => Err(AudioError::DeviceLost(
                "input stream closed".to_string(),
            )),
        }
    }
}

struct CpalPlayback {
    buffer: Arc<Mutex<VecDeque<i16>>>,
    lost: Arc<AtomicBool>,
    high_water: usize,
    frame_duration: Duration,
    _stop: Mutex<std_mpsc::Sender<()>>,
}

impl PlaybackDevice for CpalPlayback {
    fn write_frame(&self, frame: &[u8]) -> AudioResult<()> {
        while self.buffer.lock().len() > self.high_water {
            if self.lost.load(Ordering::SeqCst) {
                break;
            }
            thread::sleep(self.frame_duration);
        }
        if self.lost.load(Ordering::SeqCst) {
            return Err(AudioError::DeviceLost("output stream failed".to_string()));
        }

        let mut buffer = self.buffer.lock();
        buffer.extend(
            frame
                .chunks_exact(2)
                .map(|pair| i16::from_le_bytes([pair[0], pair[1]])),
        );
        Ok(())
    }

    fn discard(&self) {
        self.buffer.lock().clear();
    }
}
