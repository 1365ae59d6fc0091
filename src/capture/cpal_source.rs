//! Default-input audio source backed by cpal
//!
//! cpal delivers audio through a callback on its own stream thread, and the
//! stream handle itself is not `Send`. The stream therefore lives on a
//! dedicated thread for the lifetime of the session, and the callback feeds a
//! bounded ring buffer that [`AudioSource::read`] drains from the grabber's
//! scheduler thread.

use crate::capture::traits::AudioSource;
use crate::error::{RecorderError, RecorderResult};
use crate::media::{AudioFormat, PcmEncoding};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleFormat;
use parking_lot::Mutex as ParkingMutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

/// How much PCM the ring buffer holds before the callback starts dropping
/// the oldest data (the pipeline's backpressure applies to the queue, not to
/// the hardware line).
const RING_SECONDS: usize = 4;

pub struct CpalAudioSource {
    format: AudioFormat,
    ring: Arc<ParkingMutex<VecDeque<u8>>>,
    running: Arc<AtomicBool>,
    open: Arc<AtomicBool>,
    stream_handle: Option<std::thread::JoinHandle<()>>,
}

impl CpalAudioSource {
    /// Creates a source for the default input device. Fails when no input
    /// device is present or its configuration cannot be read.
    pub fn new() -> RecorderResult<Self> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| RecorderError::AudioLine("No default input device".to_string()))?;
        let config = device
            .default_input_config()
            .map_err(|e| RecorderError::AudioLine(format!("Failed to get audio config: {e}")))?;

        let format = AudioFormat {
            sample_rate: config.sample_rate().0,
            bits_per_sample: 16,
            channels: config.channels(),
            encoding: PcmEncoding::Signed,
            big_endian: false,
        };

        Ok(CpalAudioSource {
            format,
            ring: Arc::new(ParkingMutex::new(VecDeque::new())),
            running: Arc::new(AtomicBool::new(false)),
            open: Arc::new(AtomicBool::new(false)),
            stream_handle: None,
        })
    }
}

impl AudioSource for CpalAudioSource {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn open(&mut self) -> RecorderResult<()> {
        let ring = self.ring.clone();
        let running = self.running.clone();
        let open = self.open.clone();
        let format = self.format;
        let ring_cap = format.frame_size() * format.sample_rate as usize * RING_SECONDS;

        open.store(true, Ordering::SeqCst);

        // The thread reports whether the stream came up, so line failures
        // surface synchronously from open().
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), String>>();

        let handle = std::thread::spawn(move || {
            let host = cpal::default_host();
            let device = match host.default_input_device() {
                Some(d) => d,
                None => {
                    let _ = ready_tx.send(Err("No default input device".to_string()));
                    return;
                }
            };
            let supported = match device.default_input_config() {
                Ok(c) => c,
                Err(e) => {
                    let _ = ready_tx.send(Err(format!("Failed to get audio config: {e}")));
                    return;
                }
            };
            let sample_format = supported.sample_format();
            let config = supported.into();

            let push = {
                let ring = ring.clone();
                let running = running.clone();
                move |bytes: &[u8]| {
                    if !running.load(Ordering::Relaxed) {
                        return;
                    }
                    let mut guard = ring.lock();
                    guard.extend(bytes.iter().copied());
                    if guard.len() > ring_cap {
                        let excess = guard.len() - ring_cap;
                        guard.drain(..excess);
                        tracing::warn!("Audio ring buffer overflow, dropped {} bytes", excess);
                    }
                }
            };

            let err_fn = |err| tracing::error!("Audio input stream error: {}", err);
            let stream = match sample_format {
                SampleFormat::F32 => {
                    let push = push.clone();
                    device.build_input_stream(
                        &config,
                        move |data: &[f32], _: &cpal::InputCallbackInfo| {
                            let bytes: Vec<u8> = data
                                .iter()
                                .flat_map(|&s| {
                                    let v = (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
                                    v.to_le_bytes()
                                })
                                .collect();
                            push(&bytes);
                        },
                        err_fn,
                        None,
                    )
                }
                SampleFormat::I16 => {
                    let push = push.clone();
                    device.build_input_stream(
                        &config,
                        move |data: &[i16], _: &cpal::InputCallbackInfo| {
                            let bytes: Vec<u8> =
                                data.iter().flat_map(|&s| s.to_le_bytes()).collect();
                            push(&bytes);
                        },
                        err_fn,
                        None,
                    )
                }
                other => {
                    let _ = ready_tx.send(Err(format!("Unsupported sample format {other:?}")));
                    return;
                }
            };

            let stream = match stream {
                Ok(s) => s,
                Err(e) => {
                    let _ = ready_tx.send(Err(format!("Failed to build input stream: {e}")));
                    return;
                }
            };
            if let Err(e) = stream.play() {
                let _ = ready_tx.send(Err(format!("Failed to start input stream: {e}")));
                return;
            }
            let _ = ready_tx.send(Ok(()));
            tracing::info!("Audio input stream started");

            while open.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(100));
            }
            tracing::info!("Audio input stream stopped");
        });
        self.stream_handle = Some(handle);

        match ready_rx.recv_timeout(Duration::from_secs(2)) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(msg)) => {
                self.close();
                Err(RecorderError::AudioLine(msg))
            }
            Err(_) => {
                self.close();
                Err(RecorderError::AudioLine(
                    "Timed out waiting for audio input stream".to_string(),
                ))
            }
        }
    }

    fn start(&mut self) -> RecorderResult<()> {
        self.ring.lock().clear();
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> RecorderResult<usize> {
        let mut guard = self.ring.lock();
        // Whole PCM frames only, so a split never lands mid-sample.
        let frame = self.format.frame_size();
        let avail = guard.len().min(buf.len()) / frame * frame;
        for slot in buf.iter_mut().take(avail) {
            *slot = guard.pop_front().unwrap_or(0);
        }
        Ok(avail)
    }

    fn close(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.open.store(false, Ordering::SeqCst);
        if let Some(handle) = self.stream_handle.take() {
            let _ = handle.join();
        }
    }
}
