//! The recording controller
//!
//! Owns the state machine and every thread of a session: the video and audio
//! scheduler threads, the writer thread, and the queue connecting them.
//! `start` wires the pipeline up in dependency order; `stop` tears it down in
//! reverse, best effort, and always lands back in `Idle`. An unrecoverable
//! error from any pipeline thread escalates through `fail`, which performs
//! the same teardown from a detached thread and lands in `Failed`.

use crate::capture::{AudioSource, CaptureService};
use crate::container::{ContainerFactory, EncoderFactory};
use crate::error::{RecorderError, RecorderResult};
use crate::media::AudioFormat;
use crate::recorder::audio::{AudioGrabber, LevelMeter};
use crate::recorder::queue::WriterQueue;
use crate::recorder::rate::RateConverter;
use crate::recorder::scheduler::Scheduler;
use crate::recorder::state::{AudioLevels, CaptureConfig, RecorderEvent, RecordingState};
use crate::recorder::video::VideoGrabber;
use crate::recorder::writer::{open_container, session_tracks, WriterThread};
use crate::recorder::StopSignal;
use parking_lot::{Mutex as ParkingMutex, RwLock};
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Upper bound on waiting for any single pipeline thread during teardown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Delay between audio read cycles.
const AUDIO_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Everything owned by one recording session.
struct ActiveSession {
    id: Uuid,
    start_time_ms: i64,
    stop: Arc<StopSignal>,
    queue: Arc<WriterQueue>,
    video_scheduler: Option<Scheduler>,
    audio_scheduler: Option<Scheduler>,
    writer_handle: Option<std::thread::JoinHandle<()>>,
}

struct ControllerInner {
    config: ParkingMutex<CaptureConfig>,
    state: RwLock<RecordingState>,
    session: ParkingMutex<Option<ActiveSession>>,
    capture: Arc<ParkingMutex<Box<dyn CaptureService>>>,
    audio_source: Option<Arc<ParkingMutex<Box<dyn AudioSource>>>>,
    container_factory: Arc<dyn ContainerFactory>,
    encoder_factory: Arc<dyn EncoderFactory>,
    meter: Arc<LevelMeter>,
    artifacts: Arc<ParkingMutex<Vec<PathBuf>>>,
    events: broadcast::Sender<RecorderEvent>,
}

/// Cloneable handle to the recording pipeline.
pub struct RecordingController {
    inner: Arc<ControllerInner>,
}

impl Clone for RecordingController {
    fn clone(&self) -> Self {
        RecordingController {
            inner: self.inner.clone(),
        }
    }
}

impl RecordingController {
    pub fn new(
        config: CaptureConfig,
        capture: Box<dyn CaptureService>,
        audio_source: Option<Box<dyn AudioSource>>,
        container_factory: Arc<dyn ContainerFactory>,
        encoder_factory: Arc<dyn EncoderFactory>,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        RecordingController {
            inner: Arc::new(ControllerInner {
                config: ParkingMutex::new(config),
                state: RwLock::new(RecordingState::Idle),
                session: ParkingMutex::new(None),
                capture: Arc::new(ParkingMutex::new(capture)),
                audio_source: audio_source.map(|s| Arc::new(ParkingMutex::new(s))),
                container_factory,
                encoder_factory,
                meter: Arc::new(LevelMeter::new()),
                artifacts: Arc::new(ParkingMutex::new(Vec::new())),
                events,
            }),
        }
    }

    /// Starts a new recording session. Starting while a session is active
    /// stops that session first, then proceeds as a fresh start.
    ///
    /// Any failure while wiring the pipeline tears down whatever was already
    /// running and leaves the controller in `Idle`, not `Failed`; nothing was
    /// recording yet.
    pub fn start(&self) -> RecorderResult<()> {
        let inner = &self.inner;
        let mut session_slot = inner.session.lock();
        if let Some(active) = session_slot.take() {
            let id = active.id;
            inner.teardown(active);
            *inner.state.write() = RecordingState::Idle;
            let _ = inner.events.send(RecorderEvent::Stopped);
            tracing::info!("Recording session {} stopped before restart", id);
        }

        let config = inner.config.lock().clone();
        let audio_format = self.effective_audio_format(&config)?;
        inner.artifacts.lock().clear();

        let video_format = config.video_format();
        let encoder = inner.encoder_factory.encoder_for(&video_format)?;
        let tracks = session_tracks(video_format, audio_format);
        let first = open_container(
            inner.container_factory.as_ref(),
            &tracks,
            config.max_file_size,
        )?;
        inner.artifacts.lock().push(first.path.clone());

        let converter = if first.writer.requires_fixed_frame_rate() {
            RateConverter::fixed(config.frame_rate)
        } else {
            RateConverter::passthrough()
        };

        let queue = Arc::new(WriterQueue::new(config.queue_capacity()));
        let stop = Arc::new(StopSignal::new());
        let start_time_ms = chrono::Utc::now().timestamp_millis();

        let writer_handle = WriterThread {
            queue: queue.clone(),
            factory: inner.container_factory.clone(),
            tracks,
            max_file_duration: config.max_file_duration,
            max_file_size: config.max_file_size,
            artifacts: inner.artifacts.clone(),
            events: inner.events.clone(),
            on_fail: failure_callback(Arc::downgrade(inner)),
        }
        .spawn(first.writer);

        let mut video_grabber = VideoGrabber::new(
            inner.capture.clone(),
            config.target.clone(),
            config.capture_area.width,
            config.capture_area.height,
            config.depth,
            converter,
            encoder,
            queue.clone(),
            start_time_ms,
            stop.clone(),
        );
        let on_video_fail = failure_callback(Arc::downgrade(inner));
        let video_scheduler =
            Scheduler::fixed_rate("video", config.frame_interval(), move || {
                match video_grabber.tick() {
                    Ok(tick) => tick,
                    Err(e) => {
                        on_video_fail(e.to_string());
                        crate::recorder::scheduler::Tick::Cancel
                    }
                }
            });

        let mut session = ActiveSession {
            id: Uuid::new_v4(),
            start_time_ms,
            stop: stop.clone(),
            queue: queue.clone(),
            video_scheduler: Some(video_scheduler),
            audio_scheduler: None,
            writer_handle: Some(writer_handle),
        };

        if let Some(format) = audio_format {
            match self.start_audio(format, queue, stop, start_time_ms) {
                Ok(scheduler) => session.audio_scheduler = Some(scheduler),
                Err(e) => {
                    // The teardown drains the queue, which closes the file
                    // opened above; no partial state survives a failed start.
                    inner.teardown(session);
                    inner.artifacts.lock().clear();
                    return Err(e);
                }
            }
        }

        let id = session.id;
        *session_slot = Some(session);
        drop(session_slot);

        *inner.state.write() = RecordingState::Recording;
        let _ = inner.events.send(RecorderEvent::FileOpened(first.path));
        let _ = inner.events.send(RecorderEvent::Started);
        tracing::info!("Recording session {} started", id);
        Ok(())
    }

    /// Opens and starts the audio line, then puts its grabber on a
    /// fixed-delay scheduler.
    fn start_audio(
        &self,
        format: AudioFormat,
        queue: Arc<WriterQueue>,
        stop: Arc<StopSignal>,
        start_time_ms: i64,
    ) -> RecorderResult<Scheduler> {
        let source = self
            .inner
            .audio_source
            .clone()
            .ok_or_else(|| RecorderError::Configuration("audio requested without a source".into()))?;
        {
            let mut source = source.lock();
            source.open()?;
            source.start()?;
        }
        let mut grabber = AudioGrabber::new(
            source,
            format,
            queue,
            self.inner.meter.clone(),
            start_time_ms,
            stop,
        );
        let on_fail = failure_callback(Arc::downgrade(&self.inner));
        Ok(Scheduler::fixed_delay("audio", AUDIO_POLL_INTERVAL, move || {
            match grabber.tick() {
                Ok(tick) => tick,
                Err(e) => {
                    on_fail(e.to_string());
                    crate::recorder::scheduler::Tick::Cancel
                }
            }
        }))
    }

    /// The audio track format for this session, when audio is configured.
    ///
    /// The source reports the format it actually negotiated, which may
    /// differ from the one requested in the config.
    fn effective_audio_format(
        &self,
        config: &CaptureConfig,
    ) -> RecorderResult<Option<AudioFormat>> {
        match (&config.audio, &self.inner.audio_source) {
            (None, _) => Ok(None),
            (Some(_), Some(source)) => Ok(Some(source.lock().format())),
            (Some(_), None) => Err(RecorderError::Configuration(
                "audio requested without a source".into(),
            )),
        }
    }

    /// Stops the current session, best effort, and returns the files it
    /// produced. Stopping while idle is a no-op.
    pub fn stop(&self) -> Vec<PathBuf> {
        let session = self.inner.session.lock().take();
        if let Some(session) = session {
            let id = session.id;
            self.inner.teardown(session);
            *self.inner.state.write() = RecordingState::Idle;
            let _ = self.inner.events.send(RecorderEvent::Stopped);
            tracing::info!("Recording session {} stopped", id);
        }
        self.inner.artifacts.lock().clone()
    }

    pub fn state(&self) -> RecordingState {
        self.inner.state.read().clone()
    }

    pub fn is_recording(&self) -> bool {
        self.state().is_recording()
    }

    /// Start time of the active session, in epoch milliseconds.
    pub fn start_time(&self) -> Option<i64> {
        self.inner.session.lock().as_ref().map(|s| s.start_time_ms)
    }

    pub fn session_id(&self) -> Option<Uuid> {
        self.inner.session.lock().as_ref().map(|s| s.id)
    }

    /// Files produced so far, the currently open one included.
    pub fn produced_files(&self) -> Vec<PathBuf> {
        self.inner.artifacts.lock().clone()
    }

    pub fn audio_levels(&self) -> AudioLevels {
        self.inner.meter.levels()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RecorderEvent> {
        self.inner.events.subscribe()
    }

    /// Escalates an unrecoverable error observed outside the pipeline's own
    /// threads. Safe to call from any thread; the teardown runs detached and
    /// the controller lands in `Failed`.
    pub fn recording_failed(&self, message: impl Into<String>) {
        self.inner.clone().fail(message.into());
    }

    /// Adjusts the rotation age threshold; takes effect at the next start.
    pub fn set_max_file_duration(&self, max: Duration) {
        self.inner.config.lock().max_file_duration = max;
    }

    /// Adjusts the rotation size threshold; takes effect at the next start.
    pub fn set_max_file_size(&self, max: u64) {
        self.inner.config.lock().max_file_size = max;
    }
}

impl ControllerInner {
    /// Dismantles a session in reverse dependency order. Every step is
    /// bounded, so a stuck thread delays teardown but cannot hang it.
    fn teardown(&self, mut session: ActiveSession) {
        session.stop.set(chrono::Utc::now().timestamp_millis());

        if let Some(scheduler) = session.video_scheduler.take() {
            scheduler.shutdown(SHUTDOWN_TIMEOUT);
        }
        self.capture.lock().close();

        if let Some(scheduler) = session.audio_scheduler.take() {
            scheduler.shutdown(SHUTDOWN_TIMEOUT);
        }
        if let Some(source) = &self.audio_source {
            source.lock().close();
        }

        session.queue.close();
        if let Some(handle) = session.writer_handle.take() {
            if handle.join().is_err() {
                tracing::error!("Writer thread panicked during teardown");
            }
        }
    }

    /// Failure path shared by all pipeline threads. Runs the teardown on a
    /// detached thread because the reporting thread is usually one of the
    /// threads teardown waits for.
    fn fail(self: Arc<Self>, message: String) {
        std::thread::spawn(move || {
            tracing::error!("Recording failed: {}", message);
            let session = self.session.lock().take();
            if let Some(session) = session {
                self.teardown(session);
            }
            *self.state.write() = RecordingState::Failed(message.clone());
            let _ = self.events.send(RecorderEvent::Failed(message));
        });
    }
}

impl Drop for ControllerInner {
    fn drop(&mut self) {
        if let Some(session) = self.session.get_mut().take() {
            self.teardown(session);
        }
    }
}

fn failure_callback(inner: Weak<ControllerInner>) -> Box<dyn Fn(String) + Send> {
    Box::new(move |message| {
        if let Some(inner) = inner.upgrade() {
            inner.fail(message);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::CaptureTarget;
    use crate::media::{ColorDepth, PcmEncoding, Rational, AUDIO_TRACK, VIDEO_TRACK};
    use crate::recorder::state::CaptureRect;
    use crate::recorder::testing::{
        FakeContainerFactory, FakeContainerLog, PassthroughEncoderFactory, ScriptedAudioSource,
        SolidCapture,
    };
    use std::sync::atomic::Ordering;
    use std::time::Instant;

    fn config(fps: i64) -> CaptureConfig {
        CaptureConfig::new(
            CaptureRect {
                x: 0,
                y: 0,
                width: 4,
                height: 4,
            },
            Rational::from_int(fps),
            ColorDepth::Rgb24,
            CaptureTarget::Process(1),
        )
    }

    fn controller(
        config: CaptureConfig,
        audio: Option<Box<dyn AudioSource>>,
        log: FakeContainerLog,
    ) -> RecordingController {
        RecordingController::new(
            config,
            Box::new(SolidCapture::new()),
            audio,
            Arc::new(FakeContainerFactory::new(log, false, u64::MAX)),
            Arc::new(PassthroughEncoderFactory),
        )
    }

    fn wait_for<F: FnMut() -> bool>(what: &str, mut predicate: F) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if predicate() {
                return;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        panic!("timed out waiting for {what}");
    }

    #[test]
    fn test_video_only_session_end_to_end() {
        let log = FakeContainerLog::default();
        let c = controller(config(15), None, log.clone());
        let mut events = c.subscribe();

        c.start().unwrap();
        assert!(c.is_recording());
        assert!(c.session_id().is_some());
        assert!(c.start_time().is_some());
        assert!(matches!(events.try_recv(), Ok(RecorderEvent::FileOpened(_))));
        assert!(matches!(events.try_recv(), Ok(RecorderEvent::Started)));

        wait_for("first frame written", || !log.writes().is_empty());
        let files = c.stop();
        assert_eq!(c.state(), RecordingState::Idle);
        assert!(matches!(events.try_recv(), Ok(RecorderEvent::Stopped)));
        assert_eq!(files.len(), 1);

        let writes = log.writes();
        assert!(!writes.is_empty());
        for (i, w) in writes.iter().enumerate() {
            assert_eq!(w.track, VIDEO_TRACK);
            assert_eq!(w.sequence_number, i as u64);
        }
        // The single file was closed when the writer drained.
        assert!(log.wait_closed(1, Duration::from_secs(2)));
    }

    struct RefusingEncoderFactory;

    impl crate::container::EncoderFactory for RefusingEncoderFactory {
        fn encoder_for(
            &self,
            format: &crate::media::VideoFormat,
        ) -> RecorderResult<Box<dyn crate::container::FrameEncoder>> {
            Err(RecorderError::Encoder(format!(
                "{}x{} unsupported",
                format.width, format.height
            )))
        }
    }

    struct BrokenAudioSource(AudioFormat);

    impl AudioSource for BrokenAudioSource {
        fn format(&self) -> AudioFormat {
            self.0
        }

        fn open(&mut self) -> RecorderResult<()> {
            Err(RecorderError::AudioLine("line unavailable".into()))
        }

        fn start(&mut self) -> RecorderResult<()> {
            Ok(())
        }

        fn read(&mut self, _buf: &mut [u8]) -> RecorderResult<usize> {
            Ok(0)
        }

        fn close(&mut self) {}
    }

    #[test]
    fn test_start_while_recording_restarts() {
        let log = FakeContainerLog::default();
        let c = controller(config(15), None, log.clone());
        c.start().unwrap();
        let first_id = c.session_id().unwrap();
        wait_for("first frame written", || !log.writes().is_empty());

        // A second start stops the active session and begins a new one.
        c.start().unwrap();
        assert!(c.is_recording());
        assert_ne!(c.session_id().unwrap(), first_id);
        assert_eq!(log.files_opened(), 2);
        // The first session's file was finalized when its writer drained.
        assert!(log.wait_closed(1, Duration::from_secs(2)));
        // Artifacts describe only the new session.
        assert_eq!(c.produced_files().len(), 1);

        c.stop();
        assert_eq!(c.state(), RecordingState::Idle);
    }

    #[test]
    fn test_failed_start_leaves_no_partial_state() {
        let log = FakeContainerLog::default();
        let c = RecordingController::new(
            config(15),
            Box::new(SolidCapture::new()),
            None,
            Arc::new(FakeContainerFactory::new(log.clone(), false, u64::MAX)),
            Arc::new(RefusingEncoderFactory),
        );
        assert!(matches!(c.start(), Err(RecorderError::Encoder(_))));
        assert_eq!(c.state(), RecordingState::Idle);
        assert!(c.session_id().is_none());
        assert!(c.produced_files().is_empty());
        assert_eq!(log.files_opened(), 0);
    }

    #[test]
    fn test_failed_audio_start_closes_opened_file() {
        let format = AudioFormat {
            sample_rate: 8_000,
            bits_per_sample: 16,
            channels: 1,
            encoding: PcmEncoding::Signed,
            big_endian: false,
        };
        let mut cfg = config(15);
        cfg.audio = Some(format);
        let log = FakeContainerLog::default();
        let c = controller(cfg, Some(Box::new(BrokenAudioSource(format))), log.clone());

        assert!(matches!(c.start(), Err(RecorderError::AudioLine(_))));
        assert_eq!(c.state(), RecordingState::Idle);
        assert!(c.session_id().is_none());
        assert!(c.produced_files().is_empty());
        // The file opened before the audio line failed was still closed.
        assert_eq!(log.files_opened(), 1);
        assert!(log.wait_closed(1, Duration::from_secs(2)));
    }

    #[test]
    fn test_short_run_writes_a_bounded_frame_count() {
        let log = FakeContainerLog::default();
        let c = controller(config(15), None, log.clone());
        c.start().unwrap();
        // Run for roughly a hundred milliseconds: at 15 fps that fits one to
        // three frames, never more.
        wait_for("first frame written", || !log.writes().is_empty());
        std::thread::sleep(Duration::from_millis(35));
        c.stop();
        let frames = log.writes().len();
        assert!((1..=3).contains(&frames), "wrote {frames} frames");
    }

    #[test]
    fn test_stop_while_idle_is_a_no_op() {
        let c = controller(config(15), None, FakeContainerLog::default());
        assert!(c.stop().is_empty());
        assert_eq!(c.state(), RecordingState::Idle);
    }

    #[test]
    fn test_audio_track_is_recorded_and_source_closed() {
        let format = AudioFormat {
            sample_rate: 8_000,
            bits_per_sample: 16,
            channels: 1,
            encoding: PcmEncoding::Signed,
            big_endian: false,
        };
        let source = ScriptedAudioSource::new(format, vec![1600; 200], 1000);
        let closed = source.closed.clone();
        let mut cfg = config(15);
        cfg.audio = Some(format);

        let log = FakeContainerLog::default();
        let c = controller(cfg, Some(Box::new(source)), log.clone());
        c.start().unwrap();
        wait_for("audio samples written", || {
            log.writes().iter().any(|w| w.track == AUDIO_TRACK)
        });
        // The meter saw a constant non-zero signal.
        assert!(c.audio_levels().left.is_some());

        c.stop();
        assert!(closed.load(Ordering::SeqCst));
        let writes = log.writes();
        assert!(writes.iter().any(|w| w.track == VIDEO_TRACK));
        assert!(writes.iter().any(|w| w.track == AUDIO_TRACK));
    }

    #[test]
    fn test_audio_config_without_source_fails_start() {
        let mut cfg = config(15);
        cfg.audio = Some(AudioFormat {
            sample_rate: 44_100,
            bits_per_sample: 16,
            channels: 2,
            encoding: PcmEncoding::Signed,
            big_endian: false,
        });
        let c = controller(cfg, None, FakeContainerLog::default());
        assert!(matches!(c.start(), Err(RecorderError::Configuration(_))));
        assert_eq!(c.state(), RecordingState::Idle);
    }

    #[test]
    fn test_write_failure_escalates_to_failed_state() {
        let log = FakeContainerLog::default();
        let c = controller(config(30), None, log.clone());
        let mut events = c.subscribe();

        c.start().unwrap();
        log.fail_next_write();
        wait_for("failed state", || {
            matches!(c.state(), RecordingState::Failed(_))
        });
        assert_eq!(
            c.state().message(),
            Some("Container error: injected write failure")
        );
        wait_for("failed event", || loop {
            match events.try_recv() {
                Ok(RecorderEvent::Failed(_)) => return true,
                Ok(_) => continue,
                Err(_) => return false,
            }
        });
        // The failed session is gone; a new one can start.
        assert!(c.session_id().is_none());
        c.start().unwrap();
        assert!(c.is_recording());
        c.stop();
    }

    #[test]
    fn test_produced_files_reset_per_session() {
        let log = FakeContainerLog::default();
        let c = controller(config(15), None, log.clone());
        c.start().unwrap();
        let first = c.stop();
        assert_eq!(first.len(), 1);

        c.start().unwrap();
        let second = c.stop();
        assert_eq!(second.len(), 1);
        assert_ne!(first[0], second[0]);
    }
}
