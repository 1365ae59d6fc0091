//! The writer thread
//!
//! The sole consumer of the writer queue. Drains samples strictly in FIFO
//! order, rotates the output file at keyframe boundaries when a size or
//! duration threshold is crossed, and hands each sample to the container
//! writer. The previous file finishes closing on a throwaway thread so
//! rotation never stalls the loop.

use crate::container::{mac_palette, ContainerFactory, ContainerWriter, OpenedContainer};
use crate::error::{RecorderError, RecorderResult};
use crate::media::{ColorDepth, TrackFormat, AUDIO_TRACK, VIDEO_TRACK};
use crate::recorder::queue::WriterQueue;
use crate::recorder::state::RecorderEvent;
use parking_lot::Mutex as ParkingMutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

/// Opens a new container file and sets up its tracks. Used for the first
/// file of a session and again on every rotation.
pub(crate) fn open_container(
    factory: &dyn ContainerFactory,
    tracks: &[TrackFormat],
    max_file_size: u64,
) -> RecorderResult<OpenedContainer> {
    let mut opened = factory.open(max_file_size)?;
    for (expected, format) in tracks.iter().enumerate() {
        let track = opened.writer.add_track(format)?;
        if track != expected as u32 {
            return Err(RecorderError::Container(format!(
                "container assigned track {track}, expected {expected}"
            )));
        }
        if let TrackFormat::Video(video) = format {
            if video.depth == ColorDepth::Indexed8 && opened.writer.supports_palette() {
                opened.writer.set_palette(track, &mac_palette())?;
            }
        }
    }
    Ok(opened)
}

pub(crate) struct WriterThread {
    pub queue: Arc<WriterQueue>,
    pub factory: Arc<dyn ContainerFactory>,
    pub tracks: Vec<TrackFormat>,
    pub max_file_duration: Duration,
    pub max_file_size: u64,
    pub artifacts: Arc<ParkingMutex<Vec<PathBuf>>>,
    pub events: broadcast::Sender<RecorderEvent>,
    pub on_fail: Box<dyn Fn(String) + Send>,
}

impl WriterThread {
    /// Consumes the queue until it is closed and drained. The container is
    /// always closed on the way out, failure or not.
    pub fn spawn(self, first: Box<dyn ContainerWriter>) -> std::thread::JoinHandle<()> {
        std::thread::Builder::new()
            .name("windowcast-writer".to_string())
            .spawn(move || self.run(first))
            .expect("failed to spawn writer thread")
    }

    fn run(self, first: Box<dyn ContainerWriter>) {
        let mut writer = first;
        let mut file_opened = Instant::now();

        while let Some(sample) = self.queue.pop() {
            // Only a self-contained video frame may start a new file;
            // thresholds crossed on other samples defer to the next one.
            if sample.is_video()
                && sample.is_keyframe()
                && (writer.is_data_limit_reached()
                    || file_opened.elapsed() > self.max_file_duration)
            {
                match self.rotate(writer) {
                    Ok(next) => {
                        writer = next;
                        file_opened = Instant::now();
                    }
                    Err(e) => {
                        (self.on_fail)(e.to_string());
                        return;
                    }
                }
            }

            if let Err(e) = writer.write(sample.track, &sample) {
                (self.on_fail)(e.to_string());
                let _ = writer.close();
                return;
            }
        }

        if let Err(e) = writer.close() {
            tracing::warn!("Failed to close container writer: {}", e);
        }
        tracing::debug!("Writer thread finished draining");
    }

    /// Closes the old writer on a fire-and-forget thread and opens the next
    /// file. After the handoff this thread never touches the old writer
    /// again.
    fn rotate(
        &self,
        old: Box<dyn ContainerWriter>,
    ) -> RecorderResult<Box<dyn ContainerWriter>> {
        std::thread::spawn(move || {
            if let Err(e) = old.close() {
                tracing::error!("Failed to close rotated-out file: {}", e);
            }
        });

        let opened = open_container(self.factory.as_ref(), &self.tracks, self.max_file_size)?;
        tracing::info!("Rotated output to {}", opened.path.display());
        self.artifacts.lock().push(opened.path.clone());
        let _ = self.events.send(RecorderEvent::FileOpened(opened.path));
        Ok(opened.writer)
    }
}

/// Track layout for a session: video first, audio second when configured.
pub(crate) fn session_tracks(
    video: crate::media::VideoFormat,
    audio: Option<crate::media::AudioFormat>,
) -> Vec<TrackFormat> {
    debug_assert_eq!(VIDEO_TRACK, 0);
    debug_assert_eq!(AUDIO_TRACK, 1);
    let mut tracks = vec![TrackFormat::Video(video)];
    if let Some(audio) = audio {
        tracks.push(TrackFormat::Audio(audio));
    }
    tracks
}
