#[cfg(feature = "camera-nokhwa")]
pub mod camera;
pub mod replay;
pub mod subprocess;

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
};

use anyhow::Result;
use crossbeam_channel::{Receiver, Sender};
use image::RgbaImage;

use crate::{
    audio::AudioEngine,
    config::{CaptureRequest, DetectorConfig},
    overlay,
    session::{FrameReport, SessionController},
    types::{DetectedHand, Frame},
};

/// Anything that can push frames into a session: a camera, a replay file.
pub trait FrameSource {
    fn start(&mut self, request: CaptureRequest, frame_tx: Sender<Frame>) -> Result<CaptureStream>;
}

/// External hand-landmark detector, used as a black box.
pub trait HandDetector {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<DetectedHand>>;
}

/// Handle on a running frame source. Stopping (or dropping) it signals the
/// capture thread and waits for it to exit.
#[derive(Debug)]
pub struct CaptureStream {
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
    keep_every_frame: bool,
}

impl CaptureStream {
    /// Runs `capture` on its own thread. It should return once the flag it
    /// is given turns true.
    pub fn spawn<F>(keep_every_frame: bool, capture: F) -> Self
    where
        F: FnOnce(Arc<AtomicBool>) + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let handle = thread::spawn(move || capture(stop_flag));
        Self {
            stop,
            handle: Some(handle),
            keep_every_frame,
        }
    }

    /// A stream with no capture thread behind it.
    pub fn detached() -> Self {
        Self {
            stop: Arc::new(AtomicBool::new(false)),
            handle: None,
            keep_every_frame: false,
        }
    }

    /// Replays must see every frame; live capture drops stale ones.
    pub fn keeps_every_frame(&self) -> bool {
        self.keep_every_frame
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CaptureStream {
    fn drop(&mut self) {
        self.shutdown();
    }
}

pub fn recv_latest_frame(frame_rx: &Receiver<Frame>) -> Option<Frame> {
    let mut frame = frame_rx.recv().ok()?;
    // Drop stale frames if processing fell behind.
    while let Ok(newer) = frame_rx.try_recv() {
        frame = newer;
    }
    Some(frame)
}

/// Applies the detector's confidence and hand-count limits.
pub fn filter_hands(mut hands: Vec<DetectedHand>, config: &DetectorConfig) -> Vec<DetectedHand> {
    hands.retain(|hand| hand.score >= config.min_detection_confidence);
    hands.sort_by(|a, b| b.score.total_cmp(&a.score));
    hands.truncate(config.max_hands);
    hands
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub frames: u64,
    pub detector_errors: u64,
}

/// Drives a started session until its frame source ends: detect, interpret,
/// then draw the overlay onto the frame and hand it to `on_rendered`.
pub fn run<E, D, F>(
    session: &mut SessionController<E>,
    detector: &mut D,
    mut on_rendered: F,
) -> Result<RunSummary>
where
    E: AudioEngine,
    D: HandDetector + ?Sized,
    F: FnMut(&Frame, &RgbaImage, &FrameReport) -> Result<()>,
{
    let mut summary = RunSummary::default();
    let detector_config = session.config().detector;

    while let Some(frame) = session.next_frame() {
        let hands = match detector.detect(&frame) {
            Ok(hands) => filter_hands(hands, &detector_config),
            Err(err) => {
                log::warn!("hand detection failed on frame {}: {err:?}", frame.sequence);
                summary.detector_errors += 1;
                Vec::new()
            }
        };

        let report = session.on_hands(&hands, frame.timestamp);

        let mut canvas = RgbaImage::from_raw(frame.width, frame.height, frame.rgba.clone())
            .unwrap_or_else(|| RgbaImage::new(frame.width, frame.height));
        overlay::render(&mut canvas, &hands, session.zone_overlay());
        on_rendered(&frame, &canvas, &report)?;

        summary.frames += 1;
    }

    log::info!(
        "frame source ended after {} frames ({} detector errors)",
        summary.frames,
        summary.detector_errors
    );
    Ok(summary)
}
