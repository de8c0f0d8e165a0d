//! Recorded detector output, one JSON object per line:
//!
//! ```text
//! {"t_ms": 0, "hands": [{"handedness": "Left", "score": 0.97, "landmarks": [{"x": 0.5, "y": 0.8, "z": 0.0}, ...]}]}
//! ```
//!
//! Blank lines and lines starting with `#` are skipped.

use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
    sync::{Arc, atomic::Ordering},
    thread,
    time::{Duration, Instant},
};

use anyhow::{Context, Result, anyhow, bail};
use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};

use super::{CaptureStream, FrameSource, HandDetector};
use crate::{
    config::CaptureRequest,
    types::{DetectedHand, Frame, HandLandmarks, Handedness, Landmark, NUM_LANDMARKS},
};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct HandRecord {
    pub handedness: Handedness,
    #[serde(default = "full_score")]
    pub score: f32,
    pub landmarks: Vec<Landmark>,
}

fn full_score() -> f32 {
    1.0
}

impl HandRecord {
    pub fn into_hand(self) -> Result<DetectedHand> {
        let landmarks = HandLandmarks::from_slice(&self.landmarks).ok_or_else(|| {
            anyhow!(
                "expected {NUM_LANDMARKS} landmarks, got {}",
                self.landmarks.len()
            )
        })?;
        Ok(DetectedHand {
            landmarks,
            handedness: self.handedness,
            score: self.score,
        })
    }

    pub fn from_hand(hand: &DetectedHand) -> Self {
        Self {
            handedness: hand.handedness,
            score: hand.score,
            landmarks: hand.landmarks.points().to_vec(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct RecordedLine {
    t_ms: u64,
    #[serde(default)]
    hands: Vec<HandRecord>,
}

#[derive(Clone, Debug)]
pub struct RecordedFrame {
    pub offset: Duration,
    pub hands: Vec<DetectedHand>,
}

/// Encodes one frame in the replay line format.
pub fn encode_line(offset: Duration, hands: &[DetectedHand]) -> Result<String> {
    let line = RecordedLine {
        t_ms: offset.as_millis() as u64,
        hands: hands.iter().map(HandRecord::from_hand).collect(),
    };
    Ok(serde_json::to_string(&line)?)
}

/// A recording that acts as both the frame source and the detector.
#[derive(Clone, Debug)]
pub struct ReplayFeed {
    frames: Arc<Vec<RecordedFrame>>,
    realtime: bool,
}

impl ReplayFeed {
    pub fn from_path(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("failed to open replay {}", path.display()))?;
        Self::parse(BufReader::new(file))
            .with_context(|| format!("failed to parse replay {}", path.display()))
    }

    pub fn parse<R: BufRead>(reader: R) -> Result<Self> {
        let mut frames = Vec::new();
        let mut last_offset = 0;

        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let record: RecordedLine = serde_json::from_str(trimmed)
                .with_context(|| format!("invalid JSON on line {}", idx + 1))?;
            if record.t_ms < last_offset {
                bail!(
                    "line {}: timestamp {} ms goes backwards (previous {} ms)",
                    idx + 1,
                    record.t_ms,
                    last_offset
                );
            }
            last_offset = record.t_ms;

            let hands = record
                .hands
                .into_iter()
                .map(HandRecord::into_hand)
                .collect::<Result<Vec<_>>>()
                .with_context(|| format!("invalid hand on line {}", idx + 1))?;
            frames.push(RecordedFrame {
                offset: Duration::from_millis(record.t_ms),
                hands,
            });
        }

        Ok(Self {
            frames: Arc::new(frames),
            realtime: false,
        })
    }

    /// Pace frames by their recorded timestamps instead of as fast as possible.
    pub fn realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn detector(&self) -> ReplayDetector {
        ReplayDetector {
            frames: self.frames.clone(),
        }
    }
}

impl FrameSource for ReplayFeed {
    fn start(&mut self, request: CaptureRequest, frame_tx: Sender<Frame>) -> Result<CaptureStream> {
        if self.frames.is_empty() {
            bail!("replay contains no frames");
        }

        let frames = self.frames.clone();
        let realtime = self.realtime;
        log::info!(
            "replaying {} recorded frames at {}x{}",
            frames.len(),
            request.width,
            request.height
        );

        Ok(CaptureStream::spawn(true, move |stop| {
            let base = Instant::now();
            for (sequence, recorded) in frames.iter().enumerate() {
                if stop.load(Ordering::Relaxed) {
                    break;
                }
                let timestamp = base + recorded.offset;
                if realtime {
                    thread::sleep(timestamp.saturating_duration_since(Instant::now()));
                }
                let frame = Frame::blank(request.width, request.height, sequence as u64, timestamp);
                if frame_tx.send(frame).is_err() {
                    break;
                }
            }
        }))
    }
}

/// Returns the hands recorded for each frame's sequence number.
#[derive(Clone, Debug)]
pub struct ReplayDetector {
    frames: Arc<Vec<RecordedFrame>>,
}

impl HandDetector for ReplayDetector {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<DetectedHand>> {
        self.frames
            .get(frame.sequence as usize)
            .map(|recorded| recorded.hands.clone())
            .ok_or_else(|| anyhow!("no recorded detections for frame {}", frame.sequence))
    }
}
