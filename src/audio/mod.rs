mod graph;
mod recording;

use std::{
    collections::BTreeMap,
    fmt,
    path::{Path, PathBuf},
    time::Duration,
};

use thiserror::Error;

use crate::{config::ReverbConfig, types::TrackName};

pub use graph::{AudioGraph, TrackChannel};
pub use recording::{AudioCommand, RecordingEngine};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("unknown audio node {0}")]
    UnknownNode(NodeId),
    #[error("failed to load {track} track: {reason}")]
    Load { track: TrackName, reason: String },
    #[error("audio engine error: {0}")]
    Engine(String),
}

/// A loadable reference to a user-selected audio file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrackSource {
    pub track: TrackName,
    pub path: PathBuf,
}

/// The narrow contract the session needs from an audio engine.
///
/// Node constructors and scheduling calls can fail; parameter writes are
/// fire-and-forget and never block on the engine's own clock.
pub trait AudioEngine {
    fn create_volume(&mut self, level_db: f32) -> Result<NodeId, AudioError>;
    fn create_filter(&mut self, cutoff_hz: f32) -> Result<NodeId, AudioError>;
    /// Generates the impulse response up front; may take a while.
    fn create_reverb(&mut self, reverb: &ReverbConfig) -> Result<NodeId, AudioError>;
    fn create_player(&mut self, source: &TrackSource, looping: bool) -> Result<NodeId, AudioError>;
    fn connect(&mut self, from: NodeId, to: NodeId) -> Result<(), AudioError>;
    fn connect_to_destination(&mut self, node: NodeId) -> Result<(), AudioError>;

    /// Blocks until every player created so far has its buffer decoded.
    fn wait_until_loaded(&mut self) -> Result<(), AudioError>;
    /// Engine clock in seconds.
    fn now(&self) -> f64;
    fn start(&mut self, player: NodeId, at: f64) -> Result<(), AudioError>;
    fn stop(&mut self, player: NodeId);
    fn dispose(&mut self, node: NodeId);

    fn set_volume_db(&mut self, node: NodeId, level_db: f32, ramp: Option<Duration>);
    fn set_cutoff_hz(&mut self, node: NodeId, cutoff_hz: f32, ramp: Option<Duration>);
    fn set_mute(&mut self, node: NodeId, muted: bool);
    fn set_reverse(&mut self, player: NodeId, reverse: bool);
    fn set_playback_rate(&mut self, player: NodeId, rate: f32);
}

/// User-selected sources per track. Empty slots mean the track was never
/// loaded.
#[derive(Debug, Default)]
pub struct TrackRegistry {
    sources: BTreeMap<TrackName, TrackSource>,
}

impl TrackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any earlier source for the same track.
    pub fn load(&mut self, track: TrackName, path: impl AsRef<Path>) -> Option<TrackSource> {
        let source = TrackSource {
            track,
            path: path.as_ref().to_path_buf(),
        };
        log::info!("{track} track loaded from {}", source.path.display());
        self.sources.insert(track, source)
    }

    pub fn get(&self, track: TrackName) -> Option<&TrackSource> {
        self.sources.get(&track)
    }

    pub fn has_any(&self) -> bool {
        !self.sources.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrackSource> {
        self.sources.values()
    }

    /// Drops every source handle and returns what was released.
    pub fn release_all(&mut self) -> Vec<TrackSource> {
        let released: Vec<TrackSource> = std::mem::take(&mut self.sources).into_values().collect();
        for source in &released {
            log::debug!("released {} source {}", source.track, source.path.display());
        }
        released
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_tracks_loaded_slots() {
        let mut registry = TrackRegistry::new();
        assert!(!registry.has_any());

        assert!(registry.load(TrackName::Bass, "bass.wav").is_none());
        let replaced = registry.load(TrackName::Bass, "bass-2.wav");
        assert_eq!(replaced.map(|s| s.path), Some(PathBuf::from("bass.wav")));
        assert!(registry.has_any());
        assert!(registry.get(TrackName::Drum).is_none());

        let released = registry.release_all();
        assert_eq!(released.len(), 1);
        assert!(!registry.has_any());
    }
}
