use std::{
    collections::{BTreeMap, BTreeSet},
    path::PathBuf,
    time::Duration,
};

use super::{AudioEngine, AudioError, NodeId, TrackSource};
use crate::{config::ReverbConfig, types::TrackName};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum NodeKind {
    Volume,
    Filter,
    Reverb,
    Player,
}

#[derive(Clone, Debug, PartialEq)]
pub enum AudioCommand {
    CreateVolume { node: NodeId, level_db: f32 },
    CreateFilter { node: NodeId, cutoff_hz: f32 },
    CreateReverb { node: NodeId, decay_secs: f32, wet: f32 },
    CreatePlayer { node: NodeId, track: TrackName, path: PathBuf, looping: bool },
    Connect { from: NodeId, to: Option<NodeId> },
    WaitUntilLoaded,
    Start { player: NodeId, at: f64 },
    Stop { player: NodeId },
    Dispose { node: NodeId },
    SetVolume { node: NodeId, level_db: f32, ramp: Option<Duration> },
    SetCutoff { node: NodeId, cutoff_hz: f32, ramp: Option<Duration> },
    SetMute { node: NodeId, muted: bool },
    SetReverse { player: NodeId, reverse: bool },
    SetPlaybackRate { player: NodeId, rate: f32 },
}

/// Engine that keeps the node graph in memory and records every call.
/// Used for headless replays and tests.
#[derive(Debug, Default)]
pub struct RecordingEngine {
    next_id: u64,
    nodes: BTreeMap<NodeId, NodeKind>,
    edges: BTreeSet<(NodeId, Option<NodeId>)>,
    commands: Vec<AudioCommand>,
    failing: BTreeSet<TrackName>,
    clock: f64,
}

impl RecordingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next player created for `track` fail to load.
    pub fn fail_loading(&mut self, track: TrackName) {
        self.failing.insert(track);
    }

    pub fn advance(&mut self, by: Duration) {
        self.clock += by.as_secs_f64();
    }

    pub fn commands(&self) -> &[AudioCommand] {
        &self.commands
    }

    pub fn clear_log(&mut self) {
        self.commands.clear();
    }

    pub fn live_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_connected(&self, from: NodeId, to: NodeId) -> bool {
        self.edges.contains(&(from, Some(to)))
    }

    pub fn reaches_destination(&self, node: NodeId) -> bool {
        self.edges.contains(&(node, None))
    }

    fn record(&mut self, command: AudioCommand) {
        log::debug!("audio: {command:?}");
        self.commands.push(command);
    }

    fn add_node(&mut self, kind: NodeKind) -> NodeId {
        self.next_id += 1;
        let node = NodeId(self.next_id);
        self.nodes.insert(node, kind);
        node
    }

    fn require(&self, node: NodeId) -> Result<NodeKind, AudioError> {
        self.nodes.get(&node).copied().ok_or(AudioError::UnknownNode(node))
    }

    fn write(&mut self, node: NodeId, expected: &[NodeKind], command: AudioCommand) {
        match self.nodes.get(&node).copied() {
            Some(kind) if expected.contains(&kind) => self.record(command),
            Some(kind) => log::warn!("ignoring {command:?} on {kind:?} {node}"),
            None => log::warn!("ignoring {command:?} on disposed {node}"),
        }
    }
}

impl AudioEngine for RecordingEngine {
    fn create_volume(&mut self, level_db: f32) -> Result<NodeId, AudioError> {
        let node = self.add_node(NodeKind::Volume);
        self.record(AudioCommand::CreateVolume { node, level_db });
        Ok(node)
    }

    fn create_filter(&mut self, cutoff_hz: f32) -> Result<NodeId, AudioError> {
        let node = self.add_node(NodeKind::Filter);
        self.record(AudioCommand::CreateFilter { node, cutoff_hz });
        Ok(node)
    }

    fn create_reverb(&mut self, reverb: &ReverbConfig) -> Result<NodeId, AudioError> {
        if reverb.decay_secs <= 0.0 {
            return Err(AudioError::Engine(format!(
                "reverb decay must be positive, got {}",
                reverb.decay_secs
            )));
        }
        let node = self.add_node(NodeKind::Reverb);
        self.record(AudioCommand::CreateReverb {
            node,
            decay_secs: reverb.decay_secs,
            wet: reverb.wet,
        });
        Ok(node)
    }

    fn create_player(&mut self, source: &TrackSource, looping: bool) -> Result<NodeId, AudioError> {
        if self.failing.remove(&source.track) {
            return Err(AudioError::Load {
                track: source.track,
                reason: format!("could not decode {}", source.path.display()),
            });
        }
        let node = self.add_node(NodeKind::Player);
        self.record(AudioCommand::CreatePlayer {
            node,
            track: source.track,
            path: source.path.clone(),
            looping,
        });
        Ok(node)
    }

    fn connect(&mut self, from: NodeId, to: NodeId) -> Result<(), AudioError> {
        self.require(from)?;
        if self.require(to)? == NodeKind::Player {
            return Err(AudioError::Engine(format!("{to} is a player and has no input")));
        }
        self.edges.insert((from, Some(to)));
        self.record(AudioCommand::Connect { from, to: Some(to) });
        Ok(())
    }

    fn connect_to_destination(&mut self, node: NodeId) -> Result<(), AudioError> {
        self.require(node)?;
        self.edges.insert((node, None));
        self.record(AudioCommand::Connect { from: node, to: None });
        Ok(())
    }

    fn wait_until_loaded(&mut self) -> Result<(), AudioError> {
        self.record(AudioCommand::WaitUntilLoaded);
        Ok(())
    }

    fn now(&self) -> f64 {
        self.clock
    }

    fn start(&mut self, player: NodeId, at: f64) -> Result<(), AudioError> {
        if self.require(player)? != NodeKind::Player {
            return Err(AudioError::Engine(format!("{player} is not a player")));
        }
        self.record(AudioCommand::Start { player, at });
        Ok(())
    }

    fn stop(&mut self, player: NodeId) {
        self.write(player, &[NodeKind::Player], AudioCommand::Stop { player });
    }

    fn dispose(&mut self, node: NodeId) {
        if self.nodes.remove(&node).is_some() {
            self.edges.retain(|&(from, to)| from != node && to != Some(node));
            self.record(AudioCommand::Dispose { node });
        }
    }

    fn set_volume_db(&mut self, node: NodeId, level_db: f32, ramp: Option<Duration>) {
        let command = AudioCommand::SetVolume { node, level_db, ramp };
        self.write(node, &[NodeKind::Volume], command);
    }

    fn set_cutoff_hz(&mut self, node: NodeId, cutoff_hz: f32, ramp: Option<Duration>) {
        let command = AudioCommand::SetCutoff { node, cutoff_hz, ramp };
        self.write(node, &[NodeKind::Filter], command);
    }

    fn set_mute(&mut self, node: NodeId, muted: bool) {
        self.write(node, &[NodeKind::Volume], AudioCommand::SetMute { node, muted });
    }

    fn set_reverse(&mut self, player: NodeId, reverse: bool) {
        let command = AudioCommand::SetReverse { player, reverse };
        self.write(player, &[NodeKind::Player], command);
    }

    fn set_playback_rate(&mut self, player: NodeId, rate: f32) {
        let command = AudioCommand::SetPlaybackRate { player, rate };
        self.write(player, &[NodeKind::Player], command);
    }
}
