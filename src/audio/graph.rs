use std::{collections::BTreeMap, time::Duration};

use super::{AudioEngine, AudioError, NodeId, TrackRegistry};
use crate::{
    config::{FilterTarget, OPEN_FILTER_HZ, VariantConfig},
    types::TrackName,
};

#[derive(Clone, Debug, PartialEq)]
pub struct TrackChannel {
    /// `None` when no source was loaded for this track.
    pub player: Option<NodeId>,
    pub volume: NodeId,
    pub level_db: f32,
    pub muted: bool,
}

/// Nodes built for one session. Every track gets a volume node so zone
/// levels can be adjusted before a source exists; parameter writes whose
/// target node is missing are skipped.
#[derive(Debug, Default)]
pub struct AudioGraph {
    channels: BTreeMap<TrackName, TrackChannel>,
    filter: Option<NodeId>,
    cutoff_hz: f32,
    reverb: Option<NodeId>,
}

impl AudioGraph {
    pub fn build<E: AudioEngine + ?Sized>(
        engine: &mut E,
        variant: &VariantConfig,
        tracks: &TrackRegistry,
    ) -> Result<Self, AudioError> {
        let mut graph = AudioGraph {
            cutoff_hz: OPEN_FILTER_HZ,
            ..AudioGraph::default()
        };

        match graph.wire(engine, variant, tracks) {
            Ok(()) => Ok(graph),
            Err(err) => {
                graph.teardown(engine);
                Err(err)
            }
        }
    }

    fn wire<E: AudioEngine + ?Sized>(
        &mut self,
        engine: &mut E,
        variant: &VariantConfig,
        tracks: &TrackRegistry,
    ) -> Result<(), AudioError> {
        if let Some(reverb) = &variant.reverb {
            let node = engine.create_reverb(reverb)?;
            self.reverb = Some(node);
            engine.connect_to_destination(node)?;
        }

        let master_filter = matches!(
            variant.filter.map(|f| f.target),
            Some(FilterTarget::Master)
        );
        if let Some(filter) = &variant.filter {
            let node = engine.create_filter(OPEN_FILTER_HZ)?;
            self.filter = Some(node);
            if let FilterTarget::Master = filter.target {
                self.connect_out(engine, node)?;
            }
        }

        for track in TrackName::ALL {
            let level_db = variant.initial_level_db(track);
            let volume = engine.create_volume(level_db)?;
            self.channels.insert(
                track,
                TrackChannel {
                    player: None,
                    volume,
                    level_db,
                    muted: false,
                },
            );
            match self.filter {
                Some(filter) if master_filter => engine.connect(volume, filter)?,
                _ => self.connect_out(engine, volume)?,
            }
        }

        if let (Some(filter), Some(FilterTarget::Track(track))) =
            (self.filter, variant.filter.map(|f| f.target))
        {
            let volume = self.channels[&track].volume;
            engine.connect(filter, volume)?;
        }

        for source in tracks.iter() {
            let player = engine.create_player(source, true)?;
            let channel = self
                .channels
                .get_mut(&source.track)
                .ok_or_else(|| AudioError::Engine(format!("no channel for {}", source.track)))?;
            channel.player = Some(player);

            let through_filter = matches!(
                variant.filter.map(|f| f.target),
                Some(FilterTarget::Track(t)) if t == source.track
            );
            match self.filter {
                Some(filter) if through_filter => engine.connect(player, filter)?,
                _ => engine.connect(player, channel.volume)?,
            }
        }

        Ok(())
    }

    fn connect_out<E: AudioEngine + ?Sized>(
        &self,
        engine: &mut E,
        node: NodeId,
    ) -> Result<(), AudioError> {
        match self.reverb {
            Some(reverb) => engine.connect(node, reverb),
            None => engine.connect_to_destination(node),
        }
    }

    /// Waits for every source to decode, then starts all players on the
    /// same engine timestamp so the loops stay aligned.
    pub fn start_all<E: AudioEngine + ?Sized>(&self, engine: &mut E) -> Result<(), AudioError> {
        engine.wait_until_loaded()?;
        let at = engine.now();
        for player in self.players() {
            engine.start(player, at)?;
        }
        log::info!("started {} players at t={at:.3}s", self.players().count());
        Ok(())
    }

    pub fn players(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.channels.values().filter_map(|channel| channel.player)
    }

    pub fn channel(&self, track: TrackName) -> Option<&TrackChannel> {
        self.channels.get(&track)
    }

    pub fn level_db(&self, track: TrackName) -> Option<f32> {
        self.channels.get(&track).map(|channel| channel.level_db)
    }

    pub fn cutoff_hz(&self) -> Option<f32> {
        self.filter.map(|_| self.cutoff_hz)
    }

    pub fn has_filter(&self) -> bool {
        self.filter.is_some()
    }

    pub fn set_all_reverse<E: AudioEngine + ?Sized>(&self, engine: &mut E, reverse: bool) {
        for player in self.players() {
            engine.set_reverse(player, reverse);
        }
    }

    pub fn set_all_playback_rate<E: AudioEngine + ?Sized>(&self, engine: &mut E, rate: f32) {
        for player in self.players() {
            engine.set_playback_rate(player, rate);
        }
    }

    pub fn set_volume<E: AudioEngine + ?Sized>(
        &mut self,
        engine: &mut E,
        track: TrackName,
        level_db: f32,
    ) {
        let Some(channel) = self.channels.get_mut(&track) else {
            log::trace!("no volume node for {track}, skipping write");
            return;
        };
        channel.level_db = level_db;
        engine.set_volume_db(channel.volume, level_db, None);
    }

    pub fn set_cutoff<E: AudioEngine + ?Sized>(
        &mut self,
        engine: &mut E,
        cutoff_hz: f32,
        ramp: Option<Duration>,
    ) {
        let Some(filter) = self.filter else {
            log::trace!("no filter node, skipping cutoff write");
            return;
        };
        self.cutoff_hz = cutoff_hz;
        engine.set_cutoff_hz(filter, cutoff_hz, ramp);
    }

    /// Returns whether the mute state changed.
    pub fn set_muted<E: AudioEngine + ?Sized>(
        &mut self,
        engine: &mut E,
        track: TrackName,
        muted: bool,
    ) -> bool {
        let Some(channel) = self.channels.get_mut(&track) else {
            return false;
        };
        if channel.muted == muted {
            return false;
        }
        channel.muted = muted;
        engine.set_mute(channel.volume, muted);
        true
    }

    /// Stops and disposes every node. Safe to call on an empty graph.
    pub fn teardown<E: AudioEngine + ?Sized>(&mut self, engine: &mut E) {
        for channel in std::mem::take(&mut self.channels).into_values() {
            if let Some(player) = channel.player {
                engine.stop(player);
                engine.dispose(player);
            }
            engine.dispose(channel.volume);
        }
        if let Some(filter) = self.filter.take() {
            engine.dispose(filter);
        }
        if let Some(reverb) = self.reverb.take() {
            engine.dispose(reverb);
        }
        self.cutoff_hz = OPEN_FILTER_HZ;
    }
}
