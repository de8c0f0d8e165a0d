use std::{fmt, path::Path, time::Instant};

use crossbeam_channel::{Receiver, bounded};
use thiserror::Error;

use crate::{
    audio::{AudioEngine, AudioError, AudioGraph, TrackRegistry},
    config::{FilterControl, MIN_VOLUME_DB, ScratchTrigger, SessionConfig, VariantConfig},
    gesture::{self, WristVelocity},
    mapping::{self, FrequencySmoother, ScratchController, ScratchOutput, ScratchStatus},
    overlay::ZoneOverlay,
    pipeline::{CaptureStream, FrameSource, recv_latest_frame},
    types::{DetectedHand, Frame, HandPair, TrackName},
};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("camera unavailable: {0:#}")]
    CameraUnavailable(anyhow::Error),
    #[error("no track loaded; load at least one track before starting")]
    NoTracksLoaded,
    #[error("session already running")]
    AlreadyRunning,
    #[error(transparent)]
    Audio(#[from] AudioError),
}

/// Values carried from one frame to the next. Replaced wholesale when a
/// session stops so a restart never sees stale gestures.
#[derive(Debug)]
pub struct GestureState {
    pub scratch: ScratchController,
    pub previous_volume_y: Option<f32>,
    pub velocity: WristVelocity,
    pub smoother: Option<FrequencySmoother>,
    pub active_zone: Option<TrackName>,
}

impl GestureState {
    pub fn new(variant: &VariantConfig) -> Self {
        let smoother = variant.filter.and_then(|filter| match filter.control {
            FilterControl::WristVelocity {
                attack,
                release,
                initial_hz,
                ..
            } => Some(FrequencySmoother::new(initial_hz, attack, release)),
            _ => None,
        });

        Self {
            scratch: ScratchController::new(),
            previous_volume_y: None,
            velocity: WristVelocity::new(),
            smoother,
            active_zone: None,
        }
    }

    /// True when nothing has been carried over from a previous frame.
    pub fn is_initial(&self, variant: &VariantConfig) -> bool {
        let fresh = GestureState::new(variant);
        !self.scratch.is_engaged()
            && self.scratch.previous_x().is_none()
            && self.previous_volume_y.is_none()
            && !self.velocity.is_tracking()
            && self.active_zone.is_none()
            && self.smoother.as_ref().map(FrequencySmoother::value)
                == fresh.smoother.as_ref().map(FrequencySmoother::value)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ControlEvent {
    DrumMuted(bool),
    ScratchReady,
    Reversing { speed: f32 },
    Frozen,
    ScratchReleased,
    Volume { track: TrackName, level_db: f32 },
    Filter { cutoff_hz: f32 },
    /// No hand is doing anything useful.
    Prompt,
}

impl fmt::Display for ControlEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlEvent::DrumMuted(true) => write!(f, "🥁 muted"),
            ControlEvent::DrumMuted(false) => write!(f, "🥁 unmuted"),
            ControlEvent::ScratchReady => write!(f, "🤛 scratch ready (swipe control hand left)"),
            ControlEvent::Reversing { speed } => write!(f, "🎧 reverse ⏪ {speed:.1}x"),
            ControlEvent::Frozen => write!(f, "⏸️ frozen"),
            ControlEvent::ScratchReleased => write!(f, "▶️ forward playback"),
            ControlEvent::Volume { track, level_db } => write!(
                f,
                "{} volume: {}%",
                track.emoji(),
                mapping::volume_percent(*level_db)
            ),
            ControlEvent::Filter { cutoff_hz } => write!(f, "🎹 filter: {cutoff_hz:.0} Hz"),
            ControlEvent::Prompt => write!(f, "move a finger to a zone"),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct FrameReport {
    pub active_zone: Option<TrackName>,
    pub primary_fist: bool,
    pub secondary_fist: bool,
    pub events: Vec<ControlEvent>,
}

pub struct SessionController<E: AudioEngine> {
    engine: E,
    config: SessionConfig,
    tracks: TrackRegistry,
    graph: Option<AudioGraph>,
    state: GestureState,
    capture: Option<CaptureStream>,
    frames: Option<Receiver<Frame>>,
}

impl<E: AudioEngine> SessionController<E> {
    pub fn new(engine: E, config: SessionConfig) -> Self {
        let state = GestureState::new(&config.variant);
        Self {
            engine,
            config,
            tracks: TrackRegistry::new(),
            graph: None,
            state,
            capture: None,
            frames: None,
        }
    }

    pub fn load_track(&mut self, track: TrackName, path: impl AsRef<Path>) {
        self.tracks.load(track, path);
    }

    pub fn can_start(&self) -> bool {
        !self.is_playing() && self.tracks.has_any()
    }

    pub fn is_playing(&self) -> bool {
        self.graph.is_some()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn variant(&self) -> &VariantConfig {
        &self.config.variant
    }

    pub fn state(&self) -> &GestureState {
        &self.state
    }

    pub fn graph(&self) -> Option<&AudioGraph> {
        self.graph.as_ref()
    }

    pub fn tracks(&self) -> &TrackRegistry {
        &self.tracks
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    /// Builds the audio graph, starts every player together, then opens the
    /// frame source. Any failure leaves the session stopped.
    pub fn start(&mut self, source: &mut dyn FrameSource) -> Result<(), SessionError> {
        if self.is_playing() {
            return Err(SessionError::AlreadyRunning);
        }
        if !self.tracks.has_any() {
            return Err(SessionError::NoTracksLoaded);
        }

        let mut graph = AudioGraph::build(&mut self.engine, &self.config.variant, &self.tracks)?;
        if let Err(err) = graph.start_all(&mut self.engine) {
            graph.teardown(&mut self.engine);
            return Err(err.into());
        }

        let (frame_tx, frame_rx) = bounded(1);
        let capture = match source.start(self.config.capture, frame_tx) {
            Ok(capture) => capture,
            Err(err) => {
                log::error!("failed to open frame source: {err:?}");
                graph.teardown(&mut self.engine);
                return Err(SessionError::CameraUnavailable(err));
            }
        };

        self.state = GestureState::new(&self.config.variant);
        self.graph = Some(graph);
        self.capture = Some(capture);
        self.frames = Some(frame_rx);
        log::info!(
            "{} session started with {} track(s)",
            self.config.variant.kind.as_str(),
            self.tracks.iter().count()
        );
        Ok(())
    }

    /// Blocks for the next frame. Live sources skip any backlog. `None` once
    /// the session is stopped or the source has ended.
    pub fn next_frame(&self) -> Option<Frame> {
        let frames = self.frames.as_ref()?;
        match &self.capture {
            Some(capture) if capture.keeps_every_frame() => frames.recv().ok(),
            _ => recv_latest_frame(frames),
        }
    }

    /// Halts capture, releases every audio node and loaded source, and
    /// resets carried-over gesture state. Safe to call when not running.
    pub fn stop(&mut self) {
        // Disconnect first so a source blocked on a full channel can exit.
        self.frames = None;
        if let Some(capture) = self.capture.take() {
            capture.stop();
        }

        let was_playing = self.graph.is_some();
        if let Some(mut graph) = self.graph.take() {
            graph.teardown(&mut self.engine);
        }
        let released = self.tracks.release_all();
        self.state = GestureState::new(&self.config.variant);

        if was_playing {
            log::info!("session stopped, released {} source(s)", released.len());
        }
    }

    pub fn zone_overlay(&self) -> Option<ZoneOverlay<'_>> {
        let graph = self.graph.as_ref()?;
        Some(ZoneOverlay {
            zones: &self.config.variant.zones,
            active: self.state.active_zone,
            graph,
        })
    }

    /// Interprets one frame of detections and writes the resulting audio
    /// parameters. Order: drum mute, scratch, zone volume, filter. Scratch
    /// and zone volume each claim the frame and skip the later checks.
    pub fn on_hands(&mut self, hands: &[DetectedHand], now: Instant) -> FrameReport {
        let variant = &self.config.variant;
        let pair = HandPair::resolve(hands);
        let primary_fist = pair.primary.is_some_and(|hand| gesture::is_fist(hand, variant.fist));
        let secondary_fist = pair
            .secondary
            .is_some_and(|hand| gesture::is_fist(hand, variant.fist));
        let active_zone = pair
            .secondary
            .and_then(|hand| gesture::zone_at(hand.index_tip(), &variant.zones));

        let mut report = FrameReport {
            active_zone,
            primary_fist,
            secondary_fist,
            events: Vec::new(),
        };

        let Some(graph) = self.graph.as_mut() else {
            return report;
        };
        let engine = &mut self.engine;
        let state = &mut self.state;
        state.active_zone = active_zone;

        if variant.drum_mute && graph.set_muted(engine, TrackName::Drum, secondary_fist) {
            report.events.push(ControlEvent::DrumMuted(secondary_fist));
        }

        if let Some(scratch) = &variant.scratch {
            let pose_held = match scratch.trigger {
                ScratchTrigger::BothFists => primary_fist && secondary_fist,
                ScratchTrigger::PrimaryFist => primary_fist,
            };
            match pair.primary {
                Some(hand) if pose_held => {
                    let out = state.scratch.update(hand.wrist().x, scratch);
                    apply_scratch(graph, engine, &out);
                    report.events.push(match out.status {
                        ScratchStatus::Reversing(speed) => ControlEvent::Reversing { speed },
                        ScratchStatus::Frozen => ControlEvent::Frozen,
                        _ => ControlEvent::ScratchReady,
                    });
                    state.previous_volume_y = None;
                    state.velocity.reset();
                    log_events(&report);
                    return report;
                }
                _ => {
                    let out = state.scratch.release();
                    apply_scratch(graph, engine, &out);
                    if out.set_reverse.is_some() {
                        report.events.push(ControlEvent::ScratchReleased);
                    }
                }
            }
        }

        if let (Some(track), Some(hand)) = (active_zone, pair.primary) {
            let y = hand.wrist().y;
            if let Some(prev) = state.previous_volume_y.replace(y) {
                let current = graph.level_db(track).unwrap_or(MIN_VOLUME_DB);
                if let Some(level_db) = mapping::volume_step(current, y - prev, &variant.volume) {
                    graph.set_volume(engine, track, level_db);
                    report.events.push(ControlEvent::Volume { track, level_db });
                }
            }
            state.velocity.reset();
            log_events(&report);
            return report;
        }
        state.previous_volume_y = None;

        match (variant.filter, pair.primary) {
            (Some(filter), Some(hand)) => {
                let cutoff_hz = match filter.control {
                    FilterControl::PalmOrientation {
                        offset_min,
                        offset_max,
                        min_hz,
                        max_hz,
                    } => mapping::palm_to_cutoff(
                        gesture::palm_orientation(hand),
                        offset_min,
                        offset_max,
                        min_hz,
                        max_hz,
                    ),
                    FilterControl::WristRotation { min_hz, max_hz } => mapping::angle_to_frequency(
                        gesture::wrist_rotation_degrees(hand),
                        min_hz,
                        max_hz,
                    ),
                    FilterControl::WristVelocity {
                        ceiling,
                        min_hz,
                        max_hz,
                        initial_hz,
                        attack,
                        release,
                    } => {
                        let velocity = state.velocity.update(hand.wrist().x, now);
                        let target = mapping::velocity_to_frequency(velocity, ceiling, min_hz, max_hz);
                        state
                            .smoother
                            .get_or_insert_with(|| FrequencySmoother::new(initial_hz, attack, release))
                            .step(target)
                    }
                };
                if graph.has_filter() {
                    graph.set_cutoff(engine, cutoff_hz, filter.ramp());
                    report.events.push(ControlEvent::Filter { cutoff_hz });
                }
            }
            _ => state.velocity.reset(),
        }

        if pair.primary.is_none() && active_zone.is_none() && !variant.zones.is_empty() {
            report.events.push(ControlEvent::Prompt);
        }

        log_events(&report);
        report
    }
}

impl<E: AudioEngine> Drop for SessionController<E> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn apply_scratch<E: AudioEngine + ?Sized>(graph: &AudioGraph, engine: &mut E, out: &ScratchOutput) {
    if let Some(reverse) = out.set_reverse {
        graph.set_all_reverse(engine, reverse);
    }
    if let Some(rate) = out.rate {
        graph.set_all_playback_rate(engine, rate);
    }
}

fn log_events(report: &FrameReport) {
    for event in &report.events {
        log::debug!("{event}");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        audio::{AudioCommand, RecordingEngine},
        config::{VariantKind, default_zones},
        gesture::tests::{fist, open_hand},
        pipeline::tests::{FailingSource, IdleSource},
        types::{HandLandmarks, Handedness, INDEX_TIP, Landmark, WRIST},
    };

    fn session(kind: VariantKind) -> SessionController<RecordingEngine> {
        let mut session = SessionController::new(
            RecordingEngine::new(),
            SessionConfig::new(VariantConfig::preset(kind)),
        );
        session.load_track(TrackName::Drum, "drum.wav");
        session.load_track(TrackName::Melody, "melody.wav");
        session
    }

    fn started(kind: VariantKind) -> SessionController<RecordingEngine> {
        let mut session = session(kind);
        session.start(&mut IdleSource).unwrap();
        session.engine_mut().clear_log();
        session
    }

    fn shifted(hand: &HandLandmarks, dx: f32, dy: f32) -> HandLandmarks {
        let points = (*hand.points()).map(|p| Landmark::new(p.x + dx, p.y + dy, p.z));
        HandLandmarks::new(points)
    }

    fn control(landmarks: HandLandmarks) -> DetectedHand {
        DetectedHand {
            landmarks,
            handedness: Handedness::Left,
            score: 0.9,
        }
    }

    fn pointer(landmarks: HandLandmarks) -> DetectedHand {
        DetectedHand {
            landmarks,
            handedness: Handedness::Right,
            score: 0.9,
        }
    }

    fn pointing_at(track: TrackName) -> HandLandmarks {
        let zone = default_zones()
            .into_iter()
            .find(|zone| zone.track == track)
            .unwrap();
        let mut points = *open_hand().points();
        points[INDEX_TIP] = Landmark::new(zone.x + zone.w / 2.0, zone.y + zone.h / 2.0, 0.0);
        HandLandmarks::new(points)
    }

    fn reverse_writes(engine: &RecordingEngine) -> Vec<bool> {
        engine
            .commands()
            .iter()
            .filter_map(|cmd| match cmd {
                AudioCommand::SetReverse { reverse, .. } => Some(*reverse),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn start_requires_a_loaded_track() {
        let mut session = SessionController::new(
            RecordingEngine::new(),
            SessionConfig::new(VariantConfig::preset(VariantKind::Mixer)),
        );
        assert!(!session.can_start());
        assert!(matches!(
            session.start(&mut IdleSource),
            Err(SessionError::NoTracksLoaded)
        ));
        assert!(!session.is_playing());
    }

    #[test]
    fn camera_failure_leaves_session_stopped() {
        let mut session = session(VariantKind::Mixer);
        let err = session.start(&mut FailingSource).unwrap_err();
        assert!(matches!(err, SessionError::CameraUnavailable(_)));
        assert!(!session.is_playing());
        assert_eq!(session.engine().live_nodes(), 0);
        assert!(session.can_start());
    }

    #[test]
    fn start_twice_is_rejected() {
        let mut session = started(VariantKind::Mixer);
        assert!(matches!(
            session.start(&mut IdleSource),
            Err(SessionError::AlreadyRunning)
        ));
    }

    #[test]
    fn players_start_together_after_loading() {
        let mut session = session(VariantKind::Mixer);
        session.engine_mut().advance(Duration::from_millis(250));
        session.start(&mut IdleSource).unwrap();

        let commands = session.engine().commands();
        let wait = commands
            .iter()
            .position(|cmd| *cmd == AudioCommand::WaitUntilLoaded)
            .unwrap();
        let starts: Vec<(usize, f64)> = commands
            .iter()
            .enumerate()
            .filter_map(|(i, cmd)| match cmd {
                AudioCommand::Start { at, .. } => Some((i, *at)),
                _ => None,
            })
            .collect();
        assert_eq!(starts.len(), 2);
        assert!(starts.iter().all(|&(i, at)| i > wait && at == 0.25));
    }

    #[test]
    fn double_fist_swipe_reverses_once() {
        let mut session = started(VariantKind::Mixer);
        let now = Instant::now();
        let base = fist();

        for step in 0..5 {
            let moved = shifted(&base, step as f32 * 0.02, 0.0);
            let report = session.on_hands(&[control(moved), pointer(fist())], now);
            assert!(report.primary_fist && report.secondary_fist);
        }

        // One write per loaded player, on the transition only.
        assert_eq!(reverse_writes(session.engine()), vec![true, true]);
        assert!(session.state().scratch.is_engaged());
    }

    #[test]
    fn releasing_the_fists_restores_forward_playback() {
        let mut session = started(VariantKind::Mixer);
        let now = Instant::now();
        session.on_hands(&[control(fist()), pointer(fist())], now);
        session.on_hands(&[control(shifted(&fist(), 0.05, 0.0)), pointer(fist())], now);

        let report = session.on_hands(&[control(open_hand())], now);
        assert!(report.events.contains(&ControlEvent::ScratchReleased));
        assert_eq!(reverse_writes(session.engine()), vec![true, true, false, false]);
        assert_eq!(session.state().scratch.previous_x(), None);
    }

    #[test]
    fn zone_volume_follows_vertical_motion() {
        let mut session = started(VariantKind::Mixer);
        let now = Instant::now();
        let pointer_hand = pointer(pointing_at(TrackName::Drum));
        let base = open_hand();

        let first = session.on_hands(&[control(base.clone()), pointer_hand.clone()], now);
        assert_eq!(first.active_zone, Some(TrackName::Drum));
        assert!(first.events.is_empty());

        let report = session.on_hands(&[control(shifted(&base, 0.0, -0.05)), pointer_hand], now);
        let level = session.graph().unwrap().level_db(TrackName::Drum).unwrap();
        assert!((level - -50.0).abs() < 1e-3);
        assert!(matches!(
            report.events.as_slice(),
            [ControlEvent::Volume { track: TrackName::Drum, .. }]
        ));
    }

    #[test]
    fn zone_volume_stays_clamped() {
        let mut session = started(VariantKind::Mixer);
        let now = Instant::now();
        let pointer_hand = pointer(pointing_at(TrackName::Bass));

        for step in 0..30 {
            let y = -(step as f32) * 0.04;
            session.on_hands(&[control(shifted(&open_hand(), 0.0, y)), pointer_hand.clone()], now);
            let level = session.graph().unwrap().level_db(TrackName::Bass).unwrap();
            assert!((-60.0..=0.0).contains(&level));
        }
        assert_eq!(session.graph().unwrap().level_db(TrackName::Bass), Some(0.0));
    }

    #[test]
    fn leaving_the_zone_forgets_vertical_position() {
        let mut session = started(VariantKind::Mixer);
        let now = Instant::now();
        session.on_hands(&[control(open_hand()), pointer(pointing_at(TrackName::Melody))], now);
        assert!(session.state().previous_volume_y.is_some());

        session.on_hands(&[control(open_hand()), pointer(open_hand())], now);
        assert!(session.state().previous_volume_y.is_none());
    }

    #[test]
    fn palm_orientation_drives_melody_filter() {
        let mut session = started(VariantKind::Mixer);
        let report = session.on_hands(&[control(open_hand())], Instant::now());

        let Some(ControlEvent::Filter { cutoff_hz }) = report.events.first().copied() else {
            panic!("expected a filter event, got {:?}", report.events);
        };
        assert_eq!(cutoff_hz, 200.0);
        assert_eq!(session.graph().unwrap().cutoff_hz(), Some(200.0));
    }

    #[test]
    fn turntable_freezes_then_resumes() {
        let mut session = started(VariantKind::Turntable);
        let now = Instant::now();
        let relaxed_fist = crate::gesture::tests::hand_with_curled(3, false);

        session.on_hands(&[control(relaxed_fist.clone())], now);
        let report = session.on_hands(&[control(relaxed_fist)], now);
        assert_eq!(report.events, vec![ControlEvent::Frozen]);

        session.on_hands(&[control(open_hand())], now);
        let rates: Vec<f32> = session
            .engine()
            .commands()
            .iter()
            .filter_map(|cmd| match cmd {
                AudioCommand::SetPlaybackRate { rate, .. } => Some(*rate),
                _ => None,
            })
            .collect();
        assert_eq!(rates, vec![0.0, 0.0, 1.0, 1.0]);
    }

    #[test]
    fn velocity_variant_smooths_and_mutes_drums() {
        let mut session = started(VariantKind::Velocity);
        let start = Instant::now();
        let base = open_hand();

        session.on_hands(&[control(base.clone())], start);
        let report = session.on_hands(
            &[control(shifted(&base, 0.2, 0.0)), pointer(fist())],
            start + Duration::from_millis(100),
        );

        assert_eq!(report.events[0], ControlEvent::DrumMuted(true));
        let Some(ControlEvent::Filter { cutoff_hz }) = report.events.get(1).copied() else {
            panic!("expected a filter event, got {:?}", report.events);
        };
        // Saturated target 12 kHz, half-way from 150 Hz.
        assert!((cutoff_hz - 6_075.0).abs() < 1e-2);

        let report = session.on_hands(&[control(base)], start + Duration::from_millis(200));
        assert_eq!(report.events[0], ControlEvent::DrumMuted(false));
    }

    #[test]
    fn rotation_variant_ramps_the_master_filter() {
        let mut session = started(VariantKind::Rotation);
        session.on_hands(&[control(open_hand())], Instant::now());

        let ramp = session.engine().commands().iter().find_map(|cmd| match cmd {
            AudioCommand::SetCutoff { ramp, .. } => Some(*ramp),
            _ => None,
        });
        assert_eq!(ramp, Some(Some(Duration::from_millis(50))));
    }

    #[test]
    fn idle_session_ignores_gestures() {
        let mut session = session(VariantKind::Mixer);
        let report = session.on_hands(&[control(fist()), pointer(pointing_at(TrackName::Drum))], Instant::now());
        assert!(report.events.is_empty());
        assert_eq!(report.active_zone, Some(TrackName::Drum));
        assert!(session.engine().commands().is_empty());
        assert!(session.state().is_initial(session.variant()));
    }

    #[test]
    fn stop_without_session_is_harmless() {
        let mut session = session(VariantKind::Velocity);
        session.stop();
        session.stop();
        assert!(session.state().is_initial(session.variant()));
        assert!(!session.tracks().has_any());
    }

    #[test]
    fn stop_resets_carried_state() {
        let mut session = started(VariantKind::Mixer);
        let now = Instant::now();
        session.on_hands(&[control(fist()), pointer(fist())], now);
        session.on_hands(&[control(shifted(&fist(), 0.05, 0.0)), pointer(fist())], now);
        assert!(!session.state().is_initial(session.variant()));

        session.stop();
        assert!(session.state().is_initial(session.variant()));
        assert_eq!(session.engine().live_nodes(), 0);
        assert!(!session.can_start());
        assert!(session.next_frame().is_none());
    }

    #[test]
    fn wrist_landmark_drives_scratch_position() {
        let mut session = started(VariantKind::Mixer);
        let hand = fist();
        session.on_hands(&[control(hand.clone()), pointer(fist())], Instant::now());
        assert_eq!(session.state().scratch.previous_x(), Some(hand.point(WRIST).x));
    }
}
