use std::{collections::BTreeMap, fs, path::Path, str::FromStr, time::Duration};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::types::{TrackName, Zone};

pub const MIN_VOLUME_DB: f32 = -60.0;
pub const MAX_VOLUME_DB: f32 = 0.0;
pub const MIN_PLAYBACK_RATE: f32 = 0.0;
pub const MAX_PLAYBACK_RATE: f32 = 5.0;
pub const OPEN_FILTER_HZ: f32 = 20_000.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariantKind {
    Mixer,
    Turntable,
    Rotation,
    Velocity,
}

impl VariantKind {
    pub const ALL: [VariantKind; 4] = [
        VariantKind::Mixer,
        VariantKind::Turntable,
        VariantKind::Rotation,
        VariantKind::Velocity,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            VariantKind::Mixer => "mixer",
            VariantKind::Turntable => "turntable",
            VariantKind::Rotation => "rotation",
            VariantKind::Velocity => "velocity",
        }
    }
}

impl FromStr for VariantKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        VariantKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| anyhow!("unknown variant {s:?} (expected mixer, turntable, rotation or velocity)"))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FistRule {
    /// Number of curled non-thumb fingers needed (out of 4).
    pub min_curled: usize,
    /// Also require the thumb to be folded across the palm.
    pub require_thumb: bool,
}

impl FistRule {
    pub const STRICT: FistRule = FistRule {
        min_curled: 4,
        require_thumb: true,
    };
    pub const RELAXED: FistRule = FistRule {
        min_curled: 3,
        require_thumb: false,
    };
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScratchTrigger {
    BothFists,
    PrimaryFist,
}

/// What playback does while the scratch pose is held but the hand is not swiping.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdlePlayback {
    Forward,
    Freeze,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScratchConfig {
    pub trigger: ScratchTrigger,
    pub dead_zone: f32,
    pub speed_scale: f32,
    pub max_speed: f32,
    pub idle: IdlePlayback,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct VolumeConfig {
    /// Decibels per unit of normalized vertical wrist travel.
    pub scale_db: f32,
    pub dead_zone: f32,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum FilterControl {
    /// Thumb tip vs pinky base horizontal offset.
    PalmOrientation {
        offset_min: f32,
        offset_max: f32,
        min_hz: f32,
        max_hz: f32,
    },
    /// Palm plane rotation, 0..180 degrees.
    WristRotation { min_hz: f32, max_hz: f32 },
    /// Mirrored-left wrist speed, smoothed.
    WristVelocity {
        ceiling: f32,
        min_hz: f32,
        max_hz: f32,
        attack: f32,
        release: f32,
        initial_hz: f32,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterTarget {
    /// A low-pass inserted on one track only.
    Track(TrackName),
    /// One low-pass shared by every track.
    Master,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FilterConfig {
    pub control: FilterControl,
    pub target: FilterTarget,
    #[serde(default)]
    pub ramp_ms: u64,
}

impl FilterConfig {
    pub fn ramp(&self) -> Option<Duration> {
        (self.ramp_ms > 0).then(|| Duration::from_millis(self.ramp_ms))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReverbConfig {
    pub decay_secs: f32,
    pub wet: f32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VariantConfig {
    pub kind: VariantKind,
    pub fist: FistRule,
    #[serde(default)]
    pub scratch: Option<ScratchConfig>,
    #[serde(default)]
    pub zones: Vec<Zone>,
    pub volume: VolumeConfig,
    #[serde(default)]
    pub filter: Option<FilterConfig>,
    #[serde(default)]
    pub drum_mute: bool,
    #[serde(default)]
    pub reverb: Option<ReverbConfig>,
    /// Starting level per track; tracks not listed start at 0 dB.
    #[serde(default)]
    pub initial_levels: BTreeMap<TrackName, f32>,
}

impl VariantConfig {
    pub fn preset(kind: VariantKind) -> Self {
        match kind {
            VariantKind::Mixer => Self::mixer(),
            VariantKind::Turntable => Self::turntable(),
            VariantKind::Rotation => Self::rotation(),
            VariantKind::Velocity => Self::velocity(),
        }
    }

    pub fn from_json_path(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read variant config {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("invalid variant config {}", path.display()))
    }

    pub fn initial_level_db(&self, track: TrackName) -> f32 {
        self.initial_levels
            .get(&track)
            .copied()
            .unwrap_or(MAX_VOLUME_DB)
            .clamp(MIN_VOLUME_DB, MAX_VOLUME_DB)
    }

    fn mixer() -> Self {
        let initial_levels = TrackName::ALL
            .into_iter()
            .map(|track| match track {
                TrackName::Pad => (track, -10.0),
                _ => (track, MIN_VOLUME_DB),
            })
            .collect();

        Self {
            kind: VariantKind::Mixer,
            fist: FistRule::STRICT,
            scratch: Some(ScratchConfig {
                trigger: ScratchTrigger::BothFists,
                dead_zone: 0.005,
                speed_scale: 80.0,
                max_speed: 5.0,
                idle: IdlePlayback::Forward,
            }),
            zones: default_zones(),
            volume: DEFAULT_VOLUME,
            filter: Some(FilterConfig {
                control: FilterControl::PalmOrientation {
                    offset_min: -0.15,
                    offset_max: 0.15,
                    min_hz: 200.0,
                    max_hz: 20_000.0,
                },
                target: FilterTarget::Track(TrackName::Melody),
                ramp_ms: 0,
            }),
            drum_mute: false,
            reverb: None,
            initial_levels,
        }
    }

    fn turntable() -> Self {
        Self {
            kind: VariantKind::Turntable,
            fist: FistRule::RELAXED,
            scratch: Some(ScratchConfig {
                trigger: ScratchTrigger::PrimaryFist,
                dead_zone: 0.01,
                speed_scale: 60.0,
                max_speed: 4.0,
                idle: IdlePlayback::Freeze,
            }),
            zones: Vec::new(),
            volume: DEFAULT_VOLUME,
            filter: None,
            drum_mute: false,
            reverb: None,
            initial_levels: BTreeMap::new(),
        }
    }

    fn rotation() -> Self {
        let initial_levels = TrackName::ALL
            .into_iter()
            .map(|track| (track, -12.0))
            .collect();

        Self {
            kind: VariantKind::Rotation,
            fist: FistRule::RELAXED,
            scratch: None,
            zones: default_zones(),
            volume: DEFAULT_VOLUME,
            filter: Some(FilterConfig {
                control: FilterControl::WristRotation {
                    min_hz: 100.0,
                    max_hz: 8_000.0,
                },
                target: FilterTarget::Master,
                ramp_ms: 50,
            }),
            drum_mute: false,
            reverb: None,
            initial_levels,
        }
    }

    fn velocity() -> Self {
        Self {
            kind: VariantKind::Velocity,
            fist: FistRule::RELAXED,
            scratch: None,
            zones: Vec::new(),
            volume: DEFAULT_VOLUME,
            filter: Some(FilterConfig {
                control: FilterControl::WristVelocity {
                    ceiling: 2.0,
                    min_hz: 150.0,
                    max_hz: 12_000.0,
                    attack: 0.5,
                    release: 0.25,
                    initial_hz: 150.0,
                },
                target: FilterTarget::Master,
                ramp_ms: 0,
            }),
            drum_mute: true,
            reverb: Some(ReverbConfig {
                decay_secs: 2.5,
                wet: 0.3,
            }),
            initial_levels: BTreeMap::new(),
        }
    }
}

const DEFAULT_VOLUME: VolumeConfig = VolumeConfig {
    scale_db: 200.0,
    dead_zone: 0.005,
};

/// Four small boxes in a row near the top of the frame. The preview is
/// mirrored, so they appear top-left on screen.
pub fn default_zones() -> Vec<Zone> {
    [
        (TrackName::Drum, 0.64, [0xff, 0x44, 0x44]),
        (TrackName::Bass, 0.73, [0x44, 0xff, 0x44]),
        (TrackName::Melody, 0.82, [0x44, 0x44, 0xff]),
        (TrackName::Perc, 0.91, [0xff, 0xff, 0x44]),
    ]
    .into_iter()
    .map(|(track, x, color)| Zone {
        track,
        x,
        y: 0.05,
        w: 0.08,
        h: 0.12,
        color,
    })
    .collect()
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CaptureRequest {
    pub width: u32,
    pub height: u32,
}

impl Default for CaptureRequest {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectorConfig {
    pub max_hands: usize,
    pub min_detection_confidence: f32,
    pub min_tracking_confidence: f32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            max_hands: 2,
            min_detection_confidence: 0.5,
            min_tracking_confidence: 0.5,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SessionConfig {
    pub variant: VariantConfig,
    pub capture: CaptureRequest,
    pub detector: DetectorConfig,
}

impl SessionConfig {
    pub fn new(variant: VariantConfig) -> Self {
        Self {
            variant,
            capture: CaptureRequest::default(),
            detector: DetectorConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variant_names_parse() {
        assert_eq!("Turntable".parse::<VariantKind>().unwrap(), VariantKind::Turntable);
        assert!("disco".parse::<VariantKind>().is_err());
    }

    #[test]
    fn variants_keep_their_own_constants() {
        let mixer = VariantConfig::preset(VariantKind::Mixer);
        let turntable = VariantConfig::preset(VariantKind::Turntable);

        assert_eq!(mixer.fist, FistRule::STRICT);
        assert_eq!(turntable.fist, FistRule::RELAXED);

        let (a, b) = (mixer.scratch.unwrap(), turntable.scratch.unwrap());
        assert_eq!((a.dead_zone, a.max_speed, a.idle), (0.005, 5.0, IdlePlayback::Forward));
        assert_eq!((b.dead_zone, b.max_speed, b.idle), (0.01, 4.0, IdlePlayback::Freeze));
    }

    #[test]
    fn mixer_levels_start_silent_except_pad() {
        let mixer = VariantConfig::preset(VariantKind::Mixer);
        assert_eq!(mixer.initial_level_db(TrackName::Drum), -60.0);
        assert_eq!(mixer.initial_level_db(TrackName::Pad), -10.0);

        let turntable = VariantConfig::preset(VariantKind::Turntable);
        assert_eq!(turntable.initial_level_db(TrackName::Bass), 0.0);
    }

    #[test]
    fn rotation_and_velocity_levels() {
        let rotation = VariantConfig::preset(VariantKind::Rotation);
        for track in TrackName::ALL {
            assert_eq!(rotation.initial_level_db(track), -12.0);
        }
        let velocity = VariantConfig::preset(VariantKind::Velocity);
        assert_eq!(velocity.initial_level_db(TrackName::Drum), 0.0);
        assert!(velocity.zones.is_empty());
    }

    #[test]
    fn presets_survive_json() {
        for kind in VariantKind::ALL {
            let preset = VariantConfig::preset(kind);
            let json = serde_json::to_string(&preset).unwrap();
            let parsed: VariantConfig = serde_json::from_str(&json).unwrap();
            assert_eq!(parsed, preset);
        }
    }

    #[test]
    fn default_zones_do_not_overlap() {
        let zones = default_zones();
        for pair in zones.windows(2) {
            assert!(pair[0].x + pair[0].w < pair[1].x);
        }
    }
}
