use std::{fmt, time::Instant};

use serde::{Deserialize, Serialize};

pub const NUM_LANDMARKS: usize = 21;

pub const WRIST: usize = 0;
pub const THUMB_MCP: usize = 2;
pub const THUMB_IP: usize = 3;
pub const THUMB_TIP: usize = 4;
pub const INDEX_MCP: usize = 5;
pub const INDEX_TIP: usize = 8;
pub const MIDDLE_MCP: usize = 9;
pub const MIDDLE_TIP: usize = 12;
pub const RING_MCP: usize = 13;
pub const RING_TIP: usize = 16;
pub const PINKY_MCP: usize = 17;
pub const PINKY_TIP: usize = 20;

/// Tip/base pairs of the four non-thumb fingers.
pub const FINGER_TIPS_AND_BASES: [(usize, usize); 4] = [
    (INDEX_TIP, INDEX_MCP),
    (MIDDLE_TIP, MIDDLE_MCP),
    (RING_TIP, RING_MCP),
    (PINKY_TIP, PINKY_MCP),
];

#[derive(Clone, Debug)]
pub struct Frame {
    pub rgba: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub sequence: u64,
    pub timestamp: Instant,
}

impl Frame {
    pub fn blank(width: u32, height: u32, sequence: u64, timestamp: Instant) -> Self {
        Self {
            rgba: vec![0; (width as usize) * (height as usize) * 4],
            width,
            height,
            sequence,
            timestamp,
        }
    }
}

/// A landmark in normalized frame coordinates (x and y in [0, 1]).
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    #[serde(default)]
    pub z: f32,
}

impl Landmark {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn sub(self, other: Landmark) -> [f32; 3] {
        [self.x - other.x, self.y - other.y, self.z - other.z]
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct HandLandmarks {
    points: [Landmark; NUM_LANDMARKS],
}

impl HandLandmarks {
    pub fn new(points: [Landmark; NUM_LANDMARKS]) -> Self {
        Self { points }
    }

    /// Returns `None` unless exactly 21 points are supplied.
    pub fn from_slice(points: &[Landmark]) -> Option<Self> {
        let points: [Landmark; NUM_LANDMARKS] = points.try_into().ok()?;
        Some(Self { points })
    }

    pub fn point(&self, idx: usize) -> Landmark {
        self.points[idx]
    }

    pub fn points(&self) -> &[Landmark; NUM_LANDMARKS] {
        &self.points
    }

    pub fn wrist(&self) -> Landmark {
        self.points[WRIST]
    }

    pub fn index_tip(&self) -> Landmark {
        self.points[INDEX_TIP]
    }
}

/// Handedness as reported by the detector, before mirroring is accounted for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Handedness {
    Left,
    Right,
}

impl Handedness {
    /// The preview is mirrored, so the detector's "Left" is the user's right
    /// hand, which drives scratch, volume and filter gestures.
    pub fn role(&self) -> HandRole {
        match self {
            Handedness::Left => HandRole::Primary,
            Handedness::Right => HandRole::Secondary,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandRole {
    /// Control hand: swipes, vertical volume motion, filter gestures.
    Primary,
    /// Pointer hand: zone selection and drum mute.
    Secondary,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DetectedHand {
    pub landmarks: HandLandmarks,
    pub handedness: Handedness,
    pub score: f32,
}

impl DetectedHand {
    pub fn role(&self) -> HandRole {
        self.handedness.role()
    }
}

/// Both hands of one frame, resolved by role. When two hands share a role
/// the first one wins; detections arrive sorted by confidence.
#[derive(Clone, Copy, Debug, Default)]
pub struct HandPair<'a> {
    pub primary: Option<&'a HandLandmarks>,
    pub secondary: Option<&'a HandLandmarks>,
}

impl<'a> HandPair<'a> {
    pub fn resolve(hands: &'a [DetectedHand]) -> Self {
        let mut pair = HandPair::default();
        for hand in hands {
            match hand.role() {
                HandRole::Primary => {
                    pair.primary.get_or_insert(&hand.landmarks);
                }
                HandRole::Secondary => {
                    pair.secondary.get_or_insert(&hand.landmarks);
                }
            }
        }
        pair
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackName {
    Drum,
    Bass,
    Melody,
    Pad,
    Perc,
}

impl TrackName {
    pub const ALL: [TrackName; 5] = [
        TrackName::Drum,
        TrackName::Bass,
        TrackName::Melody,
        TrackName::Pad,
        TrackName::Perc,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TrackName::Drum => "drum",
            TrackName::Bass => "bass",
            TrackName::Melody => "melody",
            TrackName::Pad => "pad",
            TrackName::Perc => "perc",
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            TrackName::Drum => "🥁",
            TrackName::Bass => "🎸",
            TrackName::Melody => "🎹",
            TrackName::Pad => "🎻",
            TrackName::Perc => "🔔",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        TrackName::ALL
            .into_iter()
            .find(|track| track.as_str().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for TrackName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Axis-aligned rectangle in normalized frame coordinates bound to a track.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub track: TrackName,
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
    pub color: [u8; 3],
}

impl Zone {
    /// Closed on both bounds: `x <= px <= x + w`, likewise for y.
    pub fn contains(&self, point: Landmark) -> bool {
        point.x >= self.x
            && point.x <= self.x + self.w
            && point.y >= self.y
            && point.y <= self.y + self.h
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mirrored_labels_resolve_to_roles() {
        assert_eq!(Handedness::Left.role(), HandRole::Primary);
        assert_eq!(Handedness::Right.role(), HandRole::Secondary);
    }

    #[test]
    fn first_hand_per_role_is_kept() {
        let hand = |handedness, x| DetectedHand {
            landmarks: HandLandmarks::new([Landmark::new(x, 0.5, 0.0); NUM_LANDMARKS]),
            handedness,
            score: 0.9,
        };
        let hands = [
            hand(Handedness::Left, 0.1),
            hand(Handedness::Right, 0.2),
            hand(Handedness::Left, 0.3),
        ];
        let pair = HandPair::resolve(&hands);
        assert_eq!(pair.primary.map(|h| h.wrist().x), Some(0.1));
        assert_eq!(pair.secondary.map(|h| h.wrist().x), Some(0.2));
    }

    #[test]
    fn landmarks_require_exactly_21_points() {
        assert!(HandLandmarks::from_slice(&[Landmark::default(); 20]).is_none());
        assert!(HandLandmarks::from_slice(&[Landmark::default(); 21]).is_some());
    }

    #[test]
    fn track_names_parse_case_insensitively() {
        assert_eq!(TrackName::parse("Melody"), Some(TrackName::Melody));
        assert_eq!(TrackName::parse("kazoo"), None);
    }
}
