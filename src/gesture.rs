use std::time::Instant;

use crate::{
    config::FistRule,
    types::{
        FINGER_TIPS_AND_BASES, HandLandmarks, Landmark, MIDDLE_MCP, PINKY_MCP, THUMB_IP,
        THUMB_MCP, THUMB_TIP, TrackName, WRIST, Zone,
    },
};

/// Horizontal slack for a thumb tucked straight over its own base.
const THUMB_TUCK_TOLERANCE: f32 = 0.05;

/// Counts the non-thumb fingers whose tip sits below its knuckle on screen.
pub fn curled_fingers(hand: &HandLandmarks) -> usize {
    FINGER_TIPS_AND_BASES
        .iter()
        .filter(|&&(tip, base)| hand.point(tip).y > hand.point(base).y)
        .count()
}

pub fn thumb_curled(hand: &HandLandmarks) -> bool {
    let tip = hand.point(THUMB_TIP);
    tip.x > hand.point(THUMB_IP).x || (tip.x - hand.point(THUMB_MCP).x).abs() < THUMB_TUCK_TOLERANCE
}

pub fn is_fist(hand: &HandLandmarks, rule: FistRule) -> bool {
    curled_fingers(hand) >= rule.min_curled && (!rule.require_thumb || thumb_curled(hand))
}

/// First zone, in iteration order, whose closed bounds contain `point`.
pub fn zone_at(point: Landmark, zones: &[Zone]) -> Option<TrackName> {
    zones
        .iter()
        .find(|zone| zone.contains(point))
        .map(|zone| zone.track)
}

/// Palm rotation in degrees: about 0 with the palm facing the camera,
/// 90 edge-on, 180 with the back of the hand towards the camera.
pub fn wrist_rotation_degrees(hand: &HandLandmarks) -> f32 {
    let wrist = hand.point(WRIST);
    let to_middle = hand.point(MIDDLE_MCP).sub(wrist);
    let to_pinky = hand.point(PINKY_MCP).sub(wrist);

    let normal = normalize(cross(to_middle, to_pinky));
    normal[2].clamp(-1.0, 1.0).asin().to_degrees() + 90.0
}

/// Thumb tip minus pinky base along x. Negative with the palm towards the
/// viewer, positive with the back of the hand towards the viewer.
pub fn palm_orientation(hand: &HandLandmarks) -> f32 {
    hand.point(THUMB_TIP).x - hand.point(PINKY_MCP).x
}

fn cross(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

fn normalize(v: [f32; 3]) -> [f32; 3] {
    let len = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
    if len < 1e-6 {
        [0.0, 0.0, 0.0]
    } else {
        [v[0] / len, v[1] / len, v[2] / len]
    }
}

#[derive(Clone, Copy, Debug)]
struct WristSample {
    x: f32,
    time: Instant,
}

/// Horizontal wrist speed between consecutive frames, in normalized units
/// per second. Only motion towards the mirrored left (increasing x) counts.
#[derive(Debug, Default)]
pub struct WristVelocity {
    previous: Option<WristSample>,
}

impl WristVelocity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, x: f32, now: Instant) -> f32 {
        let velocity = match self.previous {
            Some(prev) => {
                let dt = now.saturating_duration_since(prev.time).as_secs_f32();
                let dx = x - prev.x;
                if dt > 0.0 && dx > 0.0 { dx / dt } else { 0.0 }
            }
            None => 0.0,
        };

        self.previous = Some(WristSample { x, time: now });
        velocity
    }

    pub fn reset(&mut self) {
        self.previous = None;
    }

    pub fn is_tracking(&self) -> bool {
        self.previous.is_some()
    }
}
