use image::{Rgba, RgbaImage, imageops};

use crate::{
    audio::AudioGraph,
    config::MIN_VOLUME_DB,
    mapping::volume_percent,
    types::{DetectedHand, HandRole, Landmark, TrackName, Zone},
};

pub const CONNECTIONS: &[(usize, usize)] = &[
    (0, 1),
    (1, 2),
    (2, 3),
    (3, 4),
    (0, 5),
    (5, 6),
    (6, 7),
    (7, 8),
    (0, 9),
    (9, 10),
    (10, 11),
    (11, 12),
    (0, 13),
    (13, 14),
    (14, 15),
    (15, 16),
    (0, 17),
    (17, 18),
    (18, 19),
    (19, 20),
    (5, 9),
    (9, 13),
    (13, 17),
];

pub const SKELETON_LINE_THICKNESS: i32 = 3;
const ACTIVE_ZONE_THICKNESS: i32 = 4;
const ZONE_THICKNESS: i32 = 2;
const PRIMARY_COLOR: [u8; 4] = [0, 255, 0, 255];
const SECONDARY_COLOR: [u8; 4] = [255, 102, 0, 255];
const ACTIVE_OUTLINE: [u8; 4] = [255, 255, 255, 255];
const LEVEL_BAR_COLOR: [u8; 4] = [255, 255, 255, 255];
const LEVEL_BAR_HEIGHT: i32 = 3;
const LEVEL_BAR_INSET: i32 = 3;
const MIN_ZONE_ALPHA: f32 = 68.0;
const MAX_ZONE_ALPHA: f32 = 170.0;

/// What the overlay needs to draw the volume zones of a running session.
#[derive(Clone, Copy, Debug)]
pub struct ZoneOverlay<'a> {
    pub zones: &'a [Zone],
    pub active: Option<TrackName>,
    pub graph: &'a AudioGraph,
}

/// Mirrors the frame so it reads like a mirror, then draws zones and hand
/// skeletons in the mirrored space.
pub fn render(canvas: &mut RgbaImage, hands: &[DetectedHand], zones: Option<ZoneOverlay<'_>>) {
    imageops::flip_horizontal_in_place(canvas);

    if let Some(overlay) = zones {
        for zone in overlay.zones {
            let level = overlay.graph.level_db(zone.track).unwrap_or(MIN_VOLUME_DB);
            draw_zone(canvas, zone, volume_percent(level), overlay.active == Some(zone.track));
        }
    }

    for hand in hands {
        let color = match hand.role() {
            HandRole::Primary => PRIMARY_COLOR,
            HandRole::Secondary => SECONDARY_COLOR,
        };
        let points: Vec<(f32, f32)> = hand
            .landmarks
            .points()
            .iter()
            .map(|&lm| to_mirrored_pixels(lm, canvas.width(), canvas.height()))
            .collect();
        draw_skeleton(canvas, &points, color);
    }
}

pub fn zone_alpha(percent: u8) -> u8 {
    let t = f32::from(percent.min(100)) / 100.0;
    (MIN_ZONE_ALPHA + (MAX_ZONE_ALPHA - MIN_ZONE_ALPHA) * t).round() as u8
}

fn to_mirrored_pixels(lm: Landmark, width: u32, height: u32) -> (f32, f32) {
    ((1.0 - lm.x) * width as f32, lm.y * height as f32)
}

fn draw_zone(canvas: &mut RgbaImage, zone: &Zone, percent: u8, active: bool) {
    let (width, height) = (canvas.width(), canvas.height());
    let (x1, y1) = to_mirrored_pixels(Landmark::new(zone.x + zone.w, zone.y, 0.0), width, height);
    let (x2, y2) = to_mirrored_pixels(Landmark::new(zone.x, zone.y + zone.h, 0.0), width, height);

    let [r, g, b] = zone.color;
    let fill = [r, g, b, zone_alpha(percent)];
    for y in y1.floor() as i32..y2.ceil() as i32 {
        for x in x1.floor() as i32..x2.ceil() as i32 {
            blend_pixel_safe(canvas, x, y, fill);
        }
    }

    draw_level_bar(canvas, (x1, y2), x2 - x1, percent);

    let (outline, thickness) = if active {
        (ACTIVE_OUTLINE, ACTIVE_ZONE_THICKNESS)
    } else {
        ([r, g, b, 255], ZONE_THICKNESS)
    };
    draw_rect(canvas, (x1, y1), (x2, y2), outline, thickness);
}

/// Horizontal bar along the bottom of a zone, filled to `percent` of its width.
fn draw_level_bar(canvas: &mut RgbaImage, bottom_left: (f32, f32), width: f32, percent: u8) {
    let left = bottom_left.0 as i32 + LEVEL_BAR_INSET;
    let bottom = bottom_left.1 as i32 - LEVEL_BAR_INSET;
    let span = (width as i32 - 2 * LEVEL_BAR_INSET).max(0);
    let filled = span * i32::from(percent.min(100)) / 100;
    for y in bottom - LEVEL_BAR_HEIGHT..bottom {
        for x in left..left + filled {
            put_pixel_safe(canvas, x, y, LEVEL_BAR_COLOR);
        }
    }
}

fn draw_skeleton(canvas: &mut RgbaImage, points: &[(f32, f32)], color: [u8; 4]) {
    if points.len() < 2 {
        return;
    }

    for &(a, b) in CONNECTIONS {
        if let (Some(pa), Some(pb)) = (points.get(a), points.get(b)) {
            draw_line(canvas, pa, pb, color, SKELETON_LINE_THICKNESS);
        }
    }

    for &(x, y) in points {
        draw_circle(canvas, (x as i32, y as i32), SKELETON_LINE_THICKNESS, color);
    }
}

fn draw_rect(canvas: &mut RgbaImage, p1: (f32, f32), p2: (f32, f32), color: [u8; 4], thickness: i32) {
    let (x1, y1) = p1;
    let (x2, y2) = p2;
    draw_line(canvas, &(x1, y1), &(x2, y1), color, thickness);
    draw_line(canvas, &(x2, y1), &(x2, y2), color, thickness);
    draw_line(canvas, &(x2, y2), &(x1, y2), color, thickness);
    draw_line(canvas, &(x1, y2), &(x1, y1), color, thickness);
}

fn draw_line(canvas: &mut RgbaImage, p0: &(f32, f32), p1: &(f32, f32), color: [u8; 4], thickness: i32) {
    let (mut x0, mut y0) = (p0.0 as i32, p0.1 as i32);
    let (x1, y1) = (p1.0 as i32, p1.1 as i32);
    let dx = (x1 - x0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let dy = -(y1 - y0).abs();
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;
    let radius = (thickness.max(1) - 1) / 2;

    loop {
        for ox in -radius..=radius {
            for oy in -radius..=radius {
                if ox.abs() + oy.abs() <= radius {
                    put_pixel_safe(canvas, x0 + ox, y0 + oy, color);
                }
            }
        }
        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x0 += sx;
        }
        if e2 <= dx {
            err += dx;
            y0 += sy;
        }
    }
}

fn draw_circle(canvas: &mut RgbaImage, center: (i32, i32), radius: i32, color: [u8; 4]) {
    let (cx, cy) = center;
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            if dx * dx + dy * dy <= radius * radius {
                put_pixel_safe(canvas, cx + dx, cy + dy, color);
            }
        }
    }
}

fn in_bounds(canvas: &RgbaImage, x: i32, y: i32) -> Option<(u32, u32)> {
    if x < 0 || y < 0 {
        return None;
    }
    let (ux, uy) = (x as u32, y as u32);
    (ux < canvas.width() && uy < canvas.height()).then_some((ux, uy))
}

fn put_pixel_safe(canvas: &mut RgbaImage, x: i32, y: i32, color: [u8; 4]) {
    if let Some((ux, uy)) = in_bounds(canvas, x, y) {
        canvas.put_pixel(ux, uy, Rgba(color));
    }
}

fn blend_pixel_safe(canvas: &mut RgbaImage, x: i32, y: i32, color: [u8; 4]) {
    let Some((ux, uy)) = in_bounds(canvas, x, y) else {
        return;
    };
    let alpha = f32::from(color[3]) / 255.0;
    let px = canvas.get_pixel_mut(ux, uy);
    for c in 0..3 {
        let blended = f32::from(color[c]) * alpha + f32::from(px[c]) * (1.0 - alpha);
        px[c] = blended.round() as u8;
    }
    px[3] = 255;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        audio::{RecordingEngine, TrackRegistry},
        config::{VariantConfig, VariantKind, default_zones},
        gesture::tests::open_hand,
        types::{Handedness, WRIST},
    };

    #[test]
    fn zone_alpha_tracks_volume() {
        assert_eq!(zone_alpha(0), 0x44);
        assert_eq!(zone_alpha(100), 0xaa);
        assert_eq!(zone_alpha(50), 119);
    }

    fn bass_level_pixel(kind: VariantKind) -> [u8; 4] {
        let mut engine = RecordingEngine::new();
        let variant = VariantConfig::preset(kind);
        let graph = AudioGraph::build(&mut engine, &variant, &TrackRegistry::new()).unwrap();
        let zones = default_zones();
        let bass = zones[1];

        let mut canvas = RgbaImage::new(200, 200);
        render(
            &mut canvas,
            &[],
            Some(ZoneOverlay {
                zones: &zones,
                active: None,
                graph: &graph,
            }),
        );

        let (left, _) = to_mirrored_pixels(Landmark::new(bass.x + bass.w, bass.y, 0.0), 200, 200);
        let (_, bottom) = to_mirrored_pixels(Landmark::new(bass.x, bass.y + bass.h, 0.0), 200, 200);
        let x = left as u32 + LEVEL_BAR_INSET as u32 + 2;
        let y = bottom as u32 - LEVEL_BAR_INSET as u32 - 1;
        canvas.get_pixel(x, y).0
    }

    #[test]
    fn level_bar_follows_track_volume() {
        // Turntable tracks start at 0 dB, mixer bass at -60 dB.
        assert_eq!(bass_level_pixel(VariantKind::Turntable), LEVEL_BAR_COLOR);
        assert_ne!(bass_level_pixel(VariantKind::Mixer), LEVEL_BAR_COLOR);
    }

    #[test]
    fn hands_are_drawn_mirrored() {
        let mut canvas = RgbaImage::new(100, 100);
        let hand = DetectedHand {
            landmarks: open_hand(),
            handedness: Handedness::Left,
            score: 1.0,
        };
        let wrist = hand.landmarks.point(WRIST);
        render(&mut canvas, &[hand], None);

        let mirrored_x = ((1.0 - wrist.x) * 100.0) as u32;
        let y = (wrist.y * 100.0) as u32;
        assert_eq!(canvas.get_pixel(mirrored_x, y).0, PRIMARY_COLOR);
    }

    #[test]
    fn active_zone_gets_white_outline() {
        let mut engine = RecordingEngine::new();
        let variant = VariantConfig::preset(VariantKind::Mixer);
        let graph = AudioGraph::build(&mut engine, &variant, &TrackRegistry::new()).unwrap();
        let zones = default_zones();
        let drum = zones[0];

        let mut canvas = RgbaImage::new(200, 200);
        render(
            &mut canvas,
            &[],
            Some(ZoneOverlay {
                zones: &zones,
                active: Some(TrackName::Drum),
                graph: &graph,
            }),
        );

        let (left, top) = to_mirrored_pixels(Landmark::new(drum.x + drum.w, drum.y, 0.0), 200, 200);
        assert_eq!(canvas.get_pixel(left as u32, top as u32 + 5).0, ACTIVE_OUTLINE);

        let bass = zones[1];
        let (left, top) = to_mirrored_pixels(Landmark::new(bass.x + bass.w, bass.y, 0.0), 200, 200);
        let [r, g, b] = bass.color;
        assert_eq!(canvas.get_pixel(left as u32, top as u32 + 5).0, [r, g, b, 255]);
    }
}
