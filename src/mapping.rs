use crate::config::{
    IdlePlayback, MAX_PLAYBACK_RATE, MAX_VOLUME_DB, MIN_PLAYBACK_RATE, MIN_VOLUME_DB,
    ScratchConfig, VolumeConfig,
};

pub const MAX_ROTATION_DEGREES: f32 = 180.0;

/// Log-scale interpolation between `min` and `max`. The end points are
/// returned exactly.
pub fn log_interpolate(norm: f32, min: f32, max: f32) -> f32 {
    if norm <= 0.0 {
        return min;
    }
    if norm >= 1.0 {
        return max;
    }
    let (lo, hi) = ((min as f64).ln(), (max as f64).ln());
    (lo + norm as f64 * (hi - lo)).exp() as f32
}

pub fn angle_to_frequency(degrees: f32, min_hz: f32, max_hz: f32) -> f32 {
    log_interpolate(degrees / MAX_ROTATION_DEGREES, min_hz, max_hz)
}

pub fn velocity_to_frequency(velocity: f32, ceiling: f32, min_hz: f32, max_hz: f32) -> f32 {
    if ceiling <= 0.0 {
        return min_hz;
    }
    let norm = velocity.clamp(0.0, ceiling) / ceiling;
    log_interpolate(norm, min_hz, max_hz)
}

pub fn palm_to_cutoff(offset: f32, offset_min: f32, offset_max: f32, min_hz: f32, max_hz: f32) -> f32 {
    let span = offset_max - offset_min;
    if span <= 0.0 {
        return min_hz;
    }
    let norm = ((offset - offset_min) / span).clamp(0.0, 1.0);
    log_interpolate(norm, min_hz, max_hz)
}

/// New level after a vertical wrist move of `dy`, or `None` when the move
/// is inside the dead zone. Moving up (negative dy) raises the level.
pub fn volume_step(current_db: f32, dy: f32, cfg: &VolumeConfig) -> Option<f32> {
    if dy.abs() <= cfg.dead_zone {
        return None;
    }
    let current = if current_db.is_nan() {
        MIN_VOLUME_DB
    } else {
        current_db.max(MIN_VOLUME_DB)
    };
    Some((current - dy * cfg.scale_db).clamp(MIN_VOLUME_DB, MAX_VOLUME_DB))
}

pub fn volume_percent(db: f32) -> u8 {
    let db = if db.is_nan() { MIN_VOLUME_DB } else { db };
    let clamped = db.clamp(MIN_VOLUME_DB, MAX_VOLUME_DB);
    ((clamped - MIN_VOLUME_DB) / (MAX_VOLUME_DB - MIN_VOLUME_DB) * 100.0).round() as u8
}

/// Exponential smoothing with separate blend factors for rising and
/// falling targets.
#[derive(Clone, Debug)]
pub struct FrequencySmoother {
    value: f32,
    initial: f32,
    attack: f32,
    release: f32,
}

impl FrequencySmoother {
    pub fn new(initial: f32, attack: f32, release: f32) -> Self {
        Self {
            value: initial,
            initial,
            attack,
            release,
        }
    }

    pub fn step(&mut self, target: f32) -> f32 {
        let blend = if target > self.value {
            self.attack
        } else {
            self.release
        };
        self.value += (target - self.value) * blend;
        self.value
    }

    pub fn value(&self) -> f32 {
        self.value
    }

    pub fn reset(&mut self) {
        self.value = self.initial;
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ScratchStatus {
    /// Pose held, waiting for a swipe.
    Ready,
    Reversing(f32),
    Frozen,
    /// Pose released; playback back to normal.
    Released,
}

/// Parameter writes produced by one scratch step.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScratchOutput {
    /// Written only when reverse mode is entered or left.
    pub set_reverse: Option<bool>,
    pub rate: Option<f32>,
    pub status: ScratchStatus,
}

impl ScratchOutput {
    fn status(status: ScratchStatus) -> Self {
        Self {
            set_reverse: None,
            rate: None,
            status,
        }
    }
}

/// Turns horizontal swipes of the control hand into reverse playback.
#[derive(Debug, Default)]
pub struct ScratchController {
    engaged: bool,
    previous_x: Option<f32>,
}

impl ScratchController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_engaged(&self) -> bool {
        self.engaged
    }

    pub fn previous_x(&self) -> Option<f32> {
        self.previous_x
    }

    /// One frame with the scratch pose held and the control wrist at `x`.
    pub fn update(&mut self, x: f32, cfg: &ScratchConfig) -> ScratchOutput {
        let Some(prev) = self.previous_x.replace(x) else {
            return ScratchOutput::status(ScratchStatus::Ready);
        };

        let dx = x - prev;
        if dx > cfg.dead_zone {
            let speed = (dx * cfg.speed_scale)
                .min(cfg.max_speed)
                .clamp(MIN_PLAYBACK_RATE, MAX_PLAYBACK_RATE);
            let set_reverse = (!self.engaged).then_some(true);
            self.engaged = true;
            return ScratchOutput {
                set_reverse,
                rate: Some(speed),
                status: ScratchStatus::Reversing(speed),
            };
        }

        let was_engaged = std::mem::take(&mut self.engaged);
        let set_reverse = was_engaged.then_some(false);
        match cfg.idle {
            IdlePlayback::Forward => ScratchOutput {
                set_reverse,
                rate: was_engaged.then_some(1.0),
                status: ScratchStatus::Ready,
            },
            IdlePlayback::Freeze => ScratchOutput {
                set_reverse,
                rate: Some(0.0),
                status: ScratchStatus::Frozen,
            },
        }
    }

    /// The scratch pose is not held this frame.
    pub fn release(&mut self) -> ScratchOutput {
        self.previous_x = None;
        let was_engaged = std::mem::take(&mut self.engaged);
        ScratchOutput {
            set_reverse: was_engaged.then_some(false),
            rate: Some(1.0),
            status: ScratchStatus::Released,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
