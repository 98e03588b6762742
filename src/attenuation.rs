//! Distance attenuation models.
//!
//! Both models map a listener distance to a gain in `[0, 1]` that is maximal
//! at distance zero, never increases with distance and reaches zero at or
//! before the model's outer radius. Each carries one piece of state that the
//! engine adjusts between frames.

use crate::config::SoundRange;

/// Gains below this are inaudible; such sources never hold a voice.
pub const GAIN_THRESHOLD: f32 = 1.0e-4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AttenuationModel {
    /// Clamped linear falloff to zero at `radius * outer_radius_factor`
    Linear,
    /// Inverse-distance falloff with an adaptive quadratic clamp
    #[default]
    Inverse,
}

/// Listener speed at which the linear model reaches its widest outer radius (m/s).
const FULL_RANGE_SPEED: f32 = 40.0;

#[derive(Debug, Clone)]
pub struct LinearModel {
    outer_radius_factor: f32,
    minimum: f32,
    maximum: f32,
    maximum_speed: f32,
}

impl LinearModel {
    pub fn new(range: SoundRange) -> Self {
        let minimum = range.outer_radius_factor_minimum();
        let maximum = range.outer_radius_factor_maximum();
        Self {
            outer_radius_factor: (minimum * maximum).sqrt(),
            minimum,
            maximum,
            maximum_speed: range.outer_radius_factor_maximum_speed(),
        }
    }

    pub fn outer_radius_factor(&self) -> f32 {
        self.outer_radius_factor
    }

    /// Factor the model is heading for at the given listener speed.
    pub fn target_factor(&self, listener_speed: f32) -> f32 {
        let t = (listener_speed / FULL_RANGE_SPEED).clamp(0.0, 1.0);
        self.minimum + (self.maximum - self.minimum) * t
    }

    /// Moves the outer radius factor toward its speed-dependent target.
    pub fn advance(&mut self, time_elapsed: f32, listener_speed: f32) {
        let target = self.target_factor(listener_speed);
        let step = self.maximum_speed * time_elapsed;
        let delta = (target - self.outer_radius_factor).clamp(-step, step);
        self.outer_radius_factor =
            (self.outer_radius_factor + delta).clamp(self.minimum, self.maximum);
    }

    pub fn gain(&self, distance: f32, radius: f32, volume: f32) -> f32 {
        if radius <= 0.0 {
            return 0.0;
        }
        let outer = radius * self.outer_radius_factor;
        let ramp = if distance <= radius {
            1.0
        } else if distance >= outer {
            0.0
        } else {
            (outer - distance) / (outer - radius)
        };
        let gain = (ramp * volume).clamp(0.0, 1.0);
        if gain <= GAIN_THRESHOLD { 0.0 } else { gain }
    }
}

#[derive(Debug, Clone)]
pub struct InverseModel {
    log_clamp_factor: f32,
}

impl Default for InverseModel {
    fn default() -> Self {
        Self {
            log_clamp_factor: Self::DEFAULT_LOG_CLAMP_FACTOR,
        }
    }
}

impl InverseModel {
    pub const DEFAULT_LOG_CLAMP_FACTOR: f32 = -15.0;
    pub const MIN_LOG_CLAMP_FACTOR: f32 = -20.0;
    pub const MAX_LOG_CLAMP_FACTOR: f32 = -1.0;
    /// Change of the log clamp factor per second.
    const ADAPTATION_RATE: f32 = 3.0;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn log_clamp_factor(&self) -> f32 {
        self.log_clamp_factor
    }

    pub fn set_log_clamp_factor(&mut self, value: f32) {
        self.log_clamp_factor = value.clamp(Self::MIN_LOG_CLAMP_FACTOR, Self::MAX_LOG_CLAMP_FACTOR);
    }

    pub fn clamp_factor(&self) -> f32 {
        self.log_clamp_factor.exp()
    }

    /// Falloff without the clamp term: a smooth cubic near the source that
    /// joins `radius / distance` at twice the radius.
    pub fn unclamped_gain(distance: f32, radius: f32) -> f32 {
        if radius <= 0.0 {
            return 0.0;
        }
        if distance < 2.0 * radius {
            1.0 - distance * distance * (4.0 * radius - distance) / (16.0 * radius * radius * radius)
        } else {
            radius / distance
        }
    }

    pub fn gain(&self, distance: f32, radius: f32, volume: f32) -> f32 {
        let gain = Self::unclamped_gain(distance, radius) * volume
            - self.clamp_factor() * distance * distance;
        gain.clamp(0.0, 1.0)
    }

    /// Steers the clamp so that the loudest source that did not get a voice
    /// fades toward silence.
    ///
    /// `cutoff` is that source's unclamped gain and distance, or `None` when
    /// every candidate fit.
    pub fn adapt(&mut self, time_elapsed: f32, cutoff: Option<(f32, f32)>) {
        let desired = match cutoff {
            None => Self::MIN_LOG_CLAMP_FACTOR,
            Some((_, distance)) if distance <= 0.0 => Self::MAX_LOG_CLAMP_FACTOR,
            Some((gain, distance)) => (gain / (distance * distance))
                .ln()
                .clamp(Self::MIN_LOG_CLAMP_FACTOR, Self::MAX_LOG_CLAMP_FACTOR),
        };
        let step = Self::ADAPTATION_RATE * time_elapsed;
        self.log_clamp_factor += (desired - self.log_clamp_factor).clamp(-step, step);
    }
}
