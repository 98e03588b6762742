//! Configuration for RailSonic

use crate::attenuation::AttenuationModel;
use crate::error::{RailSonicError, Result};

/// Audible range class used by the linear attenuation model.
///
/// The range class bounds how far the outer radius factor may widen when the
/// listener moves fast, and how quickly it may get there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SoundRange {
    Low,
    #[default]
    Medium,
    High,
}

impl SoundRange {
    /// Smallest outer radius factor (listener at rest).
    pub fn outer_radius_factor_minimum(self) -> f32 {
        match self {
            Self::Low => 2.0,
            Self::Medium => 4.0,
            Self::High => 6.0,
        }
    }

    /// Largest outer radius factor (listener at speed).
    pub fn outer_radius_factor_maximum(self) -> f32 {
        match self {
            Self::Low => 8.0,
            Self::Medium => 16.0,
            Self::High => 24.0,
        }
    }

    /// Maximum change of the outer radius factor per second.
    pub fn outer_radius_factor_maximum_speed(self) -> f32 {
        match self {
            Self::Low => 1.0,
            Self::Medium => 2.0,
            Self::High => 3.0,
        }
    }
}

/// Configuration descriptor for a RailSonic engine
#[derive(Debug, Clone)]
pub struct EngineDesc {
    /// Range class for the linear attenuation model
    pub sound_range: SoundRange,
    /// User cap on simultaneously bound voices. The effective cap is the
    /// smaller of this and what the platform reports.
    pub max_voices: usize,
    /// Number of voices the software mixer offers on a regular output device
    pub hardware_voices: usize,
    /// Attenuation model used when the caller does not pick one per frame
    pub attenuation_model: AttenuationModel,
    /// Requested device buffer size in frames
    pub block_size: usize,
    /// Resample decoded buffers to the device sample rate when they are loaded
    pub resample_on_load: bool,
}

impl Default for EngineDesc {
    fn default() -> Self {
        Self {
            sound_range: SoundRange::default(),
            max_voices: 32,
            hardware_voices: 64,
            attenuation_model: AttenuationModel::Inverse,
            block_size: 1024,
            resample_on_load: true,
        }
    }
}

impl EngineDesc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sound_range(mut self, range: SoundRange) -> Self {
        self.sound_range = range;
        self
    }

    pub fn max_voices(mut self, max: usize) -> Self {
        self.max_voices = max;
        self
    }

    pub fn hardware_voices(mut self, voices: usize) -> Self {
        self.hardware_voices = voices;
        self
    }

    pub fn attenuation_model(mut self, model: AttenuationModel) -> Self {
        self.attenuation_model = model;
        self
    }

    pub fn block_size(mut self, size: usize) -> Self {
        self.block_size = size;
        self
    }

    pub fn resample_on_load(mut self, resample: bool) -> Self {
        self.resample_on_load = resample;
        self
    }

    /// Rejects descriptors the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_voices == 0 {
            return Err(RailSonicError::Configuration(
                "max_voices must be at least 1".into(),
            ));
        }
        if self.hardware_voices == 0 {
            return Err(RailSonicError::Configuration(
                "hardware_voices must be at least 1".into(),
            ));
        }
        if self.block_size == 0 {
            return Err(RailSonicError::Configuration(
                "block_size must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
