mod load_options;
mod loader;
mod resampler;
mod symphonia_loader;

use crate::error::{RailSonicError, Result};
pub use load_options::LoadOptions;
pub use loader::SoundLoader;
pub use resampler::AudioResampler;
use std::time::Duration;
pub use symphonia_loader::SymphoniaLoader;

/// Channels quieter than this share of the average volume are dropped from a mono mix.
const SILENT_CHANNEL_THRESHOLD: f32 = 0.05;

/// A mix quieter than this share of the average channel volume is treated as cancelled out.
const DESTRUCTIVE_INTERFERENCE_THRESHOLD: f32 = 0.05;

/// Raw PCM as handed over by a decoder or by the host.
///
/// One byte vector per channel. 8-bit samples are unsigned (silence at 128),
/// 16-bit samples are signed little endian. Other depths are carried as-is
/// (little endian, `ceil(bits / 8)` bytes per sample) so that the engine can
/// reject them when a buffer is loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct Sound {
    sample_rate: u32,
    bits_per_sample: u16,
    bytes: Vec<Vec<u8>>,
}

impl Sound {
    pub fn new(sample_rate: u32, bits_per_sample: u16, bytes: Vec<Vec<u8>>) -> Result<Self> {
        if sample_rate == 0 {
            return Err(RailSonicError::AudioFormat(
                "The sample rate must be positive".to_string(),
            ));
        }
        if bits_per_sample == 0 {
            return Err(RailSonicError::AudioFormat(
                "The number of bits per sample must be positive".to_string(),
            ));
        }
        let Some(first) = bytes.first() else {
            return Err(RailSonicError::AudioFormat(
                "There must be at least one channel".to_string(),
            ));
        };
        if bytes.iter().any(|channel| channel.len() != first.len()) {
            return Err(RailSonicError::AudioFormat(
                "The data bytes of the channels are of unequal length".to_string(),
            ));
        }
        Ok(Self {
            sample_rate,
            bits_per_sample,
            bytes,
        })
    }

    /// Builds a 16-bit sound from normalized float samples, one vector per channel.
    pub fn from_f32_channels(sample_rate: u32, channels: &[Vec<f32>]) -> Result<Self> {
        let bytes = channels
            .iter()
            .map(|channel| {
                channel
                    .iter()
                    .flat_map(|&sample| {
                        let scaled = if sample < 0.0 {
                            sample.max(-1.0) * 32768.0
                        } else {
                            sample.min(1.0) * 32767.0
                        };
                        (scaled as i16).to_le_bytes()
                    })
                    .collect()
            })
            .collect();
        Self::new(sample_rate, 16, bytes)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn bits_per_sample(&self) -> u16 {
        self.bits_per_sample
    }

    pub fn channels(&self) -> usize {
        self.bytes.len()
    }

    pub fn bytes(&self) -> &[Vec<u8>] {
        &self.bytes
    }

    pub fn duration(&self) -> Duration {
        let bytes_per_sample = self.bits_per_sample.div_ceil(8) as f64;
        let frames = self.bytes[0].len() as f64 / bytes_per_sample;
        Duration::from_secs_f64(frames / self.sample_rate as f64)
    }

    /// Whether the engine can play this depth.
    pub fn is_supported_depth(&self) -> bool {
        matches!(self.bits_per_sample, 8 | 16)
    }

    /// Converts to normalized float samples, one vector per channel.
    pub fn channel_samples(&self) -> Result<Vec<Vec<f32>>> {
        match self.bits_per_sample {
            8 => Ok(self
                .bytes
                .iter()
                .map(|channel| {
                    channel
                        .iter()
                        .map(|&value| {
                            let divisor = if value < 128 { 128.0 } else { 127.0 };
                            (value as f32 - 128.0) / divisor
                        })
                        .collect()
                })
                .collect()),
            16 => Ok(self
                .bytes
                .iter()
                .map(|channel| {
                    channel
                        .chunks_exact(2)
                        .map(|pair| {
                            let value = i16::from_le_bytes([pair[0], pair[1]]);
                            let divisor = if value < 0 { 32768.0 } else { 32767.0 };
                            value as f32 / divisor
                        })
                        .collect()
                })
                .collect()),
            other => Err(RailSonicError::AudioFormat(format!(
                "Unsupported bits per sample: {}",
                other
            ))),
        }
    }

    /// Decodes into mono float PCM. Only 8-bit and 16-bit depths are accepted.
    pub fn to_mono_pcm(&self) -> Result<PcmData> {
        let channels = self.channel_samples()?;
        let samples = normalized_mono_mix(channels);
        Ok(PcmData::new(samples, self.sample_rate))
    }
}

/// Mixes channels to mono, dropping silent channels and keeping the
/// average loudness of the remaining ones.
fn normalized_mono_mix(mut channels: Vec<Vec<f32>>) -> Vec<f32> {
    if channels.len() == 1 || channels[0].is_empty() {
        return channels.swap_remove(0);
    }

    let volumes: Vec<f32> = channels
        .iter()
        .map(|channel| channel.iter().map(|s| s.abs()).sum::<f32>() / channel.len() as f32)
        .collect();
    let average_volume = volumes.iter().sum::<f32>() / volumes.len() as f32;

    let audible: Vec<usize> = (0..channels.len())
        .filter(|&i| volumes[i] > SILENT_CHANNEL_THRESHOLD * average_volume)
        .collect();

    let (remaining, total_volume): (Vec<usize>, f32) = match audible.len() {
        1 => return channels.swap_remove(audible[0]),
        0 => ((0..channels.len()).collect(), average_volume),
        n => (
            audible.clone(),
            audible.iter().map(|&i| volumes[i]).sum::<f32>() / n as f32,
        ),
    };

    let frames = channels[0].len();
    let mut mix: Vec<f32> = (0..frames)
        .map(|j| remaining.iter().map(|&i| channels[i][j]).sum::<f32>() / remaining.len() as f32)
        .collect();
    let mix_volume = mix.iter().map(|s| s.abs()).sum::<f32>() / frames as f32;

    if mix_volume <= DESTRUCTIVE_INTERFERENCE_THRESHOLD * total_volume {
        return channels.swap_remove(remaining[0]);
    }

    let scale = total_volume / mix_volume;
    let mut maximum = 0.0f32;
    for sample in mix.iter_mut() {
        *sample *= scale;
        maximum = maximum.max(sample.abs());
    }
    if maximum > 1.0 {
        for sample in mix.iter_mut() {
            *sample /= maximum;
        }
    }
    mix
}

/// Decoded mono PCM shared between the engine and the voice platform.
#[derive(Debug, Clone, PartialEq)]
pub struct PcmData {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl PcmData {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }

    /// Resample to a different sample rate using rubato
    pub fn resample(&self, target_sample_rate: u32) -> Result<Self> {
        if target_sample_rate == self.sample_rate {
            return Ok(self.clone());
        }

        let resampler = AudioResampler::new(self.sample_rate, target_sample_rate, Some(1024))?;
        let samples = resampler.resample_channel(&self.samples)?;
        Ok(Self::new(samples, target_sample_rate))
    }
}
