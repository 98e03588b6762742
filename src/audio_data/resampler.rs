use crate::error::{RailSonicError, Result};

/// Offline mono resampler used when a buffer is loaded at a rate other than the device's.
pub struct AudioResampler {
    source_sample_rate: u32,
    target_sample_rate: u32,
    chunk_size: usize,
}

impl AudioResampler {
    pub fn new(
        source_sample_rate: u32,
        target_sample_rate: u32,
        chunk_size: Option<usize>,
    ) -> Result<Self> {
        if source_sample_rate == 0 || target_sample_rate == 0 {
            return Err(RailSonicError::AudioFormat(
                "Sample rates must be greater than 0".to_string(),
            ));
        }

        Ok(Self {
            source_sample_rate,
            target_sample_rate,
            chunk_size: chunk_size.unwrap_or(1024),
        })
    }

    pub fn resample_channel(&self, channel_samples: &[f32]) -> Result<Vec<f32>> {
        if self.source_sample_rate == self.target_sample_rate {
            return Ok(channel_samples.to_vec());
        }

        use rubato::{FftFixedIn, Resampler};

        let mut resampler = FftFixedIn::<f32>::new(
            self.source_sample_rate as usize,
            self.target_sample_rate as usize,
            self.chunk_size,
            2, // sub_chunks
            1, // single channel
        )
        .map_err(|e| RailSonicError::AudioLoading(format!("Failed to create resampler: {}", e)))?;

        let expected_len =
            (channel_samples.len() as f64 * self.resample_ratio()).ceil() as usize;
        let mut output_buffer = Vec::with_capacity(expected_len + self.chunk_size);
        let mut input_index = 0;

        while input_index < channel_samples.len() {
            let chunk_size = resampler.input_frames_next();
            let samples_to_process = (channel_samples.len() - input_index).min(chunk_size);

            // Pad the last chunk with silence
            let mut input_chunk = vec![0.0f32; chunk_size];
            input_chunk[..samples_to_process]
                .copy_from_slice(&channel_samples[input_index..input_index + samples_to_process]);

            let waves_out = resampler
                .process(&[input_chunk], None)
                .map_err(|e| RailSonicError::AudioLoading(format!("Resampling error: {}", e)))?;

            if let Some(first_channel) = waves_out.first() {
                output_buffer.extend_from_slice(first_channel);
            }

            input_index += samples_to_process;
        }

        output_buffer.truncate(expected_len);
        Ok(output_buffer)
    }

    pub fn target_sample_rate(&self) -> u32 {
        self.target_sample_rate
    }

    pub fn source_sample_rate(&self) -> u32 {
        self.source_sample_rate
    }

    pub fn resample_ratio(&self) -> f64 {
        self.target_sample_rate as f64 / self.source_sample_rate as f64
    }
}
