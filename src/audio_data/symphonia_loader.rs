use crate::{
    audio_data::{Sound, SoundLoader},
    error::{RailSonicError, Result},
};
use std::fs::File;
use std::path::Path;
use symphonia::{
    core::{
        audio::{AudioBufferRef, SampleBuffer},
        codecs::DecoderOptions,
        errors::Error,
        formats::FormatOptions,
        io::MediaSourceStream,
        meta::MetadataOptions,
        probe::Hint,
    },
    default::{get_codecs, get_probe},
};

/// Default sound loader using the Symphonia decoder library.
///
/// Keeps the bit depth the container declares so that the engine decides
/// what it accepts. Compressed formats without a declared depth are decoded
/// to 16 bits.
pub struct SymphoniaLoader;

impl SoundLoader for SymphoniaLoader {
    fn load(&self, path: &Path) -> Result<Sound> {
        let file = File::open(path)?;

        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| {
                RailSonicError::AudioLoading(format!("Failed to probe audio format: {:?}", e))
            })?;

        let mut format = probed.format;

        let track = format.default_track().ok_or_else(|| {
            RailSonicError::AudioLoading("No default audio track found".to_string())
        })?;
        let track_id = track.id;

        let sample_rate = track
            .codec_params
            .sample_rate
            .ok_or_else(|| RailSonicError::AudioLoading("Sample rate not found".to_string()))?;

        let channels = track
            .codec_params
            .channels
            .ok_or_else(|| RailSonicError::AudioLoading("Channel count not found".to_string()))?
            .count();

        let bits_per_sample = track.codec_params.bits_per_sample.unwrap_or(16) as u16;

        let mut decoder = get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| {
                RailSonicError::AudioLoading(format!("Failed to create decoder: {:?}", e))
            })?;

        let mut channel_bytes: Vec<Vec<u8>> = vec![Vec::new(); channels];

        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(Error::IoError(_)) => break, // end-of-file
                Err(e) => {
                    return Err(RailSonicError::AudioLoading(format!(
                        "Error reading packet: {:?}",
                        e
                    )));
                }
            };

            if packet.track_id() != track_id {
                continue;
            }

            let decoded = match decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(Error::IoError(_)) => break, // also EOF in some formats
                Err(Error::DecodeError(_)) => continue, // recoverable corruption
                Err(e) => {
                    return Err(RailSonicError::AudioLoading(format!(
                        "Error decoding packet: {:?}",
                        e
                    )));
                }
            };

            append_planar_bytes(decoded, bits_per_sample, &mut channel_bytes);
        }

        log::debug!(
            "Decoded {} ({} Hz, {} bits, {} channels)",
            path.display(),
            sample_rate,
            bits_per_sample,
            channels
        );

        Sound::new(sample_rate, bits_per_sample, channel_bytes)
    }
}

/// Splits one decoded packet into per-channel little endian bytes at the target depth.
fn append_planar_bytes(decoded: AudioBufferRef<'_>, bits_per_sample: u16, out: &mut [Vec<u8>]) {
    let spec = *decoded.spec();
    let capacity = decoded.capacity() as u64;
    let channels = out.len();

    match bits_per_sample {
        8 => {
            let mut tmp = SampleBuffer::<u8>::new(capacity, spec);
            tmp.copy_interleaved_ref(decoded);
            for frame in tmp.samples().chunks(channels) {
                for (channel, &sample) in out.iter_mut().zip(frame) {
                    channel.push(sample);
                }
            }
        }
        16 => {
            let mut tmp = SampleBuffer::<i16>::new(capacity, spec);
            tmp.copy_interleaved_ref(decoded);
            for frame in tmp.samples().chunks(channels) {
                for (channel, &sample) in out.iter_mut().zip(frame) {
                    channel.extend_from_slice(&sample.to_le_bytes());
                }
            }
        }
        other => {
            let shift = 32u32.saturating_sub(other as u32);
            let width = (other.div_ceil(8) as usize).min(4);
            let mut tmp = SampleBuffer::<i32>::new(capacity, spec);
            tmp.copy_interleaved_ref(decoded);
            for frame in tmp.samples().chunks(channels) {
                for (channel, &sample) in out.iter_mut().zip(frame) {
                    channel.extend_from_slice(&(sample >> shift).to_le_bytes()[..width]);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_io_error() {
        let result = SymphoniaLoader.load(Path::new("definitely/not/here.wav"));
        assert!(matches!(result, Err(RailSonicError::Io(_))));
    }

    #[test]
    fn test_wav_roundtrip_keeps_depth() {
        let dir = std::env::temp_dir().join("railsonic_loader_test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("tone.wav");
        std::fs::write(&path, wav_bytes(8000, &[0, 1000, -1000, 32767])).unwrap();

        let sound = SymphoniaLoader.load(&path).unwrap();
        assert_eq!(sound.sample_rate(), 8000);
        assert_eq!(sound.bits_per_sample(), 16);
        assert_eq!(sound.channels(), 1);
        let samples: Vec<i16> = sound.bytes()[0]
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        assert_eq!(samples, vec![0, 1000, -1000, 32767]);
    }

    fn wav_bytes(sample_rate: u32, samples: &[i16]) -> Vec<u8> {
        let data_len = (samples.len() * 2) as u32;
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"RIFF");
        bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
        bytes.extend_from_slice(b"WAVEfmt ");
        bytes.extend_from_slice(&16u32.to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes()); // PCM
        bytes.extend_from_slice(&1u16.to_le_bytes()); // mono
        bytes.extend_from_slice(&sample_rate.to_le_bytes());
        bytes.extend_from_slice(&(sample_rate * 2).to_le_bytes());
        bytes.extend_from_slice(&2u16.to_le_bytes());
        bytes.extend_from_slice(&16u16.to_le_bytes());
        bytes.extend_from_slice(b"data");
        bytes.extend_from_slice(&data_len.to_le_bytes());
        for sample in samples {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
        bytes
    }
}
