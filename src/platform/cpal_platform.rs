use super::mixer::{Mixer, VoiceCommand};
use super::{VoiceHandle, VoiceParams, VoicePlatform};
use crate::audio_data::PcmData;
use crate::config::EngineDesc;
use crate::error::{RailSonicError, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SizedSample};
use crossbeam_channel::{Receiver, Sender};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Device name reported by the generic software driver, which mixes few voices well.
const GENERIC_SOFTWARE_DEVICE: &str = "Generic Software";
const GENERIC_SOFTWARE_VOICES: usize = 16;

/// Voice platform backed by the default cpal output device.
///
/// Voices are mixed in software inside the stream callback. The engine side
/// only ever sends commands over a channel, so no call here blocks on the
/// audio thread.
pub struct CpalPlatform {
    stream: Option<cpal::Stream>,
    commands: Sender<VoiceCommand>,
    finished: Receiver<u64>,
    finished_voices: HashSet<u64>,
    live_voices: HashSet<u64>,
    next_voice: u64,
    max_voices: usize,
    sample_rate: u32,
    device_name: String,
    frames_processed: Arc<AtomicUsize>,
}

impl CpalPlatform {
    /// Opens the default output device and starts its stream.
    pub fn open(desc: &EngineDesc) -> Result<Self> {
        let host = cpal::default_host();
        let device = host.default_output_device().ok_or_else(|| {
            RailSonicError::AudioDevice("No default output device available".into())
        })?;
        let device_name = device.name().unwrap_or_else(|_| "<unknown>".to_string());

        let default_config = device.default_output_config().map_err(|e| {
            RailSonicError::AudioDevice(format!("Failed to get default config: {}", e))
        })?;

        let config = cpal::StreamConfig {
            channels: default_config.channels(),
            sample_rate: default_config.sample_rate(),
            buffer_size: cpal::BufferSize::Fixed(desc.block_size as u32),
        };
        let sample_rate = config.sample_rate.0;

        let max_voices = if device_name.contains(GENERIC_SOFTWARE_DEVICE) {
            desc.hardware_voices.min(GENERIC_SOFTWARE_VOICES)
        } else {
            desc.hardware_voices
        };

        let (command_tx, command_rx) = crossbeam_channel::unbounded();
        let (finished_tx, finished_rx) = crossbeam_channel::unbounded();
        let mixer = Mixer::new(sample_rate, max_voices);
        let frames_processed = Arc::new(AtomicUsize::new(0));

        let stream = match default_config.sample_format() {
            cpal::SampleFormat::F32 => Self::create_stream::<f32>(
                &device,
                &config,
                mixer,
                command_rx,
                finished_tx,
                frames_processed.clone(),
            )?,
            cpal::SampleFormat::I16 => Self::create_stream::<i16>(
                &device,
                &config,
                mixer,
                command_rx,
                finished_tx,
                frames_processed.clone(),
            )?,
            cpal::SampleFormat::U16 => Self::create_stream::<u16>(
                &device,
                &config,
                mixer,
                command_rx,
                finished_tx,
                frames_processed.clone(),
            )?,
            format => {
                return Err(RailSonicError::AudioFormat(format!(
                    "Unsupported sample format {:?}",
                    format
                )));
            }
        };

        stream.play().map_err(|e| {
            RailSonicError::AudioDevice(format!("Failed to start stream: {}", e))
        })?;

        log::info!(
            "Opened audio device '{}' ({} Hz, {} channels, {} voices)",
            device_name,
            sample_rate,
            config.channels,
            max_voices
        );

        Ok(Self {
            stream: Some(stream),
            commands: command_tx,
            finished: finished_rx,
            finished_voices: HashSet::new(),
            live_voices: HashSet::new(),
            next_voice: 0,
            max_voices,
            sample_rate,
            device_name,
            frames_processed,
        })
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Output frames the mixer has produced since the stream started.
    pub fn frames_processed(&self) -> usize {
        self.frames_processed.load(Ordering::Relaxed)
    }

    fn create_stream<T>(
        device: &cpal::Device,
        config: &cpal::StreamConfig,
        mut mixer: Mixer,
        commands: Receiver<VoiceCommand>,
        finished: Sender<u64>,
        frames_processed: Arc<AtomicUsize>,
    ) -> Result<cpal::Stream>
    where
        T: SizedSample + FromSample<f32>,
    {
        let channels = config.channels;
        let block_samples = match config.buffer_size {
            cpal::BufferSize::Fixed(frames) => frames as usize * channels as usize,
            cpal::BufferSize::Default => 0,
        };
        let mut mix_buffer: Vec<f32> = Vec::with_capacity(block_samples);

        let stream = device
            .build_output_stream(
                config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    while let Ok(command) = commands.try_recv() {
                        mixer.apply(command);
                    }

                    mix_buffer.resize(data.len(), 0.0);
                    let result = mixer.mix(&mut mix_buffer, channels);

                    for (sample, &value) in data.iter_mut().zip(mix_buffer.iter()) {
                        *sample = T::from_sample(value);
                    }

                    frames_processed.fetch_add(result.frames_filled, Ordering::Relaxed);
                    for &id in result.finished_voices {
                        let _ = finished.send(id);
                    }
                },
                move |err| {
                    log::error!("Audio stream error: {}", err);
                },
                None,
            )
            .map_err(|e| RailSonicError::AudioDevice(format!("Failed to build stream: {}", e)))?;

        Ok(stream)
    }

    fn send(&self, command: VoiceCommand) {
        if self.commands.send(command).is_err() {
            log::warn!("Audio stream is gone, dropping voice command");
        }
    }

    fn drain_finished(&mut self) {
        while let Ok(id) = self.finished.try_recv() {
            if self.live_voices.contains(&id) {
                self.finished_voices.insert(id);
            }
        }
    }
}

impl VoicePlatform for CpalPlatform {
    fn max_voices(&self) -> usize {
        self.max_voices
    }

    fn output_sample_rate(&self) -> Option<u32> {
        Some(self.sample_rate)
    }

    fn bind(&mut self, pcm: &Arc<PcmData>, looped: bool) -> Option<VoiceHandle> {
        if self.live_voices.len() >= self.max_voices {
            return None;
        }
        let id = self.next_voice;
        self.next_voice += 1;
        self.live_voices.insert(id);
        self.send(VoiceCommand::Bind {
            id,
            pcm: Arc::clone(pcm),
            looped,
        });
        Some(VoiceHandle(id))
    }

    fn update(&mut self, voice: VoiceHandle, params: &VoiceParams) {
        self.send(VoiceCommand::Update(voice.0, *params));
    }

    fn play(&mut self, voice: VoiceHandle) {
        self.send(VoiceCommand::Play(voice.0));
    }

    fn pause(&mut self, voice: VoiceHandle) {
        self.send(VoiceCommand::Pause(voice.0));
    }

    fn resume(&mut self, voice: VoiceHandle) {
        self.send(VoiceCommand::Resume(voice.0));
    }

    fn release(&mut self, voice: VoiceHandle) {
        self.live_voices.remove(&voice.0);
        self.finished_voices.remove(&voice.0);
        self.send(VoiceCommand::Release(voice.0));
    }

    fn is_finished(&mut self, voice: VoiceHandle) -> bool {
        self.drain_finished();
        self.finished_voices.contains(&voice.0)
    }
}

impl Drop for CpalPlatform {
    fn drop(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                log::debug!("Failed to pause stream on close: {}", e);
            }
            drop(stream);
            log::info!("Closed audio device '{}'", self.device_name);
        }
    }
}
