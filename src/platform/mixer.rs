// Software voice mixer run inside the output callback.
// Each voice resamples its mono buffer by linear interpolation and is panned
// from its listener-local position.

use super::VoiceParams;
use crate::audio_data::PcmData;
use std::collections::HashMap;
use std::f32::consts::FRAC_PI_4;
use std::sync::Arc;

/// Commands sent from the engine thread to the mixer
#[derive(Debug)]
pub enum VoiceCommand {
    Bind {
        id: u64,
        pcm: Arc<PcmData>,
        looped: bool,
    },
    Update(u64, VoiceParams),
    Play(u64),
    Pause(u64),
    Resume(u64),
    Release(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VoiceState {
    Bound,
    Playing,
    Paused,
    Finished,
}

#[derive(Debug)]
struct Voice {
    pcm: Arc<PcmData>,
    looped: bool,
    cursor: f64,
    /// Source frames advanced per output frame at pitch 1
    rate_ratio: f64,
    pitch: f32,
    left: f32,
    right: f32,
    state: VoiceState,
}

impl Voice {
    fn new(pcm: Arc<PcmData>, looped: bool, output_rate: u32) -> Self {
        let rate_ratio = pcm.sample_rate() as f64 / output_rate.max(1) as f64;
        Self {
            pcm,
            looped,
            cursor: 0.0,
            rate_ratio,
            pitch: 1.0,
            left: 0.0,
            right: 0.0,
            state: VoiceState::Bound,
        }
    }

    fn apply(&mut self, params: &VoiceParams) {
        self.pitch = params.pitch.max(0.0);
        let (left, right) = pan_gains(params);
        self.left = left * params.gain;
        self.right = right * params.gain;
    }

    fn sample_at(&self, position: f64) -> f32 {
        let samples = self.pcm.samples();
        let index = position as usize;
        let fraction = (position - index as f64) as f32;
        let a = samples.get(index).copied().unwrap_or(0.0);
        let b = match samples.get(index + 1) {
            Some(&b) => b,
            None if self.looped => samples.first().copied().unwrap_or(0.0),
            None => 0.0,
        };
        a + (b - a) * fraction
    }

    /// Adds this voice into `out`. Returns the frames written.
    fn fill_buffer(&mut self, out: &mut [f32], channels: usize) -> usize {
        if self.state != VoiceState::Playing {
            return 0;
        }
        let len = self.pcm.len() as f64;
        if len == 0.0 {
            self.state = VoiceState::Finished;
            return 0;
        }

        let step = self.rate_ratio * self.pitch as f64;
        let mut frames_filled = 0;
        for frame in out.chunks_mut(channels) {
            if self.cursor >= len {
                if self.looped {
                    self.cursor %= len;
                } else {
                    self.state = VoiceState::Finished;
                    break;
                }
            }

            let sample = self.sample_at(self.cursor);
            match frame {
                [mono] => *mono += sample * 0.5 * (self.left + self.right),
                [left, right, ..] => {
                    *left += sample * self.left;
                    *right += sample * self.right;
                }
                [] => {}
            }

            self.cursor += step;
            frames_filled += 1;
        }
        frames_filled
    }
}

/// Constant-power left and right gains from the listener-local direction.
fn pan_gains(params: &VoiceParams) -> (f32, f32) {
    let distance = params.position.length();
    let pan = if distance > f32::EPSILON {
        (params.position.x / distance).clamp(-1.0, 1.0)
    } else {
        0.0
    };
    let angle = (pan + 1.0) * FRAC_PI_4;
    (angle.cos(), angle.sin())
}

/// Result of one mix pass
pub struct MixResult<'a> {
    pub frames_filled: usize,
    /// Voices that reached the end of a non-looped buffer during this pass
    pub finished_voices: &'a [u64],
}

/// Mixes up to `max_voices` voices without allocating in the callback once
/// every voice slot has been used.
pub struct Mixer {
    voices: HashMap<u64, Voice>,
    finished: Vec<u64>,
    output_rate: u32,
}

impl Mixer {
    pub fn new(output_rate: u32, max_voices: usize) -> Self {
        Self {
            voices: HashMap::with_capacity(max_voices),
            finished: Vec::with_capacity(max_voices),
            output_rate,
        }
    }

    pub fn apply(&mut self, command: VoiceCommand) {
        match command {
            VoiceCommand::Bind { id, pcm, looped } => {
                self.voices
                    .insert(id, Voice::new(pcm, looped, self.output_rate));
            }
            VoiceCommand::Update(id, params) => {
                if let Some(voice) = self.voices.get_mut(&id) {
                    voice.apply(&params);
                }
            }
            VoiceCommand::Play(id) => self.set_state(id, VoiceState::Bound, VoiceState::Playing),
            VoiceCommand::Pause(id) => self.set_state(id, VoiceState::Playing, VoiceState::Paused),
            VoiceCommand::Resume(id) => self.set_state(id, VoiceState::Paused, VoiceState::Playing),
            VoiceCommand::Release(id) => {
                self.voices.remove(&id);
            }
        }
    }

    fn set_state(&mut self, id: u64, from: VoiceState, to: VoiceState) {
        match self.voices.get_mut(&id) {
            Some(voice) if voice.state == from => voice.state = to,
            Some(voice) => log::debug!(
                "Mixer: voice {} ignores {:?} -> {:?} while {:?}",
                id,
                from,
                to,
                voice.state
            ),
            None => log::debug!("Mixer: unknown voice {}", id),
        }
    }

    /// Clears `out` and mixes every playing voice into it.
    pub fn mix(&mut self, out: &mut [f32], channels: u16) -> MixResult<'_> {
        out.fill(0.0);
        let channels = channels.max(1) as usize;

        let mut frames_filled = 0;
        self.finished.clear();
        for (id, voice) in self.voices.iter_mut() {
            let was_playing = voice.state == VoiceState::Playing;
            frames_filled = frames_filled.max(voice.fill_buffer(out, channels));
            if was_playing && voice.state == VoiceState::Finished {
                self.finished.push(*id);
            }
        }

        for sample in out.iter_mut() {
            *sample = sample.clamp(-1.0, 1.0);
        }

        MixResult {
            frames_filled,
            finished_voices: &self.finished,
        }
    }
}
