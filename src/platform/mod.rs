//! The hardware side of voice arbitration.
//!
//! The engine decides which sources deserve a voice; a [`VoicePlatform`]
//! owns the voices themselves. Every platform call is made from inside
//! [`RailSonicEngine::update`](crate::RailSonicEngine::update), never from
//! source setters.

mod cpal_platform;
mod mixer;

pub use cpal_platform::CpalPlatform;

use crate::audio_data::PcmData;
use crate::math::Vec3;
use std::sync::Arc;

/// Opaque handle to a voice owned by a platform.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct VoiceHandle(pub(crate) u64);

impl std::fmt::Display for VoiceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Voice({})", self.0)
    }
}

/// Per-frame parameters of a bound voice.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoiceParams {
    /// Position relative to the listener, in the listener's axes
    pub position: Vec3,
    /// World velocity of the emitter
    pub velocity: Vec3,
    pub pitch: f32,
    /// Attenuated gain in `[0, 1]`
    pub gain: f32,
}

/// A bounded set of voices that can each play one mono buffer.
pub trait VoicePlatform {
    /// Number of voices the platform can mix at once.
    fn max_voices(&self) -> usize;

    /// Rate buffers should be resampled to, when the platform has one.
    fn output_sample_rate(&self) -> Option<u32>;

    /// Allocates a stopped voice for `pcm`. `None` when no voice is free.
    fn bind(&mut self, pcm: &Arc<PcmData>, looped: bool) -> Option<VoiceHandle>;

    fn update(&mut self, voice: VoiceHandle, params: &VoiceParams);

    fn play(&mut self, voice: VoiceHandle);

    fn pause(&mut self, voice: VoiceHandle);

    fn resume(&mut self, voice: VoiceHandle);

    /// Stops the voice and returns it to the platform.
    fn release(&mut self, voice: VoiceHandle);

    /// Whether a non-looped voice has played to its end.
    fn is_finished(&mut self, voice: VoiceHandle) -> bool;
}
