//! The arbitration core.
//!
//! [`RailSonicEngine`] owns every registered buffer and every live source and,
//! once per frame, decides which sources get one of the platform's scarce
//! voices. Sources are ranked by attenuated gain; the loudest ones up to the
//! voice cap are bound and everything else waits without a voice while
//! remaining logically playing.

use crate::attenuation::{AttenuationModel, GAIN_THRESHOLD, InverseModel, LinearModel};
use crate::audio_data::{LoadOptions, Sound, SoundLoader, SymphoniaLoader};
use crate::buffer::{BufferHandle, SoundBuffer, SoundOrigin};
use crate::config::EngineDesc;
use crate::error::{RailSonicError, Result};
use crate::math::{Listener, Vec3};
use crate::platform::{CpalPlatform, VoiceParams, VoicePlatform};
use crate::pool::{SourceHandle, SourcePool};
use crate::source::{SoundAnchor, SoundSource, SoundSourceState};
use std::path::Path;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

/// Frames longer than this (seconds) are treated as stalls.
const MAX_FRAME_TIME: f32 = 0.5;

/// Radius scale for sounds outside the car the listener sits in.
const INTERIOR_RADIUS_FACTOR: f32 = 0.5;

const INITIAL_BUFFER_CAPACITY: usize = 16;

/// What one [`RailSonicEngine::update`] call did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UpdateStats {
    /// Sources whose gain was computed
    pub gains_computed: usize,
    pub voices_bound: usize,
    /// Voices handed back because their source stopped, ended, went silent or was muted
    pub voices_released: usize,
    /// Voices taken from sources that dropped out of the ranking
    pub voices_stolen: usize,
    /// Stopped sources removed from the pool
    pub sources_removed: usize,
}

struct Candidate {
    index: usize,
    gain: f32,
    unclamped_gain: f32,
    distance: f32,
    position: Vec3,
    velocity: Vec3,
}

pub struct RailSonicEngine {
    desc: EngineDesc,
    platform: Option<Box<dyn VoicePlatform>>,
    loader: Box<dyn SoundLoader>,
    buffers: Vec<SoundBuffer>,
    sources: SourcePool,
    listener: Listener,
    linear: LinearModel,
    inverse: InverseModel,
    global_mute: bool,
    system_max_sounds: usize,
    device_failed: bool,
}

impl RailSonicEngine {
    /// Creates an engine without a device. Call [`initialize`](Self::initialize)
    /// to open the default output.
    pub fn new(desc: EngineDesc) -> Result<Self> {
        Self::with_loader(desc, Box::new(SymphoniaLoader))
    }

    /// Creates an engine that decodes files with `loader`.
    pub fn with_loader(desc: EngineDesc, loader: Box<dyn SoundLoader>) -> Result<Self> {
        desc.validate()?;
        Ok(Self {
            linear: LinearModel::new(desc.sound_range),
            inverse: InverseModel::new(),
            desc,
            platform: None,
            loader,
            buffers: Vec::with_capacity(INITIAL_BUFFER_CAPACITY),
            sources: SourcePool::new(),
            listener: Listener::default(),
            global_mute: false,
            system_max_sounds: 0,
            device_failed: false,
        })
    }

    /// Creates an engine driving an already opened platform.
    pub fn with_platform(
        desc: EngineDesc,
        platform: Box<dyn VoicePlatform>,
        loader: Box<dyn SoundLoader>,
    ) -> Result<Self> {
        let mut engine = Self::with_loader(desc, loader)?;
        engine.attach(platform);
        Ok(engine)
    }

    /// Opens the default output device.
    ///
    /// A device failure is reported once. The engine stays usable afterwards
    /// and simply produces no sound.
    pub fn initialize(&mut self) -> Result<()> {
        if self.platform.is_some() {
            return Ok(());
        }
        if self.device_failed {
            return Err(RailSonicError::AudioDevice(
                "audio device failed to open earlier".into(),
            ));
        }
        match CpalPlatform::open(&self.desc) {
            Ok(platform) => {
                self.attach(Box::new(platform));
                Ok(())
            }
            Err(e) => {
                log::error!("Audio device unavailable, sound is disabled: {}", e);
                self.device_failed = true;
                Err(e)
            }
        }
    }

    fn attach(&mut self, platform: Box<dyn VoicePlatform>) {
        self.system_max_sounds = self.desc.max_voices.min(platform.max_voices());
        log::info!(
            "RailSonic engine initialized with {} voices",
            self.system_max_sounds
        );
        self.platform = Some(platform);
    }

    /// Stops every source, returns all voices, unloads all buffers and closes
    /// the platform. Registered buffers stay valid and load again on demand.
    pub fn deinitialize(&mut self) {
        for source in self.sources.iter_mut() {
            release_voice(&mut self.platform, source);
            source.set_state(SoundSourceState::Stopped);
        }
        self.compact(&mut UpdateStats::default());
        self.unload_all_buffers();
        if self.platform.take().is_some() {
            log::info!("RailSonic engine deinitialized");
        }
        self.system_max_sounds = 0;
    }

    /// Whether a platform is attached.
    pub fn is_active(&self) -> bool {
        self.platform.is_some()
    }

    pub fn desc(&self) -> &EngineDesc {
        &self.desc
    }

    /// Most voices bound at once after an update.
    pub fn system_max_sounds(&self) -> usize {
        self.system_max_sounds
    }

    fn load_options(&self) -> LoadOptions {
        match self.platform.as_deref() {
            Some(platform) if self.desc.resample_on_load => LoadOptions {
                target_sample_rate: platform.output_sample_rate(),
            },
            _ => LoadOptions::default(),
        }
    }

    // Buffers

    /// Registers a sound file. Registering the same path again returns the
    /// first handle.
    ///
    /// Nothing is read until the buffer first plays. A missing or undecodable
    /// file leaves an ignored buffer that plays silently.
    pub fn register_buffer_path(&mut self, path: impl AsRef<Path>, radius: f32) -> BufferHandle {
        let origin = SoundOrigin::Path(path.as_ref().to_path_buf());
        match self.find_buffer(&origin) {
            Some(handle) => handle,
            None => self.push_buffer(SoundBuffer::new(origin, radius)),
        }
    }

    /// Registers in-memory PCM. The same `Arc` always maps to the same handle.
    pub fn register_buffer_raw(&mut self, sound: Arc<Sound>, radius: f32) -> BufferHandle {
        let origin = SoundOrigin::Raw(sound);
        match self.find_buffer(&origin) {
            Some(handle) => handle,
            None => self.push_buffer(SoundBuffer::new(origin, radius)),
        }
    }

    /// Registers an independent, unloaded copy of a buffer.
    pub fn clone_buffer(&mut self, handle: BufferHandle) -> Option<BufferHandle> {
        let copy = self.buffers.get(handle.0)?.clone_unloaded();
        Some(self.push_buffer(copy))
    }

    fn find_buffer(&self, origin: &SoundOrigin) -> Option<BufferHandle> {
        self.buffers
            .iter()
            .position(|b| b.origin().same_as(origin))
            .map(BufferHandle)
    }

    fn push_buffer(&mut self, buffer: SoundBuffer) -> BufferHandle {
        log::debug!("Registered sound buffer {}", buffer.origin());
        self.buffers.push(buffer);
        BufferHandle(self.buffers.len() - 1)
    }

    pub fn buffer(&self, handle: BufferHandle) -> Option<&SoundBuffer> {
        self.buffers.get(handle.0)
    }

    /// Decodes a buffer ahead of its first playback. Returns whether it is loaded.
    pub fn load_buffer(&mut self, handle: BufferHandle) -> bool {
        let options = self.load_options();
        match self.buffers.get_mut(handle.0) {
            Some(buffer) => {
                buffer.load(self.loader.as_ref(), &options);
                buffer.is_loaded()
            }
            None => false,
        }
    }

    /// Drops the decoded data of every buffer. Playing voices keep the samples
    /// they were bound with.
    pub fn unload_all_buffers(&mut self) {
        for buffer in &mut self.buffers {
            buffer.unload();
        }
    }

    /// Length of a buffer's sound, loading it if needed.
    pub fn buffer_duration(&mut self, handle: BufferHandle) -> Option<Duration> {
        let options = self.load_options();
        let buffer = self.buffers.get_mut(handle.0)?;
        Some(buffer.duration(self.loader.as_ref(), &options))
    }

    // Sources

    /// Starts a new source on `buffer`. The source is logically playing at
    /// once; it gets a voice during the next update if it ranks high enough.
    ///
    /// `position` is relative to `parent` when one is given.
    pub fn play_sound(
        &mut self,
        buffer: BufferHandle,
        pitch: f32,
        volume: f32,
        position: Vec3,
        parent: Option<&Rc<dyn SoundAnchor>>,
        looped: bool,
    ) -> Result<SourceHandle> {
        let radius = self
            .buffers
            .get(buffer.0)
            .ok_or_else(|| RailSonicError::Engine(format!("unknown {}", buffer)))?
            .radius();
        let source = SoundSource::new(buffer, radius, pitch, volume, position, parent, looped);
        let handle = self.sources.insert(source);
        log::debug!("Source {} created on {}", handle, buffer);
        Ok(handle)
    }

    pub fn source(&self, handle: SourceHandle) -> Option<&SoundSource> {
        self.sources.get(handle)
    }

    pub fn source_mut(&mut self, handle: SourceHandle) -> Option<&mut SoundSource> {
        self.sources.get_mut(handle)
    }

    /// Whether the source still exists and wants to be heard.
    pub fn is_playing(&self, handle: SourceHandle) -> bool {
        self.sources.get(handle).is_some_and(SoundSource::is_playing)
    }

    /// Requests a stop. Returns false for a handle that no longer resolves.
    pub fn stop_sound(&mut self, handle: SourceHandle) -> bool {
        match self.sources.get_mut(handle) {
            Some(source) => {
                source.stop();
                true
            }
            None => false,
        }
    }

    pub fn stop_all_sounds(&mut self) {
        for source in self.sources.iter_mut() {
            source.stop();
        }
    }

    /// Stops exactly the sources attached to `parent`.
    pub fn stop_all_sounds_of(&mut self, parent: &Rc<dyn SoundAnchor>) {
        for source in self.sources.iter_mut() {
            if source.is_parented_by(parent) {
                source.stop();
            }
        }
    }

    // Listener and global state

    pub fn listener(&self) -> &Listener {
        &self.listener
    }

    pub fn set_listener(&mut self, listener: Listener) {
        self.listener = listener;
    }

    pub fn listener_mut(&mut self) -> &mut Listener {
        &mut self.listener
    }

    /// While muted no source holds a voice and one-shot sounds are dropped.
    pub fn set_global_mute(&mut self, mute: bool) {
        if self.global_mute != mute {
            log::info!("Global mute {}", if mute { "on" } else { "off" });
        }
        self.global_mute = mute;
    }

    pub fn is_muted(&self) -> bool {
        self.global_mute
    }

    pub fn outer_radius_factor(&self) -> f32 {
        self.linear.outer_radius_factor()
    }

    pub fn log_clamp_factor(&self) -> f32 {
        self.inverse.log_clamp_factor()
    }

    // Diagnostics

    pub fn registered_buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn loaded_buffer_count(&self) -> usize {
        self.buffers.iter().filter(|b| b.is_loaded()).count()
    }

    pub fn registered_source_count(&self) -> usize {
        self.sources.len()
    }

    /// Sources audible on the platform right now. Pending sources waiting for
    /// a voice are not counted.
    pub fn playing_source_count(&self) -> usize {
        self.sources
            .iter()
            .filter(|s| s.state() == SoundSourceState::Playing)
            .count()
    }

    /// Sources currently holding a platform voice.
    pub fn bound_voice_count(&self) -> usize {
        self.sources.iter().filter(|s| s.has_voice()).count()
    }

    // Per-frame update

    /// Runs the per-frame update with the model from the engine descriptor.
    pub fn update_default(&mut self, time_elapsed: f32) -> UpdateStats {
        self.update(time_elapsed, self.desc.attenuation_model)
    }

    /// Runs one frame of voice arbitration.
    ///
    /// A zero, negative or stalled (`> 0.5 s`) frame only applies pending
    /// pause, resume and stop requests and removes stopped sources; gains are
    /// left untouched so the next real frame continues smoothly.
    pub fn update(&mut self, time_elapsed: f32, model: AttenuationModel) -> UpdateStats {
        let mut stats = UpdateStats::default();

        if !(time_elapsed > 0.0 && time_elapsed <= MAX_FRAME_TIME) {
            self.flush_pending(&mut stats);
            self.compact(&mut stats);
            return stats;
        }

        self.reap(&mut stats);
        self.flush_pending(&mut stats);
        if self.global_mute || self.platform.is_none() {
            self.silence(&mut stats);
        } else {
            self.arbitrate(time_elapsed, model, &mut stats);
        }
        self.compact(&mut stats);

        debug_assert!(self.bound_voice_count() <= self.system_max_sounds);
        stats
    }

    /// Settles sources whose voice ran out or whose parent is gone.
    fn reap(&mut self, stats: &mut UpdateStats) {
        for source in self.sources.iter_mut() {
            if source.state() == SoundSourceState::Stopped {
                continue;
            }
            let orphaned = source.parent().is_some_and(|p| p.strong_count() == 0);
            let finished = !source.is_looped()
                && source.state() == SoundSourceState::Playing
                && match (source.voice(), self.platform.as_deref_mut()) {
                    (Some(voice), Some(platform)) => platform.is_finished(voice),
                    _ => false,
                };
            if orphaned || finished {
                if release_voice(&mut self.platform, source) {
                    stats.voices_released += 1;
                }
                source.set_state(SoundSourceState::Stopped);
            }
        }
    }

    /// Applies pause, resume and stop requests to the platform.
    fn flush_pending(&mut self, stats: &mut UpdateStats) {
        for source in self.sources.iter_mut() {
            match source.state() {
                SoundSourceState::PausePending => {
                    if let (Some(voice), Some(platform)) =
                        (source.voice(), self.platform.as_deref_mut())
                    {
                        platform.pause(voice);
                    }
                    source.set_state(SoundSourceState::Paused);
                }
                SoundSourceState::ResumePending => {
                    match (source.voice(), self.platform.as_deref_mut()) {
                        (Some(voice), Some(platform)) => {
                            platform.resume(voice);
                            source.set_state(SoundSourceState::Playing);
                        }
                        _ => source.set_state(SoundSourceState::PlayPending),
                    }
                }
                SoundSourceState::StopPending => {
                    if release_voice(&mut self.platform, source) {
                        stats.voices_released += 1;
                    }
                    source.set_state(SoundSourceState::Stopped);
                }
                _ => {}
            }
        }
    }

    /// Returns the voices of playing sources. Looped sources wait to be bound
    /// again, one-shots end. Paused sources keep their voice.
    fn silence(&mut self, stats: &mut UpdateStats) {
        for source in self.sources.iter_mut() {
            if !source.is_playing() {
                continue;
            }
            if release_voice(&mut self.platform, source) {
                stats.voices_released += 1;
            }
            if source.is_looped() {
                source.set_state(SoundSourceState::PlayPending);
            } else {
                source.set_state(SoundSourceState::Stopped);
            }
        }
    }

    fn arbitrate(&mut self, time_elapsed: f32, model: AttenuationModel, stats: &mut UpdateStats) {
        if model == AttenuationModel::Linear {
            self.linear.advance(time_elapsed, self.listener.speed());
        }

        let listener_position = self.listener.position();
        let mut candidates = Vec::new();
        for (index, source) in self.sources.iter().enumerate() {
            if !source.is_playing() {
                continue;
            }
            let Some((position, velocity)) = source.resolve() else {
                continue;
            };
            let radius = if self.listener.is_outside_of(source.parent()) {
                source.radius() * INTERIOR_RADIUS_FACTOR
            } else {
                source.radius()
            };
            let distance = position.distance(listener_position);
            let gain = match model {
                AttenuationModel::Linear => self.linear.gain(distance, radius, source.volume()),
                AttenuationModel::Inverse => self.inverse.gain(distance, radius, source.volume()),
            };
            stats.gains_computed += 1;
            candidates.push(Candidate {
                index,
                gain,
                unclamped_gain: InverseModel::unclamped_gain(distance, radius) * source.volume(),
                distance,
                position,
                velocity,
            });
        }

        candidates.sort_by(|a, b| b.gain.total_cmp(&a.gain));

        // paused voices stay bound and count against the cap
        let held = self
            .sources
            .iter()
            .filter(|s| s.has_voice() && !s.is_playing())
            .count();
        let slots = self.system_max_sounds.saturating_sub(held);

        if model == AttenuationModel::Inverse {
            // the cutoff may already be clamped to silence
            let cutoff = candidates
                .iter()
                .filter(|c| c.unclamped_gain > 0.0)
                .nth(slots)
                .map(|c| (c.unclamped_gain, c.distance));
            self.inverse.adapt(time_elapsed, cutoff);
        }

        let (audible, silent): (Vec<_>, Vec<_>) = candidates
            .into_iter()
            .partition(|c| c.gain >= GAIN_THRESHOLD);

        for candidate in &silent {
            let source = self.sources.get_index_mut(candidate.index);
            if release_voice(&mut self.platform, source) {
                stats.voices_released += 1;
            }
            if source.is_looped() {
                source.set_state(SoundSourceState::PlayPending);
            } else {
                source.set_state(SoundSourceState::Stopped);
            }
        }

        let budget = slots.min(audible.len());

        let options = self.load_options();
        let Some(platform) = self.platform.as_deref_mut() else {
            return;
        };
        let (winners, losers) = audible.split_at(budget);

        for candidate in losers {
            let source = self.sources.get_index_mut(candidate.index);
            if let Some(voice) = source.take_voice() {
                platform.release(voice);
                source.set_state(SoundSourceState::PlayPending);
                stats.voices_stolen += 1;
                log::debug!(
                    "{} taken from a source at {:.1} m (gain {:.4})",
                    voice,
                    candidate.distance,
                    candidate.gain
                );
            }
        }

        for candidate in winners {
            let source = self.sources.get_index_mut(candidate.index);
            if !source.has_voice() {
                let Some(buffer) = self.buffers.get_mut(source.buffer().0) else {
                    source.set_state(SoundSourceState::Stopped);
                    continue;
                };
                buffer.load(self.loader.as_ref(), &options);
                if buffer.is_ignored() {
                    source.set_state(SoundSourceState::Stopped);
                    continue;
                }
                let Some(pcm) = buffer.pcm() else {
                    continue;
                };
                match platform.bind(pcm, source.is_looped()) {
                    Some(voice) => {
                        source.bind_voice(voice);
                        stats.voices_bound += 1;
                    }
                    None => {
                        log::debug!("No free voice for a source at {:.1} m", candidate.distance);
                        continue;
                    }
                }
            }

            let Some(voice) = source.voice() else {
                continue;
            };
            let params = VoiceParams {
                position: self.listener.pose.to_local(candidate.position - listener_position),
                velocity: candidate.velocity,
                pitch: source.pitch(),
                gain: candidate.gain,
            };
            platform.update(voice, &params);
            if source.state() == SoundSourceState::PlayPending {
                platform.play(voice);
                source.set_state(SoundSourceState::Playing);
            }
        }
    }

    /// Removes stopped sources by swapping in the last one.
    fn compact(&mut self, stats: &mut UpdateStats) {
        let mut index = 0;
        while index < self.sources.len() {
            let source = self.sources.get_index_mut(index);
            if source.state() == SoundSourceState::Stopped {
                if release_voice(&mut self.platform, source) {
                    stats.voices_released += 1;
                }
                self.sources.swap_remove(index);
                stats.sources_removed += 1;
            } else {
                index += 1;
            }
        }
    }
}

impl Drop for RailSonicEngine {
    fn drop(&mut self) {
        self.deinitialize();
    }
}

/// Hands a source's voice back to the platform. Returns whether it had one.
fn release_voice(platform: &mut Option<Box<dyn VoicePlatform>>, source: &mut SoundSource) -> bool {
    match source.take_voice() {
        Some(voice) => {
            if let Some(platform) = platform.as_deref_mut() {
                platform.release(voice);
            }
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::{Pose, Quat};
    use crate::testutil::{CountingLoader, FakePlatform, PlatformCall, TestCar, sound_file};

    const FRAME: f32 = 1.0 / 60.0;

    fn engine_with(max_voices: usize, loader: CountingLoader) -> (RailSonicEngine, FakePlatform) {
        let platform = FakePlatform::new(max_voices);
        let engine = RailSonicEngine::with_platform(
            EngineDesc::default(),
            Box::new(platform.clone()),
            Box::new(loader),
        )
        .unwrap();
        (engine, platform)
    }

    fn engine(max_voices: usize) -> (RailSonicEngine, FakePlatform) {
        engine_with(max_voices, CountingLoader::sixteen_bit())
    }

    fn raw_sound() -> Arc<Sound> {
        Arc::new(Sound::new(8000, 16, vec![vec![0; 16000]]).unwrap())
    }

    fn play_at(engine: &mut RailSonicEngine, buffer: BufferHandle, x: f32, looped: bool) -> SourceHandle {
        engine
            .play_sound(buffer, 1.0, 1.0, Vec3::new(x, 0.0, 0.0), None, looped)
            .unwrap()
    }

    #[test]
    fn test_register_path_is_idempotent() {
        let (mut engine, _) = engine(16);
        let path = sound_file("idempotent.wav");

        let a = engine.register_buffer_path(&path, 10.0);
        let b = engine.register_buffer_path(&path, 10.0);

        assert_eq!(a, b);
        assert_eq!(engine.registered_buffer_count(), 1);
    }

    #[test]
    fn test_missing_path_registers_and_is_ignored() {
        let loader = CountingLoader::sixteen_bit();
        let (mut engine, platform) = engine_with(16, loader.clone());
        let buffer = engine.register_buffer_path("no/such/sound.wav", 10.0);
        assert_eq!(engine.registered_buffer_count(), 1);
        assert!(!engine.buffer(buffer).unwrap().is_ignored());

        let source = play_at(&mut engine, buffer, 1.0, true);
        engine.update(FRAME, AttenuationModel::Inverse);

        assert!(engine.buffer(buffer).unwrap().is_ignored());
        assert!(engine.source(source).is_none());
        assert_eq!(loader.calls(), 0);
        assert_eq!(platform.live_voices(), 0);
    }

    #[test]
    fn test_register_raw_dedups_by_identity() {
        let (mut engine, _) = engine(16);
        let sound = raw_sound();
        let a = engine.register_buffer_raw(Arc::clone(&sound), 10.0);
        let b = engine.register_buffer_raw(sound, 10.0);
        let c = engine.register_buffer_raw(raw_sound(), 10.0);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(engine.registered_buffer_count(), 2);
    }

    #[test]
    fn test_clone_buffer_registers_independent_copy() {
        let (mut engine, _) = engine(16);
        let original = engine.register_buffer_raw(raw_sound(), 12.0);
        assert!(engine.load_buffer(original));

        let copy = engine.clone_buffer(original).unwrap();
        assert_ne!(original, copy);
        assert_eq!(engine.registered_buffer_count(), 2);
        assert_eq!(engine.loaded_buffer_count(), 1);
        assert_eq!(engine.buffer(copy).unwrap().radius(), 12.0);
    }

    #[test]
    fn test_buffer_preload_and_unload() {
        let loader = CountingLoader::sixteen_bit();
        let (mut engine, _) = engine_with(16, loader.clone());
        let buffer = engine
            .register_buffer_path(sound_file("preload.wav"), 10.0);
        assert_eq!(loader.calls(), 0);

        let duration = engine.buffer_duration(buffer).unwrap();
        assert!((duration.as_secs_f64() - 1.0).abs() < 1e-9);
        assert_eq!(engine.loaded_buffer_count(), 1);

        engine.unload_all_buffers();
        assert_eq!(engine.loaded_buffer_count(), 0);
        assert_eq!(engine.registered_buffer_count(), 1);
        assert_eq!(loader.calls(), 1);
    }

    #[test]
    fn test_new_source_is_playing_without_voice() {
        let (mut engine, _) = engine(16);
        let buffer = engine.register_buffer_raw(raw_sound(), 15.0);
        let source = play_at(&mut engine, buffer, 5.0, false);

        assert!(engine.is_playing(source));
        assert!(!engine.source(source).unwrap().has_voice());
        assert_eq!(engine.playing_source_count(), 0);
    }

    #[test]
    fn test_sixteen_closest_of_twenty_get_voices() {
        let (mut engine, platform) = engine(16);
        let buffer = engine.register_buffer_raw(raw_sound(), 15.0);
        let sources: Vec<_> = (0..20)
            .map(|i| play_at(&mut engine, buffer, i as f32 * 10.0, true))
            .collect();

        let stats = engine.update(FRAME, AttenuationModel::Inverse);

        assert_eq!(engine.system_max_sounds(), 16);
        assert_eq!(stats.gains_computed, 20);
        assert_eq!(stats.voices_bound, 16);
        for (i, handle) in sources.iter().enumerate() {
            let source = engine.source(*handle).unwrap();
            assert!(source.is_playing());
            assert_eq!(source.has_voice(), i < 16, "source at {} m", i * 10);
        }
        assert_eq!(platform.live_voices(), 16);
        assert_eq!(engine.playing_source_count(), 16);
        assert_eq!(engine.registered_source_count(), 20);
    }

    #[test]
    fn test_voice_cap_holds_while_listener_moves() {
        let (mut engine, platform) = engine(8);
        let buffer = engine.register_buffer_raw(raw_sound(), 15.0);
        for i in 0..40 {
            play_at(&mut engine, buffer, i as f32 * 7.0, true);
        }

        for frame in 0..120 {
            engine.set_listener(Listener::new(Pose::from_position(Vec3::new(
                frame as f32 * 2.5,
                0.0,
                0.0,
            ))));
            let model = if frame % 2 == 0 {
                AttenuationModel::Inverse
            } else {
                AttenuationModel::Linear
            };
            engine.update(FRAME, model);
            assert!(engine.bound_voice_count() <= engine.system_max_sounds());
            assert!(platform.live_voices() <= 8);
        }
    }

    #[test]
    fn test_user_cap_limits_platform_voices() {
        let platform = FakePlatform::new(64);
        let engine = RailSonicEngine::with_platform(
            EngineDesc::default().max_voices(4),
            Box::new(platform),
            Box::new(CountingLoader::sixteen_bit()),
        )
        .unwrap();
        assert_eq!(engine.system_max_sounds(), 4);
    }

    #[test]
    fn test_louder_source_steals_voice() {
        let (mut engine, platform) = engine(2);
        let buffer = engine.register_buffer_raw(raw_sound(), 15.0);
        let near = play_at(&mut engine, buffer, 10.0, true);
        let far = play_at(&mut engine, buffer, 40.0, true);
        engine.update(FRAME, AttenuationModel::Inverse);
        assert!(engine.source(far).unwrap().has_voice());

        let closest = play_at(&mut engine, buffer, 1.0, true);
        let stats = engine.update(FRAME, AttenuationModel::Inverse);

        assert_eq!(stats.voices_stolen, 1);
        assert!(engine.source(closest).unwrap().has_voice());
        assert!(engine.source(near).unwrap().has_voice());
        let far = engine.source(far).unwrap();
        assert!(!far.has_voice());
        assert!(far.is_playing());
        assert_eq!(far.state(), SoundSourceState::PlayPending);
        assert_eq!(platform.live_voices(), 2);
    }

    #[test]
    fn test_stop_pending_source_makes_no_platform_calls() {
        let (mut engine, platform) = engine(16);
        let buffer = engine.register_buffer_raw(raw_sound(), 15.0);
        let source = play_at(&mut engine, buffer, 5.0, false);

        let before = platform.call_count();
        assert!(engine.stop_sound(source));
        assert_eq!(platform.call_count(), before);
        assert_eq!(
            engine.source(source).unwrap().state(),
            SoundSourceState::Stopped
        );
        assert!(!engine.is_playing(source));

        engine.update(FRAME, AttenuationModel::Inverse);
        assert_eq!(platform.call_count(), before);
        assert_eq!(engine.registered_source_count(), 0);
        assert!(engine.source(source).is_none());
    }

    #[test]
    fn test_stop_playing_source_is_removed_on_next_update() {
        let (mut engine, platform) = engine(16);
        let buffer = engine.register_buffer_raw(raw_sound(), 15.0);
        let source = play_at(&mut engine, buffer, 5.0, true);
        play_at(&mut engine, buffer, 6.0, true);
        engine.update(FRAME, AttenuationModel::Inverse);
        assert_eq!(
            engine.source(source).unwrap().state(),
            SoundSourceState::Playing
        );

        engine.stop_sound(source);
        assert_eq!(
            engine.source(source).unwrap().state(),
            SoundSourceState::StopPending
        );
        let count = engine.registered_source_count();
        let stats = engine.update(FRAME, AttenuationModel::Inverse);

        assert_eq!(engine.registered_source_count(), count - 1);
        assert_eq!(stats.sources_removed, 1);
        assert_eq!(platform.live_voices(), 1);
        assert!(!engine.stop_sound(source));
    }

    #[test]
    fn test_degenerate_frames_skip_gains_but_flush_stops() {
        let (mut engine, platform) = engine(16);
        let buffer = engine.register_buffer_raw(raw_sound(), 15.0);
        let stopped = play_at(&mut engine, buffer, 5.0, true);
        play_at(&mut engine, buffer, 8.0, true);
        engine.update(FRAME, AttenuationModel::Inverse);

        engine.stop_sound(stopped);
        let calls = platform.call_count();
        let stats = engine.update(0.0, AttenuationModel::Inverse);
        assert_eq!(stats.gains_computed, 0);
        assert_eq!(stats.sources_removed, 1);
        assert_eq!(platform.call_count(), calls + 1);
        assert!(matches!(platform.calls().last(), Some(PlatformCall::Release(_))));

        let calls = platform.call_count();
        let stats = engine.update(0.6, AttenuationModel::Linear);
        assert_eq!(stats.gains_computed, 0);
        assert_eq!(platform.call_count(), calls);
    }

    #[test]
    fn test_degenerate_frames_flush_pauses() {
        for time_elapsed in [0.0, -1.0, f32::NAN, 0.6] {
            let (mut engine, platform) = engine(16);
            let buffer = engine.register_buffer_raw(raw_sound(), 15.0);
            let source = play_at(&mut engine, buffer, 5.0, true);
            engine.update(FRAME, AttenuationModel::Inverse);

            engine.source_mut(source).unwrap().pause();
            let calls = platform.call_count();
            let stats = engine.update(time_elapsed, AttenuationModel::Inverse);

            assert_eq!(stats.gains_computed, 0, "dt {}", time_elapsed);
            assert_eq!(
                engine.source(source).unwrap().state(),
                SoundSourceState::Paused
            );
            assert_eq!(platform.call_count(), calls + 1);
            assert_eq!(platform.calls().last(), Some(&PlatformCall::Pause(0)));
        }
    }

    #[test]
    fn test_stop_all_sounds_of_parent() {
        let (mut engine, _) = engine(16);
        let buffer = engine.register_buffer_raw(raw_sound(), 15.0);
        let first: Rc<dyn SoundAnchor> = Rc::new(TestCar::at(Vec3::new(5.0, 0.0, 0.0)));
        let second: Rc<dyn SoundAnchor> = Rc::new(TestCar::at(Vec3::new(-5.0, 0.0, 0.0)));

        let on_first: Vec<_> = (0..3)
            .map(|_| {
                engine
                    .play_sound(buffer, 1.0, 1.0, Vec3::ZERO, Some(&first), true)
                    .unwrap()
            })
            .collect();
        let on_second = engine
            .play_sound(buffer, 1.0, 1.0, Vec3::ZERO, Some(&second), true)
            .unwrap();
        let free = play_at(&mut engine, buffer, 2.0, true);
        engine.update(FRAME, AttenuationModel::Inverse);

        engine.stop_all_sounds_of(&first);

        for handle in &on_first {
            assert!(engine.source(*handle).unwrap().is_stopped());
        }
        assert_eq!(
            engine.source(on_second).unwrap().state(),
            SoundSourceState::Playing
        );
        assert_eq!(
            engine.source(free).unwrap().state(),
            SoundSourceState::Playing
        );
    }

    #[test]
    fn test_stop_all_sounds() {
        let (mut engine, platform) = engine(16);
        let buffer = engine.register_buffer_raw(raw_sound(), 15.0);
        for i in 0..5 {
            play_at(&mut engine, buffer, i as f32, true);
        }
        engine.update(FRAME, AttenuationModel::Inverse);
        engine.stop_all_sounds();
        engine.update(FRAME, AttenuationModel::Inverse);
        assert_eq!(engine.registered_source_count(), 0);
        assert_eq!(platform.live_voices(), 0);
    }

    #[test]
    fn test_finished_one_shot_is_removed() {
        let (mut engine, platform) = engine(16);
        let buffer = engine.register_buffer_raw(raw_sound(), 15.0);
        let looped = play_at(&mut engine, buffer, 3.0, true);
        play_at(&mut engine, buffer, 4.0, false);
        engine.update(FRAME, AttenuationModel::Inverse);

        platform.finish_all();
        let stats = engine.update(FRAME, AttenuationModel::Inverse);

        assert_eq!(stats.sources_removed, 1);
        assert_eq!(engine.registered_source_count(), 1);
        assert!(engine.is_playing(looped));
    }

    #[test]
    fn test_inaudible_sources_hold_no_voice() {
        let (mut engine, _) = engine(16);
        let buffer = engine.register_buffer_raw(raw_sound(), 10.0);
        let near_once = play_at(&mut engine, buffer, 5.0, false);
        let far_looped = play_at(&mut engine, buffer, 500.0, true);
        let far_once = play_at(&mut engine, buffer, 500.0, false);

        engine.update(FRAME, AttenuationModel::Linear);

        assert!(engine.source(near_once).unwrap().has_voice());
        let far = engine.source(far_looped).unwrap();
        assert!(far.is_playing() && !far.has_voice());
        assert!(engine.source(far_once).is_none());
    }

    #[test]
    fn test_interior_listener_halves_other_radii() {
        let (mut engine, _) = engine(16);
        let buffer = engine.register_buffer_raw(raw_sound(), 10.0);
        let own: Rc<dyn SoundAnchor> = Rc::new(TestCar::at(Vec3::ZERO));
        let other: Rc<dyn SoundAnchor> = Rc::new(TestCar::at(Vec3::new(60.0, 0.0, 0.0)));
        let inside = engine
            .play_sound(buffer, 1.0, 1.0, Vec3::new(60.0, 0.0, 0.0), Some(&own), true)
            .unwrap();
        let outside = engine
            .play_sound(buffer, 1.0, 1.0, Vec3::ZERO, Some(&other), true)
            .unwrap();

        engine.update(FRAME, AttenuationModel::Linear);
        assert!(engine.source(outside).unwrap().has_voice());

        engine.listener_mut().set_interior(Some(&own));
        engine.update(FRAME, AttenuationModel::Linear);
        assert!(engine.source(inside).unwrap().has_voice());
        assert!(!engine.source(outside).unwrap().has_voice());
    }

    #[test]
    fn test_dropped_parent_stops_sources() {
        let (mut engine, platform) = engine(16);
        let buffer = engine.register_buffer_raw(raw_sound(), 15.0);
        let car: Rc<dyn SoundAnchor> = Rc::new(TestCar::at(Vec3::new(3.0, 0.0, 0.0)));
        engine
            .play_sound(buffer, 1.0, 1.0, Vec3::ZERO, Some(&car), true)
            .unwrap();
        engine.update(FRAME, AttenuationModel::Inverse);
        assert_eq!(platform.live_voices(), 1);

        drop(car);
        engine.update(FRAME, AttenuationModel::Inverse);
        assert_eq!(engine.registered_source_count(), 0);
        assert_eq!(platform.live_voices(), 0);
    }

    #[test]
    fn test_global_mute_releases_voices() {
        let (mut engine, platform) = engine(16);
        let buffer = engine.register_buffer_raw(raw_sound(), 15.0);
        let looped = play_at(&mut engine, buffer, 2.0, true);
        let once = play_at(&mut engine, buffer, 3.0, false);
        engine.update(FRAME, AttenuationModel::Inverse);

        engine.set_global_mute(true);
        engine.update(FRAME, AttenuationModel::Inverse);
        assert_eq!(platform.live_voices(), 0);
        assert!(engine.source(once).is_none());
        assert_eq!(
            engine.source(looped).unwrap().state(),
            SoundSourceState::PlayPending
        );

        engine.set_global_mute(false);
        engine.update(FRAME, AttenuationModel::Inverse);
        assert!(engine.source(looped).unwrap().has_voice());
    }

    #[test]
    fn test_global_mute_keeps_paused_sources() {
        let (mut engine, platform) = engine(16);
        let buffer = engine.register_buffer_raw(raw_sound(), 15.0);
        let once = play_at(&mut engine, buffer, 3.0, false);
        engine.update(FRAME, AttenuationModel::Inverse);
        engine.source_mut(once).unwrap().pause();

        engine.set_global_mute(true);
        engine.update(FRAME, AttenuationModel::Inverse);
        let paused = engine.source(once).unwrap();
        assert_eq!(paused.state(), SoundSourceState::Paused);
        assert!(paused.has_voice());
        assert!(!platform.calls().contains(&PlatformCall::Release(0)));

        engine.set_global_mute(false);
        engine.source_mut(once).unwrap().resume();
        engine.update(FRAME, AttenuationModel::Inverse);
        assert_eq!(
            engine.source(once).unwrap().state(),
            SoundSourceState::Playing
        );
        assert!(platform.calls().contains(&PlatformCall::Resume(0)));
        assert_eq!(platform.live_voices(), 1);
    }

    #[test]
    fn test_paused_voice_counts_against_cap() {
        let (mut engine, platform) = engine(2);
        let buffer = engine.register_buffer_raw(raw_sound(), 15.0);
        let paused = play_at(&mut engine, buffer, 1.0, true);
        let other = play_at(&mut engine, buffer, 2.0, true);
        engine.update(FRAME, AttenuationModel::Inverse);

        engine.source_mut(paused).unwrap().pause();
        let third = play_at(&mut engine, buffer, 3.0, true);
        engine.update(FRAME, AttenuationModel::Inverse);

        assert_eq!(
            engine.source(paused).unwrap().state(),
            SoundSourceState::Paused
        );
        assert!(engine.source(paused).unwrap().has_voice());
        assert!(engine.source(other).unwrap().has_voice());
        assert!(!engine.source(third).unwrap().has_voice());
        assert!(platform.calls().contains(&PlatformCall::Pause(0)));

        engine.source_mut(paused).unwrap().resume();
        engine.update(FRAME, AttenuationModel::Inverse);
        assert_eq!(
            engine.source(paused).unwrap().state(),
            SoundSourceState::Playing
        );
        assert!(platform.calls().contains(&PlatformCall::Resume(0)));
        assert_eq!(platform.live_voices(), 2);
    }

    #[test]
    fn test_ignored_buffer_is_decoded_once() {
        let loader = CountingLoader::failing();
        let (mut engine, platform) = engine_with(16, loader.clone());
        let buffer = engine
            .register_buffer_path(sound_file("broken.wav"), 15.0);
        for _ in 0..3 {
            play_at(&mut engine, buffer, 1.0, true);
            engine.update(FRAME, AttenuationModel::Inverse);
        }
        assert_eq!(loader.calls(), 1);
        assert!(engine.buffer(buffer).unwrap().is_ignored());
        assert_eq!(engine.registered_source_count(), 0);
        assert_eq!(platform.live_voices(), 0);
    }

    #[test]
    fn test_voice_params_are_listener_relative() {
        let (mut engine, platform) = engine(16);
        let buffer = engine.register_buffer_raw(raw_sound(), 15.0);
        let source = engine
            .play_sound(buffer, 1.5, 1.0, Vec3::new(10.0, 0.0, 0.0), None, true)
            .unwrap();
        engine.set_listener(Listener::new(Pose::new(
            Vec3::new(10.0, 0.0, 5.0),
            Quat::from_rotation_y(std::f32::consts::FRAC_PI_2),
        )));
        engine.update(FRAME, AttenuationModel::Inverse);
        assert!(engine.source(source).unwrap().has_voice());

        let params = platform.params(0).unwrap();
        assert_eq!(params.pitch, 1.5);
        assert!(params.gain > 0.0 && params.gain <= 1.0);
        // a listener facing world -X has world -Z on its right
        assert!((params.position - Vec3::new(5.0, 0.0, 0.0)).length() < 1e-4);
    }

    #[test]
    fn test_engine_without_device_is_silent_noop() {
        let mut engine =
            RailSonicEngine::with_loader(EngineDesc::default(), Box::new(CountingLoader::sixteen_bit()))
                .unwrap();
        let buffer = engine.register_buffer_raw(raw_sound(), 15.0);
        let looped = play_at(&mut engine, buffer, 1.0, true);
        let once = play_at(&mut engine, buffer, 1.0, false);

        engine.update(FRAME, AttenuationModel::Inverse);

        assert!(!engine.is_active());
        assert_eq!(engine.system_max_sounds(), 0);
        assert!(engine.is_playing(looped));
        assert!(engine.source(once).is_none());
    }

    #[test]
    fn test_inverse_clamp_tightens_when_voices_run_out() {
        let (mut engine, _) = engine(2);
        let buffer = engine.register_buffer_raw(raw_sound(), 15.0);
        for i in 0..6 {
            play_at(&mut engine, buffer, 20.0 + i as f32 * 20.0, true);
        }
        let before = engine.log_clamp_factor();
        for _ in 0..30 {
            engine.update(FRAME, AttenuationModel::Inverse);
        }
        assert!(engine.log_clamp_factor() > before);
    }

    #[test]
    fn test_inverse_clamp_settles_on_first_excluded_source() {
        let (mut engine, _) = engine(2);
        let buffer = engine.register_buffer_raw(raw_sound(), 10.0);
        for x in [10.0, 20.0, 40.0] {
            play_at(&mut engine, buffer, x, true);
        }
        // the third source at 40 m has unclamped gain 10 / 40
        let settled = (0.25f32 / 1600.0).ln();

        for _ in 0..40 {
            engine.update(0.1, AttenuationModel::Inverse);
        }
        assert!((engine.log_clamp_factor() - settled).abs() < 1e-3);

        for _ in 0..10 {
            engine.update(0.1, AttenuationModel::Inverse);
            assert!((engine.log_clamp_factor() - settled).abs() < 1e-3);
        }
        assert_eq!(engine.bound_voice_count(), 2);
    }

    #[test]
    fn test_deinitialize_releases_everything() {
        let (mut engine, platform) = engine(16);
        let buffer = engine.register_buffer_raw(raw_sound(), 15.0);
        play_at(&mut engine, buffer, 1.0, true);
        engine.update(FRAME, AttenuationModel::Inverse);
        assert_eq!(engine.loaded_buffer_count(), 1);

        engine.deinitialize();

        assert!(!engine.is_active());
        assert_eq!(platform.live_voices(), 0);
        assert_eq!(engine.registered_source_count(), 0);
        assert_eq!(engine.loaded_buffer_count(), 0);
        assert_eq!(engine.registered_buffer_count(), 1);
    }

    #[test]
    fn test_invalid_desc_is_rejected() {
        let result = RailSonicEngine::new(EngineDesc::default().max_voices(0));
        assert!(matches!(result, Err(RailSonicError::Configuration(_))));
    }
}
