//! Sound sources: one logical playback intent each.
//!
//! A source says *what* should be heard and *where*; whether it currently
//! owns a platform voice is decided by the engine once per frame. Stop and
//! pause requests made between frames are recorded as pending states and
//! applied to the platform during the next [`RailSonicEngine::update`](crate::RailSonicEngine::update).

use crate::buffer::BufferHandle;
use crate::math::Vec3;
use crate::platform::VoiceHandle;
use std::rc::{Rc, Weak};

/// Lifecycle of a source.
///
/// Pending states are requests not yet applied to the platform; `Playing`,
/// `Paused` and `Stopped` reflect what the platform is doing. `Stopped` is
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoundSourceState {
    PlayPending,
    Playing,
    PausePending,
    Paused,
    ResumePending,
    StopPending,
    Stopped,
}

/// What a source's position is relative to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SoundType {
    TrainCar,
    AnimatedObject,
    #[default]
    Undefined,
}

/// Something a sound can be attached to, such as a car or an animated object.
///
/// The engine holds anchors weakly and never inspects them beyond these
/// queries. Identity is the allocation: two sources share a parent when they
/// were given clones of the same `Rc`.
pub trait SoundAnchor {
    fn sound_type(&self) -> SoundType;

    /// Converts an offset in the anchor's local frame to world coordinates.
    fn world_position(&self, offset: Vec3) -> Vec3;

    fn velocity(&self) -> Vec3 {
        Vec3::ZERO
    }
}

pub struct SoundSource {
    buffer: BufferHandle,
    radius: f32,
    pitch: f32,
    volume: f32,
    position: Vec3,
    parent: Option<Weak<dyn SoundAnchor>>,
    looped: bool,
    kind: SoundType,
    state: SoundSourceState,
    voice: Option<VoiceHandle>,
}

impl SoundSource {
    pub(crate) fn new(
        buffer: BufferHandle,
        radius: f32,
        pitch: f32,
        volume: f32,
        position: Vec3,
        parent: Option<&Rc<dyn SoundAnchor>>,
        looped: bool,
    ) -> Self {
        Self {
            buffer,
            radius,
            pitch,
            volume,
            position,
            kind: parent.map_or(SoundType::Undefined, |p| p.sound_type()),
            parent: parent.map(Rc::downgrade),
            looped,
            state: SoundSourceState::PlayPending,
            voice: None,
        }
    }

    pub fn buffer(&self) -> BufferHandle {
        self.buffer
    }

    pub fn radius(&self) -> f32 {
        self.radius
    }

    pub fn set_radius(&mut self, radius: f32) {
        self.radius = radius;
    }

    pub fn pitch(&self) -> f32 {
        self.pitch
    }

    pub fn set_pitch(&mut self, pitch: f32) {
        self.pitch = pitch;
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.volume = volume;
    }

    /// Position relative to the parent, or absolute when there is none.
    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
    }

    pub fn is_looped(&self) -> bool {
        self.looped
    }

    pub fn sound_type(&self) -> SoundType {
        self.kind
    }

    pub fn state(&self) -> SoundSourceState {
        self.state
    }

    /// Whether a platform voice is currently bound.
    pub fn has_voice(&self) -> bool {
        self.voice.is_some()
    }

    /// True while the source wants to be heard, whether or not it holds a voice.
    pub fn is_playing(&self) -> bool {
        matches!(
            self.state,
            SoundSourceState::PlayPending | SoundSourceState::Playing
        )
    }

    pub fn is_stopped(&self) -> bool {
        matches!(
            self.state,
            SoundSourceState::StopPending | SoundSourceState::Stopped
        )
    }

    pub fn is_parented_by(&self, parent: &Rc<dyn SoundAnchor>) -> bool {
        self.parent
            .as_ref()
            .is_some_and(|p| std::ptr::addr_eq(p.as_ptr(), Rc::as_ptr(parent)))
    }

    pub(crate) fn parent(&self) -> Option<&Weak<dyn SoundAnchor>> {
        self.parent.as_ref()
    }

    /// World position and velocity, or `None` when the parent is gone.
    pub(crate) fn resolve(&self) -> Option<(Vec3, Vec3)> {
        match &self.parent {
            None => Some((self.position, Vec3::ZERO)),
            Some(parent) => {
                let parent = parent.upgrade()?;
                Some((parent.world_position(self.position), parent.velocity()))
            }
        }
    }

    /// Requests a stop. Never touches the platform.
    ///
    /// A source without a voice settles immediately; a bound one is torn
    /// down during the next update. Stopping twice is harmless.
    pub fn stop(&mut self) {
        match self.state {
            SoundSourceState::Stopped | SoundSourceState::StopPending => {}
            _ if self.voice.is_some() => self.state = SoundSourceState::StopPending,
            _ => self.state = SoundSourceState::Stopped,
        }
    }

    pub fn pause(&mut self) {
        match self.state {
            SoundSourceState::PlayPending => self.state = SoundSourceState::Paused,
            SoundSourceState::Playing => self.state = SoundSourceState::PausePending,
            // the voice was never resumed on the platform
            SoundSourceState::ResumePending => self.state = SoundSourceState::Paused,
            _ => {}
        }
    }

    pub fn resume(&mut self) {
        match self.state {
            SoundSourceState::Paused if self.voice.is_some() => {
                self.state = SoundSourceState::ResumePending
            }
            SoundSourceState::Paused => self.state = SoundSourceState::PlayPending,
            SoundSourceState::PausePending => self.state = SoundSourceState::Playing,
            _ => {}
        }
    }

    pub(crate) fn set_state(&mut self, state: SoundSourceState) {
        self.state = state;
    }

    pub(crate) fn voice(&self) -> Option<VoiceHandle> {
        self.voice
    }

    pub(crate) fn bind_voice(&mut self, voice: VoiceHandle) {
        self.voice = Some(voice);
    }

    pub(crate) fn take_voice(&mut self) -> Option<VoiceHandle> {
        self.voice.take()
    }
}

impl std::fmt::Debug for SoundSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoundSource")
            .field("buffer", &self.buffer)
            .field("radius", &self.radius)
            .field("pitch", &self.pitch)
            .field("volume", &self.volume)
            .field("position", &self.position)
            .field("looped", &self.looped)
            .field("type", &self.kind)
            .field("state", &self.state)
            .field("voice", &self.voice)
            .finish()
    }
}
