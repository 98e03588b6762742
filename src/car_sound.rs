//! Sounds mounted on a car at a fixed offset.

use crate::buffer::BufferHandle;
use crate::engine::RailSonicEngine;
use crate::error::Result;
use crate::math::Vec3;
use crate::pool::SourceHandle;
use crate::source::SoundAnchor;
use std::rc::{Rc, Weak};

/// A buffer bound to a car and a position in the car's frame.
///
/// The car is held weakly so that a car can own its sounds. A sound without a
/// buffer is valid and never plays, which lets content leave slots empty.
pub struct CarSound {
    buffer: Option<BufferHandle>,
    position: Vec3,
    car: Weak<dyn SoundAnchor>,
    source: Option<SourceHandle>,
}

impl CarSound {
    pub fn new(buffer: Option<BufferHandle>, position: Vec3, car: &Rc<dyn SoundAnchor>) -> Self {
        Self {
            buffer,
            position,
            car: Rc::downgrade(car),
            source: None,
        }
    }

    pub fn buffer(&self) -> Option<BufferHandle> {
        self.buffer
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    /// Source started by the last [`play`](Self::play), if it still exists.
    pub fn source(&self, engine: &RailSonicEngine) -> Option<SourceHandle> {
        self.source.filter(|handle| engine.source(*handle).is_some())
    }

    /// Starts the sound on the car.
    ///
    /// A looped sound that is already playing only takes the new pitch and
    /// volume. Returns `Ok(None)` when there is no buffer or the car is gone.
    pub fn play(
        &mut self,
        engine: &mut RailSonicEngine,
        pitch: f32,
        volume: f32,
        looped: bool,
    ) -> Result<Option<SourceHandle>> {
        let Some(buffer) = self.buffer else {
            return Ok(None);
        };
        let Some(car) = self.car.upgrade() else {
            return Ok(None);
        };

        if let Some(source) = self.source.and_then(|handle| engine.source_mut(handle)) {
            if looped && source.is_looped() && source.is_playing() {
                source.set_pitch(pitch);
                source.set_volume(volume);
                return Ok(self.source);
            }
        }

        let handle = engine.play_sound(buffer, pitch, volume, self.position, Some(&car), looped)?;
        self.source = Some(handle);
        Ok(Some(handle))
    }

    pub fn is_playing(&self, engine: &RailSonicEngine) -> bool {
        self.source.is_some_and(|handle| engine.is_playing(handle))
    }

    pub fn stop(&mut self, engine: &mut RailSonicEngine) {
        if let Some(handle) = self.source.take() {
            engine.stop_sound(handle);
        }
    }
}
