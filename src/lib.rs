//! # RailSonic
//!
//! Voice arbitration and distance attenuation for train simulator audio.
//!
//! A simulation has far more things that want to make noise (motors, brakes,
//! doors, level crossings) than an audio device has voices. RailSonic keeps an
//! unbounded set of logical sources, ranks them by attenuated gain once per
//! frame and binds only the loudest ones to platform voices.
//!
//! ## Quick Start
//!
//! ```no_run
//! use railsonic::*;
//! use std::rc::Rc;
//!
//! let mut engine = RailSonicEngine::new(EngineDesc::default())?;
//! if let Err(e) = engine.initialize() {
//!     // the engine keeps working without sound
//!     eprintln!("no audio: {}", e);
//! }
//!
//! let horn = engine.register_buffer_path("sounds/horn.wav", 30.0);
//! let car: Rc<dyn SoundAnchor> = Rc::new(MyCar::default());
//! let source = engine.play_sound(horn, 1.0, 1.0, Vec3::new(0.0, 2.0, 8.0), Some(&car), false)?;
//!
//! // once per frame
//! engine.set_listener(Listener::new(Pose::from_position(Vec3::new(0.0, 1.5, 0.0))));
//! let stats = engine.update(1.0 / 60.0, AttenuationModel::Inverse);
//! println!("bound {} voices, playing: {}", stats.voices_bound, engine.is_playing(source));
//! # #[derive(Default)]
//! # struct MyCar;
//! # impl SoundAnchor for MyCar {
//! #     fn sound_type(&self) -> SoundType { SoundType::TrainCar }
//! #     fn world_position(&self, offset: Vec3) -> Vec3 { offset }
//! # }
//! # Ok::<(), RailSonicError>(())
//! ```
//!
//! ## Key Components
//!
//! - **[`RailSonicEngine`]**: owns buffers and sources and runs the per-frame arbitration
//! - **[`SoundBuffer`]**: a deduplicated, lazily decoded sound
//! - **[`SoundSource`]**: one playback intent with position, pitch, volume and state
//! - **[`VoicePlatform`]**: the voices themselves; [`CpalPlatform`] mixes them on the default device
//! - **[`CarSound`]**: a buffer mounted on a car at a fixed offset
//!
//! ## Threading
//!
//! The engine is driven from the simulation thread only. The cpal platform
//! forwards voice commands to the audio callback over a channel, so
//! [`RailSonicEngine::update`] never waits on the device.

pub mod attenuation;
pub mod audio_data;
pub mod buffer;
pub mod car_sound;
pub mod config;
pub mod engine;
pub mod error;
pub mod math;
pub mod platform;
pub mod pool;
pub mod source;

#[cfg(test)]
mod testutil;

pub use attenuation::{AttenuationModel, GAIN_THRESHOLD};
pub use buffer::{BufferHandle, SoundBuffer, SoundOrigin};
pub use car_sound::CarSound;
pub use config::{EngineDesc, SoundRange};
pub use engine::{RailSonicEngine, UpdateStats};
pub use error::{RailSonicError, Result};
pub use math::{Listener, Pose, Quat, Vec3};
pub use platform::{CpalPlatform, VoiceHandle, VoiceParams, VoicePlatform};
pub use pool::SourceHandle;
pub use source::{SoundAnchor, SoundSource, SoundSourceState, SoundType};
