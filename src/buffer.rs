//! Sound buffers: deduplicated, lazily decoded handles to one logical sound.
//!
//! A buffer only records *where* its PCM comes from until the first real
//! playback attempt. Decoding failures are absorbed here: the buffer marks
//! itself as ignored and every later [`SoundBuffer::load`] returns at once,
//! so an audible but broken emitter never pays the decode cost twice.

use crate::audio_data::{LoadOptions, PcmData, Sound, SoundLoader};
use crate::error::{RailSonicError, Result};
use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Handle to a buffer registered with the engine.
///
/// Buffers live until engine teardown, so a handle never dangles.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub(crate) usize);

impl std::fmt::Display for BufferHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BufferHandle({})", self.0)
    }
}

/// Where a buffer's PCM comes from.
#[derive(Debug, Clone)]
pub enum SoundOrigin {
    /// A file decoded through the engine's [`SoundLoader`]
    Path(PathBuf),
    /// PCM already held in memory by the host
    Raw(Arc<Sound>),
}

impl SoundOrigin {
    /// Whether both origins name the same logical sound.
    pub fn same_as(&self, other: &SoundOrigin) -> bool {
        match (self, other) {
            (Self::Path(a), Self::Path(b)) => a == b,
            (Self::Raw(a), Self::Raw(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Path(path) => Some(path),
            Self::Raw(_) => None,
        }
    }

    fn fetch(&self, loader: &dyn SoundLoader) -> Result<Cow<'_, Sound>> {
        match self {
            Self::Path(path) if !path.is_file() => Err(RailSonicError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("sound file {} does not exist", path.display()),
            ))),
            Self::Path(path) => loader.load(path).map(Cow::Owned),
            Self::Raw(sound) => Ok(Cow::Borrowed(sound.as_ref())),
        }
    }
}

impl std::fmt::Display for SoundOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Path(path) => write!(f, "{}", path.display()),
            Self::Raw(sound) => write!(
                f,
                "<raw {} Hz, {} bits, {} ch>",
                sound.sample_rate(),
                sound.bits_per_sample(),
                sound.channels()
            ),
        }
    }
}

#[derive(Debug)]
pub struct SoundBuffer {
    origin: SoundOrigin,
    radius: f32,
    loaded: bool,
    ignore: bool,
    duration: Option<Duration>,
    pcm: Option<Arc<PcmData>>,
}

impl SoundBuffer {
    pub fn new(origin: SoundOrigin, radius: f32) -> Self {
        Self {
            origin,
            radius,
            loaded: false,
            ignore: false,
            duration: None,
            pcm: None,
        }
    }

    pub fn origin(&self) -> &SoundOrigin {
        &self.origin
    }

    /// Default effective radius for sources created from this buffer.
    pub fn radius(&self) -> f32 {
        self.radius
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Whether loading failed permanently.
    pub fn is_ignored(&self) -> bool {
        self.ignore
    }

    /// Decoded samples, present only while loaded.
    pub fn pcm(&self) -> Option<&Arc<PcmData>> {
        self.pcm.as_ref()
    }

    /// Decodes the buffer. Returns immediately when already loaded or ignored.
    ///
    /// Only 8-bit and 16-bit sounds are accepted; anything else, or a failed
    /// fetch, marks the buffer as ignored for good.
    pub fn load(&mut self, loader: &dyn SoundLoader, options: &LoadOptions) {
        if self.loaded || self.ignore {
            return;
        }

        match self.decode(loader, options) {
            Ok((pcm, duration)) => {
                log::debug!(
                    "Loaded sound {} ({} samples at {} Hz)",
                    self.origin,
                    pcm.len(),
                    pcm.sample_rate()
                );
                self.duration.get_or_insert(duration);
                self.pcm = Some(Arc::new(pcm));
                self.loaded = true;
            }
            Err(e) => {
                log::warn!("Ignoring sound {}: {}", self.origin, e);
                self.ignore = true;
            }
        }
    }

    fn decode(
        &self,
        loader: &dyn SoundLoader,
        options: &LoadOptions,
    ) -> Result<(PcmData, Duration)> {
        let sound = self.origin.fetch(loader)?;
        let mut pcm = sound.to_mono_pcm()?;
        if let Some(rate) = options.target_sample_rate {
            pcm = pcm.resample(rate)?;
        }
        Ok((pcm, sound.duration()))
    }

    /// Drops the decoded samples. The buffer can be loaded again later.
    pub fn unload(&mut self) {
        self.loaded = false;
        self.pcm = None;
    }

    /// Length of the sound in seconds, loading the buffer if needed.
    ///
    /// Ignored buffers report zero.
    pub fn duration(&mut self, loader: &dyn SoundLoader, options: &LoadOptions) -> Duration {
        if let Some(duration) = self.duration {
            return duration;
        }
        self.load(loader, options);
        self.duration.unwrap_or(Duration::ZERO)
    }

    /// A fresh, unloaded buffer for the same sound and radius.
    ///
    /// The copy loads independently of `self`, which lets one file be driven
    /// by several pitch and volume scripts.
    pub fn clone_unloaded(&self) -> Self {
        Self::new(self.origin.clone(), self.radius)
    }
}
