use crate::audio_data::Sound;
use crate::error::Result;
use std::path::Path;

/// Host service that turns a sound file into raw PCM.
///
/// RailSonic ships [`SymphoniaLoader`](crate::audio_data::SymphoniaLoader);
/// hosts with their own decoders (or tests) plug in a different one.
///
/// # Example
///
/// ```ignore
/// use railsonic::audio_data::{Sound, SoundLoader};
/// use railsonic::error::Result;
/// use std::path::Path;
///
/// struct SilenceLoader;
///
/// impl SoundLoader for SilenceLoader {
///     fn load(&self, _path: &Path) -> Result<Sound> {
///         Sound::new(22050, 16, vec![vec![0; 44100]])
///     }
/// }
/// ```
pub trait SoundLoader {
    /// Decodes the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns a `RailSonicError` if the file cannot be opened or decoded.
    fn load(&self, path: &Path) -> Result<Sound>;
}
