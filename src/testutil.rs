// Fakes shared by the unit tests: a loader that counts fetches, an anchor
// that stands in for a car, and a voice platform that records every call.

use crate::audio_data::{PcmData, Sound, SoundLoader};
use crate::error::{RailSonicError, Result};
use crate::math::Vec3;
use crate::platform::{VoiceHandle, VoiceParams, VoicePlatform};
use crate::source::{SoundAnchor, SoundType};
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;

#[derive(Clone)]
pub struct CountingLoader {
    calls: Rc<Cell<usize>>,
    fail: bool,
}

impl CountingLoader {
    /// Every path decodes to one second of 16-bit mono silence at 8 kHz.
    pub fn sixteen_bit() -> Self {
        Self {
            calls: Rc::new(Cell::new(0)),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            calls: Rc::new(Cell::new(0)),
            fail: true,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.get()
    }
}

impl SoundLoader for CountingLoader {
    fn load(&self, path: &Path) -> Result<Sound> {
        self.calls.set(self.calls.get() + 1);
        if self.fail {
            return Err(RailSonicError::AudioLoading(format!(
                "cannot decode {}",
                path.display()
            )));
        }
        Sound::new(8000, 16, vec![vec![0; 16000]])
    }
}

/// Writes a placeholder file so path buffers get past the existence check.
pub fn sound_file(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("railsonic_test_sounds");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    std::fs::write(&path, b"not decoded by the fake loader").unwrap();
    path
}

pub struct TestCar {
    position: Vec3,
}

impl TestCar {
    pub fn at(position: Vec3) -> Self {
        Self { position }
    }
}

impl SoundAnchor for TestCar {
    fn sound_type(&self) -> SoundType {
        SoundType::TrainCar
    }

    fn world_position(&self, offset: Vec3) -> Vec3 {
        self.position + offset
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformCall {
    Bind(u64),
    Update(u64),
    Play(u64),
    Pause(u64),
    Resume(u64),
    Release(u64),
}

#[derive(Default)]
struct FakeState {
    calls: Vec<PlatformCall>,
    live: HashSet<u64>,
    finished: HashSet<u64>,
    params: HashMap<u64, VoiceParams>,
    next_voice: u64,
}

/// Records platform calls. Clones share the same record, so a test keeps one
/// clone while the engine owns another.
#[derive(Clone)]
pub struct FakePlatform {
    max_voices: usize,
    state: Rc<RefCell<FakeState>>,
}

impl FakePlatform {
    pub fn new(max_voices: usize) -> Self {
        Self {
            max_voices,
            state: Rc::new(RefCell::new(FakeState::default())),
        }
    }

    pub fn calls(&self) -> Vec<PlatformCall> {
        self.state.borrow().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.state.borrow().calls.len()
    }

    pub fn live_voices(&self) -> usize {
        self.state.borrow().live.len()
    }

    pub fn params(&self, voice: u64) -> Option<VoiceParams> {
        self.state.borrow().params.get(&voice).copied()
    }

    /// Marks every live voice as having played to its end.
    pub fn finish_all(&self) {
        let mut state = self.state.borrow_mut();
        let live: Vec<u64> = state.live.iter().copied().collect();
        state.finished.extend(live);
    }

    fn record(&self, call: PlatformCall) {
        self.state.borrow_mut().calls.push(call);
    }
}

impl VoicePlatform for FakePlatform {
    fn max_voices(&self) -> usize {
        self.max_voices
    }

    fn output_sample_rate(&self) -> Option<u32> {
        None
    }

    fn bind(&mut self, _pcm: &Arc<PcmData>, _looped: bool) -> Option<VoiceHandle> {
        let mut state = self.state.borrow_mut();
        if state.live.len() >= self.max_voices {
            return None;
        }
        let id = state.next_voice;
        state.next_voice += 1;
        state.live.insert(id);
        state.calls.push(PlatformCall::Bind(id));
        Some(VoiceHandle(id))
    }

    fn update(&mut self, voice: VoiceHandle, params: &VoiceParams) {
        self.state.borrow_mut().params.insert(voice.0, *params);
        self.record(PlatformCall::Update(voice.0));
    }

    fn play(&mut self, voice: VoiceHandle) {
        self.record(PlatformCall::Play(voice.0));
    }

    fn pause(&mut self, voice: VoiceHandle) {
        self.record(PlatformCall::Pause(voice.0));
    }

    fn resume(&mut self, voice: VoiceHandle) {
        self.record(PlatformCall::Resume(voice.0));
    }

    fn release(&mut self, voice: VoiceHandle) {
        {
            let mut state = self.state.borrow_mut();
            state.live.remove(&voice.0);
            state.finished.remove(&voice.0);
        }
        self.record(PlatformCall::Release(voice.0));
    }

    fn is_finished(&mut self, voice: VoiceHandle) -> bool {
        self.state.borrow().finished.contains(&voice.0)
    }
}
