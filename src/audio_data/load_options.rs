#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Target sample rate for resampling (None = keep original)
    pub target_sample_rate: Option<u32>,
}

impl LoadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn target_sample_rate(mut self, rate: u32) -> Self {
        self.target_sample_rate = Some(rate);
        self
    }
}
