//! Engine configuration

use serde::{Deserialize, Serialize};

/// Largest accepted oversampling factor
pub const MAX_OVERSAMPLE: u32 = 16;

/// Runtime settings shared by the instrument and all of its voices
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Host output sample rate in Hz
    pub sample_rate: f32,
    /// Frames computed per output frame (1 = no oversampling)
    pub oversample: u32,
    /// Maximum simultaneously sounding notes
    pub max_voices: usize,
    /// Frames a released voice keeps sounding while it fades out
    pub release_frames: usize,
    /// Fixed seed for reproducible renders; `None` draws fresh entropy per voice
    pub seed: Option<u64>,
    /// Frames rendered per internal pass. Longer host blocks are split into
    /// passes of this size, so rendering never allocates.
    pub max_block: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100.0,
            oversample: 1,
            max_voices: 32,
            release_frames: 64,
            seed: None,
            max_block: 512,
        }
    }
}

impl EngineConfig {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            sample_rate,
            ..Self::default()
        }
    }

    pub fn with_oversample(mut self, factor: u32) -> Self {
        self.oversample = factor;
        self
    }

    pub fn with_max_voices(mut self, max_voices: usize) -> Self {
        self.max_voices = max_voices;
        self
    }

    pub fn with_release_frames(mut self, frames: usize) -> Self {
        self.release_frames = frames;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_max_block(mut self, frames: usize) -> Self {
        self.max_block = frames;
        self
    }

    /// Correct out-of-domain values in place, warning about each one
    pub fn validated(mut self) -> Self {
        if !(self.sample_rate.is_finite() && self.sample_rate > 0.0) {
            log::warn!(
                "sample rate {} is not usable, falling back to 44100",
                self.sample_rate
            );
            self.sample_rate = 44100.0;
        }
        if self.oversample == 0 || self.oversample > MAX_OVERSAMPLE {
            let clamped = self.oversample.clamp(1, MAX_OVERSAMPLE);
            log::warn!("oversample factor {} clamped to {}", self.oversample, clamped);
            self.oversample = clamped;
        }
        if self.max_voices == 0 {
            log::warn!("max_voices of 0 raised to 1");
            self.max_voices = 1;
        }
        if self.max_block == 0 {
            log::warn!("max_block of 0 raised to 1");
            self.max_block = 1;
        }
        self
    }

    /// Rate the voices actually run at
    pub fn engine_rate(&self) -> f32 {
        self.sample_rate * self.oversample as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.sample_rate, 44100.0);
        assert_eq!(config.oversample, 1);
        assert_eq!(config.engine_rate(), 44100.0);
        assert!(config.seed.is_none());
    }

    #[test]
    fn test_builder() {
        let config = EngineConfig::new(48000.0)
            .with_oversample(4)
            .with_max_voices(8)
            .with_release_frames(128)
            .with_seed(7)
            .with_max_block(64);
        assert_eq!(config.engine_rate(), 192000.0);
        assert_eq!(config.max_block, 64);
        assert_eq!(config.max_voices, 8);
        assert_eq!(config.release_frames, 128);
        assert_eq!(config.seed, Some(7));
    }

    #[test]
    fn test_validated_clamps() {
        let config = EngineConfig::new(-1.0)
            .with_oversample(0)
            .with_max_voices(0)
            .with_max_block(0)
            .validated();
        assert_eq!(config.sample_rate, 44100.0);
        assert_eq!(config.oversample, 1);
        assert_eq!(config.max_voices, 1);
        assert_eq!(config.max_block, 1);

        let config = EngineConfig::default().with_oversample(64).validated();
        assert_eq!(config.oversample, MAX_OVERSAMPLE);
    }

    #[test]
    fn test_config_json_defaults() {
        let config: EngineConfig = serde_json::from_str(r#"{"sample_rate": 96000.0}"#).unwrap();
        assert_eq!(config.sample_rate, 96000.0);
        assert_eq!(config.release_frames, 64);
        assert_eq!(config.max_block, 512);

        let json = serde_json::to_string(&config).unwrap();
        let back: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
