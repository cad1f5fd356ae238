//! Pipeline configuration
//!
//! All fields carry defaults so a partial JSON document is a valid configuration.

use crate::error::DetectError;
use crate::types::Channel;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Default number of trees in each channel's forest
pub const DEFAULT_NUM_TREES: usize = 40;

/// Default maximum number of points held by one tree
pub const DEFAULT_TREE_SIZE: usize = 256;

/// Default number of consecutive samples forming one forest point
pub const DEFAULT_SHINGLE_SIZE: usize = 1;

/// Default lower bound on the spacing of merged anomalous frames (seconds)
pub const DEFAULT_MIN_GAP: f64 = 0.5;

/// Default upper bound on the spacing of merged anomalous frames (seconds)
pub const DEFAULT_MAX_GAP: f64 = 2.0;

/// Default diarization label of the subject
pub const DEFAULT_TARGET_SPEAKER: &str = "B";

/// Which pass the session processor runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingMode {
    /// Transform only; used to fit channel-magnitude baselines
    ValueOnly,
    /// Full anomaly and episode evaluation
    #[default]
    Evaluation,
}

/// Handling of raw measurements outside their documented range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RangePolicy {
    /// Use values as given
    #[default]
    Accept,
    /// Clamp blendshape scores into [0, 1]
    Clamp,
    /// Fail the channel
    Reject,
}

/// Random cut forest parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestConfig {
    pub num_trees: usize,
    pub tree_size: usize,
    /// Seed for tree construction; `None` draws from entropy
    pub seed: Option<u64>,
    /// Consecutive samples joined into one point before scoring
    pub shingle_size: usize,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            num_trees: DEFAULT_NUM_TREES,
            tree_size: DEFAULT_TREE_SIZE,
            seed: None,
            shingle_size: DEFAULT_SHINGLE_SIZE,
        }
    }
}

/// Bounded-gap episode merging parameters, in seconds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EpisodeConfig {
    pub min_gap: f64,
    pub max_gap: f64,
}

impl Default for EpisodeConfig {
    fn default() -> Self {
        Self {
            min_gap: DEFAULT_MIN_GAP,
            max_gap: DEFAULT_MAX_GAP,
        }
    }
}

/// Decision ladder mapping score-distribution shape to a sensitivity multiplier
///
/// Rules are checked top to bottom; the first one that fires wins.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensitivityLadder {
    pub extreme_kurtosis: f64,
    pub extreme_kurtosis_n: f64,
    pub heavy_kurtosis: f64,
    pub heavy_kurtosis_n: f64,
    pub strong_skew: f64,
    pub strong_skew_n: f64,
    pub moderate_skew: f64,
    pub moderate_skew_n: f64,
    pub base_n: f64,
    /// Bypass the ladder and always use this multiplier
    pub fixed_n_sigma: Option<f64>,
}

impl Default for SensitivityLadder {
    fn default() -> Self {
        Self {
            extreme_kurtosis: 5.0,
            extreme_kurtosis_n: 4.0,
            heavy_kurtosis: 3.0,
            heavy_kurtosis_n: 3.5,
            strong_skew: 1.5,
            strong_skew_n: 3.5,
            moderate_skew: 1.0,
            moderate_skew_n: 3.0,
            base_n: 2.5,
            fixed_n_sigma: None,
        }
    }
}

impl SensitivityLadder {
    /// Pick the multiplier for a distribution with the given shape
    pub fn select(&self, skewness: f64, kurtosis: f64) -> f64 {
        if let Some(n) = self.fixed_n_sigma {
            return n;
        }
        if kurtosis > self.extreme_kurtosis {
            self.extreme_kurtosis_n
        } else if kurtosis > self.heavy_kurtosis {
            self.heavy_kurtosis_n
        } else if skewness > self.strong_skew {
            self.strong_skew_n
        } else if skewness > self.moderate_skew {
            self.moderate_skew_n
        } else {
            self.base_n
        }
    }

    fn multipliers(&self) -> [f64; 5] {
        [
            self.extreme_kurtosis_n,
            self.heavy_kurtosis_n,
            self.strong_skew_n,
            self.moderate_skew_n,
            self.base_n,
        ]
    }
}

/// Weights and dead zones for the facial transforms
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisualWeights {
    pub blink_weight: f64,
    pub eye_squint_weight: f64,
    pub smile_weight: f64,
    pub cheek_squint_weight: f64,
    pub gaze_h_center: f64,
    pub gaze_h_dead_zone: f64,
    pub gaze_v_threshold: f64,
}

impl Default for VisualWeights {
    fn default() -> Self {
        Self {
            blink_weight: 0.8,
            eye_squint_weight: 0.2,
            smile_weight: 0.7,
            cheek_squint_weight: 0.3,
            gaze_h_center: 0.5,
            gaze_h_dead_zone: 0.08,
            gaze_v_threshold: 0.15,
        }
    }
}

/// Complete engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Channels to process
    pub channels: Vec<Channel>,
    pub forest: ForestConfig,
    pub episodes: EpisodeConfig,
    /// Speaker label whose frames feed the audio and verbal channels
    pub target_speaker: String,
    pub mode: ProcessingMode,
    pub sensitivity: SensitivityLadder,
    pub visual: VisualWeights,
    pub range_policy: RangePolicy,
    /// Run channels on separate worker threads
    pub parallel: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            channels: Channel::ALL.to_vec(),
            forest: ForestConfig::default(),
            episodes: EpisodeConfig::default(),
            target_speaker: DEFAULT_TARGET_SPEAKER.to_string(),
            mode: ProcessingMode::default(),
            sensitivity: SensitivityLadder::default(),
            visual: VisualWeights::default(),
            range_policy: RangePolicy::default(),
            parallel: true,
        }
    }
}

impl PipelineConfig {
    /// Configuration with a fixed forest seed
    pub fn seeded(seed: u64) -> Self {
        let mut config = Self::default();
        config.forest.seed = Some(seed);
        config
    }

    /// Restrict processing to the given channels
    pub fn with_channels(mut self, channels: &[Channel]) -> Self {
        self.channels = channels.to_vec();
        self
    }

    /// Check that the configuration can drive the pipeline
    pub fn validate(&self) -> Result<(), DetectError> {
        if self.forest.num_trees == 0 {
            return Err(DetectError::InvalidConfig(
                "forest.num_trees must be at least 1".to_string(),
            ));
        }
        if self.forest.tree_size < 2 {
            return Err(DetectError::InvalidConfig(
                "forest.tree_size must be at least 2".to_string(),
            ));
        }
        if self.forest.shingle_size == 0 {
            return Err(DetectError::InvalidConfig(
                "forest.shingle_size must be at least 1".to_string(),
            ));
        }
        let EpisodeConfig { min_gap, max_gap } = self.episodes;
        if !(min_gap >= 0.0 && min_gap <= max_gap) {
            return Err(DetectError::InvalidConfig(format!(
                "episode gaps must satisfy 0 <= min_gap <= max_gap (got {min_gap}, {max_gap})"
            )));
        }
        if self.target_speaker.is_empty() {
            return Err(DetectError::InvalidConfig(
                "target_speaker must not be empty".to_string(),
            ));
        }
        let multipliers_ok = self
            .sensitivity
            .multipliers()
            .iter()
            .chain(self.sensitivity.fixed_n_sigma.iter())
            .all(|n| *n > 0.0);
        if !multipliers_ok {
            return Err(DetectError::InvalidConfig(
                "sensitivity multipliers must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Load configuration from JSON
    pub fn from_json(json: &str) -> Result<Self, DetectError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Load configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, DetectError> {
        let contents = fs::read_to_string(path.as_ref()).map_err(|e| {
            DetectError::ParseError(format!(
                "cannot read config {}: {e}",
                path.as_ref().display()
            ))
        })?;
        Self::from_json(&contents)
    }
}
