//! Core data types
//!
//! This module defines the raw per-frame measurements consumed by the engine,
//! the decomposed readings produced by the signal transformer, and the typed
//! per-frame channel records handed to reporting collaborators.

use crate::error::DetectError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Default sampling cadence in seconds
pub const DEFAULT_CADENCE_SEC: f64 = 0.5;

/// Family a channel belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelFamily {
    Visual,
    Audio,
    Verbal,
}

/// A named signal channel tracked independently through the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Blink,
    Gaze,
    Jaw,
    Smile,
    Loudness,
    PitchRelative,
    PitchExpressiveness,
    SpeakingRate,
    FillerUsage,
    PauseUsage,
}

impl Channel {
    /// Every channel, in canonical order
    pub const ALL: [Channel; 10] = [
        Channel::Blink,
        Channel::Gaze,
        Channel::Jaw,
        Channel::Smile,
        Channel::Loudness,
        Channel::PitchRelative,
        Channel::PitchExpressiveness,
        Channel::SpeakingRate,
        Channel::FillerUsage,
        Channel::PauseUsage,
    ];

    pub fn family(self) -> ChannelFamily {
        match self {
            Channel::Blink | Channel::Gaze | Channel::Jaw | Channel::Smile => ChannelFamily::Visual,
            Channel::Loudness | Channel::PitchRelative | Channel::PitchExpressiveness => {
                ChannelFamily::Audio
            }
            Channel::SpeakingRate | Channel::FillerUsage | Channel::PauseUsage => {
                ChannelFamily::Verbal
            }
        }
    }

    /// Whether the channel is only meaningful while the target speaker talks
    pub fn is_speaker_gated(self) -> bool {
        self.family() != ChannelFamily::Visual
    }

    /// Stable position of the channel in [`Channel::ALL`]
    pub fn ordinal(self) -> u64 {
        Channel::ALL
            .iter()
            .position(|c| *c == self)
            .unwrap_or_default() as u64
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Blink => "blink",
            Channel::Gaze => "gaze",
            Channel::Jaw => "jaw",
            Channel::Smile => "smile",
            Channel::Loudness => "loudness",
            Channel::PitchRelative => "pitch_relative",
            Channel::PitchExpressiveness => "pitch_expressiveness",
            Channel::SpeakingRate => "speaking_rate",
            Channel::FillerUsage => "filler_usage",
            Channel::PauseUsage => "pause_usage",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = DetectError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Channel::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| DetectError::ParseError(format!("unknown channel `{s}`")))
    }
}

// ============================================================================
// Raw inputs
// ============================================================================

/// Facial blendshape scores for one frame (MediaPipe naming)
///
/// Every field is optional: a blendshape absent from the extractor output is
/// a gap for the channels that need it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FaceMeasurement {
    pub eye_blink_left: Option<f64>,
    pub eye_blink_right: Option<f64>,
    pub eye_squint_left: Option<f64>,
    pub eye_squint_right: Option<f64>,
    /// Horizontal iris ratio (0 = outer corner, 1 = inner corner)
    #[serde(alias = "h_ratio")]
    pub h_ratio: Option<f64>,
    pub eye_look_up_left: Option<f64>,
    pub eye_look_up_right: Option<f64>,
    pub eye_look_down_left: Option<f64>,
    pub eye_look_down_right: Option<f64>,
    pub jaw_open: Option<f64>,
    pub jaw_left: Option<f64>,
    pub jaw_right: Option<f64>,
    pub jaw_forward: Option<f64>,
    pub mouth_smile_left: Option<f64>,
    pub mouth_smile_right: Option<f64>,
    pub cheek_squint_left: Option<f64>,
    pub cheek_squint_right: Option<f64>,
    pub mouth_stretch_left: Option<f64>,
    pub mouth_stretch_right: Option<f64>,
}

/// Acoustic measurements for one frame
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioMeasurement {
    /// Root-mean-square energy of the frame
    #[serde(alias = "audio_rms")]
    pub rms: Option<f64>,
    /// Mean fundamental frequency over voiced samples (Hz, 0 = unvoiced)
    #[serde(alias = "audio_pitch_avg")]
    pub pitch_hz: Option<f64>,
    /// Standard deviation of fundamental frequency (Hz)
    #[serde(alias = "audio_pitch_var")]
    pub pitch_std_hz: Option<f64>,
}

/// Speech-fluency deviations for one frame, already normalized upstream
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerbalMeasurement {
    /// Robust z-score of words per minute against the subject's norm
    pub speaking_rate_rz: Option<f64>,
    /// Increase in filler-word usage over the subject's norm
    pub filler_increase: Option<f64>,
    /// Increase in pause usage over the subject's norm
    pub pause_increase: Option<f64>,
}

/// One time step of raw measurements
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Frame timestamp in seconds
    #[serde(alias = "Time")]
    pub time: f64,
    /// Face measurements (absent when no face was detected)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub face: Option<FaceMeasurement>,
    /// Audio measurements (absent when no audio was extracted)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<AudioMeasurement>,
    /// Verbal measurements
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verbal: Option<VerbalMeasurement>,
    /// Active speaker label (absent during non-speech)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
}

/// A diarized utterance, with boundaries in milliseconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Utterance {
    pub start_ms: u64,
    pub end_ms: u64,
    pub speaker: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// A recorded session: index-aligned frames for every channel family
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    /// Sampling cadence in seconds
    #[serde(default = "default_cadence")]
    pub cadence_sec: f64,
    /// Frames in time order
    pub frames: Vec<Frame>,
    /// Subject's median pitch (Hz); computed from speaking frames when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub median_pitch_hz: Option<f64>,
    /// Utterance-level speaker table, used when frames carry no labels
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub utterances: Vec<Utterance>,
}

fn default_cadence() -> f64 {
    DEFAULT_CADENCE_SEC
}

impl Session {
    pub fn times(&self) -> Vec<f64> {
        self.frames.iter().map(|f| f.time).collect()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

// ============================================================================
// Decomposed readings
// ============================================================================

/// Eyelid closure reading
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BlinkReading {
    /// Mean weighted closure across both eyes (0 open, 1 closed)
    pub intensity: f64,
    /// Absolute left/right closure difference
    pub asymmetry: f64,
    pub is_blinking: bool,
}

/// Dominant gaze direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GazeDirection {
    Center,
    Left,
    Right,
    Up,
    Down,
}

/// Gaze reading
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GazeReading {
    pub magnitude: f64,
    /// Horizontal offset from center (negative = left)
    pub horizontal_deviation: f64,
    /// Vertical offset (positive = up)
    pub vertical_deviation: f64,
    pub primary_direction: GazeDirection,
}

/// Jaw reading
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JawReading {
    pub open: f64,
    /// Side-to-side movement (negative = left)
    pub lateral: f64,
    pub forward: f64,
    pub magnitude: f64,
    pub is_open: bool,
}

/// Smile reading
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SmileReading {
    pub intensity: f64,
    pub asymmetry: f64,
    pub left_intensity: f64,
    pub right_intensity: f64,
    pub mouth_stretch: f64,
    pub is_smiling: bool,
}

/// Categorical level of a vocal or verbal deviation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviationLevel {
    // loudness
    VeryQuiet,
    Quiet,
    Loud,
    VeryLoud,
    // relative pitch
    MuchLower,
    Lower,
    Higher,
    MuchHigher,
    // pitch expressiveness
    Flat,
    SlightlyExpressive,
    Expressive,
    HighlyExpressive,
    // speaking rate
    MuchSlower,
    Slower,
    Faster,
    MuchFaster,
    // filler and pause usage
    Decreased,
    Typical,
    Elevated,
    Marked,
    Normal,
}

/// Vocal or verbal deviation reading
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeviationReading {
    /// Value in the channel's natural unit (dBFS, semitones, or the upstream value)
    pub value: f64,
    /// Robust z-score of the value against the subject's own speaking frames
    pub rz: f64,
    pub level: DeviationLevel,
}

/// Decomposed reading attached to a channel record
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChannelReading {
    Blink(BlinkReading),
    Gaze(GazeReading),
    Jaw(JawReading),
    Smile(SmileReading),
    Deviation(DeviationReading),
}

// ============================================================================
// Outputs
// ============================================================================

/// A run of anomalous frames merged under the bounded-gap rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    pub id: usize,
    pub start: f64,
    pub end: f64,
    /// Frame indices of the members, ascending
    pub frames: Vec<usize>,
    /// Timestamps of the members, ascending
    pub timestamps: Vec<f64>,
}

impl Episode {
    /// Build an episode from non-empty `(frame index, time)` members
    pub fn new(id: usize, members: &[(usize, f64)]) -> Self {
        let start = members.first().map(|m| m.1).unwrap_or_default();
        let end = members.last().map(|m| m.1).unwrap_or(start);
        Self {
            id,
            start,
            end,
            frames: members.iter().map(|m| m.0).collect(),
            timestamps: members.iter().map(|m| m.1).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Sustained state shift (more than one member) as opposed to a micro-event
    pub fn is_sustained(&self) -> bool {
        self.frames.len() > 1
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// Final per-frame, per-channel state record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelRecord {
    pub channel: Channel,
    pub frame: usize,
    pub time: f64,
    /// Transformed scalar that was scored
    pub value: f64,
    pub reading: ChannelReading,
    /// Raw anomaly score from the forest
    pub anomaly_score: f64,
    /// Robust deviation of the anomaly score
    pub rz_score: f64,
    /// Calibrated threshold (absent for degenerate channels)
    pub threshold: Option<f64>,
    pub is_anomalous: bool,
    /// Member of a sustained (multi-frame) episode
    pub is_continuous: bool,
    /// Episode holding this frame, when anomalous
    #[serde(skip_serializing_if = "Option::is_none")]
    pub episode_id: Option<usize>,
    /// Timestamps of the sustained episode holding this frame
    #[serde(skip_serializing_if = "Option::is_none")]
    pub continuous_range: Option<Vec<f64>>,
}

/// Condensed view of a channel's calibration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationSummary {
    pub median: f64,
    pub mad: f64,
    pub skewness: f64,
    pub kurtosis: f64,
    pub n_sigma: f64,
    pub threshold: Option<f64>,
    pub scored_frames: usize,
}

/// Evaluation result for one channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelStates {
    pub channel: Channel,
    /// One entry per session frame; `None` where the speaker gate excluded it
    pub records: Vec<Option<ChannelRecord>>,
    pub episodes: Vec<Episode>,
    /// Per-frame validity after speaker gating
    pub validity: Vec<bool>,
    pub calibration: CalibrationSummary,
}

impl ChannelStates {
    pub fn anomalous_frames(&self) -> impl Iterator<Item = &ChannelRecord> {
        self.records
            .iter()
            .flatten()
            .filter(|r| r.is_anomalous)
    }

    pub fn sustained_episodes(&self) -> impl Iterator<Item = &Episode> {
        self.episodes.iter().filter(|e| e.is_sustained())
    }
}

/// Robust description of a channel's transformed values
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValueBaseline {
    pub count: usize,
    pub mean: f64,
    pub median: f64,
    pub mad: f64,
    pub min: f64,
    pub max: f64,
}

/// Value-only result for one channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelValues {
    pub channel: Channel,
    /// One entry per session frame; `None` where the speaker gate excluded it
    pub values: Vec<Option<f64>>,
    pub baseline: Option<ValueBaseline>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_serialization() {
        let json = serde_json::to_string(&Channel::PitchExpressiveness).unwrap();
        assert_eq!(json, "\"pitch_expressiveness\"");

        let parsed: Channel = serde_json::from_str("\"filler_usage\"").unwrap();
        assert_eq!(parsed, Channel::FillerUsage);
    }

    #[test]
    fn test_channel_from_str() {
        assert_eq!("pitch_relative".parse::<Channel>().unwrap(), Channel::PitchRelative);
        for channel in Channel::ALL {
            assert_eq!(channel.as_str().parse::<Channel>().unwrap(), channel);
        }
        assert!("nose".parse::<Channel>().is_err());
    }

    #[test]
    fn test_channel_families() {
        assert_eq!(Channel::Blink.family(), ChannelFamily::Visual);
        assert_eq!(Channel::Loudness.family(), ChannelFamily::Audio);
        assert_eq!(Channel::PauseUsage.family(), ChannelFamily::Verbal);
        assert!(!Channel::Smile.is_speaker_gated());
        assert!(Channel::SpeakingRate.is_speaker_gated());
    }

    #[test]
    fn test_channel_ordinals_are_distinct() {
        let mut ordinals: Vec<u64> = Channel::ALL.iter().map(|c| c.ordinal()).collect();
        ordinals.dedup();
        assert_eq!(ordinals.len(), Channel::ALL.len());
    }

    #[test]
    fn test_frame_deserialization_with_blendshape_names() {
        let json = r#"{
            "Time": 1.5,
            "face": {"eyeBlinkLeft": 0.4, "eyeBlinkRight": 0.2, "h_ratio": 0.55},
            "speaker": "B"
        }"#;

        let frame: Frame = serde_json::from_str(json).unwrap();
        assert_eq!(frame.time, 1.5);
        let face = frame.face.unwrap();
        assert_eq!(face.eye_blink_left, Some(0.4));
        assert_eq!(face.h_ratio, Some(0.55));
        assert_eq!(face.jaw_open, None);
        assert_eq!(frame.speaker.as_deref(), Some("B"));
        assert!(frame.audio.is_none());
    }

    #[test]
    fn test_session_default_cadence() {
        let json = r#"{"session_id": "s1", "frames": []}"#;
        let session: Session = serde_json::from_str(json).unwrap();
        assert_eq!(session.cadence_sec, DEFAULT_CADENCE_SEC);
        assert!(session.is_empty());
    }

    #[test]
    fn test_episode_shape() {
        let episode = Episode::new(3, &[(10, 5.0), (11, 5.5), (12, 6.0)]);
        assert_eq!(episode.start, 5.0);
        assert_eq!(episode.end, 6.0);
        assert_eq!(episode.len(), 3);
        assert!(episode.is_sustained());
        assert!((episode.duration() - 1.0).abs() < 1e-12);

        let micro = Episode::new(0, &[(4, 2.0)]);
        assert!(!micro.is_sustained());
    }

    #[test]
    fn test_reading_is_tagged() {
        let reading = ChannelReading::Jaw(JawReading {
            open: 0.4,
            lateral: 0.0,
            forward: 0.1,
            magnitude: 0.5,
            is_open: true,
        });
        let value = serde_json::to_value(reading).unwrap();
        assert_eq!(value["kind"], "jaw");
        assert_eq!(value["is_open"], true);
    }
}
