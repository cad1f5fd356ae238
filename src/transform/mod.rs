//! Signal transformation
//!
//! Turns raw per-frame measurements into the scalar each channel is scored on,
//! together with a decomposed reading for reporting. Gaps are forward-filled
//! before transformation so every valid frame carries a value.

pub mod visual;
pub mod vocal;

use crate::calibrator::robust_z;
use crate::config::{PipelineConfig, RangePolicy};
use crate::error::DetectError;
use crate::types::{Channel, ChannelFamily, ChannelReading, DeviationReading, Session};
use tracing::debug;
use visual::{BlinkInput, FaceInput, GazeInput, JawInput, SmileInput};

/// Fill gaps with the last valid value
///
/// Leading gaps take the first valid value. Returns `None` when the column has
/// no valid value at all.
pub fn forward_fill<T: Clone>(column: &[Option<T>]) -> Option<Vec<T>> {
    let first = column.iter().flatten().next()?.clone();
    let mut last = first;
    Some(
        column
            .iter()
            .map(|entry| {
                if let Some(value) = entry {
                    last = value.clone();
                }
                last.clone()
            })
            .collect(),
    )
}

/// Transformed values of one channel over its valid frames
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransformedSeries {
    /// Session frame index of each entry, ascending
    pub frames: Vec<usize>,
    /// Scalar fed to the anomaly scorer
    pub values: Vec<f64>,
    pub readings: Vec<ChannelReading>,
}

impl TransformedSeries {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Median pitch used for relative pitch
///
/// A value supplied with the session wins; otherwise it is computed from the
/// voiced frames where `mask` is set.
pub fn session_median_pitch(session: &Session, mask: &[bool]) -> Option<f64> {
    session.median_pitch_hz.or_else(|| {
        vocal::median_pitch(
            session
                .frames
                .iter()
                .zip(mask)
                .filter(|(_, valid)| **valid)
                .filter_map(|(frame, _)| frame.audio.as_ref()),
        )
    })
}

/// Per-channel transformer over a session
pub struct SignalTransformer<'a> {
    config: &'a PipelineConfig,
    median_pitch_hz: Option<f64>,
}

impl<'a> SignalTransformer<'a> {
    pub fn new(config: &'a PipelineConfig, median_pitch_hz: Option<f64>) -> Self {
        Self {
            config,
            median_pitch_hz,
        }
    }

    /// Transform `channel` over the given session frames
    pub fn transform(
        &self,
        channel: Channel,
        session: &Session,
        frames: &[usize],
    ) -> Result<TransformedSeries, DetectError> {
        if frames.is_empty() {
            return Ok(TransformedSeries::default());
        }
        let weights = &self.config.visual;
        let series = match channel {
            Channel::Blink => self.facial::<BlinkInput>(session, frames, |input| {
                (
                    visual::blink_intensity(input, weights),
                    ChannelReading::Blink(visual::blink_reading(input, weights)),
                )
            })?,
            Channel::Gaze => self.facial::<GazeInput>(session, frames, |input| {
                (
                    visual::gaze_magnitude(input, weights),
                    ChannelReading::Gaze(visual::gaze_reading(input, weights)),
                )
            })?,
            Channel::Jaw => self.facial::<JawInput>(session, frames, |input| {
                (
                    visual::jaw_magnitude(input),
                    ChannelReading::Jaw(visual::jaw_reading(input)),
                )
            })?,
            Channel::Smile => self.facial::<SmileInput>(session, frames, |input| {
                (
                    visual::smile_intensity(input, weights),
                    ChannelReading::Smile(visual::smile_reading(input, weights)),
                )
            })?,
            _ if channel.family() == ChannelFamily::Audio => self.audio(channel, session, frames)?,
            _ => self.verbal(channel, session, frames)?,
        };
        debug!(channel = %channel, frames = series.len(), "transformed channel");
        Ok(series)
    }

    fn facial<I: FaceInput>(
        &self,
        session: &Session,
        frames: &[usize],
        apply: impl Fn(&I) -> (f64, ChannelReading),
    ) -> Result<TransformedSeries, DetectError> {
        let mut missing = "face";
        let mut column = Vec::with_capacity(frames.len());
        for &index in frames {
            let input = match session.frames[index].face.as_ref().map(I::from_face) {
                Some(Ok(input)) if input.fields().iter().all(|(_, v)| v.is_finite()) => {
                    Some(apply_range_policy(input, self.config.range_policy, index)?)
                }
                Some(Err(name)) => {
                    missing = name;
                    None
                }
                _ => None,
            };
            column.push(input);
        }
        let filled = forward_fill(&column).ok_or_else(|| DetectError::MissingColumn {
            channel: I::CHANNEL,
            column: missing.to_string(),
        })?;
        let (values, readings) = filled.iter().map(|input| apply(input)).unzip();
        Ok(TransformedSeries {
            frames: frames.to_vec(),
            values,
            readings,
        })
    }

    fn audio(
        &self,
        channel: Channel,
        session: &Session,
        frames: &[usize],
    ) -> Result<TransformedSeries, DetectError> {
        let column: Vec<Option<f64>> = frames
            .iter()
            .map(|&index| {
                session.frames[index]
                    .audio
                    .as_ref()
                    .and_then(|audio| vocal::audio_unit(channel, audio, self.median_pitch_hz))
                    .filter(|v| v.is_finite())
            })
            .collect();
        let units = forward_fill(&column).ok_or_else(|| missing_column(channel))?;
        let deviations = robust_z(&units);
        let readings = units
            .iter()
            .zip(&deviations)
            .map(|(value, rz)| {
                ChannelReading::Deviation(DeviationReading {
                    value: *value,
                    rz: *rz,
                    level: vocal::level_for(channel, *rz),
                })
            })
            .collect();
        Ok(TransformedSeries {
            frames: frames.to_vec(),
            values: deviations,
            readings,
        })
    }

    fn verbal(
        &self,
        channel: Channel,
        session: &Session,
        frames: &[usize],
    ) -> Result<TransformedSeries, DetectError> {
        let column: Vec<Option<f64>> = frames
            .iter()
            .map(|&index| {
                let verbal = session.frames[index].verbal.as_ref()?;
                let value = match channel {
                    Channel::SpeakingRate => verbal.speaking_rate_rz,
                    Channel::FillerUsage => verbal.filler_increase,
                    Channel::PauseUsage => verbal.pause_increase,
                    _ => None,
                };
                value.filter(|v| v.is_finite())
            })
            .collect();
        let values = forward_fill(&column).ok_or_else(|| missing_column(channel))?;
        let readings = values
            .iter()
            .map(|value| {
                ChannelReading::Deviation(DeviationReading {
                    value: *value,
                    rz: *value,
                    level: vocal::level_for(channel, *value),
                })
            })
            .collect();
        Ok(TransformedSeries {
            frames: frames.to_vec(),
            values,
            readings,
        })
    }
}

fn missing_column(channel: Channel) -> DetectError {
    DetectError::MissingColumn {
        channel,
        column: vocal::source_column(channel).to_string(),
    }
}

/// Apply the configured handling of blendshape scores outside [0, 1]
fn apply_range_policy<I: FaceInput>(
    input: I,
    policy: RangePolicy,
    frame: usize,
) -> Result<I, DetectError> {
    match policy {
        RangePolicy::Accept => Ok(input),
        RangePolicy::Clamp => Ok(input.map_fields(|v| v.clamp(0.0, 1.0))),
        RangePolicy::Reject => {
            if let Some((field, value)) = input
                .fields()
                .into_iter()
                .find(|(_, v)| !(0.0..=1.0).contains(v))
            {
                return Err(DetectError::OutOfRange {
                    channel: I::CHANNEL,
                    frame,
                    field: field.to_string(),
                    value,
                });
            }
            Ok(input)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        AudioMeasurement, DeviationLevel, FaceMeasurement, Frame, VerbalMeasurement,
        DEFAULT_CADENCE_SEC,
    };
    use pretty_assertions::assert_eq;

    fn jaw_face(open: f64) -> FaceMeasurement {
        FaceMeasurement {
            jaw_open: Some(open),
            jaw_left: Some(0.0),
            jaw_right: Some(0.0),
            jaw_forward: Some(0.0),
            ..Default::default()
        }
    }

    fn session(frames: Vec<Frame>) -> Session {
        Session {
            session_id: "test".to_string(),
            cadence_sec: DEFAULT_CADENCE_SEC,
            frames,
            median_pitch_hz: None,
            utterances: Vec::new(),
        }
    }

    fn frame(time: f64) -> Frame {
        Frame {
            time,
            ..Default::default()
        }
    }

    #[test]
    fn test_forward_fill() {
        let column = [None, Some(1.0), None, Some(3.0), None];
        assert_eq!(forward_fill(&column), Some(vec![1.0, 1.0, 1.0, 3.0, 3.0]));
        assert_eq!(forward_fill::<f64>(&[None, None]), None);
        assert_eq!(forward_fill::<f64>(&[]), None);
    }

    #[test]
    fn test_facial_gaps_are_filled() {
        let mut frames: Vec<Frame> = (0..4).map(|i| frame(i as f64 * 0.5)).collect();
        frames[1].face = Some(jaw_face(0.2));
        frames[3].face = Some(jaw_face(0.6));
        let session = session(frames);
        let config = PipelineConfig::default();
        let transformer = SignalTransformer::new(&config, None);

        let series = transformer
            .transform(Channel::Jaw, &session, &[0, 1, 2, 3])
            .unwrap();
        assert_eq!(series.values, vec![0.2, 0.2, 0.2, 0.6]);
        assert_eq!(series.frames, vec![0, 1, 2, 3]);
        assert_eq!(series.readings.len(), 4);
    }

    #[test]
    fn test_missing_column_names_blendshape() {
        let mut frames: Vec<Frame> = (0..3).map(|i| frame(i as f64)).collect();
        for f in &mut frames {
            f.face = Some(FaceMeasurement {
                eye_blink_left: Some(0.1),
                ..Default::default()
            });
        }
        let session = session(frames);
        let config = PipelineConfig::default();
        let err = SignalTransformer::new(&config, None)
            .transform(Channel::Blink, &session, &[0, 1, 2])
            .unwrap_err();
        match err {
            DetectError::MissingColumn { channel, column } => {
                assert_eq!(channel, Channel::Blink);
                assert_eq!(column, "eyeBlinkRight");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_range_policies() {
        let mut frames = vec![frame(0.0), frame(0.5)];
        frames[0].face = Some(jaw_face(0.5));
        frames[1].face = Some(jaw_face(1.3));
        let session = session(frames);

        let config = PipelineConfig::default();
        let accepted = SignalTransformer::new(&config, None)
            .transform(Channel::Jaw, &session, &[0, 1])
            .unwrap();
        assert_eq!(accepted.values, vec![0.5, 1.3]);

        let config = PipelineConfig {
            range_policy: RangePolicy::Clamp,
            ..Default::default()
        };
        let clamped = SignalTransformer::new(&config, None)
            .transform(Channel::Jaw, &session, &[0, 1])
            .unwrap();
        assert_eq!(clamped.values, vec![0.5, 1.0]);

        let config = PipelineConfig {
            range_policy: RangePolicy::Reject,
            ..Default::default()
        };
        let rejected =
            SignalTransformer::new(&config, None).transform(Channel::Jaw, &session, &[0, 1]);
        assert!(matches!(
            rejected,
            Err(DetectError::OutOfRange { frame: 1, .. })
        ));
    }

    #[test]
    fn test_audio_values_are_robust_deviations() {
        let rms = [0.1, 0.1, 0.2, 0.1, 0.05];
        let frames: Vec<Frame> = rms
            .iter()
            .enumerate()
            .map(|(i, r)| Frame {
                time: i as f64 * 0.5,
                audio: Some(AudioMeasurement {
                    rms: Some(*r),
                    ..Default::default()
                }),
                ..Default::default()
            })
            .collect();
        let session = session(frames);
        let config = PipelineConfig::default();
        let series = SignalTransformer::new(&config, None)
            .transform(Channel::Loudness, &session, &[0, 1, 2, 3, 4])
            .unwrap();

        // three of five frames at -20 dB => zero spread => every deviation is 0
        assert_eq!(series.values, vec![0.0; 5]);
        match series.readings[2] {
            ChannelReading::Deviation(reading) => {
                assert!((reading.value - 20.0 * 0.2f64.log10()).abs() < 1e-9);
                assert_eq!(reading.level, DeviationLevel::Normal);
            }
            other => panic!("unexpected reading: {other:?}"),
        }
    }

    #[test]
    fn test_relative_pitch_uses_median() {
        let pitches = [200.0, 0.0, 400.0];
        let frames: Vec<Frame> = pitches
            .iter()
            .enumerate()
            .map(|(i, p)| Frame {
                time: i as f64,
                audio: Some(AudioMeasurement {
                    pitch_hz: Some(*p),
                    ..Default::default()
                }),
                ..Default::default()
            })
            .collect();
        let session = session(frames);
        let median = session_median_pitch(&session, &[true, true, true]);
        assert_eq!(median, Some(300.0));

        let config = PipelineConfig::default();
        let series = SignalTransformer::new(&config, Some(200.0))
            .transform(Channel::PitchRelative, &session, &[0, 1, 2])
            .unwrap();
        let units: Vec<f64> = series
            .readings
            .iter()
            .map(|r| match r {
                ChannelReading::Deviation(d) => d.value,
                _ => f64::NAN,
            })
            .collect();
        // the unvoiced frame takes the previous voiced value
        assert_eq!(units, vec![0.0, 0.0, 12.0]);
    }

    #[test]
    fn test_verbal_values_pass_through() {
        let frames: Vec<Frame> = [0.5, 2.0, 4.0]
            .iter()
            .enumerate()
            .map(|(i, v)| Frame {
                time: i as f64,
                verbal: Some(VerbalMeasurement {
                    filler_increase: Some(*v),
                    ..Default::default()
                }),
                ..Default::default()
            })
            .collect();
        let session = session(frames);
        let config = PipelineConfig::default();
        let series = SignalTransformer::new(&config, None)
            .transform(Channel::FillerUsage, &session, &[0, 1, 2])
            .unwrap();
        assert_eq!(series.values, vec![0.5, 2.0, 4.0]);
        assert_eq!(
            series.readings[2],
            ChannelReading::Deviation(DeviationReading {
                value: 4.0,
                rz: 4.0,
                level: DeviationLevel::Marked,
            })
        );

        let err = SignalTransformer::new(&config, None)
            .transform(Channel::SpeakingRate, &session, &[0, 1, 2])
            .unwrap_err();
        assert!(matches!(err, DetectError::MissingColumn { .. }));
    }

    #[test]
    fn test_no_valid_frames_is_empty_series() {
        let session = session(vec![frame(0.0)]);
        let config = PipelineConfig::default();
        let series = SignalTransformer::new(&config, None)
            .transform(Channel::Loudness, &session, &[])
            .unwrap();
        assert!(series.is_empty());
    }
}
