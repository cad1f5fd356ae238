//! Pipeline orchestration
//!
//! This module provides the public API of the engine. Each channel runs
//! through the same stages, independently of every other channel:
//!
//! 1. SpeakerGate - Mark the frames the channel may use
//! 2. SignalTransformer - Gap-fill and transform raw measurements
//! 3. RandomCutForest - Score each frame in time order
//! 4. DistributionCalibrator - Threshold the scores
//! 5. EpisodeMerger - Merge flagged frames into episodes
//! 6. RecordAssembler - Join everything into per-frame records

use crate::assembler::RecordAssembler;
use crate::calibrator::{mad, median, DistributionCalibrator};
use crate::config::{PipelineConfig, ProcessingMode};
use crate::episodes::EpisodeMerger;
use crate::error::DetectError;
use crate::forest::RandomCutForest;
use crate::speaker::{valid_runs, SpeakerGate, SpeakerTimeline};
use crate::transform::{session_median_pitch, SignalTransformer, TransformedSeries};
use crate::types::{Channel, ChannelStates, ChannelValues, Session, ValueBaseline};
use serde::{Deserialize, Serialize};
use std::thread;
use tracing::{debug, info, warn};

/// Multiplier spreading channel seeds apart so their trees never share a seed
const CHANNEL_SEED_STRIDE: u64 = 0x9E37_79B9_7F4A_7C15;

/// Forest seed for one channel, derived from the configured seed
pub fn channel_seed(seed: Option<u64>, channel: Channel) -> Option<u64> {
    seed.map(|s| s.wrapping_add(channel.ordinal().wrapping_mul(CHANNEL_SEED_STRIDE)))
}

/// Read-only per-session state shared by every channel
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub times: Vec<f64>,
    pub timeline: SpeakerTimeline,
    /// Frames in which the target speaker is active
    pub target_mask: Vec<bool>,
    pub median_pitch_hz: Option<f64>,
}

impl SessionContext {
    pub fn new(session: &Session, config: &PipelineConfig) -> Self {
        let timeline = SpeakerTimeline::from_session(session);
        let mut target_mask = SpeakerGate::new(config.target_speaker.as_str()).mask(&timeline);
        target_mask.resize(session.len(), false);
        let median_pitch_hz = session_median_pitch(session, &target_mask);
        Self {
            times: session.times(),
            timeline,
            target_mask,
            median_pitch_hz,
        }
    }

    /// Per-frame validity for `channel`
    pub fn validity(&self, channel: Channel) -> Vec<bool> {
        if channel.is_speaker_gated() {
            self.target_mask.clone()
        } else {
            vec![true; self.times.len()]
        }
    }
}

/// Single-channel evaluation
pub struct ChannelPipeline;

impl ChannelPipeline {
    /// Full anomaly and episode evaluation of one channel
    pub fn evaluate(
        channel: Channel,
        session: &Session,
        config: &PipelineConfig,
    ) -> Result<ChannelStates, DetectError> {
        config.validate()?;
        ensure_frames(session)?;
        let context = SessionContext::new(session, config);
        Self::evaluate_in(channel, session, &context, config)
    }

    /// Transform-only pass of one channel
    pub fn values(
        channel: Channel,
        session: &Session,
        config: &PipelineConfig,
    ) -> Result<ChannelValues, DetectError> {
        config.validate()?;
        ensure_frames(session)?;
        let context = SessionContext::new(session, config);
        Self::values_in(channel, session, &context, config)
    }

    fn transform(
        channel: Channel,
        session: &Session,
        context: &SessionContext,
        config: &PipelineConfig,
    ) -> Result<(Vec<bool>, TransformedSeries), DetectError> {
        let validity = context.validity(channel);
        let frames: Vec<usize> = validity
            .iter()
            .enumerate()
            .filter_map(|(i, valid)| valid.then_some(i))
            .collect();
        let series = SignalTransformer::new(config, context.median_pitch_hz)
            .transform(channel, session, &frames)?;
        Ok((validity, series))
    }

    fn evaluate_in(
        channel: Channel,
        session: &Session,
        context: &SessionContext,
        config: &PipelineConfig,
    ) -> Result<ChannelStates, DetectError> {
        let (validity, series) = Self::transform(channel, session, context, config)?;

        let mut forest_config = config.forest;
        forest_config.seed = channel_seed(config.forest.seed, channel);
        let scores = RandomCutForest::new(&forest_config).score_series(&series.values);

        let calibration = DistributionCalibrator::new(config.sensitivity).calibrate(&scores);

        let runs = valid_runs(&validity);
        let mut flagged_per_run: Vec<Vec<(usize, f64)>> = vec![Vec::new(); runs.len()];
        for (frame, flagged) in series.frames.iter().zip(&calibration.flags) {
            if *flagged {
                let run = runs.partition_point(|r| r.end <= *frame);
                flagged_per_run[run].push((*frame, context.times[*frame]));
            }
        }
        let episodes = EpisodeMerger::from(config.episodes).episodes_per_run(&flagged_per_run);

        debug!(
            channel = %channel,
            scored = scores.len(),
            flagged = calibration.flagged_count(),
            episodes = episodes.len(),
            "evaluated channel"
        );

        let records = RecordAssembler::new(channel, &context.times).assemble(
            &series,
            &scores,
            &calibration,
            &episodes,
        );
        Ok(ChannelStates {
            channel,
            records,
            episodes,
            validity,
            calibration: calibration.summary(),
        })
    }

    fn values_in(
        channel: Channel,
        session: &Session,
        context: &SessionContext,
        config: &PipelineConfig,
    ) -> Result<ChannelValues, DetectError> {
        let (_, series) = Self::transform(channel, session, context, config)?;
        let values = RecordAssembler::new(channel, &context.times).scatter_values(&series);
        Ok(ChannelValues {
            channel,
            values,
            baseline: value_baseline(&series.values),
        })
    }
}

/// Robust description of transformed values, `None` when there are none
pub fn value_baseline(values: &[f64]) -> Option<ValueBaseline> {
    let center = median(values)?;
    let count = values.len();
    Some(ValueBaseline {
        count,
        mean: values.iter().sum::<f64>() / count as f64,
        median: center,
        mad: mad(values, center).unwrap_or_default(),
        min: values.iter().copied().fold(f64::INFINITY, f64::min),
        max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
    })
}

fn ensure_frames(session: &Session) -> Result<(), DetectError> {
    if session.is_empty() {
        return Err(DetectError::EmptySession);
    }
    Ok(())
}

/// A channel that could not be processed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelFailure {
    pub channel: Channel,
    pub error: String,
}

/// Evaluation of every configured channel of a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEvaluation {
    pub session_id: String,
    pub times: Vec<f64>,
    pub channels: Vec<ChannelStates>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<ChannelFailure>,
}

impl SessionEvaluation {
    pub fn channel(&self, channel: Channel) -> Option<&ChannelStates> {
        self.channels.iter().find(|c| c.channel == channel)
    }

    /// Per-frame validity of a channel after speaker gating
    pub fn validity(&self, channel: Channel) -> Option<&[bool]> {
        self.channel(channel).map(|c| c.validity.as_slice())
    }

    pub fn failure(&self, channel: Channel) -> Option<&ChannelFailure> {
        self.failures.iter().find(|f| f.channel == channel)
    }
}

/// Transform-only output of every configured channel of a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionValues {
    pub session_id: String,
    pub times: Vec<f64>,
    pub channels: Vec<ChannelValues>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<ChannelFailure>,
}

impl SessionValues {
    pub fn channel(&self, channel: Channel) -> Option<&ChannelValues> {
        self.channels.iter().find(|c| c.channel == channel)
    }
}

/// Result of [`SessionProcessor::process`], shaped by the processing mode
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SessionOutput {
    Values(SessionValues),
    Evaluation(SessionEvaluation),
}

/// Multi-channel session processor
///
/// Channels share nothing mutable; with `parallel` set each one runs on its
/// own scoped worker thread.
pub struct SessionProcessor {
    config: PipelineConfig,
}

impl SessionProcessor {
    /// Create a processor, validating the configuration
    pub fn new(config: PipelineConfig) -> Result<Self, DetectError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run the pass selected by the configured mode
    pub fn process(&self, session: &Session) -> Result<SessionOutput, DetectError> {
        match self.config.mode {
            ProcessingMode::ValueOnly => self.values(session).map(SessionOutput::Values),
            ProcessingMode::Evaluation => self.evaluate(session).map(SessionOutput::Evaluation),
        }
    }

    /// Evaluate every configured channel
    pub fn evaluate(&self, session: &Session) -> Result<SessionEvaluation, DetectError> {
        ensure_frames(session)?;
        info!(
            session = %session.session_id,
            frames = session.len(),
            channels = self.config.channels.len(),
            "evaluating session"
        );
        let context = SessionContext::new(session, &self.config);
        let (channels, failures) = self.run_channels(|channel| {
            ChannelPipeline::evaluate_in(channel, session, &context, &self.config)
        });
        info!(
            session = %session.session_id,
            anomalies = channels
                .iter()
                .map(|c| c.anomalous_frames().count())
                .sum::<usize>(),
            failures = failures.len(),
            "session evaluated"
        );
        Ok(SessionEvaluation {
            session_id: session.session_id.clone(),
            times: context.times,
            channels,
            failures,
        })
    }

    /// Transform every configured channel without scoring
    pub fn values(&self, session: &Session) -> Result<SessionValues, DetectError> {
        ensure_frames(session)?;
        info!(
            session = %session.session_id,
            frames = session.len(),
            "computing channel values"
        );
        let context = SessionContext::new(session, &self.config);
        let (channels, failures) = self.run_channels(|channel| {
            ChannelPipeline::values_in(channel, session, &context, &self.config)
        });
        Ok(SessionValues {
            session_id: session.session_id.clone(),
            times: context.times,
            channels,
            failures,
        })
    }

    /// Run `job` for every configured channel, keeping failures apart
    fn run_channels<T, F>(&self, job: F) -> (Vec<T>, Vec<ChannelFailure>)
    where
        T: Send,
        F: Fn(Channel) -> Result<T, DetectError> + Sync,
    {
        let job = &job;
        let results: Vec<(Channel, Result<T, DetectError>)> = if self.config.parallel {
            thread::scope(|scope| {
                let handles: Vec<_> = self
                    .config
                    .channels
                    .iter()
                    .map(|&channel| (channel, scope.spawn(move || job(channel))))
                    .collect();
                handles
                    .into_iter()
                    .map(|(channel, handle)| {
                        let result = handle
                            .join()
                            .unwrap_or_else(|_| Err(DetectError::WorkerPanicked(channel)));
                        (channel, result)
                    })
                    .collect()
            })
        } else {
            self.config
                .channels
                .iter()
                .map(|&channel| (channel, job(channel)))
                .collect()
        };

        let mut outputs = Vec::with_capacity(results.len());
        let mut failures = Vec::new();
        for (channel, result) in results {
            match result {
                Ok(output) => outputs.push(output),
                Err(error) => {
                    warn!(channel = %channel, error = %error, "channel failed");
                    failures.push(ChannelFailure {
                        channel,
                        error: error.to_string(),
                    });
                }
            }
        }
        (outputs, failures)
    }
}

/// Process a JSON session and return the JSON output for the configured mode
pub fn session_to_states(
    session_json: &str,
    config: &PipelineConfig,
) -> Result<String, DetectError> {
    let session: Session = serde_json::from_str(session_json)?;
    let processor = SessionProcessor::new(config.clone())?;
    let output = processor.process(&session)?;
    Ok(serde_json::to_string(&output)?)
}
