//! Window summaries
//!
//! Condenses a session evaluation into per-window anomaly events for reporting
//! collaborators, and wraps them in a payload carrying producer metadata.

use crate::error::DetectError;
use crate::pipeline::SessionEvaluation;
use crate::types::{Channel, ChannelFamily, ChannelStates, Episode};
use crate::{PRODUCER_NAME, TELLTALE_VERSION};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Upper bound on the number of windows one session is split into
pub const MAX_WINDOWS: usize = 100_000;

/// One episode as seen by a report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyEvent {
    pub channel: Channel,
    pub family: ChannelFamily,
    pub episode_id: usize,
    pub timestamp_start: f64,
    pub timestamp_end: f64,
    /// Largest absolute robust deviation among the episode's frames
    pub intensity_score: f64,
    pub is_sustained: bool,
    pub frame_count: usize,
}

/// Events and counts for one time window `[start, end)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowSummary {
    pub start: f64,
    pub end: f64,
    /// Episodes overlapping the window, by start time
    pub events: Vec<AnomalyEvent>,
    /// Anomalous frames inside the window per channel
    pub anomaly_counts: BTreeMap<Channel, usize>,
}

impl WindowSummary {
    pub fn total_anomalies(&self) -> usize {
        self.anomaly_counts.values().sum()
    }

    pub fn sustained_events(&self) -> impl Iterator<Item = &AnomalyEvent> {
        self.events.iter().filter(|e| e.is_sustained)
    }
}

/// Builds window summaries from a session evaluation
#[derive(Debug, Clone, Copy, Default)]
pub struct WindowSummarizer;

impl WindowSummarizer {
    pub fn new() -> Self {
        Self
    }

    /// Summarize the window `[start, end)`
    pub fn summarize(&self, evaluation: &SessionEvaluation, start: f64, end: f64) -> WindowSummary {
        let mut events = Vec::new();
        let mut anomaly_counts = BTreeMap::new();

        for states in &evaluation.channels {
            let count = states
                .anomalous_frames()
                .filter(|r| r.time >= start && r.time < end)
                .count();
            anomaly_counts.insert(states.channel, count);

            events.extend(
                states
                    .episodes
                    .iter()
                    .filter(|e| e.start < end && e.end >= start)
                    .map(|e| event(states, e)),
            );
        }
        events.sort_by(|a, b| {
            a.timestamp_start
                .total_cmp(&b.timestamp_start)
                .then(a.channel.cmp(&b.channel))
        });

        WindowSummary {
            start,
            end,
            events,
            anomaly_counts,
        }
    }

    /// Split the session into consecutive windows of `length` seconds
    pub fn windows(
        &self,
        evaluation: &SessionEvaluation,
        length: f64,
    ) -> Result<Vec<WindowSummary>, DetectError> {
        if length.is_nan() || length <= 0.0 {
            return Err(DetectError::InvalidConfig(format!(
                "window length must be positive (got {length})"
            )));
        }
        let (Some(&first), Some(&last)) = (evaluation.times.first(), evaluation.times.last()) else {
            return Ok(Vec::new());
        };

        let count = ((last - first) / length).floor() + 1.0;
        if count.is_nan() || count > MAX_WINDOWS as f64 {
            return Err(DetectError::InvalidConfig(format!(
                "window length {length} splits the session into more than {MAX_WINDOWS} windows"
            )));
        }
        let count = count as usize;

        Ok((0..count)
            .map(|i| {
                let start = first + i as f64 * length;
                self.summarize(evaluation, start, start + length)
            })
            .collect())
    }
}

fn event(states: &ChannelStates, episode: &Episode) -> AnomalyEvent {
    let intensity_score = episode
        .frames
        .iter()
        .filter_map(|f| states.records.get(*f).and_then(|r| r.as_ref()))
        .map(|r| r.rz_score.abs())
        .fold(0.0, f64::max);
    AnomalyEvent {
        channel: states.channel,
        family: states.channel.family(),
        episode_id: episode.id,
        timestamp_start: episode.start,
        timestamp_end: episode.end,
        intensity_score,
        is_sustained: episode.is_sustained(),
        frame_count: episode.len(),
    }
}

/// Producer metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryProducer {
    pub name: String,
    pub version: String,
    pub instance_id: String,
}

/// Summaries of one session ready for export
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryPayload {
    pub producer: SummaryProducer,
    pub session_id: String,
    pub computed_at_utc: String,
    pub windows: Vec<WindowSummary>,
}

/// Encoder producing summary payloads
pub struct SummaryEncoder {
    instance_id: String,
}

impl Default for SummaryEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl SummaryEncoder {
    /// Create a new encoder with a unique instance ID
    pub fn new() -> Self {
        Self {
            instance_id: Uuid::new_v4().to_string(),
        }
    }

    /// Create an encoder with a specific instance ID
    pub fn with_instance_id(instance_id: String) -> Self {
        Self { instance_id }
    }

    pub fn encode(&self, session_id: &str, windows: Vec<WindowSummary>) -> SummaryPayload {
        SummaryPayload {
            producer: SummaryProducer {
                name: PRODUCER_NAME.to_string(),
                version: TELLTALE_VERSION.to_string(),
                instance_id: self.instance_id.clone(),
            },
            session_id: session_id.to_string(),
            computed_at_utc: Utc::now().to_rfc3339(),
            windows,
        }
    }

    /// Encode to JSON string
    pub fn encode_to_json(
        &self,
        session_id: &str,
        windows: Vec<WindowSummary>,
    ) -> Result<String, DetectError> {
        let payload = self.encode(session_id, windows);
        serde_json::to_string_pretty(&payload).map_err(DetectError::JsonError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BlinkReading, CalibrationSummary, ChannelReading, ChannelRecord};
    use pretty_assertions::assert_eq;

    fn record(channel: Channel, frame: usize, rz: f64, anomalous: bool) -> ChannelRecord {
        ChannelRecord {
            channel,
            frame,
            time: frame as f64 * 0.5,
            value: 0.0,
            reading: ChannelReading::Blink(BlinkReading {
                intensity: 0.0,
                asymmetry: 0.0,
                is_blinking: false,
            }),
            anomaly_score: 0.0,
            rz_score: rz,
            threshold: Some(1.0),
            is_anomalous: anomalous,
            is_continuous: false,
            episode_id: None,
            continuous_range: None,
        }
    }

    fn states(channel: Channel, flagged: &[(usize, f64)], episodes: Vec<Episode>) -> ChannelStates {
        let records = (0..40)
            .map(|frame| {
                let rz = flagged
                    .iter()
                    .find(|(f, _)| *f == frame)
                    .map(|(_, rz)| *rz);
                Some(record(channel, frame, rz.unwrap_or(0.1), rz.is_some()))
            })
            .collect();
        ChannelStates {
            channel,
            records,
            episodes,
            validity: vec![true; 40],
            calibration: CalibrationSummary {
                median: 0.0,
                mad: 1.0,
                skewness: 0.0,
                kurtosis: 0.0,
                n_sigma: 2.5,
                threshold: Some(1.0),
                scored_frames: 40,
            },
        }
    }

    fn evaluation() -> SessionEvaluation {
        let blink = states(
            Channel::Blink,
            &[(4, 5.0), (5, -7.5), (6, 6.0)],
            vec![Episode::new(0, &[(4, 2.0), (5, 2.5), (6, 3.0)])],
        );
        let jaw = states(
            Channel::Jaw,
            &[(30, 4.0)],
            vec![Episode::new(0, &[(30, 15.0)])],
        );
        SessionEvaluation {
            session_id: "s".to_string(),
            times: (0..40).map(|i| i as f64 * 0.5).collect(),
            channels: vec![blink, jaw],
            failures: Vec::new(),
        }
    }

    #[test]
    fn test_summarize_window() {
        let summary = WindowSummarizer::new().summarize(&evaluation(), 0.0, 10.0);
        assert_eq!(summary.events.len(), 1);
        let event = &summary.events[0];
        assert_eq!(event.channel, Channel::Blink);
        assert_eq!(event.family, ChannelFamily::Visual);
        assert_eq!(event.intensity_score, 7.5);
        assert_eq!(event.frame_count, 3);
        assert!(event.is_sustained);
        assert_eq!(summary.anomaly_counts[&Channel::Blink], 3);
        assert_eq!(summary.anomaly_counts[&Channel::Jaw], 0);
        assert_eq!(summary.total_anomalies(), 3);
    }

    #[test]
    fn test_windows_cover_session() {
        let windows = WindowSummarizer::new().windows(&evaluation(), 10.0).unwrap();
        assert_eq!(windows.len(), 2);
        assert_eq!(windows[1].start, 10.0);
        assert_eq!(windows[1].events.len(), 1);
        assert!(!windows[1].events[0].is_sustained);
        assert_eq!(windows[1].sustained_events().count(), 0);

        assert!(WindowSummarizer::new().windows(&evaluation(), 0.0).is_err());
    }

    #[test]
    fn test_tiny_window_length_is_rejected() {
        let mut evaluation = evaluation();
        evaluation.times = vec![1e6, 1e6 + 0.5];
        let result = WindowSummarizer::new().windows(&evaluation, 1e-12);
        assert!(matches!(result, Err(DetectError::InvalidConfig(_))));

        assert!(WindowSummarizer::new().windows(&evaluation, f64::INFINITY).is_ok());
    }

    #[test]
    fn test_window_starts_do_not_drift() {
        let mut evaluation = evaluation();
        evaluation.times = (0..=10).map(|i| 1e6 + i as f64 * 0.1).collect();
        let windows = WindowSummarizer::new().windows(&evaluation, 0.1).unwrap();
        assert_eq!(windows.len(), 11);
        assert_eq!(windows[0].start, 1e6);
        assert_eq!(windows[7].start, 1e6 + 7.0 * 0.1);
    }

    #[test]
    fn test_encoder_payload() {
        let encoder = SummaryEncoder::with_instance_id("instance-1".to_string());
        let windows = WindowSummarizer::new().windows(&evaluation(), 20.0).unwrap();
        let payload = encoder.encode("s", windows);
        assert_eq!(payload.producer.name, PRODUCER_NAME);
        assert_eq!(payload.producer.instance_id, "instance-1");
        assert_eq!(payload.windows.len(), 1);
        assert!(chrono::DateTime::parse_from_rfc3339(&payload.computed_at_utc).is_ok());

        let json = encoder.encode_to_json("s", payload.windows).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["windows"][0]["anomaly_counts"]["blink"], 3);
        assert_eq!(value["windows"][0]["events"][1]["channel"], "jaw");
    }

    #[test]
    fn test_fresh_encoders_have_distinct_ids() {
        let a = SummaryEncoder::new().encode("s", Vec::new());
        let b = SummaryEncoder::new().encode("s", Vec::new());
        assert_ne!(a.producer.instance_id, b.producer.instance_id);
    }
}
