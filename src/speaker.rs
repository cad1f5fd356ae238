//! Speaker gating
//!
//! Audio and verbal channels describe the subject's speech, so only frames in
//! which the target speaker is active are scored. Frames without a speaker
//! label are treated as not belonging to the target.

use crate::types::{Session, Utterance};
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Per-frame active speaker labels
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpeakerTimeline {
    labels: Vec<Option<String>>,
}

impl SpeakerTimeline {
    pub fn from_labels(labels: Vec<Option<String>>) -> Self {
        Self { labels }
    }

    /// Attribute each frame to the utterance containing it
    ///
    /// Utterance bounds are in milliseconds, start inclusive and end exclusive.
    pub fn from_utterances(utterances: &[Utterance], times: &[f64]) -> Self {
        let labels = times
            .iter()
            .map(|t| {
                let ms = (t * 1000.0).round();
                utterances
                    .iter()
                    .find(|u| (u.start_ms as f64) <= ms && ms < u.end_ms as f64)
                    .map(|u| u.speaker.clone())
            })
            .collect();
        Self { labels }
    }

    /// Timeline of a session
    ///
    /// Frame labels win when any frame carries one; otherwise the utterance
    /// table is used.
    pub fn from_session(session: &Session) -> Self {
        let labelled = session.frames.iter().any(|f| f.speaker.is_some());
        if !labelled && !session.utterances.is_empty() {
            return Self::from_utterances(&session.utterances, &session.times());
        }
        Self::from_labels(session.frames.iter().map(|f| f.speaker.clone()).collect())
    }

    pub fn label(&self, frame: usize) -> Option<&str> {
        self.labels.get(frame).and_then(|l| l.as_deref())
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Validity filter for a single target speaker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeakerGate {
    target: String,
}

impl SpeakerGate {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn is_valid(&self, timeline: &SpeakerTimeline, frame: usize) -> bool {
        timeline.label(frame) == Some(self.target.as_str())
    }

    /// One validity flag per frame of the timeline
    pub fn mask(&self, timeline: &SpeakerTimeline) -> Vec<bool> {
        (0..timeline.len())
            .map(|frame| self.is_valid(timeline, frame))
            .collect()
    }
}

/// Contiguous runs of valid frames
pub fn valid_runs(mask: &[bool]) -> Vec<Range<usize>> {
    let mut runs = Vec::new();
    let mut start = None;
    for (i, valid) in mask.iter().enumerate() {
        match (*valid, start) {
            (true, None) => start = Some(i),
            (false, Some(s)) => {
                runs.push(s..i);
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        runs.push(s..mask.len());
    }
    runs
}

/// A contiguous stretch of one speaker, `[start, end)` in seconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeakerInterval {
    pub speaker: String,
    pub start: f64,
    pub end: f64,
}

/// Speaker intervals over the timeline
///
/// Unlabelled frames are skipped, so a speaker interrupted only by silence
/// stays in one interval. An interval closes one cadence after its last
/// labelled frame.
pub fn speaker_intervals(
    timeline: &SpeakerTimeline,
    times: &[f64],
    cadence: f64,
) -> Vec<SpeakerInterval> {
    let mut intervals = Vec::new();
    let mut current: Option<(&str, f64, f64)> = None;

    for (frame, t) in times.iter().enumerate() {
        let Some(label) = timeline.label(frame) else {
            continue;
        };
        current = match current {
            Some((speaker, start, _)) if speaker == label => Some((speaker, start, *t)),
            Some((speaker, start, last)) => {
                intervals.push(SpeakerInterval {
                    speaker: speaker.to_string(),
                    start,
                    end: last + cadence,
                });
                Some((label, *t, *t))
            }
            None => Some((label, *t, *t)),
        };
    }
    if let Some((speaker, start, last)) = current {
        intervals.push(SpeakerInterval {
            speaker: speaker.to_string(),
            start,
            end: last + cadence,
        });
    }
    intervals
}

/// Intervals belonging to `speaker`
pub fn intervals_for<'a>(
    intervals: &'a [SpeakerInterval],
    speaker: &'a str,
) -> impl Iterator<Item = &'a SpeakerInterval> {
    intervals.iter().filter(move |i| i.speaker == speaker)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn labels(items: &[Option<&str>]) -> SpeakerTimeline {
        SpeakerTimeline::from_labels(items.iter().map(|l| l.map(str::to_string)).collect())
    }

    /// 60 s at 0.5 s cadence; target "B" talks in [10, 20) and [35, 40)
    fn interview() -> (SpeakerTimeline, Vec<f64>) {
        let times: Vec<f64> = (0..120).map(|i| i as f64 * 0.5).collect();
        let labels = times
            .iter()
            .map(|t| {
                if (10.0..20.0).contains(t) || (35.0..40.0).contains(t) {
                    Some("B".to_string())
                } else if (25.0..30.0).contains(t) {
                    None
                } else {
                    Some("A".to_string())
                }
            })
            .collect();
        (SpeakerTimeline::from_labels(labels), times)
    }

    #[test]
    fn test_mask_marks_target_frames_only() {
        let (timeline, times) = interview();
        let mask = SpeakerGate::new("B").mask(&timeline);
        assert_eq!(mask.len(), times.len());
        for (t, valid) in times.iter().zip(&mask) {
            let expected = (10.0..20.0).contains(t) || (35.0..40.0).contains(t);
            assert_eq!(*valid, expected, "frame at {t}");
        }
    }

    #[test]
    fn test_missing_label_is_not_target() {
        let timeline = labels(&[Some("B"), None, Some("A")]);
        assert_eq!(SpeakerGate::new("B").mask(&timeline), vec![true, false, false]);
    }

    #[test]
    fn test_valid_runs() {
        let (timeline, _) = interview();
        let runs = valid_runs(&SpeakerGate::new("B").mask(&timeline));
        assert_eq!(runs, vec![20..40, 70..80]);
        assert!(valid_runs(&[]).is_empty());
        assert_eq!(valid_runs(&[true, true]), vec![0..2]);
    }

    #[test]
    fn test_intervals_close_one_cadence_after_last_frame() {
        let (timeline, times) = interview();
        let intervals = speaker_intervals(&timeline, &times, 0.5);
        let target: Vec<(f64, f64)> = intervals_for(&intervals, "B")
            .map(|i| (i.start, i.end))
            .collect();
        assert_eq!(target, vec![(10.0, 20.0), (35.0, 40.0)]);
    }

    #[test]
    fn test_intervals_ignore_silence() {
        let timeline = labels(&[Some("A"), None, Some("A"), Some("B")]);
        let intervals = speaker_intervals(&timeline, &[0.0, 0.5, 1.0, 1.5], 0.5);
        assert_eq!(
            intervals,
            vec![
                SpeakerInterval {
                    speaker: "A".to_string(),
                    start: 0.0,
                    end: 1.5
                },
                SpeakerInterval {
                    speaker: "B".to_string(),
                    start: 1.5,
                    end: 2.0
                },
            ]
        );
    }

    #[test]
    fn test_from_utterances() {
        let utterances = vec![
            Utterance {
                start_ms: 0,
                end_ms: 1000,
                speaker: "A".to_string(),
                text: None,
            },
            Utterance {
                start_ms: 1500,
                end_ms: 2500,
                speaker: "B".to_string(),
                text: Some("hello".to_string()),
            },
        ];
        let times = [0.0, 0.5, 1.0, 1.5, 2.0, 2.5];
        let timeline = SpeakerTimeline::from_utterances(&utterances, &times);
        assert_eq!(timeline.label(0), Some("A"));
        assert_eq!(timeline.label(2), None);
        assert_eq!(timeline.label(3), Some("B"));
        assert_eq!(timeline.label(5), None);
        assert_eq!(
            SpeakerGate::new("B").mask(&timeline),
            vec![false, false, false, true, true, false]
        );
    }
}
