//! Record assembly
//!
//! Joins a channel's parallel columns (transformed values, readings, anomaly
//! scores, calibration and episodes) into one record per session frame.

use crate::calibrator::Calibration;
use crate::episodes::EpisodeIndex;
use crate::transform::TransformedSeries;
use crate::types::{Channel, ChannelRecord, Episode};

/// Columnar join for one channel
pub struct RecordAssembler<'a> {
    channel: Channel,
    times: &'a [f64],
}

impl<'a> RecordAssembler<'a> {
    /// `times` holds the timestamp of every session frame
    pub fn new(channel: Channel, times: &'a [f64]) -> Self {
        Self { channel, times }
    }

    /// Build one entry per session frame
    ///
    /// `scores` and the calibration arrays are parallel to `series`; frames
    /// absent from the series (gated out) yield `None`.
    pub fn assemble(
        &self,
        series: &TransformedSeries,
        scores: &[f64],
        calibration: &Calibration,
        episodes: &[Episode],
    ) -> Vec<Option<ChannelRecord>> {
        let index = EpisodeIndex::new(episodes);
        let mut records = vec![None; self.times.len()];

        for (i, &frame) in series.frames.iter().enumerate() {
            let is_anomalous = calibration.flags[i];
            let episode = index
                .position(frame)
                .filter(|_| is_anomalous)
                .map(|position| &episodes[position]);
            let sustained = episode.filter(|e| e.is_sustained());

            records[frame] = Some(ChannelRecord {
                channel: self.channel,
                frame,
                time: self.times[frame],
                value: series.values[i],
                reading: series.readings[i],
                anomaly_score: scores[i],
                rz_score: calibration.deviations[i],
                threshold: calibration.threshold,
                is_anomalous,
                is_continuous: sustained.is_some(),
                episode_id: episode.map(|e| e.id),
                continuous_range: sustained.map(|e| e.timestamps.clone()),
            });
        }
        records
    }

    /// Spread the transformed values over every session frame
    pub fn scatter_values(&self, series: &TransformedSeries) -> Vec<Option<f64>> {
        let mut values = vec![None; self.times.len()];
        for (frame, value) in series.frames.iter().zip(&series.values) {
            values[*frame] = Some(*value);
        }
        values
    }
}
