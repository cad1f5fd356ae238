//! Vocal and verbal channel transforms
//!
//! Audio measurements are converted to perceptual units (decibels, semitones)
//! and then expressed as robust deviations from the subject's own speech.
//! Verbal values arrive already normalized.

use crate::calibrator::median;
use crate::types::{AudioMeasurement, Channel, DeviationLevel};

/// Floor applied to RMS energy before taking the logarithm
pub const RMS_FLOOR: f64 = 1e-10;

/// Frame loudness in dBFS
pub fn loudness_db(rms: f64) -> f64 {
    20.0 * rms.max(RMS_FLOOR).log10()
}

/// Pitch relative to the subject's median, in semitones
///
/// Unvoiced frames (pitch at or below zero) have no relative pitch.
pub fn pitch_semitones(pitch_hz: f64, median_pitch_hz: f64) -> Option<f64> {
    if pitch_hz <= 0.0 || median_pitch_hz <= 0.0 {
        return None;
    }
    Some(12.0 * (pitch_hz / median_pitch_hz).log2())
}

/// Pitch spread expressed in semitones above the mean pitch
pub fn expressiveness_semitones(pitch_hz: f64, pitch_std_hz: f64) -> Option<f64> {
    if pitch_hz <= 0.0 || pitch_std_hz < 0.0 {
        return None;
    }
    Some(12.0 * ((pitch_hz + pitch_std_hz) / pitch_hz).log2())
}

/// Median of the voiced pitch values among `audio`
pub fn median_pitch<'a>(audio: impl IntoIterator<Item = &'a AudioMeasurement>) -> Option<f64> {
    let voiced: Vec<f64> = audio
        .into_iter()
        .filter_map(|a| a.pitch_hz)
        .filter(|p| *p > 0.0)
        .collect();
    median(&voiced)
}

/// Natural-unit value of an audio channel for one frame
pub fn audio_unit(
    channel: Channel,
    audio: &AudioMeasurement,
    median_pitch_hz: Option<f64>,
) -> Option<f64> {
    match channel {
        Channel::Loudness => audio.rms.map(loudness_db),
        Channel::PitchRelative => pitch_semitones(audio.pitch_hz?, median_pitch_hz?),
        Channel::PitchExpressiveness => {
            expressiveness_semitones(audio.pitch_hz?, audio.pitch_std_hz?)
        }
        _ => None,
    }
}

/// Name of the raw measurement an audio or verbal channel is built from
pub fn source_column(channel: Channel) -> &'static str {
    match channel {
        Channel::Loudness => "rms",
        Channel::PitchRelative => "pitch_hz",
        Channel::PitchExpressiveness => "pitch_std_hz",
        Channel::SpeakingRate => "speaking_rate_rz",
        Channel::FillerUsage => "filler_increase",
        Channel::PauseUsage => "pause_increase",
        Channel::Blink | Channel::Gaze | Channel::Jaw | Channel::Smile => "face",
    }
}

pub fn loudness_level(rz: f64) -> DeviationLevel {
    if rz <= -4.0 {
        DeviationLevel::VeryQuiet
    } else if rz <= -2.5 {
        DeviationLevel::Quiet
    } else if rz <= 1.0 {
        DeviationLevel::Normal
    } else if rz <= 4.0 {
        DeviationLevel::Loud
    } else {
        DeviationLevel::VeryLoud
    }
}

pub fn pitch_level(rz: f64) -> DeviationLevel {
    if rz <= -3.5 {
        DeviationLevel::MuchLower
    } else if rz <= -1.5 {
        DeviationLevel::Lower
    } else if rz <= 1.5 {
        DeviationLevel::Normal
    } else if rz <= 3.5 {
        DeviationLevel::Higher
    } else {
        DeviationLevel::MuchHigher
    }
}

pub fn expressiveness_level(rz: f64) -> DeviationLevel {
    if rz <= -2.5 {
        DeviationLevel::Flat
    } else if rz <= -0.8 {
        DeviationLevel::SlightlyExpressive
    } else if rz <= 2.5 {
        DeviationLevel::Expressive
    } else {
        DeviationLevel::HighlyExpressive
    }
}

pub fn speaking_rate_level(rz: f64) -> DeviationLevel {
    if rz <= -3.0 {
        DeviationLevel::MuchSlower
    } else if rz <= -1.5 {
        DeviationLevel::Slower
    } else if rz <= 1.5 {
        DeviationLevel::Normal
    } else if rz <= 3.0 {
        DeviationLevel::Faster
    } else {
        DeviationLevel::MuchFaster
    }
}

/// Level for filler-word and pause usage increases
pub fn usage_level(increase: f64) -> DeviationLevel {
    if increase < 0.0 {
        DeviationLevel::Decreased
    } else if increase <= 1.5 {
        DeviationLevel::Typical
    } else if increase <= 3.0 {
        DeviationLevel::Elevated
    } else {
        DeviationLevel::Marked
    }
}

/// Categorical level of a deviation on the given channel
pub fn level_for(channel: Channel, rz: f64) -> DeviationLevel {
    match channel {
        Channel::Loudness => loudness_level(rz),
        Channel::PitchRelative => pitch_level(rz),
        Channel::PitchExpressiveness => expressiveness_level(rz),
        Channel::SpeakingRate => speaking_rate_level(rz),
        Channel::FillerUsage | Channel::PauseUsage => usage_level(rz),
        Channel::Blink | Channel::Gaze | Channel::Jaw | Channel::Smile => DeviationLevel::Normal,
    }
}
