//! Facial channel transforms
//!
//! Each channel has an aggregate function producing the scalar that is scored
//! and a reading function producing the decomposed view stored on the record.

use crate::config::VisualWeights;
use crate::types::{
    BlinkReading, Channel, FaceMeasurement, GazeDirection, GazeReading, JawReading, SmileReading,
};

/// Closure above which a frame counts as a blink
const BLINK_THRESHOLD: f64 = 0.5;

/// Jaw opening above which the mouth counts as open
const JAW_OPEN_THRESHOLD: f64 = 0.3;

/// Smile intensity above which the face counts as smiling
const SMILE_THRESHOLD: f64 = 0.3;

/// Horizontal deviation giving full left/right intensity
const GAZE_H_FULL_SCALE: f64 = 0.2;

/// Vertical look score giving full up/down intensity
const GAZE_V_FULL_SCALE: f64 = 0.6;

/// Blendshape inputs of one facial channel, extracted from a frame
pub trait FaceInput: Sized + Copy {
    const CHANNEL: Channel;

    /// Extract the inputs, or the name of the first missing blendshape
    fn from_face(face: &FaceMeasurement) -> Result<Self, &'static str>;

    /// Named fields, used for range checks
    fn fields(&self) -> Vec<(&'static str, f64)>;

    /// Apply `f` to every field
    fn map_fields(self, f: impl Fn(f64) -> f64) -> Self;
}

fn require(value: Option<f64>, name: &'static str) -> Result<f64, &'static str> {
    value.ok_or(name)
}

// ============================================================================
// Blink
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlinkInput {
    pub blink_left: f64,
    pub blink_right: f64,
    pub squint_left: f64,
    pub squint_right: f64,
}

impl FaceInput for BlinkInput {
    const CHANNEL: Channel = Channel::Blink;

    fn from_face(face: &FaceMeasurement) -> Result<Self, &'static str> {
        Ok(Self {
            blink_left: require(face.eye_blink_left, "eyeBlinkLeft")?,
            blink_right: require(face.eye_blink_right, "eyeBlinkRight")?,
            squint_left: require(face.eye_squint_left, "eyeSquintLeft")?,
            squint_right: require(face.eye_squint_right, "eyeSquintRight")?,
        })
    }

    fn fields(&self) -> Vec<(&'static str, f64)> {
        vec![
            ("eyeBlinkLeft", self.blink_left),
            ("eyeBlinkRight", self.blink_right),
            ("eyeSquintLeft", self.squint_left),
            ("eyeSquintRight", self.squint_right),
        ]
    }

    fn map_fields(self, f: impl Fn(f64) -> f64) -> Self {
        Self {
            blink_left: f(self.blink_left),
            blink_right: f(self.blink_right),
            squint_left: f(self.squint_left),
            squint_right: f(self.squint_right),
        }
    }
}

fn eye_closure(input: &BlinkInput, weights: &VisualWeights) -> (f64, f64) {
    let left =
        input.blink_left * weights.blink_weight + input.squint_left * weights.eye_squint_weight;
    let right =
        input.blink_right * weights.blink_weight + input.squint_right * weights.eye_squint_weight;
    (left, right)
}

/// Mean weighted eyelid closure
pub fn blink_intensity(input: &BlinkInput, weights: &VisualWeights) -> f64 {
    let (left, right) = eye_closure(input, weights);
    (left + right) / 2.0
}

pub fn blink_reading(input: &BlinkInput, weights: &VisualWeights) -> BlinkReading {
    let (left, right) = eye_closure(input, weights);
    let intensity = (left + right) / 2.0;
    BlinkReading {
        intensity,
        asymmetry: (left - right).abs(),
        is_blinking: intensity > BLINK_THRESHOLD,
    }
}

// ============================================================================
// Gaze
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GazeInput {
    pub h_ratio: f64,
    pub look_up_left: f64,
    pub look_up_right: f64,
    pub look_down_left: f64,
    pub look_down_right: f64,
}

impl FaceInput for GazeInput {
    const CHANNEL: Channel = Channel::Gaze;

    fn from_face(face: &FaceMeasurement) -> Result<Self, &'static str> {
        Ok(Self {
            h_ratio: require(face.h_ratio, "hRatio")?,
            look_up_left: require(face.eye_look_up_left, "eyeLookUpLeft")?,
            look_up_right: require(face.eye_look_up_right, "eyeLookUpRight")?,
            look_down_left: require(face.eye_look_down_left, "eyeLookDownLeft")?,
            look_down_right: require(face.eye_look_down_right, "eyeLookDownRight")?,
        })
    }

    fn fields(&self) -> Vec<(&'static str, f64)> {
        vec![
            ("hRatio", self.h_ratio),
            ("eyeLookUpLeft", self.look_up_left),
            ("eyeLookUpRight", self.look_up_right),
            ("eyeLookDownLeft", self.look_down_left),
            ("eyeLookDownRight", self.look_down_right),
        ]
    }

    fn map_fields(self, f: impl Fn(f64) -> f64) -> Self {
        Self {
            h_ratio: f(self.h_ratio),
            look_up_left: f(self.look_up_left),
            look_up_right: f(self.look_up_right),
            look_down_left: f(self.look_down_left),
            look_down_right: f(self.look_down_right),
        }
    }
}

/// Per-direction gaze components
struct GazeComponents {
    h_dev: f64,
    up: f64,
    down: f64,
    left_i: f64,
    right_i: f64,
    up_i: f64,
    down_i: f64,
}

impl GazeComponents {
    fn new(input: &GazeInput, weights: &VisualWeights) -> Self {
        let h_dev = input.h_ratio - weights.gaze_h_center;
        let up = (input.look_up_left + input.look_up_right) / 2.0;
        let down = (input.look_down_left + input.look_down_right) / 2.0;
        Self {
            h_dev,
            up,
            down,
            left_i: (-h_dev / GAZE_H_FULL_SCALE).clamp(0.0, 1.0),
            right_i: (h_dev / GAZE_H_FULL_SCALE).clamp(0.0, 1.0),
            up_i: (up / GAZE_V_FULL_SCALE).min(1.0),
            down_i: (down / GAZE_V_FULL_SCALE).min(1.0),
        }
    }

    fn magnitude(&self) -> f64 {
        self.left_i + self.right_i + self.up_i + self.down_i
    }

    fn direction(&self, weights: &VisualWeights) -> GazeDirection {
        if self.up > weights.gaze_v_threshold {
            GazeDirection::Up
        } else if self.down > weights.gaze_v_threshold {
            GazeDirection::Down
        } else if self.h_dev < -weights.gaze_h_dead_zone {
            GazeDirection::Left
        } else if self.h_dev > weights.gaze_h_dead_zone {
            GazeDirection::Right
        } else {
            GazeDirection::Center
        }
    }
}

/// Summed directional gaze intensity
pub fn gaze_magnitude(input: &GazeInput, weights: &VisualWeights) -> f64 {
    GazeComponents::new(input, weights).magnitude()
}

pub fn gaze_reading(input: &GazeInput, weights: &VisualWeights) -> GazeReading {
    let components = GazeComponents::new(input, weights);
    GazeReading {
        magnitude: components.magnitude(),
        horizontal_deviation: components.h_dev,
        vertical_deviation: components.up - components.down,
        primary_direction: components.direction(weights),
    }
}

// ============================================================================
// Jaw
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JawInput {
    pub open: f64,
    pub left: f64,
    pub right: f64,
    pub forward: f64,
}

impl FaceInput for JawInput {
    const CHANNEL: Channel = Channel::Jaw;

    fn from_face(face: &FaceMeasurement) -> Result<Self, &'static str> {
        Ok(Self {
            open: require(face.jaw_open, "jawOpen")?,
            left: require(face.jaw_left, "jawLeft")?,
            right: require(face.jaw_right, "jawRight")?,
            forward: require(face.jaw_forward, "jawForward")?,
        })
    }

    fn fields(&self) -> Vec<(&'static str, f64)> {
        vec![
            ("jawOpen", self.open),
            ("jawLeft", self.left),
            ("jawRight", self.right),
            ("jawForward", self.forward),
        ]
    }

    fn map_fields(self, f: impl Fn(f64) -> f64) -> Self {
        Self {
            open: f(self.open),
            left: f(self.left),
            right: f(self.right),
            forward: f(self.forward),
        }
    }
}

/// Combined opening, lateral and forward jaw movement
pub fn jaw_magnitude(input: &JawInput) -> f64 {
    input.open + (input.right - input.left).abs() + input.forward
}

pub fn jaw_reading(input: &JawInput) -> JawReading {
    JawReading {
        open: input.open,
        lateral: input.right - input.left,
        forward: input.forward,
        magnitude: jaw_magnitude(input),
        is_open: input.open > JAW_OPEN_THRESHOLD,
    }
}

// ============================================================================
// Smile
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SmileInput {
    pub smile_left: f64,
    pub smile_right: f64,
    pub cheek_left: f64,
    pub cheek_right: f64,
    pub stretch_left: f64,
    pub stretch_right: f64,
}

impl FaceInput for SmileInput {
    const CHANNEL: Channel = Channel::Smile;

    fn from_face(face: &FaceMeasurement) -> Result<Self, &'static str> {
        Ok(Self {
            smile_left: require(face.mouth_smile_left, "mouthSmileLeft")?,
            smile_right: require(face.mouth_smile_right, "mouthSmileRight")?,
            cheek_left: require(face.cheek_squint_left, "cheekSquintLeft")?,
            cheek_right: require(face.cheek_squint_right, "cheekSquintRight")?,
            stretch_left: require(face.mouth_stretch_left, "mouthStretchLeft")?,
            stretch_right: require(face.mouth_stretch_right, "mouthStretchRight")?,
        })
    }

    fn fields(&self) -> Vec<(&'static str, f64)> {
        vec![
            ("mouthSmileLeft", self.smile_left),
            ("mouthSmileRight", self.smile_right),
            ("cheekSquintLeft", self.cheek_left),
            ("cheekSquintRight", self.cheek_right),
            ("mouthStretchLeft", self.stretch_left),
            ("mouthStretchRight", self.stretch_right),
        ]
    }

    fn map_fields(self, f: impl Fn(f64) -> f64) -> Self {
        Self {
            smile_left: f(self.smile_left),
            smile_right: f(self.smile_right),
            cheek_left: f(self.cheek_left),
            cheek_right: f(self.cheek_right),
            stretch_left: f(self.stretch_left),
            stretch_right: f(self.stretch_right),
        }
    }
}

fn smile_sides(input: &SmileInput, weights: &VisualWeights) -> (f64, f64) {
    let left =
        input.smile_left * weights.smile_weight + input.cheek_left * weights.cheek_squint_weight;
    let right =
        input.smile_right * weights.smile_weight + input.cheek_right * weights.cheek_squint_weight;
    (left, right)
}

/// Mean weighted smile across both sides of the mouth
pub fn smile_intensity(input: &SmileInput, weights: &VisualWeights) -> f64 {
    let (left, right) = smile_sides(input, weights);
    (left + right) / 2.0
}

pub fn smile_reading(input: &SmileInput, weights: &VisualWeights) -> SmileReading {
    let (left, right) = smile_sides(input, weights);
    let intensity = (left + right) / 2.0;
    SmileReading {
        intensity,
        asymmetry: (left - right).abs(),
        left_intensity: left,
        right_intensity: right,
        mouth_stretch: (input.stretch_left + input.stretch_right) / 2.0,
        is_smiling: intensity > SMILE_THRESHOLD,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_blink_weights() {
        let input = BlinkInput {
            blink_left: 1.0,
            blink_right: 0.0,
            squint_left: 0.5,
            squint_right: 0.0,
        };
        let weights = VisualWeights::default();
        // left = 0.8 + 0.1, right = 0
        assert!(close(blink_intensity(&input, &weights), 0.45));
        let reading = blink_reading(&input, &weights);
        assert!(close(reading.asymmetry, 0.9));
        assert!(!reading.is_blinking);
    }

    #[test]
    fn test_blink_closed_eyes() {
        let input = BlinkInput {
            blink_left: 0.9,
            blink_right: 0.9,
            squint_left: 0.4,
            squint_right: 0.4,
        };
        let reading = blink_reading(&input, &VisualWeights::default());
        assert!(reading.is_blinking);
        assert!(close(reading.intensity, 0.8));
        assert_eq!(reading.asymmetry, 0.0);
    }

    #[test]
    fn test_gaze_centered() {
        let input = GazeInput {
            h_ratio: 0.52,
            look_up_left: 0.05,
            look_up_right: 0.05,
            look_down_left: 0.0,
            look_down_right: 0.0,
        };
        let reading = gaze_reading(&input, &VisualWeights::default());
        assert_eq!(reading.primary_direction, GazeDirection::Center);
        // right = 0.02 / 0.2, up = 0.05 / 0.6
        assert!(close(reading.magnitude, 0.1 + 0.05 / 0.6));
        assert!(close(reading.vertical_deviation, 0.05));
    }

    #[test]
    fn test_gaze_direction_priority() {
        let weights = VisualWeights::default();
        let mut input = GazeInput {
            h_ratio: 0.2,
            look_up_left: 0.3,
            look_up_right: 0.3,
            look_down_left: 0.0,
            look_down_right: 0.0,
        };
        // vertical wins over horizontal
        assert_eq!(gaze_reading(&input, &weights).primary_direction, GazeDirection::Up);

        input.look_up_left = 0.0;
        input.look_up_right = 0.0;
        assert_eq!(gaze_reading(&input, &weights).primary_direction, GazeDirection::Left);

        input.h_ratio = 0.7;
        assert_eq!(gaze_reading(&input, &weights).primary_direction, GazeDirection::Right);

        input.look_down_left = 0.2;
        input.look_down_right = 0.2;
        assert_eq!(gaze_reading(&input, &weights).primary_direction, GazeDirection::Down);
    }

    #[test]
    fn test_gaze_intensities_saturate() {
        let input = GazeInput {
            h_ratio: 0.0,
            look_up_left: 0.9,
            look_up_right: 0.9,
            look_down_left: 0.0,
            look_down_right: 0.0,
        };
        // left saturates at 1, up saturates at 1
        assert!(close(gaze_magnitude(&input, &VisualWeights::default()), 2.0));
    }

    #[test]
    fn test_jaw() {
        let input = JawInput {
            open: 0.4,
            left: 0.1,
            right: 0.0,
            forward: 0.05,
        };
        let reading = jaw_reading(&input);
        assert!(close(reading.lateral, -0.1));
        assert!(close(reading.magnitude, 0.55));
        assert!(reading.is_open);
        assert!(close(jaw_magnitude(&input), reading.magnitude));
    }

    #[test]
    fn test_smile() {
        let input = SmileInput {
            smile_left: 0.6,
            smile_right: 0.4,
            cheek_left: 0.2,
            cheek_right: 0.2,
            stretch_left: 0.1,
            stretch_right: 0.3,
        };
        let weights = VisualWeights::default();
        let reading = smile_reading(&input, &weights);
        assert!(close(reading.left_intensity, 0.48));
        assert!(close(reading.right_intensity, 0.34));
        assert!(close(reading.intensity, 0.41));
        assert!(close(reading.asymmetry, 0.14));
        assert!(close(reading.mouth_stretch, 0.2));
        assert!(reading.is_smiling);
        assert!(close(smile_intensity(&input, &weights), reading.intensity));
    }

    #[test]
    fn test_missing_blendshape_is_named() {
        let face = FaceMeasurement {
            jaw_open: Some(0.2),
            jaw_left: Some(0.0),
            jaw_forward: Some(0.0),
            ..Default::default()
        };
        assert_eq!(JawInput::from_face(&face), Err("jawRight"));
    }

    #[test]
    fn test_map_fields_clamps_every_field() {
        let input = JawInput {
            open: 1.4,
            left: -0.2,
            right: 0.5,
            forward: 0.0,
        };
        let clamped = input.map_fields(|v| v.clamp(0.0, 1.0));
        assert_eq!(
            clamped.fields(),
            vec![
                ("jawOpen", 1.0),
                ("jawLeft", 0.0),
                ("jawRight", 0.5),
                ("jawForward", 0.0)
            ]
        );
    }
}
