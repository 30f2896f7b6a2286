use operant_core::DEVICE_CHANNEL;
use serde::{Deserialize, Serialize};

use operant_core::Trial;

/// Linear calibration of the primary analog channel, taken from the
/// rig's controller at connect time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeviceCalibration {
    /// Units per ADC tick.
    pub slope: f64,
    /// ADC reading at rest.
    pub baseline: f64,
}

impl DeviceCalibration {
    pub fn new(slope: f64, baseline: f64) -> Self {
        Self { slope, baseline }
    }
}

/// Converts raw controller batches into calibrated streams.
///
/// The primary channel gets the full calibration; every other stream
/// (timestamps, auxiliary sensors) is passed through as a plain cast.
/// Supination tasks flip the sign so positive always means "toward the
/// target", and re-zero against the handle's resting angle after every
/// trial since the handle rarely returns to exactly where it started.
#[derive(Debug, Clone)]
pub struct SignalTransform {
    sign: f64,
    rezero: bool,
    offset: f64,
}

impl SignalTransform {
    pub fn direct() -> Self {
        Self {
            sign: 1.0,
            rezero: false,
            offset: 0.0,
        }
    }

    pub fn inverted_rezeroed() -> Self {
        Self {
            sign: -1.0,
            rezero: true,
            offset: 0.0,
        }
    }

    /// Accumulated re-zero offset, in calibrated units.
    pub fn offset(&self) -> f64 {
        self.offset
    }

    /// Calibrates one raw batch. The output always has the same shape
    /// as the input.
    pub fn apply(&self, raw: &[Vec<i32>], calibration: DeviceCalibration) -> Vec<Vec<f64>> {
        raw.iter()
            .enumerate()
            .map(|(channel, stream)| {
                if channel == DEVICE_CHANNEL {
                    stream
                        .iter()
                        .map(|&tick| {
                            self.sign * calibration.slope * (f64::from(tick) - calibration.baseline)
                                - self.offset
                        })
                        .collect()
                } else {
                    stream.iter().map(|&tick| f64::from(tick)).collect()
                }
            })
            .collect()
    }

    /// Folds the handle's final resting value into the running offset
    /// so the next trial starts from zero again. No-op for transforms
    /// without re-zeroing.
    pub fn note_trial_end(&mut self, trial: &Trial) {
        if !self.rezero {
            return;
        }
        if let Some(&last) = trial.device_signal().last() {
            self.offset += last;
        }
    }

    pub fn reset(&mut self) {
        self.offset = 0.0;
    }
}
