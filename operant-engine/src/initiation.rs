use std::time::Duration;

use operant_core::{AUX_CHANNEL, DEVICE_CHANNEL, Stage};

use crate::positioner::Positioner;

/// Self-tuning threshold for an infrared swipe sensor on the auxiliary
/// channel.
///
/// The sensor's range differs per rig, so the threshold is learned
/// from the observed spread: once the running min and max are far
/// enough apart the threshold sits at the midpoint, and a beam
/// crossing pulls the reading down through it.
#[derive(Debug, Clone)]
pub struct SwipeSensor {
    min: f64,
    max: f64,
    threshold: Option<f64>,
}

/// Minimum observed spread before the midpoint threshold is trusted.
const SWIPE_SPREAD_FLOOR: f64 = 25.0;

impl SwipeSensor {
    pub fn new() -> Self {
        Self {
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            threshold: None,
        }
    }

    pub fn threshold(&self) -> Option<f64> {
        self.threshold
    }

    /// Folds a batch of auxiliary samples into the running range.
    pub fn update(&mut self, samples: &[f64]) {
        for &v in samples {
            if v < self.min {
                self.min = v;
            }
            if v > self.max {
                self.max = v;
            }
        }
        if !self.min.is_finite() || !self.max.is_finite() {
            return;
        }
        let spread = self.max - self.min;
        if spread >= SWIPE_SPREAD_FLOOR {
            self.threshold = Some(self.min + spread / 2.0);
        } else if spread < 1.0 {
            // Degenerate sensor: pin the min one unit under the max so
            // the spread can never collapse to zero.
            self.min = self.max - 1.0;
        }
    }

    /// True when a reading has dipped through the learned threshold.
    pub fn crossed(&self, value: f64) -> bool {
        self.threshold.is_some_and(|t| value <= t)
    }
}

impl Default for SwipeSensor {
    fn default() -> Self {
        Self::new()
    }
}

/// Steps the device closer to the subject after a long quiet stretch.
#[derive(Debug, Clone, Copy)]
pub struct IdleRule {
    pub timeout: Duration,
    /// Inches to walk the device inward, floored at zero.
    pub step_in: f64,
}

impl IdleRule {
    pub fn ten_minute_default() -> Self {
        Self {
            timeout: Duration::from_secs(600),
            step_in: 0.5,
        }
    }
}

/// Scans newly arrived samples for the start of a trial.
///
/// The primary path is a threshold crossing on the device channel; a
/// rig with a swipe sensor can also initiate from the auxiliary
/// channel. Only the suffix of the buffer that arrived since the last
/// scan is considered, so an old crossing never re-triggers.
#[derive(Debug)]
pub struct InitiationDetector {
    threshold_param: &'static str,
    pub swipe: Option<SwipeSensor>,
    pub idle: Option<IdleRule>,
    last_activity: Option<Duration>,
}

impl InitiationDetector {
    pub fn new(threshold_param: &'static str) -> Self {
        Self {
            threshold_param,
            swipe: None,
            idle: None,
            last_activity: None,
        }
    }

    pub fn with_swipe_sensor(mut self) -> Self {
        self.swipe = Some(SwipeSensor::new());
        self
    }

    pub fn with_idle_rule(mut self, rule: IdleRule) -> Self {
        self.idle = Some(rule);
        self
    }

    pub fn reset(&mut self) {
        if let Some(swipe) = &mut self.swipe {
            *swipe = SwipeSensor::new();
        }
        self.last_activity = None;
    }

    /// Checks the newest `fresh` samples of `signal` for an initiation.
    /// Returns the absolute sample index of the first one found.
    ///
    /// Also owns the idle rule: when the subject has initiated before
    /// but has now been quiet past the timeout, the device is walked
    /// one step inward (never below zero) and the timer restarts.
    pub fn detect(
        &mut self,
        signal: &[Vec<f64>],
        fresh: usize,
        stage: &mut Stage,
        now: Duration,
        positioner: &mut dyn Positioner,
    ) -> Option<usize> {
        self.apply_idle_rule(stage, now, positioner);

        let threshold = stage.value(self.threshold_param)?;
        let device = signal.get(DEVICE_CHANNEL)?;
        if fresh == 0 || fresh > device.len() {
            return None;
        }
        let start = device.len() - fresh;

        if let Some(swipe) = &mut self.swipe {
            if let Some(aux) = signal.get(AUX_CHANNEL) {
                let aux_start = aux.len().saturating_sub(fresh);
                swipe.update(&aux[aux_start..]);
            }
        }

        // The suffix maximum decides; ties go to its first occurrence.
        let mut best = f64::NEG_INFINITY;
        let mut best_index = start;
        for (i, &v) in device[start..].iter().enumerate() {
            if v > best {
                best = v;
                best_index = start + i;
            }
        }
        if best >= threshold {
            self.last_activity = Some(now);
            return Some(best_index);
        }

        if let Some(swipe) = &self.swipe {
            if let Some(aux) = signal.get(AUX_CHANNEL) {
                let aux_start = aux.len().saturating_sub(fresh);
                for (i, &v) in aux[aux_start..].iter().enumerate() {
                    if swipe.crossed(v) {
                        self.last_activity = Some(now);
                        return Some(aux_start + i);
                    }
                }
            }
        }

        None
    }

    fn apply_idle_rule(&mut self, stage: &mut Stage, now: Duration, positioner: &mut dyn Positioner) {
        let Some(rule) = self.idle else {
            return;
        };
        // Armed only once the subject has shown it can initiate.
        let Some(last) = self.last_activity else {
            return;
        };
        if now.saturating_sub(last) < rule.timeout || !stage.position.is_variable() {
            return;
        }
        self.last_activity = Some(now);
        if stage.position.current > 0.0 {
            stage.position.current = (stage.position.current - rule.step_in).max(0.0);
            positioner.set_position(stage.position.current);
        }
    }
}
