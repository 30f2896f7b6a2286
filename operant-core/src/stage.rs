use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ops::Range;

use crate::parameter::StageParameter;

/// When the stage sends a stimulation trigger alongside its other
/// outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputTrigger {
    Off,
    /// Stimulate on every successful trial.
    On,
    /// Stimulate at the beginning of every trial.
    EveryTrialStart,
}

/// Configuration for one task variant within a session.
///
/// Constructed once per session; parameter values mutate between
/// trials, never during one, and never concurrently. The hit-window
/// bounds are fixed for the duration of any single trial.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stage {
    pub name: String,
    pub parameters: HashMap<String, StageParameter>,
    /// Autopositioner distance, in inches.
    pub position: StageParameter,
    pub samples_before_window: usize,
    pub samples_during_window: usize,
    pub sample_period_ms: f64,
    pub output_trigger: OutputTrigger,
}

impl Stage {
    pub fn param(&self, name: &str) -> Option<&StageParameter> {
        self.parameters.get(name)
    }

    pub fn param_mut(&mut self, name: &str) -> Option<&mut StageParameter> {
        self.parameters.get_mut(name)
    }

    /// Current value of a named parameter; `None` when the stage does
    /// not define it (callers skip the dependent computation).
    pub fn value(&self, name: &str) -> Option<f64> {
        self.parameters.get(name).map(|p| p.current)
    }

    /// Sample range of the hit window within a trial buffer.
    pub fn hit_window(&self) -> Range<usize> {
        self.samples_before_window..self.samples_before_window + self.samples_during_window
    }

    pub fn in_hit_window(&self, index: usize) -> bool {
        self.hit_window().contains(&index)
    }

    /// Samples covered by `seconds` at this stage's sample period.
    pub fn seconds_to_samples(&self, seconds: f64) -> usize {
        if self.sample_period_ms <= 0.0 {
            return 0;
        }
        (seconds * 1000.0 / self.sample_period_ms).round() as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameter::StageParameter;

    fn stage() -> Stage {
        let mut parameters = HashMap::new();
        parameters.insert(
            "Hit Threshold".to_string(),
            StageParameter::adaptive(120.0, 50.0, 200.0, "grams"),
        );
        Stage {
            name: "pull".to_string(),
            parameters,
            position: StageParameter::fixed(1.0, "inches"),
            samples_before_window: 100,
            samples_during_window: 200,
            sample_period_ms: 10.0,
            output_trigger: OutputTrigger::Off,
        }
    }

    #[test]
    fn hit_window_covers_during_samples() {
        let s = stage();
        assert_eq!(s.hit_window(), 100..300);
        assert!(!s.in_hit_window(99));
        assert!(s.in_hit_window(100));
        assert!(!s.in_hit_window(300));
    }

    #[test]
    fn missing_parameter_yields_none() {
        let s = stage();
        assert_eq!(s.value("Hit Threshold"), Some(120.0));
        assert_eq!(s.value("Lower bound force threshold"), None);
    }

    #[test]
    fn seconds_to_samples_uses_period() {
        let s = stage();
        assert_eq!(s.seconds_to_samples(2.0), 200);
    }

    #[test]
    fn stage_round_trips_through_json() {
        let s = stage();
        let json = serde_json::to_string(&s).unwrap();
        let back: Stage = serde_json::from_str(&json).unwrap();
        assert_eq!(back.name, s.name);
        assert_eq!(back.hit_window(), s.hit_window());
        assert_eq!(back.value("Hit Threshold"), Some(120.0));
    }
}
