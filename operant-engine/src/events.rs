use operant_core::{EventKind, Stage, Trial, TrialEvent};

/// Force/angle window machine: the signal must rise into
/// `[lower, upper)` and then drop back below `lower` without ever
/// touching `upper`.
#[derive(Debug, Clone)]
pub struct ForceWindowModel {
    pub lower_param: &'static str,
    pub upper_param: &'static str,
    pub initiation_param: &'static str,
    /// When false the upper bound is configured but not enforced, and
    /// a rise to `lower` succeeds immediately without waiting for the
    /// release.
    pub enforce_upper: bool,
    /// Supination rigs keep a valid attempt alive through dips below
    /// the initiation threshold; pull rigs reset the attempt instead.
    pub hold_valid_below_initiation: bool,
    state: WindowState,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WindowState {
    /// Index of the most recent drop below the initiation threshold;
    /// the attempt that succeeds started here.
    pub last_trough: usize,
    pub hit_at: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttemptPhase {
    Unknown,
    Valid,
    Invalid,
}

impl ForceWindowModel {
    pub fn new(
        lower_param: &'static str,
        upper_param: &'static str,
        initiation_param: &'static str,
    ) -> Self {
        Self {
            lower_param,
            upper_param,
            initiation_param,
            enforce_upper: true,
            hold_valid_below_initiation: false,
            state: WindowState::default(),
        }
    }

    pub fn without_upper_enforcement(mut self) -> Self {
        self.enforce_upper = false;
        self
    }

    pub fn holding_valid_below_initiation(mut self) -> Self {
        self.hold_valid_below_initiation = true;
        self
    }

    pub fn state(&self) -> &WindowState {
        &self.state
    }

    fn begin_trial(&mut self) {
        self.state = WindowState::default();
    }

    fn evaluate(&mut self, trial: &Trial, stage: &Stage) -> Option<TrialEvent> {
        if self.state.hit_at.is_some() {
            return None;
        }
        let lower = stage.value(self.lower_param)?;
        let upper = stage.value(self.upper_param)?;
        let initiation = stage.value(self.initiation_param)?;
        let data = trial.device_signal();

        let mut phase = AttemptPhase::Unknown;
        for i in stage.hit_window() {
            let Some(&v) = data.get(i) else {
                break;
            };

            if self.enforce_upper && v >= upper {
                phase = AttemptPhase::Invalid;
            } else if v < initiation
                && !(self.hold_valid_below_initiation && phase == AttemptPhase::Valid)
            {
                phase = AttemptPhase::Unknown;
                self.state.last_trough = i;
            } else if phase == AttemptPhase::Unknown && v >= lower {
                if !self.enforce_upper {
                    self.state.hit_at = Some(i);
                    return Some(TrialEvent::new(EventKind::SuccessfulTrial, i));
                }
                if v < upper {
                    phase = AttemptPhase::Valid;
                }
            }

            if phase == AttemptPhase::Valid && v < lower {
                self.state.hit_at = Some(i);
                return Some(TrialEvent::new(EventKind::SuccessfulTrial, i));
            }
        }
        None
    }
}

/// Whether a press is counted when the lever goes down or when it
/// comes back up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PressCountOn {
    FullPress,
    Release,
}

/// Two-state lever machine: a press is a crossing above the full-press
/// threshold, which must return below the release point before the
/// next one counts.
#[derive(Debug, Clone)]
pub struct PressCountModel {
    /// Required press count for a hit.
    pub hit_param: &'static str,
    pub full_press_param: &'static str,
    pub release_param: &'static str,
    pub count_on: PressCountOn,
    state: PressState,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PressState {
    pub press_count: u32,
    /// Mean gap between counted presses, in milliseconds. Zero until
    /// at least two presses have been counted.
    pub inter_press_ms: f64,
}

impl PressCountModel {
    pub fn new(
        hit_param: &'static str,
        full_press_param: &'static str,
        release_param: &'static str,
    ) -> Self {
        Self {
            hit_param,
            full_press_param,
            release_param,
            count_on: PressCountOn::FullPress,
            state: PressState::default(),
        }
    }

    pub fn counting_on(mut self, count_on: PressCountOn) -> Self {
        self.count_on = count_on;
        self
    }

    pub fn state(&self) -> &PressState {
        &self.state
    }

    fn begin_trial(&mut self) {
        self.state = PressState::default();
    }

    fn evaluate(&mut self, trial: &Trial, stage: &Stage) -> Option<TrialEvent> {
        let required = stage.value(self.hit_param)?;
        let full_press = stage.value(self.full_press_param)?;
        let release = stage.value(self.release_param)?;
        let data = trial.device_signal();

        let mut pressed = false;
        let mut counted: Vec<usize> = Vec::new();
        for i in stage.hit_window() {
            let Some(&v) = data.get(i) else {
                break;
            };
            if !pressed {
                if v > full_press {
                    pressed = true;
                    if self.count_on == PressCountOn::FullPress {
                        counted.push(i);
                    }
                }
            } else if v <= release {
                pressed = false;
                if self.count_on == PressCountOn::Release {
                    counted.push(i);
                }
            }
        }
        // A press still in progress is not reported.
        self.state.press_count = counted.len() as u32;
        if counted.len() > 1 {
            let indices: Vec<f64> = counted.iter().map(|&i| i as f64).collect();
            let gaps = operant_core::stats::diff(&indices);
            self.state.inter_press_ms =
                operant_core::stats::nan_to_zero(operant_core::stats::mean(&gaps))
                    * stage.sample_period_ms;
        }

        // Success lands on the press that reached the required count,
        // not on any presses after it.
        if f64::from(self.state.press_count) >= required {
            let reaching = (required.ceil().max(1.0) as usize).min(counted.len());
            Some(TrialEvent::new(
                EventKind::SuccessfulTrial,
                counted[reaching - 1],
            ))
        } else {
            None
        }
    }
}

/// Sustained-hold machine: the signal must stay at or above a force
/// threshold for a minimum continuous duration inside the hit window.
#[derive(Debug, Clone)]
pub struct SustainedHoldModel {
    pub force_param: &'static str,
    pub duration_param: &'static str,
    state: HoldState,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HoldState {
    /// Index where the current hold run began.
    pub run_start: usize,
    /// Longest hold seen this trial, in milliseconds.
    pub longest_ms: f64,
    pub hit_at: Option<usize>,
}

impl SustainedHoldModel {
    pub fn new(force_param: &'static str, duration_param: &'static str) -> Self {
        Self {
            force_param,
            duration_param,
            state: HoldState::default(),
        }
    }

    pub fn state(&self) -> &HoldState {
        &self.state
    }

    fn begin_trial(&mut self) {
        self.state = HoldState::default();
    }

    fn evaluate(&mut self, trial: &Trial, stage: &Stage) -> Option<TrialEvent> {
        let force = stage.value(self.force_param)?;
        let duration_ms = stage.value(self.duration_param)?;
        let data = trial.device_signal();

        let mut holding = false;
        let mut hit = None;
        for (i, &v) in data.iter().enumerate() {
            if holding {
                if v >= force {
                    // A one-sample run spans one period.
                    let run_ms = (i - self.state.run_start + 1) as f64 * stage.sample_period_ms;
                    if run_ms > self.state.longest_ms {
                        self.state.longest_ms = run_ms;
                    }
                    if run_ms >= duration_ms && hit.is_none() && self.state.hit_at.is_none() {
                        self.state.hit_at = Some(i);
                        hit = Some(TrialEvent::new(EventKind::SuccessfulTrial, i));
                    }
                } else {
                    holding = false;
                }
            }
            // Runs only start inside the hit window, but one that began
            // there may finish past its end.
            if !holding && stage.in_hit_window(i) && v >= force {
                holding = true;
                self.state.run_start = i;
            }
        }
        hit
    }
}

/// The per-variant success detector. One instance lives for a whole
/// session; `begin_trial` clears any per-trial state.
#[derive(Debug, Clone)]
pub enum SuccessModel {
    /// First sample in the hit window at or above a single threshold.
    SingleThreshold { threshold_param: &'static str },
    ForceWindow(ForceWindowModel),
    PressCount(PressCountModel),
    SustainedHold(SustainedHoldModel),
}

impl SuccessModel {
    pub fn begin_trial(&mut self) {
        match self {
            SuccessModel::SingleThreshold { .. } => {}
            SuccessModel::ForceWindow(m) => m.begin_trial(),
            SuccessModel::PressCount(m) => m.begin_trial(),
            SuccessModel::SustainedHold(m) => m.begin_trial(),
        }
    }

    /// Scans the trial buffer for a success. At most one event comes
    /// back; a trial that already holds a success never yields another.
    pub fn evaluate(&mut self, trial: &Trial, stage: &Stage) -> Option<TrialEvent> {
        if trial.has_success() {
            // Still run the scans whose running state feeds adaptation.
            match self {
                SuccessModel::PressCount(m) => {
                    let _ = m.evaluate(trial, stage);
                }
                SuccessModel::SustainedHold(m) => {
                    let _ = m.evaluate(trial, stage);
                }
                _ => {}
            }
            return None;
        }
        match self {
            SuccessModel::SingleThreshold { threshold_param } => {
                let threshold = stage.value(threshold_param)?;
                let data = trial.device_signal();
                for i in stage.hit_window() {
                    let Some(&v) = data.get(i) else {
                        break;
                    };
                    if v >= threshold {
                        return Some(TrialEvent::new(EventKind::SuccessfulTrial, i));
                    }
                }
                None
            }
            SuccessModel::ForceWindow(m) => m.evaluate(trial, stage),
            SuccessModel::PressCount(m) => m.evaluate(trial, stage),
            SuccessModel::SustainedHold(m) => m.evaluate(trial, stage),
        }
    }

    pub fn window_state(&self) -> Option<&WindowState> {
        match self {
            SuccessModel::ForceWindow(m) => Some(m.state()),
            _ => None,
        }
    }

    pub fn press_state(&self) -> Option<&PressState> {
        match self {
            SuccessModel::PressCount(m) => Some(m.state()),
            _ => None,
        }
    }

    pub fn hold_state(&self) -> Option<&HoldState> {
        match self {
            SuccessModel::SustainedHold(m) => Some(m.state()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use operant_core::{OutputTrigger, StageParameter};
    use std::collections::HashMap;

    fn stage(params: &[(&str, f64)], before: usize, during: usize) -> Stage {
        let mut parameters = HashMap::new();
        for &(name, value) in params {
            parameters.insert(name.to_string(), StageParameter::fixed(value, ""));
        }
        Stage {
            name: "test".to_string(),
            parameters,
            position: StageParameter::fixed(1.0, "inches"),
            samples_before_window: before,
            samples_during_window: during,
            sample_period_ms: 10.0,
            output_trigger: OutputTrigger::Off,
        }
    }

    fn trial_with(device: &[f64]) -> Trial {
        let mut t = Trial::new(2, 0.0);
        t.extend(&[
            (0..device.len()).map(|i| i as f64).collect(),
            device.to_vec(),
        ]);
        t
    }

    #[test]
    fn single_threshold_hits_first_window_crossing() {
        let s = stage(&[("Hit Threshold", 100.0)], 2, 4);
        let mut m = SuccessModel::SingleThreshold {
            threshold_param: "Hit Threshold",
        };
        // Crossing before the window must not count.
        let t = trial_with(&[150.0, 0.0, 10.0, 120.0, 130.0, 0.0]);
        let evt = m.evaluate(&t, &s).unwrap();
        assert_eq!(evt.kind, EventKind::SuccessfulTrial);
        assert_eq!(evt.sample_index, 3);
    }

    fn window_stage() -> Stage {
        stage(
            &[
                ("Lower bound force threshold", 50.0),
                ("Upper bound force threshold", 120.0),
                ("Initiation Threshold", 10.0),
            ],
            0,
            10,
        )
    }

    #[test]
    fn force_window_rewards_rise_and_release() {
        let s = window_stage();
        let mut m = SuccessModel::ForceWindow(ForceWindowModel::new(
            "Lower bound force threshold",
            "Upper bound force threshold",
            "Initiation Threshold",
        ));
        m.begin_trial();
        let t = trial_with(&[5.0, 20.0, 60.0, 80.0, 30.0, 0.0]);
        let evt = m.evaluate(&t, &s).unwrap();
        assert_eq!(evt.sample_index, 4);
        assert_eq!(m.window_state().unwrap().last_trough, 0);
    }

    #[test]
    fn force_window_overshoot_invalidates_attempt() {
        let s = window_stage();
        let mut m = SuccessModel::ForceWindow(ForceWindowModel::new(
            "Lower bound force threshold",
            "Upper bound force threshold",
            "Initiation Threshold",
        ));
        m.begin_trial();
        // Overshoots, then releases: no reward until a fresh attempt.
        let t = trial_with(&[5.0, 60.0, 130.0, 30.0, 5.0, 70.0, 20.0]);
        let evt = m.evaluate(&t, &s).unwrap();
        assert_eq!(evt.sample_index, 6);
    }

    #[test]
    fn force_window_attempt_must_restart_after_dip() {
        let s = window_stage();
        let mut m = SuccessModel::ForceWindow(ForceWindowModel::new(
            "Lower bound force threshold",
            "Upper bound force threshold",
            "Initiation Threshold",
        ));
        m.begin_trial();
        // Valid rise, dip below initiation, then release: the dip
        // reset the attempt, so the release pays nothing.
        let t = trial_with(&[5.0, 60.0, 5.0, 20.0]);
        assert!(m.evaluate(&t, &s).is_none());
        assert_eq!(m.window_state().unwrap().last_trough, 2);
    }

    #[test]
    fn held_valid_attempt_survives_dip_below_initiation() {
        let s = window_stage();
        let mut m = SuccessModel::ForceWindow(
            ForceWindowModel::new(
                "Lower bound force threshold",
                "Upper bound force threshold",
                "Initiation Threshold",
            )
            .holding_valid_below_initiation(),
        );
        m.begin_trial();
        // Same shape as above, but the supination variant treats the
        // dip as the release itself.
        let t = trial_with(&[5.0, 60.0, 5.0, 20.0]);
        let evt = m.evaluate(&t, &s).unwrap();
        assert_eq!(evt.sample_index, 2);
    }

    #[test]
    fn unenforced_upper_bound_rewards_the_rise_itself() {
        let s = window_stage();
        let mut m = SuccessModel::ForceWindow(
            ForceWindowModel::new(
                "Lower bound force threshold",
                "Upper bound force threshold",
                "Initiation Threshold",
            )
            .without_upper_enforcement(),
        );
        m.begin_trial();
        // Blows straight through the upper bound; success lands at the
        // first sample at or above the lower bound.
        let t = trial_with(&[5.0, 55.0, 200.0]);
        let evt = m.evaluate(&t, &s).unwrap();
        assert_eq!(evt.sample_index, 1);
    }

    #[test]
    fn force_window_emits_at_most_one_success() {
        let s = window_stage();
        let mut m = SuccessModel::ForceWindow(ForceWindowModel::new(
            "Lower bound force threshold",
            "Upper bound force threshold",
            "Initiation Threshold",
        ));
        m.begin_trial();
        let mut t = trial_with(&[5.0, 60.0, 30.0]);
        let evt = m.evaluate(&t, &s).unwrap();
        t.push_event(evt);
        // Re-scan over a longer buffer with a second valid attempt.
        let t2 = trial_with(&[5.0, 60.0, 30.0, 5.0, 70.0, 20.0]);
        assert!(m.evaluate(&t2, &s).is_none());
    }

    fn press_stage(required: f64) -> Stage {
        stage(
            &[
                ("Hit Threshold", required),
                ("Full Press", 6.0),
                ("Release Point", 3.0),
            ],
            0,
            12,
        )
    }

    #[test]
    fn presses_count_on_full_press_crossing() {
        let s = press_stage(2.0);
        let mut m = SuccessModel::PressCount(PressCountModel::new(
            "Hit Threshold",
            "Full Press",
            "Release Point",
        ));
        m.begin_trial();
        let t = trial_with(&[0.0, 7.0, 2.0, 1.0, 8.0, 2.0]);
        let evt = m.evaluate(&t, &s).unwrap();
        assert_eq!(evt.sample_index, 4);
        let state = m.press_state().unwrap();
        assert_eq!(state.press_count, 2);
        // Presses at samples 1 and 4 with a 10 ms period.
        assert_eq!(state.inter_press_ms, 30.0);
    }

    #[test]
    fn unreleased_press_does_not_recount() {
        let s = press_stage(2.0);
        let mut m = SuccessModel::PressCount(PressCountModel::new(
            "Hit Threshold",
            "Full Press",
            "Release Point",
        ));
        m.begin_trial();
        // Stays above the release point between the two peaks.
        let t = trial_with(&[0.0, 7.0, 5.0, 8.0, 5.0]);
        assert!(m.evaluate(&t, &s).is_none());
        assert_eq!(m.press_state().unwrap().press_count, 1);
    }

    #[test]
    fn success_lands_on_the_press_reaching_the_count() {
        let s = press_stage(2.0);
        let mut m = SuccessModel::PressCount(PressCountModel::new(
            "Hit Threshold",
            "Full Press",
            "Release Point",
        ));
        m.begin_trial();
        // Three presses; the second one satisfies the requirement.
        let t = trial_with(&[0.0, 7.0, 2.0, 8.0, 2.0, 9.0, 2.0]);
        let evt = m.evaluate(&t, &s).unwrap();
        assert_eq!(evt.sample_index, 3);
        assert_eq!(m.press_state().unwrap().press_count, 3);
    }

    #[test]
    fn release_counting_moves_the_success_sample() {
        let s = press_stage(1.0);
        let mut m = SuccessModel::PressCount(
            PressCountModel::new("Hit Threshold", "Full Press", "Release Point")
                .counting_on(PressCountOn::Release),
        );
        m.begin_trial();
        let t = trial_with(&[0.0, 7.0, 7.0, 2.0]);
        let evt = m.evaluate(&t, &s).unwrap();
        assert_eq!(evt.sample_index, 3);
    }

    fn hold_stage() -> Stage {
        stage(
            &[
                ("Force threshold", 50.0),
                ("Sustained force duration threshold", 40.0),
            ],
            2,
            6,
        )
    }

    #[test]
    fn hold_long_enough_succeeds() {
        let s = hold_stage();
        let mut m = SuccessModel::SustainedHold(SustainedHoldModel::new(
            "Force threshold",
            "Sustained force duration threshold",
        ));
        m.begin_trial();
        // Four consecutive samples at 10 ms each reach the 40 ms bar.
        let t = trial_with(&[0.0, 0.0, 60.0, 60.0, 60.0, 60.0, 0.0]);
        let evt = m.evaluate(&t, &s).unwrap();
        assert_eq!(evt.sample_index, 5);
        assert_eq!(m.hold_state().unwrap().longest_ms, 40.0);
    }

    #[test]
    fn interrupted_hold_restarts_the_run() {
        let s = hold_stage();
        let mut m = SuccessModel::SustainedHold(SustainedHoldModel::new(
            "Force threshold",
            "Sustained force duration threshold",
        ));
        m.begin_trial();
        let t = trial_with(&[0.0, 0.0, 60.0, 60.0, 10.0, 60.0, 60.0, 0.0]);
        assert!(m.evaluate(&t, &s).is_none());
        assert_eq!(m.hold_state().unwrap().longest_ms, 20.0);
    }

    #[test]
    fn run_started_in_window_may_finish_past_it() {
        let s = hold_stage(); // window covers samples 2..8
        let mut m = SuccessModel::SustainedHold(SustainedHoldModel::new(
            "Force threshold",
            "Sustained force duration threshold",
        ));
        m.begin_trial();
        let t = trial_with(&[0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 60.0, 60.0, 60.0, 60.0]);
        let evt = m.evaluate(&t, &s).unwrap();
        assert_eq!(evt.sample_index, 10);
    }

    #[test]
    fn run_may_not_start_outside_window() {
        let s = hold_stage();
        let mut m = SuccessModel::SustainedHold(SustainedHoldModel::new(
            "Force threshold",
            "Sustained force duration threshold",
        ));
        m.begin_trial();
        // Hold begins before the window opens at sample 2.
        let t = trial_with(&[60.0, 60.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        assert!(m.evaluate(&t, &s).is_none());
        assert_eq!(m.hold_state().unwrap().longest_ms, 0.0);
    }

    #[test]
    fn missing_parameter_disables_the_model() {
        let s = stage(&[], 0, 10);
        let mut m = SuccessModel::SingleThreshold {
            threshold_param: "Hit Threshold",
        };
        let t = trial_with(&[500.0]);
        assert!(m.evaluate(&t, &s).is_none());
    }
}
