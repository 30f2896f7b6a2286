use std::time::Duration;

use operant_core::{
    EventKind, SessionSummary, Stage, Trial, TrialAction, TrialEvent, TrialResult, stats,
};
use operant_timing::Clock;
use serde::Serialize;

use crate::adapt::{self, window_peak};
use crate::config::{TaskKind, TaskModel, params};
use crate::positioner::Positioner;
use crate::transform::DeviceCalibration;

/// Running session tallies, kept for end-of-session reporting and the
/// next session's summary.
#[derive(Debug, Default, Clone, Serialize)]
pub struct SessionAggregates {
    pub trial_count: usize,
    pub hit_count: usize,
    pub feed_count: usize,
    /// Window peak of each trial, in device units.
    pub window_peaks: Vec<f64>,
    /// The variant's governing threshold after each trial.
    pub thresholds: Vec<f64>,
    pub press_counts: Vec<u32>,
    pub inter_press_ms: Vec<f64>,
    pub band_sigmas: Vec<f64>,
    /// Device position each trial ran at.
    pub positions: Vec<f64>,
}

/// The per-session driver. The host feeds it raw batches and open
/// trials; the engine owns initiation, success detection, actions,
/// and between-trial adaptation.
#[derive(Debug)]
pub struct TaskEngine<C: Clock<Timestamp = Duration>> {
    pub stage: Stage,
    model: TaskModel,
    clock: C,
    aggregates: SessionAggregates,
}

impl<C: Clock<Timestamp = Duration>> TaskEngine<C> {
    pub fn new(stage: Stage, model: TaskModel, clock: C) -> Self {
        Self {
            stage,
            model,
            clock,
            aggregates: SessionAggregates::default(),
        }
    }

    pub fn kind(&self) -> TaskKind {
        self.model.kind
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn aggregates(&self) -> &SessionAggregates {
        &self.aggregates
    }

    /// Resets per-session state and applies the variant's session
    /// start rules: the positioner placement and any parameter carried
    /// over from a prior session.
    pub fn begin_session(&mut self, prior: &[SessionSummary], positioner: &mut dyn Positioner) {
        self.aggregates = SessionAggregates::default();
        self.model.transform.reset();
        self.model.reactor.clear_pending();
        self.model.initiation.reset();
        self.model.adapt.begin_session();
        if let Some(pc) = &mut self.model.position {
            pc.reset();
        }
        for p in self.stage.parameters.values_mut() {
            p.reset_to_initial();
            p.history.clear();
        }
        self.stage.position.reset_to_initial();

        if let Some(target) = self.model.session_start.starting_position(prior) {
            if self.stage.position.is_variable() {
                self.stage.position.current = self.stage.position.bound(target);
                positioner.set_position(self.stage.position.current);
            }
        }
        if let Some((param, min_trials)) = self.model.carry_forward {
            adapt::carry_forward_parameter(&mut self.stage, prior, param, min_trials);
        }
    }

    /// Calibrates one raw batch into the session's signal streams.
    pub fn transform_batch(&self, raw: &[Vec<i32>], calibration: DeviceCalibration) -> Vec<Vec<f64>> {
        self.model.transform.apply(raw, calibration)
    }

    /// Scans the freshest samples for a trial initiation. On a hit the
    /// per-trial machinery is reset for the trial about to open.
    pub fn check_initiation(
        &mut self,
        signal: &[Vec<f64>],
        fresh: usize,
        positioner: &mut dyn Positioner,
    ) -> Option<usize> {
        let now = self.clock.now();
        let index = self
            .model
            .initiation
            .detect(signal, fresh, &mut self.stage, now, positioner)?;
        self.model.success.begin_trial();
        self.model.reactor.clear_pending();
        Some(index)
    }

    /// Opens a trial at the detected initiation sample.
    pub fn open_trial(&self, channel_count: usize, initiation_index: usize) -> Trial {
        let mut trial = Trial::new(channel_count, self.stage.position.current);
        trial.push_event(TrialEvent::new(EventKind::TrialInitiation, initiation_index));
        trial
    }

    /// Re-scans an open trial's buffer. At most one success is ever
    /// recorded per trial, and events stay ordered by sample index.
    pub fn evaluate_trial(&mut self, trial: &mut Trial) -> Option<TrialEvent> {
        let event = self.model.success.evaluate(trial, &self.stage)?;
        trial.push_event(event);
        Some(event)
    }

    /// Converts any unhandled trial events into hardware actions.
    pub fn react(&mut self, trial: &mut Trial) -> Vec<TrialAction> {
        let now = self.clock.now();
        let actions = self.model.reactor.react(trial, &self.stage, now);
        self.aggregates.feed_count += actions
            .iter()
            .filter(|a| **a == TrialAction::TriggerFeeder)
            .count();
        actions
    }

    /// Releases a delayed reward whose time has come, at most one per
    /// poll.
    pub fn poll_scheduled(&mut self) -> Option<TrialAction> {
        let action = self.model.reactor.poll_due(self.clock.now())?;
        self.aggregates.feed_count += 1;
        Some(action)
    }

    /// Marks a trial hit or miss from its recorded events.
    pub fn close_trial(&self, trial: &mut Trial) {
        trial.result = if trial.has_success() {
            TrialResult::Hit
        } else {
            TrialResult::Miss
        };
    }

    /// Books a closed trial: tallies, between-trial adaptation, the
    /// positioner's milestone schedule, and signal re-zeroing. Returns
    /// the end-of-trial status line.
    pub fn finish_trial(&mut self, trial: &Trial, positioner: &mut dyn Positioner) -> String {
        self.aggregates.trial_count += 1;
        if trial.is_hit() {
            self.aggregates.hit_count += 1;
        }
        self.aggregates.positions.push(trial.device_position);
        if let Some(peak) = window_peak(trial, &self.stage) {
            self.aggregates.window_peaks.push(peak);
        }
        if let Some(presses) = self.model.success.press_state() {
            self.aggregates.press_counts.push(presses.press_count);
            if presses.press_count > 1 {
                self.aggregates.inter_press_ms.push(presses.inter_press_ms);
            }
        }

        {
            let TaskModel { adapt, success, .. } = &mut self.model;
            adapt.after_trial(trial, &mut self.stage, success);
        }
        if let Some(sigma) = self.model.adapt.last_sigma() {
            self.aggregates.band_sigmas.push(sigma);
        }
        if let Some(threshold) = self.governing_threshold() {
            self.aggregates.thresholds.push(threshold);
        }
        // An adapted window length takes effect on the next trial.
        if let Some(seconds) = self.stage.value(params::HIT_WINDOW_SECONDS) {
            self.stage.samples_during_window = self.stage.seconds_to_samples(seconds);
        }
        if let Some(pc) = &mut self.model.position {
            pc.after_trial(
                &mut self.stage,
                self.aggregates.hit_count,
                self.aggregates.trial_count,
                positioner,
            );
        }
        self.model.transform.note_trial_end(trial);

        self.end_of_trial_message(trial)
    }

    /// The session's record for the next session's start rules.
    pub fn session_summary(&self) -> SessionSummary {
        SessionSummary {
            trial_count: self.aggregates.trial_count,
            hit_count: self.aggregates.hit_count,
            final_position: self.stage.position.current,
            final_parameters: self
                .stage
                .parameters
                .iter()
                .map(|(name, p)| (name.clone(), p.current))
                .collect(),
        }
    }

    /// One number summarizing a closed trial for an overview display.
    /// NaN when the trial has nothing to report.
    pub fn overview_value(&self, trial: &Trial) -> f64 {
        match self.model.kind {
            TaskKind::StaticPull | TaskKind::ShapedPull => {
                window_peak(trial, &self.stage).unwrap_or(f64::NAN)
            }
            TaskKind::ForceWindowPull | TaskKind::TurnAngleWindow => {
                let Some(window) = self.model.success.window_state() else {
                    return f64::NAN;
                };
                let Some(hit) = window.hit_at else {
                    return f64::NAN;
                };
                let data = trial.device_signal();
                let start = window.last_trough.min(hit);
                data[start..=hit.min(data.len().saturating_sub(1))]
                    .iter()
                    .copied()
                    .fold(f64::NAN, f64::max)
            }
            TaskKind::LeverPress => self
                .model
                .success
                .press_state()
                .map_or(f64::NAN, |p| p.inter_press_ms),
            TaskKind::SustainedPull => {
                let Some(hold) = self.model.success.hold_state() else {
                    return f64::NAN;
                };
                if hold.hit_at.is_some() {
                    hold.longest_ms
                } else {
                    f64::NAN
                }
            }
        }
    }

    /// Summary lines printed when the session closes.
    pub fn end_of_session_messages(&self) -> Vec<String> {
        let a = &self.aggregates;
        let hit_pct = if a.trial_count == 0 {
            0.0
        } else {
            100.0 * a.hit_count as f64 / a.trial_count as f64
        };
        let mut lines = vec![
            format!(
                "Session ended: {} trials, {} hits ({hit_pct:.0}%).",
                a.trial_count, a.hit_count
            ),
            format!("Feedings: {}.", a.feed_count),
        ];
        match self.model.kind {
            TaskKind::StaticPull | TaskKind::ForceWindowPull => {
                lines.push(format!(
                    "Median peak force: {:.1} grams.",
                    stats::nan_to_zero(stats::median(&a.window_peaks))
                ));
                lines.push(format!(
                    "Final force threshold: {:.1} grams.",
                    stats::nan_to_zero(a.thresholds.last().copied().unwrap_or(f64::NAN))
                ));
            }
            TaskKind::TurnAngleWindow => {
                lines.push(format!(
                    "Median peak angle: {:.1} degrees.",
                    stats::nan_to_zero(stats::median(&a.window_peaks))
                ));
                lines.push(format!(
                    "Median band deviation: {:.1} degrees.",
                    stats::nan_to_zero(stats::median(&a.band_sigmas))
                ));
            }
            TaskKind::LeverPress => {
                let presses: Vec<f64> = a.press_counts.iter().map(|&c| f64::from(c)).collect();
                lines.push(format!(
                    "Median presses per trial: {:.1}.",
                    stats::nan_to_zero(stats::median(&presses))
                ));
                lines.push(format!(
                    "Median inter-press interval: {:.0} ms.",
                    stats::nan_to_zero(stats::median(&a.inter_press_ms))
                ));
                if let Some(full_press) = self.stage.value(params::FULL_PRESS) {
                    lines.push(format!(
                        "Final full-press threshold: {full_press:.1} degrees."
                    ));
                }
            }
            TaskKind::SustainedPull => {
                lines.push(format!(
                    "Final hold requirement: {:.0} ms.",
                    stats::nan_to_zero(a.thresholds.last().copied().unwrap_or(f64::NAN))
                ));
            }
            TaskKind::ShapedPull => {
                lines.push(format!(
                    "Median peak force: {:.1} grams.",
                    stats::nan_to_zero(stats::median(&a.window_peaks))
                ));
                let final_position = self.stage.position.current;
                let at_final = a
                    .positions
                    .iter()
                    .filter(|&&p| p == final_position)
                    .count();
                lines.push(format!(
                    "Final position: {final_position:.2} inches ({at_final} trials there)."
                ));
            }
        }
        lines
    }

    fn governing_threshold(&self) -> Option<f64> {
        let name = match self.model.kind {
            TaskKind::StaticPull | TaskKind::ShapedPull | TaskKind::LeverPress => {
                params::HIT_THRESHOLD
            }
            TaskKind::ForceWindowPull | TaskKind::TurnAngleWindow => params::LOWER_BOUND,
            TaskKind::SustainedPull => params::HOLD_DURATION,
        };
        self.stage.value(name)
    }

    fn end_of_trial_message(&self, trial: &Trial) -> String {
        let n = self.aggregates.trial_count;
        let outcome = match trial.result {
            TrialResult::Hit => "HIT",
            TrialResult::Miss => "MISS",
            TrialResult::Unknown => "ABORTED",
        };
        let peak = stats::nan_to_zero(window_peak(trial, &self.stage).unwrap_or(f64::NAN));
        let threshold = stats::nan_to_zero(self.governing_threshold().unwrap_or(f64::NAN));
        match self.model.kind {
            TaskKind::StaticPull | TaskKind::ForceWindowPull | TaskKind::ShapedPull => {
                format!(
                    "Trial {n} {outcome}, peak force {peak:.0} grams (threshold {threshold:.0} grams)."
                )
            }
            TaskKind::TurnAngleWindow => {
                let band = match self.model.adapt.last_sigma() {
                    Some(sigma) => format!(", band sigma {sigma:.1} degrees"),
                    None => String::new(),
                };
                format!(
                    "Trial {n} {outcome}, peak angle {peak:.0} degrees (lower bound {threshold:.0} degrees{band})."
                )
            }
            TaskKind::LeverPress => {
                let presses = self
                    .model
                    .success
                    .press_state()
                    .map_or(0, |p| p.press_count);
                let isi = self
                    .model
                    .success
                    .press_state()
                    .map_or(0.0, |p| p.inter_press_ms);
                format!(
                    "Trial {n} {outcome}, {presses} presses, inter-press interval {isi:.0} ms."
                )
            }
            TaskKind::SustainedPull => {
                let held = self.model.success.hold_state().map_or(0.0, |h| h.longest_ms);
                format!(
                    "Trial {n} {outcome}, longest hold {held:.0} ms (required {threshold:.0} ms)."
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{self, ForceWindowOptions};
    use crate::positioner::RecordingPositioner;
    use operant_timing::ManualClock;

    fn signal_from(device: Vec<f64>) -> Vec<Vec<f64>> {
        vec![(0..device.len()).map(|i| i as f64).collect(), device]
    }

    #[test]
    fn static_pull_trial_runs_end_to_end() {
        let (mut stage, model) = config::static_pull();
        stage.samples_before_window = 2;
        stage.samples_during_window = 4;
        let mut engine = TaskEngine::new(stage, model, ManualClock::new());
        let mut pos = RecordingPositioner::default();
        engine.begin_session(&[], &mut pos);

        let signal = signal_from(vec![0.0, 0.0, 50.0]);
        let start = engine.check_initiation(&signal, 1, &mut pos).unwrap();
        assert_eq!(start, 2);

        let mut trial = engine.open_trial(2, start);
        trial.extend(&signal_from(vec![40.0, 90.0, 130.0, 140.0, 20.0, 0.0]));

        let event = engine.evaluate_trial(&mut trial).unwrap();
        assert_eq!(event.kind, EventKind::SuccessfulTrial);
        assert_eq!(event.sample_index, 2);
        // A second scan never records a second success.
        assert!(engine.evaluate_trial(&mut trial).is_none());

        let actions = engine.react(&mut trial);
        assert_eq!(actions, vec![TrialAction::TriggerFeeder]);
        assert!(engine.react(&mut trial).is_empty());

        engine.close_trial(&mut trial);
        assert!(trial.is_hit());
        let message = engine.finish_trial(&trial, &mut pos);
        assert!(message.contains("Trial 1 HIT"));

        let a = engine.aggregates();
        assert_eq!(a.trial_count, 1);
        assert_eq!(a.hit_count, 1);
        assert_eq!(a.feed_count, 1);
        assert_eq!(a.window_peaks, vec![140.0]);
    }

    #[test]
    fn miss_feeds_nothing_and_still_adapts() {
        let (mut stage, model) = config::static_pull();
        stage.samples_before_window = 0;
        stage.samples_during_window = 4;
        let mut engine = TaskEngine::new(stage, model, ManualClock::new());
        let mut pos = RecordingPositioner::default();
        engine.begin_session(&[], &mut pos);

        let mut trial = engine.open_trial(2, 0);
        trial.extend(&signal_from(vec![30.0, 40.0, 10.0, 0.0]));
        assert!(engine.evaluate_trial(&mut trial).is_none());
        let actions = engine.react(&mut trial);
        assert!(actions.is_empty());

        engine.close_trial(&mut trial);
        assert!(!trial.is_hit());
        engine.finish_trial(&trial, &mut pos);
        let p = engine.stage.param("Hit Threshold").unwrap();
        assert_eq!(p.history.values(), vec![40.0]);
    }

    #[test]
    fn delayed_reward_flows_through_the_scheduler() {
        let (mut stage, model) = config::sustained_pull();
        stage.samples_before_window = 0;
        stage.samples_during_window = 6;
        stage
            .param_mut(config::params::REWARD_DELAY)
            .unwrap()
            .current = 1.0;
        let clock = ManualClock::new();
        let mut engine = TaskEngine::new(stage, model, clock);
        let mut pos = RecordingPositioner::default();
        engine.begin_session(&[], &mut pos);

        let mut trial = engine.open_trial(2, 0);
        // Six 10 ms samples above threshold: a 50 ms hold plus slack.
        trial.extend(&signal_from(vec![60.0; 6]));
        assert!(engine.evaluate_trial(&mut trial).is_some());
        assert!(engine.react(&mut trial).is_empty());
        assert!(engine.poll_scheduled().is_none());

        engine.clock.advance(Duration::from_secs(2));
        assert_eq!(engine.poll_scheduled(), Some(TrialAction::TriggerFeeder));
        assert!(engine.poll_scheduled().is_none());
        assert_eq!(engine.aggregates().feed_count, 1);
    }

    #[test]
    fn new_initiation_clears_stale_scheduled_rewards() {
        let (mut stage, model) = config::sustained_pull();
        stage.samples_before_window = 0;
        stage.samples_during_window = 6;
        stage
            .param_mut(config::params::REWARD_DELAY)
            .unwrap()
            .current = 5.0;
        let mut engine = TaskEngine::new(stage, model, ManualClock::new());
        let mut pos = RecordingPositioner::default();
        engine.begin_session(&[], &mut pos);

        let mut trial = engine.open_trial(2, 0);
        trial.extend(&signal_from(vec![60.0; 6]));
        engine.evaluate_trial(&mut trial);
        engine.react(&mut trial);

        // Next trial starts before the reward came due.
        let signal = signal_from(vec![50.0]);
        assert!(engine.check_initiation(&signal, 1, &mut pos).is_some());
        engine.clock.advance(Duration::from_secs(60));
        assert!(engine.poll_scheduled().is_none());
    }

    #[test]
    fn session_summary_reflects_final_state() {
        let (mut stage, model) = config::static_pull();
        stage.samples_before_window = 0;
        stage.samples_during_window = 4;
        let mut engine = TaskEngine::new(stage, model, ManualClock::new());
        let mut pos = RecordingPositioner::default();
        engine.begin_session(&[], &mut pos);

        let mut trial = engine.open_trial(2, 0);
        trial.extend(&signal_from(vec![150.0, 0.0, 0.0, 0.0]));
        engine.evaluate_trial(&mut trial);
        engine.close_trial(&mut trial);
        engine.finish_trial(&trial, &mut pos);

        let summary = engine.session_summary();
        assert_eq!(summary.trial_count, 1);
        assert_eq!(summary.hit_count, 1);
        assert_eq!(summary.final_parameters["Hit Threshold"], 120.0);
    }

    #[test]
    fn hit_ladder_places_the_device_at_session_start() {
        let (stage, model) = config::force_window_pull(ForceWindowOptions::default());
        let mut engine = TaskEngine::new(stage, model, ManualClock::new());
        let mut pos = RecordingPositioner::default();

        let prior = vec![SessionSummary {
            trial_count: 80,
            hit_count: 60,
            final_position: 1.0,
            final_parameters: Default::default(),
        }];
        engine.begin_session(&prior, &mut pos);
        assert_eq!(engine.stage.position.current, -0.5);
        assert_eq!(pos.commands, vec![-0.5]);
    }

    #[test]
    fn begin_session_restores_adapted_parameters() {
        let (mut stage, model) = config::static_pull();
        stage.samples_before_window = 0;
        stage.samples_during_window = 2;
        let mut engine = TaskEngine::new(stage, model, ManualClock::new());
        let mut pos = RecordingPositioner::default();
        engine.begin_session(&[], &mut pos);
        engine
            .stage
            .param_mut("Hit Threshold")
            .unwrap()
            .current = 199.0;

        engine.begin_session(&[], &mut pos);
        assert_eq!(engine.stage.value("Hit Threshold"), Some(120.0));
        assert!(engine.stage.param("Hit Threshold").unwrap().history.is_empty());
    }

    #[test]
    fn lever_carry_forward_applies_at_session_start() {
        let (stage, model) = config::lever_press();
        let mut engine = TaskEngine::new(stage, model, ManualClock::new());
        let mut pos = RecordingPositioner::default();

        let mut prior = SessionSummary {
            trial_count: 45,
            hit_count: 12,
            final_position: 0.5,
            final_parameters: Default::default(),
        };
        prior
            .final_parameters
            .insert("Full Press".to_string(), 9.0);
        engine.begin_session(&[prior], &mut pos);
        assert_eq!(engine.stage.value("Full Press"), Some(9.0));
        // Regress rule: 45 trials qualify, so start half an inch in.
        assert_eq!(engine.stage.position.current, 0.0);
    }

    #[test]
    fn adapted_hit_window_resizes_next_trial() {
        let (mut stage, model) = config::lever_press();
        stage.samples_before_window = 0;
        stage.samples_during_window = 10;
        let mut engine = TaskEngine::new(stage, model, ManualClock::new());
        let mut pos = RecordingPositioner::default();
        engine.begin_session(&[], &mut pos);

        let mut trial = engine.open_trial(2, 0);
        trial.extend(&signal_from(vec![0.0; 10]));
        engine.evaluate_trial(&mut trial);
        engine.close_trial(&mut trial);
        engine.finish_trial(&trial, &mut pos);

        // No presses: the window parameter still rules the length.
        let seconds = engine.stage.value("Hit Window Duration").unwrap();
        assert_eq!(
            engine.stage.samples_during_window,
            engine.stage.seconds_to_samples(seconds)
        );
    }

    #[test]
    fn overview_value_is_nan_for_an_empty_trial() {
        let (stage, model) = config::static_pull();
        let engine = TaskEngine::new(stage, model, ManualClock::new());
        let trial = Trial::new(2, 0.0);
        assert!(engine.overview_value(&trial).is_nan());
    }

    #[test]
    fn end_of_session_reports_hit_rate() {
        let (mut stage, model) = config::static_pull();
        stage.samples_before_window = 0;
        stage.samples_during_window = 2;
        let mut engine = TaskEngine::new(stage, model, ManualClock::new());
        let mut pos = RecordingPositioner::default();
        engine.begin_session(&[], &mut pos);

        for device in [vec![150.0, 0.0], vec![20.0, 0.0]] {
            let mut trial = engine.open_trial(2, 0);
            trial.extend(&signal_from(device));
            engine.evaluate_trial(&mut trial);
            engine.react(&mut trial);
            engine.close_trial(&mut trial);
            engine.finish_trial(&trial, &mut pos);
        }
        let lines = engine.end_of_session_messages();
        assert!(lines[0].contains("2 trials, 1 hits (50%)"));
        assert!(lines[1].contains("Feedings: 1"));
    }
}
