use operant_core::{History, SessionSummary, Stage, Trial, stats};

use crate::events::SuccessModel;

/// Largest value the device channel reached inside the hit window.
/// `None` when the buffer never reached the window.
pub fn window_peak(trial: &Trial, stage: &Stage) -> Option<f64> {
    let data = trial.device_signal();
    let window = stage.hit_window();
    if window.start >= data.len() {
        return None;
    }
    let end = window.end.min(data.len());
    data[window.start..end]
        .iter()
        .copied()
        .fold(None, |acc: Option<f64>, v| {
            Some(acc.map_or(v, |a| a.max(v)))
        })
}

/// Between-trial parameter adaptation, applied after each finished
/// trial and before the next can begin.
#[derive(Debug)]
pub enum AdaptRule {
    None,
    /// Feeds the window peak into one parameter's history.
    WindowPeak { param: &'static str },
    /// Feeds the trial's longest hold into a duration parameter.
    SustainedDuration { param: &'static str },
    /// The lever's coupled updates: required presses, full-press and
    /// release thresholds, and optionally the hit-window length
    /// derived from recent inter-press intervals.
    LeverPress {
        hit_param: &'static str,
        full_press_param: &'static str,
        release_param: &'static str,
        hit_window_param: Option<&'static str>,
    },
    /// Centers the supination window band on a turn-angle target,
    /// width a fraction of the recent peak spread.
    TurnAngleBand(TurnAngleBand),
}

#[derive(Debug)]
pub struct TurnAngleBand {
    pub lower_param: &'static str,
    pub upper_param: &'static str,
    pub initiation_param: &'static str,
    pub target_param: &'static str,
    pub percent_param: &'static str,
    peaks: History,
    last_sigma: Option<f64>,
}

/// Peaks feeding the band width come from this many recent trials.
const BAND_PEAK_WINDOW: usize = 10;
/// Boxcar width applied before peak-finding.
const BAND_SMOOTHING: usize = 3;

impl TurnAngleBand {
    pub fn new(
        lower_param: &'static str,
        upper_param: &'static str,
        initiation_param: &'static str,
        target_param: &'static str,
        percent_param: &'static str,
    ) -> Self {
        Self {
            lower_param,
            upper_param,
            initiation_param,
            target_param,
            percent_param,
            peaks: History::new(BAND_PEAK_WINDOW),
            last_sigma: None,
        }
    }

    /// Standard deviation behind the most recent band update.
    pub fn last_sigma(&self) -> Option<f64> {
        self.last_sigma
    }

    fn reset(&mut self) {
        self.peaks.clear();
        self.last_sigma = None;
    }

    fn after_trial(&mut self, trial: &Trial, stage: &mut Stage) {
        let Some(initiation) = stage.value(self.initiation_param) else {
            return;
        };
        let Some(target) = stage.value(self.target_param) else {
            return;
        };
        let Some(percent) = stage.value(self.percent_param) else {
            return;
        };

        let data = trial.device_signal();
        let window = stage.hit_window();
        if window.start >= data.len() {
            return;
        }
        let end = window.end.min(data.len());
        let smoothed = stats::smooth(&data[window.start..end], BAND_SMOOTHING);

        // Only deliberate turns count: peaks at or below the
        // initiation threshold are posture noise.
        let chosen = stats::find_peaks(&smoothed)
            .into_iter()
            .filter(|p| p.value > initiation)
            .min_by(|a, b| {
                let da = (a.value - target).abs();
                let db = (b.value - target).abs();
                da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
            });
        let Some(peak) = chosen else {
            return;
        };
        self.peaks.push(peak.value);

        if !self.peaks.is_full() {
            return;
        }
        let sigma = stats::std_dev(&self.peaks.values());
        if !sigma.is_finite() || sigma <= 0.0 {
            return;
        }
        self.last_sigma = Some(sigma);
        let half_band = percent / 100.0 * sigma;
        if let Some(lower) = stage.param_mut(self.lower_param) {
            lower.current = lower.bound(target - half_band);
        }
        if let Some(upper) = stage.param_mut(self.upper_param) {
            upper.current = upper.bound(target + half_band);
        }
    }
}

impl AdaptRule {
    pub fn begin_session(&mut self) {
        if let AdaptRule::TurnAngleBand(band) = self {
            band.reset();
        }
    }

    /// Most recent band sigma, for variants that track one.
    pub fn last_sigma(&self) -> Option<f64> {
        match self {
            AdaptRule::TurnAngleBand(band) => band.last_sigma(),
            _ => None,
        }
    }

    pub fn after_trial(&mut self, trial: &Trial, stage: &mut Stage, success: &SuccessModel) {
        match self {
            AdaptRule::None => {}
            AdaptRule::WindowPeak { param } => {
                if let Some(peak) = window_peak(trial, stage) {
                    if let Some(p) = stage.param_mut(param) {
                        p.observe(peak);
                        p.recalculate();
                    }
                }
            }
            AdaptRule::SustainedDuration { param } => {
                let Some(hold) = success.hold_state() else {
                    return;
                };
                if let Some(p) = stage.param_mut(param) {
                    p.observe(hold.longest_ms);
                    p.recalculate();
                }
            }
            AdaptRule::LeverPress {
                hit_param,
                full_press_param,
                release_param,
                hit_window_param,
            } => {
                let Some(presses) = success.press_state() else {
                    return;
                };
                let press_count = presses.press_count;
                let inter_press_ms = presses.inter_press_ms;

                if let Some(window_param) = hit_window_param {
                    if let Some(p) = stage.param_mut(window_param) {
                        if p.is_variable() {
                            // A trial without a measurable interval
                            // counts as the slowest allowed pace.
                            let isi_ms = if press_count <= 1 || inter_press_ms <= 0.0 {
                                p.maximum * 1000.0
                            } else {
                                inter_press_ms
                            };
                            p.observe(isi_ms / 1000.0);
                            p.recalculate();
                        }
                    }
                }

                let peak = window_peak(trial, stage);
                if let Some(peak) = peak {
                    if let Some(p) = stage.param_mut(full_press_param) {
                        if p.is_variable() {
                            p.observe(peak);
                            p.recalculate();
                        }
                    }
                    if let Some(p) = stage.param_mut(release_param) {
                        if p.is_variable() {
                            p.observe(peak / 2.0);
                            p.recalculate();
                        }
                    }
                }
                if let Some(p) = stage.param_mut(hit_param) {
                    if p.is_variable() {
                        p.observe(f64::from(press_count));
                        p.recalculate();
                    }
                }
            }
            AdaptRule::TurnAngleBand(band) => band.after_trial(trial, stage),
        }
    }
}

/// How the autopositioner's starting distance is chosen from prior
/// session outcomes.
#[derive(Debug, Clone, Copy)]
pub enum SessionStartRule {
    /// Leave the device wherever the stage's initial position puts it.
    StageDefault,
    /// Ladder keyed to lifetime hit totals, one half-inch step per 50
    /// hits, from -1.0 up to 2.0.
    HitLadder,
    /// Start half an inch inside the last qualifying session's final
    /// position; sessions shorter than `min_trials` don't qualify.
    /// Two consecutive qualifying finishes past 1.5 jump straight to
    /// the 2.0 ceiling.
    RegressFromLast { min_trials: usize },
    /// Half an inch inside the best final position so far, floored at
    /// zero.
    FinalPositionStepDown,
}

impl SessionStartRule {
    pub fn starting_position(&self, prior: &[SessionSummary]) -> Option<f64> {
        match *self {
            SessionStartRule::StageDefault => None,
            SessionStartRule::HitLadder => {
                let total_hits: usize = prior.iter().map(|s| s.hit_count).sum();
                let rungs = (total_hits / 50) as f64;
                Some((-1.0 + 0.5 * rungs).min(2.0))
            }
            SessionStartRule::RegressFromLast { min_trials } => {
                let qualifying: Vec<&SessionSummary> = prior
                    .iter()
                    .filter(|s| s.trial_count >= min_trials)
                    .collect();
                let Some(last) = qualifying.last() else {
                    return Some(-1.0);
                };
                let previous = qualifying
                    .len()
                    .checked_sub(2)
                    .map_or(0.0, |i| qualifying[i].final_position);
                if last.final_position > 1.5 && previous > 1.5 {
                    Some(2.0)
                } else {
                    Some(last.final_position - 0.5)
                }
            }
            SessionStartRule::FinalPositionStepDown => {
                let best = prior
                    .iter()
                    .map(|s| s.final_position)
                    .fold(0.0_f64, f64::max);
                Some((best - 0.5).max(0.0))
            }
        }
    }
}

/// Carries a parameter's final value forward from the most recent
/// session long enough to trust, overriding the stage's initial.
pub fn carry_forward_parameter(
    stage: &mut Stage,
    prior: &[SessionSummary],
    param: &str,
    min_trials: usize,
) {
    let carried = prior
        .iter()
        .filter(|s| s.trial_count >= min_trials)
        .filter_map(|s| s.final_parameters.get(param))
        .next_back();
    if let Some(&value) = carried {
        if let Some(p) = stage.param_mut(param) {
            p.initial = value;
            p.current = value;
        }
    }
}
