use std::collections::HashMap;

use operant_core::{AdaptiveKind, OutputTrigger, Stage, StageParameter};
use serde::{Deserialize, Serialize};

use crate::adapt::{AdaptRule, SessionStartRule, TurnAngleBand};
use crate::events::{ForceWindowModel, PressCountModel, SuccessModel, SustainedHoldModel};
use crate::initiation::{IdleRule, InitiationDetector};
use crate::positioner::{MilestoneCount, PositionController};
use crate::react::ActionReactor;
use crate::transform::SignalTransform;

/// Canonical stage parameter names, shared between the task catalog
/// and the per-trial machinery.
pub mod params {
    pub const HIT_THRESHOLD: &str = "Hit Threshold";
    pub const INITIATION_THRESHOLD: &str = "Initiation Threshold";
    pub const LOWER_BOUND: &str = "Lower bound force threshold";
    pub const UPPER_BOUND: &str = "Upper bound force threshold";
    pub const FULL_PRESS: &str = "Full Press";
    pub const RELEASE_POINT: &str = "Release Point";
    pub const HIT_WINDOW_SECONDS: &str = "Hit Window Duration";
    pub const FORCE_THRESHOLD: &str = "Force threshold";
    pub const HOLD_DURATION: &str = "Sustained force duration threshold";
    pub const TURN_ANGLE_TARGET: &str = "Mean turn angle target";
    pub const PERCENT_STD_DEV: &str = "Percent of standard deviation";
    pub const REWARD_DELAY: &str = "Reward delay";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskKind {
    /// Pull to an adaptively rising force threshold.
    StaticPull,
    /// Pull into a force band and release without overshooting.
    ForceWindowPull,
    /// Supination into an angle band centered on a turn target.
    TurnAngleWindow,
    /// Repeated lever presses within the hit window.
    LeverPress,
    /// Hold a pull above threshold for a sustained duration.
    SustainedPull,
    /// Shaping stage: every window peak feeds the threshold, and the
    /// device creeps toward the subject when it goes idle.
    ShapedPull,
}

/// Everything variant-specific about a running task, bundled so the
/// engine itself stays variant-agnostic.
#[derive(Debug)]
pub struct TaskModel {
    pub kind: TaskKind,
    pub transform: SignalTransform,
    pub initiation: InitiationDetector,
    pub success: SuccessModel,
    pub reactor: ActionReactor,
    pub adapt: AdaptRule,
    pub position: Option<PositionController>,
    pub session_start: SessionStartRule,
    /// Parameter carried over from the last prior session with at
    /// least this many trials.
    pub carry_forward: Option<(&'static str, usize)>,
}

fn base_stage(name: &str, parameters: HashMap<String, StageParameter>) -> Stage {
    Stage {
        name: name.to_string(),
        parameters,
        position: StageParameter::adaptive(-1.0, -1.0, 2.0, "inches"),
        samples_before_window: 100,
        samples_during_window: 200,
        sample_period_ms: 10.0,
        output_trigger: OutputTrigger::Off,
    }
}

/// Pull task with a median-adapted hit threshold and a fixed device
/// position.
pub fn static_pull() -> (Stage, TaskModel) {
    let mut parameters = HashMap::new();
    parameters.insert(
        params::HIT_THRESHOLD.to_string(),
        StageParameter::adaptive(120.0, 50.0, 200.0, "grams"),
    );
    parameters.insert(
        params::INITIATION_THRESHOLD.to_string(),
        StageParameter::fixed(10.0, "grams"),
    );
    let mut stage = base_stage("static pull", parameters);
    stage.position = StageParameter::fixed(1.0, "inches");

    let model = TaskModel {
        kind: TaskKind::StaticPull,
        transform: SignalTransform::direct(),
        initiation: InitiationDetector::new(params::INITIATION_THRESHOLD),
        success: SuccessModel::SingleThreshold {
            threshold_param: params::HIT_THRESHOLD,
        },
        reactor: ActionReactor::new(),
        adapt: AdaptRule::WindowPeak {
            param: params::HIT_THRESHOLD,
        },
        position: None,
        session_start: SessionStartRule::StageDefault,
        carry_forward: None,
    };
    (stage, model)
}

/// Options for the force-window pull variants.
#[derive(Debug, Clone, Copy)]
pub struct ForceWindowOptions {
    /// Initiate from an infrared swipe sensor as well as the handle.
    pub swipe_initiation: bool,
    /// Invalidate attempts that overshoot the upper bound. Disabled,
    /// the rise through the lower bound is itself the success.
    pub enforce_upper_bound: bool,
}

impl Default for ForceWindowOptions {
    fn default() -> Self {
        Self {
            swipe_initiation: false,
            enforce_upper_bound: true,
        }
    }
}

/// Pull into `[lower, upper)` and release. The lower bound adapts to
/// the 25th percentile of recent window peaks; the autopositioner
/// climbs the lifetime hit ladder.
pub fn force_window_pull(options: ForceWindowOptions) -> (Stage, TaskModel) {
    let mut parameters = HashMap::new();
    parameters.insert(
        params::LOWER_BOUND.to_string(),
        StageParameter::adaptive(30.0, 15.0, 120.0, "grams").with_kind(AdaptiveKind::Percentile25),
    );
    parameters.insert(
        params::UPPER_BOUND.to_string(),
        StageParameter::fixed(180.0, "grams"),
    );
    parameters.insert(
        params::INITIATION_THRESHOLD.to_string(),
        StageParameter::fixed(10.0, "grams"),
    );
    let stage = base_stage("force window pull", parameters);

    let mut window = ForceWindowModel::new(
        params::LOWER_BOUND,
        params::UPPER_BOUND,
        params::INITIATION_THRESHOLD,
    );
    if !options.enforce_upper_bound {
        window = window.without_upper_enforcement();
    }
    let mut initiation = InitiationDetector::new(params::INITIATION_THRESHOLD);
    if options.swipe_initiation {
        initiation = initiation.with_swipe_sensor();
    }

    let model = TaskModel {
        kind: TaskKind::ForceWindowPull,
        transform: SignalTransform::direct(),
        initiation,
        success: SuccessModel::ForceWindow(window),
        reactor: ActionReactor::new(),
        adapt: AdaptRule::WindowPeak {
            param: params::LOWER_BOUND,
        },
        position: Some(PositionController::new(50, 0.5)),
        session_start: SessionStartRule::HitLadder,
        carry_forward: None,
    };
    (stage, model)
}

/// Supination into an angle band around a turn target. The handle
/// signal is inverted and re-zeroed after every trial; the band width
/// tracks a fraction of the recent peak spread.
pub fn turn_angle_window() -> (Stage, TaskModel) {
    let mut parameters = HashMap::new();
    parameters.insert(
        params::LOWER_BOUND.to_string(),
        StageParameter::adaptive(45.0, 10.0, 75.0, "degrees"),
    );
    parameters.insert(
        params::UPPER_BOUND.to_string(),
        StageParameter::adaptive(105.0, 75.0, 170.0, "degrees"),
    );
    parameters.insert(
        params::INITIATION_THRESHOLD.to_string(),
        StageParameter::fixed(15.0, "degrees"),
    );
    parameters.insert(
        params::TURN_ANGLE_TARGET.to_string(),
        StageParameter::fixed(75.0, "degrees"),
    );
    parameters.insert(
        params::PERCENT_STD_DEV.to_string(),
        StageParameter::fixed(100.0, "percent"),
    );
    let stage = base_stage("turn angle window", parameters);

    let model = TaskModel {
        kind: TaskKind::TurnAngleWindow,
        transform: SignalTransform::inverted_rezeroed(),
        initiation: InitiationDetector::new(params::INITIATION_THRESHOLD),
        success: SuccessModel::ForceWindow(
            ForceWindowModel::new(
                params::LOWER_BOUND,
                params::UPPER_BOUND,
                params::INITIATION_THRESHOLD,
            )
            .holding_valid_below_initiation(),
        ),
        reactor: ActionReactor::new(),
        adapt: AdaptRule::TurnAngleBand(TurnAngleBand::new(
            params::LOWER_BOUND,
            params::UPPER_BOUND,
            params::INITIATION_THRESHOLD,
            params::TURN_ANGLE_TARGET,
            params::PERCENT_STD_DEV,
        )),
        position: Some(PositionController::new(50, 0.5)),
        session_start: SessionStartRule::HitLadder,
        carry_forward: None,
    };
    (stage, model)
}

/// Repeated lever presses. The press thresholds, required count, and
/// hit-window length all adapt; the full-press threshold carries over
/// from the last session with at least ten trials.
pub fn lever_press() -> (Stage, TaskModel) {
    let mut parameters = HashMap::new();
    parameters.insert(
        params::HIT_THRESHOLD.to_string(),
        StageParameter::adaptive(2.0, 1.0, 5.0, "presses"),
    );
    parameters.insert(
        params::INITIATION_THRESHOLD.to_string(),
        StageParameter::fixed(3.0, "degrees"),
    );
    parameters.insert(
        params::FULL_PRESS.to_string(),
        StageParameter::adaptive(7.0, 2.0, 12.0, "degrees"),
    );
    parameters.insert(
        params::RELEASE_POINT.to_string(),
        StageParameter::adaptive(3.5, 1.0, 6.0, "degrees"),
    );
    parameters.insert(
        params::HIT_WINDOW_SECONDS.to_string(),
        StageParameter::adaptive(2.0, 1.0, 4.0, "seconds").with_kind(AdaptiveKind::Percentile75),
    );
    let stage = base_stage("lever press", parameters);

    let model = TaskModel {
        kind: TaskKind::LeverPress,
        transform: SignalTransform::direct(),
        initiation: InitiationDetector::new(params::INITIATION_THRESHOLD),
        success: SuccessModel::PressCount(PressCountModel::new(
            params::HIT_THRESHOLD,
            params::FULL_PRESS,
            params::RELEASE_POINT,
        )),
        reactor: ActionReactor::new(),
        adapt: AdaptRule::LeverPress {
            hit_param: params::HIT_THRESHOLD,
            full_press_param: params::FULL_PRESS,
            release_param: params::RELEASE_POINT,
            hit_window_param: Some(params::HIT_WINDOW_SECONDS),
        },
        position: Some(PositionController::new(30, 0.5).with_nudge_past_zero()),
        session_start: SessionStartRule::RegressFromLast { min_trials: 40 },
        carry_forward: Some((params::FULL_PRESS, 10)),
    };
    (stage, model)
}

/// Hold a pull above a force threshold. The duration requirement
/// adapts to the median of recent longest holds, and rewards can be
/// held back by a configurable delay.
pub fn sustained_pull() -> (Stage, TaskModel) {
    let mut parameters = HashMap::new();
    parameters.insert(
        params::FORCE_THRESHOLD.to_string(),
        StageParameter::fixed(35.0, "grams"),
    );
    parameters.insert(
        params::HOLD_DURATION.to_string(),
        StageParameter::adaptive(50.0, 50.0, 500.0, "milliseconds"),
    );
    parameters.insert(
        params::INITIATION_THRESHOLD.to_string(),
        StageParameter::fixed(10.0, "grams"),
    );
    parameters.insert(
        params::REWARD_DELAY.to_string(),
        StageParameter::fixed(0.0, "seconds"),
    );
    let stage = base_stage("sustained pull", parameters);

    let model = TaskModel {
        kind: TaskKind::SustainedPull,
        transform: SignalTransform::direct(),
        initiation: InitiationDetector::new(params::INITIATION_THRESHOLD),
        success: SuccessModel::SustainedHold(SustainedHoldModel::new(
            params::FORCE_THRESHOLD,
            params::HOLD_DURATION,
        )),
        reactor: ActionReactor::new().with_reward_delay(params::REWARD_DELAY),
        adapt: AdaptRule::SustainedDuration {
            param: params::HOLD_DURATION,
        },
        position: Some(PositionController::new(50, 0.5)),
        session_start: SessionStartRule::HitLadder,
        carry_forward: None,
    };
    (stage, model)
}

/// Early shaping: any window peak above a low, linearly rising
/// threshold is rewarded, the device steps out every five trials, and
/// an idle subject gets it walked back in.
pub fn shaped_pull() -> (Stage, TaskModel) {
    let mut parameters = HashMap::new();
    parameters.insert(
        params::HIT_THRESHOLD.to_string(),
        StageParameter::adaptive(15.0, 15.0, 80.0, "grams")
            .with_kind(AdaptiveKind::Linear)
            .with_increment(0.5),
    );
    parameters.insert(
        params::INITIATION_THRESHOLD.to_string(),
        StageParameter::fixed(10.0, "grams"),
    );
    let mut stage = base_stage("shaped pull", parameters);
    stage.position = StageParameter::adaptive(0.0, 0.0, 2.0, "inches");

    let model = TaskModel {
        kind: TaskKind::ShapedPull,
        transform: SignalTransform::direct(),
        initiation: InitiationDetector::new(params::INITIATION_THRESHOLD)
            .with_idle_rule(IdleRule::ten_minute_default()),
        success: SuccessModel::SingleThreshold {
            threshold_param: params::HIT_THRESHOLD,
        },
        reactor: ActionReactor::new(),
        adapt: AdaptRule::WindowPeak {
            param: params::HIT_THRESHOLD,
        },
        position: Some(PositionController::new(5, 0.25).counting(MilestoneCount::Trials)),
        session_start: SessionStartRule::FinalPositionStepDown,
        carry_forward: None,
    };
    (stage, model)
}
