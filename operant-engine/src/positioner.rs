use std::collections::HashSet;

use operant_core::Stage;

/// Hardware seam for the autopositioner. The engine computes target
/// distances; the host moves the motor.
pub trait Positioner {
    fn set_position(&mut self, inches: f64);
}

/// Test and simulation double that records every commanded move.
#[derive(Debug, Default)]
pub struct RecordingPositioner {
    pub commands: Vec<f64>,
}

impl Positioner for RecordingPositioner {
    fn set_position(&mut self, inches: f64) {
        self.commands.push(inches);
    }
}

/// Which running count drives milestone advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MilestoneCount {
    Hits,
    Trials,
}

/// Steps the device away from the subject as performance milestones
/// accumulate within a session.
///
/// Each milestone count fires at most once per session, even if the
/// controller is consulted again while the count sits on a multiple of
/// the interval.
#[derive(Debug)]
pub struct PositionController {
    pub interval: usize,
    pub step: f64,
    pub ceiling: f64,
    pub count: MilestoneCount,
    /// Lever rigs skip the awkward near-zero stops.
    pub nudge_past_zero: bool,
    handled: HashSet<usize>,
}

impl PositionController {
    pub fn new(interval: usize, step: f64) -> Self {
        Self {
            interval,
            step,
            ceiling: 2.0,
            count: MilestoneCount::Hits,
            nudge_past_zero: false,
            handled: HashSet::new(),
        }
    }

    pub fn counting(mut self, count: MilestoneCount) -> Self {
        self.count = count;
        self
    }

    pub fn with_nudge_past_zero(mut self) -> Self {
        self.nudge_past_zero = true;
        self
    }

    pub fn reset(&mut self) {
        self.handled.clear();
    }

    /// Consults the milestone schedule after a finished trial and
    /// advances the device when a new milestone has been reached.
    pub fn after_trial(
        &mut self,
        stage: &mut Stage,
        hit_count: usize,
        trial_count: usize,
        positioner: &mut dyn Positioner,
    ) {
        if !stage.position.is_variable() {
            return;
        }
        let count = match self.count {
            MilestoneCount::Hits => hit_count,
            MilestoneCount::Trials => trial_count,
        };
        if count == 0 || count % self.interval != 0 || self.handled.contains(&count) {
            return;
        }
        // The ceiling gates the advance itself; a device already at or
        // past it stays put.
        if stage.position.current >= self.ceiling {
            return;
        }
        self.handled.insert(count);

        let mut next = stage.position.current + self.step;
        if self.nudge_past_zero && (next == -0.5 || next == 0.0) {
            next = 0.5;
        }
        stage.position.current = next;
        positioner.set_position(next);
    }
}
