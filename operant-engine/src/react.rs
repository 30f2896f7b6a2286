use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::Duration;

use operant_core::{EventKind, OutputTrigger, Stage, Trial, TrialAction};

/// A feeder trigger waiting for its delay to elapse. Ordered by due
/// time, with an enqueue sequence number breaking ties first-in
/// first-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct ScheduledFeed {
    due: Duration,
    seq: u64,
}

/// Turns trial events into hardware actions, exactly once per event.
///
/// Successes normally feed immediately; a stage with a reward-delay
/// parameter queues the feed instead, and [`ActionReactor::poll_due`]
/// releases at most one per poll once due. Pending feeds are cleared
/// when a new trial starts so a stale reward never lands mid-attempt.
#[derive(Debug)]
pub struct ActionReactor {
    reward_delay_param: Option<&'static str>,
    pending: BinaryHeap<Reverse<ScheduledFeed>>,
    next_seq: u64,
}

impl ActionReactor {
    pub fn new() -> Self {
        Self {
            reward_delay_param: None,
            pending: BinaryHeap::new(),
            next_seq: 0,
        }
    }

    /// Reads the feed delay, in seconds, from the named stage
    /// parameter. A missing parameter or zero delay feeds immediately.
    pub fn with_reward_delay(mut self, param: &'static str) -> Self {
        self.reward_delay_param = Some(param);
        self
    }

    pub fn pending_feeds(&self) -> usize {
        self.pending.len()
    }

    pub fn clear_pending(&mut self) {
        self.pending.clear();
    }

    /// Consumes every unhandled event on the trial and returns the
    /// actions the host should execute now.
    pub fn react(&mut self, trial: &mut Trial, stage: &Stage, now: Duration) -> Vec<TrialAction> {
        let delay = self
            .reward_delay_param
            .and_then(|p| stage.value(p))
            .filter(|&d| d > 0.0)
            .map(Duration::from_secs_f64);

        let mut actions = Vec::new();
        for event in trial.events.iter_mut().filter(|e| !e.handled) {
            event.handled = true;
            match event.kind {
                EventKind::TrialInitiation => {
                    if stage.output_trigger == OutputTrigger::EveryTrialStart {
                        actions.push(TrialAction::SendStimulationTrigger);
                    }
                }
                EventKind::SuccessfulTrial => {
                    match delay {
                        Some(delay) => {
                            self.pending.push(Reverse(ScheduledFeed {
                                due: now + delay,
                                seq: self.next_seq,
                            }));
                            self.next_seq += 1;
                        }
                        None => actions.push(TrialAction::TriggerFeeder),
                    }
                    if stage.output_trigger == OutputTrigger::On {
                        actions.push(TrialAction::SendStimulationTrigger);
                    }
                }
            }
        }
        actions
    }

    /// Releases the earliest due feed, if any. One per poll keeps the
    /// feeder from double-firing on a congested queue.
    pub fn poll_due(&mut self, now: Duration) -> Option<TrialAction> {
        let Reverse(head) = self.pending.peek()?;
        if head.due <= now {
            self.pending.pop();
            Some(TrialAction::TriggerFeeder)
        } else {
            None
        }
    }
}

impl Default for ActionReactor {
    fn default() -> Self {
        Self::new()
    }
}
