use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Stream index of the primary force/angle channel.
pub const DEVICE_CHANNEL: usize = 1;
/// Stream index of the auxiliary sensor channel (e.g. an infrared
/// swipe sensor), when the rig has one.
pub const AUX_CHANNEL: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    TrialInitiation,
    SuccessfulTrial,
}

/// A significant moment detected within a trial's sample buffer.
///
/// Each event is consumed at most once: the reactor flips `handled`
/// before emitting actions, so re-evaluating a trial never acts twice
/// on the same event.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrialEvent {
    pub kind: EventKind,
    pub sample_index: usize,
    pub handled: bool,
}

impl TrialEvent {
    pub fn new(kind: EventKind, sample_index: usize) -> Self {
        Self {
            kind,
            sample_index,
            handled: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrialResult {
    Unknown,
    Hit,
    Miss,
}

/// A command for the host to execute on the rig hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrialAction {
    TriggerFeeder,
    SendStimulationTrigger,
}

/// One subject-initiated attempt. The sample buffer and event list
/// grow while the trial is open; the host finalizes `result` when the
/// trial or its hit window closes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trial {
    /// Windowed sample buffer, one inner vec per stream.
    pub data: Vec<Vec<f64>>,
    /// Append-only, ordered by sample index.
    pub events: Vec<TrialEvent>,
    pub result: TrialResult,
    pub device_position: f64,
}

impl Trial {
    pub fn new(channel_count: usize, device_position: f64) -> Self {
        Self {
            data: vec![Vec::new(); channel_count],
            events: Vec::new(),
            result: TrialResult::Unknown,
            device_position,
        }
    }

    /// Appends one calibrated batch to the trial buffer.
    pub fn extend(&mut self, batch: &[Vec<f64>]) {
        for (channel, samples) in self.data.iter_mut().zip(batch) {
            channel.extend_from_slice(samples);
        }
    }

    pub fn device_signal(&self) -> &[f64] {
        self.data.get(DEVICE_CHANNEL).map_or(&[], Vec::as_slice)
    }

    pub fn aux_signal(&self) -> &[f64] {
        self.data.get(AUX_CHANNEL).map_or(&[], Vec::as_slice)
    }

    pub fn push_event(&mut self, event: TrialEvent) {
        self.events.push(event);
    }

    pub fn has_success(&self) -> bool {
        self.events
            .iter()
            .any(|e| e.kind == EventKind::SuccessfulTrial)
    }

    pub fn is_hit(&self) -> bool {
        self.result == TrialResult::Hit
    }
}

/// What the engine needs to know about a finished session when
/// adapting the next one's starting state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub trial_count: usize,
    pub hit_count: usize,
    pub final_position: f64,
    /// Parameter values on the session's final trial, keyed by name.
    pub final_parameters: HashMap<String, f64>,
}
