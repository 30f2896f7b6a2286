use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::stats;

/// Whether a stage parameter stays put for a whole session or is
/// recalculated trial-to-trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParameterType {
    Fixed,
    Variable,
}

/// Statistic used to derive a new current value from recent history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdaptiveKind {
    Median,
    Percentile25,
    Percentile75,
    /// Adds `increment` on every update; ignores history.
    Linear,
}

/// When a history-backed parameter recomputes its current value.
///
/// Task variants genuinely differ here: most only recompute once the
/// rolling window has filled, a few recompute on every observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Recompute {
    WhenFull,
    EveryPush,
}

/// Fixed-capacity FIFO of recent observations. Pushing onto a full
/// buffer evicts the oldest entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct History {
    buf: VecDeque<f64>,
    capacity: usize,
}

impl History {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, value: f64) {
        self.buf.push_back(value);
        while self.buf.len() > self.capacity {
            self.buf.pop_front();
        }
    }

    pub fn is_full(&self) -> bool {
        self.buf.len() == self.capacity
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn values(&self) -> Vec<f64> {
        self.buf.iter().copied().collect()
    }

    pub fn last(&self) -> Option<f64> {
        self.buf.back().copied()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

/// A tunable threshold or duration belonging to a stage.
///
/// Invariant: after any update, `current` lies within
/// `[minimum, maximum]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageParameter {
    pub units: String,
    pub parameter_type: ParameterType,
    pub initial: f64,
    pub minimum: f64,
    pub maximum: f64,
    pub current: f64,
    pub adaptive: AdaptiveKind,
    pub recompute: Recompute,
    /// Step size for `AdaptiveKind::Linear`.
    pub increment: f64,
    pub history: History,
}

pub const DEFAULT_HISTORY_CAPACITY: usize = 10;

impl StageParameter {
    /// A parameter that never changes during a session.
    pub fn fixed(value: f64, units: &str) -> Self {
        Self {
            units: units.to_string(),
            parameter_type: ParameterType::Fixed,
            initial: value,
            minimum: value,
            maximum: value,
            current: value,
            adaptive: AdaptiveKind::Median,
            recompute: Recompute::WhenFull,
            increment: 0.0,
            history: History::new(DEFAULT_HISTORY_CAPACITY),
        }
    }

    /// A median-adapted parameter with the default 10-trial window.
    pub fn adaptive(initial: f64, minimum: f64, maximum: f64, units: &str) -> Self {
        Self {
            units: units.to_string(),
            parameter_type: ParameterType::Variable,
            initial,
            minimum,
            maximum,
            current: initial,
            adaptive: AdaptiveKind::Median,
            recompute: Recompute::WhenFull,
            increment: 0.0,
            history: History::new(DEFAULT_HISTORY_CAPACITY),
        }
    }

    pub fn with_kind(mut self, kind: AdaptiveKind) -> Self {
        self.adaptive = kind;
        self
    }

    pub fn with_recompute(mut self, recompute: Recompute) -> Self {
        self.recompute = recompute;
        self
    }

    pub fn with_increment(mut self, increment: f64) -> Self {
        self.increment = increment;
        self
    }

    pub fn is_variable(&self) -> bool {
        self.parameter_type == ParameterType::Variable
    }

    pub fn reset_to_initial(&mut self) {
        self.current = self.initial;
    }

    /// Records one trial observation without recomputing.
    pub fn observe(&mut self, value: f64) {
        self.history.push(value);
    }

    /// Recomputes `current` from history according to the adaptive
    /// kind and recompute policy, clamped into `[minimum, maximum]`.
    /// Fixed parameters and not-yet-ready windows are left untouched.
    pub fn recalculate(&mut self) {
        if !self.is_variable() {
            return;
        }

        if self.adaptive == AdaptiveKind::Linear {
            self.current = self.bound(self.current + self.increment);
            return;
        }

        let ready = match self.recompute {
            Recompute::WhenFull => self.history.is_full(),
            Recompute::EveryPush => !self.history.is_empty(),
        };
        if !ready {
            return;
        }

        let values = self.history.values();
        let statistic = match self.adaptive {
            AdaptiveKind::Median => stats::median(&values),
            AdaptiveKind::Percentile25 => stats::percentile(&values, 0.25),
            AdaptiveKind::Percentile75 => stats::percentile(&values, 0.75),
            AdaptiveKind::Linear => unreachable!(),
        };
        if statistic.is_nan() {
            return;
        }
        self.current = self.bound(statistic);
    }

    /// Clamps a candidate value into the configured bounds.
    pub fn bound(&self, value: f64) -> f64 {
        value.max(self.minimum).min(self.maximum)
    }
}
