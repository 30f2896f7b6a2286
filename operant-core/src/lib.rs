pub mod parameter;
pub mod stage;
pub mod stats;
pub mod trial;

pub use parameter::{AdaptiveKind, History, ParameterType, Recompute, StageParameter};
pub use stage::{OutputTrigger, Stage};
pub use trial::{
    AUX_CHANNEL, DEVICE_CHANNEL, EventKind, SessionSummary, Trial, TrialAction, TrialEvent,
    TrialResult,
};
