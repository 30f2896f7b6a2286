pub mod adapt;
pub mod config;
pub mod engine;
pub mod events;
pub mod initiation;
pub mod positioner;
pub mod react;
pub mod transform;

pub use config::{TaskKind, TaskModel, params};
pub use engine::{SessionAggregates, TaskEngine};
pub use positioner::{PositionController, Positioner, RecordingPositioner};
pub use transform::DeviceCalibration;
