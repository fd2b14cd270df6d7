//! The status controller: heartbeats and health conditions on the addon instance.

pub mod controller;
pub mod options;
pub mod pulse;
pub mod repository;

pub use controller::StatusContext;
pub use controller::StatusEventReason;
pub use controller::StatusReconciler;
pub use options::ControllerOptions;
pub use pulse::Pulse;
pub use repository::StatusRepository;
