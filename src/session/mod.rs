//! Session state: navigation history, traversal modes, burst detection,
//! and the controller that owns them.
pub mod burst;
pub mod controller;
pub mod engine;
pub mod history;

pub use burst::BurstDetector;
pub use controller::{SessionController, SessionEvent, TransitionStyle};
pub use engine::{Engine, Mode};
pub use history::{History, ShuffleState};
