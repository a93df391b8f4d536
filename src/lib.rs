pub mod analytics;
pub mod attendance;
pub mod clock;
pub mod config;
pub mod credentials;
pub mod db;
pub mod engine;
pub mod error;
pub mod ipc;
pub mod model;
mod roster;
pub mod slots;

pub use engine::Engine;
pub use error::{AttendanceError, AttendanceResult};
