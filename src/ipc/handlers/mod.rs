pub mod analytics;
pub mod attendance;
pub mod classes;
pub mod core;
pub mod credentials;
pub mod slots;
