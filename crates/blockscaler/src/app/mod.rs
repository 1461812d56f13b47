//! Application module
//!
//! Wiring and lifecycle of the daemon: the builder creates the services, the
//! task manager runs them until a shutdown signal arrives.

pub mod builder;
pub mod core;
pub mod services;
pub mod tasks;

pub use builder::ApplicationBuilder;
pub use core::Application;
pub use services::ApplicationServices;
