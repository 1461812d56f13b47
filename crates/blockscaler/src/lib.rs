pub mod api;
pub mod app;
pub mod cmd;
pub mod config;
pub mod drivers;
pub mod gate;
pub mod jobs;
pub mod logging;
pub mod metrics;
pub mod monitor;
pub mod mutator;
pub mod platform;
pub mod quantity;
pub mod reconciler;
