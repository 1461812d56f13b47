//! Command layer - entry points of the subcommands

pub mod daemon;
pub mod driver;
pub mod render_job;

pub use daemon::run_daemon;
pub use driver::run_driver;
pub use render_job::run_render_job;
