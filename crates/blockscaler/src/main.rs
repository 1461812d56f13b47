use anyhow::Result;
use blockscaler::cmd::run_daemon;
use blockscaler::cmd::run_driver;
use blockscaler::cmd::run_render_job;
use blockscaler::config::Cli;
use blockscaler::config::Commands;
use clap::Parser;

/// Sets up global panic hooks.
fn setup_global_hooks() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        default_hook(panic_info);
        tracing::error!("Thread panicked: {}", panic_info);
    }));
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_global_hooks();

    let cli = Cli::parse();

    match cli.command {
        Commands::Daemon(daemon_args) => run_daemon(*daemon_args).await,
        Commands::Driver(driver_args) => run_driver(driver_args),
        Commands::RenderJob(command) => run_render_job(command),
    }
}
