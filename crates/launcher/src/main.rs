#![forbid(unsafe_code)]

mod cli;

use clap::Parser;
use cli::Cli;
use config::Settings;
use monitor::RunController;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_level(true)
        .with_file(false)
        .with_line_number(false);
    tracing_subscriber::registry()
        .with(layer)
        .with(env_filter)
        .init();

    let settings = Settings::default();
    info!(target = %cli.target, args = ?cli.args, "launcher starting");

    let controller = RunController::new(settings, cli.target_argv())?;
    controller.run().await?;

    info!("launcher done");
    Ok(())
}
