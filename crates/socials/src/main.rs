//! socials - command-line entry point.

mod cli;

use clap::Parser;
use cli::{Cli, Commands};
use socials::{SocialsConfig, init_tracing};
use tracing::{debug, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = SocialsConfig::load(Some(cli.config.as_path()))?;
    init_tracing(config.logging())?;
    debug!(config_file = %cli.config.display(), "Configuration loaded");

    // check-config reports validation problems itself
    if !matches!(cli.command, Commands::CheckConfig) {
        config.validate()?;
    }
    info!(environment = %config.environment(), "Starting socials");

    cli::dispatch(cli.command, &config).await
}
