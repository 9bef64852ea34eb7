//! Command-line interface module.
//!
//! This module provides the CLI structure and command handlers for the socials binary.

mod commands;
mod jobs;
mod security;

pub use commands::{Cli, Commands, JobsCommand};
pub use jobs::handle_jobs_command;
pub use security::{
    handle_check_config, handle_decrypt, handle_encrypt, handle_hash, handle_keygen,
    handle_moderate, handle_validate,
};

use socials::SocialsConfig;

/// Run one command against the loaded configuration.
pub async fn dispatch(command: Commands, config: &SocialsConfig) -> anyhow::Result<()> {
    match command {
        Commands::CheckConfig => handle_check_config(config),
        Commands::Validate { rule, value } => handle_validate(&rule, &value),
        Commands::Moderate { text, hashtags } => handle_moderate(&text, hashtags),
        Commands::Keygen { password, salt } => handle_keygen(password.as_deref(), salt.as_deref()),
        Commands::Encrypt { text } => handle_encrypt(config, &text),
        Commands::Decrypt { ciphertext } => handle_decrypt(config, &ciphertext),
        Commands::Hash { data, salt, verify } => {
            handle_hash(&data, salt.as_deref(), verify.as_deref())
        }
        Commands::Jobs { command } => handle_jobs_command(config, command).await,
    }
}
