//! Command-line argument definitions.

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use socials_scheduler::JobType;
use std::path::PathBuf;

/// Gated AI content generation and Instagram publishing.
#[derive(Parser, Debug)]
#[command(name = "socials")]
#[command(about = "Gated AI content generation and Instagram publishing")]
#[command(version)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, global = true, env = "SOCIALS_CONFIG", default_value = "socials.toml")]
    pub config: PathBuf,

    /// Command to run
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Load and validate the configuration, then print a summary
    CheckConfig,

    /// Validate a value against a named rule
    Validate {
        /// Rule name, such as prompt, hashtag or filename
        #[arg(long)]
        rule: String,
        /// Value to check
        #[arg(long)]
        value: String,
    },

    /// Screen text with the content moderator
    Moderate {
        /// Caption or prompt text
        #[arg(long)]
        text: String,
        /// Treat words starting with # as hashtags and screen them too
        #[arg(long)]
        hashtags: bool,
    },

    /// Generate an encryption key
    Keygen {
        /// Derive the key from a password instead of generating it
        #[arg(long, env = "SOCIALS_KEY_PASSWORD", hide_env_values = true)]
        password: Option<String>,
        /// Hex salt for password derivation; generated when omitted
        #[arg(long, requires = "password")]
        salt: Option<String>,
    },

    /// Encrypt text with the configured key
    Encrypt {
        /// Plaintext
        #[arg(long)]
        text: String,
    },

    /// Decrypt text with the configured key
    Decrypt {
        /// Ciphertext produced by `encrypt`
        #[arg(long)]
        ciphertext: String,
    },

    /// Hash a value, or verify it against a hash
    Hash {
        /// Value to hash
        #[arg(long)]
        data: String,
        /// Salt; generated when omitted
        #[arg(long)]
        salt: Option<String>,
        /// Expected hash; requires --salt
        #[arg(long, requires = "salt")]
        verify: Option<String>,
    },

    /// Manage scheduled jobs
    Jobs {
        /// Job command
        #[command(subcommand)]
        command: JobsCommand,
    },
}

/// Job management commands. They edit the persisted job table; jobs run in
/// an application serving that table with its own collaborators.
#[derive(Subcommand, Debug)]
pub enum JobsCommand {
    /// List jobs
    List {
        /// Only jobs of this type
        #[arg(long)]
        job_type: Option<JobType>,
    },

    /// Remove a job
    Remove {
        /// Job identifier
        id: String,
    },

    /// Pause a job
    Pause {
        /// Job identifier
        id: String,
    },

    /// Resume a paused job
    Resume {
        /// Job identifier
        id: String,
    },

    /// Schedule recurring content generation
    AddGeneration {
        /// Image prompt
        #[arg(long)]
        prompt: String,
        /// Hours between runs; defaults to the configured interval
        #[arg(long, conflicts_with = "cron")]
        interval_hours: Option<u64>,
        /// Cron expression with seconds first, such as "0 0 9 * * * *"
        #[arg(long)]
        cron: Option<String>,
        /// Caption style; defaults to the configured style
        #[arg(long)]
        style: Option<String>,
        /// Content theme
        #[arg(long)]
        theme: Option<String>,
    },

    /// Schedule a one-time post
    AddPublish {
        /// Image to post
        #[arg(long)]
        image_path: String,
        /// Caption
        #[arg(long)]
        caption: String,
        /// RFC 3339 publish time, such as 2026-11-01T09:00:00Z
        #[arg(long)]
        at: DateTime<Utc>,
    },

    /// Show the most recently run jobs
    History {
        /// Entries to show
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_job_commands() {
        let cli = Cli::try_parse_from([
            "socials",
            "--config",
            "custom.toml",
            "jobs",
            "list",
            "--job-type",
            "content_generation",
        ])
        .unwrap();
        assert_eq!(cli.config, PathBuf::from("custom.toml"));
        assert!(matches!(
            cli.command,
            Commands::Jobs {
                command: JobsCommand::List {
                    job_type: Some(JobType::ContentGeneration)
                }
            }
        ));

        let cli = Cli::try_parse_from([
            "socials",
            "jobs",
            "add-publish",
            "--image-path",
            "dog.png",
            "--caption",
            "Golden hour",
            "--at",
            "2026-11-01T09:00:00Z",
        ])
        .unwrap();
        let Commands::Jobs {
            command: JobsCommand::AddPublish { at, .. },
        } = cli.command
        else {
            panic!("expected add-publish");
        };
        assert_eq!(at.to_rfc3339(), "2026-11-01T09:00:00+00:00");
    }

    #[test]
    fn test_conflicting_triggers_rejected() {
        let result = Cli::try_parse_from([
            "socials",
            "jobs",
            "add-generation",
            "--prompt",
            "a quiet harbor",
            "--interval-hours",
            "6",
            "--cron",
            "0 0 9 * * * *",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_verify_requires_salt() {
        let result = Cli::try_parse_from(["socials", "hash", "--data", "x", "--verify", "abc"]);
        assert!(result.is_err());
    }
}
