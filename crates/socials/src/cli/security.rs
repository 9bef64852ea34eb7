//! Security command handlers.

use anyhow::{Context, bail};
use socials::{SocialsConfig, extract_hashtags};
use socials_security::{ContentModerator, EncryptionManager, InputValidator};
use tracing::{info, instrument};

/// Handles the check-config command.
pub fn handle_check_config(config: &SocialsConfig) -> anyhow::Result<()> {
    config.validate()?;
    info!("Configuration is valid");
    println!("{}", serde_json::to_string_pretty(&config.summary())?);
    Ok(())
}

/// Handles the validate command. Exits non-zero when the value is rejected.
#[instrument(skip(value))]
pub fn handle_validate(rule: &str, value: &str) -> anyhow::Result<()> {
    let validator = InputValidator::new()?;
    let outcome = validator.validate(value, rule);
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    if !*outcome.valid() {
        std::process::exit(1);
    }
    Ok(())
}

/// Handles the moderate command. Exits non-zero when the text is unsafe.
#[instrument(skip(text))]
pub fn handle_moderate(text: &str, hashtags: bool) -> anyhow::Result<()> {
    let moderator = ContentModerator::new();
    let mut safe = true;

    let result = moderator.moderate_text(text, Some("cli"));
    safe &= *result.is_safe();
    println!("{}", serde_json::to_string_pretty(&result)?);

    if hashtags {
        let tags = extract_hashtags(text);
        let result = moderator.moderate_hashtags(&tags);
        safe &= *result.is_safe();
        println!("{}", serde_json::to_string_pretty(&result)?);
    }

    if !safe {
        std::process::exit(1);
    }
    Ok(())
}

/// Handles the keygen command.
pub fn handle_keygen(password: Option<&str>, salt: Option<&str>) -> anyhow::Result<()> {
    match password {
        Some(password) => {
            let salt = salt
                .map(hex::decode)
                .transpose()
                .context("Salt must be hex encoded")?;
            let derived = EncryptionManager::derive_key_from_password(password, salt.as_deref());
            println!("key:  {}", derived.key());
            println!("salt: {}", derived.salt());
        }
        None => println!("{}", EncryptionManager::generate_key()),
    }
    Ok(())
}

fn configured_manager(config: &SocialsConfig) -> anyhow::Result<EncryptionManager> {
    if config.security().encryption_key().is_none() {
        bail!("security.encryption_key is not set; generate one with `socials keygen`");
    }
    Ok(config.encryption_manager()?)
}

/// Handles the encrypt command.
#[instrument(skip_all)]
pub fn handle_encrypt(config: &SocialsConfig, text: &str) -> anyhow::Result<()> {
    let manager = configured_manager(config)?;
    println!("{}", manager.encrypt(text)?);
    Ok(())
}

/// Handles the decrypt command.
#[instrument(skip_all)]
pub fn handle_decrypt(config: &SocialsConfig, ciphertext: &str) -> anyhow::Result<()> {
    let manager = configured_manager(config)?;
    println!("{}", manager.decrypt(ciphertext)?);
    Ok(())
}

/// Handles the hash command. With `verify`, exits non-zero on mismatch.
#[instrument(skip_all)]
pub fn handle_hash(data: &str, salt: Option<&str>, verify: Option<&str>) -> anyhow::Result<()> {
    if let (Some(expected), Some(salt)) = (verify, salt) {
        let matches = EncryptionManager::verify_hash(data, expected, salt);
        println!("{}", if matches { "match" } else { "mismatch" });
        if !matches {
            std::process::exit(1);
        }
        return Ok(());
    }

    let hashed = EncryptionManager::hash_data(data, salt);
    println!("{}", serde_json::to_string_pretty(&hashed)?);
    Ok(())
}
