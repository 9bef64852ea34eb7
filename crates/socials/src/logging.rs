//! Tracing subscriber setup for the binary.

use crate::LoggingSettings;
use socials_error::ConfigError;
use tracing_subscriber::EnvFilter;

/// Filter directive: `RUST_LOG` when set, otherwise the configured level.
pub fn filter_directive(settings: &LoggingSettings, rust_log: Option<String>) -> String {
    rust_log
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| settings.level().clone())
}

/// Install the global subscriber. Call once, before any other work.
pub fn init_tracing(settings: &LoggingSettings) -> Result<(), ConfigError> {
    let directive = filter_directive(settings, std::env::var(EnvFilter::DEFAULT_ENV).ok());
    let filter = EnvFilter::try_new(&directive).map_err(|e| {
        ConfigError::for_key("logging.level", format!("Invalid filter '{}': {}", directive, e))
    })?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let installed = if *settings.json() {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| ConfigError::new(format!("Failed to install subscriber: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rust_log_overrides_configured_level() {
        let settings = LoggingSettings::default();
        assert_eq!(filter_directive(&settings, None), "info");
        assert_eq!(
            filter_directive(&settings, Some("socials=debug".to_string())),
            "socials=debug"
        );
        assert_eq!(filter_directive(&settings, Some("  ".to_string())), "info");
    }
}
