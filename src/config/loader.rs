//! Configuration loading from disk and environment.

use std::path::Path;
use std::fs;
use crate::config::schema::ChannelConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Environment variables that override file values.
pub const ENV_PUSH_URL: &str = "LIVE_CHANNEL_PUSH_URL";
pub const ENV_POLL_URL: &str = "LIVE_CHANNEL_POLL_URL";
pub const ENV_REPORT_URL: &str = "LIVE_CHANNEL_REPORT_URL";
pub const ENV_SAMPLE_RATE: &str = "LIVE_CHANNEL_SAMPLE_RATE";
pub const ENV_LOG_LEVEL: &str = "LIVE_CHANNEL_LOG_LEVEL";

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Env { var: &'static str, message: String },
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Env { var, message } => write!(f, "Invalid {}: {}", var, message),
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 { write!(f, ", ")?; }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Load, apply environment overrides, and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ChannelConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    let mut config: ChannelConfig = toml::from_str(&content).map_err(ConfigError::Parse)?;

    apply_env_overrides(&mut config, |var| std::env::var(var).ok())?;
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Defaults plus environment overrides, for running without a file.
pub fn load_from_env() -> Result<ChannelConfig, ConfigError> {
    let mut config = ChannelConfig::default();
    apply_env_overrides(&mut config, |var| std::env::var(var).ok())?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Apply overrides from `lookup` (normally the process environment).
pub fn apply_env_overrides<F>(config: &mut ChannelConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(url) = lookup(ENV_PUSH_URL) {
        config.connection.push_url = url;
    }
    if let Some(url) = lookup(ENV_POLL_URL) {
        config.connection.poll_url = url;
    }
    if let Some(url) = lookup(ENV_REPORT_URL) {
        config.telemetry.report_url = (!url.is_empty()).then_some(url);
    }
    if let Some(rate) = lookup(ENV_SAMPLE_RATE) {
        config.telemetry.sample_rate = rate.parse().map_err(|e: std::num::ParseFloatError| {
            ConfigError::Env { var: ENV_SAMPLE_RATE, message: e.to_string() }
        })?;
    }
    if let Some(level) = lookup(ENV_LOG_LEVEL) {
        config.observability.log_level = level;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_PUSH_URL, "wss://stream.example.com/feed"),
            (ENV_SAMPLE_RATE, "0.5"),
            (ENV_REPORT_URL, "https://collector.example.com/batch"),
        ]
        .into_iter()
        .collect();

        let mut config = ChannelConfig::default();
        apply_env_overrides(&mut config, |var| env.get(var).map(|v| v.to_string())).unwrap();

        assert_eq!(config.connection.push_url, "wss://stream.example.com/feed");
        assert_eq!(config.telemetry.sample_rate, 0.5);
        assert_eq!(
            config.telemetry.report_url.as_deref(),
            Some("https://collector.example.com/batch")
        );
        assert_eq!(config.connection.poll_url, ChannelConfig::default().connection.poll_url);
    }

    #[test]
    fn test_bad_env_value() {
        let mut config = ChannelConfig::default();
        let err = apply_env_overrides(&mut config, |var| {
            (var == ENV_SAMPLE_RATE).then(|| "lots".to_string())
        })
        .unwrap_err();
        assert!(err.to_string().contains(ENV_SAMPLE_RATE));
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let path = std::env::temp_dir().join(format!("live-channel-{}.toml", uuid::Uuid::new_v4()));
        fs::write(&path, "[telemetry]\nsample_rate = 3.0\n").unwrap();

        let result = load_config(&path);
        std::fs::remove_file(&path).unwrap_or_default();

        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_load_missing_file() {
        let result = load_config(Path::new("/definitely/not/here.toml"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }
}
