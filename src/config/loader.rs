//! Configuration loading from disk.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::CascadeConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Environment variable overriding `breaker.open_timeout_secs`.
pub const ENV_OPEN_TIMEOUT: &str = "CB_TIMEOUT";
/// Environment variable overriding `breaker.failure_threshold`.
pub const ENV_FAILURE_THRESHOLD: &str = "CB_MAX_CONSECUTIVE_FAILURES";
/// Environment variable overriding `broker.consumer_group`.
pub const ENV_CONSUMER_GROUP: &str = "CB_CONSUMER_GROUP";

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {name}: '{value}'")]
    Env { name: &'static str, value: String },

    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a TOML file.
///
/// A missing file yields the defaults. Environment overrides are applied
/// before validation.
pub fn load_config(path: &Path) -> Result<CascadeConfig, ConfigError> {
    let mut config = match fs::read_to_string(path) {
        Ok(content) => toml::from_str(&content)?,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            tracing::warn!(path = %path.display(), "Config file not found, using defaults");
            CascadeConfig::default()
        }
        Err(e) => return Err(ConfigError::Io(e)),
    };

    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Apply `CB_TIMEOUT`, `CB_MAX_CONSECUTIVE_FAILURES` and `CB_CONSUMER_GROUP`
/// through `lookup`.
pub fn apply_env_overrides<F>(config: &mut CascadeConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup(ENV_OPEN_TIMEOUT) {
        config.breaker.open_timeout_secs = value.trim().parse().map_err(|_| ConfigError::Env {
            name: ENV_OPEN_TIMEOUT,
            value: value.clone(),
        })?;
    }
    if let Some(value) = lookup(ENV_FAILURE_THRESHOLD) {
        config.breaker.failure_threshold = value.trim().parse().map_err(|_| ConfigError::Env {
            name: ENV_FAILURE_THRESHOLD,
            value: value.clone(),
        })?;
    }
    if let Some(value) = lookup(ENV_CONSUMER_GROUP).filter(|v| !v.trim().is_empty()) {
        config.broker.consumer_group = value.trim().to_string();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::BackendKind;
    use std::io::Write;

    #[test]
    fn test_load_full_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[listener]
bind_address = "127.0.0.1:7000"

[breaker]
failure_threshold = 3
open_timeout_secs = 30

[store]
backend = "redis"
url = "redis://127.0.0.1:6666/0"

[[alternative_endpoints]]
endpoint = "http://a/x"
method = "GET"
alternatives = [{{ endpoint = "http://alt/x", method = "GET" }}]

[[exceptions]]
endpoint = "http://c/z"
method = "POST"
"#
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.listener.bind_address, "127.0.0.1:7000");
        assert_eq!(config.breaker.failure_threshold, 3);
        assert_eq!(config.breaker.open_timeout_secs, 30);
        assert_eq!(config.store.backend, BackendKind::Redis);
        assert_eq!(config.broker.backend, BackendKind::Memory);
        assert_eq!(config.alternative_endpoints[0].alternatives.len(), 1);
        assert_eq!(config.exceptions.len(), 1);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.breaker.failure_threshold, 5);
        assert_eq!(config.breaker.open_timeout_secs, 60);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[breaker]\nfailure_threshold = 0\n").unwrap();
        assert!(matches!(
            load_config(file.path()),
            Err(ConfigError::Validation(_))
        ));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[breaker\n").unwrap();
        assert!(matches!(load_config(file.path()), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = CascadeConfig::default();
        apply_env_overrides(&mut config, |name| match name {
            ENV_OPEN_TIMEOUT => Some("15".to_string()),
            ENV_FAILURE_THRESHOLD => Some(" 2 ".to_string()),
            ENV_CONSUMER_GROUP => Some("instance-a".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(config.breaker.open_timeout_secs, 15);
        assert_eq!(config.breaker.failure_threshold, 2);
        assert_eq!(config.broker.consumer_group, "instance-a");

        let err = apply_env_overrides(&mut config, |name| {
            (name == ENV_OPEN_TIMEOUT).then(|| "soon".to_string())
        })
        .unwrap_err();
        assert!(matches!(err, ConfigError::Env { name: ENV_OPEN_TIMEOUT, .. }));
    }
}
