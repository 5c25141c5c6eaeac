//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::{Environment, ShieldConfig};
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a TOML file.
///
/// Environment overrides are applied before validation.
pub fn load_config(path: &Path) -> Result<ShieldConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let mut config: ShieldConfig = toml::from_str(&content)?;

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Overlay deployment facts from the environment onto the policy.
pub fn apply_env_overrides<F>(config: &mut ShieldConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let policy = &mut config.policy;

    if let Some(raw) = lookup("SHIELD_ENV") {
        match Environment::parse(&raw) {
            Some(environment) => policy.environment = environment,
            None => tracing::warn!(value = %raw, "Ignoring unknown SHIELD_ENV value"),
        }
    }

    let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(url) = non_empty("APP_URL") {
        policy.app_url = Some(url);
    }
    if let Some(url) = non_empty("SITE_URL") {
        policy.site_url = Some(url);
    }
    if let Some(domain) = non_empty("DEPLOYMENT_DOMAIN") {
        policy.deployment_domain = Some(domain);
    }
    if let Some(origin) = non_empty("DATA_BACKEND_ORIGIN") {
        policy.data_backend_origin = Some(origin);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("SHIELD_ENV", "production"),
            ("APP_URL", "https://app.example.com"),
            ("SITE_URL", "  "),
            ("DATA_BACKEND_ORIGIN", "https://data.example.com"),
        ]
        .into_iter()
        .collect();

        let mut config = ShieldConfig::default();
        apply_env_overrides(&mut config, |key| env.get(key).map(|v| v.to_string()));

        assert!(config.policy.is_production());
        assert_eq!(config.policy.app_url.as_deref(), Some("https://app.example.com"));
        assert_eq!(config.policy.site_url, None);
        assert_eq!(
            config.policy.data_backend_origin.as_deref(),
            Some("https://data.example.com")
        );
    }

    #[test]
    fn test_unknown_environment_is_ignored() {
        let mut config = ShieldConfig::default();
        apply_env_overrides(&mut config, |key| {
            (key == "SHIELD_ENV").then(|| "staging".to_string())
        });
        assert!(!config.policy.is_production());
    }

    #[test]
    fn test_load_reports_every_problem() {
        let path = std::env::temp_dir().join(format!("shield-{}.toml", uuid::Uuid::new_v4()));
        let mut file = fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
            [listener]
            bind_address = "not-an-address"

            [policy]
            default_redirect = "https://elsewhere"
            "#
        )
        .unwrap();

        let err = load_config(&path).unwrap_err();
        fs::remove_file(&path).unwrap();

        match err {
            ConfigError::Validation(errors) => assert_eq!(errors.len(), 2),
            other => panic!("expected validation error, got {other}"),
        }
    }

    #[test]
    fn test_missing_file() {
        let err = load_config(Path::new("/nonexistent/shield.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
