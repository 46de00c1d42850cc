//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::DispatchConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<DispatchConfig, ConfigError> {
    let config: DispatchConfig = toml::from_str(content)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<DispatchConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("dispatch-config-{}.toml", uuid::Uuid::new_v4()));
        fs::write(
            &path,
            r#"
            [[apis]]
            id = "a"
            endpoint_group = "g"

            [[endpoint_groups]]
            name = "g"
            "#,
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.apis[0].id, "a");
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_errors() {
        assert!(matches!(load_config(Path::new("/nonexistent/dispatch.toml")), Err(ConfigError::Io(_))));
        assert!(matches!(parse_config("apis = 3"), Err(ConfigError::Parse(_))));

        let err = parse_config("[[apis]]\nid = \"a\"\nendpoint_group = \"missing\"").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(ref errors) if errors.len() == 1));
        assert!(err.to_string().contains("missing"));
    }
}
