use std::path::Path;

use config::{Config, File, FileFormat};
use eyre::{Context, Result};

use crate::config::{models::HubConfig, validation::HubConfigValidator};

/// Load and validate configuration from a file using the config crate.
/// Supports multiple formats: YAML, JSON, TOML, etc.
pub async fn load_config(config_path: &str) -> Result<HubConfig> {
    let hub_config = load_config_sync(config_path)?;

    HubConfigValidator::validate(&hub_config).map_err(|errors| {
        let summary = errors
            .iter()
            .map(|e| format!("  - {e}"))
            .collect::<Vec<_>>()
            .join("\n");
        eyre::eyre!(
            "Configuration {} failed validation with {} error(s):\n{}",
            config_path,
            errors.len(),
            summary
        )
    })?;

    Ok(hub_config)
}

/// Load configuration synchronously
pub fn load_config_sync(config_path: &str) -> Result<HubConfig> {
    let config_path = Path::new(config_path);

    // Determine file format based on extension
    let format = match config_path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => FileFormat::Yaml,
        Some("json") => FileFormat::Json,
        Some("toml") => FileFormat::Toml,
        Some("ini") => FileFormat::Ini,
        _ => FileFormat::Toml, // Default to TOML
    };

    let settings = Config::builder()
        .add_source(File::new(
            config_path
                .to_str()
                .ok_or_else(|| eyre::eyre!("Invalid UTF-8 path: {}", config_path.display()))?,
            format,
        ))
        .build()
        .with_context(|| format!("Failed to build config from {}", config_path.display()))?;

    let hub_config: HubConfig = settings.try_deserialize().with_context(|| {
        format!(
            "Failed to deserialize config from {}",
            config_path.display()
        )
    })?;

    Ok(hub_config)
}

/// Load configuration without validation (used for the validate command, which
/// reports validation findings itself)
pub async fn load_config_unchecked(config_path: &str) -> Result<HubConfig> {
    load_config_sync(config_path)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    #[tokio::test]
    async fn test_load_toml_config() {
        let toml_content = r#"
stats_interval = "15s"

[health_check]
enabled = true
interval = "5s"

[[routes]]
name = "api"
method = "GET"
pattern = "/api/*"
strategy = "round_robin"

[[routes.targets]]
url = "http://backend-1:8080"
weight = 2

[[routes.targets]]
url = "http://backend-2:8080"
"#;

        let mut temp_file = NamedTempFile::with_suffix(".toml").unwrap();
        write!(temp_file, "{}", toml_content).unwrap();

        let config = load_config(temp_file.path().to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(config.stats_interval, "15s");
        assert_eq!(config.routes.len(), 1);
        assert_eq!(config.routes[0].targets.len(), 2);
        assert_eq!(config.routes[0].targets[0].weight, 2);
    }

    #[tokio::test]
    async fn test_load_yaml_config_with_policy() {
        let yaml_content = r#"
routes:
  - name: "api"
    pattern: "/api/*"
    targets:
      - url: "http://backend:8080"
policies:
  - name: "block-internal"
    priority: 100
    conditions:
      - kind: "ip"
        operator: "equals"
        value: "10.0.0.1"
    actions:
      - type: "deny"
        message: "internal address"
"#;

        let mut temp_file = NamedTempFile::with_suffix(".yaml").unwrap();
        write!(temp_file, "{}", yaml_content).unwrap();

        let config = load_config(temp_file.path().to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(config.policies.len(), 1);
        assert_eq!(config.policies[0].priority, 100);
        assert_eq!(config.policies[0].conditions.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let toml_content = r#"
[[routes]]
name = "broken"
pattern = "no-leading-slash"

[[routes.targets]]
url = "not a url"
"#;

        let mut temp_file = NamedTempFile::with_suffix(".toml").unwrap();
        write!(temp_file, "{}", toml_content).unwrap();

        let result = load_config(temp_file.path().to_str().unwrap()).await;
        assert!(result.is_err());
        let unchecked = load_config_unchecked(temp_file.path().to_str().unwrap()).await;
        assert!(unchecked.is_ok());
    }
}
