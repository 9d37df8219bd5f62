use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_USER_AGENT: &str = "wikimigrate/0.1";
pub const DEFAULT_APP_HOST: &str = "app.tettra.co";
pub const DEFAULT_STORAGE_HOST: &str = "tettra-production.s3";
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct MigrationConfig {
    #[serde(default)]
    pub source: SourceSection,
    #[serde(default)]
    pub destination: DestinationSection,
    #[serde(default)]
    pub paths: PathsSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct SourceSection {
    pub app_host: Option<String>,
    pub company: Option<String>,
    pub storage_host: Option<String>,
    pub crawl_log: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct DestinationSection {
    pub api_url: Option<String>,
    pub space: Option<String>,
    pub user_agent: Option<String>,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct PathsSection {
    pub data_dir: Option<String>,
    pub images_dir: Option<String>,
}

/// Source wiki settings after env overrides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSettings {
    pub app_host: String,
    pub company: String,
    pub storage_host: String,
}

/// Destination settings after env overrides. Credentials are never part of the config file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationSettings {
    pub api_url: Option<String>,
    pub space: Option<String>,
    pub user_agent: String,
    pub timeout_ms: u64,
}

impl MigrationConfig {
    /// Resolve source settings: env > config > default.
    pub fn source_settings(&self) -> SourceSettings {
        self.source_settings_with_lookup(|key| env::var(key).ok())
    }

    pub fn source_settings_with_lookup<F>(&self, lookup_env: F) -> SourceSettings
    where
        F: Fn(&str) -> Option<String>,
    {
        SourceSettings {
            app_host: pick(
                &lookup_env,
                "TETTRA_APP_HOST",
                self.source.app_host.as_deref(),
            )
            .unwrap_or_else(|| DEFAULT_APP_HOST.to_string()),
            company: pick(&lookup_env, "TETTRA_COMPANY", self.source.company.as_deref())
                .unwrap_or_default(),
            storage_host: pick(
                &lookup_env,
                "TETTRA_STORAGE_HOST",
                self.source.storage_host.as_deref(),
            )
            .unwrap_or_else(|| DEFAULT_STORAGE_HOST.to_string()),
        }
    }

    /// Resolve destination settings: env > config > default.
    pub fn destination_settings(&self) -> DestinationSettings {
        self.destination_settings_with_lookup(|key| env::var(key).ok())
    }

    pub fn destination_settings_with_lookup<F>(&self, lookup_env: F) -> DestinationSettings
    where
        F: Fn(&str) -> Option<String>,
    {
        let timeout_ms = lookup_env("WIKIMIGRATE_HTTP_TIMEOUT_MS")
            .and_then(|value| value.trim().parse::<u64>().ok())
            .or(self.destination.timeout_ms)
            .unwrap_or(DEFAULT_TIMEOUT_MS);
        DestinationSettings {
            api_url: pick(
                &lookup_env,
                "CONFLUENCE_API",
                self.destination.api_url.as_deref(),
            )
            .map(|url| url.trim_end_matches('/').to_string()),
            space: pick(
                &lookup_env,
                "CONFLUENCE_SPACE",
                self.destination.space.as_deref(),
            ),
            user_agent: pick(
                &lookup_env,
                "WIKIMIGRATE_USER_AGENT",
                self.destination.user_agent.as_deref(),
            )
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            timeout_ms,
        }
    }
}

fn pick<F>(lookup_env: &F, key: &str, configured: Option<&str>) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup_env(key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .or_else(|| {
            configured
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        })
}

/// Load and parse a MigrationConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<MigrationConfig> {
    if !config_path.exists() {
        return Ok(MigrationConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: MigrationConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use tempfile::tempdir;

    #[test]
    fn load_config_returns_default_for_missing_file() {
        let config = load_config(Path::new("/nonexistent/config.toml")).expect("load config");
        assert_eq!(config, MigrationConfig::default());
    }

    #[test]
    fn load_config_parses_all_sections() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        fs::write(
            &config_path,
            r#"
[source]
company = "acme"
crawl_log = "logs/crawl.log"

[destination]
api_url = "https://acme.atlassian.net/wiki/rest/api/"
space = "Engineering"
timeout_ms = 5000

[paths]
images_dir = "assets"
"#,
        )
        .expect("write config");

        let config = load_config(&config_path).expect("load config");
        assert_eq!(config.source.company.as_deref(), Some("acme"));
        assert_eq!(config.source.crawl_log.as_deref(), Some("logs/crawl.log"));
        assert_eq!(config.paths.images_dir.as_deref(), Some("assets"));

        let destination = config.destination_settings_with_lookup(|_| None);
        assert_eq!(
            destination.api_url.as_deref(),
            Some("https://acme.atlassian.net/wiki/rest/api")
        );
        assert_eq!(destination.space.as_deref(), Some("Engineering"));
        assert_eq!(destination.timeout_ms, 5000);
        assert_eq!(destination.user_agent, DEFAULT_USER_AGENT);
    }

    #[test]
    fn load_config_returns_error_for_invalid_toml() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        fs::write(&config_path, "[source\ncompany = \"oops\"").expect("write config");
        let error = load_config(&config_path).expect_err("must fail");
        assert!(error.to_string().contains("failed to parse"));
    }

    #[test]
    fn source_defaults_apply_without_config_or_env() {
        let settings = MigrationConfig::default().source_settings_with_lookup(|_| None);
        assert_eq!(settings.app_host, DEFAULT_APP_HOST);
        assert_eq!(settings.storage_host, DEFAULT_STORAGE_HOST);
        assert!(settings.company.is_empty());
    }

    #[test]
    fn env_overrides_config_and_blank_env_is_ignored() {
        let mut config = MigrationConfig::default();
        config.source.company = Some("from-config".to_string());
        config.destination.space = Some("Config Space".to_string());

        let env = HashMap::from([
            ("TETTRA_COMPANY".to_string(), "from-env".to_string()),
            ("CONFLUENCE_SPACE".to_string(), "   ".to_string()),
        ]);
        let source = config.source_settings_with_lookup(|key| env.get(key).cloned());
        let destination = config.destination_settings_with_lookup(|key| env.get(key).cloned());
        assert_eq!(source.company, "from-env");
        assert_eq!(destination.space.as_deref(), Some("Config Space"));
    }
}
