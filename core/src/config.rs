use directories::BaseDirs;
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use url::Url;

pub const DEFAULT_BASE_URL: &str = "http://localhost:8081/api";

/// Resolved client configuration: where the Moneta backend lives.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: Url,
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("configuration invalid: {0}")]
    Invalid(String),
}

impl ConfigError {
    pub fn user_message(&self) -> String {
        match self {
            Self::Invalid(detail) => {
                format!("Configuration problem—{detail}. Update moneta.yaml.")
            }
        }
    }
}

impl ClientConfig {
    /// Resolution order: `MONETA_SERVER_URL`, then `moneta.yaml`, then the
    /// built-in default. A missing config file is not an error.
    pub fn load() -> Result<Self, ConfigError> {
        if let Ok(value) = std::env::var("MONETA_SERVER_URL") {
            return Self::from_base_url(&value);
        }
        if let Some(path) = locate_config_file() {
            let contents = fs::read_to_string(&path).map_err(|err| {
                ConfigError::Invalid(format!("failed to read {}: {err}", path.display()))
            })?;
            let config: MonetaConfig = serde_yaml::from_str(&contents)
                .map_err(|err| ConfigError::Invalid(format!("invalid moneta.yaml: {err}")))?;
            if let Some(base_url) = config.server.and_then(|server| server.base_url) {
                return Self::from_base_url(&base_url);
            }
        }
        Self::from_base_url(DEFAULT_BASE_URL)
    }

    pub fn from_base_url(raw: &str) -> Result<Self, ConfigError> {
        let trimmed = raw.trim().trim_end_matches('/');
        let base_url = Url::parse(trimmed)
            .map_err(|err| ConfigError::Invalid(format!("invalid server URL '{raw}': {err}")))?;
        if base_url.scheme() != "http" && base_url.scheme() != "https" {
            return Err(ConfigError::Invalid(format!(
                "server URL '{raw}' must use http or https"
            )));
        }
        Ok(Self { base_url })
    }

    /// Base URL without a trailing slash, ready for path concatenation.
    pub fn base(&self) -> String {
        self.base_url.as_str().trim_end_matches('/').to_string()
    }
}

fn locate_config_file() -> Option<PathBuf> {
    moneta_yaml_candidates()
        .into_iter()
        .find(|path| path.exists())
}

fn moneta_yaml_candidates() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(base) = BaseDirs::new() {
        let config_dir = base.config_dir().join("moneta");
        paths.push(config_dir.join("moneta.yaml"));
        paths.push(config_dir.join("moneta.yml"));
        let home_dir = base.home_dir();
        paths.push(home_dir.join(".moneta").join("moneta.yaml"));
        paths.push(home_dir.join(".moneta").join("moneta.yml"));
    } else {
        paths.push(PathBuf::from("moneta.yaml"));
        paths.push(PathBuf::from("moneta.yml"));
    }
    paths
}

#[derive(Debug, Deserialize)]
struct MonetaConfig {
    server: Option<ServerSection>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerSection {
    #[serde(default)]
    base_url: Option<String>,
}
