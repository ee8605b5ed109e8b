use std::path::{Path, PathBuf};
use std::time::Duration;
use serde::Deserialize;
use anyhow::{Context, Result};
use shared::protocol::LOG_WINDOW_SECS;
use shared::types::ServiceDescriptor;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub discord: DiscordConfig,
    pub server_name: String,
    /// Webhook that receives forwarded log excerpts; relaying is off when unset
    pub log_relay_url: Option<String>,
    pub interactions_listen: String,
    pub runtime: RuntimeConfig,
    pub services: Vec<ServiceConfig>,
}

#[derive(Debug, Clone)]
pub struct DiscordConfig {
    pub token: String,
    pub application_id: String,
    /// Hex encoded Ed25519 key interaction requests are signed with
    pub public_key: String,
    pub channel_id: String,
    pub channel_id_2: Option<String>,
}

/// Optional TOML file describing how to reach the container runtime.
#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeFile {
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default = "default_services")]
    pub services: Vec<ServiceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_docker_bin")]
    pub docker_bin: String,
    /// Directory the compose project lives in
    #[serde(default = "default_project_dir")]
    pub project_dir: PathBuf,
    #[serde(default = "default_project_name")]
    pub project_name: String,
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServiceConfig {
    pub label: String,
    pub container: String,
}

fn default_docker_bin() -> String {
    "docker".to_string()
}

fn default_project_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_project_name() -> String {
    "hll-geofences-midcap".to_string()
}

fn default_command_timeout() -> u64 {
    30
}

fn default_services() -> Vec<ServiceConfig> {
    vec![
        ServiceConfig {
            label: "midcap".to_string(),
            container: "hll-geofences-midcap".to_string(),
        },
        ServiceConfig {
            label: "lastcap".to_string(),
            container: "hll-geofences-lastcap".to_string(),
        },
    ]
}

fn default_interactions_listen() -> String {
    "[::]:8080".to_string()
}

fn default_config_path() -> String {
    "./seeding.toml".to_string()
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            docker_bin: default_docker_bin(),
            project_dir: default_project_dir(),
            project_name: default_project_name(),
            command_timeout_secs: default_command_timeout(),
        }
    }
}

impl RuntimeConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

impl RuntimeFile {
    /// Load the runtime file; a missing file means all defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!("No runtime config at {}, using defaults", path.display());
            return Ok(Self {
                runtime: RuntimeConfig::default(),
                services: default_services(),
            });
        }

        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let file: RuntimeFile = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(file)
    }
}

impl Config {
    /// Build configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable lookup. Required
    /// identity fields are checked before anything is read from disk.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let require = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));

        let discord = DiscordConfig {
            token: require("DISCORD_TOKEN")?,
            application_id: require("DISCORD_APPLICATION_ID")?,
            public_key: require("APPLICATION_PUBLIC_KEY")?,
            channel_id: require("CHANNEL_ID")?,
            channel_id_2: get("CHANNEL_ID_2"),
        };
        let server_name = require("SERVER_NAME")?;

        if !matches!(hex::decode(&discord.public_key), Ok(bytes) if bytes.len() == 32) {
            return Err(ConfigError::Invalid {
                name: "APPLICATION_PUBLIC_KEY",
                reason: "must be 32 bytes of hex".to_string(),
            }
            .into());
        }

        let log_relay_url = get("LOG_RELAY_URL");
        if let Some(url) = &log_relay_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ConfigError::Invalid {
                    name: "LOG_RELAY_URL",
                    reason: "must be an http(s) URL".to_string(),
                }
                .into());
            }
        }

        let config_path = get("CONFIG_PATH").unwrap_or_else(default_config_path);
        let file = RuntimeFile::load(&config_path)?;
        validate_services(&file.services)?;

        Ok(Self {
            discord,
            server_name,
            log_relay_url,
            interactions_listen: get("INTERACTIONS_LISTEN").unwrap_or_else(default_interactions_listen),
            runtime: file.runtime,
            services: file.services,
        })
    }

    pub fn service_descriptors(&self) -> Vec<ServiceDescriptor> {
        self.services
            .iter()
            .map(|s| ServiceDescriptor {
                label: s.label.clone(),
                name: s.container.clone(),
                log_window: Duration::from_secs(LOG_WINDOW_SECS),
            })
            .collect()
    }
}

fn validate_services(services: &[ServiceConfig]) -> Result<(), ConfigError> {
    if services.is_empty() {
        return Err(ConfigError::Invalid {
            name: "services",
            reason: "at least one service is required".to_string(),
        });
    }
    for (i, service) in services.iter().enumerate() {
        if service.label.trim().is_empty() || service.container.trim().is_empty() {
            return Err(ConfigError::Invalid {
                name: "services",
                reason: format!("entry {} has an empty label or container", i),
            });
        }
        if service.label.chars().any(char::is_whitespace) {
            return Err(ConfigError::Invalid {
                name: "services",
                reason: format!("label {:?} contains whitespace", service.label),
            });
        }
        if services[..i].iter().any(|s| s.label == service.label || s.container == service.container) {
            return Err(ConfigError::Invalid {
                name: "services",
                reason: format!("duplicate service {:?}", service.label),
            });
        }
    }
    Ok(())
}
