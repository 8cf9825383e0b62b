//! Configuration for the `CareChat` relay.
//!
//! Priority, highest first:
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/carechat-relay/config.toml`)
//! 4. Compiled defaults
//!
//! Accounts and the assistant come from the file only.

use std::path::PathBuf;

use crate::assistant::{Assistant, AssistantConfig};
use crate::auth::{Account, Directory};
use crate::relay::RelayState;
use crate::store::{ConversationStore, DEFAULT_MAX_HISTORY};

/// Errors that can occur when loading relay configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct RelayConfigFile {
    server: ServerFileConfig,
    accounts: Vec<Account>,
    assistant: Option<AssistantConfig>,
}

/// `[server]` section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    bind_addr: Option<String>,
    max_body_size: Option<usize>,
    max_history_per_conversation: Option<usize>,
}

/// CLI arguments for the relay.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "CareChat relay and history service")]
pub struct RelayCliArgs {
    /// Address to bind to.
    #[arg(short, long, env = "RELAY_ADDR")]
    pub bind: Option<String>,

    /// Path to config file (default: `~/.config/carechat-relay/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Maximum message body size in bytes.
    #[arg(long)]
    pub max_body_size: Option<usize>,

    /// Maximum records kept per conversation.
    #[arg(long)]
    pub max_history: Option<usize>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "CARECHAT_RELAY_LOG")]
    pub log_level: String,
}

/// Fully resolved relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address to bind to (e.g. `0.0.0.0:9000`).
    pub bind_addr: String,
    /// Maximum message body size in bytes.
    pub max_body_size: usize,
    /// Maximum records kept per conversation.
    pub max_history: usize,
    /// Participants allowed to connect.
    pub accounts: Vec<Account>,
    /// Assistant participant, if enabled.
    pub assistant: Option<AssistantConfig>,
    /// Log level filter string.
    pub log_level: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:9000".to_string(),
            max_body_size: carechat_proto::message::MAX_MESSAGE_SIZE,
            max_history: DEFAULT_MAX_HISTORY,
            accounts: Vec::new(),
            assistant: None,
            log_level: "info".to_string(),
        }
    }
}

impl RelayConfig {
    /// Loads configuration by merging CLI args, env vars and the TOML file.
    ///
    /// An explicit `--config` path must exist; the default path may be absent.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the config file cannot be read or parsed.
    pub fn load(cli: &RelayCliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, file))
    }

    fn resolve(cli: &RelayCliArgs, file: RelayConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            bind_addr: cli
                .bind
                .clone()
                .or(file.server.bind_addr)
                .unwrap_or(defaults.bind_addr),
            max_body_size: cli
                .max_body_size
                .or(file.server.max_body_size)
                .unwrap_or(defaults.max_body_size),
            max_history: cli
                .max_history
                .or(file.server.max_history_per_conversation)
                .unwrap_or(defaults.max_history),
            accounts: file.accounts,
            assistant: file.assistant,
            log_level: cli.log_level.clone(),
        }
    }

    /// Builds the shared relay state described by this configuration.
    #[must_use]
    pub fn build_state(&self) -> RelayState {
        RelayState::with_config(
            Directory::new(self.accounts.iter().cloned()),
            ConversationStore::with_max_history(self.max_history),
            self.assistant.clone().map(Assistant::new),
            self.max_body_size,
        )
    }
}

fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<RelayConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(RelayConfigFile::default());
        };
        config_dir.join("carechat-relay").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(RelayConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
