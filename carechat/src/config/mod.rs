//! Configuration for the `CareChat` client.
//!
//! Layered, highest priority first:
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/carechat/config.toml`)
//! 4. Compiled defaults
//!
//! A missing default config file is not an error. An explicit `--config`
//! path that cannot be read is.

use std::path::{Path, PathBuf};
use std::time::Duration;

use carechat_proto::participant::{Participant, RawParticipant, Role};
use chrono::format::{Item, StrftimeItems};

use crate::buffer::DEFAULT_MAX_DUPLICATE_TRACKING;
use crate::scope::ScopeConfig;
use crate::session::{AuthToken, Session};

/// Errors that can occur when loading configuration.
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

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    network: NetworkFileConfig,
    session: SessionFileConfig,
    chat: ChatFileConfig,
}

/// `[network]` section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct NetworkFileConfig {
    relay_url: Option<String>,
    history_url: Option<String>,
    connect_timeout_secs: Option<u64>,
    auth_timeout_secs: Option<u64>,
    history_timeout_secs: Option<u64>,
    channel_capacity: Option<usize>,
}

/// `[session]` section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct SessionFileConfig {
    token: Option<String>,
    participant_id: Option<String>,
    role: Option<Role>,
    name: Option<String>,
}

/// `[chat]` section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ChatFileConfig {
    max_duplicate_tracking: Option<usize>,
    timestamp_format: Option<String>,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // -- Network --
    /// Relay WebSocket URL.
    pub relay_url: Option<String>,
    /// Base URL of the history endpoint. Derived from `relay_url` when unset.
    pub history_url: Option<String>,
    /// Timeout for opening the WebSocket.
    pub connect_timeout: Duration,
    /// Timeout for the connect-time authentication reply.
    pub auth_timeout: Duration,
    /// Timeout for one history request.
    pub history_timeout: Duration,
    /// Capacity of the live inbound queue.
    pub channel_capacity: usize,

    // -- Session --
    /// Bearer token.
    pub token: Option<String>,
    /// Local participant identifier.
    pub participant_id: Option<String>,
    /// Local participant role.
    pub role: Role,
    /// Local display name.
    pub name: String,

    // -- Chat --
    /// Partner to select at startup.
    pub partner: Option<RawParticipant>,
    /// Number of message keys remembered for duplicate detection.
    pub max_duplicate_tracking: usize,
    /// Timestamp display format (chrono).
    pub timestamp_format: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            relay_url: None,
            history_url: None,
            connect_timeout: Duration::from_secs(10),
            auth_timeout: Duration::from_secs(5),
            history_timeout: Duration::from_secs(10),
            channel_capacity: 256,
            token: None,
            participant_id: None,
            role: Role::Client,
            name: String::new(),
            partner: None,
            max_duplicate_tracking: DEFAULT_MAX_DUPLICATE_TRACKING,
            timestamp_format: "%H:%M".to_string(),
        }
    }
}

impl ClientConfig {
    /// Loads configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if an explicit config file cannot be read or
    /// any config file cannot be parsed.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    /// Priority: CLI > file > default.
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Self {
        let defaults = Self::default();

        let partner = cli.partner.clone().map(|id| RawParticipant {
            id: Some(id),
            legacy_id: None,
            role: cli.partner_role.unwrap_or(Role::Counselor),
            name: None,
        });

        Self {
            relay_url: cli
                .relay_url
                .clone()
                .or_else(|| file.network.relay_url.clone()),
            history_url: cli
                .history_url
                .clone()
                .or_else(|| file.network.history_url.clone()),
            connect_timeout: file
                .network
                .connect_timeout_secs
                .map_or(defaults.connect_timeout, Duration::from_secs),
            auth_timeout: file
                .network
                .auth_timeout_secs
                .map_or(defaults.auth_timeout, Duration::from_secs),
            history_timeout: file
                .network
                .history_timeout_secs
                .map_or(defaults.history_timeout, Duration::from_secs),
            channel_capacity: file
                .network
                .channel_capacity
                .unwrap_or(defaults.channel_capacity),
            token: cli.token.clone().or_else(|| file.session.token.clone()),
            participant_id: cli
                .participant_id
                .clone()
                .or_else(|| file.session.participant_id.clone()),
            role: cli.role.or(file.session.role).unwrap_or(defaults.role),
            name: cli
                .name
                .clone()
                .or_else(|| file.session.name.clone())
                .unwrap_or(defaults.name),
            partner,
            max_duplicate_tracking: file
                .chat
                .max_duplicate_tracking
                .unwrap_or(defaults.max_duplicate_tracking),
            timestamp_format: cli
                .timestamp_format
                .clone()
                .or_else(|| file.chat.timestamp_format.clone())
                .filter(|f| {
                    let valid = is_valid_timestamp_format(f);
                    if !valid {
                        tracing::warn!(format = %f, "invalid timestamp format, using default");
                    }
                    valid
                })
                .unwrap_or(defaults.timestamp_format),
        }
    }

    /// Builds the login session, if token and identity are configured.
    #[must_use]
    pub fn session(&self) -> Option<Session> {
        let token = self.token.clone().filter(|t| !t.is_empty())?;
        let id = self.participant_id.clone().filter(|id| !id.trim().is_empty())?;
        Some(Session::new(
            AuthToken::new(token),
            Participant::new(id.trim(), self.role, self.name.clone()),
        ))
    }

    /// The history base URL: explicit, or derived from the relay URL.
    #[must_use]
    pub fn history_base_url(&self) -> Option<String> {
        self.history_url
            .clone()
            .or_else(|| self.relay_url.as_deref().and_then(derive_history_url))
    }

    /// Scope tunables.
    #[must_use]
    pub const fn scope_config(&self) -> ScopeConfig {
        ScopeConfig {
            channel_capacity: self.channel_capacity,
            max_duplicate_tracking: self.max_duplicate_tracking,
        }
    }
}

/// Whether `format` is a strftime pattern chrono can render.
#[must_use]
pub fn is_valid_timestamp_format(format: &str) -> bool {
    !StrftimeItems::new(format).any(|item| matches!(item, Item::Error))
}

/// Maps `ws://host:port/path` to `http://host:port` (`wss` to `https`).
#[must_use]
pub fn derive_history_url(relay_url: &str) -> Option<String> {
    let mut url = url::Url::parse(relay_url).ok()?;
    let scheme = match url.scheme() {
        "ws" | "http" => "http",
        "wss" | "https" => "https",
        _ => return None,
    };
    url.set_scheme(scheme).ok()?;
    url.set_path("");
    url.set_query(None);
    url.set_fragment(None);
    Some(url.as_str().trim_end_matches('/').to_string())
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Two-party support chat client")]
pub struct CliArgs {
    /// WebSocket URL of the relay.
    #[arg(long, env = "RELAY_URL")]
    pub relay_url: Option<String>,

    /// Base URL of the history endpoint (default: derived from the relay URL).
    #[arg(long, env = "HISTORY_URL")]
    pub history_url: Option<String>,

    /// Session bearer token.
    #[arg(long, env = "CARECHAT_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Your participant identifier.
    #[arg(long, env = "CARECHAT_PARTICIPANT")]
    pub participant_id: Option<String>,

    /// Your role (client, counselor, assistant, admin_observer).
    #[arg(long)]
    pub role: Option<Role>,

    /// Your display name.
    #[arg(long)]
    pub name: Option<String>,

    /// Partner to open at startup.
    #[arg(long)]
    pub partner: Option<String>,

    /// Role of `--partner` (default: counselor).
    #[arg(long)]
    pub partner_role: Option<Role>,

    /// Path to config file (default: `~/.config/carechat/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Timestamp display format (chrono format string).
    #[arg(long)]
    pub timestamp_format: Option<String>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "CARECHAT_LOG")]
    pub log_level: String,

    /// Path to log file (default: `$TMPDIR/carechat.log`).
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

fn load_config_file(explicit_path: Option<&Path>) -> Result<ConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(ConfigFile::default());
        };
        config_dir.join("carechat").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
