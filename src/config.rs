//! Instance configuration parsing and validation.
//!
//! One bridge process serves exactly one agent instance, so a single
//! [`BridgeConfig`] describes everything: the instance name (which also
//! names the socket), the agent entrypoint, and stream limits.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::acp::spawner::SpawnConfig;
use crate::{AppError, Result};

/// Environment variables that switch on debug logging.
pub const DEBUG_ENV_VARS: &[&str] = &["CALL_DEBUG", "ACP_BRIDGE_DEBUG"];

fn default_instance_name() -> String {
    "acp".into()
}

fn default_socket_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_command() -> Vec<String> {
    vec!["uv".into(), "run".into(), "fast-agent".into()]
}

fn default_startup_timeout() -> u64 {
    60
}

fn default_stream_limit() -> usize {
    64 * 1024 * 1024
}

fn default_client_line_limit() -> usize {
    1_048_576
}

/// Agent subprocess entrypoint.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct AgentConfig {
    /// Program followed by its leading arguments (e.g. `["uv", "run", "fast-agent"]`).
    #[serde(default = "default_command")]
    pub command: Vec<String>,
    /// Optional agent card; when set the fast-agent `serve` arguments are appended.
    #[serde(default)]
    pub card: Option<PathBuf>,
    /// Working directory for the subprocess. Defaults to the card's parent.
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    /// Time allowed for the `initialize` handshake after spawning.
    #[serde(default = "default_startup_timeout")]
    pub startup_timeout_seconds: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: default_command(),
            card: None,
            cwd: None,
            startup_timeout_seconds: default_startup_timeout(),
        }
    }
}

/// Bridge configuration parsed from `config.toml` and CLI overrides.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct BridgeConfig {
    /// Instance name; the socket is `<socket_root>/<instance_name>.sock`.
    #[serde(default = "default_instance_name")]
    pub instance_name: String,
    /// Directory holding the instance socket.
    #[serde(default = "default_socket_root")]
    pub socket_root: PathBuf,
    /// Agent subprocess entrypoint.
    #[serde(default)]
    pub agent: AgentConfig,
    /// Maximum bytes per line read from the agent's stdout.
    #[serde(default = "default_stream_limit")]
    pub stream_limit_bytes: usize,
    /// Maximum bytes per line read from a socket client.
    #[serde(default = "default_client_line_limit")]
    pub client_line_limit_bytes: usize,
    /// Emit debug-level logs for the bridge.
    #[serde(default)]
    pub debug: bool,
}

impl BridgeConfig {
    /// Default configuration for the named instance.
    #[must_use]
    pub fn new(instance_name: impl Into<String>) -> Self {
        Self {
            instance_name: instance_name.into(),
            socket_root: default_socket_root(),
            agent: AgentConfig::default(),
            stream_limit_bytes: default_stream_limit(),
            client_line_limit_bytes: default_client_line_limit(),
            debug: false,
        }
    }

    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and validate it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Turn on debug logging when any of [`DEBUG_ENV_VARS`] is truthy.
    pub fn apply_env(&mut self) {
        if DEBUG_ENV_VARS
            .iter()
            .filter_map(|key| env::var(key).ok())
            .any(|value| is_truthy(&value))
        {
            self.debug = true;
        }
    }

    /// Path of the instance socket.
    #[must_use]
    pub fn socket_path(&self) -> PathBuf {
        self.socket_root
            .join(format!("{}.sock", self.instance_name))
    }

    /// Working directory for the agent subprocess.
    #[must_use]
    pub fn working_dir(&self) -> PathBuf {
        if let Some(ref cwd) = self.agent.cwd {
            return cwd.clone();
        }
        self.agent
            .card
            .as_ref()
            .and_then(|card| card.parent())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
    }

    /// Handshake deadline for a freshly spawned agent.
    #[must_use]
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.agent.startup_timeout_seconds)
    }

    /// Build the spawn configuration for the agent subprocess.
    ///
    /// With a card configured, `serve --transport acp --instance-scope
    /// connection --card <card>` is appended to the command.
    #[must_use]
    pub fn spawn_config(&self) -> SpawnConfig {
        let mut parts = self.agent.command.iter();
        let program = parts.next().cloned().unwrap_or_default();
        let mut args: Vec<String> = parts.cloned().collect();

        if let Some(ref card) = self.agent.card {
            args.extend(
                ["serve", "--transport", "acp", "--instance-scope", "connection", "--card"]
                    .iter()
                    .map(|s| (*s).to_owned()),
            );
            args.push(card.to_string_lossy().into_owned());
        }

        SpawnConfig {
            program,
            args,
            cwd: self.working_dir(),
        }
    }

    /// Validate the configuration and canonicalize agent paths.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` describing the first invalid field.
    pub fn validate(&mut self) -> Result<()> {
        let name = self.instance_name.trim();
        if name.is_empty() {
            return Err(AppError::Config("instance_name must not be empty".into()));
        }
        if name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(AppError::Config(format!(
                "instance_name must not contain path separators: {name}"
            )));
        }

        if self.agent.command.first().map_or(true, |p| p.trim().is_empty()) {
            return Err(AppError::Config("agent.command must not be empty".into()));
        }

        if self.stream_limit_bytes == 0 || self.client_line_limit_bytes == 0 {
            return Err(AppError::Config("line limits must be greater than zero".into()));
        }

        if self.agent.startup_timeout_seconds == 0 {
            return Err(AppError::Config(
                "agent.startup_timeout_seconds must be greater than zero".into(),
            ));
        }

        if let Some(ref card) = self.agent.card {
            let canonical = card.canonicalize().map_err(|err| {
                AppError::Config(format!("agent card path not found: {}: {err}", card.display()))
            })?;
            self.agent.card = Some(canonical);
        }

        if let Some(ref cwd) = self.agent.cwd {
            let canonical = cwd.canonicalize().map_err(|err| {
                AppError::Config(format!("server cwd not found: {}: {err}", cwd.display()))
            })?;
            self.agent.cwd = Some(canonical);
        }

        Ok(())
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
