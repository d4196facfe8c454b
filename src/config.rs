use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::agent::{BackendRegistry, CommandBackend, ExecutionConfig, Role};
use crate::orchestration::{FanOutConfig, RoundConfig};
use crate::state::DEFAULT_STATE_DIR;
use crate::{rlog_debug, Error, Result};

/// Per-role overrides; unset fields keep the role default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleOverrides {
    pub timeout_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub retry_delay_ms: Option<u64>,
    pub backend: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// A command-line backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Program and leading arguments; the prompt is appended last.
    pub command: String,
    #[serde(default)]
    pub output_format: OutputFormat,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvergenceConfig {
    #[serde(default = "default_convergence_retries")]
    pub max_retries: u32,
    #[serde(default = "default_round_delay_ms")]
    pub round_delay_ms: u64,
}

fn default_convergence_retries() -> u32 {
    RoundConfig::default().max_retries
}

fn default_round_delay_ms() -> u64 {
    RoundConfig::default().round_delay_ms
}

impl Default for ConvergenceConfig {
    fn default() -> Self {
        Self {
            max_retries: default_convergence_retries(),
            round_delay_ms: default_round_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Config {
    /// Directory under each work dir holding run state.
    pub state_dir: Option<String>,
    #[serde(default)]
    pub roles: BTreeMap<Role, RoleOverrides>,
    #[serde(default)]
    pub scheduler: FanOutConfig,
    #[serde(default)]
    pub convergence: ConvergenceConfig,
    #[serde(default)]
    pub backends: BTreeMap<String, BackendConfig>,
}

impl Config {
    pub fn remedy_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".remedy"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::remedy_dir()?.join("remedy.toml"))
    }

    pub fn effective_state_dir(&self) -> &str {
        self.state_dir.as_deref().unwrap_or(DEFAULT_STATE_DIR)
    }

    /// Role defaults with any configured overrides applied.
    pub fn execution_config(&self, role: Role) -> ExecutionConfig {
        let mut config = role.default_config();
        if let Some(overrides) = self.roles.get(&role) {
            if let Some(timeout_ms) = overrides.timeout_ms {
                config.timeout_ms = timeout_ms;
            }
            if let Some(max_retries) = overrides.max_retries {
                config.max_retries = max_retries;
            }
            if let Some(retry_delay_ms) = overrides.retry_delay_ms {
                config.retry_delay_ms = retry_delay_ms;
            }
            if let Some(backend) = &overrides.backend {
                config.backend = backend.clone();
            }
        }
        config
    }

    pub fn round_config(&self) -> RoundConfig {
        RoundConfig::default()
            .with_max_retries(self.convergence.max_retries)
            .with_round_delay_ms(self.convergence.round_delay_ms)
            .with_fan_out(self.scheduler.clone())
    }

    /// Command backends for every `[backends.<id>]` entry.
    ///
    /// A `~/` prefix on the program is expanded.
    pub fn backend_registry(&self) -> Result<BackendRegistry> {
        let mut registry = BackendRegistry::new();
        for (id, backend) in &self.backends {
            let command = match backend.command.strip_prefix("~/") {
                Some(_) => {
                    let mut parts = backend.command.splitn(2, char::is_whitespace);
                    let program = expand_tilde(parts.next().unwrap_or_default());
                    match parts.next() {
                        Some(rest) => format!("{} {}", program.display(), rest),
                        None => program.display().to_string(),
                    }
                }
                None => backend.command.clone(),
            };
            let command = CommandBackend::from_command_line(id, &command)?
                .with_json_output(backend.output_format == OutputFormat::Json);
            rlog_debug!("Config: backend {} -> {}", id, command.program().display());
            registry.register(Arc::new(command));
        }
        Ok(registry)
    }

    /// Load `~/.remedy/remedy.toml`, or defaults if it does not exist.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        rlog_debug!("Config::load path={}", path.display());
        if !path.exists() {
            rlog_debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        rlog_debug!(
            "Config loaded: {} role overrides, {} backends, strategy={}",
            config.roles.len(),
            config.backends.len(),
            config.scheduler.strategy
        );
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let remedy_dir = Self::remedy_dir()?;
        if !remedy_dir.exists() {
            rlog_debug!("Creating remedy directory");
            fs::create_dir_all(&remedy_dir)?;
        }
        let path = Self::config_path()?;
        fs::write(&path, toml::to_string_pretty(self)?)?;
        rlog_debug!("Config saved to {}", path.display());
        Ok(())
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
