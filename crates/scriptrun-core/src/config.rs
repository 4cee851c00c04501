//! `scriptrun.toml` configuration.
//!
//! ```toml
//! host_version = 2024
//!
//! [compiler]
//! references = ["/opt/scriptrun/lib/geometry.wasm"]
//!
//! [workflow]
//! module = "workflow_automation"
//! entry_type = "Automation"
//!
//! [logging]
//! level = "debug"
//! format = "json"
//! ```

use crate::error::ConfigError;
use crate::logging::LogConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV_VAR: &str = "SCRIPTRUN_CONFIG";

/// Host version assumed when the config omits one.
pub const DEFAULT_HOST_VERSION: u32 = 2024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptrunConfig {
    /// Host application version; compiled sources see `HOST_<version>`.
    pub host_version: u32,
    pub compiler: CompilerSettings,
    pub workflow: WorkflowSettings,
    pub logging: LogConfig,
}

impl Default for ScriptrunConfig {
    fn default() -> Self {
        Self {
            host_version: DEFAULT_HOST_VERSION,
            compiler: CompilerSettings::default(),
            workflow: WorkflowSettings::default(),
            logging: LogConfig::default(),
        }
    }
}

impl ScriptrunConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load the resolved config file, or defaults when none exists.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        match resolve_config_path(explicit) {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }

    /// Preprocessor symbol for the configured host version.
    pub fn host_define(&self) -> String {
        format!("HOST_{}", self.host_version)
    }
}

/// Locate the config file: explicit path, then `SCRIPTRUN_CONFIG`, then the
/// per-user config directory. Only the explicit path is returned without an
/// existence check.
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    if let Some(path) = std::env::var_os(CONFIG_ENV_VAR).filter(|value| !value.is_empty()) {
        return Some(PathBuf::from(path));
    }
    dirs::config_dir()
        .map(|dir| dir.join("scriptrun").join("scriptrun.toml"))
        .filter(|path| path.is_file())
}

/// Read-only view of the settings compiled sources depend on.
pub trait EnvironmentSettings: Send + Sync {
    /// Modules compiled sources may import from. Empty means "every module
    /// already loaded".
    fn referenced_modules(&self) -> Vec<PathBuf>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerSettings {
    pub references: Vec<PathBuf>,
}

impl EnvironmentSettings for CompilerSettings {
    fn referenced_modules(&self) -> Vec<PathBuf> {
        self.references.clone()
    }
}

/// Where the workflow handler finds the automation entry point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowSettings {
    /// Registry name (file stem) of the automation module.
    pub module: String,
    pub entry_type: String,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            module: "workflow_automation".to_string(),
            entry_type: "Automation".to_string(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pretty => f.write_str("pretty"),
            Self::Json => f.write_str("json"),
        }
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            _ => Err(format!("unknown log format: {s}. Expected one of: pretty, json")),
        }
    }
}
