use crate::error::ConfigError;
use regex::Regex;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone)]
pub struct DaemonConfig {
    #[serde(default)]
    pub general: GeneralConfig,

    /// Per-engine settings tables, keyed by engine id. Passed opaquely to
    /// the engine at initialize; the daemon does not interpret them.
    #[serde(default)]
    pub engines: Option<toml::Value>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GeneralConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_language")]
    pub default_language: String,

    #[serde(default = "default_engine")]
    pub default_engine: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            default_language: default_language(),
            default_engine: default_engine(),
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            engines: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_language() -> String {
    "en-US".to_string()
}

fn default_engine() -> String {
    "null".to_string()
}

/// Interpolate `${VAR}` patterns with environment variable values.
fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let re = Regex::new(r"\$\{([^}]+)\}").unwrap();
    let mut result = input.to_string();

    for cap in re.captures_iter(input) {
        let var_name = &cap[1];
        match std::env::var(var_name) {
            Ok(val) => {
                result = result.replace(&cap[0], &val);
            }
            Err(_) => {
                return Err(ConfigError::EnvVarNotFound(var_name.to_string()));
            }
        }
    }

    Ok(result)
}

impl DaemonConfig {
    /// Load configuration from a TOML file, with environment variable interpolation.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let interpolated = interpolate_env_vars(&content)?;
        let config: DaemonConfig = toml::from_str(&interpolated)?;
        Ok(config)
    }

    /// Parse configuration from a TOML string (for testing).
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let interpolated = interpolate_env_vars(s)?;
        let config: DaemonConfig = toml::from_str(&interpolated)?;
        Ok(config)
    }

    /// Settings table for one engine id, if configured.
    pub fn engine_settings(&self, engine_id: &str) -> toml::Value {
        self.engines
            .as_ref()
            .and_then(|e| e.get(engine_id))
            .cloned()
            .unwrap_or_else(|| toml::Value::Table(Default::default()))
    }
}
