// Makita Settings Module
// User configuration for the runtime, script loading and query answering

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::dispatch::Addressing;
use crate::scheduler::RuntimeConfig;

/// Environment variable naming an alternative settings file
pub const CONFIG_ENV: &str = "MAKITA_CONFIG";

/// Extension of script files in the scripts directory
pub const SCRIPT_EXTENSION: &str = "lua";

/// Settings for the makita engine
///
/// Loaded from a TOML file (default: ~/.config/makita/settings.toml, or the
/// file named by `MAKITA_CONFIG`).
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    poll_timeout: Duration,
    step_budget: Option<u64>,
    addressing: Addressing,
    drain_timers_on_close: bool,

    /// Directory holding `<name>.lua` scripts
    scripts_dir: Option<PathBuf>,
    /// Scripts loaded before the first event
    preload: Vec<String>,

    answer_locally: bool,
}

/// Errors that can occur when loading settings
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(String),

    #[error("Invalid setting value: {0}")]
    InvalidValue(String),
}

/// TOML representation for deserializing settings
#[derive(Debug, Clone, serde::Deserialize, Default)]
struct SettingsToml {
    #[serde(default)]
    runtime: Option<RuntimeSection>,

    #[serde(default)]
    scripts: Option<ScriptsSection>,

    #[serde(default)]
    queries: Option<QueriesSection>,
}

#[derive(Debug, Clone, serde::Deserialize, Default)]
struct RuntimeSection {
    #[serde(default)]
    poll_timeout_ms: Option<u64>,
    #[serde(default)]
    step_budget: Option<u64>,
    #[serde(default)]
    addressing: Option<String>,
    #[serde(default)]
    drain_timers_on_close: Option<toml::Value>,
}

#[derive(Debug, Clone, serde::Deserialize, Default)]
struct ScriptsSection {
    #[serde(default)]
    directory: Option<PathBuf>,
    #[serde(default)]
    preload: Option<Vec<String>>,
}

#[derive(Debug, Clone, serde::Deserialize, Default)]
struct QueriesSection {
    #[serde(default)]
    answer_locally: Option<toml::Value>,
}

impl Settings {
    pub fn new() -> Self {
        Self {
            poll_timeout: Duration::from_millis(1),
            step_budget: None,
            addressing: Addressing::Auto,
            drain_timers_on_close: false,
            scripts_dir: None,
            preload: Vec::new(),
            answer_locally: false,
        }
    }

    /// Load settings from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let content = std::fs::read_to_string(&path)?;
        Self::from_toml(&content)
    }

    /// Load settings from TOML string
    pub fn from_toml(content: &str) -> Result<Self, SettingsError> {
        let toml_settings: SettingsToml =
            toml::from_str(content).map_err(|e| SettingsError::TomlParse(e.to_string()))?;

        let mut settings = Self::new();

        if let Some(runtime) = toml_settings.runtime {
            if let Some(ms) = runtime.poll_timeout_ms {
                settings.poll_timeout = Duration::from_millis(ms);
            }
            if let Some(budget) = runtime.step_budget {
                if budget == 0 {
                    return Err(SettingsError::InvalidValue(
                        "step_budget must be greater than zero".to_string(),
                    ));
                }
                settings.step_budget = Some(budget);
            }
            if let Some(name) = runtime.addressing {
                settings.addressing = Addressing::parse(&name).ok_or_else(|| {
                    SettingsError::InvalidValue(format!(
                        "Unknown addressing mode '{}' (expected auto, targeted or broadcast)",
                        name
                    ))
                })?;
            }
            if let Some(value) = runtime.drain_timers_on_close {
                settings.drain_timers_on_close = parse_bool_value(&value)?;
            }
        }

        if let Some(scripts) = toml_settings.scripts {
            settings.scripts_dir = scripts.directory;
            settings.preload = scripts.preload.unwrap_or_default();
        }

        if let Some(queries) = toml_settings.queries {
            if let Some(value) = queries.answer_locally {
                settings.answer_locally = parse_bool_value(&value)?;
            }
        }

        Ok(settings)
    }

    /// Get the default settings path, honoring `MAKITA_CONFIG`
    pub fn default_path() -> Option<PathBuf> {
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            return Some(PathBuf::from(path));
        }
        dirs::config_dir().map(|p| p.join("makita").join("settings.toml"))
    }

    /// Load from the default location; defaults if the file doesn't exist
    pub fn load_default() -> Result<Self, SettingsError> {
        if let Some(path) = Self::default_path() {
            if path.exists() {
                return Self::from_file(path);
            }
        }
        Ok(Self::new())
    }

    pub fn runtime_config(&self) -> RuntimeConfig {
        RuntimeConfig {
            poll_timeout: self.poll_timeout,
            step_budget: self.step_budget,
            addressing: self.addressing,
            drain_timers_on_close: self.drain_timers_on_close,
        }
    }

    pub fn poll_timeout(&self) -> Duration {
        self.poll_timeout
    }

    pub fn addressing(&self) -> Addressing {
        self.addressing
    }

    pub fn set_scripts_dir(&mut self, dir: impl Into<PathBuf>) {
        self.scripts_dir = Some(dir.into());
    }

    pub fn answer_locally(&self) -> bool {
        self.answer_locally
    }

    pub fn set_answer_locally(&mut self, enabled: bool) {
        self.answer_locally = enabled;
    }

    /// Conventional location of a named script: `<scripts dir>/<name>.lua`
    pub fn script_path(&self, name: &str) -> Option<PathBuf> {
        self.scripts_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.{}", name, SCRIPT_EXTENSION)))
    }

    /// (name, path) for every preloaded script
    pub fn preload_paths(&self) -> Result<Vec<(String, PathBuf)>, SettingsError> {
        self.preload
            .iter()
            .map(|name| {
                self.script_path(name)
                    .map(|path| (name.clone(), path))
                    .ok_or_else(|| {
                        SettingsError::InvalidValue(format!(
                            "Script '{}' is preloaded but no scripts directory is set",
                            name
                        ))
                    })
            })
            .collect()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a TOML value as a boolean
fn parse_bool_value(value: &toml::Value) -> Result<bool, SettingsError> {
    match value {
        toml::Value::Boolean(b) => Ok(*b),
        toml::Value::Integer(1) => Ok(true),
        toml::Value::Integer(0) => Ok(false),
        toml::Value::String(s) => match s.to_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Ok(true),
            "false" | "no" | "off" | "0" => Ok(false),
            _ => Err(SettingsError::InvalidValue(format!(
                "Cannot convert '{}' to boolean",
                s
            ))),
        },
        _ => Err(SettingsError::InvalidValue(format!(
            "Cannot convert {:?} to boolean",
            value
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_default() {
        let settings = Settings::new();
        assert_eq!(settings.poll_timeout(), Duration::from_millis(1));
        assert_eq!(settings.addressing(), Addressing::Auto);
        assert!(!settings.answer_locally());
        assert_eq!(settings.runtime_config(), RuntimeConfig::default());
    }

    #[test]
    fn test_settings_from_toml() {
        let toml = r#"
[runtime]
poll_timeout_ms = 5
step_budget = 100000
addressing = "broadcast"
drain_timers_on_close = "yes"

[scripts]
directory = "/etc/makita/scripts"
preload = ["caps", "echo"]

[queries]
answer_locally = true
"#;

        let settings = Settings::from_toml(toml).unwrap();
        let config = settings.runtime_config();
        assert_eq!(config.poll_timeout, Duration::from_millis(5));
        assert_eq!(config.step_budget, Some(100_000));
        assert_eq!(config.addressing, Addressing::Broadcast);
        assert!(config.drain_timers_on_close);
        assert!(settings.answer_locally());
        assert_eq!(
            settings.preload_paths().unwrap(),
            vec![
                ("caps".to_string(), PathBuf::from("/etc/makita/scripts/caps.lua")),
                ("echo".to_string(), PathBuf::from("/etc/makita/scripts/echo.lua")),
            ]
        );
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            Settings::from_toml("[runtime]\naddressing = \"sideways\""),
            Err(SettingsError::InvalidValue(_))
        ));
        assert!(matches!(
            Settings::from_toml("[runtime]\nstep_budget = 0"),
            Err(SettingsError::InvalidValue(_))
        ));
        assert!(matches!(
            Settings::from_toml("[queries]\nanswer_locally = \"maybe\""),
            Err(SettingsError::InvalidValue(_))
        ));
        assert!(matches!(
            Settings::from_toml("[runtime"),
            Err(SettingsError::TomlParse(_))
        ));
    }

    #[test]
    fn test_preload_needs_directory() {
        let settings = Settings::from_toml("[scripts]\npreload = [\"caps\"]").unwrap();
        assert!(settings.preload_paths().is_err());
    }
}
