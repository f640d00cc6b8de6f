//! TOML-based configuration.
//!
//! Holds every tunable the tracker uses:
//! - Azure DevOps organization, project and credentials
//! - Effort accounting (default estimate, push increment, conversion threshold)
//! - Work-item state labels used for activation
//! - Tick cadence and per-entity timeouts
//! - HTTP bind address
//!
//! Stored at `~/.config/worktally/config.toml` (or `$WORKTALLY_CONFIG`), then
//! overridden by environment variables. Built once at startup and passed by
//! reference; nothing below reads the environment on its own.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::data_dir;
use crate::error::ConfigError;

/// Azure DevOps connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AzureDevOpsConfig {
    #[serde(default)]
    pub organization: String,
    #[serde(default)]
    pub project: String,
    /// Personal access token.
    #[serde(default)]
    pub pat: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Effort accounting tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffortConfig {
    /// Remaining work set on a work item that never had effort fields.
    #[serde(default = "default_estimate_hours")]
    pub default_estimate_hours: f64,
    /// Hours moved from remaining to completed on every push. 0 disables.
    #[serde(default = "default_hours_per_push")]
    pub hours_per_push: f64,
    /// Running minutes per effort unit; also the remainder modulus.
    #[serde(default = "default_threshold_minutes")]
    pub conversion_threshold_minutes: u32,
    /// Hours applied per effort unit.
    #[serde(default = "default_unit_hours")]
    pub unit_hours: f64,
}

/// Work-item state labels, compared case-insensitively.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatesConfig {
    #[serde(default = "default_not_started")]
    pub not_started: Vec<String>,
    #[serde(default = "default_in_progress")]
    pub in_progress: Vec<String>,
    /// Label written when a not-started item is activated.
    #[serde(default = "default_activate_to")]
    pub activate_to: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
    /// Upper bound for one entity's remote round trips within a tick.
    #[serde(default = "default_entity_timeout_secs")]
    pub entity_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub azure_devops: AzureDevOpsConfig,
    #[serde(default)]
    pub effort: EffortConfig,
    #[serde(default)]
    pub states: StatesConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

/// Environment variables and the config keys they override.
pub const ENV_OVERRIDES: &[(&str, &str)] = &[
    ("ADO_ORG", "azure_devops.organization"),
    ("ADO_PROJECT", "azure_devops.project"),
    ("ADO_PAT", "azure_devops.pat"),
    ("ADO_BASE_URL", "azure_devops.base_url"),
    ("DEFAULT_ESTIMATE_HOURS", "effort.default_estimate_hours"),
    ("HOURS_PER_PUSH", "effort.hours_per_push"),
    ("CONVERSION_THRESHOLD_MINUTES", "effort.conversion_threshold_minutes"),
    ("UNIT_HOURS", "effort.unit_hours"),
    ("TICK_INTERVAL_SECS", "schedule.tick_interval_secs"),
    ("WORKTALLY_BIND", "server.bind"),
];

fn default_base_url() -> String {
    "https://dev.azure.com".into()
}
fn default_api_version() -> String {
    "7.1".into()
}
fn default_request_timeout_secs() -> u64 {
    30
}
fn default_estimate_hours() -> f64 {
    6.0
}
fn default_hours_per_push() -> f64 {
    0.5
}
fn default_threshold_minutes() -> u32 {
    60
}
fn default_unit_hours() -> f64 {
    1.0
}
fn default_not_started() -> Vec<String> {
    ["new", "to do", "todo", "backlog", "a fazer"]
        .into_iter()
        .map(String::from)
        .collect()
}
fn default_in_progress() -> Vec<String> {
    ["in progress", "em andamento", "doing", "active"]
        .into_iter()
        .map(String::from)
        .collect()
}
fn default_activate_to() -> String {
    "Active".into()
}
fn default_tick_interval_secs() -> u64 {
    300
}
fn default_entity_timeout_secs() -> u64 {
    45
}
fn default_bind() -> String {
    "127.0.0.1:7071".into()
}

impl Default for AzureDevOpsConfig {
    fn default() -> Self {
        Self {
            organization: String::new(),
            project: String::new(),
            pat: String::new(),
            base_url: default_base_url(),
            api_version: default_api_version(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for EffortConfig {
    fn default() -> Self {
        Self {
            default_estimate_hours: default_estimate_hours(),
            hours_per_push: default_hours_per_push(),
            conversion_threshold_minutes: default_threshold_minutes(),
            unit_hours: default_unit_hours(),
        }
    }
}

impl Default for StatesConfig {
    fn default() -> Self {
        Self {
            not_started: default_not_started(),
            in_progress: default_in_progress(),
            activate_to: default_activate_to(),
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval_secs(),
            entity_timeout_secs: default_entity_timeout_secs(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn normalize_label(label: &str) -> String {
    label.trim().to_lowercase()
}

impl Config {
    fn get_json_value_by_path<'a>(
        root: &'a serde_json::Value,
        key: &str,
    ) -> Option<&'a serde_json::Value> {
        if key.is_empty() {
            return None;
        }

        let mut current = root;
        for part in key.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    fn set_json_value_by_path(
        root: &mut serde_json::Value,
        key: &str,
        value: &str,
    ) -> Result<(), ConfigError> {
        let unknown = || ConfigError::InvalidValue {
            key: key.to_string(),
            message: "unknown config key".into(),
        };
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };

        let mut parts = key.split('.').peekable();
        if parts.peek().is_none() || key.is_empty() {
            return Err(unknown());
        }

        let mut current = root;
        while let Some(part) = parts.next() {
            if parts.peek().is_none() {
                let obj = current.as_object_mut().ok_or_else(unknown)?;
                let existing = obj.get(part).ok_or_else(unknown)?;

                let new_value = match existing {
                    serde_json::Value::Bool(_) => serde_json::Value::Bool(
                        value.parse::<bool>().map_err(|e| invalid(e.to_string()))?,
                    ),
                    serde_json::Value::Number(n) => {
                        if n.is_u64() {
                            let parsed = value
                                .trim()
                                .parse::<u64>()
                                .map_err(|e| invalid(format!("'{value}': {e}")))?;
                            serde_json::Value::Number(parsed.into())
                        } else {
                            let parsed = value
                                .trim()
                                .parse::<f64>()
                                .map_err(|e| invalid(format!("'{value}': {e}")))?;
                            serde_json::Number::from_f64(parsed)
                                .map(serde_json::Value::Number)
                                .ok_or_else(|| invalid(format!("'{value}' is not a finite number")))?
                        }
                    }
                    serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
                        serde_json::from_str(value).map_err(|e| invalid(e.to_string()))?
                    }
                    _ => serde_json::Value::String(value.into()),
                };

                obj.insert(part.to_string(), new_value);
                return Ok(());
            }

            current = current.get_mut(part).ok_or_else(unknown)?;
        }

        Err(unknown())
    }

    /// Config file location: `$WORKTALLY_CONFIG` or `<data_dir>/config.toml`.
    pub fn path() -> Result<PathBuf, ConfigError> {
        if let Ok(explicit) = std::env::var("WORKTALLY_CONFIG") {
            return Ok(PathBuf::from(explicit));
        }
        let dir = data_dir().map_err(|e| ConfigError::LoadFailed {
            path: PathBuf::from("~/.config/worktally"),
            message: e.to_string(),
        })?;
        Ok(dir.join("config.toml"))
    }

    /// Load from disk, writing the defaults first if the file is missing.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                toml::from_str(&content).map_err(|e| ConfigError::ParseFailed(e.to_string()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let cfg = Self::default();
                cfg.save_to(path)?;
                Ok(cfg)
            }
            Err(e) => Err(ConfigError::LoadFailed {
                path: path.to_path_buf(),
                message: e.to_string(),
            }),
        }
    }

    /// Load from disk, apply process environment overrides and validate.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = Self::load()?;
        cfg.apply_env_overrides(|name| std::env::var(name).ok())?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Apply [`ENV_OVERRIDES`] using `lookup` to read variables.
    ///
    /// Empty values are ignored; values that do not parse are an error.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        for (var, key) in ENV_OVERRIDES {
            if let Some(value) = lookup(var).filter(|v| !v.trim().is_empty()) {
                self.set_value(key, &value)?;
            }
        }
        Ok(())
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let save_failed = |message: String| ConfigError::SaveFailed {
            path: path.to_path_buf(),
            message,
        };
        let content = toml::to_string_pretty(self).map_err(|e| save_failed(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| save_failed(e.to_string()))?;
        }
        std::fs::write(path, content).map_err(|e| save_failed(e.to_string()))
    }

    /// Get a config value as string by dot-separated key.
    pub fn get(&self, key: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        let val = Self::get_json_value_by_path(&json, key)?;
        match val {
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Set a value in memory by dot-separated key, keeping the field's type.
    pub fn set_value(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let mut json =
            serde_json::to_value(&*self).map_err(|e| ConfigError::ParseFailed(e.to_string()))?;
        Self::set_json_value_by_path(&mut json, key, value)?;
        *self = serde_json::from_value(json).map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        Ok(())
    }

    /// Set a value by key and persist it.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        self.set_value(key, value)?;
        self.validate()?;
        self.save()
    }

    /// Reject combinations the accounting cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |key: &str, message: &str| ConfigError::InvalidValue {
            key: key.to_string(),
            message: message.to_string(),
        };

        if self.effort.conversion_threshold_minutes == 0 {
            return Err(invalid(
                "effort.conversion_threshold_minutes",
                "must be at least 1",
            ));
        }
        for (key, value) in [
            ("effort.default_estimate_hours", self.effort.default_estimate_hours),
            ("effort.hours_per_push", self.effort.hours_per_push),
            ("effort.unit_hours", self.effort.unit_hours),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(invalid(key, "must be a non-negative number"));
            }
        }
        if self.schedule.tick_interval_secs == 0 {
            return Err(invalid("schedule.tick_interval_secs", "must be at least 1"));
        }
        if self.schedule.entity_timeout_secs == 0 {
            return Err(invalid("schedule.entity_timeout_secs", "must be at least 1"));
        }
        url::Url::parse(&self.azure_devops.base_url)
            .map_err(|e| invalid("azure_devops.base_url", &e.to_string()))?;

        let target = normalize_label(&self.states.activate_to);
        if target.is_empty() {
            return Err(invalid("states.activate_to", "must not be empty"));
        }
        let not_started: Vec<String> = self
            .states
            .not_started
            .iter()
            .map(|s| normalize_label(s))
            .collect();
        if not_started.contains(&target) {
            return Err(invalid(
                "states.activate_to",
                "is also listed as a not-started state",
            ));
        }
        if let Some(overlap) = self
            .states
            .in_progress
            .iter()
            .map(|s| normalize_label(s))
            .find(|s| not_started.contains(s))
        {
            return Err(invalid(
                "states.in_progress",
                &format!("'{overlap}' is also listed as not started"),
            ));
        }
        Ok(())
    }
}
