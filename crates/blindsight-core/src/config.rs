//! Configuration loading and validation.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level Blindsight configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<AgentConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub vision: Option<VisionConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Agent name announced to the room service.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Replaces the built-in assistant instructions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,

    /// Instructions for the first reply after the session starts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub greeting: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisionConfig {
    /// Log ingest progress every N frames; 0 disables progress logs.
    #[serde(default = "default_progress_log_every")]
    pub progress_log_every: u64,

    /// Upper bound on waiting for an ingest to confirm it stopped.
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,

    /// Treat frames older than this as absent at turn time. Unset keeps frames indefinitely.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stale_after_ms: Option<u64>,

    /// Replaces the built-in advisory text used when no frame is available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_notice: Option<String>,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            progress_log_every: default_progress_log_every(),
            stop_timeout_ms: default_stop_timeout_ms(),
            stale_after_ms: None,
            fallback_notice: None,
        }
    }
}

fn default_progress_log_every() -> u64 {
    100
}

fn default_stop_timeout_ms() -> u64 {
    2000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log level override (trace/debug/info/warn/error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Per-crate log level overrides (e.g. "blindsight_media=debug").
    #[serde(default)]
    pub filters: Vec<String>,

    /// Output target: "stderr" (default) or "stdout".
    #[serde(default = "default_log_output")]
    pub output: String,
}

fn default_log_format() -> String {
    "plain".into()
}

fn default_log_output() -> String {
    "stderr".into()
}

/// Substitute `${ENV_VAR}` patterns in a string with their environment variable values.
fn substitute_env_vars(input: &str) -> String {
    let re = match regex::Regex::new(r"\$\{([^}]+)\}") {
        Ok(re) => re,
        Err(_) => return input.to_string(),
    };
    re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_default()
    })
    .into_owned()
}

impl Config {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path).map_err(crate::error::BlindsightError::Io)?;
        let substituted = substitute_env_vars(&raw);

        let config: Config = json5::from_str(&substituted)
            .map_err(|e| crate::error::BlindsightError::Config(e.to_string()))?;

        tracing::debug!(path = %path.display(), "Config loaded");
        Ok(config)
    }

    /// Resolve the default config file path.
    pub fn config_dir() -> PathBuf {
        data_dir().join("config.json")
    }

    pub fn agent_name(&self) -> String {
        self.agent
            .as_ref()
            .and_then(|a| a.name.clone())
            .unwrap_or_else(|| "vision-agent".to_string())
    }

    /// Effective vision settings, defaults filled in.
    pub fn vision(&self) -> VisionConfig {
        self.vision.clone().unwrap_or_default()
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.vision().stop_timeout_ms)
    }

    pub fn stale_after(&self) -> Option<Duration> {
        self.vision
            .as_ref()
            .and_then(|v| v.stale_after_ms)
            .map(Duration::from_millis)
    }

    /// Get a config value by dotted path (e.g. "vision.stop_timeout_ms").
    pub fn get_path(&self, path: &str) -> Option<serde_json::Value> {
        let json = serde_json::to_value(self).ok()?;
        let mut current = &json;
        for segment in path.split('.') {
            current = current.get(segment)?;
        }
        Some(current.clone())
    }

    /// Validate config, returning (warnings, errors).
    pub fn validate(&self) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        if let Some(vision) = &self.vision {
            if vision.stop_timeout_ms == 0 {
                errors.push("vision.stop_timeout_ms cannot be 0".to_string());
            }
            if vision.stale_after_ms == Some(0) {
                errors.push(
                    "vision.stale_after_ms cannot be 0 (every frame would be discarded)"
                        .to_string(),
                );
            }
            if vision
                .fallback_notice
                .as_deref()
                .is_some_and(|n| n.trim().is_empty())
            {
                warnings.push(
                    "vision.fallback_notice is empty, the built-in notice will be used".to_string(),
                );
            }
        }

        if let Some(agent) = &self.agent {
            if agent.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
                warnings.push("agent.name is empty".to_string());
            }
        }

        if let Some(logging) = &self.logging {
            if logging.format != "plain" && logging.format != "json" {
                warnings.push(format!(
                    "Unknown logging.format '{}', falling back to plain",
                    logging.format
                ));
            }
            if logging.output != "stderr" && logging.output != "stdout" {
                warnings.push(format!(
                    "Unknown logging.output '{}', falling back to stderr",
                    logging.output
                ));
            }
        }

        (warnings, errors)
    }
}

/// Base directory for Blindsight data: `~/.blindsight/`
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".blindsight")
}
