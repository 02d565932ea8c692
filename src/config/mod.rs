// Configuration manager module
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::SipPingError;
use crate::template::Variables;

/// メイン設定構造体
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub dest_host: Option<String>,
    pub dest_port: u16,
    pub source_ip: String,
    pub source_port: u16,
    /// Number of requests to send; `None` keeps going until interrupted.
    pub count: Option<u64>,
    pub interval_secs: f64,
    pub timeout_secs: f64,
    /// `name:value` pairs, applied in order; later entries win.
    pub variables: Vec<String>,
    pub aggressive: bool,
    pub quiet: bool,
    pub verbose: bool,
    pub request_template: Option<PathBuf>,
    pub out_regex: Option<String>,
    pub out_replace: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dest_host: None,
            dest_port: 5060,
            source_ip: "0.0.0.0".to_string(),
            source_port: 5060,
            count: None,
            interval_secs: 1.0,
            timeout_secs: 1.0,
            variables: Vec::new(),
            aggressive: false,
            quiet: false,
            verbose: false,
            request_template: None,
            out_regex: None,
            out_replace: None,
        }
    }
}

impl Config {
    /// 設定値のバリデーション
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.dest_host.as_deref().map_or(true, str::is_empty) {
            errors.push("destination ip not defined".to_string());
        }
        if !self.interval_secs.is_finite() || self.interval_secs < 0.0 {
            errors.push("interval must be a non-negative number of seconds".to_string());
        }
        if !self.timeout_secs.is_finite() || self.timeout_secs < 0.0 {
            errors.push("timeout must be a non-negative number of seconds".to_string());
        }
        for entry in &self.variables {
            if let Err(e) = parse_variable(entry) {
                errors.push(e.to_string());
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(self.interval_secs.max(0.0))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_secs.max(0.0))
    }

    /// Base template variables overlaid with the user's `name:value` list.
    pub fn template_variables(&self) -> Result<Variables, SipPingError> {
        let mut vars = Variables::new();
        vars.set("source_ip", self.source_ip.as_str());
        vars.set("source_port", self.source_port.to_string());
        vars.set("dest_ip", self.dest_host.clone().unwrap_or_default());
        vars.set("dest_port", self.dest_port.to_string());
        for entry in &self.variables {
            let (name, value) = parse_variable(entry)?;
            vars.set(name, value);
        }
        Ok(vars)
    }
}

/// Split `name:value` on the first colon. A missing colon means an empty value.
pub fn parse_variable(entry: &str) -> Result<(String, String), SipPingError> {
    let (name, value) = entry.split_once(':').unwrap_or((entry, ""));
    if name.is_empty() {
        return Err(SipPingError::ConfigError(format!(
            "variable '{}' has an empty name",
            entry
        )));
    }
    Ok((name.to_string(), value.to_string()))
}

/// JSON文字列から設定を読み込む
///
/// Validation runs later, once command line overrides have been applied.
pub fn load_from_str(json: &str) -> Result<Config, SipPingError> {
    serde_json::from_str(json)
        .map_err(|e| SipPingError::ConfigError(format!("JSON parse error: {}", e)))
}

/// JSONファイルから設定を読み込む
pub fn load_from_file(path: &Path) -> Result<Config, SipPingError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        SipPingError::ConfigError(format!(
            "Failed to read config file '{}': {}",
            path.display(),
            e
        ))
    })?;

    load_from_str(&content)
}
