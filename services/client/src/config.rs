//! services/client/src/config.rs
//!
//! Defines the client's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use documind_core::{RendererConfig, UploadPolicy};
use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub api_base_url: String,
    pub request_timeout: Duration,
    pub log_level: Level,
    pub mmdc_path: PathBuf,
    pub diagram_output_dir: PathBuf,
    pub max_upload_bytes: u64,
    pub renderer: RendererConfig,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var_or = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        // --- Backend Settings ---
        let api_base_url = var_or("DOCUMIND_API_URL", "http://localhost:8000/api");
        if !(api_base_url.starts_with("http://") || api_base_url.starts_with("https://")) {
            return Err(ConfigError::InvalidValue(
                "DOCUMIND_API_URL".to_string(),
                format!("'{}' is not an http(s) URL", api_base_url),
            ));
        }
        let api_base_url = api_base_url.trim_end_matches('/').to_string();

        let timeout_str = var_or("REQUEST_TIMEOUT_SECS", "60");
        let request_timeout = timeout_str
            .parse::<u64>()
            .ok()
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .ok_or_else(|| {
                ConfigError::InvalidValue(
                    "REQUEST_TIMEOUT_SECS".to_string(),
                    format!("'{}' is not a positive number of seconds", timeout_str),
                )
            })?;

        let log_level_str = var_or("RUST_LOG", "INFO");
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let max_upload_str = var_or("MAX_UPLOAD_BYTES", "10485760");
        let max_upload_bytes = max_upload_str.parse::<u64>().map_err(|e| {
            ConfigError::InvalidValue("MAX_UPLOAD_BYTES".to_string(), e.to_string())
        })?;

        // --- Diagram Rendering Settings ---
        let mmdc_path = PathBuf::from(var_or("MMDC_PATH", "mmdc"));
        let diagram_output_dir = PathBuf::from(var_or("DIAGRAM_OUTPUT_DIR", "./diagrams"));

        let security_level = var_or("MERMAID_SECURITY_LEVEL", "strict").to_lowercase();
        if !matches!(security_level.as_str(), "strict" | "loose" | "antiscript" | "sandbox") {
            return Err(ConfigError::InvalidValue(
                "MERMAID_SECURITY_LEVEL".to_string(),
                format!("'{}' is not a mermaid security level", security_level),
            ));
        }
        let renderer = RendererConfig {
            theme: var_or("MERMAID_THEME", "default"),
            security_level,
            ..RendererConfig::default()
        };

        Ok(Self {
            api_base_url,
            request_timeout,
            log_level,
            mmdc_path,
            diagram_output_dir,
            max_upload_bytes,
            renderer,
        })
    }

    pub fn upload_policy(&self) -> UploadPolicy {
        UploadPolicy {
            max_bytes: self.max_upload_bytes,
            ..UploadPolicy::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = load(&[]).unwrap();
        assert_eq!(config.api_base_url, "http://localhost:8000/api");
        assert_eq!(config.request_timeout, Duration::from_secs(60));
        assert_eq!(config.log_level, Level::INFO);
        assert_eq!(config.max_upload_bytes, 10 * 1024 * 1024);
        assert_eq!(config.renderer.security_level, "strict");
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        let config = load(&[("DOCUMIND_API_URL", "https://docs.example.com/api/")]).unwrap();
        assert_eq!(config.api_base_url, "https://docs.example.com/api");
    }

    #[test]
    fn invalid_values_are_reported() {
        assert!(matches!(
            load(&[("REQUEST_TIMEOUT_SECS", "0")]),
            Err(ConfigError::InvalidValue(var, _)) if var == "REQUEST_TIMEOUT_SECS"
        ));
        assert!(matches!(
            load(&[("DOCUMIND_API_URL", "localhost:8000")]),
            Err(ConfigError::InvalidValue(var, _)) if var == "DOCUMIND_API_URL"
        ));
        assert!(matches!(
            load(&[("MERMAID_SECURITY_LEVEL", "none")]),
            Err(ConfigError::InvalidValue(var, _)) if var == "MERMAID_SECURITY_LEVEL"
        ));
        assert!(load(&[("RUST_LOG", "chatty")]).is_err());
    }
}
