/// Configuration for the registrar service
use crate::db::SectionOffering;
use crate::engine::{EngineSettings, DEFAULT_CREDIT_CAP};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Environment variable holding the path of the JSON config file.
pub const CONFIG_ENV_VAR: &str = "REGISTRAR_CONFIG";

/// Largest credit value accepted for a seeded section.
pub const MAX_SECTION_CREDITS: u32 = 20;

/// Largest quota accepted for a seeded section.
pub const MAX_SECTION_QUOTA: u32 = 10_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {message}")]
    Read { path: PathBuf, message: String },

    #[error("Failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level service configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrarConfig {
    /// SQLite file, or `":memory:"` for a scratch database removed on exit
    pub database_path: String,
    pub bind_address: String,
    /// Maximum pending + approved credits per student per semester
    pub credit_cap: u32,
    /// Enroll time budget when the request does not carry one
    pub enroll_timeout_ms: u64,
    pub notifier: NotifierConfig,
    /// JSON array of section offerings inserted at startup
    pub catalog_seed: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    /// Mail service webhook; log-only delivery when absent
    pub webhook_url: Option<Url>,
    pub timeout_ms: u64,
}

impl Default for RegistrarConfig {
    fn default() -> Self {
        Self {
            database_path: "registrar.db".to_string(),
            bind_address: "127.0.0.1:8080".to_string(),
            credit_cap: DEFAULT_CREDIT_CAP,
            enroll_timeout_ms: 5000,
            notifier: NotifierConfig::default(),
            catalog_seed: None,
        }
    }
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            timeout_ms: 3000,
        }
    }
}

impl RegistrarConfig {
    /// Loads and validates a config file. Missing fields take their defaults.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        let config: RegistrarConfig =
            serde_json::from_str(&content).map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Loads the file named by `REGISTRAR_CONFIG`, or the defaults if unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var_os(CONFIG_ENV_VAR) {
            Some(path) => Self::load_from_file(Path::new(&path)),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.credit_cap == 0 {
            return Err(ConfigError::Invalid("credit_cap must be positive".into()));
        }
        if self.enroll_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "enroll_timeout_ms must be positive".into(),
            ));
        }
        if self.notifier.timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "notifier.timeout_ms must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            credit_cap: self.credit_cap,
            enroll_timeout: Duration::from_millis(self.enroll_timeout_ms),
        }
    }

    pub fn notifier_timeout(&self) -> Duration {
        Duration::from_millis(self.notifier.timeout_ms)
    }

    /// Reads the catalog seed, if one is configured.
    pub fn load_catalog_seed(&self) -> Result<Vec<SectionOffering>, ConfigError> {
        let Some(path) = &self.catalog_seed else {
            return Ok(Vec::new());
        };

        let content = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.clone(),
            message: e.to_string(),
        })?;

        let sections: Vec<SectionOffering> =
            serde_json::from_str(&content).map_err(|e| ConfigError::Parse {
                path: path.clone(),
                message: e.to_string(),
            })?;

        for section in &sections {
            validate_offering(section)?;
        }
        Ok(sections)
    }
}

fn validate_offering(section: &SectionOffering) -> Result<(), ConfigError> {
    if !(1..=MAX_SECTION_CREDITS).contains(&section.credits) {
        return Err(ConfigError::Invalid(format!(
            "section {} credits must be between 1 and {MAX_SECTION_CREDITS}, got {}",
            section.id, section.credits
        )));
    }
    if !(1..=MAX_SECTION_QUOTA).contains(&section.quota) {
        return Err(ConfigError::Invalid(format!(
            "section {} quota must be between 1 and {MAX_SECTION_QUOTA}, got {}",
            section.id, section.quota
        )));
    }
    Ok(())
}
