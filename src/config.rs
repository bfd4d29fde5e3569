//! Runtime settings: TOML file, then `SCREENING_*` environment overrides.
//!
//! Provider credentials are not part of this file; the gateway reads
//! `OPENAI_API_KEY` / `OPENAI_BASE_URL` / `OPENAI_TIMEOUT_SECONDS` itself.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::profiles::DEFAULT_PROFILE_LIMIT;
use crate::screening::dispatch::DEFAULT_DISPATCH_DELAY;
use crate::screening::evaluate::{
    EvaluationConfig, DEFAULT_BATCH_MODEL, DEFAULT_BATCH_SIZE, DEFAULT_MAX_CONCURRENT,
    DEFAULT_MAX_TOKENS, DEFAULT_SINGLE_MODEL, DEFAULT_TEMPERATURE,
};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub listen_addr: String,
    pub profiles_path: PathBuf,
    pub profile_limit: usize,
    pub single_model: String,
    pub batch_model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub dispatch_delay_ms: u64,
    pub max_concurrent: usize,
    pub batch_size: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:3000".to_string(),
            profiles_path: PathBuf::from("data/form-submissions.json"),
            profile_limit: DEFAULT_PROFILE_LIMIT,
            single_model: DEFAULT_SINGLE_MODEL.to_string(),
            batch_model: DEFAULT_BATCH_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            dispatch_delay_ms: DEFAULT_DISPATCH_DELAY.as_millis() as u64,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

fn parse<T: std::str::FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue { key, value })
}

impl Settings {
    /// Defaults, overlaid with `path` if given, then with the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let settings = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        settings.with_env_overrides(|key| std::env::var(key).ok())
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&content)?)
    }

    /// Apply `SCREENING_*` overrides from `lookup`.
    pub fn with_env_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(v) = lookup("SCREENING_LISTEN_ADDR") {
            self.listen_addr = v;
        }
        if let Some(v) = lookup("SCREENING_PROFILES_PATH") {
            self.profiles_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("SCREENING_PROFILE_LIMIT") {
            self.profile_limit = parse("SCREENING_PROFILE_LIMIT", v)?;
        }
        if let Some(v) = lookup("SCREENING_SINGLE_MODEL") {
            self.single_model = v;
        }
        if let Some(v) = lookup("SCREENING_BATCH_MODEL") {
            self.batch_model = v;
        }
        if let Some(v) = lookup("SCREENING_TEMPERATURE") {
            self.temperature = parse("SCREENING_TEMPERATURE", v)?;
        }
        if let Some(v) = lookup("SCREENING_MAX_TOKENS") {
            self.max_tokens = parse("SCREENING_MAX_TOKENS", v)?;
        }
        if let Some(v) = lookup("SCREENING_DISPATCH_DELAY_MS") {
            self.dispatch_delay_ms = parse("SCREENING_DISPATCH_DELAY_MS", v)?;
        }
        if let Some(v) = lookup("SCREENING_MAX_CONCURRENT") {
            self.max_concurrent = parse("SCREENING_MAX_CONCURRENT", v)?;
        }
        if let Some(v) = lookup("SCREENING_BATCH_SIZE") {
            self.batch_size = parse("SCREENING_BATCH_SIZE", v)?;
        }
        Ok(self)
    }

    pub fn evaluation_config(&self) -> EvaluationConfig {
        EvaluationConfig {
            single_model: self.single_model.clone(),
            batch_model: self.batch_model.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            dispatch_delay: Duration::from_millis(self.dispatch_delay_ms),
            batch_size: self.batch_size.max(1),
            max_concurrent: self.max_concurrent.max(1),
            run_id: None,
        }
    }
}
