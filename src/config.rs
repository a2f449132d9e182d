//! Settings for the process-wide tracker.
//!
//! Sources, lowest precedence first: [`Config::default()`], a JSON file or
//! string, then the environment ([`Config::with_env()`]).

use std::{env, fmt, fs, io, path::Path};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::alloc::{oom::ParseOomPolicyError, OomPolicy};

/// Environment variable overriding [`Config::oom_policy`]
pub const ENV_OOM_POLICY: &str = "OWNALLOC_OOM_POLICY";

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// What to do when the underlying allocator runs dry
    pub oom_policy: OomPolicy,
}

#[non_exhaustive]
#[derive(Debug)]
pub enum ConfigError {
    IoError(io::Error),
    SerdeJsonError(serde_json::Error),
    InvalidValue {
        key: &'static str,
        source: ParseOomPolicyError,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IoError(e) => write!(f, "could not read config: {e}"),
            Self::SerdeJsonError(e) => write!(f, "malformed config: {e}"),
            Self::InvalidValue { key, source } => write!(f, "bad value for {key}: {source}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::IoError(e) => Some(e),
            Self::SerdeJsonError(e) => Some(e),
            Self::InvalidValue { source, .. } => Some(source),
        }
    }
}

impl From<io::Error> for ConfigError {
    fn from(e: io::Error) -> Self {
        Self::IoError(e)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        Self::SerdeJsonError(e)
    }
}

impl Config {
    /// The defaults, overridden by the environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env()
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file<P>(path: P) -> Result<Self, ConfigError>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        debug!("loading config from {}", path.display());
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Apply overrides from the environment on top of `self`
    pub fn with_env(self) -> Result<Self, ConfigError> {
        self.with_vars(|key| env::var(key).ok())
    }

    fn with_vars<F>(mut self, var: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = var(ENV_OOM_POLICY) {
            self.oom_policy = value.parse().map_err(|source| ConfigError::InvalidValue {
                key: ENV_OOM_POLICY,
                source,
            })?;
            debug!("{ENV_OOM_POLICY} = {}", self.oom_policy);
        }
        Ok(self)
    }
}
