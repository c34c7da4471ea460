//! Engine settings, persisted as pretty JSON.

use crate::{cancel::DEFAULT_POLL_INTERVAL, error::EngineError};
use motiflab_protocol::{RetryPolicy, SESSION_FORMAT_VERSION};
use serde::{Deserialize, Serialize};

pub const PARAMETER_NAMES: &[&str] = &[
    "worker_pool_size",
    "network_timeout_secs",
    "retry_policy",
    "max_auto_retries",
    "cancel_poll_interval",
    "max_session_format",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub worker_pool_size: usize,
    /// Passed on to network-backed operations and plugins.
    pub network_timeout_secs: u64,
    pub retry_policy: RetryPolicy,
    pub max_auto_retries: usize,
    /// Long loops check for cancellation once per this many iterations.
    pub cancel_poll_interval: usize,
    /// Newest session format this engine accepts.
    pub max_session_format: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: 4,
            network_timeout_secs: 25,
            retry_policy: RetryPolicy::PromptRetry,
            max_auto_retries: 3,
            cancel_poll_interval: DEFAULT_POLL_INTERVAL,
            max_session_format: SESSION_FORMAT_VERSION,
        }
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, EngineError> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| EngineError::InvalidInput(format!("'{value}' is not a valid value for {name}")))
}

impl EngineConfig {
    pub fn load_from_path(path: &str) -> Result<Self, EngineError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| EngineError::io(format!("Could not read config file '{path}'"), e))?;
        let config: Self = serde_json::from_str(&text).map_err(|e| {
            EngineError::InvalidInput(format!("Could not parse config JSON '{path}': {e}"))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to_path(&self, path: &str) -> Result<(), EngineError> {
        let text = serde_json::to_string_pretty(self)
            .map_err(|e| EngineError::Internal(format!("Could not serialize config: {e}")))?;
        std::fs::write(path, text)
            .map_err(|e| EngineError::io(format!("Could not write config file '{path}'"), e))
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.worker_pool_size == 0 {
            return Err(EngineError::InvalidInput(
                "worker_pool_size must be at least 1".to_string(),
            ));
        }
        if self.cancel_poll_interval == 0 {
            return Err(EngineError::InvalidInput(
                "cancel_poll_interval must be at least 1".to_string(),
            ));
        }
        if !(1..=SESSION_FORMAT_VERSION).contains(&self.max_session_format) {
            return Err(EngineError::InvalidInput(format!(
                "max_session_format must be between 1 and {SESSION_FORMAT_VERSION}"
            )));
        }
        Ok(())
    }

    /// Sets one parameter from its text form. Leaves `self` untouched on error.
    pub fn set_parameter(&mut self, name: &str, value: &str) -> Result<(), EngineError> {
        let mut next = self.clone();
        match name {
            "worker_pool_size" => next.worker_pool_size = parse_number(name, value)?,
            "network_timeout_secs" => next.network_timeout_secs = parse_number(name, value)?,
            "retry_policy" => {
                next.retry_policy = value
                    .parse()
                    .map_err(|e: motiflab_protocol::RetryPolicyParseError| {
                        EngineError::InvalidInput(e.to_string())
                    })?
            }
            "max_auto_retries" => next.max_auto_retries = parse_number(name, value)?,
            "cancel_poll_interval" => next.cancel_poll_interval = parse_number(name, value)?,
            "max_session_format" => next.max_session_format = parse_number(name, value)?,
            other => {
                return Err(EngineError::InvalidInput(format!(
                    "Unknown parameter '{other}', expected one of: {}",
                    PARAMETER_NAMES.join(", ")
                )));
            }
        }
        next.validate()?;
        *self = next;
        Ok(())
    }

    pub fn parameter(&self, name: &str) -> Option<String> {
        let value = match name {
            "worker_pool_size" => self.worker_pool_size.to_string(),
            "network_timeout_secs" => self.network_timeout_secs.to_string(),
            "retry_policy" => self.retry_policy.to_string(),
            "max_auto_retries" => self.max_auto_retries.to_string(),
            "cancel_poll_interval" => self.cancel_poll_interval.to_string(),
            "max_session_format" => self.max_session_format.to_string(),
            _ => return None,
        };
        Some(value)
    }
}
