//! Contracts shared between the MotifLab engine and its clients.
//!
//! Everything in here is plain data: task states, the retry policy a client
//! hands to the engine's caller, the session header line and the capability
//! report printed by the CLI.

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr, time::Duration};

/// Highest session format written by this build.
///
/// History:
/// 1. initial layout (header, objects, display settings, protocol, tabs)
/// 2. display settings gained `track_heights`
/// 3. `Output.format` changed from an integer code to a format name
pub const SESSION_FORMAT_VERSION: u32 = 3;

pub const HEADER_SEPARATOR: char = ';';

pub const PLUGIN_REQUIREMENT_PREFIX: &str = "Plugin: ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    Created,
    Running,
    Done,
    Error,
    Aborted,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Error | Self::Aborted)
    }

    /// Only `Created -> Running` and `Running -> terminal` are legal.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        match (self, next) {
            (Self::Created, Self::Running) => true,
            (Self::Running, s) => s.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Created => "CREATED",
            Self::Running => "RUNNING",
            Self::Done => "DONE",
            Self::Error => "ERROR",
            Self::Aborted => "ABORTED",
        };
        f.write_str(text)
    }
}

/// How a client wants failed tasks handled.
///
/// Written as `DO_NOT_RETRY`, `PROMPT_RETRY` or a number of seconds to wait
/// before retrying automatically.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RetryPolicy {
    DoNotRetry,
    #[default]
    PromptRetry,
    Delay(u64),
}

impl RetryPolicy {
    pub fn delay(&self) -> Option<Duration> {
        match self {
            Self::Delay(secs) => Some(Duration::from_secs(*secs)),
            _ => None,
        }
    }
}

impl fmt::Display for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DoNotRetry => f.write_str("DO_NOT_RETRY"),
            Self::PromptRetry => f.write_str("PROMPT_RETRY"),
            Self::Delay(secs) => write!(f, "{secs}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid retry policy '{0}', expected DO_NOT_RETRY, PROMPT_RETRY or a number of seconds")]
pub struct RetryPolicyParseError(pub String);

impl FromStr for RetryPolicy {
    type Err = RetryPolicyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "DO_NOT_RETRY" => Ok(Self::DoNotRetry),
            "PROMPT_RETRY" => Ok(Self::PromptRetry),
            other => other
                .parse::<u64>()
                .map(Self::Delay)
                .map_err(|_| RetryPolicyParseError(s.to_string())),
        }
    }
}

impl TryFrom<String> for RetryPolicy {
    type Error = RetryPolicyParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RetryPolicy> for String {
    fn from(value: RetryPolicy) -> Self {
        value.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HeaderError {
    #[error("session header is empty")]
    Empty,
    #[error("session header '{0}' has no format version")]
    MissingFormat(String),
    #[error("session header has an unreadable format version '{0}'")]
    BadFormat(String),
}

/// First line of a saved session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionHeader {
    pub engine_version: String,
    pub format: u32,
    pub requirements: Vec<String>,
}

impl SessionHeader {
    pub fn new(engine_version: &str, requirements: Vec<String>) -> Self {
        Self {
            engine_version: engine_version.to_string(),
            format: SESSION_FORMAT_VERSION,
            requirements,
        }
    }

    pub fn encode(&self) -> String {
        let mut parts = vec![
            clean_field(&self.engine_version),
            self.format.to_string(),
        ];
        parts.extend(self.requirements.iter().map(|r| clean_field(r)));
        parts.join(&HEADER_SEPARATOR.to_string())
    }

    pub fn decode(text: &str) -> Result<Self, HeaderError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(HeaderError::Empty);
        }
        let mut parts = text.split(HEADER_SEPARATOR);
        let engine_version = parts.next().unwrap_or_default().trim().to_string();
        let format_text = parts
            .next()
            .ok_or_else(|| HeaderError::MissingFormat(text.to_string()))?
            .trim();
        let format = format_text
            .parse::<u32>()
            .map_err(|_| HeaderError::BadFormat(format_text.to_string()))?;
        let requirements = parts
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();
        Ok(Self {
            engine_version,
            format,
            requirements,
        })
    }

    pub fn plugin_requirements(&self) -> impl Iterator<Item = &str> {
        self.requirements
            .iter()
            .filter_map(|r| r.strip_prefix(PLUGIN_REQUIREMENT_PREFIX))
    }
}

fn clean_field(raw: &str) -> String {
    raw.replace(HEADER_SEPARATOR, ",")
}

pub fn plugin_requirement(name: &str) -> String {
    format!("{PLUGIN_REQUIREMENT_PREFIX}{name}")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capabilities {
    pub engine_version: String,
    pub session_format: u32,
    pub supported_operations: Vec<String>,
    pub supported_data_formats: Vec<String>,
    pub installed_plugins: Vec<String>,
    pub data_kinds: Vec<String>,
}
