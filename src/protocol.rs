//! Protocol scripts: ordered lists of operation steps.

use crate::{
    error::EngineError,
    task::{Runnable, TaskContext, TaskError},
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolStep {
    pub operation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub params: Map<String, Value>,
}

impl ProtocolStep {
    pub fn new(operation: &str) -> Self {
        Self {
            operation: operation.to_string(),
            source: None,
            target: None,
            params: Map::new(),
        }
    }

    pub fn with_source(mut self, source: &str) -> Self {
        self.source = Some(source.to_string());
        self
    }

    pub fn with_target(mut self, target: &str) -> Self {
        self.target = Some(target.to_string());
        self
    }

    pub fn with_param(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }

    pub fn require_source(&self) -> Result<&str, TaskError> {
        self.source
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| TaskError::Execution(format!("'{}' needs a source", self.operation)))
    }

    pub fn require_target(&self) -> Result<&str, TaskError> {
        self.target
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| TaskError::Execution(format!("'{}' needs a target", self.operation)))
    }

    /// One-line rendering used by the protocol editor state.
    pub fn to_line(&self) -> String {
        let mut line = match &self.target {
            Some(target) => format!("{target} = {}", self.operation),
            None => self.operation.clone(),
        };
        if let Some(source) = &self.source {
            line.push(' ');
            line.push_str(source);
        }
        if !self.params.is_empty() {
            line.push(' ');
            line.push_str(&Value::Object(self.params.clone()).to_string());
        }
        line
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Protocol {
    pub name: String,
    #[serde(default)]
    pub steps: Vec<ProtocolStep>,
}

impl Protocol {
    pub fn from_json(text: &str) -> Result<Self, EngineError> {
        serde_json::from_str(text)
            .map_err(|e| EngineError::InvalidInput(format!("Invalid protocol JSON: {e}")))
    }

    pub fn to_text(&self) -> String {
        self.steps
            .iter()
            .map(ProtocolStep::to_line)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Protocol editor contents as saved in a session. Restored for display only,
/// never executed on load.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolState {
    pub name: Option<String>,
    pub text: String,
    pub modified: bool,
}

impl From<&Protocol> for ProtocolState {
    fn from(protocol: &Protocol) -> Self {
        Self {
            name: Some(protocol.name.clone()),
            text: protocol.to_text(),
            modified: false,
        }
    }
}

fn run_step(step: &ProtocolStep, ctx: &mut TaskContext<'_>) -> Result<(), TaskError> {
    let operation = ctx
        .engine()
        .operations()
        .get(&step.operation)
        .ok_or_else(|| TaskError::Execution(format!("Unknown operation '{}'", step.operation)))?;
    operation.execute(step, ctx)
}

pub struct ProtocolTask {
    protocol: Protocol,
}

impl ProtocolTask {
    pub fn new(protocol: Protocol) -> Self {
        Self { protocol }
    }
}

impl Runnable for ProtocolTask {
    fn run(&mut self, ctx: &mut TaskContext<'_>) -> Result<(), TaskError> {
        let total = self.protocol.steps.len();
        for (i, step) in self.protocol.steps.iter().enumerate() {
            ctx.check_cancelled()?;
            ctx.set_status_message(format!(
                "Executing step {}/{}: {}",
                i + 1,
                total,
                step.operation
            ));
            run_step(step, ctx).map_err(|e| match e {
                TaskError::Execution(message) => {
                    TaskError::Execution(format!("Step {} ({}): {message}", i + 1, step.operation))
                }
                other => other,
            })?;
            ctx.set_progress(((i + 1) * 100 / total) as u8);
        }
        Ok(())
    }
}

/// A single operation run outside any protocol.
pub struct OperationTask {
    step: ProtocolStep,
}

impl OperationTask {
    pub fn new(step: ProtocolStep) -> Self {
        Self { step }
    }
}

impl Runnable for OperationTask {
    fn run(&mut self, ctx: &mut TaskContext<'_>) -> Result<(), TaskError> {
        ctx.check_cancelled()?;
        run_step(&self.step, ctx)
    }
}
