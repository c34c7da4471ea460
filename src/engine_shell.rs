use crate::{
    client::run_with_retry,
    data::DataKind,
    engine::Engine,
    error::EngineError,
    protocol::{Protocol, ProtocolStep},
    task::Task,
};
use serde_json::{Value, json};
use std::fs;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellCommand {
    Help,
    Capabilities,
    StateSummary,
    List { kind: Option<DataKind> },
    Show { name: String },
    LoadSession { path: String },
    SaveSession { path: String },
    SetParameter { name: String, value: String },
    Op { payload: String },
    Protocol { payload: String },
}

#[derive(Debug, Clone)]
pub struct ShellRunResult {
    pub state_changed: bool,
    pub output: Value,
}

impl ShellCommand {
    pub fn preview(&self) -> String {
        match self {
            Self::Help => "show shell command help".to_string(),
            Self::Capabilities => "inspect engine capabilities".to_string(),
            Self::StateSummary => "show data object summary".to_string(),
            Self::List { kind: Some(kind) } => format!("list every {kind}"),
            Self::List { kind: None } => "list every data object".to_string(),
            Self::Show { name } => format!("show data object '{name}'"),
            Self::LoadSession { path } => format!("load session from '{path}'"),
            Self::SaveSession { path } => format!("save current session to '{path}'"),
            Self::SetParameter { name, value } => format!("set parameter {name} = {value}"),
            Self::Op { .. } => "run one operation step from JSON".to_string(),
            Self::Protocol { .. } => "run a protocol from JSON".to_string(),
        }
    }

    pub fn is_state_mutating(&self) -> bool {
        matches!(
            self,
            Self::LoadSession { .. } | Self::Op { .. } | Self::Protocol { .. }
        )
    }

    pub fn is_config_mutating(&self) -> bool {
        matches!(self, Self::SetParameter { .. })
    }
}

/// Writes the engine config to `config_path` after a command that changed it.
/// Returns `false` when nothing was written: either the command left the
/// config alone or there is no config file to write to.
pub fn persist_config_changes(
    engine: &Engine,
    command: &ShellCommand,
    config_path: Option<&str>,
) -> Result<bool, EngineError> {
    if !command.is_config_mutating() {
        return Ok(false);
    }
    let Some(path) = config_path else {
        return Ok(false);
    };
    engine.config().save_to_path(path)?;
    tracing::info!(path, "engine config saved");
    Ok(true)
}

pub fn shell_help_text() -> &'static str {
    "MotifLab shell commands:\n\
help\n\
capabilities\n\
state-summary\n\
list [KIND]\n\
show NAME\n\
load-session PATH\n\
save-session PATH\n\
set-parameter NAME VALUE   (saved only when --config PATH is given)\n\
op <step-json-or-@file>\n\
protocol <protocol-json-or-@file>\n\
KIND is a data type such as Sequence or \"Motif Collection\""
}

fn parse_json_payload(raw: &str) -> Result<String, String> {
    if let Some(path) = raw.strip_prefix('@') {
        fs::read_to_string(path).map_err(|e| format!("Could not read JSON file '{path}': {e}"))
    } else {
        Ok(raw.to_string())
    }
}

fn token_error(command: &str) -> String {
    format!("Invalid '{command}' usage. Try: help")
}

pub fn parse_shell_tokens(tokens: &[String]) -> Result<ShellCommand, String> {
    if tokens.is_empty() {
        return Err("Missing shell command".to_string());
    }
    let cmd = tokens[0].as_str();
    match cmd {
        "help" | "-h" | "--help" => Ok(ShellCommand::Help),
        "capabilities" => {
            if tokens.len() == 1 {
                Ok(ShellCommand::Capabilities)
            } else {
                Err(token_error(cmd))
            }
        }
        "state-summary" => {
            if tokens.len() == 1 {
                Ok(ShellCommand::StateSummary)
            } else {
                Err(token_error(cmd))
            }
        }
        "list" => {
            if tokens.len() == 1 {
                return Ok(ShellCommand::List { kind: None });
            }
            let text = tokens[1..].join(" ");
            let kind =
                DataKind::parse(&text).ok_or_else(|| format!("Unknown data type '{text}'"))?;
            Ok(ShellCommand::List { kind: Some(kind) })
        }
        "show" => {
            if tokens.len() == 2 {
                Ok(ShellCommand::Show {
                    name: tokens[1].clone(),
                })
            } else {
                Err(token_error(cmd))
            }
        }
        "load-session" => {
            if tokens.len() == 2 {
                Ok(ShellCommand::LoadSession {
                    path: tokens[1].clone(),
                })
            } else {
                Err(token_error(cmd))
            }
        }
        "save-session" => {
            if tokens.len() == 2 {
                Ok(ShellCommand::SaveSession {
                    path: tokens[1].clone(),
                })
            } else {
                Err(token_error(cmd))
            }
        }
        "set-parameter" => {
            if tokens.len() == 3 {
                Ok(ShellCommand::SetParameter {
                    name: tokens[1].clone(),
                    value: tokens[2].clone(),
                })
            } else {
                Err(token_error(cmd))
            }
        }
        "op" => {
            let payload = tokens[1..].join(" ");
            if payload.trim().is_empty() {
                return Err("Missing operation JSON".to_string());
            }
            Ok(ShellCommand::Op { payload })
        }
        "protocol" => {
            let payload = tokens[1..].join(" ");
            if payload.trim().is_empty() {
                return Err("Missing protocol JSON".to_string());
            }
            Ok(ShellCommand::Protocol { payload })
        }
        other => Err(format!("Unknown shell command '{other}'. Try: help")),
    }
}

pub fn parse_shell_line(line: &str) -> Result<ShellCommand, String> {
    let tokens = split_shell_words(line)?;
    parse_shell_tokens(&tokens)
}

pub fn split_shell_words(line: &str) -> Result<Vec<String>, String> {
    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Mode {
        Normal,
        SingleQuoted,
        DoubleQuoted,
    }

    let mut out = Vec::new();
    let mut current = String::new();
    let mut mode = Mode::Normal;
    let mut chars = line.chars();

    while let Some(ch) = chars.next() {
        match mode {
            Mode::Normal => match ch {
                '\'' => mode = Mode::SingleQuoted,
                '"' => mode = Mode::DoubleQuoted,
                '\\' => {
                    if let Some(next) = chars.next() {
                        current.push(next);
                    }
                }
                c if c.is_whitespace() => {
                    if !current.is_empty() {
                        out.push(std::mem::take(&mut current));
                    }
                }
                _ => current.push(ch),
            },
            Mode::SingleQuoted => {
                if ch == '\'' {
                    mode = Mode::Normal;
                } else {
                    current.push(ch);
                }
            }
            Mode::DoubleQuoted => {
                if ch == '"' {
                    mode = Mode::Normal;
                } else if ch == '\\' {
                    if let Some(next) = chars.next() {
                        current.push(next);
                    }
                } else {
                    current.push(ch);
                }
            }
        }
    }

    if mode != Mode::Normal {
        return Err("Unterminated quoted string in shell command".to_string());
    }
    if !current.is_empty() {
        out.push(current);
    }
    if out.is_empty() {
        return Err("Empty shell command".to_string());
    }
    Ok(out)
}

fn task_output(task: &Task) -> Value {
    json!({
        "task": task.name(),
        "status": task.status().to_string(),
        "message": task.status_message(),
    })
}

pub fn execute_shell_command(
    engine: &Engine,
    command: &ShellCommand,
) -> Result<ShellRunResult, String> {
    let result = match command {
        ShellCommand::Help => ShellRunResult {
            state_changed: false,
            output: json!({ "help": shell_help_text() }),
        },
        ShellCommand::Capabilities => ShellRunResult {
            state_changed: false,
            output: serde_json::to_value(engine.capabilities())
                .map_err(|e| format!("Could not serialize capabilities: {e}"))?,
        },
        ShellCommand::StateSummary => ShellRunResult {
            state_changed: false,
            output: serde_json::to_value(engine.summarize_state())
                .map_err(|e| format!("Could not serialize state summary: {e}"))?,
        },
        ShellCommand::List { kind } => {
            let names: Vec<String> = match kind {
                Some(kind) => engine.names_of_kind(*kind),
                None => engine
                    .summarize_state()
                    .objects
                    .into_iter()
                    .map(|o| o.name)
                    .collect(),
            };
            ShellRunResult {
                state_changed: false,
                output: json!({ "names": names }),
            }
        }
        ShellCommand::Show { name } => {
            let object = engine
                .get(name)
                .ok_or_else(|| format!("Unknown data object '{name}'"))?;
            ShellRunResult {
                state_changed: false,
                output: serde_json::to_value(&object)
                    .map_err(|e| format!("Could not serialize '{name}': {e}"))?,
            }
        }
        ShellCommand::LoadSession { path } => {
            engine
                .load_session_from_path(path)
                .map_err(|e| e.to_string())?;
            ShellRunResult {
                state_changed: true,
                output: json!({
                    "message": format!("Loaded session from '{path}'"),
                    "summary": engine.summarize_state()
                }),
            }
        }
        ShellCommand::SaveSession { path } => {
            let written = engine
                .save_session_to_path(path)
                .map_err(|e| e.to_string())?;
            ShellRunResult {
                state_changed: false,
                output: json!({
                    "message": format!("Saved session to '{path}'"),
                    "objects": written
                }),
            }
        }
        ShellCommand::SetParameter { name, value } => {
            engine
                .set_parameter(name, value)
                .map_err(|e| e.to_string())?;
            ShellRunResult {
                state_changed: false,
                output: json!({ "parameter": name, "value": engine.config().parameter(name) }),
            }
        }
        ShellCommand::Op { payload } => {
            let json_text = parse_json_payload(payload)?;
            let step: ProtocolStep = serde_json::from_str(&json_text)
                .map_err(|e| format!("Invalid operation JSON: {e}"))?;
            let policy = engine.config().retry_policy;
            let task = run_with_retry(engine, policy, || Task::for_step(step.clone()))
                .map_err(|e| e.to_string())?;
            ShellRunResult {
                state_changed: true,
                output: json!({ "result": task_output(&task) }),
            }
        }
        ShellCommand::Protocol { payload } => {
            let json_text = parse_json_payload(payload)?;
            let protocol = Protocol::from_json(&json_text).map_err(|e| e.to_string())?;
            let policy = engine.config().retry_policy;
            let task = run_with_retry(engine, policy, || Task::for_protocol(protocol.clone()))
                .map_err(|e| e.to_string())?;
            ShellRunResult {
                state_changed: true,
                output: json!({ "result": task_output(&task) }),
            }
        }
    };
    Ok(result)
}
