//! Built-in operations available to every protocol.

use crate::{
    catalog::Operation,
    cancel::read_lines_cancellable,
    data::{DataKind, DataObject, Promptable, TextVariable},
    protocol::ProtocolStep,
    registry::NameRange,
    task::{TaskContext, TaskError},
};
use std::{fs::File, io::BufReader, sync::Arc};

pub fn builtin_operations() -> Vec<Arc<dyn Operation>> {
    vec![
        Arc::new(NewData),
        Arc::new(DeleteData),
        Arc::new(RenameData),
        Arc::new(CopyData),
        Arc::new(PromptData),
        Arc::new(LoadText),
    ]
}

fn split_names(text: &str) -> Vec<&str> {
    text.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// `new`: stores the object given in `params.object`, optionally under `target`.
pub struct NewData;

impl Operation for NewData {
    fn name(&self) -> &str {
        "new"
    }

    fn description(&self) -> &str {
        "Create a data object from its JSON description"
    }

    fn execute(&self, step: &ProtocolStep, ctx: &mut TaskContext<'_>) -> Result<(), TaskError> {
        let raw = step
            .params
            .get("object")
            .cloned()
            .ok_or_else(|| TaskError::execution("'new' needs an 'object' parameter"))?;
        let object: DataObject = serde_json::from_value(raw)
            .map_err(|e| TaskError::Execution(format!("Invalid data object: {e}")))?;
        let object = match step.target.as_deref() {
            Some(target) if target != object.name() => object.renamed_copy(target),
            _ => object,
        };
        ctx.engine().store(object)?;
        Ok(())
    }
}

/// `delete`: removes every listed name. Entries may be `prefix[a-b]suffix` ranges.
pub struct DeleteData;

impl Operation for DeleteData {
    fn name(&self) -> &str {
        "delete"
    }

    fn description(&self) -> &str {
        "Delete data objects by name or numbered range"
    }

    fn execute(&self, step: &ProtocolStep, ctx: &mut TaskContext<'_>) -> Result<(), TaskError> {
        let source = step.require_source()?;
        let kind_filter = match step.param_str("kind") {
            Some(text) => Some(
                DataKind::parse(text)
                    .ok_or_else(|| TaskError::Execution(format!("Unknown data type '{text}'")))?,
            ),
            None => None,
        };
        let engine = ctx.engine();
        let mut names: Vec<String> = Vec::new();
        for token in split_names(source) {
            match NameRange::parse(token) {
                Some(range) => {
                    let kinds: Vec<DataKind> = match kind_filter {
                        Some(kind) => vec![kind],
                        None => DataKind::ALL.to_vec(),
                    };
                    for kind in kinds {
                        names.extend(
                            engine
                                .in_numeric_range(kind, &range.prefix, &range.suffix, range.from, range.to)
                                .into_iter()
                                .map(|o| o.name().to_string()),
                        );
                    }
                }
                None => {
                    if !engine.contains(token) {
                        return Err(TaskError::Execution(format!("Unknown data object '{token}'")));
                    }
                    names.push(token.to_string());
                }
            }
        }
        let total = names.len();
        let mut poller = ctx.poller();
        for (i, name) in names.iter().enumerate() {
            poller.tick()?;
            ctx.engine().remove(name)?;
            if total > 0 {
                ctx.set_progress(((i + 1) * 100 / total) as u8);
            }
        }
        Ok(())
    }
}

pub struct RenameData;

impl Operation for RenameData {
    fn name(&self) -> &str {
        "rename"
    }

    fn description(&self) -> &str {
        "Rename a data object"
    }

    fn execute(&self, step: &ProtocolStep, ctx: &mut TaskContext<'_>) -> Result<(), TaskError> {
        ctx.engine()
            .rename(step.require_source()?, step.require_target()?)?;
        Ok(())
    }
}

pub struct CopyData;

impl Operation for CopyData {
    fn name(&self) -> &str {
        "copy"
    }

    fn description(&self) -> &str {
        "Copy a data object under a new name"
    }

    fn execute(&self, step: &ProtocolStep, ctx: &mut TaskContext<'_>) -> Result<(), TaskError> {
        let source = step.require_source()?;
        let target = step.require_target()?;
        let original = ctx
            .engine()
            .get(source)
            .ok_or_else(|| TaskError::Execution(format!("Unknown data object '{source}'")))?;
        ctx.engine().store(original.renamed_copy(target))?;
        Ok(())
    }
}

/// `prompt`: asks the client for a new value and updates the object in place.
pub struct PromptData;

impl Operation for PromptData {
    fn name(&self) -> &str {
        "prompt"
    }

    fn description(&self) -> &str {
        "Ask the user for a new value of a data object"
    }

    fn execute(&self, step: &ProtocolStep, ctx: &mut TaskContext<'_>) -> Result<(), TaskError> {
        let source = step.require_source()?;
        let engine = ctx.engine();
        let mut object = engine
            .get(source)
            .ok_or_else(|| TaskError::Execution(format!("Unknown data object '{source}'")))?;
        let client = engine
            .client()
            .ok_or_else(|| TaskError::execution("No client is available to answer prompts"))?;
        let Some(value) = client.prompt_value(&object) else {
            return Err(TaskError::Cancelled);
        };
        object
            .apply_prompt_value(&value)
            .map_err(|e| TaskError::Execution(e.to_string()))?;
        engine.update(object)?;
        Ok(())
    }
}

/// `load_text`: reads `params.path` line by line into a text variable named `target`.
pub struct LoadText;

impl Operation for LoadText {
    fn name(&self) -> &str {
        "load_text"
    }

    fn description(&self) -> &str {
        "Load a text file into a text variable"
    }

    fn execute(&self, step: &ProtocolStep, ctx: &mut TaskContext<'_>) -> Result<(), TaskError> {
        let target = step.require_target()?;
        let path = step
            .param_str("path")
            .ok_or_else(|| TaskError::execution("'load_text' needs a 'path' parameter"))?;
        ctx.set_status_message(format!("Reading '{path}'"));
        let file = File::open(path).map_err(TaskError::unexpected)?;
        let interval = ctx.engine().config().cancel_poll_interval;
        let lines = read_lines_cancellable(BufReader::new(file), ctx.cancellation(), interval)?;
        ctx.engine()
            .store(DataObject::TextVariable(TextVariable::new(target, lines)))?;
        ctx.set_progress(100);
        Ok(())
    }
}
