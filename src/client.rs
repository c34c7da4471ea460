//! What a front end (GUI, CLI, batch runner) provides to the engine.

use crate::{
    data::DataObject,
    engine::Engine,
    error::{EngineError, ErrorCode},
    notify::{LogLevel, MessageListener},
    task::{Task, TaskEvent, TaskObserver},
};
use motiflab_protocol::{RetryPolicy, TaskStatus};
use std::sync::Arc;

pub trait Client: MessageListener {
    /// Asks the user for a new value for `data`. `None` means the prompt was cancelled.
    fn prompt_value(&self, data: &DataObject) -> Option<String>;

    /// Asked after a failed task when the retry policy is `PROMPT_RETRY`.
    fn should_retry(&self, task_name: &str, error: &EngineError) -> bool;

    fn handle_uncaught_exception(&self, message: &str) {
        self.error_message(message, ErrorCode::Internal as i32);
    }

    fn task_status_changed(&self, _task_name: &str, _status: TaskStatus) {}

    fn shutdown(&self) {}
}

/// Lets a client sit on the bus as a plain message listener.
pub(crate) struct ClientMessages(pub(crate) Arc<dyn Client>);

impl MessageListener for ClientMessages {
    fn error_message(&self, message: &str, code: i32) {
        self.0.error_message(message, code);
    }

    fn log_message(&self, message: &str, level: LogLevel) {
        self.0.log_message(message, level);
    }

    fn status_message(&self, message: &str) {
        self.0.status_message(message);
    }

    fn progress_report(&self, percent: u8) {
        self.0.progress_report(percent);
    }
}

/// Forwards task status transitions to a client.
pub struct ClientTaskObserver(pub Arc<dyn Client>);

impl TaskObserver for ClientTaskObserver {
    fn task_changed(&self, event: &TaskEvent) {
        if let TaskEvent::Status { task, status } = event {
            self.0.task_status_changed(task, *status);
        }
    }
}

/// Runs a freshly built task until it succeeds or `policy` gives up.
///
/// Only execution failures are retried. Automatic retries are capped by the
/// engine's `max_auto_retries` setting.
pub fn run_with_retry<F>(engine: &Engine, policy: RetryPolicy, mut make_task: F) -> Result<Task, EngineError>
where
    F: FnMut() -> Task,
{
    let max_auto_retries = engine.config().max_auto_retries;
    let mut retries = 0usize;
    loop {
        let mut task = make_task();
        let outcome = if task.protocol().is_some() {
            engine.execute_protocol_task(&mut task)
        } else {
            engine.execute_task(&mut task)
        };
        let err = match outcome {
            Ok(()) => return Ok(task),
            Err(err) => err,
        };
        if !err.is_retryable() {
            return Err(err);
        }
        let retry = match policy {
            RetryPolicy::DoNotRetry => false,
            RetryPolicy::PromptRetry => engine
                .client()
                .is_some_and(|client| client.should_retry(task.name(), &err)),
            RetryPolicy::Delay(_) => retries < max_auto_retries,
        };
        if !retry {
            return Err(err);
        }
        if let Some(delay) = policy.delay() {
            engine.bus().status_message(&format!(
                "Retrying '{}' in {} second(s)",
                task.name(),
                delay.as_secs()
            ));
            std::thread::sleep(delay);
        }
        retries += 1;
        engine.bus().log_message(
            &format!("Retrying '{}' (attempt {})", task.name(), retries + 1),
            LogLevel::Info,
        );
    }
}
