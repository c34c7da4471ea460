//! Units of work and their run/abort/error lifecycle.
//!
//! A [`Task`] runs exactly once, on the thread that asks the engine to execute
//! it. Its status only ever moves `CREATED -> RUNNING -> DONE | ERROR | ABORTED`.

use crate::{
    cancel::{CancellationToken, Poller},
    engine::Engine,
    error::EngineError,
    protocol::{OperationTask, Protocol, ProtocolStep, ProtocolTask},
};
use motiflab_protocol::TaskStatus;
use std::{
    any::Any,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
};

pub const ABORTED_MESSAGE: &str = "Aborted!";

/// Failure signalled by a task body.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    /// A recoverable domain failure.
    #[error("{0}")]
    Execution(String),
    #[error("Aborted!")]
    Cancelled,
    /// Anything the body did not anticipate. `origin` names the failing type.
    #[error("{origin}: {message}")]
    Unexpected { origin: String, message: String },
}

impl TaskError {
    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution(message.into())
    }

    pub fn unexpected<E: std::error::Error + 'static>(err: E) -> Self {
        Self::Unexpected {
            origin: std::any::type_name::<E>().to_string(),
            message: err.to_string(),
        }
    }
}

impl From<EngineError> for TaskError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Cancelled => Self::Cancelled,
            EngineError::Io { .. } | EngineError::Internal(_) => Self::unexpected(err),
            other => Self::Execution(other.to_string()),
        }
    }
}

impl From<TaskError> for EngineError {
    fn from(err: TaskError) -> Self {
        match err {
            TaskError::Cancelled => Self::Cancelled,
            other => Self::Execution(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskEvent {
    Status { task: String, status: TaskStatus },
    Message { task: String, message: String },
    Progress { task: String, percent: u8 },
}

pub trait TaskObserver: Send + Sync {
    fn task_changed(&self, event: &TaskEvent);
}

pub trait Runnable: Send {
    fn run(&mut self, ctx: &mut TaskContext<'_>) -> Result<(), TaskError>;
}

impl<F> Runnable for F
where
    F: FnMut(&mut TaskContext<'_>) -> Result<(), TaskError> + Send,
{
    fn run(&mut self, ctx: &mut TaskContext<'_>) -> Result<(), TaskError> {
        self(ctx)
    }
}

fn notify(observers: &[Arc<dyn TaskObserver>], event: TaskEvent) {
    for observer in observers {
        observer.task_changed(&event);
    }
}

/// What a running body can see of its task and the engine.
pub struct TaskContext<'a> {
    engine: &'a Engine,
    name: &'a str,
    cancel: &'a CancellationToken,
    observers: &'a [Arc<dyn TaskObserver>],
    status_message: &'a mut Option<String>,
    progress: &'a mut Option<u8>,
}

impl<'a> TaskContext<'a> {
    pub fn engine(&self) -> &'a Engine {
        self.engine
    }

    pub fn task_name(&self) -> &str {
        self.name
    }

    pub fn cancellation(&self) -> &CancellationToken {
        self.cancel
    }

    pub fn check_cancelled(&self) -> Result<(), TaskError> {
        self.cancel.check()
    }

    /// Poller at the engine's configured cadence.
    pub fn poller(&self) -> Poller {
        self.cancel.poller(self.engine.config().cancel_poll_interval)
    }

    pub fn set_status_message(&mut self, message: impl Into<String>) {
        let message = message.into();
        *self.status_message = Some(message.clone());
        notify(
            self.observers,
            TaskEvent::Message {
                task: self.name.to_string(),
                message,
            },
        );
    }

    pub fn set_progress(&mut self, percent: u8) {
        let percent = percent.min(100);
        *self.progress = Some(percent);
        notify(
            self.observers,
            TaskEvent::Progress {
                task: self.name.to_string(),
                percent,
            },
        );
    }
}

pub struct Task {
    name: String,
    status: TaskStatus,
    status_message: Option<String>,
    progress: Option<u8>,
    cancel: CancellationToken,
    observers: Vec<Arc<dyn TaskObserver>>,
    body: Box<dyn Runnable>,
    protocol: Option<Protocol>,
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("status", &self.status)
            .field("status_message", &self.status_message)
            .field("progress", &self.progress)
            .finish_non_exhaustive()
    }
}

impl Task {
    pub fn new(name: &str, body: impl Runnable + 'static) -> Self {
        Self {
            name: name.to_string(),
            status: TaskStatus::Created,
            status_message: None,
            progress: None,
            cancel: CancellationToken::new(),
            observers: Vec::new(),
            body: Box::new(body),
            protocol: None,
        }
    }

    pub fn for_protocol(protocol: Protocol) -> Self {
        let mut ret = Self::new(&protocol.name, ProtocolTask::new(protocol.clone()));
        ret.protocol = Some(protocol);
        ret
    }

    pub fn for_step(step: ProtocolStep) -> Self {
        Self::new(&step.operation.clone(), OperationTask::new(step))
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn status_message(&self) -> Option<&str> {
        self.status_message.as_deref()
    }

    pub fn progress(&self) -> Option<u8> {
        self.progress
    }

    pub fn protocol(&self) -> Option<&Protocol> {
        self.protocol.as_ref()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    pub fn add_observer(&mut self, observer: Arc<dyn TaskObserver>) {
        if !self
            .observers
            .iter()
            .any(|o| std::ptr::addr_eq(Arc::as_ptr(o), Arc::as_ptr(&observer)))
        {
            self.observers.push(observer);
        }
    }

    pub fn remove_observer(&mut self, observer: &Arc<dyn TaskObserver>) {
        self.observers
            .retain(|o| !std::ptr::addr_eq(Arc::as_ptr(o), Arc::as_ptr(observer)));
    }

    fn set_status(&mut self, status: TaskStatus) {
        if !self.status.can_transition_to(status) {
            tracing::warn!(task = %self.name, from = %self.status, to = %status, "ignored illegal task transition");
            return;
        }
        self.status = status;
        notify(
            &self.observers,
            TaskEvent::Status {
                task: self.name.clone(),
                status,
            },
        );
    }

    fn set_final_message(&mut self, message: String) {
        self.status_message = Some(message.clone());
        notify(
            &self.observers,
            TaskEvent::Message {
                task: self.name.clone(),
                message,
            },
        );
    }

    /// Runs the body on the calling thread and settles the terminal status.
    pub(crate) fn run(&mut self, engine: &Engine) -> Result<(), TaskError> {
        if self.status != TaskStatus::Created {
            return Err(TaskError::Execution(format!(
                "Task '{}' can not be started from status {}",
                self.name, self.status
            )));
        }
        self.set_status(TaskStatus::Running);

        let outcome = {
            let Task {
                name,
                cancel,
                observers,
                body,
                status_message,
                progress,
                ..
            } = self;
            let mut ctx = TaskContext {
                engine,
                name: name.as_str(),
                cancel: &*cancel,
                observers: observers.as_slice(),
                status_message,
                progress,
            };
            catch_unwind(AssertUnwindSafe(|| body.run(&mut ctx)))
        };
        let outcome = outcome.unwrap_or_else(|payload| {
            Err(TaskError::Unexpected {
                origin: "panic".to_string(),
                message: panic_message(payload.as_ref()),
            })
        });

        match &outcome {
            Ok(()) => self.set_status(TaskStatus::Done),
            Err(TaskError::Cancelled) => {
                self.set_final_message(ABORTED_MESSAGE.to_string());
                self.set_status(TaskStatus::Aborted);
            }
            Err(err) => {
                self.set_final_message(err.to_string());
                self.set_status(TaskStatus::Error);
            }
        }
        outcome
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
