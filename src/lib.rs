//! Core engine of the MotifLab workbench: a typed data registry, change
//! notifications, a task lifecycle and versioned session streams.

pub mod about;
pub mod cancel;
pub mod catalog;
pub mod client;
pub mod config;
pub mod data;
pub mod engine;
pub mod engine_shell;
pub mod error;
pub mod notify;
pub mod operations;
pub mod pool;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod task;

pub use engine::Engine;
pub use error::{EngineError, ErrorCode};
