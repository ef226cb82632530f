pub mod common;
pub mod config;
pub mod engine;
pub mod error;
pub mod notify;
pub mod pipeline;
pub mod render;
pub mod source;


pub use error::{AppError, ConfigError, EngineError, PipelineError, SourceError};
pub use pipeline::{ExecutionGate, PipelineController, PipelineState};
