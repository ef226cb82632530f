use thiserror::Error;
use uuid::Uuid;

// Main Application Error Type

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Pipeline Error: {0}")]
    Pipeline(#[from] PipelineError),
    #[error("Source Error: {0}")]
    Source(#[from] SourceError),
    #[error("Engine Error: {0}")]
    Engine(#[from] EngineError),
    #[error("Configuration Error: {0}")]
    Config(#[from] ConfigError),
    #[error("Display Error: {0}")]
    Display(String),
}

// Analysis engine errors, raised by bind, evaluate and engine construction
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("Failed to bind frame {frame_id}: {reason}")]
    Bind { frame_id: Uuid, reason: String },
    #[error("Evaluation failed: {0}")]
    Evaluation(String),
    #[error("Execution device '{0}' is unavailable")]
    DeviceUnavailable(String),
    #[error("Analysis pass panicked: {0}")]
    Panicked(String),
}

// Frame producer errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("Failed to construct frame source: {0}")]
    Construction(String),
    #[error("Frame source failed: {0}")]
    Fatal(String),
    #[error("End of stream reached for {0}")]
    EndOfStream(String),
    #[error("Failed to read media file {path}: {reason}")]
    Io { path: String, reason: String },
    #[error("Failed to decode image {path}: {reason}")]
    Image { path: String, reason: String },
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("No analysis engine is available")]
    NoEngine,
    #[error("The pipeline has been shut down")]
    ShutDown,
    #[error("Pipeline controller is missing its {0}")]
    Incomplete(&'static str),
    #[error("No async runtime available: {0}")]
    NoRuntime(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load settings: {0}")]
    Load(#[from] config::ConfigError),
    #[error("Invalid setting '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}
