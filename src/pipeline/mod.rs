pub mod controller;
pub mod gate;
pub mod metrics;
pub mod state;

#[cfg(test)]
mod scenarios;

pub use controller::{PipelineController, PipelineControllerBuilder};
pub use gate::{ExecutionGate, GatePermit, GateStats};
pub use metrics::{MetricsCollector, MetricsObserver, PerformanceMonitor, PerformanceStats};
pub use state::PipelineState;
