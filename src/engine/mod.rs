pub mod result;
pub mod simulated;
pub mod skill_info;

pub use result::{AnalysisResult, Joint, JointLabel, Limb, PassLatency, SkeletalBody};
pub use simulated::{SimulatedDevices, SimulatedSkillFactory};
pub use skill_info::{InputDescriptor, PixelFormat, SkillInfo, SkillVersion};

use crate::common::{ExecutionDeviceDescriptor, Frame};
use crate::error::EngineError;
use async_trait::async_trait;

/// Two-phase analysis unit bound to one execution device.
///
/// Callers measure the latency of each phase; engines do no timing of their own.
#[async_trait]
pub trait AnalysisEngine: Send {
    fn device(&self) -> &ExecutionDeviceDescriptor;

    /// Attach `frame` as the input of the next evaluation.
    /// Fails with [`EngineError::Bind`] when the frame shape or format is not supported.
    async fn bind(&mut self, frame: &Frame) -> Result<(), EngineError>;

    /// Run detection against the bound input.
    /// Fails with [`EngineError::Evaluation`] when the backend goes away mid-run.
    async fn evaluate(&mut self) -> Result<Vec<SkeletalBody>, EngineError>;
}

/// Builds engines and enumerates the devices they can run on.
#[async_trait]
pub trait EngineFactory: Send + Sync {
    fn skill_info(&self) -> SkillInfo;

    async fn list_execution_devices(&self) -> Vec<ExecutionDeviceDescriptor>;

    /// Construct a fresh engine on `device`, or on the default device when `None`.
    /// Fails with [`EngineError::DeviceUnavailable`] when the device no longer resolves.
    async fn create(
        &self,
        device: Option<&ExecutionDeviceDescriptor>,
    ) -> Result<Box<dyn AnalysisEngine>, EngineError>;
}
