pub mod device;
pub mod frame;

pub use device::{ExecutionDeviceDescriptor, ExecutionDeviceKind};
pub use frame::Frame;
