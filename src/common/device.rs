use std::fmt;

use serde::{Deserialize, Serialize};

/// Hardware or software backend family an analysis engine can run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionDeviceKind {
    Cpu,
    Gpu,
    Vpu,
}

impl fmt::Display for ExecutionDeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ExecutionDeviceKind::Cpu => "CPU",
            ExecutionDeviceKind::Gpu => "GPU",
            ExecutionDeviceKind::Vpu => "VPU",
        };
        f.write_str(label)
    }
}

/// Identifies one execution device. Two descriptors denote the same device
/// when both kind and name match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionDeviceDescriptor {
    pub kind: ExecutionDeviceKind,
    pub name: String,
}

impl ExecutionDeviceDescriptor {
    pub fn new(kind: ExecutionDeviceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

impl fmt::Display for ExecutionDeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} | {}", self.kind, self.name)
    }
}

/// Index of `device` in an enumerated device list.
pub fn position_of(
    devices: &[ExecutionDeviceDescriptor],
    device: &ExecutionDeviceDescriptor,
) -> Option<usize> {
    devices
        .iter()
        .position(|candidate| candidate.kind == device.kind && candidate.name == device.name)
}
