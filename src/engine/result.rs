use std::time::Duration;

use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JointLabel {
    Head,
    Neck,
    RightShoulder,
    RightElbow,
    RightWrist,
    LeftShoulder,
    LeftElbow,
    LeftWrist,
    RightHip,
    RightKnee,
    RightAnkle,
    LeftHip,
    LeftKnee,
    LeftAnkle,
}

/// A joint position normalized to the frame, both axes in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Joint {
    pub label: JointLabel,
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Limb {
    pub start: Joint,
    pub end: Joint,
}

/// One detected skeleton.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SkeletalBody {
    pub limbs: Vec<Limb>,
}

impl SkeletalBody {
    pub fn joints(&self) -> impl Iterator<Item = &Joint> {
        self.limbs.iter().flat_map(|limb| [&limb.start, &limb.end])
    }
}

/// Time spent in each phase of one analysis pass, measured by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PassLatency {
    pub bind: Duration,
    pub evaluate: Duration,
}

impl PassLatency {
    pub fn bind_ms(&self) -> f32 {
        self.bind.as_secs_f32() * 1000.0
    }

    pub fn evaluate_ms(&self) -> f32 {
        self.evaluate.as_secs_f32() * 1000.0
    }

    pub fn total(&self) -> Duration {
        self.bind + self.evaluate
    }
}

/// Outcome of one completed analysis pass.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisResult {
    /// Monotonic pass number; later passes always carry larger values.
    pub sequence: u64,
    pub frame_id: Uuid,
    pub bodies: Vec<SkeletalBody>,
    pub latency: PassLatency,
}

impl AnalysisResult {
    pub fn summary(&self) -> String {
        format!(
            "Found {} bodies (bind: {:.2}ms, eval: {:.2}ms)",
            self.bodies.len(),
            self.latency.bind_ms(),
            self.latency.evaluate_ms()
        )
    }
}
