use std::fmt;

/// Lifecycle of the pipeline as seen by the frame path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PipelineState {
    /// No source attached.
    #[default]
    Idle,
    /// Source attached; arriving frames may be analyzed.
    Running,
    /// A source or device swap is in progress; arriving frames are ignored.
    Reconfiguring,
}

impl PipelineState {
    pub fn accepts_frames(self) -> bool {
        self == PipelineState::Running
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PipelineState::Idle => "idle",
            PipelineState::Running => "running",
            PipelineState::Reconfiguring => "reconfiguring",
        };
        f.write_str(label)
    }
}
