pub mod camera;
pub mod events;
pub mod factory;
pub mod file;
mod worker;

pub use camera::{CameraFrameSource, CaptureDevice, TestPatternDevice};
pub use events::{FailureCallback, FrameCallback, SourceEvents};
pub use factory::{SourceFactory, SourceRequest};
pub use file::FileFrameSource;

use async_trait::async_trait;

use crate::error::SourceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameSourceKind {
    Camera,
    File,
}

/// A replaceable producer of frames.
///
/// Frames and failures are delivered through [`FrameSource::events`], usually
/// from a thread the source owns. `start` and `stop` are idempotent and `stop`
/// is safe before `start` has ever completed. `dispose` releases the backing
/// device or file; the source cannot be started again afterwards.
#[async_trait]
pub trait FrameSource: Send + Sync {
    fn kind(&self) -> FrameSourceKind;

    /// Human readable name of the backing device or file.
    fn description(&self) -> String;

    /// Width and height of the frames this source produces.
    fn frame_dimensions(&self) -> (u32, u32);

    fn events(&self) -> &SourceEvents;

    async fn start(&self) -> Result<(), SourceError>;

    async fn stop(&self);

    async fn dispose(&self);

    /// File-backed frames are not continuous with real time.
    fn is_static(&self) -> bool {
        self.kind() == FrameSourceKind::File
    }
}
