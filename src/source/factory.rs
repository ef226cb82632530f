use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use tracing::{debug, info};

use crate::config::{SourceKindSetting, SourceSettings};
use crate::error::SourceError;
use crate::source::{CameraFrameSource, CaptureDevice, FileFrameSource, FrameSource, TestPatternDevice};

pub const TEST_PATTERN_CAMERA: &str = "test-pattern";

pub type CaptureDeviceBuilder =
    Box<dyn Fn() -> Result<Box<dyn CaptureDevice>, SourceError> + Send + Sync>;

/// What the user picked as the next frame source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceRequest {
    File {
        path: PathBuf,
        frame_interval: Duration,
        looping: bool,
    },
    Camera {
        device_id: String,
    },
}

impl SourceRequest {
    pub fn from_settings(settings: &SourceSettings) -> Option<Self> {
        match settings.kind {
            SourceKindSetting::File => settings.path.clone().map(|path| SourceRequest::File {
                path,
                frame_interval: settings.frame_interval(),
                looping: settings.looping,
            }),
            SourceKindSetting::Camera => Some(SourceRequest::Camera {
                device_id: settings.camera_id.clone(),
            }),
        }
    }
}

/// Turns a [`SourceRequest`] into a ready, not yet started, frame source.
pub struct SourceFactory {
    cameras: IndexMap<String, CaptureDeviceBuilder>,
    camera_interval: Duration,
}

impl SourceFactory {
    pub fn new(camera_interval: Duration) -> Self {
        let factory = Self {
            cameras: IndexMap::new(),
            camera_interval,
        };
        factory.register_camera(TEST_PATTERN_CAMERA, || {
            Ok(Box::new(TestPatternDevice::new("Test pattern camera", 640, 480)) as Box<dyn CaptureDevice>)
        })
    }

    pub fn register_camera<F>(mut self, device_id: impl Into<String>, builder: F) -> Self
    where
        F: Fn() -> Result<Box<dyn CaptureDevice>, SourceError> + Send + Sync + 'static,
    {
        self.cameras.insert(device_id.into(), Box::new(builder));
        self
    }

    pub fn camera_ids(&self) -> Vec<String> {
        self.cameras.keys().cloned().collect()
    }

    /// Build the requested source. Every failure comes back as
    /// [`SourceError::Construction`] with a readable reason.
    pub async fn create(&self, request: SourceRequest) -> Result<Arc<dyn FrameSource>, SourceError> {
        debug!("Creating frame source for {:?}", request);
        match request {
            SourceRequest::File {
                path,
                frame_interval,
                looping,
            } => {
                let opened = tokio::task::spawn_blocking(move || {
                    FileFrameSource::open(&path, frame_interval, looping)
                })
                .await
                .map_err(|e| SourceError::Construction(e.to_string()))?;
                let source = opened.map_err(into_construction)?;
                info!("Opened file source {}", source.description());
                Ok(Arc::new(source))
            }
            SourceRequest::Camera { device_id } => {
                let builder = self.cameras.get(&device_id).ok_or_else(|| {
                    SourceError::Construction(format!("unknown camera '{}'", device_id))
                })?;
                let device = builder().map_err(into_construction)?;
                info!("Attaching to camera {}", device.name());
                Ok(Arc::new(CameraFrameSource::new(
                    device_id,
                    device,
                    self.camera_interval,
                )))
            }
        }
    }
}

fn into_construction(error: SourceError) -> SourceError {
    match error {
        SourceError::Construction(_) => error,
        other => SourceError::Construction(other.to_string()),
    }
}
