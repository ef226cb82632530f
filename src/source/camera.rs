use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use image::{DynamicImage, Rgb, RgbImage};
use rand::Rng;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::common::Frame;
use crate::error::SourceError;
use crate::source::worker::{WorkerSlot, pace};
use crate::source::{FrameSource, FrameSourceKind, SourceEvents};

/// A live capture device polled by the camera source's capture thread.
pub trait CaptureDevice: Send {
    fn name(&self) -> &str;

    fn dimensions(&self) -> (u32, u32);

    /// Grab the next image. An error means the device is gone for good.
    fn grab(&mut self) -> Result<DynamicImage, SourceError>;
}

/// Synthetic camera: a bright block sweeping across a noisy dark background.
pub struct TestPatternDevice {
    name: String,
    width: u32,
    height: u32,
    tick: u64,
    frame_limit: Option<u64>,
}

impl TestPatternDevice {
    pub fn new(name: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            name: name.into(),
            width,
            height,
            tick: 0,
            frame_limit: None,
        }
    }

    /// Simulate the device being unplugged after `frames` grabs.
    pub fn disconnect_after(mut self, frames: u64) -> Self {
        self.frame_limit = Some(frames);
        self
    }
}

impl CaptureDevice for TestPatternDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn grab(&mut self) -> Result<DynamicImage, SourceError> {
        if self.frame_limit.is_some_and(|limit| self.tick >= limit) {
            return Err(SourceError::Fatal(format!("{} disconnected", self.name)));
        }

        let block_width = (self.width / 5).max(1);
        let block_height = (self.height / 2).max(1);
        let travel = self.width.saturating_sub(block_width).max(1) as u64;
        let left = (self.tick * 4 % travel) as u32;
        let top = self.height.saturating_sub(block_height) / 2;
        self.tick += 1;

        let mut rng = rand::rng();
        let image = RgbImage::from_fn(self.width, self.height, |x, y| {
            let inside = (left..left + block_width).contains(&x) && (top..top + block_height).contains(&y);
            if inside {
                Rgb([250, 250, 250])
            } else {
                let noise = rng.random_range(0..24u8);
                Rgb([noise, noise, noise + 8])
            }
        });
        Ok(DynamicImage::ImageRgb8(image))
    }
}

/// Frame source backed by a live [`CaptureDevice`].
pub struct CameraFrameSource {
    id: Uuid,
    device_id: String,
    device_name: String,
    dimensions: (u32, u32),
    device: Arc<Mutex<Option<Box<dyn CaptureDevice>>>>,
    frame_interval: Duration,
    events: Arc<SourceEvents>,
    worker: WorkerSlot,
}

impl CameraFrameSource {
    pub fn new(
        device_id: impl Into<String>,
        device: Box<dyn CaptureDevice>,
        frame_interval: Duration,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            device_id: device_id.into(),
            device_name: device.name().to_string(),
            dimensions: device.dimensions(),
            device: Arc::new(Mutex::new(Some(device))),
            frame_interval,
            events: Arc::new(SourceEvents::new()),
            worker: WorkerSlot::default(),
        }
    }
}

#[async_trait]
impl FrameSource for CameraFrameSource {
    fn kind(&self) -> FrameSourceKind {
        FrameSourceKind::Camera
    }

    fn description(&self) -> String {
        self.device_name.clone()
    }

    fn frame_dimensions(&self) -> (u32, u32) {
        self.dimensions
    }

    fn events(&self) -> &SourceEvents {
        &self.events
    }

    async fn start(&self) -> Result<(), SourceError> {
        let id = self.id;
        let device = Arc::clone(&self.device);
        let events = Arc::clone(&self.events);
        let interval = self.frame_interval;

        let started = self
            .worker
            .start_with(format!("camera-{}", self.device_id), move |cancel_token| {
                events.reset_failure();
                while !cancel_token.is_cancelled() {
                    let grabbed = match device.lock() {
                        Ok(mut guard) => match guard.as_mut() {
                            Some(device) => device.grab(),
                            None => Err(SourceError::Fatal("capture device released".to_string())),
                        },
                        Err(_) => Err(SourceError::Fatal("capture device lock poisoned".to_string())),
                    };
                    match grabbed {
                        Ok(image) => {
                            events.emit_frame(Frame::new(id, image, Utc::now()));
                        }
                        Err(e) => {
                            warn!("Capture failed, stopping capture loop: {}", e);
                            events.report_failure(e);
                            return;
                        }
                    }
                    if !pace(&cancel_token, interval) {
                        break;
                    }
                }
                debug!("Capture loop for source {} stopped", id);
            })
            .await?;
        if started {
            info!("Started camera {}", self.device_id);
        }
        Ok(())
    }

    async fn stop(&self) {
        self.worker.stop().await;
    }

    async fn dispose(&self) {
        self.worker.dispose().await;
        if let Ok(mut device) = self.device.lock() {
            device.take();
        }
        debug!("Camera {} released", self.device_id);
    }
}
