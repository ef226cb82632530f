use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use image::DynamicImage;
use tracing::{debug, info};
use uuid::Uuid;

use crate::common::Frame;
use crate::error::SourceError;
use crate::source::worker::{WorkerSlot, pace};
use crate::source::{FrameSource, FrameSourceKind, SourceEvents};

const IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "gif"];

/// Plays a still image, or a directory of images in name order, as a frame
/// stream on a dedicated thread. Every frame, the first included, is emitted
/// one interval after the previous event.
pub struct FileFrameSource {
    id: Uuid,
    name: String,
    images: Arc<Vec<Arc<DynamicImage>>>,
    frame_interval: Duration,
    looping: bool,
    events: Arc<SourceEvents>,
    worker: WorkerSlot,
}

impl FileFrameSource {
    /// Load `path` (an image file or a directory of images). Blocking.
    pub fn open(
        path: &Path,
        frame_interval: Duration,
        looping: bool,
    ) -> Result<Self, SourceError> {
        let files = if path.is_dir() {
            list_images(path)?
        } else {
            vec![path.to_path_buf()]
        };

        let images = files
            .iter()
            .map(|file| {
                image::open(file).map_err(|e| SourceError::Image {
                    path: file.display().to_string(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        info!("Loaded {} frame(s) from {}", images.len(), path.display());
        Self::from_images(path.display().to_string(), images, frame_interval, looping)
    }

    pub fn from_images(
        name: impl Into<String>,
        images: Vec<DynamicImage>,
        frame_interval: Duration,
        looping: bool,
    ) -> Result<Self, SourceError> {
        let name = name.into();
        if images.is_empty() {
            return Err(SourceError::Construction(format!(
                "{} contains no frames",
                name
            )));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            name,
            images: Arc::new(images.into_iter().map(Arc::new).collect()),
            frame_interval,
            looping,
            events: Arc::new(SourceEvents::new()),
            worker: WorkerSlot::default(),
        })
    }
}

fn list_images(dir: &Path) -> Result<Vec<PathBuf>, SourceError> {
    let io_error = |e: std::io::Error| SourceError::Io {
        path: dir.display().to_string(),
        reason: e.to_string(),
    };

    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_error)? {
        let path = entry.map_err(io_error)?.path();
        let is_image = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        if path.is_file() && is_image {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[async_trait]
impl FrameSource for FileFrameSource {
    fn kind(&self) -> FrameSourceKind {
        FrameSourceKind::File
    }

    fn description(&self) -> String {
        self.name.clone()
    }

    fn frame_dimensions(&self) -> (u32, u32) {
        self.images
            .first()
            .map(|image| (image.width(), image.height()))
            .unwrap_or((0, 0))
    }

    fn events(&self) -> &SourceEvents {
        &self.events
    }

    async fn start(&self) -> Result<(), SourceError> {
        let id = self.id;
        let name = self.name.clone();
        let images = Arc::clone(&self.images);
        let events = Arc::clone(&self.events);
        let interval = self.frame_interval;
        let looping = self.looping;

        let started = self
            .worker
            .start_with(format!("file-source-{}", id), move |cancel_token| {
                events.reset_failure();
                debug!("File playback started: {}", name);
                loop {
                    for image in images.iter() {
                        if !pace(&cancel_token, interval) {
                            return;
                        }
                        events.emit_frame(Frame::from_shared(id, Arc::clone(image), Utc::now()));
                    }
                    if !looping {
                        break;
                    }
                }
                debug!("File playback finished: {}", name);
                events.report_failure(SourceError::EndOfStream(name));
            })
            .await?;
        if started {
            info!("Started file source {}", self.name);
        }
        Ok(())
    }

    async fn stop(&self) {
        self.worker.stop().await;
    }

    async fn dispose(&self) {
        self.worker.dispose().await;
        debug!("File source {} disposed", self.name);
    }
}
