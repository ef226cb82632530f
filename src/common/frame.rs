use chrono::{DateTime, Utc};
use image::DynamicImage;
use std::sync::Arc;
use uuid::Uuid;

/// One captured video sample. Cloning shares the pixel buffer.
#[derive(Clone, Debug)]
pub struct Frame {
    source_id: Uuid,
    image: Arc<DynamicImage>,
    captured_at: DateTime<Utc>,
    frame_id: Uuid,
}

impl Frame {
    pub fn new(source_id: Uuid, image: DynamicImage, captured_at: DateTime<Utc>) -> Self {
        Self::from_shared(source_id, Arc::new(image), captured_at)
    }

    pub fn from_shared(
        source_id: Uuid,
        image: Arc<DynamicImage>,
        captured_at: DateTime<Utc>,
    ) -> Self {
        Self {
            source_id,
            image,
            captured_at,
            frame_id: Uuid::new_v4(),
        }
    }

    pub fn source_id(&self) -> Uuid {
        self.source_id
    }

    pub fn frame_id(&self) -> Uuid {
        self.frame_id
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    pub fn image(&self) -> &DynamicImage {
        &self.image
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}
