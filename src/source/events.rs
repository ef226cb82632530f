use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use tracing::{debug, warn};

use crate::common::Frame;
use crate::error::SourceError;

pub type FrameCallback = Arc<dyn Fn(Frame) + Send + Sync>;
pub type FailureCallback = Arc<dyn Fn(SourceError) + Send + Sync>;

/// Notification hub every frame source publishes through.
///
/// Frames and failures travel on separate subscriptions. Callbacks run on the
/// producer's own thread and are invoked outside of the internal locks, so a
/// subscriber may unsubscribe from inside a callback.
#[derive(Default)]
pub struct SourceEvents {
    frames: RwLock<Option<FrameCallback>>,
    failures: RwLock<Option<FailureCallback>>,
    failed: AtomicBool,
}

impl SourceEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe_frames(&self, callback: FrameCallback) {
        if let Ok(mut slot) = self.frames.write() {
            *slot = Some(callback);
        }
    }

    pub fn unsubscribe_frames(&self) {
        if let Ok(mut slot) = self.frames.write() {
            *slot = None;
        }
    }

    pub fn subscribe_failures(&self, callback: FailureCallback) {
        if let Ok(mut slot) = self.failures.write() {
            *slot = Some(callback);
        }
    }

    pub fn unsubscribe_failures(&self) {
        if let Ok(mut slot) = self.failures.write() {
            *slot = None;
        }
    }

    pub fn has_frame_subscriber(&self) -> bool {
        self.frames.read().map(|slot| slot.is_some()).unwrap_or(false)
    }

    /// Push a frame to the subscriber. Returns `false` when nobody listens.
    pub fn emit_frame(&self, frame: Frame) -> bool {
        let callback = self.frames.read().ok().and_then(|slot| slot.clone());
        match callback {
            Some(callback) => {
                callback(frame);
                true
            }
            None => false,
        }
    }

    /// Report an unrecoverable producer error. Only the first report is
    /// delivered; a source fails at most once.
    pub fn report_failure(&self, error: SourceError) {
        if self.failed.swap(true, Ordering::AcqRel) {
            debug!("Ignoring repeated source failure: {}", error);
            return;
        }
        let callback = self.failures.read().ok().and_then(|slot| slot.clone());
        match callback {
            Some(callback) => callback(error),
            None => warn!("Source failed with no failure subscriber: {}", error),
        }
    }

    pub fn has_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    /// Clear the failure latch before the source is started again.
    pub fn reset_failure(&self) {
        self.failed.store(false, Ordering::Release);
    }
}
