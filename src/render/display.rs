use std::collections::VecDeque;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::common::Frame;
use crate::config::DisplaySettings;
use crate::engine::AnalysisResult;
use crate::error::AppError;
use crate::notify::Notifier;
use crate::render::geometry::{OverlayRect, Size, fit_overlay};
use crate::render::renderer::{BodyRenderer, Segment};

const MESSAGE_HISTORY: usize = 20;

/// What became of a result handed to the display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Rendered,
    /// A newer result was already on screen.
    Stale,
    /// The source the result belongs to was torn down before it reached the display.
    Cancelled,
}

pub enum DisplayCommand {
    BeginSource {
        generation: u64,
        frame_size: (u32, u32),
        is_static: bool,
    },
    EndSource {
        generation: u64,
    },
    Present {
        generation: u64,
        frame: Frame,
        result: AnalysisResult,
        responder: oneshot::Sender<PresentOutcome>,
    },
    SetVisible(bool),
    ResizeSurface {
        width: f32,
        height: f32,
    },
    Snapshot {
        responder: oneshot::Sender<DisplaySnapshot>,
    },
}

/// Copy of everything currently on screen.
#[derive(Debug, Clone, Default)]
pub struct DisplaySnapshot {
    pub surface: Size,
    pub canvas: OverlayRect,
    pub overlay_visible: bool,
    pub segments: Vec<Segment>,
    pub status_text: Option<String>,
    pub last_message: Option<String>,
    pub messages: Vec<String>,
    pub active_generation: Option<u64>,
    pub has_frame: bool,
    pub last_sequence: Option<u64>,
    pub presented: u64,
    pub stale: u64,
    pub cancelled: u64,
    pub renderer_updates: u64,
}

/// Owner of the display surface. Runs on a single task and applies commands
/// one at a time, so renderer calls never overlap.
pub struct DisplayContext {
    renderer: BodyRenderer,
    surface: Size,
    frame_size: Size,
    active_generation: Option<u64>,
    is_static: bool,
    current_frame: Option<Frame>,
    last_sequence: Option<u64>,
    status_text: Option<String>,
    messages: VecDeque<String>,
    presented: u64,
    stale: u64,
    cancelled: u64,
}

impl DisplayContext {
    pub fn new(settings: &DisplaySettings, smoothing_factor: f32) -> Self {
        Self {
            renderer: BodyRenderer::new(smoothing_factor),
            surface: Size::new(settings.width, settings.height),
            frame_size: Size::default(),
            active_generation: None,
            is_static: false,
            current_frame: None,
            last_sequence: None,
            status_text: None,
            messages: VecDeque::with_capacity(MESSAGE_HISTORY),
            presented: 0,
            stale: 0,
            cancelled: 0,
        }
    }

    /// Start the display task. It ends once every [`DisplayHandle`] is dropped.
    ///
    /// `queue_capacity` bounds the command queue only. Notifications travel on
    /// their own unbounded queue and are applied before any pending command.
    pub fn spawn(
        settings: &DisplaySettings,
        smoothing_factor: f32,
        queue_capacity: usize,
    ) -> (DisplayHandle, JoinHandle<()>) {
        let (sender, mut receiver) = mpsc::channel(queue_capacity.max(1));
        let (notices, mut pending_notices) = mpsc::unbounded_channel();
        let mut context = Self::new(settings, smoothing_factor);
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    Some(message) = pending_notices.recv() => context.push_message(message),
                    command = receiver.recv() => match command {
                        Some(command) => context.handle_command(command),
                        None => break,
                    },
                }
            }
            debug!("Display context stopped");
        });
        (DisplayHandle { sender, notices }, task)
    }

    pub fn handle_command(&mut self, command: DisplayCommand) {
        match command {
            DisplayCommand::BeginSource {
                generation,
                frame_size,
                is_static,
            } => self.begin_source(generation, frame_size, is_static),
            DisplayCommand::EndSource { generation } => self.end_source(generation),
            DisplayCommand::Present {
                generation,
                frame,
                result,
                responder,
            } => {
                let outcome = self.present(generation, frame, result);
                let _ = responder.send(outcome);
            }
            DisplayCommand::SetVisible(visible) => self.renderer.set_visible(visible),
            DisplayCommand::ResizeSurface { width, height } => {
                self.surface = Size::new(width, height);
                self.refit();
            }
            DisplayCommand::Snapshot { responder } => {
                let _ = responder.send(self.snapshot());
            }
        }
    }

    fn begin_source(&mut self, generation: u64, frame_size: (u32, u32), is_static: bool) {
        debug!("Display switching to source generation {}", generation);
        self.active_generation = Some(generation);
        self.is_static = is_static;
        self.frame_size = Size::from_pixels(frame_size);
        self.reset_overlay();
        self.refit();
    }

    fn end_source(&mut self, generation: u64) {
        if self.active_generation == Some(generation) {
            self.active_generation = None;
            self.reset_overlay();
        }
    }

    fn reset_overlay(&mut self) {
        self.renderer.set_visible(false);
        self.renderer.clear();
        self.current_frame = None;
    }

    fn present(&mut self, generation: u64, frame: Frame, result: AnalysisResult) -> PresentOutcome {
        if self.active_generation != Some(generation) {
            // source already replaced; nothing to draw on
            self.cancelled += 1;
            debug!("Dropping result {} for retired source", result.sequence);
            return PresentOutcome::Cancelled;
        }
        if self.last_sequence.is_some_and(|last| result.sequence <= last) {
            self.stale += 1;
            warn!(
                "Refusing result {} older than displayed result {:?}",
                result.sequence, self.last_sequence
            );
            return PresentOutcome::Stale;
        }

        let frame_size = Size::new(frame.width() as f32, frame.height() as f32);
        if frame_size != self.frame_size {
            self.frame_size = frame_size;
            self.refit();
        }

        self.last_sequence = Some(result.sequence);
        self.current_frame = Some(frame);
        self.renderer.update(&result.bodies, self.is_static);
        self.renderer.set_visible(true);
        self.status_text = Some(result.summary());
        self.presented += 1;
        PresentOutcome::Rendered
    }

    fn refit(&mut self) {
        self.renderer
            .set_canvas(fit_overlay(self.frame_size, self.surface));
    }

    fn push_message(&mut self, message: String) {
        info!(target: "notification", "{}", message);
        if self.messages.len() == MESSAGE_HISTORY {
            self.messages.pop_front();
        }
        self.messages.push_back(message);
    }

    pub fn snapshot(&self) -> DisplaySnapshot {
        DisplaySnapshot {
            surface: self.surface,
            canvas: self.renderer.canvas(),
            overlay_visible: self.renderer.is_visible(),
            segments: self.renderer.segments().to_vec(),
            status_text: self.status_text.clone(),
            last_message: self.messages.back().cloned(),
            messages: self.messages.iter().cloned().collect(),
            active_generation: self.active_generation,
            has_frame: self.current_frame.is_some(),
            last_sequence: self.last_sequence,
            presented: self.presented,
            stale: self.stale,
            cancelled: self.cancelled,
            renderer_updates: self.renderer.update_count(),
        }
    }
}

/// Submits work to the [`DisplayContext`]. Cheap to clone and usable from any task.
#[derive(Clone)]
pub struct DisplayHandle {
    sender: mpsc::Sender<DisplayCommand>,
    notices: mpsc::UnboundedSender<String>,
}

impl DisplayHandle {
    /// Hand a finished pass to the display and wait until it was applied.
    /// A closed display counts as a cancellation.
    pub async fn present(
        &self,
        generation: u64,
        frame: Frame,
        result: AnalysisResult,
    ) -> PresentOutcome {
        let (responder, outcome) = oneshot::channel();
        let command = DisplayCommand::Present {
            generation,
            frame,
            result,
            responder,
        };
        if self.sender.send(command).await.is_err() {
            return PresentOutcome::Cancelled;
        }
        outcome.await.unwrap_or(PresentOutcome::Cancelled)
    }

    pub async fn begin_source(
        &self,
        generation: u64,
        frame_size: (u32, u32),
        is_static: bool,
    ) -> Result<(), AppError> {
        self.submit(DisplayCommand::BeginSource {
            generation,
            frame_size,
            is_static,
        })
        .await
    }

    pub async fn end_source(&self, generation: u64) -> Result<(), AppError> {
        self.submit(DisplayCommand::EndSource { generation }).await
    }

    pub async fn set_visible(&self, visible: bool) -> Result<(), AppError> {
        self.submit(DisplayCommand::SetVisible(visible)).await
    }

    pub async fn resize_surface(&self, width: f32, height: f32) -> Result<(), AppError> {
        self.submit(DisplayCommand::ResizeSurface { width, height })
            .await
    }

    pub async fn snapshot(&self) -> Result<DisplaySnapshot, AppError> {
        let (responder, snapshot) = oneshot::channel();
        self.submit(DisplayCommand::Snapshot { responder }).await?;
        snapshot
            .await
            .map_err(|_| AppError::Display("display context dropped the snapshot".to_string()))
    }

    async fn submit(&self, command: DisplayCommand) -> Result<(), AppError> {
        self.sender
            .send(command)
            .await
            .map_err(|_| AppError::Display("display context is closed".to_string()))
    }
}

impl Notifier for DisplayHandle {
    fn notify(&self, message: &str) {
        if self.notices.send(message.to_string()).is_err() {
            debug!("Display closed, notification not shown: {}", message);
        }
    }
}
