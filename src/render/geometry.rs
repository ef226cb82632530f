#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Size {
    pub width: f32,
    pub height: f32,
}

impl Size {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    pub fn from_pixels((width, height): (u32, u32)) -> Self {
        Self::new(width as f32, height as f32)
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }

    pub fn aspect_ratio(&self) -> f32 {
        self.width / self.height
    }
}

/// Where the overlay canvas sits on the display surface.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct OverlayRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl OverlayRect {
    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }

    /// Map a frame-normalized point onto the surface.
    pub fn project(&self, x: f32, y: f32) -> (f32, f32) {
        (self.x + x * self.width, self.y + y * self.height)
    }
}

/// Largest rectangle with the frame's aspect ratio that fits the surface,
/// centered the way the frame itself is displayed.
pub fn fit_overlay(frame: Size, surface: Size) -> OverlayRect {
    if frame.is_empty() || surface.is_empty() {
        return OverlayRect::default();
    }

    let frame_aspect = frame.aspect_ratio();
    let (width, height) = if frame_aspect >= surface.aspect_ratio() {
        (surface.width, surface.width / frame_aspect)
    } else {
        (surface.height * frame_aspect, surface.height)
    };

    OverlayRect {
        x: (surface.width - width) / 2.0,
        y: (surface.height - height) / 2.0,
        width,
        height,
    }
}
