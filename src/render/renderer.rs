use crate::engine::{Joint, Limb, SkeletalBody};
use crate::render::geometry::OverlayRect;

/// A limb projected onto the display surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    pub from: (f32, f32),
    pub to: (f32, f32),
}

/// Turns detected bodies into overlay segments for the current canvas.
///
/// Live sources get exponential smoothing against the previously drawn pose;
/// static (file) sources are drawn exactly as detected.
pub struct BodyRenderer {
    canvas: OverlayRect,
    visible: bool,
    smoothing_factor: f32,
    bodies: Vec<SkeletalBody>,
    segments: Vec<Segment>,
    updates: u64,
}

impl BodyRenderer {
    /// `smoothing_factor` is the weight kept from the previous pose, in `[0, 1]`.
    pub fn new(smoothing_factor: f32) -> Self {
        Self {
            canvas: OverlayRect::default(),
            visible: false,
            smoothing_factor: smoothing_factor.clamp(0.0, 1.0),
            bodies: Vec::new(),
            segments: Vec::new(),
            updates: 0,
        }
    }

    pub fn update(&mut self, bodies: &[SkeletalBody], is_static_source: bool) {
        self.updates += 1;
        self.bodies = if is_static_source || !self.is_continuation_of(bodies) {
            bodies.to_vec()
        } else {
            bodies
                .iter()
                .zip(&self.bodies)
                .map(|(current, previous)| self.smooth(previous, current))
                .collect()
        };
        self.project();
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    /// Move the overlay to a new canvas and redraw the current pose on it.
    pub fn set_canvas(&mut self, canvas: OverlayRect) {
        self.canvas = canvas;
        self.project();
    }

    pub fn canvas(&self) -> OverlayRect {
        self.canvas
    }

    pub fn clear(&mut self) {
        self.bodies.clear();
        self.segments.clear();
    }

    /// Segments to draw; empty while hidden or when the canvas has no area.
    pub fn segments(&self) -> &[Segment] {
        if self.visible && !self.canvas.is_empty() {
            &self.segments
        } else {
            &[]
        }
    }

    pub fn update_count(&self) -> u64 {
        self.updates
    }

    fn is_continuation_of(&self, bodies: &[SkeletalBody]) -> bool {
        self.bodies.len() == bodies.len()
            && self
                .bodies
                .iter()
                .zip(bodies)
                .all(|(previous, current)| previous.limbs.len() == current.limbs.len())
    }

    fn smooth(&self, previous: &SkeletalBody, current: &SkeletalBody) -> SkeletalBody {
        let keep = self.smoothing_factor;
        let blend = |previous: &Joint, current: &Joint| Joint {
            label: current.label,
            x: previous.x * keep + current.x * (1.0 - keep),
            y: previous.y * keep + current.y * (1.0 - keep),
        };
        SkeletalBody {
            limbs: previous
                .limbs
                .iter()
                .zip(&current.limbs)
                .map(|(previous, current)| Limb {
                    start: blend(&previous.start, &current.start),
                    end: blend(&previous.end, &current.end),
                })
                .collect(),
        }
    }

    fn project(&mut self) {
        let canvas = self.canvas;
        self.segments = self
            .bodies
            .iter()
            .flat_map(|body| body.limbs.iter())
            .map(|limb| Segment {
                from: canvas.project(limb.start.x, limb.start.y),
                to: canvas.project(limb.end.x, limb.end.y),
            })
            .collect();
    }
}
