pub mod display;
pub mod geometry;
pub mod renderer;

pub use display::{DisplayContext, DisplayHandle, DisplaySnapshot, PresentOutcome};
pub use geometry::{OverlayRect, Size, fit_overlay};
pub use renderer::{BodyRenderer, Segment};
