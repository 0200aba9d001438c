//! Per-frame context shared by every draw in a frame.

/// State the host owns for one frame and passes into every draw call.
///
/// The animation phase is multiplied by each tile's baked animation offset, so
/// independently animated tiles can share one draw call.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FrameContext {
    pub animation_frame: [f32; 2],
}

impl FrameContext {
    pub const fn new(animation_frame: [f32; 2]) -> Self {
        Self { animation_frame }
    }

    /// Uniform phase on both axes.
    pub const fn with_phase(phase: f32) -> Self {
        Self {
            animation_frame: [phase, phase],
        }
    }
}
