//! Untextured fills drawn between tile layers.
//!
//! A [`GraphicsLayer`] holds solid rectangles (selection boxes, fog, debug
//! overlays) that sit in a [`crate::ZLayer`] stack next to tile layers. It
//! never reports itself modified: its fills are picked up whenever something
//! else makes the stack redraw.

use kurbo::Rect;

/// One solid rectangle in layer space, straight-alpha colour.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GraphicsFill {
    pub rect: Rect,
    pub color: [f32; 4],
}

#[derive(Debug, Clone, Default)]
pub struct GraphicsLayer {
    fills: Vec<GraphicsFill>,
}

impl GraphicsLayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fill_rect(&mut self, rect: Rect, color: [f32; 4]) {
        self.fills.push(GraphicsFill { rect, color });
    }

    pub fn fills(&self) -> &[GraphicsFill] {
        &self.fills
    }

    pub fn is_empty(&self) -> bool {
        self.fills.is_empty()
    }

    pub fn clear(&mut self) {
        self.fills.clear();
    }

    /// Always false; graphics content does not invalidate a cache by itself.
    pub const fn is_modified(&self, _animation_advanced: bool) -> bool {
        false
    }

    pub fn clear_modify(&mut self) {}
}
