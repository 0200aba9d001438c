//! Dirty-state compositor for cached raster layers.
//!
//! A [`ZLayer`] rasterizes its children into an offscreen buffer and reuses
//! that buffer until something changes. Presentation only applies the current
//! transform, so scrolling a static layer costs one image blit.

use crate::composite::CompositeTileLayer;
use crate::frame::FrameContext;
use crate::graphics::GraphicsLayer;
use crate::layer::TileLayer;
use crate::raster::{draw_image_into, draw_node_into};
use image::RgbaImage;
use kurbo::Affine;

/// A drawable child of a [`ZLayer`].
#[derive(Debug, Clone)]
pub enum LayerNode {
    Tiles(TileLayer),
    Composite(CompositeTileLayer),
    /// Drawn on every redraw; never makes the stack dirty by itself.
    Graphics(GraphicsLayer),
}

impl LayerNode {
    pub fn is_modified(&self, animation_advanced: bool) -> bool {
        match self {
            Self::Tiles(layer) => layer.is_modified(animation_advanced),
            Self::Composite(composite) => composite.is_modified(animation_advanced),
            Self::Graphics(graphics) => graphics.is_modified(animation_advanced),
        }
    }

    pub fn clear_modify(&mut self) {
        match self {
            Self::Tiles(layer) => layer.clear_modify(),
            Self::Composite(composite) => composite.clear_modify(),
            Self::Graphics(graphics) => graphics.clear_modify(),
        }
    }

    pub fn clear(&mut self) {
        match self {
            Self::Tiles(layer) => layer.clear(),
            Self::Composite(composite) => composite.clear(),
            Self::Graphics(graphics) => graphics.clear(),
        }
    }
}

impl From<TileLayer> for LayerNode {
    fn from(layer: TileLayer) -> Self {
        Self::Tiles(layer)
    }
}

impl From<CompositeTileLayer> for LayerNode {
    fn from(composite: CompositeTileLayer) -> Self {
        Self::Composite(composite)
    }
}

impl From<GraphicsLayer> for LayerNode {
    fn from(graphics: GraphicsLayer) -> Self {
        Self::Graphics(graphics)
    }
}

#[derive(Debug)]
pub struct ZLayer {
    layers: Vec<LayerNode>,
    buffer: RgbaImage,
    canvas_size: (u32, u32),
    /// Child count at the last redraw.
    previous_layers: usize,
    last_animation_frame: Option<[f32; 2]>,
    redraws: u64,
}

impl ZLayer {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            layers: Vec::new(),
            buffer: RgbaImage::new(width, height),
            canvas_size: (width, height),
            previous_layers: 0,
            last_animation_frame: None,
            redraws: 0,
        }
    }

    /// The next [`Self::cache_if_dirty`] redraws if the size differs.
    pub fn set_canvas_size(&mut self, width: u32, height: u32) {
        self.canvas_size = (width, height);
    }

    pub const fn canvas_size(&self) -> (u32, u32) {
        self.canvas_size
    }

    pub fn push(&mut self, layer: impl Into<LayerNode>) {
        self.layers.push(layer.into());
    }

    pub fn layers(&self) -> &[LayerNode] {
        &self.layers
    }

    pub fn layers_mut(&mut self) -> &mut [LayerNode] {
        &mut self.layers
    }

    /// Clear every child and force the next redraw.
    pub fn clear(&mut self) {
        for layer in &mut self.layers {
            layer.clear();
        }
        self.previous_layers = 0;
    }

    pub const fn buffer(&self) -> &RgbaImage {
        &self.buffer
    }

    /// Times the buffer has been redrawn.
    pub const fn redraws(&self) -> u64 {
        self.redraws
    }

    /// Redraw the buffer if anything changed since the last call. Returns
    /// whether it redrew.
    pub fn cache_if_dirty(&mut self, frame: &FrameContext) -> bool {
        let animation_advanced = self.last_animation_frame != Some(frame.animation_frame);
        self.last_animation_frame = Some(frame.animation_frame);

        let (width, height) = self.canvas_size;
        let resized = self.buffer.width() != width || self.buffer.height() != height;
        let dirty = resized
            || self.previous_layers != self.layers.len()
            || self
                .layers
                .iter()
                .any(|layer| layer.is_modified(animation_advanced));
        self.previous_layers = self.layers.len();
        if !dirty {
            return false;
        }

        if resized {
            self.buffer = RgbaImage::new(width, height);
        } else {
            self.buffer.fill(0);
        }
        for layer in &mut self.layers {
            layer.clear_modify();
            draw_node_into(&mut self.buffer, layer, Affine::IDENTITY, frame);
        }
        self.redraws += 1;
        log::trace!(target: "tilebatch", "z-layer redrawn ({} children)", self.layers.len());
        true
    }

    /// Refresh the cache if needed, then blend it onto `target` through `transform`.
    pub fn render(&mut self, target: &mut RgbaImage, transform: Affine, frame: &FrameContext) -> bool {
        let redrawn = self.cache_if_dirty(frame);
        draw_image_into(target, &self.buffer, transform);
        redrawn
    }
}
