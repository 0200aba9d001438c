//! Application textures as seen by the tile batcher.
//!
//! A [`TileTexture`] is a frame (sub-rectangle) of a shared pixel source.
//! Identity is the identity of the pixel source allocation, never its content:
//! two sources with identical pixels are distinct textures.

use image::RgbaImage;
use std::sync::Arc;

/// A rectangle inside a pixel source, in pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl FrameRect {
    #[inline]
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// A frame of a shared, premultiplied RGBA pixel source.
#[derive(Debug, Clone)]
pub struct TileTexture {
    source: Arc<RgbaImage>,
    frame: FrameRect,
}

impl TileTexture {
    /// Texture covering the whole source.
    pub fn new(source: Arc<RgbaImage>) -> Self {
        let frame = FrameRect::new(0.0, 0.0, source.width() as f32, source.height() as f32);
        Self { source, frame }
    }

    pub fn with_frame(source: Arc<RgbaImage>, frame: FrameRect) -> Self {
        Self { source, frame }
    }

    /// Another frame of the same pixel source.
    #[must_use]
    pub fn sub_frame(&self, frame: FrameRect) -> Self {
        Self {
            source: Arc::clone(&self.source),
            frame,
        }
    }

    pub fn source(&self) -> &Arc<RgbaImage> {
        &self.source
    }

    pub const fn frame(&self) -> FrameRect {
        self.frame
    }

    /// True when both textures read from the same pixel source allocation.
    pub fn same_source(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.source, &other.source)
    }

    /// A texture is drawable when its source has pixels and its frame is non-empty.
    pub fn is_valid(&self) -> bool {
        self.source.width() > 0
            && self.source.height() > 0
            && self.frame.width > 0.0
            && self.frame.height > 0.0
    }
}

/// How a tile placement names its texture.
#[derive(Debug, Clone, Copy)]
pub enum TextureRef<'tex> {
    /// Index into the layer's (or composite's global) bound texture list.
    Index(usize),
    /// Looked up by pixel-source identity.
    Texture(&'tex TileTexture),
}

impl<'tex> From<&'tex TileTexture> for TextureRef<'tex> {
    fn from(texture: &'tex TileTexture) -> Self {
        Self::Texture(texture)
    }
}

impl From<usize> for TextureRef<'_> {
    fn from(index: usize) -> Self {
        Self::Index(index)
    }
}
