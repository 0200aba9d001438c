//! Software raster backend: draws each tile record into an RGBA buffer.
//!
//! Pixels are premultiplied RGBA8 and blended source-over. Sampling is
//! nearest-neighbour through the inverse of the layer transform, so rotated
//! and scaled layers draw correctly at the cost of per-pixel work.

use crate::backend::{DrawStats, TileBackend};
use crate::composite::CompositeTileLayer;
use crate::compositor::LayerNode;
use crate::config::BackendKind;
use crate::error::TileResult;
use crate::frame::FrameContext;
use crate::graphics::GraphicsLayer;
use crate::layer::TileLayer;
use image::{Rgba, RgbaImage};
use kurbo::{Affine, Point, Rect};

/// Source-over for premultiplied pixels.
#[inline]
fn blend_over(dst: &mut Rgba<u8>, src: [u8; 4]) {
    let src_alpha = u16::from(src[3]);
    if src_alpha == 0 {
        return;
    }
    let inverse = 255 - src_alpha;
    for (dst_channel, src_channel) in dst.0.iter_mut().zip(src) {
        let kept = (u16::from(*dst_channel) * inverse + 127) / 255;
        *dst_channel = (u16::from(src_channel) + kept).min(255) as u8;
    }
}

/// Premultiplied RGBA8 from a straight-alpha colour.
fn premultiplied_rgba8(color: [f32; 4]) -> [u8; 4] {
    let alpha = color[3].clamp(0.0, 1.0);
    let [red, green, blue, _] = color.map(|channel| channel.clamp(0.0, 1.0) * alpha);
    [red, green, blue, alpha].map(|channel| (channel * 255.0).round() as u8)
}

/// Visit every target pixel whose centre maps inside `local` under `transform`.
///
/// `shade` receives the layer-space point and returns the pixel to blend.
fn fill_transformed(
    canvas: &mut RgbaImage,
    local: Rect,
    transform: Affine,
    mut shade: impl FnMut(Point) -> Option<[u8; 4]>,
) {
    if local.width() <= 0.0 || local.height() <= 0.0 || transform.determinant().abs() < 1e-12 {
        return;
    }
    let inverse = transform.inverse();
    let bounds = transform.transform_rect_bbox(local);
    let x0 = bounds.x0.floor().max(0.0) as u32;
    let y0 = bounds.y0.floor().max(0.0) as u32;
    let x1 = bounds.x1.ceil().min(f64::from(canvas.width())).max(0.0) as u32;
    let y1 = bounds.y1.ceil().min(f64::from(canvas.height())).max(0.0) as u32;

    for py in y0..y1 {
        for px in x0..x1 {
            let point = inverse * Point::new(f64::from(px) + 0.5, f64::from(py) + 0.5);
            let inside = point.x >= local.x0
                && point.x < local.x1
                && point.y >= local.y0
                && point.y < local.y1;
            if !inside {
                continue;
            }
            if let Some(src) = shade(point) {
                blend_over(canvas.get_pixel_mut(px, py), src);
            }
        }
    }
}

/// Rasterize `layer` into `canvas`. Returns the quads drawn.
pub fn draw_layer_into(
    canvas: &mut RgbaImage,
    layer: &TileLayer,
    transform: Affine,
    frame: &FrameContext,
) -> u32 {
    let shadow = premultiplied_rgba8(layer.shadow_color());
    let [phase_x, phase_y] = frame.animation_frame;
    let mut drawn = 0;

    for tile in layer.records() {
        let dest = Rect::new(
            f64::from(tile.dest_x),
            f64::from(tile.dest_y),
            f64::from(tile.dest_x + tile.width),
            f64::from(tile.dest_y + tile.height),
        );
        let Ok(index) = usize::try_from(tile.texture_index) else {
            fill_transformed(canvas, dest, transform, |_| Some(shadow));
            drawn += 1;
            continue;
        };
        let Some(texture) = layer.textures().get(index) else {
            continue;
        };
        let source = texture.source();
        let origin_u = f64::from(tile.source_u + tile.anim_x * phase_x);
        let origin_v = f64::from(tile.source_v + tile.anim_y * phase_y);
        fill_transformed(canvas, dest, transform, |point| {
            let sx = (origin_u + point.x - dest.x0).floor();
            let sy = (origin_v + point.y - dest.y0).floor();
            let in_source = sx >= 0.0
                && sy >= 0.0
                && sx < f64::from(source.width())
                && sy < f64::from(source.height());
            in_source.then(|| source.get_pixel(sx as u32, sy as u32).0)
        });
        drawn += 1;
    }
    drawn
}

/// Rasterize the fills of `graphics` in order. Returns the fills drawn.
pub fn draw_graphics_into(
    canvas: &mut RgbaImage,
    graphics: &GraphicsLayer,
    transform: Affine,
) -> u32 {
    let mut drawn = 0;
    for fill in graphics.fills() {
        let color = premultiplied_rgba8(fill.color);
        fill_transformed(canvas, fill.rect, transform, |_| Some(color));
        drawn += 1;
    }
    drawn
}

/// Rasterize every child of a layer node in order.
pub fn draw_node_into(
    canvas: &mut RgbaImage,
    node: &LayerNode,
    transform: Affine,
    frame: &FrameContext,
) -> u32 {
    match node {
        LayerNode::Tiles(layer) => draw_layer_into(canvas, layer, transform, frame),
        LayerNode::Composite(composite) => composite
            .children()
            .iter()
            .map(|child| draw_layer_into(canvas, child, transform, frame))
            .sum(),
        LayerNode::Graphics(graphics) => draw_graphics_into(canvas, graphics, transform),
    }
}

/// Blend a whole image onto `canvas` through `transform`.
pub fn draw_image_into(canvas: &mut RgbaImage, image: &RgbaImage, transform: Affine) {
    let local = Rect::new(0.0, 0.0, f64::from(image.width()), f64::from(image.height()));
    fill_transformed(canvas, local, transform, |point| {
        let sx = point.x.floor() as u32;
        let sy = point.y.floor() as u32;
        (sx < image.width() && sy < image.height()).then(|| image.get_pixel(sx, sy).0)
    });
}

/// [`TileBackend`] drawing into an owned RGBA target.
#[derive(Debug, Clone)]
pub struct RasterBackend {
    target: RgbaImage,
    stats: DrawStats,
}

impl RasterBackend {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            target: RgbaImage::new(width, height),
            stats: DrawStats::default(),
        }
    }

    pub const fn target(&self) -> &RgbaImage {
        &self.target
    }

    pub fn target_mut(&mut self) -> &mut RgbaImage {
        &mut self.target
    }

    /// Resize and clear the target.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.target = RgbaImage::new(width, height);
    }

    /// Clear the target to transparent black.
    pub fn clear(&mut self) {
        self.target.fill(0);
    }
}

impl TileBackend for RasterBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Raster
    }

    fn begin_frame(&mut self, _frame: &FrameContext) {
        self.stats = DrawStats::default();
    }

    fn draw_layer(
        &mut self,
        layer: &mut TileLayer,
        transform: Affine,
        frame: &FrameContext,
    ) -> TileResult<DrawStats> {
        let quads = draw_layer_into(&mut self.target, layer, transform, frame);
        let stats = DrawStats {
            draw_calls: u32::from(quads > 0),
            quads,
            ..DrawStats::default()
        };
        self.stats += stats;
        Ok(stats)
    }

    fn draw_graphics(
        &mut self,
        graphics: &GraphicsLayer,
        transform: Affine,
        _frame: &FrameContext,
    ) -> TileResult<DrawStats> {
        let quads = draw_graphics_into(&mut self.target, graphics, transform);
        let stats = DrawStats {
            draw_calls: u32::from(quads > 0),
            quads,
            ..DrawStats::default()
        };
        self.stats += stats;
        Ok(stats)
    }

    fn frame_stats(&self) -> DrawStats {
        self.stats
    }
}

impl TileLayer {
    /// Draw this layer into the raster backend's target.
    ///
    /// # Errors
    /// See [`TileBackend::draw_layer`].
    pub fn render_using_raster_backend(
        &mut self,
        backend: &mut RasterBackend,
        transform: Affine,
        frame: &FrameContext,
    ) -> TileResult<DrawStats> {
        backend.draw_layer(self, transform, frame)
    }
}

impl CompositeTileLayer {
    /// Draw every child into the raster backend's target.
    ///
    /// # Errors
    /// See [`TileBackend::draw_composite`].
    pub fn render_using_raster_backend(
        &mut self,
        backend: &mut RasterBackend,
        transform: Affine,
        frame: &FrameContext,
    ) -> TileResult<DrawStats> {
        backend.draw_composite(self, transform, frame)
    }
}
