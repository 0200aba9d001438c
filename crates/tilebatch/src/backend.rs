//! Rendering backend abstraction.
//!
//! Layers and composites draw through [`TileBackend`]. The concrete variant is
//! chosen once by [`TileRenderer::from_config`], never per draw.

use crate::compositor::LayerNode;
use crate::composite::CompositeTileLayer;
use crate::config::{BackendKind, TileConfig};
use crate::device::TileDevice;
use crate::error::TileResult;
use crate::frame::FrameContext;
use crate::graphics::GraphicsLayer;
use crate::hardware::HardwareBackend;
use crate::layer::TileLayer;
use crate::raster::RasterBackend;
use core::ops::AddAssign;
use kurbo::Affine;

/// Work done by one or more draws.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrawStats {
    /// Draw commands issued (hardware) or layers rasterized (raster).
    pub draw_calls: u32,
    pub quads: u32,
    /// Vertex buffer rewrites.
    pub uploads: u32,
    /// Layers skipped because their draw failed.
    pub skipped_layers: u32,
}

impl AddAssign for DrawStats {
    fn add_assign(&mut self, rhs: Self) {
        self.draw_calls += rhs.draw_calls;
        self.quads += rhs.quads;
        self.uploads += rhs.uploads;
        self.skipped_layers += rhs.skipped_layers;
    }
}

pub trait TileBackend {
    fn kind(&self) -> BackendKind;

    /// Begin a new frame and reset [`Self::frame_stats`].
    fn begin_frame(&mut self, frame: &FrameContext);

    /// Draw one layer. `transform` maps layer space into the target: clip
    /// space for the hardware backend, target pixels for the raster backend.
    ///
    /// # Errors
    /// Returns the failure of this layer's draw; the backend stays usable.
    fn draw_layer(
        &mut self,
        layer: &mut TileLayer,
        transform: Affine,
        frame: &FrameContext,
    ) -> TileResult<DrawStats>;

    /// Draw every child in creation order. A failing child is logged and
    /// skipped; the remaining children still draw.
    ///
    /// # Errors
    /// Only implementations that override this may fail.
    fn draw_composite(
        &mut self,
        composite: &mut CompositeTileLayer,
        transform: Affine,
        frame: &FrameContext,
    ) -> TileResult<DrawStats> {
        let mut total = DrawStats::default();
        for (index, child) in composite.children_mut().iter_mut().enumerate() {
            match self.draw_layer(child, transform, frame) {
                Ok(stats) => total += stats,
                Err(err) => {
                    log::warn!(target: "tilebatch", "skipping composite child {index}: {err}");
                    total.skipped_layers += 1;
                }
            }
        }
        Ok(total)
    }

    /// Draw untextured fills. Backends without a fill path draw nothing;
    /// graphics then only reach the screen through a [`crate::ZLayer`] cache.
    ///
    /// # Errors
    /// Only implementations that override this may fail.
    fn draw_graphics(
        &mut self,
        graphics: &GraphicsLayer,
        _transform: Affine,
        _frame: &FrameContext,
    ) -> TileResult<DrawStats> {
        log::trace!(
            target: "tilebatch",
            "{:?} backend has no fill path, {} fills not drawn",
            self.kind(),
            graphics.fills().len()
        );
        Ok(DrawStats::default())
    }

    /// # Errors
    /// See [`Self::draw_layer`].
    fn draw_node(
        &mut self,
        node: &mut LayerNode,
        transform: Affine,
        frame: &FrameContext,
    ) -> TileResult<DrawStats> {
        match node {
            LayerNode::Tiles(layer) => self.draw_layer(layer, transform, frame),
            LayerNode::Composite(composite) => self.draw_composite(composite, transform, frame),
            LayerNode::Graphics(graphics) => self.draw_graphics(graphics, transform, frame),
        }
    }

    /// Totals since the last [`Self::begin_frame`].
    fn frame_stats(&self) -> DrawStats;
}

/// A backend chosen from configuration.
pub enum TileRenderer<D: TileDevice> {
    Hardware(HardwareBackend<D>),
    Raster(RasterBackend),
}

impl<D: TileDevice> TileRenderer<D> {
    /// Build the backend named by `config.backend`. `device` is only called
    /// for the hardware variant; `size` is only used by the raster variant.
    ///
    /// # Errors
    /// Invalid configuration, or the failure of `device`.
    pub fn from_config(
        config: &TileConfig,
        size: (u32, u32),
        device: impl FnOnce() -> TileResult<D>,
    ) -> TileResult<Self> {
        config.validate()?;
        log::info!(target: "tilebatch", "using {:?} tile backend", config.backend);
        match config.backend {
            BackendKind::Hardware => Ok(Self::Hardware(HardwareBackend::new(
                device()?,
                config.clone(),
            )?)),
            BackendKind::Raster => Ok(Self::Raster(RasterBackend::new(size.0, size.1))),
        }
    }

    fn backend(&mut self) -> &mut dyn TileBackend {
        match self {
            Self::Hardware(backend) => backend,
            Self::Raster(backend) => backend,
        }
    }
}

impl<D: TileDevice> TileBackend for TileRenderer<D> {
    fn kind(&self) -> BackendKind {
        match self {
            Self::Hardware(_) => BackendKind::Hardware,
            Self::Raster(_) => BackendKind::Raster,
        }
    }

    fn begin_frame(&mut self, frame: &FrameContext) {
        self.backend().begin_frame(frame);
    }

    fn draw_layer(
        &mut self,
        layer: &mut TileLayer,
        transform: Affine,
        frame: &FrameContext,
    ) -> TileResult<DrawStats> {
        self.backend().draw_layer(layer, transform, frame)
    }

    fn draw_composite(
        &mut self,
        composite: &mut CompositeTileLayer,
        transform: Affine,
        frame: &FrameContext,
    ) -> TileResult<DrawStats> {
        self.backend().draw_composite(composite, transform, frame)
    }

    fn draw_graphics(
        &mut self,
        graphics: &GraphicsLayer,
        transform: Affine,
        frame: &FrameContext,
    ) -> TileResult<DrawStats> {
        self.backend().draw_graphics(graphics, transform, frame)
    }

    fn frame_stats(&self) -> DrawStats {
        match self {
            Self::Hardware(backend) => backend.frame_stats(),
            Self::Raster(backend) => backend.frame_stats(),
        }
    }
}
