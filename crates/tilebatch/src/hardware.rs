//! Batched hardware backend: one indexed draw per layer.
//!
//! Per draw: bind the layer's textures into atlas regions, make sure the shared
//! index buffer covers the layer, refresh the layer's vertex buffer if its
//! content changed, then issue the draw with the frame's uniforms.
//!
//! A standalone layer with exactly one texture skips the atlas copy and binds
//! that texture directly through a one-unit program. Composite children always
//! go through the atlas.

use crate::backend::{DrawStats, TileBackend};
use crate::binder::{BoundUnits, DirectSlot, DirectTextures, TextureSlotBinder};
use crate::buffer_pool::{Clock, SystemClock, UploadKey, VertexBufferPool};
use crate::composite::CompositeTileLayer;
use crate::config::{BackendKind, TileConfig};
use crate::device::{DrawCall, TileDevice};
use crate::error::TileResult;
use crate::frame::FrameContext;
use crate::layer::TileLayer;
use crate::shader::{ShaderCache, TileUniforms};
use crate::texture::TileTexture;
use crate::vertex::{INDICES_PER_QUAD, TileVertex, quad_indices, write_quads};
use kurbo::Affine;

fn ensure_program<D: TileDevice>(
    device: &mut D,
    cache: &mut ShaderCache<D::Program>,
    units: usize,
) -> TileResult<()> {
    let source = cache.source(units).clone();
    if cache.program().is_none() {
        let program = device.compile_program(&source, &TileVertex::LAYOUT)?;
        log::debug!(
            target: "tilebatch",
            "compiled tile program for {} texture units",
            source.max_textures()
        );
        cache.set_program(program);
    }
    Ok(())
}

/// How a layer's textures reach the draw.
#[derive(Clone, Copy)]
enum Binding {
    Atlas(BoundUnits),
    Direct(DirectSlot),
}

pub struct HardwareBackend<D: TileDevice> {
    device: D,
    config: TileConfig,
    /// Configured unit count clamped to the device limit.
    max_textures: usize,
    binder: TextureSlotBinder<D::Texture>,
    direct: DirectTextures<D::Texture>,
    /// Config and device both allow direct binding.
    direct_binding: bool,
    max_texture_dimension: u32,
    pool: VertexBufferPool<D::Buffer>,
    shader: ShaderCache<D::Program>,
    direct_shader: ShaderCache<D::Program>,
    /// Quads the current index buffer covers; zero when there is none.
    index_quads: usize,
    context_generation: u64,
    scratch: Vec<TileVertex>,
    stats: DrawStats,
}

impl<D: TileDevice> HardwareBackend<D> {
    /// # Errors
    /// Returns [`crate::TileError::InvalidConfig`] if `config` does not validate.
    pub fn new(device: D, config: TileConfig) -> TileResult<Self> {
        Self::with_clock(device, config, Box::new(SystemClock::default()))
    }

    /// Like [`Self::new`] with an explicit clock for the leak sweep.
    ///
    /// # Errors
    /// Returns [`crate::TileError::InvalidConfig`] if `config` does not validate.
    pub fn with_clock(device: D, config: TileConfig, clock: Box<dyn Clock>) -> TileResult<Self> {
        config.validate()?;
        let limits = device.limits();
        let max_textures = config.max_textures.min(limits.max_texture_units.max(1));
        if max_textures < config.max_textures {
            log::warn!(
                target: "tilebatch",
                "device supports {} texture units, clamping max_textures from {}",
                limits.max_texture_units,
                config.max_textures
            );
        }
        if config.buffer_size > limits.max_texture_dimension {
            log::warn!(
                target: "tilebatch",
                "atlas size {} exceeds the device limit {}",
                config.buffer_size,
                limits.max_texture_dimension
            );
        }
        Ok(Self {
            context_generation: device.context_generation(),
            binder: TextureSlotBinder::new(&config, max_textures),
            direct: DirectTextures::new(config.slot_capacity()),
            direct_binding: config.direct_binding && limits.direct_binding,
            max_texture_dimension: limits.max_texture_dimension,
            pool: VertexBufferPool::with_clock(config.leak_window_ms, clock),
            shader: ShaderCache::new(),
            direct_shader: ShaderCache::new(),
            index_quads: 0,
            scratch: Vec::new(),
            stats: DrawStats::default(),
            max_textures,
            config,
            device,
        })
    }

    pub const fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub const fn config(&self) -> &TileConfig {
        &self.config
    }

    /// Texture units per draw after applying device limits.
    pub const fn max_textures(&self) -> usize {
        self.max_textures
    }

    /// Per-layer texture capacity this backend can bind.
    pub const fn slot_capacity(&self) -> usize {
        self.binder.capacity()
    }

    pub const fn binder(&self) -> &TextureSlotBinder<D::Texture> {
        &self.binder
    }

    pub const fn direct_textures(&self) -> &DirectTextures<D::Texture> {
        &self.direct
    }

    pub const fn pool(&self) -> &VertexBufferPool<D::Buffer> {
        &self.pool
    }

    /// Release a layer's vertex buffer now instead of waiting for the leak sweep.
    pub fn release_layer(&mut self, layer: &mut TileLayer) {
        if let Some(id) = layer.vertex_buffer.take() {
            self.pool.remove(&mut self.device, id);
        }
    }

    /// Forget every GPU handle; everything is recreated on the next draw.
    pub fn invalidate(&mut self) {
        self.binder.invalidate();
        self.direct.invalidate();
        self.pool.invalidate();
        self.shader.invalidate();
        self.direct_shader.invalidate();
        self.index_quads = 0;
    }

    fn check_context(&mut self) {
        let generation = self.device.context_generation();
        if generation != self.context_generation {
            log::warn!(
                target: "tilebatch",
                "device context changed ({} -> {generation}), recreating GPU state",
                self.context_generation
            );
            self.context_generation = generation;
            self.invalidate();
        }
    }

    fn ensure_index_capacity(&mut self, quads: usize) -> TileResult<()> {
        if quads <= self.index_quads {
            return Ok(());
        }
        let mut capacity = self.index_quads.max(self.config.initial_index_quads).max(1);
        while capacity < quads {
            capacity *= 2;
        }
        self.device.write_index_buffer(&quad_indices(capacity))?;
        self.index_quads = capacity;
        Ok(())
    }

    /// The texture a standalone layer can bind without an atlas, if any.
    fn direct_texture<'layer>(&self, layer: &'layer TileLayer) -> Option<&'layer TileTexture> {
        let [texture] = layer.textures() else {
            return None;
        };
        let source = texture.source();
        let fits = source.width() <= self.max_texture_dimension
            && source.height() <= self.max_texture_dimension;
        (self.direct_binding && texture.is_valid() && fits).then_some(texture)
    }

    fn draw_layer_inner(
        &mut self,
        layer: &mut TileLayer,
        transform: Affine,
        frame: &FrameContext,
        allow_direct: bool,
    ) -> TileResult<DrawStats> {
        let direct = if allow_direct {
            self.direct_texture(layer)
        } else {
            None
        };
        let binding = if let Some(texture) = direct {
            ensure_program(&mut self.device, &mut self.direct_shader, 1)?;
            Binding::Direct(self.direct.bind(&mut self.device, texture)?)
        } else {
            ensure_program(&mut self.device, &mut self.shader, self.max_textures)?;
            Binding::Atlas(self.binder.bind(&mut self.device, layer.textures())?)
        };
        let quads = layer.records().len();
        self.ensure_index_capacity(quads)?;

        let mut stats = DrawStats {
            draw_calls: 1,
            quads: quads as u32,
            ..DrawStats::default()
        };

        let entry = self.pool.get_or_create(&mut self.device, layer.vertex_buffer)?;
        layer.vertex_buffer = Some(entry.id);
        let key = UploadKey {
            vertices: quads * 4,
            revision: layer.revision(),
        };
        if entry.needs_upload(key) {
            self.scratch.clear();
            write_quads(&mut self.scratch, layer.records(), self.binder.geometry());
            entry.upload(&mut self.device, key, &self.scratch)?;
            stats.uploads = 1;
        }

        let (program, textures, sampled_size) = match binding {
            Binding::Atlas(units) => (
                self.shader.program(),
                self.binder.atlases(units),
                [self.config.buffer_size; 2],
            ),
            Binding::Direct(slot) => (
                self.direct_shader.program(),
                self.direct.textures(slot),
                slot.size,
            ),
        };
        let Some(program) = program else {
            return Err(anyhow::anyhow!("tile program missing after compilation").into());
        };
        let uniforms = TileUniforms::new(
            transform,
            layer.shadow_color(),
            frame.animation_frame,
            sampled_size,
        );
        self.device.draw(DrawCall {
            program,
            vertices: &entry.buffer,
            atlases: textures,
            index_count: (quads * INDICES_PER_QUAD) as u32,
            uniforms,
        })?;
        Ok(stats)
    }

    fn draw_tiles(
        &mut self,
        layer: &mut TileLayer,
        transform: Affine,
        frame: &FrameContext,
        allow_direct: bool,
    ) -> TileResult<DrawStats> {
        let _span = tracing::info_span!("tile_layer_draw", tiles = layer.records().len()).entered();
        self.check_context();
        if layer.is_empty() || layer.textures().is_empty() {
            return Ok(DrawStats::default());
        }

        match self.draw_layer_inner(layer, transform, frame, allow_direct) {
            Ok(stats) => {
                self.stats += stats;
                Ok(stats)
            }
            Err(err) => {
                if err.is_context_loss() {
                    self.invalidate();
                }
                log::warn!(target: "tilebatch", "tile layer draw failed: {err}");
                self.stats.skipped_layers += 1;
                Err(err)
            }
        }
    }
}

impl<D: TileDevice> TileBackend for HardwareBackend<D> {
    fn kind(&self) -> BackendKind {
        BackendKind::Hardware
    }

    fn begin_frame(&mut self, _frame: &FrameContext) {
        self.check_context();
        self.stats = DrawStats::default();
    }

    fn draw_layer(
        &mut self,
        layer: &mut TileLayer,
        transform: Affine,
        frame: &FrameContext,
    ) -> TileResult<DrawStats> {
        self.draw_tiles(layer, transform, frame, true)
    }

    fn draw_composite(
        &mut self,
        composite: &mut CompositeTileLayer,
        transform: Affine,
        frame: &FrameContext,
    ) -> TileResult<DrawStats> {
        let mut total = DrawStats::default();
        for (index, child) in composite.children_mut().iter_mut().enumerate() {
            match self.draw_tiles(child, transform, frame, false) {
                Ok(stats) => total += stats,
                Err(err) => {
                    log::warn!(target: "tilebatch", "skipping composite child {index}: {err}");
                    total.skipped_layers += 1;
                }
            }
        }
        Ok(total)
    }

    fn frame_stats(&self) -> DrawStats {
        self.stats
    }
}

impl TileLayer {
    /// Draw this layer through the batched hardware path.
    ///
    /// # Errors
    /// See [`TileBackend::draw_layer`].
    pub fn render_using_graphics_backend<D: TileDevice>(
        &mut self,
        backend: &mut HardwareBackend<D>,
        transform: Affine,
        frame: &FrameContext,
    ) -> TileResult<DrawStats> {
        backend.draw_layer(self, transform, frame)
    }
}

impl CompositeTileLayer {
    /// Draw every child through the batched hardware path.
    ///
    /// # Errors
    /// See [`TileBackend::draw_composite`].
    pub fn render_using_graphics_backend<D: TileDevice>(
        &mut self,
        backend: &mut HardwareBackend<D>,
        transform: Affine,
        frame: &FrameContext,
    ) -> TileResult<DrawStats> {
        backend.draw_composite(self, transform, frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer_pool::ManualClock;
    use crate::device::{DeviceCall, DeviceLimits, RecordingDevice};
    use crate::error::TileError;
    use crate::texture::TileTexture;
    use image::RgbaImage;
    use std::sync::Arc;

    fn textures(count: usize) -> Vec<TileTexture> {
        (0..count)
            .map(|_| TileTexture::new(Arc::new(RgbaImage::new(16, 16))))
            .collect()
    }

    fn backend() -> HardwareBackend<RecordingDevice> {
        HardwareBackend::with_clock(
            RecordingDevice::new(),
            TileConfig::default(),
            Box::new(ManualClock::new(0)),
        )
        .unwrap()
    }

    #[test]
    fn one_draw_per_layer() {
        let mut backend = backend();
        let mut layer = TileLayer::with_textures(&textures(5), 16);
        layer.add_rect_static(4, 0.0, 0.0, 0.0, 0.0, 64.0, 16.0);

        let stats = backend
            .draw_layer(&mut layer, Affine::IDENTITY, &FrameContext::default())
            .unwrap();
        assert_eq!(stats.draw_calls, 1);
        assert_eq!(stats.quads, 4);

        let draws: Vec<&DeviceCall> = backend.device().draws().collect();
        assert_eq!(draws.len(), 1);
        assert!(matches!(
            draws[0],
            DeviceCall::Draw {
                atlases,
                index_count: 24,
                ..
            } if atlases.len() == 2
        ));
        assert!(layer.vertex_buffer().is_some());
    }

    #[test]
    fn unchanged_layer_is_not_reuploaded() {
        let mut backend = backend();
        let mut layer = TileLayer::with_textures(&textures(1), 16);
        layer.add_rect_static(0, 0.0, 0.0, 0.0, 0.0, 16.0, 16.0);
        let frame = FrameContext::default();

        let first = backend.draw_layer(&mut layer, Affine::IDENTITY, &frame).unwrap();
        let second = backend.draw_layer(&mut layer, Affine::IDENTITY, &frame).unwrap();
        assert_eq!(first.uploads, 1);
        assert_eq!(second.uploads, 0);

        // same record count, different content
        layer.clear();
        layer.add_rect_static(0, 8.0, 8.0, 0.0, 0.0, 16.0, 16.0);
        let third = backend.draw_layer(&mut layer, Affine::IDENTITY, &frame).unwrap();
        assert_eq!(third.uploads, 1);
    }

    #[test]
    fn program_and_indices_are_created_once() {
        let mut backend = backend();
        let frame = FrameContext::default();
        for _ in 0..3 {
            let mut layer = TileLayer::with_textures(&textures(1), 16);
            layer.add_rect_static(0, 0.0, 0.0, 0.0, 0.0, 16.0, 16.0);
            backend.draw_layer(&mut layer, Affine::IDENTITY, &frame).unwrap();
        }
        let device = backend.device();
        assert_eq!(
            device.count(|call| matches!(call, DeviceCall::CompileProgram { .. })),
            1
        );
        assert_eq!(
            device.count(|call| matches!(call, DeviceCall::WriteIndexBuffer { count: 12_000 })),
            1
        );
    }

    #[test]
    fn index_buffer_grows_by_doubling() {
        let mut backend = backend();
        let mut layer = TileLayer::with_textures(&textures(1), 16);
        for step in 0..2001 {
            layer.add_rect_static(0, 0.0, 0.0, step as f32, 0.0, 1.0, 1.0);
        }
        backend
            .draw_layer(&mut layer, Affine::IDENTITY, &FrameContext::default())
            .unwrap();
        assert!(backend.device().calls().iter().any(|call| matches!(
            call,
            DeviceCall::WriteIndexBuffer { count: 24_000 }
        )));
    }

    #[test]
    fn empty_or_textureless_layers_are_skipped() {
        let mut backend = backend();
        let frame = FrameContext::default();
        let mut empty = TileLayer::with_textures(&textures(1), 16);
        let mut bare = TileLayer::new(16);
        bare.add_rect_static(-1, 0.0, 0.0, 0.0, 0.0, 8.0, 8.0);
        assert_eq!(
            backend.draw_layer(&mut empty, Affine::IDENTITY, &frame).unwrap(),
            DrawStats::default()
        );
        assert_eq!(
            backend.draw_layer(&mut bare, Affine::IDENTITY, &frame).unwrap(),
            DrawStats::default()
        );
        assert!(backend.device().calls().is_empty());
    }

    #[test]
    fn context_loss_recreates_everything() {
        let mut backend = backend();
        let frame = FrameContext::default();
        let mut layer = TileLayer::with_textures(&textures(2), 16);
        layer.add_rect_static(1, 0.0, 0.0, 0.0, 0.0, 16.0, 16.0);
        backend.draw_layer(&mut layer, Affine::IDENTITY, &frame).unwrap();
        let leased = layer.vertex_buffer();

        backend.device_mut().lose_context();
        backend.device_mut().take_calls();
        backend.begin_frame(&frame);
        let stats = backend.draw_layer(&mut layer, Affine::IDENTITY, &frame).unwrap();
        assert_eq!(stats.uploads, 1);
        assert_ne!(layer.vertex_buffer(), leased);

        let device = backend.device();
        assert_eq!(
            device.count(|call| matches!(call, DeviceCall::CreateAtlas { .. })),
            4
        );
        assert_eq!(
            device.count(|call| matches!(call, DeviceCall::CompileProgram { .. })),
            1
        );
        assert_eq!(
            device.count(|call| matches!(call, DeviceCall::WriteRegion { .. })),
            2
        );
    }

    #[test]
    fn over_capacity_layer_is_refused() {
        let mut backend = backend();
        let mut layer = TileLayer::with_textures(&textures(17), 17);
        layer.add_rect_static(0, 0.0, 0.0, 0.0, 0.0, 16.0, 16.0);
        let err = backend.draw_layer(&mut layer, Affine::IDENTITY, &FrameContext::default());
        assert!(matches!(err, Err(TileError::CapacityExceeded { .. })));
        assert_eq!(backend.device().draws().count(), 0);
        assert_eq!(backend.frame_stats().skipped_layers, 1);
    }

    #[test]
    fn units_are_clamped_to_device_limits() {
        let device = RecordingDevice::with_limits(DeviceLimits {
            max_texture_units: 2,
            ..DeviceLimits::default()
        });
        let backend = HardwareBackend::new(device, TileConfig::default()).unwrap();
        assert_eq!(backend.max_textures(), 2);
        assert_eq!(backend.slot_capacity(), 8);
    }

    #[test]
    fn release_layer_frees_buffer() {
        let mut backend = backend();
        let mut layer = TileLayer::with_textures(&textures(1), 16);
        layer.add_rect_static(0, 0.0, 0.0, 0.0, 0.0, 16.0, 16.0);
        backend
            .draw_layer(&mut layer, Affine::IDENTITY, &FrameContext::default())
            .unwrap();
        backend.release_layer(&mut layer);
        assert!(layer.vertex_buffer().is_none());
        assert!(backend.pool().is_empty());
    }

    #[test]
    fn single_texture_layer_binds_its_texture_directly() {
        let mut backend = backend();
        let source = TileTexture::new(Arc::new(RgbaImage::new(48, 16)));
        let mut layer = TileLayer::with_textures(&[source], 16);
        layer.add_rect_static(0, 0.0, 0.0, 0.0, 0.0, 16.0, 16.0);
        let frame = FrameContext::default();
        backend.draw_layer(&mut layer, Affine::IDENTITY, &frame).unwrap();
        backend.draw_layer(&mut layer, Affine::IDENTITY, &frame).unwrap();

        let device = backend.device();
        assert_eq!(
            device.count(|call| matches!(call, DeviceCall::CreateTexture { size: [48, 16], .. })),
            1
        );
        assert_eq!(
            device.count(|call| matches!(
                call,
                DeviceCall::CreateAtlas { .. } | DeviceCall::WriteRegion { .. }
            )),
            0
        );
        assert_eq!(
            device.count(|call| matches!(call, DeviceCall::CompileProgram { max_textures: 1, .. })),
            1
        );
        assert!(matches!(
            device.draws().last(),
            Some(DeviceCall::Draw { atlases, uniforms, .. })
                if atlases.len() == 1 && uniforms.inv_atlas_size == [1.0 / 48.0, 1.0 / 16.0]
        ));
        assert_eq!(backend.direct_textures().len(), 1);
    }

    #[test]
    fn composite_children_always_use_atlases() {
        let mut backend = backend();
        let mut composite = CompositeTileLayer::with_textures(&textures(1), 16);
        composite.add_rect(0, 0.0, 0.0, 0.0, 0.0, 16.0, 16.0, 0.0, 0.0);
        let stats = backend
            .draw_composite(&mut composite, Affine::IDENTITY, &FrameContext::default())
            .unwrap();
        assert_eq!(stats.draw_calls, 1);

        let device = backend.device();
        assert_eq!(
            device.count(|call| matches!(call, DeviceCall::CreateTexture { .. })),
            0
        );
        assert_eq!(
            device.count(|call| matches!(call, DeviceCall::WriteRegion { .. })),
            1
        );
        assert!(backend.direct_textures().is_empty());
    }

    #[test]
    fn direct_binding_can_be_turned_off() {
        let config = TileConfig {
            direct_binding: false,
            ..TileConfig::default()
        };
        let mut backend = HardwareBackend::new(RecordingDevice::new(), config).unwrap();
        let mut layer = TileLayer::with_textures(&textures(1), 16);
        layer.add_rect_static(0, 0.0, 0.0, 0.0, 0.0, 16.0, 16.0);
        backend
            .draw_layer(&mut layer, Affine::IDENTITY, &FrameContext::default())
            .unwrap();
        assert_eq!(
            backend
                .device()
                .count(|call| matches!(call, DeviceCall::CompileProgram { max_textures: 4, .. })),
            1
        );
        assert!(backend.direct_textures().is_empty());
    }

    #[test]
    fn cloned_layer_uploads_into_its_own_buffer() {
        let mut backend = backend();
        let frame = FrameContext::default();
        let mut layer = TileLayer::with_textures(&textures(2), 16);
        layer.add_rect_static(0, 0.0, 0.0, 0.0, 0.0, 16.0, 16.0);
        backend.draw_layer(&mut layer, Affine::IDENTITY, &frame).unwrap();

        let mut copy = layer.clone();
        copy.clear();
        copy.add_rect_static(1, 0.0, 0.0, 32.0, 32.0, 16.0, 16.0);
        let copy_stats = backend.draw_layer(&mut copy, Affine::IDENTITY, &frame).unwrap();
        let layer_stats = backend.draw_layer(&mut layer, Affine::IDENTITY, &frame).unwrap();

        assert_eq!(copy_stats.uploads, 1);
        assert_eq!(layer_stats.uploads, 0);
        assert!(copy.vertex_buffer().is_some());
        assert_ne!(copy.vertex_buffer(), layer.vertex_buffer());
        assert_eq!(backend.pool().len(), 2);
    }
}
