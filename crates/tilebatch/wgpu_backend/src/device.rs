//! [`TileDevice`] over wgpu.
//!
//! Draws are recorded as they arrive and replayed by [`WgpuTileDevice::encode`],
//! so a frame is a sequence of `draw_layer` calls followed by one encode and
//! submit. While no draw is pending, writes go straight to the queue. Once a
//! draw is pending, a write may touch an atlas region or vertex buffer that
//! draw still has to read, so the write is staged and replayed as a copy
//! between render passes at the point it was issued.

use crate::pipeline::{TilePipeline, build_tile_pipeline, build_tile_sampler};
use crate::validation::{scoped, submit_scoped};
use anyhow::anyhow;
use image::RgbaImage;
use log::{debug, error, trace};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tilebatch::shader::FIRST_ATLAS_BINDING;
use tilebatch::{
    DeviceLimits, DrawCall, TileDevice, TileError, TileResult, TileShaderSource, VertexLayout,
};
use wgpu::util::DeviceExt as _;
use wgpu::*;

/// A sampled texture (atlas or directly bound source) and its view.
#[derive(Debug)]
pub struct WgpuTexture {
    pub texture: Texture,
    pub view: TextureView,
}

struct RecordedDraw {
    pipeline: RenderPipeline,
    bind_group: BindGroup,
    vertices: Buffer,
    indices: Buffer,
    index_count: u32,
}

impl RecordedDraw {
    fn record(&self, pass: &mut RenderPass<'_>) {
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, &self.bind_group, &[]);
        pass.set_vertex_buffer(0, self.vertices.slice(..));
        pass.set_index_buffer(self.indices.slice(..), IndexFormat::Uint32);
        pass.draw_indexed(0..self.index_count, 0, 0..1);
    }
}

/// A write deferred until the draws recorded before it have been encoded.
enum StagedCopy {
    Region {
        staging: Buffer,
        bytes_per_row: u32,
        texture: Texture,
        origin: [u32; 2],
        extent: [u32; 2],
    },
    Vertices {
        staging: Buffer,
        target: Buffer,
        size: u64,
    },
}

impl StagedCopy {
    fn record(&self, encoder: &mut CommandEncoder) {
        match self {
            Self::Region {
                staging,
                bytes_per_row,
                texture,
                origin,
                extent,
            } => encoder.copy_buffer_to_texture(
                TexelCopyBufferInfo {
                    buffer: staging,
                    layout: TexelCopyBufferLayout {
                        offset: 0,
                        bytes_per_row: Some(*bytes_per_row),
                        rows_per_image: Some(extent[1]),
                    },
                },
                texel_copy(texture, *origin),
                extent3d(*extent),
            ),
            Self::Vertices {
                staging,
                target,
                size,
            } => encoder.copy_buffer_to_buffer(staging, 0, target, 0, *size),
        }
    }
}

/// Copies to run before a render pass, then the draws inside it.
#[derive(Default)]
struct PassSegment {
    copies: Vec<StagedCopy>,
    draws: Vec<RecordedDraw>,
}

pub struct WgpuTileDevice {
    device: Device,
    queue: Queue,
    render_format: TextureFormat,
    sampler: Sampler,
    /// Bound to units the current draw does not use.
    placeholder: TextureView,
    index_buffer: Option<Buffer>,
    segments: Vec<PassSegment>,
    generation: Arc<AtomicU64>,
}

fn texel_copy(texture: &Texture, origin: [u32; 2]) -> TexelCopyTextureInfo<'_> {
    TexelCopyTextureInfo {
        texture,
        mip_level: 0,
        origin: Origin3d {
            x: origin[0],
            y: origin[1],
            z: 0,
        },
        aspect: TextureAspect::All,
    }
}

const fn extent3d(extent: [u32; 2]) -> Extent3d {
    Extent3d {
        width: extent[0],
        height: extent[1],
        depth_or_array_layers: 1,
    }
}

fn create_sampled_texture(device: &Device, label: &str, size: [u32; 2]) -> WgpuTexture {
    let texture = device.create_texture(&TextureDescriptor {
        label: Some(label),
        size: extent3d(size),
        mip_level_count: 1,
        sample_count: 1,
        dimension: TextureDimension::D2,
        format: TextureFormat::Rgba8Unorm,
        usage: TextureUsages::TEXTURE_BINDING | TextureUsages::COPY_DST,
        view_formats: &[],
    });
    let view = texture.create_view(&TextureViewDescriptor::default());
    WgpuTexture { texture, view }
}

/// Row stride for a buffer-to-texture copy of `width` pixels.
const fn aligned_row_bytes(width: u32) -> u32 {
    (width * 4).div_ceil(COPY_BYTES_PER_ROW_ALIGNMENT) * COPY_BYTES_PER_ROW_ALIGNMENT
}

/// The top-left `extent` of `pixels`, rows padded to [`aligned_row_bytes`].
fn padded_region(pixels: &RgbaImage, extent: [u32; 2]) -> (Vec<u8>, u32) {
    let bytes_per_row = aligned_row_bytes(extent[0]);
    let row = extent[0] as usize * 4;
    let source_row = pixels.width() as usize * 4;
    let mut data = vec![0_u8; bytes_per_row as usize * extent[1] as usize];
    if row == 0 || source_row == 0 {
        return (data, bytes_per_row);
    }
    for (dst, src) in data
        .chunks_exact_mut(bytes_per_row as usize)
        .zip(pixels.as_raw().chunks_exact(source_row))
    {
        dst[..row].copy_from_slice(&src[..row]);
    }
    (data, bytes_per_row)
}

fn begin_tile_pass<'enc>(
    encoder: &'enc mut CommandEncoder,
    view: &TextureView,
    load: LoadOp<Color>,
) -> RenderPass<'enc> {
    encoder.begin_render_pass(&RenderPassDescriptor {
        label: Some("tile-pass"),
        color_attachments: &[Some(RenderPassColorAttachment {
            view,
            depth_slice: None,
            resolve_target: None,
            ops: Operations {
                load,
                store: StoreOp::Store,
            },
        })],
        depth_stencil_attachment: None,
        timestamp_writes: None,
        occlusion_query_set: None,
    })
}

impl WgpuTileDevice {
    /// Wrap `device`, drawing into targets of `render_format`.
    pub fn new(device: Device, queue: Queue, render_format: TextureFormat) -> Self {
        let generation = Arc::new(AtomicU64::new(0));
        let lost = Arc::clone(&generation);
        device.set_device_lost_callback(move |reason, message| {
            lost.fetch_add(1, Ordering::SeqCst);
            error!(target: "tilebatch_wgpu", "device lost ({reason:?}): {message}");
        });
        let sampler = build_tile_sampler(&device);
        let placeholder = create_sampled_texture(&device, "tile-placeholder", [1, 1]).view;
        Self {
            device,
            queue,
            render_format,
            sampler,
            placeholder,
            index_buffer: None,
            segments: Vec::new(),
            generation,
        }
    }

    pub const fn device(&self) -> &Device {
        &self.device
    }

    pub const fn queue(&self) -> &Queue {
        &self.queue
    }

    pub const fn render_format(&self) -> TextureFormat {
        self.render_format
    }

    /// Draws recorded since the last [`Self::encode`].
    pub fn pending_draws(&self) -> usize {
        self.segments.iter().map(|segment| segment.draws.len()).sum()
    }

    /// Writes waiting to be replayed between passes.
    pub fn staged_copies(&self) -> usize {
        self.segments.iter().map(|segment| segment.copies.len()).sum()
    }

    /// Report a loss the host detected itself, such as a surface that can no
    /// longer be configured. Every resource handed out so far is abandoned.
    pub fn mark_context_lost(&mut self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.index_buffer = None;
        self.segments.clear();
    }

    fn has_pending_draws(&self) -> bool {
        self.segments.iter().any(|segment| !segment.draws.is_empty())
    }

    fn stage(&mut self, copy: StagedCopy) {
        match self.segments.last_mut() {
            Some(last) if last.draws.is_empty() => last.copies.push(copy),
            _ => self.segments.push(PassSegment {
                copies: vec![copy],
                draws: Vec::new(),
            }),
        }
    }

    fn stage_region(
        &mut self,
        texture: &Texture,
        origin: [u32; 2],
        extent: [u32; 2],
        data: &[u8],
        bytes_per_row: u32,
    ) {
        let staging = self.device.create_buffer_init(&util::BufferInitDescriptor {
            label: Some("tile-staged-region"),
            contents: data,
            usage: BufferUsages::COPY_SRC,
        });
        trace!(target: "tilebatch_wgpu", "staged {extent:?} region write at {origin:?}");
        self.stage(StagedCopy::Region {
            staging,
            bytes_per_row,
            texture: texture.clone(),
            origin,
            extent,
        });
    }

    /// Replay staged writes and recorded draws onto `view`, in the order they
    /// were issued. `clear` selects the load op of the first pass; `None`
    /// keeps existing content.
    pub fn encode(
        &mut self,
        encoder: &mut CommandEncoder,
        view: &TextureView,
        clear: Option<Color>,
    ) {
        let mut segments = core::mem::take(&mut self.segments);
        let _span = tracing::info_span!("tile_pass_encode", passes = segments.len()).entered();
        if segments.is_empty() {
            // the clear still needs a pass
            segments.push(PassSegment::default());
        }
        let mut load = clear.map_or(LoadOp::Load, LoadOp::Clear);
        for segment in &segments {
            for copy in &segment.copies {
                copy.record(encoder);
            }
            let mut pass = begin_tile_pass(encoder, view, load);
            load = LoadOp::Load;
            for draw in &segment.draws {
                draw.record(&mut pass);
            }
        }
    }

    /// Encode and submit the recorded draws onto `view`.
    ///
    /// # Errors
    /// Returns [`TileError::Device`] if validation fails during submission.
    pub fn render_to_view(&mut self, view: &TextureView, clear: Option<Color>) -> TileResult<()> {
        let mut encoder = self
            .device
            .create_command_encoder(&CommandEncoderDescriptor {
                label: Some("tile-encoder"),
            });
        self.encode(&mut encoder, view, clear);
        submit_scoped(&self.device, &self.queue, "tile-submit", [encoder.finish()])?;
        Ok(())
    }
}

impl TileDevice for WgpuTileDevice {
    type Texture = WgpuTexture;
    type Buffer = Buffer;
    type Program = TilePipeline;

    fn limits(&self) -> DeviceLimits {
        let limits = self.device.limits();
        DeviceLimits {
            max_texture_units: limits.max_sampled_textures_per_shader_stage as usize,
            max_texture_dimension: limits.max_texture_dimension_2d,
            direct_binding: true,
        }
    }

    fn context_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn create_atlas(&mut self, size: u32) -> TileResult<Self::Texture> {
        let max = self.device.limits().max_texture_dimension_2d;
        if size > max {
            return Err(anyhow!("atlas of {size}px exceeds the device limit of {max}px").into());
        }
        debug!(target: "tilebatch_wgpu", "created {size}px atlas");
        Ok(create_sampled_texture(&self.device, "tile-atlas", [size, size]))
    }

    // A fresh texture has no pending readers, so the upload is immediate.
    fn create_texture(&mut self, pixels: &RgbaImage) -> TileResult<Self::Texture> {
        let size = [pixels.width(), pixels.height()];
        let max = self.device.limits().max_texture_dimension_2d;
        if size.iter().any(|side| *side == 0 || *side > max) {
            return Err(anyhow!("texture of {size:?}px is empty or exceeds {max}px").into());
        }
        let created = create_sampled_texture(&self.device, "tile-direct-texture", size);
        self.queue.write_texture(
            texel_copy(&created.texture, [0, 0]),
            pixels.as_raw(),
            TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4 * size[0]),
                rows_per_image: Some(size[1]),
            },
            extent3d(size),
        );
        Ok(created)
    }

    fn write_region(
        &mut self,
        atlas: &Self::Texture,
        origin: [u32; 2],
        extent: [u32; 2],
        pixels: &RgbaImage,
    ) -> TileResult<()> {
        if extent[0] == 0 || extent[1] == 0 {
            return Ok(());
        }
        if self.has_pending_draws() {
            let (data, bytes_per_row) = padded_region(pixels, extent);
            self.stage_region(&atlas.texture, origin, extent, &data, bytes_per_row);
            return Ok(());
        }
        self.queue.write_texture(
            texel_copy(&atlas.texture, origin),
            pixels.as_raw(),
            TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4 * pixels.width()),
                rows_per_image: Some(extent[1]),
            },
            extent3d(extent),
        );
        Ok(())
    }

    fn clear_region(
        &mut self,
        atlas: &Self::Texture,
        origin: [u32; 2],
        size: u32,
    ) -> TileResult<()> {
        if size == 0 {
            return Ok(());
        }
        if self.has_pending_draws() {
            let bytes_per_row = aligned_row_bytes(size);
            let zeros = vec![0_u8; bytes_per_row as usize * size as usize];
            self.stage_region(&atlas.texture, origin, [size, size], &zeros, bytes_per_row);
            return Ok(());
        }
        let zeros = vec![0_u8; 4 * size as usize * size as usize];
        self.queue.write_texture(
            texel_copy(&atlas.texture, origin),
            &zeros,
            TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4 * size),
                rows_per_image: Some(size),
            },
            extent3d([size, size]),
        );
        Ok(())
    }

    fn create_vertex_buffer(&mut self, size: u64) -> TileResult<Self::Buffer> {
        Ok(self.device.create_buffer(&BufferDescriptor {
            label: Some("tile-vertices"),
            size,
            usage: BufferUsages::VERTEX | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        }))
    }

    fn write_vertex_buffer(&mut self, buffer: &Self::Buffer, bytes: &[u8]) -> TileResult<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        if self.has_pending_draws() {
            let staging = self.device.create_buffer_init(&util::BufferInitDescriptor {
                label: Some("tile-staged-vertices"),
                contents: bytes,
                usage: BufferUsages::COPY_SRC,
            });
            self.stage(StagedCopy::Vertices {
                staging,
                target: buffer.clone(),
                size: bytes.len() as u64,
            });
            return Ok(());
        }
        self.queue.write_buffer(buffer, 0, bytes);
        Ok(())
    }

    // Recorded draws and staged copies hold their own reference.
    fn destroy_buffer(&mut self, buffer: Self::Buffer) {
        drop(buffer);
    }

    fn write_index_buffer(&mut self, indices: &[u32]) -> TileResult<()> {
        self.index_buffer = Some(self.device.create_buffer_init(&util::BufferInitDescriptor {
            label: Some("tile-indices"),
            contents: bytemuck::cast_slice(indices),
            usage: BufferUsages::INDEX,
        }));
        Ok(())
    }

    fn compile_program(
        &mut self,
        source: &TileShaderSource,
        layout: &VertexLayout,
    ) -> TileResult<Self::Program> {
        let pipeline = scoped(&self.device, "tile-pipeline", || {
            build_tile_pipeline(&self.device, self.render_format, source, layout)
        })?;
        debug!(
            target: "tilebatch_wgpu",
            "compiled tile pipeline for {} units",
            source.max_textures()
        );
        Ok(pipeline)
    }

    fn draw(&mut self, call: DrawCall<'_, Self>) -> TileResult<()> {
        let indices = self
            .index_buffer
            .clone()
            .ok_or_else(|| TileError::Device(anyhow!("draw issued before the index buffer")))?;
        if call.atlases.len() > call.program.max_textures {
            return Err(anyhow!(
                "{} textures bound to a program with {} units",
                call.atlases.len(),
                call.program.max_textures
            )
            .into());
        }
        let uniforms = self.device.create_buffer_init(&util::BufferInitDescriptor {
            label: Some("tile-uniforms"),
            contents: bytemuck::bytes_of(&call.uniforms),
            usage: BufferUsages::UNIFORM,
        });
        let mut entries = vec![
            BindGroupEntry {
                binding: 0,
                resource: uniforms.as_entire_binding(),
            },
            BindGroupEntry {
                binding: 1,
                resource: BindingResource::Sampler(&self.sampler),
            },
        ];
        for unit in 0..call.program.max_textures {
            let view = call
                .atlases
                .get(unit)
                .map_or(&self.placeholder, |bound| &bound.view);
            entries.push(BindGroupEntry {
                binding: FIRST_ATLAS_BINDING + unit as u32,
                resource: BindingResource::TextureView(view),
            });
        }
        let bind_group = self.device.create_bind_group(&BindGroupDescriptor {
            label: Some("tile-bind-group"),
            layout: &call.program.bind_layout,
            entries: &entries,
        });
        let draw = RecordedDraw {
            pipeline: call.program.pipeline.clone(),
            bind_group,
            vertices: call.vertices.clone(),
            indices,
            index_count: call.index_count,
        };
        match self.segments.last_mut() {
            Some(last) => last.draws.push(draw),
            None => self.segments.push(PassSegment {
                copies: Vec::new(),
                draws: vec![draw],
            }),
        }
        Ok(())
    }
}
