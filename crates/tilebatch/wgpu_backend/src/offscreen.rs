//! Headless rendering: a surfaceless device, a render target and CPU readback.

use crate::device::WgpuTileDevice;
use crate::validation::submit_scoped;
use anyhow::anyhow;
use image::RgbaImage;
use pollster::block_on;
use std::sync::mpsc::channel;
use tilebatch::TileResult;
use wgpu::*;

/// Device and queue created without a surface.
pub struct OffscreenGpuContext {
    pub device: Device,
    pub queue: Queue,
}

impl OffscreenGpuContext {
    /// Hand the context to a tile device drawing into `render_format` targets.
    pub fn into_tile_device(self, render_format: TextureFormat) -> WgpuTileDevice {
        WgpuTileDevice::new(self.device, self.queue, render_format)
    }
}

/// Request the default adapter and a device on it.
///
/// # Errors
/// Returns [`tilebatch::TileError::Device`] if no adapter is available or
/// the device request fails.
pub fn initialize_gpu() -> TileResult<OffscreenGpuContext> {
    let instance = Instance::new(&InstanceDescriptor::default());
    let adapter = block_on(instance.request_adapter(&RequestAdapterOptions::default()))
        .map_err(|err| anyhow!("no wgpu adapter for offscreen tiles: {err}"))?;
    log::info!(target: "tilebatch_wgpu", "offscreen adapter: {}", adapter.get_info().name);
    let (device, queue) = block_on(adapter.request_device(&DeviceDescriptor {
        label: Some("tilebatch-offscreen-device"),
        ..Default::default()
    }))
    .map_err(|err| anyhow!("offscreen device request failed: {err}"))?;
    Ok(OffscreenGpuContext { device, queue })
}

pub fn create_render_texture(
    device: &Device,
    width: u32,
    height: u32,
    render_format: TextureFormat,
) -> (Texture, TextureView) {
    let texture = device.create_texture(&TextureDescriptor {
        label: Some("tile-offscreen-target"),
        size: Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: TextureDimension::D2,
        format: render_format,
        usage: TextureUsages::RENDER_ATTACHMENT | TextureUsages::COPY_SRC,
        view_formats: &[],
    });
    let view = texture.create_view(&TextureViewDescriptor::default());
    (texture, view)
}

/// A mappable copy of an RGBA8 render target.
///
/// [`Self::copy_from`] records the copy; once that work is submitted,
/// [`Self::into_image`] waits for the buffer and unpads its rows.
pub struct TargetReadback {
    buffer: Buffer,
    width: u32,
    height: u32,
    padded_row: u32,
}

impl TargetReadback {
    pub fn new(device: &Device, width: u32, height: u32) -> Self {
        let padded_row =
            (width * 4).div_ceil(COPY_BYTES_PER_ROW_ALIGNMENT) * COPY_BYTES_PER_ROW_ALIGNMENT;
        let buffer = device.create_buffer(&BufferDescriptor {
            label: Some("tile-readback"),
            size: u64::from(padded_row) * u64::from(height),
            usage: BufferUsages::COPY_DST | BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        Self {
            buffer,
            width,
            height,
            padded_row,
        }
    }

    pub fn copy_from(&self, encoder: &mut CommandEncoder, texture: &Texture) {
        encoder.copy_texture_to_buffer(
            texture.as_image_copy(),
            TexelCopyBufferInfo {
                buffer: &self.buffer,
                layout: TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(self.padded_row),
                    rows_per_image: Some(self.height),
                },
            },
            Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
        );
    }

    /// # Errors
    /// Returns [`tilebatch::TileError::Device`] if the buffer cannot be mapped.
    pub fn into_image(self, device: &Device) -> TileResult<RgbaImage> {
        let slice = self.buffer.slice(..);
        let (sender, receiver) = channel();
        slice.map_async(MapMode::Read, move |mapped| drop(sender.send(mapped)));
        device
            .poll(PollType::Wait)
            .map_err(|err| anyhow!("waiting for tile readback failed: {err}"))?;
        receiver
            .recv()
            .map_err(|_| anyhow!("tile readback was never mapped"))?
            .map_err(|err| anyhow!("tile readback mapping failed: {err}"))?;

        let row = self.width as usize * 4;
        let mut image = RgbaImage::new(self.width, self.height);
        if row > 0 {
            let mapped = slice.get_mapped_range();
            for (dst, src) in image
                .chunks_exact_mut(row)
                .zip(mapped.chunks_exact(self.padded_row as usize))
            {
                dst.copy_from_slice(&src[..row]);
            }
        }
        self.buffer.unmap();
        Ok(image)
    }
}

/// Replay everything recorded on `tile_device` over a transparent
/// `width`×`height` target and read the result back.
///
/// # Errors
/// Returns [`tilebatch::TileError::Device`] if submission or readback fails.
pub fn render_frame_to_rgba(
    tile_device: &mut WgpuTileDevice,
    width: u32,
    height: u32,
) -> TileResult<RgbaImage> {
    let _span = tracing::info_span!("tile_offscreen_frame", width, height).entered();
    let (texture, view) = create_render_texture(
        tile_device.device(),
        width,
        height,
        tile_device.render_format(),
    );
    let readback = TargetReadback::new(tile_device.device(), width, height);
    let mut encoder = tile_device
        .device()
        .create_command_encoder(&CommandEncoderDescriptor {
            label: Some("tile-offscreen-encoder"),
        });
    tile_device.encode(&mut encoder, &view, Some(Color::TRANSPARENT));
    readback.copy_from(&mut encoder, &texture);
    submit_scoped(
        tile_device.device(),
        tile_device.queue(),
        "tile-offscreen-frame",
        [encoder.finish()],
    )?;
    readback.into_image(tile_device.device())
}
