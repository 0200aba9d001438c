use image::{Rgba, RgbaImage};
use std::sync::Arc;
use tilebatch::{
    CompositeTileLayer, FrameContext, HardwareBackend, TileBackend, TileConfig, TileError,
    TileLayer, TileTexture, pixel_to_clip,
};
use tilebatch_wgpu::{WgpuTileDevice, initialize_gpu, render_frame_to_rgba, scoped};
use wgpu::{BufferDescriptor, BufferUsages, Device, TextureFormat};

const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);
const BLUE: Rgba<u8> = Rgba([0, 0, 255, 255]);
const GRAY: Rgba<u8> = Rgba([128, 128, 128, 255]);

fn solid(color: Rgba<u8>) -> TileTexture {
    TileTexture::new(Arc::new(RgbaImage::from_pixel(16, 16, color)))
}

fn gpu_backend(config: TileConfig) -> Option<HardwareBackend<WgpuTileDevice>> {
    let _ = env_logger::builder().is_test(true).try_init();
    let Ok(context) = initialize_gpu() else {
        log::warn!("no wgpu adapter available, skipping");
        return None;
    };
    let device = context.into_tile_device(TextureFormat::Rgba8Unorm);
    Some(HardwareBackend::new(device, config).expect("config is valid"))
}

/// Four 32px regions per 64px atlas, sixteen regions across four atlases.
fn small_atlas_config() -> TileConfig {
    TileConfig {
        buffer_size: 64,
        bound_size: 32,
        ..TileConfig::default()
    }
}

#[test]
fn solid_tile_reaches_the_target() {
    let Some(mut backend) = gpu_backend(TileConfig::default()) else {
        return;
    };
    let mut layer = TileLayer::with_textures(&[solid(RED)], 16);
    layer.add_rect_static(0, 0.0, 0.0, 0.0, 0.0, 16.0, 16.0);

    let frame = FrameContext::default();
    backend.begin_frame(&frame);
    let stats = backend
        .draw_layer(&mut layer, pixel_to_clip(32, 32), &frame)
        .expect("tile draw");
    assert_eq!(stats.draw_calls, 1);
    assert_eq!(backend.device().pending_draws(), 1);

    let image = render_frame_to_rgba(backend.device_mut(), 32, 32).expect("offscreen frame");
    assert_eq!(*image.get_pixel(8, 8), RED);
    assert_eq!(image.get_pixel(24, 24).0, [0; 4]);
    assert_eq!(backend.device().pending_draws(), 0);
}

#[test]
fn composite_children_sharing_a_region_keep_their_own_pixels() {
    let Some(mut backend) = gpu_backend(small_atlas_config()) else {
        return;
    };
    // textures 0 and 16 both land in region 0, one per child
    let textures: Vec<TileTexture> = (0..20)
        .map(|index| match index {
            0 => solid(RED),
            16 => solid(BLUE),
            _ => solid(GRAY),
        })
        .collect();
    let mut composite = CompositeTileLayer::with_textures(&textures, 16);
    composite.add_rect(0, 0.0, 0.0, 0.0, 0.0, 16.0, 16.0, 0.0, 0.0);
    composite.add_rect(16, 0.0, 0.0, 16.0, 0.0, 16.0, 16.0, 0.0, 0.0);

    let frame = FrameContext::default();
    backend.begin_frame(&frame);
    let stats = backend
        .draw_composite(&mut composite, pixel_to_clip(32, 32), &frame)
        .expect("composite draw");
    assert_eq!(stats.draw_calls, 2);
    assert!(backend.device().staged_copies() > 0);

    let image = render_frame_to_rgba(backend.device_mut(), 32, 32).expect("offscreen frame");
    assert_eq!(*image.get_pixel(8, 8), RED);
    assert_eq!(*image.get_pixel(24, 8), BLUE);
    assert_eq!(image.get_pixel(8, 24).0, [0; 4]);
}

#[test]
fn layers_reusing_an_atlas_region_in_one_frame_draw_both_sources() {
    let Some(mut backend) = gpu_backend(small_atlas_config()) else {
        return;
    };
    // two textures per layer keeps both on the atlas path
    let mut first = TileLayer::with_textures(&[solid(RED), solid(GRAY)], 16);
    first.add_rect_static(0, 0.0, 0.0, 0.0, 0.0, 16.0, 16.0);
    let mut second = TileLayer::with_textures(&[solid(BLUE), solid(GRAY)], 16);
    second.add_rect_static(0, 0.0, 0.0, 16.0, 16.0, 16.0, 16.0);

    let frame = FrameContext::default();
    let transform = pixel_to_clip(32, 32);
    backend.begin_frame(&frame);
    backend
        .draw_layer(&mut first, transform, &frame)
        .expect("first layer");
    backend
        .draw_layer(&mut second, transform, &frame)
        .expect("second layer");
    assert_eq!(backend.device().pending_draws(), 2);

    let image = render_frame_to_rgba(backend.device_mut(), 32, 32).expect("offscreen frame");
    assert_eq!(*image.get_pixel(8, 8), RED);
    assert_eq!(*image.get_pixel(24, 24), BLUE);
    assert_eq!(image.get_pixel(24, 8).0, [0; 4]);
}

fn buffer_with(device: &Device, usage: BufferUsages) -> wgpu::Buffer {
    device.create_buffer(&BufferDescriptor {
        label: Some("scoped-test-buffer"),
        size: 16,
        usage,
        mapped_at_creation: false,
    })
}

#[test]
fn scoped_turns_validation_errors_into_device_errors() {
    let _ = env_logger::builder().is_test(true).try_init();
    let Ok(context) = initialize_gpu() else {
        log::warn!("no wgpu adapter available, skipping");
        return;
    };
    let device = &context.device;

    // read and write mapping on one buffer needs a feature the default device lacks
    let rejected = scoped(device, "both-mapped", || {
        buffer_with(device, BufferUsages::MAP_READ | BufferUsages::MAP_WRITE)
    });
    assert!(matches!(rejected, Err(TileError::Device(_))));

    let accepted = scoped(device, "copy-target", || {
        buffer_with(device, BufferUsages::COPY_DST)
    });
    assert!(accepted.is_ok());
}
