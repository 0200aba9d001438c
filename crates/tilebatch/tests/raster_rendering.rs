use image::{Rgba, RgbaImage};
use kurbo::Affine;
use std::sync::Arc;
use tilebatch::{
    BackendKind, CompositeTileLayer, FrameContext, LayerNode, RecordingDevice, TileBackend,
    TileConfig, TileLayer, TileRenderer, TileTexture, ZLayer,
};

const GREEN: Rgba<u8> = Rgba([0, 255, 0, 255]);
const BLUE: Rgba<u8> = Rgba([0, 0, 255, 255]);

fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn solid(color: Rgba<u8>) -> TileTexture {
    TileTexture::new(Arc::new(RgbaImage::from_pixel(16, 16, color)))
}

fn raster_renderer(width: u32, height: u32) -> TileRenderer<RecordingDevice> {
    let config = TileConfig::from_json(r#"{ "backend": "raster" }"#).expect("valid config");
    TileRenderer::from_config(&config, (width, height), || Ok(RecordingDevice::new()))
        .expect("raster renderer")
}

#[test]
fn renderer_from_json_draws_composite_children_in_order() {
    init_logs();
    let mut renderer = raster_renderer(32, 16);
    assert_eq!(renderer.kind(), BackendKind::Raster);

    let mut composite = CompositeTileLayer::with_textures(&[solid(GREEN), solid(BLUE)], 1);
    assert_eq!(composite.child_count(), 2);
    composite.add_rect(0, 0.0, 0.0, 0.0, 0.0, 16.0, 16.0, 0.0, 0.0);
    composite.add_rect(1, 0.0, 0.0, 8.0, 0.0, 16.0, 16.0, 0.0, 0.0);

    let frame = FrameContext::default();
    renderer.begin_frame(&frame);
    let mut node = LayerNode::from(composite);
    let stats = renderer
        .draw_node(&mut node, Affine::IDENTITY, &frame)
        .expect("raster draw");
    assert_eq!(stats.quads, 2);
    assert_eq!(renderer.frame_stats().quads, 2);

    let TileRenderer::Raster(raster) = &renderer else {
        unreachable!("configured for raster")
    };
    assert_eq!(*raster.target().get_pixel(4, 4), GREEN);
    // the later child overlaps the earlier one
    assert_eq!(*raster.target().get_pixel(12, 4), BLUE);
    assert_eq!(*raster.target().get_pixel(28, 4), Rgba([0, 0, 0, 0]));
}

#[test]
fn z_layer_caches_until_content_changes() {
    init_logs();
    let mut z_layer = ZLayer::new(32, 32);
    let mut layer = TileLayer::new(4);
    assert!(layer.add_frame(&solid(GREEN), 0.0, 0.0, 0.0, 0.0).is_placed());
    z_layer.push(layer);

    let mut target = RgbaImage::new(64, 64);
    let frame = FrameContext::default();
    assert!(z_layer.render(&mut target, Affine::IDENTITY, &frame));
    for step in 1..=4 {
        let scroll = Affine::translate((f64::from(step) * 4.0, 0.0));
        assert!(!z_layer.render(&mut target, scroll, &frame));
    }
    assert_eq!(z_layer.redraws(), 1);
    assert_eq!(*target.get_pixel(30, 4), GREEN);

    if let LayerNode::Tiles(layer) = &mut z_layer.layers_mut()[0] {
        layer.add_rect_static(-1, 0.0, 0.0, 16.0, 16.0, 8.0, 8.0);
    }
    assert!(z_layer.cache_if_dirty(&frame));
    assert_eq!(z_layer.buffer().get_pixel(18, 18).0, [0, 0, 0, 128]);
}

#[test]
fn animated_tiles_cycle_through_strip_frames() {
    init_logs();
    // a 32×16 strip: green frame then blue frame
    let strip = RgbaImage::from_fn(32, 16, |x, _| if x < 16 { GREEN } else { BLUE });
    let texture = TileTexture::new(Arc::new(strip));
    let mut layer = TileLayer::with_textures(&[texture], 4);
    layer.add_rect(0, 0.0, 0.0, 0.0, 0.0, 16.0, 16.0, 16.0, 0.0);
    assert!(layer.has_anim());

    let mut z_layer = ZLayer::new(16, 16);
    z_layer.push(layer);
    assert!(z_layer.cache_if_dirty(&FrameContext::with_phase(0.0)));
    assert_eq!(*z_layer.buffer().get_pixel(8, 8), GREEN);
    assert!(z_layer.cache_if_dirty(&FrameContext::new([1.0, 0.0])));
    assert_eq!(*z_layer.buffer().get_pixel(8, 8), BLUE);
}
