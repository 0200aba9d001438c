//! Batched tile rendering for 2D scenes.
//!
//! Tiles are collected into [`TileLayer`]s (one draw call each) or routed across
//! several layers by a [`CompositeTileLayer`] when a scene references more
//! textures than one draw can bind. Layers draw through a [`TileBackend`]:
//! [`HardwareBackend`] batches quads over any [`TileDevice`], [`RasterBackend`]
//! rasterizes in software, and [`ZLayer`] caches rasterized layers until they
//! change.
#![allow(
    clippy::too_many_arguments,
    reason = "tile placement mirrors the flat record layout"
)]
#![allow(
    clippy::float_cmp,
    reason = "strip decomposition and animation checks compare exact pixel values"
)]
#![allow(
    clippy::module_name_repetitions,
    reason = "TileLayer, TileConfig and friends read better than bare names"
)]
#![allow(clippy::missing_errors_doc, reason = "Internal crate")]
#![allow(clippy::missing_panics_doc, reason = "Internal crate")]

pub mod backend;
pub mod binder;
pub mod buffer_pool;
pub mod composite;
pub mod compositor;
pub mod config;
pub mod device;
pub mod error;
pub mod frame;
pub mod graphics;
pub mod hardware;
pub mod layer;
pub mod raster;
pub mod record;
pub mod shader;
pub mod texture;
pub mod vertex;

pub use backend::{DrawStats, TileBackend, TileRenderer};
pub use binder::{BoundUnits, DirectSlot, DirectTextures, TextureSlotBinder};
pub use buffer_pool::{
    Clock, ManualClock, SystemClock, UploadKey, VertexBufferEntry, VertexBufferId,
    VertexBufferPool,
};
pub use composite::CompositeTileLayer;
pub use compositor::{LayerNode, ZLayer};
pub use config::{BackendKind, TileConfig};
pub use device::{
    DeviceCall, DeviceLimits, DrawCall, RecordedHandle, RecordingDevice, TileDevice,
};
pub use error::{TileError, TileResult};
pub use frame::FrameContext;
pub use graphics::{GraphicsFill, GraphicsLayer};
pub use hardware::HardwareBackend;
pub use layer::{DEFAULT_SHADOW_COLOR, Placement, TileLayer};
pub use raster::RasterBackend;
pub use record::{TileRecord, TileRect};
pub use shader::{ShaderCache, TileShaderSource, TileUniforms, generate_sample_chain, pixel_to_clip};
pub use texture::{FrameRect, TextureRef, TileTexture};
pub use vertex::{
    AtlasGeometry, AttributeFormat, FRAME_EPSILON, TileVertex, VertexAttribute, VertexLayout,
    decompose_composite_index, quad_indices,
};
